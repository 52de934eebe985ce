//! Kestrel: ahead-of-time compiled scripts whose calls can be suspended
//! and resumed.
//!
//! The work happens in the member crates: `kestrel-ir` defines the
//! program form, `kestrel-compiler` makes functions resumable and
//! `kestrel-runtime` drives calls. This crate ties them into the
//! pipeline behind the `kestrel` command.

pub mod pipeline;

pub use kestrel_compiler as compiler;
pub use kestrel_ir as ir;
pub use kestrel_runtime as runtime;
