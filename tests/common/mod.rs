//! Helpers for driving the `kestrel` binary.

use std::io::Write;
use std::process::{Command, Output};

use tempfile::NamedTempFile;

/// Write `json` to a temporary program file.
#[allow(dead_code)]
pub fn program_file(json: &str) -> NamedTempFile {
    let mut file = NamedTempFile::with_suffix(".json").expect("Failed to create temp file");
    file.write_all(json.as_bytes())
        .expect("Failed to write program");
    file
}

/// Run the `kestrel` binary with `args`, with logging switched off.
#[allow(dead_code)]
pub fn kestrel(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_kestrel"))
        .args(args)
        .env("RUST_LOG", "off")
        .output()
        .expect("Failed to execute kestrel")
}

#[allow(dead_code)]
pub fn stdout(output: &Output) -> String {
    assert!(
        output.status.success(),
        "kestrel failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[allow(dead_code)]
pub fn stderr(output: &Output) -> String {
    assert!(!output.status.success(), "kestrel unexpectedly succeeded");
    String::from_utf8_lossy(&output.stderr).into_owned()
}

#[allow(dead_code)]
pub const SUM: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/demos/sum.json");
