//! Command-line interface for running Kestrel programs.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use kestrel::pipeline::RunOptions;
use kestrel_compiler::CompilerOptions;

#[derive(Parser)]
#[command(name = "kestrel")]
#[command(about = "Run compiled Kestrel programs with suspendable calls", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Compile a program and run its main function to completion
    Run {
        /// Program in JSON IR form
        program: PathBuf,

        /// Arguments passed to main (`nil`, `true`, `false`, numbers or strings)
        args: Vec<String>,

        /// Pause after this many scheduler ticks, then resume
        #[arg(long)]
        quantum: Option<u64>,

        #[command(flatten)]
        compiler: CompilerArgs,
    },
    /// Print the compiled form of every function
    #[command(alias = "dis")]
    Disasm {
        program: PathBuf,

        #[command(flatten)]
        compiler: CompilerArgs,
    },
}

#[derive(Args)]
pub struct CompilerArgs {
    /// Split function bodies longer than this many instructions into segments
    #[arg(long, default_value_t = CompilerOptions::DEFAULT_SEGMENT_THRESHOLD)]
    pub segment_threshold: usize,

    /// Ticks registered at every loop back edge; 0 disables back-edge checkpoints
    #[arg(long, default_value_t = 1)]
    pub back_edge_ticks: u32,
}

impl CompilerArgs {
    pub fn options(&self) -> CompilerOptions {
        CompilerOptions::default()
            .with_segment_threshold(self.segment_threshold)
            .with_back_edge_ticks((self.back_edge_ticks > 0).then_some(self.back_edge_ticks))
    }
}

impl Command {
    pub fn run_options(compiler: &CompilerArgs, quantum: Option<u64>) -> RunOptions {
        RunOptions {
            compiler: compiler.options(),
            quantum,
        }
    }
}
