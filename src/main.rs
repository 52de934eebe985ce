//! Kestrel CLI entry point.

mod cli;

use clap::Parser;
use cli::{Cli, Command};
use kestrel::pipeline::{self, PipelineError};
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(e) = execute(cli.command) {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

fn execute(command: Command) -> Result<(), PipelineError> {
    match command {
        Command::Run {
            program,
            args,
            quantum,
            compiler,
        } => {
            let options = Command::run_options(&compiler, quantum);
            let args = args.iter().map(|arg| pipeline::parse_value(arg)).collect();
            let report = pipeline::run_file(&program, args, &options)?;
            for value in &report.values {
                println!("{value}");
            }
            tracing::debug!(pauses = report.pauses, tasks = report.tasks, "run complete");
        }
        Command::Disasm { program, compiler } => {
            let loaded = pipeline::load_program(&program)?;
            let compiled = pipeline::compile(&loaded, &compiler.options())?;
            print!("{}", pipeline::disassemble(&compiled));
        }
    }
    Ok(())
}
