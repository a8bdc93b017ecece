use std::process::ExitCode;

use clap::Parser;
use log::LevelFilter;

use inkcell::cli::{self, CliArgs};
use inkcell::logger;

fn main() -> ExitCode {
    let args = CliArgs::parse();
    let level = if args.verbose { LevelFilter::Debug } else { LevelFilter::Info };
    // Not fatal: the replay still runs without a log file.
    if let Err(e) = logger::init(level) {
        eprintln!("[logger] could not open session log: {}", e);
    }
    cli::run(args)
}
