//! pwout - shows how loud the default PipeWire output sink is
//!
//! Prints a single reading, a stream of readings or a bar graph.

mod audio;
mod cli;
mod driver;
mod server;
mod session;

use std::process::ExitCode;

use clap::Parser;
use log::{debug, error};

fn main() -> ExitCode {
    let args = cli::Args::parse();

    // Usage faults are reported before anything touches PipeWire
    let mode = match args.mode() {
        Ok(mode) => mode,
        Err(e) => {
            println!("{}", e);
            return ExitCode::from(cli::EXIT_USAGE);
        }
    };

    cli::init_logging(&args);
    debug!("Starting pwout in {:?} mode", mode);

    match driver::run(mode, &args.device) {
        Ok(status) => ExitCode::from(u8::try_from(status).unwrap_or(1)),
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}
