//! Command-line interface for pwout
//!
//! Handles argument parsing, display mode selection and logging configuration.

use clap::Parser;
use log::LevelFilter;

use crate::audio::DisplayMode;

/// Exit status for usage faults
pub const EXIT_USAGE: u8 = 2;

pub const USAGE: &str = "\
pwout displays PipeWire output information

usage: pwout [-1 | -s | -b] [-d SINK]

       -1  get one value then quit
       -s  stream values continually to stdout
       -b  bar graph drawn continually to stdout

return value is 0 if there is audio, 1 if silent";

/// pwout - loudness of whatever the default output sink is playing
#[derive(Parser, Debug)]
#[command(name = "pwout")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Get one value then quit (exit status 0 if there is audio, 1 if silent)
    #[arg(short = '1')]
    pub once: bool,

    /// Stream values continually to stdout
    #[arg(short = 's')]
    pub stream: bool,

    /// Bar graph drawn continually to stdout
    #[arg(short = 'b')]
    pub bars: bool,

    /// Sink to monitor instead of the system default
    #[arg(short, long, env = "PWOUT_DEVICE", default_value = "", hide_default_value = true)]
    pub device: String,

    /// Increase logging verbosity
    /// -v = debug, -vv = trace, -vvv = trace including PipeWire internals
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long)]
    pub quiet: bool,
}

/// Invalid combination of mode flags
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum UsageError {
    #[error("{}", USAGE)]
    NoMode,

    #[error("pwout: cannot set more than one of -1, -s, -b flags")]
    ConflictingModes,
}

impl Args {
    /// The single display mode selected by `-1`, `-s` or `-b`
    pub fn mode(&self) -> Result<DisplayMode, UsageError> {
        match (self.once, self.stream, self.bars) {
            (false, false, false) => Err(UsageError::NoMode),
            (true, false, false) => Ok(DisplayMode::OneShot),
            (false, true, false) => Ok(DisplayMode::ContinuousNumeric),
            (false, false, true) => Ok(DisplayMode::BarGraph),
            _ => Err(UsageError::ConflictingModes),
        }
    }

    /// Get the log level filter based on verbosity flags
    pub fn log_level(&self) -> LevelFilter {
        if self.quiet {
            LevelFilter::Error
        } else {
            match self.verbose {
                0 => LevelFilter::Info,
                1 => LevelFilter::Debug,
                _ => LevelFilter::Trace,
            }
        }
    }
}

/// Initialize the logging system based on CLI arguments
pub fn init_logging(args: &Args) {
    let mut builder = env_logger::Builder::new();

    // Base level for all modules - keep at warn to suppress noisy deps
    builder.filter_level(LevelFilter::Warn);

    builder.filter_module("pwout", args.log_level());

    if args.verbose >= 3 {
        builder.filter_module("pipewire", args.log_level());
    }

    // RUST_LOG still wins for anyone debugging a specific module
    if let Ok(filters) = std::env::var("RUST_LOG") {
        builder.parse_filters(&filters);
    }

    builder.format_timestamp_millis().init();
}
