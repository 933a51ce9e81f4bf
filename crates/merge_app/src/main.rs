mod cli;
mod commands;

use clap::Parser;
use std::process::ExitCode;
use tracing::{debug, error, warn};

use merge_core::{MergeConfig, classify_error, logging};

use crate::cli::Cli;
use crate::commands::Session;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn main() -> ExitCode {
    let cli = Cli::parse();

    let (config, config_error) = match MergeConfig::load() {
        Ok(config) => (config, None),
        Err(e) => (MergeConfig::default(), Some(e)),
    };
    let level = cli.log_level.clone().unwrap_or_else(|| config.log_level.clone());

    // Runs without logging when the log directory is unavailable.
    let _log_guard = match config
        .effective_logs_dir()
        .and_then(|dir| logging::init_logging(&dir, &level))
    {
        Ok(guard) => Some(guard),
        Err(e) => {
            eprintln!("Logging disabled: {e:#}");
            None
        }
    };
    debug!("mailmerge v{VERSION}");
    if let Some(e) = config_error {
        warn!("Using default settings: {e:#}");
    }

    let session = Session::new(config, &cli);
    match commands::run(cli, session) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let classified = classify_error(&e);
            error!("{:?}: {}", classified.category, classified.message);
            eprintln!("Error: {}", classified.user_message);
            if classified.message != classified.user_message {
                eprintln!("  {}", classified.message);
            }
            ExitCode::FAILURE
        }
    }
}
