use std::path::Path;

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::error::MergeError;

/// File name prefix of the daily log files.
const LOG_FILE_PREFIX: &str = "mailmerge";

/// Filter directives for a configured level: the mailmerge crates log at
/// `level`, everything else at `warn`.
pub fn filter_directives(level: &str) -> String {
    let level = level.trim().to_ascii_lowercase();
    format!("warn,merge_app={level},merge_docs={level},merge_core={level}")
}

/// Builds the filter for `level`. An unknown level is a config error.
pub fn filter_for(level: &str) -> Result<EnvFilter, MergeError> {
    EnvFilter::try_new(filter_directives(level))
        .map_err(|e| MergeError::Config(format!("'{level}' is not a log level: {e}")))
}

/// Starts logging to a daily file in `logs_dir` plus compact stderr output.
///
/// `RUST_LOG` wins over `level` when set. Keep the returned guard alive
/// until exit so buffered lines reach the file.
pub fn init_logging(logs_dir: &Path, level: &str) -> Result<WorkerGuard> {
    std::fs::create_dir_all(logs_dir)
        .with_context(|| format!("Failed to create log directory: {}", logs_dir.display()))?;

    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => filter_for(level)?,
    };

    let file_appender = tracing_appender::rolling::daily(logs_dir, LOG_FILE_PREFIX);
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_ansi(false)
                .with_writer(file_writer),
        )
        .with(
            fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr)
                .compact(),
        )
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {e}"))?;

    Ok(guard)
}
