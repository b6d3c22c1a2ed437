//! Logging setup for the hearing threshold engine.
//!
//! This module configures tracing with JSON output to a daily-rotating log
//! file under the user's data directory and human-readable output to stderr.
//! Stdout is left alone: the binary prints its report there.

use crate::error::LoggingError;
use std::path::{Path, PathBuf};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan, time::UtcTime},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Application directory under the platform data directory
const APP_DIR: &str = "hearing-threshold";
/// Log file name prefix
const LOG_FILE_PREFIX: &str = "session";
/// Maximum number of log files to retain
const MAX_LOG_FILES: usize = 3;
/// Filter used when `RUST_LOG` is not set
const DEFAULT_FILTER: &str = "info";

/// Initialize logging with the default log directory.
pub fn init_logging() -> Result<LogGuard, LoggingError> {
    let log_dir = default_log_directory()?;
    init_logging_in(&log_dir)
}

/// Initialize logging, writing the rotating JSON file into `log_dir`.
///
/// Log rotation occurs daily, retaining the last 3 files.
pub fn init_logging_in(log_dir: &Path) -> Result<LogGuard, LoggingError> {
    std::fs::create_dir_all(log_dir).map_err(|e| LoggingError::DirectoryCreationFailed {
        path: log_dir.display().to_string(),
        source: e,
    })?;

    let file_appender = build_file_appender(log_dir)?;
    let (non_blocking_file, file_guard) = tracing_appender::non_blocking(file_appender);
    let (non_blocking_stderr, stderr_guard) = tracing_appender::non_blocking(std::io::stderr());

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let file_layer = fmt::layer()
        .json()
        .with_timer(UtcTime::rfc_3339())
        .with_span_events(FmtSpan::CLOSE)
        .with_current_span(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_writer(non_blocking_file);

    let stderr_layer = fmt::layer()
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .with_writer(non_blocking_stderr);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stderr_layer)
        .try_init()
        .map_err(|e| LoggingError::AppenderCreationFailed(e.to_string()))?;

    Ok(LogGuard {
        _file_guard: file_guard,
        _stderr_guard: stderr_guard,
    })
}

fn build_file_appender(log_dir: &Path) -> Result<RollingFileAppender, LoggingError> {
    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .max_log_files(MAX_LOG_FILES)
        .filename_prefix(LOG_FILE_PREFIX)
        .filename_suffix("log")
        .build(log_dir)
        .map_err(|e| LoggingError::AppenderCreationFailed(e.to_string()))
}

/// `<data_dir>/hearing-threshold`
pub fn default_log_directory() -> Result<PathBuf, LoggingError> {
    dirs::data_dir()
        .map(|dir| dir.join(APP_DIR))
        .ok_or(LoggingError::DataDirectoryNotFound)
}

/// Guard that keeps the non-blocking writers alive.
/// Must be held for the lifetime of the application.
pub struct LogGuard {
    _file_guard: tracing_appender::non_blocking::WorkerGuard,
    _stderr_guard: tracing_appender::non_blocking::WorkerGuard,
}
