//! Error types for the hearing threshold engine.
//!
//! This module defines custom error enums for each component of the engine,
//! providing descriptive error messages with context information.

use crate::model::Ear;
use thiserror::Error;

/// Errors related to configuration management.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found at '{0}'")]
    FileNotFound(String),

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),

    #[error("Failed to write configuration: {0}")]
    WriteError(#[from] std::io::Error),
}

/// Errors reported by a tone player.
#[derive(Error, Debug)]
pub enum PlaybackError {
    #[error("Audio output device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Tone playback failed at {frequency_hz}Hz ({ear}): {reason}")]
    Failed {
        frequency_hz: u32,
        ear: Ear,
        reason: String,
    },
}

/// Errors raised while driving a test session.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Run for {frequency_hz}Hz ({ear}) was aborted")]
    Aborted { frequency_hz: u32, ear: Ear },

    #[error("Response source closed before the run converged")]
    ResponseSourceClosed,

    #[error("Stimulus playback failed: {0}")]
    Playback(#[from] PlaybackError),

    #[error("Run for {frequency_hz}Hz ({ear}) has not converged")]
    NotConverged { frequency_hz: u32, ear: Ear },

    #[error("Run for {frequency_hz}Hz ({ear}) does not match the pending pair")]
    UnexpectedRun { frequency_hz: u32, ear: Ear },

    #[error("Session incomplete: {completed}/{total} pairs finished")]
    Incomplete { completed: usize, total: usize },
}

/// Errors related to logging initialization.
#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("Could not determine a data directory for log files")]
    DataDirectoryNotFound,

    #[error("Failed to create log directory '{path}': {source}")]
    DirectoryCreationFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to create log file appender: {0}")]
    AppenderCreationFailed(String),
}

/// Top-level engine errors.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Logging error: {0}")]
    Logging(#[from] LoggingError),

    #[error("Failed to serialize report: {0}")]
    Report(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
