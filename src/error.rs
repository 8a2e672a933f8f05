//! Error types for voxpipe.
//!
//! Only construction-time misconfiguration and controller misuse surface as
//! `VoxpipeError`. Per-cycle stage failures are structured
//! [`FailureReason`](crate::stages::FailureReason) values that the state
//! machine resolves internally and reports through the event stream.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum VoxpipeError {
    // Configuration errors
    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),

    // Controller misuse
    #[error("Pipeline is not running")]
    NotRunning,

    #[error("Pipeline is already running")]
    AlreadyRunning,

    #[error("Pipeline worker unavailable: {message}")]
    WorkerUnavailable { message: String },

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, VoxpipeError>;
