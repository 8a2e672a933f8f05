//! voxpipe - Voice assistant pipeline orchestration
//!
//! Drives audio through six stages (VAD, keyword spotting, speech
//! recognition, intent extraction, command execution, speech synthesis)
//! behind a thread-safe controller, and reports everything that happens
//! as a stream of structured events.

#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod buffer;
pub mod cli;
pub mod config;
pub mod defaults;
pub mod error;
pub mod event;
pub mod pipeline;
pub mod stages;

// Controller facade
pub use pipeline::{PipelineController, PipelineState, StageSet};

// Stage interfaces (for implementors)
pub use stages::{
    CommandOutcome, Detector, Executor, FailureReason, Intent, Interpreter, Recognizer,
    SessionHandle, StageResult, Synthesizer,
};

// Events
pub use event::{EventBus, EventType, Observer, PipelineEvent, SubscriberId};

// Error handling
pub use error::{Result, VoxpipeError};

// Config
pub use config::PipelineConfig;

/// Build version string with optional git commit hash.
///
/// Returns `"0.1.0+abc1234"` when git hash is available, `"0.1.0"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{}+{}", version, hash),
        _ => version.to_string(),
    }
}
