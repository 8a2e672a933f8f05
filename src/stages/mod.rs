//! Capability interfaces for the six pipeline roles.
//!
//! The orchestrator depends only on the four shapes defined here: detectors
//! (VAD and KWS), a recognizer, an interpreter, an executor, and a
//! synthesizer. Implementations wrap whatever model or service performs the
//! role and are replaceable without touching orchestrator code. Failures
//! cross the boundary as structured [`FailureReason`] values, never as
//! faults; anything that does escape is converted to
//! `FailureReason::Internal` at the invocation boundary.

pub mod command;
pub mod intent;
pub mod mock;
pub mod tts;
pub mod vad;

use crate::buffer::AudioFrame;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Sentinel action produced when recognized text matched no pattern.
/// Executors must handle it with a fallback spoken response, which keeps
/// one terminal path per cycle.
pub const UNRECOGNIZED_ACTION: &str = "unrecognized";

/// Why a stage invocation failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// The call exceeded its configured timeout.
    Timeout,
    /// A recognizer session was finished with no usable input.
    EmptyInput,
    /// The interpreter matched no pattern.
    NoMatch,
    /// An unexpected fault was caught at the stage boundary.
    Internal(String),
    /// A stage-specific failure.
    Stage(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Timeout => write!(f, "stage call timed out"),
            FailureReason::EmptyInput => write!(f, "no input was captured"),
            FailureReason::NoMatch => write!(f, "no pattern matched"),
            FailureReason::Internal(msg) => write!(f, "internal fault: {}", msg),
            FailureReason::Stage(msg) => write!(f, "{}", msg),
        }
    }
}

/// Result of invoking a detector stage on one frame.
#[derive(Debug, Clone, PartialEq)]
pub enum StageResult {
    /// The detector matched; `label` names what it matched (a keyword for
    /// KWS, `"speech"` for VAD).
    Detected { confidence: f32, label: String },
    /// Nothing detected in this frame.
    NotDetected,
    /// The stage failed; the orchestrator treats all stage failures
    /// uniformly.
    Failed(FailureReason),
}

/// Opaque handle for one recognizer session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionHandle(u64);

impl SessionHandle {
    /// Creates a handle with the given id.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// The raw session id.
    pub fn id(&self) -> u64 {
        self.0
    }
}

/// A structured interpretation of recognized text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Intent {
    /// Action name, e.g. `"music"` or the `"unrecognized"` sentinel.
    pub action: String,
    /// Structured arguments extracted from the text.
    pub arguments: BTreeMap<String, String>,
    /// The text the intent was extracted from.
    pub text: String,
}

impl Intent {
    /// Creates an intent with no arguments.
    pub fn new(action: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            arguments: BTreeMap::new(),
            text: text.into(),
        }
    }

    /// Adds an argument.
    pub fn with_argument(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.arguments.insert(key.into(), value.into());
        self
    }

    /// The sentinel intent for text that matched no pattern.
    pub fn unrecognized(text: impl Into<String>) -> Self {
        Self::new(UNRECOGNIZED_ACTION, text)
    }

    /// Returns true for the unrecognized sentinel.
    pub fn is_unrecognized(&self) -> bool {
        self.action == UNRECOGNIZED_ACTION
    }
}

/// Result of executing a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutcome {
    /// Whether the command succeeded. A false outcome is still terminal
    /// for the stage; the cycle proceeds to synthesis of the response.
    pub success: bool,
    /// Text to speak back to the user.
    pub response: String,
}

impl CommandOutcome {
    /// A successful outcome with the given spoken response.
    pub fn ok(response: impl Into<String>) -> Self {
        Self {
            success: true,
            response: response.into(),
        }
    }

    /// A failed outcome with the given spoken response.
    pub fn failed(response: impl Into<String>) -> Self {
        Self {
            success: false,
            response: response.into(),
        }
    }
}

/// Per-frame detector: VAD and KWS.
///
/// `evaluate` is called once per frame and may keep short-lived internal
/// windowing state (rolling counters, model streams). `reset` clears that
/// state between pipeline cycles.
pub trait Detector: Send {
    /// Classifies one frame.
    fn evaluate(&mut self, frame: &AudioFrame) -> StageResult;

    /// Clears internal windowing state. Called on every return to
    /// listening.
    fn reset(&mut self) {}
}

/// Streaming speech recognizer.
pub trait Recognizer: Send {
    /// Opens a recognition session.
    fn begin_session(&mut self) -> SessionHandle;

    /// Feeds one frame into the session.
    fn feed(&mut self, handle: SessionHandle, frame: &AudioFrame);

    /// Closes the session and returns the transcript. Finishing a session
    /// with no frames fed yields `Err(FailureReason::EmptyInput)`.
    fn finish(&mut self, handle: SessionHandle) -> std::result::Result<String, FailureReason>;
}

/// Intent extractor: a pure, deterministic function of its input text.
pub trait Interpreter: Send {
    /// Extracts an intent from recognized text; `Err(NoMatch)` when the
    /// text fits no pattern.
    fn interpret(&self, text: &str) -> std::result::Result<Intent, FailureReason>;
}

/// Command executor. May have side effects; both success and failure are
/// terminal for the stage.
pub trait Executor: Send {
    /// Executes the intent and returns what to say about it.
    fn execute(&mut self, intent: &Intent) -> std::result::Result<CommandOutcome, FailureReason>;
}

/// Text-to-speech synthesizer.
pub trait Synthesizer: Send {
    /// Renders the text as PCM samples.
    fn synthesize(&mut self, text: &str) -> std::result::Result<Vec<i16>, FailureReason>;
}
