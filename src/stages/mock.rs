//! Deterministic stage fakes for tests and demos.
//!
//! Every pipeline role has a scriptable stand-in here so the orchestrator
//! can be exercised without any model files. They live in the library
//! proper (not behind `cfg(test)`) so integration tests and the demo
//! binary can use them.

use crate::buffer::AudioFrame;
use crate::stages::{
    CommandOutcome, Detector, Executor, FailureReason, Intent, Interpreter, Recognizer,
    SessionHandle, StageResult, Synthesizer,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Shorthand for a `Detected` result.
pub fn detected(confidence: f32, label: &str) -> StageResult {
    StageResult::Detected {
        confidence,
        label: label.to_string(),
    }
}

/// Detector that replays a scripted per-frame result sequence, then a
/// fallback for every later frame.
pub struct ScriptedDetector {
    script: VecDeque<StageResult>,
    fallback: StageResult,
    resets: Option<Arc<AtomicUsize>>,
}

impl ScriptedDetector {
    /// A detector that never detects anything.
    pub fn new() -> Self {
        Self {
            script: VecDeque::new(),
            fallback: StageResult::NotDetected,
            resets: None,
        }
    }

    /// Prepends a per-frame script; consumed one result per `evaluate`.
    pub fn with_script(mut self, script: Vec<StageResult>) -> Self {
        self.script = script.into();
        self
    }

    /// Result returned once the script is exhausted.
    pub fn with_fallback(mut self, fallback: StageResult) -> Self {
        self.fallback = fallback;
        self
    }

    /// Shares a counter incremented on every `reset`.
    pub fn with_reset_counter(mut self, counter: Arc<AtomicUsize>) -> Self {
        self.resets = Some(counter);
        self
    }
}

impl Default for ScriptedDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl Detector for ScriptedDetector {
    fn evaluate(&mut self, _frame: &AudioFrame) -> StageResult {
        self.script.pop_front().unwrap_or_else(|| self.fallback.clone())
    }

    fn reset(&mut self) {
        if let Some(counter) = &self.resets {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Recognizer returning a fixed transcript (or a scripted failure).
pub struct MockRecognizer {
    response: String,
    failure: Option<FailureReason>,
    next_session: u64,
    fed_in_session: u64,
    fed_total: Option<Arc<AtomicU64>>,
}

impl MockRecognizer {
    pub fn new() -> Self {
        Self {
            response: "mock transcription".to_string(),
            failure: None,
            next_session: 0,
            fed_in_session: 0,
            fed_total: None,
        }
    }

    /// Transcript returned by `finish`.
    pub fn with_response(mut self, response: &str) -> Self {
        self.response = response.to_string();
        self
    }

    /// Makes `finish` fail with the given reason regardless of input.
    pub fn with_failure(mut self, reason: FailureReason) -> Self {
        self.failure = Some(reason);
        self
    }

    /// Shares a counter of frames fed across all sessions.
    pub fn with_fed_counter(mut self, counter: Arc<AtomicU64>) -> Self {
        self.fed_total = Some(counter);
        self
    }
}

impl Default for MockRecognizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Recognizer for MockRecognizer {
    fn begin_session(&mut self) -> SessionHandle {
        self.next_session += 1;
        self.fed_in_session = 0;
        SessionHandle::new(self.next_session)
    }

    fn feed(&mut self, _handle: SessionHandle, _frame: &AudioFrame) {
        self.fed_in_session += 1;
        if let Some(counter) = &self.fed_total {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn finish(&mut self, _handle: SessionHandle) -> Result<String, FailureReason> {
        if let Some(reason) = &self.failure {
            return Err(reason.clone());
        }
        if self.fed_in_session == 0 {
            return Err(FailureReason::EmptyInput);
        }
        Ok(self.response.clone())
    }
}

/// Interpreter returning a fixed result, optionally after a delay or via a
/// panic (for boundary-conversion tests).
pub struct MockInterpreter {
    result: Result<Intent, FailureReason>,
    delay: Option<Duration>,
    panics: bool,
}

impl MockInterpreter {
    /// Always resolves to the given intent.
    pub fn returning(intent: Intent) -> Self {
        Self {
            result: Ok(intent),
            delay: None,
            panics: false,
        }
    }

    /// Always fails with the given reason.
    pub fn failing(reason: FailureReason) -> Self {
        Self {
            result: Err(reason),
            delay: None,
            panics: false,
        }
    }

    /// Sleeps before answering, to exercise stage timeouts.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Panics instead of answering, to exercise boundary conversion.
    pub fn with_panic(mut self) -> Self {
        self.panics = true;
        self
    }
}

impl Interpreter for MockInterpreter {
    fn interpret(&self, _text: &str) -> Result<Intent, FailureReason> {
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        if self.panics {
            panic!("mock interpreter panic");
        }
        self.result.clone()
    }
}

/// Executor recording every intent it sees.
pub struct MockExecutor {
    result: Result<CommandOutcome, FailureReason>,
    executed: Arc<Mutex<Vec<Intent>>>,
}

impl MockExecutor {
    pub fn new() -> Self {
        Self {
            result: Ok(CommandOutcome::ok("mock response")),
            executed: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Outcome returned for every execution.
    pub fn with_outcome(mut self, outcome: CommandOutcome) -> Self {
        self.result = Ok(outcome);
        self
    }

    /// Makes every execution fail with the given reason.
    pub fn with_failure(mut self, reason: FailureReason) -> Self {
        self.result = Err(reason);
        self
    }

    /// Handle to the log of executed intents.
    pub fn executed_log(&self) -> Arc<Mutex<Vec<Intent>>> {
        self.executed.clone()
    }
}

impl Default for MockExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl Executor for MockExecutor {
    fn execute(&mut self, intent: &Intent) -> Result<CommandOutcome, FailureReason> {
        if let Ok(mut log) = self.executed.lock() {
            log.push(intent.clone());
        }
        self.result.clone()
    }
}

/// Synthesizer recording every response it was asked to speak.
pub struct MockSynthesizer {
    failure: Option<FailureReason>,
    spoken: Arc<Mutex<Vec<String>>>,
}

impl MockSynthesizer {
    pub fn new() -> Self {
        Self {
            failure: None,
            spoken: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Makes every synthesis fail with the given reason.
    pub fn with_failure(mut self, reason: FailureReason) -> Self {
        self.failure = Some(reason);
        self
    }

    /// Handle to the log of spoken responses.
    pub fn spoken_log(&self) -> Arc<Mutex<Vec<String>>> {
        self.spoken.clone()
    }
}

impl Default for MockSynthesizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Synthesizer for MockSynthesizer {
    fn synthesize(&mut self, text: &str) -> Result<Vec<i16>, FailureReason> {
        if let Ok(mut log) = self.spoken.lock() {
            log.push(text.to_string());
        }
        match &self.failure {
            Some(reason) => Err(reason.clone()),
            None => Ok(vec![0; 160]),
        }
    }
}
