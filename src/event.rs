//! Pipeline events and the subscriber fan-out bus.
//!
//! The event stream is the orchestrator's sole output surface: every state
//! transition and every contained failure shows up here and nowhere else.
//! Subscribers are isolated from each other; one panicking observer never
//! blocks delivery to the rest, and never reaches the orchestrator.

use crate::pipeline::machine::PipelineState;
use serde::Serialize;
use serde_json::{Value, json};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

/// Kinds of pipeline lifecycle events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    PipelineStarted,
    WakeWordDetected,
    SpeechRecognitionStarted,
    RecognitionEmpty,
    IntentProcessingStarted,
    CommandExecutionStarted,
    StageError,
    TtsStarted,
    ReturnedToListening,
    PipelineStopped,
    SubscriberError,
}

impl EventType {
    /// Snake_case name, matching the serialized form.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::PipelineStarted => "pipeline_started",
            EventType::WakeWordDetected => "wake_word_detected",
            EventType::SpeechRecognitionStarted => "speech_recognition_started",
            EventType::RecognitionEmpty => "recognition_empty",
            EventType::IntentProcessingStarted => "intent_processing_started",
            EventType::CommandExecutionStarted => "command_execution_started",
            EventType::StageError => "stage_error",
            EventType::TtsStarted => "tts_started",
            EventType::ReturnedToListening => "returned_to_listening",
            EventType::PipelineStopped => "pipeline_stopped",
            EventType::SubscriberError => "subscriber_error",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable record of one pipeline lifecycle event.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineEvent {
    pub event_type: EventType,
    /// State the machine was in when the event was created.
    pub state: PipelineState,
    /// Milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
    /// Event-specific data, opaque to the bus.
    pub payload: Value,
}

impl PipelineEvent {
    /// Creates an event stamped with the current wall-clock time.
    pub fn new(event_type: EventType, state: PipelineState, payload: Value) -> Self {
        let timestamp_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self {
            event_type,
            state,
            timestamp_ms,
            payload,
        }
    }
}

/// Identifier returned by [`EventBus::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

/// An event observer callback.
pub type Observer = Arc<dyn Fn(&PipelineEvent) + Send + Sync>;

/// Sink for diagnostics that must not enter the event stream (a fault
/// while delivering `subscriber_error` itself, for instance).
pub trait DiagnosticsReporter: Send + Sync {
    fn report(&self, source: &str, message: &str);
}

/// Default reporter: logs to stderr.
#[derive(Debug, Clone, Copy, Default)]
pub struct StderrReporter;

impl DiagnosticsReporter for StderrReporter {
    fn report(&self, source: &str, message: &str) {
        eprintln!("voxpipe: [{}] {}", source, message);
    }
}

/// Ordered, multi-subscriber event delivery.
pub struct EventBus {
    subscribers: Mutex<Vec<(SubscriberId, Observer)>>,
    next_id: AtomicU64,
    reporter: Arc<dyn DiagnosticsReporter>,
}

impl EventBus {
    /// Creates a bus reporting delivery faults to stderr.
    pub fn new() -> Self {
        Self::with_reporter(Arc::new(StderrReporter))
    }

    /// Creates a bus with a custom diagnostics reporter.
    pub fn with_reporter(reporter: Arc<dyn DiagnosticsReporter>) -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
            reporter,
        }
    }

    /// Registers an observer; events publish in FIFO order to all
    /// observers registered at publish time.
    pub fn subscribe(&self, observer: Observer) -> SubscriberId {
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.lock().push((id, observer));
        id
    }

    /// Removes an observer. Returns false if the id was not subscribed.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let mut subscribers = self.lock();
        let before = subscribers.len();
        subscribers.retain(|(sid, _)| *sid != id);
        subscribers.len() != before
    }

    /// Number of current subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }

    /// Delivers the event to a consistent snapshot of the current
    /// subscribers. A panicking subscriber is isolated: the remaining
    /// subscribers still receive the event, and a `subscriber_error`
    /// event is delivered afterwards.
    pub fn publish(&self, event: &PipelineEvent) {
        let faulted = self.fan_out(event);
        for id in faulted {
            self.reporter.report(
                "event_bus",
                &format!(
                    "subscriber {} panicked while handling {}",
                    id.0, event.event_type
                ),
            );
            let diagnostic = PipelineEvent::new(
                EventType::SubscriberError,
                event.state,
                json!({
                    "subscriber": id.0,
                    "event_type": event.event_type.as_str(),
                }),
            );
            // Faults during subscriber_error delivery are only logged, to
            // bound the recursion at one level.
            for id in self.fan_out(&diagnostic) {
                self.reporter.report(
                    "event_bus",
                    &format!("subscriber {} panicked while handling subscriber_error", id.0),
                );
            }
        }
    }

    fn fan_out(&self, event: &PipelineEvent) -> Vec<SubscriberId> {
        let snapshot: Vec<(SubscriberId, Observer)> = self.lock().clone();
        let mut faulted = Vec::new();
        for (id, observer) in snapshot {
            if catch_unwind(AssertUnwindSafe(|| observer(event))).is_err() {
                faulted.push(id);
            }
        }
        faulted
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(SubscriberId, Observer)>> {
        // Observer callbacks run outside the lock, so poisoning can only
        // come from a panic inside subscribe/unsubscribe bookkeeping.
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
