//! The pipeline state machine.
//!
//! Owns the single `PipelineState`, drives every transition, invokes the
//! stage workers in sequence, and publishes the event trail. Exactly one
//! logical flow of control (the controller's processing worker) ever calls
//! into it, which is the central serialization invariant: no two stage
//! calls for the same cycle run concurrently, and the state field is never
//! mutated from outside.

use crate::buffer::AudioFrame;
use crate::config::PipelineConfig;
use crate::event::{EventBus, EventType, PipelineEvent};
use crate::pipeline::stage_worker::{FromFailure, StageWorker};
use crate::stages::{
    CommandOutcome, Detector, Executor, FailureReason, Intent, Interpreter, Recognizer,
    SessionHandle, StageResult, Synthesizer,
};
use serde::Serialize;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Spoken fallback when command execution fails outright.
const EXECUTION_FALLBACK_RESPONSE: &str = "Sorry, I could not complete that request.";

/// The pipeline's current stage. Exactly one value at any instant, owned
/// by the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Idle,
    Listening,
    WakeWordDetected,
    SpeechRecognition,
    IntentProcessing,
    ExecutingCommand,
    Speaking,
}

impl PipelineState {
    /// Snake_case name, matching the serialized form.
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineState::Idle => "idle",
            PipelineState::Listening => "listening",
            PipelineState::WakeWordDetected => "wake_word_detected",
            PipelineState::SpeechRecognition => "speech_recognition",
            PipelineState::IntentProcessing => "intent_processing",
            PipelineState::ExecutingCommand => "executing_command",
            PipelineState::Speaking => "speaking",
        }
    }
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read-only snapshot of the machine's state, shared with the controller.
pub(crate) struct StateCell {
    inner: Mutex<PipelineState>,
}

impl StateCell {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(PipelineState::Idle),
        }
    }

    pub(crate) fn get(&self) -> PipelineState {
        *self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn set(&self, state: PipelineState) {
        *self.inner.lock().unwrap_or_else(|p| p.into_inner()) = state;
    }
}

/// The six stage adapters a pipeline is built from, injected at
/// construction. Configuration of each adapter (model paths, thresholds)
/// happens before this point and is opaque to the orchestrator.
pub struct StageSet {
    pub vad: Box<dyn Detector>,
    pub kws: Box<dyn Detector>,
    pub recognizer: Box<dyn Recognizer>,
    pub interpreter: Box<dyn Interpreter>,
    pub executor: Box<dyn Executor>,
    pub synthesizer: Box<dyn Synthesizer>,
}

/// Per-cycle context, created on wake and discarded on return to
/// listening.
#[derive(Debug, Clone)]
struct SessionContext {
    keyword: String,
    confidence: f32,
    transcript: Option<String>,
    intent: Option<Intent>,
    outcome: Option<CommandOutcome>,
    fed_frames: u64,
    silent_frames: u32,
}

impl SessionContext {
    fn new(keyword: String, confidence: f32) -> Self {
        Self {
            keyword,
            confidence,
            transcript: None,
            intent: None,
            outcome: None,
            fed_frames: 0,
            silent_frames: 0,
        }
    }
}

enum DetectorRequest {
    Evaluate(AudioFrame),
    Reset,
}

enum DetectorReply {
    Verdict(StageResult),
    ResetDone,
}

impl FromFailure for DetectorReply {
    fn from_failure(reason: FailureReason) -> Self {
        DetectorReply::Verdict(StageResult::Failed(reason))
    }
}

enum AsrRequest {
    Begin,
    Feed(AudioFrame),
    Finish,
}

enum AsrReply {
    Session(SessionHandle),
    Fed,
    Transcript(Result<String, FailureReason>),
}

impl FromFailure for AsrReply {
    fn from_failure(reason: FailureReason) -> Self {
        AsrReply::Transcript(Err(reason))
    }
}

enum DetectorKind {
    Vad,
    Kws,
}

/// The orchestrator: state, session context, and the stage workers.
pub(crate) struct StateMachine {
    state: PipelineState,
    shared_state: Arc<StateCell>,
    session: Option<SessionContext>,
    bus: Arc<EventBus>,
    stop_requested: Arc<AtomicBool>,
    frame_ms: u32,
    endpoint_silence_ms: u32,
    max_utterance_ms: u32,
    confidence_threshold: f32,
    vad: StageWorker<DetectorRequest, DetectorReply>,
    kws: StageWorker<DetectorRequest, DetectorReply>,
    asr: StageWorker<AsrRequest, AsrReply>,
    interpreter: StageWorker<String, Result<Intent, FailureReason>>,
    executor: StageWorker<Intent, Result<CommandOutcome, FailureReason>>,
    synthesizer: StageWorker<String, Result<Vec<i16>, FailureReason>>,
}

impl StateMachine {
    pub(crate) fn new(
        config: &PipelineConfig,
        stages: StageSet,
        bus: Arc<EventBus>,
        stop_requested: Arc<AtomicBool>,
        shared_state: Arc<StateCell>,
    ) -> Self {
        let timeout = Duration::from_millis(config.stage.timeout_ms);

        let mut vad_stage = stages.vad;
        let vad = StageWorker::spawn("vad", timeout, move |req| match req {
            DetectorRequest::Evaluate(frame) => DetectorReply::Verdict(vad_stage.evaluate(&frame)),
            DetectorRequest::Reset => {
                vad_stage.reset();
                DetectorReply::ResetDone
            }
        });

        let mut kws_stage = stages.kws;
        let kws = StageWorker::spawn("kws", timeout, move |req| match req {
            DetectorRequest::Evaluate(frame) => DetectorReply::Verdict(kws_stage.evaluate(&frame)),
            DetectorRequest::Reset => {
                kws_stage.reset();
                DetectorReply::ResetDone
            }
        });

        let mut asr_stage = stages.recognizer;
        let mut asr_session: Option<SessionHandle> = None;
        let asr = StageWorker::spawn("asr", timeout, move |req| match req {
            AsrRequest::Begin => {
                let handle = asr_stage.begin_session();
                asr_session = Some(handle);
                AsrReply::Session(handle)
            }
            AsrRequest::Feed(frame) => {
                if let Some(handle) = asr_session {
                    asr_stage.feed(handle, &frame);
                }
                AsrReply::Fed
            }
            AsrRequest::Finish => match asr_session.take() {
                Some(handle) => AsrReply::Transcript(asr_stage.finish(handle)),
                None => AsrReply::Transcript(Err(FailureReason::EmptyInput)),
            },
        });

        let interpreter_stage = stages.interpreter;
        let interpreter = StageWorker::spawn("intent", timeout, move |text: String| {
            interpreter_stage.interpret(&text)
        });

        let mut executor_stage = stages.executor;
        let executor = StageWorker::spawn("command", timeout, move |intent: Intent| {
            executor_stage.execute(&intent)
        });

        let mut synthesizer_stage = stages.synthesizer;
        let synthesizer = StageWorker::spawn("tts", timeout, move |text: String| {
            synthesizer_stage.synthesize(&text)
        });

        Self {
            state: PipelineState::Idle,
            shared_state,
            session: None,
            bus,
            stop_requested,
            frame_ms: config.audio.frame_duration_ms,
            endpoint_silence_ms: config.endpoint.silence_duration_ms,
            max_utterance_ms: config.endpoint.max_utterance_ms,
            confidence_threshold: config.wake.confidence_threshold,
            vad,
            kws,
            asr,
            interpreter,
            executor,
            synthesizer,
        }
    }

    /// IDLE → LISTENING.
    pub(crate) fn start(&mut self) {
        self.session = None;
        self.set_state(PipelineState::Listening);
        self.emit(EventType::PipelineStarted, json!({}));
    }

    /// Any state → IDLE. Idempotent: already-idle machines emit nothing.
    pub(crate) fn stop(&mut self) {
        self.stop_requested.store(false, Ordering::SeqCst);
        if self.state == PipelineState::Idle {
            return;
        }
        self.session = None;
        self.set_state(PipelineState::Idle);
        self.emit(EventType::PipelineStopped, json!({}));
    }

    /// Routes one frame according to the current state. Frames arriving in
    /// other states were never delivered here: the buffer queues them
    /// until the machine is back in LISTENING.
    pub(crate) fn process_frame(&mut self, frame: AudioFrame) {
        match self.state {
            PipelineState::Listening => self.on_listening_frame(frame),
            PipelineState::SpeechRecognition => self.on_recognition_frame(frame),
            _ => {}
        }
    }

    /// Reports audio dropped by the chunk buffer. The pipeline continues;
    /// the loss is only made observable.
    pub(crate) fn report_overflow(&self, dropped_samples: u64) {
        self.emit(
            EventType::StageError,
            json!({
                "stage": "audio_buffer",
                "reason": format!("buffer overflow, dropped {} samples", dropped_samples),
            }),
        );
    }

    pub(crate) fn state(&self) -> PipelineState {
        self.state
    }

    fn on_listening_frame(&mut self, frame: AudioFrame) {
        if self.is_stop_requested() {
            return;
        }

        let is_speech = match self.evaluate(DetectorKind::Vad, frame.clone()) {
            StageResult::Detected { .. } => true,
            StageResult::NotDetected => false,
            StageResult::Failed(reason) => {
                self.emit_stage_error("vad", &reason);
                false
            }
        };
        if !is_speech {
            // Drop the frame, no event.
            return;
        }

        if self.is_stop_requested() {
            return;
        }
        match self.evaluate(DetectorKind::Kws, frame) {
            StageResult::Detected { confidence, label }
                if confidence >= self.confidence_threshold =>
            {
                self.enter_wake(label, confidence);
            }
            StageResult::Detected { .. } | StageResult::NotDetected => {}
            StageResult::Failed(reason) => self.emit_stage_error("kws", &reason),
        }
    }

    fn enter_wake(&mut self, keyword: String, confidence: f32) {
        self.session = Some(SessionContext::new(keyword.clone(), confidence));
        self.set_state(PipelineState::WakeWordDetected);
        self.emit(
            EventType::WakeWordDetected,
            json!({ "keyword": keyword, "confidence": confidence }),
        );

        if self.is_stop_requested() {
            return;
        }

        // Immediate transition: open the recognizer session.
        self.set_state(PipelineState::SpeechRecognition);
        self.emit(EventType::SpeechRecognitionStarted, json!({}));
        match self.asr.call(AsrRequest::Begin) {
            Some(AsrReply::Session(_)) => {}
            Some(AsrReply::Transcript(Err(reason))) => {
                self.emit_stage_error("asr", &reason);
                self.return_to_listening(true);
            }
            Some(_) | None => {
                self.emit_stage_error("asr", &FailureReason::Timeout);
                self.return_to_listening(true);
            }
        }
    }

    fn on_recognition_frame(&mut self, frame: AudioFrame) {
        if self.is_stop_requested() {
            return;
        }

        let is_speech = match self.evaluate(DetectorKind::Vad, frame.clone()) {
            StageResult::Detected { .. } => true,
            StageResult::NotDetected => false,
            StageResult::Failed(reason) => {
                // A failing VAD counts as silence so the cycle still ends.
                self.emit_stage_error("vad", &reason);
                false
            }
        };

        match self.asr.call(AsrRequest::Feed(frame)) {
            Some(AsrReply::Fed) => {}
            Some(AsrReply::Transcript(Err(reason))) => self.emit_stage_error("asr", &reason),
            Some(_) => {}
            None => self.emit_stage_error("asr", &FailureReason::Timeout),
        }

        let end_of_utterance = {
            let Some(session) = self.session.as_mut() else {
                return;
            };
            session.fed_frames += 1;
            if is_speech {
                session.silent_frames = 0;
            } else {
                session.silent_frames += 1;
            }
            let silence_ms = u64::from(session.silent_frames) * u64::from(self.frame_ms);
            let utterance_ms = session.fed_frames * u64::from(self.frame_ms);
            silence_ms >= u64::from(self.endpoint_silence_ms)
                || utterance_ms >= u64::from(self.max_utterance_ms)
        };

        if end_of_utterance {
            self.finish_utterance();
        }
    }

    fn finish_utterance(&mut self) {
        if self.is_stop_requested() {
            return;
        }

        let result = match self.asr.call(AsrRequest::Finish) {
            Some(AsrReply::Transcript(result)) => result,
            Some(_) => Err(FailureReason::Internal(
                "unexpected reply from recognizer".to_string(),
            )),
            None => Err(FailureReason::Timeout),
        };

        match result {
            Ok(text) => self.run_intent(text),
            Err(FailureReason::EmptyInput) => {
                // No intent/command/speak cycle ever opened, so no
                // returned_to_listening either: the empty event is the
                // whole story.
                self.emit(EventType::RecognitionEmpty, json!({}));
                self.return_to_listening(false);
            }
            Err(reason) => {
                self.emit_stage_error("asr", &reason);
                self.return_to_listening(false);
            }
        }
    }

    fn run_intent(&mut self, text: String) {
        if let Some(session) = self.session.as_mut() {
            session.transcript = Some(text.clone());
        }
        self.set_state(PipelineState::IntentProcessing);
        self.emit(EventType::IntentProcessingStarted, json!({ "text": text }));

        if self.is_stop_requested() {
            return;
        }

        let intent = match self.interpreter.call(text.clone()) {
            Some(Ok(intent)) => intent,
            Some(Err(reason)) => {
                self.emit_stage_error("intent", &reason);
                Intent::unrecognized(text)
            }
            None => {
                self.emit_stage_error("intent", &FailureReason::Timeout);
                Intent::unrecognized(text)
            }
        };
        self.run_command(intent);
    }

    fn run_command(&mut self, intent: Intent) {
        if let Some(session) = self.session.as_mut() {
            session.intent = Some(intent.clone());
        }
        self.set_state(PipelineState::ExecutingCommand);
        self.emit(
            EventType::CommandExecutionStarted,
            json!({
                "action": intent.action,
                "arguments": intent.arguments,
                "text": intent.text,
            }),
        );

        if self.is_stop_requested() {
            return;
        }

        let outcome = match self.executor.call(intent) {
            Some(Ok(outcome)) => outcome,
            Some(Err(reason)) => {
                self.emit_stage_error("command", &reason);
                CommandOutcome::failed(EXECUTION_FALLBACK_RESPONSE)
            }
            None => {
                self.emit_stage_error("command", &FailureReason::Timeout);
                CommandOutcome::failed(EXECUTION_FALLBACK_RESPONSE)
            }
        };
        self.run_synthesis(outcome);
    }

    fn run_synthesis(&mut self, outcome: CommandOutcome) {
        if let Some(session) = self.session.as_mut() {
            session.outcome = Some(outcome.clone());
        }
        self.set_state(PipelineState::Speaking);
        self.emit(
            EventType::TtsStarted,
            json!({ "response": outcome.response, "success": outcome.success }),
        );

        if self.is_stop_requested() {
            return;
        }

        match self.synthesizer.call(outcome.response) {
            // Playback of the rendered audio belongs to the embedding
            // application, behind its own Synthesizer wrapper.
            Some(Ok(_audio)) => {}
            Some(Err(reason)) => self.emit_stage_error("tts", &reason),
            None => self.emit_stage_error("tts", &FailureReason::Timeout),
        }
        self.return_to_listening(true);
    }

    fn return_to_listening(&mut self, announce: bool) {
        let session = self.session.take();
        let _ = self.vad.call(DetectorRequest::Reset);
        let _ = self.kws.call(DetectorRequest::Reset);
        self.set_state(PipelineState::Listening);
        if announce {
            let payload = match &session {
                Some(s) => json!({
                    "keyword": s.keyword,
                    "confidence": s.confidence,
                    "transcript": s.transcript,
                    "action": s.intent.as_ref().map(|i| i.action.clone()),
                    "success": s.outcome.as_ref().map(|o| o.success),
                }),
                None => json!({}),
            };
            self.emit(EventType::ReturnedToListening, payload);
        }
    }

    fn evaluate(&mut self, kind: DetectorKind, frame: AudioFrame) -> StageResult {
        let worker = match kind {
            DetectorKind::Vad => &mut self.vad,
            DetectorKind::Kws => &mut self.kws,
        };
        match worker.call(DetectorRequest::Evaluate(frame)) {
            Some(DetectorReply::Verdict(result)) => result,
            Some(DetectorReply::ResetDone) => StageResult::Failed(FailureReason::Internal(
                "unexpected reply from detector".to_string(),
            )),
            None => StageResult::Failed(FailureReason::Timeout),
        }
    }

    fn set_state(&mut self, state: PipelineState) {
        self.state = state;
        self.shared_state.set(state);
    }

    fn emit(&self, event_type: EventType, payload: serde_json::Value) {
        self.bus
            .publish(&PipelineEvent::new(event_type, self.state, payload));
    }

    fn emit_stage_error(&self, stage: &str, reason: &FailureReason) {
        self.emit(
            EventType::StageError,
            json!({ "stage": stage, "reason": reason.to_string() }),
        );
    }

    fn is_stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::mock::{
        MockExecutor, MockInterpreter, MockRecognizer, MockSynthesizer, ScriptedDetector, detected,
    };

    fn test_config() -> PipelineConfig {
        let mut config = PipelineConfig::default();
        config.audio.frame_duration_ms = 10;
        config.endpoint.silence_duration_ms = 30;
        config.endpoint.max_utterance_ms = 500;
        config.stage.timeout_ms = 1_000;
        config
    }

    fn frame(seq: u64) -> AudioFrame {
        AudioFrame::new(vec![0; 160], seq)
    }

    struct Harness {
        machine: StateMachine,
        events: Arc<Mutex<Vec<PipelineEvent>>>,
    }

    impl Harness {
        fn new(config: &PipelineConfig, stages: StageSet) -> Self {
            let bus = Arc::new(EventBus::new());
            let events: Arc<Mutex<Vec<PipelineEvent>>> = Arc::new(Mutex::new(Vec::new()));
            let sink = events.clone();
            bus.subscribe(Arc::new(move |e: &PipelineEvent| {
                sink.lock().unwrap().push(e.clone());
            }));
            let machine = StateMachine::new(
                config,
                stages,
                bus,
                Arc::new(AtomicBool::new(false)),
                Arc::new(StateCell::new()),
            );
            Self { machine, events }
        }

        fn event_types(&self) -> Vec<EventType> {
            self.events.lock().unwrap().iter().map(|e| e.event_type).collect()
        }

        fn events(&self) -> Vec<PipelineEvent> {
            self.events.lock().unwrap().clone()
        }
    }

    fn wake_then_silence_stages() -> StageSet {
        // VAD: one speech frame to trigger KWS, silence afterwards so the
        // utterance endpoints after three silent frames.
        StageSet {
            vad: Box::new(
                ScriptedDetector::new()
                    .with_script(vec![detected(0.8, "speech")])
                    .with_fallback(StageResult::NotDetected),
            ),
            kws: Box::new(ScriptedDetector::new().with_fallback(detected(0.9, "hello"))),
            recognizer: Box::new(MockRecognizer::new().with_response("play some music")),
            interpreter: Box::new(MockInterpreter::returning(Intent::new(
                "music",
                "play some music",
            ))),
            executor: Box::new(MockExecutor::new().with_outcome(CommandOutcome::ok(
                "Playing music now.",
            ))),
            synthesizer: Box::new(MockSynthesizer::new()),
        }
    }

    #[test]
    fn test_start_emits_pipeline_started_in_listening() {
        let config = test_config();
        let mut harness = Harness::new(&config, wake_then_silence_stages());
        harness.machine.start();

        assert_eq!(harness.machine.state(), PipelineState::Listening);
        let events = harness.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, EventType::PipelineStarted);
        assert_eq!(events[0].state, PipelineState::Listening);
    }

    #[test]
    fn test_silence_produces_no_events() {
        let config = test_config();
        let stages = StageSet {
            vad: Box::new(ScriptedDetector::new()),
            kws: Box::new(ScriptedDetector::new().with_fallback(detected(0.9, "hello"))),
            recognizer: Box::new(MockRecognizer::new()),
            interpreter: Box::new(MockInterpreter::failing(FailureReason::NoMatch)),
            executor: Box::new(MockExecutor::new()),
            synthesizer: Box::new(MockSynthesizer::new()),
        };
        let mut harness = Harness::new(&config, stages);
        harness.machine.start();

        for seq in 0..50 {
            harness.machine.process_frame(frame(seq));
        }

        // VAD never reports speech: still listening, no wake event ever.
        assert_eq!(harness.machine.state(), PipelineState::Listening);
        assert_eq!(harness.event_types(), vec![EventType::PipelineStarted]);
    }

    #[test]
    fn test_full_cycle_event_order() {
        let config = test_config();
        let mut harness = Harness::new(&config, wake_then_silence_stages());
        harness.machine.start();

        // Frame 0 wakes; frames 1..=3 are silence reaching the endpoint.
        for seq in 0..4 {
            harness.machine.process_frame(frame(seq));
        }

        assert_eq!(
            harness.event_types(),
            vec![
                EventType::PipelineStarted,
                EventType::WakeWordDetected,
                EventType::SpeechRecognitionStarted,
                EventType::IntentProcessingStarted,
                EventType::CommandExecutionStarted,
                EventType::TtsStarted,
                EventType::ReturnedToListening,
            ]
        );
        assert_eq!(harness.machine.state(), PipelineState::Listening);

        let events = harness.events();
        assert_eq!(events[1].payload["keyword"], "hello");
        assert_eq!(events[3].payload["text"], "play some music");
        assert_eq!(events[4].payload["action"], "music");
        assert_eq!(events[5].payload["response"], "Playing music now.");

        // The cycle summary carries the wake details through to the end.
        let summary = &events[6].payload;
        assert_eq!(summary["keyword"], "hello");
        let confidence = summary["confidence"].as_f64().unwrap();
        assert!((confidence - 0.9).abs() < 1e-6);
        assert_eq!(summary["transcript"], "play some music");
        assert_eq!(summary["success"], true);
    }

    #[test]
    fn test_low_confidence_keyword_does_not_wake() {
        let mut config = test_config();
        config.wake.confidence_threshold = 0.8;
        let stages = StageSet {
            vad: Box::new(ScriptedDetector::new().with_fallback(detected(0.9, "speech"))),
            kws: Box::new(ScriptedDetector::new().with_fallback(detected(0.5, "hello"))),
            recognizer: Box::new(MockRecognizer::new()),
            interpreter: Box::new(MockInterpreter::failing(FailureReason::NoMatch)),
            executor: Box::new(MockExecutor::new()),
            synthesizer: Box::new(MockSynthesizer::new()),
        };
        let mut harness = Harness::new(&config, stages);
        harness.machine.start();

        for seq in 0..10 {
            harness.machine.process_frame(frame(seq));
        }
        assert_eq!(harness.machine.state(), PipelineState::Listening);
        assert_eq!(harness.event_types(), vec![EventType::PipelineStarted]);
    }

    #[test]
    fn test_empty_recognition_skips_to_listening() {
        let config = test_config();
        let stages = StageSet {
            vad: Box::new(
                ScriptedDetector::new()
                    .with_script(vec![detected(0.8, "speech")])
                    .with_fallback(StageResult::NotDetected),
            ),
            kws: Box::new(ScriptedDetector::new().with_fallback(detected(0.9, "hello"))),
            recognizer: Box::new(MockRecognizer::new().with_failure(FailureReason::EmptyInput)),
            interpreter: Box::new(MockInterpreter::failing(FailureReason::NoMatch)),
            executor: Box::new(MockExecutor::new()),
            synthesizer: Box::new(MockSynthesizer::new()),
        };
        let mut harness = Harness::new(&config, stages);
        harness.machine.start();

        for seq in 0..4 {
            harness.machine.process_frame(frame(seq));
        }

        let types = harness.event_types();
        assert_eq!(types.last(), Some(&EventType::RecognitionEmpty));
        assert!(!types.contains(&EventType::CommandExecutionStarted));
        assert!(!types.contains(&EventType::IntentProcessingStarted));
        assert_eq!(harness.machine.state(), PipelineState::Listening);
    }

    #[test]
    fn test_no_match_falls_back_to_unrecognized_action() {
        let config = test_config();
        let stages = StageSet {
            vad: Box::new(
                ScriptedDetector::new()
                    .with_script(vec![detected(0.8, "speech")])
                    .with_fallback(StageResult::NotDetected),
            ),
            kws: Box::new(ScriptedDetector::new().with_fallback(detected(0.9, "hello"))),
            recognizer: Box::new(MockRecognizer::new().with_response("xyz")),
            interpreter: Box::new(MockInterpreter::failing(FailureReason::NoMatch)),
            executor: Box::new(crate::stages::command::CommandDispatcher::new()),
            synthesizer: Box::new(MockSynthesizer::new()),
        };
        let mut harness = Harness::new(&config, stages);
        harness.machine.start();

        for seq in 0..4 {
            harness.machine.process_frame(frame(seq));
        }

        let events = harness.events();
        let command_event = events
            .iter()
            .find(|e| e.event_type == EventType::CommandExecutionStarted)
            .expect("command execution still fires");
        assert_eq!(command_event.payload["action"], "unrecognized");

        let tts_event = events
            .iter()
            .find(|e| e.event_type == EventType::TtsStarted)
            .expect("tts still fires");
        let response = tts_event.payload["response"].as_str().unwrap_or_default();
        assert!(!response.is_empty(), "fallback response must be spoken");

        // The NoMatch itself is observable as a stage error.
        assert!(events.iter().any(|e| {
            e.event_type == EventType::StageError && e.payload["stage"] == "intent"
        }));
    }

    #[test]
    fn test_executor_failure_still_reaches_synthesis() {
        let config = test_config();
        let tts = MockSynthesizer::new();
        let spoken = tts.spoken_log();
        let stages = StageSet {
            vad: Box::new(
                ScriptedDetector::new()
                    .with_script(vec![detected(0.8, "speech")])
                    .with_fallback(StageResult::NotDetected),
            ),
            kws: Box::new(ScriptedDetector::new().with_fallback(detected(0.9, "hello"))),
            recognizer: Box::new(MockRecognizer::new().with_response("play music")),
            interpreter: Box::new(MockInterpreter::returning(Intent::new("music", "play music"))),
            executor: Box::new(
                MockExecutor::new().with_failure(FailureReason::Stage("service down".into())),
            ),
            synthesizer: Box::new(tts),
        };
        let mut harness = Harness::new(&config, stages);
        harness.machine.start();

        for seq in 0..4 {
            harness.machine.process_frame(frame(seq));
        }

        let types = harness.event_types();
        assert!(types.contains(&EventType::StageError));
        assert!(types.contains(&EventType::TtsStarted));
        assert_eq!(types.last(), Some(&EventType::ReturnedToListening));
        assert_eq!(
            spoken.lock().unwrap().as_slice(),
            [EXECUTION_FALLBACK_RESPONSE.to_string()]
        );
    }

    #[test]
    fn test_interpreter_timeout_is_a_stage_error() {
        let mut config = test_config();
        config.stage.timeout_ms = 50;
        let stages = StageSet {
            vad: Box::new(
                ScriptedDetector::new()
                    .with_script(vec![detected(0.8, "speech")])
                    .with_fallback(StageResult::NotDetected),
            ),
            kws: Box::new(ScriptedDetector::new().with_fallback(detected(0.9, "hello"))),
            recognizer: Box::new(MockRecognizer::new().with_response("anything")),
            interpreter: Box::new(
                MockInterpreter::returning(Intent::new("music", "anything"))
                    .with_delay(Duration::from_millis(400)),
            ),
            executor: Box::new(MockExecutor::new()),
            synthesizer: Box::new(MockSynthesizer::new()),
        };
        let mut harness = Harness::new(&config, stages);
        harness.machine.start();

        for seq in 0..4 {
            harness.machine.process_frame(frame(seq));
        }

        let events = harness.events();
        let error = events
            .iter()
            .find(|e| e.event_type == EventType::StageError && e.payload["stage"] == "intent")
            .expect("timeout reported");
        assert_eq!(
            error.payload["reason"],
            FailureReason::Timeout.to_string()
        );
        // The cycle still completed through the unrecognized path.
        let command_event = events
            .iter()
            .find(|e| e.event_type == EventType::CommandExecutionStarted)
            .expect("cycle completed");
        assert_eq!(command_event.payload["action"], "unrecognized");
    }

    #[test]
    fn test_interpreter_panic_is_contained() {
        let config = test_config();
        let stages = StageSet {
            vad: Box::new(
                ScriptedDetector::new()
                    .with_script(vec![detected(0.8, "speech")])
                    .with_fallback(StageResult::NotDetected),
            ),
            kws: Box::new(ScriptedDetector::new().with_fallback(detected(0.9, "hello"))),
            recognizer: Box::new(MockRecognizer::new().with_response("anything")),
            interpreter: Box::new(
                MockInterpreter::returning(Intent::new("music", "anything")).with_panic(),
            ),
            executor: Box::new(MockExecutor::new()),
            synthesizer: Box::new(MockSynthesizer::new()),
        };
        let mut harness = Harness::new(&config, stages);
        harness.machine.start();

        for seq in 0..4 {
            harness.machine.process_frame(frame(seq));
        }

        let events = harness.events();
        let error = events
            .iter()
            .find(|e| e.event_type == EventType::StageError && e.payload["stage"] == "intent")
            .expect("panic surfaced as stage error");
        let reason = error.payload["reason"].as_str().unwrap_or_default();
        assert!(reason.contains("internal fault"));
        assert_eq!(harness.machine.state(), PipelineState::Listening);
    }

    #[test]
    fn test_max_utterance_cap_forces_completion() {
        let mut config = test_config();
        config.endpoint.silence_duration_ms = 10_000; // never reached
        config.endpoint.max_utterance_ms = 50; // five frames
        let stages = StageSet {
            // Speech forever: end-of-utterance never triggers via silence.
            vad: Box::new(ScriptedDetector::new().with_fallback(detected(0.9, "speech"))),
            kws: Box::new(ScriptedDetector::new().with_fallback(detected(0.9, "hello"))),
            recognizer: Box::new(MockRecognizer::new().with_response("play music")),
            interpreter: Box::new(MockInterpreter::returning(Intent::new("music", "play music"))),
            executor: Box::new(MockExecutor::new()),
            synthesizer: Box::new(MockSynthesizer::new()),
        };
        let mut harness = Harness::new(&config, stages);
        harness.machine.start();

        for seq in 0..10 {
            harness.machine.process_frame(frame(seq));
        }

        let types = harness.event_types();
        assert!(types.contains(&EventType::TtsStarted), "cycle must complete");
        assert_eq!(harness.machine.state(), PipelineState::Listening);
    }

    #[test]
    fn test_detectors_reset_on_return_to_listening() {
        let config = test_config();
        let resets = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let stages = StageSet {
            vad: Box::new(
                ScriptedDetector::new()
                    .with_script(vec![detected(0.8, "speech")])
                    .with_fallback(StageResult::NotDetected)
                    .with_reset_counter(resets.clone()),
            ),
            kws: Box::new(ScriptedDetector::new().with_fallback(detected(0.9, "hello"))),
            recognizer: Box::new(MockRecognizer::new().with_response("play music")),
            interpreter: Box::new(MockInterpreter::returning(Intent::new("music", "play music"))),
            executor: Box::new(MockExecutor::new()),
            synthesizer: Box::new(MockSynthesizer::new()),
        };
        let mut harness = Harness::new(&config, stages);
        harness.machine.start();
        for seq in 0..4 {
            harness.machine.process_frame(frame(seq));
        }
        assert_eq!(resets.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_stop_is_idempotent() {
        let config = test_config();
        let mut harness = Harness::new(&config, wake_then_silence_stages());
        harness.machine.start();
        harness.machine.stop();
        harness.machine.stop();

        let stopped = harness
            .event_types()
            .iter()
            .filter(|t| **t == EventType::PipelineStopped)
            .count();
        assert_eq!(stopped, 1, "no duplicate pipeline_stopped");
        assert_eq!(harness.machine.state(), PipelineState::Idle);
    }

    #[test]
    fn test_state_serializes_snake_case() {
        let json = serde_json::to_string(&PipelineState::WakeWordDetected).unwrap();
        assert_eq!(json, "\"wake_word_detected\"");
        assert_eq!(PipelineState::SpeechRecognition.as_str(), "speech_recognition");
    }
}
