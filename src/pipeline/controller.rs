//! Public pipeline facade.
//!
//! The controller owns the processing worker thread, the audio chunk
//! buffer, and the event bus. Callers interact with it from any thread:
//! `feed` is called from the audio capture path, `start`/`stop` from a UI
//! or service lifecycle, observers from wherever events are consumed. All
//! stage work happens on the worker, never on the caller.

use crate::buffer::AudioChunkBuffer;
use crate::config::PipelineConfig;
use crate::defaults;
use crate::error::{Result, VoxpipeError};
use crate::event::{EventBus, Observer, SubscriberId};
use crate::pipeline::machine::{PipelineState, StageSet, StateCell, StateMachine};
use crossbeam_channel::{Receiver, Sender, bounded, unbounded};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

enum Command {
    Start(Sender<()>),
    Stop(Sender<()>),
    Shutdown,
}

/// Handle to a running pipeline instance.
///
/// Dropping the controller shuts the worker down; an active cycle is
/// abandoned at its next decision point.
pub struct PipelineController {
    buffer: Arc<AudioChunkBuffer>,
    bus: Arc<EventBus>,
    state: Arc<StateCell>,
    running: Arc<AtomicBool>,
    stop_requested: Arc<AtomicBool>,
    cmd_tx: Sender<Command>,
    worker: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for PipelineController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineController").finish_non_exhaustive()
    }
}

impl PipelineController {
    /// Validates the configuration and spawns the worker (and the six
    /// stage threads). The pipeline starts in IDLE; call
    /// [`start`](Self::start) to begin listening.
    pub fn new(config: PipelineConfig, stages: StageSet) -> Result<Self> {
        config.validate()?;

        let buffer = Arc::new(AudioChunkBuffer::new(
            config.frame_samples(),
            config.audio.buffer_capacity_frames,
        )?);
        let bus = Arc::new(EventBus::new());
        let state = Arc::new(StateCell::new());
        let running = Arc::new(AtomicBool::new(false));
        let stop_requested = Arc::new(AtomicBool::new(false));
        let (cmd_tx, cmd_rx) = unbounded();

        let worker = {
            let buffer = buffer.clone();
            let bus = bus.clone();
            let state = state.clone();
            let running = running.clone();
            let stop_requested = stop_requested.clone();
            std::thread::Builder::new()
                .name("voxpipe-pipeline".to_string())
                .spawn(move || {
                    let machine =
                        StateMachine::new(&config, stages, bus, stop_requested, state);
                    worker_loop(machine, buffer, running, cmd_rx);
                })
                .map_err(|e| VoxpipeError::WorkerUnavailable {
                    message: format!("failed to spawn pipeline worker: {}", e),
                })?
        };

        Ok(Self {
            buffer,
            bus,
            state,
            running,
            stop_requested,
            cmd_tx,
            worker: Some(worker),
        })
    }

    /// IDLE → LISTENING. Returns once `pipeline_started` has been
    /// published. Starting a running pipeline is an error.
    pub fn start(&self) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(VoxpipeError::AlreadyRunning);
        }
        self.buffer.clear();
        let (ack_tx, ack_rx) = bounded(1);
        if let Err(e) = self.send(Command::Start(ack_tx)).and_then(|()| self.ack(&ack_rx)) {
            self.running.store(false, Ordering::SeqCst);
            return Err(e);
        }
        Ok(())
    }

    /// Any state → IDLE. Returns once `pipeline_stopped` has been
    /// published. Stopping an already-stopped pipeline is a no-op.
    pub fn stop(&self) -> Result<()> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        // Makes an in-flight cycle bail at its next decision point.
        self.stop_requested.store(true, Ordering::SeqCst);
        let (ack_tx, ack_rx) = bounded(1);
        self.send(Command::Stop(ack_tx))?;
        self.ack(&ack_rx)?;
        self.buffer.clear();
        Ok(())
    }

    /// Appends captured PCM samples to the chunk buffer. Rejected with
    /// [`VoxpipeError::NotRunning`] while the pipeline is stopped; no
    /// event is published for the rejection.
    pub fn feed(&self, samples: &[i16]) -> Result<()> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(VoxpipeError::NotRunning);
        }
        self.buffer.push(samples);
        Ok(())
    }

    /// Registers an event observer. Observers run on the worker thread,
    /// so they should return quickly.
    pub fn add_observer(&self, observer: Observer) -> SubscriberId {
        self.bus.subscribe(observer)
    }

    /// Removes an observer. Returns false if the id was not registered.
    pub fn remove_observer(&self, id: SubscriberId) -> bool {
        self.bus.unsubscribe(id)
    }

    /// Snapshot of the current pipeline state.
    pub fn state(&self) -> PipelineState {
        self.state.get()
    }

    /// True between a successful `start` and the next `stop`.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn send(&self, cmd: Command) -> Result<()> {
        self.cmd_tx
            .send(cmd)
            .map_err(|_| VoxpipeError::WorkerUnavailable {
                message: "pipeline worker has exited".to_string(),
            })
    }

    fn ack(&self, ack_rx: &Receiver<()>) -> Result<()> {
        ack_rx.recv().map_err(|_| VoxpipeError::WorkerUnavailable {
            message: "pipeline worker has exited".to_string(),
        })
    }
}

impl Drop for PipelineController {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.stop_requested.store(true, Ordering::SeqCst);
        let _ = self.cmd_tx.send(Command::Shutdown);

        if let Some(handle) = self.worker.take() {
            let deadline =
                Instant::now() + Duration::from_millis(defaults::SHUTDOWN_DEADLINE_MS);
            while !handle.is_finished() && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(5));
            }
            if handle.is_finished() {
                let _ = handle.join();
            }
            // Otherwise the worker is stuck in a stage call; it is
            // detached and will exit once the call returns.
        }
    }
}

fn worker_loop(
    mut machine: StateMachine,
    buffer: Arc<AudioChunkBuffer>,
    running: Arc<AtomicBool>,
    cmd_rx: Receiver<Command>,
) {
    let poll = Duration::from_millis(defaults::WORKER_POLL_INTERVAL_MS);
    loop {
        if running.load(Ordering::SeqCst) {
            match cmd_rx.try_recv() {
                Ok(cmd) => {
                    if handle_command(&mut machine, &buffer, cmd) {
                        return;
                    }
                    continue;
                }
                Err(crossbeam_channel::TryRecvError::Empty) => {}
                Err(crossbeam_channel::TryRecvError::Disconnected) => {
                    machine.stop();
                    return;
                }
            }

            let dropped = buffer.take_dropped();
            if dropped > 0 {
                machine.report_overflow(dropped);
            }
            match buffer.try_take_frame() {
                Some(frame) => machine.process_frame(frame),
                None => std::thread::sleep(poll),
            }
        } else {
            // Stopped: nothing to poll, block until the next command.
            match cmd_rx.recv() {
                Ok(cmd) => {
                    if handle_command(&mut machine, &buffer, cmd) {
                        return;
                    }
                }
                Err(_) => {
                    machine.stop();
                    return;
                }
            }
        }
    }
}

/// Returns true when the worker should exit.
fn handle_command(
    machine: &mut StateMachine,
    buffer: &AudioChunkBuffer,
    cmd: Command,
) -> bool {
    match cmd {
        Command::Start(ack) => {
            machine.start();
            let _ = ack.send(());
            false
        }
        Command::Stop(ack) => {
            machine.stop();
            buffer.clear();
            let _ = ack.send(());
            false
        }
        Command::Shutdown => {
            machine.stop();
            true
        }
    }
}
