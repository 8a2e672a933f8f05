//! Per-stage worker threads and the timed request/reply protocol.
//!
//! Each stage adapter is moved onto its own long-lived thread at
//! construction. The state machine talks to it through a pair of bounded
//! channels carrying sequence-numbered messages: a reply that misses its
//! deadline becomes `Failed(Timeout)`, and the stale reply is discarded
//! when it eventually arrives. A panic inside the adapter is caught at the
//! boundary and converted to `Failed(Internal)`, so the worker thread (and
//! the stage it owns) survives.

use crate::stages::FailureReason;
use crossbeam_channel::{Receiver, Sender, bounded};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Reply types that can absorb a boundary-level fault.
pub trait FromFailure {
    fn from_failure(reason: FailureReason) -> Self;
}

impl<T> FromFailure for Result<T, FailureReason> {
    fn from_failure(reason: FailureReason) -> Self {
        Err(reason)
    }
}

enum Inner<Req, Resp> {
    Running {
        req_tx: Sender<(u64, Req)>,
        resp_rx: Receiver<(u64, Resp)>,
        // Kept so the thread is joinable in principle; dropping the
        // request sender is what actually shuts the worker down.
        _handle: JoinHandle<()>,
    },
    /// The thread could not be spawned; every call reports the failure
    /// as `Failed(Internal)` instead.
    Unavailable(String),
}

/// Handle to a stage running on its own thread.
pub struct StageWorker<Req, Resp> {
    name: &'static str,
    inner: Inner<Req, Resp>,
    next_seq: u64,
    timeout: Duration,
}

impl<Req, Resp> StageWorker<Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + FromFailure + 'static,
{
    /// Spawns a worker thread owning `handler` (which in turn owns the
    /// stage adapter).
    pub fn spawn(
        name: &'static str,
        timeout: Duration,
        mut handler: impl FnMut(Req) -> Resp + Send + 'static,
    ) -> Self {
        let (req_tx, req_rx) = bounded::<(u64, Req)>(1);
        let (resp_tx, resp_rx) = bounded::<(u64, Resp)>(4);

        let spawned = std::thread::Builder::new()
            .name(format!("voxpipe-stage-{}", name))
            .spawn(move || {
                while let Ok((seq, req)) = req_rx.recv() {
                    let resp = match catch_unwind(AssertUnwindSafe(|| handler(req))) {
                        Ok(resp) => resp,
                        Err(_) => Resp::from_failure(FailureReason::Internal(format!(
                            "stage '{}' panicked",
                            name
                        ))),
                    };
                    // The caller may have timed out and moved on; a full
                    // reply channel means nothing is waiting, so the
                    // stale reply is dropped here.
                    let _ = resp_tx.try_send((seq, resp));
                }
            });

        let inner = match spawned {
            Ok(handle) => Inner::Running {
                req_tx,
                resp_rx,
                _handle: handle,
            },
            Err(e) => Inner::Unavailable(format!(
                "failed to spawn stage thread '{}': {}",
                name, e
            )),
        };

        Self {
            name,
            inner,
            next_seq: 0,
            timeout,
        }
    }

    /// Invokes the stage, waiting at most the configured timeout.
    ///
    /// `None` means the call did not produce a usable reply in time: the
    /// worker is saturated with an earlier call, the deadline passed, or
    /// the worker is gone. The caller treats all three as
    /// `Failed(Timeout)`.
    pub fn call(&mut self, req: Req) -> Option<Resp> {
        self.next_seq += 1;
        let seq = self.next_seq;
        let (req_tx, resp_rx) = match &self.inner {
            Inner::Running {
                req_tx, resp_rx, ..
            } => (req_tx, resp_rx),
            Inner::Unavailable(message) => {
                return Some(Resp::from_failure(FailureReason::Internal(
                    message.clone(),
                )));
            }
        };

        // Discard replies left over from calls that timed out.
        while resp_rx.try_recv().is_ok() {}

        if req_tx.try_send((seq, req)).is_err() {
            return None;
        }

        let deadline = Instant::now() + self.timeout;
        loop {
            match resp_rx.recv_deadline(deadline) {
                Ok((s, resp)) if s == seq => return Some(resp),
                Ok(_stale) => continue,
                Err(_) => return None,
            }
        }
    }

    /// Name of the stage this worker hosts.
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[cfg(test)]
    fn unavailable(name: &'static str, message: &str, timeout: Duration) -> Self {
        Self {
            name,
            inner: Inner::Unavailable(message.to_string()),
            next_seq: 0,
            timeout,
        }
    }
}
