//! Single-write-many-read readiness signal.
//!
//! A `ReadinessGate` transitions exactly once from `Pending` to `Ready` or
//! `Failed(cause)`. It is never re-settled; a full runtime reset installs a
//! fresh gate instead (and fails the old one so blocked waiters wake).

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::warn;

use crate::error::{Result, SentraError};

/// Settlement state of the gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateState {
    Pending,
    Ready,
    Failed {
        cause: String,
        /// Whether a fresh initialization attempt could plausibly succeed.
        retryable: bool,
    },
}

struct GateInner {
    state: Mutex<GateState>,
    settled: Condvar,
}

/// Cloneable handle to one readiness signal.
#[derive(Clone)]
pub struct ReadinessGate {
    inner: Arc<GateInner>,
}

impl ReadinessGate {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(GateInner {
                state: Mutex::new(GateState::Pending),
                settled: Condvar::new(),
            }),
        }
    }

    /// Settle the gate as ready. No-op (with a warning) if already settled.
    pub fn set_ready(&self) {
        let mut state = self.inner.state.lock();
        if *state != GateState::Pending {
            warn!(current = ?*state, "readiness gate already settled, ignoring set_ready");
            return;
        }
        *state = GateState::Ready;
        self.inner.settled.notify_all();
    }

    /// Settle the gate as failed. No-op (with a warning) if already settled.
    pub fn set_failed(&self, cause: &SentraError) {
        let mut state = self.inner.state.lock();
        if *state != GateState::Pending {
            warn!(current = ?*state, %cause, "readiness gate already settled, ignoring set_failed");
            return;
        }
        *state = GateState::Failed {
            cause: cause.to_string(),
            retryable: cause.is_retryable(),
        };
        self.inner.settled.notify_all();
    }

    /// Current state snapshot.
    pub fn snapshot(&self) -> GateState {
        self.inner.state.lock().clone()
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.snapshot(), GateState::Ready)
    }

    /// Block until the gate settles or `timeout` elapses.
    ///
    /// # Errors
    /// - `SentraError::GateFailed` if the gate settled as failed.
    /// - `SentraError::NotReady` if the timeout elapsed while still pending.
    pub fn wait_ready(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut state = self.inner.state.lock();
        loop {
            match &*state {
                GateState::Ready => return Ok(()),
                GateState::Failed { cause, .. } => {
                    return Err(SentraError::GateFailed(cause.clone()))
                }
                GateState::Pending => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(SentraError::NotReady(
                            "timed out waiting for runtime readiness".into(),
                        ));
                    }
                    self.inner.settled.wait_for(&mut state, deadline - now);
                }
            }
        }
    }
}

impl Default for ReadinessGate {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn settles_exactly_once() {
        let gate = ReadinessGate::new();
        gate.set_ready();
        // Second settlement attempt is ignored.
        gate.set_failed(&SentraError::Native("late failure".into()));
        assert_eq!(gate.snapshot(), GateState::Ready);
    }

    #[test]
    fn failed_first_write_wins() {
        let gate = ReadinessGate::new();
        gate.set_failed(&SentraError::InitTimeout(120));
        gate.set_ready();
        assert!(matches!(
            gate.snapshot(),
            GateState::Failed { retryable: true, .. }
        ));
    }

    #[test]
    fn wait_ready_times_out_while_pending() {
        let gate = ReadinessGate::new();
        let err = gate.wait_ready(Duration::from_millis(30)).unwrap_err();
        assert!(matches!(err, SentraError::NotReady(_)));
    }

    #[test]
    fn wait_ready_wakes_cross_thread() {
        let gate = ReadinessGate::new();
        let waiter = gate.clone();
        let handle = thread::spawn(move || waiter.wait_ready(Duration::from_secs(2)));
        thread::sleep(Duration::from_millis(20));
        gate.set_ready();
        handle.join().unwrap().unwrap();
    }

    #[test]
    fn wait_ready_surfaces_failure_cause() {
        let gate = ReadinessGate::new();
        gate.set_failed(&SentraError::UnsupportedEnvironment("qemu".into()));
        let err = gate.wait_ready(Duration::from_millis(10)).unwrap_err();
        match err {
            SentraError::GateFailed(cause) => assert!(cause.contains("qemu")),
            other => panic!("unexpected error: {other}"),
        }
    }
}
