//! `ModelRuntimeManager`: lifecycle of the one exclusive inference engine.
//!
//! ## Lifecycle
//!
//! ```text
//! ModelRuntimeManager::new()
//!     └─► initialize()      → validate artifact → probe host → load engine
//!         │                   → bind one session → gate = Ready
//!         └─► reset()       → unload engine, fresh gate, old gate failed
//! ```
//!
//! `initialize()` is idempotent and race-safe: the first caller becomes the
//! loader, concurrent callers block on the readiness gate (bounded) and share
//! the loader's outcome. If the loader fails, a waiter retries the load once
//! itself.
//!
//! ## Invariant
//!
//! The loader thread performs the native `load()` while holding the engine
//! mutex, the same mutex the session coordinator holds per request, so
//! initialization and inference can never overlap.

pub mod gate;
pub mod probe;

pub use gate::{GateState, ReadinessGate};
pub use probe::{HostMemory, HostProbe, SystemProbe};

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{error, info, info_span, warn};

use crate::error::{Result, SentraError};
use crate::inference::{EngineHandle, EngineOptions};

/// Configuration for the runtime manager.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Path to the model artifact.
    pub model_path: PathBuf,
    /// Free-memory floor below which initialization is rejected outright.
    /// Default: 1.5× the artifact size, minimum 1024 MB.
    pub min_free_memory_mb: Option<u64>,
    /// Hard wall-clock ceiling on the native load call. When it elapses the
    /// whole initialization fails, even if the native call is still running.
    /// Default: 120 s.
    pub hard_load_timeout: Duration,
    /// Softer interval after which the loader logs that the native call is
    /// unusually slow. Purely informational. Default: 300 s.
    pub soft_load_timeout: Duration,
    /// How long a concurrent `initialize()` caller waits on another
    /// attempt's gate before giving up. Default: 5 min.
    pub init_wait_timeout: Duration,
    /// Context-length bound handed to the engine. Default: 4096.
    pub max_context_tokens: u32,
    /// Generated-token ceiling handed to the engine. Default: 256.
    pub max_output_tokens: u32,
}

impl RuntimeConfig {
    pub fn for_model(model_path: PathBuf) -> Self {
        Self {
            model_path,
            min_free_memory_mb: None,
            hard_load_timeout: Duration::from_secs(120),
            soft_load_timeout: Duration::from_secs(300),
            init_wait_timeout: Duration::from_secs(300),
            max_context_tokens: 4_096,
            max_output_tokens: 256,
        }
    }
}

/// Interval between progress log lines while waiting on the native load.
const LOAD_PROGRESS_INTERVAL: Duration = Duration::from_secs(15);

/// Memory headroom required beyond the artifact itself: weights are mapped
/// once and roughly half again is needed for KV cache and activations.
const MEMORY_FACTOR_NUM: u64 = 3;
const MEMORY_FACTOR_DEN: u64 = 2;
const MEMORY_FLOOR_MB: u64 = 1_024;

/// Owns the exclusive engine handle and its readiness gate.
pub struct ModelRuntimeManager {
    config: RuntimeConfig,
    engine: EngineHandle,
    probe: Arc<dyn HostProbe>,
    /// Replaced wholesale by `reset()`; gates settle exactly once.
    gate: Mutex<ReadinessGate>,
    /// Set while one load sequence is running; prevents a second loader.
    initializing: AtomicBool,
}

impl ModelRuntimeManager {
    pub fn new(config: RuntimeConfig, engine: EngineHandle, probe: Arc<dyn HostProbe>) -> Self {
        Self {
            config,
            engine,
            probe,
            gate: Mutex::new(ReadinessGate::new()),
            initializing: AtomicBool::new(false),
        }
    }

    /// The shared engine handle. Locking it serializes against both
    /// inference requests and the load sequence.
    pub fn engine(&self) -> EngineHandle {
        self.engine.clone()
    }

    /// Snapshot of the current gate.
    pub fn gate_state(&self) -> GateState {
        self.gate.lock().snapshot()
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.gate_state(), GateState::Ready)
    }

    /// Block until the runtime is ready, the current attempt fails, or
    /// `timeout` elapses. Re-fetches the gate each slice so a `reset()`
    /// during the wait is observed.
    pub fn wait_ready(&self, timeout: Duration) -> Result<()> {
        const SLICE: Duration = Duration::from_millis(250);
        let deadline = Instant::now() + timeout;
        loop {
            let gate = self.gate.lock().clone();
            let now = Instant::now();
            if now >= deadline {
                return Err(SentraError::NotReady(
                    "timed out waiting for runtime readiness".into(),
                ));
            }
            match gate.wait_ready(SLICE.min(deadline - now)) {
                Ok(()) => return Ok(()),
                Err(SentraError::NotReady(_)) => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Initialize the runtime. Idempotent: returns immediately when already
    /// ready; blocks (bounded) when another initialization is in progress.
    pub fn initialize(&self) -> Result<()> {
        match self.gate_state() {
            GateState::Ready => return Ok(()),
            GateState::Failed { cause, .. } => {
                // A previous attempt settled this gate. Retrying requires a
                // fresh gate, which only reset() installs.
                return Err(SentraError::GateFailed(cause));
            }
            GateState::Pending => {}
        }

        if self
            .initializing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            return self.run_load_sequence();
        }

        // Another caller is loading, wait for its outcome.
        info!("initialization already in progress, waiting on readiness gate");
        let gate = self.gate.lock().clone();
        match gate.wait_ready(self.config.init_wait_timeout) {
            Ok(()) => Ok(()),
            Err(SentraError::GateFailed(cause)) => {
                warn!(%cause, "other initialization attempt failed, retrying once");
                self.retry_after_failure()
            }
            Err(e) => Err(e),
        }
    }

    /// Tear down the engine and install a fresh gate.
    ///
    /// The old gate is failed (if still pending) so any blocked waiter wakes
    /// rather than hanging on a signal that will never settle.
    ///
    /// # Errors
    /// `SentraError::NotReady` when initialization is in progress, or when
    /// an abandoned native load from a hard-timeout failure still holds the
    /// engine mutex after one more hard-timeout interval. Retry the reset
    /// once the native call has come back.
    pub fn reset(&self) -> Result<()> {
        if self.initializing.load(Ordering::SeqCst) {
            return Err(SentraError::NotReady(
                "cannot reset while initialization is in progress".into(),
            ));
        }

        // Waits out any in-flight request, but bounded: after an
        // InitTimeout the load thread may still hold this mutex.
        match self.engine.0.try_lock_for(self.config.hard_load_timeout) {
            Some(mut engine) => engine.unload(),
            None => {
                return Err(SentraError::NotReady(
                    "engine is still busy with an abandoned native load".into(),
                ));
            }
        }

        let fresh = ReadinessGate::new();
        let old = std::mem::replace(&mut *self.gate.lock(), fresh);
        old.set_failed(&SentraError::NotReady("runtime was reset".into()));
        info!("runtime reset, engine unloaded, fresh readiness gate installed");
        Ok(())
    }

    // ── Load sequence ────────────────────────────────────────────────────

    /// One waiter-side retry after the loader's failure: install a fresh
    /// gate and attempt the load ourselves. If yet another caller wins the
    /// loader race, just wait again without further retries.
    fn retry_after_failure(&self) -> Result<()> {
        {
            let mut gate = self.gate.lock();
            if matches!(gate.snapshot(), GateState::Failed { .. }) {
                *gate = ReadinessGate::new();
            }
        }

        if self
            .initializing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            self.run_load_sequence()
        } else {
            let gate = self.gate.lock().clone();
            gate.wait_ready(self.config.init_wait_timeout)
        }
    }

    /// The ordered, abortable initialization sequence. Every failure path
    /// settles the gate exactly once and clears the initializing flag.
    fn run_load_sequence(&self) -> Result<()> {
        let gate = self.gate.lock().clone();
        let span = info_span!("runtime_init", model = %self.config.model_path.display());
        let _enter = span.enter();

        let result = self.validate_artifact().and_then(|artifact_mb| {
            self.check_host_resources(artifact_mb)?;
            self.load_engine()
        });

        match result {
            Ok(()) => {
                gate.set_ready();
                self.initializing.store(false, Ordering::SeqCst);
                info!("runtime ready");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, retryable = e.is_retryable(), "initialization failed");
                gate.set_failed(&e);
                self.initializing.store(false, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    /// Step 1: the artifact must exist and be non-empty. Returns its size
    /// in MB for the memory check.
    fn validate_artifact(&self) -> Result<u64> {
        let path = &self.config.model_path;
        let meta = std::fs::metadata(path).map_err(|_| SentraError::ModelNotFound {
            path: path.clone(),
        })?;
        if meta.len() == 0 {
            return Err(SentraError::CorruptModel { path: path.clone() });
        }
        Ok(meta.len() / (1024 * 1024))
    }

    /// Steps 2–3: memory floor and environment compatibility.
    fn check_host_resources(&self, artifact_mb: u64) -> Result<()> {
        if let Some(desc) = self.probe.emulated_environment() {
            return Err(SentraError::UnsupportedEnvironment(desc));
        }

        let required_mb = self.config.min_free_memory_mb.unwrap_or_else(|| {
            (artifact_mb * MEMORY_FACTOR_NUM / MEMORY_FACTOR_DEN).max(MEMORY_FLOOR_MB)
        });

        match self.probe.memory() {
            Some(mem) => {
                if mem.total_mb < required_mb {
                    return Err(SentraError::ModelTooLarge {
                        total_mb: mem.total_mb,
                        required_mb,
                    });
                }
                if mem.available_mb < required_mb {
                    return Err(SentraError::InsufficientMemory {
                        available_mb: mem.available_mb,
                        required_mb,
                    });
                }
                info!(
                    available_mb = mem.available_mb,
                    required_mb, "memory check passed"
                );
                Ok(())
            }
            None => {
                warn!("no memory probe available, skipping memory check");
                Ok(())
            }
        }
    }

    /// Steps 4–5: native load under the hard wall-clock timeout, then bind
    /// exactly one session. Both run on a worker thread that holds the
    /// engine mutex, so no inference call can interleave.
    fn load_engine(&self) -> Result<()> {
        let options = EngineOptions {
            model_path: self.config.model_path.clone(),
            max_context_tokens: self.config.max_context_tokens,
            max_output_tokens: self.config.max_output_tokens,
            enable_vision: true,
            temperature: 0.7,
            top_p: 0.9,
        };

        let engine = self.engine.clone();
        let soft_timeout = self.config.soft_load_timeout;
        let (done_tx, done_rx) = crossbeam_channel::bounded::<Result<()>>(1);

        std::thread::Builder::new()
            .name("sentra-model-load".into())
            .spawn(move || {
                let started = Instant::now();
                let result = {
                    let mut engine = engine.0.lock();
                    engine.load(&options).and_then(|()| engine.new_session())
                };
                let elapsed = started.elapsed();
                if elapsed > soft_timeout {
                    warn!(
                        elapsed_s = elapsed.as_secs(),
                        soft_timeout_s = soft_timeout.as_secs(),
                        "native load exceeded the soft timeout"
                    );
                }
                if done_tx.send(result).is_err() {
                    // The waiter already gave up on the hard timeout.
                    warn!(
                        elapsed_s = elapsed.as_secs(),
                        "native load finished after the initialization was abandoned"
                    );
                }
            })
            .map_err(|e| SentraError::Native(format!("failed to spawn load thread: {e}")))?;

        let started = Instant::now();
        let deadline = started + self.config.hard_load_timeout;
        loop {
            let now = Instant::now();
            if now >= deadline {
                return Err(SentraError::InitTimeout(
                    self.config.hard_load_timeout.as_secs(),
                ));
            }
            match done_rx.recv_timeout(LOAD_PROGRESS_INTERVAL.min(deadline - now)) {
                Ok(result) => return result,
                Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                    info!(
                        elapsed_s = started.elapsed().as_secs(),
                        "model load in progress"
                    );
                }
                Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                    return Err(SentraError::Native("load thread died unexpectedly".into()));
                }
            }
        }
    }
}
