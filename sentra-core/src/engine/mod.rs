//! `SentraEngine`: top-level lifecycle controller.
//!
//! ## Lifecycle
//!
//! ```text
//! SentraEngine::new()
//!     └─► initialize()       → model loaded, status = Initializing → Ready
//!         └─► start()        → mic open, detector + vision spawned,
//!             │                status = Perceiving
//!             └─► stop()     → running=false, loops drain out, stream
//!                              dropped, status = Stopped
//! ```
//!
//! `start()`/`stop()` are idempotent-by-error: calling them in the wrong
//! state returns a typed error rather than panicking.
//!
//! ## Threading
//!
//! `cpal::Stream` is `!Send` on Windows/macOS, so [`MicCapture`] is created
//! inside the detector's `spawn_blocking` closure and dropped there when the
//! loop exits. A sync oneshot channel propagates open-device errors back to
//! the `start()` caller. The vision loop runs in its own `spawn_blocking`
//! task; camera frames arrive through [`SentraEngine::ingest_frame`] because
//! camera acquisition belongs to the embedding application.

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::info;

use crate::{
    acoustic::{
        detector::{self, DetectorContext, DetectorDiagnostics, DetectorSnapshot},
        AcousticConfig, AcousticEventDetector,
    },
    audio::MicCapture,
    buffering::create_mic_ring,
    emergency::{
        CampaignConfig, ContactResolver, EmergencyResponseOrchestrator, RegionInfo, Telephony,
    },
    error::{Result, SentraError},
    events::{CampaignEvent, EngineStatus, EngineStatusEvent, SceneEvent, SoundAlert},
    inference::EngineHandle,
    runtime::{HostProbe, ModelRuntimeManager, RuntimeConfig, SystemProbe},
    session::InferenceSessionCoordinator,
    speech::SpeechOutput,
    vision::{
        pipeline::{self, VisionContext, VisionDiagnostics, VisionSnapshot},
        CameraFrame, FrameSlot, VisionConfig,
    },
};

/// Broadcast channel capacity per event stream.
const BROADCAST_CAP: usize = 256;

/// Configuration for `SentraEngine`.
#[derive(Debug, Clone)]
pub struct SentraConfig {
    pub runtime: RuntimeConfig,
    pub vision: VisionConfig,
    pub acoustic: AcousticConfig,
    pub campaign: CampaignConfig,
}

impl SentraConfig {
    pub fn for_model(model_path: std::path::PathBuf) -> Self {
        Self {
            runtime: RuntimeConfig::for_model(model_path),
            vision: VisionConfig::default(),
            acoustic: AcousticConfig::default(),
            campaign: CampaignConfig::default(),
        }
    }
}

/// The top-level engine handle.
///
/// `SentraEngine` is `Send + Sync`, all fields use interior mutability.
/// Wrap in `Arc<SentraEngine>` to share between an app shell and
/// event-forwarding async tasks.
pub struct SentraEngine {
    config: SentraConfig,
    runtime: Arc<ModelRuntimeManager>,
    coordinator: Arc<InferenceSessionCoordinator>,
    orchestrator: Arc<EmergencyResponseOrchestrator>,
    speaker: Arc<dyn SpeechOutput>,
    /// `true` while capture and both pipelines are active.
    running: Arc<AtomicBool>,
    status: Arc<Mutex<EngineStatus>>,
    /// Keep-latest slot shared with the vision loop across restarts.
    frame_slot: FrameSlot,
    scene_tx: broadcast::Sender<SceneEvent>,
    alert_tx: broadcast::Sender<SoundAlert>,
    status_tx: broadcast::Sender<EngineStatusEvent>,
    /// Scene event sequence counter.
    seq: Arc<AtomicU64>,
    vision_diagnostics: Arc<VisionDiagnostics>,
    detector_diagnostics: Arc<DetectorDiagnostics>,
}

impl SentraEngine {
    /// Create an engine probing the host it actually runs on.
    /// Does not load the model; call `initialize()` then `start()`.
    pub fn new(
        config: SentraConfig,
        engine: EngineHandle,
        contacts: Arc<dyn ContactResolver>,
        telephony: Arc<dyn Telephony>,
        region: Arc<dyn RegionInfo>,
        speaker: Arc<dyn SpeechOutput>,
    ) -> Self {
        Self::with_probe(
            config,
            engine,
            contacts,
            telephony,
            region,
            speaker,
            Arc::new(SystemProbe),
        )
    }

    /// As `new`, but with an explicit host probe.
    #[allow(clippy::too_many_arguments)]
    pub fn with_probe(
        config: SentraConfig,
        engine: EngineHandle,
        contacts: Arc<dyn ContactResolver>,
        telephony: Arc<dyn Telephony>,
        region: Arc<dyn RegionInfo>,
        speaker: Arc<dyn SpeechOutput>,
        probe: Arc<dyn HostProbe>,
    ) -> Self {
        let runtime = Arc::new(ModelRuntimeManager::new(
            config.runtime.clone(),
            engine,
            probe,
        ));
        let coordinator = Arc::new(InferenceSessionCoordinator::new(Arc::clone(&runtime)));
        let orchestrator = Arc::new(EmergencyResponseOrchestrator::new(
            config.campaign.clone(),
            contacts,
            telephony,
            region,
        ));
        let (scene_tx, _) = broadcast::channel(BROADCAST_CAP);
        let (alert_tx, _) = broadcast::channel(BROADCAST_CAP);
        let (status_tx, _) = broadcast::channel(BROADCAST_CAP);

        Self {
            config,
            runtime,
            coordinator,
            orchestrator,
            speaker,
            running: Arc::new(AtomicBool::new(false)),
            status: Arc::new(Mutex::new(EngineStatus::Idle)),
            frame_slot: FrameSlot::new(),
            scene_tx,
            alert_tx,
            status_tx,
            seq: Arc::new(AtomicU64::new(0)),
            vision_diagnostics: Arc::new(VisionDiagnostics::default()),
            detector_diagnostics: Arc::new(DetectorDiagnostics::default()),
        }
    }

    /// Load the model runtime. Idempotent; blocking.
    ///
    /// Call once at application startup, before `start()`.
    pub fn initialize(&self) -> Result<()> {
        self.set_status(EngineStatus::Initializing, None);
        match self.runtime.initialize() {
            Ok(()) => {
                self.set_status(EngineStatus::Ready, None);
                info!("runtime initialized");
                Ok(())
            }
            Err(e) => {
                self.set_status(EngineStatus::Error, Some(e.to_string()));
                Err(e)
            }
        }
    }

    /// Start microphone capture and both perception loops.
    ///
    /// Blocks until the audio device is confirmed open (or fails), then
    /// returns; the loops continue on background blocking threads.
    ///
    /// # Errors
    /// - `SentraError::AlreadyRunning` when already started.
    /// - `SentraError::NotReady` when `initialize()` has not succeeded.
    /// - `SentraError::NoDefaultInputDevice` / `SentraError::AudioStream`
    ///   on device errors.
    pub fn start(&self) -> Result<()> {
        if self.running.load(Ordering::SeqCst) {
            return Err(SentraError::AlreadyRunning);
        }
        if !self.runtime.is_ready() {
            return Err(SentraError::NotReady(
                "runtime not initialized, call initialize() first".into(),
            ));
        }

        self.running.store(true, Ordering::SeqCst);
        let (producer, consumer) = create_mic_ring();

        // ── Acoustic path: open mic + run detector on one blocking thread ──
        let running = Arc::clone(&self.running);
        let detector_ctx_parts = (
            AcousticEventDetector::new(self.config.acoustic.clone()),
            consumer,
            self.alert_tx.clone(),
            Some(Arc::clone(&self.orchestrator)),
            Arc::clone(&self.speaker),
            Arc::clone(&self.detector_diagnostics),
        );
        let (open_tx, open_rx) = std::sync::mpsc::channel::<Result<u32>>();

        tokio::task::spawn_blocking(move || {
            // The stream must be created and dropped on this thread.
            let capture = match MicCapture::open_default(producer, Arc::clone(&running)) {
                Ok(c) => {
                    let _ = open_tx.send(Ok(c.sample_rate));
                    c
                }
                Err(e) => {
                    let _ = open_tx.send(Err(e));
                    running.store(false, Ordering::SeqCst);
                    return;
                }
            };

            let (detector, consumer, alert_tx, orchestrator, speaker, diagnostics) =
                detector_ctx_parts;
            detector::run(DetectorContext {
                detector,
                consumer,
                running,
                alert_tx,
                orchestrator,
                speaker,
                capture_sample_rate: capture.sample_rate,
                diagnostics,
            });

            drop(capture);
        });

        match open_rx.recv() {
            Ok(Ok(_rate)) => {}
            Ok(Err(e)) => {
                self.running.store(false, Ordering::SeqCst);
                self.set_status(EngineStatus::Error, Some(e.to_string()));
                return Err(e);
            }
            Err(_) => {
                self.running.store(false, Ordering::SeqCst);
                self.set_status(EngineStatus::Error, Some("detector failed to start".into()));
                return Err(SentraError::Other(anyhow::anyhow!(
                    "detector task died unexpectedly"
                )));
            }
        }

        // ── Vision path ──────────────────────────────────────────────────
        let vision_ctx = VisionContext {
            config: self.config.vision.clone(),
            slot: self.frame_slot.clone(),
            coordinator: Arc::clone(&self.coordinator),
            speaker: Arc::clone(&self.speaker),
            running: Arc::clone(&self.running),
            scene_tx: self.scene_tx.clone(),
            seq: Arc::clone(&self.seq),
            diagnostics: Arc::clone(&self.vision_diagnostics),
        };
        tokio::task::spawn_blocking(move || pipeline::run(vision_ctx));

        self.set_status(EngineStatus::Perceiving, None);
        info!("engine started, perceiving");
        Ok(())
    }

    /// Stop capture and both loops.
    ///
    /// The mic callback no-ops first, then the detector drains what remains
    /// in the ring, then the stream drops, producers stop before consumers.
    ///
    /// # Errors
    /// `SentraError::NotRunning` when not currently running.
    pub fn stop(&self) -> Result<()> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(SentraError::NotRunning);
        }
        self.running.store(false, Ordering::SeqCst);
        self.set_status(EngineStatus::Stopped, None);
        info!("engine stop requested");
        Ok(())
    }

    /// Hand a camera frame to the vision pipeline. Pending frames are
    /// superseded, never queued. Safe to call at sensor rate.
    pub fn ingest_frame(&self, frame: CameraFrame) {
        self.frame_slot.ingest(frame);
    }

    /// Abort a running emergency calling campaign, if any.
    pub fn cancel_emergency(&self) {
        self.orchestrator.cancel();
    }

    /// Direct access to the session coordinator, for ad-hoc requests
    /// (user-initiated questions about the scene, audio snippets).
    pub fn coordinator(&self) -> Arc<InferenceSessionCoordinator> {
        Arc::clone(&self.coordinator)
    }

    /// Current engine status (snapshot).
    pub fn status(&self) -> EngineStatus {
        *self.status.lock()
    }

    pub fn subscribe_scene(&self) -> broadcast::Receiver<SceneEvent> {
        self.scene_tx.subscribe()
    }

    pub fn subscribe_alerts(&self) -> broadcast::Receiver<SoundAlert> {
        self.alert_tx.subscribe()
    }

    pub fn subscribe_campaign(&self) -> broadcast::Receiver<CampaignEvent> {
        self.orchestrator.subscribe_campaign()
    }

    pub fn subscribe_status(&self) -> broadcast::Receiver<EngineStatusEvent> {
        self.status_tx.subscribe()
    }

    pub fn vision_diagnostics_snapshot(&self) -> VisionSnapshot {
        self.vision_diagnostics.snapshot()
    }

    pub fn detector_diagnostics_snapshot(&self) -> DetectorSnapshot {
        self.detector_diagnostics.snapshot()
    }

    // ── Internal helpers ─────────────────────────────────────────────────

    fn set_status(&self, new_status: EngineStatus, detail: Option<String>) {
        *self.status.lock() = new_status;
        let _ = self.status_tx.send(EngineStatusEvent {
            status: new_status,
            detail,
        });
    }
}
