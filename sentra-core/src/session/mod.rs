//! `InferenceSessionCoordinator`: serialized, timeout-bounded access to the
//! one shared generation session.
//!
//! ## Execution model (per request)
//!
//! ```text
//! 1. Wait (bounded) on the runtime readiness gate
//! 2. Lock the engine mutex: FIFO on the lock, one request in flight
//! 3. Session hygiene: recreate the session before audio requests
//! 4. Attach prompt, then payload (ordering is an engine invariant)
//! 5. generate() pushes GenerationEvents into a crossbeam channel
//! 6. Drain the channel against the request's per-modality deadline
//! ```
//!
//! A timed-out request with partial text returns the partial as a
//! best-effort result; a timed-out request with nothing returns a fixed
//! placeholder. Callers are never blocked indefinitely and never see a raw
//! engine error string as a description.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::buffering::chunk::PcmChunk;
use crate::error::{Result, SentraError};
use crate::inference::{GenerationEvent, ImagePayload};
use crate::runtime::ModelRuntimeManager;

/// Returned when a request times out before producing any output.
pub const STILL_PROCESSING_TEXT: &str = "Still processing, please try again in a moment.";

/// Per-modality default deadlines.
pub const TEXT_TIMEOUT: Duration = Duration::from_secs(30);
pub const IMAGE_TIMEOUT: Duration = Duration::from_secs(75);
pub const FRAME_TIMEOUT: Duration = Duration::from_secs(30);
pub const AUDIO_TIMEOUT: Duration = Duration::from_secs(15);

/// How long `submit` waits for the readiness gate before giving up.
const GATE_WAIT: Duration = Duration::from_secs(10);

/// What kind of payload a request carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Modality {
    Text,
    Image,
    VideoFrame,
    Audio,
}

/// One immutable unit of work for the shared session.
///
/// Owned by the coordinator from submission until a terminal result
/// (success, timeout fallback, or typed error) is produced.
#[derive(Debug, Clone)]
pub struct PerceptionRequest {
    pub modality: Modality,
    pub prompt: String,
    pub image: Option<ImagePayload>,
    pub audio: Option<PcmChunk>,
    pub timeout: Duration,
}

impl PerceptionRequest {
    pub fn text(prompt: impl Into<String>) -> Self {
        Self {
            modality: Modality::Text,
            prompt: prompt.into(),
            image: None,
            audio: None,
            timeout: TEXT_TIMEOUT,
        }
    }

    pub fn image(prompt: impl Into<String>, image: ImagePayload) -> Self {
        Self {
            modality: Modality::Image,
            prompt: prompt.into(),
            image: Some(image),
            audio: None,
            timeout: IMAGE_TIMEOUT,
        }
    }

    pub fn video_frame(prompt: impl Into<String>, frame: ImagePayload) -> Self {
        Self {
            modality: Modality::VideoFrame,
            prompt: prompt.into(),
            image: Some(frame),
            audio: None,
            timeout: FRAME_TIMEOUT,
        }
    }

    pub fn audio(prompt: impl Into<String>, audio: PcmChunk) -> Self {
        Self {
            modality: Modality::Audio,
            prompt: prompt.into(),
            image: None,
            audio: Some(audio),
            timeout: AUDIO_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Shared request counters for observability.
pub struct CoordinatorDiagnostics {
    pub submitted: AtomicUsize,
    pub completed: AtomicUsize,
    pub timed_out_partial: AtomicUsize,
    pub timed_out_empty: AtomicUsize,
    pub errors: AtomicUsize,
    pub sessions_recreated: AtomicUsize,
}

impl Default for CoordinatorDiagnostics {
    fn default() -> Self {
        Self {
            submitted: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
            timed_out_partial: AtomicUsize::new(0),
            timed_out_empty: AtomicUsize::new(0),
            errors: AtomicUsize::new(0),
            sessions_recreated: AtomicUsize::new(0),
        }
    }
}

impl CoordinatorDiagnostics {
    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            submitted: self.submitted.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            timed_out_partial: self.timed_out_partial.load(Ordering::Relaxed),
            timed_out_empty: self.timed_out_empty.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            sessions_recreated: self.sessions_recreated.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DiagnosticsSnapshot {
    pub submitted: usize,
    pub completed: usize,
    pub timed_out_partial: usize,
    pub timed_out_empty: usize,
    pub errors: usize,
    pub sessions_recreated: usize,
}

/// Serializes all inference work through the runtime's engine mutex.
pub struct InferenceSessionCoordinator {
    runtime: Arc<ModelRuntimeManager>,
    /// Modality of the previous request, for session hygiene.
    last_modality: Mutex<Option<Modality>>,
    diagnostics: Arc<CoordinatorDiagnostics>,
}

impl InferenceSessionCoordinator {
    pub fn new(runtime: Arc<ModelRuntimeManager>) -> Self {
        Self {
            runtime,
            last_modality: Mutex::new(None),
            diagnostics: Arc::new(CoordinatorDiagnostics::default()),
        }
    }

    pub fn diagnostics_snapshot(&self) -> DiagnosticsSnapshot {
        self.diagnostics.snapshot()
    }

    /// Execute one request against the shared session.
    ///
    /// Blocks the calling thread: first on the readiness gate (bounded),
    /// then on the engine mutex (bounded transitively, the holder ahead is
    /// capped by its own timeout), then on generation (capped by
    /// `request.timeout`).
    pub fn submit(&self, request: PerceptionRequest) -> Result<String> {
        self.diagnostics.submitted.fetch_add(1, Ordering::Relaxed);
        self.runtime.wait_ready(GATE_WAIT)?;

        let handle = self.runtime.engine();
        let mut engine = handle.0.lock();

        // A session that just carried a vision exchange cross-contaminates
        // audio transcription; recreate before switching into audio.
        {
            let mut last = self.last_modality.lock();
            if request.modality == Modality::Audio && *last != Some(Modality::Audio) {
                debug!("recreating session before audio request");
                engine.new_session()?;
                self.diagnostics
                    .sessions_recreated
                    .fetch_add(1, Ordering::Relaxed);
            }
            *last = Some(request.modality);
        }

        // Attachment order: text before image, generation only after both.
        // Reversing this is undefined behavior in the underlying engines.
        engine.attach_text(&request.prompt)?;
        if let Some(ref image) = request.image {
            engine.attach_image(image)?;
        }
        if let Some(ref audio) = request.audio {
            engine.attach_audio(audio)?;
        }

        let (sink, chunks) = crossbeam_channel::unbounded();
        engine.generate(sink)?;

        // The engine mutex stays held while draining: a native backend keeps
        // pushing from its callback thread until its terminal event, and no
        // other request may interleave with that.
        let result = self.drain(&request, chunks);
        match &result {
            Ok(_) => {}
            Err(e) => {
                self.diagnostics.errors.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, modality = ?request.modality, "inference request failed");
            }
        }
        result
    }

    /// Pull-side of the push/pull conversion: accumulate chunks until the
    /// terminal marker or the request deadline.
    fn drain(
        &self,
        request: &PerceptionRequest,
        chunks: crossbeam_channel::Receiver<GenerationEvent>,
    ) -> Result<String> {
        let deadline = Instant::now() + request.timeout;
        let mut accumulated = String::new();

        loop {
            let now = Instant::now();
            if now >= deadline {
                return Ok(self.timeout_fallback(request, accumulated));
            }
            match chunks.recv_timeout(deadline - now) {
                Ok(GenerationEvent::Chunk(text)) => accumulated.push_str(&text),
                Ok(GenerationEvent::Done) => {
                    self.diagnostics.completed.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        modality = ?request.modality,
                        chars = accumulated.len(),
                        "generation complete"
                    );
                    return Ok(accumulated);
                }
                Ok(GenerationEvent::Failed(cause)) => {
                    return Err(SentraError::Native(cause));
                }
                Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                    return Ok(self.timeout_fallback(request, accumulated));
                }
                Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                    // Sink dropped without a terminal marker. Treat whatever
                    // arrived as the engine's full answer.
                    if accumulated.is_empty() {
                        return Err(SentraError::Native(
                            "engine closed the generation channel without output".into(),
                        ));
                    }
                    self.diagnostics.completed.fetch_add(1, Ordering::Relaxed);
                    return Ok(accumulated);
                }
            }
        }
    }

    fn timeout_fallback(&self, request: &PerceptionRequest, accumulated: String) -> String {
        if accumulated.is_empty() {
            self.diagnostics
                .timed_out_empty
                .fetch_add(1, Ordering::Relaxed);
            info!(
                modality = ?request.modality,
                timeout_s = request.timeout.as_secs(),
                "request timed out with no output, returning placeholder"
            );
            STILL_PROCESSING_TEXT.to_string()
        } else {
            self.diagnostics
                .timed_out_partial
                .fetch_add(1, Ordering::Relaxed);
            warn!(
                modality = ?request.modality,
                chars = accumulated.len(),
                "request timed out, returning partial output as best effort"
            );
            accumulated
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::Write;
    use std::path::PathBuf;

    use crossbeam_channel::Sender;

    use crate::inference::{EngineHandle, EngineOptions, MultimodalEngine};
    use crate::runtime::{HostMemory, HostProbe, RuntimeConfig};

    struct PlentyProbe;
    impl HostProbe for PlentyProbe {
        fn memory(&self) -> Option<HostMemory> {
            Some(HostMemory {
                total_mb: 16_384,
                available_mb: 12_288,
            })
        }
        fn emulated_environment(&self) -> Option<String> {
            None
        }
    }

    /// Scripted engine: records call order, optionally never completes.
    /// Without a terminal event in `reply` the sink is held open so the
    /// coordinator's deadline (not channel disconnection) ends the drain.
    struct ScriptedEngine {
        log: Arc<Mutex<Vec<String>>>,
        reply: Vec<GenerationEvent>,
        _held_sink: Option<Sender<GenerationEvent>>,
    }

    impl MultimodalEngine for ScriptedEngine {
        fn load(&mut self, _options: &EngineOptions) -> Result<()> {
            Ok(())
        }
        fn new_session(&mut self) -> Result<()> {
            self.log.lock().push("new_session".into());
            Ok(())
        }
        fn attach_text(&mut self, prompt: &str) -> Result<()> {
            self.log.lock().push(format!("text:{prompt}"));
            Ok(())
        }
        fn attach_image(&mut self, _image: &ImagePayload) -> Result<()> {
            self.log.lock().push("image".into());
            Ok(())
        }
        fn attach_audio(&mut self, _audio: &PcmChunk) -> Result<()> {
            self.log.lock().push("audio".into());
            Ok(())
        }
        fn generate(&mut self, sink: Sender<GenerationEvent>) -> Result<()> {
            self.log.lock().push("generate".into());
            for event in &self.reply {
                let _ = sink.send(event.clone());
            }
            let terminal = self
                .reply
                .iter()
                .any(|e| matches!(e, GenerationEvent::Done | GenerationEvent::Failed(_)));
            if !terminal {
                self._held_sink = Some(sink);
            }
            Ok(())
        }
        fn unload(&mut self) {}
    }

    fn ready_coordinator(
        log: Arc<Mutex<Vec<String>>>,
        reply: Vec<GenerationEvent>,
    ) -> (InferenceSessionCoordinator, tempfile::NamedTempFile) {
        let mut model = tempfile::NamedTempFile::new().unwrap();
        model.write_all(&[0u8; 1024]).unwrap();

        let mut config = RuntimeConfig::for_model(model.path().to_path_buf());
        config.min_free_memory_mb = Some(1);
        let engine = EngineHandle::new(ScriptedEngine {
            log,
            reply,
            _held_sink: None,
        });
        let runtime = Arc::new(crate::runtime::ModelRuntimeManager::new(
            config,
            engine,
            Arc::new(PlentyProbe),
        ));
        runtime.initialize().unwrap();
        (InferenceSessionCoordinator::new(runtime), model)
    }

    fn frame() -> ImagePayload {
        ImagePayload {
            bytes: vec![0xFF; 64],
            width: 8,
            height: 8,
        }
    }

    #[test]
    fn prompt_attaches_before_image_and_generation_last() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let (coordinator, _model) = ready_coordinator(
            Arc::clone(&log),
            vec![
                GenerationEvent::Chunk("a desk".into()),
                GenerationEvent::Done,
            ],
        );

        let text = coordinator
            .submit(PerceptionRequest::image("describe", frame()))
            .unwrap();
        assert_eq!(text, "a desk");

        let calls = log.lock().clone();
        // new_session from initialization, then the attach ordering.
        assert_eq!(
            calls,
            vec!["new_session", "text:describe", "image", "generate"]
        );
    }

    #[test]
    fn timeout_with_no_output_returns_placeholder() {
        let log = Arc::new(Mutex::new(Vec::new()));
        // No terminal event; the engine "never completes".
        let (coordinator, _model) = ready_coordinator(Arc::clone(&log), vec![]);

        let started = Instant::now();
        let text = coordinator
            .submit(PerceptionRequest::text("hello").with_timeout(Duration::from_millis(80)))
            .unwrap();
        assert_eq!(text, STILL_PROCESSING_TEXT);
        assert!(started.elapsed() >= Duration::from_millis(80));

        let snap = coordinator.diagnostics_snapshot();
        assert_eq!(snap.timed_out_empty, 1);
    }

    #[test]
    fn timeout_with_partial_output_returns_partial() {
        let log = Arc::new(Mutex::new(Vec::new()));
        // A chunk arrives but the terminal marker never does.
        let (coordinator, _model) = ready_coordinator(
            Arc::clone(&log),
            vec![GenerationEvent::Chunk("partial desc".into())],
        );

        let text = coordinator
            .submit(PerceptionRequest::text("hello").with_timeout(Duration::from_millis(60)))
            .unwrap();
        assert_eq!(text, "partial desc");
        assert_eq!(coordinator.diagnostics_snapshot().timed_out_partial, 1);
    }

    #[test]
    fn audio_after_vision_recreates_session() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let (coordinator, _model) =
            ready_coordinator(Arc::clone(&log), vec![GenerationEvent::Done]);

        coordinator
            .submit(PerceptionRequest::image("look", frame()))
            .unwrap();
        coordinator
            .submit(PerceptionRequest::audio(
                "transcribe",
                PcmChunk::new(vec![0.0; 160], 16_000),
            ))
            .unwrap();
        // Second audio request keeps the audio session.
        coordinator
            .submit(PerceptionRequest::audio(
                "transcribe",
                PcmChunk::new(vec![0.0; 160], 16_000),
            ))
            .unwrap();

        let recreations = log
            .lock()
            .iter()
            .filter(|call| call.as_str() == "new_session")
            .count();
        // One from initialization, one before the first audio request.
        assert_eq!(recreations, 2);
        assert_eq!(coordinator.diagnostics_snapshot().sessions_recreated, 1);
    }

    #[test]
    fn mid_generation_failure_is_a_typed_error() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let (coordinator, _model) = ready_coordinator(
            Arc::clone(&log),
            vec![
                GenerationEvent::Chunk("half".into()),
                GenerationEvent::Failed("device lost".into()),
            ],
        );

        let err = coordinator
            .submit(PerceptionRequest::text("hello"))
            .unwrap_err();
        assert!(matches!(err, SentraError::Native(cause) if cause == "device lost"));
        assert_eq!(coordinator.diagnostics_snapshot().errors, 1);
    }
}
