//! Multimodal engine abstraction.
//!
//! The `MultimodalEngine` trait decouples the runtime manager and session
//! coordinator from any specific on-device backend. The engine is treated as
//! an opaque capability: it loads a model artifact, binds one generation
//! session, accepts text/image/audio attachments, and pushes incremental
//! output through a channel sink.
//!
//! `&mut self` throughout intentionally expresses that engines are stateful
//! (a bound session, attachment order, KV caches). All mutation is serialised
//! through `EngineHandle`'s `parking_lot::Mutex`, the same lock that
//! enforces the one-request-in-flight invariant.

pub mod stub;

pub use stub::StubEngine;

use std::path::PathBuf;
use std::sync::Arc;

use crossbeam_channel::Sender;
use parking_lot::Mutex;

use crate::buffering::chunk::PcmChunk;
use crate::error::Result;

/// Construction options handed to the native load routine.
///
/// Bounds are deliberate: an unbounded context or token ceiling lets a
/// runaway generation hold the single shared session far past any useful
/// result.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Path to the model artifact on disk.
    pub model_path: PathBuf,
    /// Maximum context length in tokens.
    pub max_context_tokens: u32,
    /// Ceiling on generated tokens per request.
    pub max_output_tokens: u32,
    /// Whether the vision modality is enabled at load time.
    pub enable_vision: bool,
    /// Fixed sampling temperature.
    pub temperature: f32,
    /// Fixed nucleus-sampling cutoff.
    pub top_p: f32,
}

impl EngineOptions {
    pub fn for_model(model_path: PathBuf) -> Self {
        Self {
            model_path,
            max_context_tokens: 4_096,
            max_output_tokens: 256,
            enable_vision: true,
            temperature: 0.7,
            top_p: 0.9,
        }
    }
}

/// An encoded camera frame or still image handed to the engine.
#[derive(Debug, Clone)]
pub struct ImagePayload {
    /// Encoded image bytes (JPEG/PNG as produced by the frame source).
    pub bytes: Vec<u8>,
    /// Pixel dimensions, when the frame source knows them.
    pub width: u32,
    pub height: u32,
}

/// One unit of incremental generation output pushed by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationEvent {
    /// A chunk of generated text. Chunks concatenate in push order.
    Chunk(String),
    /// Terminal marker: generation for this request is complete.
    Done,
    /// Terminal marker: the engine failed mid-generation.
    Failed(String),
}

/// Contract for on-device multimodal inference backends.
///
/// ## Attachment ordering
///
/// Within one request the text instruction must be attached before any image
/// payload, and `generate` must only be called after all attachments. The
/// underlying engines treat the reverse order as undefined behavior, so this
/// is a programming invariant of every caller, not a runtime check here.
pub trait MultimodalEngine: Send + 'static {
    /// Native construction: load weights and allocate device buffers.
    ///
    /// This is the expensive call the runtime manager guards with a hard
    /// wall-clock timeout. It may legitimately take minutes on first load.
    fn load(&mut self, options: &EngineOptions) -> Result<()>;

    /// Create (or replace) the single generation session bound to the
    /// loaded model. Discards any prior session state.
    fn new_session(&mut self) -> Result<()>;

    /// Attach a text instruction to the current session.
    fn attach_text(&mut self, prompt: &str) -> Result<()>;

    /// Attach an image payload to the current session.
    fn attach_image(&mut self, image: &ImagePayload) -> Result<()>;

    /// Attach an audio clip to the current session.
    fn attach_audio(&mut self, audio: &PcmChunk) -> Result<()>;

    /// Trigger generation over everything attached since the last trigger.
    ///
    /// Output is pushed through `sink` as it is produced, ending with
    /// `GenerationEvent::Done` or `GenerationEvent::Failed`. Engines backed
    /// by a native callback thread may return before the terminal event has
    /// been pushed; the coordinator drains the channel against a deadline
    /// and never relies on this call blocking until completion.
    fn generate(&mut self, sink: Sender<GenerationEvent>) -> Result<()>;

    /// Release the loaded model and any bound session.
    fn unload(&mut self);
}

/// Thread-safe reference-counted handle to any `MultimodalEngine` implementor.
///
/// The inner mutex is the session mutex from the concurrency model: holding
/// it for the full span of a request is what guarantees no two inference
/// calls are ever in flight simultaneously. `parking_lot::Mutex` is used for
/// non-poisoning behaviour on panic and a cheaper uncontended path.
#[derive(Clone)]
pub struct EngineHandle(pub Arc<Mutex<dyn MultimodalEngine>>);

impl EngineHandle {
    /// Wrap any `MultimodalEngine` in an `EngineHandle`.
    pub fn new<E: MultimodalEngine>(engine: E) -> Self {
        Self(Arc::new(Mutex::new(engine)))
    }
}

impl std::fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineHandle").finish_non_exhaustive()
    }
}
