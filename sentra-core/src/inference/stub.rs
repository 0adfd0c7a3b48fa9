//! `StubEngine`: placeholder backend that echoes attachment metadata
//! without real inference.
//!
//! Lets the full runtime/session/vision/acoustic stack be exercised
//! end-to-end before a native multimodal backend is wired in. Deterministic:
//! the reply describes exactly what was attached.

use crossbeam_channel::Sender;
use tracing::debug;

use crate::buffering::chunk::PcmChunk;
use crate::error::{Result, SentraError};
use crate::inference::{EngineOptions, GenerationEvent, ImagePayload, MultimodalEngine};

/// Echo-style stub engine.
#[derive(Default)]
pub struct StubEngine {
    loaded: bool,
    session_alive: bool,
    pending_prompt: Option<String>,
    pending_image_bytes: usize,
    pending_audio_samples: usize,
    generation_count: u32,
}

impl StubEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn require_session(&self) -> Result<()> {
        if !self.session_alive {
            return Err(SentraError::Native("no live session".into()));
        }
        Ok(())
    }
}

impl MultimodalEngine for StubEngine {
    fn load(&mut self, options: &EngineOptions) -> Result<()> {
        debug!(model_path = %options.model_path.display(), "StubEngine::load, no-op");
        self.loaded = true;
        Ok(())
    }

    fn new_session(&mut self) -> Result<()> {
        if !self.loaded {
            return Err(SentraError::Native("engine not loaded".into()));
        }
        self.session_alive = true;
        self.pending_prompt = None;
        self.pending_image_bytes = 0;
        self.pending_audio_samples = 0;
        Ok(())
    }

    fn attach_text(&mut self, prompt: &str) -> Result<()> {
        self.require_session()?;
        self.pending_prompt = Some(prompt.to_string());
        Ok(())
    }

    fn attach_image(&mut self, image: &ImagePayload) -> Result<()> {
        self.require_session()?;
        self.pending_image_bytes = image.bytes.len();
        Ok(())
    }

    fn attach_audio(&mut self, audio: &PcmChunk) -> Result<()> {
        self.require_session()?;
        self.pending_audio_samples = audio.samples.len();
        Ok(())
    }

    fn generate(&mut self, sink: Sender<GenerationEvent>) -> Result<()> {
        self.require_session()?;
        self.generation_count += 1;

        let prompt_preview: String = self
            .pending_prompt
            .take()
            .unwrap_or_default()
            .chars()
            .take(32)
            .collect();

        let reply = format!(
            "[stub #{}: prompt \"{}\", {} image bytes, {} audio samples]",
            self.generation_count, prompt_preview, self.pending_image_bytes, self.pending_audio_samples,
        );
        self.pending_image_bytes = 0;
        self.pending_audio_samples = 0;

        // Two chunks, so downstream accumulation is exercised.
        let _ = sink.send(GenerationEvent::Chunk(reply));
        let _ = sink.send(GenerationEvent::Chunk(" ok".into()));
        let _ = sink.send(GenerationEvent::Done);
        Ok(())
    }

    fn unload(&mut self) {
        debug!("StubEngine::unload");
        self.loaded = false;
        self.session_alive = false;
    }
}
