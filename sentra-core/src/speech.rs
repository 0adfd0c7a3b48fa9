//! Speech output collaborator boundary.
//!
//! The core hands finished description text to a `SpeechOutput` implementor
//! and moves on. Interrupting the previous utterance when a new description
//! arrives is the collaborator's concern (platform TTS queues differ), not
//! the pipeline's.

use tracing::info;

/// Sink for spoken descriptions and alert announcements.
pub trait SpeechOutput: Send + Sync + 'static {
    /// Queue `text` for speech, flushing any still-playing utterance.
    fn speak(&self, text: &str);
}

/// Discards all speech. Default when no platform TTS is wired in.
pub struct NullSpeaker;

impl SpeechOutput for NullSpeaker {
    fn speak(&self, _text: &str) {}
}

/// Logs what would be spoken. Useful in headless runs and demos.
pub struct TracingSpeaker;

impl SpeechOutput for TracingSpeaker {
    fn speak(&self, text: &str) {
        info!(text, "speak");
    }
}
