//! Visual perception: keep-latest frame ingestion and the describe /
//! change-detect cadence.
//!
//! The frame source pushes at sensor rate; `FrameSlot` keeps only the newest
//! pending frame (queue depth ≤ 1 by construction). The blocking tick loop
//! in [`pipeline`] decides per tick between a full scene description and a
//! lightweight change-detection pass, both served by the session
//! coordinator.

pub mod pipeline;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::inference::ImagePayload;

/// Literal sentinel the engine is instructed to reply with when the scene
/// has not changed. Matched case-insensitively after trimming.
pub const NO_CHANGE_SENTINEL: &str = "NO_CHANGE";

/// Configuration for the vision pipeline cadence.
#[derive(Debug, Clone)]
pub struct VisionConfig {
    /// Floor on how often any frame reaches the coordinator. Default: 500 ms.
    pub min_process_interval: Duration,
    /// Interval between full scene descriptions. Default: 3 s.
    pub full_analysis_interval: Duration,
    /// Interval between change-detection passes (requires a prior
    /// description). Default: 1.5 s.
    pub change_detection_interval: Duration,
    /// Instruction for a full scene description.
    pub describe_prompt: String,
    /// Instruction prefix for change detection; the previous description is
    /// appended as context.
    pub change_prompt: String,
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            min_process_interval: Duration::from_millis(500),
            full_analysis_interval: Duration::from_secs(3),
            change_detection_interval: Duration::from_millis(1_500),
            describe_prompt: "Describe this scene briefly for a blind person. \
                              Mention obstacles and people first."
                .into(),
            change_prompt: format!(
                "Compare this frame with the previous scene. If nothing meaningful \
                 changed, reply exactly {NO_CHANGE_SENTINEL}. Otherwise describe \
                 the new scene briefly. Previous scene:"
            ),
        }
    }
}

/// One frame from the camera collaborator.
#[derive(Debug, Clone)]
pub struct CameraFrame {
    pub image: ImagePayload,
    pub captured_at: Instant,
}

impl CameraFrame {
    pub fn new(image: ImagePayload) -> Self {
        Self {
            image,
            captured_at: Instant::now(),
        }
    }
}

/// Keep-latest-only backpressure: a pending frame is replaced, never queued.
#[derive(Clone, Default)]
pub struct FrameSlot {
    latest: Arc<Mutex<Option<CameraFrame>>>,
    ingested: Arc<AtomicUsize>,
    superseded: Arc<AtomicUsize>,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept a frame at sensor rate. If a frame is already pending it is
    /// discarded in favour of this one.
    pub fn ingest(&self, frame: CameraFrame) {
        self.ingested.fetch_add(1, Ordering::Relaxed);
        let mut slot = self.latest.lock();
        if slot.replace(frame).is_some() {
            self.superseded.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Take the pending frame, leaving the slot empty.
    pub fn take(&self) -> Option<CameraFrame> {
        self.latest.lock().take()
    }

    /// Current queue depth: 0 or 1 by construction.
    pub fn depth(&self) -> usize {
        usize::from(self.latest.lock().is_some())
    }

    pub fn ingested(&self) -> usize {
        self.ingested.load(Ordering::Relaxed)
    }

    pub fn superseded(&self) -> usize {
        self.superseded.load(Ordering::Relaxed)
    }
}

/// The last committed scene understanding. Mutated only by the vision
/// pipeline after a confirmed change; read as context by the next
/// change-detection request.
#[derive(Debug, Default)]
pub struct SceneState {
    pub last_description: Option<String>,
    pub last_frame_at: Option<Instant>,
}

impl SceneState {
    /// Commit a new description, returning whether it differed from the
    /// previous one.
    pub fn commit(&mut self, description: &str, at: Instant) -> bool {
        let distinct = self.last_description.as_deref() != Some(description);
        self.last_description = Some(description.to_string());
        self.last_frame_at = Some(at);
        distinct
    }
}

/// Whether an engine reply is the no-change sentinel.
pub fn is_no_change_reply(reply: &str) -> bool {
    let normalized = reply.trim();
    normalized.eq_ignore_ascii_case(NO_CHANGE_SENTINEL)
        || normalized
            .to_ascii_uppercase()
            .starts_with(NO_CHANGE_SENTINEL)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(n: u8) -> CameraFrame {
        CameraFrame::new(ImagePayload {
            bytes: vec![n; 16],
            width: 4,
            height: 4,
        })
    }

    #[test]
    fn slot_keeps_only_the_newest_frame() {
        let slot = FrameSlot::new();
        slot.ingest(frame(1));
        slot.ingest(frame(2));
        slot.ingest(frame(3));

        assert_eq!(slot.depth(), 1);
        let taken = slot.take().expect("one frame pending");
        assert_eq!(taken.image.bytes[0], 3);
        assert_eq!(slot.take().map(|f| f.image.bytes[0]), None);
        assert_eq!(slot.ingested(), 3);
        assert_eq!(slot.superseded(), 2);
    }

    #[test]
    fn scene_state_reports_distinctness() {
        let mut scene = SceneState::default();
        assert!(scene.commit("a hallway", Instant::now()));
        assert!(!scene.commit("a hallway", Instant::now()));
        assert!(scene.commit("a hallway with a person", Instant::now()));
    }

    #[test]
    fn sentinel_matching_is_forgiving() {
        assert!(is_no_change_reply("NO_CHANGE"));
        assert!(is_no_change_reply("  no_change  "));
        assert!(is_no_change_reply("NO_CHANGE."));
        assert!(!is_no_change_reply("a new person entered"));
        assert!(!is_no_change_reply(""));
    }
}
