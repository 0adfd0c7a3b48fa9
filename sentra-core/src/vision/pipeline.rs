//! Blocking vision tick loop.
//!
//! ## Per-tick decision
//!
//! ```text
//! 1. Enforce the 500 ms processing floor
//! 2. Full analysis due (≥ 3 s since last full pass)?      → describe scene
//! 3. Else change detection due (≥ 1.5 s, prior scene)?    → compare scenes
//! 4. Else idle
//! ```
//!
//! Full analysis takes precedence when both intervals have elapsed. A tick
//! with no pending frame is a no-op; a failed tick is logged and swallowed;
//! the next frame simply supersedes it. The loop runs in `spawn_blocking`,
//! keeping the async executor free.

use std::sync::{
    atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    Arc,
};
use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::events::{SceneEvent, SceneEventKind};
use crate::session::{InferenceSessionCoordinator, PerceptionRequest, STILL_PROCESSING_TEXT};
use crate::speech::SpeechOutput;
use crate::vision::{is_no_change_reply, CameraFrame, FrameSlot, SceneState, VisionConfig};

pub struct VisionDiagnostics {
    pub full_passes: AtomicUsize,
    pub change_passes: AtomicUsize,
    pub committed: AtomicUsize,
    pub sentinel_replies: AtomicUsize,
    pub errors: AtomicUsize,
}

impl Default for VisionDiagnostics {
    fn default() -> Self {
        Self {
            full_passes: AtomicUsize::new(0),
            change_passes: AtomicUsize::new(0),
            committed: AtomicUsize::new(0),
            sentinel_replies: AtomicUsize::new(0),
            errors: AtomicUsize::new(0),
        }
    }
}

impl VisionDiagnostics {
    pub fn snapshot(&self) -> VisionSnapshot {
        VisionSnapshot {
            full_passes: self.full_passes.load(Ordering::Relaxed),
            change_passes: self.change_passes.load(Ordering::Relaxed),
            committed: self.committed.load(Ordering::Relaxed),
            sentinel_replies: self.sentinel_replies.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct VisionSnapshot {
    pub full_passes: usize,
    pub change_passes: usize,
    pub committed: usize,
    pub sentinel_replies: usize,
    pub errors: usize,
}

/// All context the vision loop needs, passed as one struct.
pub struct VisionContext {
    pub config: VisionConfig,
    pub slot: FrameSlot,
    pub coordinator: Arc<InferenceSessionCoordinator>,
    pub speaker: Arc<dyn SpeechOutput>,
    pub running: Arc<AtomicBool>,
    pub scene_tx: broadcast::Sender<SceneEvent>,
    pub seq: Arc<AtomicU64>,
    pub diagnostics: Arc<VisionDiagnostics>,
}

/// Sleep when there is nothing to do this tick.
const IDLE_SLEEP: Duration = Duration::from_millis(10);

enum TickMode {
    FullAnalysis,
    ChangeDetection,
}

/// Run the blocking vision loop until `ctx.running` becomes false.
pub fn run(ctx: VisionContext) {
    info!("vision pipeline started");

    let mut scene = SceneState::default();
    let mut last_processed_at: Option<Instant> = None;
    let mut last_full_at: Option<Instant> = None;

    loop {
        if !ctx.running.load(Ordering::Relaxed) {
            break;
        }

        let now = Instant::now();

        // ── Rate floor: never hit the coordinator faster than this ───────
        let floor_blocked = last_processed_at
            .map(|t| now.duration_since(t) < ctx.config.min_process_interval)
            .unwrap_or(false);
        if floor_blocked {
            std::thread::sleep(IDLE_SLEEP);
            continue;
        }

        // ── Mode decision: full analysis outranks change detection ───────
        let full_due = last_full_at
            .map(|t| now.duration_since(t) >= ctx.config.full_analysis_interval)
            .unwrap_or(true);
        let change_due = scene.last_description.is_some()
            && last_processed_at
                .map(|t| now.duration_since(t) >= ctx.config.change_detection_interval)
                .unwrap_or(true);

        let mode = if full_due {
            TickMode::FullAnalysis
        } else if change_due {
            TickMode::ChangeDetection
        } else {
            std::thread::sleep(IDLE_SLEEP);
            continue;
        };

        // ── Take the newest pending frame (older ones were superseded) ───
        let Some(frame) = ctx.slot.take() else {
            std::thread::sleep(IDLE_SLEEP);
            continue;
        };

        last_processed_at = Some(now);
        match mode {
            TickMode::FullAnalysis => {
                last_full_at = Some(now);
                ctx.diagnostics.full_passes.fetch_add(1, Ordering::Relaxed);
                full_analysis(&ctx, &mut scene, frame);
            }
            TickMode::ChangeDetection => {
                ctx.diagnostics
                    .change_passes
                    .fetch_add(1, Ordering::Relaxed);
                change_detection(&ctx, &mut scene, frame);
            }
        }
    }

    let snap = ctx.diagnostics.snapshot();
    info!(
        full_passes = snap.full_passes,
        change_passes = snap.change_passes,
        committed = snap.committed,
        sentinel_replies = snap.sentinel_replies,
        errors = snap.errors,
        frames_ingested = ctx.slot.ingested(),
        frames_superseded = ctx.slot.superseded(),
        "vision pipeline stopped"
    );
}

fn full_analysis(ctx: &VisionContext, scene: &mut SceneState, frame: CameraFrame) {
    let request = PerceptionRequest::video_frame(ctx.config.describe_prompt.clone(), frame.image);
    match ctx.coordinator.submit(request) {
        Ok(text) => {
            if is_no_change_reply(&text) {
                // An engine may answer the sentinel even to a describe
                // prompt; it is never a description.
                ctx.diagnostics
                    .sentinel_replies
                    .fetch_add(1, Ordering::Relaxed);
            } else if is_usable_description(&text) {
                commit(ctx, scene, &text, frame.captured_at, SceneEventKind::Full);
            } else {
                debug!("full analysis produced no usable description");
            }
        }
        Err(e) => {
            // A dropped pass never stalls the pipeline.
            ctx.diagnostics.errors.fetch_add(1, Ordering::Relaxed);
            warn!(error = %e, "full analysis failed, continuing");
        }
    }
}

fn change_detection(ctx: &VisionContext, scene: &mut SceneState, frame: CameraFrame) {
    let previous = scene
        .last_description
        .clone()
        .unwrap_or_default();
    let prompt = format!("{} {previous}", ctx.config.change_prompt);
    let request = PerceptionRequest::video_frame(prompt, frame.image);

    match ctx.coordinator.submit(request) {
        Ok(reply) => {
            if is_no_change_reply(&reply) {
                ctx.diagnostics
                    .sentinel_replies
                    .fetch_add(1, Ordering::Relaxed);
                debug!("no scene change");
            } else if is_usable_description(&reply) {
                commit(ctx, scene, &reply, frame.captured_at, SceneEventKind::Change);
            }
        }
        Err(e) => {
            ctx.diagnostics.errors.fetch_add(1, Ordering::Relaxed);
            warn!(error = %e, "change detection failed, continuing");
        }
    }
}

/// Commit a description to SceneState; surface it downstream only when it
/// genuinely differs from the previous one.
fn commit(
    ctx: &VisionContext,
    scene: &mut SceneState,
    description: &str,
    captured_at: Instant,
    kind: SceneEventKind,
) {
    let distinct = scene.commit(description, captured_at);
    if !distinct {
        debug!("description unchanged, not surfacing");
        return;
    }

    ctx.diagnostics.committed.fetch_add(1, Ordering::Relaxed);
    let seq = ctx.seq.fetch_add(1, Ordering::Relaxed);
    let event = SceneEvent {
        seq,
        description: description.to_string(),
        kind,
        timestamp: chrono::Utc::now(),
    };
    let _ = ctx.scene_tx.send(event);
    ctx.speaker.speak(description);
    info!(seq, kind = ?kind, chars = description.len(), "scene description committed");
}

/// The timeout placeholder and empty replies are not scene descriptions.
fn is_usable_description(text: &str) -> bool {
    let trimmed = text.trim();
    !trimmed.is_empty() && trimmed != STILL_PROCESSING_TEXT
}
