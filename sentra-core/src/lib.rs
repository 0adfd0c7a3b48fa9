//! # sentra-core
//!
//! Reusable assistive-perception engine SDK.
//!
//! ## Architecture
//!
//! ```text
//! Camera frames → FrameSlot (keep latest) → Vision loop (spawn_blocking)
//!                                                 │
//! Microphone → MicCapture → SPSC RingBuffer → Detector loop (spawn_blocking)
//!                                                 │
//!          InferenceSessionCoordinator ◄──────────┤ SoundAlert / SceneEvent
//!                     │                           │
//!         ModelRuntimeManager (one engine,   EmergencyResponseOrchestrator
//!          one session, one readiness gate)  (contacts → services campaign)
//! ```
//!
//! The audio callback is zero-alloc. All heap work happens on the blocking
//! pipeline threads; consumers subscribe to broadcast channels.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod acoustic;
pub mod audio;
pub mod buffering;
pub mod emergency;
pub mod engine;
pub mod error;
pub mod events;
pub mod inference;
pub mod runtime;
pub mod session;
pub mod speech;
pub mod vision;

// Convenience re-exports for downstream crates
pub use engine::{SentraConfig, SentraEngine};
pub use error::SentraError;
pub use events::{
    CallOutcome, CampaignEvent, CampaignStage, EngineStatus, EngineStatusEvent, SceneEvent,
    SceneEventKind, Severity, SoundAlert, SoundCategory,
};
pub use inference::{EngineHandle, EngineOptions, MultimodalEngine};
pub use runtime::{ModelRuntimeManager, RuntimeConfig};
pub use session::{InferenceSessionCoordinator, PerceptionRequest};
