//! Event types broadcast to downstream consumers.
//!
//! Every pipeline publishes through a `tokio::sync::broadcast` channel so an
//! app shell, accessibility overlay, or test harness can subscribe without
//! coupling to pipeline internals. All types serialize with camelCase field
//! names for JSON consumers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Scene events
// ---------------------------------------------------------------------------

/// Emitted when the vision pipeline commits a new scene description.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneEvent {
    /// Monotonically increasing event sequence number.
    pub seq: u64,
    /// The committed description text.
    pub description: String,
    /// Whether this came from a full analysis pass or change detection.
    pub kind: SceneEventKind,
    /// Wall-clock time the description was committed.
    pub timestamp: DateTime<Utc>,
}

/// Which vision mode produced a description.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SceneEventKind {
    /// Periodic full scene description.
    Full,
    /// A confirmed difference against the previous description.
    Change,
}

// ---------------------------------------------------------------------------
// Sound alerts
// ---------------------------------------------------------------------------

/// A confidence-scored acoustic event classification.
///
/// Immutable once emitted. The orchestrator consumes Emergency-tier alerts;
/// everything above the detector's confidence floor also reaches subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SoundAlert {
    pub category: SoundCategory,
    /// Classifier confidence in [0.0, 1.0].
    pub confidence: f32,
    pub severity: Severity,
    pub timestamp: DateTime<Utc>,
}

/// Heuristically recognised sound categories, ordered by evaluation priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SoundCategory {
    FireAlarm,
    Siren,
    GlassBreak,
    Scream,
    CarHorn,
    Doorbell,
    Knock,
    DogBark,
}

impl std::fmt::Display for SoundCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SoundCategory::FireAlarm => "fire alarm",
            SoundCategory::Siren => "siren",
            SoundCategory::GlassBreak => "breaking glass",
            SoundCategory::Scream => "scream",
            SoundCategory::CarHorn => "car horn",
            SoundCategory::Doorbell => "doorbell",
            SoundCategory::Knock => "knocking",
            SoundCategory::DogBark => "dog barking",
        };
        f.write_str(name)
    }
}

/// Coarse urgency ranking driving alerting and emergency response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Emergency,
}

// ---------------------------------------------------------------------------
// Emergency campaign events
// ---------------------------------------------------------------------------

/// Progress report for one step of an outbound-call campaign.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignEvent {
    /// Index of the target within the campaign's ordered list.
    pub target_index: usize,
    /// Human label for the target ("Maria", "Emergency services").
    pub label: String,
    /// Dialed number.
    pub number: String,
    pub stage: CampaignStage,
    pub outcome: CallOutcome,
    pub timestamp: DateTime<Utc>,
}

/// Which phase of the campaign a call belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CampaignStage {
    /// One of the designated personal contacts.
    Contact,
    /// The region-resolved emergency services number.
    Services,
}

/// Result of a single call attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind", content = "detail")]
pub enum CallOutcome {
    Placed,
    Failed(String),
    /// The campaign was cancelled before this target was attempted.
    Skipped,
}

// ---------------------------------------------------------------------------
// Engine status events
// ---------------------------------------------------------------------------

/// Emitted when the engine's lifecycle state changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStatusEvent {
    pub status: EngineStatus,
    /// Optional human-readable detail (e.g. failure cause).
    pub detail: Option<String>,
}

/// Lifecycle state of the Sentra engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineStatus {
    /// Engine created but the runtime is not loaded yet.
    Idle,
    /// Model loading in progress.
    Initializing,
    /// Runtime ready, pipelines not started.
    Ready,
    /// Pipelines running, perceiving.
    Perceiving,
    /// Pipelines stopped; engine may be restarted.
    Stopped,
    /// Runtime initialization failed, see detail for the classified cause.
    Error,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scene_event_serializes_with_camel_case_and_lowercase_kind() {
        let event = SceneEvent {
            seq: 4,
            description: "a kitchen with a red kettle".into(),
            kind: SceneEventKind::Change,
            timestamp: Utc::now(),
        };

        let json = serde_json::to_value(&event).expect("serialize scene event");
        assert_eq!(json["seq"], 4);
        assert_eq!(json["description"], "a kitchen with a red kettle");
        assert_eq!(json["kind"], "change");
        assert!(json["timestamp"].is_string());
    }

    #[test]
    fn sound_alert_round_trips_with_kebab_case_category() {
        let alert = SoundAlert {
            category: SoundCategory::FireAlarm,
            confidence: 0.85,
            severity: Severity::Emergency,
            timestamp: Utc::now(),
        };

        let json = serde_json::to_value(&alert).expect("serialize alert");
        assert_eq!(json["category"], "fire-alarm");
        assert_eq!(json["severity"], "emergency");

        let round_trip: SoundAlert = serde_json::from_value(json).expect("deserialize alert");
        assert_eq!(round_trip.category, SoundCategory::FireAlarm);
        assert_eq!(round_trip.severity, Severity::Emergency);
    }

    #[test]
    fn severity_orders_emergency_highest() {
        assert!(Severity::Emergency > Severity::High);
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Medium > Severity::Low);
    }

    #[test]
    fn call_outcome_serializes_failure_detail() {
        let outcome = CallOutcome::Failed("no dialer".into());
        let json = serde_json::to_value(&outcome).expect("serialize outcome");
        assert_eq!(json["kind"], "failed");
        assert_eq!(json["detail"], "no dialer");
    }
}
