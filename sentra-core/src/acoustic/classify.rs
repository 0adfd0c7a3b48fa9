//! Heuristic sound classification rules.
//!
//! Deliberately not a learned classifier: each category is a fixed boolean
//! predicate over [`AcousticFeatures`], so every alert is deterministic and
//! explainable (which thresholds fired). Rules are evaluated in table order
//! and the first match wins, categories are mutually exclusive by
//! construction, with the most dangerous signatures checked first.

use crate::acoustic::features::AcousticFeatures;
use crate::events::{Severity, SoundCategory};

/// One row of the classification table.
pub struct ClassifierRule {
    pub category: SoundCategory,
    /// Fixed confidence emitted when this rule fires.
    pub confidence: f32,
    pub severity: Severity,
    pub matches: fn(&AcousticFeatures) -> bool,
}

/// The default classification table, in evaluation order.
pub fn default_rules() -> Vec<ClassifierRule> {
    vec![
        // Smoke/fire alarms: loud, high-pitched, beeping at a fixed cadence.
        ClassifierRule {
            category: SoundCategory::FireAlarm,
            confidence: 0.85,
            severity: Severity::Emergency,
            matches: |f| {
                f.rms >= 0.12
                    && (2_000.0..=4_800.0).contains(&f.zcr_hz)
                    && f.burst_period()
                        .map(|p| (0.3..=1.5).contains(&p))
                        .unwrap_or(false)
            },
        },
        // Sirens: loud mid-band wail repeating on a slower cycle.
        ClassifierRule {
            category: SoundCategory::Siren,
            confidence: 0.80,
            severity: Severity::Emergency,
            matches: |f| {
                f.rms >= 0.10
                    && (500.0..=2_000.0).contains(&f.zcr_hz)
                    && f.burst_period()
                        .map(|p| (0.2..=3.0).contains(&p))
                        .unwrap_or(false)
            },
        },
        // Screams: very loud, mid-to-high band, sustained through the window.
        ClassifierRule {
            category: SoundCategory::Scream,
            confidence: 0.70,
            severity: Severity::Emergency,
            matches: |f| {
                f.rms >= 0.20
                    && (900.0..=3_200.0).contains(&f.zcr_hz)
                    && f.sustained_ratio() >= 0.6
            },
        },
        // Breaking glass: one sharp, bright impact.
        ClassifierRule {
            category: SoundCategory::GlassBreak,
            confidence: 0.75,
            severity: Severity::High,
            matches: |f| f.isolated_peak() && f.zcr_hz >= 2_500.0 && f.peak >= 0.4,
        },
        // Car horns: loud, low-band, one sustained blast.
        ClassifierRule {
            category: SoundCategory::CarHorn,
            confidence: 0.70,
            severity: Severity::High,
            matches: |f| {
                f.rms >= 0.15
                    && (250.0..=900.0).contains(&f.zcr_hz)
                    && f.sustained_ratio() >= 0.5
                    && f.burst_period().is_none()
            },
        },
        // Doorbells: two-tone chime with the characteristic gap.
        ClassifierRule {
            category: SoundCategory::Doorbell,
            confidence: 0.72,
            severity: Severity::Medium,
            matches: |f| f.dual_tone() && (400.0..=2_200.0).contains(&f.zcr_hz) && f.rms >= 0.05,
        },
        // Knocking: dull repeated low-frequency thuds.
        ClassifierRule {
            category: SoundCategory::Knock,
            confidence: 0.65,
            severity: Severity::Medium,
            matches: |f| {
                f.zcr_hz < 400.0
                    && f.peak >= 0.2
                    && f.burst_period()
                        .map(|p| (0.2..=1.0).contains(&p))
                        .unwrap_or(false)
            },
        },
        // Barking: repeated mid-band yaps, quieter than the danger sounds.
        ClassifierRule {
            category: SoundCategory::DogBark,
            confidence: 0.62,
            severity: Severity::Low,
            matches: |f| {
                f.rms >= 0.06
                    && (400.0..=1_500.0).contains(&f.zcr_hz)
                    && f.burst_period()
                        .map(|p| (0.2..=1.8).contains(&p))
                        .unwrap_or(false)
            },
        },
    ]
}

/// Evaluate the table in order; first match wins.
pub fn classify_features<'a>(
    rules: &'a [ClassifierRule],
    features: &AcousticFeatures,
) -> Option<&'a ClassifierRule> {
    rules.iter().find(|rule| (rule.matches)(features))
}
