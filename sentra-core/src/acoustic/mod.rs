//! Acoustic event detection.
//!
//! Microphone samples are windowed into ~1 s analysis chunks, reduced to
//! [`features::AcousticFeatures`], and matched against the heuristic rule
//! table in [`classify`]. Alerts below the confidence floor are dropped, and
//! a per-category cooldown keeps a continuing alarm from re-alerting every
//! window. The blocking loop that feeds this from the mic ring lives in
//! [`detector`].

pub mod classify;
pub mod detector;
pub mod features;

use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::debug;

use crate::acoustic::classify::{classify_features, default_rules, ClassifierRule};
use crate::acoustic::features::AcousticFeatures;
use crate::buffering::chunk::PcmChunk;
use crate::events::{SoundAlert, SoundCategory};

#[derive(Debug, Clone)]
pub struct AcousticConfig {
    /// Analysis sample rate; capture audio is resampled to this.
    pub sample_rate: u32,
    /// Length of one analysis window in seconds.
    pub window_secs: f32,
    /// Alerts scored below this are discarded.
    pub min_confidence: f32,
    /// Suppress repeat alerts of the same category within this span.
    pub repeat_cooldown: Duration,
}

impl Default for AcousticConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            window_secs: 1.0,
            min_confidence: 0.6,
            repeat_cooldown: Duration::from_secs(10),
        }
    }
}

impl AcousticConfig {
    /// Samples per analysis window.
    pub fn window_samples(&self) -> usize {
        ((self.sample_rate as f32 * self.window_secs) as usize).max(1)
    }
}

/// Stateful classifier over successive analysis windows.
pub struct AcousticEventDetector {
    config: AcousticConfig,
    rules: Vec<ClassifierRule>,
    /// Last emission time per category, for cooldown suppression.
    last_emitted: Vec<(SoundCategory, Instant)>,
}

impl AcousticEventDetector {
    pub fn new(config: AcousticConfig) -> Self {
        Self {
            config,
            rules: default_rules(),
            last_emitted: Vec::new(),
        }
    }

    pub fn config(&self) -> &AcousticConfig {
        &self.config
    }

    /// Classify one analysis window. `None` when nothing matched, the match
    /// fell below the confidence floor, or the category is cooling down.
    pub fn classify(&mut self, chunk: &PcmChunk) -> Option<SoundAlert> {
        if chunk.is_empty() {
            return None;
        }
        let features = AcousticFeatures::extract(&chunk.samples, chunk.sample_rate);
        let rule = classify_features(&self.rules, &features)?;
        let (category, confidence, severity) = (rule.category, rule.confidence, rule.severity);

        if confidence < self.config.min_confidence {
            debug!(
                category = %category,
                confidence = confidence,
                floor = self.config.min_confidence,
                "match below confidence floor"
            );
            return None;
        }
        if self.cooling_down(category) {
            debug!(category = %category, "repeat alert suppressed by cooldown");
            return None;
        }

        self.record_emission(category);
        Some(SoundAlert {
            category,
            confidence,
            severity,
            timestamp: Utc::now(),
        })
    }

    fn cooling_down(&self, category: SoundCategory) -> bool {
        self.last_emitted
            .iter()
            .find(|(c, _)| *c == category)
            .map(|(_, at)| at.elapsed() < self.config.repeat_cooldown)
            .unwrap_or(false)
    }

    fn record_emission(&mut self, category: SoundCategory) {
        let now = Instant::now();
        if let Some(entry) = self.last_emitted.iter_mut().find(|(c, _)| *c == category) {
            entry.1 = now;
        } else {
            self.last_emitted.push((category, now));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: u32 = 16_000;

    fn sine(freq: f32, amplitude: f32, secs: f32) -> Vec<f32> {
        let n = (SR as f32 * secs) as usize;
        (0..n)
            .map(|i| amplitude * (2.0 * std::f32::consts::PI * freq * i as f32 / SR as f32).sin())
            .collect()
    }

    fn fire_alarm_window() -> PcmChunk {
        // 3.2 kHz beeps at 0.15 s on / 0.15 s off, four bursts per second.
        let mut samples = Vec::new();
        for _ in 0..4 {
            samples.extend(sine(3_200.0, 0.5, 0.15));
            samples.extend(std::iter::repeat(0.0).take((SR as f32 * 0.15) as usize));
        }
        PcmChunk::new(samples, SR)
    }

    fn horn_window() -> PcmChunk {
        PcmChunk::new(sine(440.0, 0.4, 1.0), SR)
    }

    #[test]
    fn detects_a_fire_alarm_window() {
        let mut detector = AcousticEventDetector::new(AcousticConfig::default());
        let alert = detector.classify(&fire_alarm_window()).expect("alert");
        assert_eq!(alert.category, SoundCategory::FireAlarm);
        assert_eq!(alert.severity, crate::events::Severity::Emergency);
        assert!(alert.confidence >= 0.6);
    }

    #[test]
    fn confidence_floor_discards_matches() {
        let mut detector = AcousticEventDetector::new(AcousticConfig {
            min_confidence: 0.95,
            ..Default::default()
        });
        assert!(detector.classify(&fire_alarm_window()).is_none());
    }

    #[test]
    fn repeat_category_is_suppressed_within_cooldown() {
        let mut detector = AcousticEventDetector::new(AcousticConfig::default());
        assert!(detector.classify(&fire_alarm_window()).is_some());
        assert!(detector.classify(&fire_alarm_window()).is_none());
    }

    #[test]
    fn cooldown_is_per_category() {
        let mut detector = AcousticEventDetector::new(AcousticConfig::default());
        assert!(detector.classify(&fire_alarm_window()).is_some());
        // A different category alerts even while the first cools down.
        let alert = detector.classify(&horn_window()).expect("horn alert");
        assert_eq!(alert.category, SoundCategory::CarHorn);
    }

    #[test]
    fn expired_cooldown_allows_the_category_again() {
        let mut detector = AcousticEventDetector::new(AcousticConfig {
            repeat_cooldown: Duration::from_millis(10),
            ..Default::default()
        });
        assert!(detector.classify(&fire_alarm_window()).is_some());
        std::thread::sleep(Duration::from_millis(20));
        assert!(detector.classify(&fire_alarm_window()).is_some());
    }

    #[test]
    fn empty_window_is_ignored() {
        let mut detector = AcousticEventDetector::new(AcousticConfig::default());
        assert!(detector.classify(&PcmChunk::new(Vec::new(), SR)).is_none());
    }
}
