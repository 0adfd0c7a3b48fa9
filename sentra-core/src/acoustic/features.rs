//! Short-time acoustic feature extraction.
//!
//! Everything the classifier rules consume is computed here, once per
//! analysis window: amplitude statistics, a zero-crossing-rate frequency
//! estimate, and an RMS envelope for temporal pattern checks (periodicity,
//! isolated impacts, dual-tone spacing).

/// Envelope resolution: one RMS value per 50 ms of audio.
pub const ENVELOPE_WINDOW_SECS: f32 = 0.05;

/// Samples below this level do not contribute to the zero-crossing count,
/// so silence between beeps cannot dilute the frequency estimate.
const ZCR_ACTIVE_FLOOR: f32 = 0.01;

/// Features of one analysis window.
#[derive(Debug, Clone)]
pub struct AcousticFeatures {
    /// Root-mean-square amplitude of the whole window.
    pub rms: f32,
    /// Largest absolute sample value.
    pub peak: f32,
    /// Sample variance around the mean.
    pub variance: f32,
    /// Dominant-frequency estimate from the zero-crossing rate, in Hz.
    pub zcr_hz: f32,
    /// Per-50 ms RMS envelope across the window.
    pub envelope: Vec<f32>,
    pub duration_secs: f32,
}

impl AcousticFeatures {
    /// Extract features from mono samples at `sample_rate`.
    pub fn extract(samples: &[f32], sample_rate: u32) -> Self {
        if samples.is_empty() || sample_rate == 0 {
            return Self {
                rms: 0.0,
                peak: 0.0,
                variance: 0.0,
                zcr_hz: 0.0,
                envelope: Vec::new(),
                duration_secs: 0.0,
            };
        }

        let n = samples.len() as f32;
        let mean = samples.iter().sum::<f32>() / n;
        let mut sum_sq = 0.0f32;
        let mut var_acc = 0.0f32;
        let mut peak = 0.0f32;
        let mut crossings = 0usize;
        let mut active_pairs = 0usize;

        for (i, &s) in samples.iter().enumerate() {
            sum_sq += s * s;
            let d = s - mean;
            var_acc += d * d;
            peak = peak.max(s.abs());
            if i > 0 && (s.abs() >= ZCR_ACTIVE_FLOOR || samples[i - 1].abs() >= ZCR_ACTIVE_FLOOR) {
                active_pairs += 1;
                if (s >= 0.0) != (samples[i - 1] >= 0.0) {
                    crossings += 1;
                }
            }
        }

        let duration_secs = n / sample_rate as f32;
        // Each full cycle of a tone produces two zero crossings. Only the
        // active portion counts, so gated signals keep their true pitch.
        let zcr_hz = if active_pairs > 0 {
            crossings as f32 / 2.0 / (active_pairs as f32 / sample_rate as f32)
        } else {
            0.0
        };

        let env_len = (sample_rate as f32 * ENVELOPE_WINDOW_SECS) as usize;
        let envelope = samples
            .chunks(env_len.max(1))
            .map(|w| {
                let sq: f32 = w.iter().map(|s| s * s).sum();
                (sq / w.len() as f32).sqrt()
            })
            .collect();

        Self {
            rms: (sum_sq / n).sqrt(),
            peak,
            variance: var_acc / n,
            zcr_hz,
            envelope,
            duration_secs,
        }
    }

    // ── Temporal pattern checks ──────────────────────────────────────────

    /// Indices where a run of envelope windows rises clearly above the
    /// loudest level seen in this window.
    fn envelope_bursts(&self) -> Vec<usize> {
        let max = self.envelope.iter().cloned().fold(0.0f32, f32::max);
        let threshold = (max * 0.5).max(0.02);
        let mut bursts = Vec::new();
        let mut in_burst = false;
        for (i, &e) in self.envelope.iter().enumerate() {
            if e >= threshold {
                if !in_burst {
                    bursts.push(i);
                    in_burst = true;
                }
            } else {
                in_burst = false;
            }
        }
        bursts
    }

    /// `Some(period_secs)` when at least three envelope bursts repeat at a
    /// near-constant interval, the signature of alarms and sirens.
    pub fn burst_period(&self) -> Option<f32> {
        let bursts = self.envelope_bursts();
        if bursts.len() < 3 {
            return None;
        }
        let gaps: Vec<f32> = bursts
            .windows(2)
            .map(|w| (w[1] - w[0]) as f32 * ENVELOPE_WINDOW_SECS)
            .collect();
        let mean = gaps.iter().sum::<f32>() / gaps.len() as f32;
        if mean <= 0.0 {
            return None;
        }
        let var = gaps.iter().map(|g| (g - mean) * (g - mean)).sum::<f32>() / gaps.len() as f32;
        let spread = var.sqrt() / mean;
        // Gaps within 30 % of each other count as periodic.
        (spread < 0.3).then_some(mean)
    }

    /// A single sharp impact: the loudest envelope window towers over the
    /// rest and the crest factor is high.
    pub fn isolated_peak(&self) -> bool {
        if self.envelope.len() < 3 || self.rms <= 1e-4 {
            return false;
        }
        let max = self.envelope.iter().cloned().fold(0.0f32, f32::max);
        let above = self
            .envelope
            .iter()
            .filter(|&&e| e >= max * 0.5)
            .count();
        let crest = self.peak / self.rms;
        above <= 2 && crest >= 3.0
    }

    /// Exactly two envelope bursts separated by a bell-like gap
    /// (the "ding … dong" signature).
    pub fn dual_tone(&self) -> bool {
        let bursts = self.envelope_bursts();
        if bursts.len() != 2 {
            return false;
        }
        let gap = (bursts[1] - bursts[0]) as f32 * ENVELOPE_WINDOW_SECS;
        (0.15..=0.8).contains(&gap)
    }

    /// Share of envelope windows carrying sustained energy.
    pub fn sustained_ratio(&self) -> f32 {
        if self.envelope.is_empty() {
            return 0.0;
        }
        let threshold = (self.rms * 0.7).max(0.01);
        let active = self.envelope.iter().filter(|&&e| e >= threshold).count();
        active as f32 / self.envelope.len() as f32
    }
}
