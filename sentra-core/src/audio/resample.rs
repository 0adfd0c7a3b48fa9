//! Sample-rate conversion for the acoustic analysis path.
//!
//! Microphones capture at whatever rate the device prefers (48 kHz is the
//! common case); the feature extractor works at a fixed 16 kHz. The
//! conversion runs on the detector thread where allocation is fine, never in
//! the capture callback. When the rates already match no rubato session is
//! created and `process` hands the input straight back.

use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use tracing::error;

use crate::error::{Result, SentraError};

/// Converts mono f32 audio between two fixed sample rates.
pub struct RateConverter {
    /// `None` in passthrough mode (rates already match).
    resampler: Option<FastFixedIn<f32>>,
    /// Carries partial input between calls until a full block is available.
    pending: Vec<f32>,
    /// Input frames rubato consumes per process call.
    block: usize,
    /// Reused output buffer, `[1][output_frames_max]`.
    out_buf: Vec<Vec<f32>>,
}

impl RateConverter {
    /// # Errors
    /// `SentraError::AudioDevice` when rubato rejects the configuration.
    pub fn new(capture_rate: u32, target_rate: u32, block: usize) -> Result<Self> {
        if capture_rate == 0 || target_rate == 0 {
            return Err(SentraError::AudioDevice(format!(
                "invalid sample rate: {capture_rate} Hz -> {target_rate} Hz"
            )));
        }
        if capture_rate == target_rate {
            return Ok(Self {
                resampler: None,
                pending: Vec::new(),
                block,
                out_buf: Vec::new(),
            });
        }

        let ratio = target_rate as f64 / capture_rate as f64;
        let resampler = FastFixedIn::<f32>::new(ratio, 1.0, PolynomialDegree::Cubic, block, 1)
            .map_err(|e| SentraError::AudioDevice(format!("resampler init: {e}")))?;
        let max_out = resampler.output_frames_max();

        tracing::info!(capture_rate, target_rate, block, "resampling enabled");

        Ok(Self {
            resampler: Some(resampler),
            pending: Vec::new(),
            block,
            out_buf: vec![vec![0f32; max_out]],
        })
    }

    /// Feed captured samples, returning whatever full blocks convert to.
    /// Output may be empty while input accumulates toward a full block.
    pub fn process(&mut self, samples: &[f32]) -> Vec<f32> {
        let Some(ref mut resampler) = self.resampler else {
            return samples.to_vec();
        };

        self.pending.extend_from_slice(samples);
        let mut result = Vec::new();
        while self.pending.len() >= self.block {
            match resampler.process_into_buffer(&[&self.pending[..self.block]], &mut self.out_buf, None)
            {
                Ok((_consumed, produced)) => result.extend_from_slice(&self.out_buf[0][..produced]),
                Err(e) => error!("resampler process error: {e}"),
            }
            self.pending.drain(..self.block);
        }
        result
    }

    pub fn is_passthrough(&self) -> bool {
        self.resampler.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matching_rates_pass_through_unchanged() {
        let mut rc = RateConverter::new(16_000, 16_000, 960).unwrap();
        assert!(rc.is_passthrough());
        let samples: Vec<f32> = (0..480).map(|i| i as f32 * 0.001).collect();
        assert_eq!(rc.process(&samples), samples);
    }

    #[test]
    fn downsampling_48k_to_16k_yields_a_third_the_frames() {
        let mut rc = RateConverter::new(48_000, 16_000, 960).unwrap();
        assert!(!rc.is_passthrough());
        let out = rc.process(&vec![0.0f32; 960]);
        assert!(!out.is_empty());
        assert!(
            (out.len() as isize - 320).unsigned_abs() <= 10,
            "output len={} expected≈320",
            out.len()
        );
    }

    #[test]
    fn zero_rates_are_rejected() {
        assert!(RateConverter::new(0, 16_000, 960).is_err());
        assert!(RateConverter::new(48_000, 0, 960).is_err());
    }

    #[test]
    fn partial_blocks_accumulate_across_calls() {
        let mut rc = RateConverter::new(48_000, 16_000, 960).unwrap();
        assert!(rc.process(&vec![0.0f32; 500]).is_empty());
        assert!(!rc.process(&vec![0.0f32; 500]).is_empty());
    }
}
