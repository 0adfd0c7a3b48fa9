//! Typed PCM block passed from the ring buffer to feature extraction and
//! audio-modality inference requests.

/// A contiguous block of mono PCM samples at a known sample rate.
///
/// Allocated once per detector iteration (on the non-RT detector thread).
#[derive(Debug, Clone)]
pub struct PcmChunk {
    /// Mono f32 samples in [-1.0, 1.0].
    pub samples: Vec<f32>,
    /// Sample rate in Hz (16 000 after resampling).
    pub sample_rate: u32,
}

impl PcmChunk {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Duration of this chunk in seconds.
    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}
