//! Microphone capture via cpal.
//!
//! The cpal input callback runs on a high-priority OS audio thread and must
//! not allocate, block, or perform I/O. Mono f32 input therefore goes
//! straight into the lock-free ring producer; other layouts are downmixed
//! into a callback-owned scratch buffer that is sized once and reused.
//!
//! `cpal::Stream` is `!Send` on Windows and macOS, so [`MicCapture`] must be
//! created and dropped on the same OS thread. The engine does both inside
//! one `spawn_blocking` task.

pub mod resample;

#[cfg(feature = "audio-cpal")]
use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    SampleFormat, SampleRate, Stream, StreamConfig,
};

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use tracing::{error, info, warn};

use crate::buffering::{MicProducer, Producer};
use crate::error::{Result, SentraError};

/// Handle to an active microphone stream. Not `Send`.
pub struct MicCapture {
    /// Kept alive so cpal does not tear the stream down.
    #[cfg(feature = "audio-cpal")]
    _stream: Stream,
    running: Arc<AtomicBool>,
    /// Capture rate actually reported by the device, in Hz.
    pub sample_rate: u32,
}

/// Average interleaved frames down to mono into `scratch`.
#[cfg(feature = "audio-cpal")]
fn downmix(scratch: &mut Vec<f32>, data: &[f32], channels: usize) {
    let frames = data.len() / channels;
    scratch.resize(frames, 0.0);
    for (frame, out) in scratch.iter_mut().enumerate() {
        let base = frame * channels;
        *out = data[base..base + channels].iter().sum::<f32>() / channels as f32;
    }
}

#[cfg(feature = "audio-cpal")]
impl MicCapture {
    /// Open the default input device and push mono f32 frames into `producer`.
    ///
    /// Call from the thread that will also drop the returned value.
    ///
    /// # Errors
    /// `SentraError::NoDefaultInputDevice` when no microphone exists,
    /// `SentraError::AudioStream` when cpal fails to build or start the stream.
    pub fn open_default(mut producer: MicProducer, running: Arc<AtomicBool>) -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or(SentraError::NoDefaultInputDevice)?;

        info!(
            device = device.name().unwrap_or_default().as_str(),
            "opening input device"
        );

        let supported = device
            .default_input_config()
            .map_err(|e| SentraError::AudioDevice(e.to_string()))?;
        let sample_rate = supported.sample_rate().0;
        let channels = supported.channels();
        info!(sample_rate, channels, "capture config selected");

        let config = StreamConfig {
            channels,
            sample_rate: SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let running_f32 = Arc::clone(&running);
        let running_i16 = Arc::clone(&running);

        let stream = match supported.sample_format() {
            SampleFormat::F32 => {
                let ch = channels as usize;
                let mut scratch: Vec<f32> = Vec::new();
                device.build_input_stream(
                    &config,
                    move |data: &[f32], _info| {
                        if !running_f32.load(Ordering::Relaxed) {
                            return;
                        }
                        let written = if ch == 1 {
                            producer.push_slice(data)
                        } else {
                            downmix(&mut scratch, data, ch);
                            producer.push_slice(&scratch)
                        };
                        let expected = data.len() / ch;
                        if written < expected {
                            warn!("ring buffer full: dropped {} frames", expected - written);
                        }
                    },
                    |err| error!("audio stream error: {err}"),
                    None,
                )
            }

            SampleFormat::I16 => {
                let ch = channels as usize;
                let mut convert: Vec<f32> = Vec::new();
                let mut scratch: Vec<f32> = Vec::new();
                device.build_input_stream(
                    &config,
                    move |data: &[i16], _info| {
                        if !running_i16.load(Ordering::Relaxed) {
                            return;
                        }
                        convert.resize(data.len(), 0.0);
                        for (out, s) in convert.iter_mut().zip(data) {
                            *out = *s as f32 / 32_768.0;
                        }
                        let written = if ch == 1 {
                            producer.push_slice(&convert)
                        } else {
                            downmix(&mut scratch, &convert, ch);
                            producer.push_slice(&scratch)
                        };
                        let expected = data.len() / ch;
                        if written < expected {
                            warn!("ring buffer full: dropped {} frames", expected - written);
                        }
                    },
                    |err| error!("audio stream error: {err}"),
                    None,
                )
            }

            fmt => {
                return Err(SentraError::AudioStream(format!(
                    "unsupported sample format: {fmt:?}"
                )))
            }
        }
        .map_err(|e| SentraError::AudioStream(e.to_string()))?;

        stream
            .play()
            .map_err(|e| SentraError::AudioStream(e.to_string()))?;

        Ok(Self {
            _stream: stream,
            running,
            sample_rate,
        })
    }
}

/// Stub when built without the `audio-cpal` feature.
#[cfg(not(feature = "audio-cpal"))]
impl MicCapture {
    pub fn open_default(_producer: MicProducer, running: Arc<AtomicBool>) -> Result<Self> {
        let _ = running;
        Err(SentraError::AudioStream(
            "compiled without audio-cpal feature".into(),
        ))
    }
}

impl MicCapture {
    /// Signal the callback to no-op from its next invocation on.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }
}
