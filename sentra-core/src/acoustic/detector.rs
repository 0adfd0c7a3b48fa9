//! Blocking acoustic detection loop.
//!
//! ## Stages (per iteration)
//!
//! ```text
//! 1. Drain ring buffer → Vec<f32> (one chunk per iteration)
//! 2. Resample to the analysis rate (passthrough when rates match)
//! 3. Accumulate samples into fixed-length analysis windows
//! 4. Classify each full window against the rule table
//! 5. Broadcast SoundAlert; announce audible categories
//! 6. Hand emergency-tier alerts to the response orchestrator
//! ```
//!
//! The loop runs inside `spawn_blocking` so the async executor only ever
//! sees the broadcast channels.

use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::{
    acoustic::AcousticEventDetector,
    audio::resample::RateConverter,
    buffering::{chunk::PcmChunk, Consumer, MicConsumer},
    emergency::EmergencyResponseOrchestrator,
    events::{Severity, SoundAlert},
    speech::SpeechOutput,
};

pub struct DetectorDiagnostics {
    pub samples_in: AtomicUsize,
    pub windows: AtomicUsize,
    pub alerts: AtomicUsize,
    pub campaigns_started: AtomicUsize,
}

impl Default for DetectorDiagnostics {
    fn default() -> Self {
        Self {
            samples_in: AtomicUsize::new(0),
            windows: AtomicUsize::new(0),
            alerts: AtomicUsize::new(0),
            campaigns_started: AtomicUsize::new(0),
        }
    }
}

impl DetectorDiagnostics {
    pub fn snapshot(&self) -> DetectorSnapshot {
        DetectorSnapshot {
            samples_in: self.samples_in.load(Ordering::Relaxed),
            windows: self.windows.load(Ordering::Relaxed),
            alerts: self.alerts.load(Ordering::Relaxed),
            campaigns_started: self.campaigns_started.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DetectorSnapshot {
    pub samples_in: usize,
    pub windows: usize,
    pub alerts: usize,
    pub campaigns_started: usize,
}

/// All context the detector loop needs, passed as one struct.
pub struct DetectorContext {
    pub detector: AcousticEventDetector,
    pub consumer: MicConsumer,
    pub running: Arc<AtomicBool>,
    pub alert_tx: broadcast::Sender<SoundAlert>,
    pub orchestrator: Option<Arc<EmergencyResponseOrchestrator>>,
    pub speaker: Arc<dyn SpeechOutput>,
    pub capture_sample_rate: u32,
    pub diagnostics: Arc<DetectorDiagnostics>,
}

/// Chunk size drained from the ring per iteration: 20 ms at 48 kHz.
const DRAIN_CHUNK: usize = 960;

/// Sleep when the ring is empty, to avoid burning a core.
const SLEEP_EMPTY_MS: u64 = 5;

/// Run the blocking detector loop until `ctx.running` becomes false.
pub fn run(mut ctx: DetectorContext) {
    info!("acoustic detector started");

    let analysis_rate = ctx.detector.config().sample_rate;
    let mut resampler =
        match RateConverter::new(ctx.capture_sample_rate, analysis_rate, DRAIN_CHUNK) {
            Ok(r) => r,
            Err(e) => {
                warn!("failed to create resampler: {e}");
                // The loop never ran; clear the shared flag so the rest of
                // the engine observes the stop instead of a live claim.
                ctx.running.store(false, Ordering::SeqCst);
                return;
            }
        };

    let window_samples = ctx.detector.config().window_samples();
    let mut raw = vec![0f32; DRAIN_CHUNK];
    let mut window_buf: Vec<f32> = Vec::with_capacity(window_samples * 2);

    loop {
        if !ctx.running.load(Ordering::Relaxed) {
            break;
        }

        let n = ctx.consumer.pop_slice(&mut raw);
        if n == 0 {
            std::thread::sleep(std::time::Duration::from_millis(SLEEP_EMPTY_MS));
            continue;
        }
        ctx.diagnostics.samples_in.fetch_add(n, Ordering::Relaxed);

        let resampled = resampler.process(&raw[..n]);
        if resampled.is_empty() {
            continue;
        }
        window_buf.extend_from_slice(&resampled);

        while window_buf.len() >= window_samples {
            let window: Vec<f32> = window_buf.drain(..window_samples).collect();
            ctx.diagnostics.windows.fetch_add(1, Ordering::Relaxed);
            let chunk = PcmChunk::new(window, analysis_rate);

            if let Some(alert) = ctx.detector.classify(&chunk) {
                emit_alert(&mut ctx, alert);
            } else {
                debug!(samples = window_samples, "window classified as ambient");
            }
        }
    }

    let snap = ctx.diagnostics.snapshot();
    info!(
        samples_in = snap.samples_in,
        windows = snap.windows,
        alerts = snap.alerts,
        campaigns_started = snap.campaigns_started,
        "acoustic detector stopped"
    );
}

fn emit_alert(ctx: &mut DetectorContext, alert: SoundAlert) {
    ctx.diagnostics.alerts.fetch_add(1, Ordering::Relaxed);
    info!(
        category = %alert.category,
        confidence = alert.confidence,
        severity = ?alert.severity,
        "sound alert"
    );

    ctx.speaker.speak(&announcement(&alert));
    let _ = ctx.alert_tx.send(alert.clone());

    if alert.severity >= Severity::Emergency {
        if let Some(ref orchestrator) = ctx.orchestrator {
            if orchestrator.handle_alert(&alert) {
                ctx.diagnostics
                    .campaigns_started
                    .fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

/// Spoken phrasing per severity tier.
fn announcement(alert: &SoundAlert) -> String {
    match alert.severity {
        Severity::Emergency => format!("Emergency: {} detected", alert.category),
        Severity::High => format!("Warning: {} detected", alert.category),
        Severity::Medium | Severity::Low => format!("Notice: {}", alert.category),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::thread;
    use std::time::{Duration, Instant};

    use parking_lot::Mutex;
    use tokio::sync::broadcast::error::TryRecvError;

    use crate::acoustic::AcousticConfig;
    use crate::buffering::{create_mic_ring, Producer};
    use crate::emergency::{CallTarget, CampaignConfig, ContactResolver, RegionInfo, Telephony};
    use crate::error::Result;
    use crate::events::SoundCategory;
    use crate::speech::NullSpeaker;

    const SR: u32 = 16_000;

    struct NoContacts;

    impl ContactResolver for NoContacts {
        fn emergency_contacts(&self) -> Vec<CallTarget> {
            Vec::new()
        }
    }

    struct NoRegion;

    impl RegionInfo for NoRegion {
        fn country_code(&self) -> Option<String> {
            None
        }
    }

    #[derive(Default)]
    struct RecordingTelephony {
        calls: Mutex<Vec<String>>,
    }

    impl Telephony for RecordingTelephony {
        fn place_call(&self, number: &str) -> Result<()> {
            self.calls.lock().push(number.to_string());
            Ok(())
        }
    }

    fn fire_alarm_second() -> Vec<f32> {
        let mut samples = Vec::new();
        for _ in 0..4 {
            let on = (SR as f32 * 0.15) as usize;
            samples.extend((0..on).map(|i| {
                0.5 * (2.0 * std::f32::consts::PI * 3_200.0 * i as f32 / SR as f32).sin()
            }));
            samples.extend(std::iter::repeat(0.0).take((SR as f32 * 0.15) as usize));
        }
        samples
    }

    fn recv_alert_with_timeout(
        rx: &mut broadcast::Receiver<SoundAlert>,
        timeout: Duration,
    ) -> SoundAlert {
        let start = Instant::now();
        loop {
            match rx.try_recv() {
                Ok(alert) => return alert,
                Err(TryRecvError::Empty) => {
                    if start.elapsed() >= timeout {
                        panic!("timed out waiting for sound alert");
                    }
                    thread::sleep(Duration::from_millis(5));
                }
                Err(TryRecvError::Lagged(_)) => continue,
                Err(TryRecvError::Closed) => panic!("alert channel closed unexpectedly"),
            }
        }
    }

    fn wait_for<F: Fn() -> bool>(cond: F, timeout: Duration) {
        let deadline = Instant::now() + timeout;
        while !cond() {
            assert!(Instant::now() < deadline, "condition never became true");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn fire_alarm_audio_alerts_and_starts_a_campaign() {
        let (mut producer, consumer) = create_mic_ring();
        // Two identical alarm seconds; cooldown keeps it to one alert.
        producer.push_slice(&fire_alarm_second());
        producer.push_slice(&fire_alarm_second());

        let telephony = Arc::new(RecordingTelephony::default());
        let orchestrator = Arc::new(EmergencyResponseOrchestrator::new(
            CampaignConfig {
                inter_call_delay: Duration::from_millis(5),
                services_cooldown: Duration::from_millis(5),
                max_contacts: 3,
            },
            Arc::new(NoContacts),
            telephony.clone(),
            Arc::new(NoRegion),
        ));

        let (alert_tx, mut alert_rx) = broadcast::channel(16);
        let running = Arc::new(AtomicBool::new(true));
        let diagnostics = Arc::new(DetectorDiagnostics::default());

        let ctx = DetectorContext {
            detector: AcousticEventDetector::new(AcousticConfig::default()),
            consumer,
            running: Arc::clone(&running),
            alert_tx,
            orchestrator: Some(Arc::clone(&orchestrator)),
            speaker: Arc::new(NullSpeaker),
            capture_sample_rate: SR,
            diagnostics: Arc::clone(&diagnostics),
        };
        let handle = thread::spawn(move || run(ctx));

        let alert = recv_alert_with_timeout(&mut alert_rx, Duration::from_secs(2));
        assert_eq!(alert.category, SoundCategory::FireAlarm);
        assert_eq!(alert.severity, Severity::Emergency);

        wait_for(
            || !telephony.calls.lock().is_empty() && !orchestrator.is_active(),
            Duration::from_secs(2),
        );
        // Give the second window time to classify, then stop.
        wait_for(
            || diagnostics.windows.load(Ordering::Relaxed) >= 2,
            Duration::from_secs(2),
        );
        running.store(false, Ordering::SeqCst);
        handle.join().expect("detector thread panicked");

        // No contacts configured: the campaign dials services directly.
        assert_eq!(*telephony.calls.lock(), vec!["112"]);
        assert_eq!(diagnostics.alerts.load(Ordering::Relaxed), 1);
        assert_eq!(diagnostics.campaigns_started.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn resampler_failure_clears_the_running_flag() {
        let (_producer, consumer) = create_mic_ring();
        let (alert_tx, _alert_rx) = broadcast::channel(16);
        let running = Arc::new(AtomicBool::new(true));

        let ctx = DetectorContext {
            detector: AcousticEventDetector::new(AcousticConfig::default()),
            consumer,
            running: Arc::clone(&running),
            alert_tx,
            orchestrator: None,
            speaker: Arc::new(NullSpeaker),
            // A rate the converter rejects: the loop must not start.
            capture_sample_rate: 0,
            diagnostics: Arc::new(DetectorDiagnostics::default()),
        };
        let handle = thread::spawn(move || run(ctx));
        handle.join().expect("detector thread panicked");

        assert!(!running.load(Ordering::SeqCst));
    }

    #[test]
    fn ambient_audio_emits_no_alerts() {
        let (mut producer, consumer) = create_mic_ring();
        producer.push_slice(&vec![0.002f32; SR as usize]);

        let (alert_tx, mut alert_rx) = broadcast::channel(16);
        let running = Arc::new(AtomicBool::new(true));
        let diagnostics = Arc::new(DetectorDiagnostics::default());

        let ctx = DetectorContext {
            detector: AcousticEventDetector::new(AcousticConfig::default()),
            consumer,
            running: Arc::clone(&running),
            alert_tx,
            orchestrator: None,
            speaker: Arc::new(NullSpeaker),
            capture_sample_rate: SR,
            diagnostics: Arc::clone(&diagnostics),
        };
        let handle = thread::spawn(move || run(ctx));

        wait_for(
            || diagnostics.windows.load(Ordering::Relaxed) >= 1,
            Duration::from_secs(2),
        );
        running.store(false, Ordering::SeqCst);
        handle.join().expect("detector thread panicked");

        assert!(matches!(alert_rx.try_recv(), Err(TryRecvError::Empty)));
        assert_eq!(diagnostics.alerts.load(Ordering::Relaxed), 0);
    }
}
