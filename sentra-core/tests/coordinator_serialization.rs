//! The single-session invariant, observed from outside the crate: no two
//! inference executions may ever overlap, and a slow engine can never hold a
//! caller past its deadline.

use std::io::Write;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;
use parking_lot::Mutex;

use sentra_core::buffering::chunk::PcmChunk;
use sentra_core::inference::{GenerationEvent, ImagePayload};
use sentra_core::runtime::{HostMemory, HostProbe};
use sentra_core::session::STILL_PROCESSING_TEXT;
use sentra_core::{
    EngineHandle, EngineOptions, InferenceSessionCoordinator, ModelRuntimeManager, MultimodalEngine,
    PerceptionRequest, RuntimeConfig,
};

struct PlentyProbe;

impl HostProbe for PlentyProbe {
    fn memory(&self) -> Option<HostMemory> {
        Some(HostMemory {
            total_mb: 16_384,
            available_mb: 12_288,
        })
    }
    fn emulated_environment(&self) -> Option<String> {
        None
    }
}

/// Records an (enter, exit) wall-clock window for every execution.
struct InstrumentedEngine {
    windows: Arc<Mutex<Vec<(Instant, Instant)>>>,
    work: Duration,
    /// When true, generate never pushes a terminal event and the sink is
    /// held open, forcing callers onto the deadline path.
    stall: bool,
    held_sinks: Vec<Sender<GenerationEvent>>,
}

impl MultimodalEngine for InstrumentedEngine {
    fn load(&mut self, _options: &EngineOptions) -> sentra_core::error::Result<()> {
        Ok(())
    }
    fn new_session(&mut self) -> sentra_core::error::Result<()> {
        Ok(())
    }
    fn attach_text(&mut self, _prompt: &str) -> sentra_core::error::Result<()> {
        Ok(())
    }
    fn attach_image(&mut self, _image: &ImagePayload) -> sentra_core::error::Result<()> {
        Ok(())
    }
    fn attach_audio(&mut self, _audio: &PcmChunk) -> sentra_core::error::Result<()> {
        Ok(())
    }
    fn generate(&mut self, sink: Sender<GenerationEvent>) -> sentra_core::error::Result<()> {
        let entered = Instant::now();
        thread::sleep(self.work);
        if self.stall {
            self.held_sinks.push(sink);
        } else {
            let _ = sink.send(GenerationEvent::Chunk("ok".into()));
            let _ = sink.send(GenerationEvent::Done);
        }
        self.windows.lock().push((entered, Instant::now()));
        Ok(())
    }
    fn unload(&mut self) {}
}

fn ready_coordinator(
    windows: Arc<Mutex<Vec<(Instant, Instant)>>>,
    work: Duration,
    stall: bool,
) -> (Arc<InferenceSessionCoordinator>, tempfile::NamedTempFile) {
    let mut model = tempfile::NamedTempFile::new().unwrap();
    model.write_all(&[0u8; 1024]).unwrap();

    let engine = EngineHandle::new(InstrumentedEngine {
        windows,
        work,
        stall,
        held_sinks: Vec::new(),
    });
    let runtime = Arc::new(ModelRuntimeManager::new(
        RuntimeConfig::for_model(model.path().to_path_buf()),
        engine,
        Arc::new(PlentyProbe),
    ));
    runtime.initialize().unwrap();
    (
        Arc::new(InferenceSessionCoordinator::new(runtime)),
        model,
    )
}

#[test]
fn concurrent_submissions_never_overlap_in_the_engine() {
    let windows = Arc::new(Mutex::new(Vec::new()));
    let (coordinator, _model) =
        ready_coordinator(Arc::clone(&windows), Duration::from_millis(25), false);

    let mut handles = Vec::new();
    for i in 0..8 {
        let coordinator = Arc::clone(&coordinator);
        handles.push(thread::spawn(move || {
            coordinator
                .submit(PerceptionRequest::text(format!("request {i}")))
                .unwrap()
        }));
    }
    for handle in handles {
        assert_eq!(handle.join().unwrap(), "ok");
    }

    let mut recorded = windows.lock().clone();
    assert_eq!(recorded.len(), 8);
    recorded.sort_by_key(|(entered, _)| *entered);
    for pair in recorded.windows(2) {
        let (_, exited) = pair[0];
        let (entered, _) = pair[1];
        assert!(
            exited <= entered,
            "two inference executions overlapped by {:?}",
            exited - entered
        );
    }
}

#[test]
fn a_stalled_engine_cannot_hold_a_caller_past_its_deadline() {
    let windows = Arc::new(Mutex::new(Vec::new()));
    let (coordinator, _model) =
        ready_coordinator(Arc::clone(&windows), Duration::ZERO, true);

    let started = Instant::now();
    let text = coordinator
        .submit(PerceptionRequest::text("anything").with_timeout(Duration::from_millis(100)))
        .unwrap();
    let elapsed = started.elapsed();

    assert_eq!(text, STILL_PROCESSING_TEXT);
    assert!(elapsed >= Duration::from_millis(100));
    assert!(
        elapsed < Duration::from_secs(2),
        "deadline overshot: {elapsed:?}"
    );
}

#[test]
fn queued_callers_run_in_some_serial_order_with_bounded_total_time() {
    let windows = Arc::new(Mutex::new(Vec::new()));
    let (coordinator, _model) =
        ready_coordinator(Arc::clone(&windows), Duration::from_millis(10), false);

    let started = Instant::now();
    let mut handles = Vec::new();
    for _ in 0..4 {
        let coordinator = Arc::clone(&coordinator);
        handles.push(thread::spawn(move || {
            coordinator
                .submit(PerceptionRequest::text("queued"))
                .unwrap();
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    // Four requests at ~10 ms of engine work each: the queue drains in
    // roughly serial time, nowhere near any per-request timeout.
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(windows.lock().len(), 4);
}
