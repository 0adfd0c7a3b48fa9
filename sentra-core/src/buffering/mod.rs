//! Lock-free SPSC ring buffer for microphone samples.
//!
//! Uses `ringbuf::HeapRb<f32>` whose wait-free `push_slice` is safe to call
//! from the real-time audio callback. The acoustic detector loop drains the
//! consumer half at its own pace.

pub mod chunk;

use ringbuf::{traits::Split, HeapRb};

pub use ringbuf::traits::{Consumer, Producer};

/// Type alias for the producer half, held by the audio callback thread.
pub type MicProducer = ringbuf::HeapProd<f32>;

/// Type alias for the consumer half, held by the detector thread.
pub type MicConsumer = ringbuf::HeapCons<f32>;

/// Buffer capacity: 2^20 = 1 048 576 f32 samples ≈ 65 s at 16 kHz.
/// Generous enough that a long inference pass on the vision path never
/// causes the microphone callback to drop samples.
pub const RING_CAPACITY: usize = 1 << 20;

/// Create a matched producer/consumer pair backed by a heap-allocated ring buffer.
pub fn create_mic_ring() -> (MicProducer, MicConsumer) {
    HeapRb::<f32>::new(RING_CAPACITY).split()
}
