//! Lock-free SPSC ring buffer between the audio callback and the capture thread.
//!
//! Uses `ringbuf::HeapRb<f32>`, whose `push_slice` is wait-free and safe to
//! call from the real-time audio callback.

use ringbuf::{traits::Split, HeapRb};

pub use ringbuf::traits::{Consumer, Producer};

/// Producer half, held by the audio callback.
pub type CaptureProducer = ringbuf::HeapProd<f32>;

/// Consumer half, drained by the capture thread.
pub type CaptureConsumer = ringbuf::HeapCons<f32>;

/// 2^20 = 1 048 576 samples ≈ 21.8 s at 48 kHz. The capture thread drains
/// every few milliseconds, so this only has to absorb scheduling stalls.
pub const RING_CAPACITY: usize = 1 << 20;

/// Create a matched producer/consumer pair backed by a heap-allocated ring.
pub fn create_capture_ring() -> (CaptureProducer, CaptureConsumer) {
    HeapRb::<f32>::new(RING_CAPACITY).split()
}
