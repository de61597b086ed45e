//! Lock-free sample ring between an `Output` caller and an engine callback.
//!
//! One producer (the port's `Output`) and one consumer (the engine's render
//! callback). Slots hold `f32` bit patterns in atomics so neither side needs
//! `unsafe` or a lock; the positions carry the release/acquire ordering.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

/// Single-producer, single-consumer ring of interleaved `f32` samples.
pub struct SampleRing {
    slots: Box<[AtomicU32]>,
    /// Total samples ever consumed.
    head: AtomicUsize,
    /// Total samples ever produced.
    tail: AtomicUsize,
    /// Power of two.
    capacity: usize,
    mask: usize,
}

impl SampleRing {
    /// Create a ring holding at least `capacity` samples (rounded up to a power of 2).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1).next_power_of_two();
        let slots = (0..capacity).map(|_| AtomicU32::new(0)).collect();

        Self {
            slots,
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
            capacity,
            mask: capacity - 1,
        }
    }

    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Samples waiting to be consumed.
    pub fn len(&self) -> usize {
        let tail = self.tail.load(Ordering::Acquire);
        let head = self.head.load(Ordering::Acquire);
        tail.wrapping_sub(head)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Free slots for the producer.
    pub fn free(&self) -> usize {
        self.capacity - self.len()
    }

    /// Push as many whole frames of `samples` as fit.
    ///
    /// Returns the number of samples written, always a multiple of `channels`,
    /// so the consumer never sees half a frame. Producer side only.
    pub fn push_frames(&self, samples: &[f32], channels: usize) -> usize {
        let channels = channels.max(1);
        let tail = self.tail.load(Ordering::Relaxed);
        let head = self.head.load(Ordering::Acquire);

        let space = self.capacity - tail.wrapping_sub(head);
        let fit = samples.len().min(space);
        let count = fit - fit % channels;

        for (offset, &sample) in samples[..count].iter().enumerate() {
            self.slots[tail.wrapping_add(offset) & self.mask]
                .store(sample.to_bits(), Ordering::Relaxed);
        }

        self.tail.store(tail.wrapping_add(count), Ordering::Release);
        count
    }

    /// Pop up to `out.len()` samples. Consumer side only.
    ///
    /// Returns the number of samples copied; the rest of `out` is untouched.
    pub fn pop_into(&self, out: &mut [f32]) -> usize {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Acquire);

        let count = out.len().min(tail.wrapping_sub(head));
        for (offset, sample) in out[..count].iter_mut().enumerate() {
            let slot = &self.slots[head.wrapping_add(offset) & self.mask];
            *sample = f32::from_bits(slot.load(Ordering::Relaxed));
        }

        self.head.store(head.wrapping_add(count), Ordering::Release);
        count
    }
}

/// Thread-safe reference to a sample ring.
pub type SharedSampleRing = Arc<SampleRing>;

/// Create a new shared sample ring.
pub fn shared_sample_ring(capacity: usize) -> SharedSampleRing {
    Arc::new(SampleRing::new(capacity))
}
