//! Lock-free buffers for real-time audio.

pub mod ring;

pub use ring::{shared_sample_ring, SampleRing, SharedSampleRing};
