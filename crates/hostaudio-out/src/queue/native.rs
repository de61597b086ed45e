//! Seam between the queue adapter and a queue-based native engine.

use hostaudio_core::{PortDescriptor, Result};
use std::sync::Arc;

/// The single gain a queue engine applies to its whole stream.
pub trait NativeGain: Send + Sync {
    fn set_gain(&self, gain: f32);
    fn gain(&self) -> f32;
}

/// One native stream accepting pushed blocks of interleaved `f32` samples.
pub trait QueueStream: Send {
    /// Hand a block to the engine. Playback starts as soon as anything is queued.
    fn queue(&mut self, samples: Vec<f32>) -> Result<()>;

    /// Blocks queued but not yet fully played.
    fn pending_blocks(&self) -> usize;

    fn native_gain(&self) -> Arc<dyn NativeGain>;

    /// Stop playback and release the native stream. Idempotent.
    fn stop(&mut self);
}

/// Opens queue streams; owns whatever engine setup they share.
pub trait QueueDriver: Send + Sync {
    fn name(&self) -> &str;

    fn open(&self, descriptor: &PortDescriptor) -> Result<Box<dyn QueueStream>>;
}
