//! Seam between the callback adapter and a callback-driven native engine.

use hostaudio_core::{PortDescriptor, Result};

/// Fills an engine-sized buffer of interleaved `f32` samples. Runs on the engine's thread.
pub type RenderCallback = Box<dyn FnMut(&mut [f32]) + Send + 'static>;

/// Receives asynchronous stream errors from the engine's thread.
pub type ErrorCallback = Box<dyn FnMut(String) + Send + 'static>;

/// Shared native context. Created once per backend and read-only afterwards.
pub trait CallbackContext: Send + Sync {
    /// Human-readable device or context name, for logs.
    fn name(&self) -> &str;

    /// Open a stream shaped like `descriptor` that pulls audio from `render`.
    ///
    /// The stream is created stopped.
    fn open_stream(
        &self,
        descriptor: &PortDescriptor,
        render: RenderCallback,
        on_error: ErrorCallback,
    ) -> Result<Box<dyn CallbackStream>>;
}

/// One native stream opened from a [`CallbackContext`].
pub trait CallbackStream: Send {
    fn start(&mut self) -> Result<()>;

    /// Stop and release the native stream. Once this returns the render
    /// callback will not run again. Idempotent.
    fn stop(&mut self);
}
