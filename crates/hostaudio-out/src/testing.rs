//! In-process stand-ins for the native engines.

#![allow(clippy::unwrap_used)]

use crate::callback::{CallbackContext, CallbackStream, ErrorCallback, RenderCallback};
use crate::queue::{NativeGain, QueueDriver, QueueStream};
use hostaudio_core::{Error, PortDescriptor, Result};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Route logs to the test harness; `RUST_LOG` picks the level.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Interleaved S16 samples as little-endian bytes.
pub fn s16_block(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// One buffer's worth of zero bytes.
pub fn silence(descriptor: &PortDescriptor) -> Vec<u8> {
    vec![0; descriptor.buffer_bytes()]
}

/// Callback context whose streams are pulled by hand.
#[derive(Default)]
pub struct FakeContext {
    streams: Mutex<Vec<Arc<FakeStream>>>,
    fail_next: Mutex<Option<Error>>,
}

impl FakeContext {
    pub fn fail_next_open(&self, err: Error) {
        *self.fail_next.lock() = Some(err);
    }

    pub fn streams(&self) -> Vec<Arc<FakeStream>> {
        self.streams.lock().clone()
    }

    pub fn last_stream(&self) -> Arc<FakeStream> {
        self.streams.lock().last().cloned().unwrap()
    }
}

impl CallbackContext for FakeContext {
    fn name(&self) -> &str {
        "fake"
    }

    fn open_stream(
        &self,
        descriptor: &PortDescriptor,
        render: RenderCallback,
        on_error: ErrorCallback,
    ) -> Result<Box<dyn CallbackStream>> {
        if let Some(err) = self.fail_next.lock().take() {
            return Err(err);
        }
        let stream = Arc::new(FakeStream {
            channels: usize::from(descriptor.channels),
            render: Mutex::new(render),
            on_error: Mutex::new(on_error),
            running: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        });
        self.streams.lock().push(Arc::clone(&stream));
        Ok(Box::new(FakeStreamHandle(stream)))
    }
}

/// Engine side of a fake callback stream.
pub struct FakeStream {
    channels: usize,
    render: Mutex<RenderCallback>,
    on_error: Mutex<ErrorCallback>,
    running: AtomicBool,
    stopped: AtomicBool,
}

impl FakeStream {
    /// Run one render callback for `frames` frames. A stream that is not
    /// running renders nothing.
    pub fn pull(&self, frames: usize) -> Vec<f32> {
        let mut out = vec![0.0; frames * self.channels];
        if self.is_running() {
            let mut render = self.render.lock();
            (*render)(&mut out);
        }
        out
    }

    pub fn raise_error(&self, message: &str) {
        let mut on_error = self.on_error.lock();
        (*on_error)(message.to_string());
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

struct FakeStreamHandle(Arc<FakeStream>);

impl CallbackStream for FakeStreamHandle {
    fn start(&mut self) -> Result<()> {
        self.0.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&mut self) {
        self.0.running.store(false, Ordering::SeqCst);
        self.0.stopped.store(true, Ordering::SeqCst);
    }
}

/// Queue driver that records every block instead of playing it.
pub struct FakeQueueDriver {
    queues: Mutex<Vec<Arc<FakeQueue>>>,
    auto_drain: AtomicBool,
    fail_next: Mutex<Option<Error>>,
}

impl Default for FakeQueueDriver {
    fn default() -> Self {
        Self {
            queues: Mutex::new(Vec::new()),
            auto_drain: AtomicBool::new(true),
            fail_next: Mutex::new(None),
        }
    }
}

impl FakeQueueDriver {
    /// Whether queues opened from now on play blocks the moment they arrive.
    pub fn set_auto_drain(&self, on: bool) {
        self.auto_drain.store(on, Ordering::SeqCst);
    }

    pub fn fail_next_open(&self, err: Error) {
        *self.fail_next.lock() = Some(err);
    }

    pub fn opened(&self) -> usize {
        self.queues.lock().len()
    }

    pub fn last_queue(&self) -> Arc<FakeQueue> {
        self.queues.lock().last().cloned().unwrap()
    }
}

impl QueueDriver for FakeQueueDriver {
    fn name(&self) -> &str {
        "fake"
    }

    fn open(&self, _descriptor: &PortDescriptor) -> Result<Box<dyn QueueStream>> {
        if let Some(err) = self.fail_next.lock().take() {
            return Err(err);
        }
        let queue = Arc::new(FakeQueue {
            blocks: Mutex::new(Vec::new()),
            played: AtomicUsize::new(0),
            auto_drain: self.auto_drain.load(Ordering::SeqCst),
            gain: AtomicU32::new(1.0f32.to_bits()),
            stopped: AtomicBool::new(false),
        });
        self.queues.lock().push(Arc::clone(&queue));
        Ok(Box::new(FakeQueueHandle(queue)))
    }
}

/// Engine side of a fake queue stream.
pub struct FakeQueue {
    blocks: Mutex<Vec<Vec<f32>>>,
    played: AtomicUsize,
    auto_drain: bool,
    gain: AtomicU32,
    stopped: AtomicBool,
}

impl FakeQueue {
    pub fn blocks(&self) -> Vec<Vec<f32>> {
        self.blocks.lock().clone()
    }

    /// Mark everything queued so far as played.
    pub fn drain(&self) {
        self.played.store(self.blocks.lock().len(), Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl NativeGain for FakeQueue {
    fn set_gain(&self, gain: f32) {
        self.gain.store(gain.to_bits(), Ordering::SeqCst);
    }

    fn gain(&self) -> f32 {
        f32::from_bits(self.gain.load(Ordering::SeqCst))
    }
}

struct FakeQueueHandle(Arc<FakeQueue>);

impl QueueStream for FakeQueueHandle {
    fn queue(&mut self, samples: Vec<f32>) -> Result<()> {
        if self.0.is_stopped() {
            return Err(Error::Output("queue is stopped".to_string()));
        }
        self.0.blocks.lock().push(samples);
        if self.0.auto_drain {
            self.0.drain();
        }
        Ok(())
    }

    fn pending_blocks(&self) -> usize {
        self.0.blocks.lock().len() - self.0.played.load(Ordering::SeqCst)
    }

    fn native_gain(&self) -> Arc<dyn NativeGain> {
        self.0.clone()
    }

    fn stop(&mut self) {
        self.0.stopped.store(true, Ordering::SeqCst);
    }
}
