//! Callback-driven engine adapter.
//!
//! `output` decodes PCM into a lock-free sample ring; the engine's own thread
//! pulls from the ring in its render callback, applies the port's gains and
//! pads with silence when the ring runs dry.
//!
//! Back-pressure: when the ring is full, `output` sleeps in short steps for at
//! most four blocks of playback time, then drops whatever whole frames are
//! still unwritten and counts them in [`PortStats::frames_dropped`].
//!
//! Volume: channel gains are applied per channel in the render callback, and
//! the master gain from global volume control multiplies all of them.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

pub mod cpal_engine;
pub mod native;

pub use cpal_engine::{CpalContext, CpalStream};
pub use native::{CallbackContext, CallbackStream, ErrorCallback, RenderCallback};

use crate::backend::{
    output_wait_limit, whole_frames, AudioOutBackend, PortBackend, PortCounters, PortStats,
    BACKPRESSURE_POLL,
};
use crate::buffer::{shared_sample_ring, SharedSampleRing};
use crate::gain::StreamGain;
use crate::platform::PlatformGuard;
use crate::registry::{EngineTag, StreamId, StreamRegistry, VolumeTarget};
use hostaudio_core::{BackendKind, ChannelVolumes, Error, PortDescriptor, Result};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Blocks of audio the ring can hold ahead of the engine.
const RING_BLOCKS: usize = 4;

type ContextFactory = Box<dyn Fn() -> Result<Arc<dyn CallbackContext>> + Send + Sync>;

impl VolumeTarget for StreamGain {
    fn set_master_gain(&self, gain: f32) {
        self.set_master(gain);
    }
}

/// Audio out backend for a callback-driven engine.
pub struct CallbackAudioOut {
    /// Created on first `open`, then shared by every port. Ports hold their
    /// own reference, so it outlives them even if the backend drops first.
    context: OnceCell<Arc<dyn CallbackContext>>,
    make_context: ContextFactory,
    registry: Arc<StreamRegistry>,
    /// Declared last so platform teardown runs after the context is dropped.
    _platform: PlatformGuard,
}

impl CallbackAudioOut {
    /// Backend on the default cpal host, registering with the global registry.
    pub fn new() -> Result<Self> {
        Self::with_context_factory(StreamRegistry::global(), || {
            Ok(Arc::new(CpalContext::new()?) as Arc<dyn CallbackContext>)
        })
    }

    /// Backend whose shared context comes from `make_context`.
    pub fn with_context_factory<F>(registry: Arc<StreamRegistry>, make_context: F) -> Result<Self>
    where
        F: Fn() -> Result<Arc<dyn CallbackContext>> + Send + Sync + 'static,
    {
        let platform = PlatformGuard::acquire()?;
        Ok(Self {
            context: OnceCell::new(),
            make_context: Box::new(make_context),
            registry,
            _platform: platform,
        })
    }

    fn context(&self) -> Result<Arc<dyn CallbackContext>> {
        self.context
            .get_or_try_init(|| {
                let context = (self.make_context)()?;
                info!("Callback engine context created: {}", context.name());
                Ok(context)
            })
            .map(Arc::clone)
    }
}

impl AudioOutBackend for CallbackAudioOut {
    fn open(&self, descriptor: &PortDescriptor) -> Result<Box<dyn PortBackend>> {
        descriptor.validate()?;
        let context = self.context()?;

        let channels = usize::from(descriptor.channels);
        let ring = shared_sample_ring(descriptor.buffer_samples() * RING_BLOCKS);
        let gain = Arc::new(StreamGain::new());
        let counters = Arc::new(PortCounters::default());
        let fault = Arc::new(Mutex::new(None));

        let render = render_callback(
            Arc::clone(&ring),
            Arc::clone(&gain),
            Arc::clone(&counters),
            channels,
        );
        let on_error: ErrorCallback = {
            let fault = Arc::clone(&fault);
            Box::new(move |message: String| {
                error!("Callback stream error: {message}");
                *fault.lock() = Some(message);
            })
        };

        let mut stream = context.open_stream(descriptor, render, on_error)?;
        stream.start()?;

        let target: Arc<dyn VolumeTarget> = gain.clone();
        let id = self.registry.register(EngineTag::Callback, &target);

        info!(
            "Opened callback port on {}: {} channels, {:?}, {}Hz, {} frames",
            context.name(),
            descriptor.channels,
            descriptor.format,
            descriptor.sample_rate,
            descriptor.buffer_frames
        );

        Ok(Box::new(CallbackPort {
            descriptor: *descriptor,
            stream: Mutex::new(stream),
            ring,
            scratch: Mutex::new(Vec::with_capacity(descriptor.buffer_samples())),
            gain,
            counters,
            fault,
            registry: Arc::clone(&self.registry),
            id,
            _context: context,
        }))
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Callback
    }
}

/// Pulls queued frames for the engine, pads underruns with silence, applies gain.
fn render_callback(
    ring: SharedSampleRing,
    gain: Arc<StreamGain>,
    counters: Arc<PortCounters>,
    channels: usize,
) -> RenderCallback {
    Box::new(move |out: &mut [f32]| {
        let filled = ring.pop_into(out);
        if filled < out.len() {
            out[filled..].fill(0.0);
            if counters.has_written() {
                counters.add_underrun();
            }
        }
        gain.apply(out, channels);
    })
}

/// A port on the callback engine.
pub struct CallbackPort {
    descriptor: PortDescriptor,
    stream: Mutex<Box<dyn CallbackStream>>,
    ring: SharedSampleRing,
    /// Decode buffer; its lock also serializes concurrent `output` callers.
    scratch: Mutex<Vec<f32>>,
    gain: Arc<StreamGain>,
    counters: Arc<PortCounters>,
    /// Last asynchronous stream error, reported by the next `output`.
    fault: Arc<Mutex<Option<String>>>,
    registry: Arc<StreamRegistry>,
    id: StreamId,
    _context: Arc<dyn CallbackContext>,
}

impl PortBackend for CallbackPort {
    fn output(&self, pcm: &[u8]) -> Result<()> {
        if let Some(message) = self.fault.lock().take() {
            return Err(Error::Output(message));
        }

        let frames = whole_frames(&self.descriptor, pcm)?;
        if frames == 0 {
            return Ok(());
        }

        let channels = usize::from(self.descriptor.channels);
        let mut scratch = self.scratch.lock();
        scratch.clear();
        self.descriptor.format.decode_into(pcm, &mut scratch);

        let deadline = Instant::now() + output_wait_limit(&self.descriptor);
        let mut written = 0;
        loop {
            written += self.ring.push_frames(&scratch[written..], channels);
            if written == scratch.len() {
                break;
            }
            if Instant::now() >= deadline {
                let dropped = (scratch.len() - written) / channels;
                warn!("Callback engine not draining, dropped {dropped} of {frames} frames");
                self.counters.add_dropped(dropped);
                break;
            }
            std::thread::sleep(BACKPRESSURE_POLL);
        }

        self.counters.add_written(written / channels);
        Ok(())
    }

    fn set_volume(&self, volumes: &ChannelVolumes) {
        self.gain.set_channels(volumes);
        debug!("Callback port channel volumes set to {:?}", volumes.as_array());
    }

    fn descriptor(&self) -> &PortDescriptor {
        &self.descriptor
    }

    fn engine(&self) -> BackendKind {
        BackendKind::Callback
    }

    fn stats(&self) -> PortStats {
        self.counters.snapshot()
    }
}

impl Drop for CallbackPort {
    fn drop(&mut self) {
        self.registry.release(self.id);
        self.stream.get_mut().stop();
        info!("Closed callback port ({:?})", self.counters.snapshot());
    }
}
