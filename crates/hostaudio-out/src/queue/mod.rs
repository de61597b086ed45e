//! Queue-driven engine adapter.
//!
//! Each `output` call decodes its block and pushes it onto the engine's queue;
//! the engine plays queued blocks in order. At most [`MAX_PENDING_BLOCKS`] may
//! wait at once. Past that, `output` waits up to four blocks of playback time
//! for the engine to drain and then drops the whole block.
//!
//! The engine has one gain for the whole stream, so per-channel volumes are
//! reduced to the loudest channel before they reach it.

pub mod native;
pub mod rodio_engine;

pub use native::{NativeGain, QueueDriver, QueueStream};
pub use rodio_engine::{RodioDriver, RodioQueue};

use crate::backend::{
    output_wait_limit, whole_frames, AudioOutBackend, PortBackend, PortCounters, PortStats,
    BACKPRESSURE_POLL,
};
use crate::gain::StreamGain;
use crate::platform::PlatformGuard;
use crate::registry::{EngineTag, StreamId, StreamRegistry, VolumeTarget};
use hostaudio_core::{BackendKind, ChannelVolumes, PortDescriptor, Result};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Blocks the engine may hold before `output` starts waiting.
pub const MAX_PENDING_BLOCKS: usize = 4;

/// Audio out backend for a queue-driven engine.
pub struct QueueAudioOut {
    driver: Arc<dyn QueueDriver>,
    registry: Arc<StreamRegistry>,
    _platform: PlatformGuard,
}

impl QueueAudioOut {
    /// Backend on rodio's default device, registering with the global registry.
    pub fn new() -> Result<Self> {
        Self::with_driver(StreamRegistry::global(), Arc::new(RodioDriver))
    }

    pub fn with_driver(
        registry: Arc<StreamRegistry>,
        driver: Arc<dyn QueueDriver>,
    ) -> Result<Self> {
        let platform = PlatformGuard::acquire()?;
        Ok(Self {
            driver,
            registry,
            _platform: platform,
        })
    }
}

impl AudioOutBackend for QueueAudioOut {
    fn open(&self, descriptor: &PortDescriptor) -> Result<Box<dyn PortBackend>> {
        descriptor.validate()?;

        let stream = self.driver.open(descriptor)?;
        let gain = Arc::new(QueueGain {
            gain: StreamGain::new(),
            native: stream.native_gain(),
            channels: usize::from(descriptor.channels),
            push: Mutex::new(()),
        });
        gain.set_channels(&ChannelVolumes::unity());

        let target: Arc<dyn VolumeTarget> = gain.clone();
        let id = self.registry.register(EngineTag::Queue, &target);

        info!(
            "Opened queue port on {}: {} channels, {:?}, {}Hz, {} frames",
            self.driver.name(),
            descriptor.channels,
            descriptor.format,
            descriptor.sample_rate,
            descriptor.buffer_frames
        );

        Ok(Box::new(QueuePort {
            descriptor: *descriptor,
            stream: Mutex::new(stream),
            gain,
            counters: PortCounters::default(),
            registry: Arc::clone(&self.registry),
            id,
        }))
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Queue
    }
}

/// Channel and master gains, reduced onto the engine's single gain.
struct QueueGain {
    gain: StreamGain,
    native: Arc<dyn NativeGain>,
    channels: usize,
    /// Keeps the stored gains and the value pushed to the engine in step
    /// when `set_volume` and global volume control race.
    push: Mutex<()>,
}

impl QueueGain {
    fn set_channels(&self, volumes: &ChannelVolumes) {
        let _push = self.push.lock();
        self.gain.set_channels(volumes);
        self.native.set_gain(self.gain.peak(self.channels));
    }
}

impl VolumeTarget for QueueGain {
    fn set_master_gain(&self, gain: f32) {
        let _push = self.push.lock();
        self.gain.set_master(gain);
        self.native.set_gain(self.gain.peak(self.channels));
    }
}

/// A port on the queue engine.
pub struct QueuePort {
    descriptor: PortDescriptor,
    /// Also serializes concurrent `output` callers.
    stream: Mutex<Box<dyn QueueStream>>,
    gain: Arc<QueueGain>,
    counters: PortCounters,
    registry: Arc<StreamRegistry>,
    id: StreamId,
}

impl PortBackend for QueuePort {
    fn output(&self, pcm: &[u8]) -> Result<()> {
        let frames = whole_frames(&self.descriptor, pcm)?;
        if frames == 0 {
            return Ok(());
        }

        let format = self.descriptor.format;
        let mut samples = Vec::with_capacity(pcm.len() / format.bytes_per_sample());
        format.decode_into(pcm, &mut samples);

        let mut stream = self.stream.lock();
        let deadline = Instant::now() + output_wait_limit(&self.descriptor);
        loop {
            let pending = stream.pending_blocks();
            if pending < MAX_PENDING_BLOCKS {
                if pending == 0 && self.counters.has_written() {
                    self.counters.add_underrun();
                }
                break;
            }
            if Instant::now() >= deadline {
                warn!("Queue engine holds {pending} blocks, dropped {frames} frames");
                self.counters.add_dropped(frames);
                return Ok(());
            }
            std::thread::sleep(BACKPRESSURE_POLL);
        }

        stream.queue(samples)?;
        self.counters.add_written(frames);
        Ok(())
    }

    fn set_volume(&self, volumes: &ChannelVolumes) {
        self.gain.set_channels(volumes);
        debug!(
            "Queue port channel volumes set to {:?}, engine gain {}",
            volumes.as_array(),
            self.gain.native.gain()
        );
    }

    fn descriptor(&self) -> &PortDescriptor {
        &self.descriptor
    }

    fn engine(&self) -> BackendKind {
        BackendKind::Queue
    }

    fn stats(&self) -> PortStats {
        self.counters.snapshot()
    }
}

impl Drop for QueuePort {
    fn drop(&mut self) {
        self.registry.release(self.id);
        self.stream.get_mut().stop();
        info!("Closed queue port ({:?})", self.counters.snapshot());
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::float_cmp)]

    use super::*;
    use crate::testing::{init_tracing, s16_block, silence, FakeQueueDriver};
    use hostaudio_core::{Error, SampleFormat, VOLUME_0DB};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    fn backend(driver: &Arc<FakeQueueDriver>) -> (QueueAudioOut, Arc<StreamRegistry>) {
        let registry = Arc::new(StreamRegistry::new());
        let backend = QueueAudioOut::with_driver(
            Arc::clone(&registry),
            Arc::clone(driver) as Arc<dyn QueueDriver>,
        )
        .unwrap();
        (backend, registry)
    }

    fn volumes(left: i32, right: i32) -> ChannelVolumes {
        ChannelVolumes::new([left, right, 0, 0, 0, 0, 0, 0])
    }

    #[test]
    fn test_blocks_reach_engine_in_order() {
        let driver = Arc::new(FakeQueueDriver::default());
        let (backend, _registry) = backend(&driver);
        let port = backend.open(&PortDescriptor::stereo_s16(48_000, 2)).unwrap();
        let queue = driver.last_queue();

        port.output(&s16_block(&[16_384, -16_384, 0, 8_192])).unwrap();
        port.output(&s16_block(&[0, 0, 0, 0])).unwrap();

        let blocks = queue.blocks();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0], vec![0.5, -0.5, 0.0, 0.25]);
        assert_eq!(port.stats().frames_written, 4);
    }

    #[test]
    fn test_float_blocks_pass_through() {
        let driver = Arc::new(FakeQueueDriver::default());
        let (backend, _registry) = backend(&driver);
        let desc = PortDescriptor::new(1, SampleFormat::F32, 44_100, 3);
        let port = backend.open(&desc).unwrap();

        let pcm: Vec<u8> = [0.25f32, -1.0, 0.75]
            .iter()
            .flat_map(|s| s.to_le_bytes())
            .collect();
        port.output(&pcm).unwrap();
        assert_eq!(driver.last_queue().blocks()[0], vec![0.25, -1.0, 0.75]);
    }

    #[test]
    fn test_channel_volumes_reduce_to_loudest() {
        let driver = Arc::new(FakeQueueDriver::default());
        let (backend, _registry) = backend(&driver);
        let port = backend.open(&PortDescriptor::stereo_s16(48_000, 480)).unwrap();
        let queue = driver.last_queue();

        assert_eq!(queue.gain(), 1.0);
        port.set_volume(&volumes(VOLUME_0DB / 4, VOLUME_0DB / 2));
        assert_eq!(queue.gain(), 0.5);

        // Channels past the stream's channel count do not count.
        port.set_volume(&ChannelVolumes::new([0, 0, VOLUME_0DB, 0, 0, 0, 0, 0]));
        assert_eq!(queue.gain(), 0.0);
    }

    #[test]
    fn test_master_gain_combines_with_channel_volumes() {
        let driver = Arc::new(FakeQueueDriver::default());
        let (backend, registry) = backend(&driver);
        let port = backend.open(&PortDescriptor::stereo_s16(48_000, 480)).unwrap();
        let queue = driver.last_queue();

        port.set_volume(&volumes(VOLUME_0DB / 2, VOLUME_0DB / 2));
        assert!(registry.adjust_volume(0.5));
        assert_eq!(queue.gain(), 0.25);

        assert!(registry.adjust_volume(3.0));
        assert_eq!(queue.gain(), 0.5);
    }

    #[test]
    fn test_full_queue_drops_whole_block() {
        init_tracing();
        let driver = Arc::new(FakeQueueDriver::default());
        driver.set_auto_drain(false);
        let (backend, _registry) = backend(&driver);
        // 16 frames at 48 kHz: waits are clamped to the 10 ms floor.
        let desc = PortDescriptor::stereo_s16(48_000, 16);
        let port = backend.open(&desc).unwrap();
        let queue = driver.last_queue();

        for _ in 0..MAX_PENDING_BLOCKS {
            port.output(&silence(&desc)).unwrap();
        }
        let started = Instant::now();
        port.output(&silence(&desc)).unwrap();
        assert!(started.elapsed() >= Duration::from_millis(10));

        assert_eq!(queue.blocks().len(), MAX_PENDING_BLOCKS);
        let stats = port.stats();
        assert_eq!(stats.frames_written, 16 * MAX_PENDING_BLOCKS as u64);
        assert_eq!(stats.frames_dropped, 16);

        // Once the engine drains, output is accepted again.
        queue.drain();
        port.output(&silence(&desc)).unwrap();
        assert_eq!(queue.blocks().len(), MAX_PENDING_BLOCKS + 1);
        assert_eq!(port.stats().underruns, 1);
    }

    #[test]
    fn test_invalid_descriptor_never_opens() {
        let driver = Arc::new(FakeQueueDriver::default());
        let (backend, registry) = backend(&driver);

        let bad = PortDescriptor::new(2, SampleFormat::S16, 0, 480);
        assert!(matches!(
            backend.open(&bad).err().unwrap(),
            Error::InvalidDescriptor(_)
        ));
        assert_eq!(driver.opened(), 0);
        assert_eq!(registry.current_engine(), EngineTag::None);
    }

    #[test]
    fn test_driver_failure_is_surfaced() {
        let driver = Arc::new(FakeQueueDriver::default());
        driver.fail_next_open(Error::DeviceUnavailable("no output device".into()));
        let (backend, registry) = backend(&driver);

        let err = backend
            .open(&PortDescriptor::stereo_s16(48_000, 480))
            .err()
            .unwrap();
        assert!(err.is_device_unavailable());
        assert_eq!(registry.current_engine(), EngineTag::None);
    }

    #[test]
    fn test_drop_stops_queue_and_clears_registry() {
        let driver = Arc::new(FakeQueueDriver::default());
        let (backend, registry) = backend(&driver);
        let port = backend.open(&PortDescriptor::stereo_s16(48_000, 480)).unwrap();
        let queue = driver.last_queue();
        assert_eq!(registry.current_engine(), EngineTag::Queue);
        assert_eq!(port.engine(), BackendKind::Queue);

        drop(port);
        assert!(queue.is_stopped());
        assert_eq!(registry.current_engine(), EngineTag::None);

        assert!(!registry.adjust_volume(0.1));
        assert_eq!(queue.gain(), 1.0);
    }

    #[test]
    fn test_open_then_output_silence() {
        let driver = Arc::new(FakeQueueDriver::default());
        let (backend, _registry) = backend(&driver);

        for channels in 1..=8u16 {
            for format in [SampleFormat::S16, SampleFormat::F32] {
                let desc = PortDescriptor::new(channels, format, 44_100, 256);
                let port = backend.open(&desc).unwrap();
                port.output(&silence(&desc)).unwrap();

                assert_eq!(port.stats().frames_written, 256);
                let blocks = driver.last_queue().blocks();
                assert_eq!(blocks.len(), 1);
                assert_eq!(blocks[0].len(), 256 * usize::from(channels));
                assert!(blocks[0].iter().all(|&s| s == 0.0));
            }
        }
    }

    #[test]
    fn test_set_volume_is_idempotent() {
        let driver = Arc::new(FakeQueueDriver::default());
        let (backend, _registry) = backend(&driver);
        let port = backend.open(&PortDescriptor::stereo_s16(48_000, 480)).unwrap();
        let queue = driver.last_queue();

        let vector = volumes(50, 50);
        port.set_volume(&vector);
        let once = queue.gain().to_bits();
        port.set_volume(&vector);
        assert_eq!(queue.gain().to_bits(), once);
        assert_eq!(queue.gain(), 50.0 / 32_768.0);
    }

    #[test]
    fn test_volume_changes_race_output_and_close() {
        let driver = Arc::new(FakeQueueDriver::default());
        let (backend, registry) = backend(&driver);
        let desc = PortDescriptor::stereo_s16(48_000, 64);
        let port: Arc<Box<dyn PortBackend>> = Arc::new(backend.open(&desc).unwrap());
        let queue = driver.last_queue();

        let closed = Arc::new(AtomicBool::new(false));
        let adjusts_after_close = Arc::new(AtomicUsize::new(0));

        let writer = {
            let port = Arc::clone(&port);
            thread::spawn(move || {
                for _ in 0..200 {
                    port.output(&silence(&desc)).unwrap();
                }
            })
        };
        let mixer = {
            let port = Arc::clone(&port);
            thread::spawn(move || {
                for i in 0..200 {
                    port.set_volume(&volumes(i * 100, VOLUME_0DB - i * 100));
                }
            })
        };
        let adjuster = {
            let registry = Arc::clone(&registry);
            let closed = Arc::clone(&closed);
            let after = Arc::clone(&adjusts_after_close);
            thread::spawn(move || {
                let mut step = 0u32;
                loop {
                    registry.adjust_volume((step % 100) as f32 / 100.0);
                    step += 1;
                    if closed.load(Ordering::SeqCst)
                        && after.fetch_add(1, Ordering::SeqCst) >= 100
                    {
                        break;
                    }
                }
            })
        };

        writer.join().unwrap();
        mixer.join().unwrap();

        let port = Arc::try_unwrap(port).ok().unwrap();
        assert_eq!(port.stats().frames_written, 200 * 64);
        drop(port);

        // Nothing reaches the engine gain once the port has closed.
        let gain_at_close = queue.gain().to_bits();
        closed.store(true, Ordering::SeqCst);
        adjuster.join().unwrap();

        assert!(adjusts_after_close.load(Ordering::SeqCst) > 100);
        assert!(queue.is_stopped());
        assert_eq!(registry.current_engine(), EngineTag::None);
        assert_eq!(queue.gain().to_bits(), gain_at_close);
    }
}
