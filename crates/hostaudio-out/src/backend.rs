//! Audio output backend abstraction.
//!
//! ```text
//!   caller ──open(descriptor)──▶ AudioOutBackend ──▶ Box<dyn PortBackend>
//!                                  │                      │ output / set_volume
//!                  ┌───────────────┴──────────┐           ▼
//!                  ▼                          ▼      native stream
//!          CallbackAudioOut             QueueAudioOut
//!        (engine pulls a ring)     (blocks pushed, one gain)
//! ```
//!
//! The engine is chosen once at startup from configuration and never swapped.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use crate::callback::CallbackAudioOut;
use crate::queue::QueueAudioOut;
use hostaudio_core::{BackendKind, ChannelVolumes, Error, PortDescriptor, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::info;

/// Sleep between checks while `Output` waits for room.
pub(crate) const BACKPRESSURE_POLL: Duration = Duration::from_micros(500);

/// Lower bound on how long `Output` waits for room before dropping frames.
const MIN_OUTPUT_WAIT: Duration = Duration::from_millis(10);

/// Upper bound on that wait, whatever the block size and rate.
const MAX_OUTPUT_WAIT: Duration = Duration::from_secs(1);

/// How long a stream-owner thread gets to open its native stream.
pub(crate) const OPEN_TIMEOUT: Duration = Duration::from_secs(5);

/// One open, live audio sink.
///
/// Dropping the port stops its native stream before returning.
pub trait PortBackend: Send + Sync {
    /// Submit one block of interleaved PCM in the descriptor's format.
    ///
    /// The block must hold a whole number of frames. Waits a bounded time for
    /// the engine to make room; see each engine for what happens after that.
    fn output(&self, pcm: &[u8]) -> Result<()>;

    /// Apply per-channel volumes. Safe to call while another thread is in `output`.
    fn set_volume(&self, volumes: &ChannelVolumes);

    fn descriptor(&self) -> &PortDescriptor;

    fn engine(&self) -> BackendKind;

    fn stats(&self) -> PortStats;
}

/// Factory that opens ports on one native engine.
pub trait AudioOutBackend: Send + Sync {
    /// Validate `descriptor`, open a native stream and register it as current.
    fn open(&self, descriptor: &PortDescriptor) -> Result<Box<dyn PortBackend>>;

    fn kind(&self) -> BackendKind;
}

/// Counters kept by every port.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PortStats {
    /// Frames accepted by `output`.
    pub frames_written: u64,
    /// Frames discarded because the engine stayed full.
    pub frames_dropped: u64,
    /// Times the engine ran out of queued audio after playback began.
    pub underruns: u64,
}

#[derive(Debug, Default)]
pub(crate) struct PortCounters {
    written: AtomicU64,
    dropped: AtomicU64,
    underruns: AtomicU64,
}

impl PortCounters {
    pub(crate) fn add_written(&self, frames: usize) {
        self.written.fetch_add(frames as u64, Ordering::Relaxed);
    }

    pub(crate) fn add_dropped(&self, frames: usize) {
        self.dropped.fetch_add(frames as u64, Ordering::Relaxed);
    }

    pub(crate) fn add_underrun(&self) {
        self.underruns.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn has_written(&self) -> bool {
        self.written.load(Ordering::Relaxed) > 0
    }

    pub(crate) fn snapshot(&self) -> PortStats {
        PortStats {
            frames_written: self.written.load(Ordering::Relaxed),
            frames_dropped: self.dropped.load(Ordering::Relaxed),
            underruns: self.underruns.load(Ordering::Relaxed),
        }
    }
}

/// Frames in `pcm`, or an error if it ends mid-frame.
pub(crate) fn whole_frames(descriptor: &PortDescriptor, pcm: &[u8]) -> Result<usize> {
    let frame_bytes = descriptor.bytes_per_frame();
    if pcm.len() % frame_bytes != 0 {
        return Err(Error::Output(format!(
            "block of {} bytes is not a whole number of {frame_bytes}-byte frames",
            pcm.len()
        )));
    }
    Ok(pcm.len() / frame_bytes)
}

/// How long `output` may wait for room: four blocks of playback, kept
/// between 10 ms and 1 s.
pub(crate) fn output_wait_limit(descriptor: &PortDescriptor) -> Duration {
    (descriptor.buffer_duration() * 4).clamp(MIN_OUTPUT_WAIT, MAX_OUTPUT_WAIT)
}

/// Build the backend for `kind`.
///
/// Ports opened from it register with the process-wide stream registry, so
/// [`adjust_volume`](crate::adjust_volume) reaches them.
pub fn create_backend(kind: BackendKind) -> Result<Box<dyn AudioOutBackend>> {
    info!("Creating {kind} audio output backend");
    match kind {
        BackendKind::Callback => Ok(Box::new(CallbackAudioOut::new()?)),
        BackendKind::Queue => Ok(Box::new(QueueAudioOut::new()?)),
    }
}

/// Build the backend named by a resolved configuration value.
///
/// Unknown names fail with [`Error::Config`]; there is no silent default.
pub fn create_backend_from_name(name: &str) -> Result<Box<dyn AudioOutBackend>> {
    create_backend(BackendKind::from_name(name)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hostaudio_core::SampleFormat;

    #[test]
    fn test_whole_frames() {
        let desc = PortDescriptor::stereo_s16(48_000, 960);
        assert_eq!(whole_frames(&desc, &[0; 3840]).unwrap(), 960);
        assert_eq!(whole_frames(&desc, &[]).unwrap(), 0);
        assert!(matches!(whole_frames(&desc, &[0; 6]), Err(Error::Output(_))));

        let float = PortDescriptor::new(1, SampleFormat::F32, 48_000, 64);
        assert!(whole_frames(&float, &[0; 2]).is_err());
    }

    #[test]
    fn test_output_wait_limit() {
        let desc = PortDescriptor::stereo_s16(48_000, 960);
        assert_eq!(output_wait_limit(&desc), Duration::from_millis(80));

        let tiny = PortDescriptor::stereo_s16(48_000, 16);
        assert_eq!(output_wait_limit(&tiny), MIN_OUTPUT_WAIT);

        let slow = PortDescriptor::stereo_s16(1, hostaudio_core::MAX_BUFFER_FRAMES);
        assert!(slow.validate().is_ok());
        assert_eq!(output_wait_limit(&slow), MAX_OUTPUT_WAIT);
    }

    #[test]
    fn test_unknown_backend_name_fails_selection() {
        let err = create_backend_from_name("pulseaudio").err().unwrap();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_counters_snapshot() {
        let counters = PortCounters::default();
        assert!(!counters.has_written());
        counters.add_written(960);
        counters.add_dropped(10);
        counters.add_underrun();
        assert_eq!(
            counters.snapshot(),
            PortStats {
                frames_written: 960,
                frames_dropped: 10,
                underruns: 1,
            }
        );
    }
}
