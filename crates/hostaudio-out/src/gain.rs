//! Gain state shared between control threads and the engine thread.

use hostaudio_core::{ChannelVolumes, MAX_CHANNELS};
use std::sync::atomic::{AtomicU32, Ordering};

/// `f32` stored as bits so it can be swapped without a lock.
#[derive(Debug)]
struct AtomicGain(AtomicU32);

impl AtomicGain {
    fn new(value: f32) -> Self {
        Self(AtomicU32::new(value.to_bits()))
    }

    fn load(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Acquire))
    }

    fn store(&self, value: f32) {
        self.0.store(value.to_bits(), Ordering::Release);
    }
}

/// Per-channel gains set by `SetVolume` plus the master gain set by
/// global volume control.
///
/// Writers store with release ordering and the render side loads with
/// acquire, so a write made before a callback starts is seen by that callback.
#[derive(Debug)]
pub struct StreamGain {
    channels: [AtomicGain; MAX_CHANNELS],
    master: AtomicGain,
}

impl StreamGain {
    /// Unity on every channel and on the master.
    pub fn new() -> Self {
        Self {
            channels: std::array::from_fn(|_| AtomicGain::new(1.0)),
            master: AtomicGain::new(1.0),
        }
    }

    pub fn set_channels(&self, volumes: &ChannelVolumes) {
        for (slot, gain) in self.channels.iter().zip(volumes.gains()) {
            slot.store(gain);
        }
    }

    pub fn channel(&self, channel: usize) -> f32 {
        self.channels.get(channel).map_or(0.0, AtomicGain::load)
    }

    pub fn set_master(&self, gain: f32) {
        self.master.store(gain);
    }

    pub fn master(&self) -> f32 {
        self.master.load()
    }

    /// Effective per-channel multipliers for a stream of `channels` channels.
    pub fn snapshot(&self, channels: usize) -> [f32; MAX_CHANNELS] {
        let master = self.master();
        std::array::from_fn(|ch| if ch < channels { master * self.channel(ch) } else { 0.0 })
    }

    /// Loudest channel of the first `channels`, times the master.
    pub fn peak(&self, channels: usize) -> f32 {
        self.snapshot(channels).into_iter().fold(0.0, f32::max)
    }

    /// Scale interleaved samples in place.
    #[allow(clippy::float_cmp)] // Exact unity skips the multiply
    pub fn apply(&self, samples: &mut [f32], channels: usize) {
        let channels = channels.clamp(1, MAX_CHANNELS);
        let gains = self.snapshot(channels);
        if gains[..channels].iter().all(|&g| g == 1.0) {
            return;
        }
        for frame in samples.chunks_mut(channels) {
            for (sample, gain) in frame.iter_mut().zip(gains) {
                *sample *= gain;
            }
        }
    }
}

impl Default for StreamGain {
    fn default() -> Self {
        Self::new()
    }
}

/// Clamp a requested master gain to the engine's `0.0..=1.0` range.
///
/// NaN has no meaningful volume and is rejected.
pub fn clamp_gain(gain: f32) -> Option<f32> {
    if gain.is_nan() {
        None
    } else {
        Some(gain.clamp(0.0, 1.0))
    }
}
