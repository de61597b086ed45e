//! Per-channel volume vectors.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use super::descriptor::MAX_CHANNELS;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Integer volume that maps to unity gain.
pub const VOLUME_0DB: i32 = 32_768;

/// Integer gain for each output channel index.
///
/// Values are clamped to `0..=VOLUME_0DB` when converted to a gain, so
/// anything at or above `VOLUME_0DB` plays at full scale.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ChannelVolumes([i32; MAX_CHANNELS]);

impl ChannelVolumes {
    pub const fn new(volumes: [i32; MAX_CHANNELS]) -> Self {
        Self(volumes)
    }

    /// Every channel at unity gain.
    pub const fn unity() -> Self {
        Self([VOLUME_0DB; MAX_CHANNELS])
    }

    /// Build from up to eight values; channels not supplied are silent.
    pub fn from_slice(volumes: &[i32]) -> Result<Self> {
        if volumes.len() > MAX_CHANNELS {
            return Err(Error::InvalidArgument(format!(
                "{} channel volumes given, at most {MAX_CHANNELS} supported",
                volumes.len()
            )));
        }
        let mut out = [0; MAX_CHANNELS];
        out[..volumes.len()].copy_from_slice(volumes);
        Ok(Self(out))
    }

    pub const fn as_array(&self) -> &[i32; MAX_CHANNELS] {
        &self.0
    }

    /// Gain for a channel in `0.0..=1.0`. Out-of-range indices are silent.
    pub fn gain(&self, channel: usize) -> f32 {
        self.0
            .get(channel)
            .map_or(0.0, |&v| v.clamp(0, VOLUME_0DB) as f32 / VOLUME_0DB as f32)
    }

    /// All eight gains in channel order.
    pub fn gains(&self) -> [f32; MAX_CHANNELS] {
        std::array::from_fn(|ch| self.gain(ch))
    }

    /// Reduce the vector to one scalar for engines with a single gain control.
    ///
    /// The loudest channel wins, so a stream is never quieter than any
    /// channel asked for.
    pub fn peak_gain(&self) -> f32 {
        self.gains().into_iter().fold(0.0, f32::max)
    }
}

impl Default for ChannelVolumes {
    fn default() -> Self {
        Self::unity()
    }
}
