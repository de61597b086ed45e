//! Port descriptors and PCM sample formats.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Maximum number of output channels a port may carry.
pub const MAX_CHANNELS: usize = 8;

/// Largest buffer a port may request, in frames.
pub const MAX_BUFFER_FRAMES: u32 = 65_536;

/// Interleaved PCM sample encoding accepted by `Output`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum SampleFormat {
    /// Signed 16-bit little-endian.
    #[default]
    S16,
    /// 32-bit IEEE float little-endian.
    F32,
}

impl SampleFormat {
    /// Size of one sample in bytes.
    pub const fn bytes_per_sample(self) -> usize {
        match self {
            Self::S16 => 2,
            Self::F32 => 4,
        }
    }

    /// Decode little-endian PCM bytes into normalized `f32` samples, appending to `out`.
    ///
    /// Trailing bytes that do not form a whole sample are ignored; callers validate
    /// frame alignment before decoding.
    pub fn decode_into(self, bytes: &[u8], out: &mut Vec<f32>) {
        match self {
            Self::S16 => out.extend(
                bytes
                    .chunks_exact(2)
                    .map(|b| f32::from(i16::from_le_bytes([b[0], b[1]])) / 32768.0),
            ),
            Self::F32 => out.extend(
                bytes
                    .chunks_exact(4)
                    .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]])),
            ),
        }
    }
}

/// Shape of the stream a caller wants to open.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct PortDescriptor {
    /// Interleaved channel count (1-8).
    pub channels: u16,
    /// Encoding of the bytes passed to `Output`.
    pub format: SampleFormat,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Frames per `Output` block the caller intends to push.
    pub buffer_frames: u32,
}

impl PortDescriptor {
    pub const fn new(
        channels: u16,
        format: SampleFormat,
        sample_rate: u32,
        buffer_frames: u32,
    ) -> Self {
        Self {
            channels,
            format,
            sample_rate,
            buffer_frames,
        }
    }

    /// 16-bit stereo, the most common guest output shape.
    pub const fn stereo_s16(sample_rate: u32, buffer_frames: u32) -> Self {
        Self::new(2, SampleFormat::S16, sample_rate, buffer_frames)
    }

    /// Check the descriptor before any native engine is touched.
    pub fn validate(&self) -> Result<()> {
        if self.channels == 0 || usize::from(self.channels) > MAX_CHANNELS {
            return Err(Error::InvalidDescriptor(format!(
                "channel count {} is outside 1..={MAX_CHANNELS}",
                self.channels
            )));
        }
        if self.sample_rate == 0 {
            return Err(Error::InvalidDescriptor(
                "sample rate must be non-zero".to_string(),
            ));
        }
        if self.buffer_frames == 0 || self.buffer_frames > MAX_BUFFER_FRAMES {
            return Err(Error::InvalidDescriptor(format!(
                "buffer of {} frames is outside 1..={MAX_BUFFER_FRAMES}",
                self.buffer_frames
            )));
        }
        Ok(())
    }

    /// Bytes in one interleaved frame.
    pub const fn bytes_per_frame(&self) -> usize {
        self.channels as usize * self.format.bytes_per_sample()
    }

    /// Bytes in one full block of `buffer_frames`.
    pub const fn buffer_bytes(&self) -> usize {
        self.bytes_per_frame() * self.buffer_frames as usize
    }

    /// Samples (not frames) in one full block.
    pub const fn buffer_samples(&self) -> usize {
        self.channels as usize * self.buffer_frames as usize
    }

    /// Playback time covered by one block.
    pub fn buffer_duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_nanos(
            u64::from(self.buffer_frames) * 1_000_000_000 / u64::from(self.sample_rate),
        )
    }
}
