//! # hostaudio-out
//!
//! Interchangeable audio output backends for a host that produces PCM.
//!
//! A backend is picked once from configuration ([`BackendKind`]) and opens
//! ports ([`PortBackend`]) shaped by a [`PortDescriptor`]. Two engines sit
//! behind the same contract:
//! - a callback engine (cpal) that pulls from a lock-free ring and applies
//!   gains per channel on its own thread
//! - a queue engine (rodio) that takes pushed blocks and has one stream gain
//!
//! [`adjust_volume`] reaches whichever port was opened most recently,
//! from anywhere in the process, and does nothing when no port is open.

pub mod backend;
pub mod buffer;
pub mod callback;
pub mod gain;
pub mod platform;
pub mod queue;
pub mod registry;

#[cfg(test)]
mod testing;

pub use backend::{
    create_backend, create_backend_from_name, AudioOutBackend, PortBackend, PortStats,
};
pub use callback::CallbackAudioOut;
pub use queue::QueueAudioOut;
pub use registry::{adjust_volume, EngineTag, StreamRegistry, VolumeTarget};

pub use hostaudio_core::{
    BackendKind, ChannelVolumes, Error, PortDescriptor, Result, SampleFormat, VOLUME_0DB,
};
