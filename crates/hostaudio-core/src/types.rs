//! Core domain types for hostaudio.

pub mod backend;
pub mod descriptor;
pub mod volume;

pub use backend::BackendKind;
pub use descriptor::{PortDescriptor, SampleFormat, MAX_BUFFER_FRAMES, MAX_CHANNELS};
pub use volume::{ChannelVolumes, VOLUME_0DB};
