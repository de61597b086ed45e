//! Error types for hostaudio.

use thiserror::Error;

/// Result type alias using hostaudio's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for hostaudio.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    // Selection errors
    #[error("Unknown audio backend: {0}")]
    Config(String),

    // Open errors
    #[error("Invalid port descriptor: {0}")]
    InvalidDescriptor(String),

    #[error("Audio backend initialization failed: {0}")]
    BackendInit(String),

    #[error("No playback device available: {0}")]
    DeviceUnavailable(String),

    // Runtime errors
    #[error("Audio output error: {0}")]
    Output(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl Error {
    /// Returns true if the native engine reported that no playback device exists.
    ///
    /// Callers typically treat this as "run silently" rather than aborting.
    pub const fn is_device_unavailable(&self) -> bool {
        matches!(self, Self::DeviceUnavailable(_))
    }

    /// Returns true if this error came from backend selection.
    pub const fn is_configuration(&self) -> bool {
        matches!(self, Self::Config(_))
    }
}
