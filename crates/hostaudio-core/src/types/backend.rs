//! Backend selection from configuration.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use crate::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Which host audio engine drives output for the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BackendKind {
    /// Callback-driven engine: the engine thread pulls frames from a ring.
    #[default]
    Callback,
    /// Queue-driven engine: whole blocks are pushed and a single gain is exposed.
    Queue,
}

impl BackendKind {
    pub const ALL: [Self; 2] = [Self::Callback, Self::Queue];

    /// Canonical configuration name.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Callback => "cpal",
            Self::Queue => "rodio",
        }
    }

    /// Names accepted in configuration, canonical first.
    pub const fn aliases(self) -> &'static [&'static str] {
        match self {
            Self::Callback => &["cpal", "cubeb", "engine-a"],
            Self::Queue => &["rodio", "sdl", "engine-b"],
        }
    }

    /// Resolve a configured backend name (case-insensitive).
    pub fn from_name(name: &str) -> Result<Self> {
        let wanted = name.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|kind| kind.aliases().contains(&wanted.as_str()))
            .ok_or_else(|| Error::Config(name.to_string()))
    }
}

impl FromStr for BackendKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_name(s)
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Serialize for BackendKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for BackendKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Self::from_name(&name).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aliases_resolve() {
        assert_eq!(BackendKind::from_name("engine-a").unwrap(), BackendKind::Callback);
        assert_eq!(BackendKind::from_name("Cubeb").unwrap(), BackendKind::Callback);
        assert_eq!(BackendKind::from_name(" engine-b ").unwrap(), BackendKind::Queue);
        assert_eq!("SDL".parse::<BackendKind>().unwrap(), BackendKind::Queue);
    }

    #[test]
    fn test_unknown_name_is_config_error() {
        let err = BackendKind::from_name("pulseaudio").unwrap_err();
        assert_eq!(err, Error::Config("pulseaudio".into()));
    }

    #[test]
    fn test_display_round_trips() {
        for kind in BackendKind::ALL {
            assert_eq!(kind.to_string().parse::<BackendKind>().unwrap(), kind);
        }
    }

    #[derive(Deserialize)]
    struct HostConfig {
        audio_backend: BackendKind,
    }

    #[test]
    fn test_embedded_in_host_config() {
        let cfg: HostConfig = serde_json::from_str(r#"{"audio_backend":"sdl"}"#).unwrap();
        assert_eq!(cfg.audio_backend, BackendKind::Queue);

        let bad = serde_json::from_str::<HostConfig>(r#"{"audio_backend":"oss"}"#);
        assert!(bad.is_err());

        assert_eq!(
            serde_json::to_string(&BackendKind::Callback).unwrap(),
            "\"cpal\""
        );
    }
}
