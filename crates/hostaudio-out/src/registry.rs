//! Process-wide registry of the live output stream.
//!
//! Global volume control has to reach a stream from code that never received
//! the port that owns it. Ports register a weak handle to their gain state
//! when they open and clear it when they close; `adjust_volume` only ever
//! touches a handle while holding the registry's read lock, and a closing port
//! clears its entry under the write lock before stopping its stream.

use crate::gain::clamp_gain;
use hostaudio_core::BackendKind;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, trace, warn};

static GLOBAL_REGISTRY: Lazy<Arc<StreamRegistry>> =
    Lazy::new(|| Arc::new(StreamRegistry::new()));

/// Which engine owns the current stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum EngineTag {
    #[default]
    None,
    Callback,
    Queue,
}

impl From<BackendKind> for EngineTag {
    fn from(kind: BackendKind) -> Self {
        match kind {
            BackendKind::Callback => Self::Callback,
            BackendKind::Queue => Self::Queue,
        }
    }
}

impl fmt::Display for EngineTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::None => "none",
            Self::Callback => "callback",
            Self::Queue => "queue",
        })
    }
}

/// Native gain handle that global volume control can drive.
pub trait VolumeTarget: Send + Sync {
    /// Apply a master gain already clamped to `0.0..=1.0`.
    fn set_master_gain(&self, gain: f32);
}

/// Ticket identifying one registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamId(u64);

struct CurrentStream {
    tag: EngineTag,
    id: StreamId,
    target: Weak<dyn VolumeTarget>,
}

/// Engine tag and weak native handle of the most recently opened stream.
pub struct StreamRegistry {
    current: RwLock<Option<CurrentStream>>,
    next_id: AtomicU64,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self {
            current: RwLock::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    /// The registry used by [`adjust_volume`] and by backends built with
    /// [`create_backend`](crate::create_backend).
    pub fn global() -> Arc<Self> {
        Arc::clone(&GLOBAL_REGISTRY)
    }

    /// Make `target` the current stream, superseding any previous one.
    pub fn register(&self, tag: EngineTag, target: &Arc<dyn VolumeTarget>) -> StreamId {
        let id = StreamId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let previous = self.current.write().replace(CurrentStream {
            tag,
            id,
            target: Arc::downgrade(target),
        });

        if let Some(previous) = previous {
            debug!(
                "Current {} stream {:?} superseded by {tag} stream {id:?}",
                previous.tag, previous.id
            );
        } else {
            debug!("Registered {tag} stream {id:?}");
        }
        id
    }

    /// Clear the entry if `id` is still current. Returns whether it was.
    ///
    /// Waits for any in-flight volume adjustment to finish first.
    pub fn release(&self, id: StreamId) -> bool {
        let mut current = self.current.write();
        if current.as_ref().is_some_and(|c| c.id == id) {
            *current = None;
            debug!("Released stream {id:?}");
            true
        } else {
            false
        }
    }

    /// Engine of the live stream, or `EngineTag::None`.
    pub fn current_engine(&self) -> EngineTag {
        self.current
            .read()
            .as_ref()
            .filter(|c| c.target.strong_count() > 0)
            .map_or(EngineTag::None, |c| c.tag)
    }

    /// Set the master gain of the live stream.
    ///
    /// `gain` is clamped to `0.0..=1.0`; NaN is ignored. With no live stream
    /// this does nothing. Returns whether a stream received the gain.
    pub fn adjust_volume(&self, gain: f32) -> bool {
        let Some(gain) = clamp_gain(gain) else {
            warn!("Ignoring NaN master gain");
            return false;
        };

        let current = self.current.read();
        let Some(stream) = current.as_ref() else {
            trace!("No live stream, master gain {gain} dropped");
            return false;
        };
        let Some(target) = stream.target.upgrade() else {
            return false;
        };

        target.set_master_gain(gain);
        debug!("Master gain {gain} applied to {} stream {:?}", stream.tag, stream.id);
        true
    }
}

impl Default for StreamRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Set the master gain (`0.0..=1.0`) of whichever stream is currently live.
///
/// Safe from any thread at any time. Does nothing when no port is open.
pub fn adjust_volume(gain: f32) {
    GLOBAL_REGISTRY.adjust_volume(gain);
}
