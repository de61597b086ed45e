//! Scoped platform audio-subsystem setup.
//!
//! On Windows the engines talk to WASAPI, which needs the process to be in a
//! COM multithreaded apartment. The guard keeps one MTA alive on a thread it
//! owns: that thread initializes COM, parks until the guard drops, then
//! uninitializes on the same thread. Init and teardown stay paired no matter
//! which thread builds or drops the backend. Elsewhere the guard is empty.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use hostaudio_core::Result;
use std::thread::JoinHandle;
use tracing::{debug, error};

#[cfg(windows)]
use crate::backend::OPEN_TIMEOUT;
#[cfg(windows)]
use hostaudio_core::Error;

/// Holds platform setup for as long as a backend lives.
#[derive(Debug)]
pub struct PlatformGuard {
    /// Dropping the sender wakes the apartment thread for teardown.
    release: Option<crossbeam_channel::Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

impl PlatformGuard {
    /// Acquire platform setup for the calling process.
    pub fn acquire() -> Result<Self> {
        let guard = Self::init_subsystem()?;
        debug!(
            "Platform audio setup acquired (apartment thread: {})",
            guard.is_initialized()
        );
        Ok(guard)
    }

    /// Whether this guard owns a subsystem that it will tear down.
    pub const fn is_initialized(&self) -> bool {
        self.worker.is_some()
    }

    #[cfg(windows)]
    fn init_subsystem() -> Result<Self> {
        use crossbeam_channel::bounded;

        let (ready_tx, ready_rx) = bounded::<Result<()>>(1);
        let (release_tx, release_rx) = bounded::<()>(0);

        let worker = std::thread::Builder::new()
            .name("com-apartment".to_string())
            .spawn(move || {
                if let Err(e) = com::initialize() {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
                let _ = ready_tx.send(Ok(()));
                // Returns once the guard drops its sender.
                let _ = release_rx.recv();
                com::uninitialize();
            })
            .map_err(|e| Error::BackendInit(format!("Failed to spawn COM thread: {e}")))?;

        match ready_rx.recv_timeout(OPEN_TIMEOUT) {
            Ok(Ok(())) => Ok(Self {
                release: Some(release_tx),
                worker: Some(worker),
            }),
            Ok(Err(e)) => {
                let _ = worker.join();
                Err(e)
            }
            Err(_) => Err(Error::BackendInit(
                "COM apartment thread did not start".to_string(),
            )),
        }
    }

    #[cfg(not(windows))]
    const fn init_subsystem() -> Result<Self> {
        Ok(Self {
            release: None,
            worker: None,
        })
    }
}

impl Drop for PlatformGuard {
    fn drop(&mut self) {
        drop(self.release.take());
        let Some(worker) = self.worker.take() else {
            return;
        };
        if worker.join().is_err() {
            error!("Platform audio thread panicked during teardown");
            return;
        }
        debug!("Platform audio setup released");
    }
}

#[cfg(windows)]
#[allow(unsafe_code)]
mod com {
    use hostaudio_core::{Error, Result};
    use windows::Win32::System::Com::{CoInitializeEx, CoUninitialize, COINIT_MULTITHREADED};

    pub(super) fn initialize() -> Result<()> {
        // SAFETY: no reserved pointer; called once on a fresh thread and
        // balanced by `uninitialize` on that same thread.
        let hr = unsafe { CoInitializeEx(None, COINIT_MULTITHREADED) };
        if hr.is_err() {
            return Err(Error::BackendInit(format!(
                "COM initialization failed: {hr:?}"
            )));
        }
        Ok(())
    }

    pub(super) fn uninitialize() {
        // SAFETY: only reached after `initialize` succeeded on this thread.
        unsafe { CoUninitialize() };
    }
}
