//! Queue engine on rodio.
//!
//! The `OutputStream` has to stay alive for the sink to play and is not `Send`,
//! so it lives on an owner thread that parks until the port stops. The sink
//! itself is shared back to the port.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use super::native::{NativeGain, QueueDriver, QueueStream};
use crate::backend::OPEN_TIMEOUT;
use crossbeam_channel::{bounded, Sender};
use hostaudio_core::{Error, PortDescriptor, Result};
use rodio::buffer::SamplesBuffer;
use rodio::{OutputStream, PlayError, Sink, StreamError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info};

impl NativeGain for Sink {
    fn set_gain(&self, gain: f32) {
        self.set_volume(gain);
    }

    fn gain(&self) -> f32 {
        self.volume()
    }
}

/// Opens every port on the default output device.
#[derive(Debug, Default)]
pub struct RodioDriver;

impl QueueDriver for RodioDriver {
    fn name(&self) -> &str {
        "rodio"
    }

    fn open(&self, descriptor: &PortDescriptor) -> Result<Box<dyn QueueStream>> {
        RodioQueue::spawn(*descriptor).map(|q| Box::new(q) as Box<dyn QueueStream>)
    }
}

/// A rodio sink plus the thread keeping its output stream alive.
pub struct RodioQueue {
    sink: Arc<Sink>,
    channels: u16,
    sample_rate: u32,
    shutdown: Option<Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

impl RodioQueue {
    fn spawn(descriptor: PortDescriptor) -> Result<Self> {
        let (ready_tx, ready_rx) = bounded::<Result<Arc<Sink>>>(1);
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);

        let worker = thread::Builder::new()
            .name("rodio-port".to_string())
            .spawn(move || {
                let (stream, handle) = match OutputStream::try_default() {
                    Ok(pair) => pair,
                    Err(e) => {
                        let _ = ready_tx.send(Err(map_stream_error(e)));
                        return;
                    }
                };
                match Sink::try_new(&handle) {
                    Ok(sink) => {
                        let _ = ready_tx.send(Ok(Arc::new(sink)));
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(map_play_error(e)));
                        return;
                    }
                }
                // Returns on an explicit shutdown or when the port's sender drops.
                let _ = shutdown_rx.recv();
                drop(stream);
                debug!("rodio output stream released");
            })
            .map_err(|e| Error::BackendInit(format!("Failed to spawn queue thread: {e}")))?;

        match ready_rx.recv_timeout(OPEN_TIMEOUT) {
            Ok(Ok(sink)) => {
                info!(
                    "rodio queue ready: {} channels at {}Hz",
                    descriptor.channels, descriptor.sample_rate
                );
                Ok(Self {
                    sink,
                    channels: descriptor.channels,
                    sample_rate: descriptor.sample_rate,
                    shutdown: Some(shutdown_tx),
                    worker: Some(worker),
                })
            }
            Ok(Err(e)) => {
                let _ = worker.join();
                Err(e)
            }
            Err(_) => Err(Error::BackendInit(format!(
                "queue did not open within {OPEN_TIMEOUT:?}"
            ))),
        }
    }
}

impl QueueStream for RodioQueue {
    fn queue(&mut self, samples: Vec<f32>) -> Result<()> {
        if self.worker.is_none() {
            return Err(Error::Output("queue is stopped".to_string()));
        }
        self.sink
            .append(SamplesBuffer::new(self.channels, self.sample_rate, samples));
        Ok(())
    }

    fn pending_blocks(&self) -> usize {
        self.sink.len()
    }

    fn native_gain(&self) -> Arc<dyn NativeGain> {
        self.sink.clone()
    }

    fn stop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        self.sink.stop();
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if worker.join().is_err() {
            error!("rodio queue thread panicked");
        }
    }
}

impl Drop for RodioQueue {
    fn drop(&mut self) {
        self.stop();
    }
}

fn map_stream_error(e: StreamError) -> Error {
    match e {
        StreamError::NoDevice => Error::DeviceUnavailable("no default output device".to_string()),
        other => Error::BackendInit(format!("Failed to open output stream: {other}")),
    }
}

fn map_play_error(e: PlayError) -> Error {
    match e {
        PlayError::NoDevice => Error::DeviceUnavailable("output device went away".to_string()),
        other => Error::BackendInit(format!("Failed to create sink: {other}")),
    }
}
