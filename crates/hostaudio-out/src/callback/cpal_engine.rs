//! Callback engine on cpal.
//!
//! `cpal::Stream` is not `Send`, so every stream is built, driven and dropped
//! on its own owner thread. The port talks to that thread over a command
//! channel and joins it on stop.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use super::native::{CallbackContext, CallbackStream, ErrorCallback, RenderCallback};
use crate::backend::OPEN_TIMEOUT;
use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    Device, SampleFormat, Stream, StreamConfig,
};
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use hostaudio_core::{Error, PortDescriptor, Result};
use parking_lot::Mutex;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// How long a play/pause request may take before the port gives up on it.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(2);

/// The output device every stream of a backend opens on.
///
/// Resolved once; later changes to the system default do not move
/// streams opened from this context.
pub struct CpalContext {
    device: Mutex<Device>,
    device_name: String,
}

impl CpalContext {
    /// Bind to the default output device of the default host.
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();
        let host_name = host.id().name();

        let device = host.default_output_device().ok_or_else(|| {
            Error::DeviceUnavailable(format!("{host_name} host has no output device"))
        })?;
        let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());

        info!("Callback engine context: {host_name} host, device: {device_name}");

        Ok(Self {
            device: Mutex::new(device),
            device_name,
        })
    }
}

impl CallbackContext for CpalContext {
    fn name(&self) -> &str {
        &self.device_name
    }

    fn open_stream(
        &self,
        descriptor: &PortDescriptor,
        render: RenderCallback,
        on_error: ErrorCallback,
    ) -> Result<Box<dyn CallbackStream>> {
        let device = self.device.lock().clone();
        CpalStream::spawn(device, *descriptor, render, on_error)
            .map(|s| Box::new(s) as Box<dyn CallbackStream>)
    }
}

/// Requests handled by a stream's owner thread.
enum StreamCommand {
    Play(Sender<Result<()>>),
    Pause(Sender<Result<()>>),
    Shutdown,
}

/// Handle to a cpal stream living on its owner thread.
pub struct CpalStream {
    commands: Sender<StreamCommand>,
    worker: Option<JoinHandle<()>>,
}

impl CpalStream {
    fn spawn(
        device: Device,
        descriptor: PortDescriptor,
        render: RenderCallback,
        on_error: ErrorCallback,
    ) -> Result<Self> {
        let (ready_tx, ready_rx) = bounded::<Result<()>>(1);
        let (command_tx, command_rx) = unbounded();

        let worker = thread::Builder::new()
            .name("cpal-port".to_string())
            .spawn(move || {
                let stream = match build_stream(&device, &descriptor, render, on_error) {
                    Ok(stream) => {
                        let _ = ready_tx.send(Ok(()));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                run_commands(&stream, &command_rx);
                drop(stream);
                debug!("cpal stream released");
            })
            .map_err(|e| Error::BackendInit(format!("Failed to spawn stream thread: {e}")))?;

        match ready_rx.recv_timeout(OPEN_TIMEOUT) {
            Ok(Ok(())) => Ok(Self {
                commands: command_tx,
                worker: Some(worker),
            }),
            Ok(Err(e)) => {
                let _ = worker.join();
                Err(e)
            }
            // The worker exits on its own once it sees the command channel closed.
            Err(_) => Err(Error::BackendInit(format!(
                "stream did not open within {OPEN_TIMEOUT:?}"
            ))),
        }
    }

    fn request(&self, make: fn(Sender<Result<()>>) -> StreamCommand) -> Result<()> {
        let (reply_tx, reply_rx) = bounded(1);
        self.commands
            .send(make(reply_tx))
            .map_err(|_| Error::Output("stream thread has exited".to_string()))?;
        reply_rx
            .recv_timeout(COMMAND_TIMEOUT)
            .map_err(|_| Error::Output("stream thread did not answer".to_string()))?
    }
}

impl CallbackStream for CpalStream {
    fn start(&mut self) -> Result<()> {
        self.request(StreamCommand::Play)
    }

    fn stop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        if let Err(e) = self.request(StreamCommand::Pause) {
            warn!("Failed to pause stream before release: {e}");
        }
        let _ = self.commands.send(StreamCommand::Shutdown);
        if worker.join().is_err() {
            error!("cpal stream thread panicked");
        }
    }
}

impl Drop for CpalStream {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_commands(stream: &Stream, commands: &Receiver<StreamCommand>) {
    while let Ok(command) = commands.recv() {
        match command {
            StreamCommand::Play(reply) => {
                let _ = reply.send(stream.play().map_err(|e| match e {
                    cpal::PlayStreamError::DeviceNotAvailable => {
                        Error::DeviceUnavailable("device went away before start".to_string())
                    }
                    other => Error::BackendInit(format!("Failed to start stream: {other}")),
                }));
            }
            StreamCommand::Pause(reply) => {
                let _ = reply.send(
                    stream
                        .pause()
                        .map_err(|e| Error::Output(format!("Failed to pause stream: {e}"))),
                );
            }
            StreamCommand::Shutdown => break,
        }
    }
}

fn build_stream(
    device: &Device,
    descriptor: &PortDescriptor,
    render: RenderCallback,
    on_error: ErrorCallback,
) -> Result<Stream> {
    let sample_format = device
        .default_output_config()
        .map_err(|e| match e {
            cpal::DefaultStreamConfigError::DeviceNotAvailable => {
                Error::DeviceUnavailable("output device disappeared".to_string())
            }
            other => Error::BackendInit(format!("Failed to get output config: {other}")),
        })?
        .sample_format();

    let config = StreamConfig {
        channels: descriptor.channels,
        sample_rate: cpal::SampleRate(descriptor.sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    debug!(
        "Building cpal stream: {}Hz, {} channels, device format {sample_format:?}",
        descriptor.sample_rate, descriptor.channels
    );

    match sample_format {
        SampleFormat::F32 => build_typed::<f32>(device, &config, render, on_error),
        SampleFormat::I16 => build_typed::<i16>(device, &config, render, on_error),
        SampleFormat::U16 => build_typed::<u16>(device, &config, render, on_error),
        other => Err(Error::BackendInit(format!(
            "Unsupported device sample format: {other:?}"
        ))),
    }
}

fn build_typed<T: cpal::SizedSample + cpal::FromSample<f32>>(
    device: &Device,
    config: &StreamConfig,
    mut render: RenderCallback,
    mut on_error: ErrorCallback,
) -> Result<Stream> {
    // Grown once to the engine's callback size, then reused.
    let mut scratch: Vec<f32> = Vec::new();

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                scratch.resize(data.len(), 0.0);
                render(&mut scratch);
                for (out, &sample) in data.iter_mut().zip(scratch.iter()) {
                    *out = T::from_sample(sample);
                }
            },
            move |err| on_error(err.to_string()),
            None,
        )
        .map_err(|e| match e {
            cpal::BuildStreamError::DeviceNotAvailable => {
                Error::DeviceUnavailable("output device disappeared".to_string())
            }
            cpal::BuildStreamError::StreamConfigNotSupported => Error::BackendInit(format!(
                "device does not support {} channels at {} Hz",
                config.channels, config.sample_rate.0
            )),
            other => Error::BackendInit(format!("Failed to build stream: {other}")),
        })
}
