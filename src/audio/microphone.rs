//! System microphone capture via cpal.
//!
//! cpal streams are not `Send`, so each capture owns a dedicated thread that
//! builds the stream, parks until stopped and then drops it. Dropping the
//! stream releases the device.

use anyhow::{anyhow, bail, Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, SizedSample, StreamConfig};
use std::sync::mpsc as std_mpsc;
use std::thread::JoinHandle;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use super::backend::{AudioBackend, AudioBackendConfig, AudioFrame};

pub struct CpalMicrophone {
    device_name: Option<String>,
    config: AudioBackendConfig,
    worker: Option<MicWorker>,
}

struct MicWorker {
    stop_tx: std_mpsc::Sender<()>,
    thread: JoinHandle<()>,
}

impl CpalMicrophone {
    pub fn new(device_name: Option<String>, config: AudioBackendConfig) -> Self {
        Self {
            device_name,
            config,
            worker: None,
        }
    }

    /// List microphone names so the CLI can offer a selector
    pub fn list_devices() -> Result<Vec<String>> {
        let host = cpal::default_host();
        let devices = host.input_devices().context("no input devices available")?;
        Ok(devices.filter_map(|d| d.name().ok()).collect())
    }
}

#[async_trait::async_trait]
impl AudioBackend for CpalMicrophone {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>> {
        if self.worker.is_some() {
            bail!("Already capturing");
        }

        let (tx, rx) = mpsc::channel(256);
        let (ready_tx, ready_rx) = oneshot::channel::<Result<String>>();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
        let device_name = self.device_name.clone();
        let buffer_ms = self.config.buffer_duration_ms;

        let thread = std::thread::Builder::new()
            .name("mic-capture".to_string())
            .spawn(move || {
                let stream = match open_input_stream(device_name.as_deref(), buffer_ms, tx) {
                    Ok((stream, name)) => {
                        let _ = ready_tx.send(Ok(name));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                // Park until stop() or until the backend is dropped
                let _ = stop_rx.recv();
                if let Err(e) = stream.pause() {
                    debug!("Failed to pause input stream: {}", e);
                }
                drop(stream);
            })
            .context("Failed to spawn microphone thread")?;

        match ready_rx.await {
            Ok(Ok(name)) => {
                info!("Microphone capture started on '{}'", name);
                self.worker = Some(MicWorker { stop_tx, thread });
                Ok(rx)
            }
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e.context("Microphone permission/recording failed"))
            }
            Err(_) => {
                let _ = thread.join();
                bail!("Microphone thread exited before the stream opened")
            }
        }
    }

    async fn stop(&mut self) -> Result<()> {
        let Some(worker) = self.worker.take() else {
            return Ok(());
        };

        let _ = worker.stop_tx.send(());
        tokio::task::spawn_blocking(move || worker.thread.join())
            .await
            .context("Failed to join microphone thread")?
            .map_err(|_| anyhow!("Microphone thread panicked"))?;

        info!("Microphone capture stopped");
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.worker.is_some()
    }

    fn name(&self) -> &str {
        "cpal microphone"
    }
}

fn open_input_stream(
    device_name: Option<&str>,
    buffer_ms: u64,
    tx: mpsc::Sender<AudioFrame>,
) -> Result<(cpal::Stream, String)> {
    let host = cpal::default_host();
    let device = match device_name {
        Some(name) => host
            .input_devices()
            .context("no input devices available")?
            .find(|d| d.name().map(|n| n == name).unwrap_or(false))
            .ok_or_else(|| anyhow!("input device '{}' not found", name))?,
        None => host
            .default_input_device()
            .context("no default input device available")?,
    };
    let name = device.name().unwrap_or_else(|_| "unknown input device".to_string());

    let supported = device
        .default_input_config()
        .with_context(|| format!("'{}' refused an input configuration", name))?;
    let format = supported.sample_format();
    let stream_config: StreamConfig = supported.into();

    debug!(
        "Input config: format={:?} sample_rate={}Hz channels={}",
        format, stream_config.sample_rate.0, stream_config.channels
    );

    let sink = FrameSink::new(&stream_config, buffer_ms, tx);

    let stream = match format {
        SampleFormat::F32 => build_stream::<f32, _>(&device, &stream_config, sink, |s| {
            (s.clamp(-1.0, 1.0) * f32::from(i16::MAX)) as i16
        })?,
        SampleFormat::I16 => build_stream::<i16, _>(&device, &stream_config, sink, |s| s)?,
        SampleFormat::U16 => build_stream::<u16, _>(&device, &stream_config, sink, |s| {
            (i32::from(s) - 32_768) as i16
        })?,
        other => bail!("unsupported sample format: {:?}", other),
    };

    stream.play().context("Failed to start input stream")?;

    Ok((stream, name))
}

fn build_stream<T, F>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut sink: FrameSink,
    convert: F,
) -> Result<cpal::Stream>
where
    T: SizedSample,
    F: Fn(T) -> i16 + Send + 'static,
{
    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                for &sample in data {
                    sink.push(convert(sample));
                }
            },
            |err| error!("Audio stream error: {}", err),
            None,
        )
        .context("Failed to build input stream")
}

/// Cuts the callback's sample stream into fixed-size fragments
struct FrameSink {
    pending: Vec<i16>,
    samples_per_frame: usize,
    sample_rate: u32,
    channels: u16,
    buffer_ms: u64,
    frames_sent: u64,
    tx: mpsc::Sender<AudioFrame>,
}

impl FrameSink {
    fn new(config: &StreamConfig, buffer_ms: u64, tx: mpsc::Sender<AudioFrame>) -> Self {
        let sample_rate = config.sample_rate.0;
        let channels = config.channels.max(1);
        let samples_per_frame =
            ((u64::from(sample_rate) * buffer_ms.max(1) / 1000) as usize * usize::from(channels)).max(1);

        Self {
            pending: Vec::with_capacity(samples_per_frame),
            samples_per_frame,
            sample_rate,
            channels,
            buffer_ms,
            frames_sent: 0,
            tx,
        }
    }

    fn push(&mut self, sample: i16) {
        self.pending.push(sample);
        if self.pending.len() < self.samples_per_frame {
            return;
        }

        let samples = std::mem::replace(&mut self.pending, Vec::with_capacity(self.samples_per_frame));
        let frame = AudioFrame {
            samples,
            sample_rate: self.sample_rate,
            channels: self.channels,
            timestamp_ms: self.frames_sent * self.buffer_ms,
        };
        self.frames_sent += 1;

        if self.tx.try_send(frame).is_err() {
            warn!("Audio buffer full, dropping fragment {}", self.frames_sent);
        }
    }
}
