use anyhow::{bail, Result};
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::file::FileBackend;
use super::silence::SilenceBackend;

/// Audio sample data (16-bit PCM, interleaved)
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    /// Raw audio samples (i16 PCM, interleaved)
    pub samples: Vec<i16>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of channels
    pub channels: u16,
    /// Timestamp in milliseconds since recording started
    pub timestamp_ms: u64,
}

impl AudioFrame {
    /// Number of sample frames (one sample per channel)
    pub fn frame_count(&self) -> usize {
        self.samples.len() / usize::from(self.channels.max(1))
    }

    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_nanos(self.frame_count() as u64 * 1_000_000_000 / u64::from(self.sample_rate))
    }
}

/// Configuration for audio backend
#[derive(Debug, Clone)]
pub struct AudioBackendConfig {
    /// Target sample rate
    pub target_sample_rate: u32,
    /// Target channel count (1 = mono, 2 = stereo)
    pub target_channels: u16,
    /// Buffer size in milliseconds (one fragment per buffer)
    pub buffer_duration_ms: u64,
}

impl AudioBackendConfig {
    /// Interleaved samples in one buffer
    pub fn samples_per_buffer(&self) -> usize {
        let frames = u64::from(self.target_sample_rate) * self.buffer_duration_ms / 1000;
        frames as usize * usize::from(self.target_channels.max(1))
    }

    pub fn buffer_duration(&self) -> Duration {
        Duration::from_millis(self.buffer_duration_ms.max(1))
    }
}

impl Default for AudioBackendConfig {
    fn default() -> Self {
        Self {
            target_sample_rate: 16000, // 16kHz speech
            target_channels: 1,        // Mono
            buffer_duration_ms: 100,   // 100ms buffers
        }
    }
}

/// Audio capture backend trait
///
/// Implementations:
/// - Microphone: cpal input device (feature `microphone`)
/// - File: replay a WAV file in real time (for testing/demos)
/// - Silence: silent frames at the configured rate (dry runs without hardware)
#[async_trait::async_trait]
pub trait AudioBackend: Send + Sync {
    /// Start capturing audio
    ///
    /// Returns a channel receiver that will receive audio frames. Fails if
    /// the device is unavailable or access was denied.
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>>;

    /// Stop capturing audio and release the device
    ///
    /// Once this returns, no further frames are sent.
    async fn stop(&mut self) -> Result<()>;

    /// Check if backend is currently capturing
    fn is_capturing(&self) -> bool;

    /// Get backend name for logging
    fn name(&self) -> &str;
}

/// Audio backend factory
pub struct AudioBackendFactory;

impl AudioBackendFactory {
    /// Create audio backend based on platform and configuration
    pub fn create(source: AudioSource, config: AudioBackendConfig) -> Result<Box<dyn AudioBackend>> {
        match source {
            AudioSource::Microphone(device) => {
                #[cfg(feature = "microphone")]
                {
                    use super::microphone::CpalMicrophone;
                    Ok(Box::new(CpalMicrophone::new(device, config)))
                }

                #[cfg(not(feature = "microphone"))]
                {
                    let _ = (device, config);
                    bail!("Microphone capture requires building with the `microphone` feature")
                }
            }

            AudioSource::File(path) => Ok(Box::new(FileBackend::new(path, config))),

            AudioSource::Silence => Ok(Box::new(SilenceBackend::new(config))),
        }
    }
}

/// Audio source type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioSource {
    /// Microphone input, optionally a named device
    Microphone(Option<String>),
    /// File input (for testing/demos)
    File(String),
    /// Silent frames
    Silence,
}

impl FromStr for AudioSource {
    type Err = anyhow::Error;

    /// Parses `mic`, `mic:<device>`, `file:<path>` or `silence`
    fn from_str(s: &str) -> Result<Self> {
        match s.split_once(':') {
            None if s == "mic" => Ok(Self::Microphone(None)),
            None if s == "silence" => Ok(Self::Silence),
            Some(("mic", device)) if !device.is_empty() => Ok(Self::Microphone(Some(device.to_string()))),
            Some(("file", path)) if !path.is_empty() => Ok(Self::File(path.to_string())),
            _ => bail!("Unknown audio source '{}' (expected mic, mic:<device>, file:<path> or silence)", s),
        }
    }
}

/// Background task that emits frames at a fixed real-time pace
///
/// Shared by the replay backends. Stopping waits for the task, so the frame
/// sender is gone once `stop` returns.
pub(crate) struct PacedProducer {
    stop_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl PacedProducer {
    pub(crate) fn spawn<I>(frames: I, period: Duration, tx: mpsc::Sender<AudioFrame>) -> Self
    where
        I: Iterator<Item = AudioFrame> + Send + 'static,
    {
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            let mut sent = 0usize;

            for frame in frames {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = ticker.tick() => {}
                }

                if tx.send(frame).await.is_err() {
                    debug!("Frame receiver dropped after {} frames", sent);
                    break;
                }
                sent += 1;
            }

            debug!("Paced producer finished ({} frames)", sent);
        });

        Self {
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        }
    }

    pub(crate) async fn stop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                warn!("Paced producer panicked: {}", e);
            }
        }
    }
}
