use anyhow::{bail, Context, Result};
use hound::WavReader;
use std::path::Path;
use tokio::sync::mpsc;
use tracing::info;

use super::backend::{AudioBackend, AudioBackendConfig, AudioFrame, PacedProducer};

pub struct AudioFile {
    pub path: String,
    pub duration_seconds: f64,
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Vec<i16>,
}

impl AudioFile {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening audio file: {}", path.display());

        let reader = WavReader::open(path)
            .context("Failed to open WAV file")?;

        let spec = reader.spec();
        if spec.sample_format != hound::SampleFormat::Int || spec.bits_per_sample != 16 {
            bail!(
                "Expected 16-bit PCM WAV, got {}-bit {:?}",
                spec.bits_per_sample,
                spec.sample_format
            );
        }

        let samples: Vec<i16> = reader
            .into_samples::<i16>()
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to read audio samples")?;

        let duration_seconds = samples.len() as f64 /
            (spec.sample_rate as f64 * spec.channels as f64);

        info!(
            "Audio file loaded: {:.1}s, {}Hz, {} channels, {} samples",
            duration_seconds,
            spec.sample_rate,
            spec.channels,
            samples.len()
        );

        Ok(Self {
            path: path.display().to_string(),
            duration_seconds,
            sample_rate: spec.sample_rate,
            channels: spec.channels,
            samples,
        })
    }

    /// Split into consecutive frames of `frame_ms` (the last one may be short)
    pub fn into_frames(self, frame_ms: u64) -> Vec<AudioFrame> {
        let channels = usize::from(self.channels.max(1));
        let per_frame = (u64::from(self.sample_rate) * frame_ms.max(1) / 1000) as usize * channels;
        let per_frame = per_frame.max(channels);

        self.samples
            .chunks(per_frame)
            .enumerate()
            .map(|(i, chunk)| AudioFrame {
                samples: chunk.to_vec(),
                sample_rate: self.sample_rate,
                channels: self.channels,
                timestamp_ms: i as u64 * frame_ms,
            })
            .collect()
    }
}

/// Replays a WAV file as if it were a live input
///
/// Frames keep the file's own sample rate and channel count. The file is read
/// on `start`, so a missing file fails the same way an absent device does.
pub struct FileBackend {
    path: String,
    config: AudioBackendConfig,
    producer: Option<PacedProducer>,
}

impl FileBackend {
    pub fn new(path: impl Into<String>, config: AudioBackendConfig) -> Self {
        Self {
            path: path.into(),
            config,
            producer: None,
        }
    }
}

#[async_trait::async_trait]
impl AudioBackend for FileBackend {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>> {
        if self.producer.is_some() {
            bail!("Already capturing");
        }

        let path = self.path.clone();
        let file = tokio::task::spawn_blocking(move || AudioFile::open(path))
            .await
            .context("Audio file reader panicked")??;

        if file.sample_rate != self.config.target_sample_rate || file.channels != self.config.target_channels {
            info!(
                "Replaying {} at its native {}Hz/{}ch (target {}Hz/{}ch)",
                file.path,
                file.sample_rate,
                file.channels,
                self.config.target_sample_rate,
                self.config.target_channels
            );
        }

        let frames = file.into_frames(self.config.buffer_duration_ms);
        let (tx, rx) = mpsc::channel(64);
        self.producer = Some(PacedProducer::spawn(
            frames.into_iter(),
            self.config.buffer_duration(),
            tx,
        ));

        Ok(rx)
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(mut producer) = self.producer.take() {
            producer.stop().await;
            info!("File replay stopped: {}", self.path);
        }
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.producer.is_some()
    }

    fn name(&self) -> &str {
        "file"
    }
}
