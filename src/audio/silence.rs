use anyhow::{bail, Result};
use tokio::sync::mpsc;
use tracing::info;

use super::backend::{AudioBackend, AudioBackendConfig, AudioFrame, PacedProducer};

/// Emits silent frames at the configured rate until stopped
pub struct SilenceBackend {
    config: AudioBackendConfig,
    producer: Option<PacedProducer>,
}

impl SilenceBackend {
    pub fn new(config: AudioBackendConfig) -> Self {
        Self {
            config,
            producer: None,
        }
    }
}

#[async_trait::async_trait]
impl AudioBackend for SilenceBackend {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>> {
        if self.producer.is_some() {
            bail!("Already capturing");
        }

        let samples = self.config.samples_per_buffer();
        let sample_rate = self.config.target_sample_rate;
        let channels = self.config.target_channels;
        let buffer_ms = self.config.buffer_duration_ms;

        let frames = (0u64..).map(move |i| AudioFrame {
            samples: vec![0; samples],
            sample_rate,
            channels,
            timestamp_ms: i * buffer_ms,
        });

        let (tx, rx) = mpsc::channel(64);
        self.producer = Some(PacedProducer::spawn(frames, self.config.buffer_duration(), tx));

        info!("Silence capture started ({}Hz, {} channels)", sample_rate, channels);

        Ok(rx)
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(mut producer) = self.producer.take() {
            producer.stop().await;
            info!("Silence capture stopped");
        }
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.producer.is_some()
    }

    fn name(&self) -> &str {
        "silence"
    }
}
