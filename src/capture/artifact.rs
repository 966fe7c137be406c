use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::io::Cursor;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

use crate::audio::AudioFrame;

pub const ARTIFACT_MIME: &str = "audio/wav";

/// A finished recording: every fragment of one capture, concatenated
#[derive(Debug, Clone)]
pub struct AudioArtifact {
    /// WAV-encoded payload
    bytes: Vec<u8>,
    pub sample_rate: u32,
    pub channels: u16,
    /// Interleaved samples across all fragments
    pub sample_count: usize,
    pub fragment_count: usize,
    pub recorded_at: DateTime<Utc>,
}

impl AudioArtifact {
    /// Concatenate fragments into one WAV payload
    ///
    /// Returns `None` for an empty fragment sequence. Fragments whose format
    /// differs from the first one are skipped.
    pub fn from_fragments(fragments: &[AudioFrame]) -> Result<Option<Self>> {
        let Some(first) = fragments.first() else {
            return Ok(None);
        };

        let spec = hound::WavSpec {
            channels: first.channels,
            sample_rate: first.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let mut cursor = Cursor::new(Vec::new());
        let mut sample_count = 0;
        let mut fragment_count = 0;
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec)
                .context("Failed to create WAV encoder")?;

            for fragment in fragments {
                if fragment.sample_rate != spec.sample_rate || fragment.channels != spec.channels {
                    warn!(
                        "Skipping fragment at {}ms: {}Hz/{}ch does not match {}Hz/{}ch",
                        fragment.timestamp_ms,
                        fragment.sample_rate,
                        fragment.channels,
                        spec.sample_rate,
                        spec.channels
                    );
                    continue;
                }

                for &sample in &fragment.samples {
                    writer.write_sample(sample)
                        .context("Failed to write sample to WAV")?;
                }
                sample_count += fragment.samples.len();
                fragment_count += 1;
            }

            writer.finalize()
                .context("Failed to finalize WAV payload")?;
        }

        Ok(Some(Self {
            bytes: cursor.into_inner(),
            sample_rate: spec.sample_rate,
            channels: spec.channels,
            sample_count,
            fragment_count,
            recorded_at: Utc::now(),
        }))
    }

    pub fn duration(&self) -> Duration {
        let frames = self.sample_count / usize::from(self.channels.max(1));
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_nanos(frames as u64 * 1_000_000_000 / u64::from(self.sample_rate))
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn mime_type(&self) -> &'static str {
        ARTIFACT_MIME
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .context("Failed to create output directory")?;
        }
        std::fs::write(path, &self.bytes)
            .with_context(|| format!("Failed to write recording to {}", path.display()))?;

        info!(
            "Saved recording: {} ({:.1}s, {} bytes)",
            path.display(),
            self.duration().as_secs_f64(),
            self.bytes.len()
        );

        Ok(())
    }
}
