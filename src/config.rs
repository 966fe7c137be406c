use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::audio::AudioBackendConfig;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub avatar: AvatarSettings,
    pub capture: CaptureSettings,
    pub preferences: PreferenceSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AvatarSettings {
    /// Static asset root the avatar path is resolved against
    pub asset_root: PathBuf,
    /// Avatar model path relative to the asset root
    pub asset_path: String,
    /// Display refresh rate driving the frame loop
    pub refresh_hz: u32,
    pub width: u32,
    pub height: u32,
    pub pixel_ratio: f32,
}

impl Default for AvatarSettings {
    fn default() -> Self {
        Self {
            asset_root: PathBuf::from("public"),
            asset_path: "/ananya.vrm".to_string(),
            refresh_hz: 60,
            width: 960,
            height: 560,
            pixel_ratio: 1.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
    pub sample_rate: u32,
    pub channels: u16,
    /// Size of each captured fragment in milliseconds
    pub buffer_duration_ms: u64,
    /// How often the running duration is sampled while recording
    pub duration_tick_ms: u64,
    pub recordings_path: PathBuf,
}

impl CaptureSettings {
    pub fn duration_tick(&self) -> Duration {
        Duration::from_millis(self.duration_tick_ms.max(1))
    }

    pub fn backend_config(&self) -> AudioBackendConfig {
        AudioBackendConfig {
            target_sample_rate: self.sample_rate,
            target_channels: self.channels,
            buffer_duration_ms: self.buffer_duration_ms,
        }
    }
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            channels: 1,
            buffer_duration_ms: 100,
            duration_tick_ms: 250,
            recordings_path: PathBuf::from("recordings"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PreferenceSettings {
    pub path: PathBuf,
}

impl Default for PreferenceSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from(".companion/preferences.json"),
        }
    }
}

impl Config {
    /// Load a required config file, with `COMPANION_SECTION__KEY` overrides
    pub fn load(path: &str) -> Result<Self> {
        Self::build(path, true)
    }

    /// Like [`Config::load`], but a missing file yields the defaults
    pub fn load_or_default(path: &str) -> Result<Self> {
        Self::build(path, false)
    }

    fn build(path: &str, required: bool) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(required))
            .add_source(config::Environment::with_prefix("COMPANION").separator("__"))
            .build()
            .with_context(|| format!("Failed to read config from {}", path))?;

        Ok(settings.try_deserialize()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let cfg = Config::load_or_default("does/not/exist/companion").unwrap();
        assert_eq!(cfg.avatar.asset_path, "/ananya.vrm");
        assert_eq!(cfg.avatar.refresh_hz, 60);
        assert_eq!(cfg.capture.duration_tick(), Duration::from_millis(250));
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("companion.toml");
        std::fs::write(&path, "[capture]\nsample_rate = 48000\n").unwrap();

        let cfg = Config::load(path.to_str().unwrap()).unwrap();
        assert_eq!(cfg.capture.sample_rate, 48000);
        assert_eq!(cfg.capture.channels, 1);
        assert_eq!(cfg.avatar.width, 960);
    }
}
