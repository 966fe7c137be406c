// Tests for the audio backend abstractions
//
// These tests cover the frame and config types plus the replay backends
// that stand in for a microphone.

use anyhow::Result;
use avatar_companion::audio::{
    AudioBackend, AudioBackendConfig, AudioBackendFactory, AudioFrame, AudioSource, SilenceBackend,
};
use std::time::Duration;

#[test]
fn test_audio_frame_stereo_interleaved() {
    // Stereo audio: samples should be interleaved [L, R, L, R, ...]
    let frame = AudioFrame {
        samples: vec![100, 200, 150, 250, 175, 275], // 3 frames, 2 channels
        sample_rate: 44100,
        channels: 2,
        timestamp_ms: 0,
    };

    assert_eq!(frame.samples.len(), 6);
    assert_eq!(frame.frame_count(), 3);
}

#[test]
fn test_audio_frame_duration() {
    let frame = AudioFrame {
        samples: vec![0i16; 1600], // 100ms at 16kHz
        sample_rate: 16000,
        channels: 1,
        timestamp_ms: 0,
    };

    assert_eq!(frame.duration(), Duration::from_millis(100));
}

#[test]
fn test_audio_frame_zero_rate_has_no_duration() {
    let frame = AudioFrame {
        samples: vec![0i16; 10],
        sample_rate: 0,
        channels: 1,
        timestamp_ms: 0,
    };

    assert_eq!(frame.duration(), Duration::ZERO);
}

#[test]
fn test_audio_backend_config_default() {
    let config = AudioBackendConfig::default();

    assert_eq!(config.target_sample_rate, 16000, "Default should be 16kHz");
    assert_eq!(config.target_channels, 1, "Default should be mono");
    assert_eq!(config.buffer_duration_ms, 100, "Default buffer should be 100ms");
    assert_eq!(config.buffer_duration(), Duration::from_millis(100));
}

#[test]
fn test_factory_creates_replay_backends() -> Result<()> {
    let silence = AudioBackendFactory::create(AudioSource::Silence, AudioBackendConfig::default())?;
    assert_eq!(silence.name(), "silence");
    assert!(!silence.is_capturing());

    let file = AudioBackendFactory::create(
        AudioSource::File("take.wav".to_string()),
        AudioBackendConfig::default(),
    )?;
    assert_eq!(file.name(), "file");

    Ok(())
}

#[cfg(not(feature = "microphone"))]
#[test]
fn test_factory_rejects_microphone_without_feature() {
    let result = AudioBackendFactory::create(AudioSource::Microphone(None), AudioBackendConfig::default());
    assert!(result.is_err(), "Microphone needs the `microphone` feature");
}

#[tokio::test(start_paused = true)]
async fn test_silence_backend_paces_frames() -> Result<()> {
    let config = AudioBackendConfig {
        target_sample_rate: 16000,
        target_channels: 1,
        buffer_duration_ms: 20,
    };
    let mut backend = SilenceBackend::new(config);

    let mut rx = backend.start().await?;
    assert!(backend.is_capturing());
    assert!(backend.start().await.is_err(), "Second start should fail");

    let first = rx.recv().await.expect("first frame");
    let second = rx.recv().await.expect("second frame");

    assert_eq!(first.samples.len(), 320);
    assert!(first.samples.iter().all(|&s| s == 0));
    assert_eq!(first.timestamp_ms, 0);
    assert_eq!(second.timestamp_ms, 20);

    backend.stop().await?;
    assert!(!backend.is_capturing());

    // Producer is gone: the channel drains and closes
    while rx.recv().await.is_some() {}

    Ok(())
}
