// Integration tests for the audio capture session
//
// A scripted microphone stands in for real hardware so that permission
// denial, stream ownership and disposal races can be exercised directly.

use anyhow::{bail, Result};
use avatar_companion::audio::{AudioBackend, AudioBackendConfig, AudioFrame, SilenceBackend};
use avatar_companion::capture::{AudioCaptureSession, RecorderState};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};

const TICK: Duration = Duration::from_millis(250);

/// Counts the streams a scripted microphone has handed out
#[derive(Clone, Default)]
struct StreamCounter {
    active: Arc<AtomicUsize>,
    opened: Arc<AtomicUsize>,
}

impl StreamCounter {
    fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

/// Microphone that replays a fixed set of fragments on every start
struct ScriptedMic {
    streams: StreamCounter,
    fragments: Vec<AudioFrame>,
    deny: bool,
    /// (permission requested, permission granted)
    prompt: Option<(Arc<Notify>, Arc<Notify>)>,
    tx: Option<mpsc::Sender<AudioFrame>>,
}

impl ScriptedMic {
    fn new(streams: &StreamCounter, fragment_count: usize) -> Self {
        let fragments = (0..fragment_count)
            .map(|i| AudioFrame {
                samples: vec![100; 1600],
                sample_rate: 16000,
                channels: 1,
                timestamp_ms: i as u64 * 100,
            })
            .collect();

        Self {
            streams: streams.clone(),
            fragments,
            deny: false,
            prompt: None,
            tx: None,
        }
    }

    fn denied(streams: &StreamCounter) -> Self {
        Self {
            deny: true,
            ..Self::new(streams, 0)
        }
    }
}

#[async_trait::async_trait]
impl AudioBackend for ScriptedMic {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>> {
        if let Some((requested, granted)) = &self.prompt {
            requested.notify_one();
            granted.notified().await;
        }
        if self.deny {
            bail!("Permission denied");
        }
        if self.tx.is_some() {
            bail!("Already capturing");
        }

        let (tx, rx) = mpsc::channel(64);
        for fragment in &self.fragments {
            tx.try_send(fragment.clone())?;
        }
        self.tx = Some(tx);
        self.streams.active.fetch_add(1, Ordering::SeqCst);
        self.streams.opened.fetch_add(1, Ordering::SeqCst);

        Ok(rx)
    }

    async fn stop(&mut self) -> Result<()> {
        if self.tx.take().is_some() {
            self.streams.active.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.tx.is_some()
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

#[tokio::test]
async fn test_double_start_keeps_one_stream() -> Result<()> {
    let streams = StreamCounter::default();
    let session = AudioCaptureSession::new(Box::new(ScriptedMic::new(&streams, 3)), TICK);

    assert_eq!(session.start().await, RecorderState::Recording);
    assert_eq!(session.start().await, RecorderState::Recording);
    assert_eq!(streams.opened(), 1, "Second start must not open another stream");
    assert_eq!(streams.active(), 1);

    let url = session.stop().await.expect("artifact from three fragments");
    assert_eq!(streams.active(), 0, "Stop releases the stream");
    assert!(!session.is_recording());

    let artifact = session.artifact().await.expect("artifact");
    assert_eq!(artifact.fragment_count, 3);
    assert_eq!(artifact.duration(), Duration::from_millis(300));
    assert_eq!(artifact.mime_type(), "audio/wav");
    assert!(session.registry().resolve(&url).is_some());

    let stats = session.stats().await;
    assert_eq!(stats.streams_opened, 1);
    assert_eq!(stats.artifacts_created, 1);
    assert_eq!(stats.fragments, 3);

    Ok(())
}

#[tokio::test]
async fn test_permission_denied_stays_inactive() {
    let streams = StreamCounter::default();
    let session = AudioCaptureSession::new(Box::new(ScriptedMic::denied(&streams)), TICK);

    assert_eq!(session.start().await, RecorderState::Inactive);
    assert!(!session.is_recording());
    assert_eq!(session.state(), RecorderState::Inactive);
    assert_eq!(streams.active(), 0);

    // Stop while inactive is a no-op
    assert!(session.stop().await.is_none());
    assert!(session.artifact().await.is_none());
}

#[tokio::test]
async fn test_stop_without_fragments_produces_nothing() {
    let streams = StreamCounter::default();
    let session = AudioCaptureSession::new(Box::new(ScriptedMic::new(&streams, 0)), TICK);

    assert_eq!(session.start().await, RecorderState::Recording);
    assert!(session.stop().await.is_none());

    assert!(session.artifact().await.is_none());
    assert!(session.playback_url().await.is_none());
    assert!(session.registry().is_empty());
    assert_eq!(streams.active(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_half_second_recording() -> Result<()> {
    let config = AudioBackendConfig {
        target_sample_rate: 16000,
        target_channels: 1,
        buffer_duration_ms: 20,
    };
    let session = AudioCaptureSession::new(Box::new(SilenceBackend::new(config)), TICK);

    assert_eq!(session.start().await, RecorderState::Recording);
    tokio::time::sleep(Duration::from_millis(500)).await;

    // Sampled on the tick while recording
    assert!(session.elapsed() >= TICK);

    let url = session.stop().await.expect("playback url");

    let elapsed = session.elapsed();
    assert!(
        elapsed >= Duration::from_millis(500) && elapsed <= Duration::from_millis(520),
        "elapsed {:?}",
        elapsed
    );

    let artifact = session.registry().resolve(&url).expect("registered artifact");
    let duration = artifact.duration();
    assert!(
        duration >= Duration::from_millis(480) && duration <= Duration::from_millis(540),
        "artifact duration {:?}",
        duration
    );
    assert_eq!(session.registry().len(), 1, "Exactly one playback URL");

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_zero_tick_still_samples_elapsed() {
    let session = AudioCaptureSession::new(
        Box::new(SilenceBackend::new(AudioBackendConfig::default())),
        Duration::ZERO,
    );

    assert_eq!(session.start().await, RecorderState::Recording);
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert!(session.is_recording());
    assert!(session.elapsed() > Duration::ZERO, "elapsed {:?}", session.elapsed());

    session.stop().await;
    assert!(session.elapsed() >= Duration::from_millis(300));
}

#[tokio::test(start_paused = true)]
async fn test_new_recording_revokes_previous_url() -> Result<()> {
    let streams = StreamCounter::default();
    let session = AudioCaptureSession::new(Box::new(ScriptedMic::new(&streams, 2)), TICK);

    session.start().await;
    let first = session.stop().await.expect("first url");

    assert_eq!(session.start().await, RecorderState::Recording);
    assert_eq!(session.elapsed(), Duration::ZERO, "Elapsed resets on start");
    let second = session.stop().await.expect("second url");

    assert_ne!(first, second);
    assert!(session.registry().resolve(&first).is_none(), "Previous URL revoked");
    assert!(session.registry().resolve(&second).is_some());
    assert_eq!(session.registry().len(), 1);
    assert_eq!(session.playback_url().await, Some(second));
    assert_eq!(streams.opened(), 2);

    Ok(())
}

#[tokio::test]
async fn test_dispose_revokes_url() -> Result<()> {
    let streams = StreamCounter::default();
    let session = AudioCaptureSession::new(Box::new(ScriptedMic::new(&streams, 1)), TICK);

    session.start().await;
    let url = session.stop().await.expect("url");

    session.dispose().await;

    assert!(session.registry().resolve(&url).is_none());
    assert!(session.playback_url().await.is_none());
    assert!(session.is_disposed());
    assert_eq!(session.start().await, RecorderState::Inactive, "Disposed sessions stay inactive");
    assert_eq!(streams.opened(), 1);

    Ok(())
}

#[tokio::test]
async fn test_dispose_while_recording_releases_everything() {
    let streams = StreamCounter::default();
    let session = AudioCaptureSession::new(Box::new(ScriptedMic::new(&streams, 2)), TICK);

    session.start().await;
    session.dispose().await;

    assert!(!session.is_recording());
    assert_eq!(streams.active(), 0);
    assert!(session.registry().is_empty());
}

#[tokio::test]
async fn test_dispose_during_permission_prompt_releases_stream() -> Result<()> {
    let streams = StreamCounter::default();
    let requested = Arc::new(Notify::new());
    let granted = Arc::new(Notify::new());

    let mut mic = ScriptedMic::new(&streams, 1);
    mic.prompt = Some((Arc::clone(&requested), Arc::clone(&granted)));
    let session = Arc::new(AudioCaptureSession::new(Box::new(mic), TICK));

    let starting = tokio::spawn({
        let session = Arc::clone(&session);
        async move { session.start().await }
    });
    requested.notified().await;

    let disposing = tokio::spawn({
        let session = Arc::clone(&session);
        async move { session.dispose().await }
    });
    while !session.is_disposed() {
        tokio::task::yield_now().await;
    }

    // Permission resolves after the session is gone
    granted.notify_one();

    assert_eq!(starting.await?, RecorderState::Inactive);
    disposing.await?;

    assert_eq!(streams.opened(), 1);
    assert_eq!(streams.active(), 0, "Late stream must be released");
    assert!(!session.is_recording());

    Ok(())
}
