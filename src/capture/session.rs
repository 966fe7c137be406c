use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::artifact::AudioArtifact;
use super::playback::{PlaybackRegistry, PlaybackUrl};
use crate::audio::{AudioBackend, AudioBackendFactory, AudioFrame, AudioSource};
use crate::config::CaptureSettings;

/// Recorder lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RecorderState {
    Inactive,
    Recording,
}

/// Statistics about a capture session
#[derive(Debug, Clone, Serialize)]
pub struct CaptureStats {
    pub state: RecorderState,

    /// Duration of the current (or last) recording
    pub elapsed_ms: u64,

    /// Fragments collected by the current (or last) recording
    pub fragments: usize,

    /// Microphone streams successfully opened over the session's lifetime
    pub streams_opened: usize,

    /// Artifacts produced over the session's lifetime
    pub artifacts_created: usize,

    /// When the current (or last) recording started
    pub started_at: Option<DateTime<Utc>>,
}

/// Microphone-to-artifact recording pipeline
///
/// `start`, `stop` and `dispose` are serialized on one lock that also guards
/// the backend, so a session never owns more than one live stream. Failures
/// are logged and surface only as state.
pub struct AudioCaptureSession {
    inner: Mutex<CaptureInner>,

    /// Whether recording is currently active
    is_recording: Arc<AtomicBool>,

    /// Set once the session is disposed; late starts release their stream
    disposed: AtomicBool,

    /// Running duration, sampled on every tick
    elapsed_ms: Arc<AtomicU64>,

    /// Fragments collected by the current recording
    fragments: Arc<AtomicUsize>,

    registry: PlaybackRegistry,
    duration_tick: Duration,
}

struct CaptureInner {
    backend: Box<dyn AudioBackend>,
    collector: Option<Collector>,
    ticker: Option<Ticker>,
    started_at: Option<Instant>,
    started_wall: Option<DateTime<Utc>>,
    artifact: Option<Arc<AudioArtifact>>,
    playback_url: Option<PlaybackUrl>,
    streams_opened: usize,
    artifacts_created: usize,
}

impl AudioCaptureSession {
    /// Create a session over a backend, with its own playback registry
    pub fn new(backend: Box<dyn AudioBackend>, duration_tick: Duration) -> Self {
        Self::with_registry(backend, duration_tick, PlaybackRegistry::new())
    }

    /// Create a session for an audio source using the configured format
    pub fn from_settings(source: AudioSource, settings: &CaptureSettings) -> anyhow::Result<Self> {
        let backend = AudioBackendFactory::create(source, settings.backend_config())?;
        Ok(Self::new(backend, settings.duration_tick()))
    }

    /// Create a session that registers playback URLs in a shared registry
    pub fn with_registry(
        backend: Box<dyn AudioBackend>,
        duration_tick: Duration,
        registry: PlaybackRegistry,
    ) -> Self {
        info!("Creating capture session on {} backend", backend.name());

        Self {
            inner: Mutex::new(CaptureInner {
                backend,
                collector: None,
                ticker: None,
                started_at: None,
                started_wall: None,
                artifact: None,
                playback_url: None,
                streams_opened: 0,
                artifacts_created: 0,
            }),
            is_recording: Arc::new(AtomicBool::new(false)),
            disposed: AtomicBool::new(false),
            elapsed_ms: Arc::new(AtomicU64::new(0)),
            fragments: Arc::new(AtomicUsize::new(0)),
            registry,
            // Interval periods must be non-zero
            duration_tick: duration_tick.max(Duration::from_millis(1)),
        }
    }

    /// Start recording
    ///
    /// Denied or missing microphones leave the session inactive. Calling
    /// this while already recording does nothing.
    pub async fn start(&self) -> RecorderState {
        if self.disposed.load(Ordering::SeqCst) {
            warn!("Capture session disposed; ignoring start");
            return RecorderState::Inactive;
        }

        let mut inner = self.inner.lock().await;

        if self.is_recording.load(Ordering::SeqCst) {
            warn!("Recording already started");
            return RecorderState::Recording;
        }

        info!("Requesting microphone from {} backend", inner.backend.name());

        let audio_rx = match inner.backend.start().await {
            Ok(rx) => rx,
            Err(e) => {
                error!("Mic permission/recording failed: {:#}", e);
                if let Err(e) = inner.backend.stop().await {
                    error!("Failed to release audio backend: {:#}", e);
                }
                return RecorderState::Inactive;
            }
        };

        // The permission prompt may outlive the session
        if self.disposed.load(Ordering::SeqCst) {
            warn!("Capture session disposed during permission request; releasing stream");
            if let Err(e) = inner.backend.stop().await {
                error!("Failed to release audio backend: {:#}", e);
            }
            return RecorderState::Inactive;
        }

        let started_at = Instant::now();
        inner.started_at = Some(started_at);
        inner.started_wall = Some(Utc::now());
        inner.streams_opened += 1;
        self.elapsed_ms.store(0, Ordering::SeqCst);
        self.fragments.store(0, Ordering::SeqCst);

        inner.collector = Some(Collector::spawn(audio_rx, Arc::clone(&self.fragments)));
        inner.ticker = Some(Ticker::spawn(
            started_at,
            self.duration_tick,
            Arc::clone(&self.elapsed_ms),
        ));

        self.is_recording.store(true, Ordering::SeqCst);

        info!("Recording started");

        RecorderState::Recording
    }

    /// Stop recording and finalize the artifact
    ///
    /// Returns the playback URL of the new artifact, or `None` if nothing was
    /// recording or no fragments arrived. The previous artifact's URL is
    /// revoked when a new one is produced.
    pub async fn stop(&self) -> Option<PlaybackUrl> {
        let mut inner = self.inner.lock().await;

        if !self.is_recording.load(Ordering::SeqCst) {
            debug!("Recording not active");
            return None;
        }

        info!("Stopping recording");

        // Mark as stopped and cancel the duration tick first
        self.is_recording.store(false, Ordering::SeqCst);
        if let Some(ticker) = inner.ticker.take() {
            ticker.stop().await;
        }
        if let Some(started_at) = inner.started_at {
            self.elapsed_ms
                .store(started_at.elapsed().as_millis() as u64, Ordering::SeqCst);
        }

        // Stop the device; it sends nothing after this returns
        if let Err(e) = inner.backend.stop().await {
            error!("Failed to stop audio backend: {:#}", e);
        }

        let fragments = match inner.collector.take() {
            Some(collector) => collector.finish().await,
            None => Vec::new(),
        };

        let artifact = match AudioArtifact::from_fragments(&fragments) {
            Ok(Some(artifact)) => Arc::new(artifact),
            Ok(None) => {
                info!("Recording stopped with no audio; no artifact produced");
                return None;
            }
            Err(e) => {
                error!("Failed to finalize recording: {:#}", e);
                return None;
            }
        };

        let url = self.registry.create(Arc::clone(&artifact));
        if let Some(previous) = inner.playback_url.replace(url.clone()) {
            self.registry.revoke(&previous);
        }
        inner.artifact = Some(Arc::clone(&artifact));
        inner.artifacts_created += 1;

        info!(
            "Recording finalized: {:.2}s in {} fragments ({})",
            artifact.duration().as_secs_f64(),
            artifact.fragment_count,
            url
        );

        Some(url)
    }

    /// Stop if recording and release the outstanding playback URL
    pub async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }

        info!("Disposing capture session");

        self.stop().await;

        let mut inner = self.inner.lock().await;
        if let Some(url) = inner.playback_url.take() {
            self.registry.revoke(&url);
        }
        inner.artifact = None;
    }

    pub fn state(&self) -> RecorderState {
        if self.is_recording() {
            RecorderState::Recording
        } else {
            RecorderState::Inactive
        }
    }

    pub fn is_recording(&self) -> bool {
        self.is_recording.load(Ordering::SeqCst)
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Running duration as of the last tick (exact once stopped)
    pub fn elapsed(&self) -> Duration {
        Duration::from_millis(self.elapsed_ms.load(Ordering::SeqCst))
    }

    pub async fn artifact(&self) -> Option<Arc<AudioArtifact>> {
        self.inner.lock().await.artifact.clone()
    }

    pub async fn playback_url(&self) -> Option<PlaybackUrl> {
        self.inner.lock().await.playback_url.clone()
    }

    pub fn registry(&self) -> &PlaybackRegistry {
        &self.registry
    }

    /// Get current session statistics
    pub async fn stats(&self) -> CaptureStats {
        let inner = self.inner.lock().await;

        CaptureStats {
            state: self.state(),
            elapsed_ms: self.elapsed_ms.load(Ordering::SeqCst),
            fragments: self.fragments.load(Ordering::SeqCst),
            streams_opened: inner.streams_opened,
            artifacts_created: inner.artifacts_created,
            started_at: inner.started_wall,
        }
    }
}

/// Collects fragments until told to stop, then drains what is buffered
struct Collector {
    stop_tx: oneshot::Sender<()>,
    handle: JoinHandle<Vec<AudioFrame>>,
}

impl Collector {
    fn spawn(mut audio_rx: mpsc::Receiver<AudioFrame>, counter: Arc<AtomicUsize>) -> Self {
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            let mut chunks = Vec::new();
            let keep = |frame: AudioFrame, chunks: &mut Vec<AudioFrame>| {
                if !frame.samples.is_empty() {
                    counter.fetch_add(1, Ordering::SeqCst);
                    chunks.push(frame);
                }
            };

            loop {
                tokio::select! {
                    biased;

                    frame = audio_rx.recv() => match frame {
                        Some(frame) => keep(frame, &mut chunks),
                        None => break,
                    },

                    _ = &mut stop_rx => {
                        while let Ok(frame) = audio_rx.try_recv() {
                            keep(frame, &mut chunks);
                        }
                        break;
                    }
                }
            }

            debug!("Collector finished with {} fragments", chunks.len());
            chunks
        });

        Self { stop_tx, handle }
    }

    async fn finish(self) -> Vec<AudioFrame> {
        let _ = self.stop_tx.send(());
        match self.handle.await {
            Ok(chunks) => chunks,
            Err(e) => {
                error!("Fragment collector panicked: {}", e);
                Vec::new()
            }
        }
    }
}

/// Samples the running duration on a fixed period
struct Ticker {
    stop_tx: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl Ticker {
    fn spawn(started_at: Instant, period: Duration, elapsed_ms: Arc<AtomicU64>) -> Self {
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = ticker.tick() => {
                        elapsed_ms.store(started_at.elapsed().as_millis() as u64, Ordering::SeqCst);
                    }
                }
            }
        });

        Self { stop_tx, handle }
    }

    async fn stop(self) {
        let _ = self.stop_tx.send(());
        if let Err(e) = self.handle.await {
            error!("Duration ticker panicked: {}", e);
        }
    }
}
