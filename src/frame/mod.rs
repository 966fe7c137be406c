//! Frame-callback scheduling
//!
//! The render loop and anything else that runs "once per display refresh"
//! pull ticks from a [`FrameScheduler`]. Dropping the scheduler cancels any
//! pending callback, so owners release it before the state the ticks touch.

use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, Instant, Interval, MissedTickBehavior};
use tracing::debug;

/// Source of display frames
#[async_trait::async_trait]
pub trait FrameScheduler: Send {
    /// Wait for the next frame and return the time elapsed since the previous one
    ///
    /// Returns `None` once the scheduler will never produce another frame.
    async fn next_frame(&mut self) -> Option<Duration>;

    /// Get scheduler name for logging
    fn name(&self) -> &str;
}

/// Scheduler paced like a display refresh
///
/// Late ticks are skipped rather than bursted, so a stalled host produces one
/// long frame instead of a flood of short ones.
pub struct DisplayScheduler {
    ticker: Interval,
    last_frame: Instant,
}

impl DisplayScheduler {
    pub fn new(refresh_hz: u32) -> Self {
        let period = Duration::from_secs_f64(1.0 / f64::from(refresh_hz.max(1)));
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        debug!("Display scheduler at {}Hz ({:?} per frame)", refresh_hz, period);

        Self {
            ticker,
            last_frame: Instant::now(),
        }
    }
}

#[async_trait::async_trait]
impl FrameScheduler for DisplayScheduler {
    async fn next_frame(&mut self) -> Option<Duration> {
        let now = self.ticker.tick().await;
        let delta = now.saturating_duration_since(self.last_frame);
        self.last_frame = now;
        Some(delta)
    }

    fn name(&self) -> &str {
        "display"
    }
}

/// Scheduler driven explicitly by a [`ManualFrames`] handle
///
/// Useful for deterministic stepping and for hosts that own their own vsync.
pub struct ManualScheduler {
    frames: mpsc::UnboundedReceiver<Duration>,
}

/// Handle that pushes frames into a [`ManualScheduler`]
#[derive(Clone)]
pub struct ManualFrames {
    tx: mpsc::UnboundedSender<Duration>,
}

impl ManualScheduler {
    pub fn new() -> (Self, ManualFrames) {
        let (tx, frames) = mpsc::unbounded_channel();
        (Self { frames }, ManualFrames { tx })
    }
}

impl ManualFrames {
    /// Queue one frame with the given delta
    ///
    /// Returns false if the scheduler has been dropped.
    pub fn advance(&self, delta: Duration) -> bool {
        self.tx.send(delta).is_ok()
    }

    /// Queue `count` frames of equal delta
    pub fn advance_many(&self, count: usize, delta: Duration) -> bool {
        (0..count).all(|_| self.advance(delta))
    }

    /// Whether the scheduler on the other end is still alive
    pub fn is_attached(&self) -> bool {
        !self.tx.is_closed()
    }
}

#[async_trait::async_trait]
impl FrameScheduler for ManualScheduler {
    async fn next_frame(&mut self) -> Option<Duration> {
        self.frames.recv().await
    }

    fn name(&self) -> &str {
        "manual"
    }
}
