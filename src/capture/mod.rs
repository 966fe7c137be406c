//! Audio capture session
//!
//! Records microphone fragments into a single WAV artifact and exposes it
//! through a revocable playback URL.

pub mod artifact;
pub mod playback;
pub mod session;

pub use artifact::{AudioArtifact, ARTIFACT_MIME};
pub use playback::{PlaybackRegistry, PlaybackUrl};
pub use session::{AudioCaptureSession, CaptureStats, RecorderState};
