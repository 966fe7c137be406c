pub mod audio;
pub mod avatar;
pub mod capture;
pub mod config;
pub mod frame;
pub mod preferences;

pub use audio::{AudioBackend, AudioBackendConfig, AudioBackendFactory, AudioFile, AudioFrame, AudioSource};
pub use avatar::{AvatarOptions, AvatarSession, FrameSnapshot, LoadState, RenderStats, Viewport};
pub use capture::{AudioArtifact, AudioCaptureSession, CaptureStats, PlaybackRegistry, PlaybackUrl, RecorderState};
pub use config::Config;
pub use frame::{DisplayScheduler, FrameScheduler, ManualFrames, ManualScheduler};
pub use preferences::PreferenceStore;
