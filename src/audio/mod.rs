pub mod backend;
pub mod file;
pub mod silence;

#[cfg(feature = "microphone")]
pub mod microphone;

pub use backend::{AudioBackend, AudioBackendConfig, AudioBackendFactory, AudioFrame, AudioSource};
pub use file::{AudioFile, FileBackend};
pub use silence::SilenceBackend;

#[cfg(feature = "microphone")]
pub use microphone::CpalMicrophone;
