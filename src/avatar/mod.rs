//! Avatar render session
//!
//! This module provides the `AvatarSession` abstraction that manages:
//! - Scene, perspective camera, lighting rig and damped orbit controls
//! - Asynchronous avatar (GLB/VRM) loading with graceful failure
//! - The per-frame loop: animation, lip-sync, controls, render
//! - Ordered teardown of the scheduler, controls and renderer

pub mod controls;
pub mod lip_sync;
pub mod loader;
pub mod model;
pub mod renderer;
pub mod scene;
mod session;

pub use controls::OrbitControls;
pub use lip_sync::{LipSync, LIP_SYNC_RATE, MOUTH_OPEN_EXPRESSION};
pub use loader::{AssetSource, FsAssetSource, MemoryAssetSource, ModelLoader};
pub use model::{AvatarModel, ExpressionManager, Skin};
pub use renderer::{HeadlessRenderer, HeadlessStats, Renderer};
pub use scene::{AmbientLight, DirectionalLight, PerspectiveCamera, Scene, Vec3, Viewport};
pub use session::{AvatarOptions, AvatarSession, FrameSnapshot, LoadState, RenderStats};
