use anyhow::{bail, Result};
use serde::Serialize;
use tracing::debug;

use super::scene::{PerspectiveCamera, Scene};

/// Draws a scene into the mounted surface
///
/// Implementations own their GPU (or other) resources and must release them
/// in `dispose`. Rendering after `dispose` is an error, never a crash.
pub trait Renderer: Send {
    fn set_pixel_ratio(&mut self, ratio: f32);

    /// Resize the output, in CSS pixels
    fn set_size(&mut self, width: u32, height: u32);

    fn render(&mut self, scene: &Scene, camera: &PerspectiveCamera) -> Result<()>;

    fn dispose(&mut self);

    /// Get renderer name for logging
    fn name(&self) -> &str;
}

/// What a [`HeadlessRenderer`] has drawn so far
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HeadlessStats {
    pub frames: u64,
    pub frames_with_avatar: u64,
    /// Output size in device pixels
    pub drawing_buffer: (u32, u32),
    pub disposed: bool,
}

/// Renderer without an output device
///
/// Tracks what would have been drawn. Used for servers, CI and dry runs.
#[derive(Debug, Default)]
pub struct HeadlessRenderer {
    pixel_ratio: f32,
    size: (u32, u32),
    stats: HeadlessStats,
}

impl HeadlessRenderer {
    pub fn new() -> Self {
        Self {
            pixel_ratio: 1.0,
            ..Self::default()
        }
    }

    pub fn stats(&self) -> &HeadlessStats {
        &self.stats
    }

    fn update_drawing_buffer(&mut self) {
        let scale = |v: u32| (v as f32 * self.pixel_ratio).round() as u32;
        self.stats.drawing_buffer = (scale(self.size.0), scale(self.size.1));
    }
}

impl Renderer for HeadlessRenderer {
    fn set_pixel_ratio(&mut self, ratio: f32) {
        if ratio.is_finite() && ratio > 0.0 {
            self.pixel_ratio = ratio;
            self.update_drawing_buffer();
        }
    }

    fn set_size(&mut self, width: u32, height: u32) {
        self.size = (width, height);
        self.update_drawing_buffer();
    }

    fn render(&mut self, scene: &Scene, _camera: &PerspectiveCamera) -> Result<()> {
        if self.stats.disposed {
            bail!("Renderer used after dispose");
        }
        self.stats.frames += 1;
        if scene.avatar().is_some() {
            self.stats.frames_with_avatar += 1;
        }
        Ok(())
    }

    fn dispose(&mut self) {
        if !self.stats.disposed {
            debug!("Headless renderer disposed after {} frames", self.stats.frames);
        }
        self.stats.disposed = true;
    }

    fn name(&self) -> &str {
        "headless"
    }
}
