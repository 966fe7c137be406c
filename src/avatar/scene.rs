use serde::{Deserialize, Serialize};
use std::f32::consts::PI;

use super::model::AvatarModel;

/// Plain 3-component vector (y-up, right-handed)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn length(self) -> f32 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    pub fn normalize(self) -> Self {
        let len = self.length();
        if len == 0.0 {
            return self;
        }
        self.scale(1.0 / len)
    }

    pub fn scale(self, s: f32) -> Self {
        Self::new(self.x * s, self.y * s, self.z * s)
    }

    pub fn add(self, other: Self) -> Self {
        Self::new(self.x + other.x, self.y + other.y, self.z + other.z)
    }

    pub fn sub(self, other: Self) -> Self {
        Self::new(self.x - other.x, self.y - other.y, self.z - other.z)
    }

    pub fn distance(self, other: Self) -> f32 {
        self.sub(other).length()
    }
}

/// Pixel dimensions of the surface the session draws into
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
    /// Device pixels per CSS pixel
    pub pixel_ratio: f32,
}

impl Viewport {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixel_ratio: 1.0,
        }
    }

    pub fn with_pixel_ratio(mut self, pixel_ratio: f32) -> Self {
        self.pixel_ratio = pixel_ratio;
        self
    }

    /// A surface with no area has nothing to draw into
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn aspect(&self) -> Option<f32> {
        if self.is_empty() {
            None
        } else {
            Some(self.width as f32 / self.height as f32)
        }
    }
}

/// Perspective camera with a column-major projection matrix
#[derive(Debug, Clone)]
pub struct PerspectiveCamera {
    /// Vertical field of view in degrees
    pub fov: f32,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
    pub position: Vec3,
    /// Point the camera looks at
    pub look_at: Vec3,
    projection: [f32; 16],
}

impl PerspectiveCamera {
    pub fn new(fov: f32, aspect: f32, near: f32, far: f32) -> Self {
        let mut camera = Self {
            fov,
            aspect,
            near,
            far,
            position: Vec3::default(),
            look_at: Vec3::default(),
            projection: [0.0; 16],
        };
        camera.update_projection_matrix();
        camera
    }

    /// Camera used by the avatar viewer: 35° fov, placed above and in front of the origin
    pub fn avatar_default(aspect: f32) -> Self {
        let mut camera = Self::new(35.0, aspect, 0.1, 1000.0);
        camera.position = Vec3::new(0.0, 1.3, 2.2);
        camera
    }

    pub fn update_projection_matrix(&mut self) {
        let f = 1.0 / (self.fov.to_radians() / 2.0).tan();
        let range_inv = 1.0 / (self.near - self.far);

        self.projection = [
            f / self.aspect, 0.0, 0.0, 0.0,
            0.0, f, 0.0, 0.0,
            0.0, 0.0, (self.near + self.far) * range_inv, -1.0,
            0.0, 0.0, 2.0 * self.near * self.far * range_inv, 0.0,
        ];
    }

    pub fn projection_matrix(&self) -> &[f32; 16] {
        &self.projection
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DirectionalLight {
    pub color: u32,
    pub intensity: f32,
    pub position: Vec3,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AmbientLight {
    pub color: u32,
    pub intensity: f32,
}

/// Everything the renderer draws for one session
pub struct Scene {
    pub key_light: DirectionalLight,
    pub ambient: AmbientLight,
    avatar: Option<AvatarModel>,
}

impl Scene {
    /// Scene with the avatar viewer's lighting rig and no avatar
    pub fn with_default_lighting() -> Self {
        Self {
            key_light: DirectionalLight {
                color: 0xffffff,
                intensity: PI,
                position: Vec3::new(1.0, 1.0, 1.0).normalize(),
            },
            ambient: AmbientLight {
                color: 0x404040,
                intensity: PI * 1.4,
            },
            avatar: None,
        }
    }

    pub fn attach_avatar(&mut self, model: AvatarModel) {
        self.avatar = Some(model);
    }

    pub fn detach_avatar(&mut self) -> Option<AvatarModel> {
        self.avatar.take()
    }

    pub fn avatar(&self) -> Option<&AvatarModel> {
        self.avatar.as_ref()
    }

    pub fn avatar_mut(&mut self) -> Option<&mut AvatarModel> {
        self.avatar.as_mut()
    }

    /// Lights plus the avatar, if attached
    pub fn object_count(&self) -> usize {
        2 + usize::from(self.avatar.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn viewport_aspect_guards_empty_surface() {
        assert_eq!(Viewport::new(800, 400).aspect(), Some(2.0));
        assert_eq!(Viewport::new(0, 400).aspect(), None);
        assert!(Viewport::new(800, 0).is_empty());
    }

    #[test]
    fn avatar_camera_defaults() {
        let camera = PerspectiveCamera::avatar_default(1.5);
        assert_eq!(camera.fov, 35.0);
        assert_eq!(camera.near, 0.1);
        assert_eq!(camera.far, 1000.0);
        assert_eq!(camera.position, Vec3::new(0.0, 1.3, 2.2));
    }

    #[test]
    fn projection_tracks_aspect() {
        let mut camera = PerspectiveCamera::avatar_default(1.0);
        let before = camera.projection_matrix()[0];
        camera.aspect = 2.0;
        camera.update_projection_matrix();
        let after = camera.projection_matrix()[0];
        assert!((before / after - 2.0).abs() < 1e-5);
    }

    #[test]
    fn key_light_direction_is_normalized() {
        let scene = Scene::with_default_lighting();
        assert!((scene.key_light.position.length() - 1.0).abs() < 1e-6);
        assert_eq!(scene.object_count(), 2);
    }
}
