use std::f32::consts::PI;
use tracing::debug;

use super::scene::{PerspectiveCamera, Vec3};

const EPS: f32 = 1e-6;

/// Orbit-style camera controller with optional damping
///
/// Input (`rotate`, `dolly`) accumulates into a pending delta; each `update`
/// applies part of it to the camera. With damping enabled the remainder
/// decays geometrically, so motion eases out over several frames.
#[derive(Debug, Clone)]
pub struct OrbitControls {
    pub target: Vec3,
    pub enable_damping: bool,
    pub damping_factor: f32,
    pub min_distance: f32,
    pub max_distance: f32,
    pending_theta: f32,
    pending_phi: f32,
    pending_scale: f32,
    disposed: bool,
}

impl OrbitControls {
    pub fn new(target: Vec3) -> Self {
        Self {
            target,
            enable_damping: false,
            damping_factor: 0.05,
            min_distance: 0.0,
            max_distance: f32::INFINITY,
            pending_theta: 0.0,
            pending_phi: 0.0,
            pending_scale: 1.0,
            disposed: false,
        }
    }

    /// Controls used by the avatar viewer: damped, aimed slightly above the origin
    pub fn avatar_default() -> Self {
        let mut controls = Self::new(Vec3::new(0.0, 1.05, 0.0));
        controls.enable_damping = true;
        controls
    }

    /// Queue a rotation around the target (radians)
    pub fn rotate(&mut self, theta: f32, phi: f32) {
        if self.disposed {
            return;
        }
        self.pending_theta += theta;
        self.pending_phi += phi;
    }

    /// Queue a zoom; `scale > 1` moves away from the target
    pub fn dolly(&mut self, scale: f32) {
        if self.disposed || scale <= 0.0 {
            return;
        }
        self.pending_scale *= scale;
    }

    /// Apply pending motion to the camera
    ///
    /// Returns true if the camera moved.
    pub fn update(&mut self, camera: &mut PerspectiveCamera) -> bool {
        if self.disposed {
            return false;
        }

        let offset = camera.position.sub(self.target);
        let mut radius = offset.length();
        let mut theta = offset.x.atan2(offset.z);
        let mut phi = if radius > 0.0 {
            (offset.y / radius).clamp(-1.0, 1.0).acos()
        } else {
            0.0
        };

        let (step, scale_step) = if self.enable_damping {
            (self.damping_factor, 1.0 + (self.pending_scale - 1.0) * self.damping_factor)
        } else {
            (1.0, self.pending_scale)
        };

        theta += self.pending_theta * step;
        phi += self.pending_phi * step;
        phi = phi.clamp(EPS, PI - EPS);
        radius = (radius * scale_step).clamp(self.min_distance, self.max_distance);

        let sin_phi_radius = phi.sin() * radius;
        let new_offset = Vec3::new(
            sin_phi_radius * theta.sin(),
            phi.cos() * radius,
            sin_phi_radius * theta.cos(),
        );

        let previous = camera.position;
        camera.position = self.target.add(new_offset);
        camera.look_at = self.target;

        if self.enable_damping {
            self.pending_theta *= 1.0 - self.damping_factor;
            self.pending_phi *= 1.0 - self.damping_factor;
            self.pending_scale = 1.0 + (self.pending_scale - 1.0) * (1.0 - self.damping_factor);
        } else {
            self.pending_theta = 0.0;
            self.pending_phi = 0.0;
            self.pending_scale = 1.0;
        }

        previous.distance(camera.position) > EPS
    }

    /// Detach from input; later updates are no-ops
    pub fn dispose(&mut self) {
        if !self.disposed {
            debug!("Orbit controls disposed");
        }
        self.disposed = true;
        self.pending_theta = 0.0;
        self.pending_phi = 0.0;
        self.pending_scale = 1.0;
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn camera() -> PerspectiveCamera {
        PerspectiveCamera::avatar_default(1.0)
    }

    #[test]
    fn idle_update_keeps_camera_still() {
        let mut controls = OrbitControls::avatar_default();
        let mut camera = camera();
        let start = camera.position;

        controls.update(&mut camera);

        assert!(start.distance(camera.position) < 1e-4);
        assert_eq!(camera.look_at, Vec3::new(0.0, 1.05, 0.0));
    }

    #[test]
    fn damping_spreads_rotation_over_frames() {
        let mut controls = OrbitControls::avatar_default();
        let mut camera = camera();
        let radius = camera.position.distance(controls.target);

        controls.rotate(0.5, 0.0);
        assert!(controls.update(&mut camera));
        let after_one = camera.position;

        // Still easing out
        assert!(controls.update(&mut camera));
        assert!(after_one.distance(camera.position) > 0.0);

        // Orbiting keeps the distance to the target
        assert!((camera.position.distance(controls.target) - radius).abs() < 1e-4);
    }

    #[test]
    fn dolly_respects_distance_limits() {
        let mut controls = OrbitControls::new(Vec3::new(0.0, 1.05, 0.0));
        controls.min_distance = 1.0;
        controls.max_distance = 3.0;
        let mut camera = camera();

        controls.dolly(0.1);
        assert!(controls.update(&mut camera));
        assert!((camera.position.distance(controls.target) - 1.0).abs() < 1e-4);

        controls.dolly(10.0);
        controls.update(&mut camera);
        assert!((camera.position.distance(controls.target) - 3.0).abs() < 1e-4);

        // Non-positive scales are ignored
        controls.dolly(0.0);
        controls.dolly(-2.0);
        controls.update(&mut camera);
        assert!((camera.position.distance(controls.target) - 3.0).abs() < 1e-4);
    }

    #[test]
    fn disposed_controls_ignore_input() {
        let mut controls = OrbitControls::avatar_default();
        let mut camera = camera();
        controls.dispose();
        controls.rotate(1.0, 0.0);

        assert!(!controls.update(&mut camera));
        assert!(controls.is_disposed());
    }
}
