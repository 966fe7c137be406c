/// Rate of the mouth-open smoothing filter, per second
pub const LIP_SYNC_RATE: f32 = 15.0;

/// Expression the lip-sync amplitude is written to
pub const MOUTH_OPEN_EXPRESSION: &str = "A";

/// First-order smoothing of the mouth-open amplitude
///
/// Each step moves `min(delta * LIP_SYNC_RATE, 1)` of the remaining distance
/// toward the target. At 60 FPS that is roughly a quarter per frame. The gain
/// is capped at 1 so a single long frame lands on the target instead of
/// overshooting it.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LipSync {
    value: f32,
    target: f32,
}

impl LipSync {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_speaking(&mut self, speaking: bool) {
        self.target = if speaking { 1.0 } else { 0.0 };
    }

    pub fn set_target(&mut self, target: f32) {
        self.target = target.clamp(0.0, 1.0);
    }

    /// Advance by `delta_secs` and return the new amplitude
    pub fn step(&mut self, delta_secs: f32) -> f32 {
        self.value += (self.target - self.value) * Self::gain(delta_secs);
        self.value
    }

    pub fn gain(delta_secs: f32) -> f32 {
        if !delta_secs.is_finite() {
            return 0.0;
        }
        (delta_secs.max(0.0) * LIP_SYNC_RATE).min(1.0)
    }

    pub fn value(&self) -> f32 {
        self.value
    }

    pub fn target(&self) -> f32 {
        self.target
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quarter_step_at_sixty_fps() {
        let mut lip = LipSync::new();
        lip.set_speaking(true);
        let v = lip.step(1.0 / 60.0);
        assert!((v - 0.25).abs() < 1e-6);
    }

    #[test]
    fn long_frame_lands_on_target() {
        let mut lip = LipSync::new();
        lip.set_speaking(true);
        assert_eq!(lip.step(0.5), 1.0);
        lip.set_speaking(false);
        assert_eq!(lip.step(10.0), 0.0);
    }

    #[test]
    fn negative_or_nan_delta_is_ignored() {
        let mut lip = LipSync::new();
        lip.set_speaking(true);
        assert_eq!(lip.step(-0.1), 0.0);
        assert_eq!(lip.step(f32::NAN), 0.0);
    }

    #[test]
    fn target_is_clamped() {
        let mut lip = LipSync::new();
        lip.set_target(3.0);
        assert_eq!(lip.target(), 1.0);
        lip.set_target(-1.0);
        assert_eq!(lip.target(), 0.0);
    }
}
