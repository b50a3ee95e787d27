//! Interpolation.
//!
//! Remote drivers send transforms a few times per second. While an entity is
//! being moved by someone else, the local transform chases the last received
//! network transform every frame: position through exponential damping,
//! rotation through a rate-scaled slerp. Neither overshoots.

use space_shared::{
    config::SpaceConfig,
    math::{damp, Transform},
};

/// Smoothing parameters for remotely driven entities.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Interpolation {
    /// Position time constant, in seconds.
    pub damping_time: f32,
    /// Rotation catch-up rate, per second.
    pub slerp_rate: f32,
}

impl Default for Interpolation {
    fn default() -> Self {
        Self::from_config(&SpaceConfig::default())
    }
}

impl Interpolation {
    pub fn from_config(cfg: &SpaceConfig) -> Self {
        Self {
            damping_time: cfg.damping_time(),
            slerp_rate: cfg.rotation_slerp_rate,
        }
    }

    /// Moves `local` one frame toward `target`.
    pub fn step(&self, local: &mut Transform, target: &Transform, delta: f32) {
        local.position = damp(local.position, target.position, self.damping_time, delta);
        local.quaternion = local
            .quaternion
            .slerp(target.quaternion, (self.slerp_rate * delta).min(1.0));
    }
}

#[cfg(test)]
mod tests {
    use space_shared::math::{Quat, Vec3};

    use super::*;

    #[test]
    fn converges_without_overshoot() {
        let interp = Interpolation::default();
        let target = Transform::new(Vec3::new(10.0, 0.0, 0.0), Quat::from_rotation_y(1.5));
        let mut local = Transform::default();

        let mut last_gap = f32::MAX;
        for _ in 0..600 {
            interp.step(&mut local, &target, 1.0 / 60.0);
            assert!(local.position.x <= 10.0 + 1e-5);
            let gap = local.position.distance(target.position);
            assert!(gap <= last_gap);
            last_gap = gap;
        }
        assert!(last_gap < 1e-3);
        assert!(local.quaternion.angle_to(target.quaternion) < 1e-2);
    }

    #[test]
    fn large_delta_lands_on_target_rotation() {
        let interp = Interpolation::default();
        let target = Transform::new(Vec3::ZERO, Quat::from_rotation_y(1.0));
        let mut local = Transform::default();
        interp.step(&mut local, &target, 1.0);
        assert!(local.quaternion.angle_to(target.quaternion) < 1e-2);
    }
}
