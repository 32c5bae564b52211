use glam::Vec3;

use crate::scene::SpawnArea;

pub const DEFAULT_VERTICAL_FOV: f32 = 17.0 * (std::f32::consts::PI / 180.0);
pub const DEFAULT_TILT: f32 = std::f32::consts::FRAC_PI_4;
pub const DEFAULT_AZIMUTH: f32 = std::f32::consts::FRAC_PI_4;
pub const DEFAULT_DISTANCE: f32 = 10.0;
pub const MOVE_SPEED: f32 = 10.0;
pub const MAX_DELTA_SECONDS: f32 = 0.05;
/// Fraction of the starting distance covered per wheel notch.
const ZOOM_FRACTION: f32 = 0.1;
const EPSILON: f32 = 1e-4;

/// Camera basis and lens as the ray-trace kernel consumes it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraParams {
    pub position: Vec3,
    pub forward: Vec3,
    pub right: Vec3,
    pub up: Vec3,
    pub vertical_fov: f32,
    pub aperture: f32,
    pub focus_distance: f32,
}

/// Input sampled since the last update. Axes are in `[-1, 1]`.
#[derive(Debug, Clone, Copy, Default)]
pub struct CameraInput {
    pub strafe: f32,
    pub advance: f32,
    pub wheel: f32,
}

#[derive(Debug, Clone)]
pub struct Camera {
    position: Vec3,
    forward: Vec3,
    right: Vec3,
    up: Vec3,
    vertical_fov: f32,
    aperture: f32,
    focus_distance: f32,
    zoom_step: f32,
}

impl Camera {
    /// Orbit-style view looking down at the origin from far enough back to
    /// frame the whole footprint.
    pub fn for_area(area: &SpawnArea) -> Self {
        let (sin_tilt, cos_tilt) = DEFAULT_TILT.sin_cos();
        let (sin_az, cos_az) = DEFAULT_AZIMUTH.sin_cos();
        let forward = Vec3::new(sin_az * cos_tilt, -sin_tilt, -cos_az * cos_tilt).normalize();

        let half_extent = 0.5 * area.width().max(area.depth());
        let fit = half_extent / (0.5 * DEFAULT_VERTICAL_FOV).tan();
        let distance = DEFAULT_DISTANCE.max(fit);

        let right = match forward.cross(Vec3::Y).try_normalize() {
            Some(r) => r,
            None => Vec3::X,
        };
        let up = right.cross(forward).try_normalize().unwrap_or(Vec3::Y);

        Camera {
            position: -forward * distance,
            forward,
            right,
            up,
            vertical_fov: DEFAULT_VERTICAL_FOV,
            aperture: 0.0,
            focus_distance: distance,
            zoom_step: distance * ZOOM_FRACTION,
        }
    }

    /// Planar movement plus wheel zoom. Returns true when the view changed,
    /// in which case accumulated samples are stale.
    pub fn update(&mut self, dt: f32, input: &CameraInput) -> bool {
        let dt = dt.clamp(0.0, MAX_DELTA_SECONDS);

        let planar_forward = Vec3::new(self.forward.x, 0.0, self.forward.z).normalize_or_zero();
        let planar_right = Vec3::new(self.right.x, 0.0, self.right.z).normalize_or_zero();
        let mut step = planar_right * input.strafe + planar_forward * input.advance;
        if step.length() > 1.0 {
            step = step.normalize();
        }

        let mut changed = false;
        if dt > 0.0 && step.length() > EPSILON {
            self.position += step * MOVE_SPEED * dt;
            changed = true;
        }

        if input.wheel.abs() > EPSILON {
            self.position += self.forward * (input.wheel * self.zoom_step);
            changed = true;
        }

        changed
    }

    pub fn params(&self) -> CameraParams {
        CameraParams {
            position: self.position,
            forward: self.forward,
            right: self.right,
            up: self.up,
            vertical_fov: self.vertical_fov,
            aperture: self.aperture,
            focus_distance: self.focus_distance,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn area(half: f32) -> SpawnArea {
        SpawnArea {
            min_x: -half,
            max_x: half,
            min_z: -half,
            max_z: half,
            ground_y: 0.0,
        }
    }

    #[test]
    fn test_basis_is_orthonormal() {
        let p = Camera::for_area(&area(5.0)).params();
        assert!((p.forward.length() - 1.0).abs() < 1e-5);
        assert!((p.right.length() - 1.0).abs() < 1e-5);
        assert!((p.up.length() - 1.0).abs() < 1e-5);
        assert!(p.forward.dot(p.right).abs() < 1e-5);
        assert!(p.forward.dot(p.up).abs() < 1e-5);
        assert!(p.up.y > 0.0);
        assert!(p.forward.y < 0.0);
    }

    #[test]
    fn test_looks_at_origin() {
        let p = Camera::for_area(&area(0.1)).params();
        assert!((p.position.length() - DEFAULT_DISTANCE).abs() < 1e-3);
        let to_origin = (-p.position).normalize();
        assert!(to_origin.dot(p.forward) > 0.9999);
    }

    #[test]
    fn test_large_area_backs_off() {
        let p = Camera::for_area(&area(100.0)).params();
        assert!(p.position.length() > DEFAULT_DISTANCE);
    }

    #[test]
    fn test_idle_input_does_not_change() {
        let mut cam = Camera::for_area(&area(5.0));
        let before = cam.params();
        assert!(!cam.update(0.016, &CameraInput::default()));
        assert_eq!(cam.params(), before);
    }

    #[test]
    fn test_movement_is_planar_and_clamped() {
        let mut cam = Camera::for_area(&area(5.0));
        let before = cam.params().position;
        let input = CameraInput {
            advance: 1.0,
            ..Default::default()
        };
        assert!(cam.update(1.0, &input));
        let after = cam.params().position;
        assert_eq!(after.y, before.y);
        let travelled = (after - before).length();
        assert!((travelled - MOVE_SPEED * MAX_DELTA_SECONDS).abs() < 1e-4);
    }

    #[test]
    fn test_wheel_zooms_along_forward() {
        let mut cam = Camera::for_area(&area(5.0));
        let before = cam.params();
        let input = CameraInput {
            wheel: 1.0,
            ..Default::default()
        };
        assert!(cam.update(0.0, &input));
        let delta = cam.params().position - before.position;
        assert!(delta.normalize().dot(before.forward) > 0.9999);
    }
}
