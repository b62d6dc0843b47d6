// SPDX-License-Identifier: CEPL-1.0
//! Camera values and fly-style camera control.
//!
//! The camera's `transform` is camera-to-world; the view matrix is its
//! inverse. Projection is right-handed with depth in `0..1`, looking down -Z.
pub use glam;

use bitflags::bitflags;
use glam::{Mat4, Vec3};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Camera {
    pub transform: Mat4,
    pub fov_y_degrees: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            transform: Mat4::IDENTITY,
            fov_y_degrees: 60.0,
            near: 0.1,
            far: 1000.0,
        }
    }
}

impl Camera {
    pub fn view(&self) -> Mat4 {
        self.transform.inverse()
    }

    /// `aspect` is width / height; a degenerate aspect falls back to 1.
    pub fn projection(&self, aspect: f32) -> Mat4 {
        let aspect = if aspect.is_finite() && aspect > 0.0 {
            aspect
        } else {
            1.0
        };
        Mat4::perspective_rh(self.fov_y_degrees.to_radians(), aspect, self.near, self.far)
    }

    pub fn position(&self) -> Vec3 {
        self.transform.w_axis.truncate()
    }
}

bitflags! {
    /// Held movement keys for one frame.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct FlyInput: u8 {
        const FORWARD  = 1 << 0;
        const BACKWARD = 1 << 1;
        const LEFT     = 1 << 2;
        const RIGHT    = 1 << 3;
        const UP       = 1 << 4;
        const DOWN     = 1 << 5;
    }
}

impl FlyInput {
    /// Local-space direction; opposing keys cancel.
    pub fn direction(self) -> Vec3 {
        let axis = |pos: FlyInput, neg: FlyInput| -> f32 {
            (self.contains(pos) as i32 - self.contains(neg) as i32) as f32
        };
        Vec3::new(
            axis(FlyInput::RIGHT, FlyInput::LEFT),
            axis(FlyInput::UP, FlyInput::DOWN),
            -axis(FlyInput::FORWARD, FlyInput::BACKWARD),
        )
    }
}

/// Tunables for mouse/keyboard camera motion. Every method returns whether
/// the camera moved, so callers can invalidate accumulated samples.
#[derive(Clone, Copy, Debug)]
pub struct FlyController {
    pub rotate_sensitivity: f32,
    pub pan_speed: f32,
    pub move_speed: f32,
    pub zoom_step: f32,
}

impl Default for FlyController {
    fn default() -> Self {
        Self {
            rotate_sensitivity: 0.01,
            pan_speed: 1.0,
            move_speed: 10.0,
            zoom_step: 100.0,
        }
    }
}

impl FlyController {
    pub fn rotate(&self, camera: &mut Camera, dx: f32, dy: f32) -> bool {
        if dx == 0.0 && dy == 0.0 {
            return false;
        }
        camera.transform = camera.transform
            * Mat4::from_rotation_y(-self.rotate_sensitivity * dx)
            * Mat4::from_rotation_x(-self.rotate_sensitivity * dy);
        true
    }

    pub fn pan(&self, camera: &mut Camera, dx: f32, dy: f32) -> bool {
        if dx == 0.0 && dy == 0.0 {
            return false;
        }
        let offset = Vec3::new(-dx, dy, 0.0) * self.pan_speed;
        camera.transform *= Mat4::from_translation(offset);
        true
    }

    pub fn fly(&self, camera: &mut Camera, input: FlyInput) -> bool {
        let dir = input.direction();
        if dir == Vec3::ZERO {
            return false;
        }
        camera.transform *= Mat4::from_translation(dir * self.move_speed);
        true
    }

    /// Positive `wheel` moves forward.
    pub fn zoom(&self, camera: &mut Camera, wheel: f32) -> bool {
        if wheel == 0.0 {
            return false;
        }
        camera.transform *= Mat4::from_translation(Vec3::new(0.0, 0.0, -wheel * self.zoom_step));
        true
    }
}
