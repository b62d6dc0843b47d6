// SPDX-License-Identifier: CEPL-1.0
use bytemuck::{Pod, Zeroable};
use ember_math::glam::{Mat4, Vec3};
use ember_math::Camera;

use crate::RenderSize;

/// Everything the renderer reads from the application once per frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Scene {
    pub camera: Camera,
    /// Direction towards the sun, world space. Normalised on upload.
    pub sun_direction: Vec3,
    /// Seconds since start.
    pub time: f32,
}

impl Default for Scene {
    fn default() -> Self {
        Self {
            camera: Camera::default(),
            sun_direction: Vec3::new(0.3, 1.0, 0.2),
            time: 0.0,
        }
    }
}

/// Per-image uniform block (std140: four mat4 then two vec4).
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct UniformPayload {
    pub view: [[f32; 4]; 4],
    pub proj: [[f32; 4]; 4],
    pub view_inverse: [[f32; 4]; 4],
    pub proj_inverse: [[f32; 4]; 4],
    /// xyz = sun direction, w unused.
    pub sun_direction: [f32; 4],
    /// x = time, y = aspect, zw unused.
    pub params: [f32; 4],
}

impl UniformPayload {
    pub fn from_scene(scene: &Scene, extent: RenderSize) -> Self {
        let aspect = extent.aspect();
        let view = scene.camera.view();
        let proj = scene.camera.projection(aspect);
        let sun = scene.sun_direction.try_normalize().unwrap_or(Vec3::Y);
        Self {
            view: view.to_cols_array_2d(),
            proj: proj.to_cols_array_2d(),
            view_inverse: scene.camera.transform.to_cols_array_2d(),
            proj_inverse: proj.inverse().to_cols_array_2d(),
            sun_direction: sun.extend(0.0).to_array(),
            params: [scene.time, aspect, 0.0, 0.0],
        }
    }

    pub fn view(&self) -> Mat4 {
        Mat4::from_cols_array_2d(&self.view)
    }

    pub fn proj(&self) -> Mat4 {
        Mat4::from_cols_array_2d(&self.proj)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_is_std140_sized() {
        assert_eq!(std::mem::size_of::<UniformPayload>(), 4 * 64 + 2 * 16);
    }

    #[test]
    fn inverses_match() {
        let mut scene = Scene::default();
        scene.camera.transform = Mat4::from_translation(Vec3::new(0.0, 5.0, 10.0))
            * Mat4::from_rotation_y(0.4);
        let p = UniformPayload::from_scene(&scene, RenderSize::new(1280, 720));

        let view_round = p.view() * Mat4::from_cols_array_2d(&p.view_inverse);
        assert!(view_round.abs_diff_eq(Mat4::IDENTITY, 1e-4));
        let proj_round = p.proj() * Mat4::from_cols_array_2d(&p.proj_inverse);
        assert!(proj_round.abs_diff_eq(Mat4::IDENTITY, 1e-3));
    }

    #[test]
    fn sun_is_normalised_and_time_forwarded() {
        let scene = Scene {
            sun_direction: Vec3::new(0.0, 3.0, 4.0),
            time: 2.5,
            ..Default::default()
        };
        let p = UniformPayload::from_scene(&scene, RenderSize::new(200, 100));
        let sun = Vec3::from_slice(&p.sun_direction[..3]);
        assert!(sun.abs_diff_eq(Vec3::new(0.0, 0.6, 0.8), 1e-6));
        assert_eq!(p.params[0], 2.5);
        assert_eq!(p.params[1], 2.0);
    }

    #[test]
    fn zero_sun_falls_back_to_up() {
        let scene = Scene {
            sun_direction: Vec3::ZERO,
            ..Default::default()
        };
        let p = UniformPayload::from_scene(&scene, RenderSize::new(1, 1));
        assert_eq!(p.sun_direction, [0.0, 1.0, 0.0, 0.0]);
    }
}
