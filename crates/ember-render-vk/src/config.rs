// SPDX-License-Identifier: CEPL-1.0
use std::path::PathBuf;

use ember_render::RenderSize;

/// Present-mode preference.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PresentPolicy {
    /// FIFO_RELAXED, then MAILBOX, then IMMEDIATE, then FIFO.
    #[default]
    LowLatency,
    /// Always FIFO.
    Vsync,
}

/// Size of the compute target relative to the surface.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub enum RenderResolution {
    #[default]
    MatchSurface,
    Fixed(RenderSize),
    /// Surface size times the factor, rounded.
    Scale(f32),
}

impl RenderResolution {
    /// Never returns an empty size.
    pub fn resolve(&self, surface: RenderSize) -> RenderSize {
        let size = match *self {
            RenderResolution::MatchSurface => surface,
            RenderResolution::Fixed(size) => size,
            RenderResolution::Scale(factor) => {
                let factor = if factor.is_finite() && factor > 0.0 {
                    factor
                } else {
                    1.0
                };
                RenderSize::new(
                    (surface.width as f32 * factor).round() as u32,
                    (surface.height as f32 * factor).round() as u32,
                )
            }
        };
        RenderSize::new(size.width.max(1), size.height.max(1))
    }
}

/// Everything the Vulkan renderer needs to know up front.
#[derive(Clone, Debug)]
pub struct ContextConfig {
    pub app_name: String,
    /// Enables `VK_LAYER_KHRONOS_validation` and routes its messages to tracing.
    pub validation: bool,
    /// Index into the enumerated adapters; the first one when unset.
    pub adapter_index: Option<usize>,
    pub frames_in_flight: usize,
    pub present_policy: PresentPolicy,
    pub render_resolution: RenderResolution,
    /// GLSL compute source compiled at startup and on reload. The embedded
    /// shader is used when unset. The source must declare
    /// `layout(local_size_x_id = 0, local_size_y_id = 1) in;`.
    pub shader_path: Option<PathBuf>,
    pub overlay: bool,
    /// Sample count at which the progress overlay reads full.
    pub overlay_target_samples: u32,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            app_name: "ember".into(),
            validation: cfg!(debug_assertions),
            adapter_index: None,
            frames_in_flight: 2,
            present_policy: PresentPolicy::default(),
            render_resolution: RenderResolution::default(),
            shader_path: None,
            overlay: true,
            overlay_target_samples: 256,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn match_surface_follows_window() {
        let r = RenderResolution::MatchSurface;
        assert_eq!(r.resolve(RenderSize::new(800, 600)), RenderSize::new(800, 600));
    }

    #[test]
    fn scale_rounds_and_never_hits_zero() {
        let r = RenderResolution::Scale(0.5);
        assert_eq!(r.resolve(RenderSize::new(801, 600)), RenderSize::new(401, 300));
        assert_eq!(r.resolve(RenderSize::new(1, 1)), RenderSize::new(1, 1));
        let bogus = RenderResolution::Scale(f32::NAN);
        assert_eq!(bogus.resolve(RenderSize::new(64, 32)), RenderSize::new(64, 32));
    }

    #[test]
    fn fixed_ignores_surface() {
        let r = RenderResolution::Fixed(RenderSize::new(320, 0));
        assert_eq!(r.resolve(RenderSize::new(1920, 1080)), RenderSize::new(320, 1));
    }

    #[test]
    fn defaults() {
        let c = ContextConfig::default();
        assert_eq!(c.frames_in_flight, 2);
        assert_eq!(c.present_policy, PresentPolicy::LowLatency);
        assert!(c.adapter_index.is_none());
    }
}
