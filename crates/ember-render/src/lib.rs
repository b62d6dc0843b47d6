// SPDX-License-Identifier: CEPL-1.0
//! Backend-agnostic frame lifecycle: the swap ring, the per-iteration frame
//! driver and the values handed to the compute stage.
pub mod accumulate;
pub mod dispatch;
pub mod driver;
pub mod error;
pub mod frame;
pub mod payload;
pub mod swap;

use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

pub use accumulate::SampleCounter;
pub use dispatch::{dispatch_groups, DispatchConstants, WORKGROUP_SIZE};
pub use driver::{FrameBackend, FrameDriver, FrameOutcome, FrameStats};
pub use error::{RenderError, RenderResult};
pub use frame::{AcquiredFrame, FrameIndex, FrameRing, FrameStatus, ImageIndex};
pub use payload::{Scene, UniformPayload};
pub use swap::{SwapPlatform, SwapRing};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

impl RenderSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// A zero-area size (minimised window) cannot back a swapchain.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn aspect(&self) -> f32 {
        if self.height == 0 {
            1.0
        } else {
            self.width as f32 / self.height as f32
        }
    }
}

pub trait Renderer {
    type Config;

    /// `size` must have area; callers defer construction while minimised.
    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        config: Self::Config,
    ) -> RenderResult<Self>
    where
        Self: Sized;

    /// Records the new window size; the swapchain is rebuilt on the next frame.
    fn resize(&mut self, size: RenderSize);
    fn render(&mut self, scene: &Scene) -> RenderResult<FrameOutcome>;
    /// Drops accumulated samples, e.g. after the camera moved.
    fn reset_accumulation(&mut self);
    fn sample_count(&self) -> u32;
    /// Rebuilds shaders from source when the backend supports it.
    /// `Ok(false)` means nothing was reloaded.
    fn reload_shaders(&mut self) -> RenderResult<bool> {
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_sizes() {
        assert!(RenderSize::new(0, 10).is_empty());
        assert!(RenderSize::new(10, 0).is_empty());
        assert!(!RenderSize::new(1, 1).is_empty());
    }

    #[test]
    fn aspect_of_zero_height_is_one() {
        assert_eq!(RenderSize::new(640, 0).aspect(), 1.0);
        assert_eq!(RenderSize::new(800, 400).aspect(), 2.0);
    }
}
