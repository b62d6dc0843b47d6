// SPDX-License-Identifier: CEPL-1.0
//! Hook for drawing on top of the composited image before present.
use ash::vk;
use ember_render::{FrameStats, RenderResult};

/// State handed to an [`Overlay`]. Dynamic rendering is active on `cmd` with
/// the swapchain image bound as colour attachment 0 (load/store).
pub struct OverlayPass<'a> {
    pub device: &'a ash::Device,
    pub cmd: vk::CommandBuffer,
    pub extent: vk::Extent2D,
    pub format: vk::Format,
    pub stats: FrameStats,
}

pub trait Overlay {
    fn draw(&mut self, pass: &OverlayPass<'_>) -> RenderResult<()>;
}

const BAR_HEIGHT: u32 = 6;
const TRACK: [f32; 4] = [0.05, 0.05, 0.05, 1.0];
const FILL: [f32; 4] = [0.95, 0.55, 0.1, 1.0];

/// Thin bar along the bottom edge showing convergence toward a sample target.
#[derive(Clone, Copy, Debug)]
pub struct ProgressOverlay {
    pub target_samples: u32,
}

impl ProgressOverlay {
    pub fn new(target_samples: u32) -> Self {
        Self {
            target_samples: target_samples.max(1),
        }
    }
}

impl Overlay for ProgressOverlay {
    fn draw(&mut self, pass: &OverlayPass<'_>) -> RenderResult<()> {
        for (rect, color) in progress_rects(pass.extent, pass.stats.samples, self.target_samples) {
            let attachment = vk::ClearAttachment {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                color_attachment: 0,
                clear_value: vk::ClearValue {
                    color: vk::ClearColorValue { float32: color },
                },
            };
            let clear_rect = vk::ClearRect {
                rect,
                base_array_layer: 0,
                layer_count: 1,
            };
            // SAFETY: called inside the rendering scope set up by the backend;
            // rects are clipped to the attachment extent.
            unsafe {
                pass.device
                    .cmd_clear_attachments(pass.cmd, &[attachment], &[clear_rect])
            };
        }
        Ok(())
    }
}

/// Track and fill rectangles; empty rects are omitted.
pub fn progress_rects(extent: vk::Extent2D, samples: u32, target: u32) -> Vec<(vk::Rect2D, [f32; 4])> {
    if extent.width == 0 || extent.height == 0 {
        return Vec::new();
    }
    let height = BAR_HEIGHT.min(extent.height);
    let y = (extent.height - height) as i32;
    let target = target.max(1);
    let filled = (u64::from(extent.width) * u64::from(samples.min(target)) / u64::from(target)) as u32;

    let rect = |width| vk::Rect2D {
        offset: vk::Offset2D { x: 0, y },
        extent: vk::Extent2D { width, height },
    };
    let mut out = vec![(rect(extent.width), TRACK)];
    if filled > 0 {
        out.push((rect(filled), FILL));
    }
    out
}
