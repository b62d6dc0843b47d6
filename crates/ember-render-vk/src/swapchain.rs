// SPDX-License-Identifier: CEPL-1.0
use std::sync::Arc;

use ash::vk;
use ember_render::{RenderError, RenderResult, RenderSize};
use tracing::info;

use crate::context::DeviceContext;
use crate::error::{vk_error, VkContext};
use crate::surface::{present_mode_name, PresentSurface, SurfaceChoice, REQUIRED_IMAGE_USAGE};

pub const COLOR_RANGE: vk::ImageSubresourceRange = vk::ImageSubresourceRange {
    aspect_mask: vk::ImageAspectFlags::COLOR,
    base_mip_level: 0,
    level_count: 1,
    base_array_layer: 0,
    layer_count: 1,
};

pub struct Swapchain {
    device: Arc<DeviceContext>,
    raw: vk::SwapchainKHR,
    format: vk::SurfaceFormatKHR,
    extent: vk::Extent2D,
    images: Vec<vk::Image>,
    views: Vec<vk::ImageView>,
}

impl Swapchain {
    /// Builds a swapchain for `choice`. Passing the previous swapchain lets
    /// the driver hand resources over; it must still be dropped afterwards.
    pub fn new(
        device: &Arc<DeviceContext>,
        surface: &PresentSurface,
        choice: &SurfaceChoice,
        old: Option<&Swapchain>,
    ) -> RenderResult<Self> {
        let blit_dst = device
            .format_properties(choice.format.format)
            .optimal_tiling_features
            .contains(vk::FormatFeatureFlags::BLIT_DST);
        if !blit_dst {
            return Err(RenderError::Capability(format!(
                "surface format {:?} cannot be a blit destination",
                choice.format.format
            )));
        }

        let families = device.families();
        let family_indices = [families.graphics, families.present];
        let (sharing_mode, family_count) = if families.graphics != families.present {
            (vk::SharingMode::CONCURRENT, 2)
        } else {
            (vk::SharingMode::EXCLUSIVE, 0)
        };

        let info = vk::SwapchainCreateInfoKHR {
            s_type: vk::StructureType::SWAPCHAIN_CREATE_INFO_KHR,
            surface: surface.raw(),
            min_image_count: choice.image_count,
            image_format: choice.format.format,
            image_color_space: choice.format.color_space,
            image_extent: choice.extent,
            image_array_layers: 1,
            image_usage: REQUIRED_IMAGE_USAGE,
            image_sharing_mode: sharing_mode,
            queue_family_index_count: family_count,
            p_queue_family_indices: family_indices.as_ptr(),
            pre_transform: choice.pre_transform,
            composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
            present_mode: choice.present_mode,
            clipped: vk::TRUE,
            old_swapchain: old.map_or(vk::SwapchainKHR::null(), |s| s.raw),
            ..Default::default()
        };

        let loader = device.swapchain_fn();
        // SAFETY: surface, device and old swapchain are all alive.
        let raw = unsafe { loader.create_swapchain(&info, None) }.context("create_swapchain")?;
        let mut swapchain = Self {
            device: Arc::clone(device),
            raw,
            format: choice.format,
            extent: choice.extent,
            images: Vec::new(),
            views: Vec::new(),
        };

        // SAFETY: raw was just created; on error `swapchain` drops what exists.
        swapchain.images =
            unsafe { loader.get_swapchain_images(raw) }.context("get_swapchain_images")?;
        for &image in &swapchain.images {
            let iv_info = vk::ImageViewCreateInfo {
                s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
                image,
                view_type: vk::ImageViewType::TYPE_2D,
                format: choice.format.format,
                subresource_range: COLOR_RANGE,
                ..Default::default()
            };
            let view = unsafe { device.raw().create_image_view(&iv_info, None) }
                .map_err(|e| vk_error("create_image_view", e))?;
            swapchain.views.push(view);
        }

        info!(
            format = ?choice.format.format,
            color_space = ?choice.format.color_space,
            present_mode = present_mode_name(choice.present_mode),
            width = choice.extent.width,
            height = choice.extent.height,
            images = swapchain.images.len(),
            ?sharing_mode,
            "swapchain ready"
        );
        Ok(swapchain)
    }

    pub fn raw(&self) -> vk::SwapchainKHR {
        self.raw
    }

    pub fn format(&self) -> vk::Format {
        self.format.format
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn size(&self) -> RenderSize {
        RenderSize::new(self.extent.width, self.extent.height)
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn image(&self, index: usize) -> vk::Image {
        self.images[index]
    }

    pub fn view(&self, index: usize) -> vk::ImageView {
        self.views[index]
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        // SAFETY: the owner drains the device before dropping; views go
        // before the swapchain that owns their images.
        unsafe {
            for &view in &self.views {
                self.device.raw().destroy_image_view(view, None);
            }
            self.device.swapchain_fn().destroy_swapchain(self.raw, None);
        }
    }
}
