// SPDX-License-Identifier: CEPL-1.0
//! Window surface and swapchain parameter negotiation.
use std::sync::Arc;

use ash::khr::surface;
use ash::vk;
use ember_render::{RenderError, RenderResult, RenderSize};
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};

use crate::config::PresentPolicy;
use crate::context::InstanceContext;
use crate::error::VkContext;

/// Usage every swapchain image needs: blit destination and overlay target.
pub const REQUIRED_IMAGE_USAGE: vk::ImageUsageFlags = vk::ImageUsageFlags::from_raw(
    vk::ImageUsageFlags::TRANSFER_DST.as_raw() | vk::ImageUsageFlags::COLOR_ATTACHMENT.as_raw(),
);

pub struct PresentSurface {
    loader: surface::Instance,
    raw: vk::SurfaceKHR,
    instance: Arc<InstanceContext>,
}

impl PresentSurface {
    pub fn new(
        instance: &Arc<InstanceContext>,
        display: RawDisplayHandle,
        window: RawWindowHandle,
    ) -> RenderResult<Self> {
        let loader = surface::Instance::new(instance.entry(), instance.raw());
        // SAFETY: the handles come from a live window owned by the caller,
        // which outlives the renderer.
        let raw = unsafe {
            ash_window::create_surface(instance.entry(), instance.raw(), display, window, None)
        }
        .context("create_surface")?;
        Ok(Self {
            loader,
            raw,
            instance: Arc::clone(instance),
        })
    }

    pub fn raw(&self) -> vk::SurfaceKHR {
        self.raw
    }

    pub fn instance(&self) -> &Arc<InstanceContext> {
        &self.instance
    }

    pub fn supports_present(&self, physical: vk::PhysicalDevice, family: u32) -> RenderResult<bool> {
        // SAFETY: physical and surface belong to the same instance.
        unsafe {
            self.loader
                .get_physical_device_surface_support(physical, family, self.raw)
        }
        .context("get_physical_device_surface_support")
    }

    pub fn query(&self, physical: vk::PhysicalDevice) -> RenderResult<SurfaceSupport> {
        // SAFETY: physical and surface belong to the same instance.
        unsafe {
            Ok(SurfaceSupport {
                capabilities: self
                    .loader
                    .get_physical_device_surface_capabilities(physical, self.raw)
                    .context("get_physical_device_surface_capabilities")?,
                formats: self
                    .loader
                    .get_physical_device_surface_formats(physical, self.raw)
                    .context("get_physical_device_surface_formats")?,
                present_modes: self
                    .loader
                    .get_physical_device_surface_present_modes(physical, self.raw)
                    .context("get_physical_device_surface_present_modes")?,
            })
        }
    }
}

impl Drop for PresentSurface {
    fn drop(&mut self) {
        // SAFETY: swapchains built on this surface are dropped first; the
        // instance is kept alive by the Arc we hold.
        unsafe { self.loader.destroy_surface(self.raw, None) };
    }
}

/// Raw surface query results.
#[derive(Clone, Debug, Default)]
pub struct SurfaceSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

/// Negotiated swapchain parameters.
#[derive(Clone, Copy, Debug)]
pub struct SurfaceChoice {
    pub format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub image_count: u32,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
}

pub fn negotiate(
    support: &SurfaceSupport,
    policy: PresentPolicy,
    hint: RenderSize,
) -> RenderResult<SurfaceChoice> {
    let caps = &support.capabilities;
    if !caps.supported_usage_flags.contains(REQUIRED_IMAGE_USAGE) {
        return Err(RenderError::Capability(format!(
            "surface usage {:?} lacks {:?}",
            caps.supported_usage_flags, REQUIRED_IMAGE_USAGE
        )));
    }
    let pre_transform = if caps
        .supported_transforms
        .contains(vk::SurfaceTransformFlagsKHR::IDENTITY)
    {
        vk::SurfaceTransformFlagsKHR::IDENTITY
    } else {
        caps.current_transform
    };
    Ok(SurfaceChoice {
        format: choose_surface_format(&support.formats)?,
        present_mode: choose_present_mode(&support.present_modes, policy),
        extent: extent_from_caps(caps, hint),
        image_count: image_count(caps),
        pre_transform,
    })
}

/// 8-bit sRGB with the sRGB non-linear colour space, else whatever comes first.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> RenderResult<vk::SurfaceFormatKHR> {
    let preferred = vk::SurfaceFormatKHR {
        format: vk::Format::B8G8R8A8_SRGB,
        color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
    };
    match formats {
        [] => Err(RenderError::Capability("surface reports no formats".into())),
        // A lone UNDEFINED entry means the surface takes any format.
        [only] if only.format == vk::Format::UNDEFINED => Ok(preferred),
        _ => Ok([vk::Format::B8G8R8A8_SRGB, vk::Format::R8G8B8A8_SRGB]
            .into_iter()
            .find_map(|want| {
                formats.iter().copied().find(|f| {
                    f.format == want && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
                })
            })
            .unwrap_or(formats[0])),
    }
}

pub fn choose_present_mode(modes: &[vk::PresentModeKHR], policy: PresentPolicy) -> vk::PresentModeKHR {
    match policy {
        PresentPolicy::Vsync => vk::PresentModeKHR::FIFO,
        PresentPolicy::LowLatency => [
            vk::PresentModeKHR::FIFO_RELAXED,
            vk::PresentModeKHR::MAILBOX,
            vk::PresentModeKHR::IMMEDIATE,
        ]
        .into_iter()
        .find(|m| modes.contains(m))
        .unwrap_or(vk::PresentModeKHR::FIFO),
    }
}

/// Current extent, or the hint clamped to the allowed range when the surface
/// leaves the size to the swapchain (`u32::MAX` sentinel).
pub fn extent_from_caps(caps: &vk::SurfaceCapabilitiesKHR, hint: RenderSize) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        caps.current_extent
    } else {
        vk::Extent2D {
            width: hint
                .width
                .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: hint
                .height
                .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        }
    }
}

/// One more than the minimum, capped by the maximum (0 means unbounded).
pub fn image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let want = caps.min_image_count + 1;
    if caps.max_image_count == 0 {
        want
    } else {
        want.min(caps.max_image_count)
    }
}

pub(crate) fn present_mode_name(m: vk::PresentModeKHR) -> &'static str {
    match m {
        vk::PresentModeKHR::FIFO => "FIFO",
        vk::PresentModeKHR::FIFO_RELAXED => "FIFO_RELAXED",
        vk::PresentModeKHR::MAILBOX => "MAILBOX",
        vk::PresentModeKHR::IMMEDIATE => "IMMEDIATE",
        _ => "OTHER",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fmt(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space,
        }
    }

    fn caps(current: (u32, u32), min: (u32, u32), max: (u32, u32)) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 3,
            current_extent: vk::Extent2D {
                width: current.0,
                height: current.1,
            },
            min_image_extent: vk::Extent2D {
                width: min.0,
                height: min.1,
            },
            max_image_extent: vk::Extent2D {
                width: max.0,
                height: max.1,
            },
            supported_transforms: vk::SurfaceTransformFlagsKHR::IDENTITY,
            current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
            supported_usage_flags: vk::ImageUsageFlags::TRANSFER_DST
                | vk::ImageUsageFlags::COLOR_ATTACHMENT,
            ..Default::default()
        }
    }

    #[test]
    fn fifo_only_surface_yields_fifo() {
        let modes = [vk::PresentModeKHR::FIFO];
        assert_eq!(
            choose_present_mode(&modes, PresentPolicy::LowLatency),
            vk::PresentModeKHR::FIFO
        );
        assert_eq!(
            choose_present_mode(&[], PresentPolicy::LowLatency),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn present_mode_preference_order() {
        use vk::PresentModeKHR as M;
        let all = [M::FIFO, M::IMMEDIATE, M::MAILBOX, M::FIFO_RELAXED];
        assert_eq!(choose_present_mode(&all, PresentPolicy::LowLatency), M::FIFO_RELAXED);
        assert_eq!(
            choose_present_mode(&[M::FIFO, M::IMMEDIATE, M::MAILBOX], PresentPolicy::LowLatency),
            M::MAILBOX
        );
        assert_eq!(
            choose_present_mode(&[M::IMMEDIATE, M::FIFO], PresentPolicy::LowLatency),
            M::IMMEDIATE
        );
        assert_eq!(choose_present_mode(&all, PresentPolicy::Vsync), M::FIFO);
    }

    #[test]
    fn prefers_srgb_formats() {
        let formats = [
            fmt(vk::Format::B8G8R8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            fmt(vk::Format::R8G8B8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            fmt(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        assert_eq!(
            choose_surface_format(&formats).unwrap().format,
            vk::Format::B8G8R8A8_SRGB
        );
        assert_eq!(
            choose_surface_format(&formats[..2]).unwrap().format,
            vk::Format::R8G8B8A8_SRGB
        );
    }

    #[test]
    fn falls_back_to_first_format() {
        let formats = [
            fmt(vk::Format::A2B10G10R10_UNORM_PACK32, vk::ColorSpaceKHR::HDR10_ST2084_EXT),
            fmt(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::DISPLAY_P3_NONLINEAR_EXT),
        ];
        let chosen = choose_surface_format(&formats).unwrap();
        assert_eq!(chosen.format, formats[0].format);
        assert_eq!(chosen.color_space, formats[0].color_space);
    }

    #[test]
    fn undefined_format_means_anything_goes() {
        let formats = [fmt(vk::Format::UNDEFINED, vk::ColorSpaceKHR::SRGB_NONLINEAR)];
        assert_eq!(
            choose_surface_format(&formats).unwrap().format,
            vk::Format::B8G8R8A8_SRGB
        );
    }

    #[test]
    fn no_formats_is_a_capability_error() {
        assert!(matches!(
            choose_surface_format(&[]),
            Err(RenderError::Capability(_))
        ));
    }

    #[test]
    fn current_extent_wins_over_hint() {
        let c = caps((800, 600), (1, 1), (4096, 4096));
        let e = extent_from_caps(&c, RenderSize::new(1024, 768));
        assert_eq!((e.width, e.height), (800, 600));
    }

    #[test]
    fn sentinel_extent_clamps_hint() {
        let c = caps((u32::MAX, u32::MAX), (64, 64), (2048, 1024));
        let e = extent_from_caps(&c, RenderSize::new(4000, 10));
        assert_eq!((e.width, e.height), (2048, 64));
        let e = extent_from_caps(&c, RenderSize::new(300, 200));
        assert_eq!((e.width, e.height), (300, 200));
    }

    #[test]
    fn image_count_is_min_plus_one_capped() {
        let mut c = caps((1, 1), (1, 1), (1, 1));
        assert_eq!(image_count(&c), 3);
        c.max_image_count = 2;
        assert_eq!(image_count(&c), 2);
        c.max_image_count = 0;
        c.min_image_count = 4;
        assert_eq!(image_count(&c), 5);
    }

    #[test]
    fn negotiation_requires_transfer_and_attachment_usage() {
        let mut support = SurfaceSupport {
            capabilities: caps((640, 480), (1, 1), (4096, 4096)),
            formats: vec![fmt(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR)],
            present_modes: vec![vk::PresentModeKHR::FIFO],
        };
        let choice = negotiate(&support, PresentPolicy::LowLatency, RenderSize::new(1, 1)).unwrap();
        assert_eq!(choice.present_mode, vk::PresentModeKHR::FIFO);
        assert_eq!(choice.image_count, 3);
        assert_eq!(choice.pre_transform, vk::SurfaceTransformFlagsKHR::IDENTITY);

        support.capabilities.supported_usage_flags = vk::ImageUsageFlags::COLOR_ATTACHMENT;
        assert!(matches!(
            negotiate(&support, PresentPolicy::LowLatency, RenderSize::new(1, 1)),
            Err(RenderError::Capability(_))
        ));
    }
}
