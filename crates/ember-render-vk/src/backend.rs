// SPDX-License-Identifier: CEPL-1.0
//! [`FrameBackend`] over a real device and window surface.
use std::path::Path;
use std::sync::Arc;

use ash::vk;
use ember_render::{
    DispatchConstants, FrameBackend, FrameStats, FrameStatus, ImageIndex, RenderError,
    RenderResult, RenderSize, SwapPlatform, UniformPayload,
};
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use tracing::{debug, info, warn};

use crate::compute::{image_barrier, pipeline_barriers, ComputeStage};
use crate::config::{ContextConfig, PresentPolicy, RenderResolution};
use crate::context::{DeviceContext, InstanceContext};
use crate::error::{vk_error, VkContext};
use crate::overlay::{Overlay, OverlayPass, ProgressOverlay};
use crate::resources::{begin_frame_commands, ComputeTarget, FrameResources};
use crate::shader::ShaderBinary;
use crate::surface::{negotiate, PresentSurface};
use crate::swapchain::Swapchain;
use crate::sync::FrameSlot;

/// Owns every Vulkan object of the renderer except the frame slots, which
/// live in the swap ring. Fields drop top to bottom: per-image resources,
/// then the swapchain, then the surface.
pub struct VkBackend {
    overlay: Option<Box<dyn Overlay>>,
    /// Layout of the swapchain image being recorded.
    swap_layout: vk::ImageLayout,
    /// Set by a suboptimal acquire; the matching present asks for recreation.
    suboptimal: bool,
    resolution: RenderResolution,
    present_policy: PresentPolicy,
    frames: FrameResources,
    target: ComputeTarget,
    compute: ComputeStage,
    swapchain: Swapchain,
    device: Arc<DeviceContext>,
    surface: PresentSurface,
    _instance: Arc<InstanceContext>,
}

impl VkBackend {
    pub fn new(
        window: RawWindowHandle,
        display: RawDisplayHandle,
        size: RenderSize,
        config: &ContextConfig,
    ) -> RenderResult<Self> {
        let instance = InstanceContext::new(display, config)?;
        let surface = PresentSurface::new(&instance, display, window)?;
        let device = DeviceContext::open(&instance, &surface, config)?;

        let support = surface.query(device.physical())?;
        let choice = negotiate(&support, config.present_policy, size)?;
        if choice.extent.width == 0 || choice.extent.height == 0 {
            return Err(RenderError::platform(
                "create_swapchain",
                "surface has no drawable area",
            ));
        }
        let swapchain = Swapchain::new(&device, &surface, &choice, None)?;

        let shader = match &config.shader_path {
            Some(path) => match ShaderBinary::load_glsl(path) {
                Ok(shader) => shader,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "using embedded compute shader");
                    ShaderBinary::embedded()?
                }
            },
            None => ShaderBinary::embedded()?,
        };
        let compute = ComputeStage::new(&device, &shader)?;
        let target = ComputeTarget::new(&device, config.render_resolution.resolve(swapchain.size()))?;
        let frames = FrameResources::new(&device, compute.set_layout(), swapchain.image_count())?;

        let overlay = if config.overlay {
            Some(Box::new(ProgressOverlay::new(config.overlay_target_samples)) as Box<dyn Overlay>)
        } else {
            None
        };

        Ok(Self {
            overlay,
            swap_layout: vk::ImageLayout::UNDEFINED,
            suboptimal: false,
            resolution: config.render_resolution,
            present_policy: config.present_policy,
            frames,
            target,
            compute,
            swapchain,
            device,
            surface,
            _instance: instance,
        })
    }

    pub fn device(&self) -> &Arc<DeviceContext> {
        &self.device
    }

    pub fn swapchain(&self) -> &Swapchain {
        &self.swapchain
    }

    pub fn set_overlay(&mut self, overlay: Option<Box<dyn Overlay>>) {
        self.overlay = overlay;
    }

    /// Recompiles the compute shader from `path`. Compile errors are logged
    /// and the running pipeline is kept (`Ok(false)`).
    pub fn reload_shader(&mut self, path: &Path) -> RenderResult<bool> {
        let shader = match ShaderBinary::load_glsl(path) {
            Ok(shader) => shader,
            Err(RenderError::Shader(reason)) => {
                warn!(path = %path.display(), %reason, "shader reload failed; keeping pipeline");
                return Ok(false);
            }
            Err(e) => return Err(e),
        };
        self.device.wait_idle()?;
        self.compute.rebuild(&shader)?;
        info!(path = %path.display(), "compute shader reloaded");
        Ok(true)
    }
}

impl Drop for VkBackend {
    fn drop(&mut self) {
        if let Err(e) = self.device.wait_idle() {
            warn!(error = %e, "device_wait_idle failed during teardown");
        }
    }
}

impl SwapPlatform for VkBackend {
    type Slot = FrameSlot;

    fn create_slot(&mut self) -> RenderResult<FrameSlot> {
        FrameSlot::new(&self.device)
    }

    fn wait_slot(&mut self, slot: &FrameSlot) -> RenderResult<()> {
        slot.in_flight.wait()
    }

    fn acquire_image(&mut self, slot: &FrameSlot) -> RenderResult<FrameStatus<ImageIndex>> {
        // SAFETY: the semaphore is unsignalled: its previous acquire was
        // consumed by a submission whose fence has been waited.
        let result = unsafe {
            self.device.swapchain_fn().acquire_next_image(
                self.swapchain.raw(),
                u64::MAX,
                slot.image_available.raw(),
                vk::Fence::null(),
            )
        };
        match result {
            Ok((index, suboptimal)) => {
                if suboptimal {
                    debug!(image = index, "acquired suboptimal image");
                    self.suboptimal = true;
                }
                Ok(FrameStatus::Ready(ImageIndex(index)))
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(FrameStatus::NeedsRecreate),
            Err(e) => Err(vk_error("acquire_next_image", e)),
        }
    }

    fn present_image(&mut self, image: ImageIndex, slot: &FrameSlot) -> RenderResult<FrameStatus<()>> {
        let wait = slot.render_finished.raw();
        let swapchain = self.swapchain.raw();
        let present = vk::PresentInfoKHR {
            s_type: vk::StructureType::PRESENT_INFO_KHR,
            wait_semaphore_count: 1,
            p_wait_semaphores: &wait,
            swapchain_count: 1,
            p_swapchains: &swapchain,
            p_image_indices: &image.0,
            ..Default::default()
        };
        // SAFETY: the image was acquired and its rendering submitted.
        let result = unsafe {
            self.device
                .swapchain_fn()
                .queue_present(self.device.present_queue(), &present)
        };
        let acquired_suboptimal = std::mem::take(&mut self.suboptimal);
        match result {
            Ok(false) if !acquired_suboptimal => Ok(FrameStatus::Ready(())),
            Ok(_) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(FrameStatus::NeedsRecreate),
            Err(e) => Err(vk_error("queue_present", e)),
        }
    }

    fn wait_present_idle(&mut self) -> RenderResult<()> {
        // SAFETY: the queue belongs to this device.
        unsafe { self.device.raw().queue_wait_idle(self.device.present_queue()) }
            .context("queue_wait_idle")
    }
}

impl FrameBackend for VkBackend {
    fn image_count(&self) -> usize {
        self.swapchain.image_count()
    }

    fn surface_extent(&self) -> RenderSize {
        self.swapchain.size()
    }

    fn target_extent(&self) -> RenderSize {
        self.target.size()
    }

    fn recreate(&mut self, hint: RenderSize) -> RenderResult<()> {
        self.device.wait_idle()?;
        self.suboptimal = false;
        self.swap_layout = vk::ImageLayout::UNDEFINED;

        let support = self.surface.query(self.device.physical())?;
        let choice = negotiate(&support, self.present_policy, hint)?;
        if choice.extent.width == 0 || choice.extent.height == 0 {
            debug!("surface has no area; keeping current swapchain");
            return Ok(());
        }

        self.swapchain = Swapchain::new(&self.device, &self.surface, &choice, Some(&self.swapchain))?;

        let target_size = self.resolution.resolve(self.swapchain.size());
        if target_size != self.target.size() {
            self.target = ComputeTarget::new(&self.device, target_size)?;
        }
        self.frames = FrameResources::new(
            &self.device,
            self.compute.set_layout(),
            self.swapchain.image_count(),
        )?;
        Ok(())
    }

    fn rebind_descriptors(&mut self, image: ImageIndex) -> RenderResult<()> {
        self.frames.rebind(image, self.target.view());
        Ok(())
    }

    fn update_uniforms(&mut self, image: ImageIndex, payload: &UniformPayload) -> RenderResult<()> {
        self.frames.update_uniforms(image, payload)
    }

    fn record_dispatch(&mut self, image: ImageIndex, constants: &DispatchConstants) -> RenderResult<()> {
        let cmd = self.frames.command_buffer(image);
        begin_frame_commands(&self.device, cmd)?;
        self.compute.record(
            cmd,
            self.frames.descriptor_set(image),
            &self.target,
            self.swapchain.image(image.as_usize()),
            self.swapchain.extent(),
            constants,
        );
        self.swap_layout = vk::ImageLayout::TRANSFER_DST_OPTIMAL;
        Ok(())
    }

    fn record_overlay(&mut self, image: ImageIndex, stats: &FrameStats) -> RenderResult<()> {
        let Some(overlay) = self.overlay.as_mut() else {
            return Ok(());
        };
        let vkd = self.device.raw();
        let cmd = self.frames.command_buffer(image);
        let extent = self.swapchain.extent();

        let to_attachment = image_barrier(
            self.swapchain.image(image.as_usize()),
            (vk::PipelineStageFlags2::BLIT, vk::AccessFlags2::TRANSFER_WRITE),
            (
                vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
                vk::AccessFlags2::COLOR_ATTACHMENT_READ | vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
            ),
            self.swap_layout,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        );
        let attachment = vk::RenderingAttachmentInfo {
            s_type: vk::StructureType::RENDERING_ATTACHMENT_INFO,
            image_view: self.swapchain.view(image.as_usize()),
            image_layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            load_op: vk::AttachmentLoadOp::LOAD,
            store_op: vk::AttachmentStoreOp::STORE,
            ..Default::default()
        };
        let rendering = vk::RenderingInfo {
            s_type: vk::StructureType::RENDERING_INFO,
            render_area: vk::Rect2D {
                offset: vk::Offset2D::default(),
                extent,
            },
            layer_count: 1,
            color_attachment_count: 1,
            p_color_attachments: &attachment,
            ..Default::default()
        };

        // SAFETY: cmd is recording (record_dispatch ran for this image).
        unsafe {
            pipeline_barriers(vkd, cmd, std::slice::from_ref(&to_attachment));
            vkd.cmd_begin_rendering(cmd, &rendering);
        }
        let pass = OverlayPass {
            device: vkd,
            cmd,
            extent,
            format: self.swapchain.format(),
            stats: *stats,
        };
        let drawn = overlay.draw(&pass);
        // SAFETY: closes the rendering scope begun above on the same buffer.
        unsafe { vkd.cmd_end_rendering(cmd) };
        self.swap_layout = vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL;
        drawn
    }

    fn submit(&mut self, image: ImageIndex, slot: &FrameSlot) -> RenderResult<()> {
        let vkd = self.device.raw();
        let cmd = self.frames.command_buffer(image);
        let src = if self.swap_layout == vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL {
            (
                vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
                vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
            )
        } else {
            (vk::PipelineStageFlags2::BLIT, vk::AccessFlags2::TRANSFER_WRITE)
        };
        let to_present = image_barrier(
            self.swapchain.image(image.as_usize()),
            src,
            (vk::PipelineStageFlags2::NONE, vk::AccessFlags2::NONE),
            self.swap_layout,
            vk::ImageLayout::PRESENT_SRC_KHR,
        );
        // SAFETY: cmd is recording; ending it makes it executable.
        unsafe {
            pipeline_barriers(vkd, cmd, std::slice::from_ref(&to_present));
            vkd.end_command_buffer(cmd).context("end_command_buffer")?;
        }
        self.swap_layout = vk::ImageLayout::UNDEFINED;

        // The first write to the swapchain image is the blit.
        self.device.submit(
            cmd,
            slot.image_available.raw(),
            vk::PipelineStageFlags::TRANSFER,
            slot.render_finished.raw(),
            &slot.in_flight,
        )
    }
}
