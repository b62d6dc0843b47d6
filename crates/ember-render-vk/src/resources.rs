// SPDX-License-Identifier: CEPL-1.0
//! Per-image resources and the shared compute target.
use std::sync::Arc;

use ash::vk;
use ember_render::{ImageIndex, RenderError, RenderResult, RenderSize, UniformPayload};
use tracing::debug;

use crate::context::DeviceContext;
use crate::error::{vk_error, VkContext};
use crate::memory::{self, HostBuffer};
use crate::swapchain::COLOR_RANGE;

pub const TARGET_FORMAT: vk::Format = vk::Format::R16G16B16A16_SFLOAT;

/// Device-local storage image the compute shader accumulates into. Lives in
/// `GENERAL` between frames.
pub struct ComputeTarget {
    device: Arc<DeviceContext>,
    image: vk::Image,
    memory: vk::DeviceMemory,
    view: vk::ImageView,
    size: RenderSize,
}

impl ComputeTarget {
    pub fn new(device: &Arc<DeviceContext>, size: RenderSize) -> RenderResult<Self> {
        let features = device.format_properties(TARGET_FORMAT).optimal_tiling_features;
        let needed = vk::FormatFeatureFlags::STORAGE_IMAGE | vk::FormatFeatureFlags::BLIT_SRC;
        if !features.contains(needed) {
            return Err(RenderError::Capability(format!(
                "{TARGET_FORMAT:?} lacks {needed:?}"
            )));
        }

        let vkd = device.raw();
        let ici = vk::ImageCreateInfo {
            s_type: vk::StructureType::IMAGE_CREATE_INFO,
            image_type: vk::ImageType::TYPE_2D,
            format: TARGET_FORMAT,
            extent: vk::Extent3D {
                width: size.width,
                height: size.height,
                depth: 1,
            },
            mip_levels: 1,
            array_layers: 1,
            samples: vk::SampleCountFlags::TYPE_1,
            tiling: vk::ImageTiling::OPTIMAL,
            usage: vk::ImageUsageFlags::STORAGE | vk::ImageUsageFlags::TRANSFER_SRC,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            ..Default::default()
        };
        // SAFETY: valid create info; the partially built target is dropped on
        // error, and Drop tolerates null handles.
        let image = unsafe { vkd.create_image(&ici, None) }.context("create_image")?;
        let mut target = Self {
            device: Arc::clone(device),
            image,
            memory: vk::DeviceMemory::null(),
            view: vk::ImageView::null(),
            size,
        };

        // SAFETY: image is live and not yet bound.
        let req = unsafe { vkd.get_image_memory_requirements(image) };
        target.memory = memory::allocate(device, req, vk::MemoryPropertyFlags::DEVICE_LOCAL)?;
        // SAFETY: memory was sized from `req`; offset 0 satisfies its alignment.
        unsafe { vkd.bind_image_memory(image, target.memory, 0) }.context("bind_image_memory")?;

        let vci = vk::ImageViewCreateInfo {
            s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
            image,
            view_type: vk::ImageViewType::TYPE_2D,
            format: TARGET_FORMAT,
            subresource_range: COLOR_RANGE,
            ..Default::default()
        };
        // SAFETY: image is bound to memory; the view matches its format.
        target.view = unsafe { vkd.create_image_view(&vci, None) }.context("create_image_view")?;

        // One-shot transition so every frame can assume GENERAL.
        let cmd = device.begin_single_use()?;
        let barrier = vk::ImageMemoryBarrier2 {
            s_type: vk::StructureType::IMAGE_MEMORY_BARRIER_2,
            src_stage_mask: vk::PipelineStageFlags2::TOP_OF_PIPE,
            src_access_mask: vk::AccessFlags2::empty(),
            dst_stage_mask: vk::PipelineStageFlags2::COMPUTE_SHADER,
            dst_access_mask: vk::AccessFlags2::SHADER_STORAGE_READ
                | vk::AccessFlags2::SHADER_STORAGE_WRITE,
            old_layout: vk::ImageLayout::UNDEFINED,
            new_layout: vk::ImageLayout::GENERAL,
            image,
            subresource_range: COLOR_RANGE,
            ..Default::default()
        };
        let dep = vk::DependencyInfo {
            s_type: vk::StructureType::DEPENDENCY_INFO,
            image_memory_barrier_count: 1,
            p_image_memory_barriers: &barrier,
            ..Default::default()
        };
        // SAFETY: cmd is recording; `barrier` outlives the call.
        unsafe { vkd.cmd_pipeline_barrier2(cmd, &dep) };
        device.end_and_submit(cmd)?;

        debug!(width = size.width, height = size.height, "compute target created");
        Ok(target)
    }

    pub fn image(&self) -> vk::Image {
        self.image
    }

    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    pub fn size(&self) -> RenderSize {
        self.size
    }
}

impl Drop for ComputeTarget {
    fn drop(&mut self) {
        // SAFETY: owner drains the device first; destroying null handles is a no-op.
        unsafe {
            let vkd = self.device.raw();
            vkd.destroy_image_view(self.view, None);
            vkd.destroy_image(self.image, None);
            vkd.free_memory(self.memory, None);
        }
    }
}

/// Uniform buffer, descriptor set and command buffer for each swapchain image.
pub struct FrameResources {
    device: Arc<DeviceContext>,
    pool: vk::DescriptorPool,
    sets: Vec<vk::DescriptorSet>,
    uniforms: Vec<HostBuffer>,
    commands: Vec<vk::CommandBuffer>,
}

impl FrameResources {
    pub fn new(
        device: &Arc<DeviceContext>,
        set_layout: vk::DescriptorSetLayout,
        image_count: usize,
    ) -> RenderResult<Self> {
        let count = image_count as u32;
        let ubo_size = std::mem::size_of::<UniformPayload>() as vk::DeviceSize;

        let pool_sizes = [
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::STORAGE_IMAGE,
                descriptor_count: count,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::UNIFORM_BUFFER,
                descriptor_count: count,
            },
        ];
        let pool_ci = vk::DescriptorPoolCreateInfo {
            s_type: vk::StructureType::DESCRIPTOR_POOL_CREATE_INFO,
            max_sets: count,
            pool_size_count: pool_sizes.len() as u32,
            p_pool_sizes: pool_sizes.as_ptr(),
            ..Default::default()
        };
        // SAFETY: valid create info for this device.
        let pool = unsafe { device.raw().create_descriptor_pool(&pool_ci, None) }
            .context("create_descriptor_pool")?;
        let mut resources = Self {
            device: Arc::clone(device),
            pool,
            sets: Vec::new(),
            uniforms: Vec::with_capacity(image_count),
            commands: Vec::new(),
        };

        let layouts = vec![set_layout; image_count];
        let alloc = vk::DescriptorSetAllocateInfo {
            s_type: vk::StructureType::DESCRIPTOR_SET_ALLOCATE_INFO,
            descriptor_pool: pool,
            descriptor_set_count: count,
            p_set_layouts: layouts.as_ptr(),
            ..Default::default()
        };
        // SAFETY: pool sized for exactly these sets.
        resources.sets = unsafe { device.raw().allocate_descriptor_sets(&alloc) }
            .context("allocate_descriptor_sets")?;

        for _ in 0..image_count {
            resources.uniforms.push(HostBuffer::new(
                device,
                ubo_size,
                vk::BufferUsageFlags::UNIFORM_BUFFER,
            )?);
        }
        resources.commands = device.allocate_command_buffers(count)?;
        Ok(resources)
    }

    pub fn command_buffer(&self, image: ImageIndex) -> vk::CommandBuffer {
        self.commands[image.as_usize()]
    }

    pub fn descriptor_set(&self, image: ImageIndex) -> vk::DescriptorSet {
        self.sets[image.as_usize()]
    }

    pub fn update_uniforms(&self, image: ImageIndex, payload: &UniformPayload) -> RenderResult<()> {
        self.uniforms[image.as_usize()].write(bytemuck::bytes_of(payload))
    }

    /// Points the image's set at `target_view` (binding 0) and its uniform
    /// buffer (binding 1).
    pub fn rebind(&self, image: ImageIndex, target_view: vk::ImageView) {
        let i = image.as_usize();
        let image_info = vk::DescriptorImageInfo {
            sampler: vk::Sampler::null(),
            image_view: target_view,
            image_layout: vk::ImageLayout::GENERAL,
        };
        let buffer_info = vk::DescriptorBufferInfo {
            buffer: self.uniforms[i].raw(),
            offset: 0,
            range: self.uniforms[i].size(),
        };
        let writes = [
            vk::WriteDescriptorSet {
                s_type: vk::StructureType::WRITE_DESCRIPTOR_SET,
                dst_set: self.sets[i],
                dst_binding: 0,
                descriptor_count: 1,
                descriptor_type: vk::DescriptorType::STORAGE_IMAGE,
                p_image_info: &image_info,
                ..Default::default()
            },
            vk::WriteDescriptorSet {
                s_type: vk::StructureType::WRITE_DESCRIPTOR_SET,
                dst_set: self.sets[i],
                dst_binding: 1,
                descriptor_count: 1,
                descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
                p_buffer_info: &buffer_info,
                ..Default::default()
            },
        ];
        // SAFETY: the set is not in use by any pending submission.
        unsafe { self.device.raw().update_descriptor_sets(&writes, &[]) };
    }
}

impl Drop for FrameResources {
    fn drop(&mut self) {
        self.device.free_command_buffers(&self.commands);
        // SAFETY: owner drains the device first; the pool frees its sets.
        unsafe { self.device.raw().destroy_descriptor_pool(self.pool, None) };
    }
}

pub(crate) fn begin_frame_commands(device: &DeviceContext, cmd: vk::CommandBuffer) -> RenderResult<()> {
    let begin = vk::CommandBufferBeginInfo {
        s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
        flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
        ..Default::default()
    };
    // SAFETY: pool has RESET_COMMAND_BUFFER, so begin resets implicitly; the
    // buffer's previous submission has completed.
    unsafe { device.raw().begin_command_buffer(cmd, &begin) }
        .map_err(|e| vk_error("begin_command_buffer", e))
}
