// SPDX-License-Identifier: CEPL-1.0
//! Compute pipeline and the per-frame dispatch + copy recording.
use std::sync::Arc;

use ash::vk;
use ember_render::{dispatch_groups, DispatchConstants, RenderResult, RenderSize, WORKGROUP_SIZE};
use tracing::info;

use crate::context::DeviceContext;
use crate::error::{vk_error, VkContext};
use crate::resources::ComputeTarget;
use crate::shader::ShaderBinary;
use crate::swapchain::COLOR_RANGE;

const COLOR_LAYERS: vk::ImageSubresourceLayers = vk::ImageSubresourceLayers {
    aspect_mask: vk::ImageAspectFlags::COLOR,
    mip_level: 0,
    base_array_layer: 0,
    layer_count: 1,
};

pub struct ComputeStage {
    device: Arc<DeviceContext>,
    set_layout: vk::DescriptorSetLayout,
    layout: vk::PipelineLayout,
    pipeline: vk::Pipeline,
}

impl ComputeStage {
    pub fn new(device: &Arc<DeviceContext>, shader: &ShaderBinary) -> RenderResult<Self> {
        let vkd = device.raw();
        let bindings = [
            vk::DescriptorSetLayoutBinding {
                binding: 0,
                descriptor_type: vk::DescriptorType::STORAGE_IMAGE,
                descriptor_count: 1,
                stage_flags: vk::ShaderStageFlags::COMPUTE,
                ..Default::default()
            },
            vk::DescriptorSetLayoutBinding {
                binding: 1,
                descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
                descriptor_count: 1,
                stage_flags: vk::ShaderStageFlags::COMPUTE,
                ..Default::default()
            },
        ];
        let set_ci = vk::DescriptorSetLayoutCreateInfo {
            s_type: vk::StructureType::DESCRIPTOR_SET_LAYOUT_CREATE_INFO,
            binding_count: bindings.len() as u32,
            p_bindings: bindings.as_ptr(),
            ..Default::default()
        };
        // SAFETY: valid create infos; partially built stages are dropped on
        // error and Drop tolerates null handles.
        let set_layout = unsafe { vkd.create_descriptor_set_layout(&set_ci, None) }
            .context("create_descriptor_set_layout")?;
        let mut stage = Self {
            device: Arc::clone(device),
            set_layout,
            layout: vk::PipelineLayout::null(),
            pipeline: vk::Pipeline::null(),
        };

        let push_range = vk::PushConstantRange {
            stage_flags: vk::ShaderStageFlags::COMPUTE,
            offset: 0,
            size: std::mem::size_of::<DispatchConstants>() as u32,
        };
        let layout_ci = vk::PipelineLayoutCreateInfo {
            s_type: vk::StructureType::PIPELINE_LAYOUT_CREATE_INFO,
            set_layout_count: 1,
            p_set_layouts: &stage.set_layout,
            push_constant_range_count: 1,
            p_push_constant_ranges: &push_range,
            ..Default::default()
        };
        // SAFETY: `set_layout` and `push_range` outlive the call.
        stage.layout = unsafe { vkd.create_pipeline_layout(&layout_ci, None) }
            .context("create_pipeline_layout")?;
        stage.pipeline = stage.build_pipeline(shader)?;
        Ok(stage)
    }

    fn build_pipeline(&self, shader: &ShaderBinary) -> RenderResult<vk::Pipeline> {
        let vkd = self.device.raw();
        let module_ci = vk::ShaderModuleCreateInfo {
            s_type: vk::StructureType::SHADER_MODULE_CREATE_INFO,
            code_size: std::mem::size_of_val(shader.words()),
            p_code: shader.words().as_ptr(),
            ..Default::default()
        };
        // SAFETY: the words are validated SPIR-V (magic checked on load).
        let module = unsafe { vkd.create_shader_module(&module_ci, None) }
            .context("create_shader_module")?;

        // Workgroup size is fed through specialization constants 0 and 1.
        let spec_entries = [
            vk::SpecializationMapEntry {
                constant_id: 0,
                offset: 0,
                size: 4,
            },
            vk::SpecializationMapEntry {
                constant_id: 1,
                offset: 4,
                size: 4,
            },
        ];
        let spec_data = [WORKGROUP_SIZE, WORKGROUP_SIZE];
        let spec = vk::SpecializationInfo {
            map_entry_count: spec_entries.len() as u32,
            p_map_entries: spec_entries.as_ptr(),
            data_size: std::mem::size_of_val(&spec_data),
            p_data: spec_data.as_ptr().cast(),
            ..Default::default()
        };
        let stage_ci = vk::PipelineShaderStageCreateInfo {
            s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
            stage: vk::ShaderStageFlags::COMPUTE,
            module,
            p_name: c"main".as_ptr(),
            p_specialization_info: &spec,
            ..Default::default()
        };
        let pipeline_ci = vk::ComputePipelineCreateInfo {
            s_type: vk::StructureType::COMPUTE_PIPELINE_CREATE_INFO,
            stage: stage_ci,
            layout: self.layout,
            ..Default::default()
        };

        // SAFETY: module and layout are alive; the module is released right after.
        let result = unsafe {
            vkd.create_compute_pipelines(
                vk::PipelineCache::null(),
                std::slice::from_ref(&pipeline_ci),
                None,
            )
        };
        // SAFETY: pipeline creation has returned; the module is no longer referenced.
        unsafe { vkd.destroy_shader_module(module, None) };
        let pipelines = result.map_err(|(_, e)| vk_error("create_compute_pipelines", e))?;
        pipelines
            .into_iter()
            .next()
            .ok_or_else(|| ember_render::RenderError::platform("create_compute_pipelines", "no pipeline"))
    }

    /// Swaps in a pipeline built from `shader`. The layout is kept, so
    /// existing descriptor sets stay valid. The device must be idle.
    pub fn rebuild(&mut self, shader: &ShaderBinary) -> RenderResult<()> {
        let pipeline = self.build_pipeline(shader)?;
        // SAFETY: caller drained the device; the old pipeline is unused.
        unsafe { self.device.raw().destroy_pipeline(self.pipeline, None) };
        self.pipeline = pipeline;
        info!("compute pipeline rebuilt");
        Ok(())
    }

    pub fn set_layout(&self) -> vk::DescriptorSetLayout {
        self.set_layout
    }

    /// Records the dispatch and the copy into the acquired image:
    ///
    /// 1. target: previous transfer read / compute write -> compute read-write
    /// 2. push constants, bind, dispatch `ceil(w/16) x ceil(h/16) x 1`
    /// 3. target `GENERAL -> TRANSFER_SRC`, swap image `UNDEFINED -> TRANSFER_DST`
    /// 4. blit (scales when the render resolution differs from the surface)
    /// 5. target back to `GENERAL`
    ///
    /// The swap image is left in `TRANSFER_DST_OPTIMAL`.
    pub fn record(
        &self,
        cmd: vk::CommandBuffer,
        set: vk::DescriptorSet,
        target: &ComputeTarget,
        swap_image: vk::Image,
        swap_extent: vk::Extent2D,
        constants: &DispatchConstants,
    ) {
        let vkd = self.device.raw();
        let target_size = target.size();

        let to_compute = image_barrier(
            target.image(),
            (
                vk::PipelineStageFlags2::TRANSFER | vk::PipelineStageFlags2::COMPUTE_SHADER,
                vk::AccessFlags2::TRANSFER_READ | vk::AccessFlags2::SHADER_STORAGE_WRITE,
            ),
            (
                vk::PipelineStageFlags2::COMPUTE_SHADER,
                vk::AccessFlags2::SHADER_STORAGE_READ | vk::AccessFlags2::SHADER_STORAGE_WRITE,
            ),
            vk::ImageLayout::GENERAL,
            vk::ImageLayout::GENERAL,
        );

        let [gx, gy, gz] = dispatch_groups(target_size);

        let to_copy = [
            image_barrier(
                target.image(),
                (
                    vk::PipelineStageFlags2::COMPUTE_SHADER,
                    vk::AccessFlags2::SHADER_STORAGE_WRITE,
                ),
                (vk::PipelineStageFlags2::BLIT, vk::AccessFlags2::TRANSFER_READ),
                vk::ImageLayout::GENERAL,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            ),
            // The image-available wait targets the transfer stage, so the
            // layout change is ordered after the acquire.
            image_barrier(
                swap_image,
                (vk::PipelineStageFlags2::BLIT, vk::AccessFlags2::empty()),
                (vk::PipelineStageFlags2::BLIT, vk::AccessFlags2::TRANSFER_WRITE),
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            ),
        ];

        let blit = vk::ImageBlit {
            src_subresource: COLOR_LAYERS,
            src_offsets: [
                vk::Offset3D::default(),
                corner(target_size.width, target_size.height),
            ],
            dst_subresource: COLOR_LAYERS,
            dst_offsets: [
                vk::Offset3D::default(),
                corner(swap_extent.width, swap_extent.height),
            ],
        };
        let filter = if target_size == RenderSize::new(swap_extent.width, swap_extent.height) {
            vk::Filter::NEAREST
        } else {
            vk::Filter::LINEAR
        };

        let back_to_general = image_barrier(
            target.image(),
            (vk::PipelineStageFlags2::BLIT, vk::AccessFlags2::TRANSFER_READ),
            (
                vk::PipelineStageFlags2::COMPUTE_SHADER,
                vk::AccessFlags2::SHADER_STORAGE_READ | vk::AccessFlags2::SHADER_STORAGE_WRITE,
            ),
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            vk::ImageLayout::GENERAL,
        );

        // SAFETY: cmd is recording; every handle is owned by a live wrapper.
        unsafe {
            pipeline_barriers(vkd, cmd, std::slice::from_ref(&to_compute));
            vkd.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::COMPUTE, self.pipeline);
            vkd.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::COMPUTE,
                self.layout,
                0,
                &[set],
                &[],
            );
            vkd.cmd_push_constants(
                cmd,
                self.layout,
                vk::ShaderStageFlags::COMPUTE,
                0,
                bytemuck::bytes_of(constants),
            );
            vkd.cmd_dispatch(cmd, gx, gy, gz);

            pipeline_barriers(vkd, cmd, &to_copy);
            vkd.cmd_blit_image(
                cmd,
                target.image(),
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                swap_image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                std::slice::from_ref(&blit),
                filter,
            );
            pipeline_barriers(vkd, cmd, std::slice::from_ref(&back_to_general));
        }
    }
}

impl Drop for ComputeStage {
    fn drop(&mut self) {
        // SAFETY: owner drains the device first; null handles are ignored.
        unsafe {
            let vkd = self.device.raw();
            vkd.destroy_pipeline(self.pipeline, None);
            vkd.destroy_pipeline_layout(self.layout, None);
            vkd.destroy_descriptor_set_layout(self.set_layout, None);
        }
    }
}

fn corner(width: u32, height: u32) -> vk::Offset3D {
    vk::Offset3D {
        x: width as i32,
        y: height as i32,
        z: 1,
    }
}

/// Single-subresource colour image barrier.
pub(crate) fn image_barrier(
    image: vk::Image,
    src: (vk::PipelineStageFlags2, vk::AccessFlags2),
    dst: (vk::PipelineStageFlags2, vk::AccessFlags2),
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
) -> vk::ImageMemoryBarrier2<'static> {
    vk::ImageMemoryBarrier2 {
        s_type: vk::StructureType::IMAGE_MEMORY_BARRIER_2,
        src_stage_mask: src.0,
        src_access_mask: src.1,
        dst_stage_mask: dst.0,
        dst_access_mask: dst.1,
        old_layout,
        new_layout,
        src_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
        dst_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
        image,
        subresource_range: COLOR_RANGE,
        ..Default::default()
    }
}

/// # Safety
/// `cmd` must be in the recording state.
pub(crate) unsafe fn pipeline_barriers(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    barriers: &[vk::ImageMemoryBarrier2<'_>],
) {
    let dep = vk::DependencyInfo {
        s_type: vk::StructureType::DEPENDENCY_INFO,
        image_memory_barrier_count: barriers.len() as u32,
        p_image_memory_barriers: barriers.as_ptr(),
        ..Default::default()
    };
    // SAFETY: cmd is recording; `barriers` outlives the call.
    unsafe { device.cmd_pipeline_barrier2(cmd, &dep) };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn barrier_ignores_queue_ownership() {
        let b = image_barrier(
            vk::Image::null(),
            (vk::PipelineStageFlags2::COMPUTE_SHADER, vk::AccessFlags2::SHADER_STORAGE_WRITE),
            (vk::PipelineStageFlags2::BLIT, vk::AccessFlags2::TRANSFER_READ),
            vk::ImageLayout::GENERAL,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        );
        assert_eq!(b.src_queue_family_index, vk::QUEUE_FAMILY_IGNORED);
        assert_eq!(b.dst_queue_family_index, vk::QUEUE_FAMILY_IGNORED);
        assert_eq!(b.subresource_range.layer_count, 1);
        assert_eq!(b.new_layout, vk::ImageLayout::TRANSFER_SRC_OPTIMAL);
    }

    #[test]
    fn blit_corner_is_exclusive_extent() {
        let c = corner(640, 480);
        assert_eq!((c.x, c.y, c.z), (640, 480, 1));
    }
}
