// SPDX-License-Identifier: CEPL-1.0
use std::sync::Arc;

use ash::vk;
use ember_render::{RenderError, RenderResult};

use crate::context::DeviceContext;
use crate::error::VkContext;

/// First memory type allowed by `type_bits` that has all of `required`.
pub fn find_memory_type(
    memory: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    required: vk::MemoryPropertyFlags,
) -> RenderResult<u32> {
    (0..memory.memory_type_count)
        .find(|&i| {
            type_bits & (1 << i) != 0
                && memory.memory_types[i as usize]
                    .property_flags
                    .contains(required)
        })
        .ok_or_else(|| RenderError::Exhausted {
            call: "find_memory_type",
            reason: format!("no memory type with {required:?} in mask {type_bits:#b}"),
        })
}

pub fn allocate(
    device: &DeviceContext,
    requirements: vk::MemoryRequirements,
    props: vk::MemoryPropertyFlags,
) -> RenderResult<vk::DeviceMemory> {
    let mem_type = find_memory_type(
        device.memory_properties(),
        requirements.memory_type_bits,
        props,
    )?;
    let mai = vk::MemoryAllocateInfo {
        s_type: vk::StructureType::MEMORY_ALLOCATE_INFO,
        allocation_size: requirements.size,
        memory_type_index: mem_type,
        ..Default::default()
    };
    // SAFETY: valid allocate info for this device.
    unsafe { device.raw().allocate_memory(&mai, None) }.context("allocate_memory")
}

/// Host-visible, coherent buffer written by the CPU.
pub struct HostBuffer {
    device: Arc<DeviceContext>,
    raw: vk::Buffer,
    memory: vk::DeviceMemory,
    size: vk::DeviceSize,
}

impl HostBuffer {
    pub fn new(
        device: &Arc<DeviceContext>,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
    ) -> RenderResult<Self> {
        let vkd = device.raw();
        let bci = vk::BufferCreateInfo {
            s_type: vk::StructureType::BUFFER_CREATE_INFO,
            size,
            usage,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            ..Default::default()
        };
        // SAFETY: valid create info; on failure partial objects are released.
        unsafe {
            let raw = vkd.create_buffer(&bci, None).context("create_buffer")?;
            let req = vkd.get_buffer_memory_requirements(raw);
            let memory = match allocate(
                device,
                req,
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            ) {
                Ok(m) => m,
                Err(e) => {
                    vkd.destroy_buffer(raw, None);
                    return Err(e);
                }
            };
            if let Err(e) = vkd.bind_buffer_memory(raw, memory, 0) {
                vkd.destroy_buffer(raw, None);
                vkd.free_memory(memory, None);
                return Err(crate::error::vk_error("bind_buffer_memory", e));
            }
            Ok(Self {
                device: Arc::clone(device),
                raw,
                memory,
                size,
            })
        }
    }

    pub fn raw(&self) -> vk::Buffer {
        self.raw
    }

    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    /// Map, copy, unmap. The caller ensures no pending GPU read.
    pub fn write(&self, bytes: &[u8]) -> RenderResult<()> {
        if bytes.len() as vk::DeviceSize > self.size {
            return Err(RenderError::platform(
                "HostBuffer::write",
                format!("{} bytes into a {} byte buffer", bytes.len(), self.size),
            ));
        }
        let vkd = self.device.raw();
        // SAFETY: memory is host-visible and the range is in bounds.
        unsafe {
            let ptr = vkd
                .map_memory(
                    self.memory,
                    0,
                    bytes.len() as vk::DeviceSize,
                    vk::MemoryMapFlags::empty(),
                )
                .context("map_memory")?;
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr as *mut u8, bytes.len());
            vkd.unmap_memory(self.memory);
        }
        Ok(())
    }
}

impl Drop for HostBuffer {
    fn drop(&mut self) {
        // SAFETY: owners drain the device before dropping buffers.
        unsafe {
            self.device.raw().destroy_buffer(self.raw, None);
            self.device.raw().free_memory(self.memory, None);
        }
    }
}
