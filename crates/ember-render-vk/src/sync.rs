// SPDX-License-Identifier: CEPL-1.0
use std::sync::Arc;

use ash::vk;
use ember_render::RenderResult;

use crate::context::DeviceContext;
use crate::error::VkContext;

/// CPU-waitable completion marker.
pub struct Fence {
    device: Arc<DeviceContext>,
    raw: vk::Fence,
}

impl Fence {
    pub fn new(device: &Arc<DeviceContext>, signaled: bool) -> RenderResult<Self> {
        let ci = vk::FenceCreateInfo {
            s_type: vk::StructureType::FENCE_CREATE_INFO,
            flags: if signaled {
                vk::FenceCreateFlags::SIGNALED
            } else {
                vk::FenceCreateFlags::empty()
            },
            ..Default::default()
        };
        // SAFETY: the device is alive for as long as the Arc is held.
        let raw = unsafe { device.raw().create_fence(&ci, None) }.context("create_fence")?;
        Ok(Self {
            device: Arc::clone(device),
            raw,
        })
    }

    pub fn raw(&self) -> vk::Fence {
        self.raw
    }

    /// Blocks without timeout.
    pub fn wait(&self) -> RenderResult<()> {
        // SAFETY: fence belongs to this device.
        unsafe {
            self.device
                .raw()
                .wait_for_fences(std::slice::from_ref(&self.raw), true, u64::MAX)
        }
        .context("wait_for_fences")
    }

    pub fn reset(&self) -> RenderResult<()> {
        // SAFETY: callers only reset fences with no pending submission.
        unsafe { self.device.raw().reset_fences(std::slice::from_ref(&self.raw)) }
            .context("reset_fences")
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        // SAFETY: owners wait for the device before dropping in-flight fences.
        unsafe { self.device.raw().destroy_fence(self.raw, None) };
    }
}

/// GPU-GPU ordering primitive.
pub struct Semaphore {
    device: Arc<DeviceContext>,
    raw: vk::Semaphore,
}

impl Semaphore {
    pub fn new(device: &Arc<DeviceContext>) -> RenderResult<Self> {
        let ci = vk::SemaphoreCreateInfo {
            s_type: vk::StructureType::SEMAPHORE_CREATE_INFO,
            ..Default::default()
        };
        // SAFETY: the device is alive for as long as the Arc is held.
        let raw =
            unsafe { device.raw().create_semaphore(&ci, None) }.context("create_semaphore")?;
        Ok(Self {
            device: Arc::clone(device),
            raw,
        })
    }

    pub fn raw(&self) -> vk::Semaphore {
        self.raw
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        // SAFETY: owners wait for the device before dropping.
        unsafe { self.device.raw().destroy_semaphore(self.raw, None) };
    }
}

/// One frame-in-flight slot.
pub struct FrameSlot {
    pub image_available: Semaphore,
    pub render_finished: Semaphore,
    /// Created signalled so the first wait returns immediately.
    pub in_flight: Fence,
}

impl FrameSlot {
    pub fn new(device: &Arc<DeviceContext>) -> RenderResult<Self> {
        Ok(Self {
            image_available: Semaphore::new(device)?,
            render_finished: Semaphore::new(device)?,
            in_flight: Fence::new(device, true)?,
        })
    }
}
