// SPDX-License-Identifier: CEPL-1.0
//! Instance and logical device ownership.
//!
//! Both contexts are shared through `Arc`. Every GPU object wrapper holds an
//! `Arc<DeviceContext>`, and the device holds its `Arc<InstanceContext>`, so
//! children are always destroyed before their parents.
use std::ffi::{c_void, CStr, CString};
use std::sync::Arc;

use ash::ext::debug_utils;
use ash::khr::swapchain;
use ash::{vk, Entry, Instance};
use ember_render::{RenderError, RenderResult};
use raw_window_handle::RawDisplayHandle;
use tracing::{debug, error, info, trace, warn};

use crate::config::ContextConfig;
use crate::error::VkContext;
use crate::surface::PresentSurface;
use crate::sync::Fence;

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _types: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user: *mut c_void,
) -> vk::Bool32 {
    if data.is_null() {
        return vk::FALSE;
    }
    // SAFETY: the loader passes a valid callback-data pointer for the call.
    let p_message = unsafe { (*data).p_message };
    if p_message.is_null() {
        return vk::FALSE;
    }
    // SAFETY: p_message is a NUL-terminated string owned by the loader.
    let msg = unsafe { CStr::from_ptr(p_message) }.to_string_lossy();
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        error!(target: "vulkan", "{msg}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        warn!(target: "vulkan", "{msg}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        debug!(target: "vulkan", "{msg}");
    } else {
        trace!(target: "vulkan", "{msg}");
    }
    vk::FALSE
}

struct DebugMessenger {
    loader: debug_utils::Instance,
    raw: vk::DebugUtilsMessengerEXT,
}

pub struct InstanceContext {
    entry: Entry,
    instance: Instance,
    debug: Option<DebugMessenger>,
}

impl InstanceContext {
    pub fn new(display: RawDisplayHandle, config: &ContextConfig) -> RenderResult<Arc<Self>> {
        // SAFETY: loading the Vulkan library has no preconditions beyond the
        // library itself being well-behaved.
        let entry = unsafe { Entry::load() }
            .map_err(|e| RenderError::Loader(format!("Vulkan loader: {e}")))?;

        let app = CString::new(config.app_name.as_str())
            .map_err(|_| RenderError::Config("app_name contains a NUL byte".into()))?;
        let app_info = vk::ApplicationInfo {
            s_type: vk::StructureType::APPLICATION_INFO,
            p_application_name: app.as_ptr(),
            application_version: 0,
            p_engine_name: c"ember".as_ptr(),
            engine_version: 0,
            api_version: vk::API_VERSION_1_3,
            ..Default::default()
        };

        let mut extensions = ash_window::enumerate_required_extensions(display)
            .context("enumerate_required_extensions")?
            .to_vec();

        let validation = config.validation && {
            // SAFETY: plain enumeration on a loaded entry.
            let layers = unsafe { entry.enumerate_instance_layer_properties() }
                .context("enumerate_instance_layer_properties")?;
            let found = layers
                .iter()
                .any(|l| l.layer_name_as_c_str().ok() == Some(VALIDATION_LAYER));
            if !found {
                warn!("validation requested but VK_LAYER_KHRONOS_validation is not installed");
            }
            found
        };
        let layers: Vec<*const std::ffi::c_char> = if validation {
            extensions.push(debug_utils::NAME.as_ptr());
            vec![VALIDATION_LAYER.as_ptr()]
        } else {
            Vec::new()
        };

        let create_info = vk::InstanceCreateInfo {
            s_type: vk::StructureType::INSTANCE_CREATE_INFO,
            p_application_info: &app_info,
            enabled_extension_count: extensions.len() as u32,
            pp_enabled_extension_names: extensions.as_ptr(),
            enabled_layer_count: layers.len() as u32,
            pp_enabled_layer_names: layers.as_ptr(),
            ..Default::default()
        };
        // SAFETY: every pointer in create_info outlives this call.
        let instance =
            unsafe { entry.create_instance(&create_info, None) }.context("create_instance")?;

        let debug = if validation {
            let loader = debug_utils::Instance::new(&entry, &instance);
            let ci = vk::DebugUtilsMessengerCreateInfoEXT {
                s_type: vk::StructureType::DEBUG_UTILS_MESSENGER_CREATE_INFO_EXT,
                message_severity: vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                    | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                    | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
                message_type: vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
                pfn_user_callback: Some(debug_callback),
                ..Default::default()
            };
            // SAFETY: the instance was created with VK_EXT_debug_utils enabled.
            match unsafe { loader.create_debug_utils_messenger(&ci, None) } {
                Ok(raw) => Some(DebugMessenger { loader, raw }),
                Err(e) => {
                    warn!("debug messenger unavailable: {e:?}");
                    None
                }
            }
        } else {
            None
        };

        info!(validation, "vulkan instance created");
        Ok(Arc::new(Self {
            entry,
            instance,
            debug,
        }))
    }

    pub fn entry(&self) -> &Entry {
        &self.entry
    }

    pub fn raw(&self) -> &Instance {
        &self.instance
    }
}

impl Drop for InstanceContext {
    fn drop(&mut self) {
        // SAFETY: all children hold an Arc to this context and are gone.
        unsafe {
            if let Some(debug) = self.debug.take() {
                debug
                    .loader
                    .destroy_debug_utils_messenger(debug.raw, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

/// Queue family indices; any of them may coincide.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueFamilies {
    /// Frame submission: dispatch, blit and overlay share one command buffer,
    /// so this family supports both graphics and compute.
    pub graphics: u32,
    pub compute: u32,
    pub present: u32,
}

impl QueueFamilies {
    /// Picks the first family for each capability. Missing any is fatal.
    pub fn resolve(
        families: &[vk::QueueFamilyProperties],
        mut supports_present: impl FnMut(u32) -> RenderResult<bool>,
    ) -> RenderResult<Self> {
        let first = |flags: vk::QueueFlags| {
            families
                .iter()
                .position(|f| f.queue_count > 0 && f.queue_flags.contains(flags))
                .map(|i| i as u32)
        };
        let graphics = first(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE)
            .ok_or_else(|| RenderError::Capability("no graphics+compute queue family".into()))?;
        let compute = first(vk::QueueFlags::COMPUTE)
            .ok_or_else(|| RenderError::Capability("no compute queue family".into()))?;

        let mut present = None;
        for i in 0..families.len() as u32 {
            if supports_present(i)? {
                present = Some(i);
                break;
            }
        }
        let present = present
            .ok_or_else(|| RenderError::Capability("no queue family can present".into()))?;

        Ok(Self {
            graphics,
            compute,
            present,
        })
    }

    /// Distinct families a queue is opened on. Dispatch is recorded on the
    /// graphics queue, so `compute` only has to exist.
    pub fn queue_families(&self) -> Vec<u32> {
        if self.graphics == self.present {
            vec![self.graphics]
        } else {
            vec![self.graphics, self.present]
        }
    }
}

pub struct DeviceContext {
    device: ash::Device,
    swapchain_fn: swapchain::Device,
    physical: vk::PhysicalDevice,
    properties: vk::PhysicalDeviceProperties,
    memory: vk::PhysicalDeviceMemoryProperties,
    families: QueueFamilies,
    graphics_queue: vk::Queue,
    present_queue: vk::Queue,
    command_pool: vk::CommandPool,
    instance: Arc<InstanceContext>,
}

impl DeviceContext {
    /// Selects an adapter, resolves queue families against `surface` and
    /// opens the device with swapchain, synchronization2 and dynamic rendering.
    pub fn open(
        instance: &Arc<InstanceContext>,
        surface: &PresentSurface,
        config: &ContextConfig,
    ) -> RenderResult<Arc<Self>> {
        let vki = instance.raw();

        // SAFETY: the instance is alive for the duration of this function.
        let adapters =
            unsafe { vki.enumerate_physical_devices() }.context("enumerate_physical_devices")?;
        if adapters.is_empty() {
            return Err(RenderError::Capability("no Vulkan adapter".into()));
        }
        let index = config.adapter_index.unwrap_or(0);
        let physical = *adapters.get(index).ok_or_else(|| {
            RenderError::Config(format!(
                "adapter {index} requested, {} available",
                adapters.len()
            ))
        })?;

        // SAFETY: physical came from this instance.
        let (properties, memory, family_props) = unsafe {
            (
                vki.get_physical_device_properties(physical),
                vki.get_physical_device_memory_properties(physical),
                vki.get_physical_device_queue_family_properties(physical),
            )
        };
        let name = properties
            .device_name_as_c_str()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "<unnamed>".into());
        info!(adapter = index, name = %name, of = adapters.len(), "adapter selected");

        let api = properties.api_version;
        if vk::api_version_major(api) == 1 && vk::api_version_minor(api) < 3 {
            return Err(RenderError::Capability(format!(
                "{name} supports Vulkan {}.{}, 1.3 required",
                vk::api_version_major(api),
                vk::api_version_minor(api)
            )));
        }

        let families = QueueFamilies::resolve(&family_props, |i| {
            surface.supports_present(physical, i)
        })?;
        debug!(?families, "queue families");

        // SAFETY: physical came from this instance.
        let ext_props = unsafe { vki.enumerate_device_extension_properties(physical) }
            .context("enumerate_device_extension_properties")?;
        let has_swapchain = ext_props
            .iter()
            .any(|e| e.extension_name_as_c_str().ok() == Some(swapchain::NAME));
        if !has_swapchain {
            return Err(RenderError::Capability(format!(
                "{name} lacks {}",
                swapchain::NAME.to_string_lossy()
            )));
        }

        let mut supported13 = vk::PhysicalDeviceVulkan13Features {
            s_type: vk::StructureType::PHYSICAL_DEVICE_VULKAN_1_3_FEATURES,
            ..Default::default()
        };
        let mut supported = vk::PhysicalDeviceFeatures2 {
            s_type: vk::StructureType::PHYSICAL_DEVICE_FEATURES_2,
            p_next: (&mut supported13) as *mut _ as *mut c_void,
            ..Default::default()
        };
        // SAFETY: the pNext chain points at a live Vulkan13Features struct.
        unsafe { vki.get_physical_device_features2(physical, &mut supported) };
        if supported13.synchronization2 == vk::FALSE {
            return Err(RenderError::Capability(format!("{name} lacks synchronization2")));
        }
        if supported13.dynamic_rendering == vk::FALSE {
            return Err(RenderError::Capability(format!("{name} lacks dynamicRendering")));
        }

        let mut feats13 = vk::PhysicalDeviceVulkan13Features {
            s_type: vk::StructureType::PHYSICAL_DEVICE_VULKAN_1_3_FEATURES,
            synchronization2: vk::TRUE,
            dynamic_rendering: vk::TRUE,
            ..Default::default()
        };
        let mut feats2 = vk::PhysicalDeviceFeatures2 {
            s_type: vk::StructureType::PHYSICAL_DEVICE_FEATURES_2,
            p_next: (&mut feats13) as *mut _ as *mut c_void,
            ..Default::default()
        };

        let priorities = [1.0_f32];
        let queue_infos: Vec<vk::DeviceQueueCreateInfo> = families
            .queue_families()
            .into_iter()
            .map(|family| vk::DeviceQueueCreateInfo {
                s_type: vk::StructureType::DEVICE_QUEUE_CREATE_INFO,
                queue_family_index: family,
                queue_count: 1,
                p_queue_priorities: priorities.as_ptr(),
                ..Default::default()
            })
            .collect();

        let device_exts = [swapchain::NAME.as_ptr()];
        let dinfo = vk::DeviceCreateInfo {
            s_type: vk::StructureType::DEVICE_CREATE_INFO,
            p_next: (&mut feats2) as *mut _ as *const c_void,
            queue_create_info_count: queue_infos.len() as u32,
            p_queue_create_infos: queue_infos.as_ptr(),
            enabled_extension_count: device_exts.len() as u32,
            pp_enabled_extension_names: device_exts.as_ptr(),
            ..Default::default()
        };
        // SAFETY: all pointers in dinfo reference locals that outlive the call.
        let device =
            unsafe { vki.create_device(physical, &dinfo, None) }.context("create_device")?;

        // SAFETY: each family had one queue requested above.
        let (graphics_queue, present_queue) = unsafe {
            (
                device.get_device_queue(families.graphics, 0),
                device.get_device_queue(families.present, 0),
            )
        };

        let pool_info = vk::CommandPoolCreateInfo {
            s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
            queue_family_index: families.graphics,
            flags: vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
            ..Default::default()
        };
        // SAFETY: device is valid; on failure it is destroyed before returning.
        let command_pool = match unsafe { device.create_command_pool(&pool_info, None) } {
            Ok(pool) => pool,
            Err(e) => {
                // SAFETY: nothing was created from the device yet.
                unsafe { device.destroy_device(None) };
                return Err(crate::error::vk_error("create_command_pool", e));
            }
        };

        let swapchain_fn = swapchain::Device::new(vki, &device);

        Ok(Arc::new(Self {
            device,
            swapchain_fn,
            physical,
            properties,
            memory,
            families,
            graphics_queue,
            present_queue,
            command_pool,
            instance: Arc::clone(instance),
        }))
    }

    pub fn raw(&self) -> &ash::Device {
        &self.device
    }

    pub fn instance(&self) -> &Arc<InstanceContext> {
        &self.instance
    }

    pub fn swapchain_fn(&self) -> &swapchain::Device {
        &self.swapchain_fn
    }

    pub fn physical(&self) -> vk::PhysicalDevice {
        self.physical
    }

    pub fn properties(&self) -> &vk::PhysicalDeviceProperties {
        &self.properties
    }

    pub fn memory_properties(&self) -> &vk::PhysicalDeviceMemoryProperties {
        &self.memory
    }

    pub fn families(&self) -> QueueFamilies {
        self.families
    }

    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    pub fn present_queue(&self) -> vk::Queue {
        self.present_queue
    }

    pub fn command_pool(&self) -> vk::CommandPool {
        self.command_pool
    }

    pub fn format_properties(&self, format: vk::Format) -> vk::FormatProperties {
        // SAFETY: physical belongs to the instance this device was made from.
        unsafe {
            self.instance
                .raw()
                .get_physical_device_format_properties(self.physical, format)
        }
    }

    pub fn wait_idle(&self) -> RenderResult<()> {
        // SAFETY: the device is alive.
        unsafe { self.device.device_wait_idle() }.context("device_wait_idle")
    }

    pub fn allocate_command_buffers(&self, count: u32) -> RenderResult<Vec<vk::CommandBuffer>> {
        let alloc_info = vk::CommandBufferAllocateInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
            command_pool: self.command_pool,
            level: vk::CommandBufferLevel::PRIMARY,
            command_buffer_count: count,
            ..Default::default()
        };
        // SAFETY: the pool belongs to this device; single-threaded use.
        unsafe { self.device.allocate_command_buffers(&alloc_info) }
            .context("allocate_command_buffers")
    }

    /// Caller guarantees none of `buffers` is pending.
    pub fn free_command_buffers(&self, buffers: &[vk::CommandBuffer]) {
        if buffers.is_empty() {
            return;
        }
        // SAFETY: buffers were allocated from this pool.
        unsafe { self.device.free_command_buffers(self.command_pool, buffers) };
    }

    /// Submits one command buffer on the graphics queue. The fence is reset
    /// right before submission.
    pub fn submit(
        &self,
        cmd: vk::CommandBuffer,
        wait: vk::Semaphore,
        wait_stage: vk::PipelineStageFlags,
        signal: vk::Semaphore,
        fence: &Fence,
    ) -> RenderResult<()> {
        fence.reset()?;
        let submit = vk::SubmitInfo {
            s_type: vk::StructureType::SUBMIT_INFO,
            wait_semaphore_count: 1,
            p_wait_semaphores: &wait,
            p_wait_dst_stage_mask: &wait_stage,
            command_buffer_count: 1,
            p_command_buffers: &cmd,
            signal_semaphore_count: 1,
            p_signal_semaphores: &signal,
            ..Default::default()
        };
        // SAFETY: cmd is fully recorded; semaphores and fence are live.
        unsafe {
            self.device
                .queue_submit(self.graphics_queue, std::slice::from_ref(&submit), fence.raw())
        }
        .context("queue_submit")
    }

    /// Allocates and begins a one-time command buffer.
    pub fn begin_single_use(&self) -> RenderResult<vk::CommandBuffer> {
        let cmd = self
            .allocate_command_buffers(1)?
            .pop()
            .ok_or_else(|| RenderError::platform("allocate_command_buffers", "no buffer returned"))?;
        let begin = vk::CommandBufferBeginInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
            flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
            ..Default::default()
        };
        // SAFETY: freshly allocated, in the initial state.
        if let Err(e) = unsafe { self.device.begin_command_buffer(cmd, &begin) } {
            self.free_command_buffers(&[cmd]);
            return Err(crate::error::vk_error("begin_command_buffer", e));
        }
        Ok(cmd)
    }

    /// Ends, submits and waits for a buffer from [`Self::begin_single_use`],
    /// then frees it.
    pub fn end_and_submit(&self, cmd: vk::CommandBuffer) -> RenderResult<()> {
        let result = (|| {
            // SAFETY: cmd is in the recording state.
            unsafe { self.device.end_command_buffer(cmd) }.context("end_command_buffer")?;
            let submit = vk::SubmitInfo {
                s_type: vk::StructureType::SUBMIT_INFO,
                command_buffer_count: 1,
                p_command_buffers: &cmd,
                ..Default::default()
            };
            // SAFETY: cmd is executable; waiting for idle before freeing it.
            unsafe {
                self.device
                    .queue_submit(self.graphics_queue, std::slice::from_ref(&submit), vk::Fence::null())
                    .context("queue_submit(single use)")?;
                self.device
                    .queue_wait_idle(self.graphics_queue)
                    .context("queue_wait_idle")
            }
        })();
        self.free_command_buffers(&[cmd]);
        result
    }
}

impl Drop for DeviceContext {
    fn drop(&mut self) {
        // SAFETY: every child object holds an Arc to this context, so none is
        // left; waiting idle covers work submitted by them.
        unsafe {
            let _ = self.device.device_wait_idle();
            self.device.destroy_command_pool(self.command_pool, None);
            self.device.destroy_device(None);
        }
    }
}
