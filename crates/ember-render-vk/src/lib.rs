// SPDX-License-Identifier: CEPL-1.0
//! Vulkan implementation of [`ember_render::Renderer`]: compute path tracer
//! accumulated into a storage image and blitted to the swapchain.
#![deny(unsafe_op_in_unsafe_fn)]

pub mod backend;
pub mod compute;
pub mod config;
pub mod context;
pub mod error;
pub mod memory;
pub mod overlay;
pub mod resources;
pub mod shader;
pub mod surface;
pub mod swapchain;
pub mod sync;

use std::path::PathBuf;

use ember_render::{
    FrameDriver, FrameOutcome, RenderError, RenderResult, RenderSize, Renderer, Scene,
};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use tracing::{debug, info};

pub use backend::VkBackend;
pub use config::{ContextConfig, PresentPolicy, RenderResolution};
pub use context::{DeviceContext, InstanceContext, QueueFamilies};
pub use overlay::{Overlay, OverlayPass, ProgressOverlay};
pub use shader::ShaderBinary;
pub use surface::PresentSurface;
pub use swapchain::Swapchain;
pub use sync::{Fence, FrameSlot, Semaphore};

pub struct VkRenderer {
    driver: FrameDriver<VkBackend>,
    shader_path: Option<PathBuf>,
}

impl VkRenderer {
    pub fn set_overlay(&mut self, overlay: Option<Box<dyn Overlay>>) {
        self.driver.backend_mut().set_overlay(overlay);
    }

    pub fn frames_presented(&self) -> u64 {
        self.driver.frames_presented()
    }

    pub fn backend(&self) -> &VkBackend {
        self.driver.backend()
    }
}

impl Renderer for VkRenderer {
    type Config = ContextConfig;

    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        config: ContextConfig,
    ) -> RenderResult<Self> {
        if size.is_empty() {
            return Err(RenderError::Config(format!(
                "window {}x{} has no area to render into",
                size.width, size.height
            )));
        }
        let window = window
            .window_handle()
            .map_err(|e| RenderError::Loader(format!("window handle: {e}")))?
            .as_raw();
        let display = display
            .display_handle()
            .map_err(|e| RenderError::Loader(format!("display handle: {e}")))?
            .as_raw();

        let backend = VkBackend::new(window, display, size, &config)?;
        let driver = FrameDriver::new(backend, config.frames_in_flight, size)?;
        info!(
            frames_in_flight = config.frames_in_flight,
            images = driver.backend().swapchain().image_count(),
            "vulkan renderer ready"
        );
        Ok(Self {
            driver,
            shader_path: config.shader_path,
        })
    }

    fn resize(&mut self, size: RenderSize) {
        if size.is_empty() {
            debug!("window minimised; pausing");
        }
        self.driver.resize(size);
    }

    fn render(&mut self, scene: &Scene) -> RenderResult<FrameOutcome> {
        self.driver.run_frame(scene)
    }

    fn reset_accumulation(&mut self) {
        self.driver.invalidate();
    }

    fn sample_count(&self) -> u32 {
        self.driver.sample_count()
    }

    fn reload_shaders(&mut self) -> RenderResult<bool> {
        let Some(path) = self.shader_path.clone() else {
            debug!("no shader path configured; nothing to reload");
            return Ok(false);
        };
        let reloaded = self.driver.backend_mut().reload_shader(&path)?;
        if reloaded {
            self.driver.invalidate();
        }
        Ok(reloaded)
    }
}
