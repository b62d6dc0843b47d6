// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
mod config;

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use ember_core::{init_tracing, FrameClock};
use ember_math::glam::{Mat4, Vec3};
use ember_math::{Camera, FlyController};
use ember_render::{FrameOutcome, RenderSize, Renderer, Scene};
use ember_render_vk::{ContextConfig, VkRenderer};
use tracing::{error, info};

use ember_platform::winit::{
    application::ApplicationHandler,
    event::{ElementState, WindowEvent},
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    keyboard::{KeyCode, PhysicalKey},
    window::{Window, WindowId},
};
use ember_platform::{create_window, wheel_lines, Drag, InputState};

use crate::config::WindowCfg;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Config file; missing means defaults
    #[arg(long, default_value = "ember.toml")]
    config: PathBuf,
    /// Overrides `render.frames_in_flight`
    #[arg(long)]
    frames_in_flight: Option<usize>,
    /// Overrides `render.adapter`
    #[arg(long)]
    adapter: Option<usize>,
    /// GLSL compute shader to compile instead of the built-in one
    #[arg(long)]
    shader: Option<PathBuf>,
}

struct App {
    window_cfg: WindowCfg,
    render_cfg: ContextConfig,
    // Dropped before the window it draws into.
    renderer: Option<VkRenderer>,
    window: Option<Window>,
    render_size: RenderSize,

    scene: Scene,
    controller: FlyController,
    input: InputState,
    clock: FrameClock,

    frames: u32,
    last_fps_instant: Instant,
    paused: bool,
    fatal: Option<anyhow::Error>,
}

impl App {
    fn new(window_cfg: WindowCfg, render_cfg: ContextConfig) -> Self {
        Self {
            window_cfg,
            render_cfg,
            renderer: None,
            window: None,
            render_size: RenderSize::new(1, 1),
            scene: Scene {
                camera: Camera {
                    transform: Mat4::from_translation(Vec3::new(0.0, 0.5, 6.0)),
                    ..Default::default()
                },
                ..Default::default()
            },
            controller: FlyController {
                rotate_sensitivity: 0.005,
                pan_speed: 0.01,
                move_speed: 2.0,
                zoom_step: 0.5,
            },
            input: InputState::default(),
            clock: FrameClock::new(),
            frames: 0,
            last_fps_instant: Instant::now(),
            paused: false,
            fatal: None,
        }
    }

    fn init(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let window = create_window(
            event_loop,
            &self.window_cfg.title,
            (self.window_cfg.width, self.window_cfg.height),
        )?;
        let size = window.inner_size();
        self.render_size = RenderSize::new(size.width, size.height);
        self.paused = self.render_size.is_empty();
        self.window = Some(window);

        if self.paused {
            info!("window starts minimised; renderer deferred");
            return Ok(());
        }
        self.create_renderer()
    }

    fn create_renderer(&mut self) -> Result<()> {
        let Some(window) = &self.window else {
            return Ok(());
        };
        let renderer = VkRenderer::new(window, window, self.render_size, self.render_cfg.clone())
            .context("vulkan init")?;
        info!(
            width = self.render_size.width,
            height = self.render_size.height,
            "renderer initialised"
        );
        self.renderer = Some(renderer);
        Ok(())
    }

    fn shutdown(&mut self, event_loop: &ActiveEventLoop) {
        self.renderer = None;
        self.window = None;
        event_loop.exit();
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, err: anyhow::Error) {
        error!("{err:#}");
        self.fatal = Some(err);
        self.shutdown(event_loop);
    }

    fn camera_moved(&mut self) {
        if let Some(renderer) = &mut self.renderer {
            renderer.reset_accumulation();
        }
    }

    fn redraw(&mut self, event_loop: &ActiveEventLoop) {
        let dt = self.clock.tick().as_secs_f32();
        let held = self.input.held();
        if !held.is_empty() {
            let step = FlyController {
                move_speed: self.controller.move_speed * dt,
                ..self.controller
            };
            if step.fly(&mut self.scene.camera, held) {
                self.camera_moved();
            }
        }
        self.scene.time = self.clock.elapsed_secs();

        let Some(renderer) = &mut self.renderer else {
            return;
        };
        match renderer.render(&self.scene) {
            Ok(FrameOutcome::Presented) => self.frames = self.frames.saturating_add(1),
            Ok(FrameOutcome::Recreated | FrameOutcome::Skipped) => {}
            Err(e) => self.fail(event_loop, anyhow::Error::new(e).context("render")),
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        if let Err(e) = self.init(event_loop) {
            self.fail(event_loop, e);
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, window_id: WindowId, event: WindowEvent) {
        if let Some(window) = &self.window {
            if window_id != window.id() {
                return;
            }
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("CloseRequested");
                self.shutdown(event_loop);
            }

            WindowEvent::Resized(new_size) => {
                self.render_size = RenderSize::new(new_size.width, new_size.height);
                let now_paused = self.render_size.is_empty();
                if self.paused != now_paused {
                    info!(paused = now_paused, "pause state changed");
                }
                self.paused = now_paused;
                if let Some(renderer) = &mut self.renderer {
                    renderer.resize(self.render_size);
                } else if !now_paused {
                    if let Err(e) = self.create_renderer() {
                        self.fail(event_loop, e);
                    }
                }
            }

            WindowEvent::Focused(false) => self.input.release_all(),

            WindowEvent::KeyboardInput { event, .. } => {
                let PhysicalKey::Code(code) = event.physical_key else {
                    return;
                };
                let pressed = event.state == ElementState::Pressed;
                match code {
                    KeyCode::Escape if pressed => self.shutdown(event_loop),
                    KeyCode::KeyR if pressed && !event.repeat => {
                        if let Some(renderer) = &mut self.renderer {
                            match renderer.reload_shaders() {
                                Ok(reloaded) => info!(reloaded, "shader reload requested"),
                                Err(e) => self.fail(event_loop, anyhow::Error::new(e).context("reload")),
                            }
                        }
                    }
                    _ => {
                        self.input.key(code, event.state);
                    }
                }
            }

            WindowEvent::MouseInput { state, button, .. } => self.input.button(button, state),

            WindowEvent::CursorMoved { position, .. } => {
                let moved = match self.input.cursor_moved(position.x, position.y) {
                    Some(Drag::Rotate { dx, dy }) => {
                        self.controller.rotate(&mut self.scene.camera, dx, dy)
                    }
                    Some(Drag::Pan { dx, dy }) => self.controller.pan(&mut self.scene.camera, dx, dy),
                    None => false,
                };
                if moved {
                    self.camera_moved();
                }
            }

            WindowEvent::MouseWheel { delta, .. } => {
                if self.controller.zoom(&mut self.scene.camera, wheel_lines(delta)) {
                    self.camera_moved();
                }
            }

            WindowEvent::RedrawRequested => {
                if !self.paused {
                    self.redraw(event_loop);
                }
            }

            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none() {
            return;
        }

        if self.paused || self.renderer.is_none() {
            // minimised: sleep until the next resize
            event_loop.set_control_flow(ControlFlow::Wait);
            self.frames = 0;
            return;
        }

        event_loop.set_control_flow(ControlFlow::Poll);
        if let Some(w) = &self.window {
            w.request_redraw();
        }

        let now = Instant::now();
        if now.duration_since(self.last_fps_instant).as_secs_f32() >= 1.0 {
            let samples = self.renderer.as_ref().map_or(0, |r| r.sample_count());
            info!(fps = self.frames, samples, "frame rate");
            self.frames = 0;
            self.last_fps_instant = now;
        }
    }
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    let cfg = config::load(&args.config)?;
    let mut render_cfg = cfg.render.to_context();
    if let Some(k) = args.frames_in_flight {
        render_cfg.frames_in_flight = k;
    }
    if let Some(adapter) = args.adapter {
        render_cfg.adapter_index = Some(adapter);
    }
    if let Some(shader) = args.shader {
        render_cfg.shader_path = Some(shader);
    }

    let event_loop: EventLoop<()> = EventLoop::new()?;
    let mut app = App::new(cfg.window, render_cfg);
    event_loop.run_app(&mut app)?;

    match app.fatal.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
