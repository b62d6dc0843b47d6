// SPDX-License-Identifier: CEPL-1.0
//! Window creation and translation of winit input into camera motion.
pub use winit;

use anyhow::{Context, Result};
use ember_math::FlyInput;
use winit::dpi::LogicalSize;
use winit::event::{ElementState, MouseButton, MouseScrollDelta};
use winit::event_loop::ActiveEventLoop;
use winit::keyboard::KeyCode;
use winit::window::Window;

/// Pixels of trackpad scroll that count as one wheel notch.
const PIXELS_PER_LINE: f64 = 40.0;

pub fn create_window(event_loop: &ActiveEventLoop, title: &str, size: (u32, u32)) -> Result<Window> {
    let attrs = Window::default_attributes()
        .with_title(title)
        .with_inner_size(LogicalSize::new(size.0, size.1));
    let window = event_loop.create_window(attrs).context("create_window")?;
    tracing::debug!(?size, scale = window.scale_factor(), "window created");
    Ok(window)
}

/// WASD moves in the view plane, Q/E move down/up.
pub fn fly_key(code: KeyCode) -> Option<FlyInput> {
    Some(match code {
        KeyCode::KeyW => FlyInput::FORWARD,
        KeyCode::KeyS => FlyInput::BACKWARD,
        KeyCode::KeyA => FlyInput::LEFT,
        KeyCode::KeyD => FlyInput::RIGHT,
        KeyCode::KeyE => FlyInput::UP,
        KeyCode::KeyQ => FlyInput::DOWN,
        _ => return None,
    })
}

/// Cursor motion while a button is held.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Drag {
    Rotate { dx: f32, dy: f32 },
    Pan { dx: f32, dy: f32 },
}

/// Held keys and mouse buttons between events.
#[derive(Debug, Default)]
pub struct InputState {
    held: FlyInput,
    rotating: bool,
    panning: bool,
    cursor: Option<(f64, f64)>,
}

impl InputState {
    pub fn held(&self) -> FlyInput {
        self.held
    }

    /// Returns true when the key is a movement key.
    pub fn key(&mut self, code: KeyCode, state: ElementState) -> bool {
        let Some(flag) = fly_key(code) else {
            return false;
        };
        self.held.set(flag, state.is_pressed());
        true
    }

    pub fn button(&mut self, button: MouseButton, state: ElementState) {
        let pressed = state.is_pressed();
        match button {
            MouseButton::Left => self.rotating = pressed,
            MouseButton::Right => self.panning = pressed,
            _ => {}
        }
    }

    pub fn cursor_moved(&mut self, x: f64, y: f64) -> Option<Drag> {
        let prev = self.cursor.replace((x, y))?;
        let dx = (x - prev.0) as f32;
        let dy = (y - prev.1) as f32;
        if self.rotating {
            Some(Drag::Rotate { dx, dy })
        } else if self.panning {
            Some(Drag::Pan { dx, dy })
        } else {
            None
        }
    }

    /// Focus loss drops everything held; key-up events will not arrive.
    pub fn release_all(&mut self) {
        *self = Self {
            cursor: self.cursor,
            ..Self::default()
        };
    }
}

/// Wheel notches, positive away from the user.
pub fn wheel_lines(delta: MouseScrollDelta) -> f32 {
    match delta {
        MouseScrollDelta::LineDelta(_, y) => y,
        MouseScrollDelta::PixelDelta(pos) => (pos.y / PIXELS_PER_LINE) as f32,
    }
}
