//! Window and input handling using winit.
//!
//! The event loop owns the [`UserState`], feeds it from keyboard and mouse events, and hands
//! the renderer one snapshot per frame.

use std::sync::Arc;
use std::time::Instant;

use ash::vk;
use glam::Vec2;
use winit::{
    dpi::PhysicalSize,
    event::{DeviceEvent, ElementState, Event, KeyEvent, MouseButton, WindowEvent},
    event_loop::{ControlFlow, EventLoop, EventLoopWindowTarget},
    keyboard::{KeyCode, PhysicalKey},
    window::{CursorGrabMode, Window as WinitWindow, WindowBuilder},
};

use crate::camera::{InputFlags, UserState};
use crate::config::RendererConfig;
use crate::error::{RenderError, RenderResult};
use crate::renderer::Renderer;

/// Input action bound to a physical key.
pub fn input_for_key(code: KeyCode) -> Option<InputFlags> {
    Some(match code {
        KeyCode::KeyW => InputFlags::FORWARD,
        KeyCode::KeyS => InputFlags::BACKWARD,
        KeyCode::KeyA => InputFlags::STRAFE_LEFT,
        KeyCode::KeyD => InputFlags::STRAFE_RIGHT,
        KeyCode::KeyE => InputFlags::LEVITATE,
        KeyCode::KeyQ => InputFlags::SINK,
        KeyCode::ShiftLeft | KeyCode::ShiftRight => InputFlags::FAST,
        KeyCode::ControlLeft | KeyCode::ControlRight => InputFlags::SLOW,
        KeyCode::ArrowUp => InputFlags::LIGHT_FORWARD,
        KeyCode::ArrowDown => InputFlags::LIGHT_BACKWARD,
        KeyCode::ArrowLeft => InputFlags::LIGHT_LEFT,
        KeyCode::ArrowRight => InputFlags::LIGHT_RIGHT,
        _ => return None,
    })
}

/// Wrapper around the winit window tracking its size
pub struct Window {
    window: Arc<WinitWindow>,
    width: u32,
    height: u32,
}

impl Window {
    pub fn new(event_loop: &EventLoop<()>, title: &str, width: u32, height: u32) -> RenderResult<Self> {
        let window = WindowBuilder::new()
            .with_title(title)
            .with_inner_size(PhysicalSize::new(width, height))
            .build(event_loop)
            .map_err(|e| RenderError::InitializationFailed(format!("Failed to create window: {e}")))?;
        let size = window.inner_size();

        Ok(Self {
            window: Arc::new(window),
            width: size.width,
            height: size.height,
        })
    }

    pub fn window(&self) -> &WinitWindow {
        &self.window
    }

    pub fn extent(&self) -> vk::Extent2D {
        vk::Extent2D {
            width: self.width,
            height: self.height,
        }
    }

    /// Confine and hide the cursor while mouse-look is on.
    fn grab_cursor(&self, grab: bool) {
        let result = if grab {
            self.window
                .set_cursor_grab(CursorGrabMode::Confined)
                .or_else(|_| self.window.set_cursor_grab(CursorGrabMode::Locked))
        } else {
            self.window.set_cursor_grab(CursorGrabMode::None)
        };
        if let Err(e) = result {
            log::warn!("Cursor grab not supported: {e}");
        }
        self.window.set_cursor_visible(!grab);
    }
}

/// Open a window and render until it is closed or Escape is pressed.
pub fn run(config: RendererConfig) -> RenderResult<()> {
    let event_loop = EventLoop::new()
        .map_err(|e| RenderError::InitializationFailed(format!("Failed to create event loop: {e}")))?;
    let mut window = Window::new(&event_loop, &config.title, config.width, config.height)?;

    let camera = config.camera.clone();
    let mut renderer = Renderer::new(window.window(), window.extent(), config)?;
    let mut user = UserState::new(&camera);
    let mut clock = FrameClock::new(Instant::now());
    let mut result = Ok(());

    event_loop
        .run(|event, elwt: &EventLoopWindowTarget<()>| {
            elwt.set_control_flow(ControlFlow::Poll);

            match event {
                Event::WindowEvent { event, .. } => match event {
                    WindowEvent::CloseRequested => elwt.exit(),
                    WindowEvent::Resized(size) => {
                        window.width = size.width;
                        window.height = size.height;
                        renderer.resize(window.extent());
                    }
                    WindowEvent::KeyboardInput {
                        event:
                            KeyEvent {
                                physical_key: PhysicalKey::Code(code),
                                state,
                                ..
                            },
                        ..
                    } => {
                        let held = state == ElementState::Pressed;
                        if code == KeyCode::Escape && held {
                            elwt.exit();
                        } else if let Some(flags) = input_for_key(code) {
                            user.set(flags, held);
                        }
                    }
                    WindowEvent::MouseInput {
                        state: ElementState::Pressed,
                        button: MouseButton::Right,
                        ..
                    } => {
                        let looking = user.toggle_mouse_look();
                        window.grab_cursor(looking);
                    }
                    _ => {}
                },
                Event::DeviceEvent {
                    event: DeviceEvent::MouseMotion { delta: (dx, dy) },
                    ..
                } => user.add_mouse_motion(Vec2::new(dx as f32, dy as f32)),
                Event::AboutToWait => {
                    match renderer.render_frame(&user.snapshot()) {
                        Ok(outcome) if outcome.advances_time() => {
                            let dt = clock.tick(Instant::now());
                            user.advance(dt, &camera);
                        }
                        Ok(_) => {}
                        Err(e) => {
                            result = Err(e);
                            elwt.exit();
                        }
                    }
                }
                _ => {}
            }
        })
        .map_err(|e| RenderError::InitializationFailed(format!("Event loop failed: {e}")))?;

    result
}

/// Time between presented frames. Skipped frames leave the clock alone, so their time is
/// carried into the next presented frame.
#[derive(Debug, Clone, Copy)]
struct FrameClock {
    last_presented: Instant,
}

impl FrameClock {
    fn new(start: Instant) -> Self {
        Self { last_presented: start }
    }

    /// Seconds since the previous presented frame. Call only once a frame was presented.
    fn tick(&mut self, now: Instant) -> f32 {
        let dt = now.saturating_duration_since(self.last_presented).as_secs_f32();
        self.last_presented = now;
        dt
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn skipped_frames_carry_their_time_forward() {
        let start = Instant::now();
        let mut clock = FrameClock::new(start);

        // Two frames skipped while the surface is recreated, then one presented
        let dt = clock.tick(start + Duration::from_millis(48));
        assert!((dt - 0.048).abs() < 1e-4);

        let dt = clock.tick(start + Duration::from_millis(64));
        assert!((dt - 0.016).abs() < 1e-4);
    }

    #[test]
    fn clock_never_runs_backwards() {
        let start = Instant::now() + Duration::from_millis(10);
        let mut clock = FrameClock::new(start);
        assert_eq!(clock.tick(start - Duration::from_millis(5)), 0.0);
    }

    #[test]
    fn movement_keys_map_to_camera_flags() {
        assert_eq!(input_for_key(KeyCode::KeyW), Some(InputFlags::FORWARD));
        assert_eq!(input_for_key(KeyCode::KeyQ), Some(InputFlags::SINK));
        assert_eq!(input_for_key(KeyCode::ShiftRight), Some(InputFlags::FAST));
        assert_eq!(input_for_key(KeyCode::ControlLeft), Some(InputFlags::SLOW));
    }

    #[test]
    fn arrows_move_the_light() {
        assert_eq!(input_for_key(KeyCode::ArrowUp), Some(InputFlags::LIGHT_FORWARD));
        assert_eq!(input_for_key(KeyCode::ArrowRight), Some(InputFlags::LIGHT_RIGHT));
    }

    #[test]
    fn unbound_keys_are_ignored() {
        assert_eq!(input_for_key(KeyCode::KeyZ), None);
        assert_eq!(input_for_key(KeyCode::Escape), None);
    }
}
