//! User-controlled camera and light state.
//!
//! The input layer owns a [`UserState`] and mutates it from window events. Once per frame the
//! renderer receives an immutable [`FrameSnapshot`] of it.

use bitflags::bitflags;
use glam::{Mat4, Vec2, Vec3};

use crate::config::CameraConfig;

bitflags! {
    /// Input actions currently held.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct InputFlags: u32 {
        const FORWARD = 1 << 0;
        const BACKWARD = 1 << 1;
        const STRAFE_LEFT = 1 << 2;
        const STRAFE_RIGHT = 1 << 3;
        const LEVITATE = 1 << 4;
        const SINK = 1 << 5;
        const FAST = 1 << 6;
        const SLOW = 1 << 7;
        const MOUSE_LOOK = 1 << 8;
        const LIGHT_FORWARD = 1 << 9;
        const LIGHT_BACKWARD = 1 << 10;
        const LIGHT_LEFT = 1 << 11;
        const LIGHT_RIGHT = 1 << 12;
    }
}

/// What the renderer reads each frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameSnapshot {
    pub camera_to_world: Mat4,
    pub light_position: Vec3,
}

/// Mutable camera, light and input state.
#[derive(Debug, Clone, PartialEq)]
pub struct UserState {
    pub inputs: InputFlags,
    /// Accumulated pointer position in pixels
    pub mouse: Vec2,
    previous_mouse: Vec2,
    was_mousing: bool,
    pub camera_to_world: Mat4,
    pub light_position: Vec3,
}

impl UserState {
    pub fn new(camera: &CameraConfig) -> Self {
        Self {
            inputs: InputFlags::empty(),
            mouse: Vec2::ZERO,
            previous_mouse: Vec2::ZERO,
            was_mousing: false,
            camera_to_world: Mat4::from_translation(camera.start_position),
            light_position: Vec3::new(4.0, 10.0, 0.0),
        }
    }

    pub fn set(&mut self, flags: InputFlags, held: bool) {
        self.inputs.set(flags, held);
    }

    pub fn toggle_mouse_look(&mut self) -> bool {
        self.inputs.toggle(InputFlags::MOUSE_LOOK);
        self.inputs.contains(InputFlags::MOUSE_LOOK)
    }

    pub fn add_mouse_motion(&mut self, delta: Vec2) {
        self.mouse += delta;
    }

    pub fn snapshot(&self) -> FrameSnapshot {
        FrameSnapshot {
            camera_to_world: self.camera_to_world,
            light_position: self.light_position,
        }
    }

    /// Integrate held inputs over `dt` seconds.
    pub fn advance(&mut self, dt: f32, config: &CameraConfig) {
        if self.inputs.contains(InputFlags::MOUSE_LOOK) {
            // The first motion sample after enabling only establishes the reference point
            if self.was_mousing {
                let delta = (self.mouse - self.previous_mouse) * config.mouse_sensitivity;
                self.camera_to_world *= Mat4::from_rotation_x(-delta.y);
                self.camera_to_world *= Mat4::from_rotation_y(-delta.x);
            }
            self.previous_mouse = self.mouse;
            self.was_mousing = true;
        } else {
            self.was_mousing = false;
        }

        let mut speed = dt * config.base_speed;
        if self.inputs.contains(InputFlags::FAST) {
            speed *= config.fast_multiplier;
        }
        if self.inputs.contains(InputFlags::SLOW) {
            speed *= config.slow_multiplier;
        }

        let camera_axes = [
            (InputFlags::FORWARD, Vec3::NEG_Z),
            (InputFlags::BACKWARD, Vec3::Z),
            (InputFlags::STRAFE_LEFT, Vec3::NEG_X),
            (InputFlags::STRAFE_RIGHT, Vec3::X),
            (InputFlags::LEVITATE, Vec3::Y),
            (InputFlags::SINK, Vec3::NEG_Y),
        ];
        for (flag, direction) in camera_axes {
            if self.inputs.contains(flag) {
                // Post-multiplied, so motion is along the camera's own axes
                self.camera_to_world *= Mat4::from_translation(direction * speed);
            }
        }

        let light_axes = [
            (InputFlags::LIGHT_FORWARD, Vec3::NEG_Z),
            (InputFlags::LIGHT_BACKWARD, Vec3::Z),
            (InputFlags::LIGHT_LEFT, Vec3::NEG_X),
            (InputFlags::LIGHT_RIGHT, Vec3::X),
        ];
        for (flag, direction) in light_axes {
            if self.inputs.contains(flag) {
                self.light_position += direction * speed;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn position(state: &UserState) -> Vec3 {
        state.camera_to_world.w_axis.truncate()
    }

    #[test]
    fn forward_moves_along_negative_z() {
        let config = CameraConfig::default();
        let mut state = UserState::new(&config);
        state.set(InputFlags::FORWARD, true);
        state.advance(1.0, &config);
        assert!(position(&state).abs_diff_eq(Vec3::new(0.0, 0.0, -1.7), 1e-5));
    }

    #[test]
    fn modifiers_scale_speed() {
        let config = CameraConfig::default();
        let mut state = UserState::new(&config);
        state.set(InputFlags::LEVITATE | InputFlags::FAST, true);
        state.advance(0.5, &config);
        assert!(position(&state).abs_diff_eq(Vec3::new(0.0, 0.5 * 1.7 * 5.0, 0.0), 1e-5));

        let mut state = UserState::new(&config);
        state.set(InputFlags::STRAFE_RIGHT | InputFlags::SLOW, true);
        state.advance(1.0, &config);
        assert!(position(&state).abs_diff_eq(Vec3::new(1.7 * 0.05, 0.0, 0.0), 1e-5));
    }

    #[test]
    fn first_mouse_look_sample_does_not_rotate() {
        let config = CameraConfig::default();
        let mut state = UserState::new(&config);
        state.mouse = Vec2::new(500.0, 300.0);
        assert!(state.toggle_mouse_look());

        state.advance(0.016, &config);
        assert_eq!(state.camera_to_world, Mat4::IDENTITY);

        state.add_mouse_motion(Vec2::new(100.0, 0.0));
        state.advance(0.016, &config);
        let expected = Mat4::from_rotation_x(0.0) * Mat4::from_rotation_y(-0.1);
        assert!(state.camera_to_world.abs_diff_eq(expected, 1e-6));
    }

    #[test]
    fn mouse_motion_is_ignored_without_mouse_look() {
        let config = CameraConfig::default();
        let mut state = UserState::new(&config);
        state.add_mouse_motion(Vec2::new(40.0, 40.0));
        state.advance(0.016, &config);
        assert_eq!(state.camera_to_world, Mat4::IDENTITY);
    }

    #[test]
    fn arrow_inputs_move_the_light() {
        let config = CameraConfig::default();
        let mut state = UserState::new(&config);
        let start = state.light_position;
        state.set(InputFlags::LIGHT_RIGHT, true);
        state.advance(1.0, &config);
        assert!(state
            .light_position
            .abs_diff_eq(start + Vec3::new(1.7, 0.0, 0.0), 1e-5));
        assert_eq!(state.snapshot().light_position, state.light_position);
    }
}
