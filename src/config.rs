//! Renderer configuration and fixed constants.

use std::path::{Path, PathBuf};

use ash::vk;
use glam::Vec3;

/// Depth attachment format shared by every pass that depth-tests.
pub const DEPTH_FORMAT: vk::Format = vk::Format::D32_SFLOAT;
/// Format of every offscreen color target.
pub const OFFSCREEN_FORMAT: vk::Format = vk::Format::R8G8B8A8_SRGB;

/// Number of taps in each 1D Gaussian blur kernel.
pub const KERNEL_TAPS: usize = 22;
/// Standard deviation of the blur kernel, in texels.
pub const KERNEL_SPREAD: f32 = 9.0;

/// Texture id meaning "no texture bound" for an optional material slot.
pub const NO_TEXTURE: u32 = 0xFFFF_FFFF;

pub const FILTER_CLEAR_COLOR: [f32; 4] = [0.0, 0.0, 0.0, 1.0];
pub const COMPOSITE_CLEAR_COLOR: [f32; 4] = [0.2, 0.2, 0.2, 1.0];
pub const DEPTH_CLEAR: f32 = 1.0;

/// Which stage topology the frame loop records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RenderPath {
    /// Filter pass (bright, vertical blur, horizontal blur) then composite.
    #[default]
    Bloom,
    /// Two-subpass main pass writing the backbuffer directly.
    Direct,
}

/// Camera projection and movement parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct CameraConfig {
    /// Vertical field of view in radians
    pub fov_y: f32,
    pub near: f32,
    pub far: f32,
    /// Units per second without modifiers
    pub base_speed: f32,
    pub fast_multiplier: f32,
    pub slow_multiplier: f32,
    /// Radians per pixel of mouse motion
    pub mouse_sensitivity: f32,
    pub start_position: Vec3,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            fov_y: 60.0_f32.to_radians(),
            near: 0.1,
            far: 100.0,
            base_speed: 1.7,
            fast_multiplier: 5.0,
            slow_multiplier: 0.05,
            mouse_sensitivity: 0.001,
            start_position: Vec3::ZERO,
        }
    }
}

/// Renderer configuration.
#[derive(Debug, Clone)]
pub struct RendererConfig {
    /// Window title
    pub title: String,
    /// Initial window width
    pub width: u32,
    /// Initial window height
    pub height: u32,
    /// glTF model to render
    pub model_path: PathBuf,
    /// Directory holding the compiled `.spv` shader modules
    pub shader_dir: PathBuf,
    /// Enable the Khronos validation layer
    pub validation: bool,
    /// Enable vsync
    pub vsync: bool,
    pub render_path: RenderPath,
    pub camera: CameraConfig,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            title: "Bloom Renderer".to_string(),
            width: 1280,
            height: 720,
            model_path: PathBuf::from("assets/scene.gltf"),
            shader_dir: PathBuf::from("assets/shaders"),
            validation: cfg!(debug_assertions),
            vsync: true,
            render_path: RenderPath::Bloom,
            camera: CameraConfig::default(),
        }
    }
}

/// Path of a compiled shader module, e.g. `bright.frag` resolves to `<dir>/bright.frag.spv`.
pub fn shader_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{name}.spv"))
}

impl RendererConfig {
    pub fn shader_path(&self, name: &str) -> PathBuf {
        shader_path(&self.shader_dir, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shader_paths_append_spv() {
        let config = RendererConfig {
            shader_dir: PathBuf::from("shaders"),
            ..Default::default()
        };
        assert_eq!(
            config.shader_path("vertical.frag"),
            PathBuf::from("shaders").join("vertical.frag.spv")
        );
    }

    #[test]
    fn default_camera_matches_projection_constants() {
        let camera = CameraConfig::default();
        assert!((camera.fov_y - std::f32::consts::FRAC_PI_3).abs() < 1e-6);
        assert_eq!(camera.near, 0.1);
        assert_eq!(camera.far, 100.0);
    }
}
