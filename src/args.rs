//! Command-line arguments.

use std::path::PathBuf;

use clap::Parser;

use crate::config::{RenderPath, RendererConfig};

/// Render path selection for the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum CliRenderPath {
    /// Bright-pass extraction, two-pass Gaussian blur and composite.
    #[default]
    Bloom,
    /// Single main pass shading straight onto the backbuffer, no bloom.
    Direct,
}

impl From<CliRenderPath> for RenderPath {
    fn from(cli: CliRenderPath) -> Self {
        match cli {
            CliRenderPath::Bloom => RenderPath::Bloom,
            CliRenderPath::Direct => RenderPath::Direct,
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "bloom-renderer",
    about = "Real-time Vulkan renderer with a bloom filter",
    long_about = "Renders a glTF scene through a geometry pass, a three-stage bloom filter \
        and a full-screen composite.\n\n\
        CONTROLS:\n\
          W/S/A/D  move the camera      E/Q    up/down\n\
          Shift    fast                 Ctrl   slow\n\
          Arrows   move the light       Right mouse  toggle mouse look\n\
          Escape   quit",
    version
)]
pub struct Args {
    /// glTF model to render.
    #[arg(default_value = "assets/scene.gltf")]
    pub model: PathBuf,

    /// Directory holding the compiled `.spv` shaders.
    #[arg(long, default_value = "assets/shaders")]
    pub shader_dir: PathBuf,

    /// Initial window width in pixels.
    #[arg(long, default_value = "1280")]
    pub width: u32,

    /// Initial window height in pixels.
    #[arg(long, default_value = "720")]
    pub height: u32,

    /// Which stage topology to render with.
    #[arg(long, default_value = "bloom", value_enum)]
    pub path: CliRenderPath,

    /// Disable vertical sync (may cause tearing).
    #[arg(long)]
    pub no_vsync: bool,

    /// Enable GPU validation layers.
    #[arg(long, conflicts_with = "no_validation")]
    pub validation: bool,

    /// Disable GPU validation layers.
    #[arg(long, conflicts_with = "validation")]
    pub no_validation: bool,
}

impl Args {
    /// Validation defaults to on in debug builds unless a flag says otherwise.
    pub fn validation_enabled(&self) -> bool {
        if self.validation {
            true
        } else if self.no_validation {
            false
        } else {
            cfg!(debug_assertions)
        }
    }

    pub fn into_config(self) -> RendererConfig {
        RendererConfig {
            validation: self.validation_enabled(),
            vsync: !self.no_vsync,
            width: self.width,
            height: self.height,
            render_path: self.path.into(),
            model_path: self.model,
            shader_dir: self.shader_dir,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_renderer_config() {
        let args = Args::parse_from(["bloom-renderer"]);
        let config = args.into_config();
        let defaults = RendererConfig::default();
        assert_eq!(config.model_path, defaults.model_path);
        assert_eq!(config.shader_dir, defaults.shader_dir);
        assert_eq!((config.width, config.height), (1280, 720));
        assert_eq!(config.render_path, RenderPath::Bloom);
        assert!(config.vsync);
    }

    #[test]
    fn flags_override_defaults() {
        let args = Args::parse_from([
            "bloom-renderer",
            "sponza.gltf",
            "--path",
            "direct",
            "--no-vsync",
            "--no-validation",
            "--width",
            "640",
        ]);
        let config = args.into_config();
        assert_eq!(config.model_path, PathBuf::from("sponza.gltf"));
        assert_eq!(config.render_path, RenderPath::Direct);
        assert!(!config.vsync);
        assert!(!config.validation);
        assert_eq!(config.width, 640);
    }

    #[test]
    fn validation_flags_conflict() {
        assert!(Args::try_parse_from(["bloom-renderer", "--validation", "--no-validation"]).is_err());
    }
}
