//! Bloom Renderer - a real-time Vulkan renderer with a fixed bloom stage graph
//!
//! A glTF scene is drawn each frame through:
//! - a filter pass: one geometry subpass writing full color and a bright-pass target,
//!   then a vertical and a horizontal Gaussian blur subpass
//! - a composite pass blending the blurred bloom over the scene onto the backbuffer
//!
//! # Layers
//! - [`backend::vulkan`]: instance, device, allocator, swapchain and command helpers
//! - [`resources`]: tracked buffers, images, samplers and textures
//! - [`mesh`]: staging uploads into device-only geometry buffers
//! - [`descriptors`]: table-driven descriptor set layouts and writes
//! - [`stages`]: render passes, pipelines, offscreen targets and framebuffers
//! - [`frame`]: fence-gated frame slots, command recording and swapchain recovery
//! - [`uniforms`]: std140 uniform layouts and their per-frame updates

pub mod args;
pub mod backend;
pub mod camera;
pub mod config;
pub mod descriptors;
pub mod error;
pub mod frame;
pub mod mesh;
pub mod renderer;
pub mod resources;
pub mod scene;
pub mod stages;
pub mod uniforms;
pub mod window;

pub use camera::{FrameSnapshot, InputFlags, UserState};
pub use config::{CameraConfig, RenderPath, RendererConfig};
pub use error::{RenderError, RenderResult};
pub use renderer::Renderer;
