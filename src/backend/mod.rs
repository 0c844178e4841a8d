//! GPU backend layer. Vulkan is the only backend.

pub mod vulkan;
