//! GPU buffers.

use ash::vk;
use gpu_allocator::vulkan::Allocation;
use gpu_allocator::MemoryLocation;

use crate::error::{RenderError, RenderResult};

use super::Lifetime;

/// What a buffer is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferUsage {
    Vertex,
    Index,
    Uniform,
    /// Host-written source of a transfer.
    Staging,
    /// Host-read destination of a transfer.
    Readback,
}

impl BufferUsage {
    pub fn to_vk(self) -> vk::BufferUsageFlags {
        match self {
            // Geometry can be copied back out for verification
            Self::Vertex => {
                vk::BufferUsageFlags::VERTEX_BUFFER
                    | vk::BufferUsageFlags::TRANSFER_DST
                    | vk::BufferUsageFlags::TRANSFER_SRC
            }
            Self::Index => {
                vk::BufferUsageFlags::INDEX_BUFFER
                    | vk::BufferUsageFlags::TRANSFER_DST
                    | vk::BufferUsageFlags::TRANSFER_SRC
            }
            Self::Uniform => {
                vk::BufferUsageFlags::UNIFORM_BUFFER | vk::BufferUsageFlags::TRANSFER_DST
            }
            Self::Staging => vk::BufferUsageFlags::TRANSFER_SRC,
            Self::Readback => vk::BufferUsageFlags::TRANSFER_DST,
        }
    }
}

/// Where a buffer's memory lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Residency {
    /// Device-local, never mapped.
    DeviceOnly,
    /// Mapped for host writes.
    HostVisible,
    /// Mapped for host reads.
    HostReadback,
}

impl Residency {
    pub fn location(self) -> MemoryLocation {
        match self {
            Self::DeviceOnly => MemoryLocation::GpuOnly,
            Self::HostVisible => MemoryLocation::CpuToGpu,
            Self::HostReadback => MemoryLocation::GpuToCpu,
        }
    }

    pub fn is_mapped(self) -> bool {
        !matches!(self, Self::DeviceOnly)
    }
}

/// Reject usage/residency pairs the renderer never needs.
pub fn validate_buffer_usage(usage: BufferUsage, residency: Residency) -> RenderResult<()> {
    let allowed = match usage {
        BufferUsage::Staging => residency == Residency::HostVisible,
        BufferUsage::Readback => residency == Residency::HostReadback,
        BufferUsage::Vertex | BufferUsage::Index | BufferUsage::Uniform => {
            residency != Residency::HostReadback
        }
    };

    if allowed {
        Ok(())
    } else {
        Err(RenderError::InvalidParameter(format!(
            "{usage:?} buffers cannot use {residency:?} memory"
        )))
    }
}

/// Parameters for [`ResourceManager::create_buffer`](super::ResourceManager::create_buffer).
#[derive(Debug, Clone)]
pub struct BufferDesc<'a> {
    pub name: &'a str,
    pub size: vk::DeviceSize,
    pub usage: BufferUsage,
    pub residency: Residency,
    pub lifetime: Lifetime,
}

impl<'a> BufferDesc<'a> {
    pub fn new(name: &'a str, size: vk::DeviceSize, usage: BufferUsage, residency: Residency) -> Self {
        Self {
            name,
            size,
            usage,
            residency,
            lifetime: Lifetime::Persistent,
        }
    }
}

/// A buffer handle and the memory backing it.
pub struct GpuBuffer {
    pub(crate) raw: vk::Buffer,
    pub(crate) allocation: Option<Allocation>,
    pub(crate) size: vk::DeviceSize,
    pub(crate) usage: BufferUsage,
    pub(crate) residency: Residency,
}

impl GpuBuffer {
    pub fn raw(&self) -> vk::Buffer {
        self.raw
    }

    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    pub fn usage(&self) -> BufferUsage {
        self.usage
    }

    pub fn residency(&self) -> Residency {
        self.residency
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staging_must_be_host_visible() {
        assert!(validate_buffer_usage(BufferUsage::Staging, Residency::HostVisible).is_ok());
        assert!(validate_buffer_usage(BufferUsage::Staging, Residency::DeviceOnly).is_err());
    }

    #[test]
    fn readback_must_be_host_readable() {
        assert!(validate_buffer_usage(BufferUsage::Readback, Residency::HostReadback).is_ok());
        assert!(validate_buffer_usage(BufferUsage::Readback, Residency::HostVisible).is_err());
    }

    #[test]
    fn uniforms_may_be_device_only_or_mapped() {
        assert!(validate_buffer_usage(BufferUsage::Uniform, Residency::DeviceOnly).is_ok());
        assert!(validate_buffer_usage(BufferUsage::Uniform, Residency::HostVisible).is_ok());
        assert!(validate_buffer_usage(BufferUsage::Vertex, Residency::HostReadback).is_err());
    }

    #[test]
    fn device_uniforms_accept_in_pipeline_updates() {
        assert!(BufferUsage::Uniform
            .to_vk()
            .contains(vk::BufferUsageFlags::TRANSFER_DST));
        assert!(!Residency::DeviceOnly.is_mapped());
    }
}
