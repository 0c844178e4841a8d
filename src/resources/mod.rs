//! GPU resource management.
//!
//! The [`ResourceManager`] owns every buffer, image and sampler the renderer creates. Handles
//! are plain integer ids; the manager records the order of acquisition so teardown can release
//! resources newest first, either all of them or only the screen-sized ones.

pub mod buffer;
pub mod image;
pub mod texture;
pub mod tracker;

use std::collections::HashMap;
use std::sync::Arc;

use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme, Allocator};
use gpu_allocator::MemoryLocation;
use parking_lot::Mutex;

use crate::backend::vulkan::VulkanContext;
use crate::error::{RenderError, RenderResult};

pub use self::buffer::{BufferDesc, BufferUsage, GpuBuffer, Residency};
pub use self::image::{GpuImage, ImageDesc, ImageUsage};
pub use self::tracker::{Lifetime, ResourceHandle, ResourceTracker};

/// Handle to a GPU buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(pub(crate) u64);

/// Handle to a GPU image and its view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ImageId(pub(crate) u64);

/// Handle to a sampler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SamplerId(pub(crate) u64);

/// Arena of GPU resources backed by the shared pooled allocator.
pub struct ResourceManager {
    device: ash::Device,
    allocator: Arc<Mutex<Allocator>>,
    max_anisotropy: Option<f32>,
    buffers: HashMap<BufferId, GpuBuffer>,
    images: HashMap<ImageId, GpuImage>,
    samplers: HashMap<SamplerId, vk::Sampler>,
    tracker: ResourceTracker,
    next_id: u64,
}

impl ResourceManager {
    pub fn new(context: &VulkanContext) -> Self {
        let max_anisotropy = context.sampler_anisotropy().then(|| {
            let limits = unsafe {
                context
                    .instance()
                    .get_physical_device_properties(context.physical_device())
            }
            .limits;
            limits.max_sampler_anisotropy.min(16.0)
        });

        Self {
            device: context.device().clone(),
            allocator: context.allocator(),
            max_anisotropy,
            buffers: HashMap::new(),
            images: HashMap::new(),
            samplers: HashMap::new(),
            tracker: ResourceTracker::new(),
            next_id: 1,
        }
    }

    fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Create a buffer and bind memory from the pooled allocator.
    ///
    /// Either the buffer is fully created or nothing is left behind.
    pub fn create_buffer(&mut self, desc: &BufferDesc<'_>) -> RenderResult<BufferId> {
        buffer::validate_buffer_usage(desc.usage, desc.residency)?;
        if desc.size == 0 {
            return Err(RenderError::InvalidParameter(format!(
                "buffer '{}' has zero size",
                desc.name
            )));
        }

        let buffer_info = vk::BufferCreateInfo::default()
            .size(desc.size)
            .usage(desc.usage.to_vk())
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let raw = unsafe { self.device.create_buffer(&buffer_info, None) }
            .map_err(|e| RenderError::creation(desc.name, e))?;

        let requirements = unsafe { self.device.get_buffer_memory_requirements(raw) };
        let allocation = match self.allocate(desc.name, requirements, desc.residency.location(), true) {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { self.device.destroy_buffer(raw, None) };
                return Err(e);
            }
        };

        if let Err(e) =
            unsafe { self.device.bind_buffer_memory(raw, allocation.memory(), allocation.offset()) }
        {
            self.free_allocation(allocation);
            unsafe { self.device.destroy_buffer(raw, None) };
            return Err(RenderError::creation(desc.name, e));
        }

        let id = BufferId(self.next_id());
        self.buffers.insert(
            id,
            GpuBuffer {
                raw,
                allocation: Some(allocation),
                size: desc.size,
                usage: desc.usage,
                residency: desc.residency,
            },
        );
        self.tracker.record(id.into(), desc.lifetime);

        log::trace!("Created buffer '{}' ({} bytes, {:?})", desc.name, desc.size, desc.residency);
        Ok(id)
    }

    /// Create a device-only 2D image with one view.
    pub fn create_image(&mut self, desc: &ImageDesc<'_>) -> RenderResult<ImageId> {
        image::validate_image_desc(desc)?;

        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(desc.format)
            .extent(vk::Extent3D {
                width: desc.extent.width,
                height: desc.extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(desc.usage.to_vk())
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let raw = unsafe { self.device.create_image(&image_info, None) }
            .map_err(|e| RenderError::creation(desc.name, e))?;

        let requirements = unsafe { self.device.get_image_memory_requirements(raw) };
        let allocation = match self.allocate(desc.name, requirements, MemoryLocation::GpuOnly, false) {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { self.device.destroy_image(raw, None) };
                return Err(e);
            }
        };

        if let Err(e) =
            unsafe { self.device.bind_image_memory(raw, allocation.memory(), allocation.offset()) }
        {
            self.free_allocation(allocation);
            unsafe { self.device.destroy_image(raw, None) };
            return Err(RenderError::creation(desc.name, e));
        }

        let view_info = vk::ImageViewCreateInfo::default()
            .image(raw)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(desc.format)
            .subresource_range(
                vk::ImageSubresourceRange::default()
                    .aspect_mask(desc.usage.aspect())
                    .level_count(1)
                    .layer_count(1),
            );

        let view = match unsafe { self.device.create_image_view(&view_info, None) } {
            Ok(view) => view,
            Err(e) => {
                self.free_allocation(allocation);
                unsafe { self.device.destroy_image(raw, None) };
                return Err(RenderError::creation(desc.name, e));
            }
        };

        let id = ImageId(self.next_id());
        self.images.insert(
            id,
            GpuImage {
                raw,
                view,
                allocation: Some(allocation),
                format: desc.format,
                extent: desc.extent,
                usage: desc.usage,
            },
        );
        self.tracker.record(id.into(), desc.lifetime);

        log::trace!(
            "Created image '{}' ({}x{}, {:?})",
            desc.name,
            desc.extent.width,
            desc.extent.height,
            desc.format
        );
        Ok(id)
    }

    /// Offscreen color target sized to the surface.
    pub fn create_target(
        &mut self,
        name: &str,
        format: vk::Format,
        extent: vk::Extent2D,
    ) -> RenderResult<ImageId> {
        self.create_image(&ImageDesc {
            name,
            extent,
            format,
            usage: ImageUsage::ColorTarget,
            lifetime: Lifetime::ScreenSized,
        })
    }

    pub fn create_depth_target(
        &mut self,
        name: &str,
        format: vk::Format,
        extent: vk::Extent2D,
    ) -> RenderResult<ImageId> {
        self.create_image(&ImageDesc {
            name,
            extent,
            format,
            usage: ImageUsage::DepthTarget,
            lifetime: Lifetime::ScreenSized,
        })
    }

    /// Linear, repeating sampler used for textures and offscreen targets alike.
    pub fn create_sampler(&mut self) -> RenderResult<SamplerId> {
        let sampler_info = vk::SamplerCreateInfo::default()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
            .address_mode_u(vk::SamplerAddressMode::REPEAT)
            .address_mode_v(vk::SamplerAddressMode::REPEAT)
            .address_mode_w(vk::SamplerAddressMode::REPEAT)
            .anisotropy_enable(self.max_anisotropy.is_some())
            .max_anisotropy(self.max_anisotropy.unwrap_or(1.0))
            .min_lod(0.0)
            .max_lod(vk::LOD_CLAMP_NONE)
            .border_color(vk::BorderColor::INT_OPAQUE_BLACK);

        let sampler = unsafe { self.device.create_sampler(&sampler_info, None) }
            .map_err(|e| RenderError::creation("sampler", e))?;

        let id = SamplerId(self.next_id());
        self.samplers.insert(id, sampler);
        self.tracker.record(id.into(), Lifetime::Persistent);
        Ok(id)
    }

    /// Copy `data` into a host-visible buffer at `offset`.
    pub fn write_buffer(&mut self, id: BufferId, offset: u64, data: &[u8]) -> RenderResult<()> {
        let buffer = self
            .buffers
            .get_mut(&id)
            .ok_or_else(|| RenderError::InvalidParameter(format!("unknown buffer {id:?}")))?;

        if buffer.residency != Residency::HostVisible {
            return Err(RenderError::InvalidParameter(format!(
                "buffer {id:?} is not host-visible"
            )));
        }

        let mapped = buffer
            .allocation
            .as_mut()
            .and_then(|allocation| allocation.mapped_slice_mut())
            .ok_or_else(|| RenderError::InvalidParameter(format!("buffer {id:?} is not mapped")))?;

        let start = offset as usize;
        let end = start + data.len();
        if end as u64 > buffer.size || end > mapped.len() {
            return Err(RenderError::InvalidParameter(format!(
                "write of {} bytes at {} overflows buffer {id:?}",
                data.len(),
                offset
            )));
        }
        mapped[start..end].copy_from_slice(data);
        Ok(())
    }

    /// Copy the contents of a readback buffer to host memory.
    pub fn read_buffer(&self, id: BufferId) -> RenderResult<Vec<u8>> {
        let buffer = self.buffer(id)?;
        if buffer.residency != Residency::HostReadback {
            return Err(RenderError::InvalidParameter(format!(
                "buffer {id:?} is not host-readable"
            )));
        }
        let mapped = buffer
            .allocation
            .as_ref()
            .and_then(|allocation| allocation.mapped_slice())
            .ok_or_else(|| RenderError::InvalidParameter(format!("buffer {id:?} is not mapped")))?;

        Ok(mapped[..buffer.size as usize].to_vec())
    }

    pub fn buffer(&self, id: BufferId) -> RenderResult<&GpuBuffer> {
        self.buffers
            .get(&id)
            .ok_or_else(|| RenderError::InvalidParameter(format!("unknown buffer {id:?}")))
    }

    pub fn image(&self, id: ImageId) -> RenderResult<&GpuImage> {
        self.images
            .get(&id)
            .ok_or_else(|| RenderError::InvalidParameter(format!("unknown image {id:?}")))
    }

    pub fn sampler(&self, id: SamplerId) -> RenderResult<vk::Sampler> {
        self.samplers
            .get(&id)
            .copied()
            .ok_or_else(|| RenderError::InvalidParameter(format!("unknown sampler {id:?}")))
    }

    /// Destroy one resource. The caller guarantees the GPU no longer uses it.
    pub fn destroy(&mut self, handle: impl Into<ResourceHandle>) -> RenderResult<()> {
        let handle = handle.into();
        if self.tracker.forget(handle).is_none() {
            return Err(RenderError::InvalidParameter(format!(
                "{handle:?} is not a live resource"
            )));
        }
        self.release(handle);
        Ok(())
    }

    /// Destroy a resize-dependent resource. Persistent resources are refused, so a resize
    /// can never release mesh or material data.
    pub fn destroy_screen_sized(&mut self, handle: impl Into<ResourceHandle>) -> RenderResult<()> {
        let handle = handle.into();
        if self.tracker.lifetime(handle) == Some(Lifetime::Persistent) {
            return Err(RenderError::InvalidParameter(format!(
                "{handle:?} is persistent and survives resize"
            )));
        }
        self.destroy(handle)
    }

    /// Destroy everything still alive, newest first.
    pub fn teardown(&mut self) {
        let handles = self.tracker.drain_newest_first();
        if !handles.is_empty() {
            log::debug!("Releasing {} GPU resources", handles.len());
        }
        for handle in handles {
            self.release(handle);
        }
    }

    pub fn live_count(&self) -> usize {
        self.tracker.len()
    }

    pub fn lifetime(&self, handle: impl Into<ResourceHandle>) -> Option<Lifetime> {
        self.tracker.lifetime(handle.into())
    }

    fn release(&mut self, handle: ResourceHandle) {
        match handle {
            ResourceHandle::Buffer(id) => {
                if let Some(mut buffer) = self.buffers.remove(&id) {
                    unsafe { self.device.destroy_buffer(buffer.raw, None) };
                    if let Some(allocation) = buffer.allocation.take() {
                        self.free_allocation(allocation);
                    }
                }
            }
            ResourceHandle::Image(id) => {
                if let Some(mut image) = self.images.remove(&id) {
                    unsafe {
                        self.device.destroy_image_view(image.view, None);
                        self.device.destroy_image(image.raw, None);
                    }
                    if let Some(allocation) = image.allocation.take() {
                        self.free_allocation(allocation);
                    }
                }
            }
            ResourceHandle::Sampler(id) => {
                if let Some(sampler) = self.samplers.remove(&id) {
                    unsafe { self.device.destroy_sampler(sampler, None) };
                }
            }
        }
    }

    fn allocate(
        &self,
        name: &str,
        requirements: vk::MemoryRequirements,
        location: MemoryLocation,
        linear: bool,
    ) -> RenderResult<Allocation> {
        self.allocator
            .lock()
            .allocate(&AllocationCreateDesc {
                name,
                requirements,
                location,
                linear,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .map_err(|e| RenderError::allocation(name, e))
    }

    fn free_allocation(&self, allocation: Allocation) {
        if let Err(e) = self.allocator.lock().free(allocation) {
            log::warn!("Failed to free GPU allocation: {}", e);
        }
    }
}

impl Drop for ResourceManager {
    fn drop(&mut self) {
        self.teardown();
    }
}
