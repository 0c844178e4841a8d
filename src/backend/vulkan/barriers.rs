//! Pipeline barrier helpers for buffer and image access transitions.

use ash::vk;

use super::layout::TextureLayout;

/// One side of a buffer access transition: what touches the buffer and at which stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferAccess {
    pub access: vk::AccessFlags,
    pub stage: vk::PipelineStageFlags,
}

impl BufferAccess {
    pub const TRANSFER_WRITE: Self = Self {
        access: vk::AccessFlags::TRANSFER_WRITE,
        stage: vk::PipelineStageFlags::TRANSFER,
    };
    pub const TRANSFER_READ: Self = Self {
        access: vk::AccessFlags::TRANSFER_READ,
        stage: vk::PipelineStageFlags::TRANSFER,
    };
    pub const VERTEX_ATTRIBUTE_READ: Self = Self {
        access: vk::AccessFlags::VERTEX_ATTRIBUTE_READ,
        stage: vk::PipelineStageFlags::VERTEX_INPUT,
    };
    pub const INDEX_READ: Self = Self {
        access: vk::AccessFlags::INDEX_READ,
        stage: vk::PipelineStageFlags::VERTEX_INPUT,
    };
    pub const HOST_READ: Self = Self {
        access: vk::AccessFlags::HOST_READ,
        stage: vk::PipelineStageFlags::HOST,
    };

    /// Uniform reads by the shader stages in `stages`.
    pub fn uniform_read(stages: vk::ShaderStageFlags) -> Self {
        let mut stage = vk::PipelineStageFlags::empty();
        if stages.contains(vk::ShaderStageFlags::VERTEX) {
            stage |= vk::PipelineStageFlags::VERTEX_SHADER;
        }
        if stages.contains(vk::ShaderStageFlags::FRAGMENT) {
            stage |= vk::PipelineStageFlags::FRAGMENT_SHADER;
        }
        Self {
            access: vk::AccessFlags::UNIFORM_READ,
            stage,
        }
    }
}

/// Make `src` accesses to the whole of `buffer` visible to `dst` accesses.
pub fn buffer_barrier(
    device: &ash::Device,
    command_buffer: vk::CommandBuffer,
    buffer: vk::Buffer,
    src: BufferAccess,
    dst: BufferAccess,
) {
    let barrier = vk::BufferMemoryBarrier::default()
        .src_access_mask(src.access)
        .dst_access_mask(dst.access)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .buffer(buffer)
        .offset(0)
        .size(vk::WHOLE_SIZE);

    unsafe {
        device.cmd_pipeline_barrier(
            command_buffer,
            src.stage,
            dst.stage,
            vk::DependencyFlags::empty(),
            &[],
            &[barrier],
            &[],
        );
    }
}

/// Build a layout transition for the first mip and layer of a color or depth image.
pub fn image_transition<'a>(
    image: vk::Image,
    aspect_mask: vk::ImageAspectFlags,
    old_layout: TextureLayout,
    new_layout: TextureLayout,
) -> vk::ImageMemoryBarrier<'a> {
    vk::ImageMemoryBarrier::default()
        .src_access_mask(old_layout.src_access_mask())
        .dst_access_mask(new_layout.dst_access_mask())
        .old_layout(old_layout.to_vk())
        .new_layout(new_layout.to_vk())
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(
            vk::ImageSubresourceRange::default()
                .aspect_mask(aspect_mask)
                .base_mip_level(0)
                .level_count(1)
                .base_array_layer(0)
                .layer_count(1),
        )
}

/// Record a single image layout transition.
pub fn transition_image(
    device: &ash::Device,
    command_buffer: vk::CommandBuffer,
    image: vk::Image,
    aspect_mask: vk::ImageAspectFlags,
    old_layout: TextureLayout,
    new_layout: TextureLayout,
) {
    if old_layout == new_layout {
        return;
    }
    let barrier = image_transition(image, aspect_mask, old_layout, new_layout);
    unsafe {
        device.cmd_pipeline_barrier(
            command_buffer,
            old_layout.src_stage(),
            new_layout.dst_stage(),
            vk::DependencyFlags::empty(),
            &[],
            &[],
            &[barrier],
        );
    }
}
