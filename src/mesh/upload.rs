//! One-shot staging uploads into device-only buffers.
//!
//! Uploads are synchronous: each call records a transient command buffer, submits it with a
//! fence and blocks until the copies finish. Staging memory is released before returning.

use ash::vk;

use crate::backend::vulkan::barriers::{buffer_barrier, BufferAccess};
use crate::backend::vulkan::command::OneShotCommands;
use crate::backend::vulkan::VulkanContext;
use crate::error::{RenderError, RenderResult};
use crate::resources::{BufferDesc, BufferId, BufferUsage, Residency, ResourceManager};

/// One array to place in its own device-only buffer.
#[derive(Debug, Clone, Copy)]
pub struct UploadRegion<'a> {
    pub name: &'a str,
    pub data: &'a [u8],
    pub usage: BufferUsage,
}

impl UploadRegion<'_> {
    /// Who reads the destination after the copy.
    fn consumer(&self) -> BufferAccess {
        match self.usage {
            BufferUsage::Index => BufferAccess::INDEX_READ,
            BufferUsage::Uniform => BufferAccess::uniform_read(
                vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
            ),
            _ => BufferAccess::VERTEX_ATTRIBUTE_READ,
        }
    }
}

/// Create one device-only buffer per region and fill them in a single fenced submission.
///
/// Each copy is followed immediately by a barrier from transfer-write to the destination's
/// consumer. On error nothing is left allocated.
pub fn upload_device_buffers(
    context: &VulkanContext,
    resources: &mut ResourceManager,
    regions: &[UploadRegion<'_>],
) -> RenderResult<Vec<BufferId>> {
    let mut staging = Vec::with_capacity(regions.len());
    let mut destinations = Vec::with_capacity(regions.len());

    // The one-shot submission is finished or drained by the time this returns
    let result = stage_and_copy(context, resources, regions, &mut staging, &mut destinations);

    for id in staging {
        resources.destroy(id)?;
    }

    match result {
        Ok(()) => Ok(destinations),
        Err(e) => {
            for id in destinations {
                if let Err(cleanup) = resources.destroy(id) {
                    log::warn!("Failed to release upload destination {id:?}: {cleanup}");
                }
            }
            Err(e)
        }
    }
}

fn stage_and_copy(
    context: &VulkanContext,
    resources: &mut ResourceManager,
    regions: &[UploadRegion<'_>],
    staging: &mut Vec<BufferId>,
    destinations: &mut Vec<BufferId>,
) -> RenderResult<()> {
    for region in regions {
        if region.data.is_empty() {
            return Err(RenderError::InvalidParameter(format!(
                "cannot upload empty array '{}'",
                region.name
            )));
        }
        let size = region.data.len() as u64;

        let source = resources.create_buffer(&BufferDesc::new(
            region.name,
            size,
            BufferUsage::Staging,
            Residency::HostVisible,
        ))?;
        staging.push(source);
        resources.write_buffer(source, 0, region.data)?;

        let destination = resources.create_buffer(&BufferDesc::new(
            region.name,
            size,
            region.usage,
            Residency::DeviceOnly,
        ))?;
        destinations.push(destination);
    }

    let device = context.device();
    let commands = OneShotCommands::begin(context)?;
    let cmd = commands.command_buffer();

    for ((region, &source), &destination) in regions.iter().zip(staging.iter()).zip(destinations.iter()) {
        let source = resources.buffer(source)?.raw();
        let destination = resources.buffer(destination)?.raw();
        let copy = vk::BufferCopy::default().size(region.data.len() as u64);

        unsafe { device.cmd_copy_buffer(cmd, source, destination, &[copy]) };
        buffer_barrier(
            device,
            cmd,
            destination,
            BufferAccess::TRANSFER_WRITE,
            region.consumer(),
        );
    }

    commands.submit_and_wait()
}

/// Copy a device buffer back to host memory through a readback buffer.
pub fn read_back_buffer(
    context: &VulkanContext,
    resources: &mut ResourceManager,
    source: BufferId,
) -> RenderResult<Vec<u8>> {
    let size = resources.buffer(source)?.size();
    let readback = resources.create_buffer(&BufferDesc::new(
        "readback",
        size,
        BufferUsage::Readback,
        Residency::HostReadback,
    ))?;

    let result = copy_to_host(context, resources, source, readback, size);
    resources.destroy(readback)?;
    result
}

fn copy_to_host(
    context: &VulkanContext,
    resources: &ResourceManager,
    source: BufferId,
    readback: BufferId,
    size: u64,
) -> RenderResult<Vec<u8>> {
    let device = context.device();
    let source_raw = resources.buffer(source)?.raw();
    let readback_raw = resources.buffer(readback)?.raw();

    let commands = OneShotCommands::begin(context)?;
    let cmd = commands.command_buffer();

    buffer_barrier(
        device,
        cmd,
        source_raw,
        BufferAccess::TRANSFER_WRITE,
        BufferAccess::TRANSFER_READ,
    );
    let copy = vk::BufferCopy::default().size(size);
    unsafe { device.cmd_copy_buffer(cmd, source_raw, readback_raw, &[copy]) };
    buffer_barrier(
        device,
        cmd,
        readback_raw,
        BufferAccess::TRANSFER_WRITE,
        BufferAccess::HOST_READ,
    );

    commands.submit_and_wait()?;
    resources.read_buffer(readback)
}
