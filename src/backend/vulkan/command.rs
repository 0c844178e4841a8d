//! Command pools, command buffers and synchronization objects.

use ash::vk;

use crate::error::{RenderError, RenderResult};

use super::VulkanContext;

pub fn create_command_pool(
    device: &ash::Device,
    queue_family_index: u32,
    flags: vk::CommandPoolCreateFlags,
) -> RenderResult<vk::CommandPool> {
    let pool_info = vk::CommandPoolCreateInfo::default()
        .queue_family_index(queue_family_index)
        .flags(flags);

    unsafe { device.create_command_pool(&pool_info, None) }
        .map_err(|e| RenderError::creation("command pool", e))
}

pub fn allocate_command_buffers(
    device: &ash::Device,
    pool: vk::CommandPool,
    count: u32,
) -> RenderResult<Vec<vk::CommandBuffer>> {
    let alloc_info = vk::CommandBufferAllocateInfo::default()
        .command_pool(pool)
        .level(vk::CommandBufferLevel::PRIMARY)
        .command_buffer_count(count);

    unsafe { device.allocate_command_buffers(&alloc_info) }
        .map_err(|e| RenderError::creation("command buffers", e))
}

pub fn create_fence(device: &ash::Device, signaled: bool) -> RenderResult<vk::Fence> {
    let flags = if signaled {
        vk::FenceCreateFlags::SIGNALED
    } else {
        vk::FenceCreateFlags::empty()
    };
    unsafe { device.create_fence(&vk::FenceCreateInfo::default().flags(flags), None) }
        .map_err(|e| RenderError::creation("fence", e))
}

pub fn create_semaphore(device: &ash::Device) -> RenderResult<vk::Semaphore> {
    unsafe { device.create_semaphore(&vk::SemaphoreCreateInfo::default(), None) }
        .map_err(|e| RenderError::creation("semaphore", e))
}

/// Where a one-shot submission stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitState {
    Recording,
    /// Submitted, but the fence was never seen signaled.
    Pending,
    Complete,
}

impl SubmitState {
    /// Whether the GPU may still be reading the command buffer and the buffers it copies.
    pub fn may_be_executing(self) -> bool {
        self == Self::Pending
    }
}

/// A transient command pool, one command buffer and a fence for a blocking submission.
///
/// The pool and fence are released when this value drops, whether or not the submission
/// happened. If the fence wait failed the device is drained first.
pub struct OneShotCommands<'a> {
    context: &'a VulkanContext,
    pool: vk::CommandPool,
    fence: vk::Fence,
    command_buffer: vk::CommandBuffer,
    state: SubmitState,
}

impl<'a> OneShotCommands<'a> {
    /// Create the transient objects and begin recording.
    pub fn begin(context: &'a VulkanContext) -> RenderResult<Self> {
        let device = context.device();

        let pool = create_command_pool(
            device,
            context.graphics_queue_family(),
            vk::CommandPoolCreateFlags::TRANSIENT,
        )
        .map_err(as_transfer)?;

        let mut commands = Self {
            context,
            pool,
            fence: vk::Fence::null(),
            command_buffer: vk::CommandBuffer::null(),
            state: SubmitState::Recording,
        };

        commands.fence = create_fence(device, false).map_err(as_transfer)?;
        commands.command_buffer = allocate_command_buffers(device, pool, 1)
            .map_err(as_transfer)?
            .first()
            .copied()
            .ok_or_else(|| RenderError::TransferFailed("No command buffer allocated".into()))?;

        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe { device.begin_command_buffer(commands.command_buffer, &begin_info) }
            .map_err(|e| RenderError::transfer("Failed to begin upload commands", e))?;

        Ok(commands)
    }

    pub fn command_buffer(&self) -> vk::CommandBuffer {
        self.command_buffer
    }

    /// End recording, submit to the graphics queue and block until the fence signals.
    pub fn submit_and_wait(mut self) -> RenderResult<()> {
        let device = self.context.device();

        unsafe { device.end_command_buffer(self.command_buffer) }
            .map_err(|e| RenderError::transfer("Failed to end upload commands", e))?;

        let command_buffers = [self.command_buffer];
        let submit_info = vk::SubmitInfo::default().command_buffers(&command_buffers);

        unsafe {
            device.queue_submit(self.context.graphics_queue(), &[submit_info], self.fence)
        }
        .map_err(|e| RenderError::transfer("Failed to submit upload commands", e))?;
        self.state = SubmitState::Pending;

        unsafe { device.wait_for_fences(&[self.fence], true, u64::MAX) }
            .map_err(|e| RenderError::transfer("Failed to wait for upload fence", e))?;
        self.state = SubmitState::Complete;

        Ok(())
    }
}

impl Drop for OneShotCommands<'_> {
    fn drop(&mut self) {
        let device = self.context.device();
        if self.state.may_be_executing() {
            if let Err(e) = unsafe { device.device_wait_idle() } {
                log::warn!("Failed to drain device after an interrupted upload: {e}");
            }
        }
        unsafe {
            if self.fence != vk::Fence::null() {
                device.destroy_fence(self.fence, None);
            }
            // Frees the command buffer with it
            device.destroy_command_pool(self.pool, None);
        }
    }
}

fn as_transfer(error: RenderError) -> RenderError {
    match error {
        RenderError::ResourceCreationFailed(msg) => RenderError::TransferFailed(msg),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_an_unconfirmed_submission_needs_draining() {
        assert!(!SubmitState::Recording.may_be_executing());
        assert!(SubmitState::Pending.may_be_executing());
        assert!(!SubmitState::Complete.may_be_executing());
    }

    #[test]
    fn creation_errors_become_transfer_errors() {
        let error = as_transfer(RenderError::ResourceCreationFailed("fence".into()));
        assert!(matches!(error, RenderError::TransferFailed(msg) if msg == "fence"));

        let error = as_transfer(RenderError::OutOfDeviceMemory("pool".into()));
        assert!(matches!(error, RenderError::OutOfDeviceMemory(_)));
    }
}
