//! Frame slots: one command buffer and completion fence per swapchain image.
//!
//! A slot's command buffer may only be re-recorded once its fence has signaled.
//! [`FrameSlots`] tracks each slot on the CPU and refuses to hand out a slot whose
//! previous submission has not been waited on.

use ash::vk;

use crate::backend::vulkan::command::{
    allocate_command_buffers, create_command_pool, create_fence, create_semaphore,
};
use crate::error::{RenderError, RenderResult};

/// Waiting on and resetting frame fences.
pub trait FenceSync {
    /// Block until `fence` signals. No timeout.
    fn wait(&self, fence: vk::Fence) -> RenderResult<()>;
    fn reset(&self, fence: vk::Fence) -> RenderResult<()>;
}

impl FenceSync for ash::Device {
    fn wait(&self, fence: vk::Fence) -> RenderResult<()> {
        unsafe { self.wait_for_fences(&[fence], true, u64::MAX) }
            .map_err(|e| RenderError::submission("Failed to wait for frame fence", e))
    }

    fn reset(&self, fence: vk::Fence) -> RenderResult<()> {
        unsafe { self.reset_fences(&[fence]) }
            .map_err(|e| RenderError::submission("Failed to reset frame fence", e))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SlotState {
    /// The fence is signaled; the command buffer is free.
    #[default]
    Signaled,
    /// Waited and reset; the command buffer is being recorded.
    Recording,
    /// Submitted; the fence signals when the GPU is done.
    InFlight,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSlot {
    pub command_buffer: vk::CommandBuffer,
    pub fence: vk::Fence,
    /// Signaled when this slot's submission finishes; presentation waits on it.
    pub render_finished: vk::Semaphore,
    state: SlotState,
}

impl FrameSlot {
    pub fn new(command_buffer: vk::CommandBuffer, fence: vk::Fence, render_finished: vk::Semaphore) -> Self {
        Self {
            command_buffer,
            fence,
            render_finished,
            state: SlotState::Signaled,
        }
    }

    pub fn state(&self) -> SlotState {
        self.state
    }
}

/// The CPU-side view of every frame slot.
#[derive(Debug, Clone, Default)]
pub struct FrameSlots {
    slots: Vec<FrameSlot>,
}

impl FrameSlots {
    pub fn new(slots: Vec<FrameSlot>) -> Self {
        Self { slots }
    }

    /// Wait for the slot's previous submission, reset its fence and mark it recording.
    pub fn begin(&mut self, image_index: u32, sync: &impl FenceSync) -> RenderResult<FrameSlot> {
        let slot = self.slot_mut(image_index)?;
        if slot.state == SlotState::Recording {
            return Err(RenderError::InvalidParameter(format!(
                "frame slot {image_index} is already recording"
            )));
        }

        sync.wait(slot.fence)?;
        slot.state = SlotState::Signaled;
        sync.reset(slot.fence)?;
        slot.state = SlotState::Recording;
        Ok(*slot)
    }

    /// Record that the slot's command buffer was submitted with its fence.
    pub fn mark_submitted(&mut self, image_index: u32) -> RenderResult<()> {
        let slot = self.slot_mut(image_index)?;
        if slot.state != SlotState::Recording {
            return Err(RenderError::InvalidParameter(format!(
                "frame slot {image_index} submitted while {:?}",
                slot.state
            )));
        }
        slot.state = SlotState::InFlight;
        Ok(())
    }

    /// Wait for every in-flight slot.
    pub fn wait_all(&mut self, sync: &impl FenceSync) -> RenderResult<()> {
        for slot in &mut self.slots {
            if slot.state == SlotState::InFlight {
                sync.wait(slot.fence)?;
                slot.state = SlotState::Signaled;
            }
        }
        Ok(())
    }

    pub fn get(&self, image_index: u32) -> RenderResult<&FrameSlot> {
        self.slots
            .get(image_index as usize)
            .ok_or_else(|| RenderError::InvalidParameter(format!("no frame slot {image_index}")))
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn slot_mut(&mut self, image_index: u32) -> RenderResult<&mut FrameSlot> {
        self.slots
            .get_mut(image_index as usize)
            .ok_or_else(|| RenderError::InvalidParameter(format!("no frame slot {image_index}")))
    }
}

/// Command buffers, fences and semaphores for every swapchain image.
pub struct FrameSync {
    device: ash::Device,
    pool: vk::CommandPool,
    image_available: vk::Semaphore,
    slots: FrameSlots,
}

impl FrameSync {
    pub fn new(device: &ash::Device, queue_family: u32, image_count: usize) -> RenderResult<Self> {
        let pool = create_command_pool(
            device,
            queue_family,
            vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
        )?;
        let mut sync = Self {
            device: device.clone(),
            pool,
            image_available: vk::Semaphore::null(),
            slots: FrameSlots::default(),
        };
        sync.image_available = create_semaphore(device)?;
        sync.build_slots(image_count)?;
        Ok(sync)
    }

    /// Match the slot count to a new swapchain image count. The device must be idle.
    pub fn resize(&mut self, image_count: usize) -> RenderResult<()> {
        if image_count == self.slots.len() {
            return Ok(());
        }
        log::debug!("Frame slots {} -> {}", self.slots.len(), image_count);
        self.destroy_slots();
        self.build_slots(image_count)
    }

    fn build_slots(&mut self, image_count: usize) -> RenderResult<()> {
        let command_buffers = allocate_command_buffers(&self.device, self.pool, image_count as u32)?;
        let mut slots = Vec::with_capacity(image_count);
        let mut result = Ok(());
        for command_buffer in command_buffers {
            let fence = match create_fence(&self.device, true) {
                Ok(fence) => fence,
                Err(e) => {
                    result = Err(e);
                    unsafe { self.device.free_command_buffers(self.pool, &[command_buffer]) };
                    continue;
                }
            };
            match create_semaphore(&self.device) {
                Ok(semaphore) => slots.push(FrameSlot::new(command_buffer, fence, semaphore)),
                Err(e) => {
                    result = Err(e);
                    unsafe {
                        self.device.destroy_fence(fence, None);
                        self.device.free_command_buffers(self.pool, &[command_buffer]);
                    }
                }
            }
        }
        self.slots = FrameSlots::new(slots);
        if result.is_err() {
            self.destroy_slots();
        }
        result
    }

    fn destroy_slots(&mut self) {
        let slots = std::mem::take(&mut self.slots);
        unsafe {
            for slot in &slots.slots {
                self.device.destroy_fence(slot.fence, None);
                self.device.destroy_semaphore(slot.render_finished, None);
            }
            let command_buffers: Vec<vk::CommandBuffer> =
                slots.slots.iter().map(|slot| slot.command_buffer).collect();
            if !command_buffers.is_empty() {
                self.device.free_command_buffers(self.pool, &command_buffers);
            }
        }
    }

    pub fn image_available(&self) -> vk::Semaphore {
        self.image_available
    }

    /// Replace the image-available semaphore with a fresh unsignaled one.
    ///
    /// An acquire that was abandoned for recreation leaves the old semaphore signaled with no
    /// submission waiting on it. The device must be idle.
    pub fn reset_image_available(&mut self) -> RenderResult<()> {
        let fresh = create_semaphore(&self.device)?;
        let old = std::mem::replace(&mut self.image_available, fresh);
        unsafe { self.device.destroy_semaphore(old, None) };
        Ok(())
    }

    pub fn slots(&self) -> &FrameSlots {
        &self.slots
    }

    pub fn slots_mut(&mut self) -> &mut FrameSlots {
        &mut self.slots
    }

    pub fn device(&self) -> &ash::Device {
        &self.device
    }
}

impl Drop for FrameSync {
    fn drop(&mut self) {
        self.destroy_slots();
        unsafe {
            if self.image_available != vk::Semaphore::null() {
                self.device.destroy_semaphore(self.image_available, None);
            }
            self.device.destroy_command_pool(self.pool, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use ash::vk::Handle;

    use super::*;

    /// Records every fence call in order.
    #[derive(Default)]
    struct FakeFences {
        calls: RefCell<Vec<(&'static str, u64)>>,
    }

    impl FenceSync for FakeFences {
        fn wait(&self, fence: vk::Fence) -> RenderResult<()> {
            self.calls.borrow_mut().push(("wait", fence.as_raw()));
            Ok(())
        }

        fn reset(&self, fence: vk::Fence) -> RenderResult<()> {
            self.calls.borrow_mut().push(("reset", fence.as_raw()));
            Ok(())
        }
    }

    fn slots(count: u64) -> FrameSlots {
        FrameSlots::new(
            (0..count)
                .map(|i| {
                    FrameSlot::new(
                        vk::CommandBuffer::from_raw(100 + i),
                        vk::Fence::from_raw(200 + i),
                        vk::Semaphore::from_raw(300 + i),
                    )
                })
                .collect(),
        )
    }

    #[test]
    fn begin_waits_before_resetting() {
        let fences = FakeFences::default();
        let mut slots = slots(2);

        let slot = slots.begin(1, &fences).unwrap();
        assert_eq!(slot.fence.as_raw(), 201);
        assert_eq!(slot.state(), SlotState::Recording);
        assert_eq!(*fences.calls.borrow(), vec![("wait", 201), ("reset", 201)]);
    }

    #[test]
    fn every_reuse_waits_on_the_fence() {
        let fences = FakeFences::default();
        let mut slots = slots(3);

        for frame in 0..9u32 {
            let index = frame % 3;
            slots.begin(index, &fences).unwrap();
            slots.mark_submitted(index).unwrap();
            assert_eq!(slots.get(index).unwrap().state(), SlotState::InFlight);
        }

        let calls = fences.calls.borrow();
        assert_eq!(calls.len(), 18);
        for pair in calls.chunks(2) {
            assert_eq!(pair[0].0, "wait");
            assert_eq!(pair[1].0, "reset");
            assert_eq!(pair[0].1, pair[1].1);
        }
    }

    #[test]
    fn recording_slot_cannot_be_handed_out_twice() {
        let fences = FakeFences::default();
        let mut slots = slots(1);
        slots.begin(0, &fences).unwrap();
        assert!(slots.begin(0, &fences).is_err());
    }

    #[test]
    fn submit_requires_recording() {
        let mut slots = slots(1);
        assert!(slots.mark_submitted(0).is_err());
        assert!(slots.mark_submitted(5).is_err());
    }

    #[test]
    fn wait_all_drains_in_flight_slots() {
        let fences = FakeFences::default();
        let mut slots = slots(2);
        slots.begin(0, &fences).unwrap();
        slots.mark_submitted(0).unwrap();
        fences.calls.borrow_mut().clear();

        slots.wait_all(&fences).unwrap();
        assert_eq!(*fences.calls.borrow(), vec![("wait", 200)]);
        assert_eq!(slots.get(0).unwrap().state(), SlotState::Signaled);
    }
}
