//! The frame loop: acquire, synchronize, record, submit, present, and recover from a stale
//! swapchain.

pub mod record;
pub mod slots;
pub mod state;

use crate::backend::vulkan::swapchain::{AcquiredImage, PresentOutcome};
use crate::camera::FrameSnapshot;
use crate::error::{RenderError, RenderResult};

use self::state::{FrameEvent, FramePhase};

/// Result of a recreation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recreation {
    Done,
    /// The surface has zero size; try again next iteration.
    Deferred,
}

/// What one iteration of the frame loop did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// A frame was submitted and queued for presentation.
    Presented,
    /// The swapchain was rebuilt; nothing was drawn.
    Recreated,
    /// Recreation is pending until the surface has a non-zero size.
    Deferred,
}

impl FrameOutcome {
    /// Whether the user state should advance after this iteration.
    pub fn advances_time(self) -> bool {
        matches!(self, Self::Presented)
    }
}

/// The GPU-facing steps one frame goes through.
pub trait FrameBackend {
    /// Request the next swapchain image. Blocks until one is available.
    fn acquire(&mut self) -> RenderResult<AcquiredImage>;
    /// Wait for the image's frame slot to be free, then reset its fence.
    fn wait_for_slot(&mut self, image_index: u32) -> RenderResult<()>;
    /// Record the full command buffer for the image, with uniforms from `snapshot`.
    fn record(&mut self, image_index: u32, snapshot: &FrameSnapshot) -> RenderResult<()>;
    fn submit(&mut self, image_index: u32) -> RenderResult<()>;
    fn present(&mut self, image_index: u32) -> RenderResult<PresentOutcome>;
    /// Wait for the device to idle and rebuild everything that depends on the surface.
    fn recreate(&mut self) -> RenderResult<Recreation>;
}

/// Drives a [`FrameBackend`] through one frame per call.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameLoop {
    phase: FramePhase,
    needs_recreate: bool,
}

impl FrameLoop {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> FramePhase {
        self.phase
    }

    pub fn needs_recreate(&self) -> bool {
        self.needs_recreate
    }

    /// Ask for the swapchain to be rebuilt at the start of the next iteration.
    pub fn request_recreate(&mut self) {
        self.needs_recreate = true;
    }

    /// Run one iteration.
    ///
    /// A pending recreation, or an acquire that finds the surface stale or suboptimal, makes
    /// the whole iteration a recreation: nothing is recorded and the snapshot is not consumed.
    pub fn run_iteration<B: FrameBackend>(
        &mut self,
        backend: &mut B,
        snapshot: &FrameSnapshot,
    ) -> RenderResult<FrameOutcome> {
        if self.needs_recreate {
            self.advance(FrameEvent::SurfaceStale)?;
            return self.recreate(backend);
        }

        self.advance(FrameEvent::Begin)?;
        let acquired = match backend.acquire() {
            Ok(acquired) if acquired.suboptimal => {
                log::debug!("Swapchain suboptimal at acquire");
                self.advance(FrameEvent::SurfaceStale)?;
                return self.recreate(backend);
            }
            Ok(acquired) => acquired,
            Err(RenderError::SurfaceStale) => {
                log::debug!("Swapchain out of date at acquire");
                self.advance(FrameEvent::SurfaceStale)?;
                return self.recreate(backend);
            }
            Err(e) => return Err(e),
        };
        self.advance(FrameEvent::Acquired)?;

        backend.wait_for_slot(acquired.index)?;
        backend.record(acquired.index, snapshot)?;
        self.advance(FrameEvent::Recorded)?;

        backend.submit(acquired.index)?;
        self.advance(FrameEvent::Submitted)?;

        if backend.present(acquired.index)? == PresentOutcome::Stale {
            log::debug!("Swapchain stale at present");
            self.needs_recreate = true;
        }
        self.advance(FrameEvent::Presented)?;

        Ok(FrameOutcome::Presented)
    }

    fn recreate<B: FrameBackend>(&mut self, backend: &mut B) -> RenderResult<FrameOutcome> {
        match backend.recreate()? {
            Recreation::Done => {
                self.needs_recreate = false;
                self.advance(FrameEvent::Recreated)?;
                Ok(FrameOutcome::Recreated)
            }
            Recreation::Deferred => {
                self.needs_recreate = true;
                Ok(FrameOutcome::Deferred)
            }
        }
    }

    fn advance(&mut self, event: FrameEvent) -> RenderResult<()> {
        self.phase = self.phase.next(event)?;
        Ok(())
    }
}
