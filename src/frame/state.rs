//! Per-frame phase tracking.

use crate::error::{RenderError, RenderResult};

/// Where the frame loop is within one iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FramePhase {
    #[default]
    Idle,
    Acquiring,
    Recording,
    Submitted,
    Presenting,
    /// The surface no longer matches the swapchain. Entered from any phase.
    RecreateSwapchain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameEvent {
    Begin,
    Acquired,
    Recorded,
    Submitted,
    Presented,
    SurfaceStale,
    Recreated,
}

impl FramePhase {
    /// The phase `event` leads to, or an error if it cannot happen here.
    pub fn next(self, event: FrameEvent) -> RenderResult<Self> {
        use FrameEvent as E;
        use FramePhase as P;

        let next = match (self, event) {
            (_, E::SurfaceStale) => P::RecreateSwapchain,
            (P::Idle, E::Begin) => P::Acquiring,
            (P::Acquiring, E::Acquired) => P::Recording,
            (P::Recording, E::Recorded) => P::Submitted,
            (P::Submitted, E::Submitted) => P::Presenting,
            (P::Presenting, E::Presented) => P::Idle,
            (P::RecreateSwapchain, E::Recreated) => P::Idle,
            (phase, event) => {
                return Err(RenderError::InvalidParameter(format!(
                    "frame event {event:?} is invalid while {phase:?}"
                )))
            }
        };
        log::trace!("Frame phase {self:?} -> {next:?}");
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_returns_to_idle() {
        let events = [
            FrameEvent::Begin,
            FrameEvent::Acquired,
            FrameEvent::Recorded,
            FrameEvent::Submitted,
            FrameEvent::Presented,
        ];
        let phase = events
            .into_iter()
            .try_fold(FramePhase::Idle, FramePhase::next)
            .unwrap();
        assert_eq!(phase, FramePhase::Idle);
    }

    #[test]
    fn stale_surface_is_reachable_from_every_phase() {
        for phase in [
            FramePhase::Idle,
            FramePhase::Acquiring,
            FramePhase::Recording,
            FramePhase::Submitted,
            FramePhase::Presenting,
            FramePhase::RecreateSwapchain,
        ] {
            assert_eq!(
                phase.next(FrameEvent::SurfaceStale).unwrap(),
                FramePhase::RecreateSwapchain
            );
        }
        assert_eq!(
            FramePhase::RecreateSwapchain
                .next(FrameEvent::Recreated)
                .unwrap(),
            FramePhase::Idle
        );
    }

    #[test]
    fn recording_requires_an_acquired_image() {
        assert!(FramePhase::Idle.next(FrameEvent::Recorded).is_err());
        assert!(FramePhase::RecreateSwapchain.next(FrameEvent::Acquired).is_err());
    }
}
