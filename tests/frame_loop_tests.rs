//! Frame loop behavior against a scripted backend: no GPU required.

use std::collections::VecDeque;

use glam::{Mat4, Vec3};
use rstest::rstest;

use bloom_renderer::backend::vulkan::swapchain::{AcquiredImage, PresentOutcome};
use bloom_renderer::frame::state::FramePhase;
use bloom_renderer::frame::{FrameBackend, FrameLoop, FrameOutcome, Recreation};
use bloom_renderer::{FrameSnapshot, RenderError, RenderResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Call {
    Acquire,
    Wait(u32),
    Record(u32),
    Submit(u32),
    Present(u32),
    Recreate,
}

/// Replays queued acquire, present and recreate results and logs every call.
#[derive(Default)]
struct ScriptedBackend {
    acquires: VecDeque<RenderResult<AcquiredImage>>,
    presents: VecDeque<PresentOutcome>,
    recreations: VecDeque<Recreation>,
    calls: Vec<Call>,
    recorded: Vec<FrameSnapshot>,
}

impl ScriptedBackend {
    fn image(index: u32) -> RenderResult<AcquiredImage> {
        Ok(AcquiredImage {
            index,
            suboptimal: false,
        })
    }

    fn suboptimal(index: u32) -> RenderResult<AcquiredImage> {
        Ok(AcquiredImage {
            index,
            suboptimal: true,
        })
    }

    fn count(&self, call: Call) -> usize {
        self.calls.iter().filter(|&&c| c == call).count()
    }
}

impl FrameBackend for ScriptedBackend {
    fn acquire(&mut self) -> RenderResult<AcquiredImage> {
        self.calls.push(Call::Acquire);
        self.acquires.pop_front().unwrap_or_else(|| Self::image(0))
    }

    fn wait_for_slot(&mut self, image_index: u32) -> RenderResult<()> {
        self.calls.push(Call::Wait(image_index));
        Ok(())
    }

    fn record(&mut self, image_index: u32, snapshot: &FrameSnapshot) -> RenderResult<()> {
        self.calls.push(Call::Record(image_index));
        self.recorded.push(*snapshot);
        Ok(())
    }

    fn submit(&mut self, image_index: u32) -> RenderResult<()> {
        self.calls.push(Call::Submit(image_index));
        Ok(())
    }

    fn present(&mut self, image_index: u32) -> RenderResult<PresentOutcome> {
        self.calls.push(Call::Present(image_index));
        Ok(self.presents.pop_front().unwrap_or(PresentOutcome::Presented))
    }

    fn recreate(&mut self) -> RenderResult<Recreation> {
        self.calls.push(Call::Recreate);
        Ok(self.recreations.pop_front().unwrap_or(Recreation::Done))
    }
}

fn snapshot(x: f32) -> FrameSnapshot {
    FrameSnapshot {
        camera_to_world: Mat4::from_translation(Vec3::new(x, 0.0, 0.0)),
        light_position: Vec3::Y,
    }
}

#[test]
fn test_frame_runs_steps_in_order() {
    let mut backend = ScriptedBackend::default();
    backend.acquires.push_back(ScriptedBackend::image(2));
    let mut frame_loop = FrameLoop::new();

    let outcome = frame_loop.run_iteration(&mut backend, &snapshot(1.0)).unwrap();

    assert_eq!(outcome, FrameOutcome::Presented);
    assert!(outcome.advances_time());
    assert_eq!(
        backend.calls,
        vec![
            Call::Acquire,
            Call::Wait(2),
            Call::Record(2),
            Call::Submit(2),
            Call::Present(2)
        ]
    );
    assert_eq!(backend.recorded, vec![snapshot(1.0)]);
    assert_eq!(frame_loop.phase(), FramePhase::Idle);
    assert!(!frame_loop.needs_recreate());
}

/// A stale surface at acquire rebuilds in the same iteration and draws nothing.
#[test]
fn test_stale_acquire_recreates_without_drawing() {
    let mut backend = ScriptedBackend::default();
    backend.acquires.push_back(Err(RenderError::SurfaceStale));
    let mut frame_loop = FrameLoop::new();

    let outcome = frame_loop.run_iteration(&mut backend, &snapshot(1.0)).unwrap();

    assert_eq!(outcome, FrameOutcome::Recreated);
    assert!(!outcome.advances_time());
    assert_eq!(backend.calls, vec![Call::Acquire, Call::Recreate]);
    assert!(backend.recorded.is_empty());
    assert!(!frame_loop.needs_recreate());

    let outcome = frame_loop.run_iteration(&mut backend, &snapshot(2.0)).unwrap();
    assert_eq!(outcome, FrameOutcome::Presented);
    assert_eq!(backend.recorded, vec![snapshot(2.0)]);
}

/// A suboptimal image is abandoned: the iteration rebuilds instead of drawing.
#[test]
fn test_suboptimal_acquire_recreates_without_drawing() {
    let mut backend = ScriptedBackend::default();
    backend.acquires.push_back(ScriptedBackend::suboptimal(1));
    let mut frame_loop = FrameLoop::new();

    let outcome = frame_loop.run_iteration(&mut backend, &snapshot(1.0)).unwrap();

    assert_eq!(outcome, FrameOutcome::Recreated);
    assert!(!outcome.advances_time());
    assert_eq!(backend.calls, vec![Call::Acquire, Call::Recreate]);
    assert!(backend.recorded.is_empty());
    assert!(!frame_loop.needs_recreate());

    let outcome = frame_loop.run_iteration(&mut backend, &snapshot(2.0)).unwrap();
    assert_eq!(outcome, FrameOutcome::Presented);
    assert_eq!(backend.recorded, vec![snapshot(2.0)]);
}

/// A suboptimal acquire on a minimized window keeps deferring like a stale one.
#[test]
fn test_suboptimal_acquire_defers_on_zero_size() {
    let mut backend = ScriptedBackend::default();
    backend.acquires.push_back(ScriptedBackend::suboptimal(0));
    backend.recreations.push_back(Recreation::Deferred);
    let mut frame_loop = FrameLoop::new();

    let outcome = frame_loop.run_iteration(&mut backend, &snapshot(1.0)).unwrap();
    assert_eq!(outcome, FrameOutcome::Deferred);
    assert!(frame_loop.needs_recreate());
    assert_eq!(backend.count(Call::Present(0)), 0);

    let outcome = frame_loop.run_iteration(&mut backend, &snapshot(1.0)).unwrap();
    assert_eq!(outcome, FrameOutcome::Recreated);
    assert_eq!(backend.count(Call::Acquire), 1);
}

#[test]
fn test_stale_present_flags_recreation() {
    let mut backend = ScriptedBackend::default();
    backend.presents.push_back(PresentOutcome::Stale);
    let mut frame_loop = FrameLoop::new();

    let outcome = frame_loop.run_iteration(&mut backend, &snapshot(1.0)).unwrap();
    assert_eq!(outcome, FrameOutcome::Presented);
    assert!(frame_loop.needs_recreate());

    let outcome = frame_loop.run_iteration(&mut backend, &snapshot(1.0)).unwrap();
    assert_eq!(outcome, FrameOutcome::Recreated);
}

/// A zero-sized surface keeps deferring until recreation succeeds.
#[test]
fn test_zero_size_defers_recreation() {
    let mut backend = ScriptedBackend::default();
    backend.recreations.extend([Recreation::Deferred, Recreation::Deferred, Recreation::Done]);
    let mut frame_loop = FrameLoop::new();
    frame_loop.request_recreate();

    for _ in 0..2 {
        let outcome = frame_loop.run_iteration(&mut backend, &snapshot(1.0)).unwrap();
        assert_eq!(outcome, FrameOutcome::Deferred);
        assert!(!outcome.advances_time());
        assert!(frame_loop.needs_recreate());
    }

    let outcome = frame_loop.run_iteration(&mut backend, &snapshot(1.0)).unwrap();
    assert_eq!(outcome, FrameOutcome::Recreated);
    assert_eq!(backend.count(Call::Recreate), 3);
    assert_eq!(backend.count(Call::Acquire), 0);
}

#[rstest]
#[case::device_lost(RenderError::SubmissionFailed("device lost".into()))]
#[case::transfer(RenderError::TransferFailed("fence".into()))]
fn test_fatal_acquire_errors_propagate(#[case] error: RenderError) {
    let mut backend = ScriptedBackend::default();
    backend.acquires.push_back(Err(error));
    let mut frame_loop = FrameLoop::new();

    assert!(frame_loop.run_iteration(&mut backend, &snapshot(1.0)).is_err());
    assert_eq!(backend.count(Call::Recreate), 0);
    assert!(backend.recorded.is_empty());
}
