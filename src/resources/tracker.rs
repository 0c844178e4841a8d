//! Acquisition-order bookkeeping for GPU resources.

use std::collections::{BTreeMap, HashMap};

use super::{BufferId, ImageId, SamplerId};

/// Any resource owned by the [`ResourceManager`](super::ResourceManager).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceHandle {
    Buffer(BufferId),
    Image(ImageId),
    Sampler(SamplerId),
}

impl From<BufferId> for ResourceHandle {
    fn from(id: BufferId) -> Self {
        Self::Buffer(id)
    }
}

impl From<ImageId> for ResourceHandle {
    fn from(id: ImageId) -> Self {
        Self::Image(id)
    }
}

impl From<SamplerId> for ResourceHandle {
    fn from(id: SamplerId) -> Self {
        Self::Sampler(id)
    }
}

/// How long a resource is expected to live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Lifetime {
    /// Lives until shutdown: mesh data, material uniforms, textures, samplers.
    #[default]
    Persistent,
    /// Tied to the surface size and released on resize: offscreen targets and depth.
    ScreenSized,
}

/// Records live handles in the order they were acquired.
#[derive(Debug, Default)]
pub struct ResourceTracker {
    next_sequence: u64,
    live: BTreeMap<u64, (ResourceHandle, Lifetime)>,
    sequences: HashMap<ResourceHandle, u64>,
}

impl ResourceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, handle: ResourceHandle, lifetime: Lifetime) {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.live.insert(sequence, (handle, lifetime));
        self.sequences.insert(handle, sequence);
    }

    /// Stop tracking `handle`. Returns its lifetime if it was live.
    pub fn forget(&mut self, handle: ResourceHandle) -> Option<Lifetime> {
        let sequence = self.sequences.remove(&handle)?;
        self.live.remove(&sequence).map(|(_, lifetime)| lifetime)
    }

    pub fn lifetime(&self, handle: ResourceHandle) -> Option<Lifetime> {
        let sequence = self.sequences.get(&handle)?;
        self.live.get(sequence).map(|&(_, lifetime)| lifetime)
    }

    /// Remove and return every live handle, newest first.
    pub fn drain_newest_first(&mut self) -> Vec<ResourceHandle> {
        self.sequences.clear();
        std::mem::take(&mut self.live)
            .into_values()
            .rev()
            .map(|(handle, _)| handle)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer(id: u64) -> ResourceHandle {
        ResourceHandle::Buffer(BufferId(id))
    }

    fn image(id: u64) -> ResourceHandle {
        ResourceHandle::Image(ImageId(id))
    }

    #[test]
    fn full_teardown_is_reverse_acquisition_order() {
        let mut tracker = ResourceTracker::new();
        tracker.record(buffer(1), Lifetime::Persistent);
        tracker.record(image(2), Lifetime::ScreenSized);
        tracker.record(buffer(3), Lifetime::Persistent);

        assert_eq!(
            tracker.drain_newest_first(),
            vec![buffer(3), image(2), buffer(1)]
        );
        assert!(tracker.is_empty());
    }

    #[test]
    fn lifetimes_follow_their_handles() {
        let mut tracker = ResourceTracker::new();
        tracker.record(buffer(1), Lifetime::Persistent);
        tracker.record(image(2), Lifetime::ScreenSized);

        assert_eq!(tracker.lifetime(buffer(1)), Some(Lifetime::Persistent));
        assert_eq!(tracker.lifetime(image(2)), Some(Lifetime::ScreenSized));

        assert_eq!(tracker.forget(image(2)), Some(Lifetime::ScreenSized));
        assert_eq!(tracker.lifetime(image(2)), None);
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn forgotten_handles_are_not_released_twice() {
        let mut tracker = ResourceTracker::new();
        tracker.record(buffer(1), Lifetime::Persistent);
        tracker.record(buffer(2), Lifetime::Persistent);

        assert_eq!(tracker.forget(buffer(1)), Some(Lifetime::Persistent));
        assert_eq!(tracker.forget(buffer(1)), None);
        assert_eq!(tracker.drain_newest_first(), vec![buffer(2)]);
    }
}
