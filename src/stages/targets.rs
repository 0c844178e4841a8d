//! Screen-sized offscreen targets.

use ash::vk;

use super::passes::{filter, PassKind};
use crate::config::{RenderPath, DEPTH_FORMAT, OFFSCREEN_FORMAT};
use crate::error::{RenderError, RenderResult};
use crate::resources::{ImageId, ResourceManager};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetKind {
    /// Thresholded high-luminance color.
    Bright,
    Vertical,
    Horizontal,
    /// Full lit scene color of the bloom path.
    Pbr,
    /// Lit scene color of the direct path.
    SceneColor,
    Depth,
}

impl TargetKind {
    pub fn for_path(path: RenderPath) -> &'static [Self] {
        match path {
            RenderPath::Bloom => &[
                Self::Bright,
                Self::Vertical,
                Self::Horizontal,
                Self::Pbr,
                Self::Depth,
            ],
            RenderPath::Direct => &[Self::SceneColor, Self::Depth],
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Bright => "bright",
            Self::Vertical => "vertical blur",
            Self::Horizontal => "horizontal blur",
            Self::Pbr => "pbr",
            Self::SceneColor => "scene color",
            Self::Depth => "depth",
        }
    }
}

/// The offscreen images of one render path at the current surface size.
#[derive(Debug)]
pub struct ScreenTargets {
    path: RenderPath,
    extent: vk::Extent2D,
    images: Vec<(TargetKind, ImageId)>,
}

impl ScreenTargets {
    pub fn create(
        resources: &mut ResourceManager,
        path: RenderPath,
        extent: vk::Extent2D,
    ) -> RenderResult<Self> {
        let mut targets = Self {
            path,
            extent,
            images: Vec::new(),
        };

        for &kind in TargetKind::for_path(path) {
            let created = match kind {
                TargetKind::Depth => resources.create_depth_target(kind.name(), DEPTH_FORMAT, extent),
                _ => resources.create_target(kind.name(), OFFSCREEN_FORMAT, extent),
            };
            match created {
                Ok(id) => targets.images.push((kind, id)),
                Err(e) => {
                    if let Err(cleanup) = targets.release(resources) {
                        log::warn!("Failed to release partial screen targets: {cleanup}");
                    }
                    return Err(e);
                }
            }
        }
        Ok(targets)
    }

    /// Replace every target with one of the new size.
    ///
    /// The new images exist before the old ones are destroyed, so no view handle is reused.
    pub fn recreate(&mut self, resources: &mut ResourceManager, extent: vk::Extent2D) -> RenderResult<()> {
        let fresh = Self::create(resources, self.path, extent)?;
        let old = std::mem::replace(self, fresh);
        old.release(resources)
    }

    pub fn release(self, resources: &mut ResourceManager) -> RenderResult<()> {
        for (_, id) in self.images.into_iter().rev() {
            resources.destroy_screen_sized(id)?;
        }
        Ok(())
    }

    pub fn get(&self, kind: TargetKind) -> RenderResult<ImageId> {
        self.images
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|&(_, id)| id)
            .ok_or_else(|| RenderError::InvalidParameter(format!("no {kind:?} target on {:?}", self.path)))
    }

    pub fn view(&self, resources: &ResourceManager, kind: TargetKind) -> RenderResult<vk::ImageView> {
        Ok(resources.image(self.get(kind)?)?.view())
    }

    /// Views of the offscreen attachments of `pass`, in attachment order.
    ///
    /// Backbuffer attachments are not targets and are left out.
    pub fn attachment_views(
        &self,
        resources: &ResourceManager,
        pass: PassKind,
    ) -> RenderResult<Vec<vk::ImageView>> {
        let kinds: &[TargetKind] = match pass {
            PassKind::Filter => &FILTER_ORDER,
            PassKind::Main => &[TargetKind::SceneColor, TargetKind::Depth],
            PassKind::Composite => &[],
        };
        kinds.iter().map(|&kind| self.view(resources, kind)).collect()
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn path(&self) -> RenderPath {
        self.path
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }
}

const FILTER_ORDER: [TargetKind; 5] = {
    let mut order = [TargetKind::Depth; 5];
    order[filter::BRIGHT as usize] = TargetKind::Bright;
    order[filter::VERTICAL as usize] = TargetKind::Vertical;
    order[filter::HORIZONTAL as usize] = TargetKind::Horizontal;
    order[filter::PBR as usize] = TargetKind::Pbr;
    order[filter::DEPTH as usize] = TargetKind::Depth;
    order
};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::passes::{direct, AttachmentRole};

    #[test]
    fn filter_order_matches_attachment_roles() {
        let attachments = PassKind::Filter.attachments();
        assert_eq!(FILTER_ORDER.len(), attachments.len());
        for (kind, attachment) in FILTER_ORDER.iter().zip(attachments) {
            let is_depth = attachment.role == AttachmentRole::Depth;
            assert_eq!(*kind == TargetKind::Depth, is_depth);
        }
    }

    #[test]
    fn direct_targets_precede_the_backbuffer() {
        assert_eq!(TargetKind::for_path(RenderPath::Direct).len() as u32, direct::BACKBUFFER);
    }

    #[test]
    fn bloom_path_owns_every_filter_target() {
        for kind in FILTER_ORDER {
            assert!(TargetKind::for_path(RenderPath::Bloom).contains(&kind));
        }
        assert!(!TargetKind::for_path(RenderPath::Bloom).contains(&TargetKind::SceneColor));
    }
}
