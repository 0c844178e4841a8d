//! The fixed stage graph: render passes, their pipelines, offscreen targets and framebuffers.
//!
//! The bloom path runs the filter pass (geometry into bright and PBR targets, vertical blur,
//! horizontal blur) followed by the composite pass onto the backbuffer. The direct path runs
//! the two-subpass main pass instead. Only the selected path is built.

pub mod passes;
pub mod pipelines;
pub mod targets;

use std::collections::HashMap;
use std::path::PathBuf;

use ash::vk;

use crate::backend::vulkan::swapchain::SwapchainChanges;
use crate::config::RenderPath;
use crate::descriptors::{DescriptorBinder, DescriptorResource, SetId, SetLayoutKind};
use crate::error::{RenderError, RenderResult};
use crate::resources::ResourceManager;

use self::passes::{create_render_pass, PassKind};
use self::pipelines::PipelineSet;
use self::targets::{ScreenTargets, TargetKind};

impl RenderPath {
    pub fn passes(self) -> &'static [PassKind] {
        match self {
            RenderPath::Bloom => &[PassKind::Filter, PassKind::Composite],
            RenderPath::Direct => &[PassKind::Main],
        }
    }
}

/// The surface the stage graph renders to.
#[derive(Debug, Clone, Copy)]
pub struct SurfaceInfo<'a> {
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    pub image_views: &'a [vk::ImageView],
}

/// Descriptor sets that expose offscreen targets to later stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageSets {
    Bloom {
        bright: SetId,
        vertical: SetId,
        horizontal: SetId,
        pbr: SetId,
    },
    Direct {
        scene_color: SetId,
    },
}

impl StageSets {
    pub fn allocate(binder: &mut DescriptorBinder, path: RenderPath) -> RenderResult<Self> {
        Ok(match path {
            RenderPath::Bloom => Self::Bloom {
                bright: binder.allocate(SetLayoutKind::SampledImage)?,
                vertical: binder.allocate(SetLayoutKind::SampledImage)?,
                horizontal: binder.allocate(SetLayoutKind::SampledImage)?,
                pbr: binder.allocate(SetLayoutKind::SampledImage)?,
            },
            RenderPath::Direct => Self::Direct {
                scene_color: binder.allocate(SetLayoutKind::SubpassInput)?,
            },
        })
    }

    /// The target each set exposes.
    pub fn sources(&self) -> Vec<(SetId, TargetKind)> {
        match *self {
            Self::Bloom {
                bright,
                vertical,
                horizontal,
                pbr,
            } => vec![
                (bright, TargetKind::Bright),
                (vertical, TargetKind::Vertical),
                (horizontal, TargetKind::Horizontal),
                (pbr, TargetKind::Pbr),
            ],
            Self::Direct { scene_color } => vec![(scene_color, TargetKind::SceneColor)],
        }
    }

    /// One write per set, resolving each target to its current view through `view_of`.
    pub fn writes(
        &self,
        sampler: vk::Sampler,
        mut view_of: impl FnMut(TargetKind) -> RenderResult<vk::ImageView>,
    ) -> RenderResult<Vec<(SetId, DescriptorResource)>> {
        self.sources()
            .into_iter()
            .map(|(set, kind)| {
                let view = view_of(kind)?;
                let resource = match self {
                    Self::Bloom { .. } => DescriptorResource::Image { view, sampler },
                    Self::Direct { .. } => DescriptorResource::InputAttachment { view },
                };
                Ok((set, resource))
            })
            .collect()
    }

    /// Point every set at the current targets.
    pub fn write(
        &self,
        binder: &DescriptorBinder,
        resources: &ResourceManager,
        targets: &ScreenTargets,
        sampler: vk::Sampler,
    ) -> RenderResult<()> {
        let writes = self.writes(sampler, |kind| targets.view(resources, kind))?;
        for (set, resource) in writes {
            binder.write(set, &[resource])?;
        }
        Ok(())
    }
}

/// Framebuffers of the selected path.
///
/// The bloom path has one filter framebuffer plus one composite framebuffer per swapchain
/// image; the direct path has one main-pass framebuffer per swapchain image.
pub struct Framebuffers {
    device: ash::Device,
    filter: Option<vk::Framebuffer>,
    per_image: Vec<vk::Framebuffer>,
}

impl Framebuffers {
    pub fn new(
        device: &ash::Device,
        render_passes: &HashMap<PassKind, vk::RenderPass>,
        targets: &ScreenTargets,
        resources: &ResourceManager,
        surface: &SurfaceInfo<'_>,
    ) -> RenderResult<Self> {
        let mut framebuffers = Self {
            device: device.clone(),
            filter: None,
            per_image: Vec::with_capacity(surface.image_views.len()),
        };

        let pass = |kind: PassKind| {
            render_passes.get(&kind).copied().ok_or_else(|| {
                RenderError::InvalidParameter(format!("{kind:?} render pass not built"))
            })
        };

        let per_image_pass = match targets.path() {
            RenderPath::Bloom => {
                let views = targets.attachment_views(resources, PassKind::Filter)?;
                framebuffers.filter = Some(create_framebuffer(
                    device,
                    pass(PassKind::Filter)?,
                    &views,
                    surface.extent,
                )?);
                PassKind::Composite
            }
            RenderPath::Direct => PassKind::Main,
        };

        let offscreen = targets.attachment_views(resources, per_image_pass)?;
        let render_pass = pass(per_image_pass)?;
        for &backbuffer in surface.image_views {
            let mut views = offscreen.clone();
            views.push(backbuffer);
            let framebuffer = create_framebuffer(device, render_pass, &views, surface.extent)?;
            framebuffers.per_image.push(framebuffer);
        }

        Ok(framebuffers)
    }

    pub fn filter(&self) -> RenderResult<vk::Framebuffer> {
        self.filter
            .ok_or_else(|| RenderError::InvalidParameter("no filter framebuffer on this path".into()))
    }

    pub fn for_image(&self, image_index: u32) -> RenderResult<vk::Framebuffer> {
        self.per_image
            .get(image_index as usize)
            .copied()
            .ok_or_else(|| RenderError::InvalidParameter(format!("no framebuffer for image {image_index}")))
    }

    /// Number of per-swapchain-image framebuffers.
    pub fn image_count(&self) -> usize {
        self.per_image.len()
    }
}

impl Drop for Framebuffers {
    fn drop(&mut self) {
        unsafe {
            for framebuffer in self.per_image.drain(..).chain(self.filter.take()) {
                self.device.destroy_framebuffer(framebuffer, None);
            }
        }
    }
}

fn create_framebuffer(
    device: &ash::Device,
    render_pass: vk::RenderPass,
    views: &[vk::ImageView],
    extent: vk::Extent2D,
) -> RenderResult<vk::Framebuffer> {
    let framebuffer_info = vk::FramebufferCreateInfo::default()
        .render_pass(render_pass)
        .attachments(views)
        .width(extent.width)
        .height(extent.height)
        .layers(1);
    unsafe { device.create_framebuffer(&framebuffer_info, None) }
        .map_err(|e| RenderError::creation("framebuffer", e))
}

/// Owns a set of render passes, destroying them on drop.
pub struct RenderPasses {
    device: ash::Device,
    passes: HashMap<PassKind, vk::RenderPass>,
}

impl RenderPasses {
    pub fn new(device: &ash::Device, path: RenderPath, surface_format: vk::Format) -> RenderResult<Self> {
        let mut render_passes = Self {
            device: device.clone(),
            passes: HashMap::new(),
        };
        for &kind in path.passes() {
            let pass = create_render_pass(device, kind, surface_format)?;
            render_passes.passes.insert(kind, pass);
        }
        Ok(render_passes)
    }

    pub fn get(&self, kind: PassKind) -> RenderResult<vk::RenderPass> {
        self.passes
            .get(&kind)
            .copied()
            .ok_or_else(|| RenderError::InvalidParameter(format!("{kind:?} render pass not built")))
    }

    pub fn as_map(&self) -> &HashMap<PassKind, vk::RenderPass> {
        &self.passes
    }
}

impl Drop for RenderPasses {
    fn drop(&mut self) {
        for (_, pass) in self.passes.drain() {
            unsafe { self.device.destroy_render_pass(pass, None) };
        }
    }
}

/// What a recreation rebuilt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rebuilt {
    pub render_passes: bool,
    pub pipelines: bool,
    pub targets: bool,
    pub framebuffers: usize,
}

/// The complete stage topology of the selected render path.
pub struct StageGraph {
    path: RenderPath,
    shader_dir: PathBuf,
    sampler: vk::Sampler,
    sets: StageSets,
    targets: ScreenTargets,
    // Drop order: framebuffers, then pipelines, then the passes they were built against
    framebuffers: Option<Framebuffers>,
    pipelines: Option<PipelineSet>,
    render_passes: RenderPasses,
}

impl StageGraph {
    pub fn new(
        device: &ash::Device,
        resources: &mut ResourceManager,
        binder: &mut DescriptorBinder,
        path: RenderPath,
        shader_dir: PathBuf,
        sampler: vk::Sampler,
        surface: &SurfaceInfo<'_>,
    ) -> RenderResult<Self> {
        let render_passes = RenderPasses::new(device, path, surface.format)?;
        let pipelines = PipelineSet::new(
            device,
            binder,
            render_passes.as_map(),
            &shader_dir,
            path,
            surface.extent,
        )?;
        let targets = ScreenTargets::create(resources, path, surface.extent)?;
        let sets = StageSets::allocate(binder, path)?;
        sets.write(binder, resources, &targets, sampler)?;
        let framebuffers =
            Framebuffers::new(device, render_passes.as_map(), &targets, resources, surface)?;

        Ok(Self {
            path,
            shader_dir,
            sampler,
            sets,
            targets,
            framebuffers: Some(framebuffers),
            pipelines: Some(pipelines),
            render_passes,
        })
    }

    /// Rebuild what depends on the surface, in dependency order.
    ///
    /// The device must be idle. Render passes are rebuilt only when the surface format changed;
    /// pipelines and targets only when the size (or the passes) changed. Descriptor writes and
    /// framebuffers are always redone, because swapchain image views are always new.
    pub fn recreate(
        &mut self,
        device: &ash::Device,
        resources: &mut ResourceManager,
        binder: &DescriptorBinder,
        changes: SwapchainChanges,
        surface: &SurfaceInfo<'_>,
    ) -> RenderResult<Rebuilt> {
        let mut rebuilt = Rebuilt::default();
        self.framebuffers = None;

        let backbuffer_passes = self.path.passes().iter().any(|pass| pass.uses_backbuffer());
        if changes.format_changed && backbuffer_passes {
            self.pipelines = None;
            self.render_passes = RenderPasses::new(device, self.path, surface.format)?;
            rebuilt.render_passes = true;
        }

        if changes.size_changed || rebuilt.render_passes || self.pipelines.is_none() {
            self.pipelines = None;
            self.pipelines = Some(PipelineSet::new(
                device,
                binder,
                self.render_passes.as_map(),
                &self.shader_dir,
                self.path,
                surface.extent,
            )?);
            rebuilt.pipelines = true;
        }

        if changes.size_changed {
            self.targets.recreate(resources, surface.extent)?;
            rebuilt.targets = true;
        }

        self.sets.write(binder, resources, &self.targets, self.sampler)?;
        let framebuffers = Framebuffers::new(
            device,
            self.render_passes.as_map(),
            &self.targets,
            resources,
            surface,
        )?;
        rebuilt.framebuffers = framebuffers.image_count();
        self.framebuffers = Some(framebuffers);

        Ok(rebuilt)
    }

    pub fn path(&self) -> RenderPath {
        self.path
    }

    pub fn render_pass(&self, kind: PassKind) -> RenderResult<vk::RenderPass> {
        self.render_passes.get(kind)
    }

    pub fn pipelines(&self) -> RenderResult<&PipelineSet> {
        self.pipelines
            .as_ref()
            .ok_or_else(|| RenderError::InvalidParameter("pipelines not built".into()))
    }

    pub fn framebuffers(&self) -> RenderResult<&Framebuffers> {
        self.framebuffers
            .as_ref()
            .ok_or_else(|| RenderError::InvalidParameter("framebuffers not built".into()))
    }

    pub fn targets(&self) -> &ScreenTargets {
        &self.targets
    }

    pub fn sets(&self) -> StageSets {
        self.sets
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.targets.extent()
    }
}

#[cfg(test)]
mod tests {
    use ash::vk::Handle;

    use super::*;

    fn bloom_sets() -> StageSets {
        StageSets::Bloom {
            bright: SetId::from_index(0),
            vertical: SetId::from_index(1),
            horizontal: SetId::from_index(2),
            pbr: SetId::from_index(3),
        }
    }

    /// Views of one generation of targets: distinct per kind and per generation.
    fn view_for(generation: u64) -> impl FnMut(TargetKind) -> RenderResult<vk::ImageView> {
        move |kind| Ok(vk::ImageView::from_raw(generation * 100 + kind as u64 + 1))
    }

    fn written_view(resource: &DescriptorResource) -> vk::ImageView {
        match *resource {
            DescriptorResource::Image { view, .. } | DescriptorResource::InputAttachment { view } => view,
            DescriptorResource::Buffer { .. } => vk::ImageView::null(),
        }
    }

    #[test]
    fn bloom_sets_expose_every_sampled_target() {
        let sources: Vec<TargetKind> = bloom_sets().sources().into_iter().map(|(_, k)| k).collect();
        assert_eq!(
            sources,
            vec![
                TargetKind::Bright,
                TargetKind::Vertical,
                TargetKind::Horizontal,
                TargetKind::Pbr
            ]
        );
    }

    /// After the targets are recreated, every set is rewritten and none keeps an old view.
    #[test]
    fn rewrites_point_every_set_at_the_new_views() {
        let sampler = vk::Sampler::from_raw(7);
        for sets in [bloom_sets(), StageSets::Direct { scene_color: SetId::from_index(0) }] {
            let before = sets.writes(sampler, view_for(1)).unwrap();
            let after = sets.writes(sampler, view_for(2)).unwrap();

            assert_eq!(after.len(), sets.sources().len());
            for ((set_before, old), (set_after, new)) in before.iter().zip(&after) {
                assert_eq!(set_before, set_after);
                assert_ne!(written_view(old), written_view(new));
                assert!(before.iter().all(|(_, r)| written_view(r) != written_view(new)));
            }
        }
    }

    #[test]
    fn bloom_writes_sample_and_direct_writes_read_input_attachments() {
        let sampler = vk::Sampler::from_raw(7);
        let bloom = bloom_sets().writes(sampler, view_for(1)).unwrap();
        assert!(bloom
            .iter()
            .all(|(_, r)| matches!(r, DescriptorResource::Image { sampler: s, .. } if *s == sampler)));

        let direct = StageSets::Direct {
            scene_color: SetId::from_index(0),
        }
        .writes(sampler, view_for(1))
        .unwrap();
        assert!(matches!(direct[0].1, DescriptorResource::InputAttachment { .. }));
    }

    #[test]
    fn missing_target_fails_the_rewrite() {
        let result = bloom_sets().writes(vk::Sampler::null(), |kind| {
            Err(RenderError::InvalidParameter(format!("no {kind:?}")))
        });
        assert!(result.is_err());
    }

    #[test]
    fn each_path_builds_its_own_passes() {
        assert_eq!(
            RenderPath::Bloom.passes(),
            &[PassKind::Filter, PassKind::Composite]
        );
        assert_eq!(RenderPath::Direct.passes(), &[PassKind::Main]);
    }

    #[test]
    fn only_backbuffer_passes_depend_on_surface_format() {
        assert!(!PassKind::Filter.uses_backbuffer());
        assert!(PassKind::Composite.uses_backbuffer());
        assert!(PassKind::Main.uses_backbuffer());
    }
}
