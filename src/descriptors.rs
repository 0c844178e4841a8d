//! Descriptor set layouts, allocation and writes driven by one binding table.
//!
//! Every set the renderer binds is one of the [`SetLayoutKind`]s. Each kind maps to a fixed
//! list of bindings; layout creation, pool sizing and write validation all read that table.

use std::collections::HashMap;

use ash::vk;

use crate::error::{RenderError, RenderResult};

const VERTEX_FRAGMENT: vk::ShaderStageFlags = vk::ShaderStageFlags::from_raw(
    vk::ShaderStageFlags::VERTEX.as_raw() | vk::ShaderStageFlags::FRAGMENT.as_raw(),
);

/// The kind of resource behind a binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    UniformBuffer,
    /// Combined image sampler.
    SampledImage,
    /// Attachment of the current render pass read at the same pixel.
    InputAttachment,
}

impl ResourceKind {
    pub fn descriptor_type(self) -> vk::DescriptorType {
        match self {
            Self::UniformBuffer => vk::DescriptorType::UNIFORM_BUFFER,
            Self::SampledImage => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            Self::InputAttachment => vk::DescriptorType::INPUT_ATTACHMENT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindingSpec {
    pub binding: u32,
    pub kind: ResourceKind,
    pub stages: vk::ShaderStageFlags,
}

const fn binding(binding: u32, kind: ResourceKind, stages: vk::ShaderStageFlags) -> BindingSpec {
    BindingSpec {
        binding,
        kind,
        stages,
    }
}

/// Every descriptor set layout in the renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SetLayoutKind {
    /// Camera matrices.
    Scene,
    Light,
    /// Per-mesh scalar material parameters.
    Material,
    /// Per-mesh base color, roughness and metalness textures.
    MaterialTextures,
    /// One offscreen target sampled by a later stage.
    SampledImage,
    /// Gaussian weights of one blur direction.
    Kernel,
    /// Scene color read back within the direct-path main pass.
    SubpassInput,
}

impl SetLayoutKind {
    pub const ALL: [Self; 7] = [
        Self::Scene,
        Self::Light,
        Self::Material,
        Self::MaterialTextures,
        Self::SampledImage,
        Self::Kernel,
        Self::SubpassInput,
    ];

    pub fn bindings(self) -> &'static [BindingSpec] {
        match self {
            Self::Scene => SCENE_BINDINGS,
            Self::Light | Self::Material | Self::Kernel => FRAGMENT_UNIFORM_BINDINGS,
            Self::MaterialTextures => MATERIAL_TEXTURE_BINDINGS,
            Self::SampledImage => SAMPLED_IMAGE_BINDINGS,
            Self::SubpassInput => SUBPASS_INPUT_BINDINGS,
        }
    }
}

const FRAGMENT: vk::ShaderStageFlags = vk::ShaderStageFlags::FRAGMENT;

const SCENE_BINDINGS: &[BindingSpec] = &[binding(0, ResourceKind::UniformBuffer, VERTEX_FRAGMENT)];
const FRAGMENT_UNIFORM_BINDINGS: &[BindingSpec] = &[binding(0, ResourceKind::UniformBuffer, FRAGMENT)];
const MATERIAL_TEXTURE_BINDINGS: &[BindingSpec] = &[
    binding(0, ResourceKind::SampledImage, FRAGMENT),
    binding(1, ResourceKind::SampledImage, FRAGMENT),
    binding(2, ResourceKind::SampledImage, FRAGMENT),
];
const SAMPLED_IMAGE_BINDINGS: &[BindingSpec] = &[binding(0, ResourceKind::SampledImage, FRAGMENT)];
const SUBPASS_INPUT_BINDINGS: &[BindingSpec] = &[binding(0, ResourceKind::InputAttachment, FRAGMENT)];

/// A resource to write into one binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorResource {
    Buffer {
        buffer: vk::Buffer,
        range: vk::DeviceSize,
    },
    Image {
        view: vk::ImageView,
        sampler: vk::Sampler,
    },
    InputAttachment {
        view: vk::ImageView,
    },
}

impl DescriptorResource {
    pub fn kind(&self) -> ResourceKind {
        match self {
            Self::Buffer { .. } => ResourceKind::UniformBuffer,
            Self::Image { .. } => ResourceKind::SampledImage,
            Self::InputAttachment { .. } => ResourceKind::InputAttachment,
        }
    }
}

/// Check `resources` supplies exactly one matching resource per binding of `kind`, in order.
pub fn check_writes(kind: SetLayoutKind, resources: &[DescriptorResource]) -> RenderResult<()> {
    let bindings = kind.bindings();
    if bindings.len() != resources.len() {
        return Err(RenderError::InvalidParameter(format!(
            "{kind:?} set takes {} resources, got {}",
            bindings.len(),
            resources.len()
        )));
    }
    for (spec, resource) in bindings.iter().zip(resources) {
        if spec.kind != resource.kind() {
            return Err(RenderError::InvalidParameter(format!(
                "{kind:?} binding {} expects {:?}, got {:?}",
                spec.binding,
                spec.kind,
                resource.kind()
            )));
        }
    }
    Ok(())
}

/// How many sets of each kind the pool must hold.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolCapacity {
    sets: HashMap<SetLayoutKind, u32>,
}

impl PoolCapacity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, kind: SetLayoutKind, count: u32) -> Self {
        *self.sets.entry(kind).or_insert(0) += count;
        self
    }

    /// Sets for `mesh_count` meshes plus every per-stage set.
    pub fn for_scene(mesh_count: u32) -> Self {
        Self::new()
            .with(SetLayoutKind::Scene, 1)
            .with(SetLayoutKind::Light, 1)
            .with(SetLayoutKind::Material, mesh_count)
            .with(SetLayoutKind::MaterialTextures, mesh_count)
            .with(SetLayoutKind::Kernel, 2)
            // bright, vertical, horizontal and full-scene targets
            .with(SetLayoutKind::SampledImage, 4)
            .with(SetLayoutKind::SubpassInput, 1)
    }

    pub fn max_sets(&self) -> u32 {
        self.sets.values().sum()
    }

    /// Descriptor counts per type, in a stable order.
    pub fn pool_sizes(&self) -> Vec<vk::DescriptorPoolSize> {
        let mut counts: Vec<(vk::DescriptorType, u32)> = Vec::new();
        for kind in SetLayoutKind::ALL {
            let sets = self.sets.get(&kind).copied().unwrap_or(0);
            for spec in kind.bindings() {
                let ty = spec.kind.descriptor_type();
                match counts.iter_mut().find(|(t, _)| *t == ty) {
                    Some((_, count)) => *count += sets,
                    None => counts.push((ty, sets)),
                }
            }
        }
        counts
            .into_iter()
            .filter(|&(_, count)| count > 0)
            .map(|(ty, descriptor_count)| vk::DescriptorPoolSize {
                ty,
                descriptor_count,
            })
            .collect()
    }
}

/// Handle to an allocated descriptor set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SetId(u32);

impl SetId {
    #[cfg(test)]
    pub(crate) const fn from_index(index: u32) -> Self {
        Self(index)
    }
}

struct AllocatedSet {
    set: vk::DescriptorSet,
    kind: SetLayoutKind,
}

/// Owns the layouts, the pool and every set allocated from it.
pub struct DescriptorBinder {
    device: ash::Device,
    pool: vk::DescriptorPool,
    layouts: HashMap<SetLayoutKind, vk::DescriptorSetLayout>,
    sets: Vec<AllocatedSet>,
}

impl DescriptorBinder {
    pub fn new(device: &ash::Device, capacity: &PoolCapacity) -> RenderResult<Self> {
        let mut binder = Self {
            device: device.clone(),
            pool: vk::DescriptorPool::null(),
            layouts: HashMap::new(),
            sets: Vec::new(),
        };

        for kind in SetLayoutKind::ALL {
            let layout = create_set_layout(device, kind)?;
            binder.layouts.insert(kind, layout);
        }

        let pool_sizes = capacity.pool_sizes();
        let pool_info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(capacity.max_sets().max(1))
            .pool_sizes(&pool_sizes);
        binder.pool = unsafe { device.create_descriptor_pool(&pool_info, None) }
            .map_err(|e| RenderError::creation("descriptor pool", e))?;

        Ok(binder)
    }

    pub fn layout(&self, kind: SetLayoutKind) -> RenderResult<vk::DescriptorSetLayout> {
        self.layouts
            .get(&kind)
            .copied()
            .ok_or_else(|| RenderError::InvalidParameter(format!("no layout for {kind:?}")))
    }

    pub fn allocate(&mut self, kind: SetLayoutKind) -> RenderResult<SetId> {
        let layouts = [self.layout(kind)?];
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(self.pool)
            .set_layouts(&layouts);

        let set = unsafe { self.device.allocate_descriptor_sets(&alloc_info) }
            .map_err(|e| RenderError::creation("descriptor set", e))?
            .into_iter()
            .next()
            .ok_or_else(|| RenderError::ResourceCreationFailed("empty descriptor set allocation".into()))?;

        let id = SetId(self.sets.len() as u32);
        self.sets.push(AllocatedSet { set, kind });
        Ok(id)
    }

    /// Point every binding of `id` at `resources`, given in binding order.
    ///
    /// Only call while no in-flight command buffer uses the set.
    pub fn write(&self, id: SetId, resources: &[DescriptorResource]) -> RenderResult<()> {
        let allocated = self.allocated(id)?;
        check_writes(allocated.kind, resources)?;

        enum Info {
            Buffer([vk::DescriptorBufferInfo; 1]),
            Image([vk::DescriptorImageInfo; 1]),
        }

        let infos: Vec<Info> = resources
            .iter()
            .map(|resource| match *resource {
                DescriptorResource::Buffer { buffer, range } => {
                    Info::Buffer([vk::DescriptorBufferInfo {
                        buffer,
                        offset: 0,
                        range,
                    }])
                }
                DescriptorResource::Image { view, sampler } => Info::Image([vk::DescriptorImageInfo {
                    sampler,
                    image_view: view,
                    image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                }]),
                DescriptorResource::InputAttachment { view } => {
                    Info::Image([vk::DescriptorImageInfo {
                        sampler: vk::Sampler::null(),
                        image_view: view,
                        image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                    }])
                }
            })
            .collect();

        let writes: Vec<vk::WriteDescriptorSet<'_>> = allocated
            .kind
            .bindings()
            .iter()
            .zip(&infos)
            .map(|(spec, info)| {
                let write = vk::WriteDescriptorSet::default()
                    .dst_set(allocated.set)
                    .dst_binding(spec.binding)
                    .dst_array_element(0)
                    .descriptor_type(spec.kind.descriptor_type());
                match info {
                    Info::Buffer(buffer) => write.buffer_info(buffer),
                    Info::Image(image) => write.image_info(image),
                }
            })
            .collect();

        unsafe { self.device.update_descriptor_sets(&writes, &[]) };
        Ok(())
    }

    pub fn allocate_and_write(
        &mut self,
        kind: SetLayoutKind,
        resources: &[DescriptorResource],
    ) -> RenderResult<SetId> {
        check_writes(kind, resources)?;
        let id = self.allocate(kind)?;
        self.write(id, resources)?;
        Ok(id)
    }

    pub fn handle(&self, id: SetId) -> RenderResult<vk::DescriptorSet> {
        self.allocated(id).map(|allocated| allocated.set)
    }

    pub fn set_count(&self) -> usize {
        self.sets.len()
    }

    fn allocated(&self, id: SetId) -> RenderResult<&AllocatedSet> {
        self.sets
            .get(id.0 as usize)
            .ok_or_else(|| RenderError::InvalidParameter(format!("unknown descriptor set {id:?}")))
    }
}

impl Drop for DescriptorBinder {
    fn drop(&mut self) {
        unsafe {
            // Frees every set allocated from it
            if self.pool != vk::DescriptorPool::null() {
                self.device.destroy_descriptor_pool(self.pool, None);
            }
            for (_, layout) in self.layouts.drain() {
                self.device.destroy_descriptor_set_layout(layout, None);
            }
        }
    }
}

fn create_set_layout(
    device: &ash::Device,
    kind: SetLayoutKind,
) -> RenderResult<vk::DescriptorSetLayout> {
    let bindings: Vec<vk::DescriptorSetLayoutBinding<'_>> = kind
        .bindings()
        .iter()
        .map(|spec| {
            vk::DescriptorSetLayoutBinding::default()
                .binding(spec.binding)
                .descriptor_type(spec.kind.descriptor_type())
                .descriptor_count(1)
                .stage_flags(spec.stages)
        })
        .collect();

    let layout_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings);
    unsafe { device.create_descriptor_set_layout(&layout_info, None) }
        .map_err(|e| RenderError::creation("descriptor set layout", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    fn image() -> DescriptorResource {
        DescriptorResource::Image {
            view: vk::ImageView::from_raw(1),
            sampler: vk::Sampler::from_raw(2),
        }
    }

    fn buffer() -> DescriptorResource {
        DescriptorResource::Buffer {
            buffer: vk::Buffer::from_raw(3),
            range: 64,
        }
    }

    #[test]
    fn material_textures_take_three_sampled_images() {
        let bindings = SetLayoutKind::MaterialTextures.bindings();
        assert_eq!(bindings.len(), 3);
        assert!(bindings
            .iter()
            .enumerate()
            .all(|(i, b)| b.binding == i as u32 && b.kind == ResourceKind::SampledImage));
    }

    #[test]
    fn scene_uniform_is_visible_to_both_stages() {
        let stages = SetLayoutKind::Scene.bindings()[0].stages;
        assert!(stages.contains(vk::ShaderStageFlags::VERTEX));
        assert!(stages.contains(vk::ShaderStageFlags::FRAGMENT));
    }

    #[test]
    fn writes_must_match_the_table() {
        assert!(check_writes(SetLayoutKind::Kernel, &[buffer()]).is_ok());
        assert!(check_writes(SetLayoutKind::Kernel, &[image()]).is_err());
        assert!(check_writes(SetLayoutKind::MaterialTextures, &[image(), image()]).is_err());
        assert!(check_writes(SetLayoutKind::MaterialTextures, &[image(), image(), image()]).is_ok());
    }

    #[test]
    fn pool_sizes_cover_every_set() {
        let capacity = PoolCapacity::for_scene(10);
        // 10 material + 10 texture sets, scene, light, 2 kernels, 4 images, 1 input
        assert_eq!(capacity.max_sets(), 29);

        let sizes = capacity.pool_sizes();
        let count = |ty| {
            sizes
                .iter()
                .find(|s| s.ty == ty)
                .map_or(0, |s| s.descriptor_count)
        };
        assert_eq!(count(vk::DescriptorType::UNIFORM_BUFFER), 1 + 1 + 10 + 2);
        assert_eq!(count(vk::DescriptorType::COMBINED_IMAGE_SAMPLER), 30 + 4);
        assert_eq!(count(vk::DescriptorType::INPUT_ATTACHMENT), 1);
    }
}
