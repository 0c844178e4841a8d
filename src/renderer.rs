//! The renderer: owns every GPU object and implements the frame steps on top of them.

use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

use crate::backend::vulkan::swapchain::{AcquiredImage, PresentOutcome, Swapchain};
use crate::backend::vulkan::VulkanContext;
use crate::camera::{FrameSnapshot, UserState};
use crate::config::RendererConfig;
use crate::descriptors::{DescriptorBinder, DescriptorResource, PoolCapacity, SetLayoutKind};
use crate::error::{RenderError, RenderResult};
use crate::frame::record::{record_frame, FrameRecording, MaterialSets, SceneBindings, UniformBuffers};
use crate::frame::slots::FrameSync;
use crate::frame::{FrameBackend, FrameLoop, FrameOutcome, Recreation};
use crate::mesh::MeshCollection;
use crate::resources::texture::{TexelEncoding, TextureCache};
use crate::resources::{BufferDesc, BufferUsage, Residency, ResourceManager};
use crate::scene::loader::load_gltf;
use crate::scene::BakedModel;
use crate::stages::{StageGraph, SurfaceInfo};
use crate::uniforms::{
    FrameUniforms, GaussianUniform, LightUniform, MaterialUniform, SceneUniform, UniformTarget,
};

pub struct Renderer {
    config: RendererConfig,
    window_extent: vk::Extent2D,
    frame_loop: FrameLoop,
    uniforms: FrameUniforms,
    bindings: SceneBindings,
    uniform_buffers: UniformBuffers,
    meshes: MeshCollection,
    // Drop order matters: everything created from the device goes before the context,
    // and descriptor sets and framebuffers go before the images they reference.
    frame_sync: FrameSync,
    stages: StageGraph,
    binder: DescriptorBinder,
    resources: ResourceManager,
    swapchain: Swapchain,
    context: VulkanContext,
}

impl Renderer {
    /// Load the configured model and build every stage for `window`.
    pub fn new<W>(window: &W, window_extent: vk::Extent2D, config: RendererConfig) -> RenderResult<Self>
    where
        W: HasDisplayHandle + HasWindowHandle,
    {
        let context = VulkanContext::new(window, config.validation)?;
        let swapchain = Swapchain::new(&context, window_extent, config.vsync)?;
        let model = load_gltf(&config.model_path)?;

        let mut resources = ResourceManager::new(&context);
        let meshes = MeshCollection::upload(&context, &mut resources, &model)?;
        let mut binder = DescriptorBinder::new(
            context.device(),
            &PoolCapacity::for_scene(meshes.len() as u32),
        )?;

        let sampler_id = resources.create_sampler()?;
        let sampler = resources.sampler(sampler_id)?;

        let materials = bind_materials(&context, &mut resources, &mut binder, &model, sampler)?;
        let (uniform_buffers, bindings) = bind_frame_uniforms(&mut resources, &mut binder, materials)?;

        let snapshot = UserState::new(&config.camera).snapshot();
        let uniforms = FrameUniforms::new(&snapshot, swapchain.extent(), &config.camera);

        let stages = StageGraph::new(
            context.device(),
            &mut resources,
            &mut binder,
            config.render_path,
            config.shader_dir.clone(),
            sampler,
            &SurfaceInfo {
                format: swapchain.format(),
                extent: swapchain.extent(),
                image_views: swapchain.image_views(),
            },
        )?;
        let frame_sync = FrameSync::new(
            context.device(),
            context.graphics_queue_family(),
            swapchain.image_count(),
        )?;

        log::info!(
            "Renderer ready: {} meshes, {:?} path, {} live GPU resources",
            meshes.len(),
            config.render_path,
            resources.live_count()
        );

        Ok(Self {
            config,
            window_extent,
            frame_loop: FrameLoop::new(),
            uniforms,
            bindings,
            uniform_buffers,
            meshes,
            frame_sync,
            stages,
            binder,
            resources,
            swapchain,
            context,
        })
    }

    /// Run one iteration of the frame loop with this frame's camera and light.
    pub fn render_frame(&mut self, snapshot: &FrameSnapshot) -> RenderResult<FrameOutcome> {
        let mut frame_loop = self.frame_loop;
        let outcome = frame_loop.run_iteration(self, snapshot);
        self.frame_loop = frame_loop;
        outcome
    }

    /// The window changed size; rebuild before the next frame.
    pub fn resize(&mut self, window_extent: vk::Extent2D) {
        self.window_extent = window_extent;
        self.frame_loop.request_recreate();
    }

    pub fn mesh_count(&self) -> usize {
        self.meshes.len()
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }
}

impl FrameBackend for Renderer {
    fn acquire(&mut self) -> RenderResult<AcquiredImage> {
        self.swapchain.acquire(self.frame_sync.image_available())
    }

    fn wait_for_slot(&mut self, image_index: u32) -> RenderResult<()> {
        self.frame_sync
            .slots_mut()
            .begin(image_index, self.context.device())
            .map(|_| ())
    }

    fn record(&mut self, image_index: u32, snapshot: &FrameSnapshot) -> RenderResult<()> {
        self.uniforms
            .update(snapshot, self.stages.extent(), &self.config.camera);
        let slot = self.frame_sync.slots().get(image_index)?;

        record_frame(&FrameRecording {
            device: self.context.device(),
            command_buffer: slot.command_buffer,
            image_index,
            stages: &self.stages,
            binder: &self.binder,
            resources: &self.resources,
            meshes: &self.meshes,
            bindings: &self.bindings,
            uniform_buffers: &self.uniform_buffers,
            uniforms: &self.uniforms,
        })?;
        Ok(())
    }

    fn submit(&mut self, image_index: u32) -> RenderResult<()> {
        let slot = *self.frame_sync.slots().get(image_index)?;
        let wait_semaphores = [self.frame_sync.image_available()];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = [slot.command_buffer];
        let signal_semaphores = [slot.render_finished];
        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            self.context
                .device()
                .queue_submit(self.context.graphics_queue(), &[submit_info], slot.fence)
        }
        .map_err(|e| RenderError::submission("Failed to submit frame", e))?;

        self.frame_sync.slots_mut().mark_submitted(image_index)
    }

    fn present(&mut self, image_index: u32) -> RenderResult<PresentOutcome> {
        let render_finished = self.frame_sync.slots().get(image_index)?.render_finished;
        self.swapchain
            .present(self.context.graphics_queue(), render_finished, image_index)
    }

    fn recreate(&mut self) -> RenderResult<Recreation> {
        if self.window_extent.width == 0 || self.window_extent.height == 0 {
            log::trace!("Surface has zero size, deferring swapchain recreation");
            return Ok(Recreation::Deferred);
        }

        self.context.wait_idle()?;
        self.frame_sync.slots_mut().wait_all(self.context.device())?;
        self.frame_sync.reset_image_available()?;

        let changes = self.swapchain.recreate(&self.context, self.window_extent)?;
        self.frame_sync.resize(self.swapchain.image_count())?;

        let rebuilt = self.stages.recreate(
            self.context.device(),
            &mut self.resources,
            &self.binder,
            changes,
            &SurfaceInfo {
                format: self.swapchain.format(),
                extent: self.swapchain.extent(),
                image_views: self.swapchain.image_views(),
            },
        )?;
        if changes.size_changed {
            self.uniforms.rebuild_kernels();
        }

        log::info!("Recreated stages: {rebuilt:?}");
        Ok(Recreation::Done)
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        if let Err(e) = self.context.wait_idle() {
            log::error!("Failed to idle device before teardown: {e}");
        }
    }
}

/// Upload every mesh's material uniform and textures, and write its descriptor sets.
fn bind_materials(
    context: &VulkanContext,
    resources: &mut ResourceManager,
    binder: &mut DescriptorBinder,
    model: &BakedModel,
    sampler: vk::Sampler,
) -> RenderResult<Vec<MaterialSets>> {
    let mut textures = TextureCache::new();
    let mut sets = Vec::with_capacity(model.meshes.len());

    for mesh in &model.meshes {
        let material = model.material_of(mesh)?;

        let uniform = MaterialUniform::from_material(material);
        let buffer_id = resources.create_buffer(&BufferDesc::new(
            "material",
            std::mem::size_of::<MaterialUniform>() as u64,
            BufferUsage::Uniform,
            Residency::HostVisible,
        ))?;
        resources.write_buffer(buffer_id, 0, bytemuck::bytes_of(&uniform))?;
        let buffer = resources.buffer(buffer_id)?;
        let uniform_set = binder.allocate_and_write(
            SetLayoutKind::Material,
            &[DescriptorResource::Buffer {
                buffer: buffer.raw(),
                range: buffer.size(),
            }],
        )?;

        let slots = [
            (material.base_color_texture_id, TexelEncoding::Srgb),
            (material.roughness_texture_id, TexelEncoding::Linear),
            (material.metalness_texture_id, TexelEncoding::Linear),
        ];
        let mut images = Vec::with_capacity(slots.len());
        for (texture_id, encoding) in slots {
            let image = textures.resolve(context, resources, model, texture_id, encoding)?;
            images.push(DescriptorResource::Image {
                view: resources.image(image)?.view(),
                sampler,
            });
        }
        let texture_set = binder.allocate_and_write(SetLayoutKind::MaterialTextures, &images)?;

        sets.push(MaterialSets {
            uniform: uniform_set,
            textures: texture_set,
        });
    }

    log::info!("Loaded {} textures", textures.len());
    Ok(sets)
}

/// Create the device-only uniforms updated every frame and their descriptor sets.
fn bind_frame_uniforms(
    resources: &mut ResourceManager,
    binder: &mut DescriptorBinder,
    materials: Vec<MaterialSets>,
) -> RenderResult<(UniformBuffers, SceneBindings)> {
    let mut uniform = |name: &str, size: usize, kind: SetLayoutKind| -> RenderResult<_> {
        let id = resources.create_buffer(&BufferDesc::new(
            name,
            size as u64,
            BufferUsage::Uniform,
            Residency::DeviceOnly,
        ))?;
        let buffer = resources.buffer(id)?.raw();
        let set = binder.allocate_and_write(
            kind,
            &[DescriptorResource::Buffer {
                buffer,
                range: size as u64,
            }],
        )?;
        let stages = kind
            .bindings()
            .first()
            .map_or(vk::ShaderStageFlags::FRAGMENT, |binding| binding.stages);
        Ok((UniformTarget { buffer, stages }, set))
    };

    let (scene, scene_set) = uniform("scene", std::mem::size_of::<SceneUniform>(), SetLayoutKind::Scene)?;
    let (light, light_set) = uniform("light", std::mem::size_of::<LightUniform>(), SetLayoutKind::Light)?;
    let kernel_size = std::mem::size_of::<GaussianUniform>();
    let (vertical_kernel, vertical_set) = uniform("vertical kernel", kernel_size, SetLayoutKind::Kernel)?;
    let (horizontal_kernel, horizontal_set) =
        uniform("horizontal kernel", kernel_size, SetLayoutKind::Kernel)?;

    Ok((
        UniformBuffers {
            scene,
            light,
            vertical_kernel,
            horizontal_kernel,
        },
        SceneBindings {
            scene: scene_set,
            light: light_set,
            vertical_kernel: vertical_set,
            horizontal_kernel: horizontal_set,
            materials,
        },
    ))
}
