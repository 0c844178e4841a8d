//! Per-frame command recording.
//!
//! The command buffer is recorded from scratch each frame: uniform uploads first, then the
//! render passes of the selected path in order.

use ash::vk;

use crate::descriptors::{DescriptorBinder, SetId};
use crate::error::{RenderError, RenderResult};
use crate::mesh::{IndexedMesh, MeshCollection};
use crate::resources::ResourceManager;
use crate::stages::passes::PassKind;
use crate::stages::pipelines::{geometry_sets, LayoutKind, PipelineKind};
use crate::stages::{StageGraph, StageSets};
use crate::uniforms::{record_uniform_upload, FrameUniforms, UniformTarget};

/// Vertices in the full-screen triangle pair.
const FULLSCREEN_VERTICES: u32 = 6;

/// Descriptor sets of one mesh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaterialSets {
    pub uniform: SetId,
    pub textures: SetId,
}

/// Descriptor sets that do not depend on the surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SceneBindings {
    pub scene: SetId,
    pub light: SetId,
    pub vertical_kernel: SetId,
    pub horizontal_kernel: SetId,
    /// Indexed like the mesh collection.
    pub materials: Vec<MaterialSets>,
}

/// Device-only uniform buffers updated inside every frame's command buffer.
#[derive(Debug, Clone, Copy)]
pub struct UniformBuffers {
    pub scene: UniformTarget,
    pub light: UniformTarget,
    pub vertical_kernel: UniformTarget,
    pub horizontal_kernel: UniformTarget,
}

/// Everything needed to record one frame.
pub struct FrameRecording<'a> {
    pub device: &'a ash::Device,
    pub command_buffer: vk::CommandBuffer,
    pub image_index: u32,
    pub stages: &'a StageGraph,
    pub binder: &'a DescriptorBinder,
    pub resources: &'a ResourceManager,
    pub meshes: &'a MeshCollection,
    pub bindings: &'a SceneBindings,
    pub uniform_buffers: &'a UniformBuffers,
    pub uniforms: &'a FrameUniforms,
}

/// Counts of what a recording issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RecordStats {
    pub mesh_draws: usize,
    pub fullscreen_draws: usize,
}

pub fn record_frame(rec: &FrameRecording<'_>) -> RenderResult<RecordStats> {
    let device = rec.device;
    let cmd = rec.command_buffer;

    let begin_info =
        vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
    unsafe { device.begin_command_buffer(cmd, &begin_info) }
        .map_err(|e| RenderError::submission("Failed to begin frame commands", e))?;

    upload_uniforms(rec);

    let mut stats = RecordStats::default();
    match rec.stages.sets() {
        StageSets::Bloom {
            bright,
            vertical,
            horizontal,
            pbr,
        } => {
            record_filter_pass(rec, [bright, vertical], &mut stats)?;
            record_composite_pass(rec, [horizontal, pbr], &mut stats)?;
        }
        StageSets::Direct { scene_color } => {
            record_main_pass(rec, scene_color, &mut stats)?;
        }
    }

    unsafe { device.end_command_buffer(cmd) }
        .map_err(|e| RenderError::submission("Failed to end frame commands", e))?;

    log::trace!(
        "Recorded frame {}: {} mesh draws, {} full-screen draws",
        rec.image_index,
        stats.mesh_draws,
        stats.fullscreen_draws
    );
    Ok(stats)
}

fn upload_uniforms(rec: &FrameRecording<'_>) {
    let buffers = rec.uniform_buffers;
    let uniforms = rec.uniforms;
    let uploads: [(UniformTarget, &[u8]); 4] = [
        (buffers.scene, bytemuck::bytes_of(&uniforms.scene)),
        (buffers.light, bytemuck::bytes_of(&uniforms.light)),
        (buffers.vertical_kernel, bytemuck::bytes_of(&uniforms.vertical_kernel)),
        (buffers.horizontal_kernel, bytemuck::bytes_of(&uniforms.horizontal_kernel)),
    ];
    for (target, data) in uploads {
        record_uniform_upload(rec.device, rec.command_buffer, target, data);
    }
}

fn begin_pass(
    rec: &FrameRecording<'_>,
    pass: PassKind,
    framebuffer: vk::Framebuffer,
) -> RenderResult<()> {
    let clear_values = pass.clear_values();
    let begin_info = vk::RenderPassBeginInfo::default()
        .render_pass(rec.stages.render_pass(pass)?)
        .framebuffer(framebuffer)
        .render_area(vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: rec.stages.extent(),
        })
        .clear_values(&clear_values);

    unsafe {
        rec.device
            .cmd_begin_render_pass(rec.command_buffer, &begin_info, vk::SubpassContents::INLINE)
    };
    Ok(())
}

fn bind_sets(rec: &FrameRecording<'_>, layout: LayoutKind, first_set: u32, sets: &[SetId]) -> RenderResult<()> {
    let handles = sets
        .iter()
        .map(|&set| rec.binder.handle(set))
        .collect::<RenderResult<Vec<_>>>()?;
    let layout = rec.stages.pipelines()?.layout(layout)?;
    unsafe {
        rec.device.cmd_bind_descriptor_sets(
            rec.command_buffer,
            vk::PipelineBindPoint::GRAPHICS,
            layout,
            first_set,
            &handles,
            &[],
        )
    };
    Ok(())
}

fn bind_pipeline(rec: &FrameRecording<'_>, kind: PipelineKind) -> RenderResult<()> {
    let pipeline = rec.stages.pipelines()?.pipeline(kind)?;
    unsafe {
        rec.device
            .cmd_bind_pipeline(rec.command_buffer, vk::PipelineBindPoint::GRAPHICS, pipeline)
    };
    Ok(())
}

/// A full-screen pass reading `sets` through `pipeline`.
fn draw_fullscreen(
    rec: &FrameRecording<'_>,
    pipeline: PipelineKind,
    sets: &[SetId],
    stats: &mut RecordStats,
) -> RenderResult<()> {
    bind_pipeline(rec, pipeline)?;
    bind_sets(rec, pipeline.spec().layout, 0, sets)?;
    unsafe { rec.device.cmd_draw(rec.command_buffer, FULLSCREEN_VERTICES, 1, 0, 0) };
    stats.fullscreen_draws += 1;
    Ok(())
}

/// Draw every mesh in collection order, choosing the pipeline per mesh.
fn draw_meshes(
    rec: &FrameRecording<'_>,
    choose: impl Fn(&IndexedMesh) -> PipelineKind,
    stats: &mut RecordStats,
) -> RenderResult<()> {
    let device = rec.device;
    let cmd = rec.command_buffer;
    let pipelines = rec.stages.pipelines()?;
    let layout = pipelines.layout(LayoutKind::Geometry)?;

    let mut bound: Option<PipelineKind> = None;
    for (index, mesh) in rec.meshes.iter().enumerate() {
        let kind = choose(mesh);
        if bound != Some(kind) {
            bind_pipeline(rec, kind)?;
            if bound.is_none() {
                bind_sets(rec, LayoutKind::Geometry, geometry_sets::SCENE, &[rec.bindings.scene])?;
                bind_sets(rec, LayoutKind::Geometry, geometry_sets::LIGHT, &[rec.bindings.light])?;
            }
            bound = Some(kind);
        }

        let material = rec.bindings.materials.get(index).ok_or_else(|| {
            RenderError::InvalidParameter(format!("no descriptor sets for mesh {index}"))
        })?;
        bind_sets(
            rec,
            LayoutKind::Geometry,
            geometry_sets::MATERIAL,
            &[material.uniform, material.textures],
        )?;

        let vertex_buffers = mesh
            .vertex_buffers()
            .iter()
            .map(|&id| rec.resources.buffer(id).map(|b| b.raw()))
            .collect::<RenderResult<Vec<_>>>()?;
        let index_buffer = rec.resources.buffer(mesh.indices)?.raw();
        let push = mesh.flags.push_constants();

        unsafe {
            device.cmd_bind_vertex_buffers(cmd, 0, &vertex_buffers, &[0, 0, 0]);
            device.cmd_bind_index_buffer(cmd, index_buffer, 0, vk::IndexType::UINT32);
            device.cmd_push_constants(
                cmd,
                layout,
                vk::ShaderStageFlags::FRAGMENT,
                0,
                bytemuck::bytes_of(&push),
            );
            device.cmd_draw_indexed(cmd, mesh.index_count, 1, 0, 0, 0);
        }
        stats.mesh_draws += 1;
    }
    Ok(())
}

/// Geometry into bright and PBR, then vertical and horizontal blur.
fn record_filter_pass(
    rec: &FrameRecording<'_>,
    [bright, vertical]: [SetId; 2],
    stats: &mut RecordStats,
) -> RenderResult<()> {
    let framebuffer = rec.stages.framebuffers()?.filter()?;
    begin_pass(rec, PassKind::Filter, framebuffer)?;

    draw_meshes(rec, |_| PipelineKind::BrightScene, stats)?;

    unsafe { rec.device.cmd_next_subpass(rec.command_buffer, vk::SubpassContents::INLINE) };
    draw_fullscreen(
        rec,
        PipelineKind::VerticalBlur,
        &[bright, rec.bindings.vertical_kernel],
        stats,
    )?;

    unsafe { rec.device.cmd_next_subpass(rec.command_buffer, vk::SubpassContents::INLINE) };
    draw_fullscreen(
        rec,
        PipelineKind::HorizontalBlur,
        &[vertical, rec.bindings.horizontal_kernel],
        stats,
    )?;

    unsafe { rec.device.cmd_end_render_pass(rec.command_buffer) };
    Ok(())
}

fn record_composite_pass(
    rec: &FrameRecording<'_>,
    inputs: [SetId; 2],
    stats: &mut RecordStats,
) -> RenderResult<()> {
    let framebuffer = rec.stages.framebuffers()?.for_image(rec.image_index)?;
    begin_pass(rec, PassKind::Composite, framebuffer)?;
    draw_fullscreen(rec, PipelineKind::Composite, &inputs, stats)?;
    unsafe { rec.device.cmd_end_render_pass(rec.command_buffer) };
    Ok(())
}

fn record_main_pass(
    rec: &FrameRecording<'_>,
    scene_color: SetId,
    stats: &mut RecordStats,
) -> RenderResult<()> {
    let framebuffer = rec.stages.framebuffers()?.for_image(rec.image_index)?;
    begin_pass(rec, PassKind::Main, framebuffer)?;

    draw_meshes(
        rec,
        |mesh| {
            if mesh.flags.is_alpha_mask {
                PipelineKind::MainAlpha
            } else {
                PipelineKind::MainOpaque
            }
        },
        stats,
    )?;

    unsafe { rec.device.cmd_next_subpass(rec.command_buffer, vk::SubpassContents::INLINE) };
    draw_fullscreen(rec, PipelineKind::MainComposite, &[scene_color], stats)?;

    unsafe { rec.device.cmd_end_render_pass(rec.command_buffer) };
    Ok(())
}
