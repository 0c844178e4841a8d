//! Graphics pipelines, described by a table and built by one routine.

use std::collections::HashMap;
use std::io::Cursor;
use std::path::Path;

use ash::vk;
use glam::{Vec2, Vec3};

use super::passes::PassKind;
use crate::config::{shader_path, RenderPath};
use crate::descriptors::{DescriptorBinder, SetLayoutKind};
use crate::error::{RenderError, RenderResult};
use crate::uniforms::DrawPushConstants;

/// Descriptor set and push constant layout shared by a group of pipelines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LayoutKind {
    /// Mesh drawing: scene, material, material textures, light.
    Geometry,
    /// One sampled target and one kernel.
    Blur,
    /// Blurred bloom and full-scene color.
    Composite,
    /// Scene color as an input attachment.
    MainComposite,
}

impl LayoutKind {
    pub fn set_layouts(self) -> &'static [SetLayoutKind] {
        match self {
            Self::Geometry => &[
                SetLayoutKind::Scene,
                SetLayoutKind::Material,
                SetLayoutKind::MaterialTextures,
                SetLayoutKind::Light,
            ],
            Self::Blur => &[SetLayoutKind::SampledImage, SetLayoutKind::Kernel],
            Self::Composite => &[SetLayoutKind::SampledImage, SetLayoutKind::SampledImage],
            Self::MainComposite => &[SetLayoutKind::SubpassInput],
        }
    }

    pub fn push_constant_range(self) -> Option<vk::PushConstantRange> {
        match self {
            Self::Geometry => Some(vk::PushConstantRange {
                stage_flags: vk::ShaderStageFlags::FRAGMENT,
                offset: 0,
                size: std::mem::size_of::<DrawPushConstants>() as u32,
            }),
            _ => None,
        }
    }
}

/// Set indices of [`LayoutKind::Geometry`].
pub mod geometry_sets {
    pub const SCENE: u32 = 0;
    pub const MATERIAL: u32 = 1;
    pub const MATERIAL_TEXTURES: u32 = 2;
    pub const LIGHT: u32 = 3;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VertexInput {
    /// Separate position, texcoord and normal streams.
    Mesh,
    /// Full-screen quad generated from the vertex index.
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepthMode {
    Disabled,
    TestAndWrite,
    TestOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Blending {
    Opaque,
    Alpha,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineKind {
    MainOpaque,
    MainAlpha,
    MainComposite,
    BrightScene,
    VerticalBlur,
    HorizontalBlur,
    Composite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineSpec {
    pub layout: LayoutKind,
    pub pass: PassKind,
    pub subpass: u32,
    pub vertex_shader: &'static str,
    pub fragment_shader: &'static str,
    pub vertex_input: VertexInput,
    pub depth: DepthMode,
    pub blending: Blending,
    pub color_outputs: u32,
}

impl PipelineKind {
    pub const BLOOM: [Self; 4] = [
        Self::BrightScene,
        Self::VerticalBlur,
        Self::HorizontalBlur,
        Self::Composite,
    ];
    pub const DIRECT: [Self; 3] = [Self::MainOpaque, Self::MainAlpha, Self::MainComposite];

    pub fn for_path(path: RenderPath) -> &'static [Self] {
        match path {
            RenderPath::Bloom => &Self::BLOOM,
            RenderPath::Direct => &Self::DIRECT,
        }
    }

    pub fn spec(self) -> PipelineSpec {
        let mesh = PipelineSpec {
            layout: LayoutKind::Geometry,
            pass: PassKind::Main,
            subpass: 0,
            vertex_shader: "mesh.vert",
            fragment_shader: "direct.frag",
            vertex_input: VertexInput::Mesh,
            depth: DepthMode::TestAndWrite,
            blending: Blending::Opaque,
            color_outputs: 1,
        };
        let fullscreen = PipelineSpec {
            layout: LayoutKind::Blur,
            pass: PassKind::Filter,
            subpass: 1,
            vertex_shader: "fullscreen.vert",
            fragment_shader: "vertical.frag",
            vertex_input: VertexInput::None,
            depth: DepthMode::Disabled,
            blending: Blending::Opaque,
            color_outputs: 1,
        };

        match self {
            Self::MainOpaque => mesh,
            Self::MainAlpha => PipelineSpec {
                depth: DepthMode::TestOnly,
                blending: Blending::Alpha,
                ..mesh
            },
            Self::MainComposite => PipelineSpec {
                layout: LayoutKind::MainComposite,
                pass: PassKind::Main,
                subpass: 1,
                fragment_shader: "main_composite.frag",
                ..fullscreen
            },
            Self::BrightScene => PipelineSpec {
                pass: PassKind::Filter,
                fragment_shader: "bright.frag",
                color_outputs: 2,
                ..mesh
            },
            Self::VerticalBlur => fullscreen,
            Self::HorizontalBlur => PipelineSpec {
                subpass: 2,
                fragment_shader: "horizontal.frag",
                ..fullscreen
            },
            Self::Composite => PipelineSpec {
                layout: LayoutKind::Composite,
                pass: PassKind::Composite,
                subpass: 0,
                fragment_shader: "composite.frag",
                ..fullscreen
            },
        }
    }
}

/// Vertex streams of an indexed mesh: positions, texcoords, normals.
pub fn mesh_vertex_bindings() -> [vk::VertexInputBindingDescription; 3] {
    let stride = |size: usize| vk::VertexInputBindingDescription {
        binding: 0,
        stride: size as u32,
        input_rate: vk::VertexInputRate::VERTEX,
    };
    let mut bindings = [
        stride(std::mem::size_of::<Vec3>()),
        stride(std::mem::size_of::<Vec2>()),
        stride(std::mem::size_of::<Vec3>()),
    ];
    for (i, binding) in bindings.iter_mut().enumerate() {
        binding.binding = i as u32;
    }
    bindings
}

pub fn mesh_vertex_attributes() -> [vk::VertexInputAttributeDescription; 3] {
    let formats = [
        vk::Format::R32G32B32_SFLOAT,
        vk::Format::R32G32_SFLOAT,
        vk::Format::R32G32B32_SFLOAT,
    ];
    let mut attributes = [vk::VertexInputAttributeDescription::default(); 3];
    for (i, (attribute, format)) in attributes.iter_mut().zip(formats).enumerate() {
        *attribute = vk::VertexInputAttributeDescription {
            location: i as u32,
            binding: i as u32,
            format,
            offset: 0,
        };
    }
    attributes
}

/// Read a SPIR-V file and create a shader module from it.
pub fn load_shader(device: &ash::Device, path: &Path) -> RenderResult<vk::ShaderModule> {
    let bytes = std::fs::read(path).map_err(|e| {
        RenderError::AssetLoadFailed(format!("Failed to read shader {}: {e}", path.display()))
    })?;
    let code = ash::util::read_spv(&mut Cursor::new(&bytes)).map_err(|e| {
        RenderError::AssetLoadFailed(format!("Invalid SPIR-V in {}: {e}", path.display()))
    })?;

    let create_info = vk::ShaderModuleCreateInfo::default().code(&code);
    unsafe { device.create_shader_module(&create_info, None) }
        .map_err(|e| RenderError::creation("shader module", e))
}

/// Every pipeline of one render path, with its layouts.
///
/// Viewport and scissor are baked in, so the set is rebuilt whenever the surface size changes.
pub struct PipelineSet {
    device: ash::Device,
    layouts: HashMap<LayoutKind, vk::PipelineLayout>,
    pipelines: HashMap<PipelineKind, vk::Pipeline>,
}

impl PipelineSet {
    pub fn new(
        device: &ash::Device,
        binder: &DescriptorBinder,
        render_passes: &HashMap<PassKind, vk::RenderPass>,
        shader_dir: &Path,
        path: RenderPath,
        extent: vk::Extent2D,
    ) -> RenderResult<Self> {
        let mut set = Self {
            device: device.clone(),
            layouts: HashMap::new(),
            pipelines: HashMap::new(),
        };

        let mut shaders: HashMap<&'static str, vk::ShaderModule> = HashMap::new();
        let result = set.build_all(binder, render_passes, shader_dir, path, extent, &mut shaders);
        for (_, module) in shaders {
            unsafe { device.destroy_shader_module(module, None) };
        }
        result?;

        log::debug!("Built {} pipelines for {:?}", set.pipelines.len(), path);
        Ok(set)
    }

    fn build_all(
        &mut self,
        binder: &DescriptorBinder,
        render_passes: &HashMap<PassKind, vk::RenderPass>,
        shader_dir: &Path,
        path: RenderPath,
        extent: vk::Extent2D,
        shaders: &mut HashMap<&'static str, vk::ShaderModule>,
    ) -> RenderResult<()> {
        for &kind in PipelineKind::for_path(path) {
            let spec = kind.spec();
            let layout = self.layout_for(binder, spec.layout)?;
            let render_pass = render_passes.get(&spec.pass).copied().ok_or_else(|| {
                RenderError::InvalidParameter(format!("{:?} render pass not built", spec.pass))
            })?;

            for name in [spec.vertex_shader, spec.fragment_shader] {
                if !shaders.contains_key(name) {
                    let module = load_shader(&self.device, &shader_path(shader_dir, name))?;
                    shaders.insert(name, module);
                }
            }

            let pipeline = create_pipeline(
                &self.device,
                &spec,
                [shaders[spec.vertex_shader], shaders[spec.fragment_shader]],
                layout,
                render_pass,
                extent,
            )
            .map_err(|e| match e {
                RenderError::ResourceCreationFailed(msg) => {
                    RenderError::ResourceCreationFailed(format!("{kind:?}: {msg}"))
                }
                other => other,
            })?;
            self.pipelines.insert(kind, pipeline);
        }
        Ok(())
    }

    fn layout_for(
        &mut self,
        binder: &DescriptorBinder,
        kind: LayoutKind,
    ) -> RenderResult<vk::PipelineLayout> {
        if let Some(&layout) = self.layouts.get(&kind) {
            return Ok(layout);
        }

        let set_layouts = kind
            .set_layouts()
            .iter()
            .map(|&set| binder.layout(set))
            .collect::<RenderResult<Vec<_>>>()?;
        let push_constants: Vec<vk::PushConstantRange> = kind.push_constant_range().into_iter().collect();

        let layout_info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(&set_layouts)
            .push_constant_ranges(&push_constants);
        let layout = unsafe { self.device.create_pipeline_layout(&layout_info, None) }
            .map_err(|e| RenderError::creation("pipeline layout", e))?;

        self.layouts.insert(kind, layout);
        Ok(layout)
    }

    pub fn pipeline(&self, kind: PipelineKind) -> RenderResult<vk::Pipeline> {
        self.pipelines
            .get(&kind)
            .copied()
            .ok_or_else(|| RenderError::InvalidParameter(format!("pipeline {kind:?} not built")))
    }

    pub fn layout(&self, kind: LayoutKind) -> RenderResult<vk::PipelineLayout> {
        self.layouts
            .get(&kind)
            .copied()
            .ok_or_else(|| RenderError::InvalidParameter(format!("pipeline layout {kind:?} not built")))
    }
}

impl Drop for PipelineSet {
    fn drop(&mut self) {
        unsafe {
            for (_, pipeline) in self.pipelines.drain() {
                self.device.destroy_pipeline(pipeline, None);
            }
            for (_, layout) in self.layouts.drain() {
                self.device.destroy_pipeline_layout(layout, None);
            }
        }
    }
}

fn create_pipeline(
    device: &ash::Device,
    spec: &PipelineSpec,
    modules: [vk::ShaderModule; 2],
    layout: vk::PipelineLayout,
    render_pass: vk::RenderPass,
    extent: vk::Extent2D,
) -> RenderResult<vk::Pipeline> {
    let entry_point = c"main";
    let stages = [
        vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::VERTEX)
            .module(modules[0])
            .name(entry_point),
        vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::FRAGMENT)
            .module(modules[1])
            .name(entry_point),
    ];

    let bindings = mesh_vertex_bindings();
    let attributes = mesh_vertex_attributes();
    let vertex_input = match spec.vertex_input {
        VertexInput::Mesh => vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&bindings)
            .vertex_attribute_descriptions(&attributes),
        VertexInput::None => vk::PipelineVertexInputStateCreateInfo::default(),
    };

    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
        .topology(vk::PrimitiveTopology::TRIANGLE_LIST);

    let viewport = vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: extent.width as f32,
        height: extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    };
    let scissor = vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent,
    };
    let viewport_state = vk::PipelineViewportStateCreateInfo::default()
        .viewports(std::slice::from_ref(&viewport))
        .scissors(std::slice::from_ref(&scissor));

    let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
        .polygon_mode(vk::PolygonMode::FILL)
        .cull_mode(vk::CullModeFlags::NONE)
        .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
        .line_width(1.0);

    let multisample = vk::PipelineMultisampleStateCreateInfo::default()
        .rasterization_samples(vk::SampleCountFlags::TYPE_1);

    let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::default()
        .depth_test_enable(spec.depth != DepthMode::Disabled)
        .depth_write_enable(spec.depth == DepthMode::TestAndWrite)
        .depth_compare_op(vk::CompareOp::LESS_OR_EQUAL)
        .min_depth_bounds(0.0)
        .max_depth_bounds(1.0);

    let blend_attachment = match spec.blending {
        Blending::Opaque => vk::PipelineColorBlendAttachmentState::default()
            .color_write_mask(vk::ColorComponentFlags::RGBA)
            .blend_enable(false),
        Blending::Alpha => vk::PipelineColorBlendAttachmentState::default()
            .color_write_mask(vk::ColorComponentFlags::RGBA)
            .blend_enable(true)
            .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
            .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
            .color_blend_op(vk::BlendOp::ADD)
            .src_alpha_blend_factor(vk::BlendFactor::ONE)
            .dst_alpha_blend_factor(vk::BlendFactor::ZERO)
            .alpha_blend_op(vk::BlendOp::ADD),
    };
    let blend_attachments = vec![blend_attachment; spec.color_outputs as usize];
    let color_blend = vk::PipelineColorBlendStateCreateInfo::default().attachments(&blend_attachments);

    let mut pipeline_info = vk::GraphicsPipelineCreateInfo::default()
        .stages(&stages)
        .vertex_input_state(&vertex_input)
        .input_assembly_state(&input_assembly)
        .viewport_state(&viewport_state)
        .rasterization_state(&rasterization)
        .multisample_state(&multisample)
        .color_blend_state(&color_blend)
        .layout(layout)
        .render_pass(render_pass)
        .subpass(spec.subpass);
    if spec.depth != DepthMode::Disabled {
        pipeline_info = pipeline_info.depth_stencil_state(&depth_stencil);
    }

    let pipelines = unsafe {
        device.create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
    }
    .map_err(|(partial, e)| {
        for pipeline in partial {
            if pipeline != vk::Pipeline::null() {
                unsafe { device.destroy_pipeline(pipeline, None) };
            }
        }
        RenderError::creation("graphics pipeline", e)
    })?;

    pipelines
        .into_iter()
        .next()
        .ok_or_else(|| RenderError::ResourceCreationFailed("no pipeline returned".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::passes::PassKind;

    #[test]
    fn mesh_streams_match_attribute_sizes() {
        let bindings = mesh_vertex_bindings();
        let strides: Vec<u32> = bindings.iter().map(|b| b.stride).collect();
        assert_eq!(strides, vec![12, 8, 12]);

        for (i, attribute) in mesh_vertex_attributes().iter().enumerate() {
            assert_eq!(attribute.location, i as u32);
            assert_eq!(attribute.binding, bindings[i].binding);
        }
    }

    #[test]
    fn geometry_layout_pushes_two_flags() {
        let range = LayoutKind::Geometry.push_constant_range().unwrap();
        assert_eq!(range.size, 8);
        assert_eq!(range.stage_flags, vk::ShaderStageFlags::FRAGMENT);
        assert_eq!(
            LayoutKind::Geometry.set_layouts()[geometry_sets::LIGHT as usize],
            SetLayoutKind::Light
        );
        assert!(LayoutKind::Blur.push_constant_range().is_none());
    }

    #[test]
    fn pipelines_fit_their_subpass() {
        for kind in PipelineKind::BLOOM.into_iter().chain(PipelineKind::DIRECT) {
            let spec = kind.spec();
            let subpasses = spec.pass.subpasses();
            let subpass = &subpasses[spec.subpass as usize];
            assert_eq!(subpass.colors.len() as u32, spec.color_outputs, "{kind:?}");
            assert_eq!(
                subpass.depth.is_some(),
                spec.depth != DepthMode::Disabled,
                "{kind:?}"
            );
        }
    }

    #[test]
    fn alpha_variant_tests_depth_without_writing() {
        let opaque = PipelineKind::MainOpaque.spec();
        let alpha = PipelineKind::MainAlpha.spec();
        assert_eq!(opaque.depth, DepthMode::TestAndWrite);
        assert_eq!(alpha.depth, DepthMode::TestOnly);
        assert_eq!(alpha.blending, Blending::Alpha);
        assert_eq!(alpha.fragment_shader, opaque.fragment_shader);
    }

    #[test]
    fn bloom_path_never_touches_the_main_pass() {
        assert!(PipelineKind::for_path(RenderPath::Bloom)
            .iter()
            .all(|kind| kind.spec().pass != PassKind::Main));
        assert!(PipelineKind::for_path(RenderPath::Direct)
            .iter()
            .all(|kind| kind.spec().pass == PassKind::Main));
    }
}
