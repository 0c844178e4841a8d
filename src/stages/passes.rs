//! Render pass topology: attachments, subpasses and the dependencies between them.

use ash::vk;

use crate::backend::vulkan::layout::TextureLayout;
use crate::config::{COMPOSITE_CLEAR_COLOR, DEPTH_CLEAR, DEPTH_FORMAT, FILTER_CLEAR_COLOR, OFFSCREEN_FORMAT};
use crate::error::{RenderError, RenderResult};

/// Attachment indices of the filter pass framebuffer.
pub mod filter {
    pub const BRIGHT: u32 = 0;
    pub const VERTICAL: u32 = 1;
    pub const HORIZONTAL: u32 = 2;
    pub const PBR: u32 = 3;
    pub const DEPTH: u32 = 4;
}

/// Attachment indices of the two-subpass main pass framebuffer.
pub mod direct {
    pub const SCENE_COLOR: u32 = 0;
    pub const DEPTH: u32 = 1;
    pub const BACKBUFFER: u32 = 2;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassKind {
    /// Geometry into scene color and depth, then a composite onto the backbuffer.
    Main,
    /// Dual-output geometry, vertical blur, horizontal blur.
    Filter,
    /// Blurred bloom plus scene color onto the backbuffer.
    Composite,
}

/// Where an attachment's format comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentRole {
    Offscreen,
    Depth,
    /// The acquired swapchain image.
    Backbuffer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttachmentSpec {
    pub role: AttachmentRole,
    /// Whether the contents survive the pass.
    pub store: bool,
    pub final_layout: TextureLayout,
}

impl AttachmentSpec {
    const fn new(role: AttachmentRole, store: bool, final_layout: TextureLayout) -> Self {
        Self {
            role,
            store,
            final_layout,
        }
    }

    pub fn format(&self, surface_format: vk::Format) -> vk::Format {
        match self.role {
            AttachmentRole::Offscreen => OFFSCREEN_FORMAT,
            AttachmentRole::Depth => DEPTH_FORMAT,
            AttachmentRole::Backbuffer => surface_format,
        }
    }

    pub fn clear_value(&self) -> vk::ClearValue {
        match self.role {
            AttachmentRole::Offscreen => vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: FILTER_CLEAR_COLOR,
                },
            },
            AttachmentRole::Backbuffer => vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: COMPOSITE_CLEAR_COLOR,
                },
            },
            AttachmentRole::Depth => vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: DEPTH_CLEAR,
                    stencil: 0,
                },
            },
        }
    }
}

/// Attachment indices one subpass touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubpassSpec {
    pub colors: &'static [u32],
    pub inputs: &'static [u32],
    pub depth: Option<u32>,
    pub preserve: &'static [u32],
}

const DIRECT_ATTACHMENTS: &[AttachmentSpec] = &[
    AttachmentSpec::new(AttachmentRole::Offscreen, false, TextureLayout::ShaderReadOnly),
    AttachmentSpec::new(AttachmentRole::Depth, false, TextureLayout::DepthStencilAttachment),
    AttachmentSpec::new(AttachmentRole::Backbuffer, true, TextureLayout::PresentSrc),
];

const FILTER_ATTACHMENTS: &[AttachmentSpec] = &[
    AttachmentSpec::new(AttachmentRole::Offscreen, true, TextureLayout::ShaderReadOnly),
    AttachmentSpec::new(AttachmentRole::Offscreen, true, TextureLayout::ShaderReadOnly),
    AttachmentSpec::new(AttachmentRole::Offscreen, true, TextureLayout::ShaderReadOnly),
    AttachmentSpec::new(AttachmentRole::Offscreen, true, TextureLayout::ShaderReadOnly),
    AttachmentSpec::new(AttachmentRole::Depth, false, TextureLayout::DepthStencilAttachment),
];

const COMPOSITE_ATTACHMENTS: &[AttachmentSpec] = &[AttachmentSpec::new(
    AttachmentRole::Backbuffer,
    true,
    TextureLayout::PresentSrc,
)];

const DIRECT_SUBPASSES: &[SubpassSpec] = &[
    SubpassSpec {
        colors: &[direct::SCENE_COLOR],
        inputs: &[],
        depth: Some(direct::DEPTH),
        preserve: &[],
    },
    SubpassSpec {
        colors: &[direct::BACKBUFFER],
        inputs: &[direct::SCENE_COLOR],
        depth: None,
        preserve: &[],
    },
];

const FILTER_SUBPASSES: &[SubpassSpec] = &[
    // Fragment output 0 is the thresholded color, output 1 the full color
    SubpassSpec {
        colors: &[filter::BRIGHT, filter::PBR],
        inputs: &[],
        depth: Some(filter::DEPTH),
        preserve: &[],
    },
    SubpassSpec {
        colors: &[filter::VERTICAL],
        inputs: &[filter::BRIGHT],
        depth: None,
        preserve: &[filter::PBR],
    },
    SubpassSpec {
        colors: &[filter::HORIZONTAL],
        inputs: &[filter::VERTICAL],
        depth: None,
        preserve: &[filter::PBR],
    },
];

const COMPOSITE_SUBPASSES: &[SubpassSpec] = &[SubpassSpec {
    colors: &[0],
    inputs: &[],
    depth: None,
    preserve: &[],
}];

fn color_to_fragment_read(src_subpass: u32, dst_subpass: u32) -> vk::SubpassDependency {
    vk::SubpassDependency {
        src_subpass,
        dst_subpass,
        src_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        dst_stage_mask: vk::PipelineStageFlags::FRAGMENT_SHADER,
        src_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        dst_access_mask: vk::AccessFlags::SHADER_READ | vk::AccessFlags::INPUT_ATTACHMENT_READ,
        dependency_flags: vk::DependencyFlags::empty(),
    }
}

/// First writes of a pass wait for earlier fragment reads of the same images.
fn external_to_first_write(dst_subpass: u32) -> vk::SubpassDependency {
    vk::SubpassDependency {
        src_subpass: vk::SUBPASS_EXTERNAL,
        dst_subpass,
        src_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
            | vk::PipelineStageFlags::FRAGMENT_SHADER
            | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
        dst_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
            | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
        src_access_mask: vk::AccessFlags::SHADER_READ
            | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        dst_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE
            | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
            | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        dependency_flags: vk::DependencyFlags::empty(),
    }
}

impl PassKind {
    pub fn attachments(self) -> &'static [AttachmentSpec] {
        match self {
            Self::Main => DIRECT_ATTACHMENTS,
            Self::Filter => FILTER_ATTACHMENTS,
            Self::Composite => COMPOSITE_ATTACHMENTS,
        }
    }

    pub fn subpasses(self) -> &'static [SubpassSpec] {
        match self {
            Self::Main => DIRECT_SUBPASSES,
            Self::Filter => FILTER_SUBPASSES,
            Self::Composite => COMPOSITE_SUBPASSES,
        }
    }

    pub fn dependencies(self) -> Vec<vk::SubpassDependency> {
        match self {
            Self::Main => {
                let mut scene_to_composite = color_to_fragment_read(0, 1);
                scene_to_composite.dependency_flags = vk::DependencyFlags::BY_REGION;
                vec![
                    external_to_first_write(0),
                    // The backbuffer is first written in subpass 1
                    external_to_first_write(1),
                    scene_to_composite,
                ]
            }
            Self::Filter => vec![
                external_to_first_write(0),
                color_to_fragment_read(0, 1),
                color_to_fragment_read(1, 2),
                color_to_fragment_read(2, vk::SUBPASS_EXTERNAL),
            ],
            Self::Composite => vec![external_to_first_write(0)],
        }
    }

    pub fn clear_values(self) -> Vec<vk::ClearValue> {
        self.attachments().iter().map(AttachmentSpec::clear_value).collect()
    }

    /// Whether the pass writes the swapchain image and so depends on its format.
    pub fn uses_backbuffer(self) -> bool {
        self.attachments()
            .iter()
            .any(|a| a.role == AttachmentRole::Backbuffer)
    }
}

/// Layout an attachment is in while a subpass reads or writes it.
fn reference(attachment: u32, layout: TextureLayout) -> vk::AttachmentReference {
    vk::AttachmentReference {
        attachment,
        layout: layout.to_vk(),
    }
}

pub fn create_render_pass(
    device: &ash::Device,
    kind: PassKind,
    surface_format: vk::Format,
) -> RenderResult<vk::RenderPass> {
    let attachments: Vec<vk::AttachmentDescription> = kind
        .attachments()
        .iter()
        .map(|spec| {
            vk::AttachmentDescription::default()
                .format(spec.format(surface_format))
                .samples(vk::SampleCountFlags::TYPE_1)
                .load_op(vk::AttachmentLoadOp::CLEAR)
                .store_op(if spec.store {
                    vk::AttachmentStoreOp::STORE
                } else {
                    vk::AttachmentStoreOp::DONT_CARE
                })
                .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                .initial_layout(vk::ImageLayout::UNDEFINED)
                .final_layout(spec.final_layout.to_vk())
        })
        .collect();

    struct References {
        colors: Vec<vk::AttachmentReference>,
        inputs: Vec<vk::AttachmentReference>,
        depth: Option<vk::AttachmentReference>,
    }

    let references: Vec<References> = kind
        .subpasses()
        .iter()
        .map(|subpass| References {
            colors: subpass
                .colors
                .iter()
                .map(|&i| reference(i, TextureLayout::ColorAttachment))
                .collect(),
            inputs: subpass
                .inputs
                .iter()
                .map(|&i| reference(i, TextureLayout::ShaderReadOnly))
                .collect(),
            depth: subpass
                .depth
                .map(|i| reference(i, TextureLayout::DepthStencilAttachment)),
        })
        .collect();

    let subpasses: Vec<vk::SubpassDescription<'_>> = kind
        .subpasses()
        .iter()
        .zip(&references)
        .map(|(spec, refs)| {
            let mut subpass = vk::SubpassDescription::default()
                .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
                .color_attachments(&refs.colors)
                .input_attachments(&refs.inputs)
                .preserve_attachments(spec.preserve);
            if let Some(depth) = refs.depth.as_ref() {
                subpass = subpass.depth_stencil_attachment(depth);
            }
            subpass
        })
        .collect();

    let dependencies = kind.dependencies();
    let render_pass_info = vk::RenderPassCreateInfo::default()
        .attachments(&attachments)
        .subpasses(&subpasses)
        .dependencies(&dependencies);

    unsafe { device.create_render_pass(&render_pass_info, None) }
        .map_err(|e| RenderError::creation(&format!("{kind:?} render pass"), e))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [PassKind; 3] = [PassKind::Main, PassKind::Filter, PassKind::Composite];

    #[test]
    fn subpass_references_are_in_range() {
        for kind in ALL {
            let count = kind.attachments().len() as u32;
            for subpass in kind.subpasses() {
                let all = subpass
                    .colors
                    .iter()
                    .chain(subpass.inputs)
                    .chain(subpass.preserve)
                    .chain(subpass.depth.iter());
                for &index in all {
                    assert!(index < count, "{kind:?} references attachment {index}");
                }
            }
        }
    }

    #[test]
    fn filter_pass_has_five_attachments_and_three_subpasses() {
        let attachments = PassKind::Filter.attachments();
        assert_eq!(attachments.len(), 5);
        assert_eq!(attachments[filter::DEPTH as usize].role, AttachmentRole::Depth);
        assert_eq!(PassKind::Filter.subpasses().len(), 3);
        assert!(!PassKind::Filter.uses_backbuffer());
    }

    #[test]
    fn each_blur_reads_the_previous_subpass_output() {
        let subpasses = PassKind::Filter.subpasses();
        assert!(subpasses[0].colors.contains(&filter::BRIGHT));
        assert!(subpasses[0].colors.contains(&filter::PBR));
        assert_eq!(subpasses[1].inputs, &[filter::BRIGHT]);
        assert_eq!(subpasses[1].colors, &[filter::VERTICAL]);
        assert_eq!(subpasses[2].inputs, &[filter::VERTICAL]);
        assert_eq!(subpasses[2].colors, &[filter::HORIZONTAL]);
    }

    #[test]
    fn every_subpass_transition_has_a_dependency() {
        for kind in ALL {
            let dependencies = kind.dependencies();
            for dst in 1..kind.subpasses().len() as u32 {
                let gated = dependencies.iter().any(|d| {
                    d.src_subpass == dst - 1
                        && d.dst_subpass == dst
                        && d.src_access_mask.contains(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
                        && d.dst_stage_mask.contains(vk::PipelineStageFlags::FRAGMENT_SHADER)
                });
                assert!(gated, "{kind:?} subpass {dst} is not gated");
            }
            assert!(dependencies
                .iter()
                .any(|d| d.src_subpass == vk::SUBPASS_EXTERNAL && d.dst_subpass == 0));
        }
    }

    #[test]
    fn sampled_targets_end_shader_readable() {
        for index in [filter::HORIZONTAL, filter::PBR] {
            assert_eq!(
                PassKind::Filter.attachments()[index as usize].final_layout,
                TextureLayout::ShaderReadOnly
            );
        }
        assert_eq!(
            PassKind::Composite.attachments()[0].final_layout,
            TextureLayout::PresentSrc
        );
    }

    #[test]
    fn clear_values_follow_attachment_roles() {
        let clears = PassKind::Composite.clear_values();
        assert_eq!(unsafe { clears[0].color.float32 }, COMPOSITE_CLEAR_COLOR);

        let clears = PassKind::Filter.clear_values();
        assert_eq!(clears.len(), 5);
        assert_eq!(unsafe { clears[4].depth_stencil.depth }, DEPTH_CLEAR);
    }
}
