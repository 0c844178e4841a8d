//! GPU images and their views.

use ash::vk;
use gpu_allocator::vulkan::Allocation;

use crate::error::{RenderError, RenderResult};

use super::Lifetime;

/// What an image is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageUsage {
    /// Offscreen color target: written as an attachment, read as input or sampled later.
    ColorTarget,
    DepthTarget,
    /// Loaded material texture.
    Texture,
}

impl ImageUsage {
    pub fn to_vk(self) -> vk::ImageUsageFlags {
        match self {
            Self::ColorTarget => {
                vk::ImageUsageFlags::COLOR_ATTACHMENT
                    | vk::ImageUsageFlags::INPUT_ATTACHMENT
                    | vk::ImageUsageFlags::SAMPLED
            }
            Self::DepthTarget => vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            Self::Texture => vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST,
        }
    }

    pub fn aspect(self) -> vk::ImageAspectFlags {
        match self {
            Self::DepthTarget => vk::ImageAspectFlags::DEPTH,
            Self::ColorTarget | Self::Texture => vk::ImageAspectFlags::COLOR,
        }
    }
}

pub fn is_depth_format(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D32_SFLOAT
            | vk::Format::D32_SFLOAT_S8_UINT
            | vk::Format::D24_UNORM_S8_UINT
            | vk::Format::D16_UNORM
    )
}

/// Check the format agrees with the usage and the extent is drawable.
pub fn validate_image_desc(desc: &ImageDesc<'_>) -> RenderResult<()> {
    if desc.extent.width == 0 || desc.extent.height == 0 {
        return Err(RenderError::InvalidParameter(format!(
            "image '{}' has an empty extent",
            desc.name
        )));
    }
    let depth = is_depth_format(desc.format);
    if depth != (desc.usage == ImageUsage::DepthTarget) {
        return Err(RenderError::InvalidParameter(format!(
            "image '{}' format {:?} does not match usage {:?}",
            desc.name, desc.format, desc.usage
        )));
    }
    Ok(())
}

/// Parameters for [`ResourceManager::create_image`](super::ResourceManager::create_image).
#[derive(Debug, Clone)]
pub struct ImageDesc<'a> {
    pub name: &'a str,
    pub extent: vk::Extent2D,
    pub format: vk::Format,
    pub usage: ImageUsage,
    pub lifetime: Lifetime,
}

/// A 2D image, its single view and the memory backing it.
pub struct GpuImage {
    pub(crate) raw: vk::Image,
    pub(crate) view: vk::ImageView,
    pub(crate) allocation: Option<Allocation>,
    pub(crate) format: vk::Format,
    pub(crate) extent: vk::Extent2D,
    pub(crate) usage: ImageUsage,
}

impl GpuImage {
    pub fn raw(&self) -> vk::Image {
        self.raw
    }

    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    pub fn format(&self) -> vk::Format {
        self.format
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn usage(&self) -> ImageUsage {
        self.usage
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DEPTH_FORMAT, OFFSCREEN_FORMAT};

    fn desc(format: vk::Format, usage: ImageUsage, width: u32) -> ImageDesc<'static> {
        ImageDesc {
            name: "test",
            extent: vk::Extent2D { width, height: 16 },
            format,
            usage,
            lifetime: Lifetime::ScreenSized,
        }
    }

    #[test]
    fn color_targets_can_be_attached_and_sampled() {
        let flags = ImageUsage::ColorTarget.to_vk();
        assert!(flags.contains(vk::ImageUsageFlags::COLOR_ATTACHMENT));
        assert!(flags.contains(vk::ImageUsageFlags::INPUT_ATTACHMENT));
        assert!(flags.contains(vk::ImageUsageFlags::SAMPLED));
    }

    #[test]
    fn depth_usage_requires_depth_format() {
        assert!(validate_image_desc(&desc(DEPTH_FORMAT, ImageUsage::DepthTarget, 16)).is_ok());
        assert!(validate_image_desc(&desc(OFFSCREEN_FORMAT, ImageUsage::DepthTarget, 16)).is_err());
        assert!(validate_image_desc(&desc(DEPTH_FORMAT, ImageUsage::ColorTarget, 16)).is_err());
    }

    #[test]
    fn empty_extent_is_rejected() {
        assert!(validate_image_desc(&desc(OFFSCREEN_FORMAT, ImageUsage::ColorTarget, 0)).is_err());
    }
}
