//! Material texture loading and upload.

use std::collections::HashMap;
use std::path::Path;

use ash::vk;

use crate::backend::vulkan::barriers::transition_image;
use crate::backend::vulkan::command::OneShotCommands;
use crate::backend::vulkan::layout::TextureLayout;
use crate::backend::vulkan::VulkanContext;
use crate::config::NO_TEXTURE;
use crate::error::{RenderError, RenderResult};
use crate::scene::BakedModel;

use super::{
    BufferDesc, BufferId, BufferUsage, ImageDesc, ImageId, ImageUsage, Lifetime, Residency,
    ResourceManager,
};

/// Decoded RGBA8 pixels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureData {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

impl TextureData {
    /// A single opaque white texel, bound wherever a material has no texture.
    pub fn white() -> Self {
        Self {
            width: 1,
            height: 1,
            rgba: vec![255; 4],
        }
    }

    pub fn load(path: &Path) -> RenderResult<Self> {
        let image = image::open(path)
            .map_err(|e| {
                RenderError::AssetLoadFailed(format!("Failed to load texture {}: {}", path.display(), e))
            })?
            .to_rgba8();
        let (width, height) = image.dimensions();
        Ok(Self {
            width,
            height,
            rgba: image.into_raw(),
        })
    }
}

/// How texel values are interpreted when sampled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TexelEncoding {
    /// Colors, decoded from sRGB on sampling.
    Srgb,
    /// Scalar data such as roughness and metalness.
    Linear,
}

impl TexelEncoding {
    pub fn format(self) -> vk::Format {
        match self {
            Self::Srgb => vk::Format::R8G8B8A8_SRGB,
            Self::Linear => vk::Format::R8G8B8A8_UNORM,
        }
    }
}

/// Upload pixels to a new sampled image through a staging buffer.
///
/// Blocks until the copy completes; the image is left in `SHADER_READ_ONLY_OPTIMAL`.
pub fn upload_texture(
    context: &VulkanContext,
    resources: &mut ResourceManager,
    name: &str,
    data: &TextureData,
    encoding: TexelEncoding,
) -> RenderResult<ImageId> {
    let expected = data.width as usize * data.height as usize * 4;
    if data.rgba.len() != expected {
        return Err(RenderError::InvalidParameter(format!(
            "texture '{name}' has {} bytes, expected {expected}",
            data.rgba.len()
        )));
    }

    let staging = resources.create_buffer(&BufferDesc::new(
        name,
        data.rgba.len() as u64,
        BufferUsage::Staging,
        Residency::HostVisible,
    ))?;

    let result = fill_texture(context, resources, staging, name, data, encoding);
    resources.destroy(staging)?;
    result
}

fn fill_texture(
    context: &VulkanContext,
    resources: &mut ResourceManager,
    staging: BufferId,
    name: &str,
    data: &TextureData,
    encoding: TexelEncoding,
) -> RenderResult<ImageId> {
    resources.write_buffer(staging, 0, &data.rgba)?;

    let image = resources.create_image(&ImageDesc {
        name,
        extent: vk::Extent2D {
            width: data.width,
            height: data.height,
        },
        format: encoding.format(),
        usage: ImageUsage::Texture,
        lifetime: Lifetime::Persistent,
    })?;

    if let Err(e) = record_texture_copy(context, resources, staging, image, data) {
        if let Err(cleanup) = resources.destroy(image) {
            log::warn!("Failed to release texture '{name}': {cleanup}");
        }
        return Err(e);
    }
    Ok(image)
}

fn record_texture_copy(
    context: &VulkanContext,
    resources: &ResourceManager,
    staging: BufferId,
    image: ImageId,
    data: &TextureData,
) -> RenderResult<()> {
    let device = context.device();
    let staging = resources.buffer(staging)?.raw();
    let image = resources.image(image)?.raw();

    let commands = OneShotCommands::begin(context)?;
    let cmd = commands.command_buffer();

    transition_image(
        device,
        cmd,
        image,
        vk::ImageAspectFlags::COLOR,
        TextureLayout::Undefined,
        TextureLayout::TransferDst,
    );

    let region = vk::BufferImageCopy::default()
        .image_subresource(
            vk::ImageSubresourceLayers::default()
                .aspect_mask(vk::ImageAspectFlags::COLOR)
                .mip_level(0)
                .base_array_layer(0)
                .layer_count(1),
        )
        .image_extent(vk::Extent3D {
            width: data.width,
            height: data.height,
            depth: 1,
        });

    unsafe {
        device.cmd_copy_buffer_to_image(
            cmd,
            staging,
            image,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            &[region],
        );
    }

    transition_image(
        device,
        cmd,
        image,
        vk::ImageAspectFlags::COLOR,
        TextureLayout::TransferDst,
        TextureLayout::ShaderReadOnly,
    );

    commands.submit_and_wait()
}

/// Uploaded textures keyed by model texture id and encoding.
///
/// Sentinel ids resolve to a shared white texture.
#[derive(Debug, Default)]
pub struct TextureCache {
    entries: HashMap<(u32, TexelEncoding), ImageId>,
    fallback: HashMap<TexelEncoding, ImageId>,
}

impl TextureCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resolve(
        &mut self,
        context: &VulkanContext,
        resources: &mut ResourceManager,
        model: &BakedModel,
        texture_id: u32,
        encoding: TexelEncoding,
    ) -> RenderResult<ImageId> {
        if texture_id == NO_TEXTURE {
            return self.fallback(context, resources, encoding);
        }
        if let Some(&image) = self.entries.get(&(texture_id, encoding)) {
            return Ok(image);
        }

        let texture = model.textures.get(texture_id as usize).ok_or_else(|| {
            RenderError::AssetLoadFailed(format!("texture id {texture_id} out of range"))
        })?;
        let data = TextureData::load(&texture.path)?;
        let name = texture.path.to_string_lossy();
        let image = upload_texture(context, resources, &name, &data, encoding)?;

        self.entries.insert((texture_id, encoding), image);
        Ok(image)
    }

    fn fallback(
        &mut self,
        context: &VulkanContext,
        resources: &mut ResourceManager,
        encoding: TexelEncoding,
    ) -> RenderResult<ImageId> {
        if let Some(&image) = self.fallback.get(&encoding) {
            return Ok(image);
        }
        let image = upload_texture(context, resources, "white", &TextureData::white(), encoding)?;
        self.fallback.insert(encoding, image);
        Ok(image)
    }

    /// Number of distinct uploads, fallbacks included.
    pub fn len(&self) -> usize {
        self.entries.len() + self.fallback.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn white_texture_is_one_opaque_texel() {
        let white = TextureData::white();
        assert_eq!((white.width, white.height), (1, 1));
        assert_eq!(white.rgba, vec![255, 255, 255, 255]);
    }

    #[test]
    fn encodings_pick_formats() {
        assert_eq!(TexelEncoding::Srgb.format(), vk::Format::R8G8B8A8_SRGB);
        assert_eq!(TexelEncoding::Linear.format(), vk::Format::R8G8B8A8_UNORM);
    }

    #[test]
    fn missing_file_is_an_asset_error() {
        let err = TextureData::load(Path::new("does/not/exist.png")).unwrap_err();
        assert!(matches!(err, RenderError::AssetLoadFailed(_)));
    }
}
