//! glTF 2.0 loading into a [`BakedModel`].
//!
//! Node transforms are ignored: meshes are expected to be authored in world space, the way a
//! baked scene is. Only images referenced by relative file URI become textures; embedded and
//! data-URI images are skipped and their slots fall back to the white texture.

use std::collections::HashMap;
use std::path::Path;

use ::gltf::material::AlphaMode;
use ::gltf::mesh::Mode;
use glam::{Vec2, Vec3};

use crate::config::NO_TEXTURE;
use crate::error::{RenderError, RenderResult};

use super::{BakedMaterial, BakedMesh, BakedModel, BakedTexture};

/// Load a `.gltf` or `.glb` file and validate the result.
pub fn load_gltf(path: &Path) -> RenderResult<BakedModel> {
    let ::gltf::Gltf { document, blob } = ::gltf::Gltf::open(path).map_err(|e| {
        RenderError::AssetLoadFailed(format!("Failed to parse {}: {}", path.display(), e))
    })?;
    let base = path.parent().unwrap_or_else(|| Path::new("."));
    let buffers = ::gltf::import_buffers(&document, Some(base), blob).map_err(|e| {
        RenderError::AssetLoadFailed(format!("Failed to load buffers of {}: {}", path.display(), e))
    })?;

    let (textures, texture_ids) = collect_textures(&document, base);
    let mut materials: Vec<BakedMaterial> = document
        .materials()
        .map(|material| convert_material(&material, &texture_ids))
        .collect();

    let mut default_material = None;
    let mut meshes = Vec::new();

    for mesh in document.meshes() {
        for primitive in mesh.primitives() {
            if primitive.mode() != Mode::Triangles {
                log::warn!(
                    "Skipping {:?} primitive in mesh {}",
                    primitive.mode(),
                    mesh.index()
                );
                continue;
            }

            let material_id = match primitive.material().index() {
                Some(index) => index as u32,
                None => *default_material.get_or_insert_with(|| {
                    materials.push(BakedMaterial::default());
                    (materials.len() - 1) as u32
                }),
            };

            let reader = primitive.reader(|buffer| buffers.get(buffer.index()).map(|d| &d.0[..]));

            let positions: Vec<Vec3> = reader
                .read_positions()
                .ok_or_else(|| {
                    RenderError::AssetLoadFailed(format!("mesh {} has no positions", mesh.index()))
                })?
                .map(Vec3::from)
                .collect();
            let vertex_count = positions.len();

            let normals = match reader.read_normals() {
                Some(normals) => normals.map(Vec3::from).collect(),
                None => vec![Vec3::Y; vertex_count],
            };
            let texcoords = match reader.read_tex_coords(0) {
                Some(texcoords) => texcoords.into_f32().map(Vec2::from).collect(),
                None => vec![Vec2::ZERO; vertex_count],
            };
            let indices = match reader.read_indices() {
                Some(indices) => indices.into_u32().collect(),
                None => (0..vertex_count as u32).collect(),
            };

            meshes.push(BakedMesh {
                material_id,
                positions,
                texcoords,
                normals,
                indices,
            });
        }
    }

    let model = BakedModel {
        textures,
        materials,
        meshes,
    };
    model.validate()?;

    log::info!(
        "Loaded {}: {} meshes, {} materials, {} textures",
        path.display(),
        model.meshes.len(),
        model.materials.len(),
        model.textures.len()
    );
    Ok(model)
}

/// File-backed textures, plus a map from glTF texture index to baked texture id.
fn collect_textures(
    document: &::gltf::Document,
    base: &Path,
) -> (Vec<BakedTexture>, HashMap<usize, u32>) {
    let mut textures = Vec::new();
    let mut ids = HashMap::new();

    for texture in document.textures() {
        match texture.source().source() {
            ::gltf::image::Source::Uri { uri, .. } if !uri.starts_with("data:") => {
                ids.insert(texture.index(), textures.len() as u32);
                textures.push(BakedTexture {
                    path: base.join(uri),
                });
            }
            _ => log::warn!("Texture {} is not file-backed; using fallback", texture.index()),
        }
    }

    (textures, ids)
}

fn convert_material(material: &::gltf::Material<'_>, texture_ids: &HashMap<usize, u32>) -> BakedMaterial {
    let lookup = |index: Option<usize>| {
        index
            .and_then(|index| texture_ids.get(&index).copied())
            .unwrap_or(NO_TEXTURE)
    };

    let pbr = material.pbr_metallic_roughness();
    let [r, g, b, _] = pbr.base_color_factor();
    let base_color_texture_id = lookup(pbr.base_color_texture().map(|t| t.texture().index()));
    let metallic_roughness_id =
        lookup(pbr.metallic_roughness_texture().map(|t| t.texture().index()));

    // Alpha lives in the base color texture for masked and blended materials
    let alpha_mask_texture_id = match material.alpha_mode() {
        AlphaMode::Mask | AlphaMode::Blend => base_color_texture_id,
        AlphaMode::Opaque => NO_TEXTURE,
    };

    BakedMaterial {
        base_color: Vec3::new(r, g, b),
        emissive_color: Vec3::from(material.emissive_factor()),
        roughness: pbr.roughness_factor(),
        metalness: pbr.metallic_factor(),
        base_color_texture_id,
        roughness_texture_id: metallic_roughness_id,
        metalness_texture_id: metallic_roughness_id,
        alpha_mask_texture_id,
        normal_map_texture_id: lookup(material.normal_texture().map(|t| t.texture().index())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_an_asset_error() {
        let err = load_gltf(Path::new("no/such/model.gltf")).unwrap_err();
        assert!(matches!(err, RenderError::AssetLoadFailed(_)));
    }
}
