//! In-memory baked model consumed by the renderer.
//!
//! The renderer reads these arrays once at startup and never mutates them. Texture ids index
//! into [`BakedModel::textures`]; [`NO_TEXTURE`] marks an optional slot as empty.

pub mod loader;

use std::path::PathBuf;

use glam::{Vec2, Vec3};

use crate::config::NO_TEXTURE;
use crate::error::{RenderError, RenderResult};

#[derive(Debug, Clone, PartialEq)]
pub struct BakedTexture {
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BakedMaterial {
    pub base_color: Vec3,
    pub emissive_color: Vec3,
    pub roughness: f32,
    pub metalness: f32,
    pub base_color_texture_id: u32,
    pub roughness_texture_id: u32,
    pub metalness_texture_id: u32,
    pub alpha_mask_texture_id: u32,
    pub normal_map_texture_id: u32,
}

impl Default for BakedMaterial {
    fn default() -> Self {
        Self {
            base_color: Vec3::ONE,
            emissive_color: Vec3::ZERO,
            roughness: 1.0,
            metalness: 0.0,
            base_color_texture_id: NO_TEXTURE,
            roughness_texture_id: NO_TEXTURE,
            metalness_texture_id: NO_TEXTURE,
            alpha_mask_texture_id: NO_TEXTURE,
            normal_map_texture_id: NO_TEXTURE,
        }
    }
}

impl BakedMaterial {
    fn texture_ids(&self) -> [u32; 5] {
        [
            self.base_color_texture_id,
            self.roughness_texture_id,
            self.metalness_texture_id,
            self.alpha_mask_texture_id,
            self.normal_map_texture_id,
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct BakedMesh {
    pub material_id: u32,
    pub positions: Vec<Vec3>,
    pub texcoords: Vec<Vec2>,
    pub normals: Vec<Vec3>,
    pub indices: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct BakedModel {
    pub textures: Vec<BakedTexture>,
    pub materials: Vec<BakedMaterial>,
    pub meshes: Vec<BakedMesh>,
}

impl BakedModel {
    /// Check every cross-reference and array length the renderer relies on.
    pub fn validate(&self) -> RenderResult<()> {
        for (index, material) in self.materials.iter().enumerate() {
            for id in material.texture_ids() {
                if id != NO_TEXTURE && id as usize >= self.textures.len() {
                    return Err(RenderError::AssetLoadFailed(format!(
                        "material {index} references texture {id} but only {} exist",
                        self.textures.len()
                    )));
                }
            }
        }

        for (index, mesh) in self.meshes.iter().enumerate() {
            let invalid = |reason: String| {
                Err(RenderError::AssetLoadFailed(format!("mesh {index}: {reason}")))
            };

            if mesh.material_id as usize >= self.materials.len() {
                return invalid(format!("material {} out of range", mesh.material_id));
            }
            if mesh.positions.is_empty() || mesh.indices.is_empty() {
                return invalid("no geometry".to_string());
            }
            if mesh.texcoords.len() != mesh.positions.len()
                || mesh.normals.len() != mesh.positions.len()
            {
                return invalid("attribute arrays differ in length".to_string());
            }
            if mesh.indices.len() % 3 != 0 {
                return invalid("index count is not a multiple of 3".to_string());
            }
            if let Some(&bad) = mesh
                .indices
                .iter()
                .find(|&&i| i as usize >= mesh.positions.len())
            {
                return invalid(format!("index {bad} out of range"));
            }
        }

        Ok(())
    }

    pub fn material_of(&self, mesh: &BakedMesh) -> RenderResult<&BakedMaterial> {
        self.materials.get(mesh.material_id as usize).ok_or_else(|| {
            RenderError::AssetLoadFailed(format!("material {} out of range", mesh.material_id))
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn triangle(material_id: u32) -> BakedMesh {
        BakedMesh {
            material_id,
            positions: vec![Vec3::ZERO, Vec3::X, Vec3::Y],
            texcoords: vec![Vec2::ZERO, Vec2::X, Vec2::Y],
            normals: vec![Vec3::Z; 3],
            indices: vec![0, 1, 2],
        }
    }

    #[test]
    fn well_formed_model_validates() {
        let model = BakedModel {
            textures: vec![BakedTexture {
                path: PathBuf::from("albedo.png"),
            }],
            materials: vec![BakedMaterial {
                base_color_texture_id: 0,
                ..Default::default()
            }],
            meshes: vec![triangle(0)],
        };
        assert!(model.validate().is_ok());
    }

    #[test]
    fn dangling_ids_are_rejected() {
        let mut model = BakedModel {
            materials: vec![BakedMaterial::default()],
            meshes: vec![triangle(1)],
            ..Default::default()
        };
        assert!(model.validate().is_err());

        model.meshes[0].material_id = 0;
        model.materials[0].normal_map_texture_id = 3;
        assert!(model.validate().is_err());
    }

    #[test]
    fn out_of_range_index_is_rejected() {
        let mut mesh = triangle(0);
        mesh.indices = vec![0, 1, 7];
        let model = BakedModel {
            materials: vec![BakedMaterial::default()],
            meshes: vec![mesh],
            ..Default::default()
        };
        assert!(matches!(model.validate(), Err(RenderError::AssetLoadFailed(_))));
    }
}
