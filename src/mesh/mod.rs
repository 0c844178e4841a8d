//! GPU-resident indexed meshes.

pub mod upload;

use crate::backend::vulkan::VulkanContext;
use crate::config::NO_TEXTURE;
use crate::error::{RenderError, RenderResult};
use crate::resources::{BufferId, BufferUsage, ResourceManager};
use crate::scene::{BakedMaterial, BakedMesh, BakedModel};
use crate::uniforms::DrawPushConstants;

use self::upload::{upload_device_buffers, UploadRegion};

/// Material properties copied onto the mesh so drawing never consults the material table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MeshFlags {
    pub is_alpha_mask: bool,
    pub is_normal_map: bool,
}

impl MeshFlags {
    pub fn from_material(material: &BakedMaterial) -> Self {
        Self {
            is_alpha_mask: material.alpha_mask_texture_id != NO_TEXTURE,
            is_normal_map: material.normal_map_texture_id != NO_TEXTURE,
        }
    }

    pub fn push_constants(self) -> DrawPushConstants {
        DrawPushConstants {
            is_alpha_mask: u32::from(self.is_alpha_mask),
            is_normal_map: u32::from(self.is_normal_map),
        }
    }
}

/// Immutable geometry in device-only buffers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedMesh {
    pub positions: BufferId,
    pub texcoords: BufferId,
    pub normals: BufferId,
    pub indices: BufferId,
    pub index_count: u32,
    pub material_id: u32,
    pub flags: MeshFlags,
}

impl IndexedMesh {
    /// Upload one baked mesh: three attribute buffers and a `u32` index buffer.
    pub fn upload(
        context: &VulkanContext,
        resources: &mut ResourceManager,
        mesh: &BakedMesh,
        material: &BakedMaterial,
    ) -> RenderResult<Self> {
        let regions = [
            UploadRegion {
                name: "positions",
                data: bytemuck::cast_slice(&mesh.positions),
                usage: BufferUsage::Vertex,
            },
            UploadRegion {
                name: "texcoords",
                data: bytemuck::cast_slice(&mesh.texcoords),
                usage: BufferUsage::Vertex,
            },
            UploadRegion {
                name: "normals",
                data: bytemuck::cast_slice(&mesh.normals),
                usage: BufferUsage::Vertex,
            },
            UploadRegion {
                name: "indices",
                data: bytemuck::cast_slice(&mesh.indices),
                usage: BufferUsage::Index,
            },
        ];

        let [positions, texcoords, normals, indices]: [BufferId; 4] =
            upload_device_buffers(context, resources, &regions)?
                .try_into()
                .map_err(|_| RenderError::TransferFailed("mesh upload lost a buffer".into()))?;

        Ok(Self {
            positions,
            texcoords,
            normals,
            indices,
            index_count: mesh.indices.len() as u32,
            material_id: mesh.material_id,
            flags: MeshFlags::from_material(material),
        })
    }

    pub fn vertex_buffers(&self) -> [BufferId; 3] {
        [self.positions, self.texcoords, self.normals]
    }
}

/// Every mesh of the loaded scene, in draw order.
#[derive(Debug, Default)]
pub struct MeshCollection {
    meshes: Vec<IndexedMesh>,
}

impl MeshCollection {
    pub fn upload(
        context: &VulkanContext,
        resources: &mut ResourceManager,
        model: &BakedModel,
    ) -> RenderResult<Self> {
        let meshes = model
            .meshes
            .iter()
            .map(|mesh| {
                let material = model.material_of(mesh)?;
                IndexedMesh::upload(context, resources, mesh, material)
            })
            .collect::<RenderResult<Vec<_>>>()?;

        log::info!("Uploaded {} meshes", meshes.len());
        Ok(Self { meshes })
    }

    pub fn iter(&self) -> impl Iterator<Item = &IndexedMesh> {
        self.meshes.iter()
    }

    pub fn get(&self, index: usize) -> Option<&IndexedMesh> {
        self.meshes.get(index)
    }

    pub fn len(&self) -> usize {
        self.meshes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.meshes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_ids_clear_both_flags() {
        let flags = MeshFlags::from_material(&BakedMaterial::default());
        assert_eq!(flags, MeshFlags::default());
        assert_eq!(flags.push_constants(), DrawPushConstants {
            is_alpha_mask: 0,
            is_normal_map: 0
        });
    }

    #[test]
    fn normal_map_only_pushes_zero_one() {
        let material = BakedMaterial {
            normal_map_texture_id: 4,
            ..Default::default()
        };
        let push = MeshFlags::from_material(&material).push_constants();
        assert_eq!((push.is_alpha_mask, push.is_normal_map), (0, 1));
    }

    #[test]
    fn texture_id_zero_is_a_real_texture() {
        let material = BakedMaterial {
            alpha_mask_texture_id: 0,
            ..Default::default()
        };
        assert!(MeshFlags::from_material(&material).is_alpha_mask);
    }
}
