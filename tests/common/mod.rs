//! Shared infrastructure for the GPU integration tests.
//!
//! Every test builds a headless [`TestContext`]; when no Vulkan driver is available the
//! context is `None` and the test returns early.

#![allow(dead_code)]

use ash::vk;
use glam::{Vec2, Vec3};

use bloom_renderer::backend::vulkan::VulkanContext;
use bloom_renderer::resources::ResourceManager;
use bloom_renderer::scene::{BakedMaterial, BakedMesh, BakedModel};

/// Headless Vulkan context plus a resource manager on top of it.
///
/// Field order keeps the manager dropped before the device it allocates from.
pub struct TestContext {
    pub resources: ResourceManager,
    pub vulkan: VulkanContext,
}

impl TestContext {
    /// Returns `None` if no Vulkan implementation can be loaded.
    pub fn new() -> Option<Self> {
        let _ = env_logger::builder().is_test(true).try_init();

        let vulkan = match VulkanContext::new_headless(false) {
            Ok(vulkan) => vulkan,
            Err(e) => {
                eprintln!("Vulkan not available, skipping: {e}");
                return None;
            }
        };
        let resources = ResourceManager::new(&vulkan);
        Some(Self { resources, vulkan })
    }

    pub fn device(&self) -> &ash::Device {
        self.vulkan.device()
    }
}

pub fn extent(width: u32, height: u32) -> vk::Extent2D {
    vk::Extent2D { width, height }
}

/// A unit quad in the XY plane made of two triangles.
pub fn quad_mesh(material_id: u32) -> BakedMesh {
    BakedMesh {
        material_id,
        positions: vec![
            Vec3::new(-1.0, -1.0, 0.0),
            Vec3::new(1.0, -1.0, 0.0),
            Vec3::new(1.0, 1.0, 0.0),
            Vec3::new(-1.0, 1.0, 0.0),
        ],
        texcoords: vec![
            Vec2::new(0.0, 1.0),
            Vec2::new(1.0, 1.0),
            Vec2::new(1.0, 0.0),
            Vec2::new(0.0, 0.0),
        ],
        normals: vec![Vec3::Z; 4],
        indices: vec![0, 1, 2, 2, 3, 0],
    }
}

/// Two quads sharing one untextured material.
pub fn quad_model() -> BakedModel {
    BakedModel {
        textures: Vec::new(),
        materials: vec![BakedMaterial::default()],
        meshes: vec![quad_mesh(0), quad_mesh(0)],
    }
}
