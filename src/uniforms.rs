//! Uniform layouts shared with the shaders, and the per-frame update logic.
//!
//! All structs are `#[repr(C)]` with explicit padding so their bytes match the std140 blocks
//! in the shaders exactly. Each is small enough for `vkCmdUpdateBuffer`.

use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec2, Vec3, Vec4};
use static_assertions::const_assert;

use crate::backend::vulkan::barriers::{buffer_barrier, BufferAccess};
use crate::camera::FrameSnapshot;
use crate::config::{CameraConfig, KERNEL_SPREAD, KERNEL_TAPS};
use crate::scene::BakedMaterial;

/// Largest payload `vkCmdUpdateBuffer` accepts.
pub const MAX_INLINE_UPDATE: usize = 65536;

/// Camera matrices, set 0 of the geometry pipelines.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct SceneUniform {
    pub camera: Mat4,
    pub projection: Mat4,
    pub proj_cam: Mat4,
    /// World-space camera position, `w = 1`.
    pub camera_pos: Vec4,
}

/// Per-mesh scalar material parameters.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct MaterialUniform {
    pub base_color: Vec4,
    pub emissive_color: Vec4,
    /// `x` = roughness, `y` = metalness
    pub roughness_metalness: Vec2,
    pub _padding: [f32; 2],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct LightUniform {
    pub position: Vec4,
    pub color: Vec4,
    pub intensity: f32,
    pub _padding: [f32; 3],
}

/// Blur weights packed four to a `vec4` so the block is valid std140.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GaussianUniform {
    pub weights: [[f32; 4]; KERNEL_VEC4S],
}

const KERNEL_VEC4S: usize = KERNEL_TAPS.div_ceil(4);

const_assert!(std::mem::size_of::<SceneUniform>() == 208);
const_assert!(std::mem::size_of::<MaterialUniform>() == 48);
const_assert!(std::mem::size_of::<LightUniform>() == 48);
const_assert!(std::mem::size_of::<GaussianUniform>() == 96);
const_assert!(std::mem::size_of::<SceneUniform>() % 4 == 0);
const_assert!(std::mem::size_of::<SceneUniform>() <= MAX_INLINE_UPDATE);
const_assert!(std::mem::size_of::<LightUniform>() % 4 == 0);
const_assert!(std::mem::size_of::<GaussianUniform>() % 4 == 0);

impl MaterialUniform {
    pub fn from_material(material: &BakedMaterial) -> Self {
        Self {
            base_color: material.base_color.extend(1.0),
            emissive_color: material.emissive_color.extend(1.0),
            roughness_metalness: Vec2::new(material.roughness, material.metalness),
            _padding: [0.0; 2],
        }
    }
}

impl Default for LightUniform {
    fn default() -> Self {
        Self::at(Vec3::new(4.0, 10.0, 0.0))
    }
}

impl LightUniform {
    pub fn at(position: Vec3) -> Self {
        Self {
            position: position.extend(0.0),
            color: Vec4::new(1.0, 1.0, 1.0, 0.0),
            intensity: 1.0,
            _padding: [0.0; 3],
        }
    }
}

impl GaussianUniform {
    pub fn from_taps(taps: &[f32; KERNEL_TAPS]) -> Self {
        let mut weights = [[0.0; 4]; KERNEL_VEC4S];
        for (i, &tap) in taps.iter().enumerate() {
            weights[i / 4][i % 4] = tap;
        }
        Self { weights }
    }

    /// Weight of tap `i`.
    pub fn tap(&self, i: usize) -> f32 {
        self.weights[i / 4][i % 4]
    }
}

/// Normal distribution density at `distance` for standard deviation `spread`.
pub fn gaussian(distance: f32, spread: f32) -> f32 {
    let variance = spread * spread;
    (1.0 / (2.0 * std::f32::consts::PI * variance).sqrt())
        * (-(distance * distance) / (2.0 * variance)).exp()
}

/// One-sided kernel of `KERNEL_TAPS` weights at distances `0..KERNEL_TAPS`, normalized to sum 1.
pub fn gaussian_kernel(spread: f32) -> [f32; KERNEL_TAPS] {
    let mut taps = [0.0f32; KERNEL_TAPS];
    for (i, tap) in taps.iter_mut().enumerate() {
        *tap = gaussian(i as f32, spread);
    }
    let sum: f32 = taps.iter().sum();
    for tap in &mut taps {
        *tap /= sum;
    }
    taps
}

/// Scene matrices for the given camera and surface aspect.
pub fn scene_uniform(
    camera_to_world: Mat4,
    extent: vk::Extent2D,
    camera: &CameraConfig,
) -> SceneUniform {
    let aspect = extent.width.max(1) as f32 / extent.height.max(1) as f32;
    let mut projection = Mat4::perspective_rh(camera.fov_y, aspect, camera.near, camera.far);
    // Vulkan clip space has Y pointing down
    projection.y_axis.y *= -1.0;

    let view = camera_to_world.inverse();
    SceneUniform {
        camera: view,
        projection,
        proj_cam: projection * view,
        camera_pos: camera_to_world.w_axis.truncate().extend(1.0),
    }
}

/// The uniforms uploaded at the start of every frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameUniforms {
    pub scene: SceneUniform,
    pub light: LightUniform,
    pub vertical_kernel: GaussianUniform,
    pub horizontal_kernel: GaussianUniform,
}

impl FrameUniforms {
    pub fn new(snapshot: &FrameSnapshot, extent: vk::Extent2D, camera: &CameraConfig) -> Self {
        let mut uniforms = Self {
            scene: scene_uniform(snapshot.camera_to_world, extent, camera),
            light: LightUniform::at(snapshot.light_position),
            vertical_kernel: GaussianUniform::zeroed(),
            horizontal_kernel: GaussianUniform::zeroed(),
        };
        uniforms.rebuild_kernels();
        uniforms
    }

    /// Recompute camera and light data from this frame's snapshot.
    pub fn update(&mut self, snapshot: &FrameSnapshot, extent: vk::Extent2D, camera: &CameraConfig) {
        self.scene = scene_uniform(snapshot.camera_to_world, extent, camera);
        self.light = LightUniform::at(snapshot.light_position);
    }

    /// Both blur directions use the same spread, so their kernels are identical.
    pub fn rebuild_kernels(&mut self) {
        let taps = gaussian_kernel(KERNEL_SPREAD);
        self.vertical_kernel = GaussianUniform::from_taps(&taps);
        self.horizontal_kernel = GaussianUniform::from_taps(&taps);
    }
}

/// A device-only uniform buffer and the shader stages that read it.
#[derive(Debug, Clone, Copy)]
pub struct UniformTarget {
    pub buffer: vk::Buffer,
    pub stages: vk::ShaderStageFlags,
}

/// Record an in-pipeline update of `data` into `target`, fenced by barriers on both sides.
pub fn record_uniform_upload(
    device: &ash::Device,
    command_buffer: vk::CommandBuffer,
    target: UniformTarget,
    data: &[u8],
) {
    let reader = BufferAccess::uniform_read(target.stages);

    buffer_barrier(device, command_buffer, target.buffer, reader, BufferAccess::TRANSFER_WRITE);
    unsafe { device.cmd_update_buffer(command_buffer, target.buffer, 0, data) };
    buffer_barrier(device, command_buffer, target.buffer, BufferAccess::TRANSFER_WRITE, reader);
}

/// The two flags threaded through push constants into the geometry fragment stage.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct DrawPushConstants {
    pub is_alpha_mask: u32,
    pub is_normal_map: u32,
}

const_assert!(std::mem::size_of::<DrawPushConstants>() == 8);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gaussian_peaks_at_zero() {
        assert!(gaussian(0.0, 9.0) > gaussian(1.0, 9.0));
        let expected = 1.0 / (2.0 * std::f32::consts::PI * 81.0).sqrt();
        assert!((gaussian(0.0, 9.0) - expected).abs() < 1e-7);
    }

    #[test]
    fn packed_kernel_keeps_tap_order() {
        let taps = gaussian_kernel(KERNEL_SPREAD);
        let packed = GaussianUniform::from_taps(&taps);
        for (i, &tap) in taps.iter().enumerate() {
            assert_eq!(packed.tap(i), tap);
        }
        // Trailing padding stays zero
        assert_eq!(packed.weights[5][2], 0.0);
        assert_eq!(packed.weights[5][3], 0.0);
        let bytes = bytemuck::bytes_of(&packed);
        assert_eq!(&bytes[..4], &taps[0].to_ne_bytes());
    }

    #[test]
    fn material_uniform_sets_opaque_alpha() {
        let material = BakedMaterial {
            base_color: Vec3::new(0.5, 0.25, 1.0),
            emissive_color: Vec3::new(1.0, 0.0, 0.0),
            roughness: 0.3,
            metalness: 0.9,
            ..Default::default()
        };
        let uniform = MaterialUniform::from_material(&material);
        assert_eq!(uniform.base_color, Vec4::new(0.5, 0.25, 1.0, 1.0));
        assert_eq!(uniform.emissive_color.w, 1.0);
        assert_eq!(uniform.roughness_metalness, Vec2::new(0.3, 0.9));
    }

    #[test]
    fn default_light_matches_scene_setup() {
        let light = LightUniform::default();
        assert_eq!(light.position, Vec4::new(4.0, 10.0, 0.0, 0.0));
        assert_eq!(light.color, Vec4::new(1.0, 1.0, 1.0, 0.0));
        assert_eq!(light.intensity, 1.0);
    }

    #[test]
    fn scene_uniform_flips_y_and_inverts_camera() {
        let camera_to_world = Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0));
        let extent = vk::Extent2D {
            width: 1280,
            height: 720,
        };
        let camera = CameraConfig::default();
        let uniform = scene_uniform(camera_to_world, extent, &camera);

        let unflipped = Mat4::perspective_rh(camera.fov_y, 1280.0 / 720.0, camera.near, camera.far);
        assert!(uniform.projection.y_axis.y < 0.0);
        assert_eq!(uniform.projection.y_axis.y, -unflipped.y_axis.y);
        assert!(uniform.camera.abs_diff_eq(camera_to_world.inverse(), 1e-6));
        assert!(uniform
            .proj_cam
            .abs_diff_eq(uniform.projection * uniform.camera, 1e-6));
        assert_eq!(uniform.camera_pos, Vec4::new(1.0, 2.0, 3.0, 1.0));
    }

    #[test]
    fn zero_extent_does_not_produce_nan() {
        let uniform = scene_uniform(
            Mat4::IDENTITY,
            vk::Extent2D {
                width: 0,
                height: 0,
            },
            &CameraConfig::default(),
        );
        assert!(!uniform.projection.is_nan());
    }
}
