//! Uniform update logic: blur kernels, scene matrices and snapshot handling.

use ash::vk;
use glam::{Mat4, Vec3, Vec4};
use rstest::rstest;

use bloom_renderer::config::{CameraConfig, KERNEL_SPREAD, KERNEL_TAPS};
use bloom_renderer::uniforms::{gaussian_kernel, scene_uniform, FrameUniforms};
use bloom_renderer::{FrameSnapshot, InputFlags, UserState};

fn extent(width: u32, height: u32) -> vk::Extent2D {
    vk::Extent2D { width, height }
}

#[rstest]
#[case::narrow(3.0)]
#[case::configured(KERNEL_SPREAD)]
#[case::wide(20.0)]
fn test_kernel_is_normalized_and_decreasing(#[case] spread: f32) {
    let taps = gaussian_kernel(spread);

    let sum: f32 = taps.iter().sum();
    assert!((sum - 1.0).abs() < 1e-5, "sum was {sum}");
    assert!(taps.windows(2).all(|pair| pair[0] >= pair[1]));
    assert!(taps.iter().all(|&tap| tap > 0.0));
}

#[test]
fn test_both_blur_directions_share_a_kernel() {
    let camera = CameraConfig::default();
    let snapshot = UserState::new(&camera).snapshot();
    let uniforms = FrameUniforms::new(&snapshot, extent(1280, 720), &camera);

    assert_eq!(uniforms.vertical_kernel, uniforms.horizontal_kernel);
    let taps = gaussian_kernel(KERNEL_SPREAD);
    for (i, &tap) in taps.iter().enumerate().take(KERNEL_TAPS) {
        assert_eq!(uniforms.vertical_kernel.tap(i), tap);
    }
}

/// Per-frame updates touch camera and light but leave the kernels alone.
#[test]
fn test_update_follows_snapshot() {
    let camera = CameraConfig::default();
    let mut uniforms = FrameUniforms::new(
        &UserState::new(&camera).snapshot(),
        extent(800, 600),
        &camera,
    );
    let kernel = uniforms.vertical_kernel;

    let snapshot = FrameSnapshot {
        camera_to_world: Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0)),
        light_position: Vec3::new(-4.0, 8.0, 0.5),
    };
    uniforms.update(&snapshot, extent(800, 600), &camera);

    assert_eq!(uniforms.scene.camera_pos, Vec4::new(1.0, 2.0, 3.0, 1.0));
    assert_eq!(uniforms.light.position.truncate(), snapshot.light_position);
    assert_eq!(uniforms.vertical_kernel, kernel);
}

#[rstest]
#[case::landscape(extent(1920, 1080))]
#[case::portrait(extent(600, 900))]
#[case::square(extent(512, 512))]
fn test_projection_tracks_aspect(#[case] size: vk::Extent2D) {
    let camera = CameraConfig::default();
    let scene = scene_uniform(Mat4::IDENTITY, size, &camera);

    let aspect = size.width as f32 / size.height as f32;
    let ratio = scene.projection.y_axis.y.abs() / scene.projection.x_axis.x;
    assert!((ratio - aspect).abs() < 1e-4);
    assert!(scene.projection.y_axis.y < 0.0);
    assert!(scene.proj_cam.abs_diff_eq(scene.projection * scene.camera, 1e-6));
}

/// Frames that do not present leave the user state where it was.
#[test]
fn test_snapshot_is_a_copy() {
    let camera = CameraConfig::default();
    let mut user = UserState::new(&camera);
    user.set(InputFlags::FORWARD, true);

    let before = user.snapshot();
    user.advance(0.5, &camera);

    assert_ne!(user.snapshot(), before);
    assert_eq!(before.camera_to_world, Mat4::from_translation(camera.start_position));
}
