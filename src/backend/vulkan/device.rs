//! Physical device selection and logical device creation.

use ash::vk;

use crate::error::{RenderError, RenderResult};

/// Surface a queue family must be able to present to.
#[derive(Clone, Copy)]
pub struct PresentTarget<'a> {
    pub loader: &'a ash::khr::surface::Instance,
    pub surface: vk::SurfaceKHR,
}

/// The chosen GPU and its graphics queue family.
#[derive(Debug, Clone, Copy)]
pub struct SelectedDevice {
    pub physical_device: vk::PhysicalDevice,
    pub graphics_queue_family: u32,
    pub sampler_anisotropy: bool,
}

/// Select the best physical device for rendering.
///
/// Prefers discrete GPUs over integrated ones. A device qualifies only if it has a graphics
/// queue family that can also present to `present` when one is given.
pub fn select_physical_device(
    instance: &ash::Instance,
    present: Option<PresentTarget<'_>>,
) -> RenderResult<SelectedDevice> {
    let devices = unsafe { instance.enumerate_physical_devices() }.map_err(|e| {
        RenderError::InitializationFailed(format!("Failed to enumerate physical devices: {:?}", e))
    })?;

    if devices.is_empty() {
        return Err(RenderError::InitializationFailed(
            "No Vulkan-capable GPU found".to_string(),
        ));
    }

    let mut best: Option<(u32, SelectedDevice)> = None;

    for device in devices {
        let Some(family) = find_graphics_queue_family(instance, device, present) else {
            continue;
        };

        let properties = unsafe { instance.get_physical_device_properties(device) };
        let features = unsafe { instance.get_physical_device_features(device) };

        let score = device_score(
            properties.device_type,
            properties.limits.max_image_dimension2_d,
        );

        log::info!(
            "Found GPU: {:?} (type: {:?}, score: {})",
            properties.device_name_as_c_str().unwrap_or(c"unknown"),
            properties.device_type,
            score
        );

        if best.map_or(true, |(best_score, _)| score > best_score) {
            best = Some((
                score,
                SelectedDevice {
                    physical_device: device,
                    graphics_queue_family: family,
                    sampler_anisotropy: features.sampler_anisotropy == vk::TRUE,
                },
            ));
        }
    }

    best.map(|(_, selected)| selected)
        .ok_or_else(|| RenderError::InitializationFailed("No suitable GPU found".to_string()))
}

fn device_score(device_type: vk::PhysicalDeviceType, max_image_dimension: u32) -> u32 {
    let type_score = match device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 1000,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 100,
        vk::PhysicalDeviceType::VIRTUAL_GPU => 50,
        _ => 1,
    };
    type_score + max_image_dimension / 1024
}

fn find_graphics_queue_family(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    present: Option<PresentTarget<'_>>,
) -> Option<u32> {
    let families =
        unsafe { instance.get_physical_device_queue_family_properties(physical_device) };

    families.iter().enumerate().find_map(|(index, family)| {
        let index = index as u32;
        if !family.queue_flags.contains(vk::QueueFlags::GRAPHICS) {
            return None;
        }
        let can_present = match present {
            Some(target) => unsafe {
                target.loader.get_physical_device_surface_support(
                    physical_device,
                    index,
                    target.surface,
                )
            }
            .unwrap_or(false),
            None => true,
        };
        can_present.then_some(index)
    })
}

/// Create a logical device with one graphics queue.
pub fn create_logical_device(
    instance: &ash::Instance,
    selected: &SelectedDevice,
    with_swapchain: bool,
) -> RenderResult<ash::Device> {
    let queue_priorities = [1.0f32];
    let queue_create_infos = [vk::DeviceQueueCreateInfo::default()
        .queue_family_index(selected.graphics_queue_family)
        .queue_priorities(&queue_priorities)];

    let mut device_extensions = Vec::new();
    if with_swapchain {
        device_extensions.push(ash::khr::swapchain::NAME.as_ptr());
    }
    #[cfg(target_os = "macos")]
    device_extensions.push(ash::khr::portability_subset::NAME.as_ptr());

    let features =
        vk::PhysicalDeviceFeatures::default().sampler_anisotropy(selected.sampler_anisotropy);

    let create_info = vk::DeviceCreateInfo::default()
        .queue_create_infos(&queue_create_infos)
        .enabled_extension_names(&device_extensions)
        .enabled_features(&features);

    unsafe { instance.create_device(selected.physical_device, &create_info, None) }.map_err(|e| {
        RenderError::InitializationFailed(format!("Failed to create logical device: {:?}", e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discrete_gpus_outrank_integrated() {
        let discrete = device_score(vk::PhysicalDeviceType::DISCRETE_GPU, 8192);
        let integrated = device_score(vk::PhysicalDeviceType::INTEGRATED_GPU, 16384);
        assert!(discrete > integrated);
    }

    #[test]
    fn software_devices_still_score() {
        assert!(device_score(vk::PhysicalDeviceType::CPU, 4096) > 0);
    }
}
