//! Vulkan swapchain creation, recreation, acquire and present.

use ash::vk;

use crate::error::{RenderError, RenderResult};

use super::VulkanContext;

/// What differs between a recreated swapchain and its predecessor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SwapchainChanges {
    pub format_changed: bool,
    pub size_changed: bool,
}

impl SwapchainChanges {
    pub fn any(&self) -> bool {
        self.format_changed || self.size_changed
    }
}

/// An acquired backbuffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquiredImage {
    pub index: u32,
    /// The image is usable but the swapchain no longer matches the surface exactly.
    pub suboptimal: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    /// Suboptimal or out of date; the swapchain must be recreated before the next frame.
    Stale,
}

/// Vulkan swapchain and the views of its images.
pub struct Swapchain {
    handle: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    format: vk::SurfaceFormatKHR,
    extent: vk::Extent2D,
    vsync: bool,
    device: ash::Device,
    loader: ash::khr::swapchain::Device,
}

impl Swapchain {
    pub fn new(context: &VulkanContext, window_extent: vk::Extent2D, vsync: bool) -> RenderResult<Self> {
        let loader = context.swapchain_loader()?.clone();
        let mut swapchain = Self {
            handle: vk::SwapchainKHR::null(),
            images: Vec::new(),
            image_views: Vec::new(),
            format: vk::SurfaceFormatKHR::default(),
            extent: vk::Extent2D::default(),
            vsync,
            device: context.device().clone(),
            loader,
        };
        swapchain.build(context, window_extent)?;
        Ok(swapchain)
    }

    /// Rebuild for the current surface state, reusing the old swapchain as the base.
    pub fn recreate(
        &mut self,
        context: &VulkanContext,
        window_extent: vk::Extent2D,
    ) -> RenderResult<SwapchainChanges> {
        let old_format = self.format.format;
        let old_extent = self.extent;

        self.build(context, window_extent)?;

        let changes = SwapchainChanges {
            format_changed: self.format.format != old_format,
            size_changed: self.extent != old_extent,
        };
        log::info!(
            "Recreated swapchain: {}x{} with {} images ({:?})",
            self.extent.width,
            self.extent.height,
            self.images.len(),
            changes
        );
        Ok(changes)
    }

    fn build(&mut self, context: &VulkanContext, window_extent: vk::Extent2D) -> RenderResult<()> {
        let capabilities = context.surface_capabilities()?;
        let format = choose_surface_format(&context.surface_formats()?)?;
        let present_mode = choose_present_mode(&context.surface_present_modes()?, self.vsync);
        let extent = choose_extent(&capabilities, window_extent);
        let image_count = choose_image_count(&capabilities);

        let old_swapchain = self.handle;
        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(context.surface()?)
            .min_image_count(image_count)
            .image_format(format.format)
            .image_color_space(format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain);

        let handle = unsafe { self.loader.create_swapchain(&create_info, None) }
            .map_err(|e| RenderError::creation("swapchain", e))?;

        // The old swapchain is retired by the create call and can go now
        self.destroy_views();
        if old_swapchain != vk::SwapchainKHR::null() {
            unsafe { self.loader.destroy_swapchain(old_swapchain, None) };
        }
        self.handle = handle;

        self.images = unsafe { self.loader.get_swapchain_images(handle) }
            .map_err(|e| RenderError::creation("swapchain image list", e))?;
        self.format = format;
        self.extent = extent;

        for &image in &self.images {
            let view = create_color_view(&self.device, image, format.format)?;
            self.image_views.push(view);
        }

        log::info!(
            "Created Vulkan swapchain: {}x{} with {} images ({:?}, {:?})",
            extent.width,
            extent.height,
            self.images.len(),
            format.format,
            present_mode
        );

        Ok(())
    }

    /// Acquire the next backbuffer, blocking until the presentation engine frees one.
    ///
    /// Returns `SurfaceStale` when the swapchain is out of date.
    pub fn acquire(&self, image_available: vk::Semaphore) -> RenderResult<AcquiredImage> {
        let result = unsafe {
            self.loader
                .acquire_next_image(self.handle, u64::MAX, image_available, vk::Fence::null())
        };

        match result {
            Ok((index, suboptimal)) => Ok(AcquiredImage { index, suboptimal }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Err(RenderError::SurfaceStale),
            Err(e) => Err(RenderError::submission("Failed to acquire swapchain image", e)),
        }
    }

    /// Queue `image_index` for presentation once `render_finished` signals.
    pub fn present(
        &self,
        queue: vk::Queue,
        render_finished: vk::Semaphore,
        image_index: u32,
    ) -> RenderResult<PresentOutcome> {
        let wait_semaphores = [render_finished];
        let swapchains = [self.handle];
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        match unsafe { self.loader.queue_present(queue, &present_info) } {
            Ok(false) => Ok(PresentOutcome::Presented),
            Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::Stale),
            Err(e) => Err(RenderError::submission("Failed to present", e)),
        }
    }

    pub fn format(&self) -> vk::Format {
        self.format.format
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn image_views(&self) -> &[vk::ImageView] {
        &self.image_views
    }

    fn destroy_views(&mut self) {
        for view in self.image_views.drain(..) {
            unsafe { self.device.destroy_image_view(view, None) };
        }
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        self.destroy_views();
        if self.handle != vk::SwapchainKHR::null() {
            unsafe { self.loader.destroy_swapchain(self.handle, None) };
            self.handle = vk::SwapchainKHR::null();
        }
    }
}

fn create_color_view(
    device: &ash::Device,
    image: vk::Image,
    format: vk::Format,
) -> RenderResult<vk::ImageView> {
    let view_info = vk::ImageViewCreateInfo::default()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(format)
        .subresource_range(
            vk::ImageSubresourceRange::default()
                .aspect_mask(vk::ImageAspectFlags::COLOR)
                .level_count(1)
                .layer_count(1),
        );

    unsafe { device.create_image_view(&view_info, None) }
        .map_err(|e| RenderError::creation("swapchain image view", e))
}

/// Prefer an sRGB backbuffer; otherwise take what the surface offers first.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> RenderResult<vk::SurfaceFormatKHR> {
    let preferred = formats.iter().find(|f| {
        matches!(f.format, vk::Format::B8G8R8A8_SRGB | vk::Format::R8G8B8A8_SRGB)
            && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
    });

    preferred
        .or_else(|| formats.first())
        .copied()
        .ok_or_else(|| RenderError::InitializationFailed("Surface offers no formats".to_string()))
}

pub fn choose_present_mode(modes: &[vk::PresentModeKHR], vsync: bool) -> vk::PresentModeKHR {
    if vsync {
        return vk::PresentModeKHR::FIFO;
    }
    [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::IMMEDIATE]
        .into_iter()
        .find(|mode| modes.contains(mode))
        // Always available
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

pub fn choose_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    window_extent: vk::Extent2D,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }
    vk::Extent2D {
        width: window_extent.width.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ),
        height: window_extent.height.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ),
    }
}

/// One more than the minimum, so the application never waits on the driver's last image.
pub fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let desired = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 {
        desired.min(capabilities.max_image_count)
    } else {
        desired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn surface_format(format: vk::Format) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }
    }

    #[test]
    fn srgb_format_is_preferred() {
        let formats = [
            surface_format(vk::Format::B8G8R8A8_UNORM),
            surface_format(vk::Format::B8G8R8A8_SRGB),
        ];
        let chosen = choose_surface_format(&formats).unwrap();
        assert_eq!(chosen.format, vk::Format::B8G8R8A8_SRGB);
    }

    #[test]
    fn first_format_is_the_fallback() {
        let formats = [surface_format(vk::Format::A2B10G10R10_UNORM_PACK32)];
        let chosen = choose_surface_format(&formats).unwrap();
        assert_eq!(chosen.format, vk::Format::A2B10G10R10_UNORM_PACK32);
        assert!(choose_surface_format(&[]).is_err());
    }

    #[test]
    fn present_mode_follows_vsync() {
        let modes = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];
        assert_eq!(choose_present_mode(&modes, true), vk::PresentModeKHR::FIFO);
        assert_eq!(choose_present_mode(&modes, false), vk::PresentModeKHR::MAILBOX);
        assert_eq!(
            choose_present_mode(&[vk::PresentModeKHR::FIFO], false),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn extent_clamps_only_when_surface_leaves_it_open() {
        let mut capabilities = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D { width: 800, height: 600 },
            min_image_extent: vk::Extent2D { width: 1, height: 1 },
            max_image_extent: vk::Extent2D { width: 4096, height: 4096 },
            ..Default::default()
        };
        let window = vk::Extent2D { width: 9000, height: 300 };
        assert_eq!(choose_extent(&capabilities, window), capabilities.current_extent);

        capabilities.current_extent = vk::Extent2D { width: u32::MAX, height: u32::MAX };
        assert_eq!(
            choose_extent(&capabilities, window),
            vk::Extent2D { width: 4096, height: 300 }
        );
    }

    #[test]
    fn image_count_respects_maximum() {
        let mut capabilities = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 0,
            ..Default::default()
        };
        assert_eq!(choose_image_count(&capabilities), 3);
        capabilities.max_image_count = 2;
        assert_eq!(choose_image_count(&capabilities), 2);
    }

    #[test]
    fn changes_report_any() {
        assert!(!SwapchainChanges::default().any());
        assert!(SwapchainChanges {
            format_changed: false,
            size_changed: true
        }
        .any());
    }
}
