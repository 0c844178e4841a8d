//! Vulkan context: instance, device, queue, surface and memory allocator.
//!
//! Everything above this module borrows the context; it is created first and destroyed last.

pub mod allocator;
pub mod barriers;
pub mod command;
pub mod debug;
pub mod device;
pub mod instance;
pub mod layout;
pub mod swapchain;

use std::mem::ManuallyDrop;
use std::sync::Arc;

use ash::vk;
use gpu_allocator::vulkan::Allocator;
use parking_lot::Mutex;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle, RawWindowHandle};

use crate::error::{RenderError, RenderResult};

use self::device::{PresentTarget, SelectedDevice};

struct PresentationSurface {
    loader: ash::khr::surface::Instance,
    surface: vk::SurfaceKHR,
}

/// Owner of the core Vulkan objects.
pub struct VulkanContext {
    /// Keeps the loader library alive.
    _entry: ash::Entry,
    instance: ash::Instance,
    debug_utils: Option<ash::ext::debug_utils::Instance>,
    debug_messenger: Option<vk::DebugUtilsMessengerEXT>,
    /// Absent for headless contexts.
    surface: Option<PresentationSurface>,
    swapchain_loader: Option<ash::khr::swapchain::Device>,
    selected: SelectedDevice,
    device: ash::Device,
    graphics_queue: vk::Queue,
    /// Dropped explicitly before the device is destroyed.
    allocator: ManuallyDrop<Arc<Mutex<Allocator>>>,
}

impl VulkanContext {
    /// Create a context able to present to `window`.
    pub fn new<W>(window: &W, validation: bool) -> RenderResult<Self>
    where
        W: HasDisplayHandle + HasWindowHandle,
    {
        let display = window
            .display_handle()
            .map_err(|e| RenderError::InitializationFailed(e.to_string()))?
            .as_raw();
        let window = window
            .window_handle()
            .map_err(|e| RenderError::InitializationFailed(e.to_string()))?
            .as_raw();

        Self::build(Some((display, window)), validation)
    }

    /// Create a context without any surface, for offscreen work and tests.
    pub fn new_headless(validation: bool) -> RenderResult<Self> {
        Self::build(None, validation)
    }

    fn build(
        window: Option<(RawDisplayHandle, RawWindowHandle)>,
        validation: bool,
    ) -> RenderResult<Self> {
        let entry = unsafe { ash::Entry::load() }.map_err(|e| {
            RenderError::InitializationFailed(format!("Failed to load Vulkan library: {}", e))
        })?;

        let bundle = instance::create_instance(&entry, window.map(|(d, _)| d), validation)?;
        let instance = bundle.instance;

        let surface = match window {
            Some((display, window)) => {
                let surface = unsafe {
                    ash_window::create_surface(&entry, &instance, display, window, None)
                }
                .map_err(|e| {
                    RenderError::InitializationFailed(format!("Failed to create surface: {:?}", e))
                })?;
                Some(PresentationSurface {
                    loader: ash::khr::surface::Instance::new(&entry, &instance),
                    surface,
                })
            }
            None => None,
        };

        let present = surface.as_ref().map(|s| PresentTarget {
            loader: &s.loader,
            surface: s.surface,
        });
        let selected = device::select_physical_device(&instance, present)?;
        let device = device::create_logical_device(&instance, &selected, surface.is_some())?;
        let graphics_queue = unsafe { device.get_device_queue(selected.graphics_queue_family, 0) };

        let swapchain_loader = surface
            .as_ref()
            .map(|_| ash::khr::swapchain::Device::new(&instance, &device));

        let allocator =
            allocator::create_allocator(&instance, selected.physical_device, device.clone())?;

        log::info!(
            "Vulkan context ready (queue family {}, presenting: {})",
            selected.graphics_queue_family,
            surface.is_some()
        );

        Ok(Self {
            _entry: entry,
            instance,
            debug_utils: bundle.debug_utils,
            debug_messenger: bundle.debug_messenger,
            surface,
            swapchain_loader,
            selected,
            device,
            graphics_queue,
            allocator: ManuallyDrop::new(Arc::new(Mutex::new(allocator))),
        })
    }

    pub fn instance(&self) -> &ash::Instance {
        &self.instance
    }

    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.selected.physical_device
    }

    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    pub fn graphics_queue_family(&self) -> u32 {
        self.selected.graphics_queue_family
    }

    pub fn sampler_anisotropy(&self) -> bool {
        self.selected.sampler_anisotropy
    }

    pub fn allocator(&self) -> Arc<Mutex<Allocator>> {
        Arc::clone(&self.allocator)
    }

    pub fn is_headless(&self) -> bool {
        self.surface.is_none()
    }

    /// Swapchain entry points; fails for headless contexts.
    pub fn swapchain_loader(&self) -> RenderResult<&ash::khr::swapchain::Device> {
        self.swapchain_loader.as_ref().ok_or_else(|| {
            RenderError::InvalidParameter("headless context has no swapchain".to_string())
        })
    }

    pub fn surface(&self) -> RenderResult<vk::SurfaceKHR> {
        self.surface
            .as_ref()
            .map(|s| s.surface)
            .ok_or_else(|| RenderError::InvalidParameter("headless context has no surface".into()))
    }

    pub fn surface_capabilities(&self) -> RenderResult<vk::SurfaceCapabilitiesKHR> {
        let surface = self.presentation_surface()?;
        unsafe {
            surface
                .loader
                .get_physical_device_surface_capabilities(self.physical_device(), surface.surface)
        }
        .map_err(|e| RenderError::creation("surface capabilities query", e))
    }

    pub fn surface_formats(&self) -> RenderResult<Vec<vk::SurfaceFormatKHR>> {
        let surface = self.presentation_surface()?;
        unsafe {
            surface
                .loader
                .get_physical_device_surface_formats(self.physical_device(), surface.surface)
        }
        .map_err(|e| RenderError::creation("surface format query", e))
    }

    pub fn surface_present_modes(&self) -> RenderResult<Vec<vk::PresentModeKHR>> {
        let surface = self.presentation_surface()?;
        unsafe {
            surface
                .loader
                .get_physical_device_surface_present_modes(self.physical_device(), surface.surface)
        }
        .map_err(|e| RenderError::creation("present mode query", e))
    }

    /// Block until the device has finished all submitted work.
    pub fn wait_idle(&self) -> RenderResult<()> {
        unsafe { self.device.device_wait_idle() }
            .map_err(|e| RenderError::submission("Failed to wait for device idle", e))
    }

    fn presentation_surface(&self) -> RenderResult<&PresentationSurface> {
        self.surface
            .as_ref()
            .ok_or_else(|| RenderError::InvalidParameter("headless context has no surface".into()))
    }
}

impl Drop for VulkanContext {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();

            // The allocator frees its device memory blocks, so it must go before the device
            ManuallyDrop::drop(&mut self.allocator);

            self.device.destroy_device(None);

            if let Some(surface) = self.surface.take() {
                surface.loader.destroy_surface(surface.surface, None);
            }

            if let (Some(debug_utils), Some(messenger)) =
                (self.debug_utils.as_ref(), self.debug_messenger.take())
            {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }

            self.instance.destroy_instance(None);
        }
    }
}
