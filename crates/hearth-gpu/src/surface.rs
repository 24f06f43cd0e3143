//! Presentable surface management.

use crate::context::DeviceContext;
use crate::error::Result;
use ash::vk;

/// Surface context for windowed rendering.
///
/// Owns the Vulkan surface and the extension loaders the swapchain needs.
/// The surface outlives every swapchain created for it; it is destroyed only
/// at shutdown, never on resize.
pub struct SurfaceContext {
    /// The Vulkan surface handle.
    pub surface: vk::SurfaceKHR,
    /// Surface extension loader.
    pub surface_loader: ash::khr::surface::Instance,
    /// Swapchain extension loader.
    pub swapchain_loader: ash::khr::swapchain::Device,
}

impl SurfaceContext {
    /// Wrap an already-created surface.
    pub(crate) fn new(
        surface: vk::SurfaceKHR,
        surface_loader: ash::khr::surface::Instance,
        context: &DeviceContext,
    ) -> Self {
        let swapchain_loader =
            ash::khr::swapchain::Device::new(context.instance(), context.device());
        Self {
            surface,
            surface_loader,
            swapchain_loader,
        }
    }

    /// Query what the surface supports on the given physical device.
    pub fn capabilities(&self, physical_device: vk::PhysicalDevice) -> Result<SurfaceCaps> {
        unsafe {
            let capabilities = self
                .surface_loader
                .get_physical_device_surface_capabilities(physical_device, self.surface)?;
            let formats = self
                .surface_loader
                .get_physical_device_surface_formats(physical_device, self.surface)?;
            let present_modes = self
                .surface_loader
                .get_physical_device_surface_present_modes(physical_device, self.surface)?;

            Ok(SurfaceCaps {
                capabilities,
                formats,
                present_modes,
            })
        }
    }

    /// Destroy the surface.
    ///
    /// # Safety
    /// No swapchain for this surface may still exist.
    pub unsafe fn destroy(&self) {
        self.surface_loader.destroy_surface(self.surface, None);
    }
}

/// Surface capability query result.
pub struct SurfaceCaps {
    /// Raw surface capabilities.
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    /// Supported surface formats.
    pub formats: Vec<vk::SurfaceFormatKHR>,
    /// Supported present modes.
    pub present_modes: Vec<vk::PresentModeKHR>,
}
