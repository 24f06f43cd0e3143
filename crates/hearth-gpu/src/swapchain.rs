//! Swapchain management.

use crate::error::{GpuError, Result};
use crate::surface::SurfaceContext;
use ash::vk;

/// Outcome of presenting an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    /// The image was presented and the swapchain still matches the surface.
    Presented,
    /// The image may or may not have been shown; the swapchain no longer
    /// matches the surface and must be recreated before the next frame.
    Stale,
}

/// Select a surface format: prefer 8-bit sRGB, otherwise the first entry the
/// device reports. The result is always a member of `available`.
pub fn select_surface_format(available: &[vk::SurfaceFormatKHR]) -> vk::SurfaceFormatKHR {
    for format in available {
        if format.format == vk::Format::B8G8R8A8_SRGB
            && format.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        {
            return *format;
        }
    }
    available[0]
}

/// Select a present mode: the preferred one iff the device reports it,
/// otherwise FIFO (which is always supported).
pub fn select_present_mode(
    available: &[vk::PresentModeKHR],
    preferred: vk::PresentModeKHR,
) -> vk::PresentModeKHR {
    if available.contains(&preferred) {
        preferred
    } else {
        vk::PresentModeKHR::FIFO
    }
}

/// Select the swapchain extent: the surface's current extent unless it is
/// the "any size" sentinel, in which case the requested size clamped into
/// the surface's bounds.
pub fn select_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    width: u32,
    height: u32,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        capabilities.current_extent
    } else {
        vk::Extent2D {
            width: width.clamp(
                capabilities.min_image_extent.width,
                capabilities.max_image_extent.width,
            ),
            height: height.clamp(
                capabilities.min_image_extent.height,
                capabilities.max_image_extent.height,
            ),
        }
    }
}

/// Select the image count: min + 1, capped by the maximum when one is
/// declared (0 means unbounded).
pub fn select_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let mut count = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 && count > capabilities.max_image_count {
        count = capabilities.max_image_count;
    }
    count
}

/// The presentable image ring.
///
/// Images are borrowed from the presentation engine and never freed
/// individually; the views are owned. Recreated wholesale on resize or when
/// presentation reports the swapchain out of date.
pub struct SwapchainManager {
    pub swapchain: vk::SwapchainKHR,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
}

impl SwapchainManager {
    /// Create a swapchain for the surface.
    ///
    /// # Safety
    /// The device, surface, and queue family must be valid.
    pub unsafe fn new(
        device: &ash::Device,
        physical_device: vk::PhysicalDevice,
        surface: &SurfaceContext,
        queue_family: u32,
        width: u32,
        height: u32,
        preferred_present_mode: vk::PresentModeKHR,
    ) -> Result<Self> {
        let caps = surface.capabilities(physical_device)?;
        if caps.formats.is_empty() {
            return Err(GpuError::SwapchainCreation(
                "surface reports no formats".to_string(),
            ));
        }

        let surface_format = select_surface_format(&caps.formats);
        let present_mode = select_present_mode(&caps.present_modes, preferred_present_mode);
        let extent = select_extent(&caps.capabilities, width, height);
        let image_count = select_image_count(&caps.capabilities);

        let queue_families = [queue_family];
        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface.surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .queue_family_indices(&queue_families)
            .pre_transform(caps.capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true);

        let swapchain = surface
            .swapchain_loader
            .create_swapchain(&create_info, None)
            .map_err(|e| GpuError::SwapchainCreation(e.to_string()))?;

        let images = surface.swapchain_loader.get_swapchain_images(swapchain)?;

        let image_views: Vec<vk::ImageView> = images
            .iter()
            .map(|&image| {
                let view_info = vk::ImageViewCreateInfo::default()
                    .image(image)
                    .view_type(vk::ImageViewType::TYPE_2D)
                    .format(surface_format.format)
                    .components(vk::ComponentMapping::default())
                    .subresource_range(
                        vk::ImageSubresourceRange::default()
                            .aspect_mask(vk::ImageAspectFlags::COLOR)
                            .base_mip_level(0)
                            .level_count(1)
                            .base_array_layer(0)
                            .layer_count(1),
                    );

                device.create_image_view(&view_info, None)
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;

        tracing::info!(
            "Swapchain created: {}x{}, {} images, {:?}, {:?}",
            extent.width,
            extent.height,
            images.len(),
            surface_format.format,
            present_mode,
        );

        Ok(Self {
            swapchain,
            images,
            image_views,
            format: surface_format.format,
            extent,
        })
    }

    /// Number of images in the ring.
    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Acquire the next image, signaling `semaphore` when it is ready.
    ///
    /// An out-of-date swapchain surfaces as [`GpuError::SwapchainStale`]; no
    /// image was acquired in that case.
    ///
    /// # Safety
    /// All handles must be valid.
    pub unsafe fn acquire(
        &self,
        surface: &SurfaceContext,
        semaphore: vk::Semaphore,
    ) -> Result<(u32, bool)> {
        let result = surface.swapchain_loader.acquire_next_image(
            self.swapchain,
            u64::MAX,
            semaphore,
            vk::Fence::null(),
        );

        match result {
            Ok((index, suboptimal)) => Ok((index, suboptimal)),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Err(GpuError::SwapchainStale),
            Err(e) => Err(GpuError::from(e)),
        }
    }

    /// Present an image, waiting on the given semaphores.
    ///
    /// # Safety
    /// All handles must be valid and the image must have been acquired.
    pub unsafe fn present(
        &self,
        surface: &SurfaceContext,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphores: &[vk::Semaphore],
    ) -> Result<PresentOutcome> {
        let swapchains = [self.swapchain];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = surface.swapchain_loader.queue_present(queue, &present_info);

        match result {
            Ok(false) => Ok(PresentOutcome::Presented),
            Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::Stale),
            Err(e) => Err(GpuError::from(e)),
        }
    }

    /// Destroy the image views and the swapchain, leaving the surface alone.
    ///
    /// # Safety
    /// No GPU work may still reference the swapchain.
    pub unsafe fn destroy(&mut self, device: &ash::Device, surface: &SurfaceContext) {
        for &view in &self.image_views {
            device.destroy_image_view(view, None);
        }
        self.image_views.clear();
        self.images.clear();
        surface
            .swapchain_loader
            .destroy_swapchain(self.swapchain, None);
        self.swapchain = vk::SwapchainKHR::null();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space,
        }
    }

    fn caps(
        min_count: u32,
        max_count: u32,
        current: (u32, u32),
        min_extent: (u32, u32),
        max_extent: (u32, u32),
    ) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min_count,
            max_image_count: max_count,
            current_extent: vk::Extent2D {
                width: current.0,
                height: current.1,
            },
            min_image_extent: vk::Extent2D {
                width: min_extent.0,
                height: min_extent.1,
            },
            max_image_extent: vk::Extent2D {
                width: max_extent.0,
                height: max_extent.1,
            },
            ..Default::default()
        }
    }

    #[test]
    fn preferred_srgb_format_wins_when_supported() {
        let available = [
            format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        let selected = select_surface_format(&available);
        assert_eq!(selected.format, vk::Format::B8G8R8A8_SRGB);
    }

    #[test]
    fn format_fallback_stays_in_supported_list() {
        let available = [
            format(vk::Format::R5G6B5_UNORM_PACK16, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        let selected = select_surface_format(&available);
        assert!(available.contains(&selected));
        assert_eq!(selected, available[0]);
    }

    #[test]
    fn present_mode_is_preferred_or_fifo() {
        let available = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];
        assert_eq!(
            select_present_mode(&available, vk::PresentModeKHR::MAILBOX),
            vk::PresentModeKHR::MAILBOX
        );
        assert_eq!(
            select_present_mode(&available, vk::PresentModeKHR::IMMEDIATE),
            vk::PresentModeKHR::FIFO
        );
        // Exhaustive over every (supported list, request) pair we care about:
        // the answer is always a supported mode
        for &requested in &[
            vk::PresentModeKHR::FIFO,
            vk::PresentModeKHR::MAILBOX,
            vk::PresentModeKHR::IMMEDIATE,
            vk::PresentModeKHR::FIFO_RELAXED,
        ] {
            let selected = select_present_mode(&available, requested);
            assert!(available.contains(&selected));
        }
    }

    #[test]
    fn current_extent_is_used_unless_sentinel() {
        let fixed = caps(2, 0, (800, 600), (1, 1), (4096, 4096));
        assert_eq!(
            select_extent(&fixed, 1920, 1080),
            vk::Extent2D {
                width: 800,
                height: 600
            }
        );

        let any = caps(2, 0, (u32::MAX, u32::MAX), (640, 480), (1280, 720));
        let clamped = select_extent(&any, 1920, 200);
        assert_eq!(clamped.width, 1280);
        assert_eq!(clamped.height, 480);
    }

    #[test]
    fn image_count_is_min_plus_one_capped_by_max() {
        assert_eq!(select_image_count(&caps(2, 0, (1, 1), (1, 1), (1, 1))), 3);
        assert_eq!(select_image_count(&caps(2, 3, (1, 1), (1, 1), (1, 1))), 3);
        assert_eq!(select_image_count(&caps(3, 3, (1, 1), (1, 1), (1, 1))), 3);
        // max == 0 means unbounded
        assert_eq!(select_image_count(&caps(4, 0, (1, 1), (1, 1), (1, 1))), 5);
    }
}
