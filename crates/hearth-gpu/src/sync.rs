//! Synchronization primitives.

use crate::error::Result;
use ash::vk;

/// Create a semaphore.
///
/// # Safety
/// The device must be valid.
pub unsafe fn create_semaphore(device: &ash::Device) -> Result<vk::Semaphore> {
    let create_info = vk::SemaphoreCreateInfo::default();
    let semaphore = device.create_semaphore(&create_info, None)?;
    Ok(semaphore)
}

/// Create a fence, optionally in the signaled state.
///
/// # Safety
/// The device must be valid.
pub unsafe fn create_fence(device: &ash::Device, signaled: bool) -> Result<vk::Fence> {
    let flags = if signaled {
        vk::FenceCreateFlags::SIGNALED
    } else {
        vk::FenceCreateFlags::empty()
    };

    let create_info = vk::FenceCreateInfo::default().flags(flags);
    let fence = device.create_fence(&create_info, None)?;
    Ok(fence)
}

/// Block until a fence signals. Timeouts use the maximum representable
/// value, i.e. wait forever.
///
/// # Safety
/// The device and fence must be valid.
pub unsafe fn wait_for_fence(device: &ash::Device, fence: vk::Fence) -> Result<()> {
    device.wait_for_fences(&[fence], true, u64::MAX)?;
    Ok(())
}

/// Reset a fence to the unsignaled state.
///
/// # Safety
/// The device and fence must be valid.
pub unsafe fn reset_fence(device: &ash::Device, fence: vk::Fence) -> Result<()> {
    device.reset_fences(&[fence])?;
    Ok(())
}

/// One frame slot's synchronization set.
pub struct FrameSync {
    /// Signaled when the acquired swapchain image is ready to be written.
    pub image_available: vk::Semaphore,
    /// Signaled when rendering to the image is complete.
    pub render_finished: vk::Semaphore,
    /// Signaled when the GPU has finished the slot's submitted work.
    pub in_flight: vk::Fence,
}

impl FrameSync {
    /// Create a sync set; the fence starts signaled so the first frame does
    /// not wait on work that was never submitted.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn new(device: &ash::Device) -> Result<Self> {
        Ok(Self {
            image_available: create_semaphore(device)?,
            render_finished: create_semaphore(device)?,
            in_flight: create_fence(device, true)?,
        })
    }

    /// Destroy the set.
    ///
    /// # Safety
    /// The device must be valid and the primitives must not be in use.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_semaphore(self.image_available, None);
        device.destroy_semaphore(self.render_finished, None);
        device.destroy_fence(self.in_flight, None);
    }
}
