//! Per-frame context for rendering.

use ash::vk;

/// Context for the frame currently being recorded.
pub struct FrameContext {
    /// Command buffer to record rendering commands into.
    pub command_buffer: vk::CommandBuffer,
    /// Index of the acquired swapchain image.
    pub image_index: u32,
    /// Current swapchain extent.
    pub extent: vk::Extent2D,
    /// Delta time since the last frame in seconds.
    pub dt: f32,
    /// Frames completed before this one.
    pub frame_number: u64,
}
