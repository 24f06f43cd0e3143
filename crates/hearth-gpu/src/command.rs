//! Command pool and per-image command buffer management.

use crate::error::Result;
use ash::vk;

/// Command pool for allocating command buffers.
pub struct CommandPool {
    pool: vk::CommandPool,
    queue_family: u32,
}

impl CommandPool {
    /// Create a new command pool.
    ///
    /// # Safety
    /// The device must be valid and the queue family must exist.
    pub unsafe fn new(
        device: &ash::Device,
        queue_family: u32,
        flags: vk::CommandPoolCreateFlags,
    ) -> Result<Self> {
        let create_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue_family)
            .flags(flags);

        let pool = device.create_command_pool(&create_info, None)?;

        Ok(Self { pool, queue_family })
    }

    /// Get the raw pool handle.
    pub fn handle(&self) -> vk::CommandPool {
        self.pool
    }

    /// Get the queue family index.
    pub fn queue_family(&self) -> u32 {
        self.queue_family
    }

    /// Allocate primary command buffers.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn allocate(
        &self,
        device: &ash::Device,
        count: u32,
    ) -> Result<Vec<vk::CommandBuffer>> {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);

        let buffers = device.allocate_command_buffers(&alloc_info)?;
        Ok(buffers)
    }

    /// Destroy the command pool.
    ///
    /// # Safety
    /// The device must be valid and no buffer from this pool may be in use.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_command_pool(self.pool, None);
    }
}

/// Record, submit, and synchronously wait out a one-time command buffer.
///
/// Blocks on queue-wait-idle; acceptable for load-time work, not per-frame.
///
/// # Safety
/// All handles must be valid.
pub unsafe fn execute_single_time_commands<F>(
    device: &ash::Device,
    pool: &CommandPool,
    queue: vk::Queue,
    record: F,
) -> Result<()>
where
    F: FnOnce(vk::CommandBuffer) -> Result<()>,
{
    let cmd = pool.allocate(device, 1)?[0];

    let begin_info = vk::CommandBufferBeginInfo::default()
        .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
    device.begin_command_buffer(cmd, &begin_info)?;

    let recorded = record(cmd);
    if recorded.is_err() {
        device.free_command_buffers(pool.handle(), &[cmd]);
        return recorded;
    }

    device.end_command_buffer(cmd)?;

    let cmd_buffers = [cmd];
    let submit_info = vk::SubmitInfo::default().command_buffers(&cmd_buffers);
    device.queue_submit(queue, &[submit_info], vk::Fence::null())?;
    device.queue_wait_idle(queue)?;

    device.free_command_buffers(pool.handle(), &[cmd]);

    Ok(())
}

/// Per-swapchain-image command buffers.
///
/// Buffers are 1:1 with swapchain images and reallocated whenever the
/// swapchain is recreated.
pub struct CommandExecutor {
    pool: CommandPool,
    buffers: Vec<vk::CommandBuffer>,
}

impl CommandExecutor {
    /// Create the executor with an empty buffer set.
    ///
    /// # Safety
    /// The device must be valid and the queue family must exist.
    pub unsafe fn new(device: &ash::Device, queue_family: u32) -> Result<Self> {
        let pool = CommandPool::new(
            device,
            queue_family,
            vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
        )?;
        Ok(Self {
            pool,
            buffers: Vec::new(),
        })
    }

    /// Allocate one command buffer per swapchain image, releasing any
    /// previous set first.
    ///
    /// # Safety
    /// The device must be valid and no previous buffer may be in use.
    pub unsafe fn allocate(&mut self, device: &ash::Device, image_count: usize) -> Result<()> {
        self.free_buffers(device);
        self.buffers = self.pool.allocate(device, image_count as u32)?;
        Ok(())
    }

    /// Command buffer for the given swapchain image index.
    pub fn buffer(&self, image_index: u32) -> vk::CommandBuffer {
        self.buffers[image_index as usize]
    }

    /// Number of allocated command buffers.
    pub fn count(&self) -> usize {
        self.buffers.len()
    }

    /// Free the command buffers without destroying the pool.
    ///
    /// # Safety
    /// The device must be valid and no buffer may be in use.
    pub unsafe fn free_buffers(&mut self, device: &ash::Device) {
        if !self.buffers.is_empty() {
            device.free_command_buffers(self.pool.handle(), &self.buffers);
            self.buffers.clear();
        }
    }

    /// Destroy the executor and its pool.
    ///
    /// # Safety
    /// The device must be valid and no buffer may be in use.
    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        self.free_buffers(device);
        self.pool.destroy(device);
    }
}
