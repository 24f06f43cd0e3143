//! Render context: explicit ownership of every GPU component.

use std::sync::Arc;

use ash::vk;
use hearth_gpu::frame::FrameBackend;
use hearth_gpu::render_target::RenderTargetConfig;
use hearth_gpu::sync::{reset_fence, wait_for_fence, FrameSync};
use hearth_gpu::{
    CommandExecutor, DeviceContext, DeviceContextBuilder, MemoryAllocator, PresentOutcome,
    RenderTargetSet, Result, SurfaceContext, SwapchainManager, TransferEngine,
};
use winit::window::Window;

use crate::config::AppConfig;
use crate::frame::FrameContext;

/// Owns the window and every GPU component, constructed in dependency order
/// and destroyed in reverse.
///
/// The device context is the root: everything else borrows its handles, so
/// it is dropped last (field order keeps that true for the non-`Drop`
/// wrappers torn down explicitly in [`RenderContext::cleanup`]).
pub struct RenderContext {
    window: Arc<Window>,
    surface: SurfaceContext,
    allocator: MemoryAllocator,
    transfer: TransferEngine,
    swapchain: SwapchainManager,
    render_target: RenderTargetSet,
    executor: CommandExecutor,
    frames: Vec<FrameSync>,
    present_mode: vk::PresentModeKHR,
    device: DeviceContext,
}

impl RenderContext {
    /// Bring up the full rendering stack against the given window.
    pub fn new(window: Arc<Window>, config: &AppConfig) -> Result<Self> {
        let (device, surface) = DeviceContextBuilder::new()
            .app_name(&config.title)
            .validation(config.validation)
            .build_presentable(window.as_ref())?;

        let allocator = MemoryAllocator::new(&device);
        let transfer = TransferEngine::new(&device)?;

        let size = window.inner_size();
        let swapchain = unsafe {
            SwapchainManager::new(
                device.device(),
                device.physical_device(),
                &surface,
                device.graphics_queue_family(),
                size.width.max(1),
                size.height.max(1),
                config.present_mode,
            )
        }?;

        let render_target = unsafe {
            RenderTargetSet::new(
                device.device(),
                &allocator,
                swapchain.format,
                swapchain.extent,
                &swapchain.image_views,
                RenderTargetConfig {
                    clear_color: config.clear_color,
                    depth: config.depth,
                    ..Default::default()
                },
            )
        }?;

        let mut executor =
            unsafe { CommandExecutor::new(device.device(), device.graphics_queue_family()) }?;
        unsafe { executor.allocate(device.device(), swapchain.image_count()) }?;

        let mut frames = Vec::with_capacity(config.frames_in_flight);
        for _ in 0..config.frames_in_flight {
            frames.push(unsafe { FrameSync::new(device.device()) }?);
        }

        Ok(Self {
            window,
            surface,
            allocator,
            transfer,
            swapchain,
            render_target,
            executor,
            frames,
            present_mode: config.present_mode,
            device,
        })
    }

    /// The window being rendered to.
    pub fn window(&self) -> &Arc<Window> {
        &self.window
    }

    /// The device context.
    pub fn device_context(&self) -> &DeviceContext {
        &self.device
    }

    /// The Vulkan device handle.
    pub fn device(&self) -> &ash::Device {
        self.device.device()
    }

    /// The memory allocator.
    pub fn allocator(&self) -> &MemoryAllocator {
        &self.allocator
    }

    /// The staged transfer engine.
    pub fn transfer(&self) -> &TransferEngine {
        &self.transfer
    }

    /// The render pass pipelines are built against.
    pub fn render_pass(&self) -> vk::RenderPass {
        self.render_target.render_pass()
    }

    /// Current swapchain extent.
    pub fn extent(&self) -> vk::Extent2D {
        self.swapchain.extent
    }

    /// Width / height of the current extent.
    pub fn aspect_ratio(&self) -> f32 {
        self.swapchain.extent.width as f32 / self.swapchain.extent.height.max(1) as f32
    }

    /// Number of frame-sync slots.
    pub fn frames_in_flight(&self) -> usize {
        self.frames.len()
    }

    /// Number of swapchain images (== framebuffers == command buffers).
    pub fn image_count(&self) -> usize {
        self.swapchain.image_count()
    }

    /// Command buffer recorded for the given swapchain image.
    pub fn command_buffer(&self, image_index: u32) -> vk::CommandBuffer {
        self.executor.buffer(image_index)
    }

    /// Begin the default render pass for this frame.
    pub fn begin_render_pass(&self, frame: &FrameContext) {
        unsafe {
            self.render_target
                .begin(self.device.device(), frame.command_buffer, frame.image_index);
        }
    }

    /// End the default render pass.
    pub fn end_render_pass(&self, frame: &FrameContext) {
        unsafe {
            self.render_target
                .end(self.device.device(), frame.command_buffer);
        }
    }

    /// Tear down and rebuild everything derived from the swapchain.
    ///
    /// Order matters: device idle, then command buffers, framebuffers,
    /// image views and swapchain are destroyed (the surface survives),
    /// then each is rebuilt against the new extent.
    pub fn recreate_swapchain(&mut self, width: u32, height: u32) -> Result<()> {
        self.device.wait_idle()?;

        let device = self.device.device();
        unsafe {
            self.executor.free_buffers(device);
            self.render_target
                .destroy_framebuffers(device, &self.allocator);
            self.swapchain.destroy(device, &self.surface);
        }

        self.swapchain = unsafe {
            SwapchainManager::new(
                device,
                self.device.physical_device(),
                &self.surface,
                self.device.graphics_queue_family(),
                width.max(1),
                height.max(1),
                self.present_mode,
            )
        }?;

        unsafe {
            self.render_target.rebuild(
                device,
                &self.allocator,
                self.swapchain.extent,
                &self.swapchain.image_views,
            )?;
            self.executor.allocate(device, self.swapchain.image_count())?;
        }

        debug_assert_eq!(
            self.render_target.framebuffer_count(),
            self.swapchain.image_count()
        );
        debug_assert_eq!(self.executor.count(), self.swapchain.image_count());

        Ok(())
    }

    /// Destroy every GPU component in reverse dependency order.
    ///
    /// The device context itself is dropped with the struct, after
    /// everything that borrows it is gone.
    pub fn cleanup(&mut self) {
        if let Err(e) = self.device.wait_idle() {
            tracing::error!("wait_idle failed during cleanup: {e}");
        }

        let device = self.device.device();
        unsafe {
            for frame in &self.frames {
                frame.destroy(device);
            }
            self.frames.clear();

            self.executor.destroy(device);
            self.render_target.destroy(device, &self.allocator);
            self.swapchain.destroy(device, &self.surface);
            self.transfer.destroy();
            self.surface.destroy();
        }

        let leaked = self.allocator.allocation_count();
        if leaked > 0 {
            tracing::warn!("{leaked} device memory allocations still alive at shutdown");
        }
    }
}

impl FrameBackend for RenderContext {
    fn wait_fence(&mut self, slot: usize) -> Result<()> {
        unsafe { wait_for_fence(self.device.device(), self.frames[slot].in_flight) }
    }

    fn reset_fence(&mut self, slot: usize) -> Result<()> {
        unsafe { reset_fence(self.device.device(), self.frames[slot].in_flight) }
    }

    fn acquire_image(&mut self, slot: usize) -> Result<u32> {
        let (index, _suboptimal) = unsafe {
            self.swapchain
                .acquire(&self.surface, self.frames[slot].image_available)
        }?;
        Ok(index)
    }

    fn begin_commands(&mut self, image_index: u32) -> Result<()> {
        let device = self.device.device();
        let cmd = self.executor.buffer(image_index);
        unsafe {
            device.reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())?;
            let begin_info = vk::CommandBufferBeginInfo::default()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            device.begin_command_buffer(cmd, &begin_info)?;
        }
        Ok(())
    }

    fn submit_commands(&mut self, slot: usize, image_index: u32) -> Result<()> {
        let device = self.device.device();
        let cmd = self.executor.buffer(image_index);
        let sync = &self.frames[slot];

        unsafe {
            device.end_command_buffer(cmd)?;

            let wait_semaphores = [sync.image_available];
            let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
            let command_buffers = [cmd];
            let signal_semaphores = [sync.render_finished];

            let submit_info = vk::SubmitInfo::default()
                .wait_semaphores(&wait_semaphores)
                .wait_dst_stage_mask(&wait_stages)
                .command_buffers(&command_buffers)
                .signal_semaphores(&signal_semaphores);

            device.queue_submit(
                self.device.graphics_queue(),
                &[submit_info],
                sync.in_flight,
            )?;
        }
        Ok(())
    }

    fn present_image(&mut self, slot: usize, image_index: u32) -> Result<PresentOutcome> {
        unsafe {
            self.swapchain.present(
                &self.surface,
                self.device.graphics_queue(),
                image_index,
                &[self.frames[slot].render_finished],
            )
        }
    }
}
