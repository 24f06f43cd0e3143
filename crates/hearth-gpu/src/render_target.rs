//! Render pass and framebuffers derived from the swapchain.

use crate::error::{GpuError, Result};
use crate::memory::MemoryAllocator;
use ash::vk;

/// Depth buffer format used when depth is enabled.
pub const DEPTH_FORMAT: vk::Format = vk::Format::D32_SFLOAT;

/// Configuration for the render target set.
#[derive(Debug, Clone)]
pub struct RenderTargetConfig {
    /// Clear color applied when `load_op` is CLEAR.
    pub clear_color: [f32; 4],
    /// Color attachment load op.
    pub load_op: vk::AttachmentLoadOp,
    /// Color attachment store op.
    pub store_op: vk::AttachmentStoreOp,
    /// Attach a depth buffer.
    pub depth: bool,
}

impl Default for RenderTargetConfig {
    fn default() -> Self {
        Self {
            clear_color: [0.0, 0.0, 0.0, 1.0],
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::STORE,
            depth: false,
        }
    }
}

/// Depth attachment shared by all framebuffers.
struct DepthTarget {
    image: vk::Image,
    view: vk::ImageView,
    memory: vk::DeviceMemory,
}

/// Render pass plus one framebuffer per swapchain image.
///
/// The render pass is tied to the swapchain's format; the framebuffers are
/// tied to its image views and extent. Framebuffer count equals swapchain
/// image count at all times except mid-recreate.
pub struct RenderTargetSet {
    render_pass: vk::RenderPass,
    framebuffers: Vec<vk::Framebuffer>,
    clear_values: Vec<vk::ClearValue>,
    depth: Option<DepthTarget>,
    extent: vk::Extent2D,
    config: RenderTargetConfig,
}

impl RenderTargetSet {
    /// Create the render pass and framebuffers for the given swapchain views.
    ///
    /// # Safety
    /// The device must be valid and the views must belong to a live
    /// swapchain with the given format and extent.
    pub unsafe fn new(
        device: &ash::Device,
        allocator: &MemoryAllocator,
        format: vk::Format,
        extent: vk::Extent2D,
        image_views: &[vk::ImageView],
        config: RenderTargetConfig,
    ) -> Result<Self> {
        let render_pass = create_render_pass(device, format, &config)?;

        let mut clear_values = vec![vk::ClearValue {
            color: vk::ClearColorValue {
                float32: config.clear_color,
            },
        }];
        if config.depth {
            clear_values.push(vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 1.0,
                    stencil: 0,
                },
            });
        }

        let mut set = Self {
            render_pass,
            framebuffers: Vec::new(),
            clear_values,
            depth: None,
            extent,
            config,
        };

        if let Err(e) = set.build_framebuffers(device, allocator, extent, image_views) {
            device.destroy_render_pass(render_pass, None);
            return Err(e);
        }

        Ok(set)
    }

    /// Get the render pass handle.
    pub fn render_pass(&self) -> vk::RenderPass {
        self.render_pass
    }

    /// Number of framebuffers.
    pub fn framebuffer_count(&self) -> usize {
        self.framebuffers.len()
    }

    /// Current framebuffer extent.
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Begin the render pass on the framebuffer for `image_index`.
    ///
    /// # Safety
    /// The command buffer must be recording and the image index must come
    /// from the swapchain this set was built for.
    pub unsafe fn begin(&self, device: &ash::Device, cmd: vk::CommandBuffer, image_index: u32) {
        let begin_info = vk::RenderPassBeginInfo::default()
            .render_pass(self.render_pass)
            .framebuffer(self.framebuffers[image_index as usize])
            .render_area(vk::Rect2D {
                offset: vk::Offset2D::default(),
                extent: self.extent,
            })
            .clear_values(&self.clear_values);

        device.cmd_begin_render_pass(cmd, &begin_info, vk::SubpassContents::INLINE);
    }

    /// End the render pass.
    ///
    /// # Safety
    /// The command buffer must be inside a render pass begun with
    /// [`Self::begin`].
    pub unsafe fn end(&self, device: &ash::Device, cmd: vk::CommandBuffer) {
        device.cmd_end_render_pass(cmd);
    }

    /// Destroy the framebuffers (and depth target), keeping the render pass.
    ///
    /// Called during swapchain recreation.
    ///
    /// # Safety
    /// No GPU work may still reference the framebuffers.
    pub unsafe fn destroy_framebuffers(&mut self, device: &ash::Device, allocator: &MemoryAllocator) {
        for &framebuffer in &self.framebuffers {
            device.destroy_framebuffer(framebuffer, None);
        }
        self.framebuffers.clear();

        if let Some(depth) = self.depth.take() {
            device.destroy_image_view(depth.view, None);
            allocator.destroy_image(depth.image, depth.memory);
        }
    }

    /// Rebuild framebuffers for a recreated swapchain.
    ///
    /// The render pass survives because the swapchain format is stable
    /// across recreation.
    ///
    /// # Safety
    /// [`Self::destroy_framebuffers`] must have been called since the last
    /// build, and the views must belong to the new swapchain.
    pub unsafe fn rebuild(
        &mut self,
        device: &ash::Device,
        allocator: &MemoryAllocator,
        extent: vk::Extent2D,
        image_views: &[vk::ImageView],
    ) -> Result<()> {
        self.extent = extent;
        self.build_framebuffers(device, allocator, extent, image_views)
    }

    /// Destroy everything including the render pass.
    ///
    /// # Safety
    /// No GPU work may still reference the set.
    pub unsafe fn destroy(&mut self, device: &ash::Device, allocator: &MemoryAllocator) {
        self.destroy_framebuffers(device, allocator);
        device.destroy_render_pass(self.render_pass, None);
        self.render_pass = vk::RenderPass::null();
    }

    unsafe fn build_framebuffers(
        &mut self,
        device: &ash::Device,
        allocator: &MemoryAllocator,
        extent: vk::Extent2D,
        image_views: &[vk::ImageView],
    ) -> Result<()> {
        debug_assert!(self.framebuffers.is_empty());

        if self.config.depth {
            self.depth = Some(create_depth_target(device, allocator, extent)?);
        }

        let mut framebuffers = Vec::with_capacity(image_views.len());
        for &view in image_views {
            let mut attachments = vec![view];
            if let Some(depth) = &self.depth {
                attachments.push(depth.view);
            }

            let framebuffer_info = vk::FramebufferCreateInfo::default()
                .render_pass(self.render_pass)
                .attachments(&attachments)
                .width(extent.width)
                .height(extent.height)
                .layers(1);

            match device.create_framebuffer(&framebuffer_info, None) {
                Ok(framebuffer) => framebuffers.push(framebuffer),
                Err(e) => {
                    for framebuffer in framebuffers {
                        device.destroy_framebuffer(framebuffer, None);
                    }
                    if let Some(depth) = self.depth.take() {
                        device.destroy_image_view(depth.view, None);
                        allocator.destroy_image(depth.image, depth.memory);
                    }
                    return Err(GpuError::from(e));
                }
            }
        }

        self.framebuffers = framebuffers;
        Ok(())
    }
}

/// Create the render pass: one color attachment ending in PRESENT_SRC, an
/// optional depth attachment, a single subpass.
///
/// # Safety
/// The device must be valid.
unsafe fn create_render_pass(
    device: &ash::Device,
    format: vk::Format,
    config: &RenderTargetConfig,
) -> Result<vk::RenderPass> {
    let mut attachments = vec![vk::AttachmentDescription::default()
        .format(format)
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(config.load_op)
        .store_op(config.store_op)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::PRESENT_SRC_KHR)];

    let color_ref = vk::AttachmentReference::default()
        .attachment(0)
        .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);

    let depth_ref = vk::AttachmentReference::default()
        .attachment(1)
        .layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);

    let mut subpass = vk::SubpassDescription::default()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(std::slice::from_ref(&color_ref));

    let mut dependency = vk::SubpassDependency::default()
        .src_subpass(vk::SUBPASS_EXTERNAL)
        .dst_subpass(0)
        .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .src_access_mask(vk::AccessFlags::empty())
        .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE);

    if config.depth {
        attachments.push(
            vk::AttachmentDescription::default()
                .format(DEPTH_FORMAT)
                .samples(vk::SampleCountFlags::TYPE_1)
                .load_op(vk::AttachmentLoadOp::CLEAR)
                .store_op(vk::AttachmentStoreOp::DONT_CARE)
                .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                .initial_layout(vk::ImageLayout::UNDEFINED)
                .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL),
        );
        subpass = subpass.depth_stencil_attachment(&depth_ref);

        dependency = dependency
            .src_stage_mask(
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                    | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
            )
            .dst_stage_mask(
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                    | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
            )
            .dst_access_mask(
                vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                    | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            );
    }

    let render_pass_info = vk::RenderPassCreateInfo::default()
        .attachments(&attachments)
        .subpasses(std::slice::from_ref(&subpass))
        .dependencies(std::slice::from_ref(&dependency));

    let render_pass = device.create_render_pass(&render_pass_info, None)?;
    Ok(render_pass)
}

/// Create the shared depth image, memory, and view.
///
/// # Safety
/// The device must be valid.
unsafe fn create_depth_target(
    device: &ash::Device,
    allocator: &MemoryAllocator,
    extent: vk::Extent2D,
) -> Result<DepthTarget> {
    let (image, memory) = allocator.create_image(
        extent.width,
        extent.height,
        DEPTH_FORMAT,
        vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
        vk::MemoryPropertyFlags::DEVICE_LOCAL,
    )?;

    let view_info = vk::ImageViewCreateInfo::default()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(DEPTH_FORMAT)
        .subresource_range(
            vk::ImageSubresourceRange::default()
                .aspect_mask(vk::ImageAspectFlags::DEPTH)
                .base_mip_level(0)
                .level_count(1)
                .base_array_layer(0)
                .layer_count(1),
        );

    let view = match device.create_image_view(&view_info, None) {
        Ok(view) => view,
        Err(e) => {
            allocator.destroy_image(image, memory);
            return Err(GpuError::from(e));
        }
    };

    Ok(DepthTarget {
        image,
        view,
        memory,
    })
}
