//! `HearthApp` trait definition.

use crate::context::RenderContext;
use crate::frame::FrameContext;
use winit::event::WindowEvent;

/// Trait for Hearth applications.
///
/// The framework owns the window, GPU bring-up, swapchain lifecycle, and the
/// per-frame synchronization protocol; the application records commands.
pub trait HearthApp: Sized {
    /// Initialize the application after the window and GPU context exist.
    fn init(ctx: &mut RenderContext) -> anyhow::Result<Self>;

    /// Update application state. Called every frame before rendering.
    #[allow(unused_variables)]
    fn update(&mut self, ctx: &RenderContext, dt: f32) {}

    /// Record rendering commands for one frame.
    ///
    /// The command buffer is already recording; bracket draw work with
    /// [`RenderContext::begin_render_pass`] and
    /// [`RenderContext::end_render_pass`].
    fn render(&mut self, ctx: &RenderContext, frame: &FrameContext) -> anyhow::Result<()>;

    /// Handle window resize. The framework has already recreated the
    /// swapchain; recreate size-dependent resources here.
    #[allow(unused_variables)]
    fn on_resize(&mut self, ctx: &mut RenderContext, width: u32, height: u32) -> anyhow::Result<()> {
        Ok(())
    }

    /// Handle a window event. Return `true` to consume it.
    #[allow(unused_variables)]
    fn on_event(&mut self, event: &WindowEvent) -> bool {
        false
    }

    /// Destroy application resources. The device is idle when called.
    #[allow(unused_variables)]
    fn cleanup(&mut self, ctx: &mut RenderContext) {}
}
