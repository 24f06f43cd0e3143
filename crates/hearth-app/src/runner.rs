//! Application runner and event loop.

use std::sync::Arc;
use std::time::Instant;

use hearth_gpu::{FrameScheduler, GpuError, PresentOutcome};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::{Window, WindowId};

use crate::app::HearthApp;
use crate::config::AppConfig;
use crate::context::RenderContext;
use crate::frame::FrameContext;

/// Run a `HearthApp` with the given configuration.
///
/// Initializes logging, creates the window and GPU context, and drives the
/// event loop until the application exits.
pub fn run_app<A: HearthApp + 'static>(config: AppConfig) -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("{} starting...", config.title);

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut runner = AppRunner::<A> {
        config,
        state: None,
    };

    event_loop.run_app(&mut runner)?;
    Ok(())
}

struct AppRunner<A: HearthApp> {
    config: AppConfig,
    state: Option<AppState<A>>,
}

struct AppState<A: HearthApp> {
    ctx: RenderContext,
    scheduler: FrameScheduler,
    app: A,
    last_frame_time: Instant,
}

impl<A: HearthApp + 'static> ApplicationHandler for AppRunner<A> {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.state.is_some() {
            return;
        }

        match self.create_state(event_loop) {
            Ok(state) => {
                self.state = Some(state);
                info!("Application ready");
            }
            Err(e) => {
                error!("Failed to initialize application: {e}");
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        if let Some(state) = &mut self.state {
            if state.app.on_event(&event) {
                return;
            }
        }

        match event {
            WindowEvent::CloseRequested => {
                if let Some(mut state) = self.state.take() {
                    state.shutdown();
                }
                event_loop.exit();
            }
            WindowEvent::RedrawRequested => {
                if let Some(state) = &mut self.state {
                    if let Err(e) = state.render_frame() {
                        error!("Render error: {e}");
                        event_loop.exit();
                        return;
                    }
                    state.ctx.window().request_redraw();
                }
            }
            WindowEvent::Resized(size) => {
                if let Some(state) = &mut self.state {
                    if let Err(e) = state.handle_resize(size.width, size.height) {
                        error!("Resize error: {e}");
                        event_loop.exit();
                    }
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(state) = &self.state {
            state.ctx.window().request_redraw();
        }
    }
}

impl<A: HearthApp + 'static> AppRunner<A> {
    fn create_state(&self, event_loop: &ActiveEventLoop) -> anyhow::Result<AppState<A>> {
        let window_attrs = Window::default_attributes()
            .with_title(&self.config.title)
            .with_inner_size(PhysicalSize::new(self.config.width, self.config.height));

        let window = Arc::new(event_loop.create_window(window_attrs)?);

        let mut ctx = RenderContext::new(window, &self.config)?;
        let scheduler = FrameScheduler::new(self.config.frames_in_flight);
        let app = A::init(&mut ctx)?;

        Ok(AppState {
            ctx,
            scheduler,
            app,
            last_frame_time: Instant::now(),
        })
    }
}

impl<A: HearthApp> AppState<A> {
    fn render_frame(&mut self) -> anyhow::Result<()> {
        // A minimized window has nothing to present; recreation waits for
        // the next non-zero resize event
        let size = self.ctx.window().inner_size();
        if size.width == 0 || size.height == 0 {
            return Ok(());
        }

        let now = Instant::now();
        let dt = now.duration_since(self.last_frame_time).as_secs_f32();
        self.last_frame_time = now;

        self.app.update(&self.ctx, dt);

        let token = match self.scheduler.begin_frame(&mut self.ctx) {
            Ok(token) => token,
            Err(GpuError::SwapchainStale) => {
                self.recreate(size.width, size.height)?;
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        let frame = FrameContext {
            command_buffer: self.ctx.command_buffer(token.image_index),
            image_index: token.image_index,
            extent: self.ctx.extent(),
            dt,
            frame_number: token.frame_number,
        };

        if let Err(e) = self.app.render(&self.ctx, &frame) {
            self.scheduler.abort_frame();
            return Err(e);
        }

        match self.scheduler.end_frame(&mut self.ctx, token) {
            Ok(PresentOutcome::Presented) => Ok(()),
            Ok(PresentOutcome::Stale) => {
                self.recreate(size.width, size.height)?;
                Ok(())
            }
            Err(GpuError::SwapchainStale) => {
                self.scheduler.abort_frame();
                self.recreate(size.width, size.height)?;
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn handle_resize(&mut self, width: u32, height: u32) -> anyhow::Result<()> {
        if width == 0 || height == 0 {
            return Ok(());
        }
        self.recreate(width, height)?;
        info!("Resized to {width}x{height}");
        Ok(())
    }

    fn recreate(&mut self, width: u32, height: u32) -> anyhow::Result<()> {
        self.ctx.recreate_swapchain(width, height)?;
        self.app.on_resize(&mut self.ctx, width, height)?;
        Ok(())
    }

    fn shutdown(&mut self) {
        info!("Shutting down after {} frames", self.scheduler.frame_number());
        if let Err(e) = self.ctx.device_context().wait_idle() {
            error!("wait_idle failed: {e}");
        }
        self.app.cleanup(&mut self.ctx);
        self.ctx.cleanup();
    }
}
