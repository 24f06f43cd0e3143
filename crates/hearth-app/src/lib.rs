//! Application framework for the Hearth renderer.
//!
//! Owns the window, the GPU bring-up, the swapchain lifecycle, and the
//! per-frame loop; applications implement [`HearthApp`] and record commands.

pub mod app;
pub mod config;
pub mod context;
pub mod frame;
pub mod runner;

pub use app::HearthApp;
pub use config::AppConfig;
pub use context::RenderContext;
pub use frame::FrameContext;
pub use runner::run_app;
