//! Vulkan abstraction layer for the Hearth renderer.
//!
//! This crate provides:
//! - Instance and device bring-up with a pluggable adapter ranking policy
//! - Explicit memory allocation against the device's memory type table
//! - Staged uploads into device-local buffers and images
//! - Swapchain, render pass, and framebuffer management
//! - Declarative graphics pipeline creation
//! - The per-frame acquire/record/submit/present protocol
//!
//! One logical device, one queue, one swapchain; frames in flight default
//! to one.

pub mod barrier;
pub mod command;
pub mod context;
pub mod descriptors;
pub mod error;
pub mod frame;
pub mod instance;
pub mod memory;
pub mod pipeline;
pub mod render_target;
pub mod surface;
pub mod swapchain;
pub mod sync;
pub mod transfer;

pub use barrier::{transition_image_layout, transition_masks, TransitionMasks};
pub use command::{execute_single_time_commands, CommandExecutor, CommandPool};
pub use context::{DeviceContext, DeviceContextBuilder};
pub use descriptors::{
    write_combined_image_sampler, write_uniform_buffer, BindingFactory, DescriptorLayout,
    DescriptorSetLayoutBuilder,
};
pub use error::{GpuError, Result};
pub use frame::{FrameBackend, FrameScheduler, FrameToken};
pub use instance::{default_adapter_score, rank_adapters, AdapterProfile, AdapterScorer};
pub use memory::{create_default_sampler, find_memory_type, GpuBuffer, GpuTexture, MemoryAllocator};
pub use pipeline::{build_graphics_pipeline, Pipeline, PipelineConfig, VertexAttribute};
pub use render_target::{RenderTargetConfig, RenderTargetSet};
pub use surface::{SurfaceCaps, SurfaceContext};
pub use swapchain::{PresentOutcome, SwapchainManager};
pub use sync::{create_fence, create_semaphore, FrameSync};
pub use transfer::{IndexBuffer, TransferEngine, UniformBuffer, VertexBuffer};
