//! GPU error types.

use ash::vk;
use std::path::PathBuf;
use thiserror::Error;

/// GPU-related errors.
///
/// Most variants are unrecoverable: initialization-heavy rendering code has
/// no safe continuation after a failed device or pipeline creation, so the
/// caller is expected to surface them and exit. The exception is
/// [`GpuError::SwapchainStale`], which routes into swapchain recreation.
#[derive(Error, Debug)]
pub enum GpuError {
    /// Vulkan error.
    #[error("Vulkan error: {0}")]
    Vulkan(#[from] vk::Result),

    /// No physical device passed the ranking policy.
    #[error("No suitable GPU found")]
    NoSuitableDevice,

    /// No queue family supports both graphics and presentation.
    #[error("No queue family supports graphics and presentation")]
    NoSuitableQueueFamily,

    /// No memory type satisfies the given type mask and property flags.
    #[error("No memory type matches mask {type_bits:#b} with properties {required:?}")]
    NoSuitableMemoryType {
        type_bits: u32,
        required: vk::MemoryPropertyFlags,
    },

    /// Memory allocation failed.
    #[error("Memory allocation failed: {0}")]
    AllocationFailed(String),

    /// Surface creation failed.
    #[error("Surface creation failed: {0}")]
    SurfaceCreation(String),

    /// Swapchain creation failed.
    #[error("Swapchain creation failed: {0}")]
    SwapchainCreation(String),

    /// The swapchain no longer matches the surface (resize, minimize).
    ///
    /// The only transient error: the caller recreates the swapchain and
    /// retries instead of exiting.
    #[error("Swapchain is out of date and must be recreated")]
    SwapchainStale,

    /// Shader bytecode was not found at the given path or any fallback.
    #[error("Shader not found: {path} (tried {tried:?})")]
    ShaderNotFound { path: PathBuf, tried: Vec<PathBuf> },

    /// Pipeline creation failed.
    #[error("Pipeline creation failed: {0}")]
    PipelineCreation(String),

    /// Image layout transition not covered by the barrier table.
    #[error("Unsupported image layout transition: {old:?} -> {new:?}")]
    UnsupportedLayoutTransition {
        old: vk::ImageLayout,
        new: vk::ImageLayout,
    },

    /// Invalid state.
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl GpuError {
    /// Whether this error is recovered by recreating the swapchain.
    pub const fn is_swapchain_stale(&self) -> bool {
        matches!(self, Self::SwapchainStale)
    }
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, GpuError>;
