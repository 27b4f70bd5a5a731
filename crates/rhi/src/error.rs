//! RHI-specific error types.

use thiserror::Error;

/// RHI-specific error type.
#[derive(Error, Debug)]
pub enum RhiError {
    /// Vulkan API error
    #[error("Vulkan error: {0}")]
    VulkanError(#[from] ash::vk::Result),

    /// Failed to load Vulkan
    #[error("Failed to load Vulkan: {0}")]
    LoadingError(#[from] ash::LoadingError),

    /// GPU allocator error
    #[error("Allocator error: {0}")]
    AllocatorError(#[from] gpu_allocator::AllocationError),

    /// The allocator mutex was poisoned by a panicking thread
    #[error("Allocator lock poisoned")]
    AllocatorPoisoned,

    /// IO error while reading GPU programs from disk
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// No suitable GPU found
    #[error("No suitable GPU found")]
    NoSuitableGpu,

    /// A queue family required by the device is missing
    #[error("Missing {0} queue family")]
    MissingQueueFamily(&'static str),

    /// Shader loading error
    #[error("Shader error: {0}")]
    ShaderError(String),

    /// Surface chain creation error
    #[error("Swapchain error: {0}")]
    SwapchainError(String),

    /// Host write outside a buffer's bounds
    #[error("Write of {len} bytes at offset {offset} exceeds buffer size {size}")]
    OutOfBounds { offset: u64, len: u64, size: u64 },

    /// Invalid handle or argument
    #[error("Invalid handle: {0}")]
    InvalidHandle(String),
}

/// Result type alias for RHI operations.
pub type RhiResult<T> = std::result::Result<T, RhiError>;
