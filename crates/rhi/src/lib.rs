//! Vulkan abstraction layer (Render Hardware Interface).
//!
//! Safe wrappers over `ash` for what a compute-driven renderer needs:
//! - Instance, physical device and logical device creation
//! - The presentable surface chain
//! - Command recording, descriptors and compute pipelines
//! - Host-visible buffers and synchronization primitives

mod error;

pub mod buffer;
pub mod command;
pub mod descriptor;
pub mod device;
pub mod instance;
pub mod physical_device;
pub mod pipeline;
pub mod rendering;
pub mod shader;
pub mod surface_chain;
pub mod sync;

pub use error::{RhiError, RhiResult};

// Re-export ash types that users might need
pub use ash::vk;
