//! Progressive compute ray tracer.
//!
//! This crate turns a [`raytracer_scene::Scene`] into presented frames:
//! - Per-slot GPU copies of the scene ([`frame_resources`])
//! - A running per-pixel sample sum ([`accumulation`])
//! - The ray tracing dispatch ([`compute_stage`]) and 2D overlay ([`overlay_stage`])
//! - The frame loop that sequences them ([`scheduler`])

pub mod accumulation;
pub mod backend;
pub mod compute_stage;
mod error;
pub mod frame_resources;
pub mod gpu_types;
pub mod overlay;
pub mod overlay_stage;
pub mod renderer;
pub mod scheduler;

pub use accumulation::{AccumulationBuffer, AccumulationTarget};
pub use backend::{BackendOptions, VulkanBackend};
pub use error::{RendererError, RendererResult};
pub use frame_resources::FrameResourcePool;
pub use overlay::{DrawList, Overlay, OverlayWidget};
pub use renderer::Renderer;
pub use scheduler::{FrameBackend, FrameOutcome, FrameScheduler, FrameState, RebuildOutcome};

pub use raytracer_rhi::sync::FRAMES_IN_FLIGHT;
