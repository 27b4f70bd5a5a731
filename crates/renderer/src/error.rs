//! Renderer error types.

use raytracer_rhi::RhiError;
use thiserror::Error;

/// Errors surfaced by the frame loop.
///
/// Stale surfaces never appear here; they are handled inside the scheduler.
#[derive(Error, Debug)]
pub enum RendererError {
    #[error("RHI error: {0}")]
    Rhi(#[from] RhiError),

    /// The scene holds more objects than the per-slot object buffers fit.
    /// Detected before any GPU work for the frame.
    #[error("Object capacity exceeded: {required} objects, capacity {capacity}")]
    CapacityExceeded { required: usize, capacity: usize },

    /// Host tried to write a slot whose previous submission is not retired.
    #[error("Frame slot {0} is still in flight")]
    SlotInFlight(usize),

    #[error("Frame slot {slot} out of range (slot count {count})")]
    SlotOutOfRange { slot: usize, count: usize },

    #[error(transparent)]
    Core(#[from] raytracer_core::Error),
}

impl RendererError {
    /// Recoverable errors leave GPU state untouched; the caller may fix the
    /// cause and render the next frame. Everything else ends the session.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, RendererError::CapacityExceeded { .. })
    }
}

pub type RendererResult<T> = Result<T, RendererError>;
