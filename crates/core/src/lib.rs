//! Core utilities for the raytracer.
//!
//! This crate provides foundational types shared by every other crate:
//! - Error types and result aliases
//! - Logging initialization
//! - Frame timing and FPS counting
//! - Configuration loading

mod config;
mod error;
mod logging;
mod timer;

pub use config::{AppConfig, CameraConfig, RendererConfig, SceneConfig, WindowConfig};
pub use error::{Error, Result};
pub use logging::init_logging;
pub use timer::{FpsCounter, Timer};
