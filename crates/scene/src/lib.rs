//! Host-side scene state for the ray tracer.
//!
//! - [`Camera`]: yaw/pitch camera with an orthonormal basis
//! - [`Object`]: colored spheres
//! - [`Scene`]: owns both plus the accumulated-frame counter
//! - [`CameraController`]: turns held input into camera motion

pub mod camera;
pub mod controller;
pub mod object;
pub mod scene;

pub use camera::Camera;
pub use controller::{CameraController, MotionInput};
pub use object::Object;
pub use scene::{DEFAULT_MOVEMENT_THRESHOLD, Scene};
