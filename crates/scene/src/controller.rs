//! Continuous camera motion from held input.

use glam::Vec3;

use crate::scene::Scene;

/// Per-frame motion intent. Each axis is in [-1, 1].
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct MotionInput {
    pub forward: f32,
    pub right: f32,
    pub up: f32,
    pub yaw: f32,
    pub pitch: f32,
}

impl MotionInput {
    pub fn is_idle(&self) -> bool {
        *self == Self::default()
    }
}

/// Fly-camera controller: moves along the camera's forward/right plane and
/// the world up axis.
#[derive(Clone, Copy, Debug)]
pub struct CameraController {
    /// Units per second.
    pub move_speed: f32,
    /// Degrees per second.
    pub look_speed: f32,
}

impl Default for CameraController {
    fn default() -> Self {
        Self {
            move_speed: 5.0,
            look_speed: 60.0,
        }
    }
}

impl CameraController {
    pub fn new(move_speed: f32, look_speed: f32) -> Self {
        Self {
            move_speed,
            look_speed,
        }
    }

    /// Moves the scene camera for a frame of `delta_secs`.
    ///
    /// Returns whether accumulation was reset.
    pub fn apply(&self, scene: &mut Scene, input: MotionInput, delta_secs: f32) -> bool {
        if input.is_idle() || delta_secs <= 0.0 {
            return false;
        }

        let step = self.move_speed * delta_secs;
        let turn = self.look_speed * delta_secs;

        scene.update_camera(|camera| {
            camera.rotate(input.yaw * turn, input.pitch * turn);
            let motion = camera.forward() * input.forward
                + camera.right() * input.right
                + Vec3::Y * input.up;
            camera.translate(motion * step);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_idle_input_keeps_accumulating() {
        let mut scene = Scene::random(2, Some(1));
        scene.advance_frame();
        let controller = CameraController::default();
        assert!(!controller.apply(&mut scene, MotionInput::default(), 0.016));
        assert_eq!(scene.frame_count(), 1);
    }

    #[test]
    fn test_forward_moves_along_view() {
        let mut scene = Scene::default();
        let start = scene.camera().position();
        let controller = CameraController::new(5.0, 60.0);

        let input = MotionInput {
            forward: 1.0,
            ..Default::default()
        };
        assert!(controller.apply(&mut scene, input, 0.5));

        let moved = scene.camera().position() - start;
        assert!(moved.abs_diff_eq(Vec3::new(0.0, 0.0, 2.5), 1e-5));
        assert_eq!(scene.frame_count(), 0);
    }

    #[test]
    fn test_look_rotates_by_speed() {
        let mut scene = Scene::default();
        let controller = CameraController::new(5.0, 60.0);
        let input = MotionInput {
            yaw: 1.0,
            pitch: -1.0,
            ..Default::default()
        };
        controller.apply(&mut scene, input, 0.25);
        assert_abs_diff_eq!(scene.camera().yaw(), 15.0, epsilon = 1e-4);
        assert_abs_diff_eq!(scene.camera().pitch(), -15.0, epsilon = 1e-4);
    }
}
