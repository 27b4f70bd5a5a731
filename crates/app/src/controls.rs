//! Keyboard bindings.

use glam::Vec3;

use raytracer_platform::{InputState, KeyCode};
use raytracer_scene::MotionInput;

/// Units per second for the selected object.
pub const OBJECT_MOVE_SPEED: f32 = 3.0;
/// Radius units per second for the selected object.
pub const OBJECT_RESIZE_SPEED: f32 = 1.5;

/// One-shot commands triggered on key press.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    ResetAccumulation,
    SelectNext,
    AddObject,
    ToggleOverlay,
    Exit,
}

static COMMAND_KEYS: [(KeyCode, Command); 5] = [
    (KeyCode::KeyR, Command::ResetAccumulation),
    (KeyCode::Tab, Command::SelectNext),
    (KeyCode::KeyN, Command::AddObject),
    (KeyCode::KeyH, Command::ToggleOverlay),
    (KeyCode::Escape, Command::Exit),
];

/// Camera motion from WASD, Space/Shift and the arrow keys.
pub fn camera_motion(input: &InputState) -> MotionInput {
    MotionInput {
        forward: input.axis(KeyCode::KeyW, KeyCode::KeyS),
        right: input.axis(KeyCode::KeyD, KeyCode::KeyA),
        up: input.axis(KeyCode::Space, KeyCode::ShiftLeft),
        yaw: input.axis(KeyCode::ArrowRight, KeyCode::ArrowLeft),
        pitch: input.axis(KeyCode::ArrowUp, KeyCode::ArrowDown),
    }
}

/// World-space direction for the selected object from IJKL and U/O.
pub fn object_motion(input: &InputState) -> Vec3 {
    Vec3::new(
        input.axis(KeyCode::KeyL, KeyCode::KeyJ),
        input.axis(KeyCode::KeyO, KeyCode::KeyU),
        input.axis(KeyCode::KeyI, KeyCode::KeyK),
    )
}

/// +1 while `=`/`+` is held, -1 while `-` is.
pub fn object_resize(input: &InputState) -> f32 {
    input.axis(KeyCode::Equal, KeyCode::Minus)
}

/// Commands whose key went down this frame, in binding order.
pub fn commands(input: &InputState) -> impl Iterator<Item = Command> + '_ {
    COMMAND_KEYS
        .iter()
        .filter(|(key, _)| input.is_key_just_pressed(*key))
        .map(|(_, command)| *command)
}
