//! Keyboard state tracking.
//!
//! Held keys drive continuous motion; edge-triggered keys drive one-shot
//! commands such as selection or reset.

use std::collections::HashSet;

pub use winit::keyboard::KeyCode;

#[derive(Debug, Default)]
pub struct InputState {
    pressed_keys: HashSet<KeyCode>,
    /// Pressed since the last `begin_frame`.
    just_pressed_keys: HashSet<KeyCode>,
}

impl InputState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clears edge-triggered state. Call once per frame after handling input.
    pub fn begin_frame(&mut self) {
        self.just_pressed_keys.clear();
    }

    pub fn on_key_pressed(&mut self, key: KeyCode) {
        // Key repeat re-sends presses for held keys; only the first counts.
        if self.pressed_keys.insert(key) {
            self.just_pressed_keys.insert(key);
        }
    }

    pub fn on_key_released(&mut self, key: KeyCode) {
        self.pressed_keys.remove(&key);
    }

    /// Forgets all held keys, e.g. when the window loses focus.
    pub fn release_all(&mut self) {
        self.pressed_keys.clear();
        self.just_pressed_keys.clear();
    }

    pub fn is_key_pressed(&self, key: KeyCode) -> bool {
        self.pressed_keys.contains(&key)
    }

    pub fn is_key_just_pressed(&self, key: KeyCode) -> bool {
        self.just_pressed_keys.contains(&key)
    }

    /// +1 when only `positive` is held, -1 when only `negative` is, else 0.
    pub fn axis(&self, positive: KeyCode, negative: KeyCode) -> f32 {
        let mut value = 0.0;
        if self.is_key_pressed(positive) {
            value += 1.0;
        }
        if self.is_key_pressed(negative) {
            value -= 1.0;
        }
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_just_pressed_is_edge_triggered() {
        let mut input = InputState::new();
        input.on_key_pressed(KeyCode::Tab);
        assert!(input.is_key_just_pressed(KeyCode::Tab));

        input.begin_frame();
        assert!(!input.is_key_just_pressed(KeyCode::Tab));
        assert!(input.is_key_pressed(KeyCode::Tab));

        // Repeat while held does not re-trigger.
        input.on_key_pressed(KeyCode::Tab);
        assert!(!input.is_key_just_pressed(KeyCode::Tab));

        input.on_key_released(KeyCode::Tab);
        input.on_key_pressed(KeyCode::Tab);
        assert!(input.is_key_just_pressed(KeyCode::Tab));
    }

    #[test]
    fn test_axis() {
        let mut input = InputState::new();
        assert_eq!(input.axis(KeyCode::KeyW, KeyCode::KeyS), 0.0);

        input.on_key_pressed(KeyCode::KeyW);
        assert_eq!(input.axis(KeyCode::KeyW, KeyCode::KeyS), 1.0);

        input.on_key_pressed(KeyCode::KeyS);
        assert_eq!(input.axis(KeyCode::KeyW, KeyCode::KeyS), 0.0);

        input.on_key_released(KeyCode::KeyW);
        assert_eq!(input.axis(KeyCode::KeyW, KeyCode::KeyS), -1.0);
    }

    #[test]
    fn test_release_all() {
        let mut input = InputState::new();
        input.on_key_pressed(KeyCode::KeyA);
        input.release_all();
        assert!(!input.is_key_pressed(KeyCode::KeyA));
        assert!(!input.is_key_just_pressed(KeyCode::KeyA));
    }
}
