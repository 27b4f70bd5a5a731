//! The host-side scene: camera, objects and the accumulation counter.
//!
//! Progressive accumulation is valid only while the scene is static, so
//! every mutation goes through [`Scene`] methods that reset the
//! accumulated-frame counter and bump [`Scene::revision`]. Renderers compare
//! revisions to learn that their accumulated samples are stale.

use glam::Vec3;
use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::camera::Camera;
use crate::object::{MIN_RADIUS, Object};

/// Camera drift below this distance does not restart accumulation.
pub const DEFAULT_MOVEMENT_THRESHOLD: f32 = 0.01;

#[derive(Clone, Debug)]
pub struct Scene {
    camera: Camera,
    objects: Vec<Object>,
    frame_count: u32,
    revision: u64,
    /// Pose at the last reset; drift is measured against it.
    anchor_position: Vec3,
    anchor_forward: Vec3,
    movement_threshold: f32,
    selected: Option<usize>,
    rng: StdRng,
}

impl Default for Scene {
    fn default() -> Self {
        Self::new(Camera::default(), Vec::new())
    }
}

impl Scene {
    pub fn new(camera: Camera, objects: Vec<Object>) -> Self {
        Self {
            anchor_position: camera.position(),
            anchor_forward: camera.forward(),
            camera,
            objects,
            frame_count: 0,
            revision: 0,
            movement_threshold: DEFAULT_MOVEMENT_THRESHOLD,
            selected: None,
            rng: StdRng::from_entropy(),
        }
    }

    /// `count` random spheres in front of the default camera.
    ///
    /// With a `seed` the scene, and every sphere later added with
    /// [`Scene::add_random_object`], is reproducible.
    pub fn random(count: usize, seed: Option<u64>) -> Self {
        let mut rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let objects = (0..count).map(|_| Object::random(&mut rng)).collect();

        let mut scene = Self::new(Camera::default(), objects);
        scene.rng = rng;
        tracing::info!("Generated random scene with {} objects (seed {:?})", count, seed);
        scene
    }

    pub fn with_movement_threshold(mut self, threshold: f32) -> Self {
        self.movement_threshold = threshold;
        self
    }

    #[inline]
    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    #[inline]
    pub fn objects(&self) -> &[Object] {
        &self.objects
    }

    /// Frames accumulated since the last mutation.
    #[inline]
    pub fn frame_count(&self) -> u32 {
        self.frame_count
    }

    /// Incremented on every accumulation reset.
    #[inline]
    pub fn revision(&self) -> u64 {
        self.revision
    }

    #[inline]
    pub fn selected(&self) -> Option<usize> {
        self.selected
    }

    /// Counts one more frame into the accumulation. Call once per
    /// submitted frame, after its data was uploaded.
    pub fn advance_frame(&mut self) {
        self.frame_count = self.frame_count.saturating_add(1);
    }

    /// Discards accumulated samples and re-anchors the camera pose.
    pub fn reset_accumulation(&mut self) {
        self.frame_count = 0;
        self.revision += 1;
        self.anchor_position = self.camera.position();
        self.anchor_forward = self.camera.forward();
    }

    /// Applies `update` to the camera, resetting accumulation when the pose
    /// drifted past the movement threshold from the last anchor.
    ///
    /// Returns whether accumulation was reset.
    pub fn update_camera(&mut self, update: impl FnOnce(&mut Camera)) -> bool {
        update(&mut self.camera);

        let moved = (self.camera.position() - self.anchor_position).length();
        let turned = (self.camera.forward() - self.anchor_forward).length();
        if moved > self.movement_threshold || turned > self.movement_threshold {
            self.reset_accumulation();
            true
        } else {
            false
        }
    }

    /// Applies `edit` to object `index`. Always resets accumulation.
    ///
    /// Returns false when `index` is out of range.
    pub fn edit_object(&mut self, index: usize, edit: impl FnOnce(&mut Object)) -> bool {
        let Some(object) = self.objects.get_mut(index) else {
            return false;
        };
        edit(object);
        object.radius = object.radius.max(MIN_RADIUS);
        self.reset_accumulation();
        true
    }

    /// Appends `object`, selects it and returns its index.
    pub fn add_object(&mut self, object: Object) -> usize {
        self.objects.push(object);
        let index = self.objects.len() - 1;
        self.selected = Some(index);
        self.reset_accumulation();
        tracing::debug!("Added object {} ({} total)", index, self.objects.len());
        index
    }

    pub fn add_random_object(&mut self) -> usize {
        let object = Object::random(&mut self.rng);
        self.add_object(object)
    }

    /// Cycles the selection through the objects; wraps back to none.
    pub fn select_next(&mut self) -> Option<usize> {
        self.selected = match self.selected {
            None if !self.objects.is_empty() => Some(0),
            Some(i) if i + 1 < self.objects.len() => Some(i + 1),
            _ => None,
        };
        self.selected
    }

    pub fn move_selected(&mut self, delta: Vec3) -> bool {
        match self.selected {
            Some(index) => self.edit_object(index, |o| o.center += delta),
            None => false,
        }
    }

    pub fn resize_selected(&mut self, delta: f32) -> bool {
        match self.selected {
            Some(index) => self.edit_object(index, |o| o.radius += delta),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn accumulate(scene: &mut Scene, frames: u32) {
        for _ in 0..frames {
            scene.advance_frame();
        }
    }

    #[test]
    fn test_counter_increments_per_frame() {
        let mut scene = Scene::random(3, Some(1));
        assert_eq!(scene.frame_count(), 0);
        for expected in 1..=10 {
            scene.advance_frame();
            assert_eq!(scene.frame_count(), expected);
        }
    }

    #[test]
    fn test_camera_move_past_threshold_resets() {
        let mut scene = Scene::random(3, Some(1));
        accumulate(&mut scene, 5);
        let revision = scene.revision();

        let reset = scene.update_camera(|c| c.translate(Vec3::new(0.02, 0.0, 0.0)));

        assert!(reset);
        assert_eq!(scene.frame_count(), 0);
        assert_eq!(scene.revision(), revision + 1);
    }

    #[test]
    fn test_small_drift_accumulates_against_anchor() {
        let mut scene = Scene::random(3, Some(1));
        accumulate(&mut scene, 5);

        assert!(!scene.update_camera(|c| c.translate(Vec3::new(0.006, 0.0, 0.0))));
        assert_eq!(scene.frame_count(), 5);

        // Second step crosses the threshold relative to the anchor.
        assert!(scene.update_camera(|c| c.translate(Vec3::new(0.006, 0.0, 0.0))));
        assert_eq!(scene.frame_count(), 0);

        // Re-anchored: the next small step is below the threshold again.
        scene.advance_frame();
        assert!(!scene.update_camera(|c| c.translate(Vec3::new(0.006, 0.0, 0.0))));
        assert_eq!(scene.frame_count(), 1);
    }

    #[test]
    fn test_rotation_resets() {
        let mut scene = Scene::default();
        accumulate(&mut scene, 3);
        assert!(scene.update_camera(|c| c.rotate(5.0, 0.0)));
        assert_eq!(scene.frame_count(), 0);
    }

    #[test]
    fn test_object_edits_always_reset() {
        let mut scene = Scene::random(2, Some(3));

        accumulate(&mut scene, 4);
        assert!(scene.edit_object(1, |o| o.center.x += 1e-4));
        assert_eq!(scene.frame_count(), 0);

        accumulate(&mut scene, 4);
        assert_eq!(scene.select_next(), Some(0));
        assert!(scene.resize_selected(0.5));
        assert_eq!(scene.frame_count(), 0);

        accumulate(&mut scene, 4);
        scene.add_random_object();
        assert_eq!(scene.frame_count(), 0);
        assert_eq!(scene.objects().len(), 3);
        assert_eq!(scene.selected(), Some(2));
    }

    #[test]
    fn test_edit_out_of_range_leaves_counter() {
        let mut scene = Scene::random(1, Some(3));
        accumulate(&mut scene, 2);
        assert!(!scene.edit_object(5, |o| o.radius = 1.0));
        assert!(!scene.move_selected(Vec3::X));
        assert_eq!(scene.frame_count(), 2);
    }

    #[test]
    fn test_mutation_sequence_counter_invariant() {
        let mut scene = Scene::random(4, Some(9));
        let mut expected = 0;
        for step in 0..60u32 {
            match step % 7 {
                0 => {
                    scene.update_camera(|c| c.translate(Vec3::new(0.0, 0.5, 0.0)));
                    expected = 0;
                }
                3 => {
                    scene.edit_object((step as usize) % 4, |o| o.radius += 0.1);
                    expected = 0;
                }
                _ => {}
            }
            assert_eq!(scene.frame_count(), expected);
            scene.advance_frame();
            expected += 1;
        }
    }

    #[test]
    fn test_select_next_wraps() {
        let mut scene = Scene::random(2, Some(5));
        assert_eq!(scene.select_next(), Some(0));
        assert_eq!(scene.select_next(), Some(1));
        assert_eq!(scene.select_next(), None);
        assert_eq!(scene.select_next(), Some(0));

        let mut empty = Scene::default();
        assert_eq!(empty.select_next(), None);
    }

    #[test]
    fn test_seeded_scenes_match() {
        let a = Scene::random(10, Some(42));
        let b = Scene::random(10, Some(42));
        assert_eq!(a.objects(), b.objects());
    }

    #[test]
    fn test_radius_edit_respects_floor() {
        let mut scene = Scene::random(1, Some(5));
        scene.select_next();
        scene.resize_selected(-100.0);
        assert_eq!(scene.objects()[0].radius, MIN_RADIUS);
    }
}
