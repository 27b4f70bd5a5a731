//! Scene objects.

use glam::Vec3;
use rand::Rng;

/// Smallest radius an edit may shrink a sphere to.
pub const MIN_RADIUS: f32 = 0.1;

/// A colored sphere.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Object {
    pub center: Vec3,
    pub radius: f32,
    /// Linear RGB in [0, 1].
    pub color: Vec3,
}

impl Object {
    pub fn new(center: Vec3, radius: f32, color: Vec3) -> Self {
        Self {
            center,
            radius: radius.max(MIN_RADIUS),
            color,
        }
    }

    /// Center in [-5, 5]^3, radius in [0.5, 3], color in [0, 1]^3.
    pub fn random(rng: &mut impl Rng) -> Self {
        let center = Vec3::new(
            rng.gen_range(-5.0..=5.0),
            rng.gen_range(-5.0..=5.0),
            rng.gen_range(-5.0..=5.0),
        );
        let color = Vec3::new(rng.r#gen(), rng.r#gen(), rng.r#gen());
        let radius = rng.gen_range(0.5..=3.0);
        Self::new(center, radius, color)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn test_random_within_ranges() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let object = Object::random(&mut rng);
            assert!(object.center.abs().max_element() <= 5.0);
            assert!((0.5..=3.0).contains(&object.radius));
            assert!(object.color.min_element() >= 0.0);
            assert!(object.color.max_element() <= 1.0);
        }
    }

    #[test]
    fn test_radius_floor() {
        let object = Object::new(Vec3::ZERO, -1.0, Vec3::ONE);
        assert_eq!(object.radius, MIN_RADIUS);
    }
}
