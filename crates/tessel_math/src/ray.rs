use crate::{Affine3A, Vec3};

/// A ray with an origin and a direction.
///
/// Primary rays produced by the cameras carry a unit-length direction, so
/// the hit distance `t` doubles as the camera-space depth.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Ray {
    pub origin: Vec3,
    pub direction: Vec3,
}

impl Ray {
    /// Create a new ray.
    #[inline]
    pub fn new(origin: Vec3, direction: Vec3) -> Self {
        Self { origin, direction }
    }

    /// Get the point along the ray at parameter t.
    #[inline]
    pub fn at(&self, t: f32) -> Vec3 {
        self.origin + self.direction * t
    }

    /// Map the ray through an affine transform.
    ///
    /// The direction is not renormalized, so `t` values stay comparable
    /// between the source and destination spaces.
    pub fn transformed(&self, xfm: &Affine3A) -> Ray {
        Ray {
            origin: xfm.transform_point3(self.origin),
            direction: xfm.transform_vector3(self.direction),
        }
    }

    /// Offset a secondary ray origin along `normal` to avoid self-hits.
    pub fn spawn(point: Vec3, normal: Vec3, direction: Vec3) -> Ray {
        let offset = if direction.dot(normal) >= 0.0 { normal } else { -normal };
        Ray::new(point + offset * 1e-4, direction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ray_at() {
        let ray = Ray::new(Vec3::ZERO, Vec3::X);

        assert_eq!(ray.at(0.0), Vec3::ZERO);
        assert_eq!(ray.at(2.0), Vec3::new(2.0, 0.0, 0.0));
        assert_eq!(ray.at(-1.0), Vec3::new(-1.0, 0.0, 0.0));
    }

    #[test]
    fn test_ray_transformed_keeps_t() {
        let xfm = Affine3A::from_scale(Vec3::splat(2.0));
        let ray = Ray::new(Vec3::new(1.0, 0.0, 0.0), Vec3::Y);
        let moved = ray.transformed(&xfm);

        assert_eq!(moved.origin, Vec3::new(2.0, 0.0, 0.0));
        assert_eq!(moved.at(1.0), xfm.transform_point3(ray.at(1.0)));
    }

    #[test]
    fn test_spawn_offsets_to_direction_side() {
        let r = Ray::spawn(Vec3::ZERO, Vec3::Y, Vec3::new(0.0, 1.0, 0.0));
        assert!(r.origin.y > 0.0);
        let r = Ray::spawn(Vec3::ZERO, Vec3::Y, Vec3::new(0.0, -1.0, 0.0));
        assert!(r.origin.y < 0.0);
    }
}
