use crate::{Affine3A, Interval, Ray, Vec3};

/// Axis-aligned bounding box stored as min/max corners.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub const EMPTY: Aabb = Aabb {
        min: Vec3::splat(f32::INFINITY),
        max: Vec3::splat(f32::NEG_INFINITY),
    };

    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Create an AABB from two arbitrary corner points.
    pub fn from_points(a: Vec3, b: Vec3) -> Self {
        Self::new(a.min(b), a.max(b))
    }

    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }

    /// Smallest box enclosing both inputs.
    pub fn surrounding(a: &Aabb, b: &Aabb) -> Self {
        Self::new(a.min.min(b.min), a.max.max(b.max))
    }

    pub fn extend(&mut self, p: Vec3) {
        self.min = self.min.min(p);
        self.max = self.max.max(p);
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// Slab test. Returns the parameter range where the ray is inside the
    /// box, clipped to `ray_t`, or `None` on a miss.
    pub fn intersect(&self, ray: &Ray, ray_t: Interval) -> Option<Interval> {
        let inv = ray.direction.recip();
        let t0 = (self.min - ray.origin) * inv;
        let t1 = (self.max - ray.origin) * inv;
        let near = t0.min(t1);
        let far = t0.max(t1);

        let t_min = near.max_element().max(ray_t.min);
        let t_max = far.min_element().min(ray_t.max);
        if t_max < t_min || t_max.is_nan() || t_min.is_nan() {
            None
        } else {
            Some(Interval::new(t_min, t_max))
        }
    }

    /// Outward face normal of the box face closest to `p`.
    pub fn face_normal(&self, p: Vec3) -> Vec3 {
        let c = self.center();
        let half = ((self.max - self.min) * 0.5).max(Vec3::splat(1e-8));
        let d = (p - c) / half;
        let a = d.abs();
        if a.x >= a.y && a.x >= a.z {
            Vec3::new(d.x.signum(), 0.0, 0.0)
        } else if a.y >= a.z {
            Vec3::new(0.0, d.y.signum(), 0.0)
        } else {
            Vec3::new(0.0, 0.0, d.z.signum())
        }
    }

    /// Bounds of the transformed box (all eight corners).
    pub fn transformed(&self, xfm: &Affine3A) -> Aabb {
        if self.is_empty() {
            return *self;
        }
        let mut out = Aabb::EMPTY;
        for i in 0..8 {
            let corner = Vec3::new(
                if i & 1 == 0 { self.min.x } else { self.max.x },
                if i & 2 == 0 { self.min.y } else { self.max.y },
                if i & 4 == 0 { self.min.z } else { self.max.z },
            );
            out.extend(xfm.transform_point3(corner));
        }
        out
    }
}
