//! Geometry collaborators.
//!
//! The render pipeline treats geometry as an opaque intersection callable.
//! This module provides the trait plus the three primitive sets the
//! renderers and tests need: boxes, spheres and triangle meshes.

use tessel_math::{Aabb, Interval, Ray, Vec2, Vec3};

use crate::error::{SceneError, SceneResult};

/// Closest intersection with one geometry, in the geometry's object space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeometryHit {
    /// Ray parameter of the hit
    pub t: f32,
    /// Geometric normal (unit length, outward facing)
    pub normal: Vec3,
    /// Index of the primitive inside this geometry
    pub prim_id: u32,
    /// Surface parameterization at the hit
    pub uv: Vec2,
}

/// A point picked uniformly on a geometry's surface.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AreaSample {
    pub position: Vec3,
    /// Outward unit normal at `position`
    pub normal: Vec3,
    /// Probability density per unit surface area
    pub pdf: f32,
}

/// Split `pick` in [0, 1) into a primitive index and a fresh [0, 1) value.
fn pick_primitive(pick: f32, count: usize) -> (usize, f32) {
    let scaled = pick.clamp(0.0, 1.0) * count as f32;
    let index = (scaled as usize).min(count - 1);
    (index, (scaled - index as f32).clamp(0.0, 1.0))
}

/// Trait for anything the world can intersect rays against.
pub trait Geometry: Send + Sync {
    /// Registered type name ("boxes", "spheres", "triangles").
    fn kind(&self) -> &'static str;

    fn primitive_count(&self) -> usize;

    /// Object-space bounds of all primitives.
    fn bounds(&self) -> Aabb;

    /// Find the closest hit within `ray_t`.
    fn intersect(&self, ray: &Ray, ray_t: Interval) -> Option<GeometryHit>;

    /// Any-hit query for shadow and occlusion rays.
    fn occluded(&self, ray: &Ray, ray_t: Interval) -> bool {
        self.intersect(ray, ray_t).is_some()
    }

    /// Sample a surface point, for geometry used as a light. `pick` chooses
    /// the primitive (uniformly by index) and `u` the point on it.
    /// Geometry returning `None` is never sampled as a light.
    fn sample_area(&self, _pick: f32, _u: Vec2) -> Option<AreaSample> {
        None
    }
}

/// A set of axis-aligned boxes, one primitive per box.
pub struct Boxes {
    boxes: Vec<Aabb>,
    bounds: Aabb,
}

impl Boxes {
    pub fn new(boxes: Vec<Aabb>) -> SceneResult<Self> {
        if boxes.is_empty() {
            return Err(SceneError::EmptyGeometry { kind: "boxes" });
        }
        if let Some(i) = boxes.iter().position(|b| b.is_empty()) {
            return Err(SceneError::InvalidGeometry {
                kind: "boxes",
                reason: format!("box {i} has min > max"),
            });
        }
        let bounds = boxes.iter().fold(Aabb::EMPTY, |acc, b| Aabb::surrounding(&acc, b));
        Ok(Self { boxes, bounds })
    }

    /// A single box from -0.5 to 0.5 on every axis.
    pub fn unit() -> Self {
        let b = Aabb::new(Vec3::splat(-0.5), Vec3::splat(0.5));
        Self {
            boxes: vec![b],
            bounds: b,
        }
    }
}

impl Geometry for Boxes {
    fn kind(&self) -> &'static str {
        "boxes"
    }

    fn primitive_count(&self) -> usize {
        self.boxes.len()
    }

    fn bounds(&self) -> Aabb {
        self.bounds
    }

    fn intersect(&self, ray: &Ray, ray_t: Interval) -> Option<GeometryHit> {
        let mut closest: Option<GeometryHit> = None;
        let mut range = ray_t;

        for (i, b) in self.boxes.iter().enumerate() {
            let Some(span) = b.intersect(ray, range) else {
                continue;
            };
            // Entering hit, or exit hit when the origin is inside the box
            let t = if span.min > ray_t.min { span.min } else { span.max };
            if !range.contains(t) {
                continue;
            }
            let p = ray.at(t);
            closest = Some(GeometryHit {
                t,
                normal: b.face_normal(p),
                prim_id: i as u32,
                uv: Vec2::ZERO,
            });
            range = range.with_max(t);
        }

        closest
    }

    fn sample_area(&self, pick: f32, u: Vec2) -> Option<AreaSample> {
        let (i, rest) = pick_primitive(pick, self.boxes.len());
        let b = &self.boxes[i];
        let d = b.max - b.min;
        // one face pair per axis, chosen by area
        let faces = [d.y * d.z, d.z * d.x, d.x * d.y];
        let half_area: f32 = faces.iter().sum();
        if !(half_area > 0.0) {
            return None;
        }

        let mut t = rest * half_area;
        let mut axis = 2;
        for (a, area) in faces.iter().enumerate() {
            if t < *area {
                axis = a;
                break;
            }
            t -= area;
        }
        let upper = faces[axis] > 0.0 && t / faces[axis] >= 0.5;

        let (s, r) = ((axis + 1) % 3, (axis + 2) % 3);
        let mut position = b.min;
        position[s] += u.x * d[s];
        position[r] += u.y * d[r];
        position[axis] = if upper { b.max[axis] } else { b.min[axis] };
        let mut normal = Vec3::ZERO;
        normal[axis] = if upper { 1.0 } else { -1.0 };

        Some(AreaSample {
            position,
            normal,
            pdf: 1.0 / (self.boxes.len() as f32 * 2.0 * half_area),
        })
    }
}

/// Spheres sharing one primitive list.
pub struct Spheres {
    centers: Vec<Vec3>,
    radii: Vec<f32>,
    bounds: Aabb,
}

impl Spheres {
    /// Spheres with a common radius.
    pub fn new(centers: Vec<Vec3>, radius: f32) -> SceneResult<Self> {
        let radii = vec![radius; centers.len()];
        Self::with_radii(centers, radii)
    }

    pub fn with_radii(centers: Vec<Vec3>, radii: Vec<f32>) -> SceneResult<Self> {
        if centers.is_empty() {
            return Err(SceneError::EmptyGeometry { kind: "spheres" });
        }
        if centers.len() != radii.len() {
            return Err(SceneError::InvalidGeometry {
                kind: "spheres",
                reason: format!("{} centers but {} radii", centers.len(), radii.len()),
            });
        }
        if radii.iter().any(|r| !(*r > 0.0)) {
            return Err(SceneError::InvalidGeometry {
                kind: "spheres",
                reason: "radius must be positive".to_string(),
            });
        }

        let mut bounds = Aabb::EMPTY;
        for (c, r) in centers.iter().zip(&radii) {
            let sphere = Aabb::new(*c - Vec3::splat(*r), *c + Vec3::splat(*r));
            bounds = Aabb::surrounding(&bounds, &sphere);
        }
        Ok(Self {
            centers,
            radii,
            bounds,
        })
    }
}

impl Geometry for Spheres {
    fn kind(&self) -> &'static str {
        "spheres"
    }

    fn primitive_count(&self) -> usize {
        self.centers.len()
    }

    fn bounds(&self) -> Aabb {
        self.bounds
    }

    fn intersect(&self, ray: &Ray, ray_t: Interval) -> Option<GeometryHit> {
        let mut closest: Option<GeometryHit> = None;
        let mut range = ray_t;

        let a = ray.direction.length_squared();
        for (i, (center, radius)) in self.centers.iter().zip(&self.radii).enumerate() {
            let oc = *center - ray.origin;
            let h = ray.direction.dot(oc);
            let c = oc.length_squared() - radius * radius;

            let discriminant = h * h - a * c;
            if discriminant < 0.0 {
                continue;
            }
            let sqrtd = discriminant.sqrt();

            // Find the nearest root that lies in the acceptable range
            let mut root = (h - sqrtd) / a;
            if !range.surrounds(root) {
                root = (h + sqrtd) / a;
                if !range.surrounds(root) {
                    continue;
                }
            }

            let normal = (ray.at(root) - *center) / *radius;
            let theta = (-normal.y).acos();
            let phi = (-normal.z).atan2(normal.x) + std::f32::consts::PI;
            closest = Some(GeometryHit {
                t: root,
                normal,
                prim_id: i as u32,
                uv: Vec2::new(
                    phi / (2.0 * std::f32::consts::PI),
                    theta / std::f32::consts::PI,
                ),
            });
            range = range.with_max(root);
        }

        closest
    }

    fn sample_area(&self, pick: f32, u: Vec2) -> Option<AreaSample> {
        let (i, _) = pick_primitive(pick, self.centers.len());
        let (center, radius) = (self.centers[i], self.radii[i]);

        let z = 1.0 - 2.0 * u.x;
        let r = (1.0 - z * z).max(0.0).sqrt();
        let phi = 2.0 * std::f32::consts::PI * u.y;
        let normal = Vec3::new(r * phi.cos(), r * phi.sin(), z);

        Some(AreaSample {
            position: center + radius * normal,
            normal,
            pdf: 1.0 / (self.centers.len() as f32 * 4.0 * std::f32::consts::PI * radius * radius),
        })
    }
}

/// Indexed triangle mesh.
pub struct Triangles {
    positions: Vec<Vec3>,
    indices: Vec<[u32; 3]>,
    bounds: Aabb,
}

impl Triangles {
    pub fn new(positions: Vec<Vec3>, indices: Vec<[u32; 3]>) -> SceneResult<Self> {
        if indices.is_empty() {
            return Err(SceneError::EmptyGeometry { kind: "triangles" });
        }
        for (triangle, idx) in indices.iter().enumerate() {
            if let Some(bad) = idx.iter().find(|i| **i as usize >= positions.len()) {
                return Err(SceneError::IndexOutOfRange {
                    triangle,
                    index: *bad,
                    vertex_count: positions.len(),
                });
            }
        }

        let mut bounds = Aabb::EMPTY;
        for idx in &indices {
            for i in idx {
                bounds.extend(positions[*i as usize]);
            }
        }
        Ok(Self {
            positions,
            indices,
            bounds,
        })
    }
}

impl Geometry for Triangles {
    fn kind(&self) -> &'static str {
        "triangles"
    }

    fn primitive_count(&self) -> usize {
        self.indices.len()
    }

    fn bounds(&self) -> Aabb {
        self.bounds
    }

    /// Möller-Trumbore, two-sided.
    fn intersect(&self, ray: &Ray, ray_t: Interval) -> Option<GeometryHit> {
        let mut closest: Option<GeometryHit> = None;
        let mut range = ray_t;

        for (i, idx) in self.indices.iter().enumerate() {
            let v0 = self.positions[idx[0] as usize];
            let edge1 = self.positions[idx[1] as usize] - v0;
            let edge2 = self.positions[idx[2] as usize] - v0;

            let h = ray.direction.cross(edge2);
            let a = edge1.dot(h);
            // Ray is parallel to triangle
            if a.abs() < 1e-8 {
                continue;
            }

            let f = 1.0 / a;
            let s = ray.origin - v0;
            let u = f * s.dot(h);
            if !(0.0..=1.0).contains(&u) {
                continue;
            }
            let q = s.cross(edge1);
            let v = f * ray.direction.dot(q);
            if v < 0.0 || u + v > 1.0 {
                continue;
            }

            let t = f * edge2.dot(q);
            if !range.surrounds(t) {
                continue;
            }

            closest = Some(GeometryHit {
                t,
                normal: edge1.cross(edge2).normalize(),
                prim_id: i as u32,
                uv: Vec2::new(u, v),
            });
            range = range.with_max(t);
        }

        closest
    }

    fn sample_area(&self, pick: f32, u: Vec2) -> Option<AreaSample> {
        let (i, _) = pick_primitive(pick, self.indices.len());
        let [a, b, c] = self.indices[i].map(|v| self.positions[v as usize]);
        let cross = (b - a).cross(c - a);
        let area = 0.5 * cross.length();
        if !(area > 0.0) {
            return None;
        }

        let su = u.x.sqrt();
        let (w0, w1) = (1.0 - su, u.y * su);
        Some(AreaSample {
            position: a * w0 + b * w1 + c * (1.0 - w0 - w1),
            normal: cross / (2.0 * area),
            pdf: 1.0 / (self.indices.len() as f32 * area),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn forward(origin: Vec3, dir: Vec3) -> Ray {
        Ray::new(origin, dir.normalize())
    }

    #[test]
    fn test_boxes_picks_closest() {
        let boxes = Boxes::new(vec![
            Aabb::new(Vec3::new(-1.0, -1.0, -6.0), Vec3::new(1.0, 1.0, -5.0)),
            Aabb::new(Vec3::new(-1.0, -1.0, -3.0), Vec3::new(1.0, 1.0, -2.0)),
        ])
        .unwrap();

        let hit = boxes
            .intersect(&forward(Vec3::ZERO, -Vec3::Z), Interval::FORWARD)
            .unwrap();
        assert_eq!(hit.prim_id, 1);
        assert!((hit.t - 2.0).abs() < 1e-5);
        assert_eq!(hit.normal, Vec3::Z);
    }

    #[test]
    fn test_boxes_reject_empty() {
        assert!(matches!(
            Boxes::new(Vec::new()),
            Err(SceneError::EmptyGeometry { kind: "boxes" })
        ));
    }

    #[test]
    fn test_sphere_hit_and_miss() {
        let spheres = Spheres::new(vec![Vec3::new(0.0, 0.0, -3.0)], 1.0).unwrap();
        let hit = spheres
            .intersect(&forward(Vec3::ZERO, -Vec3::Z), Interval::FORWARD)
            .unwrap();
        assert!((hit.t - 2.0).abs() < 1e-4);
        assert!((hit.normal - Vec3::Z).length() < 1e-4);

        assert!(spheres
            .intersect(&forward(Vec3::ZERO, Vec3::X), Interval::FORWARD)
            .is_none());
    }

    #[test]
    fn test_sphere_radius_validation() {
        assert!(Spheres::new(vec![Vec3::ZERO], 0.0).is_err());
        assert!(Spheres::with_radii(vec![Vec3::ZERO], vec![1.0, 2.0]).is_err());
    }

    #[test]
    fn test_triangle_hit() {
        let tris = Triangles::new(
            vec![
                Vec3::new(-1.0, -1.0, -2.0),
                Vec3::new(1.0, -1.0, -2.0),
                Vec3::new(0.0, 1.0, -2.0),
            ],
            vec![[0, 1, 2]],
        )
        .unwrap();
        let hit = tris
            .intersect(&forward(Vec3::ZERO, -Vec3::Z), Interval::FORWARD)
            .unwrap();
        assert_eq!(hit.prim_id, 0);
        assert!((hit.t - 2.0).abs() < 1e-5);
    }

    #[test]
    fn test_triangle_index_validation() {
        let err = Triangles::new(vec![Vec3::ZERO; 3], vec![[0, 1, 3]]).err().unwrap();
        assert_eq!(
            err,
            SceneError::IndexOutOfRange {
                triangle: 0,
                index: 3,
                vertex_count: 3
            }
        );
    }

    #[test]
    fn test_box_samples_lie_on_faces() {
        let b = Boxes::new(vec![Aabb::new(Vec3::ZERO, Vec3::new(2.0, 1.0, 1.0))]).unwrap();
        for k in 0..16 {
            let pick = k as f32 / 16.0;
            let s = b.sample_area(pick, Vec2::new(0.3, 0.7)).unwrap();
            // surface area 2 * (1 + 2 + 2) = 10
            assert!((s.pdf - 0.1).abs() < 1e-6);
            let axis = (0..3).find(|a| s.normal[*a] != 0.0).unwrap();
            let expected = if s.normal[axis] > 0.0 { b.boxes[0].max[axis] } else { 0.0 };
            assert!((s.position[axis] - expected).abs() < 1e-6);
        }
    }

    #[test]
    fn test_sphere_samples_lie_on_surface() {
        let spheres = Spheres::new(vec![Vec3::new(1.0, 2.0, 3.0)], 2.0).unwrap();
        let s = spheres.sample_area(0.5, Vec2::new(0.25, 0.6)).unwrap();
        assert!(((s.position - Vec3::new(1.0, 2.0, 3.0)).length() - 2.0).abs() < 1e-5);
        assert!((s.normal.length() - 1.0).abs() < 1e-5);
        assert!((s.pdf * 16.0 * std::f32::consts::PI - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_degenerate_triangle_is_not_sampled() {
        let tris = Triangles::new(
            vec![Vec3::ZERO, Vec3::X, Vec3::Y, Vec3::new(2.0, 0.0, 0.0)],
            vec![[0, 1, 2], [0, 1, 3]],
        )
        .unwrap();
        let s = tris.sample_area(0.2, Vec2::new(0.5, 0.5)).unwrap();
        assert_eq!(s.normal, Vec3::Z);
        assert!((s.pdf - 1.0).abs() < 1e-6);
        assert!(s.position.z.abs() < 1e-6);
        assert!(tris.sample_area(0.9, Vec2::new(0.5, 0.5)).is_none());
    }
}
