//! Cameras map normalized screen positions to primary rays.
//!
//! Screen space is [0, 1] x [0, 1] with the origin at the bottom-left
//! corner of the image.

use tessel_math::{Ray, Vec2, Vec3};

use crate::error::{SceneError, SceneResult};

/// Projection model of a camera.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Projection {
    Perspective {
        /// Vertical field of view in degrees
        fovy: f32,
        /// Lens radius; zero disables depth of field
        aperture_radius: f32,
        /// Distance from the camera to the plane of perfect focus
        focus_distance: f32,
    },
    Orthographic {
        /// Height of the view volume in world units
        height: f32,
    },
}

/// Camera for generating primary rays.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Camera {
    pub position: Vec3,
    pub direction: Vec3,
    pub up: Vec3,
    /// Width / height of the image
    pub aspect: f32,
    pub projection: Projection,
}

impl Camera {
    /// Pinhole perspective camera.
    pub fn perspective(position: Vec3, direction: Vec3, up: Vec3, fovy: f32, aspect: f32) -> Self {
        Self {
            position,
            direction,
            up,
            aspect,
            projection: Projection::Perspective {
                fovy,
                aperture_radius: 0.0,
                focus_distance: 1.0,
            },
        }
    }

    pub fn orthographic(
        position: Vec3,
        direction: Vec3,
        up: Vec3,
        height: f32,
        aspect: f32,
    ) -> Self {
        Self {
            position,
            direction,
            up,
            aspect,
            projection: Projection::Orthographic { height },
        }
    }

    /// Point the camera at `target`.
    pub fn looking_at(mut self, target: Vec3) -> Self {
        self.direction = target - self.position;
        self
    }

    /// Set lens settings. Ignored by orthographic cameras.
    pub fn with_depth_of_field(mut self, aperture: f32, focus: f32) -> Self {
        if let Projection::Perspective {
            aperture_radius,
            focus_distance,
            ..
        } = &mut self.projection
        {
            *aperture_radius = aperture;
            *focus_distance = focus;
        }
        self
    }

    /// Reject cameras that cannot produce well-formed rays.
    pub fn validate(&self) -> SceneResult<()> {
        let finite = self.position.is_finite() && self.direction.is_finite() && self.up.is_finite();
        if !finite {
            return Err(SceneError::InvalidCamera("non-finite position, direction or up".into()));
        }
        if self.direction.length_squared() == 0.0 {
            return Err(SceneError::InvalidCamera("zero view direction".into()));
        }
        if self.direction.cross(self.up).length_squared() < 1e-12 {
            return Err(SceneError::InvalidCamera(
                "up vector is parallel to the view direction".into(),
            ));
        }
        if !(self.aspect > 0.0 && self.aspect.is_finite()) {
            return Err(SceneError::InvalidCamera(format!(
                "aspect ratio {} must be positive",
                self.aspect
            )));
        }
        match self.projection {
            Projection::Perspective {
                fovy,
                aperture_radius,
                focus_distance,
            } => {
                if !(fovy > 0.0 && fovy < 180.0) {
                    return Err(SceneError::InvalidCamera(format!("fovy {fovy} outside (0, 180)")));
                }
                if !(aperture_radius >= 0.0) || !(focus_distance > 0.0) {
                    return Err(SceneError::InvalidCamera("invalid depth of field settings".into()));
                }
            }
            Projection::Orthographic { height } => {
                if !(height > 0.0 && height.is_finite()) {
                    return Err(SceneError::InvalidCamera(format!(
                        "orthographic height {height} must be positive"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Right-handed basis (right, up, forward).
    fn basis(&self) -> (Vec3, Vec3, Vec3) {
        let w = self.direction.normalize();
        let u = w.cross(self.up).normalize();
        let v = u.cross(w);
        (u, v, w)
    }

    /// Generate the primary ray through `screen` using `lens` (both in
    /// [0, 1]^2) to sample the aperture. The direction is unit length.
    pub fn generate_ray(&self, screen: Vec2, lens: Vec2) -> Ray {
        let (u, v, w) = self.basis();
        let ndc = screen * 2.0 - Vec2::ONE;

        match self.projection {
            Projection::Perspective {
                fovy,
                aperture_radius,
                focus_distance,
            } => {
                let half_h = (fovy.to_radians() * 0.5).tan();
                let half_w = half_h * self.aspect;
                let dir = w + u * (ndc.x * half_w) + v * (ndc.y * half_h);

                if aperture_radius <= 0.0 {
                    return Ray::new(self.position, dir.normalize());
                }

                let focal_point = self.position + dir * focus_distance;
                let disk = concentric_disk(lens) * aperture_radius;
                let origin = self.position + u * disk.x + v * disk.y;
                Ray::new(origin, (focal_point - origin).normalize())
            }
            Projection::Orthographic { height } => {
                let half_h = height * 0.5;
                let half_w = half_h * self.aspect;
                let origin = self.position + u * (ndc.x * half_w) + v * (ndc.y * half_h);
                Ray::new(origin, w)
            }
        }
    }
}

/// Map a point of the unit square onto the unit disk (Shirley-Chiu).
fn concentric_disk(p: Vec2) -> Vec2 {
    let o = p * 2.0 - Vec2::ONE;
    if o.x == 0.0 && o.y == 0.0 {
        return Vec2::ZERO;
    }
    let (r, theta) = if o.x.abs() > o.y.abs() {
        (o.x, std::f32::consts::FRAC_PI_4 * (o.y / o.x))
    } else {
        (
            o.y,
            std::f32::consts::FRAC_PI_2 - std::f32::consts::FRAC_PI_4 * (o.x / o.y),
        )
    };
    Vec2::new(theta.cos(), theta.sin()) * r
}
