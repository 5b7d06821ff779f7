//! Surface appearance attached to geometric models.

use tessel_math::Vec3;

/// A minimal diffuse/emissive material shared by all renderers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Material {
    /// Diffuse reflectance (RGB, 0-1)
    pub base_color: Vec3,
    /// Emitted radiance; non-zero makes the model a geometry light
    pub emission: Vec3,
    /// Opacity (0=transparent, 1=opaque)
    pub opacity: f32,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            base_color: Vec3::splat(0.8),
            emission: Vec3::ZERO,
            opacity: 1.0,
        }
    }
}

impl Material {
    pub fn diffuse(base_color: Vec3) -> Self {
        Self {
            base_color,
            ..Default::default()
        }
    }

    pub fn emissive(emission: Vec3) -> Self {
        Self {
            base_color: Vec3::ZERO,
            emission,
            opacity: 1.0,
        }
    }

    pub fn is_emissive(&self) -> bool {
        self.emission.max_element() > 0.0
    }
}
