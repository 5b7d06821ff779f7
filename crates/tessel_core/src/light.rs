//! Lights consumed by the shading renderers.

use tessel_math::Vec3;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Light {
    /// Uniform light arriving from every direction.
    Ambient { color: Vec3, intensity: f32 },
    /// Light from a direction at infinity. `direction` points from the
    /// light towards the scene.
    Distant {
        direction: Vec3,
        color: Vec3,
        intensity: f32,
    },
}

impl Light {
    pub fn ambient(color: Vec3, intensity: f32) -> Self {
        Light::Ambient { color, intensity }
    }

    pub fn distant(direction: Vec3, color: Vec3, intensity: f32) -> Self {
        Light::Distant {
            direction: direction.normalize_or_zero(),
            color,
            intensity,
        }
    }

    /// Emitted radiance (color scaled by intensity).
    pub fn radiance(&self) -> Vec3 {
        match self {
            Light::Ambient { color, intensity } => *color * *intensity,
            Light::Distant { color, intensity, .. } => *color * *intensity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distant_normalizes_direction() {
        let light = Light::distant(Vec3::new(0.0, -4.0, 0.0), Vec3::ONE, 2.0);
        match light {
            Light::Distant { direction, .. } => assert_eq!(direction, -Vec3::Y),
            _ => unreachable!(),
        }
        assert_eq!(light.radiance(), Vec3::splat(2.0));
    }
}
