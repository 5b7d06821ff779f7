//! Fast visualization renderer: ambient light with occlusion plus shadowed
//! distant lights, no indirect bounces.

use rand::RngCore;
use tessel_core::World;
use tessel_math::{Interval, Ray};

use super::{ambient_occlusion, direct_light, over_background, FrameData, Renderer, Sample};
use crate::config::RendererSettings;

#[derive(Debug, Clone, Default)]
pub struct SciVisRenderer {
    settings: RendererSettings,
}

impl SciVisRenderer {
    pub fn new(settings: RendererSettings) -> Self {
        Self {
            settings: settings.sanitized(),
        }
    }
}

impl Renderer for SciVisRenderer {
    fn name(&self) -> &str {
        "scivis"
    }

    fn settings(&self) -> &RendererSettings {
        &self.settings
    }

    fn shade(&self, frame: &FrameData, world: &World, ray: &Ray, rng: &mut dyn RngCore) -> Sample {
        let bg = self.settings.bg_color();
        let Some(hit) = world.intersect(ray, Interval::FORWARD) else {
            return Sample::background(bg);
        };

        let base = hit.material.base_color;
        let mut radiance = hit.material.emission;
        if frame.ambient.max_element() > 0.0 {
            let settings = &self.settings;
            let visibility =
                ambient_occlusion(world, &hit, settings.ao_samples, settings.ao_distance, rng);
            radiance += base * frame.ambient * visibility;
        }
        radiance += base * direct_light(world, frame, &hit);

        Sample {
            color: over_background(radiance, hit.material.opacity, bg),
            depth: hit.t,
            normal: hit.normal,
            albedo: base,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sampling::tile_rng;
    use std::sync::Arc;
    use tessel_core::{Boxes, Camera, GeometricModel, Light, Material};
    use tessel_math::{Vec2, Vec3, Vec4};

    fn lit_box(light: Light) -> World {
        let mut world = World::new();
        world
            .add_models([GeometricModel::new(Arc::new(Boxes::unit()))
                .with_material(Material::diffuse(Vec3::ONE))])
            .unwrap();
        world.add_light(light);
        world
    }

    fn center_ray() -> Ray {
        Camera::perspective(Vec3::new(0.0, 0.0, 5.0), -Vec3::Z, Vec3::Y, 30.0, 1.0)
            .generate_ray(Vec2::splat(0.5), Vec2::splat(0.5))
    }

    #[test]
    fn test_ambient_on_open_face_is_full() {
        let world = lit_box(Light::ambient(Vec3::ONE, 1.0));
        let r = SciVisRenderer::new(RendererSettings::default());
        let frame = FrameData::gather(&world, 1);
        let s = r.shade(&frame, &world, &center_ray(), &mut tile_rng(0, 0));
        // the front face of a lone box sees the whole hemisphere
        assert!((s.color - Vec4::ONE).abs().max_element() < 1e-5);
        assert!((s.depth - 4.5).abs() < 1e-4);
        assert_eq!(s.normal, Vec3::Z);
    }

    #[test]
    fn test_distant_light_from_behind_is_dark() {
        let world = lit_box(Light::distant(Vec3::Z, Vec3::ONE, 1.0));
        let r = SciVisRenderer::new(RendererSettings::default());
        let frame = FrameData::gather(&world, 1);
        let s = r.shade(&frame, &world, &center_ray(), &mut tile_rng(0, 0));
        assert_eq!(s.color, Vec4::new(0.0, 0.0, 0.0, 1.0));
    }

    #[test]
    fn test_miss_returns_background() {
        let world = World::new();
        let settings = RendererSettings::default().with_background([0.1, 0.2, 0.3, 1.0]);
        let r = SciVisRenderer::new(settings);
        let s = r.shade(&FrameData::default(), &world, &center_ray(), &mut tile_rng(0, 0));
        assert_eq!(s.color, Vec4::new(0.1, 0.2, 0.3, 1.0));
        assert!(s.depth.is_infinite());
    }
}
