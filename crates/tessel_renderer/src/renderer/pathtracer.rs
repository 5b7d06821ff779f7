//! Unidirectional path tracer with next event estimation for distant
//! lights and emissive geometry.
//!
//! Surfaces are Lambertian: bounces are cosine-sampled, so the path
//! throughput is simply multiplied by the base color. Emissive models are
//! sampled directly at every vertex while `geometry_lights` is on; a
//! bounce that then hits one does not add its emission again. With it off
//! they only contribute when a path hits them. Ambient lights act as the
//! environment seen by escaping secondary paths.

use rand::RngCore;
use tessel_core::World;
use tessel_math::{Interval, Ray, Vec3};

use super::{direct_light, geometry_light, over_background, FrameData, Renderer, Sample};
use crate::config::RendererSettings;
use crate::error::Result;
use crate::framebuffer::FrameInfo;
use crate::sampling::{cosine_hemisphere, gen_f32, gen_vec2};

#[derive(Debug, Clone, Default)]
pub struct PathTracer {
    settings: RendererSettings,
}

impl PathTracer {
    pub fn new(settings: RendererSettings) -> Self {
        Self {
            settings: settings.sanitized(),
        }
    }
}

impl Renderer for PathTracer {
    fn name(&self) -> &str {
        "pathtracer"
    }

    fn settings(&self) -> &RendererSettings {
        &self.settings
    }

    fn begin_frame(&self, info: &FrameInfo, world: &World) -> Result<FrameData> {
        let mut frame = FrameData::gather(world, info.frame_id);
        if !self.settings.geometry_lights {
            frame.geometry_lights.clear();
        }
        Ok(frame)
    }

    fn shade(&self, frame: &FrameData, world: &World, ray: &Ray, rng: &mut dyn RngCore) -> Sample {
        let settings = &self.settings;
        let bg = settings.bg_color();

        let Some(first) = world.intersect(ray, Interval::FORWARD) else {
            return Sample::background(bg);
        };

        let mut radiance = Vec3::ZERO;
        let mut throughput = Vec3::ONE;
        let mut hit = first;

        for depth in 0..settings.max_depth.max(1) {
            let base = hit.material.base_color;
            if depth == 0 || !frame.samples_light(hit.instance, hit.model) {
                radiance += throughput * hit.material.emission;
            }
            let direct =
                direct_light(world, frame, &hit) + geometry_light(world, frame, &hit, &mut *rng);
            radiance += throughput * base * direct;

            throughput *= base;
            if throughput.max_element() < settings.min_contribution {
                break;
            }
            if depth + 1 >= settings.roulette_depth {
                let survive = throughput.max_element().min(0.95);
                if gen_f32(rng) >= survive {
                    break;
                }
                throughput /= survive;
            }
            if depth + 1 == settings.max_depth {
                break;
            }

            let dir = cosine_hemisphere(hit.normal, gen_vec2(rng));
            let next = Ray::spawn(hit.position, hit.normal, dir);
            match world.intersect(&next, Interval::FORWARD) {
                Some(h) => hit = h,
                None => {
                    radiance += throughput * frame.ambient;
                    break;
                }
            }
        }

        if let Some(max) = settings.max_contribution {
            radiance = radiance.min(Vec3::splat(max));
        }

        Sample {
            color: over_background(radiance, first.material.opacity, bg),
            depth: first.t,
            normal: first.normal,
            albedo: first.material.base_color,
        }
    }
}
