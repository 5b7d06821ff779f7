//! Ambient occlusion renderer.

use rand::RngCore;
use tessel_core::World;
use tessel_math::{Interval, Ray};

use super::{ambient_occlusion, over_background, FrameData, Renderer, Sample};
use crate::config::RendererSettings;

/// Shades hits by base color times the unoccluded fraction of the
/// hemisphere, scaled by `ao_intensity`.
#[derive(Debug, Clone, Default)]
pub struct AoRenderer {
    settings: RendererSettings,
}

impl AoRenderer {
    pub fn new(settings: RendererSettings) -> Self {
        Self {
            settings: settings.sanitized(),
        }
    }
}

impl Renderer for AoRenderer {
    fn name(&self) -> &str {
        "ao"
    }

    fn settings(&self) -> &RendererSettings {
        &self.settings
    }

    fn shade(&self, _frame: &FrameData, world: &World, ray: &Ray, rng: &mut dyn RngCore) -> Sample {
        let bg = self.settings.bg_color();
        let Some(hit) = world.intersect(ray, Interval::FORWARD) else {
            return Sample::background(bg);
        };

        let samples = self.settings.ao_samples.max(1);
        let visibility = ambient_occlusion(world, &hit, samples, self.settings.ao_distance, rng);
        let base = hit.material.base_color;

        Sample {
            color: over_background(
                base * visibility * self.settings.ao_intensity,
                hit.material.opacity,
                bg,
            ),
            depth: hit.t,
            normal: hit.normal,
            albedo: base,
        }
    }
}
