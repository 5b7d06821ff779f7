//! Ray-cast debug views: one primary hit, colored by a geometric property.

use rand::RngCore;
use tessel_core::World;
use tessel_math::{Interval, Ray, Vec3, Vec4};

use super::{FrameData, Renderer, Sample};
use crate::config::{DebugMode, RendererSettings};
use crate::sampling::id_color;

#[derive(Debug, Clone, Default)]
pub struct DebugRenderer {
    settings: RendererSettings,
}

impl DebugRenderer {
    pub fn new(settings: RendererSettings) -> Self {
        Self {
            settings: settings.sanitized(),
        }
    }

    pub fn with_mode(mode: DebugMode) -> Self {
        Self::new(RendererSettings {
            debug_mode: mode,
            ..Default::default()
        })
    }

    pub fn mode(&self) -> DebugMode {
        self.settings.debug_mode
    }
}

impl Renderer for DebugRenderer {
    fn name(&self) -> &str {
        "debug"
    }

    fn settings(&self) -> &RendererSettings {
        &self.settings
    }

    fn shade(
        &self,
        _frame: &FrameData,
        world: &World,
        ray: &Ray,
        _rng: &mut dyn RngCore,
    ) -> Sample {
        let Some(hit) = world.intersect(ray, Interval::FORWARD) else {
            return Sample::background(self.settings.bg_color());
        };

        let rgb = match self.settings.debug_mode {
            DebugMode::EyeLight => {
                let facing = hit.normal.dot(-ray.direction.normalize()).abs();
                Vec3::splat(0.2 + 0.8 * facing)
            }
            DebugMode::Normal => hit.normal * 0.5 + Vec3::splat(0.5),
            DebugMode::PrimId => id_color(hit.prim_id),
            DebugMode::GeomId => {
                id_color(((hit.model.group.0 as u32) << 16) ^ hit.model.index as u32)
            }
            DebugMode::InstId => id_color(hit.instance.0 as u32),
            DebugMode::Depth => Vec3::splat(1.0 / hit.t.max(1e-6)),
            DebugMode::Uv => Vec3::new(hit.uv.x, hit.uv.y, (1.0 - hit.uv.x - hit.uv.y).max(0.0)),
            DebugMode::Backfacing => {
                if hit.front_face {
                    Vec3::new(0.0, 1.0, 0.0)
                } else {
                    Vec3::new(1.0, 0.0, 0.0)
                }
            }
        };

        Sample {
            color: rgb.extend(1.0),
            depth: hit.t,
            normal: hit.normal,
            albedo: hit.material.base_color,
        }
    }
}
