//! Renderers turn primary rays into pixel samples.
//!
//! All variants share the per-tile sampling loop in
//! [`render_tile_samples`]; a variant mostly supplies [`Renderer::shade`].
//! Frame-constant state, like the light list, is collected once per frame
//! by [`Renderer::begin_frame`] and handed to every tile job.

mod ao;
mod debug;
mod pathtracer;
mod registry;
mod scivis;

pub use ao::AoRenderer;
pub use debug::DebugRenderer;
pub use pathtracer::PathTracer;
pub use registry::{RendererFactory, RendererRegistry};
pub use scivis::SciVisRenderer;

use rand::RngCore;
use tessel_core::{Camera, InstanceId, Light, ModelId, SurfaceHit, World};
use tessel_math::{luminance, Interval, Ray, Vec2, Vec3, Vec4};

use crate::config::RendererSettings;
use crate::error::Result;
use crate::framebuffer::{FrameBuffer, FrameInfo};
use crate::sampling::{cosine_hemisphere, gen_f32, gen_vec2, tile_rng};
use crate::task::SyncEvent;
use crate::tile::Tile;

/// Result of shading one primary ray.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    /// Linear RGBA
    pub color: Vec4,
    /// Distance to the first hit; infinity on a miss
    pub depth: f32,
    pub normal: Vec3,
    pub albedo: Vec3,
}

impl Sample {
    pub fn background(bg: Vec4) -> Self {
        Self {
            color: bg,
            depth: f32::INFINITY,
            normal: Vec3::ZERO,
            albedo: Vec3::ZERO,
        }
    }
}

/// A distant light in the form the shading loops use.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DistantLight {
    /// Unit vector from the surface towards the light
    pub to_light: Vec3,
    pub radiance: Vec3,
}

/// Per-frame state shared by every tile job of a frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameData {
    pub frame_id: u64,
    /// Sum of all ambient lights
    pub ambient: Vec3,
    pub distant: Vec<DistantLight>,
    /// Instanced emissive models that can be sampled as area lights
    pub geometry_lights: Vec<(InstanceId, ModelId)>,
}

impl FrameData {
    /// Collect the lights of `world`.
    pub fn gather(world: &World, frame_id: u64) -> Self {
        let mut data = FrameData {
            frame_id,
            ..Default::default()
        };

        for light in world.lights() {
            match *light {
                Light::Ambient { .. } => data.ambient += light.radiance(),
                Light::Distant { direction, .. } => data.distant.push(DistantLight {
                    to_light: -direction,
                    radiance: light.radiance(),
                }),
            }
        }

        for (id, instance) in world.instances() {
            let Some(group) = world.group(instance.group()) else {
                continue;
            };
            for (index, model) in group.models().iter().enumerate() {
                let sampleable = model.geometry().sample_area(0.5, Vec2::splat(0.5)).is_some();
                if model.material().is_emissive() && sampleable {
                    data.geometry_lights.push((
                        id,
                        ModelId {
                            group: instance.group(),
                            index,
                        },
                    ));
                }
            }
        }

        data
    }

    /// Whether paths reach `model` through light sampling rather than by
    /// hitting it.
    pub fn samples_light(&self, instance: InstanceId, model: ModelId) -> bool {
        self.geometry_lights.contains(&(instance, model))
    }
}

/// What lies under a screen position.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PickResult {
    pub has_hit: bool,
    pub instance: Option<InstanceId>,
    pub model: Option<ModelId>,
    pub prim_id: Option<u32>,
    pub world_position: Vec3,
}

impl From<&SurfaceHit> for PickResult {
    fn from(hit: &SurfaceHit) -> Self {
        Self {
            has_hit: true,
            instance: Some(hit.instance),
            model: Some(hit.model),
            prim_id: Some(hit.prim_id),
            world_position: hit.position,
        }
    }
}

/// A rendering algorithm.
///
/// Implementations must be shareable between the worker threads of a
/// frame; `render_tile` is called concurrently for different tiles.
pub trait Renderer: Send + Sync {
    fn name(&self) -> &str;

    fn settings(&self) -> &RendererSettings;

    /// Prepare frame-constant state for the frame described by `info`.
    /// Runs once before any tile, before the framebuffer advances.
    fn begin_frame(&self, info: &FrameInfo, world: &World) -> Result<FrameData> {
        Ok(FrameData::gather(world, info.frame_id))
    }

    /// Shade one primary ray.
    fn shade(&self, frame: &FrameData, world: &World, ray: &Ray, rng: &mut dyn RngCore) -> Sample;

    /// Fill `tile` with this frame's samples for its region.
    fn render_tile(
        &self,
        info: &FrameInfo,
        camera: &Camera,
        world: &World,
        frame: &FrameData,
        tile: &mut Tile,
        job_id: usize,
    ) -> Result<()> {
        render_tile_samples(self, info, camera, world, frame, tile, job_id);
        Ok(())
    }

    /// Runs once after all tiles of a frame were accumulated.
    fn end_frame(&self, fb: &mut FrameBuffer, _frame: FrameData) {
        fb.set_completed_event(SyncEvent::FrameFinished);
    }

    /// Find the surface under `screen` (normalized, bottom-left origin).
    fn pick(
        &self,
        _fb: &FrameBuffer,
        camera: &Camera,
        world: &World,
        screen: Vec2,
    ) -> Result<PickResult> {
        let ray = camera.generate_ray(screen, Vec2::splat(0.5));
        Ok(world
            .intersect(&ray, Interval::FORWARD)
            .map(|hit| PickResult::from(&hit))
            .unwrap_or_default())
    }
}

/// The shared sampling loop: `spp` jittered primary rays per pixel,
/// averaged into the tile. The tile error is the mean relative standard
/// error of each pixel's luminance.
pub fn render_tile_samples<R: Renderer + ?Sized>(
    renderer: &R,
    info: &FrameInfo,
    camera: &Camera,
    world: &World,
    frame: &FrameData,
    tile: &mut Tile,
    job_id: usize,
) {
    let spp = renderer.settings().spp.max(1);
    let inv_spp = 1.0 / spp as f32;
    let mut rng = tile_rng(job_id, tile.accum_id);
    let (w, h) = (info.width as f32, info.height as f32);
    let region = tile.region;

    let mut error_sum = 0.0;
    for ly in 0..region.height {
        for lx in 0..region.width {
            let (px, py) = ((region.x + lx) as f32, (region.y + ly) as f32);

            let mut color = Vec4::ZERO;
            let mut normal = Vec3::ZERO;
            let mut albedo = Vec3::ZERO;
            let mut depth = f32::INFINITY;
            // Welford running variance of the luminance
            let (mut mean, mut m2) = (0.0f32, 0.0f32);

            for s in 0..spp {
                let jitter = gen_vec2(&mut rng);
                let screen = Vec2::new((px + jitter.x) / w, (py + jitter.y) / h);
                let ray = camera.generate_ray(screen, gen_vec2(&mut rng));
                let sample = renderer.shade(frame, world, &ray, &mut rng);

                color += sample.color;
                normal += sample.normal;
                albedo += sample.albedo;
                depth = depth.min(sample.depth);

                let l = luminance(sample.color.truncate());
                let delta = l - mean;
                mean += delta / (s + 1) as f32;
                m2 += delta * (l - mean);
            }

            let i = tile.pixel_index(lx, ly);
            tile.color[i] = color * inv_spp;
            tile.normal[i] = normal * inv_spp;
            tile.albedo[i] = albedo * inv_spp;
            tile.depth[i] = depth;

            if spp > 1 && mean > 0.0 {
                let variance = m2 / (spp - 1) as f32;
                error_sum += (variance * inv_spp).sqrt() / mean;
            }
        }
    }

    tile.error = error_sum / region.pixel_count().max(1) as f32;
}

/// Fraction of `samples` cosine-distributed rays that leave the surface
/// unoccluded within `distance`.
pub(crate) fn ambient_occlusion(
    world: &World,
    hit: &SurfaceHit,
    samples: u32,
    distance: f32,
    rng: &mut dyn RngCore,
) -> f32 {
    if samples == 0 {
        return 1.0;
    }
    let range = Interval::FORWARD.with_max(distance);
    let visible = (0..samples)
        .filter(|_| {
            let dir = cosine_hemisphere(hit.normal, gen_vec2(&mut *rng));
            !world.occluded(&Ray::spawn(hit.position, hit.normal, dir), range)
        })
        .count();
    visible as f32 / samples as f32
}

/// Direct light from all distant lights, with shadow rays.
pub(crate) fn direct_light(world: &World, frame: &FrameData, hit: &SurfaceHit) -> Vec3 {
    frame
        .distant
        .iter()
        .filter_map(|light| {
            let cos = hit.normal.dot(light.to_light);
            if cos <= 0.0 {
                return None;
            }
            let shadow = Ray::spawn(hit.position, hit.normal, light.to_light);
            (!world.occluded(&shadow, Interval::FORWARD)).then(|| light.radiance * cos)
        })
        .sum()
}

/// Direct light from one emissive model, picked uniformly, through a
/// sampled point on its surface. Emitters are two-sided.
pub(crate) fn geometry_light(
    world: &World,
    frame: &FrameData,
    hit: &SurfaceHit,
    rng: &mut dyn RngCore,
) -> Vec3 {
    let count = frame.geometry_lights.len();
    if count == 0 {
        return Vec3::ZERO;
    }
    let index = ((gen_f32(&mut *rng) * count as f32) as usize).min(count - 1);
    let (instance, model) = frame.geometry_lights[index];
    let Some(emission) = world.model(model).map(|m| m.material().emission) else {
        return Vec3::ZERO;
    };
    let pick = gen_f32(&mut *rng);
    let Some(sample) = world.sample_area(instance, model, pick, gen_vec2(&mut *rng)) else {
        return Vec3::ZERO;
    };

    let to_light = sample.position - hit.position;
    let dist2 = to_light.length_squared();
    if !(dist2 > 0.0) {
        return Vec3::ZERO;
    }
    let dist = dist2.sqrt();
    let wi = to_light / dist;
    let cos_surface = hit.normal.dot(wi);
    let cos_light = sample.normal.dot(wi).abs();
    if cos_surface <= 0.0 || cos_light <= 0.0 {
        return Vec3::ZERO;
    }

    let shadow = Ray::spawn(hit.position, hit.normal, wi);
    if world.occluded(&shadow, Interval::FORWARD.with_max(dist * (1.0 - 1e-3))) {
        return Vec3::ZERO;
    }
    let geometry = cos_surface * cos_light / (std::f32::consts::PI * dist2);
    emission * (geometry * count as f32 / sample.pdf)
}

/// Blend a surface color over the background by material opacity.
pub(crate) fn over_background(rgb: Vec3, opacity: f32, bg: Vec4) -> Vec4 {
    let a = opacity.clamp(0.0, 1.0);
    (rgb * a + bg.truncate() * (1.0 - a)).extend(a + bg.w * (1.0 - a))
}
