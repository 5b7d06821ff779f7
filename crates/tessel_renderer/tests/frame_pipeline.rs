//! End-to-end frames through a render context: tiling, accumulation,
//! cancellation, picking and failure reporting.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use rand::RngCore;
use tessel_core::{Boxes, Camera, GeometricModel, InstanceId, Light, Material, World};
use tessel_math::{Ray, Vec2, Vec3, Vec4};
use tessel_renderer::{
    Channel, Channels, DeviceConfig, ErrorKind, FrameBuffer, FrameData, FrameInfo, PixelFormat,
    RenderContext, RenderError, Renderer, RendererSettings, Sample, SyncEvent, TaskStatus, Tile,
    ToneCurve, ToneMapper,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn context() -> RenderContext {
    init_logging();
    RenderContext::new(DeviceConfig {
        num_threads: Some(4),
        ..Default::default()
    })
    .unwrap()
}

fn camera() -> Camera {
    Camera::perspective(Vec3::new(0.0, 0.0, 5.0), -Vec3::Z, Vec3::Y, 45.0, 1.0)
}

fn box_world() -> World {
    let mut world = World::new();
    world
        .add_models([GeometricModel::new(Arc::new(Boxes::unit()))
            .with_material(Material::diffuse(Vec3::splat(0.7)))])
        .unwrap();
    world.add_light(Light::ambient(Vec3::ONE, 1.0));
    world.add_light(Light::distant(Vec3::new(-1.0, -1.0, -1.0), Vec3::ONE, 1.0));
    world
}

fn read_f32(fb: &mut FrameBuffer, channel: Channel) -> Vec<f32> {
    let m = fb.map(channel).unwrap();
    let values = m.data().as_f32().unwrap().to_vec();
    fb.unmap(m).unwrap();
    values
}

/// Fills tiles with a fixed value, or `accum_id + 1`, and counts jobs.
/// Tiles with an odd index fail while `fail_odd` is set.
struct Scripted {
    settings: RendererSettings,
    value: Option<f32>,
    fail_odd: AtomicBool,
    jobs: AtomicUsize,
}

impl Scripted {
    fn new(value: Option<f32>) -> Self {
        Self {
            settings: RendererSettings::default(),
            value,
            fail_odd: AtomicBool::new(false),
            jobs: AtomicUsize::new(0),
        }
    }
}

impl Renderer for Scripted {
    fn name(&self) -> &str {
        "scripted"
    }

    fn settings(&self) -> &RendererSettings {
        &self.settings
    }

    fn shade(
        &self,
        _frame: &FrameData,
        _world: &World,
        _ray: &Ray,
        _rng: &mut dyn RngCore,
    ) -> Sample {
        Sample::background(Vec4::ZERO)
    }

    fn render_tile(
        &self,
        _info: &FrameInfo,
        _camera: &Camera,
        _world: &World,
        _frame: &FrameData,
        tile: &mut Tile,
        job_id: usize,
    ) -> tessel_renderer::Result<()> {
        self.jobs.fetch_add(1, Ordering::Relaxed);
        if self.fail_odd.load(Ordering::Relaxed) && job_id % 2 == 1 {
            return Err(RenderError::OutOfMemory {
                what: "scripted tile",
                bytes: 1 << 20,
            });
        }
        let v = self.value.unwrap_or(tile.accum_id as f32 + 1.0);
        tile.color.fill(Vec4::new(v, v, v, 1.0));
        Ok(())
    }
}

#[test]
fn test_empty_world_gives_background_everywhere() {
    let ctx = context();
    let bg = [0.2, 0.3, 0.4, 1.0];
    let renderer = ctx
        .new_renderer("scivis", RendererSettings::default().with_background(bg))
        .unwrap();
    let mut fb = FrameBuffer::new(256, 256, PixelFormat::Rgba32F, Channels::COLOR).unwrap();
    assert_eq!(fb.tile_count(), 16);

    let variance = ctx.render_frame(&mut fb, renderer.as_ref(), &camera(), &World::new()).unwrap();
    assert_eq!(variance, 0.0);

    let color = read_f32(&mut fb, Channel::Color);
    assert_eq!(color.len(), 256 * 256 * 4);
    for px in color.chunks_exact(4) {
        assert_eq!(px, &bg);
    }
}

#[test]
fn test_two_frames_average() {
    let ctx = context();
    let renderer = Scripted::new(None);
    let channels = Channels::COLOR | Channels::ACCUM;
    let mut fb = FrameBuffer::new(100, 80, PixelFormat::Rgba32F, channels).unwrap();

    ctx.render_frame(&mut fb, &renderer, &camera(), &World::new()).unwrap();
    assert_eq!(fb.accumulation_count(), 1);
    ctx.render_frame(&mut fb, &renderer, &camera(), &World::new()).unwrap();
    assert_eq!(fb.accumulation_count(), 2);
    assert_eq!(fb.frame_id(), 2);

    let accum = read_f32(&mut fb, Channel::Accum);
    for px in accum.chunks_exact(4) {
        assert_eq!(px[0], 1.5);
        assert_eq!(px[3], 1.0);
    }
}

#[test]
fn test_clear_matches_fresh_framebuffer() {
    let ctx = context();
    let renderer = ctx
        .new_renderer("pathtracer", RendererSettings::default().with_spp(2))
        .unwrap();
    let world = box_world();
    let channels = Channels::COLOR | Channels::ACCUM;

    let mut used = FrameBuffer::new(96, 96, PixelFormat::Rgba32F, channels).unwrap();
    for _ in 0..3 {
        ctx.render_frame(&mut used, renderer.as_ref(), &camera(), &world).unwrap();
    }
    used.clear();
    assert_eq!(used.accumulation_count(), 0);
    ctx.render_frame(&mut used, renderer.as_ref(), &camera(), &world).unwrap();

    let mut fresh = FrameBuffer::new(96, 96, PixelFormat::Rgba32F, channels).unwrap();
    ctx.render_frame(&mut fresh, renderer.as_ref(), &camera(), &world).unwrap();

    assert_eq!(read_f32(&mut used, Channel::Accum), read_f32(&mut fresh, Channel::Accum));
    assert_eq!(used.accumulation_count(), 1);
    assert_eq!(used.frame_id(), 4);
}

#[test]
fn test_pick_hit_and_miss() {
    let ctx = context();
    let renderer = ctx.new_renderer("debug", RendererSettings::default()).unwrap();
    let fb = FrameBuffer::new(64, 64, PixelFormat::Srgba, Channels::COLOR).unwrap();
    let world = box_world();

    let hit = ctx
        .pick(&fb, renderer.as_ref(), &camera(), &world, Vec2::splat(0.5))
        .unwrap();
    assert!(hit.has_hit);
    assert_eq!(hit.instance, Some(InstanceId(0)));
    assert_eq!(hit.prim_id, Some(0));
    assert!((hit.world_position - Vec3::new(0.0, 0.0, 0.5)).length() < 1e-4);

    let miss = ctx
        .pick(&fb, renderer.as_ref(), &camera(), &world, Vec2::new(0.02, 0.98))
        .unwrap();
    assert!(!miss.has_hit);
    assert_eq!(miss.instance, None);
}

#[test]
fn test_async_frame_completes() {
    let ctx = context();
    let renderer = ctx.new_renderer("ao", RendererSettings::default()).unwrap();
    let fb = Arc::new(Mutex::new(
        FrameBuffer::new(128, 128, PixelFormat::Srgba, Channels::COLOR | Channels::DEPTH).unwrap(),
    ));
    let world = Arc::new(box_world());

    let task = ctx.render_frame_async(&fb, &renderer, &camera(), &world).unwrap();
    task.wait(SyncEvent::FrameFinished);
    assert!(task.is_ready(SyncEvent::WorldRendered));
    assert_eq!(task.progress(), 1.0);

    let variance = task.wait_result().unwrap();
    assert_eq!(variance, 0.0);

    let mut fb = fb.lock().unwrap();
    assert_eq!(fb.frame_id(), 1);
    assert_eq!(fb.completed_event(), SyncEvent::FrameFinished);

    // the box covers the center, the corner sees nothing
    let depth = read_f32(&mut fb, Channel::Depth);
    assert!((depth[64 * 128 + 64] - 4.5).abs() < 0.05);
    assert!(depth[0].is_infinite());
}

#[test]
fn test_cancel_never_hangs() {
    let ctx = context();
    let renderer = ctx
        .new_renderer("pathtracer", RendererSettings::default().with_spp(8))
        .unwrap();
    let fb = Arc::new(Mutex::new(
        FrameBuffer::new(512, 512, PixelFormat::Srgba, Channels::COLOR | Channels::ACCUM).unwrap(),
    ));
    let world = Arc::new(box_world());

    let task = ctx.render_frame_async(&fb, &renderer, &camera(), &world).unwrap();
    task.cancel();
    task.cancel();
    task.wait(SyncEvent::TaskFinished);

    let status = task.status();
    assert!(status.is_terminal());
    let result = task.wait_result().unwrap();

    let fb = fb.lock().unwrap();
    if status == TaskStatus::Cancelled {
        assert_eq!(fb.accumulation_count(), 0);
        assert_eq!(result, 0.0);
    } else {
        assert_eq!(fb.accumulation_count(), 1);
    }
}

#[test]
fn test_progress_is_monotonic() {
    let ctx = context();
    let renderer = ctx.new_renderer("scivis", RendererSettings::default()).unwrap();
    let fb = Arc::new(Mutex::new(
        FrameBuffer::new(320, 320, PixelFormat::Srgba, Channels::COLOR).unwrap(),
    ));
    let world = Arc::new(box_world());

    let task = ctx.render_frame_async(&fb, &renderer, &camera(), &world).unwrap();
    let mut last = 0.0;
    while !task.is_ready(SyncEvent::TaskFinished) {
        let p = task.progress();
        assert!((0.0..=1.0).contains(&p));
        assert!(p >= last, "progress went from {last} to {p}");
        last = p;
        std::thread::yield_now();
    }
    assert_eq!(task.progress(), 1.0);
    task.wait_result().unwrap();
}

#[test]
fn test_failed_tiles_are_reported_and_left_untouched() {
    let ctx = context();
    let renderer = Scripted::new(Some(1.0));
    let mut fb = FrameBuffer::new(256, 256, PixelFormat::Rgba32F, Channels::COLOR).unwrap();
    ctx.render_frame(&mut fb, &renderer, &camera(), &World::new()).unwrap();

    let failing = Scripted::new(Some(5.0));
    failing.fail_odd.store(true, Ordering::Relaxed);
    let err = ctx.render_frame(&mut fb, &failing, &camera(), &World::new()).unwrap_err();
    match &err {
        RenderError::TilesFailed { failed, total, first } => {
            assert_eq!((*failed, *total), (8, 16));
            assert_eq!(first.kind(), ErrorKind::OutOfMemory);
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(err.kind(), ErrorKind::OutOfMemory);
    // the frame still finished
    assert_eq!(fb.completed_event(), SyncEvent::FrameFinished);

    let color = read_f32(&mut fb, Channel::Color);
    // tile 0 (even) was rendered again, tile 1 (odd) kept the old value
    assert_eq!(color[0], 5.0);
    assert_eq!(color[64 * 4], 1.0);
}

#[test]
fn test_invalid_camera_is_rejected_before_work() {
    let ctx = context();
    let renderer = Scripted::new(Some(1.0));
    let mut fb = FrameBuffer::new(64, 64, PixelFormat::Srgba, Channels::COLOR).unwrap();
    let bad = Camera::perspective(Vec3::ZERO, Vec3::ZERO, Vec3::Y, 45.0, 1.0);

    let err = ctx.render_frame(&mut fb, &renderer, &bad, &World::new()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    assert_eq!(fb.frame_id(), 0);
    assert_eq!(renderer.jobs.load(Ordering::Relaxed), 0);

    let shared = Arc::new(Mutex::new(fb));
    let renderer: Arc<dyn Renderer> = Arc::new(renderer);
    let err = ctx
        .render_frame_async(&shared, &renderer, &bad, &Arc::new(World::new()))
        .err()
        .unwrap();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
}

#[test]
fn test_converged_tiles_are_skipped() {
    let ctx = context();
    let mut renderer = Scripted::new(Some(0.5));
    renderer.settings = RendererSettings::default().with_variance_threshold(0.01);
    let channels = Channels::COLOR | Channels::ACCUM | Channels::VARIANCE;
    let mut fb = FrameBuffer::new(256, 256, PixelFormat::Rgba32F, channels).unwrap();

    for _ in 0..2 {
        ctx.render_frame(&mut fb, &renderer, &camera(), &World::new()).unwrap();
    }
    assert_eq!(fb.converged_tile_count(), 16);
    assert_eq!(renderer.jobs.load(Ordering::Relaxed), 32);

    let variance = ctx.render_frame(&mut fb, &renderer, &camera(), &World::new()).unwrap();
    assert_eq!(variance, 0.0);
    assert_eq!(renderer.jobs.load(Ordering::Relaxed), 32);

    fb.clear();
    assert_eq!(fb.converged_tile_count(), 0);
    ctx.render_frame(&mut fb, &renderer, &camera(), &World::new()).unwrap();
    assert_eq!(renderer.jobs.load(Ordering::Relaxed), 48);
}

#[test]
fn test_frame_ops_do_not_touch_accumulation() {
    let ctx = context();
    let renderer = Scripted::new(Some(0.8));
    let channels = Channels::COLOR | Channels::ACCUM;
    let mut fb = FrameBuffer::new(32, 32, PixelFormat::Rgba32F, channels).unwrap();
    fb.add_frame_op(Box::new(ToneMapper {
        exposure: 0.5,
        curve: ToneCurve::Linear,
    }));
    ctx.render_frame(&mut fb, &renderer, &camera(), &World::new()).unwrap();

    let color = read_f32(&mut fb, Channel::Color);
    assert!((color[0] - 0.4).abs() < 1e-6);
    assert_eq!(color[3], 1.0);
    let accum = read_f32(&mut fb, Channel::Accum);
    assert!((accum[0] - 0.8).abs() < 1e-6);
}

#[test]
fn test_builtin_renderers_shade_the_box() {
    let ctx = context();
    let world = box_world();
    for name in ["scivis", "pathtracer", "ao", "debug"] {
        let renderer = ctx.new_renderer(name, RendererSettings::default()).unwrap();
        let mut fb = FrameBuffer::new(64, 64, PixelFormat::Rgba32F, Channels::COLOR).unwrap();
        ctx.render_frame(&mut fb, renderer.as_ref(), &camera(), &world).unwrap();

        let color = read_f32(&mut fb, Channel::Color);
        let center = &color[(32 * 64 + 32) * 4..(32 * 64 + 32) * 4 + 4];
        let corner = &color[0..4];
        assert_eq!(center[3], 1.0, "{name}");
        assert!(center[0] > 0.0, "{name}");
        assert_eq!(corner, &[0.0; 4], "{name}");
    }
}

/// Holds every tile until `open` is set.
struct Gated {
    settings: RendererSettings,
    entered: AtomicBool,
    open: AtomicBool,
}

impl Renderer for Gated {
    fn name(&self) -> &str {
        "gated"
    }

    fn settings(&self) -> &RendererSettings {
        &self.settings
    }

    fn shade(
        &self,
        _frame: &FrameData,
        _world: &World,
        _ray: &Ray,
        _rng: &mut dyn RngCore,
    ) -> Sample {
        Sample::background(Vec4::ZERO)
    }

    fn render_tile(
        &self,
        _info: &FrameInfo,
        _camera: &Camera,
        _world: &World,
        _frame: &FrameData,
        tile: &mut Tile,
        _job_id: usize,
    ) -> tessel_renderer::Result<()> {
        self.entered.store(true, Ordering::SeqCst);
        while !self.open.load(Ordering::SeqCst) {
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
        tile.color.fill(Vec4::ONE);
        Ok(())
    }
}

#[test]
fn test_task_is_running_while_tiles_are_in_flight() {
    let ctx = context();
    let gated = Arc::new(Gated {
        settings: RendererSettings::default(),
        entered: AtomicBool::new(false),
        open: AtomicBool::new(false),
    });
    let renderer: Arc<dyn Renderer> = gated.clone();
    let fb = Arc::new(Mutex::new(
        FrameBuffer::new(128, 128, PixelFormat::Rgba32F, Channels::COLOR).unwrap(),
    ));
    let world = Arc::new(World::new());

    let task = ctx.render_frame_async(&fb, &renderer, &camera(), &world).unwrap();
    while !gated.entered.load(Ordering::SeqCst) {
        std::thread::yield_now();
    }
    assert_eq!(task.status(), TaskStatus::Running);
    assert!(!task.is_ready(SyncEvent::WorldRendered));
    assert!(task.progress() < 1.0);

    gated.open.store(true, Ordering::SeqCst);
    task.wait(SyncEvent::FrameFinished);
    assert_eq!(task.wait_result().unwrap(), 0.0);
    assert_eq!(fb.lock().unwrap().frame_id(), 1);
}
