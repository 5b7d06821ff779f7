//! Parallel dispatch of a frame's tiles.
//!
//! Every tile slot of the framebuffer is handed to exactly one job, which
//! owns it mutably for the duration of the job. Workers reuse one scratch
//! [`Tile`] each. Per-job outcomes are combined with an associative,
//! commutative reduction, so the result does not depend on scheduling.

use std::sync::Arc;

use rayon::prelude::*;
use rayon::ThreadPool;
use tessel_core::{Camera, World};

use crate::config::TileOrder;
use crate::error::{RenderError, Result};
use crate::framebuffer::{dispatch_slots, FrameBuffer, FrameInfo, TileStorage};
use crate::renderer::{FrameData, Renderer};
use crate::task::{FrameControl, SyncEvent};
use crate::tile::Tile;

/// How a frame ended, when it did not fail outright.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum FrameOutcome {
    /// All tiles ran; carries the frame's variance estimate
    Completed(f32),
    /// Stopped early; accumulation bookkeeping was left alone
    Cancelled,
}

/// Counts and errors of a set of tile jobs.
#[derive(Debug, Default)]
struct FrameSummary {
    max_error: f32,
    rendered: usize,
    skipped: usize,
    cancelled: usize,
    failed: usize,
    /// Error of the failed tile with the lowest index
    first_error: Option<(usize, RenderError)>,
}

impl FrameSummary {
    fn merge(self, other: Self) -> Self {
        let first_error = match (self.first_error, other.first_error) {
            (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
            (a, b) => a.or(b),
        };
        Self {
            max_error: self.max_error.max(other.max_error),
            rendered: self.rendered + other.rendered,
            skipped: self.skipped + other.skipped,
            cancelled: self.cancelled + other.cancelled,
            failed: self.failed + other.failed,
            first_error,
        }
    }
}

/// Frame-constant inputs of every tile job.
struct TileJob<'a> {
    info: FrameInfo,
    camera: &'a Camera,
    world: &'a World,
    frame: &'a FrameData,
    renderer: &'a dyn Renderer,
    control: &'a FrameControl,
    /// Error estimates come from accumulation (ACCUM and VARIANCE)
    tracking: bool,
    threshold: f32,
    skip_converged: bool,
}

impl TileJob<'_> {
    fn run(&self, tile: &mut Tile, slot: &mut TileStorage) -> FrameSummary {
        if self.control.is_cancelled() {
            return FrameSummary {
                cancelled: 1,
                ..Default::default()
            };
        }
        self.control.mark_running();

        if self.skip_converged && slot.converged {
            self.control.tile_done();
            return FrameSummary {
                skipped: 1,
                max_error: slot.error,
                ..Default::default()
            };
        }

        let index = slot.region.index;
        let rendered = tile.reset(slot.region, slot.accum_count).and_then(|()| {
            self.renderer
                .render_tile(&self.info, self.camera, self.world, self.frame, tile, index)
        });

        let summary = match rendered {
            Ok(()) => {
                let error = slot.accumulate(tile, self.info.channels);
                if self.tracking
                    && self.threshold > 0.0
                    && slot.accum_count >= 2
                    && error < self.threshold
                {
                    slot.converged = true;
                }
                FrameSummary {
                    rendered: 1,
                    max_error: error,
                    ..Default::default()
                }
            }
            Err(err) => {
                log::warn!("Tile {index} at ({}, {}) failed: {err}", slot.region.x, slot.region.y);
                FrameSummary {
                    failed: 1,
                    first_error: Some((index, err)),
                    ..Default::default()
                }
            }
        };
        self.control.tile_done();
        summary
    }
}

/// Renders frames by splitting them into tiles and running the tiles on a
/// rayon pool.
#[derive(Clone)]
pub struct TiledLoadBalancer {
    pool: Arc<ThreadPool>,
    tile_order: TileOrder,
}

impl std::fmt::Debug for TiledLoadBalancer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TiledLoadBalancer")
            .field("threads", &self.pool.current_num_threads())
            .field("tile_order", &self.tile_order)
            .finish()
    }
}

impl TiledLoadBalancer {
    pub fn new(pool: Arc<ThreadPool>, tile_order: TileOrder) -> Self {
        Self { pool, tile_order }
    }

    pub fn worker_count(&self) -> usize {
        self.pool.current_num_threads()
    }

    pub fn tile_order(&self) -> TileOrder {
        self.tile_order
    }

    /// Render one frame and block until it is done. Returns the frame's
    /// variance estimate (0 without variance tracking).
    pub fn render_frame(
        &self,
        fb: &mut FrameBuffer,
        renderer: &dyn Renderer,
        camera: &Camera,
        world: &World,
    ) -> Result<f32> {
        match self.render_frame_with(fb, renderer, camera, world, &FrameControl::new())? {
            FrameOutcome::Completed(variance) => Ok(variance),
            FrameOutcome::Cancelled => Ok(fb.variance()),
        }
    }

    pub(crate) fn render_frame_with(
        &self,
        fb: &mut FrameBuffer,
        renderer: &dyn Renderer,
        camera: &Camera,
        world: &World,
        control: &FrameControl,
    ) -> Result<FrameOutcome> {
        if let Err(err) = camera.validate() {
            log::warn!("Rejected frame: {err}");
            return Err(err.into());
        }
        if control.is_cancelled() {
            return Ok(FrameOutcome::Cancelled);
        }

        let info = fb.prepare_frame()?;
        let frame = renderer.begin_frame(&info, world)?;
        fb.commit_frame(&info);

        let settings = renderer.settings();
        let tracking = fb.tracks_variance();
        let job = TileJob {
            info,
            camera,
            world,
            frame: &frame,
            renderer,
            control,
            tracking,
            threshold: settings.variance_threshold,
            skip_converged: tracking && settings.adaptive_skip && settings.variance_threshold > 0.0,
        };

        let frame_id = info.frame_id;
        let total = fb.tile_count();
        control.begin(total);

        let (width, height) = (fb.width(), fb.height());
        let order = self.tile_order;
        let summary = self.pool.install(|| {
            dispatch_slots(fb.tiles_mut(), order, width, height)
                .into_par_iter()
                .map_init(Tile::new, |tile, slot| job.run(tile, slot))
                .reduce(FrameSummary::default, FrameSummary::merge)
        });

        if summary.cancelled > 0 {
            log::debug!(
                "Frame {frame_id} cancelled after {} of {total} tiles",
                summary.rendered + summary.skipped + summary.failed
            );
            if let Some((index, first)) = &summary.first_error {
                log::warn!(
                    "Frame {frame_id} cancelled with {} failed tiles, first at {index}: {first}",
                    summary.failed
                );
            }
            return Ok(FrameOutcome::Cancelled);
        }

        let variance = if tracking { summary.max_error } else { 0.0 };
        fb.finish_tiles(variance);
        control.signal(SyncEvent::WorldRendered);

        renderer.end_frame(fb, frame);
        control.signal(SyncEvent::FrameFinished);

        log::debug!(
            "Frame {frame_id} done: {} rendered, {} converged, {} failed, variance {variance:.5}",
            summary.rendered,
            summary.skipped,
            summary.failed
        );

        match summary.first_error {
            Some((_, first)) => Err(RenderError::TilesFailed {
                failed: summary.failed,
                total,
                first: Box::new(first),
            }),
            None => Ok(FrameOutcome::Completed(variance)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RendererSettings;
    use crate::framebuffer::{Channel, Channels, PixelFormat};
    use crate::renderer::Sample;
    use rand::RngCore;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tessel_math::{Ray, Vec3, Vec4};

    /// Writes `accum_id + 1` into every pixel.
    struct Counter(RendererSettings);

    impl Renderer for Counter {
        fn name(&self) -> &str {
            "counter"
        }

        fn settings(&self) -> &RendererSettings {
            &self.0
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
        ) -> Result<()> {
            tile.color.fill(Vec4::splat(tile.accum_id as f32 + 1.0));
            Ok(())
        }
    }

    /// Sets up one frame, then runs out of memory in `begin_frame`.
    struct SetupFails {
        settings: RendererSettings,
        frames: AtomicUsize,
    }

    impl Renderer for SetupFails {
        fn name(&self) -> &str {
            "setup_fails"
        }

        fn settings(&self) -> &RendererSettings {
            &self.settings
        }

        fn begin_frame(&self, info: &FrameInfo, world: &World) -> Result<FrameData> {
            if self.frames.fetch_add(1, Ordering::SeqCst) > 0 {
                return Err(RenderError::OutOfMemory {
                    what: "frame data",
                    bytes: 1 << 20,
                });
            }
            Ok(FrameData::gather(world, info.frame_id))
        }

        fn shade(
            &self,
            _frame: &FrameData,
            _world: &World,
            _ray: &Ray,
            _rng: &mut dyn RngCore,
        ) -> Sample {
            Sample::background(Vec4::ONE)
        }
    }

    /// Fails every tile it gets and cancels the frame on the first one.
    struct FailThenCancel {
        settings: RendererSettings,
        control: Arc<FrameControl>,
    }

    impl Renderer for FailThenCancel {
        fn name(&self) -> &str {
            "fail_then_cancel"
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
            _tile: &mut Tile,
            job_id: usize,
        ) -> Result<()> {
            self.control.request_cancel();
            Err(RenderError::InvalidState(format!("tile {job_id} exploded")))
        }
    }

    fn balancer(threads: usize, order: TileOrder) -> TiledLoadBalancer {
        let pool = rayon::ThreadPoolBuilder::new().num_threads(threads).build().unwrap();
        TiledLoadBalancer::new(Arc::new(pool), order)
    }

    fn camera() -> Camera {
        Camera::perspective(Vec3::new(0.0, 0.0, 5.0), -Vec3::Z, Vec3::Y, 45.0, 1.0)
    }

    fn accum(fb: &mut FrameBuffer) -> Vec<f32> {
        let m = fb.map(Channel::Accum).unwrap();
        let values = m.data().as_f32().unwrap().to_vec();
        fb.unmap(m).unwrap();
        values
    }

    #[test]
    fn test_summary_merge_keeps_lowest_failure() {
        let a = FrameSummary {
            failed: 1,
            first_error: Some((7, RenderError::InvalidState("a".into()))),
            max_error: 0.5,
            ..Default::default()
        };
        let b = FrameSummary {
            failed: 1,
            first_error: Some((2, RenderError::InvalidArgument("b".into()))),
            max_error: 0.1,
            ..Default::default()
        };
        let merged = b.merge(a);
        assert_eq!(merged.failed, 2);
        assert_eq!(merged.first_error.unwrap().0, 2);
        assert_eq!(merged.max_error, 0.5);
    }

    #[test]
    fn test_tile_order_does_not_change_pixels() {
        let channels = Channels::COLOR | Channels::ACCUM;
        let r = Counter(RendererSettings::default());
        let mut results = Vec::new();
        for (threads, order) in [(1, TileOrder::Scanline), (4, TileOrder::Spiral)] {
            let lb = balancer(threads, order);
            let mut fb = FrameBuffer::new(150, 100, PixelFormat::Rgba32F, channels).unwrap();
            lb.render_frame(&mut fb, &r, &camera(), &World::new()).unwrap();
            lb.render_frame(&mut fb, &r, &camera(), &World::new()).unwrap();
            results.push(accum(&mut fb));
        }
        assert_eq!(results[0], results[1]);
        assert!(results[0].iter().all(|v| *v == 1.5));
    }

    #[test]
    fn test_cancelled_before_start_does_nothing() {
        let lb = balancer(2, TileOrder::Spiral);
        let channels = Channels::COLOR | Channels::ACCUM;
        let mut fb = FrameBuffer::new(64, 64, PixelFormat::Rgba32F, channels).unwrap();
        let control = FrameControl::new();
        control.request_cancel();
        let r = Counter(RendererSettings::default());
        let outcome = lb
            .render_frame_with(&mut fb, &r, &camera(), &World::new(), &control)
            .unwrap();
        assert_eq!(outcome, FrameOutcome::Cancelled);
        assert_eq!(fb.frame_id(), 0);
        assert_eq!(fb.accumulation_count(), 0);
    }

    #[test]
    fn test_events_after_frame() {
        let lb = balancer(2, TileOrder::Spiral);
        let mut fb = FrameBuffer::new(70, 70, PixelFormat::Srgba, Channels::COLOR).unwrap();
        let control = FrameControl::new();
        let r = Counter(RendererSettings::default());
        lb.render_frame_with(&mut fb, &r, &camera(), &World::new(), &control)
            .unwrap();
        assert_eq!(fb.completed_event(), SyncEvent::FrameFinished);
        assert!(control.is_ready(SyncEvent::FrameFinished));
        assert_eq!(control.progress(), 1.0);
    }

    #[test]
    fn test_failed_setup_leaves_framebuffer_untouched() {
        let lb = balancer(2, TileOrder::Spiral);
        let channels = Channels::COLOR | Channels::ACCUM;
        let mut fb = FrameBuffer::new(64, 64, PixelFormat::Rgba32F, channels).unwrap();
        let r = SetupFails {
            settings: RendererSettings::default(),
            frames: AtomicUsize::new(0),
        };
        lb.render_frame(&mut fb, &r, &camera(), &World::new()).unwrap();
        let before = (fb.frame_id(), fb.completed_event(), fb.accumulation_count());
        assert_eq!(before, (1, SyncEvent::FrameFinished, 1));

        let err = lb.render_frame(&mut fb, &r, &camera(), &World::new()).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::OutOfMemory);
        assert_eq!((fb.frame_id(), fb.completed_event(), fb.accumulation_count()), before);
        assert!(accum(&mut fb).iter().all(|v| *v == 1.0));
    }

    #[test]
    fn test_cancel_after_failed_tile_is_still_cancelled() {
        let lb = balancer(1, TileOrder::Scanline);
        let channels = Channels::COLOR | Channels::ACCUM;
        let mut fb = FrameBuffer::new(256, 256, PixelFormat::Rgba32F, channels).unwrap();
        let control = Arc::new(FrameControl::new());
        let r = FailThenCancel {
            settings: RendererSettings::default(),
            control: Arc::clone(&control),
        };
        let outcome = lb
            .render_frame_with(&mut fb, &r, &camera(), &World::new(), &control)
            .unwrap();
        assert_eq!(outcome, FrameOutcome::Cancelled);
        assert_eq!(fb.accumulation_count(), 0);
        assert_eq!(fb.completed_event(), SyncEvent::None);
        assert!(!control.is_ready(SyncEvent::WorldRendered));
    }
}
