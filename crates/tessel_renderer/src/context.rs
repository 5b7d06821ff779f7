//! The render context: worker pool, renderer registry and device settings.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};

use tessel_core::{Camera, World};
use tessel_math::Vec2;

use crate::config::{DeviceConfig, RendererSettings};
use crate::error::{RenderError, Result};
use crate::frame_op::{create_frame_op, FrameOp};
use crate::framebuffer::FrameBuffer;
use crate::load_balancer::{FrameOutcome, TiledLoadBalancer};
use crate::renderer::{PickResult, Renderer, RendererRegistry};
use crate::task::{FrameControl, RenderTask, TaskStatus};

/// Owns everything frames need besides their inputs.
///
/// Contexts are independent: each has its own worker pool, so two
/// contexts never share threads.
#[derive(Debug)]
pub struct RenderContext {
    config: DeviceConfig,
    balancer: TiledLoadBalancer,
    renderers: RendererRegistry,
}

impl RenderContext {
    pub fn new(config: DeviceConfig) -> Result<Self> {
        let threads = config.num_threads.unwrap_or(0);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("tessel-worker-{i}"))
            .build()
            .map_err(|e| RenderError::Threading(format!("failed to build worker pool: {e}")))?;

        log::info!(
            "Render context ready: {} workers, {:?} tile order",
            pool.current_num_threads(),
            config.tile_order
        );

        Ok(Self {
            balancer: TiledLoadBalancer::new(Arc::new(pool), config.tile_order),
            renderers: RendererRegistry::with_builtins(),
            config,
        })
    }

    /// Context configured from `TESSEL_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::new(DeviceConfig::from_env()?)
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn worker_count(&self) -> usize {
        self.balancer.worker_count()
    }

    pub fn registry(&self) -> &RendererRegistry {
        &self.renderers
    }

    pub fn registry_mut(&mut self) -> &mut RendererRegistry {
        &mut self.renderers
    }

    /// Create a renderer by registered name or alias.
    pub fn new_renderer(
        &self,
        name: &str,
        settings: RendererSettings,
    ) -> Result<Arc<dyn Renderer>> {
        self.renderers.create(name, settings)
    }

    pub fn new_frame_op(&self, name: &str) -> Result<Box<dyn FrameOp>> {
        create_frame_op(name)
    }

    /// Render a frame synchronously.
    pub fn render_frame(
        &self,
        fb: &mut FrameBuffer,
        renderer: &dyn Renderer,
        camera: &Camera,
        world: &World,
    ) -> Result<f32> {
        self.balancer.render_frame(fb, renderer, camera, world)
    }

    /// Start a frame on a background thread.
    ///
    /// Argument errors are reported here, before any thread is started. The
    /// task keeps the framebuffer locked and the world alive until it ends.
    pub fn render_frame_async(
        &self,
        fb: &Arc<Mutex<FrameBuffer>>,
        renderer: &Arc<dyn Renderer>,
        camera: &Camera,
        world: &Arc<World>,
    ) -> Result<RenderTask> {
        if let Err(err) = camera.validate() {
            log::warn!("Rejected async frame: {err}");
            return Err(err.into());
        }

        let control = Arc::new(FrameControl::new());
        let handle = {
            let control = Arc::clone(&control);
            let balancer = self.balancer.clone();
            let fb = Arc::clone(fb);
            let renderer = Arc::clone(renderer);
            let world = Arc::clone(world);
            let camera = *camera;

            std::thread::Builder::new()
                .name("tessel-frame".to_owned())
                .spawn(move || {
                    let run = panic::catch_unwind(AssertUnwindSafe(|| {
                        let mut fb = fb.lock().unwrap_or_else(PoisonError::into_inner);
                        let outcome = balancer.render_frame_with(
                            &mut fb,
                            renderer.as_ref(),
                            &camera,
                            &world,
                            &control,
                        );
                        (outcome, fb.variance())
                    }));

                    let (status, result) = match run {
                        Ok((Ok(FrameOutcome::Completed(variance)), _)) => {
                            (TaskStatus::Finished, Ok(variance))
                        }
                        Ok((Ok(FrameOutcome::Cancelled), previous)) => {
                            (TaskStatus::Cancelled, Ok(previous))
                        }
                        Ok((Err(err), _)) => {
                            log::warn!("Async frame failed: {err}");
                            (TaskStatus::Finished, Err(err))
                        }
                        Err(_) => {
                            log::error!("Render thread panicked");
                            let err = RenderError::Threading("render thread panicked".into());
                            (TaskStatus::Finished, Err(err))
                        }
                    };
                    control.finish(status, result);
                })
                .map_err(|e| RenderError::Threading(format!("failed to spawn render thread: {e}")))?
        };

        Ok(RenderTask::new(control, handle))
    }

    /// Query the surface under a normalized screen position.
    pub fn pick(
        &self,
        fb: &FrameBuffer,
        renderer: &dyn Renderer,
        camera: &Camera,
        world: &World,
        screen: Vec2,
    ) -> Result<PickResult> {
        if !screen.is_finite() {
            return Err(RenderError::InvalidArgument(format!(
                "pick position {screen} is not finite"
            )));
        }
        camera.validate()?;
        renderer.pick(fb, camera, world, screen)
    }
}
