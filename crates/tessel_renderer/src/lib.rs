//! Tessel Renderer - tiled, asynchronous, cancelable frame rendering.
//!
//! A frame is split into 64x64 tiles that are rendered in parallel on a
//! rayon pool and blended into the framebuffer's running averages, so
//! repeated frames refine the image progressively. Frames can run
//! synchronously or on a background thread behind a [`RenderTask`] handle
//! that can be waited on, polled for progress, or cancelled.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use tessel_renderer::{
//!     Channels, DeviceConfig, FrameBuffer, PixelFormat, RenderContext, RendererSettings,
//! };
//!
//! let ctx = RenderContext::new(DeviceConfig::default())?;
//! let renderer = ctx.new_renderer("pathtracer", RendererSettings::default())?;
//! let mut fb = FrameBuffer::new(640, 480, PixelFormat::Srgba, Channels::COLOR | Channels::ACCUM)?;
//! let variance = ctx.render_frame(&mut fb, renderer.as_ref(), &camera, &world)?;
//! ```

mod config;
mod context;
mod error;
mod frame_op;
mod framebuffer;
mod load_balancer;
mod renderer;
mod sampling;
mod task;
mod tile;

pub use config::{DebugMode, DeviceConfig, RendererSettings, TileOrder};
pub use context::RenderContext;
pub use error::{ErrorKind, RenderError, Result};
pub use frame_op::{create_frame_op, FrameBlur, FrameOp, ToneCurve, ToneMapper};
pub use framebuffer::{
    Channel, Channels, FrameBuffer, FrameInfo, MappedData, Mapping, PixelFormat, UnmapError,
};
pub use load_balancer::TiledLoadBalancer;
pub use renderer::{
    render_tile_samples, AoRenderer, DebugRenderer, DistantLight, FrameData, PathTracer,
    PickResult, Renderer, RendererFactory, RendererRegistry, Sample, SciVisRenderer,
};
pub use sampling::{gen_f32, gen_vec2, tile_rng};
pub use task::{FrameControl, RenderTask, SyncEvent, TaskStatus};
pub use tile::{generate_tiles, tile_count, Tile, TileRegion, TILE_SIZE};

/// Re-export the scene types renderers consume
pub use tessel_core::{Camera, World};
