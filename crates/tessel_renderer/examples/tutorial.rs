//! Tutorial: render two triangles, then refine the image progressively.
//!
//! Writes `firstFrame.png` after one frame and `accumulatedFrame.png`
//! after ten more.
//!
//! Run with `RUST_LOG=debug cargo run --example tutorial` to see per-frame
//! statistics.

use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use tessel_core::{Camera, GeometricModel, Light, Material, Triangles, World};
use tessel_math::Vec3;
use tessel_renderer::{
    Channel, Channels, FrameBuffer, PixelFormat, RenderContext, RendererSettings, SyncEvent,
};

const WIDTH: u32 = 1024;
const HEIGHT: u32 = 768;

fn main() -> Result<()> {
    env_logger::init();

    let ctx = RenderContext::from_env()?;
    println!("Tessel tutorial ({} workers)", ctx.worker_count());

    let world = Arc::new(build_world()?);
    let camera = Camera::perspective(
        Vec3::new(0.0, 0.0, 0.0),
        Vec3::new(0.1, 0.0, 1.0),
        Vec3::new(0.0, 1.0, 0.0),
        60.0,
        WIDTH as f32 / HEIGHT as f32,
    );
    let renderer = ctx.new_renderer("pathtracer", RendererSettings::default())?;

    let fb = Arc::new(Mutex::new(FrameBuffer::new(
        WIDTH,
        HEIGHT,
        PixelFormat::Srgba,
        Channels::COLOR | Channels::ACCUM,
    )?));

    let start = std::time::Instant::now();
    let task = ctx.render_frame_async(&fb, &renderer, &camera, &world)?;
    task.wait(SyncEvent::FrameFinished);
    task.wait_result()?;
    println!("First frame in {:?}", start.elapsed());
    save_png(&fb, "firstFrame.png")?;

    let start = std::time::Instant::now();
    {
        let mut fb = fb.lock().map_err(|_| anyhow::anyhow!("framebuffer lock poisoned"))?;
        for _ in 0..10 {
            ctx.render_frame(&mut fb, renderer.as_ref(), &camera, &world)?;
        }
    }
    println!("Ten more frames in {:?}", start.elapsed());
    save_png(&fb, "accumulatedFrame.png")?;

    Ok(())
}

fn build_world() -> Result<World> {
    let positions = vec![
        Vec3::new(-1.0, -1.0, 3.0),
        Vec3::new(-1.0, 1.0, 3.0),
        Vec3::new(1.0, -1.0, 3.0),
        Vec3::new(0.1, 0.1, 0.3),
    ];
    let triangles = Triangles::new(positions, vec![[0, 1, 2], [1, 2, 3]])?;

    let mut world = World::new();
    let material = Material::diffuse(Vec3::new(0.9, 0.5, 0.5));
    world.add_models([GeometricModel::new(Arc::new(triangles)).with_material(material)])?;
    world.add_light(Light::ambient(Vec3::ONE, 1.0));
    Ok(world)
}

/// Row 0 of the framebuffer is the bottom of the image, so rows are
/// flipped on the way out.
fn save_png(fb: &Mutex<FrameBuffer>, path: &str) -> Result<()> {
    let mut fb = fb.lock().map_err(|_| anyhow::anyhow!("framebuffer lock poisoned"))?;
    let mapping = fb.map(Channel::Color)?;
    let row_bytes = mapping.width() as usize * 4;

    let mut pixels = Vec::with_capacity(mapping.as_bytes().len());
    for row in mapping.as_bytes().chunks_exact(row_bytes).rev() {
        pixels.extend_from_slice(row);
    }
    let (width, height) = (mapping.width(), mapping.height());
    fb.unmap(mapping)?;

    let image = image::RgbaImage::from_raw(width, height, pixels)
        .context("pixel buffer has the wrong size")?;
    image.save(path).with_context(|| format!("failed to write {path}"))?;
    println!("Saved {path}");
    Ok(())
}
