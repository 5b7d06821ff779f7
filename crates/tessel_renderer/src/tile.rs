//! Tile decomposition of the image.
//!
//! The image is split into fixed-size tiles that are rendered
//! independently and in parallel. Tiles along the right and top edges are
//! clipped to the image.

use std::cmp::Ordering;

use tessel_math::{Vec3, Vec4};

use crate::config::TileOrder;
use crate::error::{try_fill, Result};

/// Tile extent in pixels along both axes.
pub const TILE_SIZE: u32 = 64;

/// A rectangular pixel region of the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileRegion {
    /// X coordinate of the region's lower-left corner
    pub x: u32,
    /// Y coordinate of the region's lower-left corner
    pub y: u32,
    /// Width of the region in pixels
    pub width: u32,
    /// Height of the region in pixels
    pub height: u32,
    /// Row-major position of this region in the tile grid; doubles as
    /// the job id handed to renderers
    pub index: usize,
}

impl TileRegion {
    pub fn new(x: u32, y: u32, width: u32, height: u32, index: usize) -> Self {
        Self {
            x,
            y,
            width,
            height,
            index,
        }
    }

    /// Get the total number of pixels in this region.
    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn contains(&self, px: u32, py: u32) -> bool {
        px >= self.x && py >= self.y && px < self.x + self.width && py < self.y + self.height
    }

    fn center(&self) -> (f32, f32) {
        (
            self.x as f32 + self.width as f32 / 2.0,
            self.y as f32 + self.height as f32 / 2.0,
        )
    }
}

/// Number of tiles covering a `width` x `height` image.
pub fn tile_count(width: u32, height: u32, tile_size: u32) -> usize {
    width.div_ceil(tile_size) as usize * height.div_ceil(tile_size) as usize
}

/// Generate the tile grid for an image, in row-major order.
pub fn generate_tiles(width: u32, height: u32, tile_size: u32) -> Vec<TileRegion> {
    let mut tiles = Vec::with_capacity(tile_count(width, height, tile_size));

    let mut y = 0;
    while y < height {
        let mut x = 0;
        while x < width {
            let tw = tile_size.min(width - x);
            let th = tile_size.min(height - y);
            tiles.push(TileRegion::new(x, y, tw, th, tiles.len()));
            x += tile_size;
        }
        y += tile_size;
    }

    tiles
}

/// Compare two regions by dispatch priority.
///
/// Spiral order renders tiles closer to the image center first, so the
/// most important part of the image shows up early. Ties fall back to the
/// grid index to keep the order stable.
pub fn dispatch_cmp(
    order: TileOrder,
    width: u32,
    height: u32,
    a: &TileRegion,
    b: &TileRegion,
) -> Ordering {
    match order {
        TileOrder::Scanline => a.index.cmp(&b.index),
        TileOrder::Spiral => {
            let (cx, cy) = (width as f32 / 2.0, height as f32 / 2.0);
            let dist = |r: &TileRegion| {
                let (x, y) = r.center();
                (x - cx).powi(2) + (y - cy).powi(2)
            };
            dist(a)
                .partial_cmp(&dist(b))
                .unwrap_or(Ordering::Equal)
                .then(a.index.cmp(&b.index))
        }
    }
}

/// Per-job scratch buffers a renderer fills for one region.
///
/// Workers keep one `Tile` each and reuse it for every region they
/// render, so buffers are only reallocated when a region is larger than
/// any seen before.
#[derive(Debug, Clone)]
pub struct Tile {
    pub region: TileRegion,
    /// Samples already accumulated in this region before the current frame
    pub accum_id: u32,
    /// Linear RGBA, row-major within the region
    pub color: Vec<Vec4>,
    /// Distance to the first hit; infinity for background
    pub depth: Vec<f32>,
    pub normal: Vec<Vec3>,
    pub albedo: Vec<Vec3>,
    /// Renderer's noise estimate for this region (0 if unknown)
    pub error: f32,
}

impl Default for Tile {
    fn default() -> Self {
        Self::new()
    }
}

impl Tile {
    pub fn new() -> Self {
        Self {
            region: TileRegion::new(0, 0, 0, 0, 0),
            accum_id: 0,
            color: Vec::new(),
            depth: Vec::new(),
            normal: Vec::new(),
            albedo: Vec::new(),
            error: 0.0,
        }
    }

    /// Prepare the buffers for a new region.
    pub fn reset(&mut self, region: TileRegion, accum_id: u32) -> Result<()> {
        let n = region.pixel_count();
        try_fill(&mut self.color, n, Vec4::ZERO, "tile color")?;
        try_fill(&mut self.depth, n, f32::INFINITY, "tile depth")?;
        try_fill(&mut self.normal, n, Vec3::ZERO, "tile normal")?;
        try_fill(&mut self.albedo, n, Vec3::ZERO, "tile albedo")?;
        self.region = region;
        self.accum_id = accum_id;
        self.error = 0.0;
        Ok(())
    }

    /// Index of local pixel (lx, ly) in the tile buffers.
    #[inline]
    pub fn pixel_index(&self, lx: u32, ly: u32) -> usize {
        ly as usize * self.region.width as usize + lx as usize
    }
}
