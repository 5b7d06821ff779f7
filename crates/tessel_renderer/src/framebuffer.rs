//! Framebuffer: pixel storage, accumulation and client access.
//!
//! Accumulation storage is kept per tile rather than as one image-sized
//! array. A frame hands each worker exclusive `&mut` access to one tile's
//! storage, so pixel data needs no locking. Row-major images are only
//! assembled when a client maps a channel.
//!
//! Each tile tracks its own sample count. A tile that is skipped (because
//! it converged, failed, or the frame was cancelled) keeps its average and
//! its denominator unchanged.

use std::sync::atomic::{AtomicU64, Ordering};

use bitflags::bitflags;
use tessel_math::{linear_to_srgb, unorm8, Rgba8, Vec3, Vec4};
use thiserror::Error;

use crate::config::TileOrder;
use crate::error::{try_fill, RenderError, Result};
use crate::frame_op::FrameOp;
use crate::task::SyncEvent;
use crate::tile::{generate_tiles, Tile, TileRegion, TILE_SIZE};

bitflags! {
    /// Channels a framebuffer is created with.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Channels: u32 {
        const COLOR = 1 << 0;
        const DEPTH = 1 << 1;
        const ACCUM = 1 << 2;
        const VARIANCE = 1 << 3;
        const NORMAL = 1 << 4;
        const ALBEDO = 1 << 5;
    }
}

/// A single channel, as passed to [`FrameBuffer::map`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Color,
    Depth,
    Accum,
    Variance,
    Normal,
    Albedo,
}

impl Channel {
    pub fn flag(self) -> Channels {
        match self {
            Channel::Color => Channels::COLOR,
            Channel::Depth => Channels::DEPTH,
            Channel::Accum => Channels::ACCUM,
            Channel::Variance => Channels::VARIANCE,
            Channel::Normal => Channels::NORMAL,
            Channel::Albedo => Channels::ALBEDO,
        }
    }
}

/// Storage format of the mapped color channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PixelFormat {
    /// 8 bits per channel, linear
    Rgba8,
    /// 8 bits per channel, sRGB-encoded color, linear alpha
    #[default]
    Srgba,
    /// 32-bit float per channel, linear
    Rgba32F,
}

/// Read-only description of a framebuffer handed to renderers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameInfo {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub channels: Channels,
    pub frame_id: u64,
}

/// Snapshot of one channel, row-major with row 0 at the bottom.
#[derive(Debug, Clone, PartialEq)]
pub enum MappedData {
    /// Color in `Rgba8` or `Srgba` format
    Rgba8(Vec<Rgba8>),
    /// Four floats per pixel (float color, accumulation buffer)
    Rgba32F(Vec<f32>),
    /// One float per pixel (depth, variance)
    Float(Vec<f32>),
    /// Three floats per pixel (normal, albedo)
    Vec3F(Vec<f32>),
}

impl MappedData {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            MappedData::Rgba8(px) => bytemuck::cast_slice(px),
            MappedData::Rgba32F(v) | MappedData::Float(v) | MappedData::Vec3F(v) => {
                bytemuck::cast_slice(v)
            }
        }
    }

    pub fn as_rgba8(&self) -> Option<&[Rgba8]> {
        match self {
            MappedData::Rgba8(px) => Some(px),
            _ => None,
        }
    }

    pub fn as_f32(&self) -> Option<&[f32]> {
        match self {
            MappedData::Rgba8(_) => None,
            MappedData::Rgba32F(v) | MappedData::Float(v) | MappedData::Vec3F(v) => Some(v),
        }
    }
}

/// An active mapping of one framebuffer channel.
///
/// Must be returned with [`FrameBuffer::unmap`]; until then the channel
/// cannot be mapped again and the framebuffer cannot be resized.
#[derive(Debug)]
pub struct Mapping {
    framebuffer: u64,
    channel: Channel,
    width: u32,
    height: u32,
    data: MappedData,
}

impl Mapping {
    pub fn channel(&self) -> Channel {
        self.channel
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn data(&self) -> &MappedData {
        &self.data
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.data.as_bytes()
    }
}

/// A rejected [`FrameBuffer::unmap`], carrying the mapping back.
#[derive(Error, Debug)]
#[error("{error}")]
pub struct UnmapError {
    pub mapping: Mapping,
    pub error: RenderError,
}

impl UnmapError {
    pub fn kind(&self) -> crate::ErrorKind {
        self.error.kind()
    }

    pub fn into_mapping(self) -> Mapping {
        self.mapping
    }
}

impl From<UnmapError> for RenderError {
    fn from(err: UnmapError) -> Self {
        err.error
    }
}

/// Accumulation storage of one tile region.
#[derive(Debug)]
pub(crate) struct TileStorage {
    pub(crate) region: TileRegion,
    /// Samples accumulated since the last clear
    pub(crate) accum_count: u32,
    /// Running average of all samples
    color: Vec<Vec4>,
    /// Running average of every second sample (VARIANCE)
    half: Vec<Vec4>,
    half_count: u32,
    depth: Vec<f32>,
    normal: Vec<Vec3>,
    albedo: Vec<Vec3>,
    pub(crate) error: f32,
    pub(crate) converged: bool,
}

impl TileStorage {
    fn new(region: TileRegion) -> Self {
        Self {
            region,
            accum_count: 0,
            color: Vec::new(),
            half: Vec::new(),
            half_count: 0,
            depth: Vec::new(),
            normal: Vec::new(),
            albedo: Vec::new(),
            error: f32::INFINITY,
            converged: false,
        }
    }

    fn allocate(&mut self, channels: Channels) -> Result<()> {
        let n = self.region.pixel_count();
        if self.color.len() != n {
            try_fill(&mut self.color, n, Vec4::ZERO, "accumulation buffer")?;
        }
        if channels.contains(Channels::VARIANCE) && self.half.len() != n {
            try_fill(&mut self.half, n, Vec4::ZERO, "variance buffer")?;
        }
        if channels.contains(Channels::DEPTH) && self.depth.len() != n {
            try_fill(&mut self.depth, n, f32::INFINITY, "depth buffer")?;
        }
        if channels.contains(Channels::NORMAL) && self.normal.len() != n {
            try_fill(&mut self.normal, n, Vec3::ZERO, "normal buffer")?;
        }
        if channels.contains(Channels::ALBEDO) && self.albedo.len() != n {
            try_fill(&mut self.albedo, n, Vec3::ZERO, "albedo buffer")?;
        }
        Ok(())
    }

    fn clear(&mut self) {
        self.color.fill(Vec4::ZERO);
        self.half.fill(Vec4::ZERO);
        self.depth.fill(f32::INFINITY);
        self.normal.fill(Vec3::ZERO);
        self.albedo.fill(Vec3::ZERO);
        self.accum_count = 0;
        self.half_count = 0;
        self.error = f32::INFINITY;
        self.converged = false;
    }

    /// Blend a rendered tile into the running averages and return the
    /// updated error estimate of this region.
    pub(crate) fn accumulate(&mut self, tile: &Tile, channels: Channels) -> f32 {
        debug_assert_eq!(tile.region, self.region);

        let accumulate = channels.contains(Channels::ACCUM);
        let n = if accumulate { self.accum_count + 1 } else { 1 };
        let w = 1.0 / n as f32;

        for (avg, s) in self.color.iter_mut().zip(&tile.color) {
            *avg += (*s - *avg) * w;
        }
        // Every second sample also feeds the half buffer; comparing the two
        // averages estimates the remaining noise.
        let track_variance = accumulate && !self.half.is_empty();
        if track_variance && n % 2 == 0 {
            self.half_count += 1;
            let hw = 1.0 / self.half_count as f32;
            for (avg, s) in self.half.iter_mut().zip(&tile.color) {
                *avg += (*s - *avg) * hw;
            }
        }
        if !self.depth.is_empty() {
            self.depth.copy_from_slice(&tile.depth);
        }
        for (avg, s) in self.normal.iter_mut().zip(&tile.normal) {
            *avg += (*s - *avg) * w;
        }
        for (avg, s) in self.albedo.iter_mut().zip(&tile.albedo) {
            *avg += (*s - *avg) * w;
        }

        self.accum_count = n;
        self.error = if track_variance && self.half_count > 0 {
            let sum: f32 = self
                .color
                .iter()
                .zip(&self.half)
                .map(|(a, h)| pixel_error(*a, *h))
                .sum();
            sum / self.color.len().max(1) as f32
        } else {
            tile.error
        };
        self.error
    }
}

/// Noise estimate of one pixel from the full and half averages.
fn pixel_error(avg: Vec4, half: Vec4) -> f32 {
    let diff = (avg.truncate() - half.truncate()).abs().element_sum();
    let den = avg.truncate().max(Vec3::ZERO).element_sum().sqrt();
    if den > 0.0 {
        diff / den
    } else {
        0.0
    }
}

static NEXT_FRAMEBUFFER_ID: AtomicU64 = AtomicU64::new(1);

/// Pixel storage of a rendered image.
///
/// Not thread-safe by itself: a frame in flight holds `&mut` access (the
/// async path wraps the framebuffer in a `Mutex` that the render thread
/// holds for the whole frame). `clear`, `map` and `resize` therefore
/// cannot overlap a frame.
pub struct FrameBuffer {
    id: u64,
    width: u32,
    height: u32,
    format: PixelFormat,
    channels: Channels,
    tiles: Vec<TileStorage>,
    frame_id: u64,
    accum_frames: u32,
    variance: f32,
    completed: SyncEvent,
    mapped: Channels,
    frame_ops: Vec<Box<dyn FrameOp>>,
}

impl FrameBuffer {
    /// Create a framebuffer. Storage is allocated lazily by the first frame.
    pub fn new(width: u32, height: u32, format: PixelFormat, channels: Channels) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(RenderError::InvalidArgument(format!(
                "framebuffer size {width}x{height} must be non-zero"
            )));
        }
        Ok(Self {
            id: NEXT_FRAMEBUFFER_ID.fetch_add(1, Ordering::Relaxed),
            width,
            height,
            format,
            channels,
            tiles: generate_tiles(width, height, TILE_SIZE)
                .into_iter()
                .map(TileStorage::new)
                .collect(),
            frame_id: 0,
            accum_frames: 0,
            variance: 0.0,
            completed: SyncEvent::None,
            mapped: Channels::empty(),
            frame_ops: Vec::new(),
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn channels(&self) -> Channels {
        self.channels
    }

    /// Frames started on this framebuffer. Never reset.
    pub fn frame_id(&self) -> u64 {
        self.frame_id
    }

    /// Frames fully accumulated since the last [`clear`](Self::clear).
    pub fn accumulation_count(&self) -> u32 {
        self.accum_frames
    }

    /// Error estimate of the most recent frame; 0 without variance tracking.
    pub fn variance(&self) -> f32 {
        self.variance
    }

    pub fn completed_event(&self) -> SyncEvent {
        self.completed
    }

    pub fn set_completed_event(&mut self, event: SyncEvent) {
        self.completed = event;
    }

    pub fn tile_count(&self) -> usize {
        self.tiles.len()
    }

    pub fn tile_regions(&self) -> impl Iterator<Item = TileRegion> + '_ {
        self.tiles.iter().map(|t| t.region)
    }

    /// Tiles currently flagged as converged.
    pub fn converged_tile_count(&self) -> usize {
        self.tiles.iter().filter(|t| t.converged).count()
    }

    pub fn is_mapped(&self, channel: Channel) -> bool {
        self.mapped.contains(channel.flag())
    }

    /// Whether per-tile error estimates are derived from accumulation.
    pub fn tracks_variance(&self) -> bool {
        self.channels.contains(Channels::ACCUM | Channels::VARIANCE)
    }

    pub fn info(&self) -> FrameInfo {
        FrameInfo {
            width: self.width,
            height: self.height,
            format: self.format,
            channels: self.channels,
            frame_id: self.frame_id,
        }
    }

    /// Post-processing applied to the color channel at map time.
    pub fn set_frame_ops(&mut self, ops: Vec<Box<dyn FrameOp>>) {
        self.frame_ops = ops;
    }

    pub fn add_frame_op(&mut self, op: Box<dyn FrameOp>) {
        self.frame_ops.push(op);
    }

    /// Discard all accumulated samples. The next frame starts a fresh
    /// average, exactly like the first frame of a new framebuffer.
    pub fn clear(&mut self) {
        for tile in &mut self.tiles {
            tile.clear();
        }
        self.accum_frames = 0;
        self.variance = 0.0;
        log::debug!("Framebuffer {} accumulation reset", self.id);
    }

    /// Change the image size. All samples are discarded.
    pub fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        if !self.mapped.is_empty() {
            return Err(RenderError::InvalidState(format!(
                "cannot resize while {:?} is mapped",
                self.mapped
            )));
        }
        if width == 0 || height == 0 {
            return Err(RenderError::InvalidArgument(format!(
                "framebuffer size {width}x{height} must be non-zero"
            )));
        }
        self.width = width;
        self.height = height;
        self.tiles = generate_tiles(width, height, TILE_SIZE)
            .into_iter()
            .map(TileStorage::new)
            .collect();
        self.accum_frames = 0;
        self.variance = 0.0;
        Ok(())
    }

    /// Make storage ready for the next frame and describe it. Nothing
    /// observable changes until [`commit_frame`](Self::commit_frame), so a
    /// failure here or in the renderer's setup leaves the framebuffer in
    /// its pre-frame state.
    pub(crate) fn prepare_frame(&mut self) -> Result<FrameInfo> {
        let channels = self.channels;
        for tile in &mut self.tiles {
            tile.allocate(channels)?;
        }
        Ok(FrameInfo {
            frame_id: self.frame_id + 1,
            ..self.info()
        })
    }

    /// Advance to the frame described by `info`.
    pub(crate) fn commit_frame(&mut self, info: &FrameInfo) {
        self.frame_id = info.frame_id;
        self.completed = SyncEvent::None;
    }

    pub(crate) fn tiles_mut(&mut self) -> &mut [TileStorage] {
        &mut self.tiles
    }

    /// Record the outcome of a frame whose tiles all ran.
    pub(crate) fn finish_tiles(&mut self, variance: f32) {
        self.accum_frames = if self.channels.contains(Channels::ACCUM) {
            self.accum_frames + 1
        } else {
            1
        };
        self.variance = variance;
        self.completed = SyncEvent::WorldRendered;
    }

    /// Map one channel for reading.
    pub fn map(&mut self, channel: Channel) -> Result<Mapping> {
        let flag = channel.flag();
        if !self.channels.contains(flag) {
            return Err(RenderError::InvalidState(format!("channel {channel:?} is not enabled")));
        }
        if self.mapped.contains(flag) {
            log::warn!("Channel {channel:?} of framebuffer {} mapped twice", self.id);
            return Err(RenderError::InvalidState(format!("channel {channel:?} is already mapped")));
        }

        let data = match channel {
            Channel::Color => self.map_color(),
            Channel::Accum => {
                let color = self.gather(Vec4::ZERO, |t| &t.color);
                MappedData::Rgba32F(color.iter().flat_map(|c| c.to_array()).collect())
            }
            Channel::Depth => MappedData::Float(self.gather(f32::INFINITY, |t| &t.depth)),
            Channel::Normal => {
                let normal = self.gather(Vec3::ZERO, |t| &t.normal);
                MappedData::Vec3F(normal.iter().flat_map(|n| n.to_array()).collect())
            }
            Channel::Albedo => {
                let albedo = self.gather(Vec3::ZERO, |t| &t.albedo);
                MappedData::Vec3F(albedo.iter().flat_map(|n| n.to_array()).collect())
            }
            Channel::Variance => MappedData::Float(self.map_variance()),
        };

        self.mapped |= flag;
        Ok(Mapping {
            framebuffer: self.id,
            channel,
            width: self.width,
            height: self.height,
            data,
        })
    }

    /// Release a mapping obtained from [`map`](Self::map).
    ///
    /// A mapping that is not an active mapping of this framebuffer is
    /// handed back inside the error, so it can still be released on the
    /// framebuffer that issued it.
    pub fn unmap(&mut self, mapping: Mapping) -> std::result::Result<(), UnmapError> {
        let flag = mapping.channel.flag();
        if mapping.framebuffer != self.id || !self.mapped.contains(flag) {
            log::warn!(
                "Unmap of {:?} does not match an active mapping of framebuffer {}",
                mapping.channel,
                self.id
            );
            let error = RenderError::InvalidArgument(format!(
                "mapping of {:?} does not belong to this framebuffer",
                mapping.channel
            ));
            return Err(UnmapError { mapping, error });
        }
        self.mapped.remove(flag);
        Ok(())
    }

    /// Linear color with frame ops applied, converted to the pixel format.
    fn map_color(&self) -> MappedData {
        let mut color = self.gather(Vec4::ZERO, |t| &t.color);
        for op in &self.frame_ops {
            op.process(&mut color, self.width, self.height);
        }

        match self.format {
            PixelFormat::Rgba32F => {
                MappedData::Rgba32F(color.iter().flat_map(|c| c.to_array()).collect())
            }
            PixelFormat::Rgba8 => MappedData::Rgba8(
                color
                    .iter()
                    .map(|c| Rgba8 {
                        r: unorm8(c.x),
                        g: unorm8(c.y),
                        b: unorm8(c.z),
                        a: unorm8(c.w),
                    })
                    .collect(),
            ),
            PixelFormat::Srgba => MappedData::Rgba8(
                color
                    .iter()
                    .map(|c| Rgba8 {
                        r: unorm8(linear_to_srgb(c.x)),
                        g: unorm8(linear_to_srgb(c.y)),
                        b: unorm8(linear_to_srgb(c.z)),
                        a: unorm8(c.w),
                    })
                    .collect(),
            ),
        }
    }

    /// Per-pixel noise estimate; 0 where no half average exists yet.
    fn map_variance(&self) -> Vec<f32> {
        let width = self.width as usize;
        let mut out = vec![0.0; width * self.height as usize];
        for tile in &self.tiles {
            let r = tile.region;
            if tile.half_count == 0 || tile.half.len() != r.pixel_count() {
                continue;
            }
            for (i, (a, h)) in tile.color.iter().zip(&tile.half).enumerate() {
                let (lx, ly) = (i % r.width as usize, i / r.width as usize);
                out[(r.y as usize + ly) * width + r.x as usize + lx] = pixel_error(*a, *h);
            }
        }
        out
    }

    /// Assemble a row-major image from per-tile buffers. Tiles whose
    /// buffer is not allocated contribute `fill`.
    fn gather<T: Copy>(&self, fill: T, buffer: impl Fn(&TileStorage) -> &[T]) -> Vec<T> {
        let width = self.width as usize;
        let mut out = vec![fill; width * self.height as usize];
        for tile in &self.tiles {
            let src = buffer(tile);
            let r = tile.region;
            if src.len() != r.pixel_count() {
                continue;
            }
            for (ly, row) in src.chunks_exact(r.width as usize).enumerate() {
                let start = (r.y as usize + ly) * width + r.x as usize;
                out[start..start + row.len()].copy_from_slice(row);
            }
        }
        out
    }
}

impl std::fmt::Debug for FrameBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameBuffer")
            .field("id", &self.id)
            .field("size", &(self.width, self.height))
            .field("format", &self.format)
            .field("channels", &self.channels)
            .field("frame_id", &self.frame_id)
            .field("accum_frames", &self.accum_frames)
            .field("frame_ops", &self.frame_ops.len())
            .finish()
    }
}

/// Order tile slots for dispatch without moving the storage itself.
pub(crate) fn dispatch_slots<'a>(
    tiles: &'a mut [TileStorage],
    order: TileOrder,
    width: u32,
    height: u32,
) -> Vec<&'a mut TileStorage> {
    let mut slots: Vec<&mut TileStorage> = tiles.iter_mut().collect();
    slots.sort_by(|a, b| crate::tile::dispatch_cmp(order, width, height, &a.region, &b.region));
    slots
}
