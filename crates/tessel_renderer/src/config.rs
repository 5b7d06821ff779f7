//! Device and renderer configuration.
//!
//! Both structs deserialize from JSON with every field optional, so a
//! config file only needs to name what it changes.

use serde::{Deserialize, Serialize};
use tessel_math::Vec4;

use crate::error::{RenderError, Result};

/// Order in which tiles are handed to the worker pool.
///
/// Only affects when regions show up during an async render, never the
/// final pixel values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TileOrder {
    /// Center-out, like production bucket renderers
    #[default]
    Spiral,
    /// Row by row from the bottom-left tile
    Scanline,
}

/// Settings of a [`crate::RenderContext`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Worker threads; `None` or 0 uses the hardware concurrency
    pub num_threads: Option<usize>,
    pub tile_order: TileOrder,
}

impl DeviceConfig {
    pub const THREADS_ENV: &'static str = "TESSEL_NUM_THREADS";
    pub const TILE_ORDER_ENV: &'static str = "TESSEL_TILE_ORDER";

    /// Read overrides from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from any key/value source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = DeviceConfig::default();

        if let Some(raw) = lookup(Self::THREADS_ENV) {
            let n = raw.trim().parse::<usize>().map_err(|_| {
                let name = Self::THREADS_ENV;
                RenderError::InvalidArgument(format!("{name}={raw:?} is not a thread count"))
            })?;
            config.num_threads = Some(n);
        }

        if let Some(raw) = lookup(Self::TILE_ORDER_ENV) {
            config.tile_order = match raw.trim().to_ascii_lowercase().as_str() {
                "spiral" => TileOrder::Spiral,
                "scanline" => TileOrder::Scanline,
                _ => {
                    return Err(RenderError::InvalidArgument(format!(
                        "{}={raw:?}, expected 'spiral' or 'scanline'",
                        Self::TILE_ORDER_ENV
                    )))
                }
            };
        }

        Ok(config)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| RenderError::InvalidArgument(format!("device config: {e}")))
    }
}

/// What the debug renderer visualizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DebugMode {
    /// Grey shading by the angle to the eye
    #[default]
    EyeLight,
    /// Geometric normal mapped to RGB
    Normal,
    PrimId,
    GeomId,
    InstId,
    /// Inverse distance as grey
    Depth,
    Uv,
    /// Green for front faces, red for back faces
    Backfacing,
}

/// Parameters shared by all renderers, plus the variant-specific ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererSettings {
    /// Samples per pixel per frame (clamped to at least 1)
    pub spp: u32,
    /// Maximum path length
    pub max_depth: u32,
    /// Paths whose throughput drops below this are terminated
    pub min_contribution: f32,
    /// Tiles below this error are converged; 0 disables the test
    pub variance_threshold: f32,
    /// Skip converged tiles on later frames
    pub adaptive_skip: bool,
    /// Background color (linear RGBA)
    pub bg_color: [f32; 4],
    pub ao_samples: u32,
    pub ao_distance: f32,
    pub ao_intensity: f32,
    /// Path depth at which russian roulette starts
    pub roulette_depth: u32,
    /// Per-sample radiance clamp; `None` leaves samples unclamped
    pub max_contribution: Option<f32>,
    /// Sample emissive models directly as lights (path tracer)
    pub geometry_lights: bool,
    pub debug_mode: DebugMode,
}

impl Default for RendererSettings {
    fn default() -> Self {
        Self {
            spp: 1,
            max_depth: 20,
            min_contribution: 0.001,
            variance_threshold: 0.0,
            adaptive_skip: true,
            bg_color: [0.0; 4],
            ao_samples: 1,
            ao_distance: 1e20,
            ao_intensity: 1.0,
            roulette_depth: 5,
            max_contribution: None,
            geometry_lights: true,
            debug_mode: DebugMode::default(),
        }
    }
}

impl RendererSettings {
    pub fn from_json(json: &str) -> Result<Self> {
        let settings: RendererSettings = serde_json::from_str(json)
            .map_err(|e| RenderError::InvalidArgument(format!("renderer settings: {e}")))?;
        Ok(settings.sanitized())
    }

    /// Clamp values into their valid ranges.
    pub fn sanitized(mut self) -> Self {
        self.spp = self.spp.max(1);
        self.variance_threshold = self.variance_threshold.max(0.0);
        self.ao_distance = self.ao_distance.max(0.0);
        self
    }

    pub fn with_spp(mut self, spp: u32) -> Self {
        self.spp = spp.max(1);
        self
    }

    pub fn with_background(mut self, rgba: [f32; 4]) -> Self {
        self.bg_color = rgba;
        self
    }

    pub fn with_variance_threshold(mut self, threshold: f32) -> Self {
        self.variance_threshold = threshold.max(0.0);
        self
    }

    pub fn bg_color(&self) -> Vec4 {
        Vec4::from_array(self.bg_color)
    }
}
