//! Post-processing operations applied to the color channel when it is
//! mapped.
//!
//! Frame ops run on an assembled copy of the linear color image, so they
//! never affect accumulation.

use rayon::prelude::*;
use tessel_math::{Vec3, Vec4};

use crate::error::{RenderError, Result};

/// An image operation on linear RGBA, row-major with row 0 at the bottom.
pub trait FrameOp: Send + Sync {
    fn name(&self) -> &str;

    fn process(&self, color: &mut [Vec4], width: u32, height: u32);
}

/// Separable Gaussian blur.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameBlur {
    pub radius: u32,
    /// Squared standard deviation of the kernel
    pub variance: f32,
}

impl Default for FrameBlur {
    fn default() -> Self {
        Self {
            radius: 4,
            variance: 9.0,
        }
    }
}

impl FrameBlur {
    /// Normalized kernel weights for offsets `-radius..=radius`.
    fn kernel(&self) -> Vec<f32> {
        let r = self.radius as i32;
        let weights: Vec<f32> = (-r..=r)
            .map(|b| (-((b * b) as f32) / (2.0 * self.variance)).exp())
            .collect();
        let sum: f32 = weights.iter().sum();
        weights.into_iter().map(|w| w / sum).collect()
    }
}

/// Weighted sum of `sample(i + b)` over the kernel, renormalized where the
/// kernel hangs over the image edge.
fn convolve(kernel: &[f32], i: usize, len: usize, sample: impl Fn(usize) -> Vec4) -> Vec4 {
    let r = (kernel.len() / 2) as isize;
    let mut acc = Vec4::ZERO;
    let mut weight = 0.0;
    for (k, w) in kernel.iter().enumerate() {
        let j = i as isize + k as isize - r;
        if j < 0 || j >= len as isize {
            continue;
        }
        acc += sample(j as usize) * *w;
        weight += w;
    }
    acc / weight
}

impl FrameOp for FrameBlur {
    fn name(&self) -> &str {
        "frame_blur"
    }

    fn process(&self, color: &mut [Vec4], width: u32, height: u32) {
        let (w, h) = (width as usize, height as usize);
        if self.radius == 0 || color.len() != w * h {
            return;
        }
        let kernel = self.kernel();

        let mut scratch = vec![Vec4::ZERO; color.len()];
        scratch.par_chunks_mut(w).enumerate().for_each(|(y, row)| {
            let src = &color[y * w..(y + 1) * w];
            for (x, out) in row.iter_mut().enumerate() {
                *out = convolve(&kernel, x, w, |i| src[i]);
            }
        });

        let scratch = &scratch;
        color.par_chunks_mut(w).enumerate().for_each(|(y, row)| {
            for (x, out) in row.iter_mut().enumerate() {
                *out = convolve(&kernel, y, h, |j| scratch[j * w + x]);
            }
        });
    }
}

/// Tone curve of a [`ToneMapper`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ToneCurve {
    /// Exposure only
    Linear,
    #[default]
    Aces,
    Reinhard,
}

/// Exposure and tone curve, leaving alpha untouched.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ToneMapper {
    pub exposure: f32,
    pub curve: ToneCurve,
}

impl Default for ToneMapper {
    fn default() -> Self {
        Self {
            exposure: 1.0,
            curve: ToneCurve::Aces,
        }
    }
}

impl ToneMapper {
    pub fn apply(&self, color: Vec3) -> Vec3 {
        let color = color * self.exposure;
        match self.curve {
            ToneCurve::Linear => color,
            ToneCurve::Aces => aces(color),
            ToneCurve::Reinhard => color / (color + Vec3::ONE),
        }
    }
}

fn aces(color: Vec3) -> Vec3 {
    let color = Vec3::new(
        color.x * 0.59719 + color.y * 0.35458 + color.z * 0.04823,
        color.x * 0.07600 + color.y * 0.90834 + color.z * 0.01566,
        color.x * 0.02840 + color.y * 0.13383 + color.z * 0.83777,
    );

    let a = color * (color + Vec3::splat(0.0245786)) - Vec3::splat(0.000090537);
    let b = color * (color * 0.983729 + Vec3::splat(0.432951)) + Vec3::splat(0.238081);
    let color = a / b;

    Vec3::new(
        color.x * 1.60475 + color.y * -0.53108 + color.z * -0.07367,
        color.x * -0.10208 + color.y * 1.10813 + color.z * -0.00605,
        color.x * -0.00327 + color.y * -0.07276 + color.z * 1.07602,
    )
    .clamp(Vec3::ZERO, Vec3::ONE)
}

impl FrameOp for ToneMapper {
    fn name(&self) -> &str {
        "tonemapper"
    }

    fn process(&self, color: &mut [Vec4], _width: u32, _height: u32) {
        color.par_iter_mut().for_each(|c| {
            *c = self.apply(c.truncate()).extend(c.w);
        });
    }
}

/// Create a frame op by name.
pub fn create_frame_op(name: &str) -> Result<Box<dyn FrameOp>> {
    match name {
        "frame_blur" | "blur" => Ok(Box::new(FrameBlur::default())),
        "tonemapper" | "tonemap" => Ok(Box::new(ToneMapper::default())),
        _ => {
            log::warn!("Unknown frame operation '{name}'");
            Err(RenderError::InvalidArgument(format!("unknown frame operation '{name}'")))
        }
    }
}
