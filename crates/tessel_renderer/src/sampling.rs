//! Random number helpers for tile rendering.
//!
//! Every tile job seeds its own generator from the tile index and the
//! number of samples already accumulated in that tile, so results do not
//! depend on which worker renders which tile, or in what order.

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use tessel_math::{Vec2, Vec3};

/// Uniform float in [0, 1) from 24 random bits.
#[inline]
pub fn gen_f32(rng: &mut dyn RngCore) -> f32 {
    (rng.next_u32() >> 8) as f32 * (1.0 / (1u32 << 24) as f32)
}

#[inline]
pub fn gen_vec2(rng: &mut dyn RngCore) -> Vec2 {
    Vec2::new(gen_f32(rng), gen_f32(rng))
}

/// Generator for one tile of one accumulation pass.
pub fn tile_rng(job_id: usize, accum_id: u32) -> StdRng {
    StdRng::seed_from_u64(splitmix64(((job_id as u64) << 32) ^ u64::from(accum_id)))
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9e37_79b9_7f4a_7c15);
    x = (x ^ (x >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    x ^ (x >> 31)
}

/// Two unit vectors completing `n` to an orthonormal basis.
pub fn orthonormal_basis(n: Vec3) -> (Vec3, Vec3) {
    // Duff et al., "Building an Orthonormal Basis, Revisited"
    let sign = 1.0_f32.copysign(n.z);
    let a = -1.0 / (sign + n.z);
    let b = n.x * n.y * a;
    (
        Vec3::new(1.0 + sign * n.x * n.x * a, sign * b, -sign * n.x),
        Vec3::new(b, sign + n.y * n.y * a, -n.y),
    )
}

/// Cosine-weighted direction in the hemisphere around `n`.
pub fn cosine_hemisphere(n: Vec3, u: Vec2) -> Vec3 {
    let r = u.x.sqrt();
    let phi = 2.0 * std::f32::consts::PI * u.y;
    let (t, b) = orthonormal_basis(n);
    let z = (1.0 - u.x).max(0.0).sqrt();
    (t * (r * phi.cos()) + b * (r * phi.sin()) + n * z).normalize()
}

/// Stable pseudo-random color for an integer id (debug views).
pub fn id_color(id: u32) -> Vec3 {
    let h = splitmix64(id as u64 + 1);
    Vec3::new(
        (h & 0xff) as f32 / 255.0,
        ((h >> 8) & 0xff) as f32 / 255.0,
        ((h >> 16) & 0xff) as f32 / 255.0,
    )
}
