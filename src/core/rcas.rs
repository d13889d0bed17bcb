//! Robust contrast-adaptive sharpening
//!
//! A 5-tap cross filter. Per channel, the largest negative lobe that keeps the
//! result inside the neighborhood's range is solved in closed form, limited,
//! optionally damped where the neighborhood looks like noise, then applied
//! with normalization `1 / (4 w + 1)`. Works on Reinhard-tonemapped
//! `color * exposure` so the clipping bounds are meaningful for HDR input.

use glam::Vec3;

use super::accumulate::{inverse_tonemap, tonemap};
use super::plane::{saturate, Plane};
use crate::error::UpscaleResult;

/// Largest negative lobe weight ever applied
pub const RCAS_LIMIT: f32 = 0.25 - 1.0 / 16.0;

/// Lobe scale for a user sharpness in [0, 1]
pub fn rcas_scale(sharpness: f32) -> f32 {
    let remapped = -2.0 * sharpness + 2.0;
    (-remapped).exp2()
}

/// Keep a denominator away from zero without changing its sign
#[inline]
fn guard(v: Vec3) -> Vec3 {
    let g = |c: f32| if c.abs() < 1e-6 { 1e-6f32.copysign(c) } else { c };
    Vec3::new(g(v.x), g(v.y), g(v.z))
}

#[inline]
fn luma_proxy(c: Vec3) -> f32 {
    c.z * 0.5 + (c.x * 0.5 + c.y)
}

/// Sharpen one pixel given its cross neighborhood (up, left, center, right, down)
pub fn rcas_texel(b: Vec3, d: Vec3, e: Vec3, f: Vec3, h: Vec3, scale: f32, denoise: bool) -> Vec3 {
    let mn4 = b.min(d).min(f).min(h);
    let mx4 = b.max(d).max(f).max(h);

    let hit_min = mn4.min(e) / guard(4.0 * mx4);
    let hit_max = (Vec3::ONE - mx4.max(e)) / guard(4.0 * mn4 - Vec3::splat(4.0));
    let lobe_rgb = (-hit_min).max(hit_max);
    let mut lobe = (-RCAS_LIMIT).max(lobe_rgb.max_element().min(0.0)) * scale;

    if denoise {
        let (bl, dl, el, fl, hl) = (luma_proxy(b), luma_proxy(d), luma_proxy(e), luma_proxy(f), luma_proxy(h));
        let nz = 0.25 * (bl + dl + fl + hl) - el;
        let range = bl.max(dl).max(el).max(fl).max(hl) - bl.min(dl).min(el).min(fl).min(hl);
        let nz = if range > 1e-6 { saturate(nz.abs() / range) } else { 0.0 };
        lobe *= 1.0 - 0.5 * nz;
    }
    if !lobe.is_finite() {
        return e;
    }

    (lobe * (b + d + f + h) + e) / (4.0 * lobe + 1.0)
}

/// Sharpen a pre-exposure-normalized plane.
///
/// A sharpness of zero returns an exact copy.
pub fn apply_rcas(
    input: &Plane<Vec3>,
    sharpness: f32,
    exposure: f32,
    denoise: bool,
) -> UpscaleResult<Plane<Vec3>> {
    let (w, h) = (input.width(), input.height());
    let sharpness = saturate(sharpness);
    if sharpness <= 0.0 {
        return Plane::try_par_from_fn(w, h, Vec3::ZERO, |x, y| input.get(x, y));
    }
    let scale = rcas_scale(sharpness);
    let exposure = if exposure.is_finite() && exposure > 0.0 { exposure } else { 1.0 };
    let load = |x: i32, y: i32| tonemap((input.load_clamped(x, y) * exposure).max(Vec3::ZERO));

    Plane::try_par_from_fn(w, h, Vec3::ZERO, |x, y| {
        let (x, y) = (x as i32, y as i32);
        let sharpened = rcas_texel(
            load(x, y - 1),
            load(x - 1, y),
            load(x, y),
            load(x + 1, y),
            load(x, y + 1),
            scale,
            denoise,
        );
        inverse_tonemap(sharpened.clamp(Vec3::ZERO, Vec3::ONE)) / exposure
    })
}
