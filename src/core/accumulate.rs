//! Temporal accumulation
//!
//! The central filter. For every output pixel:
//! 1. reproject the previous upscaled color with the dilated motion (bilinear)
//! 2. clip it against the variance box of the 3x3 input neighborhood
//! 3. reconstruct the new sample with a Lanczos-2 kernel centered on the
//!    jittered sample positions
//! 4. blend, with lock confidence favoring history and reactive/disocclusion
//!    favoring the new sample
//!
//! Blending happens in pre-exposure-normalized linear color, passed through a
//! Reinhard curve so single bright samples cannot dominate the kernel.

use glam::{IVec2, UVec2, Vec2, Vec3, Vec4};
use once_cell::sync::Lazy;

use super::depth_clip::MaskTexel;
use super::format::{pack_r11g11b10, pack_rgba16, Rgba16};
use super::history::{
    History, HistoryBuffers, PackedHistory, QualityHistory, StandardHistory,
};
use super::lock::{luma_consistent, LockTexel};
use super::plane::{pixel_center_uv, saturate, texel_floor, uv_on_screen, Plane};
use super::reconstruct::DilatedData;
use crate::error::UpscaleResult;

pub const EPSILON: f32 = 1e-6;
/// Neighborhood box half-width in standard deviations
pub const VARIANCE_CLIP_GAMMA: f32 = 1.25;
/// Extra box width granted to fully locked pixels, as a fraction of gamma
pub const LOCK_GAMMA_BOOST: f32 = 1.0;
/// Accumulation weight normalization (stored value 1.0 == this many frames)
pub const MAX_ACCUMULATION_FRAMES: f32 = 16.0;
/// Accumulation cap for unlocked pixels
pub const UNLOCKED_ACCUMULATION_FRAMES: f32 = 8.0;
/// Lowest new-sample weight forced by motion divergence (non-Quality presets)
pub const DIVERGENCE_BLEND: f32 = 0.5;
/// Lowest new-sample weight forced by a shading change (Quality)
pub const SHADING_CHANGE_BLEND: f32 = 0.5;
/// Temporal smoothing of the flicker score
const FLICKER_SMOOTHING: f32 = 0.25;

const LANCZOS_LUT_SIZE: usize = 1024;

/// Lanczos-2 window: sinc(pi x) * sinc(pi x / 2), zero outside |x| < 2
pub fn lanczos2(x: f32) -> f32 {
    let x = x.abs();
    if x < EPSILON {
        return 1.0;
    }
    if x >= 2.0 {
        return 0.0;
    }
    let px = std::f32::consts::PI * x;
    (px.sin() / px) * ((0.5 * px).sin() / (0.5 * px))
}

static LANCZOS2_LUT: Lazy<[f32; LANCZOS_LUT_SIZE + 1]> = Lazy::new(|| {
    let mut lut = [0.0f32; LANCZOS_LUT_SIZE + 1];
    for (i, v) in lut.iter_mut().enumerate() {
        *v = lanczos2(2.0 * i as f32 / LANCZOS_LUT_SIZE as f32);
    }
    lut
});

/// Table-driven Lanczos-2 with linear interpolation
#[inline]
pub fn lanczos2_approx(x: f32) -> f32 {
    let t = x.abs() * (LANCZOS_LUT_SIZE as f32 / 2.0);
    if !(t < LANCZOS_LUT_SIZE as f32) {
        return 0.0;
    }
    let i = t as usize;
    let f = t - i as f32;
    let lut = &*LANCZOS2_LUT;
    lut[i] + (lut[i + 1] - lut[i]) * f
}

#[inline]
fn max3(c: Vec3) -> f32 {
    c.x.max(c.y).max(c.z)
}

#[inline]
pub fn tonemap(c: Vec3) -> Vec3 {
    c / (1.0 + max3(c))
}

#[inline]
pub fn inverse_tonemap(t: Vec3) -> Vec3 {
    t / (1.0 - max3(t)).max(EPSILON)
}

/// Everything the accumulator reads for one frame.
///
/// The dilation and lock planes are moved into the next history.
pub struct AccumulateInputs<'a> {
    /// Render resolution, rgb normalized by pre-exposure, a = disocclusion confidence
    pub prepared_color: &'a Plane<Vec4>,
    pub masks: &'a Plane<MaskTexel>,
    pub dilated: DilatedData,
    /// Display resolution, this frame's locks
    pub locks: Plane<LockTexel>,
    /// Previous frame, or a placeholder on cold start
    pub history: &'a History,
    /// Log-luma mip used to normalize shading change (Quality)
    pub shading_mip: Option<&'a Plane<f32>>,
    /// Sub-pixel offset of this frame's samples, render pixels
    pub jitter: Vec2,
    pub pre_exposure: f32,
    pub exposure: f32,
    pub display: UVec2,
}

pub struct AccumulateOutput {
    /// Display resolution, pre-exposure normalized
    pub color: Plane<Vec3>,
    pub history: History,
}

#[derive(Clone, Copy, Default)]
struct PixelResult {
    color: Vec3,
    accumulation: f32,
    luma_history: Vec4,
}

struct Neighborhood {
    new_sample: Vec3,
    sample_weight: f32,
    box_min: Vec3,
    box_max: Vec3,
    mean: Vec3,
    sigma: Vec3,
}

/// Lanczos reconstruction of the new sample plus 3x3 statistics, in tonemapped space
fn gather(prepared: &Plane<Vec4>, q: Vec2, jitter: Vec2) -> Neighborhood {
    let load = |p: IVec2| tonemap(prepared.load_clamped(p.x, p.y).truncate());
    let extent = prepared.extent();

    let base = texel_floor(q - Vec2::splat(0.5) - jitter, extent);
    let mut sum = Vec3::ZERO;
    let mut weight_sum = 0.0f32;
    let mut max_weight = 0.0f32;
    for j in -1..=2 {
        for i in -1..=2 {
            let p = base + IVec2::new(i, j);
            let d = p.as_vec2() + Vec2::splat(0.5) + jitter - q;
            let w = lanczos2_approx(d.x) * lanczos2_approx(d.y);
            sum += load(p) * w;
            weight_sum += w;
            max_weight = max_weight.max(w);
        }
    }

    // dering against the four samples around q
    let mut ring_min = Vec3::splat(f32::MAX);
    let mut ring_max = Vec3::splat(f32::MIN);
    for j in 0..=1 {
        for i in 0..=1 {
            let c = load(base + IVec2::new(i, j));
            ring_min = ring_min.min(c);
            ring_max = ring_max.max(c);
        }
    }
    let new_sample = if weight_sum.abs() > EPSILON {
        (sum / weight_sum).clamp(ring_min, ring_max)
    } else {
        load(texel_floor(q - jitter, extent))
    };

    let center = texel_floor(q - jitter, extent);
    let mut m1 = Vec3::ZERO;
    let mut m2 = Vec3::ZERO;
    let mut box_min = Vec3::splat(f32::MAX);
    let mut box_max = Vec3::splat(f32::MIN);
    for j in -1..=1 {
        for i in -1..=1 {
            let c = load(center + IVec2::new(i, j));
            m1 += c;
            m2 += c * c;
            box_min = box_min.min(c);
            box_max = box_max.max(c);
        }
    }
    let mean = m1 / 9.0;
    let sigma = (m2 / 9.0 - mean * mean).max(Vec3::ZERO);
    let sigma = Vec3::new(sigma.x.sqrt(), sigma.y.sqrt(), sigma.z.sqrt());

    Neighborhood {
        new_sample,
        sample_weight: saturate(max_weight).max(EPSILON),
        box_min,
        box_max,
        mean,
        sigma,
    }
}

/// Clamp history into the variance box, widened for locked pixels
fn rectify(history: Vec3, n: &Neighborhood, lock: f32) -> Vec3 {
    let gamma = VARIANCE_CLIP_GAMMA * (1.0 + LOCK_GAMMA_BOOST * saturate(lock));
    let lo = (n.mean - n.sigma * gamma).max(n.box_min);
    let hi = (n.mean + n.sigma * gamma).min(n.box_max);
    history.clamp(lo, hi.max(lo))
}

/// Sign alternation of the last three luma steps, 0 or 1
fn flicker(current: f32, h: Vec4) -> f32 {
    let d0 = current - h.x;
    let d1 = h.x - h.y;
    if !luma_consistent(current, h.x) && !luma_consistent(h.x, h.y) && d0 * d1 < 0.0 {
        1.0
    } else {
        0.0
    }
}

/// Accumulate one frame and build the next history.
pub fn accumulate(inputs: AccumulateInputs<'_>) -> UpscaleResult<AccumulateOutput> {
    let AccumulateInputs {
        prepared_color,
        masks,
        dilated,
        locks,
        history,
        shading_mip,
        jitter,
        pre_exposure: pre,
        exposure,
        display,
    } = inputs;
    let render = prepared_color.extent().as_vec2();
    let keeps_luma_history = history.preset().keeps_luma_history();
    let history_scale = 1.0 / history.pre_exposure;

    let pixels = Plane::try_par_from_fn(display.x, display.y, PixelResult::default(), |x, y| {
        let uv = pixel_center_uv(x, y, display);
        let q = uv * render;
        let n = gather(prepared_color, q, jitter);
        let mask = masks.sample_nearest(uv);
        let lock = locks.get(x, y).confidence;
        let current_luma = dilated.luma_at(uv);

        let prev_uv = uv + dilated.motion_at(uv);
        let on_screen = uv_on_screen(prev_uv);
        let (stored, prev_accumulation) = if on_screen {
            history.sample_color(prev_uv)
        } else {
            (Vec3::ZERO, 0.0)
        };
        let reprojected = tonemap((stored * history_scale).max(Vec3::ZERO));
        let clipped = rectify(reprojected, &n, lock);

        let max_frames = UNLOCKED_ACCUMULATION_FRAMES
            + (MAX_ACCUMULATION_FRAMES - UNLOCKED_ACCUMULATION_FRAMES) * saturate(lock);
        let history_frames = (saturate(prev_accumulation) * MAX_ACCUMULATION_FRAMES)
            * (1.0 - mask.disocclusion)
            * (1.0 - mask.composite);
        let history_frames = history_frames.min(max_frames);

        let mut sample_weight = n.sample_weight;
        let mut floor = mask.reactive.max(mask.disocclusion);
        let mut luma_history = Vec4::ZERO;

        if keeps_luma_history {
            let h = if on_screen {
                history.sample_luma_history(prev_uv).unwrap_or(Vec4::ZERO)
            } else {
                Vec4::new(current_luma, current_luma, current_luma, 0.0)
            };
            let local_luma = shading_mip
                .map(|mip| mip.sample_bilinear(uv).exp() * exposure)
                .unwrap_or(current_luma);
            let instability = saturate((current_luma - h.x).abs() / local_luma.max(1e-4));
            let flicker_score = h.w + (flicker(current_luma, h) - h.w) * FLICKER_SMOOTHING;
            // flickering pixels lean on history, genuine shading changes on the new sample
            sample_weight *= 1.0 - 0.5 * saturate(flicker_score);
            floor = floor.max(SHADING_CHANGE_BLEND * instability * (1.0 - saturate(lock)));
            luma_history = Vec4::new(current_luma, h.x, h.y, saturate(flicker_score));
        } else {
            floor = floor.max(DIVERGENCE_BLEND * mask.divergence);
        }

        let alpha = (sample_weight / (history_frames + sample_weight)).max(saturate(floor));
        let blended = clipped * (1.0 - alpha) + n.new_sample * alpha;
        let accumulation = ((history_frames + sample_weight).min(max_frames)
            * (1.0 - mask.reactive))
            / MAX_ACCUMULATION_FRAMES;

        PixelResult {
            color: inverse_tonemap(blended),
            accumulation: saturate(accumulation),
            luma_history,
        }
    })?;

    let (dw, dh) = (display.x, display.y);
    let stored_color = |x: u32, y: u32| pixels.get(x, y).color * pre;
    let accumulation = || Plane::try_par_from_fn(dw, dh, 0.0, |x, y| pixels.get(x, y).accumulation);
    let buffers = match dilated {
        DilatedData::Packed(dilation) => HistoryBuffers::UltraPerformance(PackedHistory {
            color: Plane::try_par_from_fn(dw, dh, 0u32, |x, y| pack_r11g11b10(stored_color(x, y)))?,
            temporal_reactive: accumulation()?,
            dilation,
        }),
        DilatedData::Separate {
            motion: dilated_motion,
            ..
        } => {
            if keeps_luma_history {
                HistoryBuffers::Quality(QualityHistory {
                    color: Plane::try_par_from_fn(dw, dh, Rgba16::default(), |x, y| {
                        pack_rgba16(stored_color(x, y).extend(pixels.get(x, y).accumulation))
                    })?,
                    luma_history: Plane::try_par_from_fn(dw, dh, Vec4::ZERO, |x, y| {
                        pixels.get(x, y).luma_history
                    })?,
                    dilated_motion,
                })
            } else {
                let standard = StandardHistory {
                    color: Plane::try_par_from_fn(dw, dh, 0u32, |x, y| {
                        pack_r11g11b10(stored_color(x, y))
                    })?,
                    temporal_reactive: accumulation()?,
                    dilated_motion,
                };
                match history.buffers {
                    HistoryBuffers::Performance(_) => HistoryBuffers::Performance(standard),
                    _ => HistoryBuffers::Balanced(standard),
                }
            }
        }
    };

    let color = Plane::try_par_from_fn(dw, dh, Vec3::ZERO, |x, y| pixels.get(x, y).color)?;

    Ok(AccumulateOutput {
        color,
        history: History {
            render_extent: prepared_color.extent(),
            display_extent: display,
            pre_exposure: if pre > 0.0 { pre } else { 1.0 },
            lock: locks,
            buffers,
        },
    })
}
