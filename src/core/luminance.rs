//! Luminance pyramid and auto-exposure
//!
//! Builds a log-luminance mip chain by repeated 2x2 averaging, keeps the
//! shading-change level for the accumulator, and reduces the chain to a
//! single scene-average log luminance that drives auto-exposure.
//!
//! Out-of-bounds children of an odd-sized level contribute nothing; each texel
//! averages only the children that exist.

use glam::Vec3;
use rayon::prelude::*;

use super::plane::{luminance, Plane};
use crate::device_caps::ReductionPath;

/// Floor applied inside the log so black regions stay finite
pub const LOG_LUMA_EPSILON: f32 = 1e-6;
/// Mip level read for shading-change detection
pub const SHADING_CHANGE_MIP: usize = 4;
/// Largest number of stored mip levels
pub const MAX_MIP_COUNT: u32 = 12;
/// Previous averages at or above this are treated as "no valid history"
pub const RESET_AUTO_EXPOSURE_SENTINEL: f32 = 1.0e8;
/// Adaptation rate of the exponential exposure smoothing, per second
pub const EXPOSURE_ADAPT_RATE: f32 = 1.0;

/// Tile edge of the work-group local reduction (mip 0 texels)
const TILE: u32 = 32;
/// Levels produced inside a tile: 32 -> 16 -> 8 -> 4 -> 2 -> 1
const TILE_LEVELS: usize = 5;

#[derive(Debug, Clone, PartialEq)]
pub struct LuminancePyramid {
    mips: Vec<Plane<f32>>,
    average_log_luma: f32,
}

impl LuminancePyramid {
    pub fn mips(&self) -> &[Plane<f32>] {
        &self.mips
    }

    pub fn mip(&self, level: usize) -> Option<&Plane<f32>> {
        self.mips.get(level)
    }

    /// Level used for shading-change detection, or the coarsest one for small inputs
    pub fn shading_change_mip(&self) -> Option<&Plane<f32>> {
        self.mips.get(SHADING_CHANGE_MIP).or(self.mips.last())
    }

    /// Scene-average log luminance
    pub fn average_log_luma(&self) -> f32 {
        self.average_log_luma
    }
}

/// Number of stored mips: min(floor(log2(max(w, h))), 12)
pub fn mip_count(width: u32, height: u32) -> u32 {
    let largest = width.max(height);
    if largest == 0 {
        return 0;
    }
    (31 - largest.leading_zeros()).min(MAX_MIP_COUNT)
}

#[inline]
fn log_luma(c: Vec3, pre_exposure: f32) -> f32 {
    let l = luminance(c / pre_exposure);
    // max() also maps NaN to the floor
    l.max(LOG_LUMA_EPSILON).ln()
}

#[inline]
fn average_children(src_w: u32, src_h: u32, x: u32, y: u32, get: impl Fn(u32, u32) -> f32) -> f32 {
    let mut sum = 0.0f32;
    let mut n = 0u32;
    for j in 0..2 {
        for i in 0..2 {
            let sx = 2 * x + i;
            let sy = 2 * y + j;
            if sx < src_w && sy < src_h {
                sum += get(sx, sy);
                n += 1;
            }
        }
    }
    if n == 0 {
        0.0
    } else {
        sum / n as f32
    }
}

#[inline]
fn half_extent(v: u32) -> u32 {
    v.div_ceil(2).max(1)
}

fn downsample(src: &Plane<f32>) -> Plane<f32> {
    let (w, h) = (src.width(), src.height());
    Plane::par_from_fn(half_extent(w), half_extent(h), 0.0, |x, y| {
        average_children(w, h, x, y, |sx, sy| src.get(sx, sy))
    })
}

/// Build the log-luminance pyramid of `color` normalized by `pre_exposure`.
pub fn build_pyramid(color: &Plane<Vec3>, pre_exposure: f32, path: ReductionPath) -> LuminancePyramid {
    let (w, h) = (color.width(), color.height());
    if w == 0 || h == 0 {
        return LuminancePyramid {
            mips: Vec::new(),
            average_log_luma: 0.0,
        };
    }
    let pre_exposure = if pre_exposure > 0.0 { pre_exposure } else { 1.0 };
    let count = mip_count(w, h) as usize;
    if count == 0 {
        return LuminancePyramid {
            mips: Vec::new(),
            average_log_luma: log_luma(color.get(0, 0), pre_exposure),
        };
    }

    let mip0 = Plane::par_from_fn(half_extent(w), half_extent(h), 0.0, |x, y| {
        average_children(w, h, x, y, |sx, sy| log_luma(color.get(sx, sy), pre_exposure))
    });

    let mut mips = match path {
        ReductionPath::LevelByLevel => {
            let mut mips = vec![mip0];
            while mips.len() < count {
                let next = downsample(&mips[mips.len() - 1]);
                mips.push(next);
            }
            mips
        }
        ReductionPath::TileLocal => reduce_tile_local(mip0, count),
    };

    let mut tail = mips[mips.len() - 1].clone();
    while tail.width() > 1 || tail.height() > 1 {
        tail = downsample(&tail);
    }
    let average_log_luma = tail.get(0, 0);
    mips.truncate(count);

    LuminancePyramid {
        mips,
        average_log_luma,
    }
}

/// Produce levels 1..=5 per 32x32 tile of mip 0, then finish level by level.
fn reduce_tile_local(mip0: Plane<f32>, count: usize) -> Vec<Plane<f32>> {
    let local_levels = TILE_LEVELS.min(count.saturating_sub(1));
    let mut extents = vec![(mip0.width(), mip0.height())];
    for _ in 0..local_levels {
        let (w, h) = extents[extents.len() - 1];
        extents.push((half_extent(w), half_extent(h)));
    }

    let tiles_x = mip0.width().div_ceil(TILE);
    let tiles_y = mip0.height().div_ceil(TILE);

    // each tile returns its region of every local level
    let tile_results: Vec<(u32, u32, Vec<Vec<f32>>)> = (0..tiles_x * tiles_y)
        .into_par_iter()
        .map(|t| {
            let (tx, ty) = (t % tiles_x, t / tiles_x);
            let mut levels: Vec<Vec<f32>> = Vec::with_capacity(local_levels);
            for k in 1..=local_levels {
                let size = TILE >> k;
                let (dst_w, dst_h) = extents[k];
                let (src_w, src_h) = extents[k - 1];
                let (ox, oy) = (tx * size, ty * size);
                let mut region = vec![0.0f32; (size * size) as usize];
                for ly in 0..size {
                    for lx in 0..size {
                        let (gx, gy) = (ox + lx, oy + ly);
                        if gx >= dst_w || gy >= dst_h {
                            continue;
                        }
                        region[(ly * size + lx) as usize] =
                            average_children(src_w, src_h, gx, gy, |sx, sy| {
                                if k == 1 {
                                    mip0.get(sx, sy)
                                } else {
                                    let src_size = TILE >> (k - 1);
                                    let (px, py) = (sx - 2 * ox, sy - 2 * oy);
                                    levels[k - 2][(py * src_size + px) as usize]
                                }
                            });
                    }
                }
                levels.push(region);
            }
            (tx, ty, levels)
        })
        .collect();

    let mut mips = vec![mip0];
    for k in 1..=local_levels {
        let (w, h) = extents[k];
        let size = TILE >> k;
        let mut plane = Plane::new(w, h, 0.0);
        for (tx, ty, levels) in &tile_results {
            let region = &levels[k - 1];
            for ly in 0..size {
                for lx in 0..size {
                    let (gx, gy) = (tx * size + lx, ty * size + ly);
                    if gx < w && gy < h {
                        plane.set(gx, gy, region[(ly * size + lx) as usize]);
                    }
                }
            }
        }
        mips.push(plane);
    }

    while mips.len() < count {
        let next = downsample(&mips[mips.len() - 1]);
        mips.push(next);
    }
    mips
}

/// ISO-100 response curve: exposure scalar for an average log luminance
pub fn auto_exposure_from_log_luma(average_log_luma: f32) -> f32 {
    const S: f32 = 100.0;
    const K: f32 = 12.5;
    const Q: f32 = 0.65;

    let lavg = average_log_luma.exp().max(LOG_LUMA_EPSILON);
    let ev100 = (lavg * S / K).log2();
    let lmax = (78.0 / (Q * S)) * ev100.exp2();
    1.0 / lmax
}

/// Exponential smoothing of the average log luminance toward `new`
pub fn smooth_log_luma(prev: f32, new: f32, delta_time: f32) -> f32 {
    let dt = if delta_time.is_nan() {
        0.0
    } else {
        delta_time.clamp(0.0, 1.0)
    };
    // 1 - exp(-dt * rate), accurate for small dt
    let blend = -(-dt * EXPOSURE_ADAPT_RATE).exp_m1();
    prev + (new - prev) * blend
}

/// Exposure carried between frames of one view
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExposureState {
    pub average_log_luma: f32,
    pub exposure: f32,
}

impl Default for ExposureState {
    fn default() -> Self {
        Self {
            average_log_luma: RESET_AUTO_EXPOSURE_SENTINEL,
            exposure: 1.0,
        }
    }
}

impl ExposureState {
    pub fn has_history(&self) -> bool {
        self.average_log_luma < RESET_AUTO_EXPOSURE_SENTINEL
    }

    /// Fold a new scene average in. Smoothing applies only when a previous average exists.
    pub fn update(&mut self, new_average: f32, delta_time: f32, smoothing: bool) -> f32 {
        let result = if smoothing && self.has_history() {
            smooth_log_luma(self.average_log_luma, new_average, delta_time)
        } else {
            new_average
        };
        self.average_log_luma = result;
        self.exposure = auto_exposure_from_log_luma(result);
        self.exposure
    }

    /// Engine-supplied exposure, used when auto exposure is off
    pub fn set_engine_exposure(&mut self, exposure: f32) -> f32 {
        self.exposure = if exposure.is_finite() && exposure > 0.0 {
            exposure
        } else {
            1.0
        };
        self.exposure
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
