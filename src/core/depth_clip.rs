//! Disocclusion detection and input preparation
//!
//! Compares the reprojected current depth against the reconstructed previous
//! depth to find surfaces that were hidden last frame, dilates the reactive
//! masks, measures motion divergence against last frame's dilated motion and
//! writes the exposure-normalized input color weighted by disocclusion
//! confidence.

use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec3, Vec4};

use super::format::quantize_half;
use super::history::PreviousMotion;
use super::plane::{bilinear_taps, pixel_center_uv, saturate, uv_on_screen, Plane};
use super::reconstruct::{Reconstruction, RECONSTRUCTED_DEPTH_WEIGHT_THRESHOLD};
use crate::device_caps::ComputePrecision;
use crate::error::UpscaleResult;

/// Relative view-depth separation tolerated before a texel counts as disoccluded
pub const DEPTH_CLIP_TOLERANCE: f32 = 0.01;
/// Motion (in render pixels) below which divergence is ignored
pub const DIVERGENCE_MIN_MOTION_PX: f32 = 1.0;

/// Dilated per-pixel masks consumed by the lock tracker and accumulator
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct MaskTexel {
    pub reactive: f32,
    pub composite: f32,
    pub divergence: f32,
    pub disocclusion: f32,
}

#[derive(Debug, Clone)]
pub struct DepthClipOutput {
    pub masks: Plane<MaskTexel>,
    /// rgb: color / pre-exposure, a: disocclusion confidence (1 = trusted)
    pub prepared_color: Plane<Vec4>,
}

/// View-space distance for infinite inverted-Z device depth
#[inline]
pub fn view_depth(device_depth: f32, near: f32) -> f32 {
    near / device_depth.max(1e-6)
}

/// Disocclusion of one surface against one reconstructed previous depth
#[inline]
pub fn depth_clip_factor(current_view: f32, previous_view: f32) -> f32 {
    let separation = DEPTH_CLIP_TOLERANCE * current_view.max(1e-6);
    // positive: the previous surface was in front of this one
    let diff = current_view - previous_view;
    saturate((diff - separation) / separation)
}

fn dilate_reactive(reactive: &Plane<Vec2>, x: i32, y: i32) -> Vec2 {
    let mut m = Vec2::ZERO;
    for dy in -1..=1 {
        for dx in -1..=1 {
            m = m.max(reactive.load_clamped(x + dx, y + dy));
        }
    }
    m
}

/// Run disocclusion detection and prepare the accumulator inputs.
pub fn depth_clip(
    color: &Plane<Vec3>,
    reconstruction: &Reconstruction,
    reactive: &Plane<Vec2>,
    previous_motion: PreviousMotion<'_>,
    pre_exposure: f32,
    near: f32,
    precision: ComputePrecision,
) -> UpscaleResult<DepthClipOutput> {
    let extent = color.extent();
    let (w, h) = (extent.x, extent.y);
    let dilated = &reconstruction.dilated;
    let previous_depth = &reconstruction.previous_depth;
    let inv_pre = if pre_exposure > 0.0 { 1.0 / pre_exposure } else { 1.0 };

    let masks = Plane::try_par_from_fn(w, h, MaskTexel::default(), |x, y| {
        let (ix, iy) = (x as i32, y as i32);
        let uv = pixel_center_uv(x, y, extent);
        let mv = dilated.motion(ix, iy);
        let prev_uv = uv + mv;

        let disocclusion = if !uv_on_screen(prev_uv) {
            1.0
        } else {
            let current_view = view_depth(dilated.depth(ix, iy), near);
            let (taps, weights) = bilinear_taps(prev_uv, extent);
            let mut acc = 0.0;
            let mut weight_sum = 0.0;
            for (tap, weight) in taps.iter().zip(weights.iter()) {
                if *weight <= RECONSTRUCTED_DEPTH_WEIGHT_THRESHOLD {
                    continue;
                }
                let prev = previous_depth.load_clamped(tap.x, tap.y);
                acc += weight * depth_clip_factor(current_view, view_depth(prev, near));
                weight_sum += weight;
            }
            if weight_sum > 0.0 {
                saturate(acc / weight_sum)
            } else {
                0.0
            }
        };

        let divergence = match previous_motion.sample(prev_uv) {
            Some(pm) if uv_on_screen(prev_uv) => {
                let len_px = mv.length().max(pm.length()) * w as f32;
                let rel = (mv - pm).length() / (mv.length() + pm.length()).max(1e-6);
                saturate(rel) * saturate(len_px / DIVERGENCE_MIN_MOTION_PX)
            }
            _ => 0.0,
        };

        let r = dilate_reactive(reactive, ix, iy);
        MaskTexel {
            reactive: saturate(r.x),
            composite: saturate(r.y),
            divergence,
            disocclusion,
        }
    })?;

    let prepared_color = Plane::try_par_from_fn(w, h, Vec4::ZERO, |x, y| {
        let c = (color.get(x, y) * inv_pre).max(Vec3::ZERO);
        let c = match precision {
            ComputePrecision::Full => c,
            ComputePrecision::Half => {
                Vec3::new(quantize_half(c.x), quantize_half(c.y), quantize_half(c.z))
            }
        };
        let confidence = 1.0 - masks.get(x, y).disocclusion;
        c.extend(confidence)
    })?;

    Ok(DepthClipOutput {
        masks,
        prepared_color,
    })
}
