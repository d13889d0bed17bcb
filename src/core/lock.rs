//! Per-pixel lock tracking
//!
//! A lock is the confidence that a pixel's history is trustworthy. It accrues
//! toward 1 while the reprojected luma stays consistent and the surface stays
//! visible, and decays toward 0 on disocclusion or luma divergence. The luma
//! the lock was built on is stored next to it so presets without a luma
//! history can still test consistency.

use bytemuck::{Pod, Zeroable};
use glam::UVec2;

use super::depth_clip::MaskTexel;
use super::history::History;
use super::plane::{pixel_center_uv, saturate, uv_on_screen, Plane};
use super::reconstruct::DilatedData;
use crate::error::UpscaleResult;

/// Confidence of a freshly created pixel
pub const LOCK_BASELINE: f32 = 0.5;
/// Fraction of the remaining headroom gained per consistent frame
pub const LOCK_ACCRUAL: f32 = 0.2;
/// Multiplicative decay on luma divergence
pub const LOCK_DECAY: f32 = 0.5;
/// Relative luma change still considered consistent
pub const LOCK_LUMA_TOLERANCE: f32 = 0.1;
/// Disocclusion at or above this never accrues
pub const LOCK_DISOCCLUSION_CUTOFF: f32 = 0.5;

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct LockTexel {
    /// Lock confidence in [0, 1]
    pub confidence: f32,
    /// Exposure-normalized luma the lock was built on
    pub luma: f32,
}

impl LockTexel {
    pub fn baseline(luma: f32) -> Self {
        Self {
            confidence: LOCK_BASELINE,
            luma: sanitize_luma(luma),
        }
    }
}

#[inline]
fn sanitize_luma(l: f32) -> f32 {
    if l.is_finite() {
        l.max(0.0)
    } else {
        0.0
    }
}

/// Whether two lumas are within the lock tolerance of each other
#[inline]
pub fn luma_consistent(a: f32, b: f32) -> bool {
    let denom = a.max(b).max(1e-4);
    (a - b).abs() / denom <= LOCK_LUMA_TOLERANCE
}

/// One frame of the lock state machine for a single pixel
pub fn lock_step(prev: LockTexel, current_luma: f32, disocclusion: f32, reactive: f32) -> LockTexel {
    let current = sanitize_luma(current_luma);
    let prev_confidence = saturate(prev.confidence);
    let disocclusion = saturate(disocclusion);
    let consistent = luma_consistent(prev.luma, current);

    let (confidence, luma) = if consistent && disocclusion < LOCK_DISOCCLUSION_CUTOFF {
        let trust = (1.0 - disocclusion) * (1.0 - saturate(reactive));
        let c = prev_confidence + (1.0 - prev_confidence) * LOCK_ACCRUAL * trust;
        // locked pixels keep their reference luma, young ones follow the signal
        (c, prev.luma + (current - prev.luma) * (1.0 - c))
    } else {
        (prev_confidence * LOCK_DECAY * (1.0 - disocclusion), current)
    };

    LockTexel {
        confidence: saturate(confidence),
        luma: sanitize_luma(luma),
    }
}

/// Update the lock plane at display resolution.
///
/// `history` is `None` on a cold start, which initializes every pixel to the baseline.
pub fn update_locks(
    display: UVec2,
    dilated: &DilatedData,
    masks: &Plane<MaskTexel>,
    history: Option<&History>,
) -> UpscaleResult<Plane<LockTexel>> {
    Plane::try_par_from_fn(display.x, display.y, LockTexel::default(), |x, y| {
        let uv = pixel_center_uv(x, y, display);
        let current_luma = dilated.luma_at(uv);
        let Some(history) = history else {
            return LockTexel::baseline(current_luma);
        };

        let prev_uv = uv + dilated.motion_at(uv);
        if !uv_on_screen(prev_uv) {
            return LockTexel {
                confidence: 0.0,
                luma: sanitize_luma(current_luma),
            };
        }
        let mask = masks.sample_nearest(uv);
        lock_step(
            history.sample_lock(prev_uv),
            current_luma,
            mask.disocclusion,
            mask.reactive,
        )
    })
}
