//! Previous-depth reconstruction and motion dilation
//!
//! Each input pixel takes the motion of the nearest surface in its 3x3
//! neighborhood, then scatters its depth into the location it occupied in the
//! previous frame. Collisions resolve with an atomic max on the f32 bit
//! pattern: depth is inverted (1 = near, 0 = far) and non-negative, so the
//! largest bits are the nearest surface. The scatter target starts cleared to
//! 0 (far) because not every texel receives a write.

use std::sync::atomic::{AtomicU32, Ordering};

use bytemuck::{Pod, Zeroable};
use glam::{IVec2, Vec2, Vec3};
use half::f16;
use rayon::prelude::*;

use super::plane::{bilinear_taps, luminance, pixel_center_uv, Plane};
use crate::error::{UpscaleError, UpscaleResult};

/// Bilinear taps lighter than this do not receive a scattered depth
pub const RECONSTRUCTED_DEPTH_WEIGHT_THRESHOLD: f32 = 0.05;

/// Depth, motion and luma in one 8-byte texel (UltraPerformance)
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct PackedDilation {
    pub depth: f16,
    pub motion: [f16; 2],
    pub luma: f16,
}

impl PackedDilation {
    pub fn pack(depth: f32, motion: Vec2, luma: f32) -> Self {
        Self {
            depth: f16::from_f32(depth),
            motion: [f16::from_f32(motion.x), f16::from_f32(motion.y)],
            luma: f16::from_f32(luma),
        }
    }

    #[inline]
    pub fn motion(&self) -> Vec2 {
        Vec2::new(self.motion[0].to_f32(), self.motion[1].to_f32())
    }
}

/// Dilated depth/motion plus lock luma, at render resolution
#[derive(Debug, Clone, PartialEq)]
pub enum DilatedData {
    Separate {
        depth: Plane<f32>,
        motion: Plane<Vec2>,
        luma: Plane<f32>,
    },
    Packed(Plane<PackedDilation>),
}

impl DilatedData {
    pub fn extent(&self) -> glam::UVec2 {
        match self {
            DilatedData::Separate { depth, .. } => depth.extent(),
            DilatedData::Packed(p) => p.extent(),
        }
    }

    #[inline]
    pub fn depth(&self, x: i32, y: i32) -> f32 {
        match self {
            DilatedData::Separate { depth, .. } => depth.load_clamped(x, y),
            DilatedData::Packed(p) => p.load_clamped(x, y).depth.to_f32(),
        }
    }

    #[inline]
    pub fn motion(&self, x: i32, y: i32) -> Vec2 {
        match self {
            DilatedData::Separate { motion, .. } => motion.load_clamped(x, y),
            DilatedData::Packed(p) => p.load_clamped(x, y).motion(),
        }
    }

    #[inline]
    pub fn luma(&self, x: i32, y: i32) -> f32 {
        match self {
            DilatedData::Separate { luma, .. } => luma.load_clamped(x, y),
            DilatedData::Packed(p) => p.load_clamped(x, y).luma.to_f32(),
        }
    }

    /// Motion of the input pixel covering `uv`
    #[inline]
    pub fn motion_at(&self, uv: Vec2) -> Vec2 {
        let p = uv * self.extent().as_vec2();
        self.motion(p.x.floor() as i32, p.y.floor() as i32)
    }

    #[inline]
    pub fn luma_at(&self, uv: Vec2) -> f32 {
        let p = uv * self.extent().as_vec2();
        self.luma(p.x.floor() as i32, p.y.floor() as i32)
    }
}

#[derive(Debug, Clone)]
pub struct Reconstruction {
    pub dilated: DilatedData,
    /// Best-effort previous-frame depth, inverted convention, 0 where nothing landed
    pub previous_depth: Plane<f32>,
}

/// Offset of the nearest-depth sample in the 3x3 neighborhood of (x, y)
fn nearest_depth_offset(depth: &Plane<f32>, x: i32, y: i32) -> (IVec2, f32) {
    let mut best = IVec2::ZERO;
    let mut best_depth = depth.load_clamped(x, y);
    for dy in -1..=1 {
        for dx in -1..=1 {
            if dx == 0 && dy == 0 {
                continue;
            }
            let d = depth.load_clamped(x + dx, y + dy);
            if d > best_depth {
                best_depth = d;
                best = IVec2::new(dx, dy);
            }
        }
    }
    (best, best_depth)
}

fn try_atomic_plane(len: usize) -> UpscaleResult<Vec<AtomicU32>> {
    let mut buffer = Vec::new();
    buffer
        .try_reserve_exact(len)
        .map_err(|e| UpscaleError::allocation(format!("previous depth buffer: {}", e)))?;
    buffer.extend((0..len).map(|_| AtomicU32::new(0)));
    Ok(buffer)
}

/// Dilate depth/motion, compute lock luma and scatter the previous-frame depth.
///
/// `motion` is UV-space, current -> previous. `exposure` scales the lock luma so
/// lock decisions are independent of camera exposure.
pub fn reconstruct_and_dilate(
    color: &Plane<Vec3>,
    depth: &Plane<f32>,
    motion: &Plane<Vec2>,
    pre_exposure: f32,
    exposure: f32,
    packed: bool,
) -> UpscaleResult<Reconstruction> {
    let extent = depth.extent();
    let (w, h) = (extent.x, extent.y);
    let inv_pre = if pre_exposure > 0.0 { 1.0 / pre_exposure } else { 1.0 };

    let dilate = |x: u32, y: u32| -> (f32, Vec2, f32) {
        let (offset, nearest) = nearest_depth_offset(depth, x as i32, y as i32);
        let mv = motion.load_clamped(x as i32 + offset.x, y as i32 + offset.y);
        let luma = (luminance(color.get(x, y) * inv_pre) * exposure).max(0.0);
        (nearest.max(0.0), mv, luma)
    };

    let dilated = if packed {
        DilatedData::Packed(Plane::try_par_from_fn(w, h, PackedDilation::default(), |x, y| {
            let (d, mv, l) = dilate(x, y);
            PackedDilation::pack(d, mv, l)
        })?)
    } else {
        let mut dilated_depth = Plane::try_new(w, h, 0.0f32)?;
        let mut dilated_motion = Plane::try_new(w, h, Vec2::ZERO)?;
        let mut lock_luma = Plane::try_new(w, h, 0.0f32)?;
        dilated_depth
            .data_mut()
            .par_chunks_mut(w as usize)
            .zip(dilated_motion.data_mut().par_chunks_mut(w as usize))
            .zip(lock_luma.data_mut().par_chunks_mut(w as usize))
            .enumerate()
            .for_each(|(y, ((d_row, m_row), l_row))| {
                for x in 0..w as usize {
                    let (d, mv, l) = dilate(x as u32, y as u32);
                    d_row[x] = d;
                    m_row[x] = mv;
                    l_row[x] = l;
                }
            });
        DilatedData::Separate {
            depth: dilated_depth,
            motion: dilated_motion,
            luma: lock_luma,
        }
    };

    let scatter = try_atomic_plane(w as usize * h as usize)?;
    (0..h).into_par_iter().for_each(|y| {
        for x in 0..w {
            let d = dilated.depth(x as i32, y as i32);
            let prev_uv = pixel_center_uv(x, y, extent) + dilated.motion(x as i32, y as i32);
            // garbage engine motion lands nowhere
            if !prev_uv.is_finite() {
                continue;
            }
            let (taps, weights) = bilinear_taps(prev_uv, extent);
            for (tap, weight) in taps.iter().zip(weights.iter()) {
                if *weight <= RECONSTRUCTED_DEPTH_WEIGHT_THRESHOLD {
                    continue;
                }
                if tap.x < 0 || tap.y < 0 || tap.x >= w as i32 || tap.y >= h as i32 {
                    continue;
                }
                let index = tap.y as usize * w as usize + tap.x as usize;
                scatter[index].fetch_max(d.to_bits(), Ordering::Relaxed);
            }
        }
    });

    // the parallel scope above has joined: every scattered write is visible
    let previous_depth = Plane::from_vec(
        w,
        h,
        scatter
            .into_iter()
            .map(|a| f32::from_bits(a.into_inner()))
            .collect(),
    )?;

    Ok(Reconstruction {
        dilated,
        previous_depth,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dilation_prefers_nearest() {
        // a near 1-pixel object moving right over a static far background
        let depth = Plane::from_fn(5, 5, |x, y| if x == 2 && y == 2 { 0.9 } else { 0.1 });
        let motion = Plane::from_fn(5, 5, |x, y| {
            if x == 2 && y == 2 {
                Vec2::new(0.2, 0.0)
            } else {
                Vec2::ZERO
            }
        });
        let color = Plane::new(5, 5, Vec3::ONE);
        let r = reconstruct_and_dilate(&color, &depth, &motion, 1.0, 1.0, false).unwrap();
        assert_eq!(r.dilated.motion(1, 1), Vec2::new(0.2, 0.0));
        assert_eq!(r.dilated.depth(3, 2), 0.9);
        assert_eq!(r.dilated.motion(0, 0), Vec2::ZERO);
    }

    #[test]
    fn test_static_scatter_reproduces_depth() {
        let depth = Plane::from_fn(6, 4, |x, y| 0.1 + 0.05 * (x + y) as f32);
        let motion = Plane::new(6, 4, Vec2::ZERO);
        let color = Plane::new(6, 4, Vec3::splat(0.5));
        let r = reconstruct_and_dilate(&color, &depth, &motion, 1.0, 1.0, false).unwrap();
        // zero motion lands every pixel on itself; the 3x3 dilation makes it the local max
        for y in 0..4 {
            for x in 0..6 {
                assert_eq!(r.previous_depth.get(x, y), r.dilated.depth(x as i32, y as i32));
            }
        }
    }

    #[test]
    fn test_uncovered_texels_stay_far() {
        // everything moves one full frame width: nothing lands on screen
        let depth = Plane::new(4, 4, 0.5);
        let motion = Plane::new(4, 4, Vec2::new(1.5, 0.0));
        let color = Plane::new(4, 4, Vec3::ONE);
        let r = reconstruct_and_dilate(&color, &depth, &motion, 1.0, 1.0, false).unwrap();
        assert!(r.previous_depth.data().iter().all(|&d| d == 0.0));
    }

    #[test]
    fn test_packed_matches_separate() {
        let depth = Plane::from_fn(8, 8, |x, _| x as f32 / 8.0);
        let motion = Plane::new(8, 8, Vec2::new(0.125, -0.25));
        let color = Plane::from_fn(8, 8, |x, y| Vec3::splat((x * y) as f32 / 64.0));
        let a = reconstruct_and_dilate(&color, &depth, &motion, 2.0, 1.0, false).unwrap();
        let b = reconstruct_and_dilate(&color, &depth, &motion, 2.0, 1.0, true).unwrap();
        assert!(matches!(b.dilated, DilatedData::Packed(_)));
        for y in 0..8 {
            for x in 0..8 {
                assert!((a.dilated.depth(x, y) - b.dilated.depth(x, y)).abs() < 1e-3);
                assert!((a.dilated.motion(x, y) - b.dilated.motion(x, y)).length() < 1e-3);
                assert!((a.dilated.luma(x, y) - b.dilated.luma(x, y)).abs() < 1e-3);
            }
        }
        assert_eq!(std::mem::size_of::<PackedDilation>(), 8);
    }

    #[test]
    fn test_extreme_motion_scatters_nothing() {
        let depth = Plane::new(6, 6, 0.5);
        let color = Plane::new(6, 6, Vec3::ONE);
        for mv in [
            Vec2::new(f32::MAX, 0.0),
            Vec2::new(f32::INFINITY, f32::NEG_INFINITY),
            Vec2::new(-f32::MAX, f32::MAX),
            Vec2::splat(f32::NAN),
        ] {
            let motion = Plane::new(6, 6, mv);
            for packed in [false, true] {
                let r = reconstruct_and_dilate(&color, &depth, &motion, 1.0, 1.0, packed).unwrap();
                assert!(
                    r.previous_depth.data().iter().all(|&d| d == 0.0),
                    "motion {:?} (packed {}) landed on screen",
                    mv,
                    packed
                );
            }
        }
    }
}
