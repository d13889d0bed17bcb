//! Owned 2D texel planes
//!
//! Every per-frame buffer in the pipeline is a `Plane<T>`: a row-major image
//! with clamped loads and bilinear sampling in UV space. Allocation is fallible
//! so that an out-of-memory frame can be abandoned without touching history.

use std::ops::{Add, Mul};

use bytemuck::Pod;
use glam::{UVec2, Vec2, Vec3, Vec4};
use rayon::prelude::*;

use crate::error::{UpscaleError, UpscaleResult};

/// Texel types that can be bilinearly filtered
pub trait Texel: Copy + Default + Send + Sync + Add<Output = Self> + Mul<f32, Output = Self> {}

impl Texel for f32 {}
impl Texel for Vec2 {}
impl Texel for Vec3 {}
impl Texel for Vec4 {}

#[derive(Debug, Clone, PartialEq)]
pub struct Plane<T> {
    width: u32,
    height: u32,
    data: Vec<T>,
}

impl<T: Copy> Plane<T> {
    /// Create a plane filled with `fill`
    pub fn new(width: u32, height: u32, fill: T) -> Self {
        Self {
            width,
            height,
            data: vec![fill; width as usize * height as usize],
        }
    }

    /// Create a plane, reporting allocation failure instead of aborting
    pub fn try_new(width: u32, height: u32, fill: T) -> UpscaleResult<Self> {
        let len = (width as usize)
            .checked_mul(height as usize)
            .ok_or_else(|| UpscaleError::allocation(format!("plane {}x{} overflows", width, height)))?;
        let mut data = Vec::new();
        data.try_reserve_exact(len).map_err(|e| {
            UpscaleError::allocation(format!("plane {}x{}: {}", width, height, e))
        })?;
        data.resize(len, fill);
        Ok(Self { width, height, data })
    }

    pub fn from_vec(width: u32, height: u32, data: Vec<T>) -> UpscaleResult<Self> {
        if data.len() != width as usize * height as usize {
            return Err(UpscaleError::input(format!(
                "plane {}x{} expects {} texels, got {}",
                width,
                height,
                width as usize * height as usize,
                data.len()
            )));
        }
        Ok(Self { width, height, data })
    }

    /// Build a plane by evaluating `f(x, y)` for every texel
    pub fn from_fn(width: u32, height: u32, mut f: impl FnMut(u32, u32) -> T) -> Self {
        let mut data = Vec::with_capacity(width as usize * height as usize);
        for y in 0..height {
            for x in 0..width {
                data.push(f(x, y));
            }
        }
        Self { width, height, data }
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[inline]
    pub fn extent(&self) -> UVec2 {
        UVec2::new(self.width, self.height)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn data(&self) -> &[T] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [T] {
        &mut self.data
    }

    #[inline]
    pub fn get(&self, x: u32, y: u32) -> T {
        self.data[y as usize * self.width as usize + x as usize]
    }

    #[inline]
    pub fn set(&mut self, x: u32, y: u32, value: T) {
        let w = self.width as usize;
        self.data[y as usize * w + x as usize] = value;
    }

    /// Load with coordinates clamped to the plane edge
    #[inline]
    pub fn load_clamped(&self, x: i32, y: i32) -> T {
        let cx = x.clamp(0, self.width as i32 - 1) as u32;
        let cy = y.clamp(0, self.height as i32 - 1) as u32;
        self.get(cx, cy)
    }

    /// Nearest texel for a UV coordinate, clamped
    #[inline]
    pub fn sample_nearest(&self, uv: Vec2) -> T {
        let p = uv * self.extent().as_vec2();
        self.load_clamped(p.x.floor() as i32, p.y.floor() as i32)
    }
}

impl<T: Pod> Plane<T> {
    /// Texel storage as raw bytes
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.data)
    }
}

impl<T: Copy + Send + Sync> Plane<T> {
    /// Evaluate `f(x, y)` for every texel in parallel, one row per task
    pub fn par_fill(&mut self, f: impl Fn(u32, u32) -> T + Sync) {
        let width = self.width as usize;
        if width == 0 {
            return;
        }
        self.data
            .par_chunks_mut(width)
            .enumerate()
            .for_each(|(y, row)| {
                for (x, texel) in row.iter_mut().enumerate() {
                    *texel = f(x as u32, y as u32);
                }
            });
    }

    /// Fallible allocation followed by a parallel fill
    pub fn try_par_from_fn(
        width: u32,
        height: u32,
        fill: T,
        f: impl Fn(u32, u32) -> T + Sync,
    ) -> UpscaleResult<Self> {
        let mut plane = Self::try_new(width, height, fill)?;
        plane.par_fill(f);
        Ok(plane)
    }

    pub fn par_from_fn(width: u32, height: u32, fill: T, f: impl Fn(u32, u32) -> T + Sync) -> Self {
        let mut plane = Self::new(width, height, fill);
        plane.par_fill(f);
        plane
    }
}

impl<T: Texel> Plane<T> {
    /// Bilinear sample at UV with clamp-to-edge addressing
    pub fn sample_bilinear(&self, uv: Vec2) -> T {
        let (taps, weights) = bilinear_taps(uv, self.extent());
        let mut acc = T::default();
        for (tap, w) in taps.iter().zip(weights.iter()) {
            acc = acc + self.load_clamped(tap.x, tap.y) * *w;
        }
        acc
    }
}

/// Texel margin kept around the plane when clamping far-off coordinates
const TEXEL_MARGIN: f32 = 4.0;

/// Clamp a texel-space position to a few texels around the plane.
///
/// Everything past the margin addresses the same clamped edge texels, and the
/// clamp keeps neighbor offsets from overflowing `i32`. NaN maps to the low edge.
#[inline]
pub fn clamp_texel_position(p: Vec2, extent: UVec2) -> Vec2 {
    p.clamp(
        Vec2::splat(-TEXEL_MARGIN),
        extent.as_vec2() + Vec2::splat(TEXEL_MARGIN),
    )
}

/// Integer texel containing `p`, safe to offset by a few texels
#[inline]
pub fn texel_floor(p: Vec2, extent: UVec2) -> glam::IVec2 {
    clamp_texel_position(p, extent).floor().as_ivec2()
}

/// The four texels and weights of a bilinear footprint at `uv`
pub fn bilinear_taps(uv: Vec2, extent: UVec2) -> ([glam::IVec2; 4], [f32; 4]) {
    let p = clamp_texel_position(uv * extent.as_vec2() - Vec2::splat(0.5), extent);
    let base = p.floor();
    let f = p - base;
    let b = base.as_ivec2();
    (
        [
            b,
            b + glam::IVec2::new(1, 0),
            b + glam::IVec2::new(0, 1),
            b + glam::IVec2::new(1, 1),
        ],
        [
            (1.0 - f.x) * (1.0 - f.y),
            f.x * (1.0 - f.y),
            (1.0 - f.x) * f.y,
            f.x * f.y,
        ],
    )
}

/// UV of the center of pixel (x, y) in a plane of `extent`
#[inline]
pub fn pixel_center_uv(x: u32, y: u32, extent: UVec2) -> Vec2 {
    (Vec2::new(x as f32, y as f32) + Vec2::splat(0.5)) / extent.as_vec2()
}

#[inline]
pub fn uv_on_screen(uv: Vec2) -> bool {
    uv.x >= 0.0 && uv.x <= 1.0 && uv.y >= 0.0 && uv.y <= 1.0
}

/// Rec.709 luminance
#[inline]
pub fn luminance(c: Vec3) -> f32 {
    c.dot(Vec3::new(0.2126, 0.7152, 0.0722))
}

/// Clamp to [0, 1], mapping NaN to 0
#[inline]
pub fn saturate(v: f32) -> f32 {
    if v.is_nan() {
        0.0
    } else {
        v.clamp(0.0, 1.0)
    }
}
