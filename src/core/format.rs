//! Storage formats for history planes
//!
//! Quality history color is RGBA16F; the cheaper presets store color as packed
//! R11G11B10 unsigned floats. Both share the 5-bit exponent of IEEE half, so
//! packing goes through `half::f16` and keeps the top mantissa bits with
//! round-to-nearest.

use glam::{Vec3, Vec4};
use half::f16;

const R11_MAX_FINITE: u32 = 0x7BF;
const B10_MAX_FINITE: u32 = 0x3DF;

/// RGBA16F texel
pub type Rgba16 = [f16; 4];

#[inline]
fn half_bits(v: f32) -> u32 {
    // no sign bit in the packed formats
    if !(v > 0.0) {
        return 0;
    }
    f16::from_f32(v).to_bits() as u32
}

#[inline]
fn to_float11(v: f32) -> u32 {
    let h = half_bits(v);
    ((h + 0x8) >> 4).min(R11_MAX_FINITE)
}

#[inline]
fn to_float10(v: f32) -> u32 {
    let h = half_bits(v);
    ((h + 0x10) >> 5).min(B10_MAX_FINITE)
}

#[inline]
fn from_float11(bits: u32) -> f32 {
    f16::from_bits(((bits & 0x7FF) << 4) as u16).to_f32()
}

#[inline]
fn from_float10(bits: u32) -> f32 {
    f16::from_bits(((bits & 0x3FF) << 5) as u16).to_f32()
}

/// Pack linear color into R11G11B10F. Negative and NaN channels store 0.
pub fn pack_r11g11b10(c: Vec3) -> u32 {
    to_float11(c.x) | (to_float11(c.y) << 11) | (to_float10(c.z) << 22)
}

pub fn unpack_r11g11b10(packed: u32) -> Vec3 {
    Vec3::new(
        from_float11(packed),
        from_float11(packed >> 11),
        from_float10(packed >> 22),
    )
}

pub fn pack_rgba16(c: Vec4) -> Rgba16 {
    [
        f16::from_f32(c.x),
        f16::from_f32(c.y),
        f16::from_f32(c.z),
        f16::from_f32(c.w),
    ]
}

pub fn unpack_rgba16(t: Rgba16) -> Vec4 {
    Vec4::new(t[0].to_f32(), t[1].to_f32(), t[2].to_f32(), t[3].to_f32())
}

/// Round a value through f16 storage
#[inline]
pub fn quantize_half(v: f32) -> f32 {
    f16::from_f32(v).to_f32()
}
