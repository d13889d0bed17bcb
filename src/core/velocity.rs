//! Velocity normalization
//!
//! Converts engine motion vectors (NDC units, current -> previous, +Y up) into
//! UV-space displacement (+Y down). Texels the engine left at exactly zero are
//! treated as "not written" and receive camera-only motion reconstructed from
//! depth when a clip-to-previous-clip matrix is available.

use glam::{Mat4, Vec2, Vec4};

use super::plane::{pixel_center_uv, Plane};
use crate::error::UpscaleResult;

/// Camera data used for static-geometry reprojection
#[derive(Debug, Clone, Copy)]
pub struct CameraReprojection {
    /// Maps current clip space (x, y, device depth, 1) to previous clip space
    pub clip_to_prev_clip: Mat4,
}

#[inline]
fn uv_to_ndc(uv: Vec2) -> Vec2 {
    Vec2::new(uv.x * 2.0 - 1.0, 1.0 - uv.y * 2.0)
}

#[inline]
fn ndc_motion_to_uv(m: Vec2) -> Vec2 {
    Vec2::new(m.x * 0.5, -m.y * 0.5)
}

/// NDC displacement of a static point at `uv` with device depth `depth`
pub fn camera_motion_ndc(uv: Vec2, depth: f32, camera: &CameraReprojection) -> Vec2 {
    let ndc = uv_to_ndc(uv);
    let prev = camera.clip_to_prev_clip * Vec4::new(ndc.x, ndc.y, depth, 1.0);
    if prev.w.abs() < 1e-6 {
        return Vec2::ZERO;
    }
    Vec2::new(prev.x, prev.y) / prev.w - ndc
}

/// Normalize engine velocity into UV-space motion.
///
/// `motion_scale` rescales the result for dynamic resolution.
pub fn normalize_velocity(
    velocity: &Plane<Vec2>,
    depth: &Plane<f32>,
    camera: Option<&CameraReprojection>,
    motion_scale: Vec2,
) -> UpscaleResult<Plane<Vec2>> {
    let extent = velocity.extent();
    Plane::try_par_from_fn(extent.x, extent.y, Vec2::ZERO, |x, y| {
        let engine = velocity.get(x, y);
        let ndc_motion = match camera {
            Some(camera) if engine == Vec2::ZERO => {
                camera_motion_ndc(pixel_center_uv(x, y, extent), depth.get(x, y), camera)
            }
            _ => engine,
        };
        ndc_motion_to_uv(ndc_motion) * motion_scale
    })
}
