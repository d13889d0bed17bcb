//! Reactive-mask generation from material cues
//!
//! Produces two per-input-pixel weights in [0, 1]:
//! - reactive: how strongly this frame's sample should replace history
//!   (glossy reflections, translucency, explicitly reactive materials)
//! - composite: how much accumulated history should be discounted for
//!   translucent surfaces composited over the opaque scene
//!
//! Without a reflection input the stage degrades to roughness and
//! translucency heuristics only.

use glam::{Vec2, Vec3};

use super::plane::{luminance, saturate, Plane};
use crate::error::UpscaleResult;
use crate::settings::ReactiveMaskTunables;

/// Shading-model id of unlit materials; they never receive reflection reactivity
pub const UNLIT_SHADING_MODEL: u8 = 0;

/// Material metadata for one frame, at render resolution
#[derive(Debug, Clone)]
pub struct MaterialCues {
    pub roughness: Plane<f32>,
    pub shading_model: Plane<u8>,
    /// Material-authored reactive value for reactive shading models
    pub custom_reactive: Plane<f32>,
    /// Distance from the camera to the opaque surface, world units
    pub view_distance: Plane<f32>,
    /// Reflection contribution (screen-space or captured)
    pub reflection: Option<Plane<Vec3>>,
    /// Scene color before translucency was composited
    pub color_before_translucency: Option<Plane<Vec3>>,
    /// Distance of the furthest reflection capture in the scene
    pub furthest_reflection_capture_distance: f32,
}

impl MaterialCues {
    /// Opaque, non-reflective scene: every term evaluates to zero
    pub fn opaque(width: u32, height: u32) -> Self {
        Self {
            roughness: Plane::new(width, height, 1.0),
            shading_model: Plane::new(width, height, UNLIT_SHADING_MODEL),
            custom_reactive: Plane::new(width, height, 0.0),
            view_distance: Plane::new(width, height, 0.0),
            reflection: None,
            color_before_translucency: None,
            furthest_reflection_capture_distance: 0.0,
        }
    }

    pub fn extent_matches(&self, width: u32, height: u32) -> bool {
        let ok = |w: u32, h: u32| w == width && h == height;
        ok(self.roughness.width(), self.roughness.height())
            && ok(self.shading_model.width(), self.shading_model.height())
            && ok(self.custom_reactive.width(), self.custom_reactive.height())
            && ok(self.view_distance.width(), self.view_distance.height())
            && self.reflection.as_ref().map_or(true, |p| ok(p.width(), p.height()))
            && self
                .color_before_translucency
                .as_ref()
                .map_or(true, |p| ok(p.width(), p.height()))
    }
}

/// Distance inside which roughness contributes to the mask
pub fn roughness_max_distance(tunables: &ReactiveMaskTunables, furthest_capture: f32) -> f32 {
    if tunables.roughness_force_max_distance {
        tunables.roughness_max_distance
    } else {
        tunables.roughness_max_distance.max(furthest_capture)
    }
}

/// Per-pixel (reactive, composite) for one set of cues
#[allow(clippy::too_many_arguments)]
pub fn reactive_texel(
    color: Vec3,
    roughness: f32,
    shading_model: u8,
    custom_reactive: f32,
    view_distance: f32,
    reflection: Option<Vec3>,
    before_translucency: Option<Vec3>,
    max_roughness_distance: f32,
    t: &ReactiveMaskTunables,
) -> Vec2 {
    let scene_luma = luminance(color).max(0.0);

    if t.reactive_shading_model == Some(shading_model) {
        let value = if t.force_reactive_material_value > 0.0 {
            t.force_reactive_material_value
        } else {
            custom_reactive
        };
        return Vec2::new(saturate(value), 0.0);
    }

    let mut reactive = 0.0f32;
    if shading_model != UNLIT_SHADING_MODEL && view_distance < max_roughness_distance {
        let gloss = saturate((1.0 - saturate(roughness)) * t.roughness_scale + t.roughness_bias);
        let reflected = match reflection {
            Some(r) => saturate(
                luminance(r).max(0.0) * t.reflection_scale + t.reflection_luma_bias * scene_luma,
            ),
            None => t.reflection_scale,
        };
        reactive = saturate(gloss * reflected);
    }

    let mut composite = 0.0f32;
    if let Some(before) = before_translucency {
        let delta = luminance((color - before).abs());
        let coverage = saturate(delta / scene_luma.max(delta).max(1e-4));
        if view_distance < t.translucency_max_distance {
            let translucent =
                saturate(coverage * (t.translucency_bias + t.translucency_luma_bias * scene_luma));
            reactive = reactive.max(translucent);
        }
        composite = saturate(
            coverage
                * (t.reactive_history_translucency_bias
                    + t.reactive_history_translucency_luma_bias * scene_luma),
        );
    }

    Vec2::new(saturate(reactive), composite)
}

/// Build the (reactive, composite) mask for a frame.
pub fn create_reactive_mask(
    color: &Plane<Vec3>,
    cues: &MaterialCues,
    tunables: &ReactiveMaskTunables,
) -> UpscaleResult<Plane<Vec2>> {
    let max_dist = roughness_max_distance(tunables, cues.furthest_reflection_capture_distance);
    Plane::try_par_from_fn(color.width(), color.height(), Vec2::ZERO, |x, y| {
        reactive_texel(
            color.get(x, y),
            cues.roughness.get(x, y),
            cues.shading_model.get(x, y),
            cues.custom_reactive.get(x, y),
            cues.view_distance.get(x, y),
            cues.reflection.as_ref().map(|p| p.get(x, y)),
            cues.color_before_translucency.as_ref().map(|p| p.get(x, y)),
            max_dist,
            tunables,
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIT: u8 = 1;

    #[test]
    fn test_opaque_scene_is_zero() {
        let color = Plane::new(4, 4, Vec3::splat(0.3));
        let mask =
            create_reactive_mask(&color, &MaterialCues::opaque(4, 4), &Default::default()).unwrap();
        assert!(mask.data().iter().all(|m| *m == Vec2::ZERO));
    }

    #[test]
    fn test_glossy_reflection_is_reactive() {
        let t = ReactiveMaskTunables::default();
        let m = reactive_texel(Vec3::ONE, 0.0, LIT, 0.0, 10.0, Some(Vec3::splat(5.0)), None, 6000.0, &t);
        // gloss = 0.15 + 0.25, reflection saturates
        assert!((m.x - 0.4).abs() < 1e-6, "reactive {}", m.x);
        assert_eq!(m.y, 0.0);

        let far = reactive_texel(Vec3::ONE, 0.0, LIT, 0.0, 7000.0, Some(Vec3::ONE), None, 6000.0, &t);
        assert_eq!(far.x, 0.0);
    }

    #[test]
    fn test_roughness_distance_forcing() {
        let mut t = ReactiveMaskTunables::default();
        assert_eq!(roughness_max_distance(&t, 9000.0), 9000.0);
        t.roughness_force_max_distance = true;
        assert_eq!(roughness_max_distance(&t, 9000.0), 6000.0);
    }

    #[test]
    fn test_reactive_shading_model_override() {
        let mut t = ReactiveMaskTunables::default();
        t.reactive_shading_model = Some(7);
        let m = reactive_texel(Vec3::ONE, 0.5, 7, 0.3, 1.0, None, None, 6000.0, &t);
        assert!((m.x - 0.3).abs() < 1e-6);
        t.force_reactive_material_value = 0.9;
        let m = reactive_texel(Vec3::ONE, 0.5, 7, 0.3, 1.0, None, None, 6000.0, &t);
        assert!((m.x - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_translucency_feeds_both_masks() {
        let t = ReactiveMaskTunables::default();
        let m = reactive_texel(
            Vec3::splat(1.0),
            1.0,
            UNLIT_SHADING_MODEL,
            0.0,
            100.0,
            None,
            Some(Vec3::splat(0.5)),
            6000.0,
            &t,
        );
        assert!((m.x - 0.5).abs() < 1e-5, "reactive {}", m.x);
        assert!((m.y - 0.25).abs() < 1e-5, "composite {}", m.y);
    }
}
