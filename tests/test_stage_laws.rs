// tests/test_stage_laws.rs
// Laws individual stages must keep regardless of content: RCAS identity and
// scale curve, jitter/downscale for the 720p -> 1080p case, exposure
// smoothing bounds, mask/lock ranges under hostile inputs and tunables, and
// garbage engine motion.

use glam::{UVec2, Vec2, Vec3};
use temporal_upscale::core::depth_clip::depth_clip;
use temporal_upscale::core::history::PreviousMotion;
use temporal_upscale::core::jitter::{downscale_factor, jitter_phase_count, JitterSequence};
use temporal_upscale::core::luminance::{auto_exposure_from_log_luma, build_pyramid};
use temporal_upscale::core::rcas::{apply_rcas, rcas_scale};
use temporal_upscale::core::reactive::{create_reactive_mask, UNLIT_SHADING_MODEL};
use temporal_upscale::core::reconstruct::reconstruct_and_dilate;
use temporal_upscale::{
    ComputePrecision, FrameInputs, MaterialCues, Plane, QualityPreset, ReactiveMaskTunables,
    ReductionPath, TemporalUpscaler, UpscalerCaps, UpscalerSettings,
};

/// Deterministic pseudo-random value in [0, 1)
fn hash(x: u32, y: u32, seed: u32) -> f32 {
    let mut h = x.wrapping_mul(374_761_393) ^ y.wrapping_mul(668_265_263) ^ seed.wrapping_mul(2_246_822_519);
    h = (h ^ (h >> 13)).wrapping_mul(1_274_126_177);
    (h ^ (h >> 16)) as f32 / u32::MAX as f32
}

#[test]
fn test_rcas_zero_sharpness_is_exact_identity() {
    let input = Plane::from_fn(33, 17, |x, y| {
        Vec3::new(hash(x, y, 1) * 40.0, hash(x, y, 2), hash(x, y, 3) * 1e-3)
    });
    for exposure in [0.25, 1.0, 8.0] {
        let out = apply_rcas(&input, 0.0, exposure, true).unwrap();
        assert_eq!(out, input, "sharpness 0 altered the image at exposure {}", exposure);
    }
}

#[test]
fn test_rcas_scale_contract() {
    assert_eq!(rcas_scale(1.0), 1.0);
    assert_eq!(rcas_scale(0.5), 0.5);
    for i in 0..10 {
        let s = i as f32 / 10.0;
        assert!(rcas_scale(s) < rcas_scale(s + 0.1), "scale must grow with sharpness");
    }
}

#[test]
fn test_rcas_never_leaves_local_range_on_noise() {
    let input = Plane::from_fn(24, 24, |x, y| Vec3::splat(hash(x, y, 7)));
    let out = apply_rcas(&input, 1.0, 1.0, true).unwrap();
    for v in out.data() {
        assert!(v.is_finite() && v.min_element() >= 0.0, "sharpened value {:?}", v);
    }
}

#[test]
fn test_720p_to_1080p_scenario() {
    let render = UVec2::new(1280, 720);
    let display = UVec2::new(1920, 1080);
    let factor = downscale_factor(render, display);
    assert!((factor.x - 0.667).abs() < 1e-3 && (factor.y - 0.667).abs() < 1e-3);
    assert_eq!(jitter_phase_count(render.x, display.x), 18);

    let mut upscaler = TemporalUpscaler::new(UpscalerSettings::default(), UpscalerCaps::baseline());
    let (_, phases) = upscaler.next_jitter(render, display);
    assert_eq!(phases, 18);

    let mut sequence = JitterSequence::new(render, display);
    let mut seen: Vec<Vec2> = Vec::new();
    for _ in 0..18 {
        assert!(sequence.offset.abs().max_element() <= 0.5);
        assert!(
            seen.iter().all(|j| (*j - sequence.offset).length() > 1e-4),
            "jitter phase repeated early at index {}",
            sequence.index
        );
        seen.push(sequence.offset);
        sequence.advance();
    }
    assert_eq!(sequence.index, 0);
    assert_eq!(sequence.offset, seen[0]);
}

#[test]
fn test_auto_exposure_moves_strictly_between() {
    let render = UVec2::new(16, 16);
    let display = UVec2::new(24, 24);
    let dark = Plane::new(render.x, render.y, Vec3::splat(0.02));
    let bright = Plane::new(render.x, render.y, Vec3::splat(3.0));
    let depth = Plane::new(render.x, render.y, 0.5);
    let velocity = Plane::new(render.x, render.y, Vec2::ZERO);

    let expected_dark =
        auto_exposure_from_log_luma(build_pyramid(&dark, 1.0, ReductionPath::LevelByLevel).average_log_luma());
    let expected_bright =
        auto_exposure_from_log_luma(build_pyramid(&bright, 1.0, ReductionPath::LevelByLevel).average_log_luma());

    let mut upscaler = TemporalUpscaler::new(
        UpscalerSettings::default().with_auto_exposure(true),
        UpscalerCaps::baseline(),
    );
    let first = upscaler
        .upscale(&FrameInputs::new(&dark, &depth, &velocity, display))
        .unwrap();
    assert!((first.exposure - expected_dark).abs() <= 1e-4 * expected_dark);

    let mut inputs = FrameInputs::new(&bright, &depth, &velocity, display);
    inputs.delta_time = 0.1;
    let second = upscaler.upscale(&inputs).unwrap();
    println!(
        "exposure dark {} -> smoothed {} (target {})",
        expected_dark, second.exposure, expected_bright
    );
    assert!(
        second.exposure < expected_dark && second.exposure > expected_bright,
        "smoothed exposure {} not strictly between {} and {}",
        second.exposure,
        expected_bright,
        expected_dark
    );

    // a reset takes the new scene value directly
    let mut inputs = FrameInputs::new(&bright, &depth, &velocity, display).with_reset(true);
    inputs.delta_time = 0.1;
    let reset = upscaler.upscale(&inputs).unwrap();
    assert!((reset.exposure - expected_bright).abs() <= 1e-4 * expected_bright);
}

#[test]
fn test_engine_exposure_copied_when_auto_is_off() {
    let plane = Plane::new(8, 8, Vec3::splat(0.5));
    let depth = Plane::new(8, 8, 0.5);
    let velocity = Plane::new(8, 8, Vec2::ZERO);
    let mut upscaler = TemporalUpscaler::new(UpscalerSettings::default(), UpscalerCaps::baseline());
    let mut inputs = FrameInputs::new(&plane, &depth, &velocity, UVec2::new(8, 8));
    inputs.engine_exposure = Some(0.75);
    assert_eq!(upscaler.upscale(&inputs).unwrap().exposure, 0.75);
}

#[test]
fn test_masks_stay_in_range_with_hostile_motion() {
    let (w, h) = (20, 14);
    let color = Plane::from_fn(w, h, |x, y| Vec3::splat(hash(x, y, 11) * 1e4));
    let depth = Plane::from_fn(w, h, |x, y| hash(x, y, 12));
    let motion = Plane::from_fn(w, h, |x, y| {
        Vec2::new(hash(x, y, 13) * 4.0 - 2.0, hash(x, y, 14) * 4.0 - 2.0)
    });
    let previous = Plane::from_fn(w, h, |x, y| Vec2::new(hash(x, y, 15) - 0.5, 0.0));
    let reactive = Plane::from_fn(w, h, |x, y| Vec2::new(hash(x, y, 16) * 3.0 - 1.0, f32::NAN));

    let rec = reconstruct_and_dilate(&color, &depth, &motion, 1.0, 1.0, false).unwrap();
    let out = depth_clip(
        &color,
        &rec,
        &reactive,
        PreviousMotion::Separate(&previous),
        1.0,
        0.05,
        ComputePrecision::Half,
    )
    .unwrap();
    for m in out.masks.data() {
        for v in [m.reactive, m.composite, m.divergence, m.disocclusion] {
            assert!((0.0..=1.0).contains(&v), "mask value {} out of range in {:?}", v, m);
        }
    }
}

#[test]
fn test_locks_stay_in_range_across_presets() {
    let render = UVec2::new(12, 10);
    let display = UVec2::new(18, 15);
    for preset in QualityPreset::ALL {
        let mut upscaler = TemporalUpscaler::new(
            UpscalerSettings::default().with_quality(preset).with_sharpness(0.6),
            UpscalerCaps::baseline().with_half_float(true).with_wave_ops(true),
        );
        for frame in 0..12u32 {
            let color = Plane::from_fn(render.x, render.y, |x, y| {
                Vec3::new(hash(x, y, frame) * 50.0, hash(x, y, frame + 100), 0.0)
            });
            let depth = Plane::from_fn(render.x, render.y, |x, y| hash(x, y, frame + 200));
            let velocity = Plane::from_fn(render.x, render.y, |x, y| {
                Vec2::new(hash(x, y, frame + 300) - 0.5, hash(x, y, frame + 400) - 0.5)
            });
            let (jitter, _) = upscaler.next_jitter(render, display);
            let out = upscaler
                .upscale(&FrameInputs::new(&color, &depth, &velocity, display).with_jitter(jitter))
                .unwrap();
            assert!(
                out.color.data().iter().all(|c| c.is_finite()),
                "{:?} frame {}: non-finite output",
                preset,
                frame
            );
            let history = upscaler.history().unwrap();
            for lock in history.lock.data() {
                assert!(
                    (0.0..=1.0).contains(&lock.confidence) && lock.luma.is_finite() && lock.luma >= 0.0,
                    "{:?} frame {}: lock {:?}",
                    preset,
                    frame,
                    lock
                );
            }
        }
    }
}

/// Shading model the sweep treats as explicitly reactive
const REACTIVE_MODEL: u8 = 7;

/// Material cues full of values an engine should not send, but might
fn hostile_cues(w: u32, h: u32, color: &Plane<Vec3>) -> MaterialCues {
    fn pick(values: &[f32], i: u32) -> f32 {
        values[i as usize % values.len()]
    }
    MaterialCues {
        roughness: Plane::from_fn(w, h, |x, y| {
            pick(&[f32::NAN, -1.0, 0.0, 0.3, 2.0, f32::INFINITY], x + y * w)
        }),
        shading_model: Plane::from_fn(w, h, |x, y| {
            [UNLIT_SHADING_MODEL, 1, REACTIVE_MODEL, 255][((x * 3 + y) % 4) as usize]
        }),
        custom_reactive: Plane::from_fn(w, h, |x, y| pick(&[-1.0, 5.0, f32::NAN, 0.5], x + y * w)),
        view_distance: Plane::from_fn(w, h, |x, y| {
            pick(&[-10.0, f32::NAN, f32::INFINITY, 0.0, 100.0, 1e9, -f32::MAX], y + x * h)
        }),
        reflection: Some(Plane::from_fn(w, h, |x, y| {
            Vec3::splat(pick(&[f32::NAN, f32::INFINITY, -5.0, 1e30, 0.2], x + y * w))
        })),
        // brighter than the composited color, or not a number at all
        color_before_translucency: Some(Plane::from_fn(w, h, |x, y| {
            let c = color.get(x, y);
            match (x + 2 * y) % 4 {
                0 => c * 10.0 + Vec3::ONE,
                1 => Vec3::splat(f32::INFINITY),
                2 => Vec3::splat(f32::NAN),
                _ => -c,
            }
        })),
        furthest_reflection_capture_distance: f32::NAN,
    }
}

fn assert_mask_in_range(mask: &Plane<Vec2>, what: &str) {
    for (i, m) in mask.data().iter().enumerate() {
        assert!(
            (0.0..=1.0).contains(&m.x) && (0.0..=1.0).contains(&m.y),
            "{}: texel {} = {:?}",
            what,
            i,
            m
        );
    }
}

fn set_scales(t: &mut ReactiveMaskTunables, v: [f32; 9]) {
    t.reflection_scale = v[0];
    t.roughness_scale = v[1];
    t.roughness_bias = v[2];
    t.reflection_luma_bias = v[3];
    t.reactive_history_translucency_bias = v[4];
    t.reactive_history_translucency_luma_bias = v[5];
    t.translucency_bias = v[6];
    t.translucency_luma_bias = v[7];
    t.force_reactive_material_value = v[8];
}

#[test]
fn test_reactive_masks_stay_in_range_across_tunables() {
    let (w, h) = (7, 5);
    let color = Plane::from_fn(w, h, |x, y| match (x + y) % 3 {
        0 => Vec3::ZERO,
        1 => Vec3::splat(1e6),
        _ => Vec3::new(hash(x, y, 21), hash(x, y, 22), hash(x, y, 23)),
    });
    let cues = hostile_cues(w, h, &color);

    // every scale/bias at 0, 0.5 and 1
    let levels = [0.0f32, 0.5, 1.0];
    let mut combos = 0;
    for index in 0..levels.len().pow(9) {
        let mut values = [0.0f32; 9];
        let mut rest = index;
        for v in values.iter_mut() {
            *v = levels[rest % levels.len()];
            rest /= levels.len();
        }
        let mut tunables = ReactiveMaskTunables {
            reactive_shading_model: Some(REACTIVE_MODEL),
            roughness_force_max_distance: index % 2 == 0,
            ..Default::default()
        };
        set_scales(&mut tunables, values);
        let mask = create_reactive_mask(&color, &cues, &tunables).unwrap();
        assert_mask_in_range(&mask, &format!("tunables {:?}", values));
        combos += 1;
    }
    assert_eq!(combos, 19_683);

    // out-of-range values are pulled back by sanitizing, and masks clamp either way
    for v in [-5.0, 7.0, f32::NAN, f32::INFINITY, f32::NEG_INFINITY] {
        let mut raw = ReactiveMaskTunables {
            reactive_shading_model: Some(REACTIVE_MODEL),
            roughness_max_distance: v,
            translucency_max_distance: v,
            ..Default::default()
        };
        set_scales(&mut raw, [v; 9]);
        let clean = raw.sanitized();
        for field in [
            clean.reflection_scale,
            clean.roughness_scale,
            clean.roughness_bias,
            clean.reflection_luma_bias,
            clean.reactive_history_translucency_bias,
            clean.reactive_history_translucency_luma_bias,
            clean.translucency_bias,
            clean.translucency_luma_bias,
            clean.force_reactive_material_value,
        ] {
            assert!((0.0..=1.0).contains(&field), "sanitized {} to {}", v, field);
        }
        assert!(clean.roughness_max_distance >= 0.0 && clean.translucency_max_distance >= 0.0);

        assert_mask_in_range(&create_reactive_mask(&color, &cues, &clean).unwrap(), &format!("sanitized {}", v));
        assert_mask_in_range(&create_reactive_mask(&color, &cues, &raw).unwrap(), &format!("raw {}", v));
    }
}

#[test]
fn test_garbage_motion_and_jitter_never_panic() {
    let render = UVec2::new(8, 8);
    let display = UVec2::new(12, 12);
    let color = Plane::from_fn(render.x, render.y, |x, y| Vec3::new(hash(x, y, 31), 0.4, 0.2));
    let depth = Plane::new(render.x, render.y, 0.5);
    let garbage = [
        Vec2::new(f32::MAX, 0.0),
        Vec2::new(-f32::MAX, f32::MAX),
        Vec2::new(f32::INFINITY, 0.0),
        Vec2::new(0.0, f32::NEG_INFINITY),
        Vec2::splat(f32::NAN),
    ];

    for preset in QualityPreset::ALL {
        for motion in garbage {
            let mut upscaler = TemporalUpscaler::new(
                UpscalerSettings::default().with_quality(preset).with_sharpness(0.5),
                UpscalerCaps::baseline(),
            );
            // some pixels carry garbage, the rest are static
            let velocity = Plane::from_fn(render.x, render.y, |x, y| {
                if (x + y) % 2 == 0 {
                    motion
                } else {
                    Vec2::ZERO
                }
            });
            for frame in 0..3 {
                let inputs = FrameInputs::new(&color, &depth, &velocity, display);
                let out = upscaler.upscale(&inputs).unwrap_or_else(|e| {
                    panic!("{:?} motion {:?} frame {}: {}", preset, motion, frame, e)
                });
                assert!(
                    out.color.data().iter().all(|c| c.is_finite()),
                    "{:?} motion {:?} frame {}: non-finite output",
                    preset,
                    motion,
                    frame
                );
            }
        }

        // absurd projection jitter falls back to edge samples
        let mut upscaler = TemporalUpscaler::new(
            UpscalerSettings::default().with_quality(preset),
            UpscalerCaps::baseline(),
        );
        let still = Plane::new(render.x, render.y, Vec2::ZERO);
        for jitter in [Vec2::splat(f32::MAX), Vec2::new(-1e30, 1e30), Vec2::splat(f32::NAN)] {
            let inputs = FrameInputs::new(&color, &depth, &still, display).with_jitter(jitter);
            let out = upscaler.upscale(&inputs).unwrap();
            assert!(out.color.data().iter().all(|c| c.is_finite()), "{:?} jitter {:?}", preset, jitter);
        }
    }
}
