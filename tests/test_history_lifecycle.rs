// tests/test_history_lifecycle.rs
// History ownership across frames: preset changes, resizes, refused frames
// and enable/disable.

use glam::{UVec2, Vec2, Vec3};
use temporal_upscale::{
    FrameInputs, Plane, QualityPreset, TemporalUpscaler, UpscaleError, UpscalerCaps,
    UpscalerSettings,
};

fn planes(render: UVec2) -> (Plane<Vec3>, Plane<f32>, Plane<Vec2>) {
    (
        Plane::from_fn(render.x, render.y, |x, y| {
            Vec3::new(0.1 + 0.02 * x as f32, 0.3, 0.1 + 0.03 * y as f32)
        }),
        Plane::new(render.x, render.y, 0.25),
        Plane::new(render.x, render.y, Vec2::ZERO),
    )
}

fn run(upscaler: &mut TemporalUpscaler, render: UVec2, display: UVec2) -> Result<bool, UpscaleError> {
    let (color, depth, velocity) = planes(render);
    let (jitter, _) = upscaler.next_jitter(render, display);
    let inputs = FrameInputs::new(&color, &depth, &velocity, display).with_jitter(jitter);
    upscaler.upscale(&inputs).map(|out| out.history_reset)
}

#[test]
fn test_preset_change_invalidates_history() {
    let render = UVec2::new(8, 8);
    let display = UVec2::new(12, 12);
    let mut upscaler = TemporalUpscaler::new(UpscalerSettings::default(), UpscalerCaps::baseline());

    assert!(run(&mut upscaler, render, display).unwrap());
    assert!(!run(&mut upscaler, render, display).unwrap());
    assert_eq!(upscaler.frame_index(), 2);

    upscaler.set_settings(UpscalerSettings::default().with_quality(QualityPreset::Performance));
    assert!(run(&mut upscaler, render, display).unwrap(), "preset change must cold start");
    assert_eq!(upscaler.history().unwrap().preset(), QualityPreset::Performance);
    assert_eq!(upscaler.history_metrics().invalidations, 1);
    assert_eq!(upscaler.frame_index(), 1);

    // sharpness alone keeps the history
    upscaler.set_settings(
        UpscalerSettings::default()
            .with_quality(QualityPreset::Performance)
            .with_sharpness(0.8),
    );
    assert!(!run(&mut upscaler, render, display).unwrap());
}

#[test]
fn test_resize_invalidates_history() {
    let mut upscaler = TemporalUpscaler::new(UpscalerSettings::default(), UpscalerCaps::baseline());
    assert!(run(&mut upscaler, UVec2::new(8, 8), UVec2::new(16, 16)).unwrap());
    assert!(!run(&mut upscaler, UVec2::new(8, 8), UVec2::new(16, 16)).unwrap());

    // dynamic resolution: render extent changes under the same display
    assert!(run(&mut upscaler, UVec2::new(10, 10), UVec2::new(16, 16)).unwrap());
    // display resize
    assert!(run(&mut upscaler, UVec2::new(10, 10), UVec2::new(20, 20)).unwrap());
    assert_eq!(upscaler.history().unwrap().display_extent, UVec2::new(20, 20));
    assert_eq!(upscaler.history_metrics().invalidations, 2);
}

#[test]
fn test_refused_frame_leaves_state_untouched() {
    let caps = UpscalerCaps::baseline().with_max_texture_dimension(32);
    let mut upscaler = TemporalUpscaler::new(UpscalerSettings::default(), caps);
    let render = UVec2::new(12, 12);
    let display = UVec2::new(24, 24);

    run(&mut upscaler, render, display).unwrap();
    run(&mut upscaler, render, display).unwrap();
    let before = upscaler.history().cloned();
    let frame_index = upscaler.frame_index();

    let err = run(&mut upscaler, UVec2::new(32, 32), UVec2::new(64, 64)).unwrap_err();
    assert!(matches!(err, UpscaleError::Allocation(_)), "got {}", err);
    assert!(err.is_frame_local());
    assert_eq!(upscaler.frame_index(), frame_index);
    assert_eq!(upscaler.history().cloned(), before);
    assert_eq!(upscaler.history_metrics().commits, 2);

    // the next regular frame continues the sequence
    assert!(!run(&mut upscaler, render, display).unwrap());
    assert_eq!(upscaler.frame_index(), frame_index + 1);
}

#[test]
fn test_input_errors_do_not_commit() {
    let mut upscaler = TemporalUpscaler::new(UpscalerSettings::default(), UpscalerCaps::baseline());
    let (color, depth, velocity) = planes(UVec2::new(8, 8));

    let bad_pre = FrameInputs::new(&color, &depth, &velocity, UVec2::new(8, 8)).with_pre_exposure(0.0);
    assert!(matches!(upscaler.upscale(&bad_pre), Err(UpscaleError::Input(_))));

    let short_velocity = Plane::new(8, 7, Vec2::ZERO);
    let mismatched = FrameInputs::new(&color, &depth, &short_velocity, UVec2::new(8, 8));
    assert!(matches!(upscaler.upscale(&mismatched), Err(UpscaleError::Input(_))));

    assert!(!upscaler.has_history());
    assert_eq!(upscaler.history_metrics().commits, 0);
}

#[test]
fn test_disable_and_reenable_cold_starts() {
    let render = UVec2::new(6, 6);
    let display = UVec2::new(9, 9);
    let mut upscaler = TemporalUpscaler::new(
        UpscalerSettings::default().with_quality(QualityPreset::UltraPerformance),
        UpscalerCaps::baseline(),
    );
    run(&mut upscaler, render, display).unwrap();
    run(&mut upscaler, render, display).unwrap();
    let resident = upscaler.history_metrics().resident_bytes;
    assert_eq!(resident, upscaler.history().unwrap().resident_bytes());
    assert!(resident > 0);

    upscaler.set_enabled(false);
    assert!(!upscaler.has_history());
    assert_eq!(upscaler.history_metrics().resident_bytes, 0);
    assert!(matches!(
        run(&mut upscaler, render, display),
        Err(UpscaleError::Config(_))
    ));
    assert_eq!(upscaler.history_metrics().releases, 1);

    upscaler.set_enabled(true);
    assert!(run(&mut upscaler, render, display).unwrap());
    assert_eq!(upscaler.frame_index(), 1);
}
