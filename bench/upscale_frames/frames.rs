//! Frame-time benchmark
//!
//! Upscales a synthetic moving scene at every quality preset and reports the
//! average CPU time per frame. The code path is negotiated from the first
//! available adapter, or the plain host capabilities when there is none.

use std::time::Instant;

use anyhow::{Context, Result};
use glam::{UVec2, Vec2, Vec3};
use temporal_upscale::{
    FrameInputs, Plane, QualityPreset, TemporalUpscaler, UpscalerCaps, UpscalerSettings,
};

/// Configuration for frame benchmarks
#[derive(Debug, Clone)]
pub struct BenchConfig {
    pub render: UVec2,
    pub display: UVec2,
    pub frames: u32,
    /// Frames excluded from the measurement
    pub warmup_frames: u32,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            render: UVec2::new(640, 360),
            display: UVec2::new(960, 540),
            frames: 24,
            warmup_frames: 4,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BenchResult {
    pub preset: QualityPreset,
    pub avg_frame_ms: f64,
    pub megapixels_per_s: f64,
}

struct SyntheticScene {
    color: Plane<Vec3>,
    depth: Plane<f32>,
    velocity: Plane<Vec2>,
}

/// A bright disc sliding over a gradient, with matching NDC velocity
fn synthetic_frame(render: UVec2, frame: u32) -> SyntheticScene {
    let speed = 2.0 / render.x as f32;
    let center = Vec2::new(0.2 + 0.01 * frame as f32, 0.5);
    let inside = |x: u32, y: u32| {
        let uv = (Vec2::new(x as f32, y as f32) + 0.5) / render.as_vec2();
        (uv - center).length() < 0.1
    };
    SyntheticScene {
        color: Plane::par_from_fn(render.x, render.y, Vec3::ZERO, |x, y| {
            if inside(x, y) {
                Vec3::new(4.0, 3.0, 2.0)
            } else {
                Vec3::new(x as f32 / render.x as f32, 0.2, y as f32 / render.y as f32)
            }
        }),
        depth: Plane::par_from_fn(render.x, render.y, 0.0, |x, y| if inside(x, y) { 0.8 } else { 0.1 }),
        velocity: Plane::par_from_fn(render.x, render.y, Vec2::ZERO, |x, y| {
            if inside(x, y) {
                Vec2::new(-speed * 0.5, 0.0)
            } else {
                Vec2::ZERO
            }
        }),
    }
}

fn probe_caps() -> UpscalerCaps {
    let instance = wgpu::Instance::new(wgpu::InstanceDescriptor::default());
    match pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions::default())) {
        Some(adapter) => UpscalerCaps::from_adapter(&adapter),
        None => {
            println!("No adapter found, using host capabilities");
            UpscalerCaps::baseline()
        }
    }
}

fn benchmark_preset(preset: QualityPreset, caps: &UpscalerCaps, config: &BenchConfig) -> Result<BenchResult> {
    let mut upscaler = TemporalUpscaler::new(
        UpscalerSettings::default()
            .with_quality(preset)
            .with_sharpness(0.5)
            .with_auto_exposure(true),
        caps.clone(),
    );

    let mut measured = 0.0f64;
    for frame in 0..config.warmup_frames + config.frames {
        let scene = synthetic_frame(config.render, frame);
        let (jitter, _) = upscaler.next_jitter(config.render, config.display);
        let inputs = FrameInputs::new(&scene.color, &scene.depth, &scene.velocity, config.display)
            .with_jitter(jitter);

        let start = Instant::now();
        upscaler
            .upscale(&inputs)
            .with_context(|| format!("{} frame {}", preset.canonical(), frame))?;
        if frame >= config.warmup_frames {
            measured += start.elapsed().as_secs_f64();
        }
    }

    let avg = measured / config.frames.max(1) as f64;
    let display_mp = (config.display.x * config.display.y) as f64 / 1.0e6;
    Ok(BenchResult {
        preset,
        avg_frame_ms: avg * 1000.0,
        megapixels_per_s: display_mp / avg.max(1e-9),
    })
}

fn run() -> Result<()> {
    let config = BenchConfig::default();
    let caps = probe_caps();
    println!("Temporal upscale frame benchmark");
    println!(
        "  {}x{} -> {}x{}, {} frames ({} warmup)",
        config.render.x, config.render.y, config.display.x, config.display.y, config.frames, config.warmup_frames
    );
    println!("  adapter: {} ({})", caps.adapter_name, caps.backend);
    println!();

    for preset in QualityPreset::ALL {
        let result = benchmark_preset(preset, &caps, &config)?;
        println!(
            "{:<18} {:>8.2} ms/frame {:>8.1} MP/s",
            result.preset.canonical(),
            result.avg_frame_ms,
            result.megapixels_per_s
        );
    }
    Ok(())
}

fn main() {
    env_logger::init();

    if let Err(e) = run() {
        eprintln!("Benchmark failed: {:#}", e);
        std::process::exit(1);
    }
}
