//! Per-view temporal upscaler
//!
//! `TemporalUpscaler` owns everything that persists between frames of one view
//! (history, exposure, jitter phase, frame index) and runs the stage chain:
//! velocity -> exposure -> reactive mask -> reconstruct -> depth clip -> locks
//! -> accumulate -> sharpen. A frame either completes and swaps in its new
//! history or fails and leaves the persistent state as it was.

use glam::{UVec2, Vec2, Vec3};
use log::{debug, info};

use crate::core::accumulate::{accumulate, AccumulateInputs};
use crate::core::depth_clip::depth_clip;
use crate::core::history::{History, HistoryStore, HistoryStoreMetrics, PreviousMotion};
use crate::core::jitter::{downscale_factor, JitterSequence};
use crate::core::lock::update_locks;
use crate::core::luminance::{build_pyramid, ExposureState};
use crate::core::plane::Plane;
use crate::core::rcas::apply_rcas;
use crate::core::reactive::{create_reactive_mask, MaterialCues};
use crate::core::reconstruct::reconstruct_and_dilate;
use crate::core::velocity::{normalize_velocity, CameraReprojection};
use crate::device_caps::{CodePath, UpscalerCaps};
use crate::error::{UpscaleError, UpscaleResult};
use crate::settings::UpscalerSettings;

/// Everything the engine hands over for one frame
pub struct FrameInputs<'a> {
    /// Scene color at render resolution, linear, pre-exposed by `pre_exposure`
    pub color: &'a Plane<Vec3>,
    /// Device depth, inverted Z (1 = near, 0 = far)
    pub depth: &'a Plane<f32>,
    /// Engine motion in NDC, current -> previous, +Y up; exact zero means "not written"
    pub velocity: &'a Plane<Vec2>,
    pub material: Option<&'a MaterialCues>,
    /// Projection jitter this frame was rendered with, render pixels.
    /// The sample of input pixel `p` sits at `p + 0.5 + jitter`.
    pub jitter: Vec2,
    /// Seconds since the previous frame
    pub delta_time: f32,
    pub pre_exposure: f32,
    /// Used when auto exposure is off
    pub engine_exposure: Option<f32>,
    pub camera: Option<CameraReprojection>,
    /// Near plane distance for infinite inverted Z
    pub near: f32,
    /// Dynamic-resolution rescale of the motion vectors
    pub motion_scale: Vec2,
    pub display_extent: UVec2,
    /// Camera cut or other discontinuity
    pub reset: bool,
}

impl<'a> FrameInputs<'a> {
    /// Minimal frame description with neutral defaults
    pub fn new(
        color: &'a Plane<Vec3>,
        depth: &'a Plane<f32>,
        velocity: &'a Plane<Vec2>,
        display_extent: UVec2,
    ) -> Self {
        Self {
            color,
            depth,
            velocity,
            material: None,
            jitter: Vec2::ZERO,
            delta_time: 1.0 / 60.0,
            pre_exposure: 1.0,
            engine_exposure: None,
            camera: None,
            near: 0.1,
            motion_scale: Vec2::ONE,
            display_extent,
            reset: false,
        }
    }

    pub fn with_jitter(mut self, jitter: Vec2) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_pre_exposure(mut self, pre_exposure: f32) -> Self {
        self.pre_exposure = pre_exposure;
        self
    }

    pub fn with_material(mut self, material: &'a MaterialCues) -> Self {
        self.material = Some(material);
        self
    }

    pub fn with_reset(mut self, reset: bool) -> Self {
        self.reset = reset;
        self
    }
}

#[derive(Debug, Clone)]
pub struct FrameOutput {
    /// Display resolution, re-exposed by the frame's pre-exposure
    pub color: Plane<Vec3>,
    pub exposure: f32,
    /// Index of the frame just produced (0 on a cold start)
    pub frame_index: u64,
    /// Whether this frame started from placeholder history
    pub history_reset: bool,
    pub jitter_phase_count: u32,
}

/// Temporal upscaler for a single view
#[derive(Debug)]
pub struct TemporalUpscaler {
    settings: UpscalerSettings,
    caps: UpscalerCaps,
    code_path: CodePath,
    history: HistoryStore,
    exposure: ExposureState,
    jitter: JitterSequence,
    frame_index: u64,
    extents: Option<(UVec2, UVec2)>,
}

impl TemporalUpscaler {
    pub fn new(settings: UpscalerSettings, caps: UpscalerCaps) -> Self {
        let settings = settings.sanitized();
        let code_path = caps.code_path();
        info!(
            "Created temporal upscaler: preset {}, sharpness {:.2}, auto exposure {}",
            settings.quality.canonical(),
            settings.sharpness,
            settings.auto_exposure
        );
        Self {
            settings,
            caps,
            code_path,
            history: HistoryStore::new(),
            exposure: ExposureState::default(),
            jitter: JitterSequence::new(UVec2::ONE, UVec2::ONE),
            frame_index: 0,
            extents: None,
        }
    }

    pub fn settings(&self) -> &UpscalerSettings {
        &self.settings
    }

    pub fn caps(&self) -> &UpscalerCaps {
        &self.caps
    }

    pub fn code_path(&self) -> CodePath {
        self.code_path
    }

    /// Frames accumulated since the last cold start
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    pub fn exposure(&self) -> f32 {
        self.exposure.exposure
    }

    pub fn has_history(&self) -> bool {
        !self.history.is_empty()
    }

    pub fn history(&self) -> Option<&History> {
        self.history.current()
    }

    pub fn history_metrics(&self) -> &HistoryStoreMetrics {
        self.history.metrics()
    }

    /// Replace the settings. A preset change invalidates history on the next frame.
    pub fn set_settings(&mut self, settings: UpscalerSettings) {
        let settings = settings.sanitized();
        if settings.quality != self.settings.quality {
            debug!(
                "Upscaler preset changed from {} to {}",
                self.settings.quality.canonical(),
                settings.quality.canonical()
            );
        }
        let enable = settings.enable;
        self.settings = settings;
        self.set_enabled(enable);
    }

    /// Disabling releases the history; the next enabled frame is a cold start.
    pub fn set_enabled(&mut self, enable: bool) {
        self.settings.enable = enable;
        if !enable {
            self.history.release();
        }
    }

    /// Projection jitter the engine should render the next frame with, and the phase count
    pub fn next_jitter(&mut self, render: UVec2, display: UVec2) -> (Vec2, u32) {
        self.track_extents(render, display);
        (self.jitter.offset, self.jitter.phase_count)
    }

    fn track_extents(&mut self, render: UVec2, display: UVec2) {
        if self.extents != Some((render, display)) {
            self.jitter.resize(render, display);
            self.extents = Some((render, display));
        }
    }

    fn validate(&self, inputs: &FrameInputs<'_>) -> UpscaleResult<()> {
        let render = inputs.color.extent();
        let display = inputs.display_extent;
        if render.x == 0 || render.y == 0 || display.x == 0 || display.y == 0 {
            return Err(UpscaleError::input(format!(
                "empty extent: render {} display {}",
                render, display
            )));
        }
        if inputs.depth.extent() != render || inputs.velocity.extent() != render {
            return Err(UpscaleError::input(format!(
                "depth {} and velocity {} must match color {}",
                inputs.depth.extent(),
                inputs.velocity.extent(),
                render
            )));
        }
        if render.x > display.x || render.y > display.y {
            return Err(UpscaleError::input(format!(
                "render extent {} exceeds display extent {}",
                render, display
            )));
        }
        if let Some(material) = inputs.material {
            if !material.extent_matches(render.x, render.y) {
                return Err(UpscaleError::input("material cues do not match the render extent"));
            }
        }
        if !(inputs.pre_exposure.is_finite() && inputs.pre_exposure > 0.0) {
            return Err(UpscaleError::input(format!(
                "pre-exposure must be positive, got {}",
                inputs.pre_exposure
            )));
        }
        if !(inputs.near.is_finite() && inputs.near > 0.0) {
            return Err(UpscaleError::input(format!("near plane must be positive, got {}", inputs.near)));
        }
        if !self.caps.fits(display.x, display.y) {
            return Err(UpscaleError::allocation(format!(
                "display extent {} exceeds the device limit of {}",
                display, self.caps.max_texture_dimension_2d
            )));
        }
        Ok(())
    }

    /// Upscale one frame.
    pub fn upscale(&mut self, inputs: &FrameInputs<'_>) -> UpscaleResult<FrameOutput> {
        if !self.settings.enable {
            return Err(UpscaleError::config("upscaling is disabled"));
        }
        self.validate(inputs)?;

        let render = inputs.color.extent();
        let display = inputs.display_extent;
        let preset = self.settings.quality;
        let pre_exposure = inputs.pre_exposure;
        self.track_extents(render, display);

        if inputs.reset {
            debug!("Upscaler reset requested at frame {}", self.frame_index);
        }
        let acquired = self
            .history
            .acquire(preset, render, display)
            .filter(|_| !inputs.reset);
        let history_valid = acquired.is_some();

        let mut exposure_state = self.exposure;
        if !history_valid {
            exposure_state.reset();
        }

        let placeholder;
        let previous = match acquired {
            Some(history) => history,
            None => {
                placeholder = History::placeholder(preset, render, display, pre_exposure)?;
                &placeholder
            }
        };

        let motion = normalize_velocity(
            inputs.velocity,
            inputs.depth,
            inputs.camera.as_ref(),
            inputs.motion_scale,
        )?;

        let pyramid = preset
            .runs_luminance_pyramid()
            .then(|| build_pyramid(inputs.color, pre_exposure, self.code_path.reduction));
        let exposure = match (&pyramid, self.settings.auto_exposure) {
            (Some(pyramid), true) => exposure_state.update(
                pyramid.average_log_luma(),
                inputs.delta_time,
                self.code_path.exposure_smoothing,
            ),
            _ => exposure_state.set_engine_exposure(inputs.engine_exposure.unwrap_or(1.0)),
        };

        let reactive = match inputs.material {
            Some(material) if preset.runs_reactive_mask() && self.settings.create_reactive_mask => {
                create_reactive_mask(inputs.color, material, &self.settings.reactive)?
            }
            _ => Plane::try_new(render.x, render.y, Vec2::ZERO)?,
        };

        let reconstruction = reconstruct_and_dilate(
            inputs.color,
            inputs.depth,
            &motion,
            pre_exposure,
            exposure,
            preset.packs_dilation(),
        )?;

        let previous_motion = if history_valid {
            previous.previous_motion()
        } else {
            PreviousMotion::None
        };
        let clipped = depth_clip(
            inputs.color,
            &reconstruction,
            &reactive,
            previous_motion,
            pre_exposure,
            inputs.near,
            self.code_path.precision,
        )?;

        let locks = update_locks(
            display,
            &reconstruction.dilated,
            &clipped.masks,
            history_valid.then_some(previous),
        )?;

        let accumulated = accumulate(AccumulateInputs {
            prepared_color: &clipped.prepared_color,
            masks: &clipped.masks,
            dilated: reconstruction.dilated,
            locks,
            history: previous,
            shading_mip: pyramid.as_ref().and_then(|p| p.shading_change_mip()),
            jitter: inputs.jitter,
            pre_exposure,
            exposure,
            display,
        })?;

        let sharpened = if self.settings.sharpness > 0.0 {
            Some(apply_rcas(&accumulated.color, self.settings.sharpness, exposure, true)?)
        } else {
            None
        };
        let normalized = sharpened.as_ref().unwrap_or(&accumulated.color);
        let color = Plane::try_par_from_fn(display.x, display.y, Vec3::ZERO, |x, y| {
            normalized.get(x, y) * pre_exposure
        })?;

        // every fallible step is behind us: publish the frame
        let frame_index = if history_valid { self.frame_index } else { 0 };
        if !history_valid {
            self.jitter.reset();
        }
        self.history.commit(accumulated.history);
        self.exposure = exposure_state;
        self.frame_index = frame_index + 1;
        self.jitter.advance();

        let factor = downscale_factor(render, display);
        debug!(
            "Upscaled frame {} ({}x{} -> {}x{}, factor {:.3}, exposure {:.4}, history {} bytes)",
            frame_index,
            render.x,
            render.y,
            display.x,
            display.y,
            factor.x,
            exposure,
            self.history.metrics().resident_bytes
        );

        Ok(FrameOutput {
            color,
            exposure,
            frame_index,
            history_reset: !history_valid,
            jitter_phase_count: self.jitter.phase_count,
        })
    }
}
