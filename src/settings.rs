//! Upscaler configuration surface
//!
//! Plain scalar settings read at frame granularity: quality preset, sharpness,
//! exposure source, reactive-mask generation and the reactive-mask tunables.
//! Settings can be loaded from JSON; every field has a default so partial
//! documents are accepted.

use std::path::Path;
use std::str::FromStr;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::error::{UpscaleError, UpscaleResult};

pub fn normalize_key(value: &str) -> String {
    value
        .trim()
        .to_ascii_lowercase()
        .chars()
        .filter(|c| !matches!(c, '-' | '_' | ' ' | '.'))
        .collect()
}

/// Shader quality preset. Gates buffer precision and which optional stages run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QualityPreset {
    #[default]
    #[serde(alias = "high")]
    Quality,
    #[serde(alias = "medium")]
    Balanced,
    #[serde(alias = "perf")]
    Performance,
    #[serde(alias = "ultra-perf", alias = "ultraperformance")]
    UltraPerformance,
}

impl QualityPreset {
    pub const ALL: [QualityPreset; 4] = [
        QualityPreset::Quality,
        QualityPreset::Balanced,
        QualityPreset::Performance,
        QualityPreset::UltraPerformance,
    ];

    /// Map a numeric level (1 = Quality .. 4 = UltraPerformance), clamping out-of-range values.
    pub fn from_level(level: i32) -> Self {
        match level.clamp(1, 4) {
            1 => Self::Quality,
            2 => Self::Balanced,
            3 => Self::Performance,
            _ => Self::UltraPerformance,
        }
    }

    pub fn level(self) -> i32 {
        match self {
            Self::Quality => 1,
            Self::Balanced => 2,
            Self::Performance => 3,
            Self::UltraPerformance => 4,
        }
    }

    pub fn canonical(self) -> &'static str {
        match self {
            Self::Quality => "quality",
            Self::Balanced => "balanced",
            Self::Performance => "performance",
            Self::UltraPerformance => "ultra-performance",
        }
    }

    /// Quality keeps a luma history; the cheaper presets keep a temporal-reactive plane instead.
    pub fn keeps_luma_history(self) -> bool {
        matches!(self, Self::Quality)
    }

    /// UltraPerformance packs depth, motion and luma into a single plane.
    pub fn packs_dilation(self) -> bool {
        matches!(self, Self::UltraPerformance)
    }

    /// Luminance pyramid and reactive-mask generation are skipped for UltraPerformance.
    pub fn runs_luminance_pyramid(self) -> bool {
        !matches!(self, Self::UltraPerformance)
    }

    pub fn runs_reactive_mask(self) -> bool {
        !matches!(self, Self::UltraPerformance)
    }
}

impl FromStr for QualityPreset {
    type Err = &'static str;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let key = normalize_key(value);
        Ok(match key.as_str() {
            "quality" | "high" | "1" => Self::Quality,
            "balanced" | "medium" | "2" => Self::Balanced,
            "performance" | "perf" | "3" => Self::Performance,
            "ultraperformance" | "ultraperf" | "ultra" | "4" => Self::UltraPerformance,
            _ => return Err("unknown quality preset"),
        })
    }
}

/// Scale/bias terms for reactive-mask generation.
///
/// Scales and biases are documented in [0, 1]; distances are world units.
/// Values outside those ranges are accepted and the mask is still clamped.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReactiveMaskTunables {
    #[serde(default = "ReactiveMaskTunables::default_reflection_scale")]
    pub reflection_scale: f32,
    #[serde(default = "ReactiveMaskTunables::default_roughness_scale")]
    pub roughness_scale: f32,
    #[serde(default = "ReactiveMaskTunables::default_roughness_bias")]
    pub roughness_bias: f32,
    #[serde(default = "ReactiveMaskTunables::default_roughness_max_distance")]
    pub roughness_max_distance: f32,
    #[serde(default)]
    pub roughness_force_max_distance: bool,
    #[serde(default)]
    pub reflection_luma_bias: f32,
    #[serde(default = "ReactiveMaskTunables::default_reactive_history_translucency_bias")]
    pub reactive_history_translucency_bias: f32,
    #[serde(default)]
    pub reactive_history_translucency_luma_bias: f32,
    #[serde(default = "ReactiveMaskTunables::default_translucency_bias")]
    pub translucency_bias: f32,
    #[serde(default)]
    pub translucency_luma_bias: f32,
    #[serde(default = "ReactiveMaskTunables::default_translucency_max_distance")]
    pub translucency_max_distance: f32,
    /// When > 0 overrides the material-supplied value for reactive shading models
    #[serde(default)]
    pub force_reactive_material_value: f32,
    /// Shading-model id treated as explicitly reactive
    #[serde(default)]
    pub reactive_shading_model: Option<u8>,
}

impl ReactiveMaskTunables {
    const fn default_reflection_scale() -> f32 {
        0.4
    }
    const fn default_roughness_scale() -> f32 {
        0.15
    }
    const fn default_roughness_bias() -> f32 {
        0.25
    }
    const fn default_roughness_max_distance() -> f32 {
        6000.0
    }
    const fn default_reactive_history_translucency_bias() -> f32 {
        0.5
    }
    const fn default_translucency_bias() -> f32 {
        1.0
    }
    const fn default_translucency_max_distance() -> f32 {
        500_000.0
    }

    /// Clamp scale/bias terms to [0, 1] and distances to be non-negative.
    pub fn sanitized(&self) -> Self {
        let unit = |v: f32| if v.is_finite() { v.clamp(0.0, 1.0) } else { 0.0 };
        let dist = |v: f32| if v.is_nan() { 0.0 } else { v.max(0.0) };
        Self {
            reflection_scale: unit(self.reflection_scale),
            roughness_scale: unit(self.roughness_scale),
            roughness_bias: unit(self.roughness_bias),
            roughness_max_distance: dist(self.roughness_max_distance),
            roughness_force_max_distance: self.roughness_force_max_distance,
            reflection_luma_bias: unit(self.reflection_luma_bias),
            reactive_history_translucency_bias: unit(self.reactive_history_translucency_bias),
            reactive_history_translucency_luma_bias: unit(
                self.reactive_history_translucency_luma_bias,
            ),
            translucency_bias: unit(self.translucency_bias),
            translucency_luma_bias: unit(self.translucency_luma_bias),
            translucency_max_distance: dist(self.translucency_max_distance),
            force_reactive_material_value: unit(self.force_reactive_material_value),
            reactive_shading_model: self.reactive_shading_model,
        }
    }
}

impl Default for ReactiveMaskTunables {
    fn default() -> Self {
        Self {
            reflection_scale: Self::default_reflection_scale(),
            roughness_scale: Self::default_roughness_scale(),
            roughness_bias: Self::default_roughness_bias(),
            roughness_max_distance: Self::default_roughness_max_distance(),
            roughness_force_max_distance: false,
            reflection_luma_bias: 0.0,
            reactive_history_translucency_bias: Self::default_reactive_history_translucency_bias(),
            reactive_history_translucency_luma_bias: 0.0,
            translucency_bias: Self::default_translucency_bias(),
            translucency_luma_bias: 0.0,
            translucency_max_distance: Self::default_translucency_max_distance(),
            force_reactive_material_value: 0.0,
            reactive_shading_model: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UpscalerSettings {
    #[serde(default = "UpscalerSettings::default_enable")]
    pub enable: bool,
    #[serde(default)]
    pub quality: QualityPreset,
    /// Sharpening strength in [0, 1]; 0 disables RCAS
    #[serde(default)]
    pub sharpness: f32,
    /// Derive exposure from the luminance pyramid instead of the engine value
    #[serde(default)]
    pub auto_exposure: bool,
    #[serde(default = "UpscalerSettings::default_create_reactive_mask")]
    pub create_reactive_mask: bool,
    #[serde(default)]
    pub reactive: ReactiveMaskTunables,
}

impl UpscalerSettings {
    const fn default_enable() -> bool {
        true
    }
    const fn default_create_reactive_mask() -> bool {
        true
    }

    pub fn with_quality(mut self, quality: QualityPreset) -> Self {
        self.quality = quality;
        self
    }

    pub fn with_sharpness(mut self, sharpness: f32) -> Self {
        self.sharpness = sharpness;
        self
    }

    pub fn with_auto_exposure(mut self, enabled: bool) -> Self {
        self.auto_exposure = enabled;
        self
    }

    /// Copy with every scalar clamped to its documented range.
    pub fn sanitized(&self) -> Self {
        Self {
            enable: self.enable,
            quality: self.quality,
            sharpness: if self.sharpness.is_nan() {
                0.0
            } else {
                self.sharpness.clamp(0.0, 1.0)
            },
            auto_exposure: self.auto_exposure,
            create_reactive_mask: self.create_reactive_mask,
            reactive: self.reactive.sanitized(),
        }
    }

    pub fn from_json_str(json: &str) -> UpscaleResult<Self> {
        let settings: Self = serde_json::from_str(json)?;
        if settings.sharpness.is_nan() {
            return Err(UpscaleError::config("sharpness must be a number"));
        }
        Ok(settings.sanitized())
    }
}

impl Default for UpscalerSettings {
    fn default() -> Self {
        Self {
            enable: Self::default_enable(),
            quality: QualityPreset::default(),
            sharpness: 0.0,
            auto_exposure: false,
            create_reactive_mask: Self::default_create_reactive_mask(),
            reactive: ReactiveMaskTunables::default(),
        }
    }
}

/// Load settings from a JSON file.
pub fn load_settings(path: impl AsRef<Path>) -> anyhow::Result<UpscalerSettings> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading upscaler settings from {}", path.display()))?;
    UpscalerSettings::from_json_str(&text)
        .with_context(|| format!("parsing upscaler settings in {}", path.display()))
}
