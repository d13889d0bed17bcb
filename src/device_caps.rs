//! Device capabilities and code-path negotiation
//!
//! Capabilities are queried once when an upscaler is created and resolved
//! into a fixed `CodePath`. Missing capabilities select the baseline path;
//! they never fail a frame.

use std::sync::Once;

use log::{info, warn};

/// Reduction strategy for the luminance pyramid
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReductionPath {
    /// One pass per mip level
    LevelByLevel,
    /// Work-group local reduction of 32x32 tiles, then the global tail
    TileLocal,
}

/// Arithmetic/storage precision for intermediate planes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComputePrecision {
    Full,
    Half,
}

/// Code path fixed for the lifetime of an upscaler instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodePath {
    pub reduction: ReductionPath,
    pub precision: ComputePrecision,
    /// GL-class backends take the exposure value unsmoothed
    pub exposure_smoothing: bool,
}

impl CodePath {
    pub fn baseline() -> Self {
        Self {
            reduction: ReductionPath::LevelByLevel,
            precision: ComputePrecision::Full,
            exposure_smoothing: true,
        }
    }
}

/// Device capabilities structure
#[derive(Debug, Clone)]
pub struct UpscalerCaps {
    /// Backend identifier (vulkan, dx12, metal, gl, cpu)
    pub backend: String,

    /// Adapter name from driver
    pub adapter_name: String,

    /// Maximum 2D texture dimension; larger planes are refused
    pub max_texture_dimension_2d: u32,

    /// Native 16-bit float arithmetic in shaders
    pub half_float: bool,

    /// Subgroup/wave operations usable for reductions
    pub wave_ops: bool,

    /// Backend cannot write the exposure history it would need for smoothing
    pub gl_class: bool,
}

static WAVE_OPS_WARNING: Once = Once::new();
static HALF_FLOAT_WARNING: Once = Once::new();

impl UpscalerCaps {
    /// Capability set of a plain CPU host: no half floats, no wave ops
    pub fn baseline() -> Self {
        Self {
            backend: "cpu".to_string(),
            adapter_name: "host".to_string(),
            max_texture_dimension_2d: 16384,
            half_float: false,
            wave_ops: false,
            gl_class: false,
        }
    }

    /// Create caps from a wgpu adapter
    pub fn from_adapter(adapter: &wgpu::Adapter) -> Self {
        Self::from_parts(&adapter.get_info(), adapter.features(), &adapter.limits())
    }

    /// Create caps from adapter info, features and limits
    pub fn from_parts(
        info: &wgpu::AdapterInfo,
        features: wgpu::Features,
        limits: &wgpu::Limits,
    ) -> Self {
        let half_float = features.contains(wgpu::Features::SHADER_F16);
        let (wave_ops, gl_class) = Self::detect_backend_paths(&info.backend);

        Self {
            backend: format!("{:?}", info.backend).to_lowercase(),
            adapter_name: info.name.clone(),
            max_texture_dimension_2d: limits.max_texture_dimension_2d,
            half_float,
            wave_ops,
            gl_class,
        }
    }

    /// Backend-specific code paths: (wave ops available, GL-class)
    fn detect_backend_paths(backend: &wgpu::Backend) -> (bool, bool) {
        match backend {
            wgpu::Backend::Vulkan | wgpu::Backend::Dx12 | wgpu::Backend::Metal => (true, false),
            wgpu::Backend::Gl => (false, true),
            _ => (false, false),
        }
    }

    pub fn with_half_float(mut self, enabled: bool) -> Self {
        self.half_float = enabled;
        self
    }

    pub fn with_wave_ops(mut self, enabled: bool) -> Self {
        self.wave_ops = enabled;
        self
    }

    pub fn with_max_texture_dimension(mut self, max: u32) -> Self {
        self.max_texture_dimension_2d = max;
        self
    }

    /// Resolve the code path. Called once per upscaler.
    pub fn code_path(&self) -> CodePath {
        let reduction = if self.wave_ops {
            ReductionPath::TileLocal
        } else {
            WAVE_OPS_WARNING.call_once(|| {
                warn!(
                    "Wave operations unavailable on {} backend. Falling back to level-by-level luminance reduction.",
                    self.backend
                );
            });
            ReductionPath::LevelByLevel
        };

        let precision = if self.half_float {
            ComputePrecision::Half
        } else {
            HALF_FLOAT_WARNING.call_once(|| {
                warn!("Half-float arithmetic unavailable. Using full-precision intermediates.");
            });
            ComputePrecision::Full
        };

        let path = CodePath {
            reduction,
            precision,
            exposure_smoothing: !self.gl_class,
        };
        info!(
            "Upscaler code path on '{}' ({}): {:?}",
            self.adapter_name, self.backend, path
        );
        path
    }

    /// Whether a plane of the given extent can be created on this device
    pub fn fits(&self, width: u32, height: u32) -> bool {
        width <= self.max_texture_dimension_2d && height <= self.max_texture_dimension_2d
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(backend: wgpu::Backend) -> wgpu::AdapterInfo {
        wgpu::AdapterInfo {
            name: "test adapter".to_string(),
            vendor: 0,
            device: 0,
            device_type: wgpu::DeviceType::DiscreteGpu,
            driver: String::new(),
            driver_info: String::new(),
            backend,
        }
    }

    #[test]
    fn test_baseline_path() {
        let path = UpscalerCaps::baseline().code_path();
        assert_eq!(path, CodePath::baseline());
    }

    #[test]
    fn test_vulkan_with_f16() {
        let caps = UpscalerCaps::from_parts(
            &info(wgpu::Backend::Vulkan),
            wgpu::Features::SHADER_F16,
            &wgpu::Limits::default(),
        );
        assert!(caps.half_float);
        assert!(caps.wave_ops);
        assert_eq!(caps.backend, "vulkan");
        let path = caps.code_path();
        assert_eq!(path.reduction, ReductionPath::TileLocal);
        assert_eq!(path.precision, ComputePrecision::Half);
        assert!(path.exposure_smoothing);
    }

    #[test]
    fn test_gl_falls_back() {
        let caps = UpscalerCaps::from_parts(
            &info(wgpu::Backend::Gl),
            wgpu::Features::empty(),
            &wgpu::Limits::downlevel_webgl2_defaults(),
        );
        let path = caps.code_path();
        assert_eq!(path.reduction, ReductionPath::LevelByLevel);
        assert_eq!(path.precision, ComputePrecision::Full);
        assert!(!path.exposure_smoothing);
        assert!(caps.fits(2048, 2048));
        assert!(!caps.fits(4096, 16));
    }
}
