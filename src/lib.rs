//! Temporal super-resolution core.
//!
//! Reconstructs a display-resolution image from jittered render-resolution
//! frames: exposure estimation, previous-depth reprojection, disocclusion and
//! reactive masks, per-pixel lock tracking, Lanczos accumulation with variance
//! clipping and optional RCAS sharpening.

pub mod core;
pub mod device_caps;
pub mod error;
pub mod settings;
pub mod upscaler;

pub use crate::core::history::{History, HistoryMismatch, HistoryStore};
pub use crate::core::plane::Plane;
pub use crate::core::reactive::MaterialCues;
pub use crate::core::velocity::CameraReprojection;
pub use device_caps::{CodePath, ComputePrecision, ReductionPath, UpscalerCaps};
pub use error::{UpscaleError, UpscaleResult};
pub use settings::{load_settings, QualityPreset, ReactiveMaskTunables, UpscalerSettings};
pub use upscaler::{FrameInputs, FrameOutput, TemporalUpscaler};
