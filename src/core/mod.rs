//! Core pipeline stages
//!
//! Each stage is a data-parallel kernel over `plane::Plane` buffers. Stages
//! only communicate through their inputs and outputs; the persistent state
//! lives in `history` and is owned by the upscaler.

pub mod plane;
pub mod format;
pub mod jitter;

// Stage chain, in execution order
pub mod velocity;
pub mod luminance;
pub mod reactive;
pub mod reconstruct;
pub mod depth_clip;
pub mod lock;
pub mod accumulate;
pub mod rcas;

pub mod history;
