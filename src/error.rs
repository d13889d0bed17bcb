//! Central error handling for the temporal upscaler
//!
//! Provides a unified UpscaleError enum with consistent categorization.
//! History mismatches are not errors: they degrade the frame to a cold start
//! and are reported through `core::history::HistoryMismatch` instead.

/// Centralized error type for all upscaler operations
#[derive(thiserror::Error, Debug)]
pub enum UpscaleError {
    #[error("Input error: {0}")]
    Input(String),

    #[error("Allocation error: {0}")]
    Allocation(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Settings parse error: {0}")]
    Json(#[from] serde_json::Error),
}

impl UpscaleError {
    /// Short category tag used as a log prefix
    pub fn category(&self) -> &'static str {
        match self {
            UpscaleError::Input(_) => "Input",
            UpscaleError::Allocation(_) => "Allocation",
            UpscaleError::Config(_) => "Config",
            UpscaleError::Io(_) => "IO",
            UpscaleError::Json(_) => "Json",
        }
    }

    /// Convenience constructors for common error types
    pub fn input<T: ToString>(msg: T) -> Self {
        UpscaleError::Input(msg.to_string())
    }

    pub fn allocation<T: ToString>(msg: T) -> Self {
        UpscaleError::Allocation(msg.to_string())
    }

    pub fn config<T: ToString>(msg: T) -> Self {
        UpscaleError::Config(msg.to_string())
    }

    /// Whether the error only costs the current frame
    ///
    /// Allocation failures leave the committed history untouched, so the host
    /// may simply retry on the next frame.
    pub fn is_frame_local(&self) -> bool {
        matches!(self, UpscaleError::Allocation(_))
    }
}

/// Result type alias for upscaler operations
pub type UpscaleResult<T> = Result<T, UpscaleError>;
