//! Jitter sequence for temporal upscaling
//!
//! Provides the Halton 2,3 low-discrepancy sequence for sub-pixel projection
//! jitter. The phase count grows with the square of the upscale ratio so every
//! output pixel receives roughly eight samples per cycle.

use glam::{UVec2, Vec2};

/// Base number of samples per output pixel per jitter cycle
pub const JITTER_BASE_PHASES: f32 = 8.0;

/// Compute Halton sequence value for a given index and base.
///
/// The Halton sequence is a low-discrepancy sequence that provides
/// well-distributed samples in [0, 1).
#[inline]
pub fn halton(index: u32, base: u32) -> f32 {
    let mut result = 0.0f32;
    let mut f = 1.0f32;
    let mut i = index;

    while i > 0 {
        f /= base as f32;
        result += f * (i % base) as f32;
        i /= base;
    }

    result
}

/// 2D Halton jitter offset in render pixels, in [-0.5, 0.5].
#[inline]
pub fn halton_2_3(frame_index: u32, phase_count: u32) -> Vec2 {
    // 1-based: index 0 would yield (0, 0) every cycle
    let index = (frame_index % phase_count.max(1)) + 1;
    Vec2::new(halton(index, 2) - 0.5, halton(index, 3) - 0.5)
}

/// Number of jitter phases for a render/display width pair.
///
/// `round(8 * (display / render)^2)`, at least 1.
pub fn jitter_phase_count(render_width: u32, display_width: u32) -> u32 {
    if render_width == 0 {
        return 1;
    }
    let ratio = display_width as f32 / render_width as f32;
    ((JITTER_BASE_PHASES * ratio * ratio).round() as u32).max(1)
}

/// Per-axis render/display ratio (1280x720 -> 1920x1080 gives 0.667)
pub fn downscale_factor(render: UVec2, display: UVec2) -> Vec2 {
    render.as_vec2() / display.max(UVec2::ONE).as_vec2()
}

/// Jitter phase state for one view
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JitterSequence {
    /// Current index in the sequence
    pub index: u32,
    /// Phases before the sequence repeats
    pub phase_count: u32,
    /// Current offset in render pixels
    pub offset: Vec2,
}

impl JitterSequence {
    pub fn new(render: UVec2, display: UVec2) -> Self {
        let mut seq = Self {
            index: 0,
            phase_count: jitter_phase_count(render.x, display.x),
            offset: Vec2::ZERO,
        };
        seq.refresh_offset();
        seq
    }

    /// Advance to the next frame
    pub fn advance(&mut self) {
        self.index = (self.index + 1) % self.phase_count;
        self.refresh_offset();
    }

    /// Restart the sequence, e.g. on a discontinuity
    pub fn reset(&mut self) {
        self.index = 0;
        self.refresh_offset();
    }

    /// Recompute the phase count after a resolution change. Restarts the sequence.
    pub fn resize(&mut self, render: UVec2, display: UVec2) {
        self.phase_count = jitter_phase_count(render.x, display.x);
        self.reset();
    }

    fn refresh_offset(&mut self) {
        self.offset = halton_2_3(self.index, self.phase_count);
    }
}
