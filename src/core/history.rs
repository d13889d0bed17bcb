//! Persistent per-view history
//!
//! A `History` holds the previous frame's outputs. Which buffers exist depends
//! on the quality preset, so the preset-specific part is an enum and invalid
//! combinations cannot be built. The `HistoryStore` owns at most one history
//! and replaces it wholesale at the frame boundary: the next frame's history
//! is built on the side and only swapped in once the frame has completed.

use glam::{UVec2, Vec2, Vec3, Vec4};
use log::debug;

use super::format::{unpack_r11g11b10, unpack_rgba16, Rgba16};
use super::lock::{LockTexel, LOCK_BASELINE};
use super::plane::{bilinear_taps, Plane};
use super::reconstruct::PackedDilation;
use crate::error::UpscaleResult;
use crate::settings::QualityPreset;

/// Quality keeps a short luma history and stores accumulation in color alpha
#[derive(Debug, Clone, PartialEq)]
pub struct QualityHistory {
    pub color: Plane<Rgba16>,
    /// Last three lock lumas plus a flicker score
    pub luma_history: Plane<Vec4>,
    pub dilated_motion: Plane<Vec2>,
}

/// Balanced/Performance: packed color, accumulation in the temporal-reactive plane
#[derive(Debug, Clone, PartialEq)]
pub struct StandardHistory {
    pub color: Plane<u32>,
    pub temporal_reactive: Plane<f32>,
    pub dilated_motion: Plane<Vec2>,
}

/// UltraPerformance: like Standard but with depth, motion and luma packed together
#[derive(Debug, Clone, PartialEq)]
pub struct PackedHistory {
    pub color: Plane<u32>,
    pub temporal_reactive: Plane<f32>,
    pub dilation: Plane<PackedDilation>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum HistoryBuffers {
    Quality(QualityHistory),
    Balanced(StandardHistory),
    Performance(StandardHistory),
    UltraPerformance(PackedHistory),
}

#[derive(Debug, Clone, PartialEq)]
pub struct History {
    pub render_extent: UVec2,
    pub display_extent: UVec2,
    /// Engine pre-exposure the stored color was written with
    pub pre_exposure: f32,
    pub lock: Plane<LockTexel>,
    pub buffers: HistoryBuffers,
}

/// Why a history cannot be used for the current frame
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum HistoryMismatch {
    #[error("preset changed from {found:?} to {expected:?}")]
    Preset {
        expected: QualityPreset,
        found: QualityPreset,
    },
    #[error("render extent {found} does not match {expected}")]
    RenderExtent { expected: UVec2, found: UVec2 },
    #[error("display extent {found} does not match {expected}")]
    DisplayExtent { expected: UVec2, found: UVec2 },
    #[error("{buffer} buffer is {found}, expected {expected}")]
    BufferExtent {
        buffer: &'static str,
        expected: UVec2,
        found: UVec2,
    },
    #[error("stored pre-exposure {0} is not usable")]
    PreExposure(f32),
}

/// Last frame's dilated motion, in whichever layout the preset stored it
#[derive(Debug, Clone, Copy)]
pub enum PreviousMotion<'a> {
    None,
    Separate(&'a Plane<Vec2>),
    Packed(&'a Plane<PackedDilation>),
}

impl PreviousMotion<'_> {
    pub fn sample(&self, uv: Vec2) -> Option<Vec2> {
        match self {
            PreviousMotion::None => None,
            PreviousMotion::Separate(p) => Some(p.sample_nearest(uv)),
            PreviousMotion::Packed(p) => Some(p.sample_nearest(uv).motion()),
        }
    }
}

/// Bilinear filter over a plane whose texels need decoding first
fn bilinear_decode<T: Copy>(plane: &Plane<T>, uv: Vec2, decode: impl Fn(T) -> Vec4) -> Vec4 {
    let (taps, weights) = bilinear_taps(uv, plane.extent());
    let mut acc = Vec4::ZERO;
    for (tap, w) in taps.iter().zip(weights.iter()) {
        acc += decode(plane.load_clamped(tap.x, tap.y)) * *w;
    }
    acc
}

impl History {
    /// Bytes held by every plane of this history
    pub fn resident_bytes(&self) -> usize {
        let buffers = match &self.buffers {
            HistoryBuffers::Quality(q) => {
                q.color.as_bytes().len()
                    + q.luma_history.as_bytes().len()
                    + q.dilated_motion.as_bytes().len()
            }
            HistoryBuffers::Balanced(s) | HistoryBuffers::Performance(s) => {
                s.color.as_bytes().len()
                    + s.temporal_reactive.as_bytes().len()
                    + s.dilated_motion.as_bytes().len()
            }
            HistoryBuffers::UltraPerformance(p) => {
                p.color.as_bytes().len()
                    + p.temporal_reactive.as_bytes().len()
                    + p.dilation.as_bytes().len()
            }
        };
        self.lock.as_bytes().len() + buffers
    }

    pub fn preset(&self) -> QualityPreset {
        match self.buffers {
            HistoryBuffers::Quality(_) => QualityPreset::Quality,
            HistoryBuffers::Balanced(_) => QualityPreset::Balanced,
            HistoryBuffers::Performance(_) => QualityPreset::Performance,
            HistoryBuffers::UltraPerformance(_) => QualityPreset::UltraPerformance,
        }
    }

    /// Black history with zero accumulation and baseline lock
    pub fn placeholder(
        preset: QualityPreset,
        render: UVec2,
        display: UVec2,
        pre_exposure: f32,
    ) -> UpscaleResult<Self> {
        let (dw, dh) = (display.x, display.y);
        let (rw, rh) = (render.x, render.y);
        let standard = || -> UpscaleResult<StandardHistory> {
            Ok(StandardHistory {
                color: Plane::try_new(dw, dh, 0u32)?,
                temporal_reactive: Plane::try_new(dw, dh, 0.0)?,
                dilated_motion: Plane::try_new(rw, rh, Vec2::ZERO)?,
            })
        };
        let buffers = match preset {
            QualityPreset::Quality => HistoryBuffers::Quality(QualityHistory {
                color: Plane::try_new(dw, dh, Rgba16::default())?,
                luma_history: Plane::try_new(dw, dh, Vec4::ZERO)?,
                dilated_motion: Plane::try_new(rw, rh, Vec2::ZERO)?,
            }),
            QualityPreset::Balanced => HistoryBuffers::Balanced(standard()?),
            QualityPreset::Performance => HistoryBuffers::Performance(standard()?),
            QualityPreset::UltraPerformance => HistoryBuffers::UltraPerformance(PackedHistory {
                color: Plane::try_new(dw, dh, 0u32)?,
                temporal_reactive: Plane::try_new(dw, dh, 0.0)?,
                dilation: Plane::try_new(rw, rh, PackedDilation::default())?,
            }),
        };
        Ok(Self {
            render_extent: render,
            display_extent: display,
            pre_exposure: if pre_exposure > 0.0 { pre_exposure } else { 1.0 },
            lock: Plane::try_new(
                dw,
                dh,
                LockTexel {
                    confidence: LOCK_BASELINE,
                    luma: 0.0,
                },
            )?,
            buffers,
        })
    }

    /// Check that every buffer the preset needs is present and consistently sized.
    pub fn validate(
        &self,
        preset: QualityPreset,
        render: UVec2,
        display: UVec2,
    ) -> Result<(), HistoryMismatch> {
        if self.preset() != preset {
            return Err(HistoryMismatch::Preset {
                expected: preset,
                found: self.preset(),
            });
        }
        if self.render_extent != render {
            return Err(HistoryMismatch::RenderExtent {
                expected: render,
                found: self.render_extent,
            });
        }
        if self.display_extent != display {
            return Err(HistoryMismatch::DisplayExtent {
                expected: display,
                found: self.display_extent,
            });
        }
        if !(self.pre_exposure.is_finite() && self.pre_exposure > 0.0) {
            return Err(HistoryMismatch::PreExposure(self.pre_exposure));
        }

        let check = |buffer: &'static str, found: UVec2, expected: UVec2| {
            if found == expected {
                Ok(())
            } else {
                Err(HistoryMismatch::BufferExtent {
                    buffer,
                    expected,
                    found,
                })
            }
        };
        check("lock", self.lock.extent(), display)?;
        match &self.buffers {
            HistoryBuffers::Quality(q) => {
                check("color", q.color.extent(), display)?;
                check("luma history", q.luma_history.extent(), display)?;
                check("dilated motion", q.dilated_motion.extent(), render)
            }
            HistoryBuffers::Balanced(s) | HistoryBuffers::Performance(s) => {
                check("color", s.color.extent(), display)?;
                check("temporal reactive", s.temporal_reactive.extent(), display)?;
                check("dilated motion", s.dilated_motion.extent(), render)
            }
            HistoryBuffers::UltraPerformance(p) => {
                check("color", p.color.extent(), display)?;
                check("temporal reactive", p.temporal_reactive.extent(), display)?;
                check("packed dilation", p.dilation.extent(), render)
            }
        }
    }

    /// Bilinear previous color (as stored, pre-exposed) and accumulation weight
    pub fn sample_color(&self, uv: Vec2) -> (Vec3, f32) {
        match &self.buffers {
            HistoryBuffers::Quality(q) => {
                let c = bilinear_decode(&q.color, uv, unpack_rgba16);
                (c.truncate(), c.w)
            }
            HistoryBuffers::Balanced(s) | HistoryBuffers::Performance(s) => {
                let c = bilinear_decode(&s.color, uv, |t| unpack_r11g11b10(t).extend(0.0));
                (c.truncate(), s.temporal_reactive.sample_bilinear(uv))
            }
            HistoryBuffers::UltraPerformance(p) => {
                let c = bilinear_decode(&p.color, uv, |t| unpack_r11g11b10(t).extend(0.0));
                (c.truncate(), p.temporal_reactive.sample_bilinear(uv))
            }
        }
    }

    pub fn sample_lock(&self, uv: Vec2) -> LockTexel {
        let v = bilinear_decode(&self.lock, uv, |t| Vec4::new(t.confidence, t.luma, 0.0, 0.0));
        LockTexel {
            confidence: v.x,
            luma: v.y,
        }
    }

    pub fn sample_luma_history(&self, uv: Vec2) -> Option<Vec4> {
        match &self.buffers {
            HistoryBuffers::Quality(q) => Some(q.luma_history.sample_bilinear(uv)),
            _ => None,
        }
    }

    pub fn previous_motion(&self) -> PreviousMotion<'_> {
        match &self.buffers {
            HistoryBuffers::Quality(q) => PreviousMotion::Separate(&q.dilated_motion),
            HistoryBuffers::Balanced(s) | HistoryBuffers::Performance(s) => {
                PreviousMotion::Separate(&s.dilated_motion)
            }
            HistoryBuffers::UltraPerformance(p) => PreviousMotion::Packed(&p.dilation),
        }
    }
}

/// Counters for history lifetime events
#[derive(Debug, Clone, Default)]
pub struct HistoryStoreMetrics {
    /// Histories swapped in at a frame boundary
    pub commits: u64,
    /// Histories dropped because they no longer matched the frame
    pub invalidations: u64,
    /// Explicit releases (upscaling disabled, discontinuity)
    pub releases: u64,
    /// Bytes held by the current history
    pub resident_bytes: usize,
}

/// Exclusive owner of one view's history
#[derive(Debug, Default)]
pub struct HistoryStore {
    current: Option<History>,
    metrics: HistoryStoreMetrics,
}

impl HistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep the current history only if it is valid for this frame. Returns whether one remains.
    pub fn retain_valid(&mut self, preset: QualityPreset, render: UVec2, display: UVec2) -> bool {
        let mismatch = match &self.current {
            Some(history) => history.validate(preset, render, display).err(),
            None => return false,
        };
        if let Some(reason) = mismatch {
            debug!("Discarding upscaler history: {}", reason);
            self.current = None;
            self.metrics.invalidations += 1;
            self.metrics.resident_bytes = 0;
            return false;
        }
        true
    }

    /// The committed history if it is still valid for this frame
    pub fn acquire(
        &mut self,
        preset: QualityPreset,
        render: UVec2,
        display: UVec2,
    ) -> Option<&History> {
        if self.retain_valid(preset, render, display) {
            self.current.as_ref()
        } else {
            None
        }
    }

    pub fn current(&self) -> Option<&History> {
        self.current.as_ref()
    }

    /// Swap in the history produced by a completed frame; the old one is dropped.
    pub fn commit(&mut self, next: History) {
        self.metrics.resident_bytes = next.resident_bytes();
        self.current = Some(next);
        self.metrics.commits += 1;
    }

    /// Drop the history, e.g. when upscaling is disabled
    pub fn release(&mut self) {
        if self.current.take().is_some() {
            self.metrics.releases += 1;
            self.metrics.resident_bytes = 0;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.current.is_none()
    }

    pub fn metrics(&self) -> &HistoryStoreMetrics {
        &self.metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RENDER: UVec2 = UVec2::new(8, 6);
    const DISPLAY: UVec2 = UVec2::new(12, 9);

    #[test]
    fn test_placeholder_shapes_follow_preset() {
        for preset in QualityPreset::ALL {
            let h = History::placeholder(preset, RENDER, DISPLAY, 1.0).unwrap();
            assert_eq!(h.preset(), preset);
            assert_eq!(h.validate(preset, RENDER, DISPLAY), Ok(()));
            assert_eq!(h.sample_color(Vec2::splat(0.5)), (Vec3::ZERO, 0.0));
            assert_eq!(h.sample_lock(Vec2::splat(0.5)).confidence, LOCK_BASELINE);
            assert_eq!(h.sample_luma_history(Vec2::splat(0.5)).is_some(), preset.keeps_luma_history());
            assert_eq!(
                matches!(h.previous_motion(), PreviousMotion::Packed(_)),
                preset.packs_dilation()
            );
        }
    }

    #[test]
    fn test_validate_reports_mismatch() {
        let h = History::placeholder(QualityPreset::Balanced, RENDER, DISPLAY, 1.0).unwrap();
        assert!(matches!(
            h.validate(QualityPreset::Performance, RENDER, DISPLAY),
            Err(HistoryMismatch::Preset { .. })
        ));
        assert!(matches!(
            h.validate(QualityPreset::Balanced, UVec2::new(9, 6), DISPLAY),
            Err(HistoryMismatch::RenderExtent { .. })
        ));

        let mut broken = h.clone();
        if let HistoryBuffers::Balanced(s) = &mut broken.buffers {
            s.temporal_reactive = Plane::new(3, 3, 0.0);
        }
        assert_eq!(
            broken.validate(QualityPreset::Balanced, RENDER, DISPLAY),
            Err(HistoryMismatch::BufferExtent {
                buffer: "temporal reactive",
                expected: DISPLAY,
                found: UVec2::new(3, 3),
            })
        );
    }

    #[test]
    fn test_store_invalidates_and_releases() {
        let mut store = HistoryStore::new();
        assert!(!store.retain_valid(QualityPreset::Quality, RENDER, DISPLAY));

        store.commit(History::placeholder(QualityPreset::Quality, RENDER, DISPLAY, 1.0).unwrap());
        assert!(store.retain_valid(QualityPreset::Quality, RENDER, DISPLAY));
        assert!(!store.retain_valid(QualityPreset::UltraPerformance, RENDER, DISPLAY));
        assert!(store.is_empty());
        assert_eq!(store.metrics().invalidations, 1);

        store.commit(History::placeholder(QualityPreset::Quality, RENDER, DISPLAY, 1.0).unwrap());
        store.release();
        store.release();
        assert!(store.is_empty());
        assert_eq!(store.metrics().commits, 2);
        assert_eq!(store.metrics().releases, 1);
        assert_eq!(store.metrics().resident_bytes, 0);
    }

    #[test]
    fn test_acquire_returns_only_valid_history() {
        let mut store = HistoryStore::new();
        assert!(store.acquire(QualityPreset::Balanced, RENDER, DISPLAY).is_none());

        store.commit(History::placeholder(QualityPreset::Balanced, RENDER, DISPLAY, 2.0).unwrap());
        let acquired = store.acquire(QualityPreset::Balanced, RENDER, DISPLAY).unwrap();
        assert_eq!(acquired.pre_exposure, 2.0);
        assert!(store.acquire(QualityPreset::Balanced, RENDER, UVec2::new(16, 12)).is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_resident_bytes_follow_layout() {
        let display = (DISPLAY.x * DISPLAY.y) as usize;
        let render = (RENDER.x * RENDER.y) as usize;
        // lock: two f32 per display texel
        let lock = display * 8;
        let expected = [
            // RGBA16F color, Vec4 luma history, Vec2 motion
            (QualityPreset::Quality, lock + display * 8 + display * 16 + render * 8),
            // packed color, f32 accumulation, Vec2 motion
            (QualityPreset::Balanced, lock + display * 4 + display * 4 + render * 8),
            (QualityPreset::Performance, lock + display * 4 + display * 4 + render * 8),
            // packed color, f32 accumulation, 8-byte packed dilation
            (QualityPreset::UltraPerformance, lock + display * 4 + display * 4 + render * 8),
        ];
        let mut store = HistoryStore::new();
        for (preset, bytes) in expected {
            let h = History::placeholder(preset, RENDER, DISPLAY, 1.0).unwrap();
            assert_eq!(h.resident_bytes(), bytes, "{:?}", preset);
            store.commit(h);
            assert_eq!(store.metrics().resident_bytes, bytes);
        }
        assert!(!store.retain_valid(QualityPreset::Quality, RENDER, DISPLAY));
        assert_eq!(store.metrics().resident_bytes, 0);
    }
}
