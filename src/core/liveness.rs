//! Per-frame liveness check.
//!
//! A printed photo or a still image on a screen shows almost no change
//! between frames taken ~800 ms apart, and flat media lose the fine surface
//! texture of a real face. The detector scores both signals on a small
//! downsampled grid so it stays cheap enough to run before every extraction.

use serde::Serialize;
use crate::common::config::LivenessConfig;
use crate::core::frame::{mean_abs_diff, texture_energy, Frame, FrameHistory};

/// How many previous frames the motion signal is compared against.
const MOTION_WINDOW: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LivenessResult {
    pub is_live: bool,
    /// Advisory only; the decision is `is_live`.
    pub confidence: f32,
    pub reason: String,
}

pub trait LivenessDetector: Send + Sync {
    fn detect_liveness(&self, frame: &Frame, history: &FrameHistory) -> LivenessResult;
}

#[derive(Debug, Clone)]
pub struct MotionTextureDetector {
    config: LivenessConfig,
}

impl MotionTextureDetector {
    pub fn new(config: LivenessConfig) -> Self {
        Self { config }
    }
}

impl Default for MotionTextureDetector {
    fn default() -> Self {
        Self::new(LivenessConfig::default())
    }
}

impl LivenessDetector for MotionTextureDetector {
    fn detect_liveness(&self, frame: &Frame, history: &FrameHistory) -> LivenessResult {
        let size = self.config.analysis_size;
        let current = frame.analysis_view(size);
        let texture = texture_energy(&current);

        let diffs: Vec<f32> = history
            .recent(MOTION_WINDOW)
            .map(|previous| mean_abs_diff(&current, &previous.analysis_view(size)))
            .collect();
        let motion = if diffs.is_empty() {
            None
        } else {
            Some(diffs.iter().sum::<f32>() / diffs.len() as f32)
        };

        let texture_score = ratio_score(texture, self.config.min_texture);
        // Without history motion cannot be judged; stay neutral
        let motion_score = motion.map_or(0.5, |m| ratio_score(m, self.config.min_motion));
        let confidence = (texture_score + motion_score) / 2.0;

        tracing::debug!(
            frame = frame.sequence(),
            texture,
            motion = ?motion,
            confidence,
            "liveness signals"
        );

        if texture < self.config.min_texture {
            return LivenessResult {
                is_live: false,
                confidence,
                reason: format!(
                    "insufficient surface texture ({:.2} < {:.2}), possible screen or print",
                    texture, self.config.min_texture
                ),
            };
        }

        if let Some(motion) = motion {
            if motion < self.config.min_motion {
                return LivenessResult {
                    is_live: false,
                    confidence,
                    reason: format!(
                        "no motion between frames ({:.2} < {:.2}), possible static photo",
                        motion, self.config.min_motion
                    ),
                };
            }
        }

        LivenessResult {
            is_live: true,
            confidence,
            reason: "live subject".to_string(),
        }
    }
}

/// Maps a signal onto [0, 1], reaching 1 at twice the threshold.
fn ratio_score(value: f32, threshold: f32) -> f32 {
    if threshold <= 0.0 {
        return 1.0;
    }
    (value / (2.0 * threshold)).clamp(0.0, 1.0)
}
