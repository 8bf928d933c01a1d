//! Session-level presentation attack checks.
//!
//! Per-frame liveness only sees the last few frames. Once every sample is in,
//! the whole capture window is examined for patterns a single comparison
//! misses: a replayed clip looping back onto frames already seen, a feed
//! that froze part way, exposure pumping from a display, or a window too
//! short to judge.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use crate::common::config::AntiSpoofingConfig;
use crate::core::frame::{mean_abs_diff, mean_luma, texture_energy, Frame, FrameHistory};

pub const CHECK_FRAME_COUNT: &str = "frame_count";
pub const CHECK_TEMPORAL_MOTION: &str = "temporal_motion";
pub const CHECK_FRAME_REPETITION: &str = "frame_repetition";
pub const CHECK_TEXTURE: &str = "texture_analysis";
pub const CHECK_LUMINANCE: &str = "luminance_stability";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AntiSpoofingResult {
    pub passed: bool,
    pub score: f32,
    pub checks: BTreeSet<String>,
    pub check_scores: BTreeMap<String, f32>,
}

pub trait AntiSpoofingValidator: Send + Sync {
    fn perform_anti_spoofing_checks(&self, frame: &Frame, history: &FrameHistory) -> AntiSpoofingResult;
}

#[derive(Debug, Clone)]
pub struct TemporalSpoofValidator {
    config: AntiSpoofingConfig,
}

impl TemporalSpoofValidator {
    pub fn new(config: AntiSpoofingConfig) -> Self {
        Self { config }
    }
}

impl Default for TemporalSpoofValidator {
    fn default() -> Self {
        Self::new(AntiSpoofingConfig::default())
    }
}

impl AntiSpoofingValidator for TemporalSpoofValidator {
    fn perform_anti_spoofing_checks(&self, frame: &Frame, history: &FrameHistory) -> AntiSpoofingResult {
        let size = self.config.analysis_size;

        // The final frame is normally already the newest history entry
        let mut views: Vec<_> = history.iter().map(|f| f.analysis_view(size)).collect();
        let final_in_history = history
            .latest()
            .map_or(false, |latest| latest.sequence() == frame.sequence());
        if !final_in_history {
            views.push(frame.analysis_view(size));
        }

        let mut check_scores = BTreeMap::new();

        let count_score = (views.len() as f32 / self.config.min_frames as f32).min(1.0);
        check_scores.insert(CHECK_FRAME_COUNT.to_string(), count_score);

        let motion_score = if views.len() < 2 {
            0.0
        } else {
            let moving = views
                .windows(2)
                .filter(|pair| mean_abs_diff(&pair[0], &pair[1]) >= self.config.min_motion)
                .count();
            moving as f32 / (views.len() - 1) as f32
        };
        check_scores.insert(CHECK_TEMPORAL_MOTION.to_string(), motion_score);

        let repetition_score = if views.len() < 2 {
            0.0
        } else {
            let repeated = (1..views.len())
                .filter(|&j| {
                    (0..j).any(|i| mean_abs_diff(&views[i], &views[j]) < self.config.repeat_tolerance)
                })
                .count();
            1.0 - repeated as f32 / (views.len() - 1) as f32
        };
        check_scores.insert(CHECK_FRAME_REPETITION.to_string(), repetition_score);

        let mean_texture = views.iter().map(texture_energy).sum::<f32>() / views.len().max(1) as f32;
        let texture_score = if self.config.min_texture <= 0.0 {
            1.0
        } else {
            (mean_texture / self.config.min_texture).min(1.0)
        };
        check_scores.insert(CHECK_TEXTURE.to_string(), texture_score);

        let luminance_jitter = std_dev(&views.iter().map(mean_luma).collect::<Vec<_>>());
        let luminance_score = if luminance_jitter <= self.config.max_luminance_jitter {
            1.0
        } else {
            self.config.max_luminance_jitter / luminance_jitter
        };
        check_scores.insert(CHECK_LUMINANCE.to_string(), luminance_score);

        let score = check_scores.values().sum::<f32>() / check_scores.len() as f32;
        let weakest = check_scores.values().copied().fold(f32::INFINITY, f32::min);
        let passed = score >= self.config.min_score && weakest >= self.config.check_floor;

        tracing::info!(
            frames = views.len(),
            score,
            weakest,
            passed,
            "anti-spoofing checks complete"
        );
        for (name, value) in &check_scores {
            tracing::debug!(check = %name, score = value, "anti-spoofing check");
        }

        AntiSpoofingResult {
            passed,
            score,
            checks: check_scores.keys().cloned().collect(),
            check_scores,
        }
    }
}

fn std_dev(values: &[f32]) -> f32 {
    if values.len() < 2 {
        return 0.0;
    }
    let mean = values.iter().sum::<f32>() / values.len() as f32;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / values.len() as f32;
    variance.sqrt()
}
