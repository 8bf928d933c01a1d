use serde::Serialize;
use crate::common::{GateError, Result};
use crate::core::sample::has_magnitude;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FaceComparisonResult {
    /// Cosine similarity mapped onto [0, 1].
    pub similarity: f32,
    /// Distance from the decision boundary, normalised to [0, 1].
    pub confidence: f32,
    pub threshold: f32,
    pub is_match: bool,
}

/// Decides whether a captured embedding belongs to the enrolled identity.
#[derive(Debug, Clone, Copy)]
pub struct SimilarityMatcher {
    threshold: f32,
}

impl SimilarityMatcher {
    pub fn new(threshold: f32) -> Result<Self> {
        if !threshold.is_finite() || !(0.0..=1.0).contains(&threshold) {
            return Err(GateError::Config(format!(
                "Similarity threshold must be between 0.0 and 1.0, got {}", threshold
            )));
        }
        Ok(Self { threshold })
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn compare(&self, candidate: &[f32], enrolled: &[f32]) -> Result<FaceComparisonResult> {
        if candidate.len() != enrolled.len() {
            return Err(GateError::InvalidSample(format!(
                "embedding length mismatch: candidate has {} values, template has {}",
                candidate.len(), enrolled.len()
            )));
        }
        if candidate.is_empty() || !has_magnitude(candidate) || !has_magnitude(enrolled) {
            return Err(GateError::InvalidSample("cannot compare a degenerate embedding".into()));
        }

        let cosine = cosine_similarity(candidate, enrolled).clamp(-1.0, 1.0);
        let similarity = ((cosine + 1.0) / 2.0) as f32;
        let is_match = similarity >= self.threshold;

        Ok(FaceComparisonResult {
            similarity,
            confidence: decision_confidence(similarity, self.threshold),
            threshold: self.threshold,
            is_match,
        })
    }
}

/// Cosine similarity accumulated in f64. Returns 0 when either side has no
/// magnitude.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (&x, &y) in a.iter().zip(b.iter()) {
        let (x, y) = (x as f64, y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    // sqrt of the product keeps self-similarity at exactly 1.0
    dot / (norm_a * norm_b).sqrt()
}

fn decision_confidence(similarity: f32, threshold: f32) -> f32 {
    let room = if similarity >= threshold { 1.0 - threshold } else { threshold };
    if room <= f32::EPSILON {
        return 1.0;
    }
    ((similarity - threshold).abs() / room).clamp(0.0, 1.0)
}
