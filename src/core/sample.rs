use serde::Serialize;
use crate::common::{GateError, Result};

pub type Embedding = Vec<f32>;

/// One accepted capture: an embedding with its extraction quality and
/// optional facial landmarks. Validated on construction and immutable after.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BiometricSample {
    embedding: Embedding,
    quality: f32,
    landmarks: Option<Vec<f32>>,
}

impl BiometricSample {
    pub fn new(embedding: Embedding, quality: f32, landmarks: Option<Vec<f32>>) -> Result<Self> {
        if embedding.is_empty() {
            return Err(GateError::InvalidSample("embedding is empty".into()));
        }
        if embedding.iter().any(|v| !v.is_finite()) {
            return Err(GateError::InvalidSample("embedding contains non-finite values".into()));
        }
        if !has_magnitude(&embedding) {
            return Err(GateError::InvalidSample("embedding has zero magnitude".into()));
        }
        if !quality.is_finite() || !(0.0..=1.0).contains(&quality) {
            return Err(GateError::InvalidSample(format!(
                "quality must be within [0, 1], got {}", quality
            )));
        }
        if let Some(points) = &landmarks {
            if points.is_empty() {
                return Err(GateError::InvalidSample("landmark vector is empty".into()));
            }
            if points.iter().any(|v| !v.is_finite()) {
                return Err(GateError::InvalidSample("landmarks contain non-finite values".into()));
            }
        }

        Ok(Self { embedding, quality, landmarks })
    }

    pub fn embedding(&self) -> &[f32] {
        &self.embedding
    }

    pub fn quality(&self) -> f32 {
        self.quality
    }

    pub fn landmarks(&self) -> Option<&[f32]> {
        self.landmarks.as_deref()
    }

    pub fn dimension(&self) -> usize {
        self.embedding.len()
    }
}

/// A zero vector has no direction, so cosine similarity is undefined for it.
pub fn has_magnitude(values: &[f32]) -> bool {
    values.iter().any(|&v| v != 0.0)
}
