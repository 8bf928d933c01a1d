use ndarray::{Array2, Axis};
use serde::Serialize;
use crate::common::{GateError, Result};
use crate::core::quality::calculate_embedding_consistency;
use crate::core::sample::{has_magnitude, BiometricSample, Embedding};

/// Single template built from every accepted sample of a session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FaceEmbeddingResult {
    pub embedding: Embedding,
    pub landmarks: Option<Vec<f32>>,
    /// Mean sample quality; diagnostic only, never re-gates acceptance.
    pub quality: f32,
    pub sample_count: usize,
    pub consistency: f32,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EmbeddingAggregator;

impl EmbeddingAggregator {
    pub fn new() -> Self {
        Self
    }

    pub fn process_captures(&self, samples: &[BiometricSample]) -> Result<FaceEmbeddingResult> {
        if samples.is_empty() {
            return Err(GateError::InvalidSample("no samples to aggregate".into()));
        }

        let embeddings: Vec<&[f32]> = samples.iter().map(|s| s.embedding()).collect();
        let embedding = elementwise_mean(&embeddings)
            .map_err(|dims| GateError::InvalidSample(format!(
                "embedding dimensions differ across samples: {:?}", dims
            )))?;
        // Opposing samples can cancel out; such a template could never be matched
        if !has_magnitude(&embedding) {
            return Err(GateError::InvalidSample("averaged embedding has zero magnitude".into()));
        }

        let landmark_sets: Vec<&[f32]> = samples.iter().filter_map(|s| s.landmarks()).collect();
        let landmarks = if landmark_sets.is_empty() {
            None
        } else {
            Some(elementwise_mean(&landmark_sets).map_err(|dims| GateError::InvalidSample(format!(
                "landmark dimensions differ across samples: {:?}", dims
            )))?)
        };

        let quality = samples.iter().map(|s| s.quality()).sum::<f32>() / samples.len() as f32;

        let owned: Vec<Embedding> = embeddings.iter().map(|e| e.to_vec()).collect();
        let consistency = calculate_embedding_consistency(&owned);

        tracing::debug!(
            samples = samples.len(),
            dimension = embedding.len(),
            has_landmarks = landmarks.is_some(),
            quality,
            consistency,
            "aggregated capture samples"
        );

        Ok(FaceEmbeddingResult {
            embedding,
            landmarks,
            quality,
            sample_count: samples.len(),
            consistency,
        })
    }
}

/// Column-wise mean of equally sized rows. On a length mismatch the distinct
/// lengths are returned as the error.
fn elementwise_mean(rows: &[&[f32]]) -> std::result::Result<Vec<f32>, Vec<usize>> {
    let width = rows[0].len();
    if rows.iter().any(|row| row.len() != width) {
        let mut dims: Vec<usize> = rows.iter().map(|row| row.len()).collect();
        dims.sort_unstable();
        dims.dedup();
        return Err(dims);
    }

    let flat: Vec<f32> = rows.iter().flat_map(|row| row.iter().copied()).collect();
    let matrix = Array2::from_shape_vec((rows.len(), width), flat).map_err(|_| vec![width])?;
    matrix
        .mean_axis(Axis(0))
        .map(|mean| mean.to_vec())
        .ok_or_else(|| vec![width])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(embedding: Vec<f32>, quality: f32, landmarks: Option<Vec<f32>>) -> BiometricSample {
        BiometricSample::new(embedding, quality, landmarks).unwrap()
    }

    #[test]
    fn averages_embeddings_elementwise() {
        let result = EmbeddingAggregator::new()
            .process_captures(&[sample(vec![1.0, 0.0], 0.9, None), sample(vec![0.0, 1.0], 0.9, None)])
            .unwrap();
        assert_eq!(result.embedding, vec![0.5, 0.5]);
        assert_eq!(result.sample_count, 2);
    }

    #[test]
    fn averages_quality() {
        let result = EmbeddingAggregator::new()
            .process_captures(&[
                sample(vec![1.0], 0.6, None),
                sample(vec![1.0], 0.8, None),
                sample(vec![1.0], 1.0, None),
            ])
            .unwrap();
        assert!((result.quality - 0.8).abs() < 1e-6);
    }

    #[test]
    fn landmarks_absent_when_no_sample_has_them() {
        let result = EmbeddingAggregator::new()
            .process_captures(&[sample(vec![1.0], 0.9, None), sample(vec![2.0], 0.9, None)])
            .unwrap();
        assert!(result.landmarks.is_none());
    }

    #[test]
    fn landmarks_average_only_carrying_samples() {
        let result = EmbeddingAggregator::new()
            .process_captures(&[
                sample(vec![1.0], 0.9, Some(vec![2.0, 4.0])),
                sample(vec![1.0], 0.9, None),
                sample(vec![1.0], 0.9, Some(vec![4.0, 8.0])),
            ])
            .unwrap();
        assert_eq!(result.landmarks, Some(vec![3.0, 6.0]));
    }

    #[test]
    fn mismatched_landmark_lengths_fail_loudly() {
        let err = EmbeddingAggregator::new()
            .process_captures(&[
                sample(vec![1.0], 0.9, Some(vec![1.0, 2.0])),
                sample(vec![1.0], 0.9, Some(vec![1.0, 2.0, 3.0])),
            ])
            .unwrap_err();
        assert!(err.to_string().contains("landmark dimensions differ"));
    }

    #[test]
    fn mismatched_embedding_lengths_are_rejected() {
        let err = EmbeddingAggregator::new()
            .process_captures(&[sample(vec![1.0, 0.0], 0.9, None), sample(vec![1.0], 0.9, None)])
            .unwrap_err();
        assert!(err.to_string().contains("embedding dimensions differ"));
    }

    #[test]
    fn cancelling_samples_are_rejected() {
        let err = EmbeddingAggregator::new()
            .process_captures(&[sample(vec![1.0, 0.0], 0.9, None), sample(vec![-1.0, 0.0], 0.9, None)])
            .unwrap_err();
        assert!(err.to_string().contains("averaged embedding has zero magnitude"));
    }

    #[test]
    fn empty_input_is_rejected() {
        assert!(EmbeddingAggregator::new().process_captures(&[]).is_err());
    }
}
