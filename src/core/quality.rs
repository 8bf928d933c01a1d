use crate::core::detector::FaceBox;
use crate::core::matcher::cosine_similarity;
use crate::core::sample::Embedding;
use image::GrayImage;

/// Minimum per-sample quality a capture must reach to be kept. This is a
/// security parameter and deliberately not part of the runtime config.
pub const MIN_SAMPLE_QUALITY: f32 = 0.6;

/// Pass/fail gate on a single sample's quality score.
#[derive(Debug, Clone, Copy, Default)]
pub struct QualityGate;

impl QualityGate {
    pub fn accept(quality: f32) -> bool {
        quality >= MIN_SAMPLE_QUALITY
    }
}

#[derive(Debug, Clone)]
pub struct QualityMetrics {
    pub detection_confidence: f32,
    pub face_size_ratio: f32,
    pub face_centering_score: f32,
    pub brightness_score: f32,
    pub contrast_score: f32,
    pub overall_score: f32,
}

impl QualityMetrics {
    /// Calculate quality metrics for a detected face
    pub fn calculate(image: &GrayImage, face: &FaceBox) -> Self {
        let detection_confidence = face.confidence.clamp(0.0, 1.0);

        // How much of the frame the face occupies
        let img_width = image.width() as f32;
        let img_height = image.height() as f32;
        let face_area = (face.x2 - face.x1).max(0.0) * (face.y2 - face.y1).max(0.0);
        let image_area = (img_width * img_height).max(1.0);
        let face_size_ratio = (face_area / image_area).min(1.0);

        // How centered the face is
        let img_center_x = (img_width / 2.0).max(1.0);
        let img_center_y = (img_height / 2.0).max(1.0);
        let face_center_x = (face.x1 + face.x2) / 2.0;
        let face_center_y = (face.y1 + face.y2) / 2.0;
        let x_offset = ((face_center_x - img_center_x).abs() / img_center_x).min(1.0);
        let y_offset = ((face_center_y - img_center_y).abs() / img_center_y).min(1.0);
        let face_centering_score = 1.0 - (x_offset + y_offset) / 2.0;

        let (brightness_score, contrast_score) = region_exposure(image, face);

        let overall_score = (detection_confidence * 0.3
            + face_size_ratio * 0.2
            + face_centering_score * 0.2
            + brightness_score * 0.15
            + contrast_score * 0.15)
            .clamp(0.0, 1.0);

        QualityMetrics {
            detection_confidence,
            face_size_ratio,
            face_centering_score,
            brightness_score,
            contrast_score,
            overall_score,
        }
    }

    pub fn meets_minimum_requirements(&self) -> bool {
        QualityGate::accept(self.overall_score)
    }

    pub fn get_quality_assessment(&self) -> String {
        let quality_level = if self.overall_score >= 0.8 {
            "Excellent"
        } else if self.overall_score >= 0.7 {
            "Good"
        } else if self.overall_score >= MIN_SAMPLE_QUALITY {
            "Acceptable"
        } else if self.overall_score >= 0.5 {
            "Poor"
        } else {
            "Very Poor"
        };

        format!("Quality: {} (score: {:.2})", quality_level, self.overall_score)
    }

    pub fn get_improvement_suggestions(&self) -> Vec<String> {
        let mut suggestions = Vec::new();

        if self.detection_confidence < 0.7 {
            suggestions.push("Move closer to the camera for better face detection".to_string());
        }

        if self.face_size_ratio < 0.1 {
            suggestions.push("Face is too small - move closer to the camera".to_string());
        } else if self.face_size_ratio > 0.5 {
            suggestions.push("Face is too large - move back from the camera".to_string());
        }

        if self.face_centering_score < 0.7 {
            suggestions.push("Center your face in the camera view".to_string());
        }

        if self.brightness_score < 0.5 {
            suggestions.push("Increase lighting - the image is too dark".to_string());
        } else if self.brightness_score > 0.9 {
            suggestions.push("Reduce lighting - the image is too bright".to_string());
        }

        if self.contrast_score < 0.5 {
            suggestions.push("Improve lighting conditions for better contrast".to_string());
        }

        suggestions
    }
}

/// Diversity score of a set of embeddings from one person.
///
/// Enrolment wants controlled variation: captures that are nearly identical
/// (a frozen feed) or wildly different (several people) both score low.
pub fn calculate_embedding_consistency(embeddings: &[Embedding]) -> f32 {
    if embeddings.len() < 2 {
        return 0.8;
    }

    let mut similarities = Vec::new();
    for i in 0..embeddings.len() {
        for j in i + 1..embeddings.len() {
            similarities.push(cosine_similarity(&embeddings[i], &embeddings[j]) as f32);
        }
    }

    let avg_similarity = similarities.iter().sum::<f32>() / similarities.len() as f32;
    let variance = similarities
        .iter()
        .map(|s| (s - avg_similarity).powi(2))
        .sum::<f32>()
        / similarities.len() as f32;

    // Ideal: 0.75-0.90 pairwise similarity with small but present spread
    let ideal_similarity = 0.82;
    let ideal_variance = 0.005;

    let similarity_score = 1.0 - (avg_similarity - ideal_similarity).abs() * 2.0;
    let variance_score = if variance < 0.001 || variance > 0.02 {
        0.7
    } else {
        1.0 - (variance - ideal_variance).abs() * 10.0
    };

    (similarity_score * 0.7 + variance_score * 0.3).clamp(0.0, 1.0)
}

fn region_exposure(image: &GrayImage, face: &FaceBox) -> (f32, f32) {
    let x1 = face.x1.max(0.0) as u32;
    let y1 = face.y1.max(0.0) as u32;
    let x2 = face.x2.min(image.width() as f32).max(0.0) as u32;
    let y2 = face.y2.min(image.height() as f32).max(0.0) as u32;

    if x2 <= x1 || y2 <= y1 {
        return (0.5, 0.5);
    }

    let mut sum = 0u64;
    let mut sum_sq = 0u64;
    let mut count = 0u64;
    for y in y1..y2 {
        for x in x1..x2 {
            let pixel = image.get_pixel(x, y)[0] as u64;
            sum += pixel;
            sum_sq += pixel * pixel;
            count += 1;
        }
    }

    let mean = sum as f32 / count as f32;
    let variance = (sum_sq as f32 / count as f32 - mean * mean).max(0.0);
    let std_dev = variance.sqrt();

    // Ideal mean is mid-grey; 64 levels of spread is treated as full contrast
    let brightness_score = 1.0 - ((mean - 127.5).abs() / 127.5).min(1.0);
    let contrast_score = (std_dev / 64.0).min(1.0);

    (brightness_score, contrast_score)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    #[test]
    fn gate_boundary_is_inclusive() {
        assert!(QualityGate::accept(0.6));
        assert!(QualityGate::accept(1.0));
        assert!(!QualityGate::accept(0.59));
        assert!(!QualityGate::accept(0.54));
    }

    #[test]
    fn centered_high_contrast_face_scores_well() {
        let image = GrayImage::from_fn(200, 200, |x, y| {
            if (x / 10 + y / 10) % 2 == 0 { Luma([200]) } else { Luma([55]) }
        });
        let face = FaceBox::new(50.0, 50.0, 150.0, 150.0, 0.95);
        let metrics = QualityMetrics::calculate(&image, &face);
        assert!(metrics.face_centering_score > 0.99);
        assert!(metrics.contrast_score > 0.99);
        assert!(metrics.meets_minimum_requirements());
    }

    #[test]
    fn dark_off_center_face_gets_suggestions() {
        let image = GrayImage::from_pixel(200, 200, Luma([5]));
        let face = FaceBox::new(0.0, 0.0, 20.0, 20.0, 0.4);
        let metrics = QualityMetrics::calculate(&image, &face);
        assert!(!metrics.meets_minimum_requirements());
        let suggestions = metrics.get_improvement_suggestions();
        assert!(suggestions.iter().any(|s| s.contains("too dark")));
        assert!(suggestions.iter().any(|s| s.contains("Center your face")));
        assert!(metrics.get_quality_assessment().contains("Very Poor"));
    }

    #[test]
    fn identical_embeddings_are_penalised_for_no_variation() {
        let embeddings = vec![vec![1.0, 0.0, 0.0]; 4];
        let score = calculate_embedding_consistency(&embeddings);
        assert!(score < 0.9);
    }

    #[test]
    fn single_embedding_gets_default_consistency() {
        assert!((calculate_embedding_consistency(&[vec![1.0, 2.0]]) - 0.8).abs() < 1e-6);
    }
}
