use parking_lot::Mutex;
use crate::common::{Config, GateError, Result};
use crate::core::capabilities::{EmbeddingExtractor, Extraction};
use crate::core::detector::FaceDetector;
use crate::core::frame::Frame;
use crate::core::quality::QualityMetrics;
use crate::core::recognizer::FaceRecognizer;

/// Embedding extractor backed by the ONNX face detector and recognizer.
/// Quality comes from the detection (confidence, size, centering, exposure);
/// landmarks are the detector keypoints when the model provides them.
pub struct OnnxFaceExtractor {
    detector: Mutex<FaceDetector>,
    recognizer: Mutex<FaceRecognizer>,
}

impl OnnxFaceExtractor {
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            detector: Mutex::new(FaceDetector::new(config)?),
            recognizer: Mutex::new(FaceRecognizer::new(config)?),
        })
    }
}

impl EmbeddingExtractor for OnnxFaceExtractor {
    fn extract(&self, frame: &Frame) -> Result<Extraction> {
        let faces = self.detector.lock().detect(frame.image())?;
        let face = faces.into_iter().next().ok_or(GateError::NoFaceDetected)?;

        let metrics = QualityMetrics::calculate(frame.image(), &face);
        if !metrics.meets_minimum_requirements() {
            tracing::debug!(
                frame = frame.sequence(),
                assessment = %metrics.get_quality_assessment(),
                suggestions = ?metrics.get_improvement_suggestions(),
                "low quality capture"
            );
        }

        let embedding = self.recognizer.lock().get_embedding(frame.image(), &face)?;
        if embedding.is_empty() {
            return Err(GateError::Model("recognizer returned an empty embedding".into()));
        }

        Ok(Extraction {
            embedding,
            quality: metrics.overall_score,
            landmarks: face.keypoints,
        })
    }
}
