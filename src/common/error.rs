use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GateError {
    #[error("Camera error: {0}")]
    Camera(String),

    #[error("Model error: {0}")]
    Model(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("No enrolled template for user: {0}")]
    TemplateNotFound(String),

    #[error("No face detected")]
    NoFaceDetected,

    #[error("Invalid biometric data: {0}")]
    InvalidSample(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error(transparent)]
    Capture(#[from] CaptureFailure),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("ORT error: {0}")]
    Ort(#[from] ort::OrtError),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, GateError>;

/// Session-fatal capture failures.
///
/// The `Display` output is the user-facing contract: indices and rounded
/// percentages are embedded in the message and existing UIs match on it.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CaptureFailure {
    #[error("Liveness check failed during capture {sample_index}: {reason}")]
    Liveness { sample_index: usize, reason: String },

    #[error(
        "Sample {sample_index} quality too low ({percentage}%). \
         Please ensure good lighting and clear face visibility."
    )]
    Quality {
        sample_index: usize,
        quality: f32,
        percentage: u32,
    },

    #[error("Security validation failed. Score: {percentage}%")]
    AntiSpoofing { score: f32, percentage: u32 },

    #[error("Embedding extraction timed out after {} ms", .0.as_millis())]
    ExtractionTimeout(Duration),

    #[error("Embedding extraction failed: {0}")]
    Extraction(String),

    #[error("Frame acquisition failed: {0}")]
    FrameSource(String),

    #[error("Template aggregation failed: {0}")]
    Aggregation(String),

    #[error("Capture session was reset")]
    Cancelled,
}

impl CaptureFailure {
    pub fn quality(sample_index: usize, quality: f32) -> Self {
        CaptureFailure::Quality {
            sample_index,
            quality,
            percentage: percent(quality),
        }
    }

    pub fn anti_spoofing(score: f32) -> Self {
        CaptureFailure::AntiSpoofing {
            score,
            percentage: percent(score),
        }
    }
}

/// `round(value * 100)`, halves rounded up.
pub fn percent(value: f32) -> u32 {
    (value * 100.0).round().max(0.0) as u32
}
