// Core modules
pub mod core;
pub mod camera;
pub mod storage;
pub mod service;
pub mod cli;
pub mod common;

// Re-export commonly used types
pub use common::{CaptureFailure, Config, GateError, Paths, Result};
pub use core::{
    BiometricSample, CaptureHandle, CaptureOrchestrator, CaptureOutcome, CaptureSession, CaptureState,
    EmbeddingAggregator, FaceComparisonResult, FaceEmbeddingResult, Frame, FrameHistory, QualityGate,
    SecurityCheckLedger, SimilarityMatcher, VoterGate, REQUIRED_SAMPLES,
};
pub use camera::ImageDirSource;
pub use storage::{FileTemplateStore, MemoryTemplateStore};
pub use service::ExtractionPool;
