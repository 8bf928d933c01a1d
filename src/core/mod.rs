pub mod aggregator;
pub mod anti_spoofing;
pub mod capabilities;
pub mod detector;
pub mod extractor;
pub mod frame;
pub mod gate;
pub mod ledger;
pub mod liveness;
pub mod matcher;
pub mod orchestrator;
pub mod quality;
pub mod receipt;
pub mod recognizer;
pub mod sample;

pub use aggregator::{EmbeddingAggregator, FaceEmbeddingResult};
pub use anti_spoofing::{AntiSpoofingResult, AntiSpoofingValidator, TemporalSpoofValidator};
pub use capabilities::{
    AccessibilityAnnouncer, AnnouncementPriority, EmbeddingExtractor, EnrolledTemplateStore, Extraction,
    SilentAnnouncer, VideoFrameSource,
};
pub use extractor::OnnxFaceExtractor;
pub use frame::{Frame, FrameHistory};
pub use gate::{Registration, Verification, VoterGate};
pub use ledger::{CheckStatus, SecurityCheck, SecurityCheckLedger};
pub use liveness::{LivenessDetector, LivenessResult, MotionTextureDetector};
pub use matcher::{FaceComparisonResult, SimilarityMatcher};
pub use orchestrator::{
    CaptureHandle, CaptureOrchestrator, CaptureOutcome, CaptureSession, CaptureState, MIN_SAMPLE_INTERVAL,
    REQUIRED_SAMPLES,
};
pub use quality::{QualityGate, QualityMetrics};
pub use receipt::{EligibilityReceipt, ReceiptSigner};
pub use sample::{BiometricSample, Embedding};
