//! Registration and verification flows built on one capture session.

use serde::Serialize;
use std::sync::Arc;
use crate::common::{Config, Result};
use crate::core::aggregator::FaceEmbeddingResult;
use crate::core::capabilities::{
    AccessibilityAnnouncer, AnnouncementPriority, EmbeddingExtractor, EnrolledTemplateStore, VideoFrameSource,
};
use crate::core::matcher::{FaceComparisonResult, SimilarityMatcher};
use crate::core::orchestrator::{CaptureHandle, CaptureOrchestrator};
use crate::core::receipt::{EligibilityReceipt, ReceiptSigner};
use crate::service::ExtractionPool;

#[derive(Debug, Clone, Serialize)]
pub struct Registration {
    pub user_id: String,
    pub result: FaceEmbeddingResult,
}

#[derive(Debug, Clone, Serialize)]
pub struct Verification {
    pub comparison: FaceComparisonResult,
    pub receipt: EligibilityReceipt,
}

pub struct VoterGate<S: EnrolledTemplateStore> {
    orchestrator: CaptureOrchestrator,
    pool: ExtractionPool,
    matcher: SimilarityMatcher,
    store: S,
    signer: ReceiptSigner,
}

impl<S: EnrolledTemplateStore> VoterGate<S> {
    /// Must be called from within a tokio runtime; the extraction workers are
    /// spawned here.
    pub fn new(config: &Config, extractor: Arc<dyn EmbeddingExtractor>, store: S, signer: ReceiptSigner) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            orchestrator: CaptureOrchestrator::from_config(config),
            pool: ExtractionPool::spawn(extractor, &config.extraction),
            matcher: SimilarityMatcher::new(config.matcher.similarity_threshold)?,
            store,
            signer,
        })
    }

    pub fn with_orchestrator(mut self, orchestrator: CaptureOrchestrator) -> Self {
        self.orchestrator = orchestrator;
        self
    }

    pub fn capture_handle(&self) -> CaptureHandle {
        self.orchestrator.handle()
    }

    pub fn signer(&self) -> &ReceiptSigner {
        &self.signer
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub async fn register(
        &self,
        user_id: &str,
        source: &mut dyn VideoFrameSource,
        announcer: &dyn AccessibilityAnnouncer,
    ) -> Result<Registration> {
        tracing::info!(user = user_id, "starting registration");
        let outcome = self.orchestrator.capture_samples(source, &self.pool, announcer).await?;

        self.store.store(user_id, &outcome.result.embedding)?;
        tracing::info!(
            user = user_id,
            dimension = outcome.result.embedding.len(),
            consistency = outcome.result.consistency,
            "template enrolled"
        );
        announcer.announce("Registration complete", AnnouncementPriority::Polite);

        Ok(Registration { user_id: user_id.to_string(), result: outcome.result })
    }

    /// Fetches the enrolled template before the camera is touched, so an
    /// unknown user never starts a capture.
    pub async fn verify(
        &self,
        user_id: &str,
        challenge: &[u8],
        source: &mut dyn VideoFrameSource,
        announcer: &dyn AccessibilityAnnouncer,
    ) -> Result<Verification> {
        tracing::info!(user = user_id, "starting verification");
        let enrolled = self.store.fetch(user_id)?;

        let outcome = self.orchestrator.capture_samples(source, &self.pool, announcer).await?;
        let comparison = self.matcher.compare(&outcome.result.embedding, &enrolled)?;
        let receipt = self.signer.sign(user_id, &comparison, challenge)?;

        tracing::info!(
            user = user_id,
            similarity = comparison.similarity,
            threshold = comparison.threshold,
            matched = comparison.is_match,
            "verification decided"
        );
        let message = if comparison.is_match { "Identity verified" } else { "Identity could not be verified" };
        let priority = if comparison.is_match { AnnouncementPriority::Polite } else { AnnouncementPriority::Assertive };
        announcer.announce(message, priority);

        Ok(Verification { comparison, receipt })
    }
}
