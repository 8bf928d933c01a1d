//! Capabilities the capture pipeline consumes but does not own: the video
//! device, the embedding model, the accessibility layer and template
//! persistence.

use serde::Serialize;
use std::sync::Arc;
use crate::common::Result;
use crate::core::frame::Frame;
use crate::core::sample::Embedding;

/// Raw output of the embedding model for one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub embedding: Embedding,
    pub quality: f32,
    pub landmarks: Option<Vec<f32>>,
}

/// Exclusively owned video device. `acquire` is called once before a
/// capture, `release` exactly once after it, whatever the outcome.
pub trait VideoFrameSource: Send {
    fn acquire(&mut self) -> Result<()>;
    fn current_frame(&mut self) -> Result<Frame>;
    fn release(&mut self);
}

/// The ML model boundary. Implementations may block; callers run them on
/// the blocking pool.
pub trait EmbeddingExtractor: Send + Sync {
    fn extract(&self, frame: &Frame) -> Result<Extraction>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AnnouncementPriority {
    Polite,
    Assertive,
}

/// Fire-and-forget screen reader notifications.
pub trait AccessibilityAnnouncer: Send + Sync {
    fn announce(&self, text: &str, priority: AnnouncementPriority);
}

/// Announcer that drops every message.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentAnnouncer;

impl AccessibilityAnnouncer for SilentAnnouncer {
    fn announce(&self, _text: &str, _priority: AnnouncementPriority) {}
}

pub trait EnrolledTemplateStore: Send + Sync {
    fn fetch(&self, user_id: &str) -> Result<Embedding>;
    fn store(&self, user_id: &str, embedding: &[f32]) -> Result<()>;
}

impl<T: EnrolledTemplateStore + ?Sized> EnrolledTemplateStore for Arc<T> {
    fn fetch(&self, user_id: &str) -> Result<Embedding> {
        (**self).fetch(user_id)
    }

    fn store(&self, user_id: &str, embedding: &[f32]) -> Result<()> {
        (**self).store(user_id, embedding)
    }
}
