#![allow(dead_code)]

use image::{GrayImage, Luma};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use votergate::common::{GateError, Result};
use votergate::core::anti_spoofing::{AntiSpoofingResult, AntiSpoofingValidator};
use votergate::core::capabilities::{
    AccessibilityAnnouncer, AnnouncementPriority, EmbeddingExtractor, Extraction, VideoFrameSource,
};
use votergate::core::liveness::{LivenessDetector, LivenessResult};
use votergate::core::{CaptureHandle, Frame, FrameHistory};

/// 128x128 checkerboard with 16 px squares, shifted right by `shift` pixels.
pub fn checkerboard(shift: u32) -> GrayImage {
    GrayImage::from_fn(128, 128, |x, y| {
        if ((x + shift) / 16 + y / 16) % 2 == 0 { Luma([220]) } else { Luma([20]) }
    })
}

#[derive(Default)]
pub struct SourceCounters {
    pub acquired: AtomicUsize,
    pub frames: AtomicUsize,
    pub released: AtomicUsize,
}

impl SourceCounters {
    pub fn acquired(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }

    pub fn frames(&self) -> usize {
        self.frames.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

/// Frame source producing a slowly moving checkerboard, like a subject
/// shifting in front of the camera.
pub struct MovingSource {
    pub counters: Arc<SourceCounters>,
    step: u32,
    fail_acquire: bool,
}

impl MovingSource {
    pub fn new() -> Self {
        Self { counters: Arc::default(), step: 4, fail_acquire: false }
    }

    /// Every frame identical, as from a printed photo.
    pub fn frozen() -> Self {
        Self { step: 0, ..Self::new() }
    }

    pub fn unavailable() -> Self {
        Self { fail_acquire: true, ..Self::new() }
    }
}

impl VideoFrameSource for MovingSource {
    fn acquire(&mut self) -> Result<()> {
        if self.fail_acquire {
            return Err(GateError::Camera("device busy".into()));
        }
        self.counters.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn current_frame(&mut self) -> Result<Frame> {
        let n = self.counters.frames.fetch_add(1, Ordering::SeqCst) as u32 + 1;
        Ok(Frame::new(n as u64, checkerboard(n * self.step)))
    }

    fn release(&mut self) {
        self.counters.released.fetch_add(1, Ordering::SeqCst);
    }
}

/// Extractor returning `base` nudged by the call number, with scripted
/// qualities (0.9 once the script runs out). Individual samples (1-based) can
/// be given an exact embedding, and every sample can carry scripted landmarks.
pub struct ScriptedExtractor {
    base: Vec<f32>,
    qualities: Vec<f32>,
    embeddings: Vec<(usize, Vec<f32>)>,
    landmarks: Vec<Option<Vec<f32>>>,
    delay: Duration,
    pub calls: AtomicUsize,
}

impl ScriptedExtractor {
    pub fn new(base: Vec<f32>) -> Self {
        Self {
            base,
            qualities: Vec::new(),
            embeddings: Vec::new(),
            landmarks: Vec::new(),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_qualities(mut self, qualities: Vec<f32>) -> Self {
        self.qualities = qualities;
        self
    }

    pub fn with_embedding_at(mut self, sample: usize, embedding: Vec<f32>) -> Self {
        self.embeddings.push((sample, embedding));
        self
    }

    /// Landmarks per call; `None` once the script runs out.
    pub fn with_landmarks(mut self, landmarks: Vec<Option<Vec<f32>>>) -> Self {
        self.landmarks = landmarks;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl EmbeddingExtractor for ScriptedExtractor {
    fn extract(&self, _frame: &Frame) -> Result<Extraction> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        let embedding = match self.embeddings.iter().find(|(sample, _)| *sample == call + 1) {
            Some((_, exact)) => exact.clone(),
            None => {
                let mut nudged = self.base.clone();
                nudged.push((call + 1) as f32 * 0.001);
                nudged
            }
        };
        Ok(Extraction {
            embedding,
            quality: self.qualities.get(call).copied().unwrap_or(0.9),
            landmarks: self.landmarks.get(call).cloned().flatten(),
        })
    }
}

/// Liveness verdicts in call order; live once the script runs out.
pub struct ScriptedLiveness {
    verdicts: Vec<bool>,
    calls: AtomicUsize,
}

impl ScriptedLiveness {
    pub fn new(verdicts: Vec<bool>) -> Self {
        Self { verdicts, calls: AtomicUsize::new(0) }
    }

    pub fn always_live() -> Self {
        Self::new(Vec::new())
    }
}

impl LivenessDetector for ScriptedLiveness {
    fn detect_liveness(&self, _frame: &Frame, _history: &FrameHistory) -> LivenessResult {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let is_live = self.verdicts.get(call).copied().unwrap_or(true);
        LivenessResult {
            is_live,
            confidence: if is_live { 0.95 } else { 0.1 },
            reason: if is_live { "live subject".into() } else { "static image detected".into() },
        }
    }
}

pub struct FixedSpoofCheck {
    pub passed: bool,
    pub score: f32,
    pub frames_seen: AtomicUsize,
}

impl FixedSpoofCheck {
    pub fn new(passed: bool, score: f32) -> Self {
        Self { passed, score, frames_seen: AtomicUsize::new(0) }
    }
}

impl AntiSpoofingValidator for FixedSpoofCheck {
    fn perform_anti_spoofing_checks(&self, _frame: &Frame, history: &FrameHistory) -> AntiSpoofingResult {
        self.frames_seen.store(history.len(), Ordering::SeqCst);
        AntiSpoofingResult {
            passed: self.passed,
            score: self.score,
            checks: ["scripted".to_string()].into_iter().collect(),
            check_scores: Default::default(),
        }
    }
}

/// Records every announcement together with the session progress at the time.
#[derive(Default)]
pub struct RecordingAnnouncer {
    handle: Option<CaptureHandle>,
    pub messages: Mutex<Vec<(String, AnnouncementPriority, f32)>>,
}

impl RecordingAnnouncer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn watching(handle: CaptureHandle) -> Self {
        Self { handle: Some(handle), messages: Mutex::new(Vec::new()) }
    }

    pub fn texts(&self) -> Vec<String> {
        self.messages.lock().iter().map(|(text, _, _)| text.clone()).collect()
    }

    pub fn assertive(&self) -> Vec<String> {
        self.messages
            .lock()
            .iter()
            .filter(|(_, priority, _)| *priority == AnnouncementPriority::Assertive)
            .map(|(text, _, _)| text.clone())
            .collect()
    }
}

impl AccessibilityAnnouncer for RecordingAnnouncer {
    fn announce(&self, text: &str, priority: AnnouncementPriority) {
        let progress = self.handle.as_ref().map_or(0.0, |h| h.progress());
        self.messages.lock().push((text.to_string(), priority, progress));
    }
}
