//! Multi-sample capture session.
//!
//! One capture pulls `REQUIRED_SAMPLES` frames spaced at least
//! `MIN_SAMPLE_INTERVAL` apart. Every frame must pass liveness before it is
//! sent for extraction, and every extraction must clear the quality gate.
//! Any failure ends the whole session. Once all samples are in, the full
//! frame window goes through anti-spoofing and the samples are averaged into
//! one template.
//!
//! Session state lives behind a lock shared with [`CaptureHandle`], so a UI
//! can poll progress or reset from another task while a capture runs. Each
//! capture owns a generation number; reset bumps it, and a capture that sees
//! a newer generation stops without touching state again.

use parking_lot::{Mutex, ReentrantMutex};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::watch;
use crate::common::config::{CaptureConfig, Config};
use crate::common::CaptureFailure;
use crate::core::aggregator::{EmbeddingAggregator, FaceEmbeddingResult};
use crate::core::anti_spoofing::{AntiSpoofingResult, AntiSpoofingValidator, TemporalSpoofValidator};
use crate::core::capabilities::{AccessibilityAnnouncer, AnnouncementPriority, VideoFrameSource};
use crate::core::frame::{Frame, FrameHistory};
use crate::core::ledger::{
    CheckStatus, SecurityCheckLedger, CHECK_AGGREGATION, CHECK_ANTI_SPOOFING, CHECK_CAMERA,
    CHECK_EXTRACTION, CHECK_LIVENESS, CHECK_QUALITY,
};
use crate::core::liveness::{LivenessDetector, MotionTextureDetector};
use crate::core::quality::QualityGate;
use crate::core::sample::BiometricSample;
use crate::service::ExtractionPool;

pub const REQUIRED_SAMPLES: usize = 7;

/// Frames closer together than this carry too little temporal diversity for
/// the liveness signals.
pub const MIN_SAMPLE_INTERVAL: Duration = Duration::from_millis(800);

/// Share of the progress bar covered by sample collection; the rest belongs
/// to anti-spoofing and aggregation.
const CAPTURE_PROGRESS: f32 = 80.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureState {
    Idle,
    Capturing,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct CaptureSession {
    pub state: CaptureState,
    pub samples: Vec<BiometricSample>,
    pub required_samples: usize,
    pub progress: f32,
    pub is_capturing: bool,
    pub error: Option<String>,
    pub security_checks: SecurityCheckLedger,
}

impl CaptureSession {
    fn idle() -> Self {
        Self {
            state: CaptureState::Idle,
            samples: Vec::new(),
            required_samples: REQUIRED_SAMPLES,
            progress: 0.0,
            is_capturing: false,
            error: None,
            security_checks: SecurityCheckLedger::new(),
        }
    }
}

/// Everything a completed capture produced.
#[derive(Debug, Clone)]
pub struct CaptureOutcome {
    pub samples: Vec<BiometricSample>,
    pub result: FaceEmbeddingResult,
    pub anti_spoofing: AntiSpoofingResult,
}

struct SessionCell {
    generation: u64,
    session: CaptureSession,
}

struct Shared {
    cell: Mutex<SessionCell>,
    /// Held across a generation check and the announcement that follows it,
    /// and by anything that bumps the generation. Reentrant so an announcer
    /// may reset from inside `announce`.
    announce_gate: ReentrantMutex<()>,
    reset_tx: watch::Sender<u64>,
}

impl Shared {
    fn reset(&self) -> u64 {
        let _quiet = self.announce_gate.lock();
        let mut cell = self.cell.lock();
        cell.generation += 1;
        cell.session = CaptureSession::idle();
        self.reset_tx.send_replace(cell.generation);
        cell.generation
    }
}

/// Cloneable view of a capture session for observers.
#[derive(Clone)]
pub struct CaptureHandle {
    shared: Arc<Shared>,
}

impl CaptureHandle {
    /// Returns the session to idle and stops any running capture. When this
    /// returns, the running capture can no longer change the session.
    pub fn reset_capture(&self) {
        let generation = self.shared.reset();
        tracing::info!(generation, "capture session reset");
    }

    pub fn snapshot(&self) -> CaptureSession {
        self.shared.cell.lock().session.clone()
    }

    pub fn is_capturing(&self) -> bool {
        self.shared.cell.lock().session.is_capturing
    }

    pub fn progress(&self) -> f32 {
        self.shared.cell.lock().session.progress
    }
}

/// Holds the video source for the length of one capture and releases it on
/// every way out, cancellation and unwinding included.
struct DeviceGuard<'a> {
    source: &'a mut dyn VideoFrameSource,
}

impl<'a> DeviceGuard<'a> {
    fn acquire(source: &'a mut dyn VideoFrameSource) -> crate::common::Result<Self> {
        run_blocking(|| source.acquire())?;
        Ok(Self { source })
    }

    fn frame(&mut self) -> crate::common::Result<Frame> {
        run_blocking(|| self.source.current_frame())
    }
}

/// Device I/O blocks (warm-up sleeps, V4L2 dequeue, image decoding). On a
/// multi-threaded runtime the worker is handed off first; a current-thread
/// runtime has nothing to hand off to.
fn run_blocking<T>(f: impl FnOnce() -> T) -> T {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(f)
        }
        _ => f(),
    }
}

impl Drop for DeviceGuard<'_> {
    fn drop(&mut self) {
        self.source.release();
        tracing::debug!("video source released");
    }
}

pub struct CaptureOrchestrator {
    liveness: Arc<dyn LivenessDetector>,
    anti_spoofing: Arc<dyn AntiSpoofingValidator>,
    aggregator: EmbeddingAggregator,
    sample_interval: Duration,
    history_capacity: usize,
    shared: Arc<Shared>,
}

impl CaptureOrchestrator {
    pub fn new(
        liveness: Arc<dyn LivenessDetector>,
        anti_spoofing: Arc<dyn AntiSpoofingValidator>,
        capture: &CaptureConfig,
    ) -> Self {
        let (reset_tx, _) = watch::channel(0);
        Self {
            liveness,
            anti_spoofing,
            aggregator: EmbeddingAggregator::new(),
            sample_interval: capture.sample_interval().max(MIN_SAMPLE_INTERVAL),
            history_capacity: capture.history_capacity.max(REQUIRED_SAMPLES),
            shared: Arc::new(Shared {
                cell: Mutex::new(SessionCell {
                    generation: 0,
                    session: CaptureSession::idle(),
                }),
                announce_gate: ReentrantMutex::new(()),
                reset_tx,
            }),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            Arc::new(MotionTextureDetector::new(config.liveness.clone())),
            Arc::new(TemporalSpoofValidator::new(config.anti_spoofing.clone())),
            &config.capture,
        )
    }

    pub fn handle(&self) -> CaptureHandle {
        CaptureHandle { shared: Arc::clone(&self.shared) }
    }

    pub fn reset_capture(&self) {
        self.handle().reset_capture();
    }

    pub fn session(&self) -> CaptureSession {
        self.handle().snapshot()
    }

    pub fn sample_interval(&self) -> Duration {
        self.sample_interval
    }

    /// Runs one complete capture. Starting while another capture is running
    /// resets that one first; it then ends with [`CaptureFailure::Cancelled`].
    pub async fn capture_samples(
        &self,
        source: &mut dyn VideoFrameSource,
        pool: &ExtractionPool,
        announcer: &dyn AccessibilityAnnouncer,
    ) -> Result<CaptureOutcome, CaptureFailure> {
        let (generation, mut resets) = self.begin();
        tracing::info!(generation, required = REQUIRED_SAMPLES, "capture session started");

        self.mark(generation, CHECK_CAMERA, CheckStatus::Checking)?;
        let mut device = match DeviceGuard::acquire(source) {
            Ok(device) => device,
            Err(e) => {
                let failure = CaptureFailure::FrameSource(e.to_string());
                return Err(self.fail(generation, Some(CHECK_CAMERA), failure, announcer));
            }
        };
        self.mark(generation, CHECK_CAMERA, CheckStatus::Passed)?;

        let mut history = FrameHistory::new(self.history_capacity);
        let mut samples: Vec<BiometricSample> = Vec::with_capacity(REQUIRED_SAMPLES);
        let mut landmark_len: Option<usize> = None;

        for index in 1..=REQUIRED_SAMPLES {
            self.interruptible(&mut resets, generation, tokio::time::sleep(self.sample_interval))
                .await?;

            let frame = match device.frame() {
                Ok(frame) => Arc::new(frame),
                Err(e) => {
                    let failure = CaptureFailure::FrameSource(e.to_string());
                    return Err(self.fail(generation, None, failure, announcer));
                }
            };

            self.mark(generation, CHECK_LIVENESS, CheckStatus::Checking)?;
            let liveness = self.liveness.detect_liveness(&frame, &history);
            history.push(Arc::clone(&frame));
            tracing::debug!(
                sample = index,
                frame = frame.sequence(),
                live = liveness.is_live,
                confidence = liveness.confidence,
                "liveness evaluated"
            );
            if !liveness.is_live {
                let failure =
                    CaptureFailure::Liveness { sample_index: index, reason: liveness.reason };
                return Err(self.fail(generation, Some(CHECK_LIVENESS), failure, announcer));
            }

            self.mark(generation, CHECK_EXTRACTION, CheckStatus::Checking)?;
            let extraction = match self
                .interruptible(&mut resets, generation, pool.extract(Arc::clone(&frame)))
                .await?
            {
                Ok(extraction) => extraction,
                Err(e) => {
                    return Err(self.fail(generation, Some(CHECK_EXTRACTION), e.into(), announcer))
                }
            };

            let sample = match BiometricSample::new(
                extraction.embedding,
                extraction.quality,
                extraction.landmarks,
            ) {
                Ok(sample) => sample,
                Err(e) => {
                    let failure = CaptureFailure::Extraction(e.to_string());
                    return Err(self.fail(generation, Some(CHECK_EXTRACTION), failure, announcer));
                }
            };
            if let Some(first) = samples.first() {
                if first.dimension() != sample.dimension() {
                    let failure = CaptureFailure::Extraction(format!(
                        "embedding dimension changed from {} to {} at sample {}",
                        first.dimension(), sample.dimension(), index
                    ));
                    return Err(self.fail(generation, Some(CHECK_EXTRACTION), failure, announcer));
                }
            }
            if let Some(points) = sample.landmarks() {
                match landmark_len {
                    Some(expected) if expected != points.len() => {
                        let failure = CaptureFailure::Extraction(format!(
                            "landmark count changed from {} to {} at sample {}",
                            expected, points.len(), index
                        ));
                        return Err(self.fail(
                            generation,
                            Some(CHECK_EXTRACTION),
                            failure,
                            announcer,
                        ));
                    }
                    Some(_) => {}
                    None => landmark_len = Some(points.len()),
                }
            }

            self.mark(generation, CHECK_QUALITY, CheckStatus::Checking)?;
            if !QualityGate::accept(sample.quality()) {
                let failure = CaptureFailure::quality(index, sample.quality());
                return Err(self.fail(generation, Some(CHECK_QUALITY), failure, announcer));
            }

            self.commit_sample(generation, index, sample.clone())?;
            samples.push(sample);
            let text = format!("Captured sample {} of {}", index, REQUIRED_SAMPLES);
            let polite = AnnouncementPriority::Polite;
            if !self.announce_if_current(generation, announcer, &text, polite) {
                return Err(CaptureFailure::Cancelled);
            }
        }

        for check in [CHECK_LIVENESS, CHECK_EXTRACTION, CHECK_QUALITY] {
            self.mark(generation, check, CheckStatus::Passed)?;
        }

        self.mark(generation, CHECK_ANTI_SPOOFING, CheckStatus::Checking)?;
        let Some(final_frame) = history.latest().cloned() else {
            let failure = CaptureFailure::FrameSource("no frames captured".into());
            return Err(self.fail(generation, Some(CHECK_ANTI_SPOOFING), failure, announcer));
        };
        let anti_spoofing = self.anti_spoofing.perform_anti_spoofing_checks(&final_frame, &history);
        if !anti_spoofing.passed {
            let failure = CaptureFailure::anti_spoofing(anti_spoofing.score);
            return Err(self.fail(generation, Some(CHECK_ANTI_SPOOFING), failure, announcer));
        }
        self.mark(generation, CHECK_ANTI_SPOOFING, CheckStatus::Passed)?;

        self.mark(generation, CHECK_AGGREGATION, CheckStatus::Checking)?;
        let result = match self.aggregator.process_captures(&samples) {
            Ok(result) => result,
            Err(e) => {
                let failure = CaptureFailure::Aggregation(e.to_string());
                return Err(self.fail(generation, Some(CHECK_AGGREGATION), failure, announcer));
            }
        };

        drop(history);
        drop(device);
        self.complete(generation)?;

        tracing::info!(
            generation,
            samples = samples.len(),
            quality = result.quality,
            anti_spoofing_score = anti_spoofing.score,
            "capture session completed"
        );
        // A reset after completion only clears the session; the outcome stands
        let _ = self.announce_if_current(
            generation,
            announcer,
            "Face capture complete",
            AnnouncementPriority::Polite,
        );

        Ok(CaptureOutcome { samples, result, anti_spoofing })
    }

    fn begin(&self) -> (u64, watch::Receiver<u64>) {
        let _quiet = self.shared.announce_gate.lock();
        let mut cell = self.shared.cell.lock();
        if cell.session.is_capturing {
            tracing::warn!(generation = cell.generation, "superseding active capture session");
        }
        cell.generation += 1;
        cell.session = CaptureSession::idle();
        cell.session.state = CaptureState::Capturing;
        cell.session.is_capturing = true;
        self.shared.reset_tx.send_replace(cell.generation);
        (cell.generation, self.shared.reset_tx.subscribe())
    }

    /// Awaits `work` unless the session is reset first.
    async fn interruptible<F: Future>(
        &self,
        resets: &mut watch::Receiver<u64>,
        generation: u64,
        work: F,
    ) -> Result<F::Output, CaptureFailure> {
        let output = tokio::select! {
            biased;
            _ = superseded(resets, generation) => {
                tracing::info!(generation, "capture interrupted by reset");
                return Err(CaptureFailure::Cancelled);
            }
            output = work => output,
        };
        self.ensure_current(generation)?;
        Ok(output)
    }

    fn ensure_current(&self, generation: u64) -> Result<(), CaptureFailure> {
        if self.shared.cell.lock().generation != generation {
            return Err(CaptureFailure::Cancelled);
        }
        Ok(())
    }

    /// Announces only while `generation` is still the live session. Returns
    /// false, saying nothing, once a reset or a newer capture has taken over.
    fn announce_if_current(
        &self,
        generation: u64,
        announcer: &dyn AccessibilityAnnouncer,
        text: &str,
        priority: AnnouncementPriority,
    ) -> bool {
        let _gate = self.shared.announce_gate.lock();
        if self.shared.cell.lock().generation != generation {
            tracing::debug!(generation, "dropping announcement from superseded capture: {}", text);
            return false;
        }
        announcer.announce(text, priority);
        true
    }

    fn mark(
        &self,
        generation: u64,
        check: &str,
        status: CheckStatus,
    ) -> Result<(), CaptureFailure> {
        let mut cell = self.shared.cell.lock();
        if cell.generation != generation {
            return Err(CaptureFailure::Cancelled);
        }
        cell.session.security_checks.advance(check, status);
        Ok(())
    }

    fn commit_sample(
        &self,
        generation: u64,
        index: usize,
        sample: BiometricSample,
    ) -> Result<(), CaptureFailure> {
        let mut cell = self.shared.cell.lock();
        if cell.generation != generation {
            return Err(CaptureFailure::Cancelled);
        }
        let session = &mut cell.session;
        session.samples.push(sample);
        let progress = index as f32 / session.required_samples as f32 * CAPTURE_PROGRESS;
        session.progress = session.progress.max(progress);
        tracing::debug!(sample = index, progress = session.progress, "sample accepted");
        Ok(())
    }

    fn complete(&self, generation: u64) -> Result<(), CaptureFailure> {
        let mut cell = self.shared.cell.lock();
        if cell.generation != generation {
            return Err(CaptureFailure::Cancelled);
        }
        let session = &mut cell.session;
        session.security_checks.advance(CHECK_AGGREGATION, CheckStatus::Passed);
        session.state = CaptureState::Completed;
        session.samples.clear();
        session.progress = 100.0;
        session.is_capturing = false;
        session.error = None;
        Ok(())
    }

    /// Records a session-fatal failure and returns it. A capture that has been
    /// superseded gets `Cancelled` back and leaves the session alone.
    fn fail(
        &self,
        generation: u64,
        check: Option<&str>,
        failure: CaptureFailure,
        announcer: &dyn AccessibilityAnnouncer,
    ) -> CaptureFailure {
        {
            let mut cell = self.shared.cell.lock();
            if cell.generation != generation {
                return CaptureFailure::Cancelled;
            }
            let session = &mut cell.session;
            session.state = CaptureState::Failed;
            session.samples.clear();
            session.progress = 0.0;
            session.is_capturing = false;
            session.error = Some(failure.to_string());
            if let Some(check) = check {
                session.security_checks.advance(check, CheckStatus::Failed);
            }
        }

        tracing::warn!(generation, "capture failed: {}", failure);
        let _ = self.announce_if_current(
            generation,
            announcer,
            &failure.to_string(),
            AnnouncementPriority::Assertive,
        );
        failure
    }
}

async fn superseded(resets: &mut watch::Receiver<u64>, generation: u64) {
    loop {
        if *resets.borrow_and_update() != generation {
            return;
        }
        if resets.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_session_is_idle() {
        let orchestrator = CaptureOrchestrator::from_config(&Config::default());
        let session = orchestrator.session();
        assert_eq!(session.state, CaptureState::Idle);
        assert_eq!(session.required_samples, 7);
        assert_eq!(session.progress, 0.0);
        assert!(!session.is_capturing);
        assert!(session.samples.is_empty());
    }

    #[test]
    fn reset_from_idle_is_harmless() {
        let orchestrator = CaptureOrchestrator::from_config(&Config::default());
        orchestrator.reset_capture();
        orchestrator.reset_capture();
        assert_eq!(orchestrator.session().state, CaptureState::Idle);
    }

    #[test]
    fn interval_never_drops_below_minimum() {
        let capture = CaptureConfig { sample_interval_ms: 100, history_capacity: 3 };
        let orchestrator = CaptureOrchestrator::new(
            Arc::new(MotionTextureDetector::default()),
            Arc::new(TemporalSpoofValidator::default()),
            &capture,
        );
        assert_eq!(orchestrator.sample_interval(), MIN_SAMPLE_INTERVAL);
        assert_eq!(orchestrator.history_capacity, REQUIRED_SAMPLES);
    }

    #[test]
    fn stale_generation_cannot_fail_the_session() {
        let orchestrator = CaptureOrchestrator::from_config(&Config::default());
        let (generation, _resets) = orchestrator.begin();
        orchestrator.reset_capture();

        let failure = orchestrator.fail(
            generation,
            Some(CHECK_QUALITY),
            CaptureFailure::quality(2, 0.4),
            &crate::core::capabilities::SilentAnnouncer,
        );
        assert_eq!(failure, CaptureFailure::Cancelled);
        let session = orchestrator.session();
        assert_eq!(session.state, CaptureState::Idle);
        assert!(session.error.is_none());
        assert_eq!(session.security_checks.status(CHECK_QUALITY), Some(CheckStatus::Pending));
    }

    #[test]
    fn progress_tracks_accepted_samples() {
        let orchestrator = CaptureOrchestrator::from_config(&Config::default());
        let (generation, _resets) = orchestrator.begin();
        let sample = BiometricSample::new(vec![1.0, 0.0], 0.9, None).unwrap();

        orchestrator.commit_sample(generation, 1, sample.clone()).unwrap();
        assert!((orchestrator.handle().progress() - 80.0 / 7.0).abs() < 1e-4);

        for index in 2..=7 {
            orchestrator.commit_sample(generation, index, sample.clone()).unwrap();
        }
        assert!((orchestrator.handle().progress() - 80.0).abs() < 1e-4);
        assert_eq!(orchestrator.session().samples.len(), 7);
    }

    #[test]
    fn superseded_capture_announces_nothing() {
        struct Counting(std::sync::atomic::AtomicUsize);
        impl AccessibilityAnnouncer for Counting {
            fn announce(&self, _text: &str, _priority: AnnouncementPriority) {
                self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            }
        }

        let orchestrator = CaptureOrchestrator::from_config(&Config::default());
        let announcer = Counting(Default::default());
        let (generation, _resets) = orchestrator.begin();
        let sample = BiometricSample::new(vec![1.0, 0.0], 0.9, None).unwrap();
        orchestrator.commit_sample(generation, 1, sample).unwrap();

        // Reset lands between the commit and its announcement
        orchestrator.reset_capture();
        let spoken = orchestrator.announce_if_current(
            generation,
            &announcer,
            "Captured sample 1 of 7",
            AnnouncementPriority::Polite,
        );
        assert!(!spoken);
        assert_eq!(announcer.0.load(std::sync::atomic::Ordering::SeqCst), 0);

        let (current, _resets) = orchestrator.begin();
        assert!(orchestrator.announce_if_current(current, &announcer, "hello", AnnouncementPriority::Polite));
        assert_eq!(announcer.0.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn blocking_device_calls_free_the_worker() {
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::time::Instant;

        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        tokio::spawn(async move { flag.store(true, Ordering::SeqCst) });

        // With the only worker blocked in place, the spawned task can still run
        let seen = run_blocking(|| {
            let deadline = Instant::now() + Duration::from_secs(2);
            while !ran.load(Ordering::SeqCst) && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(5));
            }
            ran.load(Ordering::SeqCst)
        });
        assert!(seen);
    }

    #[tokio::test]
    async fn blocking_device_calls_run_inline_on_current_thread() {
        assert_eq!(run_blocking(|| 7), 7);
    }
}
