//! Bounded worker pool in front of the embedding model.
//!
//! Requests are queued on a bounded channel and picked up by a fixed set of
//! worker tasks. Each worker runs the (blocking) extractor on the blocking
//! thread pool and answers on a per-request oneshot channel tagged with the
//! request's correlation id. Callers bound the whole exchange, queueing
//! included, with a timeout.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use crate::common::config::ExtractionConfig;
use crate::common::CaptureFailure;
use crate::core::capabilities::{EmbeddingExtractor, Extraction};
use crate::core::frame::Frame;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExtractionError {
    #[error("extraction timed out after {} ms", .0.as_millis())]
    Timeout(Duration),

    #[error("extractor failed: {0}")]
    Failed(String),

    #[error("extraction pool is shut down")]
    PoolClosed,

    #[error("extraction worker dropped the request")]
    WorkerLost,

    #[error("reply for request {received} delivered to request {expected}")]
    CorrelationMismatch { expected: u64, received: u64 },
}

impl From<ExtractionError> for CaptureFailure {
    fn from(err: ExtractionError) -> Self {
        match err {
            ExtractionError::Timeout(limit) => CaptureFailure::ExtractionTimeout(limit),
            other => CaptureFailure::Extraction(other.to_string()),
        }
    }
}

struct ExtractionJob {
    id: u64,
    frame: Arc<Frame>,
    reply: oneshot::Sender<ExtractionReply>,
}

struct ExtractionReply {
    id: u64,
    result: std::result::Result<Extraction, String>,
}

pub struct ExtractionPool {
    queue: mpsc::Sender<ExtractionJob>,
    next_id: AtomicU64,
    timeout: Duration,
    workers: Vec<JoinHandle<()>>,
}

impl ExtractionPool {
    /// Starts the workers on the current tokio runtime.
    pub fn spawn(extractor: Arc<dyn EmbeddingExtractor>, config: &ExtractionConfig) -> Self {
        let worker_count = config.workers.max(1);
        let (queue, jobs) = mpsc::channel(config.queue_depth.max(1));
        let jobs = Arc::new(Mutex::new(jobs));

        let workers = (0..worker_count)
            .map(|worker| {
                tokio::spawn(run_worker(worker, Arc::clone(&jobs), Arc::clone(&extractor)))
            })
            .collect();

        tracing::info!(
            workers = worker_count,
            queue_depth = config.queue_depth,
            timeout_ms = config.timeout_ms,
            "extraction pool started"
        );

        Self {
            queue,
            next_id: AtomicU64::new(1),
            timeout: config.timeout(),
            workers,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    pub async fn extract(
        &self,
        frame: Arc<Frame>,
    ) -> std::result::Result<Extraction, ExtractionError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        match tokio::time::timeout(self.timeout, self.round_trip(id, frame)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                tracing::warn!(
                    request = id,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "extraction timed out"
                );
                Err(ExtractionError::Timeout(self.timeout))
            }
        }
    }

    async fn round_trip(
        &self,
        id: u64,
        frame: Arc<Frame>,
    ) -> std::result::Result<Extraction, ExtractionError> {
        let (reply, response) = oneshot::channel();
        self.queue
            .send(ExtractionJob { id, frame, reply })
            .await
            .map_err(|_| ExtractionError::PoolClosed)?;

        let answer = response.await.map_err(|_| ExtractionError::WorkerLost)?;
        if answer.id != id {
            return Err(ExtractionError::CorrelationMismatch { expected: id, received: answer.id });
        }
        answer.result.map_err(ExtractionError::Failed)
    }
}

async fn run_worker(
    worker: usize,
    jobs: Arc<Mutex<mpsc::Receiver<ExtractionJob>>>,
    extractor: Arc<dyn EmbeddingExtractor>,
) {
    loop {
        // Only hold the lock while waiting for the next job
        let job = { jobs.lock().await.recv().await };
        let Some(job) = job else {
            tracing::debug!(worker, "extraction queue closed, worker exiting");
            break;
        };

        if job.reply.is_closed() {
            tracing::debug!(worker, request = job.id, "requester gone, skipping extraction");
            continue;
        }

        let model = Arc::clone(&extractor);
        let frame = job.frame;
        let run = move || model.extract(&frame).map_err(|e| e.to_string());
        let result = match tokio::task::spawn_blocking(run).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(worker, request = job.id, "extraction task panicked: {}", e);
                Err(format!("extraction task aborted: {}", e))
            }
        };

        if job.reply.send(ExtractionReply { id: job.id, result }).is_err() {
            tracing::debug!(worker, request = job.id, "requester dropped before reply");
        }
    }
}
