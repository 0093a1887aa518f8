//! Durable task queues over the shared broker.
//!
//! A `TaskQueue` is a named handle: the broker connection is created once
//! at process start and injected here, so producers, status readers, and
//! workers all coordinate through the same store without any in-process
//! shared state.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use super::broker::{Broker, BrokerError, QueueCounts};
use super::job::{Job, JobMetadata, JobOutcome, JobPayload, JobState, RetryDecision, RetryPolicy};

/// Default retention cap for completed jobs per queue.
const DEFAULT_KEEP_COMPLETED: usize = 1000;

/// Default retention cap for failed jobs per queue.
const DEFAULT_KEEP_FAILED: usize = 1000;

/// Errors surfaced by queue operations.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error(transparent)]
    Broker(#[from] BrokerError),
}

/// Per-queue submission defaults: retry policy and retention caps.
#[derive(Debug, Clone)]
pub struct QueueOptions {
    pub retry: RetryPolicy,
    pub keep_completed: usize,
    pub keep_failed: usize,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            keep_completed: DEFAULT_KEEP_COMPLETED,
            keep_failed: DEFAULT_KEEP_FAILED,
        }
    }
}

impl QueueOptions {
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_keep_completed(mut self, keep: usize) -> Self {
        self.keep_completed = keep;
        self
    }

    pub fn with_keep_failed(mut self, keep: usize) -> Self {
        self.keep_failed = keep;
        self
    }
}

/// A named, durable FIFO queue of generation jobs.
///
/// Cloning is cheap; clones share the broker connection.
#[derive(Clone)]
pub struct TaskQueue {
    name: String,
    broker: Arc<dyn Broker>,
    options: QueueOptions,
}

impl TaskQueue {
    pub fn new(name: impl Into<String>, broker: Arc<dyn Broker>, options: QueueOptions) -> Self {
        Self {
            name: name.into(),
            broker,
            options,
        }
    }

    /// The queue's name, also its key prefix in the broker.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Appends a new `waiting` job with the queue's default retry policy
    /// and returns its fresh identifier.
    ///
    /// Input validation belongs upstream; by the time a payload reaches
    /// this call it is accepted as-is.
    pub async fn submit(
        &self,
        payload: JobPayload,
        metadata: JobMetadata,
    ) -> Result<Uuid, QueueError> {
        self.submit_with_policy(payload, metadata, self.options.retry.clone())
            .await
    }

    /// Appends a new `waiting` job with an explicit per-submission retry
    /// policy.
    pub async fn submit_with_policy(
        &self,
        payload: JobPayload,
        metadata: JobMetadata,
        retry: RetryPolicy,
    ) -> Result<Uuid, QueueError> {
        let job = Job::new(payload, retry).with_metadata(metadata);
        let id = job.id;

        self.broker.enqueue(&self.name, &job).await?;
        debug!(queue = %self.name, job_id = %id, kind = job.payload.kind(), "job submitted");
        Ok(id)
    }

    /// Read-only snapshot of a job. Returns `None` when the id is unknown
    /// to this queue, so callers can try the next candidate queue.
    pub async fn lookup(&self, id: Uuid) -> Result<Option<Job>, QueueError> {
        Ok(self.broker.fetch(&self.name, id).await?)
    }

    /// Claims the next eligible job, transitioning it to `active`.
    ///
    /// The broker's atomic hand-off guarantees at most one claimer per
    /// job. Blocks up to `wait` when the queue is empty.
    pub async fn claim(&self, wait: Duration) -> Result<Option<Job>, QueueError> {
        let Some(mut job) = self.broker.claim(&self.name, wait).await? else {
            return Ok(None);
        };

        job.state = JobState::Active;
        job.touch();
        self.broker.store(&self.name, &job).await?;
        Ok(Some(job))
    }

    /// Records progress on an active job. Progress is clamped to 0..=100
    /// and never moves backwards within an attempt.
    pub async fn report_progress(&self, job: &mut Job, progress: u8) -> Result<(), QueueError> {
        job.progress = job.progress.max(progress.min(100));
        job.touch();
        Ok(self.broker.store(&self.name, job).await?)
    }

    /// Records a successful outcome, exactly as the processor returned it.
    pub async fn complete(&self, mut job: Job, outcome: JobOutcome) -> Result<(), QueueError> {
        job.state = JobState::Completed;
        job.progress = 100;
        job.outcome = Some(outcome);
        job.failure_reason = None;
        job.touch();
        Ok(self
            .broker
            .finish(&self.name, &job, self.options.keep_completed)
            .await?)
    }

    /// Records a failed attempt and applies the job's retry policy:
    /// either parks the job as `delayed` until its backoff elapses, or
    /// fails it permanently with the given reason.
    pub async fn retire(&self, mut job: Job, error: &str) -> Result<RetryDecision, QueueError> {
        job.attempts_made += 1;
        let decision = job.retry.decide(job.attempts_made);

        match decision {
            RetryDecision::Retry(delay) => {
                job.state = JobState::Delayed;
                job.progress = 0;
                job.touch();
                let until = Utc::now() + chrono::Duration::milliseconds(delay.as_millis() as i64);
                self.broker.defer(&self.name, &job, until).await?;
            }
            RetryDecision::GiveUp => {
                job.state = JobState::Failed;
                job.failure_reason = Some(error.to_string());
                job.outcome = None;
                job.touch();
                self.broker
                    .finish(&self.name, &job, self.options.keep_failed)
                    .await?;
            }
        }

        Ok(decision)
    }

    /// Reclaims jobs stranded on the active list by a crashed worker.
    ///
    /// The interrupted attempt counts as a failure: the job re-enters
    /// `waiting` while its retry budget lasts, and fails permanently
    /// otherwise. Returns how many jobs were requeued.
    pub async fn recover_active(&self) -> Result<usize, QueueError> {
        let stranded = self.broker.recover(&self.name).await?;
        let mut requeued = 0;

        for mut job in stranded {
            job.attempts_made += 1;
            match job.retry.decide(job.attempts_made) {
                RetryDecision::Retry(_) => {
                    warn!(queue = %self.name, job_id = %job.id, "requeueing job from crashed worker");
                    job.state = JobState::Waiting;
                    job.progress = 0;
                    job.touch();
                    self.broker.enqueue(&self.name, &job).await?;
                    requeued += 1;
                }
                RetryDecision::GiveUp => {
                    warn!(queue = %self.name, job_id = %job.id, "abandoning job from crashed worker");
                    job.state = JobState::Failed;
                    job.failure_reason =
                        Some("worker crashed and the retry budget is exhausted".to_string());
                    job.touch();
                    self.broker
                        .finish(&self.name, &job, self.options.keep_failed)
                        .await?;
                }
            }
        }

        Ok(requeued)
    }

    /// Current depth of each lifecycle list.
    pub async fn counts(&self) -> Result<QueueCounts, QueueError> {
        Ok(self.broker.counts(&self.name).await?)
    }
}
