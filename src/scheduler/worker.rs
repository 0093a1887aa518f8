//! Workers that process jobs from a queue.
//!
//! A `WorkerPool` spawns a configurable number of workers against one
//! queue. Each worker is an independent async task that claims jobs one
//! at a time, runs the processing function, and records the outcome.
//! Horizontal scaling is just more workers (or more processes) competing
//! for the same queue; the broker's atomic claim keeps them disjoint.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::generation::Processor;

use super::job::{Job, RetryDecision};
use super::queue::{QueueError, TaskQueue};

/// Progress reported right after a claim, so pollers can tell "picked up"
/// from "still queued".
pub const CLAIMED_PROGRESS: u8 = 5;

/// Errors that can occur in the worker pool.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("pool is already running")]
    AlreadyRunning,

    #[error("pool is not running")]
    NotRunning,

    #[error("shutdown timed out after {0:?}")]
    ShutdownTimeout(Duration),
}

/// Configuration for a worker pool.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Number of worker tasks to spawn.
    pub num_workers: usize,
    /// How long a claim blocks waiting for work before re-checking shutdown.
    pub poll_interval: Duration,
    /// Maximum time allowed for one processing attempt; overruns count as
    /// attempt failures and feed the retry policy.
    pub job_timeout: Duration,
    /// Timeout for graceful shutdown.
    pub shutdown_timeout: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            num_workers: 1,
            poll_interval: Duration::from_secs(1),
            job_timeout: Duration::from_secs(120),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl WorkerPoolConfig {
    /// Creates a configuration with the specified number of workers.
    pub fn new(num_workers: usize) -> Self {
        Self {
            num_workers,
            ..Default::default()
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = timeout;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

/// Point-in-time statistics about a worker pool.
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    pub num_workers: usize,
    pub active_workers: usize,
    pub jobs_completed: u64,
    pub jobs_failed: u64,
    pub average_job_duration: Duration,
}

impl PoolStats {
    pub fn total_processed(&self) -> u64 {
        self.jobs_completed + self.jobs_failed
    }
}

/// Shared counters the workers update as they go.
struct SharedPoolStats {
    jobs_completed: AtomicU64,
    jobs_failed: AtomicU64,
    total_duration_ms: AtomicU64,
    active_workers: AtomicU64,
}

impl SharedPoolStats {
    fn new() -> Self {
        Self {
            jobs_completed: AtomicU64::new(0),
            jobs_failed: AtomicU64::new(0),
            total_duration_ms: AtomicU64::new(0),
            active_workers: AtomicU64::new(0),
        }
    }

    fn record_completion(&self, duration: Duration) {
        self.jobs_completed.fetch_add(1, Ordering::SeqCst);
        self.total_duration_ms
            .fetch_add(duration.as_millis() as u64, Ordering::SeqCst);
    }

    fn record_failure(&self, duration: Duration) {
        self.jobs_failed.fetch_add(1, Ordering::SeqCst);
        self.total_duration_ms
            .fetch_add(duration.as_millis() as u64, Ordering::SeqCst);
    }

    fn increment_active(&self) {
        self.active_workers.fetch_add(1, Ordering::SeqCst);
    }

    fn decrement_active(&self) {
        self.active_workers.fetch_sub(1, Ordering::SeqCst);
    }

    fn to_pool_stats(&self, num_workers: usize) -> PoolStats {
        let completed = self.jobs_completed.load(Ordering::SeqCst);
        let failed = self.jobs_failed.load(Ordering::SeqCst);
        let total_duration_ms = self.total_duration_ms.load(Ordering::SeqCst);
        let active = self.active_workers.load(Ordering::SeqCst);

        let total = completed + failed;
        let average_job_duration = if total > 0 {
            Duration::from_millis(total_duration_ms / total)
        } else {
            Duration::ZERO
        };

        PoolStats {
            num_workers,
            active_workers: active as usize,
            jobs_completed: completed,
            jobs_failed: failed,
            average_job_duration,
        }
    }
}

/// Pool of workers bound to one queue and one processing function.
pub struct WorkerPool {
    config: WorkerPoolConfig,
    queue: TaskQueue,
    processor: Arc<dyn Processor>,
    shutdown_tx: broadcast::Sender<()>,
    worker_handles: Vec<JoinHandle<()>>,
    stats: Arc<SharedPoolStats>,
    is_running: AtomicBool,
}

impl WorkerPool {
    /// Creates a pool over an injected queue handle and processor.
    pub fn new(config: WorkerPoolConfig, queue: TaskQueue, processor: Arc<dyn Processor>) -> Self {
        // Buffer of 1 is enough: the signal is sent once.
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            queue,
            processor,
            shutdown_tx,
            worker_handles: Vec::new(),
            stats: Arc::new(SharedPoolStats::new()),
            is_running: AtomicBool::new(false),
        }
    }

    /// Starts all workers. Jobs stranded by a previous crashed run are
    /// reclaimed first, so they re-enter the queue before consumption
    /// begins.
    pub async fn start(&mut self) -> Result<(), PoolError> {
        if self.is_running.load(Ordering::SeqCst) {
            return Err(PoolError::AlreadyRunning);
        }

        match self.queue.recover_active().await {
            Ok(0) => {}
            Ok(requeued) => {
                info!(queue = %self.queue.name(), requeued, "reclaimed jobs from a previous run");
            }
            Err(e) => {
                warn!(queue = %self.queue.name(), error = %e, "failed to reclaim stranded jobs");
            }
        }

        if let Ok(counts) = self.queue.counts().await {
            debug!(
                queue = %self.queue.name(),
                waiting = counts.waiting,
                delayed = counts.delayed,
                "queue depth at startup"
            );
        }

        for i in 0..self.config.num_workers {
            let worker = Worker {
                id: format!("{}-worker-{}", self.queue.name(), i),
                queue: self.queue.clone(),
                processor: Arc::clone(&self.processor),
                shutdown_rx: self.shutdown_tx.subscribe(),
                poll_interval: self.config.poll_interval,
                job_timeout: self.config.job_timeout,
                stats: Arc::clone(&self.stats),
            };

            self.worker_handles.push(tokio::spawn(worker.run()));
        }

        self.is_running.store(true, Ordering::SeqCst);
        info!(
            queue = %self.queue.name(),
            num_workers = self.config.num_workers,
            "worker pool started"
        );
        Ok(())
    }

    /// Gracefully shuts down all workers; each finishes its in-flight job
    /// before exiting.
    pub async fn shutdown(&mut self) -> Result<(), PoolError> {
        if !self.is_running.load(Ordering::SeqCst) {
            return Err(PoolError::NotRunning);
        }

        info!(queue = %self.queue.name(), "shutting down worker pool");

        // Workers may already be gone; the send error is irrelevant.
        let _ = self.shutdown_tx.send(());

        let drain = async {
            for handle in self.worker_handles.drain(..) {
                if let Err(e) = handle.await {
                    error!(error = %e, "worker task panicked during shutdown");
                }
            }
        };

        match tokio::time::timeout(self.config.shutdown_timeout, drain).await {
            Ok(()) => {
                self.is_running.store(false, Ordering::SeqCst);
                info!(queue = %self.queue.name(), "worker pool stopped");
                Ok(())
            }
            Err(_) => {
                self.is_running.store(false, Ordering::SeqCst);
                Err(PoolError::ShutdownTimeout(self.config.shutdown_timeout))
            }
        }
    }

    pub fn stats(&self) -> PoolStats {
        self.stats.to_pool_stats(self.config.num_workers)
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }
}

/// A single worker task.
struct Worker {
    id: String,
    queue: TaskQueue,
    processor: Arc<dyn Processor>,
    shutdown_rx: broadcast::Receiver<()>,
    poll_interval: Duration,
    job_timeout: Duration,
    stats: Arc<SharedPoolStats>,
}

impl Worker {
    /// Main loop: claim, process, repeat until shutdown.
    async fn run(mut self) {
        info!(worker_id = %self.id, "worker started");

        loop {
            match self.shutdown_rx.try_recv() {
                Ok(()) | Err(broadcast::error::TryRecvError::Closed) => {
                    info!(worker_id = %self.id, "worker received shutdown signal");
                    break;
                }
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(broadcast::error::TryRecvError::Empty) => {}
            }

            match self.queue.claim(self.poll_interval).await {
                Ok(Some(job)) => self.process_job(job).await,
                Ok(None) => {
                    // Claim already waited poll_interval; loop around.
                    debug!(worker_id = %self.id, "no jobs available");
                }
                Err(e) => {
                    error!(worker_id = %self.id, error = %e, "failed to claim a job");
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }

        info!(worker_id = %self.id, "worker stopped");
    }

    async fn process_job(&self, mut job: Job) {
        let job_id = job.id;
        let user_id = job
            .metadata
            .as_ref()
            .and_then(|m| m.user_id.clone())
            .unwrap_or_default();
        let started = Instant::now();

        info!(
            worker_id = %self.id,
            job_id = %job_id,
            kind = job.payload.kind(),
            attempt = job.attempts_made + 1,
            user_id = %user_id,
            "processing job"
        );

        self.stats.increment_active();

        if let Err(e) = self.queue.report_progress(&mut job, CLAIMED_PROGRESS).await {
            warn!(worker_id = %self.id, job_id = %job_id, error = %e, "failed to report progress");
        }

        let attempt = tokio::time::timeout(self.job_timeout, self.processor.process(&job.payload));
        let result = attempt.await;
        let duration = started.elapsed();

        self.stats.decrement_active();

        match result {
            Ok(Ok(outcome)) => {
                if let Err(e) = self.queue.complete(job, outcome).await {
                    error!(worker_id = %self.id, job_id = %job_id, error = %e, "failed to record completion");
                    return;
                }
                self.stats.record_completion(duration);
                info!(
                    worker_id = %self.id,
                    job_id = %job_id,
                    duration_ms = duration.as_millis() as u64,
                    "job completed"
                );
            }
            Ok(Err(e)) => {
                self.fail_attempt(job, &e.to_string(), duration).await;
            }
            Err(_) => {
                let reason = format!("generation timed out after {:?}", self.job_timeout);
                self.fail_attempt(job, &reason, duration).await;
            }
        }
    }

    async fn fail_attempt(&self, job: Job, reason: &str, duration: Duration) {
        let job_id = job.id;
        self.stats.record_failure(duration);

        match self.queue.retire(job, reason).await {
            Ok(RetryDecision::Retry(delay)) => {
                warn!(
                    worker_id = %self.id,
                    job_id = %job_id,
                    error = %reason,
                    retry_in_ms = delay.as_millis() as u64,
                    "attempt failed, job scheduled for retry"
                );
            }
            Ok(RetryDecision::GiveUp) => {
                error!(
                    worker_id = %self.id,
                    job_id = %job_id,
                    error = %reason,
                    "attempts exhausted, job failed"
                );
            }
            Err(e) => {
                error!(worker_id = %self.id, job_id = %job_id, error = %e, "failed to record attempt failure");
            }
        }
    }
}
