//! Job queues and workers over a shared durable broker.
//!
//! This module is the systems core of the service: producers enqueue
//! generation jobs, workers consume them, and pollers read normalized
//! status documents, all coordinated through the broker.
//!
//! # Architecture
//!
//! ```text
//!   ┌────────────┐  submit   ┌─────────────┐  claim   ┌──────────┐
//!   │ Producer   ├──────────▶│   Broker    │◀─────────┤ Worker   │
//!   │ (HTTP API) │           │ (Redis /    │          │ pool per │
//!   └────────────┘           │  in-memory) │          │ queue    │
//!   ┌────────────┐  lookup   │             │          └──────────┘
//!   │ Status API ├──────────▶│ generate /  │
//!   │ (polling)  │           │ context     │
//!   └────────────┘           └─────────────┘
//! ```
//!
//! One `TaskQueue` exists per job kind. Job ids are only unique within a
//! queue, so the `StatusDirectory` probes all queues in a fixed order.
//!
//! # Reliability
//!
//! - Claims are atomic list moves; no two workers process the same job.
//! - Failed attempts retry with exponential backoff until the job's
//!   attempt budget runs out, then the job fails with the last error.
//! - Jobs stranded by a crashed worker are reclaimed at pool startup.
//! - Terminal jobs are retained up to a per-queue cap, oldest first out.

pub mod broker;
pub mod job;
pub mod queue;
pub mod status;
pub mod worker;

/// Queue name for sentence-batch generation jobs.
pub const GENERATE_QUEUE: &str = "generate";

/// Queue name for context-passage generation jobs.
pub const CONTEXT_QUEUE: &str = "context";

pub use broker::{Broker, BrokerError, MemoryBroker, QueueCounts, RedisBroker};
pub use job::{
    BackoffKind, ContextRequest, GeneratedSentence, Job, JobMetadata, JobOutcome, JobPayload,
    JobState, RetryDecision, RetryPolicy, SentenceBatch, SentenceRequest, WordPair,
};
pub use queue::{QueueError, QueueOptions, TaskQueue};
pub use status::{JobStatus, StatusDirectory, StatusState, NOT_FOUND_ERROR};
pub use worker::{PoolError, PoolStats, WorkerPool, WorkerPoolConfig, CLAIMED_PROGRESS};
