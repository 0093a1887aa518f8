//! Job definitions for the scheduler.
//!
//! This module defines the core types shared by every queue:
//!
//! - `Job`: a unit of generation work with its lifecycle state
//! - `JobPayload` / `JobOutcome`: the per-kind input and result shapes
//! - `RetryPolicy`: the retry/backoff value object attached at submission

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Default number of attempts (first run + retries) before a job fails.
const DEFAULT_ATTEMPTS_ALLOWED: u32 = 2;

/// Default base delay for exponential backoff between attempts.
const DEFAULT_BASE_DELAY_MS: u64 = 1000;

/// Lifecycle state of a job.
///
/// `Paused` is a queue-wide administrative state; no worker transition
/// produces it, but the wire protocol can render it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Enqueued, not yet claimed by a worker.
    Waiting,
    /// Claimed by exactly one worker, processing in progress.
    Active,
    /// Finished successfully; `outcome` is set.
    Completed,
    /// Retries exhausted; `failure_reason` is set.
    Failed,
    /// Waiting out a backoff delay before re-entering `Waiting`.
    Delayed,
    /// Queue-level administrative hold.
    Paused,
}

impl JobState {
    /// Returns whether this state is terminal (no further transitions).
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobState::Waiting => "waiting",
            JobState::Active => "active",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Delayed => "delayed",
            JobState::Paused => "paused",
        };
        f.write_str(s)
    }
}

/// A word and its translation, as supplied by the caller for context jobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WordPair {
    pub word: String,
    pub translation: String,
}

/// Input for a sentence-batch generation job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentenceRequest {
    /// The word or phrase each sentence must use.
    pub target: String,
    /// Language the sentences are written in.
    pub lang: String,
    /// How many sentences to generate (validated upstream: 1..=20).
    pub count: u32,
    /// Learner proficiency level (e.g. CEFR "B1").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
    /// Language the translations are written in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translation_lang: Option<String>,
}

/// Input for a context-passage generation job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextRequest {
    /// Words the passage must weave together (validated upstream: 3..=5).
    pub words: Vec<WordPair>,
    /// Language the passage is written in.
    pub lang: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translation_lang: Option<String>,
}

/// Kind-specific job input. The tag decides which processing path runs
/// and which result shape comes back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobPayload {
    Sentences(SentenceRequest),
    Context(ContextRequest),
}

impl JobPayload {
    /// Short label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            JobPayload::Sentences(_) => "sentences",
            JobPayload::Context(_) => "context",
        }
    }
}

/// A single generated sentence with its translation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedSentence {
    pub text: String,
    pub translation: String,
}

/// A batch of generated sentences.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentenceBatch {
    pub sentences: Vec<GeneratedSentence>,
}

/// Kind-specific job result, stored verbatim from the processor.
///
/// Serialized untagged so the wire shape matches what pollers expect:
/// a `{"sentences": [...]}` object for sentence batches, a bare
/// `{"text", "translation"}` object for context passages. The two shapes
/// are disjoint, so deserialization is unambiguous.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JobOutcome {
    Sentences(SentenceBatch),
    Context(GeneratedSentence),
}

/// How backoff delays grow between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffKind {
    /// Same delay before every retry.
    Fixed,
    /// Delay doubles after each failed attempt.
    Exponential,
}

/// What the worker should do with a job after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Re-run the job after the given delay.
    Retry(Duration),
    /// Attempts exhausted; the job fails permanently.
    GiveUp,
}

/// Retry policy attached to a job at submission time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts allowed, including the first run.
    pub attempts_allowed: u32,
    pub backoff: BackoffKind,
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts_allowed: DEFAULT_ATTEMPTS_ALLOWED,
            backoff: BackoffKind::Exponential,
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with the given attempt budget and base delay,
    /// using exponential backoff.
    pub fn exponential(attempts_allowed: u32, base_delay: Duration) -> Self {
        Self {
            attempts_allowed,
            backoff: BackoffKind::Exponential,
            base_delay_ms: base_delay.as_millis() as u64,
        }
    }

    /// Creates a fixed-delay policy.
    pub fn fixed(attempts_allowed: u32, delay: Duration) -> Self {
        Self {
            attempts_allowed,
            backoff: BackoffKind::Fixed,
            base_delay_ms: delay.as_millis() as u64,
        }
    }

    /// Pure retry transition: given the number of failed attempts so far
    /// (including the one just recorded), decide whether the job retries
    /// and after how long.
    ///
    /// The first retry waits `base_delay`, the second `base_delay * 2`,
    /// and so on. The shift is capped so pathological attempt counts
    /// cannot overflow the delay.
    pub fn decide(&self, attempts_made: u32) -> RetryDecision {
        if attempts_made >= self.attempts_allowed {
            return RetryDecision::GiveUp;
        }
        let millis = match self.backoff {
            BackoffKind::Fixed => self.base_delay_ms,
            BackoffKind::Exponential => {
                let exp = attempts_made.saturating_sub(1).min(20);
                self.base_delay_ms.saturating_mul(1u64 << exp)
            }
        };
        RetryDecision::Retry(Duration::from_millis(millis))
    }
}

/// Caller-supplied tracking fields carried on the job for log correlation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
}

impl JobMetadata {
    /// Returns `None` when both fields are empty, so the job record stays
    /// free of an all-null metadata object.
    pub fn into_option(self) -> Option<Self> {
        if self.user_id.is_none() && self.trace_id.is_none() {
            None
        } else {
            Some(self)
        }
    }
}

/// A job: one unit of asynchronous generation work.
///
/// The record is the single source of truth for the job's lifecycle; it is
/// stored in the broker and mutated only by the queue's own operations and
/// the one worker holding the claim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Unique within the owning queue for the retention lifetime.
    pub id: Uuid,
    /// Immutable input supplied at submission.
    pub payload: JobPayload,
    pub state: JobState,
    /// 0..=100; monotone within an attempt, reset to 0 on retry.
    pub progress: u8,
    /// Number of failed attempts recorded so far.
    pub attempts_made: u32,
    pub retry: RetryPolicy,
    /// Set exactly when `state` is `Completed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<JobOutcome>,
    /// Set exactly when `state` is `Failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<JobMetadata>,
}

impl Job {
    /// Creates a fresh `waiting` job with a new v4 id.
    pub fn new(payload: JobPayload, retry: RetryPolicy) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            payload,
            state: JobState::Waiting,
            progress: 0,
            attempts_made: 0,
            retry,
            outcome: None,
            failure_reason: None,
            created_at: now,
            updated_at: now,
            metadata: None,
        }
    }

    /// Attaches caller tracking metadata.
    pub fn with_metadata(mut self, metadata: JobMetadata) -> Self {
        self.metadata = metadata.into_option();
        self
    }

    /// Bumps the modification timestamp.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
