//! Normalized status lookup across all queues.
//!
//! Callers poll with a bare job id and no kind hint. Ids are only unique
//! within one queue, so the directory probes every queue in a fixed order
//! and normalizes whatever it finds into a single document shape.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::job::{Job, JobOutcome, JobState};
use super::queue::{QueueError, TaskQueue};

/// Error string returned for ids no queue recognizes.
pub const NOT_FOUND_ERROR: &str = "job not found";

/// Wire-level job state: the lifecycle states plus the synthetic
/// `not_found`, which is a protocol state, not a job state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusState {
    Waiting,
    Active,
    Completed,
    Failed,
    Delayed,
    Paused,
    NotFound,
}

impl From<JobState> for StatusState {
    fn from(state: JobState) -> Self {
        match state {
            JobState::Waiting => StatusState::Waiting,
            JobState::Active => StatusState::Active,
            JobState::Completed => StatusState::Completed,
            JobState::Failed => StatusState::Failed,
            JobState::Delayed => StatusState::Delayed,
            JobState::Paused => StatusState::Paused,
        }
    }
}

/// The normalized status document pollers receive.
///
/// `result` is always present and `null` unless the job completed;
/// `error` appears only for `failed` and `not_found`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatus {
    pub id: String,
    pub state: StatusState,
    pub progress: u8,
    pub result: Option<JobOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobStatus {
    /// Builds the document for a job found in some queue.
    pub fn from_job(job: &Job) -> Self {
        let result = match job.state {
            JobState::Completed => job.outcome.clone(),
            _ => None,
        };
        let error = match job.state {
            JobState::Failed => job.failure_reason.clone(),
            _ => None,
        };

        Self {
            id: job.id.to_string(),
            state: job.state.into(),
            progress: job.progress,
            result,
            error,
        }
    }

    /// Builds the synthetic not-found document, echoing the id as given.
    pub fn not_found(id: &str) -> Self {
        Self {
            id: id.to_string(),
            state: StatusState::NotFound,
            progress: 0,
            result: None,
            error: Some(NOT_FOUND_ERROR.to_string()),
        }
    }

    pub fn is_found(&self) -> bool {
        self.state != StatusState::NotFound
    }
}

/// Ordered set of queue handles a status lookup probes.
///
/// The probe order is part of the protocol contract: queues are tried in
/// the order given at construction ("generate" before "context" in the
/// standard wiring) and the first queue that recognizes the id wins.
#[derive(Clone)]
pub struct StatusDirectory {
    queues: Vec<TaskQueue>,
}

impl StatusDirectory {
    pub fn new(queues: Vec<TaskQueue>) -> Self {
        Self { queues }
    }

    /// Resolves a raw id into a normalized status document.
    ///
    /// A malformed id or an id unknown to every queue both normalize to
    /// the not-found document; neither is treated as an error.
    pub async fn lookup(&self, raw_id: &str) -> Result<JobStatus, QueueError> {
        if let Ok(id) = Uuid::parse_str(raw_id) {
            for queue in &self.queues {
                if let Some(job) = queue.lookup(id).await? {
                    return Ok(JobStatus::from_job(&job));
                }
            }
        }
        Ok(JobStatus::not_found(raw_id))
    }
}
