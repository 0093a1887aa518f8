//! Broker backends for the job queues.
//!
//! The broker is the durable, ordered store every queue and worker
//! coordinates through. One connection is created at process start and
//! injected into each queue handle; nothing else holds mutable state.
//!
//! Two implementations are provided:
//!
//! - `RedisBroker`: the production backend. Per queue it keeps `waiting`
//!   and `active` id lists (claims use BRPOPLPUSH so a job moves to exactly
//!   one worker atomically), a `delayed` sorted set scored by eligibility
//!   time, capped `completed`/`failed` id lists for retention, and one JSON
//!   record key per job.
//! - `MemoryBroker`: a mutex-guarded in-process twin with the same
//!   semantics, used by tests and brokerless development runs.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use thiserror::Error;
use uuid::Uuid;

use super::job::{Job, JobState};

/// TTL safety net on terminal job records, on top of the count-based
/// retention cap.
const TERMINAL_RECORD_TTL_SECS: u64 = 604_800; // 7 days

/// Sleep step while the in-memory claim waits for work.
const MEMORY_CLAIM_POLL: Duration = Duration::from_millis(5);

/// Errors surfaced by broker operations.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// Failed to establish the broker connection.
    #[error("broker connection failed: {0}")]
    ConnectionFailed(String),

    /// A Redis command failed.
    #[error("broker operation failed: {0}")]
    Redis(#[from] redis::RedisError),

    /// A job record could not be (de)serialized.
    #[error("job record serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Per-queue depth counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueCounts {
    pub waiting: usize,
    pub active: usize,
    pub delayed: usize,
    pub completed: usize,
    pub failed: usize,
}

/// Storage operations the queues need from a broker.
///
/// Implementations must guarantee that `claim` hands each waiting job to
/// at most one caller; everything else is plain record I/O.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Persists a fresh job record and appends its id to the waiting list.
    async fn enqueue(&self, queue: &str, job: &Job) -> Result<(), BrokerError>;

    /// Promotes due delayed jobs, then atomically moves one waiting id onto
    /// the active list and returns its record. Blocks up to `wait` when the
    /// queue is empty.
    async fn claim(&self, queue: &str, wait: Duration) -> Result<Option<Job>, BrokerError>;

    /// Read-only snapshot of a job record.
    async fn fetch(&self, queue: &str, id: Uuid) -> Result<Option<Job>, BrokerError>;

    /// Overwrites the record of a live (non-terminal) job.
    async fn store(&self, queue: &str, job: &Job) -> Result<(), BrokerError>;

    /// Moves an active job onto the delayed set; it becomes claimable once
    /// `until` has passed.
    async fn defer(&self, queue: &str, job: &Job, until: DateTime<Utc>)
        -> Result<(), BrokerError>;

    /// Records a terminal job: removes it from the active list, writes the
    /// final record, and appends its id to the matching terminal list,
    /// evicting the oldest records beyond `keep`.
    async fn finish(&self, queue: &str, job: &Job, keep: usize) -> Result<(), BrokerError>;

    /// Drains the active list and returns the stranded records. Called at
    /// worker startup to reclaim jobs whose worker crashed mid-attempt.
    async fn recover(&self, queue: &str) -> Result<Vec<Job>, BrokerError>;

    /// Current depth of each list for this queue.
    async fn counts(&self, queue: &str) -> Result<QueueCounts, BrokerError>;
}

/// Redis-backed broker using a shared `ConnectionManager`.
#[derive(Clone)]
pub struct RedisBroker {
    /// Handles reconnection automatically; cloned per operation.
    redis: ConnectionManager,
}

impl RedisBroker {
    /// Connects to Redis at the given URL.
    pub async fn connect(redis_url: &str) -> Result<Self, BrokerError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| BrokerError::ConnectionFailed(e.to_string()))?;

        let redis = ConnectionManager::new(client)
            .await
            .map_err(|e| BrokerError::ConnectionFailed(e.to_string()))?;

        Ok(Self { redis })
    }

    /// Wraps an existing connection manager.
    ///
    /// Useful when the connection is shared with other components.
    pub fn from_connection(redis: ConnectionManager) -> Self {
        Self { redis }
    }

    fn waiting_key(queue: &str) -> String {
        format!("{}:waiting", queue)
    }

    fn active_key(queue: &str) -> String {
        format!("{}:active", queue)
    }

    fn delayed_key(queue: &str) -> String {
        format!("{}:delayed", queue)
    }

    fn terminal_key(queue: &str, state: JobState) -> String {
        match state {
            JobState::Completed => format!("{}:completed", queue),
            _ => format!("{}:failed", queue),
        }
    }

    fn record_key(queue: &str, id: &str) -> String {
        format!("{}:job:{}", queue, id)
    }

    async fn fetch_by_str(&self, queue: &str, id: &str) -> Result<Option<Job>, BrokerError> {
        let mut conn = self.redis.clone();
        let data: Option<String> = conn.get(Self::record_key(queue, id)).await?;
        match data {
            Some(s) => Ok(Some(serde_json::from_str(&s)?)),
            None => Ok(None),
        }
    }

    /// Moves every delayed job whose eligibility time has passed back onto
    /// the waiting list, ahead of fresh submissions.
    async fn promote_due(&self, queue: &str) -> Result<(), BrokerError> {
        let mut conn = self.redis.clone();
        let delayed_key = Self::delayed_key(queue);
        let now_ms = Utc::now().timestamp_millis();

        let due: Vec<String> = conn.zrangebyscore(&delayed_key, 0i64, now_ms).await?;
        for id in due {
            // Only the remover gets to requeue; a competing worker may have
            // promoted this id already.
            let removed: i64 = conn.zrem(&delayed_key, &id).await?;
            if removed == 0 {
                continue;
            }

            if let Some(mut job) = self.fetch_by_str(queue, &id).await? {
                job.state = JobState::Waiting;
                job.touch();
                let payload = serde_json::to_string(&job)?;
                conn.set::<_, _, ()>(Self::record_key(queue, &id), payload)
                    .await?;
            }

            conn.rpush::<_, _, ()>(Self::waiting_key(queue), &id).await?;
        }

        Ok(())
    }
}

#[async_trait]
impl Broker for RedisBroker {
    async fn enqueue(&self, queue: &str, job: &Job) -> Result<(), BrokerError> {
        let mut conn = self.redis.clone();
        let id = job.id.to_string();
        let payload = serde_json::to_string(job)?;

        conn.set::<_, _, ()>(Self::record_key(queue, &id), payload)
            .await?;
        conn.lpush::<_, _, ()>(Self::waiting_key(queue), &id).await?;
        Ok(())
    }

    async fn claim(&self, queue: &str, wait: Duration) -> Result<Option<Job>, BrokerError> {
        self.promote_due(queue).await?;

        let mut conn = self.redis.clone();
        let wait_secs = wait.as_secs().max(1) as usize;

        // BRPOPLPUSH atomically pops the oldest waiting id and parks it on
        // the active list, so exactly one worker can hold a given job.
        let id: Option<String> = redis::cmd("BRPOPLPUSH")
            .arg(Self::waiting_key(queue))
            .arg(Self::active_key(queue))
            .arg(wait_secs)
            .query_async(&mut conn)
            .await?;

        let Some(id) = id else {
            return Ok(None);
        };

        match self.fetch_by_str(queue, &id).await? {
            Some(job) => Ok(Some(job)),
            None => {
                // Record vanished (evicted or corrupt); drop the orphan id.
                conn.lrem::<_, _, ()>(Self::active_key(queue), 1, &id)
                    .await?;
                Ok(None)
            }
        }
    }

    async fn fetch(&self, queue: &str, id: Uuid) -> Result<Option<Job>, BrokerError> {
        self.fetch_by_str(queue, &id.to_string()).await
    }

    async fn store(&self, queue: &str, job: &Job) -> Result<(), BrokerError> {
        let mut conn = self.redis.clone();
        let payload = serde_json::to_string(job)?;
        conn.set::<_, _, ()>(Self::record_key(queue, &job.id.to_string()), payload)
            .await?;
        Ok(())
    }

    async fn defer(
        &self,
        queue: &str,
        job: &Job,
        until: DateTime<Utc>,
    ) -> Result<(), BrokerError> {
        let mut conn = self.redis.clone();
        let id = job.id.to_string();
        let payload = serde_json::to_string(job)?;

        conn.lrem::<_, _, ()>(Self::active_key(queue), 1, &id)
            .await?;
        conn.set::<_, _, ()>(Self::record_key(queue, &id), payload)
            .await?;
        conn.zadd::<_, _, _, ()>(Self::delayed_key(queue), &id, until.timestamp_millis())
            .await?;
        Ok(())
    }

    async fn finish(&self, queue: &str, job: &Job, keep: usize) -> Result<(), BrokerError> {
        let mut conn = self.redis.clone();
        let id = job.id.to_string();
        let payload = serde_json::to_string(job)?;

        conn.lrem::<_, _, ()>(Self::active_key(queue), 1, &id)
            .await?;
        conn.set_ex::<_, _, ()>(
            Self::record_key(queue, &id),
            payload,
            TERMINAL_RECORD_TTL_SECS,
        )
        .await?;

        if keep == 0 {
            conn.del::<_, ()>(Self::record_key(queue, &id)).await?;
            return Ok(());
        }

        let terminal_key = Self::terminal_key(queue, job.state);
        conn.lpush::<_, _, ()>(&terminal_key, &id).await?;

        // Evict the oldest terminal records beyond the cap.
        let evicted: Vec<String> = conn.lrange(&terminal_key, keep as isize, -1).await?;
        if !evicted.is_empty() {
            conn.ltrim::<_, ()>(&terminal_key, 0, keep as isize - 1)
                .await?;
            for old in evicted {
                conn.del::<_, ()>(Self::record_key(queue, &old)).await?;
            }
        }

        Ok(())
    }

    async fn recover(&self, queue: &str) -> Result<Vec<Job>, BrokerError> {
        let mut conn = self.redis.clone();
        let active_key = Self::active_key(queue);

        let ids: Vec<String> = conn.lrange(&active_key, 0, -1).await?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        conn.del::<_, ()>(&active_key).await?;

        let mut jobs = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(job) = self.fetch_by_str(queue, &id).await? {
                jobs.push(job);
            }
        }
        Ok(jobs)
    }

    async fn counts(&self, queue: &str) -> Result<QueueCounts, BrokerError> {
        let mut conn = self.redis.clone();
        let waiting: usize = conn.llen(Self::waiting_key(queue)).await?;
        let active: usize = conn.llen(Self::active_key(queue)).await?;
        let delayed: usize = conn.zcard(Self::delayed_key(queue)).await?;
        let completed: usize = conn
            .llen(Self::terminal_key(queue, JobState::Completed))
            .await?;
        let failed: usize = conn
            .llen(Self::terminal_key(queue, JobState::Failed))
            .await?;

        Ok(QueueCounts {
            waiting,
            active,
            delayed,
            completed,
            failed,
        })
    }
}

/// One queue's worth of in-memory state.
#[derive(Default)]
struct QueueShard {
    /// Submission order: push_back on enqueue, pop_front on claim.
    waiting: VecDeque<Uuid>,
    active: Vec<Uuid>,
    /// `(eligible_at_ms, id)` pairs.
    delayed: Vec<(i64, Uuid)>,
    /// Most recent first.
    completed: VecDeque<Uuid>,
    failed: VecDeque<Uuid>,
    records: HashMap<Uuid, Job>,
}

/// In-process broker with the same semantics as `RedisBroker`.
#[derive(Default)]
pub struct MemoryBroker {
    shards: Mutex<HashMap<String, QueueShard>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn try_claim(&self, queue: &str) -> Option<Job> {
        let mut shards = self.shards.lock().unwrap();
        let shard = shards.entry(queue.to_string()).or_default();

        // Promote due delayed jobs ahead of fresh submissions.
        let now_ms = Utc::now().timestamp_millis();
        let mut i = 0;
        while i < shard.delayed.len() {
            if shard.delayed[i].0 <= now_ms {
                let (_, id) = shard.delayed.remove(i);
                if let Some(job) = shard.records.get_mut(&id) {
                    job.state = JobState::Waiting;
                    job.touch();
                }
                shard.waiting.push_front(id);
            } else {
                i += 1;
            }
        }

        let id = shard.waiting.pop_front()?;
        match shard.records.get(&id) {
            Some(job) => {
                let job = job.clone();
                shard.active.push(id);
                Some(job)
            }
            None => None,
        }
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn enqueue(&self, queue: &str, job: &Job) -> Result<(), BrokerError> {
        let mut shards = self.shards.lock().unwrap();
        let shard = shards.entry(queue.to_string()).or_default();
        shard.records.insert(job.id, job.clone());
        shard.waiting.push_back(job.id);
        Ok(())
    }

    async fn claim(&self, queue: &str, wait: Duration) -> Result<Option<Job>, BrokerError> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            if let Some(job) = self.try_claim(queue) {
                return Ok(Some(job));
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(MEMORY_CLAIM_POLL).await;
        }
    }

    async fn fetch(&self, queue: &str, id: Uuid) -> Result<Option<Job>, BrokerError> {
        let shards = self.shards.lock().unwrap();
        Ok(shards
            .get(queue)
            .and_then(|shard| shard.records.get(&id))
            .cloned())
    }

    async fn store(&self, queue: &str, job: &Job) -> Result<(), BrokerError> {
        let mut shards = self.shards.lock().unwrap();
        let shard = shards.entry(queue.to_string()).or_default();
        shard.records.insert(job.id, job.clone());
        Ok(())
    }

    async fn defer(
        &self,
        queue: &str,
        job: &Job,
        until: DateTime<Utc>,
    ) -> Result<(), BrokerError> {
        let mut shards = self.shards.lock().unwrap();
        let shard = shards.entry(queue.to_string()).or_default();
        shard.active.retain(|id| id != &job.id);
        shard.records.insert(job.id, job.clone());
        shard.delayed.push((until.timestamp_millis(), job.id));
        Ok(())
    }

    async fn finish(&self, queue: &str, job: &Job, keep: usize) -> Result<(), BrokerError> {
        let mut shards = self.shards.lock().unwrap();
        let shard = shards.entry(queue.to_string()).or_default();
        shard.active.retain(|id| id != &job.id);
        shard.records.insert(job.id, job.clone());

        let evicted: Vec<Uuid> = {
            let list = match job.state {
                JobState::Completed => &mut shard.completed,
                _ => &mut shard.failed,
            };
            list.push_front(job.id);
            let mut evicted = Vec::new();
            while list.len() > keep {
                if let Some(old) = list.pop_back() {
                    evicted.push(old);
                }
            }
            evicted
        };
        for old in evicted {
            shard.records.remove(&old);
        }

        Ok(())
    }

    async fn recover(&self, queue: &str) -> Result<Vec<Job>, BrokerError> {
        let mut shards = self.shards.lock().unwrap();
        let shard = shards.entry(queue.to_string()).or_default();
        let ids: Vec<Uuid> = shard.active.drain(..).collect();
        Ok(ids
            .into_iter()
            .filter_map(|id| shard.records.get(&id).cloned())
            .collect())
    }

    async fn counts(&self, queue: &str) -> Result<QueueCounts, BrokerError> {
        let shards = self.shards.lock().unwrap();
        Ok(shards
            .get(queue)
            .map(|shard| QueueCounts {
                waiting: shard.waiting.len(),
                active: shard.active.len(),
                delayed: shard.delayed.len(),
                completed: shard.completed.len(),
                failed: shard.failed.len(),
            })
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::job::{JobPayload, RetryPolicy, SentenceRequest};

    fn test_job(target: &str) -> Job {
        Job::new(
            JobPayload::Sentences(SentenceRequest {
                target: target.to_string(),
                lang: "en".to_string(),
                count: 1,
                level: None,
                translation_lang: None,
            }),
            RetryPolicy::default(),
        )
    }

    #[tokio::test]
    async fn enqueue_then_claim_is_fifo() {
        let broker = MemoryBroker::new();
        let first = test_job("first");
        let second = test_job("second");

        broker.enqueue("generate", &first).await.unwrap();
        broker.enqueue("generate", &second).await.unwrap();

        let claimed = broker
            .claim("generate", Duration::ZERO)
            .await
            .unwrap()
            .expect("a job should be claimable");
        assert_eq!(claimed.id, first.id);

        let counts = broker.counts("generate").await.unwrap();
        assert_eq!(counts.waiting, 1);
        assert_eq!(counts.active, 1);
    }

    #[tokio::test]
    async fn claim_returns_none_on_empty_queue() {
        let broker = MemoryBroker::new();
        let claimed = broker
            .claim("generate", Duration::from_millis(10))
            .await
            .unwrap();
        assert!(claimed.is_none());
    }

    #[tokio::test]
    async fn deferred_job_becomes_claimable_after_delay() {
        let broker = MemoryBroker::new();
        let mut job = test_job("later");
        broker.enqueue("generate", &job).await.unwrap();
        broker.claim("generate", Duration::ZERO).await.unwrap();

        job.state = JobState::Delayed;
        let until = Utc::now() + chrono::Duration::milliseconds(30);
        broker.defer("generate", &job, until).await.unwrap();

        assert!(broker
            .claim("generate", Duration::ZERO)
            .await
            .unwrap()
            .is_none());

        tokio::time::sleep(Duration::from_millis(50)).await;
        let claimed = broker
            .claim("generate", Duration::ZERO)
            .await
            .unwrap()
            .expect("delay should have elapsed");
        assert_eq!(claimed.id, job.id);
    }

    #[tokio::test]
    async fn finish_caps_terminal_records() {
        let broker = MemoryBroker::new();
        let mut ids = Vec::new();

        for i in 0..3 {
            let mut job = test_job(&format!("job-{}", i));
            broker.enqueue("generate", &job).await.unwrap();
            broker.claim("generate", Duration::ZERO).await.unwrap();
            job.state = JobState::Completed;
            ids.push(job.id);
            broker.finish("generate", &job, 2).await.unwrap();
        }

        let counts = broker.counts("generate").await.unwrap();
        assert_eq!(counts.completed, 2);

        // Oldest record evicted, newest two retained.
        assert!(broker.fetch("generate", ids[0]).await.unwrap().is_none());
        assert!(broker.fetch("generate", ids[1]).await.unwrap().is_some());
        assert!(broker.fetch("generate", ids[2]).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn completed_and_failed_caps_are_independent() {
        let broker = MemoryBroker::new();

        let mut done = test_job("done");
        broker.enqueue("generate", &done).await.unwrap();
        broker.claim("generate", Duration::ZERO).await.unwrap();
        done.state = JobState::Completed;
        broker.finish("generate", &done, 1).await.unwrap();

        let mut dead = test_job("dead");
        broker.enqueue("generate", &dead).await.unwrap();
        broker.claim("generate", Duration::ZERO).await.unwrap();
        dead.state = JobState::Failed;
        broker.finish("generate", &dead, 1).await.unwrap();

        let counts = broker.counts("generate").await.unwrap();
        assert_eq!(counts.completed, 1);
        assert_eq!(counts.failed, 1);
        assert!(broker.fetch("generate", done.id).await.unwrap().is_some());
        assert!(broker.fetch("generate", dead.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn recover_drains_stranded_active_jobs() {
        let broker = MemoryBroker::new();
        let job = test_job("stranded");
        broker.enqueue("generate", &job).await.unwrap();
        broker.claim("generate", Duration::ZERO).await.unwrap();

        let stranded = broker.recover("generate").await.unwrap();
        assert_eq!(stranded.len(), 1);
        assert_eq!(stranded[0].id, job.id);
        assert_eq!(broker.counts("generate").await.unwrap().active, 0);
    }

    #[tokio::test]
    async fn queues_do_not_share_ids() {
        let broker = MemoryBroker::new();
        let job = test_job("scoped");
        broker.enqueue("generate", &job).await.unwrap();

        assert!(broker.fetch("context", job.id).await.unwrap().is_none());
        assert!(broker.fetch("generate", job.id).await.unwrap().is_some());
    }
}
