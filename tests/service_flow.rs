//! End-to-end flow tests: submit over the queue, process with workers,
//! observe through the status directory. Runs entirely against the
//! in-memory broker with a scripted processor standing in for the LLM.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use lingoforge::generation::{GenerationError, Processor};
use lingoforge::scheduler::{
    ContextRequest, GeneratedSentence, JobMetadata, JobOutcome, JobPayload, MemoryBroker,
    QueueOptions, RetryPolicy, SentenceBatch, SentenceRequest, StatusDirectory, StatusState,
    TaskQueue, WordPair, WorkerPool, WorkerPoolConfig, CONTEXT_QUEUE, GENERATE_QUEUE,
    NOT_FOUND_ERROR,
};

/// Stand-in for the LLM-backed processor: deterministic output, with an
/// optional number of leading failures.
struct ScriptedProcessor {
    failures_left: AtomicU32,
}

impl ScriptedProcessor {
    fn reliable() -> Self {
        Self {
            failures_left: AtomicU32::new(0),
        }
    }

    fn failing_first(failures: u32) -> Self {
        Self {
            failures_left: AtomicU32::new(failures),
        }
    }
}

#[async_trait]
impl Processor for ScriptedProcessor {
    async fn process(&self, payload: &JobPayload) -> Result<JobOutcome, GenerationError> {
        let left = self.failures_left.load(Ordering::SeqCst);
        if left > 0 {
            self.failures_left.store(left - 1, Ordering::SeqCst);
            return Err(GenerationError::ResponseParse(
                "scripted failure".to_string(),
            ));
        }

        Ok(match payload {
            JobPayload::Sentences(req) => JobOutcome::Sentences(SentenceBatch {
                sentences: (0..req.count)
                    .map(|i| GeneratedSentence {
                        text: format!("Sentence {} about {}.", i + 1, req.target),
                        translation: format!("Translation {}.", i + 1),
                    })
                    .collect(),
            }),
            JobPayload::Context(req) => JobOutcome::Context(GeneratedSentence {
                text: format!("A passage weaving {} words together.", req.words.len()),
                translation: "A translated passage.".to_string(),
            }),
        })
    }
}

struct Service {
    generate: TaskQueue,
    context: TaskQueue,
    directory: StatusDirectory,
    generate_pool: WorkerPool,
    context_pool: WorkerPool,
}

async fn start_service(processor: Arc<dyn Processor>) -> Service {
    let broker = Arc::new(MemoryBroker::new());
    let options = QueueOptions::default()
        .with_retry(RetryPolicy::exponential(2, Duration::from_millis(10)));

    let generate = TaskQueue::new(GENERATE_QUEUE, broker.clone(), options.clone());
    let context = TaskQueue::new(CONTEXT_QUEUE, broker, options);
    let directory = StatusDirectory::new(vec![generate.clone(), context.clone()]);

    let pool_config = WorkerPoolConfig::new(1).with_poll_interval(Duration::from_millis(20));
    let mut generate_pool = WorkerPool::new(pool_config.clone(), generate.clone(), processor.clone());
    let mut context_pool = WorkerPool::new(pool_config, context.clone(), processor);
    generate_pool.start().await.expect("pool should start");
    context_pool.start().await.expect("pool should start");

    Service {
        generate,
        context,
        directory,
        generate_pool,
        context_pool,
    }
}

impl Service {
    async fn stop(mut self) {
        self.generate_pool.shutdown().await.expect("pool shutdown");
        self.context_pool.shutdown().await.expect("pool shutdown");
    }

    /// Polls the status directory until the job reaches a terminal state.
    async fn poll_until_terminal(&self, id: &str) -> lingoforge::scheduler::JobStatus {
        let deadline = Instant::now() + Duration::from_secs(3);
        loop {
            let status = self.directory.lookup(id).await.expect("lookup should work");
            if matches!(status.state, StatusState::Completed | StatusState::Failed) {
                return status;
            }
            assert!(
                Instant::now() < deadline,
                "job {} stuck in state {:?}",
                id,
                status.state
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

fn sentence_payload(target: &str, count: u32) -> JobPayload {
    JobPayload::Sentences(SentenceRequest {
        target: target.to_string(),
        lang: "en".to_string(),
        count,
        level: None,
        translation_lang: None,
    })
}

fn context_payload() -> JobPayload {
    JobPayload::Context(ContextRequest {
        words: vec![
            WordPair {
                word: "Haus".to_string(),
                translation: "house".to_string(),
            },
            WordPair {
                word: "Baum".to_string(),
                translation: "tree".to_string(),
            },
            WordPair {
                word: "Hund".to_string(),
                translation: "dog".to_string(),
            },
        ],
        lang: "de".to_string(),
        level: Some("B1".to_string()),
        translation_lang: None,
    })
}

#[tokio::test]
async fn sentence_batch_flows_from_submission_to_completion() {
    let service = start_service(Arc::new(ScriptedProcessor::reliable())).await;

    let id = service
        .generate
        .submit(sentence_payload("downside", 2), JobMetadata::default())
        .await
        .expect("submission should succeed");

    let status = service.poll_until_terminal(&id.to_string()).await;
    assert_eq!(status.state, StatusState::Completed);
    assert_eq!(status.progress, 100);

    match status.result.expect("result should be present") {
        JobOutcome::Sentences(batch) => {
            assert_eq!(batch.sentences.len(), 2);
            for sentence in &batch.sentences {
                assert!(!sentence.text.is_empty());
                assert!(!sentence.translation.is_empty());
            }
        }
        other => panic!("unexpected result shape: {:?}", other),
    }

    service.stop().await;
}

#[tokio::test]
async fn context_passage_flows_to_a_single_object_result() {
    let service = start_service(Arc::new(ScriptedProcessor::reliable())).await;

    let id = service
        .context
        .submit(context_payload(), JobMetadata::default())
        .await
        .expect("submission should succeed");

    let status = service.poll_until_terminal(&id.to_string()).await;
    assert_eq!(status.state, StatusState::Completed);

    // A single object, not a list.
    match status.result.expect("result should be present") {
        JobOutcome::Context(passage) => {
            assert!(!passage.text.is_empty());
            assert!(!passage.translation.is_empty());
        }
        other => panic!("unexpected result shape: {:?}", other),
    }
    let wire = serde_json::to_value(
        service
            .directory
            .lookup(&id.to_string())
            .await
            .unwrap()
            .result,
    )
    .unwrap();
    assert!(wire.get("text").is_some());
    assert!(wire.get("sentences").is_none());

    service.stop().await;
}

#[tokio::test]
async fn submission_is_visible_before_any_worker_runs() {
    // No pools started: the job must sit in `waiting` with zero progress.
    let broker = Arc::new(MemoryBroker::new());
    let generate = TaskQueue::new(GENERATE_QUEUE, broker.clone(), QueueOptions::default());
    let context = TaskQueue::new(CONTEXT_QUEUE, broker, QueueOptions::default());
    let directory = StatusDirectory::new(vec![generate.clone(), context]);

    let id = generate
        .submit(sentence_payload("downside", 1), JobMetadata::default())
        .await
        .expect("submission should succeed");
    assert!(!id.to_string().is_empty());

    let status = directory.lookup(&id.to_string()).await.unwrap();
    assert_eq!(status.state, StatusState::Waiting);
    assert_eq!(status.progress, 0);
    assert!(status.result.is_none());
    assert!(status.error.is_none());
}

#[tokio::test]
async fn one_failure_retries_then_completes() {
    let service = start_service(Arc::new(ScriptedProcessor::failing_first(1))).await;

    let id = service
        .generate
        .submit(sentence_payload("retry", 1), JobMetadata::default())
        .await
        .unwrap();

    let status = service.poll_until_terminal(&id.to_string()).await;
    assert_eq!(status.state, StatusState::Completed);

    // Exactly one failed-then-retried cycle is recorded on the job.
    let job = service.generate.lookup(id).await.unwrap().unwrap();
    assert_eq!(job.attempts_made, 1);

    service.stop().await;
}

#[tokio::test]
async fn persistent_failure_surfaces_the_last_error() {
    let service = start_service(Arc::new(ScriptedProcessor::failing_first(u32::MAX))).await;

    let id = service
        .generate
        .submit(sentence_payload("doomed", 1), JobMetadata::default())
        .await
        .unwrap();

    let status = service.poll_until_terminal(&id.to_string()).await;
    assert_eq!(status.state, StatusState::Failed);
    assert_eq!(
        status.error.as_deref(),
        Some("failed to parse model response: scripted failure")
    );
    assert!(status.result.is_none());

    service.stop().await;
}

#[tokio::test]
async fn unknown_ids_normalize_to_not_found() {
    let service = start_service(Arc::new(ScriptedProcessor::reliable())).await;

    let status = service.directory.lookup("does-not-exist").await.unwrap();
    assert_eq!(status.id, "does-not-exist");
    assert_eq!(status.state, StatusState::NotFound);
    assert_eq!(status.progress, 0);
    assert!(status.result.is_none());
    assert_eq!(status.error.as_deref(), Some(NOT_FOUND_ERROR));

    service.stop().await;
}

#[tokio::test]
async fn context_jobs_are_reachable_through_the_shared_directory() {
    let service = start_service(Arc::new(ScriptedProcessor::reliable())).await;

    let id = service
        .context
        .submit(context_payload(), JobMetadata::default())
        .await
        .unwrap();

    // The directory probes "generate" first and must still find this one.
    let status = service.directory.lookup(&id.to_string()).await.unwrap();
    assert!(status.is_found());

    service.stop().await;
}

#[tokio::test]
async fn terminal_status_reads_are_idempotent() {
    let service = start_service(Arc::new(ScriptedProcessor::reliable())).await;

    let id = service
        .generate
        .submit(sentence_payload("stable", 1), JobMetadata::default())
        .await
        .unwrap();
    let first = service.poll_until_terminal(&id.to_string()).await;

    for _ in 0..3 {
        let again = service.directory.lookup(&id.to_string()).await.unwrap();
        assert_eq!(again.state, first.state);
        assert_eq!(again.progress, first.progress);
        assert_eq!(
            serde_json::to_value(&again.result).unwrap(),
            serde_json::to_value(&first.result).unwrap()
        );
    }

    service.stop().await;
}
