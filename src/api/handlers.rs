//! Request handlers and validation for the HTTP surface.
//!
//! Validation happens before any job is created: an invalid request never
//! leaves a partial submission behind. Execution-time failures are never
//! surfaced here; they are observable only by polling the status route.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::error;
use uuid::Uuid;

use crate::scheduler::{
    ContextRequest, JobMetadata, JobPayload, QueueError, SentenceRequest, StatusState, WordPair,
};

use super::AppState;

/// Bounds on the sentence count per request.
const MIN_SENTENCES: u32 = 1;
const MAX_SENTENCES: u32 = 20;

/// Bounds on the context word list length.
const MIN_CONTEXT_WORDS: usize = 3;
const MAX_CONTEXT_WORDS: usize = 5;

/// Errors a request can fail with before a job exists.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("job queue unavailable: {0}")]
    Queue(#[from] QueueError),
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::Validation(message) => (StatusCode::BAD_REQUEST, message.clone()),
            ApiError::Queue(e) => {
                error!(error = %e, "job submission failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "job queue unavailable".to_string(),
                )
            }
        };
        (status, Json(ErrorBody { error: message })).into_response()
    }
}

/// Body of `POST /generate`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateBody {
    pub target: String,
    pub lang: String,
    pub count: u32,
    #[serde(default)]
    pub level: Option<String>,
    #[serde(default)]
    pub translation_lang: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub trace_id: Option<String>,
}

/// Body of `POST /generate-context`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContextBody {
    pub words: Vec<WordPairBody>,
    pub lang: String,
    #[serde(default)]
    pub level: Option<String>,
    #[serde(default)]
    pub translation_lang: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub trace_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct WordPairBody {
    pub word: String,
    pub translation: String,
}

/// Response of both submission routes.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    pub job_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub ok: bool,
}

fn require_non_empty(value: &str, field: &str) -> Result<(), ApiError> {
    if value.trim().is_empty() {
        return Err(ApiError::Validation(format!("{} must not be empty", field)));
    }
    Ok(())
}

fn validate_generate(body: &GenerateBody) -> Result<(), ApiError> {
    require_non_empty(&body.target, "target")?;
    require_non_empty(&body.lang, "lang")?;
    if !(MIN_SENTENCES..=MAX_SENTENCES).contains(&body.count) {
        return Err(ApiError::Validation(format!(
            "count must be between {} and {}, got {}",
            MIN_SENTENCES, MAX_SENTENCES, body.count
        )));
    }
    Ok(())
}

fn validate_context(body: &GenerateContextBody) -> Result<(), ApiError> {
    require_non_empty(&body.lang, "lang")?;
    if !(MIN_CONTEXT_WORDS..=MAX_CONTEXT_WORDS).contains(&body.words.len()) {
        return Err(ApiError::Validation(format!(
            "words must contain between {} and {} entries, got {}",
            MIN_CONTEXT_WORDS,
            MAX_CONTEXT_WORDS,
            body.words.len()
        )));
    }
    for pair in &body.words {
        require_non_empty(&pair.word, "word")?;
        require_non_empty(&pair.translation, "translation")?;
    }
    Ok(())
}

fn metadata(user_id: Option<String>, trace_id: Option<String>) -> JobMetadata {
    JobMetadata { user_id, trace_id }
}

/// `POST /generate`: submit a sentence-batch job.
pub async fn submit_sentences(
    State(state): State<Arc<AppState>>,
    Json(body): Json<GenerateBody>,
) -> Result<Json<SubmitResponse>, ApiError> {
    validate_generate(&body)?;

    let meta = metadata(body.user_id, body.trace_id);
    let payload = JobPayload::Sentences(SentenceRequest {
        target: body.target,
        lang: body.lang,
        count: body.count,
        level: body.level,
        translation_lang: body.translation_lang,
    });

    let job_id = state.generate.submit(payload, meta).await?;
    Ok(Json(SubmitResponse { job_id }))
}

/// `POST /generate-context`: submit a context-passage job.
pub async fn submit_context(
    State(state): State<Arc<AppState>>,
    Json(body): Json<GenerateContextBody>,
) -> Result<Json<SubmitResponse>, ApiError> {
    validate_context(&body)?;

    let meta = metadata(body.user_id, body.trace_id);
    let payload = JobPayload::Context(ContextRequest {
        words: body
            .words
            .into_iter()
            .map(|pair| WordPair {
                word: pair.word,
                translation: pair.translation,
            })
            .collect(),
        lang: body.lang,
        level: body.level,
        translation_lang: body.translation_lang,
    });

    let job_id = state.context.submit(payload, meta).await?;
    Ok(Json(SubmitResponse { job_id }))
}

/// `GET /jobs/:id`: normalized status document for any job kind.
pub async fn job_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let status = state.directory.lookup(&id).await?;
    let code = if status.state == StatusState::NotFound {
        StatusCode::NOT_FOUND
    } else {
        StatusCode::OK
    };
    Ok((code, Json(status)).into_response())
}

/// `GET /health`: liveness only.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { ok: true })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::{JobState, MemoryBroker, QueueOptions, TaskQueue};
    use crate::scheduler::{CONTEXT_QUEUE, GENERATE_QUEUE};

    fn state() -> Arc<AppState> {
        let broker = Arc::new(MemoryBroker::new());
        let generate = TaskQueue::new(GENERATE_QUEUE, broker.clone(), QueueOptions::default());
        let context = TaskQueue::new(CONTEXT_QUEUE, broker, QueueOptions::default());
        Arc::new(AppState::new(generate, context))
    }

    fn generate_body(count: u32) -> GenerateBody {
        GenerateBody {
            target: "downside".to_string(),
            lang: "en".to_string(),
            count,
            level: None,
            translation_lang: None,
            user_id: None,
            trace_id: None,
        }
    }

    fn context_body(words: usize) -> GenerateContextBody {
        GenerateContextBody {
            words: (0..words)
                .map(|i| WordPairBody {
                    word: format!("word-{}", i),
                    translation: format!("translation-{}", i),
                })
                .collect(),
            lang: "en".to_string(),
            level: Some("B1".to_string()),
            translation_lang: None,
            user_id: None,
            trace_id: None,
        }
    }

    #[tokio::test]
    async fn submit_returns_id_of_a_waiting_job() {
        let state = state();
        let response = submit_sentences(State(state.clone()), Json(generate_body(2)))
            .await
            .expect("submission should succeed");

        let job = state
            .generate
            .lookup(response.0.job_id)
            .await
            .unwrap()
            .expect("job should exist");
        assert_eq!(job.state, JobState::Waiting);
        assert_eq!(job.progress, 0);
    }

    #[tokio::test]
    async fn generate_rejects_out_of_range_count() {
        let state = state();
        for count in [0, 21] {
            let err = submit_sentences(State(state.clone()), Json(generate_body(count)))
                .await
                .expect_err("count should be rejected");
            assert!(matches!(err, ApiError::Validation(_)));
            assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
        }
    }

    #[tokio::test]
    async fn generate_rejects_blank_target() {
        let state = state();
        let mut body = generate_body(2);
        body.target = "   ".to_string();

        let err = submit_sentences(State(state), Json(body))
            .await
            .expect_err("blank target should be rejected");
        assert!(matches!(err, ApiError::Validation(_)));
    }

    #[tokio::test]
    async fn context_accepts_three_to_five_words() {
        let state = state();
        for words in [3, 4, 5] {
            submit_context(State(state.clone()), Json(context_body(words)))
                .await
                .expect("word count should be accepted");
        }
    }

    #[tokio::test]
    async fn context_rejects_wrong_word_count() {
        let state = state();
        for words in [0, 2, 6] {
            let err = submit_context(State(state.clone()), Json(context_body(words)))
                .await
                .expect_err("word count should be rejected");
            assert!(matches!(err, ApiError::Validation(_)));
        }
    }

    #[tokio::test]
    async fn invalid_submission_creates_no_job() {
        let state = state();
        let _ = submit_sentences(State(state.clone()), Json(generate_body(0))).await;
        assert_eq!(state.generate.counts().await.unwrap().waiting, 0);
    }

    #[tokio::test]
    async fn status_route_reports_unknown_ids_as_not_found() {
        let state = state();
        let response = job_status(State(state), Path("does-not-exist".to_string()))
            .await
            .expect("lookup should not error");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn status_route_finds_context_jobs() {
        let state = state();
        let submitted = submit_context(State(state.clone()), Json(context_body(3)))
            .await
            .unwrap();

        let response = job_status(State(state), Path(submitted.0.job_id.to_string()))
            .await
            .expect("lookup should not error");
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let response = health().await;
        assert!(response.0.ok);
    }

    #[test]
    fn submit_response_uses_camel_case() {
        let response = SubmitResponse { job_id: Uuid::nil() };
        let json = serde_json::to_value(&response).unwrap();
        assert!(json.get("jobId").is_some());
    }
}
