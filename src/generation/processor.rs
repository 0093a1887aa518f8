//! LLM-backed processors for the two job kinds.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use crate::error::LlmError;
use crate::llm::{GenerationRequest, LlmProvider, Message};
use crate::scheduler::job::{
    ContextRequest, GeneratedSentence, JobOutcome, JobPayload, SentenceBatch, SentenceRequest,
};

use super::prompts;

/// Sampling temperature for generation; slightly creative but stable.
const GENERATION_TEMPERATURE: f64 = 0.7;

/// Errors from a processing attempt. Each one counts as a failed attempt
/// against the job's retry policy.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error("model returned no content")]
    EmptyResponse,

    #[error("failed to parse model response: {0}")]
    ResponseParse(String),

    #[error("expected {expected} sentences, model returned {got}")]
    WrongSentenceCount { expected: usize, got: usize },

    #[error("model returned a sentence with an empty {field}")]
    EmptyField { field: &'static str },
}

/// A processing function: turns a job payload into its outcome.
///
/// Implementations own all external-service interaction; workers treat
/// them as opaque fallible transforms.
#[async_trait]
pub trait Processor: Send + Sync {
    async fn process(&self, payload: &JobPayload) -> Result<JobOutcome, GenerationError>;
}

/// The production processor: prompts an LLM and parses its JSON reply.
pub struct LlmProcessor {
    provider: Arc<dyn LlmProvider>,
    model: String,
}

impl LlmProcessor {
    pub fn new(provider: Arc<dyn LlmProvider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
        }
    }

    async fn ask(&self, system: &str, user: String) -> Result<String, GenerationError> {
        let request = GenerationRequest::new(
            self.model.clone(),
            vec![Message::system(system), Message::user(user)],
        )
        .with_temperature(GENERATION_TEMPERATURE);

        let response = self.provider.generate(request).await?;
        let content = response
            .first_content()
            .ok_or(GenerationError::EmptyResponse)?;
        debug!(model = %self.model, chars = content.len(), "model reply received");
        Ok(content.to_string())
    }

    async fn generate_sentences(
        &self,
        request: &SentenceRequest,
    ) -> Result<SentenceBatch, GenerationError> {
        let user = prompts::build_sentence_prompt(request);
        let content = self.ask(prompts::SENTENCE_SYSTEM_PROMPT, user).await?;

        let json = extract_json(&content)
            .ok_or_else(|| GenerationError::ResponseParse(preview(&content)))?;
        let batch: SentenceBatch = serde_json::from_str(json)
            .map_err(|e| GenerationError::ResponseParse(e.to_string()))?;

        let expected = request.count as usize;
        if batch.sentences.len() != expected {
            return Err(GenerationError::WrongSentenceCount {
                expected,
                got: batch.sentences.len(),
            });
        }
        for sentence in &batch.sentences {
            validate_sentence(sentence)?;
        }

        Ok(batch)
    }

    async fn generate_context(
        &self,
        request: &ContextRequest,
    ) -> Result<GeneratedSentence, GenerationError> {
        let user = prompts::build_context_prompt(request);
        let content = self.ask(prompts::CONTEXT_SYSTEM_PROMPT, user).await?;

        let json = extract_json(&content)
            .ok_or_else(|| GenerationError::ResponseParse(preview(&content)))?;
        let passage: GeneratedSentence = serde_json::from_str(json)
            .map_err(|e| GenerationError::ResponseParse(e.to_string()))?;

        validate_sentence(&passage)?;
        Ok(passage)
    }
}

#[async_trait]
impl Processor for LlmProcessor {
    async fn process(&self, payload: &JobPayload) -> Result<JobOutcome, GenerationError> {
        match payload {
            JobPayload::Sentences(request) => self
                .generate_sentences(request)
                .await
                .map(JobOutcome::Sentences),
            JobPayload::Context(request) => self
                .generate_context(request)
                .await
                .map(JobOutcome::Context),
        }
    }
}

fn validate_sentence(sentence: &GeneratedSentence) -> Result<(), GenerationError> {
    if sentence.text.trim().is_empty() {
        return Err(GenerationError::EmptyField { field: "text" });
    }
    if sentence.translation.trim().is_empty() {
        return Err(GenerationError::EmptyField {
            field: "translation",
        });
    }
    Ok(())
}

/// Extracts the JSON object from a model reply, tolerating markdown
/// fences and prose around it.
fn extract_json(content: &str) -> Option<&str> {
    let trimmed = content.trim();

    if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        if let Some(end) = rest.find("```") {
            return Some(rest[..end].trim());
        }
    }

    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    (end >= start).then(|| trimmed[start..=end].trim())
}

fn preview(content: &str) -> String {
    let trimmed = content.trim();
    let cut = trimmed
        .char_indices()
        .nth(100)
        .map(|(i, _)| i)
        .unwrap_or(trimmed.len());
    format!("no JSON found in response starting with: '{}'", &trimmed[..cut])
}
