//! Environment-driven configuration.
//!
//! Every value has a well-known default, so a local run against a local
//! Redis needs no environment at all. The LLM API key stays optional
//! here: gateways on localhost often run unauthenticated, and the
//! provider surfaces auth failures at request time.

use std::env;
use std::net::SocketAddr;

use crate::error::ConfigError;

/// Default broker address.
pub const DEFAULT_REDIS_URL: &str = "redis://localhost:6379";

/// Default HTTP bind address.
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";

/// Default OpenAI-compatible API base.
pub const DEFAULT_LLM_API_BASE: &str = "https://openrouter.ai/api/v1";

/// Default generation model.
pub const DEFAULT_LLM_MODEL: &str = "anthropic/claude-opus-4.5";

/// Text-generation service settings, consumed only by the processors.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_base: String,
    pub api_key: Option<String>,
    pub model: String,
}

/// Full service configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub redis_url: String,
    pub bind_addr: SocketAddr,
    pub llm: LlmConfig,
    /// Worker count for the sentence-batch queue.
    pub generate_workers: usize,
    /// Worker count for the context-passage queue.
    pub context_workers: usize,
}

impl AppConfig {
    /// Reads configuration from the environment:
    ///
    /// - `REDIS_URL` (default `redis://localhost:6379`)
    /// - `BIND_ADDR` (default `0.0.0.0:8080`)
    /// - `LLM_API_BASE`, `LLM_API_KEY`, `LLM_MODEL`
    /// - `GENERATE_WORKERS`, `CONTEXT_WORKERS` (default 1 each)
    pub fn from_env() -> Result<Self, ConfigError> {
        let redis_url = env::var("REDIS_URL").unwrap_or_else(|_| DEFAULT_REDIS_URL.to_string());

        let bind_raw = env::var("BIND_ADDR").unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string());
        let bind_addr: SocketAddr = bind_raw.parse().map_err(|_| ConfigError::Invalid {
            var: "BIND_ADDR".to_string(),
            value: bind_raw.clone(),
        })?;

        let llm = LlmConfig {
            api_base: env::var("LLM_API_BASE").unwrap_or_else(|_| DEFAULT_LLM_API_BASE.to_string()),
            api_key: env::var("LLM_API_KEY").ok(),
            model: env::var("LLM_MODEL").unwrap_or_else(|_| DEFAULT_LLM_MODEL.to_string()),
        };

        Ok(Self {
            redis_url,
            bind_addr,
            llm,
            generate_workers: worker_count("GENERATE_WORKERS")?,
            context_workers: worker_count("CONTEXT_WORKERS")?,
        })
    }
}

fn worker_count(var: &str) -> Result<usize, ConfigError> {
    match env::var(var) {
        Err(_) => Ok(1),
        Ok(raw) => match raw.parse::<usize>() {
            Ok(n) if n >= 1 => Ok(n),
            _ => Err(ConfigError::Invalid {
                var: var.to_string(),
                value: raw,
            }),
        },
    }
}
