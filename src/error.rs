//! Crate-level error types.
//!
//! Subsystem-local errors (`BrokerError`, `QueueError`, `PoolError`,
//! `GenerationError`) live next to their modules; the types here are the
//! ones shared across module boundaries.

use thiserror::Error;

/// Errors from the text-generation service client.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("failed to parse LLM response: {0}")]
    ParseError(String),
}

/// Errors while reading configuration from the environment.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value}")]
    Invalid { var: String, value: String },
}
