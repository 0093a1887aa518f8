//! Generation processing functions.
//!
//! One processing function exists per job kind: sentence batches and
//! context passages. Both are `Input -> Result` transforms behind the
//! `Processor` trait; the worker neither knows nor cares that the real
//! implementation calls an LLM.

pub mod processor;
pub mod prompts;

pub use processor::{GenerationError, LlmProcessor, Processor};
