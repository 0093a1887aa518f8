//! Command-line interface for lingoforge.
//!
//! Provides commands for running the HTTP API, the queue workers, or
//! both in one process.

mod commands;

pub use commands::{parse_cli, run_with_cli, Cli, Commands};
