//! centralbench - a parallel benchmark orchestrator for LLM code generation
//!
//! This crate evaluates multiple LLMs (or prompt/model variants) against a
//! fixed set of code-generation tasks for a proprietary ERP scripting
//! language. It drives generation through vendor-agnostic `LlmAdapter`
//! trait objects, compiles and tests the resulting code in a shared
//! container via the single-writer `CompileQueue`, and folds per-attempt
//! results into per-task comparisons and run-wide aggregate statistics.
//!
//! # Overview
//!
//! - [`model`] - core domain types: tasks, variants, attempts, results, comparisons
//! - [`adapter`] - the `LlmAdapter` trait generation/repair calls are made through
//! - [`container`] - the `ContainerProvider` trait compile/test calls are made through
//! - [`limiter`] - per-provider concurrency and rate limiting
//! - [`compile`] - the single-writer compile/test queue
//! - [`pool`] - bounded-parallel LLM call execution
//! - [`executor`] - the attempt loop for one (task, variant) pair
//! - [`orchestrator`] - drives a full run end to end
//! - [`aggregator`] - folds results into comparisons and aggregate stats
//! - [`classifier`] - decides whether a failure is worth an interactive retry
//! - [`events`] - the run's live progress event stream
//! - [`output`] - JSON report and plain-text scores file writers

pub mod adapter;
pub mod aggregator;
pub mod classifier;
pub mod compile;
pub mod config;
pub mod container;
pub mod error;
pub mod events;
pub mod executor;
pub mod limiter;
pub mod model;
pub mod observability;
pub mod orchestrator;
pub mod output;
pub mod pool;
pub mod testing;

pub use config::BenchmarkConfig;
pub use error::{BenchmarkError, BenchmarkResult};
pub use orchestrator::{Orchestrator, RunOutcome};
