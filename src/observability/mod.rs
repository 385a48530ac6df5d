//! Observability: structured logging and metrics collection for a benchmark run.

pub mod logging;
pub mod metrics;

// Re-export for convenience
pub use logging::{LogFormat, init_default_logging, init_logging};
pub use metrics::{MetricsCollector, MetricsSnapshot, metrics};

// Span macros for structured logging
pub use logging::{compile_span, lifecycle_span, llm_span, task_span};
