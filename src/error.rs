//! Error taxonomy for the benchmark orchestrator
//!
//! Implements the error buckets from the error handling design: user error,
//! transient operational, model-output failure (data, not an error), and
//! critical infrastructure. Only the first, second, and fourth buckets are
//! represented here as `Err` values — model-output failures are recorded as
//! attempt data (see `crate::model::FailureReason`) and never surface as a
//! Rust error.

use thiserror::Error;

/// Main error type for benchmark orchestration operations.
#[derive(Debug, Error)]
pub enum BenchmarkError {
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("rate limiter error: {0}")]
    RateLimiter(#[from] crate::limiter::RateLimiterError),

    #[error("compile queue error: {0}")]
    CompileQueue(#[from] crate::compile::CompileQueueError),

    #[error("LLM adapter error ({provider}): {message}")]
    LlmAdapter { provider: String, message: String },

    #[error("container provider error: {message}")]
    Container { message: String },

    #[error("run cancelled")]
    Cancelled,

    #[error("critical infrastructure failure: {message}")]
    Critical { message: String },

    #[error("internal error: {message}")]
    Internal { message: String },
}

impl BenchmarkError {
    /// CLI-boundary configuration problems (missing files, unreadable
    /// manifests) that don't fit `crate::config::ConfigError`'s parse/
    /// validation variants but are still user error, not infrastructure.
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config(crate::config::ConfigError::Other(sanitize_error_message(
            &message.into(),
        )))
    }

    pub fn llm_adapter<S: Into<String>, M: Into<String>>(provider: S, message: M) -> Self {
        Self::LlmAdapter {
            provider: provider.into(),
            message: sanitize_error_message(&message.into()),
        }
    }

    pub fn container<S: Into<String>>(message: S) -> Self {
        Self::Container {
            message: sanitize_error_message(&message.into()),
        }
    }

    pub fn critical<S: Into<String>>(message: S) -> Self {
        Self::Critical {
            message: sanitize_error_message(&message.into()),
        }
    }

    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: sanitize_error_message(&message.into()),
        }
    }

    /// True for errors that abort the whole run (exit code 1), per §7.
    pub fn is_critical(&self) -> bool {
        matches!(self, BenchmarkError::Critical { .. })
    }

    /// Process exit code associated with this error, per §6 CLI surface.
    pub fn exit_code(&self) -> i32 {
        match self {
            BenchmarkError::Cancelled => 2,
            _ => 1,
        }
    }
}

/// Result type for benchmark orchestration operations.
pub type BenchmarkResult<T> = Result<T, BenchmarkError>;

/// Redact secret-shaped and path-shaped substrings before a message reaches
/// an `error` event or the on-disk JSON report.
pub fn sanitize_error_message(message: &str) -> String {
    let mut sanitized = message.to_string();

    sanitized = regex::Regex::new(r"(?i)(password|token|key|secret|api_key|authorization)[=:]\s*\S+")
        .unwrap()
        .replace_all(&sanitized, "${1}=***")
        .to_string();

    sanitized =
        regex::Regex::new(r"/[a-zA-Z0-9._/-]+/(secrets?|\.ssh|\.aws|\.config)/[a-zA-Z0-9._/-]+")
            .unwrap()
            .replace_all(&sanitized, "/***REDACTED***/")
            .to_string();

    if sanitized.len() > 500 {
        let truncate_suffix = "...[truncated]";
        let max_content_len = 500 - truncate_suffix.len();
        sanitized = format!("{}{}", &sanitized[..max_content_len], truncate_suffix);
    }

    sanitized
}
