//! LLM adapter trait (§6, consumed interface)
//!
//! Vendor wire protocols (SSE, NDJSON, provider-specific auth) live outside
//! this crate. The core only needs an adapter that turns a generation or
//! repair request into code plus usage/timing metadata, and that honors
//! cancellation. Providers are looked up by name through a small registry
//! (§9 "Dynamic dispatch / plugin providers").

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Token usage for a single LLM call. Accumulated across attempts by
/// `crate::model::TaskExecutionResult::finalize`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl TokenUsage {
    /// Accumulates `other` into `self` in place.
    pub fn add(&mut self, other: &TokenUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}

/// Why a completion stopped producing tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ContentFilter,
    Error,
}

/// A single parameterized request to generate or repair code for one
/// (task, variant, attempt).
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub provider: String,
    pub model: String,
    pub prompt: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub reasoning_effort: Option<String>,
    pub streaming: bool,
    pub metadata: HashMap<String, String>,
}

/// A lazily-consumed partial output chunk, published to the event stream as
/// it arrives (§9 "Streaming"). The pool does not retain chunks; only the
/// final assembled `GenerationOutcome` is passed downstream.
#[derive(Debug, Clone)]
pub struct StreamChunk {
    pub text: String,
}

/// Outcome of one `generate` or `generate_fix` call.
#[derive(Debug, Clone)]
pub struct GenerationOutcome {
    pub code: String,
    pub language: String,
    pub extracted_from_delimiters: bool,
    pub usage: TokenUsage,
    pub estimated_cost: f64,
    pub duration_ms: u64,
    pub finish_reason: FinishReason,
}

/// Adapter-local error vocabulary. `LlmAdapter` implementations map vendor
/// errors into this set; the pool and executor never see the vendor's own
/// error type.
#[derive(Debug, Clone, Error)]
pub enum LlmError {
    #[error("provider not configured: {0}")]
    NotConfigured(String),
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),
    #[error("model not found: {0}")]
    ModelNotFound(String),
    #[error("rate limited by provider: {0}")]
    RateLimited(String),
    #[error("request failed: {0}")]
    RequestFailed(String),
    #[error("malformed response: {0}")]
    MalformedResponse(String),
    #[error("network error: {0}")]
    NetworkError(String),
    #[error("cancelled")]
    Cancelled,
}

impl LlmError {
    /// True for errors the LLM Work Pool should retry with backoff (§4.C
    /// step 4): provider-side 429/5xx and transport-level failures.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LlmError::RateLimited(_) | LlmError::RequestFailed(_) | LlmError::NetworkError(_)
        )
    }
}

/// Consumed LLM provider interface (§6). One implementation per vendor;
/// the core depends only on this trait.
#[async_trait]
pub trait LlmAdapter: Send + Sync {
    /// Provider name this adapter serves, e.g. "anthropic", "openai".
    fn provider_name(&self) -> &str;

    /// Generates fresh code from a generation prompt.
    async fn generate(
        &self,
        request: GenerationRequest,
        cancel: CancellationToken,
    ) -> Result<GenerationOutcome, LlmError>;

    /// Generates a repair given the prior code and the compile/test errors
    /// it produced. Default implementation folds the errors into the
    /// prompt and calls `generate`; adapters with a dedicated repair
    /// endpoint may override.
    async fn generate_fix(
        &self,
        original_code: &str,
        errors: &[String],
        request: GenerationRequest,
        cancel: CancellationToken,
    ) -> Result<GenerationOutcome, LlmError> {
        let mut repair_request = request;
        repair_request.prompt = format!(
            "{}\n\nPrevious attempt:\n{}\n\nErrors:\n{}",
            repair_request.prompt,
            original_code,
            errors.join("\n")
        );
        self.generate(repair_request, cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_usage_add_accumulates_fields() {
        let mut total = TokenUsage::default();
        total.add(&TokenUsage {
            prompt_tokens: 10,
            completion_tokens: 20,
            total_tokens: 30,
        });
        total.add(&TokenUsage {
            prompt_tokens: 5,
            completion_tokens: 5,
            total_tokens: 10,
        });
        assert_eq!(total.prompt_tokens, 15);
        assert_eq!(total.completion_tokens, 25);
        assert_eq!(total.total_tokens, 40);
    }

    #[test]
    fn rate_limited_and_network_errors_are_retryable() {
        assert!(LlmError::RateLimited("429".into()).is_retryable());
        assert!(LlmError::NetworkError("econnreset".into()).is_retryable());
        assert!(!LlmError::ModelNotFound("gpt-x".into()).is_retryable());
        assert!(!LlmError::Cancelled.is_retryable());
    }
}
