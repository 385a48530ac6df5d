//! Mock implementations of the consumed external interfaces (§6)
//!
//! Built the way the teacher's `MockTransport` is: an `Arc<Mutex<Vec<_>>>`
//! recording call history, a `should_fail` / scripted-response knob, and
//! async-trait impls of the real traits, so executor and orchestrator tests
//! never touch a network or a real container.

use crate::adapter::{
    FinishReason, GenerationOutcome, GenerationRequest, LlmAdapter, LlmError, TokenUsage,
};
use crate::container::{CompileResult, ContainerError, ContainerProvider, TestResult};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Mock LLM adapter that replays a scripted sequence of outcomes, one per
/// call, recording every request it was given.
#[derive(Default)]
pub struct MockLlmAdapter {
    pub provider: String,
    pub requests: Arc<Mutex<Vec<GenerationRequest>>>,
    scripted: Arc<Mutex<VecDeque<Result<GenerationOutcome, LlmError>>>>,
}

impl MockLlmAdapter {
    pub fn new(provider: &str) -> Self {
        Self {
            provider: provider.to_string(),
            requests: Arc::new(Mutex::new(Vec::new())),
            scripted: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    /// Queues the outcome (or error) returned by the next `generate` call.
    pub async fn push_outcome(&self, outcome: Result<GenerationOutcome, LlmError>) {
        self.scripted.lock().await.push_back(outcome);
    }

    pub async fn call_count(&self) -> usize {
        self.requests.lock().await.len()
    }
}

/// Builds a passing generation outcome, for tests that don't care about the
/// exact code text.
pub fn passing_outcome(code: &str) -> GenerationOutcome {
    GenerationOutcome {
        code: code.to_string(),
        language: "erpscript".to_string(),
        extracted_from_delimiters: true,
        usage: TokenUsage {
            prompt_tokens: 40,
            completion_tokens: 20,
            total_tokens: 60,
        },
        estimated_cost: 0.002,
        duration_ms: 50,
        finish_reason: FinishReason::Stop,
    }
}

#[async_trait]
impl LlmAdapter for MockLlmAdapter {
    fn provider_name(&self) -> &str {
        &self.provider
    }

    async fn generate(
        &self,
        request: GenerationRequest,
        cancel: CancellationToken,
    ) -> Result<GenerationOutcome, LlmError> {
        if cancel.is_cancelled() {
            return Err(LlmError::Cancelled);
        }
        self.requests.lock().await.push(request);
        let mut scripted = self.scripted.lock().await;
        scripted
            .pop_front()
            .unwrap_or_else(|| Ok(passing_outcome("procedure Foo() end")))
    }
}

/// Mock container provider. Compile/test outcomes are scripted per call;
/// `healthy` flips to `false` once `lose_container` is called, simulating
/// §4.B's "consumer failure (e.g. container lost)".
pub struct MockContainerProvider {
    pub compile_calls: Arc<Mutex<Vec<String>>>,
    pub test_calls: Arc<Mutex<Vec<String>>>,
    scripted_compiles: Arc<Mutex<VecDeque<Result<CompileResult, ContainerError>>>>,
    scripted_tests: Arc<Mutex<VecDeque<Result<TestResult, ContainerError>>>>,
    healthy: Arc<Mutex<bool>>,
}

impl Default for MockContainerProvider {
    fn default() -> Self {
        Self {
            compile_calls: Arc::new(Mutex::new(Vec::new())),
            test_calls: Arc::new(Mutex::new(Vec::new())),
            scripted_compiles: Arc::new(Mutex::new(VecDeque::new())),
            scripted_tests: Arc::new(Mutex::new(VecDeque::new())),
            healthy: Arc::new(Mutex::new(true)),
        }
    }
}

impl MockContainerProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn push_compile(&self, result: Result<CompileResult, ContainerError>) {
        self.scripted_compiles.lock().await.push_back(result);
    }

    pub async fn push_test(&self, result: Result<TestResult, ContainerError>) {
        self.scripted_tests.lock().await.push_back(result);
    }

    pub async fn lose_container(&self) {
        *self.healthy.lock().await = false;
    }
}

/// A compile outcome that succeeds with no diagnostics.
pub fn passing_compile() -> CompileResult {
    CompileResult {
        success: true,
        errors: vec![],
        warnings: vec![],
        artifact_path: Some("/tmp/artifact".into()),
        output: String::new(),
    }
}

/// A test outcome where every test passed.
pub fn passing_tests(total: u32) -> TestResult {
    TestResult {
        total_tests: total,
        passed_tests: total,
        results: vec![],
        output: String::new(),
    }
}

#[async_trait]
impl ContainerProvider for MockContainerProvider {
    async fn setup(&self, _name: &str, _config: &str) -> Result<(), ContainerError> {
        Ok(())
    }

    async fn is_healthy(&self, _name: &str) -> bool {
        *self.healthy.lock().await
    }

    async fn compile(
        &self,
        name: &str,
        project_dir: &Path,
    ) -> Result<CompileResult, ContainerError> {
        self.compile_calls
            .lock()
            .await
            .push(project_dir.display().to_string());
        if !*self.healthy.lock().await {
            return Err(ContainerError::Lost(name.to_string()));
        }
        let mut scripted = self.scripted_compiles.lock().await;
        scripted.pop_front().unwrap_or_else(|| Ok(passing_compile()))
    }

    async fn run_tests(
        &self,
        name: &str,
        artifact_path: &Path,
    ) -> Result<TestResult, ContainerError> {
        self.test_calls
            .lock()
            .await
            .push(artifact_path.display().to_string());
        if !*self.healthy.lock().await {
            return Err(ContainerError::Lost(name.to_string()));
        }
        let mut scripted = self.scripted_tests.lock().await;
        scripted.pop_front().unwrap_or_else(|| Ok(passing_tests(1)))
    }

    async fn stop(&self, _name: &str) -> Result<(), ContainerError> {
        Ok(())
    }

    async fn remove(&self, _name: &str) -> Result<(), ContainerError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_llm_adapter_records_requests_and_replays_scripted_outcomes() {
        let adapter = MockLlmAdapter::new("anthropic");
        adapter
            .push_outcome(Ok(passing_outcome("procedure Bar() end")))
            .await;

        let request = GenerationRequest {
            provider: "anthropic".to_string(),
            model: "claude".to_string(),
            prompt: "generate".to_string(),
            temperature: None,
            max_tokens: None,
            reasoning_effort: None,
            streaming: false,
            metadata: Default::default(),
        };

        let outcome = adapter
            .generate(request, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.code, "procedure Bar() end");
        assert_eq!(adapter.call_count().await, 1);
    }

    #[tokio::test]
    async fn mock_llm_adapter_respects_cancellation() {
        let adapter = MockLlmAdapter::new("anthropic");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let request = GenerationRequest {
            provider: "anthropic".to_string(),
            model: "claude".to_string(),
            prompt: "generate".to_string(),
            temperature: None,
            max_tokens: None,
            reasoning_effort: None,
            streaming: false,
            metadata: Default::default(),
        };

        let result = adapter.generate(request, cancel).await;
        assert!(matches!(result, Err(LlmError::Cancelled)));
        assert_eq!(adapter.call_count().await, 0);
    }

    #[tokio::test]
    async fn mock_container_provider_fails_fast_after_losing_container() {
        let provider = MockContainerProvider::new();
        provider.lose_container().await;
        assert!(!provider.is_healthy("c1").await);

        let result = provider.compile("c1", Path::new("/tmp/proj")).await;
        assert!(matches!(result, Err(ContainerError::Lost(_))));
    }
}
