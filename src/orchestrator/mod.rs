//! Orchestrator (§4.E)
//!
//! Owns one run end to end: computes the task-set hash, wires up the rate
//! limiter, LLM work pool, and compile queue, fans out one `TaskExecutor`
//! per (task, variant), and folds terminal results into comparisons and
//! aggregate stats as they complete. Grounded on the teacher's
//! `AgentPipeline`: a struct that owns its collaborators for the run's
//! lifetime and drives them from one `run` entry point, publishing status
//! along the way rather than making callers poll.
//!
//! Unlike `AgentPipeline`, there is no task receiver channel — the full set
//! of work is known up front (tasks × variants), so everything is spawned
//! at once and bounded by the pool's global concurrency gate and the
//! compile queue's single consumer, not by a bounded mpsc.

use crate::adapter::LlmAdapter;
use crate::aggregator;
use crate::classifier;
use crate::compile::CompileQueue;
use crate::config::BenchmarkConfig;
use crate::container::ContainerProvider;
use crate::error::BenchmarkError;
use crate::events::{BenchEvent, EventPublisher, EventSubscription};
use crate::executor::TaskExecutor;
use crate::limiter::RateLimiter;
use crate::model::hash;
use crate::model::{
    AggregateStats, FailureReason, ModelVariant, TaskComparison, TaskExecutionResult, TaskId,
    TaskManifest, VariantId,
};
use crate::pool::LlmWorkPool;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// No flag in §6's CLI surface controls the per-call LLM deadline; it is an
/// internal guard against a hung adapter rather than a tunable.
const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(120);

/// Everything a finished (or partially finished, pre-retry) run produces.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub results: Vec<TaskExecutionResult>,
    pub comparisons: Vec<TaskComparison>,
    pub stats: AggregateStats,
    pub task_set_hash: String,
}

pub struct Orchestrator {
    manifests: Vec<Arc<TaskManifest>>,
    variants: Vec<ModelVariant>,
    provider_names: Vec<String>,
    pool: Arc<LlmWorkPool>,
    limiter: Arc<RateLimiter>,
    compile_queue: Arc<CompileQueue>,
    compile_queue_handle: tokio::task::JoinHandle<()>,
    events: EventPublisher,
    cancel: CancellationToken,
    streaming: bool,
    compile_deadline: Option<Duration>,
    task_set_hash: String,
}

impl Orchestrator {
    /// Sets up (A), (B), (C) and computes the task-set hash (§4.E, §4.I).
    /// `test_file_root` resolves the relative paths in each manifest's
    /// `test_files`; `harness_manifest` is the shared test-harness bytes
    /// folded into the task-set hash.
    pub fn new(
        manifests: Vec<TaskManifest>,
        variants: Vec<ModelVariant>,
        adapters: HashMap<String, Arc<dyn LlmAdapter>>,
        container: Arc<dyn ContainerProvider>,
        container_name: String,
        config: &BenchmarkConfig,
        test_file_root: &Path,
        harness_manifest: &[u8],
    ) -> Result<Self, BenchmarkError> {
        let task_set_hash = hash::hash_task_set(&manifests, test_file_root, harness_manifest)
            .map_err(|e| BenchmarkError::internal(format!("hashing task set: {e}")))?;

        let provider_names: Vec<String> = config.providers.keys().cloned().collect();
        let limiter = Arc::new(RateLimiter::new(&config.providers));
        let pool = Arc::new(LlmWorkPool::new(
            adapters,
            Arc::clone(&limiter),
            config.run.global_concurrency,
            DEFAULT_CALL_TIMEOUT,
        ));
        let (compile_queue, compile_queue_handle) =
            CompileQueue::spawn(container, container_name, config.compile.capacity);
        let (events, _) = EventPublisher::new();
        let compile_deadline = config.compile.default_deadline_ms.map(Duration::from_millis);

        Ok(Self {
            manifests: manifests.into_iter().map(Arc::new).collect(),
            variants,
            provider_names,
            pool,
            limiter,
            compile_queue,
            compile_queue_handle,
            events,
            cancel: CancellationToken::new(),
            streaming: config.run.streaming,
            compile_deadline,
            task_set_hash,
        })
    }

    /// Adds an event-stream subscriber; every subscriber sees every event
    /// (§4.H).
    pub fn subscribe(&self) -> EventSubscription {
        self.events.subscribe()
    }

    /// Fires the run-level cancel signal (§5). Propagates to every
    /// in-flight `TaskExecutor` through their child tokens.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn task_set_hash(&self) -> &str {
        &self.task_set_hash
    }

    /// Runs every (task, variant) pair to completion. Tasks are pipelined:
    /// a `task_completed` event fires for a task as soon as every one of
    /// its variants reaches a terminal state, without waiting on any other
    /// task (§4.E "it does not wait for all tasks before starting more").
    pub async fn run(&self) -> Result<RunOutcome, BenchmarkError> {
        let total = self.manifests.len() * self.variants.len();
        if total == 0 {
            return Ok(RunOutcome {
                results: Vec::new(),
                comparisons: Vec::new(),
                stats: aggregator::aggregate(&[]),
                task_set_hash: self.task_set_hash.clone(),
            });
        }

        let mut join_set: JoinSet<(TaskId, VariantId, Result<TaskExecutionResult, crate::executor::CriticalFailure>)> =
            JoinSet::new();

        for manifest in &self.manifests {
            self.events
                .publish(BenchEvent::TaskStarted {
                    task_id: manifest.id.clone(),
                    variants: self.variants.iter().map(|v| v.variant_id.clone()).collect(),
                })
                .await;
            for variant in &self.variants {
                let executor = TaskExecutor::new(
                    Arc::clone(manifest),
                    variant.clone(),
                    Arc::clone(&self.pool),
                    Arc::clone(&self.compile_queue),
                    self.events.clone(),
                    self.cancel.child_token(),
                    self.streaming,
                    self.compile_deadline,
                );
                let task_id = manifest.id.clone();
                let variant_id = variant.variant_id.clone();
                join_set.spawn(async move {
                    let outcome = executor.run().await;
                    (task_id, variant_id, outcome)
                });
            }
        }

        let mut results: Vec<TaskExecutionResult> = Vec::new();
        let mut pending_per_task: HashMap<TaskId, usize> = self
            .manifests
            .iter()
            .map(|m| (m.id.clone(), self.variants.len()))
            .collect();
        let mut completed = 0usize;
        let mut critical: Option<String> = None;

        while let Some(joined) = join_set.join_next().await {
            let (task_id, variant_id, outcome) =
                joined.expect("task executor panicked before completing");

            match outcome {
                Ok(result) => {
                    completed += 1;
                    results.push(result);
                    if let Some(remaining) = pending_per_task.get_mut(&task_id) {
                        *remaining -= 1;
                        if *remaining == 0 {
                            let task_results: Vec<TaskExecutionResult> = results
                                .iter()
                                .filter(|r| r.task_id == task_id)
                                .cloned()
                                .collect();
                            let comparison = TaskComparison::build(task_id.clone(), task_results);
                            self.events
                                .publish(BenchEvent::TaskCompleted {
                                    comparison: Box::new(comparison),
                                })
                                .await;
                        }
                    }
                    self.publish_progress(completed, total).await;
                }
                Err(crate::executor::CriticalFailure(message)) => {
                    self.events
                        .publish(BenchEvent::Error {
                            task_id: Some(task_id.clone()),
                            variant_id: Some(variant_id.clone()),
                            reason: Some(FailureReason::ContainerError),
                            message: message.clone(),
                        })
                        .await;
                    warn!(%task_id, %variant_id, %message, "critical failure, cancelling run");
                    critical.get_or_insert(message);
                    self.cancel.cancel();
                }
            }
        }

        if let Some(message) = critical {
            return Err(BenchmarkError::critical(message));
        }

        Ok(RunOutcome {
            comparisons: aggregator::build_comparisons(&results),
            stats: aggregator::aggregate(&results),
            task_set_hash: self.task_set_hash.clone(),
            results,
        })
    }

    /// Runs `run`, then repeatedly offers transient failures for retry
    /// until none remain or `should_retry` declines (§4.E "interactive
    /// retry loop"). `should_retry` is handed the number of transient
    /// failures found and decides whether to proceed; the caller owns the
    /// actual prompt (stdin in the CLI, a fixed answer in tests) since
    /// asking the user is outside the core's boundary (§6).
    pub async fn run_with_interactive_retry<F>(
        &self,
        mut should_retry: F,
    ) -> Result<RunOutcome, BenchmarkError>
    where
        F: FnMut(usize) -> bool,
    {
        let mut outcome = self.run().await?;

        loop {
            let transient_count = outcome
                .results
                .iter()
                .filter(|r| !r.success && classifier::is_transient(r))
                .count();

            if transient_count == 0 || !should_retry(transient_count) {
                break;
            }

            let fresh = self.retry_transient(&outcome.results).await?;
            if fresh.is_empty() {
                break;
            }

            let merged = merge_results(outcome.results, fresh);
            outcome = RunOutcome {
                comparisons: aggregator::build_comparisons(&merged),
                stats: aggregator::aggregate(&merged),
                task_set_hash: outcome.task_set_hash,
                results: merged,
            };
        }

        Ok(outcome)
    }

    /// Re-executes every (task, variant) pair whose last result is a
    /// transient failure, with fresh attempt counters (§4.E). Does not
    /// merge into `results` itself; callers combine via `merge_results`.
    pub async fn retry_transient(
        &self,
        results: &[TaskExecutionResult],
    ) -> Result<Vec<TaskExecutionResult>, BenchmarkError> {
        let candidates: Vec<(TaskId, VariantId)> = results
            .iter()
            .filter(|r| !r.success && classifier::is_transient(r))
            .map(|r| (r.task_id.clone(), r.variant_id.clone()))
            .collect();

        if candidates.is_empty() {
            return Ok(Vec::new());
        }
        info!(count = candidates.len(), "retrying transient failures");

        let mut join_set: JoinSet<Result<TaskExecutionResult, crate::executor::CriticalFailure>> =
            JoinSet::new();
        for (task_id, variant_id) in candidates {
            let Some(manifest) = self.manifests.iter().find(|m| m.id == task_id) else {
                continue;
            };
            let Some(variant) = self.variants.iter().find(|v| v.variant_id == variant_id) else {
                continue;
            };
            let executor = TaskExecutor::new(
                Arc::clone(manifest),
                variant.clone(),
                Arc::clone(&self.pool),
                Arc::clone(&self.compile_queue),
                self.events.clone(),
                self.cancel.child_token(),
                self.streaming,
                self.compile_deadline,
            );
            join_set.spawn(executor.run());
        }

        let mut fresh = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            match joined.expect("task executor panicked before completing") {
                Ok(result) => fresh.push(result),
                Err(crate::executor::CriticalFailure(message)) => {
                    self.cancel.cancel();
                    return Err(BenchmarkError::critical(message));
                }
            }
        }
        Ok(fresh)
    }

    async fn publish_progress(&self, completed: usize, total: usize) {
        let active_llm_calls: usize = self
            .provider_names
            .iter()
            .map(|p| self.limiter.in_flight(p))
            .sum();
        self.events
            .publish(BenchEvent::Progress {
                completed,
                total,
                active_llm_calls,
                compile_queue_length: self.compile_queue.pending_len(),
                eta_ms: None,
            })
            .await;
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        self.compile_queue_handle.abort();
    }
}

/// Replaces old entries with fresh ones for the same (task, variant) pair,
/// appending any that somehow weren't present before (§4.E "new results
/// replace old for the same pair").
fn merge_results(
    results: Vec<TaskExecutionResult>,
    fresh: Vec<TaskExecutionResult>,
) -> Vec<TaskExecutionResult> {
    let mut merged = results;
    for new_result in fresh {
        match merged
            .iter_mut()
            .find(|r| r.task_id == new_result.task_id && r.variant_id == new_result.variant_id)
        {
            Some(existing) => *existing = new_result,
            None => merged.push(new_result),
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CompileSection, ProviderLimits, RunSection};
    use crate::model::{FailureReason, ScoringRules, VariantParams};
    use crate::testing::mocks::{
        passing_compile, passing_outcome, passing_tests, MockContainerProvider, MockLlmAdapter,
    };
    use tempfile::tempdir;

    fn variant(id: &str) -> ModelVariant {
        ModelVariant {
            variant_id: id.to_string(),
            provider: "mock".to_string(),
            model: "mock-model".to_string(),
            params: VariantParams::default(),
        }
    }

    fn manifest(id: &str, attempt_limit: u32) -> TaskManifest {
        TaskManifest {
            id: id.to_string(),
            description: "write a procedure".to_string(),
            generation_prompt: "write Foo".to_string(),
            repair_prompt: "fix Foo".to_string(),
            test_files: vec![],
            attempt_limit,
            scoring: Some(ScoringRules {
                required_patterns: vec!["procedure Foo".to_string()],
                forbidden_patterns: vec![],
            }),
        }
    }

    fn config(tasks_dir: std::path::PathBuf) -> BenchmarkConfig {
        let mut providers = HashMap::new();
        providers.insert(
            "mock".to_string(),
            ProviderLimits {
                max_concurrent: 4,
                max_requests_per_minute: 1000,
            },
        );
        BenchmarkConfig {
            run: RunSection {
                tasks_dir,
                attempt_limit: 2,
                global_concurrency: 4,
                output_dir: std::path::PathBuf::from("/tmp/out"),
                streaming: false,
                retry_from_file: None,
                non_interactive: true,
                temperature: None,
                max_tokens: None,
            },
            providers,
            compile: CompileSection::default(),
        }
    }

    fn adapters_with(adapter: Arc<MockLlmAdapter>) -> HashMap<String, Arc<dyn LlmAdapter>> {
        let mut adapters: HashMap<String, Arc<dyn LlmAdapter>> = HashMap::new();
        adapters.insert("mock".to_string(), adapter);
        adapters
    }

    #[tokio::test]
    async fn single_task_single_variant_passes_end_to_end() {
        let dir = tempdir().unwrap();
        let adapter = Arc::new(MockLlmAdapter::new("mock"));
        adapter
            .push_outcome(Ok(passing_outcome("procedure Foo() end")))
            .await;

        let container = Arc::new(MockContainerProvider::new());
        container.push_compile(Ok(passing_compile())).await;
        container.push_test(Ok(passing_tests(1))).await;

        let orchestrator = Orchestrator::new(
            vec![manifest("t1", 2)],
            vec![variant("v1")],
            adapters_with(adapter),
            container,
            "c1".to_string(),
            &config(dir.path().to_path_buf()),
            dir.path(),
            b"harness-v1",
        )
        .unwrap();

        let outcome = orchestrator.run().await.unwrap();
        assert_eq!(outcome.results.len(), 1);
        assert!(outcome.results[0].success);
        assert_eq!(outcome.comparisons.len(), 1);
        assert_eq!(outcome.comparisons[0].winner, Some("v1".to_string()));
    }

    #[tokio::test]
    async fn tied_variants_have_no_winner() {
        let dir = tempdir().unwrap();
        let adapter1 = Arc::new(MockLlmAdapter::new("mock"));
        adapter1
            .push_outcome(Ok(passing_outcome("procedure Foo() end")))
            .await;
        let adapter2 = Arc::new(MockLlmAdapter::new("mock"));
        adapter2
            .push_outcome(Ok(passing_outcome("procedure Foo() end")))
            .await;

        // Two providers so each variant routes to its own scripted adapter
        // but shares one compile container, matching "single shared build
        // container" (§3).
        let mut adapters: HashMap<String, Arc<dyn LlmAdapter>> = HashMap::new();
        adapters.insert("mock-a".to_string(), adapter1);
        adapters.insert("mock-b".to_string(), adapter2);

        let container = Arc::new(MockContainerProvider::new());
        container.push_compile(Ok(passing_compile())).await;
        container.push_test(Ok(passing_tests(1))).await;
        container.push_compile(Ok(passing_compile())).await;
        container.push_test(Ok(passing_tests(1))).await;

        let mut cfg = config(dir.path().to_path_buf());
        cfg.providers.insert(
            "mock-a".to_string(),
            ProviderLimits {
                max_concurrent: 4,
                max_requests_per_minute: 1000,
            },
        );
        cfg.providers.insert(
            "mock-b".to_string(),
            ProviderLimits {
                max_concurrent: 4,
                max_requests_per_minute: 1000,
            },
        );

        let v1 = ModelVariant {
            variant_id: "v1".to_string(),
            provider: "mock-a".to_string(),
            model: "mock-model".to_string(),
            params: VariantParams::default(),
        };
        let v2 = ModelVariant {
            variant_id: "v2".to_string(),
            provider: "mock-b".to_string(),
            model: "mock-model".to_string(),
            params: VariantParams::default(),
        };

        let orchestrator = Orchestrator::new(
            vec![manifest("t1", 1)],
            vec![v1, v2],
            adapters,
            container,
            "c1".to_string(),
            &cfg,
            dir.path(),
            b"harness-v1",
        )
        .unwrap();

        let outcome = orchestrator.run().await.unwrap();
        assert_eq!(outcome.comparisons.len(), 1);
        assert_eq!(outcome.comparisons[0].winner, None);
        assert_eq!(outcome.comparisons[0].passing_models.len(), 2);
    }

    #[tokio::test]
    async fn container_loss_surfaces_as_critical_error() {
        let dir = tempdir().unwrap();
        let adapter = Arc::new(MockLlmAdapter::new("mock"));
        adapter
            .push_outcome(Ok(passing_outcome("procedure Foo() end")))
            .await;

        let container = Arc::new(MockContainerProvider::new());
        container
            .push_compile(Err(crate::container::ContainerError::Lost("c1".to_string())))
            .await;

        let orchestrator = Orchestrator::new(
            vec![manifest("t1", 1)],
            vec![variant("v1")],
            adapters_with(adapter),
            container,
            "c1".to_string(),
            &config(dir.path().to_path_buf()),
            dir.path(),
            b"harness-v1",
        )
        .unwrap();

        let outcome = orchestrator.run().await;
        assert!(matches!(outcome, Err(BenchmarkError::Critical { .. })));
    }

    #[tokio::test]
    async fn empty_task_set_completes_with_zero_results() {
        let dir = tempdir().unwrap();
        let container = Arc::new(MockContainerProvider::new());

        let orchestrator = Orchestrator::new(
            vec![],
            vec![variant("v1")],
            HashMap::new(),
            container,
            "c1".to_string(),
            &config(dir.path().to_path_buf()),
            dir.path(),
            b"harness-v1",
        )
        .unwrap();

        let outcome = orchestrator.run().await.unwrap();
        assert!(outcome.results.is_empty());
        assert!(outcome.comparisons.is_empty());
    }

    #[tokio::test]
    async fn interactive_retry_reruns_transient_failure_and_replaces_it() {
        let dir = tempdir().unwrap();

        // The pool retries a retryable adapter error up to MAX_RETRIES (3)
        // times before giving up, so four failures in a row are needed to
        // observe it surface as a transient `TaskExecutionResult` failure.
        // The fifth scripted outcome is consumed by the retry pass, which
        // reuses this same adapter through the orchestrator's pool.
        let adapter = Arc::new(MockLlmAdapter::new("mock"));
        for _ in 0..4 {
            adapter
                .push_outcome(Err(crate::adapter::LlmError::RequestFailed(
                    "upstream unavailable".to_string(),
                )))
                .await;
        }
        adapter
            .push_outcome(Ok(passing_outcome("procedure Foo() end")))
            .await;

        let container = Arc::new(MockContainerProvider::new());
        container.push_compile(Ok(passing_compile())).await;
        container.push_test(Ok(passing_tests(1))).await;

        let mut cfg = config(dir.path().to_path_buf());
        cfg.run.attempt_limit = 1;

        let orchestrator = Orchestrator::new(
            vec![manifest("t1", 1)],
            vec![variant("v1")],
            adapters_with(adapter),
            container,
            "c1".to_string(),
            &cfg,
            dir.path(),
            b"harness-v1",
        )
        .unwrap();

        let mut offered = false;
        let outcome = orchestrator
            .run_with_interactive_retry(|_count| {
                if offered {
                    false
                } else {
                    offered = true;
                    true
                }
            })
            .await
            .unwrap();

        assert_eq!(outcome.results.len(), 1);
        assert!(outcome.results[0].success);
    }

    #[test]
    fn failure_reason_container_error_maps_to_expected_string() {
        assert_eq!(FailureReason::ContainerError.as_str(), "container_error");
    }
}
