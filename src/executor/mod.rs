//! Task Executor (§4.D)
//!
//! Drives one (task, variant) pair through **Idle → GeneratingK →
//! CompilingK → TestingK → RepairingK → Done**. Grounded on the teacher's
//! `AgentPipeline::process_single_task` shape: a single `run` entry point
//! that owns the whole lifecycle of one unit of work and reports through an
//! event channel rather than returning intermediate state to a caller.
//!
//! Unlike the teacher's pipeline, there is no separate "router" stage —
//! repair decisions are made locally from the attempt's own failure
//! reasons, since nothing else observes this executor's state between
//! attempts.

use crate::adapter::GenerationRequest;
use crate::compile::{CompileJob, CompileQueue, CompileQueueError, JobOutcome};
use crate::events::{BenchEvent, EventPublisher};
use crate::model::{
    Attempt, ExecutionContext, FailureReason, ModelVariant, TaskExecutionResult, TaskManifest,
};
use crate::observability::metrics::metrics;
use crate::pool::{LlmWorkPool, PoolError, RepairContext, WorkItem};
use crate::task_span;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{warn, Instrument};

/// Non-retryable outcome that should abort the whole run rather than just
/// this (task, variant) pair (§7 "The Orchestrator aborts only on
/// CriticalError").
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct CriticalFailure(pub String);

pub struct TaskExecutor {
    manifest: Arc<TaskManifest>,
    variant: ModelVariant,
    pool: Arc<LlmWorkPool>,
    compile_queue: Arc<CompileQueue>,
    events: EventPublisher,
    cancel: CancellationToken,
    streaming: bool,
    compile_deadline: Option<Duration>,
}

impl TaskExecutor {
    pub fn new(
        manifest: Arc<TaskManifest>,
        variant: ModelVariant,
        pool: Arc<LlmWorkPool>,
        compile_queue: Arc<CompileQueue>,
        events: EventPublisher,
        cancel: CancellationToken,
        streaming: bool,
        compile_deadline: Option<Duration>,
    ) -> Self {
        Self {
            manifest,
            variant,
            pool,
            compile_queue,
            events,
            cancel,
            streaming,
            compile_deadline,
        }
    }

    /// Runs the state machine to completion and returns the finalized
    /// result. Returns `Err(CriticalFailure)` only when the compile
    /// container itself is gone — every other failure mode is recorded as
    /// attempt data and folded into a normal (failing) result.
    pub async fn run(self) -> Result<TaskExecutionResult, CriticalFailure> {
        let task_id = self.manifest.id.clone();
        let variant_id = self.variant.variant_id.clone();
        let span = task_span!(task_id = %task_id, variant_id = %variant_id);
        metrics().task_started();
        let result = self.run_attempts().instrument(span).await;
        match &result {
            Ok(_) => metrics().task_completed(),
            Err(_) => metrics().task_failed(),
        }
        result
    }

    async fn run_attempts(self) -> Result<TaskExecutionResult, CriticalFailure> {
        let task_id = self.manifest.id.clone();
        let variant_id = self.variant.variant_id.clone();
        let attempt_limit = self.manifest.attempt_limit.max(1);

        let mut attempts: Vec<Attempt> = Vec::new();
        let mut pending_repair: Option<RepairContext> = None;
        let mut attempt_number = 1u32;

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            let mut attempt = Attempt::new(attempt_number);
            self.events
                .publish(BenchEvent::LlmStarted {
                    task_id: task_id.clone(),
                    variant_id: variant_id.clone(),
                    attempt: attempt_number,
                })
                .await;

            let request = self.generation_request(pending_repair.is_some());
            let item = WorkItem {
                task_id: task_id.clone(),
                variant_id: variant_id.clone(),
                attempt_number,
                request,
                repair: pending_repair.take(),
            };

            let work_result = self.pool.run_single(item, self.cancel.clone()).await;
            attempt.duration.llm_ms = work_result.elapsed.as_millis() as u64;

            let outcome = match work_result.outcome {
                Ok(outcome) => outcome,
                Err(PoolError::Cancelled) => {
                    attempts.push(attempt);
                    break;
                }
                Err(pool_err) => {
                    // No code came back at all; per the state machine this
                    // is a terminal failure, not a repairable one.
                    attempt.failure_reasons.push(classify_llm_failure(&pool_err));
                    self.events
                        .publish(BenchEvent::LlmCompleted {
                            task_id: task_id.clone(),
                            variant_id: variant_id.clone(),
                            attempt: attempt_number,
                            success: false,
                        })
                        .await;
                    attempts.push(attempt);
                    break;
                }
            };

            self.events
                .publish(BenchEvent::LlmCompleted {
                    task_id: task_id.clone(),
                    variant_id: variant_id.clone(),
                    attempt: attempt_number,
                    success: true,
                })
                .await;

            attempt.code = Some(outcome.code.clone());
            attempt.token_usage = outcome.usage;
            attempt.estimated_cost = outcome.estimated_cost;

            let scoring_failures = self
                .manifest
                .scoring
                .as_ref()
                .map(|rules| rules.check(&outcome.code))
                .unwrap_or_default();
            if !scoring_failures.is_empty() {
                attempt.failure_reasons.extend(scoring_failures.clone());
                let errors: Vec<String> = scoring_failures.iter().map(|r| r.to_string()).collect();
                attempts.push(attempt);
                if attempt_number >= attempt_limit {
                    break;
                }
                pending_repair = Some(RepairContext {
                    original_code: outcome.code,
                    errors,
                });
                attempt_number += 1;
                continue;
            }

            self.events
                .publish(BenchEvent::CompileQueued {
                    task_id: task_id.clone(),
                    variant_id: variant_id.clone(),
                    attempt: attempt_number,
                })
                .await;
            self.events
                .publish(BenchEvent::CompileStarted {
                    task_id: task_id.clone(),
                    variant_id: variant_id.clone(),
                    attempt: attempt_number,
                })
                .await;

            let compile_started = std::time::Instant::now();
            let job = CompileJob {
                task_id: task_id.clone(),
                variant_id: variant_id.clone(),
                code: outcome.code.clone(),
                priority: attempt_number,
                deadline: self.compile_deadline,
            };

            match self.compile_queue.submit(job).await {
                Ok(JobOutcome { compile, test }) => {
                    // The queue runs compile and test back to back without
                    // exposing a split; attribute the whole wall time to
                    // the compile stage.
                    attempt.duration.compile_ms = compile_started.elapsed().as_millis() as u64;
                    attempt.compile = Some(compile.clone());
                    self.events
                        .publish(BenchEvent::CompileCompleted {
                            task_id: task_id.clone(),
                            variant_id: variant_id.clone(),
                            attempt: attempt_number,
                            success: compile.success,
                        })
                        .await;

                    if !compile.success {
                        attempt.failure_reasons.push(FailureReason::CompilationFailed);
                        let errors = compile.errors.clone();
                        attempts.push(attempt);
                        if attempt_number >= attempt_limit {
                            break;
                        }
                        pending_repair = Some(RepairContext {
                            original_code: outcome.code,
                            errors,
                        });
                        attempt_number += 1;
                        continue;
                    }

                    let test = test.expect("compile success always carries a test outcome");
                    let passed = test.all_passed();
                    attempt.test = Some(test.clone());
                    if !passed {
                        attempt.failure_reasons.push(FailureReason::TestsFailed);
                    }
                    attempts.push(attempt);

                    if passed {
                        break;
                    }
                    if attempt_number >= attempt_limit {
                        break;
                    }
                    pending_repair = Some(RepairContext {
                        original_code: outcome.code,
                        errors: test.failure_messages,
                    });
                    attempt_number += 1;
                }
                Err(CompileQueueError::Critical(message)) => {
                    warn!(%task_id, %variant_id, %message, "compile queue reported a critical failure, aborting this pair");
                    attempt.failure_reasons.push(FailureReason::ContainerError);
                    attempts.push(attempt);
                    return Err(CriticalFailure(message));
                }
                Err(CompileQueueError::Cancelled) => {
                    attempts.push(attempt);
                    break;
                }
                Err(queue_err) => {
                    attempt
                        .failure_reasons
                        .push(FailureReason::ContainerError);
                    let errors = vec![queue_err.to_string()];
                    attempts.push(attempt);
                    if attempt_number >= attempt_limit {
                        break;
                    }
                    pending_repair = Some(RepairContext {
                        original_code: outcome.code,
                        errors,
                    });
                    attempt_number += 1;
                }
            }
        }

        let result = TaskExecutionResult::finalize(
            attempts,
            ExecutionContext {
                variant: self.variant.clone(),
                task_id: task_id.clone(),
                environment: HashMap::new(),
            },
        );
        self.events
            .publish(BenchEvent::Result {
                result: Box::new(result.clone()),
            })
            .await;
        Ok(result)
    }

    fn generation_request(&self, is_repair: bool) -> GenerationRequest {
        let prompt = if is_repair {
            self.manifest.repair_prompt.clone()
        } else {
            self.manifest.generation_prompt.clone()
        };
        GenerationRequest {
            provider: self.variant.provider.clone(),
            model: self.variant.model.clone(),
            prompt,
            temperature: self.variant.params.temperature,
            max_tokens: self.variant.params.max_tokens,
            reasoning_effort: self.variant.params.reasoning_effort.clone(),
            streaming: self.streaming,
            metadata: HashMap::new(),
        }
    }
}

/// Classifies a pool-level LLM failure into the closed failure vocabulary
/// (§4.D). `PoolError::Adapter` only carries a rendered message, so this
/// matches on the adapter error's own `Display` prefixes (see
/// `crate::adapter::LlmError`) rather than the original variant.
fn classify_llm_failure(err: &PoolError) -> FailureReason {
    match err {
        PoolError::Timeout { .. } => FailureReason::Timeout,
        PoolError::Cancelled => FailureReason::LlmCallFailed,
        PoolError::Adapter { message, .. } => {
            let lower = message.to_ascii_lowercase();
            if lower.contains("malformed response") {
                FailureReason::MalformedResponse
            } else if lower.contains("rate limited") {
                FailureReason::RateLimit
            } else if lower.contains("network error") {
                FailureReason::Network
            } else {
                FailureReason::LlmCallFailed
            }
        }
    }
}
