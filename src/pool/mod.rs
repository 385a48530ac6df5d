//! LLM Work Pool (§4.C)
//!
//! Bounded-parallel executor for LLM generate/repair calls. Uses
//! `buffer_unordered` the way a benchmark fan-out over many independent
//! items typically does in this pack — items complete in whatever order
//! they finish, not submission order, which is fine because each work
//! item's result is routed back by (taskId, variantId, attemptNumber).

use crate::adapter::{GenerationOutcome, GenerationRequest, LlmAdapter, LlmError};
use crate::llm_span;
use crate::observability::metrics::metrics;
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{warn, Instrument};

use crate::limiter::{RateLimiter, RateLimiterError};

const MAX_RETRIES: u32 = 3;
const BACKOFF_BASE: Duration = Duration::from_millis(250);

/// One unit of work: generate or repair code for one (task, variant, attempt).
pub struct WorkItem {
    pub task_id: String,
    pub variant_id: String,
    pub attempt_number: u32,
    pub request: GenerationRequest,
    /// `Some` for a repair call; folded into the adapter's `generate_fix`.
    pub repair: Option<RepairContext>,
}

pub struct RepairContext {
    pub original_code: String,
    pub errors: Vec<String>,
}

/// Correlates a completed work item back to its (task, variant, attempt).
pub struct WorkResult {
    pub task_id: String,
    pub variant_id: String,
    pub attempt_number: u32,
    pub outcome: Result<GenerationOutcome, PoolError>,
    pub elapsed: Duration,
}

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("LLM adapter error ({provider}): {message}")]
    Adapter { provider: String, message: String },
    #[error("timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },
    #[error("cancelled")]
    Cancelled,
}

/// Bounded-parallel executor gated per-provider by a `RateLimiter`.
pub struct LlmWorkPool {
    adapters: HashMap<String, Arc<dyn LlmAdapter>>,
    limiter: Arc<RateLimiter>,
    global_concurrency: usize,
    call_timeout: Duration,
    global_gate: tokio::sync::Semaphore,
}

impl LlmWorkPool {
    pub fn new(
        adapters: HashMap<String, Arc<dyn LlmAdapter>>,
        limiter: Arc<RateLimiter>,
        global_concurrency: usize,
        call_timeout: Duration,
    ) -> Self {
        Self {
            adapters,
            limiter,
            global_concurrency,
            call_timeout,
            global_gate: tokio::sync::Semaphore::new(global_concurrency),
        }
    }

    /// Runs every item with at most `global_concurrency` in flight at once,
    /// each additionally gated by its provider's rate limiter. Returns
    /// results in completion order, not submission order.
    pub async fn run_all(
        &self,
        items: Vec<WorkItem>,
        cancel: CancellationToken,
    ) -> Vec<WorkResult> {
        let cap = self.global_concurrency;
        stream::iter(items.into_iter().map(|item| {
            let cancel = cancel.clone();
            async move { self.run_one(item, cancel).await }
        }))
        .buffer_unordered(cap)
        .collect()
        .await
    }

    /// Runs exactly one item, bounded by the pool's global concurrency gate
    /// the same way `run_all` bounds a batch. Used by a Task Executor that
    /// submits one LLM call at a time rather than as part of a batch.
    pub async fn run_single(&self, item: WorkItem, cancel: CancellationToken) -> WorkResult {
        self.run_one(item, cancel).await
    }

    async fn run_one(&self, item: WorkItem, cancel: CancellationToken) -> WorkResult {
        let started = Instant::now();
        let provider = item.request.provider.clone();

        let _global_permit = match self.global_gate.acquire().await {
            Ok(permit) => permit,
            Err(_) => unreachable!("global semaphore is never closed while the pool is alive"),
        };

        let adapter = match self.adapters.get(&provider) {
            Some(adapter) => Arc::clone(adapter),
            None => {
                return WorkResult {
                    task_id: item.task_id,
                    variant_id: item.variant_id,
                    attempt_number: item.attempt_number,
                    outcome: Err(PoolError::Adapter {
                        provider,
                        message: "no adapter registered for provider".to_string(),
                    }),
                    elapsed: started.elapsed(),
                }
            }
        };

        let outcome = self
            .call_with_retry(&adapter, &provider, item.request, item.repair, &cancel)
            .await;

        WorkResult {
            task_id: item.task_id,
            variant_id: item.variant_id,
            attempt_number: item.attempt_number,
            outcome,
            elapsed: started.elapsed(),
        }
    }

    async fn call_with_retry(
        &self,
        adapter: &Arc<dyn LlmAdapter>,
        provider: &str,
        request: GenerationRequest,
        repair: Option<RepairContext>,
        cancel: &CancellationToken,
    ) -> Result<GenerationOutcome, PoolError> {
        let started = Instant::now();
        let deadline = started + self.call_timeout;
        let mut attempt = 0;

        metrics().llm_call_issued(provider);

        let result = loop {
            if cancel.is_cancelled() {
                break Err(PoolError::Cancelled);
            }

            let lease = match self.limiter.acquire(provider, cancel).await {
                Ok(lease) => lease,
                Err(RateLimiterError::Cancelled) => break Err(PoolError::Cancelled),
                Err(RateLimiterError::UnknownProvider(p)) => {
                    break Err(PoolError::Adapter {
                        provider: p,
                        message: "no rate limit configured".to_string(),
                    })
                }
            };

            let span = llm_span!(provider, attempt);
            let call = async {
                match &repair {
                    Some(ctx) => {
                        adapter
                            .generate_fix(&ctx.original_code, &ctx.errors, request.clone(), cancel.clone())
                            .await
                    }
                    None => adapter.generate(request.clone(), cancel.clone()).await,
                }
            }
            .instrument(span)
            .await;
            drop(lease);

            match call {
                Ok(outcome) => break Ok(outcome),
                Err(LlmError::Cancelled) => break Err(PoolError::Cancelled),
                Err(err) if err.is_retryable() && attempt < MAX_RETRIES && Instant::now() < deadline => {
                    warn!(provider, attempt, %err, "retrying LLM call");
                    metrics().llm_call_retried(provider);
                    let backoff = BACKOFF_BASE * 2u32.pow(attempt);
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break Err(PoolError::Cancelled),
                        _ = tokio::time::sleep(backoff) => {}
                    }
                    attempt += 1;
                }
                Err(err) if Instant::now() >= deadline => {
                    warn!(provider, %err, "LLM call exceeded deadline");
                    break Err(PoolError::Timeout {
                        elapsed_ms: self.call_timeout.as_millis() as u64,
                    });
                }
                Err(err) => {
                    break Err(PoolError::Adapter {
                        provider: provider.to_string(),
                        message: err.to_string(),
                    })
                }
            }
        };

        match &result {
            Ok(_) => metrics().llm_call_succeeded(provider, started.elapsed()),
            Err(PoolError::Cancelled) => {}
            Err(_) => metrics().llm_call_failed(provider),
        }
        result
    }
}
