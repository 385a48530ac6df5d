//! Core data model (§3): task manifests, model variants, attempts, results.
//!
//! Types here are plain data — no behavior beyond the pure constructors that
//! enforce the invariants a `TaskExecutionResult` must satisfy. Mutation
//! during a run happens through the components that own these values
//! (executor, aggregator); once built, these values are published by clone
//! to the event stream and the aggregator.

pub mod hash;

use crate::adapter::TokenUsage;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Stable task identifier.
pub type TaskId = String;
/// Stable variant identifier, unique per (provider, model, params) tuple.
pub type VariantId = String;

/// Required/forbidden textual patterns a generated attempt is checked against.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ScoringRules {
    #[serde(default)]
    pub required_patterns: Vec<String>,
    #[serde(default)]
    pub forbidden_patterns: Vec<String>,
}

impl ScoringRules {
    /// Returns the failure reasons a piece of code fails to satisfy, if any.
    pub fn check(&self, code: &str) -> Vec<FailureReason> {
        let mut reasons = Vec::new();
        if self
            .required_patterns
            .iter()
            .any(|pattern| !code.contains(pattern.as_str()))
        {
            reasons.push(FailureReason::MissingRequiredPatterns);
        }
        if self
            .forbidden_patterns
            .iter()
            .any(|pattern| code.contains(pattern.as_str()))
        {
            reasons.push(FailureReason::ContainsForbiddenPatterns);
        }
        reasons
    }
}

/// Immutable description of one benchmark task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskManifest {
    pub id: TaskId,
    pub description: String,
    pub generation_prompt: String,
    pub repair_prompt: String,
    /// Paths to test artifacts, opaque to the core.
    #[serde(default)]
    pub test_files: Vec<PathBuf>,
    pub attempt_limit: u32,
    #[serde(default)]
    pub scoring: Option<ScoringRules>,
}

/// Optional generation parameters carried by a variant.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct VariantParams {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    /// A "reasoning effort" / "thinking budget" knob, opaque to the core.
    pub reasoning_effort: Option<String>,
}

/// One model configuration under evaluation, immutable once resolved.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelVariant {
    pub variant_id: VariantId,
    pub provider: String,
    pub model: String,
    #[serde(default)]
    pub params: VariantParams,
}

/// Closed vocabulary of machine-readable failure reasons (§4.D).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    LlmCallFailed,
    MalformedResponse,
    CompilationFailed,
    TestsFailed,
    MissingRequiredPatterns,
    ContainsForbiddenPatterns,
    CustomCheckFailed,
    Timeout,
    RateLimit,
    ContainerError,
    Network,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::LlmCallFailed => "llm_call_failed",
            FailureReason::MalformedResponse => "malformed_response",
            FailureReason::CompilationFailed => "compilation_failed",
            FailureReason::TestsFailed => "tests_failed",
            FailureReason::MissingRequiredPatterns => "missing_required_patterns",
            FailureReason::ContainsForbiddenPatterns => "contains_forbidden_patterns",
            FailureReason::CustomCheckFailed => "custom_check_failed",
            FailureReason::Timeout => "timeout",
            FailureReason::RateLimit => "rate_limit",
            FailureReason::ContainerError => "container_error",
            FailureReason::Network => "network",
        }
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-stage wall-clock durations, in milliseconds.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DurationBreakdown {
    pub llm_ms: u64,
    pub compile_ms: u64,
    pub test_ms: u64,
}

impl DurationBreakdown {
    pub fn total_ms(&self) -> u64 {
        self.llm_ms + self.compile_ms + self.test_ms
    }

    pub fn add(&mut self, other: &DurationBreakdown) {
        self.llm_ms += other.llm_ms;
        self.compile_ms += other.compile_ms;
        self.test_ms += other.test_ms;
    }
}

/// Outcome of the compile stage for one attempt.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CompileOutcome {
    pub success: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// Outcome of the test stage for one attempt.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TestOutcome {
    pub passed: u32,
    pub total: u32,
    pub failure_messages: Vec<String>,
}

impl TestOutcome {
    pub fn all_passed(&self) -> bool {
        self.total > 0 && self.passed == self.total
    }
}

/// One generate-(compile-test) cycle within a task execution. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Attempt {
    /// 1-based attempt number, dense within the parent result.
    pub attempt_number: u32,
    pub code: Option<String>,
    pub compile: Option<CompileOutcome>,
    pub test: Option<TestOutcome>,
    pub token_usage: TokenUsage,
    pub estimated_cost: f64,
    pub duration: DurationBreakdown,
    pub failure_reasons: Vec<FailureReason>,
}

impl Attempt {
    pub fn new(attempt_number: u32) -> Self {
        Self {
            attempt_number,
            code: None,
            compile: None,
            test: None,
            token_usage: TokenUsage::default(),
            estimated_cost: 0.0,
            duration: DurationBreakdown::default(),
            failure_reasons: Vec::new(),
        }
    }

    pub fn compiled_and_passed(&self) -> bool {
        self.compile.as_ref().is_some_and(|c| c.success)
            && self.test.as_ref().is_some_and(|t| t.all_passed())
    }
}

/// Records the variant, manifest, and environment that produced a result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionContext {
    pub variant: ModelVariant,
    pub task_id: TaskId,
    #[serde(default)]
    pub environment: HashMap<String, String>,
}

/// The outcome of running one variant on one task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskExecutionResult {
    pub task_id: TaskId,
    pub variant_id: VariantId,
    pub attempts: Vec<Attempt>,
    pub success: bool,
    /// 1-based; 0 if the task was never passed.
    pub passed_attempt_number: u32,
    /// In [0, 100].
    pub final_score: f64,
    pub total_token_usage: TokenUsage,
    pub total_cost: f64,
    pub total_duration: DurationBreakdown,
    pub context: ExecutionContext,
}

impl TaskExecutionResult {
    /// Builds a result from a completed attempt list, computing `success`,
    /// `passed_attempt_number`, and `final_score` per §3 invariants and the
    /// §4.D scoring rule. `attempts` must be dense, 1-based. Aggregate cost
    /// and token usage are summed from the attempts themselves.
    pub fn finalize(attempts: Vec<Attempt>, context: ExecutionContext) -> Self {
        debug_assert!(attempts
            .iter()
            .enumerate()
            .all(|(i, a)| a.attempt_number == (i as u32) + 1));

        let passed_attempt_number = attempts
            .iter()
            .find(|a| a.compiled_and_passed())
            .map(|a| a.attempt_number)
            .unwrap_or(0);
        let success = passed_attempt_number != 0;

        let final_score = if success {
            100.0
        } else if let Some(last_compiled) = attempts.iter().rev().find(|a| {
            a.compile.as_ref().is_some_and(|c| c.success) && a.test.is_some()
        }) {
            let test = last_compiled.test.as_ref().unwrap();
            if test.total == 0 {
                0.0
            } else {
                100.0 * (test.passed as f64) / (test.total as f64)
            }
        } else {
            0.0
        };

        let mut total_token_usage = TokenUsage::default();
        let mut total_duration = DurationBreakdown::default();
        let mut total_cost = 0.0;
        for attempt in &attempts {
            total_token_usage.add(&attempt.token_usage);
            total_duration.add(&attempt.duration);
            total_cost += attempt.estimated_cost;
        }

        let task_id = context.task_id.clone();
        let variant_id = context.variant.variant_id.clone();

        Self {
            task_id,
            variant_id,
            attempts,
            success,
            passed_attempt_number,
            final_score,
            total_token_usage,
            total_cost,
            total_duration,
            context,
        }
    }

    pub fn last_attempt(&self) -> Option<&Attempt> {
        self.attempts.last()
    }
}

/// For a single task, the per-variant results joined together.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskComparison {
    pub task_id: TaskId,
    pub results: Vec<TaskExecutionResult>,
    /// `None` on a tie; see `passing_models` for the tied set.
    pub winner: Option<VariantId>,
    pub passing_models: Vec<VariantId>,
    pub failing_models: Vec<VariantId>,
    /// Variant ids ordered best-to-worst, ties broken by input order.
    pub ranking: Vec<VariantId>,
}

impl TaskComparison {
    /// Builds a comparison from every variant's result for one task.
    /// Winner selection: highest score among passing variants; ties broken
    /// by earliest `passed_attempt_number`, then fewest attempts, then
    /// lowest total token count (§3).
    pub fn build(task_id: TaskId, results: Vec<TaskExecutionResult>) -> Self {
        let passing_models: Vec<VariantId> = results
            .iter()
            .filter(|r| r.success)
            .map(|r| r.variant_id.clone())
            .collect();
        let failing_models: Vec<VariantId> = results
            .iter()
            .filter(|r| !r.success)
            .map(|r| r.variant_id.clone())
            .collect();

        let mut ranking: Vec<&TaskExecutionResult> = results.iter().collect();
        ranking.sort_by(|a, b| rank_key(a).partial_cmp(&rank_key(b)).unwrap());
        let ranking: Vec<VariantId> = ranking.into_iter().map(|r| r.variant_id.clone()).collect();

        let winner = select_winner(&results);

        Self {
            task_id,
            results,
            winner,
            passing_models,
            failing_models,
            ranking,
        }
    }
}

/// Sort key: higher score first, earlier pass first, fewer attempts first,
/// fewer tokens first. Returned as a tuple sortable ascending.
fn rank_key(result: &TaskExecutionResult) -> (f64, i64, usize, u64) {
    let pass_rank = if result.passed_attempt_number == 0 {
        i64::MAX
    } else {
        result.passed_attempt_number as i64
    };
    (
        -result.final_score,
        pass_rank,
        result.attempts.len(),
        result.total_token_usage.total_tokens as u64,
    )
}

fn select_winner(results: &[TaskExecutionResult]) -> Option<VariantId> {
    let mut passing: Vec<&TaskExecutionResult> = results.iter().filter(|r| r.success).collect();
    if passing.is_empty() {
        return None;
    }
    passing.sort_by(|a, b| rank_key(a).partial_cmp(&rank_key(b)).unwrap());
    let best_key = rank_key(passing[0]);
    let tied = passing
        .iter()
        .filter(|r| rank_key(r) == best_key)
        .count();
    if tied > 1 {
        None
    } else {
        Some(passing[0].variant_id.clone())
    }
}

/// Per-model aggregate statistics (§3, §4.F).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PerModelStats {
    pub variant_id: VariantId,
    pub tasks_passed: u32,
    pub tasks_failed: u32,
    /// Indexed by attempt number - 1; `passed_on_attempt[0]` is attempt 1.
    pub passed_on_attempt: Vec<u32>,
    pub avg_score: f64,
    pub total_tokens: u64,
    pub total_cost: f64,
    pub avg_attempts: f64,
}

/// Per-task aggregate statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PerTaskStats {
    pub task_id: TaskId,
    pub variants_passed: u32,
    pub best_score: f64,
    pub avg_score: f64,
}

/// Run-wide aggregate statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct GlobalStats {
    pub overall_pass_rate: f64,
    pub total_tokens: u64,
    pub total_cost: f64,
    pub total_duration: DurationBreakdown,
}

/// Full aggregate statistics bundle produced by the Result Aggregator.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AggregateStats {
    pub per_model: Vec<PerModelStats>,
    pub per_task: Vec<PerTaskStats>,
    pub global: GlobalStats,
}
