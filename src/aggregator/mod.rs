//! Result Aggregator (§4.F)
//!
//! Pure functions over a finished result set: nothing here mutates a
//! `TaskExecutionResult` once it exists, mirroring the way the teacher's
//! `observability/metrics.rs` only ever snapshots its append log rather
//! than rewriting history. Computing stats twice over the same input is
//! required to produce byte-identical output (§8 "Idempotence of
//! aggregation").

use crate::model::{
    AggregateStats, GlobalStats, PerModelStats, PerTaskStats, TaskComparison, TaskExecutionResult,
    TaskId, VariantId,
};
use std::collections::HashMap;

/// Builds every `TaskComparison` for a flat result set, grouped by task id
/// in first-seen order.
pub fn build_comparisons(results: &[TaskExecutionResult]) -> Vec<TaskComparison> {
    let mut order: Vec<TaskId> = Vec::new();
    let mut grouped: HashMap<TaskId, Vec<TaskExecutionResult>> = HashMap::new();
    for result in results {
        grouped
            .entry(result.task_id.clone())
            .or_insert_with(|| {
                order.push(result.task_id.clone());
                Vec::new()
            })
            .push(result.clone());
    }

    order
        .into_iter()
        .map(|task_id| {
            let task_results = grouped.remove(&task_id).unwrap_or_default();
            TaskComparison::build(task_id, task_results)
        })
        .collect()
}

/// Computes per-model, per-task, and global statistics over a flat result
/// set (§4.F, §3 "Aggregate statistics"). Percentages are rounded to one
/// decimal place, costs to four, durations to whole milliseconds — the
/// rounding is applied once here and never re-derived downstream.
pub fn aggregate(results: &[TaskExecutionResult]) -> AggregateStats {
    let mut by_variant: HashMap<VariantId, Vec<&TaskExecutionResult>> = HashMap::new();
    let mut variant_order: Vec<VariantId> = Vec::new();
    let mut by_task: HashMap<TaskId, Vec<&TaskExecutionResult>> = HashMap::new();
    let mut task_order: Vec<TaskId> = Vec::new();

    for result in results {
        if !by_variant.contains_key(&result.variant_id) {
            variant_order.push(result.variant_id.clone());
        }
        by_variant
            .entry(result.variant_id.clone())
            .or_default()
            .push(result);

        if !by_task.contains_key(&result.task_id) {
            task_order.push(result.task_id.clone());
        }
        by_task.entry(result.task_id.clone()).or_default().push(result);
    }

    let per_model: Vec<PerModelStats> = variant_order
        .into_iter()
        .map(|variant_id| {
            let runs = &by_variant[&variant_id];
            per_model_stats(variant_id, runs)
        })
        .collect();

    let per_task: Vec<PerTaskStats> = task_order
        .into_iter()
        .map(|task_id| {
            let runs = &by_task[&task_id];
            per_task_stats(task_id, runs)
        })
        .collect();

    let global = global_stats(results);

    AggregateStats {
        per_model,
        per_task,
        global,
    }
}

fn per_model_stats(variant_id: VariantId, runs: &[&TaskExecutionResult]) -> PerModelStats {
    let tasks_passed = runs.iter().filter(|r| r.success).count() as u32;
    let tasks_failed = runs.len() as u32 - tasks_passed;

    let max_attempt = runs
        .iter()
        .map(|r| r.passed_attempt_number)
        .max()
        .unwrap_or(0) as usize;
    let mut passed_on_attempt = vec![0u32; max_attempt];
    for run in runs {
        if run.passed_attempt_number > 0 {
            passed_on_attempt[run.passed_attempt_number as usize - 1] += 1;
        }
    }

    let avg_score = round1(mean(runs.iter().map(|r| r.final_score)));
    let total_tokens = runs
        .iter()
        .map(|r| r.total_token_usage.total_tokens as u64)
        .sum();
    let total_cost = round4(runs.iter().map(|r| r.total_cost).sum());
    let avg_attempts = mean(runs.iter().map(|r| r.attempts.len() as f64));

    PerModelStats {
        variant_id,
        tasks_passed,
        tasks_failed,
        passed_on_attempt,
        avg_score,
        total_tokens,
        total_cost,
        avg_attempts,
    }
}

fn per_task_stats(task_id: TaskId, runs: &[&TaskExecutionResult]) -> PerTaskStats {
    let variants_passed = runs.iter().filter(|r| r.success).count() as u32;
    let best_score = runs.iter().map(|r| r.final_score).fold(0.0, f64::max);
    let avg_score = round1(mean(runs.iter().map(|r| r.final_score)));

    PerTaskStats {
        task_id,
        variants_passed,
        best_score: round1(best_score),
        avg_score,
    }
}

fn global_stats(results: &[TaskExecutionResult]) -> GlobalStats {
    let passed = results.iter().filter(|r| r.success).count();
    let overall_pass_rate = if results.is_empty() {
        0.0
    } else {
        round1(100.0 * passed as f64 / results.len() as f64)
    };

    let total_tokens = results
        .iter()
        .map(|r| r.total_token_usage.total_tokens as u64)
        .sum();
    let total_cost = round4(results.iter().map(|r| r.total_cost).sum());

    let mut total_duration = crate::model::DurationBreakdown::default();
    for result in results {
        total_duration.add(&result.total_duration);
    }

    GlobalStats {
        overall_pass_rate,
        total_tokens,
        total_cost,
        total_duration,
    }
}

fn mean(values: impl Iterator<Item = f64> + Clone) -> f64 {
    let count = values.clone().count();
    if count == 0 {
        0.0
    } else {
        values.sum::<f64>() / count as f64
    }
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

/// Per-(variant, task) pass@k across N runs of the same task set (§4.F).
#[derive(Debug, Clone, PartialEq)]
pub struct PassAtK {
    pub variant_id: VariantId,
    /// pass@k indexed by k-1 (index 0 is pass@1).
    pub pass_at_k: Vec<f64>,
    /// Fraction of (variant, task) pairs where every run agreed (all passed
    /// or all failed).
    pub consistency: f64,
}

/// Computes pass@k for every variant across `runs`, one inner `Vec` per
/// independent run of the same task set (§9 Open Question 2: this accepts
/// either repeated orchestrator invocations or result files loaded from
/// disk — it only assumes they share a task-set hash).
pub fn pass_at_k(runs: &[Vec<TaskExecutionResult>]) -> Vec<PassAtK> {
    let n = runs.len();
    if n == 0 {
        return Vec::new();
    }

    // (variant_id, task_id) -> count of passing runs.
    let mut pass_counts: HashMap<(VariantId, TaskId), u32> = HashMap::new();
    let mut variant_order: Vec<VariantId> = Vec::new();
    let mut pairs_seen: Vec<(VariantId, TaskId)> = Vec::new();

    for run in runs {
        for result in run {
            let key = (result.variant_id.clone(), result.task_id.clone());
            if !pass_counts.contains_key(&key) {
                pairs_seen.push(key.clone());
            }
            if !variant_order.contains(&result.variant_id) {
                variant_order.push(result.variant_id.clone());
            }
            let entry = pass_counts.entry(key).or_insert(0);
            if result.success {
                *entry += 1;
            }
        }
    }

    variant_order
        .into_iter()
        .map(|variant_id| {
            let variant_pairs: Vec<&(VariantId, TaskId)> = pairs_seen
                .iter()
                .filter(|(v, _)| *v == variant_id)
                .collect();

            let mut pass_at_k_per_task: Vec<Vec<f64>> = Vec::new();
            let mut agreeing = 0usize;
            for key in &variant_pairs {
                let c = pass_counts[*key];
                if c == 0 || c as usize == n {
                    agreeing += 1;
                }
                let per_k: Vec<f64> = (1..=n).map(|k| pass_at_k_single(n, c, k)).collect();
                pass_at_k_per_task.push(per_k);
            }

            let task_count = pass_at_k_per_task.len();
            let pass_at_k_mean: Vec<f64> = (0..n)
                .map(|k_index| {
                    if task_count == 0 {
                        0.0
                    } else {
                        pass_at_k_per_task.iter().map(|task| task[k_index]).sum::<f64>()
                            / task_count as f64
                    }
                })
                .collect();

            let consistency = if variant_pairs.is_empty() {
                0.0
            } else {
                agreeing as f64 / variant_pairs.len() as f64
            };

            PassAtK {
                variant_id,
                pass_at_k: pass_at_k_mean,
                consistency,
            }
        })
        .collect()
}

/// `1 - C(n-c, k) / C(n, k)` for k <= n, else 1 if c > 0 (§4.F).
fn pass_at_k_single(n: usize, c: u32, k: usize) -> f64 {
    let c = c as usize;
    if k > n {
        return if c > 0 { 1.0 } else { 0.0 };
    }
    if n - c < k {
        return 1.0;
    }
    1.0 - binomial(n - c, k) / binomial(n, k)
}

fn binomial(n: usize, k: usize) -> f64 {
    if k > n {
        return 0.0;
    }
    let k = k.min(n - k);
    let mut result = 1.0f64;
    for i in 0..k {
        result *= (n - i) as f64 / (i + 1) as f64;
    }
    result
}
