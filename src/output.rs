//! Result output (§6 "Result output (produced)")
//!
//! Two on-disk artifacts per run: a JSON file with the full result set,
//! aggregate stats, comparisons, and the task-set hash; and a plain-text
//! scores file with one line per model plus summary counters. Timestamps
//! are ISO-8601, percentages carry a trailing `%`, costs are `$`-prefixed,
//! durations are integer milliseconds — stable enough that downstream
//! report tooling parses it without schema negotiation.

use crate::model::{AggregateStats, TaskComparison, TaskExecutionResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::Path;

/// The full JSON result file written at the end of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub generated_at: DateTime<Utc>,
    pub task_set_hash: String,
    pub results: Vec<TaskExecutionResult>,
    pub comparisons: Vec<TaskComparison>,
    pub stats: AggregateStats,
}

impl RunReport {
    pub fn write_json(&self, path: &Path) -> io::Result<()> {
        let json = serde_json::to_string_pretty(self)
            .expect("RunReport always serializes: no non-finite floats, no cyclic structures");
        std::fs::write(path, json)
    }

    /// Writes the plain-text scores file: one line per model, percentages
    /// with a trailing `%`, costs prefixed with `$`, durations in ms.
    pub fn write_scores_file(&self, path: &Path) -> io::Result<()> {
        let mut lines = Vec::new();
        lines.push(format!(
            "centralbench run — {}",
            self.generated_at.to_rfc3339()
        ));
        lines.push(format!("task_set_hash: {}", self.task_set_hash));
        lines.push(String::new());

        for model in &self.stats.per_model {
            let total = model.tasks_passed + model.tasks_failed;
            let pass_rate = if total == 0 {
                0.0
            } else {
                100.0 * model.tasks_passed as f64 / total as f64
            };
            lines.push(format!(
                "{:<24} passed={}/{} ({:.1}%)  avg_score={:.1}  avg_attempts={:.2}  tokens={}  cost=${:.4}",
                model.variant_id,
                model.tasks_passed,
                total,
                pass_rate,
                model.avg_score,
                model.avg_attempts,
                model.total_tokens,
                model.total_cost,
            ));
        }

        lines.push(String::new());
        lines.push(format!(
            "overall_pass_rate={:.1}%  total_tokens={}  total_cost=${:.4}  total_duration_ms={}",
            self.stats.global.overall_pass_rate,
            self.stats.global.total_tokens,
            self.stats.global.total_cost,
            self.stats.global.total_duration.total_ms(),
        ));

        std::fs::write(path, lines.join("\n") + "\n")
    }
}
