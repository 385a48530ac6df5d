//! Retry classifier (§4.G)
//!
//! Decides whether a failed `TaskExecutionResult` is worth an interactive
//! retry. Looks only at the last attempt's failure reasons: non-retryable
//! reasons always win over transient ones, and anything unrecognized is
//! treated conservatively as not transient.

use crate::model::{FailureReason, TaskExecutionResult};

const NON_RETRYABLE: &[FailureReason] = &[
    FailureReason::CompilationFailed,
    FailureReason::TestsFailed,
    FailureReason::MissingRequiredPatterns,
    FailureReason::ContainsForbiddenPatterns,
    FailureReason::CustomCheckFailed,
];

const TRANSIENT: &[FailureReason] = &[
    FailureReason::LlmCallFailed,
    FailureReason::Timeout,
    FailureReason::RateLimit,
    FailureReason::Network,
    FailureReason::ContainerError,
];

const TRANSIENT_TEXT_MARKERS: &[&str] = &[
    "429", "500", "502", "503", "econnreset", "enotfound", "connection",
];

/// True if `result` is a transient failure eligible for interactive retry.
/// Non-retryable reasons on the last attempt always win, even alongside
/// transient ones.
pub fn is_transient(result: &TaskExecutionResult) -> bool {
    let Some(last) = result.last_attempt() else {
        return false;
    };

    if last
        .failure_reasons
        .iter()
        .any(|reason| NON_RETRYABLE.contains(reason))
    {
        return false;
    }

    if last
        .failure_reasons
        .iter()
        .any(|reason| TRANSIENT.contains(reason))
    {
        return true;
    }

    last.compile
        .as_ref()
        .map(|c| c.errors.iter().any(|e| contains_transient_marker(e)))
        .unwrap_or(false)
        || last
            .test
            .as_ref()
            .map(|t| t.failure_messages.iter().any(|m| contains_transient_marker(m)))
            .unwrap_or(false)
}

fn contains_transient_marker(text: &str) -> bool {
    let lower = text.to_ascii_lowercase();
    TRANSIENT_TEXT_MARKERS.iter().any(|marker| lower.contains(marker))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fixtures::{attempt_failing_compile, attempt_passing, variant, TEST_TASK};
    use crate::model::{Attempt, ExecutionContext};
    use std::collections::HashMap;

    fn result_with_last_attempt(attempt: Attempt) -> TaskExecutionResult {
        TaskExecutionResult::finalize(
            vec![attempt],
            ExecutionContext {
                variant: variant("v1"),
                task_id: TEST_TASK.to_string(),
                environment: HashMap::new(),
            },
        )
    }

    #[test]
    fn compilation_failed_is_not_transient() {
        let result = result_with_last_attempt(attempt_failing_compile(1));
        assert!(!is_transient(&result));
    }

    #[test]
    fn timeout_reason_is_transient() {
        let mut attempt = Attempt::new(1);
        attempt.failure_reasons = vec![FailureReason::Timeout];
        let result = result_with_last_attempt(attempt);
        assert!(is_transient(&result));
    }

    #[test]
    fn non_retryable_wins_over_transient_when_both_present() {
        let mut attempt = Attempt::new(1);
        attempt.failure_reasons = vec![FailureReason::Timeout, FailureReason::TestsFailed];
        let result = result_with_last_attempt(attempt);
        assert!(!is_transient(&result));
    }

    #[test]
    fn textual_429_marker_in_compile_errors_is_transient() {
        let mut attempt = Attempt::new(1);
        attempt.compile = Some(crate::model::CompileOutcome {
            success: false,
            errors: vec!["upstream returned HTTP 429".to_string()],
            warnings: vec![],
        });
        let result = result_with_last_attempt(attempt);
        assert!(is_transient(&result));
    }

    #[test]
    fn unrecognized_reason_is_conservative_not_transient() {
        let attempt = Attempt::new(1);
        let result = result_with_last_attempt(attempt);
        assert!(!is_transient(&result));
    }

    #[test]
    fn passing_result_has_no_failure_to_classify() {
        let result = result_with_last_attempt(attempt_passing(1));
        assert!(!is_transient(&result));
    }
}
