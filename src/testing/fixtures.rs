//! Small builders for `model` types used across unit tests.

use crate::adapter::TokenUsage;
use crate::model::{
    Attempt, CompileOutcome, ModelVariant, TaskId, TestOutcome, VariantParams,
};

pub const TEST_TASK: &str = "task-1";

/// A variant with no special parameters, identified by `variant_id`.
pub fn variant(variant_id: &str) -> ModelVariant {
    ModelVariant {
        variant_id: variant_id.to_string(),
        provider: "mock-provider".to_string(),
        model: "mock-model".to_string(),
        params: VariantParams::default(),
    }
}

/// An attempt that compiled and passed every test.
pub fn attempt_passing(attempt_number: u32) -> Attempt {
    let mut attempt = Attempt::new(attempt_number);
    attempt.code = Some("procedure Foo() end".to_string());
    attempt.compile = Some(CompileOutcome {
        success: true,
        errors: vec![],
        warnings: vec![],
    });
    attempt.test = Some(TestOutcome {
        passed: 1,
        total: 1,
        failure_messages: vec![],
    });
    attempt.token_usage = TokenUsage {
        prompt_tokens: 50,
        completion_tokens: 20,
        total_tokens: 70,
    };
    attempt
}

/// An attempt whose code failed to compile.
pub fn attempt_failing_compile(attempt_number: u32) -> Attempt {
    let mut attempt = Attempt::new(attempt_number);
    attempt.code = Some("procedure Foo( end".to_string());
    attempt.compile = Some(CompileOutcome {
        success: false,
        errors: vec!["syntax error at line 1".to_string()],
        warnings: vec![],
    });
    attempt.failure_reasons = vec![crate::model::FailureReason::CompilationFailed];
    attempt
}

/// Placeholder task id used in tests that don't care which task they're on.
pub fn task_id() -> TaskId {
    TEST_TASK.to_string()
}
