//! Test helpers and utilities for integration tests

use centralbench::config::{BenchmarkConfig, CompileSection, ProviderLimits, RunSection};
use centralbench::model::TaskManifest;
use std::collections::HashMap;
use std::path::PathBuf;

/// Create a test configuration pointing at `tasks_dir`, for integration tests.
#[allow(dead_code)]
pub fn test_config(tasks_dir: PathBuf, output_dir: PathBuf) -> BenchmarkConfig {
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
            output_dir,
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

/// A minimal task manifest with no scoring rules and no test file
/// dependencies, suitable for orchestrator smoke tests.
#[allow(dead_code)]
pub fn test_manifest(id: &str) -> TaskManifest {
    TaskManifest {
        id: id.to_string(),
        description: format!("task {id}"),
        generation_prompt: "generate a procedure".to_string(),
        repair_prompt: "fix the procedure".to_string(),
        test_files: Vec::new(),
        attempt_limit: 2,
        scoring: None,
    }
}
