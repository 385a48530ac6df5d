//! End-to-end orchestrator tests
//!
//! Drives a full `Orchestrator::run()` over mock adapters and a mock
//! container, covering the happy path, a consistent loser, and a
//! container-lost critical failure.

mod test_helpers;

use centralbench::adapter::{LlmAdapter, LlmError};
use centralbench::container::{ContainerError, ContainerProvider};
use centralbench::model::ModelVariant;
use centralbench::orchestrator::Orchestrator;
use centralbench::testing::mocks::{MockContainerProvider, MockLlmAdapter};
use std::collections::HashMap;
use std::sync::Arc;

fn variant(id: &str, provider: &str) -> ModelVariant {
    ModelVariant {
        variant_id: id.to_string(),
        provider: provider.to_string(),
        model: "mock-model".to_string(),
        params: Default::default(),
    }
}

#[tokio::test]
async fn run_produces_a_passing_comparison_for_every_task() {
    let tasks_dir = tempfile::tempdir().unwrap();
    let output_dir = tempfile::tempdir().unwrap();
    let config = test_helpers::test_config(
        tasks_dir.path().to_path_buf(),
        output_dir.path().to_path_buf(),
    );

    let manifests = vec![
        test_helpers::test_manifest("task-a"),
        test_helpers::test_manifest("task-b"),
    ];
    let variants = vec![variant("v1", "mock")];

    let mut adapters: HashMap<String, Arc<dyn LlmAdapter>> = HashMap::new();
    adapters.insert("mock".to_string(), Arc::new(MockLlmAdapter::new("mock")));
    let container: Arc<dyn ContainerProvider> = Arc::new(MockContainerProvider::new());

    let orchestrator = Orchestrator::new(
        manifests,
        variants,
        adapters,
        container,
        "centralbench-test".to_string(),
        &config,
        tasks_dir.path(),
        b"harness-v1",
    )
    .unwrap();

    let outcome = orchestrator.run().await.unwrap();

    assert_eq!(outcome.results.len(), 2);
    assert!(outcome.results.iter().all(|r| r.success));
    assert_eq!(outcome.comparisons.len(), 2);
    for comparison in &outcome.comparisons {
        assert_eq!(comparison.winner, Some("v1".to_string()));
    }
    assert_eq!(outcome.stats.global.overall_pass_rate, 1.0);
}

#[tokio::test]
async fn run_records_a_losing_variant_without_aborting_the_run() {
    let tasks_dir = tempfile::tempdir().unwrap();
    let output_dir = tempfile::tempdir().unwrap();
    let mut config = test_helpers::test_config(
        tasks_dir.path().to_path_buf(),
        output_dir.path().to_path_buf(),
    );
    let default_limits = *config.providers.get("mock").unwrap();
    config.providers.remove("mock");
    config.providers.insert("winner-provider".to_string(), default_limits);
    config.providers.insert("loser-provider".to_string(), default_limits);

    let manifests = vec![test_helpers::test_manifest("task-a")];
    let variants = vec![
        variant("winner", "winner-provider"),
        variant("loser", "loser-provider"),
    ];

    let loser_adapter = MockLlmAdapter::new("loser-provider");
    // Every attempt the loser makes is rejected outright by its adapter;
    // this is a terminal, non-repairable failure that never reaches the
    // compile queue, so it can't race with the winner's compile calls on
    // the one shared container mock.
    for _ in 0..2 {
        loser_adapter
            .push_outcome(Err(LlmError::MalformedResponse("no code block found".to_string())))
            .await;
    }

    let container: Arc<dyn ContainerProvider> = Arc::new(MockContainerProvider::new());

    let mut adapters: HashMap<String, Arc<dyn LlmAdapter>> = HashMap::new();
    adapters.insert("winner-provider".to_string(), Arc::new(MockLlmAdapter::new("winner-provider")));
    adapters.insert("loser-provider".to_string(), Arc::new(loser_adapter));

    let orchestrator = Orchestrator::new(
        manifests,
        variants,
        adapters,
        container,
        "centralbench-test".to_string(),
        &config,
        tasks_dir.path(),
        b"harness-v1",
    )
    .unwrap();

    let outcome = orchestrator.run().await.unwrap();

    assert_eq!(outcome.results.len(), 2);
    let winner_result = outcome.results.iter().find(|r| r.variant_id == "winner").unwrap();
    let loser_result = outcome.results.iter().find(|r| r.variant_id == "loser").unwrap();
    assert!(winner_result.success);
    assert!(!loser_result.success);

    let comparison = &outcome.comparisons[0];
    assert_eq!(comparison.winner, Some("winner".to_string()));
    assert_eq!(comparison.failing_models, vec!["loser".to_string()]);
}

#[tokio::test]
async fn run_surfaces_a_critical_error_when_the_container_is_lost() {
    let tasks_dir = tempfile::tempdir().unwrap();
    let output_dir = tempfile::tempdir().unwrap();
    let config = test_helpers::test_config(
        tasks_dir.path().to_path_buf(),
        output_dir.path().to_path_buf(),
    );

    let manifests = vec![test_helpers::test_manifest("task-a")];
    let variants = vec![variant("v1", "mock")];

    let mut adapters: HashMap<String, Arc<dyn LlmAdapter>> = HashMap::new();
    adapters.insert("mock".to_string(), Arc::new(MockLlmAdapter::new("mock")));

    let container = MockContainerProvider::new();
    container
        .push_compile(Err(ContainerError::Lost("centralbench-test".to_string())))
        .await;
    let container: Arc<dyn ContainerProvider> = Arc::new(container);

    let orchestrator = Orchestrator::new(
        manifests,
        variants,
        adapters,
        container,
        "centralbench-test".to_string(),
        &config,
        tasks_dir.path(),
        b"harness-v1",
    )
    .unwrap();

    let result = orchestrator.run().await;

    assert!(result.is_err());
    let err = result.unwrap_err();
    assert!(err.is_critical());
    assert_eq!(err.exit_code(), 1);
}
