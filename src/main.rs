//! centralbench - Benchmark CLI
//!
//! This implements the CLI boundary around the orchestration core: flag
//! parsing, configuration loading, task-manifest and model-variant loading,
//! adapter/container wiring, and result output. None of this is part of the
//! benchmark core itself (`centralbench::orchestrator` and friends) — it is
//! the thin shell a real deployment replaces with its own adapter registry.

use centralbench::config::BenchmarkConfig;
use centralbench::container::ContainerProvider;
use centralbench::adapter::LlmAdapter;
use centralbench::error::BenchmarkError;
use centralbench::events::BenchEvent;
use centralbench::model::{ModelVariant, TaskManifest};
use centralbench::observability::{init_default_logging, metrics::metrics};
use centralbench::output::RunReport;
use centralbench::orchestrator::Orchestrator;
use centralbench::testing::mocks::{MockContainerProvider, MockLlmAdapter};
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::collections::HashMap;
use std::io::{self, Write as _};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "centralbench")]
#[command(about = "Parallel benchmark orchestrator for LLM code generation")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", default_value = "centralbench.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the benchmark over every task and model variant.
    Run {
        /// TOML file containing the `variants` table to evaluate.
        #[arg(long, value_name = "FILE")]
        variants: PathBuf,

        /// Override the configured attempt limit for every task.
        #[arg(long)]
        attempt_limit: Option<u32>,

        /// Override the configured global LLM concurrency cap.
        #[arg(long)]
        concurrency: Option<usize>,

        /// Request streaming generations from adapters that support it.
        #[arg(long)]
        streaming: bool,

        /// Skip the interactive "retry transient failures?" prompt.
        #[arg(long)]
        non_interactive: bool,

        /// Resume a prior run's transient failures instead of a fresh run.
        #[arg(long, value_name = "FILE")]
        retry_from_file: Option<PathBuf>,
    },
    /// Validate and print the effective configuration.
    Config {
        /// Print the parsed configuration as TOML.
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_default_logging();

    info!("starting centralbench v{}", env!("CARGO_PKG_VERSION"));

    let config = match load_configuration(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("failed to load configuration: {e}");
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run {
            variants,
            attempt_limit,
            concurrency,
            streaming,
            non_interactive,
            retry_from_file,
        } => {
            run_benchmark(RunArgs {
                config,
                variants_path: variants,
                attempt_limit,
                concurrency,
                streaming,
                non_interactive,
                retry_from_file,
            })
            .await
        }
        Commands::Config { show } => handle_config_command(config, show),
    };

    match result {
        Ok(()) => info!("centralbench finished"),
        Err(e) => {
            error!("run failed: {e}");
            process::exit(e.exit_code());
        }
    }
}

struct RunArgs {
    config: BenchmarkConfig,
    variants_path: PathBuf,
    attempt_limit: Option<u32>,
    concurrency: Option<usize>,
    streaming: bool,
    non_interactive: bool,
    retry_from_file: Option<PathBuf>,
}

fn load_configuration(path: &PathBuf) -> Result<BenchmarkConfig, BenchmarkError> {
    info!("loading configuration from {}", path.display());
    BenchmarkConfig::load_from_file(path).map_err(BenchmarkError::from)
}

fn handle_config_command(config: BenchmarkConfig, show: bool) -> Result<(), BenchmarkError> {
    if show {
        let toml = toml::to_string_pretty(&config)
            .map_err(|e| BenchmarkError::internal(format!("serializing config: {e}")))?;
        println!("{toml}");
    }
    info!("configuration is valid");
    Ok(())
}

/// A TOML file's `variants` table: `[[variants]]` entries matching `ModelVariant`.
#[derive(Debug, serde::Deserialize)]
struct VariantsFile {
    variants: Vec<ModelVariant>,
}

/// Reads every `*.toml` file directly under `tasks_dir` as one `TaskManifest`
/// each, sorted by id for a deterministic run order. Manifest content and
/// naming conventions are the CLI's concern, not the core's (§6).
fn load_task_manifests(tasks_dir: &std::path::Path) -> Result<Vec<TaskManifest>, BenchmarkError> {
    let mut manifests = Vec::new();
    let entries = std::fs::read_dir(tasks_dir)
        .map_err(|e| BenchmarkError::config(format!("reading tasks dir: {e}")))?;

    for entry in entries {
        let entry = entry.map_err(|e| BenchmarkError::config(format!("reading tasks dir entry: {e}")))?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("toml") {
            continue;
        }
        let contents = std::fs::read_to_string(&path)
            .map_err(|e| BenchmarkError::config(format!("reading {}: {e}", path.display())))?;
        let manifest: TaskManifest = toml::from_str(&contents)
            .map_err(|e| BenchmarkError::config(format!("parsing {}: {e}", path.display())))?;
        manifests.push(manifest);
    }

    manifests.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(manifests)
}

fn load_variants(path: &std::path::Path) -> Result<Vec<ModelVariant>, BenchmarkError> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| BenchmarkError::config(format!("reading {}: {e}", path.display())))?;
    let file: VariantsFile = toml::from_str(&contents)
        .map_err(|e| BenchmarkError::config(format!("parsing {}: {e}", path.display())))?;
    Ok(file.variants)
}

/// Maps a provider name to the `LlmAdapter` that serves it (§9 "Dynamic
/// dispatch / plugin providers"). Only `"mock"` is registered by default;
/// a real deployment links in vendor adapters and registers them here.
struct AdapterRegistry;

impl AdapterRegistry {
    fn build(provider: &str) -> Result<Arc<dyn LlmAdapter>, BenchmarkError> {
        match provider {
            "mock" => Ok(Arc::new(MockLlmAdapter::new(provider))),
            other => Err(BenchmarkError::llm_adapter(
                other,
                "no adapter registered for this provider; link in a real LlmAdapter \
                 implementation and register it in AdapterRegistry",
            )),
        }
    }
}

async fn run_benchmark(args: RunArgs) -> Result<(), BenchmarkError> {
    let RunArgs {
        mut config,
        variants_path,
        attempt_limit,
        concurrency,
        streaming,
        non_interactive,
        retry_from_file,
    } = args;

    if let Some(limit) = attempt_limit {
        config.run.attempt_limit = limit;
    }
    if let Some(cap) = concurrency {
        config.run.global_concurrency = cap;
    }
    config.run.streaming = config.run.streaming || streaming;
    config.run.non_interactive = config.run.non_interactive || non_interactive;
    config.validate().map_err(BenchmarkError::from)?;

    let manifests = load_task_manifests(&config.run.tasks_dir)?;
    if manifests.is_empty() {
        return Err(BenchmarkError::config(format!(
            "no task manifests found under {}",
            config.run.tasks_dir.display()
        )));
    }

    let variants = load_variants(&variants_path)?;
    if variants.is_empty() {
        return Err(BenchmarkError::config("variants file has no entries"));
    }
    config
        .validate_against_variants(&variants)
        .map_err(BenchmarkError::from)?;

    let mut adapters: HashMap<String, Arc<dyn LlmAdapter>> = HashMap::new();
    for variant in &variants {
        if !adapters.contains_key(&variant.provider) {
            adapters.insert(variant.provider.clone(), AdapterRegistry::build(&variant.provider)?);
        }
    }

    let container: Arc<dyn ContainerProvider> = Arc::new(MockContainerProvider::new());
    let container_name = "centralbench".to_string();

    let test_files_root = config.run.tasks_dir.clone();
    let harness_manifest = format!("centralbench/{}", env!("CARGO_PKG_VERSION")).into_bytes();

    let orchestrator = Orchestrator::new(
        manifests,
        variants,
        adapters,
        container,
        container_name,
        &config,
        &test_files_root,
        &harness_manifest,
    )?;

    metrics().set_run_state("running");
    let mut subscription = orchestrator.subscribe();
    let progress_task = tokio::spawn(async move {
        while let Some(event) = subscription.recv().await {
            log_event(&event);
        }
    });

    let outcome = if let Some(path) = retry_from_file {
        info!("resuming transient failures from {}", path.display());
        let prior = load_prior_report(&path)?;
        let fresh = orchestrator.retry_transient(&prior.results).await?;
        merge_into_report(prior, fresh)
    } else if config.run.non_interactive {
        outcome_to_report(orchestrator.run().await?)
    } else {
        outcome_to_report(
            orchestrator
                .run_with_interactive_retry(|count| prompt_retry(count))
                .await?,
        )
    };

    progress_task.abort();
    metrics().set_run_state("completed");

    std::fs::create_dir_all(&config.run.output_dir)
        .map_err(|e| BenchmarkError::internal(format!("creating output dir: {e}")))?;
    let json_path = config.run.output_dir.join("results.json");
    let scores_path = config.run.output_dir.join("scores.txt");
    outcome
        .write_json(&json_path)
        .map_err(|e| BenchmarkError::internal(format!("writing {}: {e}", json_path.display())))?;
    outcome
        .write_scores_file(&scores_path)
        .map_err(|e| BenchmarkError::internal(format!("writing {}: {e}", scores_path.display())))?;

    info!(
        "wrote {} and {}",
        json_path.display(),
        scores_path.display()
    );
    Ok(())
}

fn log_event(event: &BenchEvent) {
    match event {
        BenchEvent::TaskCompleted { comparison } => {
            info!(task_id = %comparison.task_id, winner = ?comparison.winner, "task completed");
        }
        BenchEvent::Progress {
            completed,
            total,
            active_llm_calls,
            compile_queue_length,
            ..
        } => {
            info!(completed, total, active_llm_calls, compile_queue_length, "progress");
        }
        BenchEvent::Error { task_id, message, .. } => {
            warn!(task_id = ?task_id, message, "run error");
        }
        _ => {}
    }
}

fn prompt_retry(transient_count: usize) -> bool {
    print!("{transient_count} transient failure(s) found. Retry them? [y/N] ");
    let _ = io::stdout().flush();
    let mut line = String::new();
    if io::stdin().read_line(&mut line).is_err() {
        return false;
    }
    matches!(line.trim().to_lowercase().as_str(), "y" | "yes")
}

fn load_prior_report(path: &std::path::Path) -> Result<RunReport, BenchmarkError> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| BenchmarkError::internal(format!("reading {}: {e}", path.display())))?;
    serde_json::from_str(&contents)
        .map_err(|e| BenchmarkError::internal(format!("parsing {}: {e}", path.display())))
}

fn merge_into_report(
    mut prior: RunReport,
    fresh: Vec<centralbench::model::TaskExecutionResult>,
) -> RunReport {
    use centralbench::aggregator::{aggregate, build_comparisons};

    for new_result in fresh {
        match prior
            .results
            .iter_mut()
            .find(|r| r.task_id == new_result.task_id && r.variant_id == new_result.variant_id)
        {
            Some(existing) => *existing = new_result,
            None => prior.results.push(new_result),
        }
    }
    prior.comparisons = build_comparisons(&prior.results);
    prior.stats = aggregate(&prior.results);
    prior.generated_at = Utc::now();
    prior
}

fn outcome_to_report(outcome: centralbench::orchestrator::RunOutcome) -> RunReport {
    RunReport {
        generated_at: Utc::now(),
        task_set_hash: outcome.task_set_hash,
        results: outcome.results,
        comparisons: outcome.comparisons,
        stats: outcome.stats,
    }
}
