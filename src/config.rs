//! Benchmark configuration
//!
//! Carries only the fields the core orchestrator actually reads: where the
//! task manifests live, how many attempts a task gets, how parallel the
//! LLM stage may run, per-provider rate limits, and the compile queue's
//! capacity. CLI-only concerns (which report to render, pricing tables,
//! model aliasing) are not represented here — they belong to the excluded
//! surrounding tooling.

use crate::model::ModelVariant;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Top-level benchmark run configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BenchmarkConfig {
    pub run: RunSection,
    pub providers: HashMap<String, ProviderLimits>,
    #[serde(default)]
    pub compile: CompileSection,
}

/// Run-level fields: attempt limit, concurrency, output location.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunSection {
    /// Directory containing one task manifest per task.
    pub tasks_dir: PathBuf,
    /// Maximum attempts (generate + repairs) per (task, variant). Typically 1 or 2.
    #[serde(default = "default_attempt_limit")]
    pub attempt_limit: u32,
    /// Global cap on concurrently in-flight LLM calls, across all providers.
    #[serde(default = "default_global_concurrency")]
    pub global_concurrency: usize,
    /// Directory the JSON result file and scores file are written to.
    pub output_dir: PathBuf,
    /// Whether the LLM work pool should request streaming responses.
    #[serde(default)]
    pub streaming: bool,
    /// Path to a prior JSON result file to retry transient failures from.
    pub retry_from_file: Option<PathBuf>,
    /// Skip the interactive retry prompt entirely.
    #[serde(default)]
    pub non_interactive: bool,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

fn default_attempt_limit() -> u32 {
    2
}

fn default_global_concurrency() -> usize {
    10
}

/// Per-provider admission limits consumed by the rate limiter (§4.A).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProviderLimits {
    pub max_concurrent: usize,
    pub max_requests_per_minute: u32,
}

/// Compile queue configuration (§4.B).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompileSection {
    /// Maximum number of jobs that may be queued (waiting, not running) at once.
    #[serde(default = "default_queue_capacity")]
    pub capacity: usize,
    /// Default deadline for a submission, in milliseconds. `None` means the
    /// producer blocks indefinitely (cooperatively) rather than time out.
    pub default_deadline_ms: Option<u64>,
}

fn default_queue_capacity() -> usize {
    64
}

impl Default for CompileSection {
    fn default() -> Self {
        Self {
            capacity: default_queue_capacity(),
            default_deadline_ms: None,
        }
    }
}

/// Errors loading or validating a `BenchmarkConfig`.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("tasks directory does not exist: {0}")]
    TasksDirMissing(PathBuf),

    #[error("attempt_limit must be at least 1, got {0}")]
    InvalidAttemptLimit(u32),

    #[error("global_concurrency must be at least 1, got {0}")]
    InvalidConcurrency(usize),

    #[error("no providers configured")]
    NoProviders,

    #[error("model variant {variant_id} references provider {provider:?}, which has no entry in [providers]")]
    UnknownProvider { variant_id: String, provider: String },

    #[error("{0}")]
    Other(String),
}

impl BenchmarkConfig {
    /// Load and validate configuration from a TOML file on disk.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: BenchmarkConfig = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Cross-field validation beyond what serde checks at parse time.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.run.tasks_dir.exists() {
            return Err(ConfigError::TasksDirMissing(self.run.tasks_dir.clone()));
        }
        if self.run.attempt_limit < 1 {
            return Err(ConfigError::InvalidAttemptLimit(self.run.attempt_limit));
        }
        if self.run.global_concurrency < 1 {
            return Err(ConfigError::InvalidConcurrency(self.run.global_concurrency));
        }
        if self.providers.is_empty() {
            return Err(ConfigError::NoProviders);
        }
        Ok(())
    }

    /// Cross-checks model variants against `[providers]` (§10.2): a variant
    /// whose provider has no rate-limit entry would otherwise only surface
    /// as a `RateLimiterError::UnknownProvider` deep into a run.
    pub fn validate_against_variants(&self, variants: &[ModelVariant]) -> Result<(), ConfigError> {
        for variant in variants {
            if !self.providers.contains_key(&variant.provider) {
                return Err(ConfigError::UnknownProvider {
                    variant_id: variant.variant_id.clone(),
                    provider: variant.provider.clone(),
                });
            }
        }
        Ok(())
    }
}
