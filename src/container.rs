//! Container provider trait (§6, consumed interface)
//!
//! Lifecycle management of the shared build container lives outside this
//! crate. The Compile Queue consumer is the only caller of this trait —
//! §5 "Shared resources" requires single-writer access, enforced by the
//! queue, not by this trait itself.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Outcome of a compile invocation.
#[derive(Debug, Clone, Default)]
pub struct CompileResult {
    pub success: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub artifact_path: Option<PathBuf>,
    pub output: String,
}

/// Outcome of one individual test within a `TestResult`.
#[derive(Debug, Clone)]
pub struct TestCaseResult {
    pub name: String,
    pub passed: bool,
    pub message: Option<String>,
}

/// Outcome of a test-suite invocation.
#[derive(Debug, Clone, Default)]
pub struct TestResult {
    pub total_tests: u32,
    pub passed_tests: u32,
    pub results: Vec<TestCaseResult>,
    pub output: String,
}

/// Errors surfaced by a `ContainerProvider`. `Unhealthy` and `Lost` are the
/// ones the Compile Queue maps to `BenchmarkError::Critical` (§4.B, §7).
#[derive(Debug, Clone, Error)]
pub enum ContainerError {
    #[error("container setup failed: {0}")]
    SetupFailed(String),
    #[error("container {0} is unhealthy")]
    Unhealthy(String),
    #[error("container {0} was lost")]
    Lost(String),
    #[error("compile invocation failed: {0}")]
    CompileFailed(String),
    #[error("test invocation failed: {0}")]
    TestFailed(String),
}

/// Consumed container lifecycle and compile/test interface (§6). Only the
/// Compile Queue's single consumer calls these methods.
#[async_trait]
pub trait ContainerProvider: Send + Sync {
    /// Provisions a named container from the given configuration.
    async fn setup(&self, name: &str, config: &str) -> Result<(), ContainerError>;

    /// Liveness check, used before each job and to decide whether the
    /// container needs recovery after a lost job.
    async fn is_healthy(&self, name: &str) -> bool;

    /// Compiles the project at `project_dir` inside the named container.
    async fn compile(&self, name: &str, project_dir: &Path) -> Result<CompileResult, ContainerError>;

    /// Runs the test suite against a compiled artifact.
    async fn run_tests(
        &self,
        name: &str,
        artifact_path: &Path,
    ) -> Result<TestResult, ContainerError>;

    /// Stops the named container without removing it.
    async fn stop(&self, name: &str) -> Result<(), ContainerError>;

    /// Removes the named container entirely.
    async fn remove(&self, name: &str) -> Result<(), ContainerError>;
}
