//! Configuration loading and validation tests
//!
//! Tests focus on BEHAVIOR of configuration loading and validation, not the
//! implementation details of TOML parsing.

use centralbench::config::{BenchmarkConfig, ConfigError};
use std::io::Write;
use tempfile::NamedTempFile;

fn write_config(tasks_dir: &str, extra: &str) -> NamedTempFile {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(
        temp_file,
        r#"
[run]
tasks_dir = "{tasks_dir}"
output_dir = "/tmp/centralbench-out"

[providers.anthropic]
max_concurrent = 4
max_requests_per_minute = 50

{extra}
"#
    )
    .unwrap();
    temp_file
}

#[test]
fn config_loads_successfully_from_valid_toml() {
    let tasks_dir = tempfile::tempdir().unwrap();
    let temp_file = write_config(&tasks_dir.path().display().to_string(), "");

    let config = BenchmarkConfig::load_from_file(temp_file.path()).unwrap();

    assert_eq!(config.run.attempt_limit, 2);
    assert_eq!(config.run.global_concurrency, 10);
    assert!(config.providers.contains_key("anthropic"));
    assert_eq!(config.compile.capacity, 64);
}

#[test]
fn config_loads_with_overridden_run_fields() {
    let tasks_dir = tempfile::tempdir().unwrap();
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(
        temp_file,
        r#"
[run]
tasks_dir = "{}"
output_dir = "/tmp/centralbench-out"
attempt_limit = 3
global_concurrency = 5
streaming = true
non_interactive = true

[providers.openai]
max_concurrent = 2
max_requests_per_minute = 20

[compile]
capacity = 8
default_deadline_ms = 30000
"#,
        tasks_dir.path().display()
    )
    .unwrap();

    let config = BenchmarkConfig::load_from_file(temp_file.path()).unwrap();

    assert_eq!(config.run.attempt_limit, 3);
    assert_eq!(config.run.global_concurrency, 5);
    assert!(config.run.streaming);
    assert!(config.run.non_interactive);
    assert_eq!(config.compile.capacity, 8);
    assert_eq!(config.compile.default_deadline_ms, Some(30000));
}

#[test]
fn config_returns_error_when_tasks_dir_missing() {
    let temp_file = write_config("/does/not/exist/ever", "");

    let result = BenchmarkConfig::load_from_file(temp_file.path());

    assert!(matches!(result, Err(ConfigError::TasksDirMissing(_))));
}

#[test]
fn config_returns_error_when_no_providers_configured() {
    let tasks_dir = tempfile::tempdir().unwrap();
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(
        temp_file,
        r#"
[run]
tasks_dir = "{}"
output_dir = "/tmp/centralbench-out"

[providers]
"#,
        tasks_dir.path().display()
    )
    .unwrap();

    let result = BenchmarkConfig::load_from_file(temp_file.path());

    assert!(matches!(result, Err(ConfigError::NoProviders)));
}

#[test]
fn config_returns_error_for_invalid_toml_syntax() {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(temp_file, "[run\ntasks_dir = \"/tmp\"").unwrap();

    let result = BenchmarkConfig::load_from_file(temp_file.path());

    assert!(matches!(result, Err(ConfigError::Parse(_))));
}

#[test]
fn config_returns_error_for_missing_file() {
    use std::path::Path;

    let result = BenchmarkConfig::load_from_file(Path::new("/nonexistent/centralbench.toml"));

    assert!(matches!(result, Err(ConfigError::Io { .. })));
}

#[test]
fn config_rejects_zero_attempt_limit_at_validate_time() {
    let tasks_dir = tempfile::tempdir().unwrap();
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(
        temp_file,
        r#"
[run]
tasks_dir = "{}"
output_dir = "/tmp/centralbench-out"
attempt_limit = 0

[providers.anthropic]
max_concurrent = 1
max_requests_per_minute = 10
"#,
        tasks_dir.path().display()
    )
    .unwrap();

    let result = BenchmarkConfig::load_from_file(temp_file.path());

    assert!(matches!(result, Err(ConfigError::InvalidAttemptLimit(0))));
}

#[test]
fn config_roundtrips_through_toml_serialization() {
    let tasks_dir = tempfile::tempdir().unwrap();
    let temp_file = write_config(&tasks_dir.path().display().to_string(), "");
    let config = BenchmarkConfig::load_from_file(temp_file.path()).unwrap();

    let serialized = toml::to_string(&config).unwrap();
    let reparsed: BenchmarkConfig = toml::from_str(&serialized).unwrap();

    assert_eq!(reparsed, config);
}
