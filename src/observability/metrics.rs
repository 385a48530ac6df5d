//! Thread-safe metrics collection system
//!
//! Provides atomic counters and mutex-protected collections for tracking
//! operational statistics across task execution, LLM calls, and the compile
//! queue.

use once_cell::sync::Lazy;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Global metrics collector instance
pub static METRICS: Lazy<MetricsCollector> = Lazy::new(MetricsCollector::new);

/// Get reference to global metrics collector
pub fn metrics() -> &'static MetricsCollector {
    &METRICS
}

/// Thread-safe metrics collector using atomics and mutexes
pub struct MetricsCollector {
    // Task execution metrics (atomic for high frequency)
    tasks_started: AtomicU64,
    tasks_in_flight: AtomicU64,
    tasks_completed: AtomicU64,
    tasks_failed: AtomicU64,
    current_concurrency: AtomicU64,
    max_concurrency_reached: AtomicU64,

    // LLM call metrics (atomic for high frequency)
    llm_calls_issued: AtomicU64,
    llm_calls_succeeded: AtomicU64,
    llm_calls_failed: AtomicU64,
    llm_calls_retried: AtomicU64,
    active_llm_calls: AtomicU64,

    // Compile queue metrics (atomic for high frequency)
    compile_jobs_submitted: AtomicU64,
    compile_jobs_completed: AtomicU64,
    compile_jobs_failed: AtomicU64,
    compile_queue_depth: AtomicU64,
    max_compile_queue_depth: AtomicU64,

    // Call/job durations (mutex protected for complex operations)
    llm_call_times: Mutex<Vec<u64>>, // milliseconds
    compile_job_times: Mutex<Vec<u64>>, // milliseconds

    // Per-provider statistics (mutex protected for complex data)
    provider_stats: Mutex<HashMap<String, ProviderCallStats>>,

    // Run lifecycle
    run_state: Mutex<String>,
    run_started: AtomicU64,
    state_transitions: AtomicU64,
}

impl MetricsCollector {
    /// Initialize task execution metrics (pure function)
    fn init_task_metrics() -> (AtomicU64, AtomicU64, AtomicU64, AtomicU64, AtomicU64, AtomicU64) {
        (
            AtomicU64::new(0), // tasks_started
            AtomicU64::new(0), // tasks_in_flight
            AtomicU64::new(0), // tasks_completed
            AtomicU64::new(0), // tasks_failed
            AtomicU64::new(0), // current_concurrency
            AtomicU64::new(0), // max_concurrency_reached
        )
    }

    /// Initialize LLM call metrics (pure function)
    fn init_llm_metrics() -> (AtomicU64, AtomicU64, AtomicU64, AtomicU64, AtomicU64) {
        (
            AtomicU64::new(0), // llm_calls_issued
            AtomicU64::new(0), // llm_calls_succeeded
            AtomicU64::new(0), // llm_calls_failed
            AtomicU64::new(0), // llm_calls_retried
            AtomicU64::new(0), // active_llm_calls
        )
    }

    /// Initialize compile queue metrics (pure function)
    fn init_compile_metrics() -> (AtomicU64, AtomicU64, AtomicU64, AtomicU64, AtomicU64) {
        (
            AtomicU64::new(0), // compile_jobs_submitted
            AtomicU64::new(0), // compile_jobs_completed
            AtomicU64::new(0), // compile_jobs_failed
            AtomicU64::new(0), // compile_queue_depth
            AtomicU64::new(0), // max_compile_queue_depth
        )
    }

    pub fn new() -> Self {
        let now = current_timestamp();

        let (tasks_started, tasks_in_flight, tasks_completed, tasks_failed, current_concurrency, max_concurrency_reached) =
            Self::init_task_metrics();
        let (llm_calls_issued, llm_calls_succeeded, llm_calls_failed, llm_calls_retried, active_llm_calls) =
            Self::init_llm_metrics();
        let (
            compile_jobs_submitted,
            compile_jobs_completed,
            compile_jobs_failed,
            compile_queue_depth,
            max_compile_queue_depth,
        ) = Self::init_compile_metrics();

        Self {
            tasks_started,
            tasks_in_flight,
            tasks_completed,
            tasks_failed,
            current_concurrency,
            max_concurrency_reached,
            llm_calls_issued,
            llm_calls_succeeded,
            llm_calls_failed,
            llm_calls_retried,
            active_llm_calls,
            compile_jobs_submitted,
            compile_jobs_completed,
            compile_jobs_failed,
            compile_queue_depth,
            max_compile_queue_depth,
            llm_call_times: Mutex::new(Vec::new()),
            compile_job_times: Mutex::new(Vec::new()),
            provider_stats: Mutex::new(HashMap::new()),
            run_state: Mutex::new("idle".to_string()),
            run_started: AtomicU64::new(now),
            state_transitions: AtomicU64::new(0),
        }
    }

    // Task execution metrics
    pub fn task_started(&self) {
        self.tasks_started.fetch_add(1, Ordering::Relaxed);
        let old_count = self.tasks_in_flight.fetch_add(1, Ordering::Relaxed);
        let new_count = old_count + 1;

        self.current_concurrency.store(new_count, Ordering::Relaxed);
        let current_max = self.max_concurrency_reached.load(Ordering::Relaxed);
        if new_count > current_max {
            self.max_concurrency_reached.store(new_count, Ordering::Relaxed);
        }
    }

    pub fn task_completed(&self) {
        self.tasks_completed.fetch_add(1, Ordering::Relaxed);
        self.tasks_in_flight.fetch_sub(1, Ordering::Relaxed);
        self.current_concurrency.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn task_failed(&self) {
        self.tasks_failed.fetch_add(1, Ordering::Relaxed);
        self.tasks_in_flight.fetch_sub(1, Ordering::Relaxed);
        self.current_concurrency.fetch_sub(1, Ordering::Relaxed);
    }

    fn record_duration(bucket: &Mutex<Vec<u64>>, duration: Duration) {
        if let Ok(mut times) = bucket.lock() {
            times.push(duration.as_millis() as u64);
            // Limit to the last 1000 measurements to prevent unbounded growth
            if times.len() > 1000 {
                times.remove(0);
            }
        }
    }

    // LLM call metrics
    pub fn llm_call_issued(&self, provider: &str) {
        self.llm_calls_issued.fetch_add(1, Ordering::Relaxed);
        self.active_llm_calls.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut stats) = self.provider_stats.lock() {
            Self::get_or_create_provider_stats(&mut stats, provider).calls_issued += 1;
        }
    }

    pub fn llm_call_succeeded(&self, provider: &str, duration: Duration) {
        self.llm_calls_succeeded.fetch_add(1, Ordering::Relaxed);
        self.active_llm_calls.fetch_sub(1, Ordering::Relaxed);
        Self::record_duration(&self.llm_call_times, duration);
        if let Ok(mut stats) = self.provider_stats.lock() {
            let entry = Self::get_or_create_provider_stats(&mut stats, provider);
            entry.calls_succeeded += 1;
            entry.call_times.push(duration.as_millis() as u64);
        }
    }

    pub fn llm_call_failed(&self, provider: &str) {
        self.llm_calls_failed.fetch_add(1, Ordering::Relaxed);
        self.active_llm_calls.fetch_sub(1, Ordering::Relaxed);
        if let Ok(mut stats) = self.provider_stats.lock() {
            Self::get_or_create_provider_stats(&mut stats, provider).calls_failed += 1;
        }
    }

    pub fn llm_call_retried(&self, provider: &str) {
        self.llm_calls_retried.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut stats) = self.provider_stats.lock() {
            Self::get_or_create_provider_stats(&mut stats, provider).retries += 1;
        }
    }

    fn get_or_create_provider_stats<'a>(
        stats: &'a mut HashMap<String, ProviderCallStats>,
        provider: &str,
    ) -> &'a mut ProviderCallStats {
        stats
            .entry(provider.to_string())
            .or_insert_with(|| ProviderCallStats {
                provider: provider.to_string(),
                calls_issued: 0,
                calls_succeeded: 0,
                calls_failed: 0,
                retries: 0,
                call_times: Vec::new(),
            })
    }

    // Compile queue metrics
    pub fn compile_job_submitted(&self) {
        self.compile_jobs_submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn compile_job_completed(&self, duration: Duration) {
        self.compile_jobs_completed.fetch_add(1, Ordering::Relaxed);
        Self::record_duration(&self.compile_job_times, duration);
    }

    pub fn compile_job_failed(&self, duration: Duration) {
        self.compile_jobs_failed.fetch_add(1, Ordering::Relaxed);
        Self::record_duration(&self.compile_job_times, duration);
    }

    pub fn set_compile_queue_depth(&self, depth: usize) {
        let depth = depth as u64;
        self.compile_queue_depth.store(depth, Ordering::Relaxed);
        let current_max = self.max_compile_queue_depth.load(Ordering::Relaxed);
        if depth > current_max {
            self.max_compile_queue_depth.store(depth, Ordering::Relaxed);
        }
    }

    // Run lifecycle
    pub fn set_run_state(&self, state: &str) {
        if let Ok(mut current_state) = self.run_state.lock() {
            if *current_state != state {
                self.state_transitions.fetch_add(1, Ordering::Relaxed);
                *current_state = state.to_string();
            }
        }
    }

    /// Reset all atomic counters (pure function)
    fn reset_atomic_counters(&self) {
        self.tasks_started.store(0, Ordering::Relaxed);
        self.tasks_in_flight.store(0, Ordering::Relaxed);
        self.tasks_completed.store(0, Ordering::Relaxed);
        self.tasks_failed.store(0, Ordering::Relaxed);
        self.current_concurrency.store(0, Ordering::Relaxed);
        self.max_concurrency_reached.store(0, Ordering::Relaxed);
        self.llm_calls_issued.store(0, Ordering::Relaxed);
        self.llm_calls_succeeded.store(0, Ordering::Relaxed);
        self.llm_calls_failed.store(0, Ordering::Relaxed);
        self.llm_calls_retried.store(0, Ordering::Relaxed);
        self.active_llm_calls.store(0, Ordering::Relaxed);
        self.compile_jobs_submitted.store(0, Ordering::Relaxed);
        self.compile_jobs_completed.store(0, Ordering::Relaxed);
        self.compile_jobs_failed.store(0, Ordering::Relaxed);
        self.compile_queue_depth.store(0, Ordering::Relaxed);
        self.max_compile_queue_depth.store(0, Ordering::Relaxed);
    }

    /// Reset lifecycle metrics (pure function)
    fn reset_lifecycle_metrics(&self) {
        self.state_transitions.store(0, Ordering::Relaxed);
        self.run_started.store(current_timestamp(), Ordering::Relaxed);
    }

    /// Reset mutex-protected collections (pure function)
    fn reset_collections(&self) {
        if let Ok(mut times) = self.llm_call_times.lock() {
            times.clear();
        }
        if let Ok(mut times) = self.compile_job_times.lock() {
            times.clear();
        }
        if let Ok(mut stats) = self.provider_stats.lock() {
            stats.clear();
        }
        if let Ok(mut state) = self.run_state.lock() {
            *state = "idle".to_string();
        }
    }

    // Reset all metrics (useful for testing)
    pub fn reset(&self) {
        self.reset_atomic_counters();
        self.reset_lifecycle_metrics();
        self.reset_collections();
    }

    /// Calculate duration statistics over a bucket (pure function)
    fn calculate_duration_statistics(bucket: &Mutex<Vec<u64>>) -> (f64, f64, f64, f64) {
        if let Ok(times) = bucket.lock() {
            if times.is_empty() {
                (0.0, 0.0, 0.0, 0.0)
            } else {
                let mut sorted_times = times.clone();
                sorted_times.sort_unstable();

                let avg = sorted_times.iter().sum::<u64>() as f64 / sorted_times.len() as f64;
                let p50 = percentile(&sorted_times, 50.0);
                let p95 = percentile(&sorted_times, 95.0);
                let p99 = percentile(&sorted_times, 99.0);

                (avg, p50, p95, p99)
            }
        } else {
            (0.0, 0.0, 0.0, 0.0)
        }
    }

    /// Build per-provider statistics summary (pure function)
    fn build_provider_statistics(&self) -> HashMap<String, ProviderCallStatsSnapshot> {
        let Ok(stats) = self.provider_stats.lock() else {
            return HashMap::new();
        };

        stats
            .iter()
            .map(|(name, stats)| (name.clone(), Self::provider_snapshot(stats)))
            .collect()
    }

    /// Build a single provider's snapshot (pure function)
    fn provider_snapshot(stats: &ProviderCallStats) -> ProviderCallStatsSnapshot {
        let avg_call_time_ms = if stats.call_times.is_empty() {
            0.0
        } else {
            stats.call_times.iter().sum::<u64>() as f64 / stats.call_times.len() as f64
        };

        ProviderCallStatsSnapshot {
            provider: stats.provider.clone(),
            calls_issued: stats.calls_issued,
            calls_succeeded: stats.calls_succeeded,
            calls_failed: stats.calls_failed,
            retries: stats.retries,
            avg_call_time_ms,
        }
    }

    /// Get current run state (pure function)
    fn get_current_run_state(&self) -> String {
        self.run_state
            .lock()
            .map(|s| s.clone())
            .unwrap_or_else(|_| "unknown".to_string())
    }

    /// Get complete metrics snapshot
    pub fn get_metrics(&self) -> MetricsSnapshot {
        let now = current_timestamp();
        let (avg_llm_ms, llm_p50, llm_p95, llm_p99) =
            Self::calculate_duration_statistics(&self.llm_call_times);
        let (avg_compile_ms, compile_p50, compile_p95, compile_p99) =
            Self::calculate_duration_statistics(&self.compile_job_times);

        MetricsSnapshot {
            tasks: TaskMetrics {
                tasks_started: self.tasks_started.load(Ordering::Relaxed),
                tasks_in_flight: self.tasks_in_flight.load(Ordering::Relaxed),
                tasks_completed: self.tasks_completed.load(Ordering::Relaxed),
                tasks_failed: self.tasks_failed.load(Ordering::Relaxed),
                current_concurrency: self.current_concurrency.load(Ordering::Relaxed) as u32,
                max_concurrency_reached: self.max_concurrency_reached.load(Ordering::Relaxed) as u32,
            },
            llm: LlmMetrics {
                calls_issued: self.llm_calls_issued.load(Ordering::Relaxed),
                calls_succeeded: self.llm_calls_succeeded.load(Ordering::Relaxed),
                calls_failed: self.llm_calls_failed.load(Ordering::Relaxed),
                calls_retried: self.llm_calls_retried.load(Ordering::Relaxed),
                active_calls: self.active_llm_calls.load(Ordering::Relaxed),
                avg_call_time_ms: avg_llm_ms,
                call_time_p50_ms: llm_p50,
                call_time_p95_ms: llm_p95,
                call_time_p99_ms: llm_p99,
                providers: self.build_provider_statistics(),
            },
            compile: CompileMetrics {
                jobs_submitted: self.compile_jobs_submitted.load(Ordering::Relaxed),
                jobs_completed: self.compile_jobs_completed.load(Ordering::Relaxed),
                jobs_failed: self.compile_jobs_failed.load(Ordering::Relaxed),
                queue_depth: self.compile_queue_depth.load(Ordering::Relaxed),
                max_queue_depth_reached: self.max_compile_queue_depth.load(Ordering::Relaxed),
                avg_job_time_ms: avg_compile_ms,
                job_time_p50_ms: compile_p50,
                job_time_p95_ms: compile_p95,
                job_time_p99_ms: compile_p99,
            },
            run: RunMetrics {
                state: self.get_current_run_state(),
                started_at: self.run_started.load(Ordering::Relaxed),
                state_transitions: self.state_transitions.load(Ordering::Relaxed),
            },
            timestamp: now,
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

// Internal per-provider statistics (with timing data)
#[derive(Debug)]
struct ProviderCallStats {
    provider: String,
    calls_issued: u64,
    calls_succeeded: u64,
    calls_failed: u64,
    retries: u64,
    call_times: Vec<u64>, // milliseconds
}

// Public metrics structures
#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub tasks: TaskMetrics,
    pub llm: LlmMetrics,
    pub compile: CompileMetrics,
    pub run: RunMetrics,
    pub timestamp: u64,
}

#[derive(Debug, Serialize)]
pub struct TaskMetrics {
    pub tasks_started: u64,
    pub tasks_in_flight: u64,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub current_concurrency: u32,
    pub max_concurrency_reached: u32,
}

#[derive(Debug, Serialize)]
pub struct LlmMetrics {
    pub calls_issued: u64,
    pub calls_succeeded: u64,
    pub calls_failed: u64,
    pub calls_retried: u64,
    pub active_calls: u64,
    pub avg_call_time_ms: f64,
    pub call_time_p50_ms: f64,
    pub call_time_p95_ms: f64,
    pub call_time_p99_ms: f64,
    pub providers: HashMap<String, ProviderCallStatsSnapshot>,
}

#[derive(Debug, Serialize)]
pub struct ProviderCallStatsSnapshot {
    pub provider: String,
    pub calls_issued: u64,
    pub calls_succeeded: u64,
    pub calls_failed: u64,
    pub retries: u64,
    pub avg_call_time_ms: f64,
}

#[derive(Debug, Serialize)]
pub struct CompileMetrics {
    pub jobs_submitted: u64,
    pub jobs_completed: u64,
    pub jobs_failed: u64,
    pub queue_depth: u64,
    pub max_queue_depth_reached: u64,
    pub avg_job_time_ms: f64,
    pub job_time_p50_ms: f64,
    pub job_time_p95_ms: f64,
    pub job_time_p99_ms: f64,
}

#[derive(Debug, Serialize)]
pub struct RunMetrics {
    pub state: String,
    pub started_at: u64,
    pub state_transitions: u64,
}

// Helper functions
fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn percentile(sorted_data: &[u64], percentile: f64) -> f64 {
    if sorted_data.is_empty() {
        return 0.0;
    }

    let len = sorted_data.len();
    let index = (percentile / 100.0) * (len - 1) as f64;

    if index.fract() == 0.0 {
        sorted_data[index as usize] as f64
    } else {
        let lower_index = index.floor() as usize;
        let upper_index = index.ceil() as usize;
        let lower_value = sorted_data[lower_index] as f64;
        let upper_value = sorted_data[upper_index] as f64;

        lower_value + (upper_value - lower_value) * index.fract()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_task_metrics() {
        let collector = MetricsCollector::new();

        collector.task_started();
        collector.task_completed();

        let metrics = collector.get_metrics();
        assert_eq!(metrics.tasks.tasks_started, 1);
        assert_eq!(metrics.tasks.tasks_completed, 1);
        assert_eq!(metrics.tasks.tasks_in_flight, 0);
    }

    #[test]
    fn test_llm_call_metrics() {
        let collector = MetricsCollector::new();

        collector.llm_call_issued("anthropic");
        collector.llm_call_succeeded("anthropic", Duration::from_millis(1500));

        let metrics = collector.get_metrics();
        assert_eq!(metrics.llm.calls_issued, 1);
        assert_eq!(metrics.llm.calls_succeeded, 1);
        assert_eq!(metrics.llm.active_calls, 0);
        assert!(metrics.llm.avg_call_time_ms > 1400.0);

        let provider = metrics.llm.providers.get("anthropic").unwrap();
        assert_eq!(provider.calls_succeeded, 1);
    }

    #[test]
    fn test_compile_queue_metrics() {
        let collector = MetricsCollector::new();

        collector.compile_job_submitted();
        collector.compile_job_submitted();
        collector.set_compile_queue_depth(2);
        collector.compile_job_completed(Duration::from_millis(500));
        collector.compile_job_failed(Duration::from_millis(300));

        let metrics = collector.get_metrics();
        assert_eq!(metrics.compile.jobs_submitted, 2);
        assert_eq!(metrics.compile.jobs_completed, 1);
        assert_eq!(metrics.compile.jobs_failed, 1);
        assert_eq!(metrics.compile.queue_depth, 2);
        assert_eq!(metrics.compile.max_queue_depth_reached, 2);
    }

    #[test]
    fn test_thread_safety() {
        let collector = Arc::new(MetricsCollector::new());

        let mut handles = vec![];

        for _ in 0..10 {
            let collector_clone = Arc::clone(&collector);
            let handle = thread::spawn(move || {
                for _ in 0..100 {
                    collector_clone.task_started();
                    collector_clone.llm_call_issued("mock");
                }
            });
            handles.push(handle);
        }

        for handle in handles {
            handle.join().unwrap();
        }

        let metrics = collector.get_metrics();
        assert_eq!(metrics.tasks.tasks_started, 1000);
        assert_eq!(metrics.llm.calls_issued, 1000);
    }

    #[test]
    fn test_percentile_calculation() {
        let data = vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10];

        let p50 = percentile(&data, 50.0);
        let p95 = percentile(&data, 95.0);
        let p0 = percentile(&data, 0.0);
        let p100 = percentile(&data, 100.0);

        assert!((p50 - 5.5).abs() < 0.1, "P50: expected ~5.5, got {p50}");
        assert!((p95 - 9.5).abs() < 0.1, "P95: expected ~9.5, got {p95}");
        assert!((p0 - 1.0).abs() < 0.1, "P0: expected ~1.0, got {p0}");
        assert!(
            (p100 - 10.0).abs() < 0.1,
            "P100: expected ~10.0, got {p100}"
        );

        assert_eq!(percentile(&[], 50.0), 0.0);
    }

    #[test]
    fn test_reset_functionality() {
        let collector = MetricsCollector::new();

        collector.task_started();
        collector.llm_call_issued("mock");
        collector.llm_call_succeeded("mock", Duration::from_millis(100));

        let metrics_before = collector.get_metrics();
        assert_eq!(metrics_before.tasks.tasks_started, 1);

        collector.reset();

        let metrics_after = collector.get_metrics();
        assert_eq!(metrics_after.tasks.tasks_started, 0);
        assert!(metrics_after.llm.providers.is_empty());
    }
}
