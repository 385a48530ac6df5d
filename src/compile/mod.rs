//! Compile queue (§4.B)
//!
//! A bounded FIFO with a single consumer, serializing access to the one
//! shared build container. Producers submit jobs through `submit`; the
//! dedicated consumer loop spawned by `CompileQueue::spawn` dequeues one at
//! a time, compiles, runs tests on success, and replies on the job's
//! private completion channel. Priority floats higher-attempt jobs ahead of
//! fresh work (§9 Open Question 1: "attempt number wins"); equal priority
//! is strict FIFO.

use crate::compile_span;
use crate::container::ContainerProvider;
use crate::model::{CompileOutcome, TaskId, TestOutcome, VariantId};
use crate::observability::metrics::metrics;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{oneshot, Mutex, Notify, Semaphore};
use tracing::{error, warn, Instrument};

#[derive(Debug, Error)]
pub enum CompileQueueError {
    #[error("timed out waiting for queue admission after {0:?}")]
    QueueTimeout(Duration),
    #[error("compile container is unavailable: {0}")]
    Critical(String),
    #[error("job cancelled")]
    Cancelled,
}

/// One compile+test job submitted to the queue.
#[derive(Debug, Clone)]
pub struct CompileJob {
    pub task_id: TaskId,
    pub variant_id: VariantId,
    pub code: String,
    /// Higher values dequeue first; equal priorities are FIFO. Callers pass
    /// the attempt number per the queue's priority policy.
    pub priority: u32,
    pub deadline: Option<Duration>,
}

/// Outcome of a job that reached the container. `test` is `None` when
/// compilation failed (tests never ran).
#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub compile: CompileOutcome,
    pub test: Option<TestOutcome>,
}

struct QueueEntry {
    priority: u32,
    seq: u64,
    job: CompileJob,
    responder: oneshot::Sender<Result<JobOutcome, CompileQueueError>>,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}
impl Eq for QueueEntry {}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap: higher priority pops first, and among
        // equal priorities the entry with the smaller (earlier) seq pops
        // first, giving FIFO ordering within a priority tier.
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Shared queue state. `submit` runs on producer tasks; the consumer loop
/// spawned by `spawn` owns the container for the run's lifetime.
pub struct CompileQueue {
    capacity_gate: Semaphore,
    heap: Mutex<BinaryHeap<QueueEntry>>,
    notify: Notify,
    next_seq: AtomicU64,
    container_lost: AtomicBool,
}

impl CompileQueue {
    /// Spawns the queue's consumer loop against `container`/`container_name`
    /// and returns a handle producers submit jobs through, plus the
    /// consumer's join handle.
    pub fn spawn(
        container: Arc<dyn ContainerProvider>,
        container_name: String,
        capacity: usize,
    ) -> (Arc<Self>, tokio::task::JoinHandle<()>) {
        let queue = Arc::new(Self {
            capacity_gate: Semaphore::new(capacity),
            heap: Mutex::new(BinaryHeap::new()),
            notify: Notify::new(),
            next_seq: AtomicU64::new(0),
            container_lost: AtomicBool::new(false),
        });

        let consumer = Arc::clone(&queue);
        let handle = tokio::spawn(async move {
            consumer.run(container, container_name).await;
        });

        (queue, handle)
    }

    /// Submits a job. Blocks cooperatively until there is room in the
    /// queue; if `job.deadline` is set and elapses first, returns
    /// `QueueTimeout`. Resolves once the job's compile (and test, if
    /// compile succeeded) outcome is available.
    pub async fn submit(&self, job: CompileJob) -> Result<JobOutcome, CompileQueueError> {
        let permit = match job.deadline {
            None => self
                .capacity_gate
                .acquire()
                .await
                .expect("capacity semaphore is never closed"),
            Some(deadline) => tokio::time::timeout(deadline, self.capacity_gate.acquire())
                .await
                .map_err(|_| CompileQueueError::QueueTimeout(deadline))?
                .expect("capacity semaphore is never closed"),
        };
        // The permit only guards room in the waiting queue; release it the
        // instant the job is enqueued so the next producer can wait too.
        permit.forget();
        let restore_slot = &self.capacity_gate;

        let (tx, rx) = oneshot::channel();
        let seq = self.next_seq.fetch_add(1, AtomicOrdering::Relaxed);
        {
            let mut heap = self.heap.lock().await;
            heap.push(QueueEntry {
                priority: job.priority,
                seq,
                job,
                responder: tx,
            });
            metrics().set_compile_queue_depth(heap.len());
        }
        metrics().compile_job_submitted();
        self.notify.notify_one();

        let result = rx.await.unwrap_or(Err(CompileQueueError::Cancelled));
        restore_slot.add_permits(1);
        result
    }

    /// Best-effort snapshot of how many jobs are waiting (not yet running).
    /// Used by the orchestrator's progress events (§4.H); `try_lock` avoids
    /// blocking progress reporting behind whatever else holds the heap.
    pub fn pending_len(&self) -> usize {
        self.heap.try_lock().map(|heap| heap.len()).unwrap_or(0)
    }

    /// Removes queued (not yet running) jobs for a (task, variant), used by
    /// the orchestrator's cancellation path (§5). Jobs already dequeued by
    /// the consumer are not interruptible and run to completion.
    pub async fn cancel_pending(&self, task_id: &TaskId, variant_id: &VariantId) -> usize {
        let mut heap = self.heap.lock().await;
        let remaining: Vec<QueueEntry> = std::mem::take(&mut *heap).into_vec();
        let mut cancelled = 0;
        let mut kept = BinaryHeap::new();
        for entry in remaining {
            if entry.job.task_id == *task_id && entry.job.variant_id == *variant_id {
                let _ = entry.responder.send(Err(CompileQueueError::Cancelled));
                cancelled += 1;
                self.capacity_gate.add_permits(1);
            } else {
                kept.push(entry);
            }
        }
        *heap = kept;
        cancelled
    }

    async fn run(&self, container: Arc<dyn ContainerProvider>, container_name: String) {
        loop {
            let entry = loop {
                let mut heap = self.heap.lock().await;
                if let Some(entry) = heap.pop() {
                    metrics().set_compile_queue_depth(heap.len());
                    break entry;
                }
                drop(heap);
                self.notify.notified().await;
            };

            if self.container_lost.load(AtomicOrdering::Acquire) {
                let _ = entry.responder.send(Err(CompileQueueError::Critical(
                    format!("container {container_name} unavailable"),
                )));
                continue;
            }

            let started = Instant::now();
            let span = compile_span!(task_id = %entry.job.task_id, variant_id = %entry.job.variant_id);
            let outcome = self
                .run_one(&container, &container_name, &entry.job)
                .instrument(span)
                .await;
            match &outcome {
                Ok(_) => metrics().compile_job_completed(started.elapsed()),
                Err(CompileQueueError::Critical(ref message)) => {
                    error!(container = %container_name, %message, "compile container lost, failing fast");
                    self.container_lost.store(true, AtomicOrdering::Release);
                    metrics().compile_job_failed(started.elapsed());
                }
                Err(_) => metrics().compile_job_failed(started.elapsed()),
            }
            let _ = entry.responder.send(outcome);
        }
    }

    async fn run_one(
        &self,
        container: &Arc<dyn ContainerProvider>,
        container_name: &str,
        job: &CompileJob,
    ) -> Result<JobOutcome, CompileQueueError> {
        let project_dir = materialize_project(&job.task_id, &job.variant_id, &job.code)
            .map_err(|e| CompileQueueError::Critical(e.to_string()))?;

        let compile = container
            .compile(container_name, project_dir.path())
            .await
            .map_err(|e| match e {
                crate::container::ContainerError::Lost(_)
                | crate::container::ContainerError::Unhealthy(_) => {
                    CompileQueueError::Critical(e.to_string())
                }
                other => CompileQueueError::Critical(other.to_string()),
            })?;

        if !compile.success {
            return Ok(JobOutcome {
                compile: CompileOutcome {
                    success: false,
                    errors: compile.errors,
                    warnings: compile.warnings,
                },
                test: None,
            });
        }

        let artifact_path = compile.artifact_path.clone().unwrap_or(project_dir.path().to_path_buf());
        let test_result = container
            .run_tests(container_name, &artifact_path)
            .await
            .map_err(|e| CompileQueueError::Critical(e.to_string()))?;

        Ok(JobOutcome {
            compile: CompileOutcome {
                success: true,
                errors: compile.errors,
                warnings: compile.warnings,
            },
            test: Some(TestOutcome {
                passed: test_result.passed_tests,
                total: test_result.total_tests,
                failure_messages: test_result
                    .results
                    .iter()
                    .filter(|r| !r.passed)
                    .filter_map(|r| r.message.clone())
                    .collect(),
            }),
        })
    }
}

/// Writes a job's generated code to a scratch directory the container can
/// mount. Kept deliberately simple: one file per job, named for the task.
fn materialize_project(
    task_id: &TaskId,
    variant_id: &VariantId,
    code: &str,
) -> std::io::Result<tempfile::TempDir> {
    let dir = tempfile::Builder::new()
        .prefix(&format!("centralbench-{task_id}-{variant_id}-"))
        .tempdir()?;
    std::fs::write(dir.path().join("main.erps"), code)?;
    warn_if_empty(code, task_id);
    Ok(dir)
}

fn warn_if_empty(code: &str, task_id: &TaskId) {
    if code.trim().is_empty() {
        warn!(%task_id, "generated code is empty before compile submission");
    }
}
