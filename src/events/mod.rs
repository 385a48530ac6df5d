//! Event stream (§4.H)
//!
//! Single-producer-multiple-consumer publication of run lifecycle events.
//! Generalizes the teacher's `ProgressMessage`/topic scheme from MQTT
//! topics to an in-process fan-out over one bounded `mpsc` channel per
//! subscriber: one closed event enum instead of a category/topic string,
//! and subscribers receive every event rather than filtering by topic
//! subscription.
//!
//! Ordering contract (§4.H): for a single (taskId, variantId), events are
//! published in causal order by construction — the executor that owns that
//! pair publishes its own events sequentially, and `publish` does not
//! return until every subscriber's channel has accepted the event, so the
//! next publish from the same caller can't race ahead of this one.

use crate::model::{FailureReason, TaskComparison, TaskExecutionResult};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Closed set of lifecycle events (§4.H).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BenchEvent {
    TaskStarted {
        task_id: String,
        variants: Vec<String>,
    },
    LlmStarted {
        task_id: String,
        variant_id: String,
        attempt: u32,
    },
    LlmChunk {
        task_id: String,
        variant_id: String,
        attempt: u32,
        text: String,
    },
    LlmCompleted {
        task_id: String,
        variant_id: String,
        attempt: u32,
        success: bool,
    },
    CompileQueued {
        task_id: String,
        variant_id: String,
        attempt: u32,
    },
    CompileStarted {
        task_id: String,
        variant_id: String,
        attempt: u32,
    },
    CompileCompleted {
        task_id: String,
        variant_id: String,
        attempt: u32,
        success: bool,
    },
    Result {
        result: Box<TaskExecutionResult>,
    },
    TaskCompleted {
        comparison: Box<TaskComparison>,
    },
    Progress {
        completed: usize,
        total: usize,
        active_llm_calls: usize,
        compile_queue_length: usize,
        eta_ms: Option<u64>,
    },
    Error {
        task_id: Option<String>,
        variant_id: Option<String>,
        reason: Option<FailureReason>,
        message: String,
    },
}

/// Default per-subscriber channel capacity. A subscriber that falls this
/// far behind makes `publish` wait on it rather than losing events (§4.H
/// "dropped events are not allowed; slow subscribers exert backpressure on
/// the publisher").
const DEFAULT_CAPACITY: usize = 256;

/// Publish side of the event stream, owned by the orchestrator.
#[derive(Clone)]
pub struct EventPublisher {
    subscribers: Arc<Mutex<Vec<mpsc::Sender<BenchEvent>>>>,
    capacity: usize,
}

impl EventPublisher {
    pub fn new() -> (Self, EventSubscription) {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> (Self, EventSubscription) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let publisher = Self {
            subscribers: Arc::new(Mutex::new(vec![sender])),
            capacity: capacity.max(1),
        };
        (publisher, EventSubscription { receiver })
    }

    /// Adds another independent subscriber.
    pub fn subscribe(&self) -> EventSubscription {
        let (sender, receiver) = mpsc::channel(self.capacity);
        self.subscribers.lock().unwrap().push(sender);
        EventSubscription { receiver }
    }

    /// Publishes an event to every live subscriber, awaiting each one's
    /// channel in turn. A subscriber that never drains stalls this call
    /// instead of the event being silently dropped — callers that cannot
    /// tolerate that block must keep their subscription drained (§9
    /// "Streaming": "the pool must not buffer unboundedly", which this
    /// backpressure enforces at the event layer too).
    pub async fn publish(&self, event: BenchEvent) {
        let senders: Vec<_> = self.subscribers.lock().unwrap().clone();
        for sender in &senders {
            let _ = sender.send(event.clone()).await;
        }
        self.subscribers.lock().unwrap().retain(|s| !s.is_closed());
    }
}

/// One subscriber's receive handle.
pub struct EventSubscription {
    receiver: mpsc::Receiver<BenchEvent>,
}

impl EventSubscription {
    /// Awaits the next event. Returns `None` once every publisher clone
    /// tied to this subscription has dropped.
    pub async fn recv(&mut self) -> Option<BenchEvent> {
        self.receiver.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn progress_event() -> BenchEvent {
        BenchEvent::Progress {
            completed: 0,
            total: 1,
            active_llm_calls: 0,
            compile_queue_length: 0,
            eta_ms: None,
        }
    }

    #[tokio::test]
    async fn subscriber_receives_published_events_in_order() {
        let (publisher, mut subscription) = EventPublisher::new();

        publisher
            .publish(BenchEvent::TaskStarted {
                task_id: "t1".to_string(),
                variants: vec!["v1".to_string()],
            })
            .await;
        publisher
            .publish(BenchEvent::LlmStarted {
                task_id: "t1".to_string(),
                variant_id: "v1".to_string(),
                attempt: 1,
            })
            .await;

        let first = subscription.recv().await.unwrap();
        assert!(matches!(first, BenchEvent::TaskStarted { .. }));
        let second = subscription.recv().await.unwrap();
        assert!(matches!(second, BenchEvent::LlmStarted { .. }));
    }

    #[tokio::test]
    async fn multiple_subscribers_each_receive_every_event() {
        let (publisher, mut sub_a) = EventPublisher::new();
        let mut sub_b = publisher.subscribe();

        publisher.publish(progress_event()).await;

        assert!(matches!(sub_a.recv().await, Some(BenchEvent::Progress { .. })));
        assert!(matches!(sub_b.recv().await, Some(BenchEvent::Progress { .. })));
    }

    #[tokio::test]
    async fn subscription_returns_none_once_publisher_dropped() {
        let (publisher, mut subscription) = EventPublisher::new();
        drop(publisher);
        assert!(subscription.recv().await.is_none());
    }

    #[tokio::test]
    async fn recv_is_pending_until_something_is_published() {
        let (publisher, subscription) = EventPublisher::new();
        let mut task = tokio_test::task::spawn(async move {
            let mut subscription = subscription;
            subscription.recv().await
        });

        tokio_test::assert_pending!(task.poll());

        publisher
            .publish(BenchEvent::TaskStarted {
                task_id: "t1".to_string(),
                variants: vec!["v1".to_string()],
            })
            .await;

        let event = tokio_test::assert_ready!(task.poll());
        assert!(matches!(event, Some(BenchEvent::TaskStarted { .. })));
    }

    #[tokio::test]
    async fn publish_blocks_until_a_full_subscriber_drains() {
        let (publisher, mut subscription) = EventPublisher::with_capacity(1);
        publisher.publish(progress_event()).await;

        let mut publish_task = tokio_test::task::spawn(publisher.publish(progress_event()));
        tokio_test::assert_pending!(publish_task.poll());

        subscription.recv().await.unwrap();
        tokio_test::assert_ready!(publish_task.poll());
    }

    #[tokio::test]
    async fn a_dropped_subscriber_does_not_block_future_publishes() {
        let (publisher, subscription) = EventPublisher::with_capacity(1);
        drop(subscription);

        // The dropped subscriber's sender is pruned on the first publish
        // after it closes; a second publish must not hang waiting on it.
        publisher.publish(progress_event()).await;
        publisher.publish(progress_event()).await;
    }
}
