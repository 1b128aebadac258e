//! In-memory queue backend over bounded `mpsc` channels.
//!
//! The channel bound is the backpressure mechanism: `enqueue` waits when the
//! topic buffer is full. Nacked deliveries are re-sent with an incremented
//! attempt counter, up to a redelivery cap that keeps a permanently failing
//! handler from spinning the loop forever.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{Delivery, Disposition, QueueBackend, QueueError, QueueHandler};

/// Default per-topic buffer.
const DEFAULT_CAPACITY: usize = 1024;
/// Redeliveries tolerated before a message is dropped with a warning.
const MAX_REDELIVERIES: u32 = 25;

struct Topic {
    tx: mpsc::Sender<Delivery>,
    /// Taken by the first subscriber.
    rx: Mutex<Option<mpsc::Receiver<Delivery>>>,
}

/// Bounded in-process queue. `Clone`-free by design: share it behind an
/// `Arc` like the other backends.
pub struct MemoryQueue {
    topics: DashMap<String, Arc<Topic>>,
    capacity: usize,
    cancel: CancellationToken,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            topics: DashMap::new(),
            capacity,
            cancel: CancellationToken::new(),
        }
    }

    fn topic(&self, name: &str) -> Arc<Topic> {
        self.topics
            .entry(name.to_string())
            .or_insert_with(|| {
                let (tx, rx) = mpsc::channel(self.capacity);
                Arc::new(Topic {
                    tx,
                    rx: Mutex::new(Some(rx)),
                })
            })
            .clone()
    }
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QueueBackend for MemoryQueue {
    async fn enqueue(&self, topic: &str, payload: Value) -> Result<(), QueueError> {
        let topic_handle = self.topic(topic);
        topic_handle
            .tx
            .send(Delivery {
                topic: topic.to_string(),
                payload,
                attempt: 1,
            })
            .await
            .map_err(|_| QueueError::Publish("topic channel closed".into()))
    }

    async fn subscribe(
        &self,
        topic: &str,
        handler: Arc<dyn QueueHandler>,
    ) -> Result<(), QueueError> {
        let topic_handle = self.topic(topic);
        let mut rx = topic_handle
            .rx
            .lock()
            .await
            .take()
            .ok_or_else(|| QueueError::Subscribe(format!("topic '{topic}' already subscribed")))?;

        let tx = topic_handle.tx.clone();
        let cancel = self.cancel.clone();
        let topic_name = topic.to_string();
        tokio::spawn(async move {
            loop {
                let delivery = tokio::select! {
                    _ = cancel.cancelled() => break,
                    received = rx.recv() => match received {
                        Some(d) => d,
                        None => break,
                    },
                };
                let attempt = delivery.attempt;
                match handler.handle(delivery.clone()).await {
                    Disposition::Ack => {}
                    Disposition::Nack { requeue: false } => {
                        debug!(topic = %topic_name, "delivery nacked without requeue");
                    }
                    Disposition::Nack { requeue: true } => {
                        if attempt > MAX_REDELIVERIES {
                            warn!(
                                topic = %topic_name,
                                attempt,
                                "dropping delivery past redelivery cap"
                            );
                            continue;
                        }
                        let mut retry = delivery;
                        retry.attempt += 1;
                        if tx.send(retry).await.is_err() {
                            break;
                        }
                    }
                }
            }
            debug!(topic = %topic_name, "memory queue consumer stopped");
        });
        Ok(())
    }

    fn shutdown(&self) {
        self.cancel.cancel();
    }

    fn kind(&self) -> &'static str {
        "inmemory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    struct Counting {
        seen: AtomicU32,
        nack_first: bool,
    }

    #[async_trait]
    impl QueueHandler for Counting {
        async fn handle(&self, delivery: Delivery) -> Disposition {
            let n = self.seen.fetch_add(1, Ordering::SeqCst);
            if self.nack_first && n == 0 {
                assert_eq!(delivery.attempt, 1);
                Disposition::Nack { requeue: true }
            } else {
                Disposition::Ack
            }
        }
    }

    #[tokio::test]
    async fn delivers_enqueued_payloads() {
        let queue = MemoryQueue::new();
        let handler = Arc::new(Counting {
            seen: AtomicU32::new(0),
            nack_first: false,
        });
        queue.subscribe("t", handler.clone()).await.unwrap();
        queue.enqueue("t", json!({"n": 1})).await.unwrap();
        queue.enqueue("t", json!({"n": 2})).await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(handler.seen.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn nack_redelivers_with_bumped_attempt() {
        let queue = MemoryQueue::new();
        let handler = Arc::new(Counting {
            seen: AtomicU32::new(0),
            nack_first: true,
        });
        queue.subscribe("t", handler.clone()).await.unwrap();
        queue.enqueue("t", json!({})).await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        // First delivery nacked, second acked.
        assert_eq!(handler.seen.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn second_subscriber_is_rejected() {
        let queue = MemoryQueue::new();
        let handler = Arc::new(Counting {
            seen: AtomicU32::new(0),
            nack_first: false,
        });
        queue.subscribe("t", handler.clone()).await.unwrap();
        let err = queue.subscribe("t", handler).await.unwrap_err();
        assert!(matches!(err, QueueError::Subscribe(_)));
    }

    #[tokio::test]
    async fn enqueue_before_subscribe_is_buffered() {
        let queue = MemoryQueue::new();
        queue.enqueue("t", json!({"early": true})).await.unwrap();

        let handler = Arc::new(Counting {
            seen: AtomicU32::new(0),
            nack_first: false,
        });
        queue.subscribe("t", handler.clone()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(handler.seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn shutdown_stops_consumption() {
        let queue = MemoryQueue::new();
        let handler = Arc::new(Counting {
            seen: AtomicU32::new(0),
            nack_first: false,
        });
        queue.subscribe("t", handler.clone()).await.unwrap();
        queue.shutdown();
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.enqueue("t", json!({})).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(handler.seen.load(Ordering::SeqCst), 0);
    }
}
