//! # manifold-queue — the engine's queue abstraction
//!
//! One contract, three backends:
//!
//! | Type | Transport | Delivery |
//! |------|-----------|----------|
//! | [`MemoryQueue`] | bounded `mpsc` channel | at-least-once, redelivery on nack |
//! | [`RabbitMqQueue`] | AMQP 0-9-1 via `lapin` | durable queues, manual ack |
//! | [`KafkaQueue`] | `rdkafka` consumer group | commit on ack, re-produce on nack |
//!
//! Handlers receive a [`Delivery`] and answer with a [`Disposition`].
//! `Nack { requeue: true }` redelivers; all backends are at-least-once, so
//! consumers dedup on their own keys (the poller fingerprints being the
//! canonical example).

pub mod error;
pub mod kafka;
pub mod memory;
pub mod rabbitmq;

pub use error::QueueError;
pub use kafka::KafkaQueue;
pub use memory::MemoryQueue;
pub use rabbitmq::RabbitMqQueue;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

/// One message handed to a subscriber.
#[derive(Clone, Debug)]
pub struct Delivery {
    pub topic: String,
    pub payload: Value,
    /// 1 for the first delivery; counts redeliveries where the backend can
    /// track them.
    pub attempt: u32,
}

/// Subscriber verdict on a delivery.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Disposition {
    Ack,
    Nack { requeue: bool },
}

/// Message consumer registered on a topic.
#[async_trait]
pub trait QueueHandler: Send + Sync + 'static {
    async fn handle(&self, delivery: Delivery) -> Disposition;
}

/// Unified queue contract: enqueue with ack semantics, subscribe with
/// explicit ack/nack, at-least-once delivery.
#[async_trait]
pub trait QueueBackend: Send + Sync + 'static {
    /// Publish a payload; returns once the backend has accepted it.
    async fn enqueue(&self, topic: &str, payload: Value) -> Result<(), QueueError>;

    /// Attach a handler to a topic. One subscription per topic; the handler
    /// is invoked for every delivery until [`QueueBackend::shutdown`].
    async fn subscribe(
        &self,
        topic: &str,
        handler: Arc<dyn QueueHandler>,
    ) -> Result<(), QueueError>;

    /// Stop all consumer loops.
    fn shutdown(&self);

    /// Backend name as recorded in the switch row.
    fn kind(&self) -> &'static str;
}
