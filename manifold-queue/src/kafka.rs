//! Kafka backend via `rdkafka`.
//!
//! One consumer group per engine deployment; offsets commit on ack.
//! `Nack { requeue: true }` re-produces the payload onto the topic and
//! commits the original offset, which keeps the partition moving while
//! preserving at-least-once delivery.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use rdkafka::Message;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::{Delivery, Disposition, QueueBackend, QueueError, QueueHandler};

const PUBLISH_TIMEOUT: Duration = Duration::from_secs(10);

pub struct KafkaQueue {
    brokers: String,
    group_id: String,
    producer: FutureProducer,
    cancel: CancellationToken,
}

impl KafkaQueue {
    pub fn connect(brokers: &str, group_id: &str) -> Result<Self, QueueError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", "10000")
            .create()
            .map_err(|e| QueueError::Connect(e.to_string()))?;
        Ok(Self {
            brokers: brokers.to_string(),
            group_id: group_id.to_string(),
            producer,
            cancel: CancellationToken::new(),
        })
    }

    async fn produce(&self, topic: &str, body: &[u8]) -> Result<(), QueueError> {
        self.producer
            .send(
                FutureRecord::<(), [u8]>::to(topic).payload(body),
                Timeout::After(PUBLISH_TIMEOUT),
            )
            .await
            .map_err(|(e, _)| QueueError::Publish(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl QueueBackend for KafkaQueue {
    async fn enqueue(&self, topic: &str, payload: Value) -> Result<(), QueueError> {
        let body = serde_json::to_vec(&payload)?;
        self.produce(topic, &body).await
    }

    async fn subscribe(
        &self,
        topic: &str,
        handler: Arc<dyn QueueHandler>,
    ) -> Result<(), QueueError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &self.brokers)
            .set("group.id", &self.group_id)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .create()
            .map_err(|e| QueueError::Subscribe(e.to_string()))?;
        consumer
            .subscribe(&[topic])
            .map_err(|e| QueueError::Subscribe(e.to_string()))?;

        let producer = self.producer.clone();
        let cancel = self.cancel.clone();
        let topic_name = topic.to_string();
        tokio::spawn(async move {
            loop {
                let message = tokio::select! {
                    _ = cancel.cancelled() => break,
                    received = consumer.recv() => match received {
                        Ok(m) => m,
                        Err(e) => {
                            error!(topic = %topic_name, error = %e, "kafka consume error");
                            continue;
                        }
                    },
                };

                let payload: Value = match message
                    .payload()
                    .map(serde_json::from_slice)
                    .transpose()
                {
                    Ok(Some(v)) => v,
                    Ok(None) | Err(_) => {
                        warn!(topic = %topic_name, "dropping undecodable kafka message");
                        let _ = consumer.commit_message(&message, CommitMode::Async);
                        continue;
                    }
                };

                let disposition = handler
                    .handle(Delivery {
                        topic: topic_name.clone(),
                        payload: payload.clone(),
                        attempt: 1,
                    })
                    .await;
                match disposition {
                    Disposition::Ack | Disposition::Nack { requeue: false } => {}
                    Disposition::Nack { requeue: true } => {
                        // Re-produce, then commit the original offset.
                        if let Ok(body) = serde_json::to_vec(&payload) {
                            let _ = producer
                                .send(
                                    FutureRecord::<(), [u8]>::to(&topic_name).payload(&body),
                                    Timeout::After(PUBLISH_TIMEOUT),
                                )
                                .await;
                        }
                    }
                }
                if let Err(e) = consumer.commit_message(&message, CommitMode::Async) {
                    error!(topic = %topic_name, error = %e, "kafka commit failed");
                }
            }
            debug!(topic = %topic_name, "kafka consumer stopped");
        });
        Ok(())
    }

    fn shutdown(&self) {
        self.cancel.cancel();
    }

    fn kind(&self) -> &'static str {
        "kafka"
    }
}
