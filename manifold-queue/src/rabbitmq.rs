//! RabbitMQ (AMQP 0-9-1) backend via `lapin`.
//!
//! Topics map to durable queues on the default exchange. Consumers ack
//! manually; `Nack { requeue: true }` hands the message back to the broker
//! for redelivery.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashSet;
use futures_util::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions,
    QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{Delivery, Disposition, QueueBackend, QueueError, QueueHandler};

pub struct RabbitMqQueue {
    connection: Connection,
    publish_channel: Channel,
    declared: DashSet<String>,
    cancel: CancellationToken,
}

impl RabbitMqQueue {
    /// Connect and open the shared publish channel.
    pub async fn connect(uri: &str) -> Result<Self, QueueError> {
        let props = ConnectionProperties::default()
            .with_executor(tokio_executor_trait::Tokio::current())
            .with_reactor(tokio_reactor_trait::Tokio);
        let connection = Connection::connect(uri, props)
            .await
            .map_err(|e| QueueError::Connect(e.to_string()))?;
        let publish_channel = connection
            .create_channel()
            .await
            .map_err(|e| QueueError::Connect(e.to_string()))?;
        info!("connected to rabbitmq");
        Ok(Self {
            connection,
            publish_channel,
            declared: DashSet::new(),
            cancel: CancellationToken::new(),
        })
    }

    async fn declare(&self, channel: &Channel, topic: &str) -> Result<(), QueueError> {
        if self.declared.contains(topic) {
            return Ok(());
        }
        channel
            .queue_declare(
                topic,
                QueueDeclareOptions {
                    durable: true,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| QueueError::Connect(format!("declare '{topic}': {e}")))?;
        self.declared.insert(topic.to_string());
        Ok(())
    }
}

#[async_trait]
impl QueueBackend for RabbitMqQueue {
    async fn enqueue(&self, topic: &str, payload: Value) -> Result<(), QueueError> {
        self.declare(&self.publish_channel, topic).await?;
        let body = serde_json::to_vec(&payload)?;
        let confirm = self
            .publish_channel
            .basic_publish(
                "",
                topic,
                BasicPublishOptions::default(),
                &body,
                BasicProperties::default().with_delivery_mode(2),
            )
            .await
            .map_err(|e| QueueError::Publish(e.to_string()))?;
        confirm
            .await
            .map_err(|e| QueueError::Publish(e.to_string()))?;
        Ok(())
    }

    async fn subscribe(
        &self,
        topic: &str,
        handler: Arc<dyn QueueHandler>,
    ) -> Result<(), QueueError> {
        let channel = self
            .connection
            .create_channel()
            .await
            .map_err(|e| QueueError::Subscribe(e.to_string()))?;
        self.declare(&channel, topic).await?;

        let mut consumer = channel
            .basic_consume(
                topic,
                &format!("manifold-{topic}"),
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| QueueError::Subscribe(e.to_string()))?;

        let cancel = self.cancel.clone();
        let topic_name = topic.to_string();
        tokio::spawn(async move {
            loop {
                let delivery = tokio::select! {
                    _ = cancel.cancelled() => break,
                    next = consumer.next() => match next {
                        Some(Ok(d)) => d,
                        Some(Err(e)) => {
                            error!(topic = %topic_name, error = %e, "amqp consume error");
                            continue;
                        }
                        None => break,
                    },
                };

                let payload: Value = match serde_json::from_slice(&delivery.data) {
                    Ok(v) => v,
                    Err(e) => {
                        warn!(topic = %topic_name, error = %e, "dropping undecodable message");
                        let _ = delivery
                            .nack(BasicNackOptions {
                                requeue: false,
                                ..BasicNackOptions::default()
                            })
                            .await;
                        continue;
                    }
                };

                let attempt = if delivery.redelivered { 2 } else { 1 };
                let disposition = handler
                    .handle(Delivery {
                        topic: topic_name.clone(),
                        payload,
                        attempt,
                    })
                    .await;
                let result = match disposition {
                    Disposition::Ack => delivery.ack(BasicAckOptions::default()).await,
                    Disposition::Nack { requeue } => {
                        delivery
                            .nack(BasicNackOptions {
                                requeue,
                                ..BasicNackOptions::default()
                            })
                            .await
                    }
                };
                if let Err(e) = result {
                    error!(topic = %topic_name, error = %e, "amqp ack/nack failed");
                }
            }
            debug!(topic = %topic_name, "amqp consumer stopped");
        });
        Ok(())
    }

    fn shutdown(&self) {
        self.cancel.cancel();
    }

    fn kind(&self) -> &'static str {
        "rabbitmq"
    }
}
