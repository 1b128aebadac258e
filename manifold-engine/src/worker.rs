//! Worker loop: drains trigger events off the queue and drives the
//! orchestrator. One handler invocation owns one run to its terminal write.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, warn};

use manifold_core::model::trigger::{TriggerEvent, TRIGGER_TOPIC};
use manifold_core::ErrorKind;
use manifold_queue::{Delivery, Disposition, QueueBackend, QueueError, QueueHandler};

use crate::orchestrator::Orchestrator;

pub struct TriggerWorker {
    orchestrator: Arc<Orchestrator>,
}

impl TriggerWorker {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }

    /// Subscribe the worker on the trigger topic.
    pub async fn start(
        self: Arc<Self>,
        queue: &dyn QueueBackend,
    ) -> Result<(), QueueError> {
        queue.subscribe(TRIGGER_TOPIC, self).await
    }
}

#[async_trait]
impl QueueHandler for TriggerWorker {
    async fn handle(&self, delivery: Delivery) -> Disposition {
        let event: TriggerEvent = match serde_json::from_value(delivery.payload) {
            Ok(event) => event,
            Err(err) => {
                warn!(error = %err, "dropping undecodable trigger event");
                return Disposition::Nack { requeue: false };
            }
        };

        match self.orchestrator.execute(event.into()).await {
            // Terminal runs (completed or failed) are fully recorded; the
            // delivery is done either way.
            Ok(_) => Disposition::Ack,
            Err(err) if err.kind == ErrorKind::System => {
                // Engine-level failure before the run went terminal
                // (storage down, executor registry hole): let the broker
                // redeliver.
                error!(error = %err, "run aborted on engine error, requeueing");
                Disposition::Nack { requeue: true }
            }
            Err(err) => {
                warn!(error = %err, "trigger rejected");
                Disposition::Ack
            }
        }
    }
}
