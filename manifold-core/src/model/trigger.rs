use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::run::TriggeredBy;

/// Queue topic every trigger event is published on.
pub const TRIGGER_TOPIC: &str = "flow.trigger";

/// A triggering event flowing from ingress/scheduler/poller to a worker.
///
/// This is the queue payload: validated at ingress, enqueued, and picked up
/// by a worker that seeds a [`super::run::FlowRun`] from it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TriggerEvent {
    pub flow_id: Uuid,
    /// Node that fired, when known (scheduler/poller triggers).
    #[serde(default)]
    pub node_id: Option<String>,
    pub triggered_by: TriggeredBy,
    pub input: Value,
    /// Propagated into the run and across every outbound call.
    pub trace_id: String,
    #[serde(default)]
    pub emulation: bool,
}

impl TriggerEvent {
    pub fn new(flow_id: Uuid, triggered_by: TriggeredBy, input: Value) -> Self {
        Self {
            flow_id,
            node_id: None,
            triggered_by,
            input,
            trace_id: Uuid::new_v4().to_string(),
            emulation: false,
        }
    }
}
