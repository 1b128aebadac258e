use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrationEventKind {
    RunStarted,
    NodeStarted,
    NodeCompleted,
    NodeFailed,
    NodeRetried,
    RunCompleted,
    RunFailed,
    JoinMatched,
    JoinTimedOut,
    PollerFileDetected,
}

/// Append-only audit record emitted on every engine transition.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IntegrationEvent {
    pub id: Uuid,
    pub run_id: Option<Uuid>,
    pub flow_id: Uuid,
    #[serde(default)]
    pub node_id: Option<String>,
    pub kind: IntegrationEventKind,
    pub at: DateTime<Utc>,
    #[serde(default)]
    pub data: Value,
}

impl IntegrationEvent {
    pub fn now(
        flow_id: Uuid,
        run_id: Option<Uuid>,
        node_id: Option<String>,
        kind: IntegrationEventKind,
        data: Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            run_id,
            flow_id,
            node_id,
            kind,
            at: Utc::now(),
            data,
        }
    }
}
