use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Which of the two correlated streams an invocation represents.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinSide {
    A,
    B,
}

impl JoinSide {
    pub fn other(self) -> Self {
        match self {
            JoinSide::A => JoinSide::B,
            JoinSide::B => JoinSide::A,
        }
    }
}

/// How a join resolves when one side never arrives within the TTL.
///
/// `Inner` turns a timeout into a failure; `Left`/`Right` emit the partial
/// payload downstream with the missing side as `null`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinStrategy {
    Inner,
    Left,
    Right,
}

impl Default for JoinStrategy {
    fn default() -> Self {
        JoinStrategy::Inner
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinStatus {
    WaitingA,
    WaitingB,
    Matched,
    Timeout,
}

/// Rendezvous state for one correlation value at one join node.
///
/// Unique per (flow_id, node_id, correlation_value). Reaches `Matched` when
/// both sides are present; `Timeout` when `expires_at` passes first.
/// Matched states are never resurrected.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JoinState {
    pub flow_id: Uuid,
    pub node_id: String,
    /// Path of the correlation key inside the payload.
    pub correlation_key: String,
    pub correlation_value: String,
    #[serde(default)]
    pub stream_a: Option<Value>,
    #[serde(default)]
    pub stream_b: Option<Value>,
    pub status: JoinStatus,
    pub strategy: JoinStrategy,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub matched_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl JoinState {
    pub fn side(&self, side: JoinSide) -> Option<&Value> {
        match side {
            JoinSide::A => self.stream_a.as_ref(),
            JoinSide::B => self.stream_b.as_ref(),
        }
    }

    pub fn set_side(&mut self, side: JoinSide, payload: Value) {
        match side {
            JoinSide::A => self.stream_a = Some(payload),
            JoinSide::B => self.stream_b = Some(payload),
        }
    }

    /// The merged downstream output: `{streamA, streamB}` with `null` for a
    /// missing side.
    pub fn merged_output(&self) -> Value {
        serde_json::json!({
            "streamA": self.stream_a.clone().unwrap_or(Value::Null),
            "streamB": self.stream_b.clone().unwrap_or(Value::Null),
        })
    }

    pub fn is_waiting(&self) -> bool {
        matches!(self.status, JoinStatus::WaitingA | JoinStatus::WaitingB)
    }
}
