use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::ErrorKind;

/// Terminal and non-terminal states of a flow run.
///
/// A run is created `Running` and transitions exactly once, to `Completed`
/// or `Failed`. Terminal runs are immutable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, RunStatus::Running)
    }
}

/// What produced the triggering event for a run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggeredBy {
    Manual,
    Schedule,
    Webhook,
    Interface,
}

/// Lifecycle state of a single node execution within a run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeExecutionStatus {
    Running,
    Completed,
    Failed,
}

/// Per-node record accumulated on the run.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeExecution {
    pub node_id: String,
    pub status: NodeExecutionStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    /// Attempts consumed, including the successful one if any.
    pub attempts: u32,
    #[serde(default)]
    pub output: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_kind: Option<ErrorKind>,
}

/// One execution of a flow from trigger to terminal state.
///
/// Mutated monotonically by its owning worker until terminal.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FlowRun {
    pub id: Uuid,
    pub flow_id: Uuid,
    /// Snapshot of the flow's semantic version at trigger time.
    pub flow_version: String,
    /// Propagated across every node execution and outbound call.
    pub trace_id: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration_ms: Option<i64>,
    pub triggered_by: TriggeredBy,
    pub input_data: Value,
    #[serde(default)]
    pub output_data: Option<Value>,
    /// Node ids in execution order.
    #[serde(default)]
    pub executed_nodes: Vec<String>,
    #[serde(default)]
    pub node_executions: Vec<NodeExecution>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_node: Option<String>,
}

impl FlowRun {
    /// Seed a new running record.
    pub fn start(
        flow_id: Uuid,
        flow_version: String,
        trace_id: String,
        triggered_by: TriggeredBy,
        input_data: Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            flow_id,
            flow_version,
            trace_id,
            status: RunStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            duration_ms: None,
            triggered_by,
            input_data,
            output_data: None,
            executed_nodes: Vec::new(),
            node_executions: Vec::new(),
            error: None,
            error_node: None,
        }
    }

    /// Transition to `Completed`, stamping completion time and duration.
    pub fn complete(&mut self, output: Option<Value>) {
        let now = Utc::now();
        self.status = RunStatus::Completed;
        self.output_data = output;
        self.duration_ms = Some((now - self.started_at).num_milliseconds());
        self.completed_at = Some(now);
    }

    /// Transition to `Failed`, recording the failing node and its error.
    pub fn fail(&mut self, node_id: impl Into<String>, error: impl Into<String>) {
        let now = Utc::now();
        self.status = RunStatus::Failed;
        self.error = Some(error.into());
        self.error_node = Some(node_id.into());
        self.duration_ms = Some((now - self.started_at).num_milliseconds());
        self.completed_at = Some(now);
    }

    pub fn node_execution_mut(&mut self, node_id: &str) -> Option<&mut NodeExecution> {
        self.node_executions
            .iter_mut()
            .rev()
            .find(|e| e.node_id == node_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn run_lifecycle_stamps_duration() {
        let mut run = FlowRun::start(
            Uuid::new_v4(),
            "1.0.0".into(),
            "trace-1".into(),
            TriggeredBy::Manual,
            json!({"a": 1}),
        );
        assert_eq!(run.status, RunStatus::Running);
        assert!(!run.status.is_terminal());

        run.complete(Some(json!({"ok": true})));
        assert_eq!(run.status, RunStatus::Completed);
        assert!(run.status.is_terminal());
        assert!(run.completed_at.is_some());
        assert!(run.duration_ms.is_some());
    }

    #[test]
    fn failed_run_records_error_node() {
        let mut run = FlowRun::start(
            Uuid::new_v4(),
            "1.0.0".into(),
            "trace-2".into(),
            TriggeredBy::Webhook,
            json!({}),
        );
        run.fail("validate-order", "order_id is missing");
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.error_node.as_deref(), Some("validate-order"));
        assert_eq!(run.error.as_deref(), Some("order_id is missing"));
    }
}
