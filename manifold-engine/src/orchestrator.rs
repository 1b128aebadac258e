//! The flow orchestrator: explicit work-queue traversal of the node graph
//! with per-node retry budgets, failure-edge rerouting, and run recording.
//!
//! One worker owns a run from trigger to terminal write. The ready queue
//! interleaves parallel fan-out branches; ordering between branches is not
//! defined, but each branch respects the graph's topological order.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use manifold_core::model::event::{IntegrationEvent, IntegrationEventKind};
use manifold_core::model::flow::{Flow, Node, NodeKind};
use manifold_core::model::run::{
    FlowRun, NodeExecution, NodeExecutionStatus, TriggeredBy,
};
use manifold_core::model::trigger::TriggerEvent;
use manifold_core::{EngineError, ErrorKind};

use crate::registry::{ExecutorRegistry, NodeOutcome};
use crate::report::build_error_report;
use crate::scope::{EngineServices, ExecutionScope, NodeInput};

/// Label that reroutes failures instead of failing the run.
pub const FAILURE_LABEL: &str = "Failure";
/// Label of the truthy conditional branch.
pub const SUCCESS_LABEL: &str = "Success";

/// Everything needed to start a run.
#[derive(Clone, Debug)]
pub struct RunSeed {
    pub flow_id: Uuid,
    /// Specific trigger node, when the event knows it (scheduler, poller).
    pub trigger_node: Option<String>,
    pub triggered_by: TriggeredBy,
    pub input: Value,
    pub trace_id: String,
    pub emulation: bool,
}

impl From<TriggerEvent> for RunSeed {
    fn from(event: TriggerEvent) -> Self {
        Self {
            flow_id: event.flow_id,
            trigger_node: event.node_id,
            triggered_by: event.triggered_by,
            input: event.input,
            trace_id: event.trace_id,
            emulation: event.emulation,
        }
    }
}

/// Graph executor. Cheap to share; holds no per-run state.
pub struct Orchestrator {
    services: Arc<EngineServices>,
    registry: Arc<ExecutorRegistry>,
    retry_base: Duration,
    retry_cap: Duration,
    node_timeout: Duration,
}

impl Orchestrator {
    pub fn new(services: Arc<EngineServices>, registry: Arc<ExecutorRegistry>) -> Self {
        Self {
            services,
            registry,
            retry_base: Duration::from_secs(1),
            retry_cap: Duration::from_secs(30),
            node_timeout: Duration::from_secs(30),
        }
    }

    /// Shrink the backoff base, for tests.
    pub fn with_retry_base(mut self, base: Duration) -> Self {
        self.retry_base = base;
        self
    }

    pub fn with_node_timeout(mut self, timeout: Duration) -> Self {
        self.node_timeout = timeout;
        self
    }

    /// Execute a seeded run to its terminal state and return the record.
    pub async fn execute(&self, seed: RunSeed) -> Result<FlowRun, EngineError> {
        let flow = self
            .services
            .store
            .get_flow(seed.flow_id)
            .await?
            .ok_or_else(|| {
                EngineError::validation(format!("flow {} not found", seed.flow_id))
            })?;

        let trigger_id = self.resolve_trigger(&flow, &seed)?;

        let mut run = FlowRun::start(
            flow.id,
            flow.version.clone(),
            seed.trace_id.clone(),
            seed.triggered_by,
            seed.input.clone(),
        );
        self.services.store.create_run(&run).await?;
        self.emit(&flow, Some(run.id), None, IntegrationEventKind::RunStarted, json!({}))
            .await;

        let scope = ExecutionScope {
            flow_id: flow.id,
            flow_name: flow.name.clone(),
            run_id: run.id,
            trace_id: seed.trace_id.clone(),
            emulation: seed.emulation,
            deadline: CancellationToken::new(),
            node_timeout: self.node_timeout,
            services: self.services.clone(),
        };

        info!(
            flow_id = %flow.id,
            run_id = %run.id,
            trace_id = %seed.trace_id,
            emulation = seed.emulation,
            "run started"
        );

        let mut ready: VecDeque<(String, NodeInput)> = VecDeque::new();
        ready.push_back((trigger_id, NodeInput::seed(seed.input.clone())));
        let mut last_output = seed.input;

        while let Some((node_id, input)) = ready.pop_front() {
            let Some(node) = flow.node(&node_id).cloned() else {
                self.finalize_failed(
                    &flow,
                    &mut run,
                    &node_id,
                    &EngineError::system(format!("node '{node_id}' vanished from flow")),
                    &Value::Null,
                )
                .await?;
                return Ok(run);
            };

            run.executed_nodes.push(node.id.clone());
            run.node_executions.push(NodeExecution {
                node_id: node.id.clone(),
                status: NodeExecutionStatus::Running,
                started_at: chrono::Utc::now(),
                completed_at: None,
                attempts: 0,
                output: None,
                error: None,
                error_kind: None,
            });
            self.services.store.update_run(&run).await?;
            self.emit(
                &flow,
                Some(run.id),
                Some(node.id.clone()),
                IntegrationEventKind::NodeStarted,
                json!({}),
            )
            .await;

            match self.run_node(&flow, &node, input.clone(), &scope, &mut run).await {
                Ok((outcome, attempts)) => {
                    if let Some(output) = outcome.output() {
                        last_output = output.clone();
                    }
                    if let Some(exec) = run.node_execution_mut(&node.id) {
                        exec.status = NodeExecutionStatus::Completed;
                        exec.completed_at = Some(chrono::Utc::now());
                        exec.attempts = attempts;
                        exec.output = outcome.output().cloned();
                    }
                    self.services.store.update_run(&run).await?;
                    self.emit(
                        &flow,
                        Some(run.id),
                        Some(node.id.clone()),
                        IntegrationEventKind::NodeCompleted,
                        json!({"attempts": attempts}),
                    )
                    .await;
                    self.route(&flow, &node, outcome, &mut ready);
                }
                Err((err, attempts)) => {
                    if let Some(exec) = run.node_execution_mut(&node.id) {
                        exec.status = NodeExecutionStatus::Failed;
                        exec.completed_at = Some(chrono::Utc::now());
                        exec.attempts = attempts;
                        exec.error = Some(err.message.clone());
                        exec.error_kind = Some(err.kind);
                    }
                    self.emit(
                        &flow,
                        Some(run.id),
                        Some(node.id.clone()),
                        IntegrationEventKind::NodeFailed,
                        json!({"kind": err.kind.as_str(), "error": err.message}),
                    )
                    .await;

                    let failure_edges: Vec<&manifold_core::model::flow::Edge> = flow
                        .edges_from(&node.id)
                        .filter(|e| e.label_matches(FAILURE_LABEL))
                        .collect();
                    if err.kind.routes_to_failure_edge() && !failure_edges.is_empty() {
                        warn!(
                            run_id = %run.id,
                            node_id = %node.id,
                            kind = %err.kind,
                            "node failed, rerouting to failure edge"
                        );
                        let failure_payload = json!({
                            "error": err.message,
                            "errorKind": err.kind.as_str(),
                            "input": input.payload,
                        });
                        for edge in failure_edges {
                            ready.push_back((
                                edge.target.clone(),
                                NodeInput {
                                    payload: failure_payload.clone(),
                                    via_label: edge.label.clone(),
                                },
                            ));
                        }
                        self.services.store.update_run(&run).await?;
                    } else {
                        self.finalize_failed(&flow, &mut run, &node.id, &err, &input.payload)
                            .await?;
                        return Ok(run);
                    }
                }
            }
        }

        run.complete(Some(last_output));
        self.services.store.update_run(&run).await?;
        self.emit(
            &flow,
            Some(run.id),
            None,
            IntegrationEventKind::RunCompleted,
            json!({"durationMs": run.duration_ms}),
        )
        .await;
        info!(run_id = %run.id, duration_ms = ?run.duration_ms, "run completed");
        Ok(run)
    }

    /// Invoke one node with its retry budget. Returns the outcome and the
    /// attempts consumed, or the final error and the attempts consumed.
    async fn run_node(
        &self,
        flow: &Flow,
        node: &Node,
        input: NodeInput,
        scope: &ExecutionScope,
        run: &mut FlowRun,
    ) -> Result<(NodeOutcome, u32), (EngineError, u32)> {
        let executor = self
            .registry
            .executor_for(node.kind)
            .ok_or_else(|| {
                (
                    EngineError::system(format!("no executor registered for {:?}", node.kind)),
                    0,
                )
            })?;

        let budget = node.retry_budget();
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            let attempt_result = tokio::select! {
                _ = scope.deadline.cancelled() => {
                    Err(EngineError::timeout("run deadline exceeded"))
                }
                outcome = tokio::time::timeout(
                    scope.node_timeout,
                    executor.execute(node, input.clone(), scope),
                ) => match outcome {
                    Ok(result) => result,
                    Err(_) => Err(EngineError::timeout(format!(
                        "node '{}' exceeded {}s timeout",
                        node.id,
                        scope.node_timeout.as_secs()
                    ))),
                },
            };

            match attempt_result {
                Ok(outcome) => return Ok((outcome, attempts)),
                Err(err) => {
                    // The budget counts retries, not attempts: a retryable
                    // node may run budget + 1 times before giving up.
                    let max_attempts = match err.kind {
                        // One refresh attempt, then no retry.
                        ErrorKind::Auth => 2,
                        kind if kind.is_retryable() => budget + 1,
                        _ => 1,
                    };
                    if attempts >= max_attempts {
                        return Err((err, attempts));
                    }
                    let delay = self.backoff_delay(attempts, err.retry_after_secs);
                    debug!(
                        node_id = %node.id,
                        attempt = attempts,
                        kind = %err.kind,
                        delay_ms = delay.as_millis() as u64,
                        "retrying node"
                    );
                    if let Some(exec) = run.node_execution_mut(&node.id) {
                        exec.attempts = attempts;
                    }
                    self.emit(
                        flow,
                        Some(run.id),
                        Some(node.id.clone()),
                        IntegrationEventKind::NodeRetried,
                        json!({"attempt": attempts, "kind": err.kind.as_str()}),
                    )
                    .await;
                    if !scope.emulation {
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
    }

    /// Exponential backoff with ±20% jitter, honoring upstream Retry-After.
    fn backoff_delay(&self, attempt: u32, retry_after_secs: Option<u64>) -> Duration {
        if let Some(secs) = retry_after_secs {
            return Duration::from_secs(secs).min(self.retry_cap.max(Duration::from_secs(secs)));
        }
        let exp = self
            .retry_base
            .saturating_mul(1u32 << (attempt - 1).min(16));
        let capped = exp.min(self.retry_cap);
        let jitter = rand::thread_rng().gen_range(0.8..=1.2);
        capped.mul_f64(jitter)
    }

    /// Compute downstream inputs for an outcome, in edge definition order.
    fn route(
        &self,
        flow: &Flow,
        node: &Node,
        outcome: NodeOutcome,
        ready: &mut VecDeque<(String, NodeInput)>,
    ) {
        if node.kind.is_terminal() {
            return;
        }
        match outcome {
            NodeOutcome::Pending | NodeOutcome::Halt(_) => {}
            NodeOutcome::Advance(payload) => {
                for edge in flow.edges_from(&node.id) {
                    // Failure edges carry failures only.
                    if edge.label_matches(FAILURE_LABEL) {
                        continue;
                    }
                    ready.push_back((
                        edge.target.clone(),
                        NodeInput {
                            payload: payload.clone(),
                            via_label: edge.label.clone(),
                        },
                    ));
                }
            }
            NodeOutcome::Routed { payload, label } => {
                let matched: Vec<&manifold_core::model::flow::Edge> = flow
                    .edges_from(&node.id)
                    .filter(|e| e.label_matches(&label))
                    .collect();
                if matched.is_empty() {
                    // A truthy branch without labeled edges falls back to
                    // the unlabeled ones; a falsy branch without a Failure
                    // edge ends the branch.
                    if label.eq_ignore_ascii_case(SUCCESS_LABEL) {
                        for edge in flow.edges_from(&node.id).filter(|e| e.label.is_none()) {
                            ready.push_back((
                                edge.target.clone(),
                                NodeInput {
                                    payload: payload.clone(),
                                    via_label: None,
                                },
                            ));
                        }
                    }
                    return;
                }
                for edge in matched {
                    ready.push_back((
                        edge.target.clone(),
                        NodeInput {
                            payload: payload.clone(),
                            via_label: edge.label.clone(),
                        },
                    ));
                }
            }
        }
    }

    /// Pick the node that seeds the traversal.
    fn resolve_trigger(&self, flow: &Flow, seed: &RunSeed) -> Result<String, EngineError> {
        if let Some(explicit) = &seed.trigger_node {
            return match flow.node(explicit) {
                Some(_) => Ok(explicit.clone()),
                None => Err(EngineError::validation(format!(
                    "trigger node '{explicit}' not in flow"
                ))),
            };
        }
        let wanted = match seed.triggered_by {
            TriggeredBy::Webhook => Some(NodeKind::WebhookTrigger),
            TriggeredBy::Schedule => Some(NodeKind::ScheduleTrigger),
            TriggeredBy::Interface => None,
            TriggeredBy::Manual => None,
        };
        flow.triggers()
            .find(|n| wanted.map(|k| n.kind == k).unwrap_or(true))
            .or_else(|| flow.triggers().next())
            .map(|n| n.id.clone())
            .ok_or_else(|| EngineError::validation("flow has no trigger node"))
    }

    async fn finalize_failed(
        &self,
        flow: &Flow,
        run: &mut FlowRun,
        node_id: &str,
        err: &EngineError,
        payload: &Value,
    ) -> Result<(), EngineError> {
        run.fail(node_id, err.message.clone());
        self.services.store.update_run(run).await?;

        let node = flow.node(node_id);
        let report = build_error_report(run, node, err, payload);
        if let Err(report_err) = self.services.store.create_report(&report).await {
            error!(error = %report_err, "failed to persist error report");
        }
        self.emit(
            flow,
            Some(run.id),
            Some(node_id.to_string()),
            IntegrationEventKind::RunFailed,
            json!({"kind": err.kind.as_str(), "error": err.message}),
        )
        .await;
        warn!(run_id = %run.id, node_id, kind = %err.kind, "run failed");
        Ok(())
    }

    async fn emit(
        &self,
        flow: &Flow,
        run_id: Option<Uuid>,
        node_id: Option<String>,
        kind: IntegrationEventKind,
        data: Value,
    ) {
        let event = IntegrationEvent::now(flow.id, run_id, node_id, kind, data);
        if let Err(err) = self.services.store.append_event(&event).await {
            error!(error = %err, "failed to append integration event");
        }
    }
}
