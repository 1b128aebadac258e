//! Join/correlation store: rendezvous of two streams on a correlation key
//! under a TTL.
//!
//! All transitions go through the storage gateway's conditional writes, so
//! two racing arrivals resolve with exactly one of them observing the
//! waiting→matched transition. A background sweeper moves expired waiting
//! states to `timeout` and re-enqueues the join node so the configured
//! strategy can play out inside a normal run.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use manifold_core::model::event::{IntegrationEvent, IntegrationEventKind};
use manifold_core::model::flow::Node;
use manifold_core::model::join::{JoinSide, JoinState, JoinStatus, JoinStrategy};
use manifold_core::model::run::TriggeredBy;
use manifold_core::model::trigger::{TriggerEvent, TRIGGER_TOPIC};
use manifold_core::record::get_path;
use manifold_core::{EngineError, ErrorKind};
use manifold_queue::QueueBackend;
use manifold_store::StorageGateway;

use crate::registry::{NodeExecutor, NodeOutcome};
use crate::scope::{ExecutionScope, NodeInput};

/// Marker the sweeper plants in the resume payload.
const TIMEOUT_MARKER: &str = "_join_timeout";

fn strategy_of(node: &Node) -> JoinStrategy {
    match node
        .config
        .get("strategy")
        .and_then(Value::as_str)
        .unwrap_or("inner")
        .to_ascii_lowercase()
        .as_str()
    {
        "left" => JoinStrategy::Left,
        "right" => JoinStrategy::Right,
        _ => JoinStrategy::Inner,
    }
}

fn correlation_key_of(node: &Node) -> Result<String, EngineError> {
    node.config
        .get("correlation_key")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| EngineError::validation("join node missing 'correlation_key'"))
}

fn timeout_minutes_of(node: &Node, default: Duration) -> i64 {
    node.config
        .get("timeout_minutes")
        .and_then(Value::as_i64)
        .unwrap_or((default.as_secs() / 60) as i64)
}

/// Which stream this arrival belongs to: explicit config first, then the
/// label of the edge the payload arrived on.
fn side_of(node: &Node, input: &NodeInput) -> Result<JoinSide, EngineError> {
    let explicit = node.config.get("side").and_then(Value::as_str);
    let label = explicit.or(input.via_label.as_deref()).ok_or_else(|| {
        EngineError::validation("join arrival has neither 'side' config nor edge label")
    })?;
    match label.to_ascii_lowercase().as_str() {
        "a" | "stream_a" | "streama" => Ok(JoinSide::A),
        "b" | "stream_b" | "streamb" => Ok(JoinSide::B),
        other => Err(EngineError::validation(format!(
            "unrecognized join side label '{other}'"
        ))),
    }
}

fn correlation_value(payload: &Value, key: &str) -> Result<String, EngineError> {
    let value = get_path(payload, key).ok_or_else(|| {
        EngineError::validation(format!("correlation key '{key}' absent from payload"))
    })?;
    Ok(match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    })
}

/// Executor for join nodes.
pub struct JoinExecutor;

#[async_trait]
impl NodeExecutor for JoinExecutor {
    async fn execute(
        &self,
        node: &Node,
        input: NodeInput,
        scope: &ExecutionScope,
    ) -> Result<NodeOutcome, EngineError> {
        let key = correlation_key_of(node)?;
        let strategy = strategy_of(node);

        // Sweeper resume after TTL expiry: the state already sits at
        // `timeout`, play out the strategy.
        if input
            .payload
            .get(TIMEOUT_MARKER)
            .and_then(Value::as_bool)
            .unwrap_or(false)
        {
            return resume_after_timeout(node, &input.payload, strategy, scope).await;
        }

        // Emulation never touches the join store: pretend the other side
        // arrived with a deterministic mock.
        if scope.emulation {
            let corr = correlation_value(&input.payload, &key)?;
            let side = side_of(node, &input)?;
            let mut mock = serde_json::Map::new();
            mock.insert("emulated".into(), json!(true));
            mock.insert(key.clone(), json!(corr));
            let mock = Value::Object(mock);
            let (a, b) = match side {
                JoinSide::A => (input.payload.clone(), mock),
                JoinSide::B => (mock, input.payload.clone()),
            };
            return Ok(NodeOutcome::Advance(json!({"streamA": a, "streamB": b})));
        }

        let corr = correlation_value(&input.payload, &key)?;
        let side = side_of(node, &input)?;
        let store = &scope.services.store;
        let timeout_minutes = timeout_minutes_of(node, scope.services.config.join_default_timeout);

        // Upsert loop: every write is conditional, losers re-read.
        loop {
            let existing = store
                .get_join(scope.flow_id, &node.id, &corr)
                .await?;

            match existing {
                None => {
                    let now = Utc::now();
                    let mut state = JoinState {
                        flow_id: scope.flow_id,
                        node_id: node.id.clone(),
                        correlation_key: key.clone(),
                        correlation_value: corr.clone(),
                        stream_a: None,
                        stream_b: None,
                        status: match side {
                            JoinSide::A => JoinStatus::WaitingB,
                            JoinSide::B => JoinStatus::WaitingA,
                        },
                        strategy,
                        expires_at: now + chrono::Duration::minutes(timeout_minutes),
                        matched_at: None,
                        created_at: now,
                    };
                    state.set_side(side, input.payload.clone());
                    if store.insert_join(&state).await? {
                        debug!(
                            flow_id = %scope.flow_id,
                            node_id = %node.id,
                            correlation = %corr,
                            side = ?side,
                            "join waiting"
                        );
                        return Ok(NodeOutcome::Pending);
                    }
                    // Lost the insert race; re-read and take the update path.
                    continue;
                }
                Some(state) if state.status == JoinStatus::Matched => {
                    // Matched states are never resurrected.
                    warn!(
                        node_id = %node.id,
                        correlation = %corr,
                        "arrival after join already matched, dropping"
                    );
                    return Ok(NodeOutcome::Pending);
                }
                Some(state) if state.status == JoinStatus::Timeout => {
                    warn!(
                        node_id = %node.id,
                        correlation = %corr,
                        "arrival after join timed out, dropping"
                    );
                    return Ok(NodeOutcome::Pending);
                }
                Some(mut state) => {
                    let expected = state.status;
                    if state.side(side.other()).is_some() {
                        // Other side present: this arrival completes the
                        // rendezvous. Exactly one writer wins the guard.
                        state.set_side(side, input.payload.clone());
                        state.status = JoinStatus::Matched;
                        state.matched_at = Some(Utc::now());
                        if store.update_join_guarded(&state, expected).await? {
                            info!(
                                flow_id = %scope.flow_id,
                                node_id = %node.id,
                                correlation = %corr,
                                "join matched"
                            );
                            append_join_event(
                                scope,
                                &node.id,
                                IntegrationEventKind::JoinMatched,
                                json!({"correlation": corr}),
                            )
                            .await;
                            return Ok(NodeOutcome::Advance(state.merged_output()));
                        }
                        continue;
                    }

                    // Same side again. The preserved side under left/right
                    // keeps its first payload; everything else is
                    // last-write-wins.
                    let keep_first = matches!(
                        (strategy, side),
                        (JoinStrategy::Left, JoinSide::A) | (JoinStrategy::Right, JoinSide::B)
                    );
                    if !keep_first {
                        state.set_side(side, input.payload.clone());
                        if !store.update_join_guarded(&state, expected).await? {
                            continue;
                        }
                    }
                    return Ok(NodeOutcome::Pending);
                }
            }
        }
    }
}

/// Strategy playout once the sweeper re-enqueued a timed-out join.
async fn resume_after_timeout(
    node: &Node,
    payload: &Value,
    strategy: JoinStrategy,
    scope: &ExecutionScope,
) -> Result<NodeOutcome, EngineError> {
    let corr = payload
        .get("correlation_value")
        .and_then(Value::as_str)
        .ok_or_else(|| EngineError::system("timeout resume without correlation_value"))?;
    let state = scope
        .services
        .store
        .get_join(scope.flow_id, &node.id, corr)
        .await?
        .ok_or_else(|| EngineError::system("timed-out join state vanished"))?;

    match strategy {
        JoinStrategy::Inner => Err(EngineError::new(
            ErrorKind::Timeout,
            format!(
                "join '{}' timed out waiting for {} (correlation '{corr}')",
                node.id,
                match state.status {
                    JoinStatus::Timeout if state.stream_a.is_none() => "stream A",
                    _ => "stream B",
                }
            ),
        )),
        JoinStrategy::Left | JoinStrategy::Right => Ok(NodeOutcome::Advance(state.merged_output())),
    }
}

async fn append_join_event(
    scope: &ExecutionScope,
    node_id: &str,
    kind: IntegrationEventKind,
    data: Value,
) {
    let event = IntegrationEvent::now(
        scope.flow_id,
        Some(scope.run_id),
        Some(node_id.to_string()),
        kind,
        data,
    );
    if let Err(err) = scope.services.store.append_event(&event).await {
        error!(error = %err, "failed to append join event");
    }
}

/// Background sweeper: expires waiting states past their TTL and
/// re-enqueues the join node so the strategy resolves inside a run.
pub struct JoinSweeper {
    store: Arc<dyn StorageGateway>,
    queue: Arc<dyn QueueBackend>,
}

impl JoinSweeper {
    pub fn new(store: Arc<dyn StorageGateway>, queue: Arc<dyn QueueBackend>) -> Self {
        Self { store, queue }
    }

    /// One sweep pass. Returns how many states timed out.
    pub async fn run_once(&self) -> Result<usize, EngineError> {
        let expired = self.store.expired_joins(Utc::now()).await?;
        let mut swept = 0;
        for mut state in expired {
            let expected = state.status;
            state.status = JoinStatus::Timeout;
            // A racing match beats the sweeper; the guard keeps this safe.
            if !self.store.update_join_guarded(&state, expected).await? {
                continue;
            }
            swept += 1;
            info!(
                flow_id = %state.flow_id,
                node_id = %state.node_id,
                correlation = %state.correlation_value,
                strategy = ?state.strategy,
                "join timed out"
            );
            let event = IntegrationEvent::now(
                state.flow_id,
                None,
                Some(state.node_id.clone()),
                IntegrationEventKind::JoinTimedOut,
                json!({"correlation": state.correlation_value}),
            );
            if let Err(err) = self.store.append_event(&event).await {
                error!(error = %err, "failed to append join timeout event");
            }

            let trigger = TriggerEvent {
                flow_id: state.flow_id,
                node_id: Some(state.node_id.clone()),
                triggered_by: TriggeredBy::Interface,
                input: json!({
                    TIMEOUT_MARKER: true,
                    "correlation_value": state.correlation_value,
                }),
                trace_id: uuid::Uuid::new_v4().to_string(),
                emulation: false,
            };
            if let Err(err) = self
                .queue
                .enqueue(
                    TRIGGER_TOPIC,
                    serde_json::to_value(&trigger).unwrap_or_default(),
                )
                .await
            {
                error!(error = %err, "failed to enqueue join timeout resume");
            }
        }
        Ok(swept)
    }

    /// Fixed-interval sweep loop (default 60s in the server).
    pub fn spawn(
        self: Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(err) = self.run_once().await {
                            error!(error = %err, "join sweep failed");
                        }
                    }
                }
            }
        })
    }
}
