//! End-to-end orchestrator scenarios: conditional routing, join
//! rendezvous and TTL strategies, poller dedup, retry budgets, and
//! emulation determinism.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use uuid::Uuid;

use manifold_auth::{TokenService, TokenServiceConfig};
use manifold_core::model::flow::{Edge, Flow, Node, NodeKind, RetryPolicy};
use manifold_core::model::run::{RunStatus, TriggeredBy};
use manifold_core::model::trigger::TriggerEvent;
use manifold_core::{EngineConfig, EngineError};
use manifold_engine::executors::default_registry;
use manifold_engine::{
    EngineServices, ExecutionScope, JoinSweeper, NodeExecutor, NodeInput, NodeOutcome,
    Orchestrator, PollerService, RunSeed,
};
use manifold_queue::{QueueBackend, QueueError, QueueHandler};
use manifold_store::{MemoryStore, StorageGateway};
use manifold_vault::Vault;

/// Queue double that records every enqueue for assertions.
#[derive(Default)]
struct RecordingQueue {
    enqueued: Mutex<Vec<(String, Value)>>,
}

impl RecordingQueue {
    fn take(&self) -> Vec<(String, Value)> {
        std::mem::take(&mut self.enqueued.lock().unwrap())
    }

    fn count(&self) -> usize {
        self.enqueued.lock().unwrap().len()
    }
}

#[async_trait]
impl QueueBackend for RecordingQueue {
    async fn enqueue(&self, topic: &str, payload: Value) -> Result<(), QueueError> {
        self.enqueued
            .lock()
            .unwrap()
            .push((topic.to_string(), payload));
        Ok(())
    }

    async fn subscribe(
        &self,
        _topic: &str,
        _handler: Arc<dyn QueueHandler>,
    ) -> Result<(), QueueError> {
        Ok(())
    }

    fn shutdown(&self) {}

    fn kind(&self) -> &'static str {
        "recording"
    }
}

struct Fixture {
    services: Arc<EngineServices>,
    store: Arc<MemoryStore>,
    queue: Arc<RecordingQueue>,
}

fn fixture() -> Fixture {
    let store = Arc::new(MemoryStore::new());
    let vault = Arc::new(Vault::new(store.clone()));
    let tokens = Arc::new(TokenService::new(
        store.clone(),
        vault.clone(),
        TokenServiceConfig::default(),
    ));
    let queue = Arc::new(RecordingQueue::default());
    let services = Arc::new(EngineServices {
        store: store.clone(),
        vault,
        tokens,
        queue: queue.clone(),
        http: reqwest::Client::new(),
        config: EngineConfig::default(),
    });
    Fixture {
        services,
        store,
        queue,
    }
}

fn node(id: &str, kind: NodeKind, config: Value) -> Node {
    Node {
        id: id.into(),
        kind,
        name: None,
        config,
        adapter_id: None,
        retry: None,
    }
}

fn edge(source: &str, target: &str, label: Option<&str>) -> Edge {
    Edge {
        source: source.into(),
        target: target.into(),
        label: label.map(str::to_string),
    }
}

fn flow(nodes: Vec<Node>, edges: Vec<Edge>) -> Flow {
    let now = chrono::Utc::now();
    Flow {
        id: Uuid::new_v4(),
        organization_id: Uuid::new_v4(),
        name: "scenario".into(),
        version: "1.0.0".into(),
        enabled: true,
        nodes,
        edges,
        tags: vec![],
        metadata: json!({}),
        created_at: now,
        updated_at: now,
    }
}

fn seed(flow: &Flow, input: Value) -> RunSeed {
    RunSeed {
        flow_id: flow.id,
        trigger_node: None,
        triggered_by: TriggeredBy::Webhook,
        input,
        trace_id: Uuid::new_v4().to_string(),
        emulation: false,
    }
}

fn orchestrator(fx: &Fixture) -> Orchestrator {
    Orchestrator::new(fx.services.clone(), Arc::new(default_registry()))
        .with_retry_base(Duration::from_millis(1))
}

// ── Scenario: conditional routing ─────────────────────────────────────────

fn fraud_flow() -> Flow {
    flow(
        vec![
            node("webhook", NodeKind::WebhookTrigger, json!({})),
            node(
                "fraud-score",
                NodeKind::ObjectMapper,
                json!({"keep_unmapped": true, "mappings": []}),
            ),
            node(
                "conditional",
                NodeKind::Conditional,
                json!({
                    "condition": {"path": "score", "op": "gt", "value": 60},
                    "on_true": {"decision": "HOLD"},
                    "on_false": {"decision": "FULFILL"},
                }),
            ),
            node("hold", NodeKind::Egress, json!({"channel": "log"})),
            node("alert", NodeKind::Egress, json!({"channel": "log"})),
            node("fulfill", NodeKind::Egress, json!({"channel": "log"})),
        ],
        vec![
            edge("webhook", "fraud-score", None),
            edge("fraud-score", "conditional", None),
            edge("conditional", "hold", Some("Success")),
            edge("conditional", "alert", Some("Success")),
            edge("conditional", "fulfill", Some("Failure")),
        ],
    )
}

#[tokio::test]
async fn conditional_routes_high_score_to_both_success_targets() {
    let fx = fixture();
    let f = fraud_flow();
    fx.store.create_flow(&f).await.unwrap();

    let run = orchestrator(&fx)
        .execute(seed(&f, json!({"order_id": "A", "score": 75})))
        .await
        .unwrap();

    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(
        run.executed_nodes,
        vec!["webhook", "fraud-score", "conditional", "hold", "alert"]
    );
    let hold_exec = run
        .node_executions
        .iter()
        .find(|e| e.node_id == "hold")
        .unwrap();
    let output = hold_exec.output.as_ref().unwrap();
    assert_eq!(output["order_id"], "A");
    assert_eq!(output["decision"], "HOLD");
}

#[tokio::test]
async fn conditional_routes_low_score_to_failure_branch() {
    let fx = fixture();
    let f = fraud_flow();
    fx.store.create_flow(&f).await.unwrap();

    let run = orchestrator(&fx)
        .execute(seed(&f, json!({"order_id": "B", "score": 10})))
        .await
        .unwrap();

    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(
        run.executed_nodes,
        vec!["webhook", "fraud-score", "conditional", "fulfill"]
    );
}

// ── Scenario: join rendezvous ─────────────────────────────────────────────

fn join_flow(strategy: &str, timeout_minutes: i64) -> Flow {
    flow(
        vec![
            node("inA", NodeKind::WebhookTrigger, json!({})),
            node("inB", NodeKind::IngressTrigger, json!({})),
            node(
                "join",
                NodeKind::Join,
                json!({
                    "correlation_key": "order_id",
                    "strategy": strategy,
                    "timeout_minutes": timeout_minutes,
                }),
            ),
            node("sink", NodeKind::Egress, json!({"channel": "log"})),
        ],
        vec![
            edge("inA", "join", Some("A")),
            edge("inB", "join", Some("B")),
            edge("join", "sink", None),
        ],
    )
}

#[tokio::test]
async fn join_matches_two_streams_on_correlation_key() {
    let fx = fixture();
    let f = join_flow("inner", 60);
    fx.store.create_flow(&f).await.unwrap();
    let orch = orchestrator(&fx);

    // Stream A arrives: the join waits.
    let mut seed_a = seed(&f, json!({"order_id": "X", "a": 1}));
    seed_a.trigger_node = Some("inA".into());
    let run_a = orch.execute(seed_a).await.unwrap();
    assert_eq!(run_a.status, RunStatus::Completed);
    assert!(!run_a.executed_nodes.contains(&"sink".to_string()));

    // Stream B arrives within the TTL: the join matches and the sink runs.
    let mut seed_b = seed(&f, json!({"order_id": "X", "b": 2}));
    seed_b.trigger_node = Some("inB".into());
    let run_b = orch.execute(seed_b).await.unwrap();
    assert_eq!(run_b.status, RunStatus::Completed);
    assert!(run_b.executed_nodes.contains(&"sink".to_string()));

    let sink_exec = run_b
        .node_executions
        .iter()
        .find(|e| e.node_id == "sink")
        .unwrap();
    let merged = sink_exec.output.as_ref().unwrap();
    assert_eq!(merged["streamA"], json!({"order_id": "X", "a": 1}));
    assert_eq!(merged["streamB"], json!({"order_id": "X", "b": 2}));

    let state = fx
        .store
        .get_join(f.id, "join", "X")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        state.status,
        manifold_core::model::join::JoinStatus::Matched
    );
}

#[tokio::test]
async fn join_timeout_inner_fails_with_timeout_kind() {
    let fx = fixture();
    let f = join_flow("inner", 0);
    fx.store.create_flow(&f).await.unwrap();
    let orch = orchestrator(&fx);

    let mut seed_a = seed(&f, json!({"order_id": "Y", "a": 1}));
    seed_a.trigger_node = Some("inA".into());
    orch.execute(seed_a).await.unwrap();

    tokio::time::sleep(Duration::from_millis(20)).await;
    let sweeper = JoinSweeper::new(fx.services.store.clone(), fx.services.queue.clone());
    assert_eq!(sweeper.run_once().await.unwrap(), 1);

    // The sweeper re-enqueued the join node; play the resume through.
    let (topic, payload) = fx.queue.take().pop().unwrap();
    assert_eq!(topic, "flow.trigger");
    let resume: TriggerEvent = serde_json::from_value(payload).unwrap();
    let run = orch.execute(resume.into()).await.unwrap();

    assert_eq!(run.status, RunStatus::Failed);
    let join_exec = run
        .node_executions
        .iter()
        .find(|e| e.node_id == "join")
        .unwrap();
    assert_eq!(
        join_exec.error_kind,
        Some(manifold_core::ErrorKind::Timeout)
    );
}

#[tokio::test]
async fn join_timeout_left_emits_partial_payload() {
    let fx = fixture();
    let f = join_flow("left", 0);
    fx.store.create_flow(&f).await.unwrap();
    let orch = orchestrator(&fx);

    let mut seed_a = seed(&f, json!({"order_id": "Z", "a": 1}));
    seed_a.trigger_node = Some("inA".into());
    orch.execute(seed_a).await.unwrap();

    tokio::time::sleep(Duration::from_millis(20)).await;
    let sweeper = JoinSweeper::new(fx.services.store.clone(), fx.services.queue.clone());
    sweeper.run_once().await.unwrap();

    let (_, payload) = fx.queue.take().pop().unwrap();
    let resume: TriggerEvent = serde_json::from_value(payload).unwrap();
    let run = orch.execute(resume.into()).await.unwrap();

    assert_eq!(run.status, RunStatus::Completed);
    let sink_exec = run
        .node_executions
        .iter()
        .find(|e| e.node_id == "sink")
        .unwrap();
    let merged = sink_exec.output.as_ref().unwrap();
    assert_eq!(merged["streamA"], json!({"order_id": "Z", "a": 1}));
    assert_eq!(merged["streamB"], Value::Null);
}

// ── Scenario: poller dedup ────────────────────────────────────────────────

#[tokio::test]
async fn poller_emits_once_per_unique_file_content() {
    let fx = fixture();
    let poller_node = node(
        "poll",
        NodeKind::SftpPoller,
        json!({"pattern": "*.xml", "tracking_mode": "checksum", "root_path": "/unused"}),
    );
    let f = flow(vec![poller_node.clone()], vec![]);
    fx.store.create_flow(&f).await.unwrap();

    let dir = manifold_engine::poller::MemoryDir::new();
    dir.insert("order1.xml", b"<order>1</order>");
    let service = PollerService::new(fx.services.clone());

    // First tick: one event, fingerprint recorded.
    assert_eq!(service.tick(&f, &poller_node, &dir).await.unwrap(), 1);
    assert_eq!(fx.queue.count(), 1);

    // Second tick, unchanged file: nothing.
    assert_eq!(service.tick(&f, &poller_node, &dir).await.unwrap(), 0);
    assert_eq!(fx.queue.count(), 1);

    // Replaced content: a new checksum, one more event, both in the ring.
    dir.insert("order1.xml", b"<order>1 changed</order>");
    assert_eq!(service.tick(&f, &poller_node, &dir).await.unwrap(), 1);
    assert_eq!(fx.queue.count(), 2);

    let state = fx
        .store
        .get_poller_state(f.id, "poll")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(state.fingerprints.len(), 2);
    assert_eq!(state.last_file.as_deref(), Some("order1.xml"));

    let events = fx.queue.take();
    let first: TriggerEvent = serde_json::from_value(events[0].1.clone()).unwrap();
    assert_eq!(first.input["file"]["name"], "order1.xml");
    assert_eq!(first.input["_metadata"]["trackingMode"], "checksum");
}

#[tokio::test]
async fn poller_filename_mode_ignores_content_changes() {
    let fx = fixture();
    let poller_node = node(
        "poll",
        NodeKind::SftpPoller,
        json!({"pattern": "*", "tracking_mode": "filename", "root_path": "/unused"}),
    );
    let f = flow(vec![poller_node.clone()], vec![]);
    fx.store.create_flow(&f).await.unwrap();

    let dir = manifold_engine::poller::MemoryDir::new();
    dir.insert("data.csv", b"a,b");
    let service = PollerService::new(fx.services.clone());

    assert_eq!(service.tick(&f, &poller_node, &dir).await.unwrap(), 1);
    dir.insert("data.csv", b"a,b,c");
    assert_eq!(service.tick(&f, &poller_node, &dir).await.unwrap(), 0);
}

// ── Scenario: retry budget ────────────────────────────────────────────────

/// Fails with `connection` until the configured number of failures is
/// spent, then succeeds.
struct FlakyExecutor {
    failures: AtomicU32,
}

#[async_trait]
impl NodeExecutor for FlakyExecutor {
    async fn execute(
        &self,
        _node: &Node,
        input: NodeInput,
        _scope: &ExecutionScope,
    ) -> Result<NodeOutcome, EngineError> {
        if self.failures.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
            n.checked_sub(1)
        }).is_ok()
        {
            Err(EngineError::connection("503 service unavailable"))
        } else {
            Ok(NodeOutcome::Advance(input.payload))
        }
    }
}

fn retry_flow(max_retries: u32) -> Flow {
    let mut destination = node("dest", NodeKind::HttpDestination, json!({}));
    destination.retry = Some(RetryPolicy { max_retries });
    flow(
        vec![
            node("webhook", NodeKind::WebhookTrigger, json!({})),
            destination,
            node("after", NodeKind::Egress, json!({"channel": "log"})),
        ],
        vec![edge("webhook", "dest", None), edge("dest", "after", None)],
    )
}

fn flaky_orchestrator(fx: &Fixture, failures: u32) -> Orchestrator {
    // Swap the HTTP destination for a controllable stand-in.
    let defaults = default_registry();
    let mut registry = manifold_engine::ExecutorRegistry::new();
    registry.register(
        NodeKind::HttpDestination,
        Arc::new(FlakyExecutor {
            failures: AtomicU32::new(failures),
        }),
    );
    for kind in [NodeKind::WebhookTrigger, NodeKind::Egress] {
        registry.register(kind, defaults.executor_for(kind).unwrap());
    }
    Orchestrator::new(fx.services.clone(), Arc::new(registry))
        .with_retry_base(Duration::from_millis(1))
}

#[tokio::test]
async fn retry_budget_recovers_transient_failures() {
    let fx = fixture();
    let f = retry_flow(3);
    fx.store.create_flow(&f).await.unwrap();

    // Two failures, then success on the third attempt.
    let run = flaky_orchestrator(&fx, 2)
        .execute(seed(&f, json!({"n": 1})))
        .await
        .unwrap();

    assert_eq!(run.status, RunStatus::Completed);
    let dest_exec = run
        .node_executions
        .iter()
        .find(|e| e.node_id == "dest")
        .unwrap();
    assert_eq!(dest_exec.attempts, 3);
    assert!(run.executed_nodes.contains(&"after".to_string()));
}

#[tokio::test]
async fn budget_boundary_absorbs_exactly_budget_failures() {
    let fx = fixture();
    let f = retry_flow(3);
    fx.store.create_flow(&f).await.unwrap();

    // 503 three times, then 200: budget 3 means three retries, so the
    // fourth call lands and the node succeeds.
    let run = flaky_orchestrator(&fx, 3)
        .execute(seed(&f, json!({"n": 1})))
        .await
        .unwrap();

    assert_eq!(run.status, RunStatus::Completed);
    let dest_exec = run
        .node_executions
        .iter()
        .find(|e| e.node_id == "dest")
        .unwrap();
    assert_eq!(
        dest_exec.status,
        manifold_core::model::run::NodeExecutionStatus::Completed
    );
    assert_eq!(dest_exec.attempts, 4);
    assert!(dest_exec.error.is_none());
    assert!(run.executed_nodes.contains(&"after".to_string()));
}

#[tokio::test]
async fn exhausted_budget_fails_run_with_connection_kind() {
    let fx = fixture();
    let f = retry_flow(3);
    fx.store.create_flow(&f).await.unwrap();

    // 503 four times: one more than the budget absorbs.
    let run = flaky_orchestrator(&fx, 10)
        .execute(seed(&f, json!({"n": 1})))
        .await
        .unwrap();

    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.error_node.as_deref(), Some("dest"));
    let dest_exec = run
        .node_executions
        .iter()
        .find(|e| e.node_id == "dest")
        .unwrap();
    assert_eq!(dest_exec.attempts, 4);
    assert_eq!(
        dest_exec.error_kind,
        Some(manifold_core::ErrorKind::Connection)
    );

    // A failed run produces an error report.
    let reports = fx.store.list_reports(10).await.unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].run_id, run.id);
}

#[tokio::test]
async fn exhausted_budget_reroutes_to_failure_edge() {
    let fx = fixture();
    let mut f = retry_flow(3);
    f.nodes.push(node("recover", NodeKind::Egress, json!({"channel": "log"})));
    f.edges.push(edge("dest", "recover", Some("Failure")));
    fx.store.create_flow(&f).await.unwrap();

    let run = flaky_orchestrator(&fx, 10)
        .execute(seed(&f, json!({"n": 1})))
        .await
        .unwrap();

    assert_eq!(run.status, RunStatus::Completed);
    assert!(run.executed_nodes.contains(&"recover".to_string()));
    let recover_exec = run
        .node_executions
        .iter()
        .find(|e| e.node_id == "recover")
        .unwrap();
    let payload = recover_exec.output.as_ref().unwrap();
    assert_eq!(payload["errorKind"], "connection");
}

// ── Parallel fan-out isolation ────────────────────────────────────────────

/// Always fails with a semantic error.
struct AlwaysFails;

#[async_trait]
impl NodeExecutor for AlwaysFails {
    async fn execute(
        &self,
        _node: &Node,
        _input: NodeInput,
        _scope: &ExecutionScope,
    ) -> Result<NodeOutcome, EngineError> {
        Err(EngineError::business_logic("upstream rejected"))
    }
}

#[tokio::test]
async fn branch_failure_keeps_completed_sibling_outputs() {
    let fx = fixture();
    let f = flow(
        vec![
            node("webhook", NodeKind::WebhookTrigger, json!({})),
            node("good", NodeKind::Egress, json!({"channel": "log"})),
            node("bad", NodeKind::HttpDestination, json!({})),
        ],
        vec![
            // Definition order puts the healthy branch first.
            edge("webhook", "good", None),
            edge("webhook", "bad", None),
        ],
    );
    fx.store.create_flow(&f).await.unwrap();

    let mut registry = manifold_engine::ExecutorRegistry::new();
    let defaults = default_registry();
    registry.register(NodeKind::HttpDestination, Arc::new(AlwaysFails));
    for kind in [NodeKind::WebhookTrigger, NodeKind::Egress] {
        registry.register(kind, defaults.executor_for(kind).unwrap());
    }
    let orch = Orchestrator::new(fx.services.clone(), Arc::new(registry))
        .with_retry_base(Duration::from_millis(1));

    let run = orch.execute(seed(&f, json!({"n": 1}))).await.unwrap();

    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.error_node.as_deref(), Some("bad"));
    // The sibling branch ran and its record survives the failure.
    let good_exec = run
        .node_executions
        .iter()
        .find(|e| e.node_id == "good")
        .unwrap();
    assert_eq!(
        good_exec.status,
        manifold_core::model::run::NodeExecutionStatus::Completed
    );
    // Exactly one node carries an error.
    let failed: Vec<_> = run
        .node_executions
        .iter()
        .filter(|e| e.error.is_some())
        .collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].node_id, "bad");
}

// ── Emulation determinism ─────────────────────────────────────────────────

#[tokio::test]
async fn emulated_runs_are_deterministic() {
    let fx = fixture();
    let f = flow(
        vec![
            node("webhook", NodeKind::WebhookTrigger, json!({})),
            node(
                "call",
                NodeKind::HttpDestination,
                json!({"url": "https://api.example/orders", "method": "POST"}),
            ),
            node("out", NodeKind::Egress, json!({"channel": "log"})),
        ],
        vec![edge("webhook", "call", None), edge("call", "out", None)],
    );
    fx.store.create_flow(&f).await.unwrap();
    let orch = orchestrator(&fx);

    let mut emulated = seed(&f, json!({"order_id": "E"}));
    emulated.emulation = true;

    let first = orch.execute(emulated.clone()).await.unwrap();
    let second = orch.execute(emulated).await.unwrap();

    assert_eq!(first.executed_nodes, second.executed_nodes);
    let outputs = |run: &manifold_core::model::run::FlowRun| {
        run.node_executions
            .iter()
            .map(|e| (e.node_id.clone(), e.output.clone()))
            .collect::<Vec<_>>()
    };
    assert_eq!(outputs(&first), outputs(&second));
}
