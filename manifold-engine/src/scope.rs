//! Execution context threaded through every node executor.
//!
//! Shared services are explicit dependencies, never ambient globals; the
//! cancellation token carries the run-level deadline into every I/O call.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use manifold_auth::TokenService;
use manifold_core::EngineConfig;
use manifold_queue::QueueBackend;
use manifold_store::StorageGateway;
use manifold_vault::Vault;

/// The engine's shared service handles, passed into orchestrator and
/// executors as one dependency structure.
pub struct EngineServices {
    pub store: Arc<dyn StorageGateway>,
    pub vault: Arc<Vault>,
    pub tokens: Arc<TokenService>,
    pub queue: Arc<dyn QueueBackend>,
    pub http: reqwest::Client,
    pub config: EngineConfig,
}

/// Per-run context handed to every executor invocation.
#[derive(Clone)]
pub struct ExecutionScope {
    pub flow_id: Uuid,
    pub flow_name: String,
    pub run_id: Uuid,
    pub trace_id: String,
    /// Connector executors return deterministic mock outputs and skip
    /// credentials and join/poller persistence.
    pub emulation: bool,
    /// Run-level deadline; cancelled means abort with error kind `timeout`.
    pub deadline: CancellationToken,
    /// Per-node I/O timeout.
    pub node_timeout: Duration,
    pub services: Arc<EngineServices>,
}

/// One unit of work on the ready queue: a payload arriving at a node,
/// optionally via a labeled edge.
#[derive(Clone, Debug)]
pub struct NodeInput {
    pub payload: Value,
    /// Label of the edge the payload arrived on. Joins use it to tell the
    /// two streams apart.
    pub via_label: Option<String>,
}

impl NodeInput {
    pub fn seed(payload: Value) -> Self {
        Self {
            payload,
            via_label: None,
        }
    }
}
