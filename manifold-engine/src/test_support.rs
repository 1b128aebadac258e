//! Shared fixtures for the engine's unit tests.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use manifold_auth::{TokenService, TokenServiceConfig};
use manifold_core::EngineConfig;
use manifold_queue::MemoryQueue;
use manifold_store::MemoryStore;
use manifold_vault::Vault;

use crate::scope::{EngineServices, ExecutionScope};

pub fn services() -> Arc<EngineServices> {
    let store = Arc::new(MemoryStore::new());
    let vault = Arc::new(Vault::new(store.clone()));
    let tokens = Arc::new(TokenService::new(
        store.clone(),
        vault.clone(),
        TokenServiceConfig::default(),
    ));
    Arc::new(EngineServices {
        store,
        vault,
        tokens,
        queue: Arc::new(MemoryQueue::new()),
        http: reqwest::Client::new(),
        config: EngineConfig::default(),
    })
}

pub fn scope_with(services: Arc<EngineServices>, emulation: bool) -> ExecutionScope {
    ExecutionScope {
        flow_id: Uuid::new_v4(),
        flow_name: "test-flow".into(),
        run_id: Uuid::new_v4(),
        trace_id: "trace-test".into(),
        emulation,
        deadline: CancellationToken::new(),
        node_timeout: Duration::from_secs(5),
        services,
    }
}

pub fn scope() -> ExecutionScope {
    scope_with(services(), false)
}

pub fn emulation_scope() -> ExecutionScope {
    scope_with(services(), true)
}
