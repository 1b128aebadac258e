use std::sync::Arc;

use manifold_auth::PolicyEngine;
use manifold_engine::{Orchestrator, PollerService};
use manifold_queue::QueueBackend;
use manifold_scheduler::ScheduleRegistry;
use manifold_store::StorageGateway;
use manifold_vault::Vault;

/// Shared handles every route reaches through `State`.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn StorageGateway>,
    pub vault: Arc<Vault>,
    pub queue: Arc<dyn QueueBackend>,
    pub orchestrator: Arc<Orchestrator>,
    pub scheduler: Arc<ScheduleRegistry>,
    pub pollers: Arc<PollerService>,
    pub policies: Arc<PolicyEngine>,
}
