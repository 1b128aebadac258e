//! In-memory storage gateway, used by tests and single-process runs.
//!
//! Conditional writes are serialized through DashMap entry locks, which
//! gives the same per-key atomicity the Postgres backend gets from guarded
//! `UPDATE` statements.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Mutex;
use uuid::Uuid;

use manifold_core::model::adapter::{AuthAdapter, InboundAuthPolicy};
use manifold_core::model::event::IntegrationEvent;
use manifold_core::model::flow::Flow;
use manifold_core::model::join::{JoinState, JoinStatus};
use manifold_core::model::poller::PollerState;
use manifold_core::model::queue::QueueSwitch;
use manifold_core::model::report::ErrorReport;
use manifold_core::model::run::FlowRun;
use manifold_core::model::secret::{MasterKeyRecord, SecretRecord};
use manifold_core::model::token::{TokenCacheEntry, TokenCacheKey};
use manifold_core::model::version::FlowVersion;

use crate::{StorageGateway, StoreError, StoreResult};

type JoinKey = (Uuid, String, String);
type PollerKey = (Uuid, String);

/// DashMap-backed gateway. Cloning shares the underlying maps.
#[derive(Default)]
pub struct MemoryStore {
    flows: DashMap<Uuid, Flow>,
    versions: DashMap<Uuid, FlowVersion>,
    runs: DashMap<Uuid, FlowRun>,
    joins: DashMap<JoinKey, JoinState>,
    pollers: DashMap<PollerKey, PollerState>,
    tokens: DashMap<TokenCacheKey, TokenCacheEntry>,
    secrets: DashMap<Uuid, SecretRecord>,
    master_key: Mutex<Option<MasterKeyRecord>>,
    adapters: DashMap<Uuid, AuthAdapter>,
    policies: DashMap<Uuid, InboundAuthPolicy>,
    reports: DashMap<Uuid, ErrorReport>,
    events: Mutex<Vec<IntegrationEvent>>,
    queue_switch: Mutex<Option<QueueSwitch>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn lock_poisoned<T>(_: T) -> StoreError {
    StoreError::Backend("memory store lock poisoned".into())
}

#[async_trait]
impl StorageGateway for MemoryStore {
    async fn create_flow(&self, flow: &Flow) -> StoreResult<()> {
        match self.flows.entry(flow.id) {
            Entry::Occupied(_) => Err(StoreError::Conflict(format!("flow {}", flow.id))),
            Entry::Vacant(v) => {
                v.insert(flow.clone());
                Ok(())
            }
        }
    }

    async fn get_flow(&self, id: Uuid) -> StoreResult<Option<Flow>> {
        Ok(self.flows.get(&id).map(|f| f.clone()))
    }

    async fn update_flow(&self, flow: &Flow) -> StoreResult<()> {
        match self.flows.entry(flow.id) {
            Entry::Occupied(mut o) => {
                o.insert(flow.clone());
                Ok(())
            }
            Entry::Vacant(_) => Err(StoreError::NotFound(format!("flow {}", flow.id))),
        }
    }

    async fn delete_flow(&self, id: Uuid) -> StoreResult<bool> {
        Ok(self.flows.remove(&id).is_some())
    }

    async fn list_flows(&self) -> StoreResult<Vec<Flow>> {
        let mut all: Vec<Flow> = self.flows.iter().map(|e| e.clone()).collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(all)
    }

    async fn list_enabled_flows(&self) -> StoreResult<Vec<Flow>> {
        Ok(self
            .list_flows()
            .await?
            .into_iter()
            .filter(|f| f.enabled)
            .collect())
    }

    async fn create_version(&self, version: &FlowVersion) -> StoreResult<()> {
        self.versions.insert(version.id, version.clone());
        Ok(())
    }

    async fn get_version(&self, id: Uuid) -> StoreResult<Option<FlowVersion>> {
        Ok(self.versions.get(&id).map(|v| v.clone()))
    }

    async fn update_version(&self, version: &FlowVersion) -> StoreResult<()> {
        match self.versions.entry(version.id) {
            Entry::Occupied(mut o) => {
                o.insert(version.clone());
                Ok(())
            }
            Entry::Vacant(_) => Err(StoreError::NotFound(format!("version {}", version.id))),
        }
    }

    async fn list_versions(&self, flow_id: Uuid) -> StoreResult<Vec<FlowVersion>> {
        let mut all: Vec<FlowVersion> = self
            .versions
            .iter()
            .filter(|v| v.flow_id == flow_id)
            .map(|v| v.clone())
            .collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(all)
    }

    async fn create_run(&self, run: &FlowRun) -> StoreResult<()> {
        self.runs.insert(run.id, run.clone());
        Ok(())
    }

    async fn update_run(&self, run: &FlowRun) -> StoreResult<()> {
        self.runs.insert(run.id, run.clone());
        Ok(())
    }

    async fn get_run(&self, id: Uuid) -> StoreResult<Option<FlowRun>> {
        Ok(self.runs.get(&id).map(|r| r.clone()))
    }

    async fn list_runs(&self, flow_id: Uuid, limit: usize) -> StoreResult<Vec<FlowRun>> {
        let mut all: Vec<FlowRun> = self
            .runs
            .iter()
            .filter(|r| r.flow_id == flow_id)
            .map(|r| r.clone())
            .collect();
        all.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        all.truncate(limit);
        Ok(all)
    }

    async fn get_join(
        &self,
        flow_id: Uuid,
        node_id: &str,
        correlation_value: &str,
    ) -> StoreResult<Option<JoinState>> {
        let key = (flow_id, node_id.to_string(), correlation_value.to_string());
        Ok(self.joins.get(&key).map(|j| j.clone()))
    }

    async fn insert_join(&self, state: &JoinState) -> StoreResult<bool> {
        let key = (
            state.flow_id,
            state.node_id.clone(),
            state.correlation_value.clone(),
        );
        match self.joins.entry(key) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(v) => {
                v.insert(state.clone());
                Ok(true)
            }
        }
    }

    async fn update_join_guarded(
        &self,
        state: &JoinState,
        expected: JoinStatus,
    ) -> StoreResult<bool> {
        let key = (
            state.flow_id,
            state.node_id.clone(),
            state.correlation_value.clone(),
        );
        match self.joins.entry(key) {
            Entry::Occupied(mut o) => {
                if o.get().status == expected {
                    o.insert(state.clone());
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            Entry::Vacant(_) => Ok(false),
        }
    }

    async fn expired_joins(&self, now: DateTime<Utc>) -> StoreResult<Vec<JoinState>> {
        Ok(self
            .joins
            .iter()
            .filter(|j| j.is_waiting() && j.expires_at < now)
            .map(|j| j.clone())
            .collect())
    }

    async fn get_poller_state(
        &self,
        flow_id: Uuid,
        node_id: &str,
    ) -> StoreResult<Option<PollerState>> {
        Ok(self
            .pollers
            .get(&(flow_id, node_id.to_string()))
            .map(|p| p.clone()))
    }

    async fn put_poller_state(&self, state: &PollerState) -> StoreResult<()> {
        self.pollers
            .insert((state.flow_id, state.node_id.clone()), state.clone());
        Ok(())
    }

    async fn get_token(&self, key: &TokenCacheKey) -> StoreResult<Option<TokenCacheEntry>> {
        Ok(self.tokens.get(key).map(|t| t.clone()))
    }

    async fn insert_token(&self, entry: &TokenCacheEntry) -> StoreResult<bool> {
        match self.tokens.entry(entry.key.clone()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(v) => {
                v.insert(entry.clone());
                Ok(true)
            }
        }
    }

    async fn cas_token(&self, entry: &TokenCacheEntry, expected_version: i64) -> StoreResult<bool> {
        match self.tokens.entry(entry.key.clone()) {
            Entry::Occupied(mut o) => {
                if o.get().version == expected_version {
                    o.insert(entry.clone());
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            Entry::Vacant(_) => Ok(false),
        }
    }

    async fn delete_tokens_for_adapter(&self, adapter_id: Uuid) -> StoreResult<()> {
        self.tokens.retain(|k, _| k.adapter_id != adapter_id);
        Ok(())
    }

    async fn tokens_expiring_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> StoreResult<Vec<TokenCacheEntry>> {
        Ok(self
            .tokens
            .iter()
            .filter(|t| t.expires_at < cutoff)
            .map(|t| t.clone())
            .collect())
    }

    async fn put_secret(&self, secret: &SecretRecord) -> StoreResult<()> {
        self.secrets.insert(secret.id, secret.clone());
        Ok(())
    }

    async fn get_secret(&self, id: Uuid) -> StoreResult<Option<SecretRecord>> {
        Ok(self.secrets.get(&id).map(|s| s.clone()))
    }

    async fn list_secrets(&self) -> StoreResult<Vec<SecretRecord>> {
        Ok(self.secrets.iter().map(|s| s.clone()).collect())
    }

    async fn delete_secret(&self, id: Uuid) -> StoreResult<bool> {
        Ok(self.secrets.remove(&id).is_some())
    }

    async fn wipe_secrets(&self) -> StoreResult<()> {
        self.secrets.clear();
        Ok(())
    }

    async fn get_master_key(&self) -> StoreResult<Option<MasterKeyRecord>> {
        Ok(self.master_key.lock().map_err(lock_poisoned)?.clone())
    }

    async fn put_master_key(&self, record: &MasterKeyRecord) -> StoreResult<()> {
        *self.master_key.lock().map_err(lock_poisoned)? = Some(record.clone());
        Ok(())
    }

    async fn clear_master_key(&self) -> StoreResult<()> {
        *self.master_key.lock().map_err(lock_poisoned)? = None;
        Ok(())
    }

    async fn put_adapter(&self, adapter: &AuthAdapter) -> StoreResult<()> {
        self.adapters.insert(adapter.id, adapter.clone());
        Ok(())
    }

    async fn get_adapter(&self, id: Uuid) -> StoreResult<Option<AuthAdapter>> {
        Ok(self.adapters.get(&id).map(|a| a.clone()))
    }

    async fn list_adapters(&self) -> StoreResult<Vec<AuthAdapter>> {
        Ok(self.adapters.iter().map(|a| a.clone()).collect())
    }

    async fn delete_adapter(&self, id: Uuid) -> StoreResult<bool> {
        let removed = self.adapters.remove(&id).is_some();
        if removed {
            self.delete_tokens_for_adapter(id).await?;
        }
        Ok(removed)
    }

    async fn put_policy(&self, policy: &InboundAuthPolicy) -> StoreResult<()> {
        self.policies.insert(policy.id, policy.clone());
        Ok(())
    }

    async fn list_policies(&self) -> StoreResult<Vec<InboundAuthPolicy>> {
        let mut all: Vec<InboundAuthPolicy> =
            self.policies.iter().map(|p| p.clone()).collect();
        all.sort_by_key(|p| p.priority);
        Ok(all)
    }

    async fn delete_policy(&self, id: Uuid) -> StoreResult<bool> {
        Ok(self.policies.remove(&id).is_some())
    }

    async fn create_report(&self, report: &ErrorReport) -> StoreResult<()> {
        self.reports.insert(report.id, report.clone());
        Ok(())
    }

    async fn get_report(&self, id: Uuid) -> StoreResult<Option<ErrorReport>> {
        Ok(self.reports.get(&id).map(|r| r.clone()))
    }

    async fn update_report(&self, report: &ErrorReport) -> StoreResult<()> {
        match self.reports.entry(report.id) {
            Entry::Occupied(mut o) => {
                o.insert(report.clone());
                Ok(())
            }
            Entry::Vacant(_) => Err(StoreError::NotFound(format!("report {}", report.id))),
        }
    }

    async fn list_reports(&self, limit: usize) -> StoreResult<Vec<ErrorReport>> {
        let mut all: Vec<ErrorReport> = self.reports.iter().map(|r| r.clone()).collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        all.truncate(limit);
        Ok(all)
    }

    async fn append_event(&self, event: &IntegrationEvent) -> StoreResult<()> {
        self.events.lock().map_err(lock_poisoned)?.push(event.clone());
        Ok(())
    }

    async fn events_for_run(&self, run_id: Uuid) -> StoreResult<Vec<IntegrationEvent>> {
        Ok(self
            .events
            .lock()
            .map_err(lock_poisoned)?
            .iter()
            .filter(|e| e.run_id == Some(run_id))
            .cloned()
            .collect())
    }

    async fn get_queue_switch(&self) -> StoreResult<Option<QueueSwitch>> {
        Ok(self.queue_switch.lock().map_err(lock_poisoned)?.clone())
    }

    async fn put_queue_switch(&self, switch: &QueueSwitch) -> StoreResult<()> {
        *self.queue_switch.lock().map_err(lock_poisoned)? = Some(switch.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use manifold_core::model::join::{JoinStrategy, JoinStatus};
    use manifold_core::model::token::TokenType;
    use serde_json::json;

    fn waiting_join() -> JoinState {
        JoinState {
            flow_id: Uuid::new_v4(),
            node_id: "join".into(),
            correlation_key: "order_id".into(),
            correlation_value: "X".into(),
            stream_a: Some(json!({"a": 1})),
            stream_b: None,
            status: JoinStatus::WaitingB,
            strategy: JoinStrategy::Inner,
            expires_at: Utc::now() + chrono::Duration::minutes(5),
            matched_at: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn join_insert_is_unique_per_key() {
        let store = MemoryStore::new();
        let state = waiting_join();
        assert!(store.insert_join(&state).await.unwrap());
        assert!(!store.insert_join(&state).await.unwrap());
    }

    #[tokio::test]
    async fn guarded_update_fires_once() {
        let store = MemoryStore::new();
        let mut state = waiting_join();
        store.insert_join(&state).await.unwrap();

        state.stream_b = Some(json!({"b": 2}));
        state.status = JoinStatus::Matched;
        state.matched_at = Some(Utc::now());

        // First writer wins the waiting→matched transition.
        assert!(store
            .update_join_guarded(&state, JoinStatus::WaitingB)
            .await
            .unwrap());
        // Second writer observes the guard failing.
        assert!(!store
            .update_join_guarded(&state, JoinStatus::WaitingB)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn token_cas_rejects_stale_version() {
        let store = MemoryStore::new();
        let key = TokenCacheKey {
            adapter_id: Uuid::new_v4(),
            token_type: TokenType::Access,
            scope: String::new(),
        };
        let mut entry = TokenCacheEntry::new(key.clone());
        assert!(store.insert_token(&entry).await.unwrap());

        entry.version = 1;
        assert!(store.cas_token(&entry, 0).await.unwrap());
        // A writer still holding version 0 loses.
        assert!(!store.cas_token(&entry, 0).await.unwrap());
        assert_eq!(store.get_token(&key).await.unwrap().unwrap().version, 1);
    }

    #[tokio::test]
    async fn deleting_adapter_evicts_tokens() {
        let store = MemoryStore::new();
        let adapter_id = Uuid::new_v4();
        let key = TokenCacheKey {
            adapter_id,
            token_type: TokenType::Access,
            scope: String::new(),
        };
        store
            .insert_token(&TokenCacheEntry::new(key.clone()))
            .await
            .unwrap();

        let adapter = manifold_core::model::adapter::AuthAdapter {
            id: adapter_id,
            name: "a".into(),
            grant: manifold_core::model::adapter::AdapterGrant::ApiKey,
            secret_id: Uuid::new_v4(),
            location: manifold_core::model::adapter::CredentialLocation::Header(
                "Authorization".into(),
            ),
            prefix: None,
            token_url: None,
            scope: None,
            jwt: None,
            introspection_url: None,
            enabled: true,
        };
        store.put_adapter(&adapter).await.unwrap();
        assert!(store.delete_adapter(adapter_id).await.unwrap());
        assert!(store.get_token(&key).await.unwrap().is_none());
    }
}
