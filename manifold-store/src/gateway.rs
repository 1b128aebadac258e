use async_trait::async_trait;
use chrono::{DateTime, Utc};
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

use crate::StoreResult;

/// Typed persistence contract for every aggregate the engine owns.
///
/// Implementations must make the conditional operations atomic per key:
/// [`Self::update_join_guarded`], [`Self::cas_token`], and
/// [`Self::insert_join`] are the concurrency primitives the join store and
/// token lifecycle are built on.
#[async_trait]
pub trait StorageGateway: Send + Sync + 'static {
    // ── Flows ─────────────────────────────────────────────────────────────

    async fn create_flow(&self, flow: &Flow) -> StoreResult<()>;
    async fn get_flow(&self, id: Uuid) -> StoreResult<Option<Flow>>;
    async fn update_flow(&self, flow: &Flow) -> StoreResult<()>;
    /// Returns whether a flow was actually removed.
    async fn delete_flow(&self, id: Uuid) -> StoreResult<bool>;
    async fn list_flows(&self) -> StoreResult<Vec<Flow>>;
    async fn list_enabled_flows(&self) -> StoreResult<Vec<Flow>>;

    // ── Flow versions ─────────────────────────────────────────────────────

    async fn create_version(&self, version: &FlowVersion) -> StoreResult<()>;
    async fn get_version(&self, id: Uuid) -> StoreResult<Option<FlowVersion>>;
    async fn update_version(&self, version: &FlowVersion) -> StoreResult<()>;
    /// Newest first.
    async fn list_versions(&self, flow_id: Uuid) -> StoreResult<Vec<FlowVersion>>;

    // ── Runs ──────────────────────────────────────────────────────────────

    async fn create_run(&self, run: &FlowRun) -> StoreResult<()>;
    async fn update_run(&self, run: &FlowRun) -> StoreResult<()>;
    async fn get_run(&self, id: Uuid) -> StoreResult<Option<FlowRun>>;
    /// Newest first, bounded by `limit`.
    async fn list_runs(&self, flow_id: Uuid, limit: usize) -> StoreResult<Vec<FlowRun>>;

    // ── Join state ────────────────────────────────────────────────────────

    async fn get_join(
        &self,
        flow_id: Uuid,
        node_id: &str,
        correlation_value: &str,
    ) -> StoreResult<Option<JoinState>>;
    /// Insert a fresh waiting state. Returns `false` when a state already
    /// exists for the key (the caller re-fetches and goes down the update
    /// path instead).
    async fn insert_join(&self, state: &JoinState) -> StoreResult<bool>;
    /// Write `state` only if the stored status still equals `expected`.
    /// This is the waiting→matched transition guard: exactly one writer
    /// observes `true`.
    async fn update_join_guarded(
        &self,
        state: &JoinState,
        expected: JoinStatus,
    ) -> StoreResult<bool>;
    /// Waiting states whose TTL has passed.
    async fn expired_joins(&self, now: DateTime<Utc>) -> StoreResult<Vec<JoinState>>;

    // ── Poller state ──────────────────────────────────────────────────────

    async fn get_poller_state(
        &self,
        flow_id: Uuid,
        node_id: &str,
    ) -> StoreResult<Option<PollerState>>;
    async fn put_poller_state(&self, state: &PollerState) -> StoreResult<()>;

    // ── Token cache ───────────────────────────────────────────────────────

    async fn get_token(&self, key: &TokenCacheKey) -> StoreResult<Option<TokenCacheEntry>>;
    /// Insert a brand-new entry; `false` on conflict.
    async fn insert_token(&self, entry: &TokenCacheEntry) -> StoreResult<bool>;
    /// Compare-and-swap: persist `entry` (with `entry.version` already
    /// bumped) only if the stored version still equals `expected_version`.
    async fn cas_token(&self, entry: &TokenCacheEntry, expected_version: i64) -> StoreResult<bool>;
    async fn delete_tokens_for_adapter(&self, adapter_id: Uuid) -> StoreResult<()>;
    /// Entries whose expiry falls before `cutoff` — the proactive-refresh
    /// sweep input.
    async fn tokens_expiring_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> StoreResult<Vec<TokenCacheEntry>>;

    // ── Secrets & master key ──────────────────────────────────────────────

    async fn put_secret(&self, secret: &SecretRecord) -> StoreResult<()>;
    async fn get_secret(&self, id: Uuid) -> StoreResult<Option<SecretRecord>>;
    async fn list_secrets(&self) -> StoreResult<Vec<SecretRecord>>;
    async fn delete_secret(&self, id: Uuid) -> StoreResult<bool>;
    /// Destroys every secret. Only `resetVault` calls this.
    async fn wipe_secrets(&self) -> StoreResult<()>;

    async fn get_master_key(&self) -> StoreResult<Option<MasterKeyRecord>>;
    async fn put_master_key(&self, record: &MasterKeyRecord) -> StoreResult<()>;
    async fn clear_master_key(&self) -> StoreResult<()>;

    // ── Adapters & inbound policies ───────────────────────────────────────

    async fn put_adapter(&self, adapter: &AuthAdapter) -> StoreResult<()>;
    async fn get_adapter(&self, id: Uuid) -> StoreResult<Option<AuthAdapter>>;
    async fn list_adapters(&self) -> StoreResult<Vec<AuthAdapter>>;
    /// Removing an adapter also evicts its cached tokens.
    async fn delete_adapter(&self, id: Uuid) -> StoreResult<bool>;

    async fn put_policy(&self, policy: &InboundAuthPolicy) -> StoreResult<()>;
    /// Ordered by priority ascending.
    async fn list_policies(&self) -> StoreResult<Vec<InboundAuthPolicy>>;
    async fn delete_policy(&self, id: Uuid) -> StoreResult<bool>;

    // ── Error reports ─────────────────────────────────────────────────────

    async fn create_report(&self, report: &ErrorReport) -> StoreResult<()>;
    async fn get_report(&self, id: Uuid) -> StoreResult<Option<ErrorReport>>;
    async fn update_report(&self, report: &ErrorReport) -> StoreResult<()>;
    /// Newest first, bounded by `limit`.
    async fn list_reports(&self, limit: usize) -> StoreResult<Vec<ErrorReport>>;

    // ── Integration events ────────────────────────────────────────────────

    async fn append_event(&self, event: &IntegrationEvent) -> StoreResult<()>;
    async fn events_for_run(&self, run_id: Uuid) -> StoreResult<Vec<IntegrationEvent>>;

    // ── Queue backend switch ──────────────────────────────────────────────

    async fn get_queue_switch(&self) -> StoreResult<Option<QueueSwitch>>;
    async fn put_queue_switch(&self, switch: &QueueSwitch) -> StoreResult<()>;
}
