//! PostgreSQL storage gateway.
//!
//! Aggregates are stored as JSONB documents next to the key and guard
//! columns the conditional writes need (`status` for join transitions,
//! `version` for token CAS). All queries are runtime-bound; the schema is
//! created on startup with idempotent DDL.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
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
use manifold_core::model::token::{TokenCacheEntry, TokenCacheKey, TokenType};
use manifold_core::model::version::FlowVersion;

use crate::{StorageGateway, StoreError, StoreResult};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS flows (
        id UUID PRIMARY KEY,
        enabled BOOLEAN NOT NULL,
        created_at TIMESTAMPTZ NOT NULL,
        data JSONB NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS flow_versions (
        id UUID PRIMARY KEY,
        flow_id UUID NOT NULL,
        created_at TIMESTAMPTZ NOT NULL,
        data JSONB NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS flow_versions_flow_idx ON flow_versions (flow_id, created_at DESC)",
    "CREATE TABLE IF NOT EXISTS flow_runs (
        id UUID PRIMARY KEY,
        flow_id UUID NOT NULL,
        started_at TIMESTAMPTZ NOT NULL,
        data JSONB NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS flow_runs_flow_idx ON flow_runs (flow_id, started_at DESC)",
    "CREATE TABLE IF NOT EXISTS join_states (
        flow_id UUID NOT NULL,
        node_id TEXT NOT NULL,
        correlation_value TEXT NOT NULL,
        status TEXT NOT NULL,
        expires_at TIMESTAMPTZ NOT NULL,
        data JSONB NOT NULL,
        PRIMARY KEY (flow_id, node_id, correlation_value)
    )",
    "CREATE INDEX IF NOT EXISTS join_states_expiry_idx ON join_states (expires_at) WHERE status IN ('waiting_a', 'waiting_b')",
    "CREATE TABLE IF NOT EXISTS poller_states (
        flow_id UUID NOT NULL,
        node_id TEXT NOT NULL,
        data JSONB NOT NULL,
        PRIMARY KEY (flow_id, node_id)
    )",
    "CREATE TABLE IF NOT EXISTS token_cache (
        adapter_id UUID NOT NULL,
        token_type TEXT NOT NULL,
        scope TEXT NOT NULL,
        version BIGINT NOT NULL,
        expires_at TIMESTAMPTZ NOT NULL,
        data JSONB NOT NULL,
        PRIMARY KEY (adapter_id, token_type, scope)
    )",
    "CREATE TABLE IF NOT EXISTS secrets (
        id UUID PRIMARY KEY,
        data JSONB NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS master_key (
        singleton INT PRIMARY KEY CHECK (singleton = 1),
        data JSONB NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS auth_adapters (
        id UUID PRIMARY KEY,
        data JSONB NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS inbound_policies (
        id UUID PRIMARY KEY,
        priority INT NOT NULL,
        data JSONB NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS error_reports (
        id UUID PRIMARY KEY,
        created_at TIMESTAMPTZ NOT NULL,
        data JSONB NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS integration_events (
        id UUID PRIMARY KEY,
        run_id UUID,
        at TIMESTAMPTZ NOT NULL,
        data JSONB NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS integration_events_run_idx ON integration_events (run_id, at)",
    "CREATE TABLE IF NOT EXISTS queue_switch (
        singleton INT PRIMARY KEY CHECK (singleton = 1),
        data JSONB NOT NULL
    )",
];

fn join_status_str(status: JoinStatus) -> &'static str {
    match status {
        JoinStatus::WaitingA => "waiting_a",
        JoinStatus::WaitingB => "waiting_b",
        JoinStatus::Matched => "matched",
        JoinStatus::Timeout => "timeout",
    }
}

fn token_type_str(token_type: TokenType) -> &'static str {
    match token_type {
        TokenType::Access => "access",
        TokenType::Refresh => "refresh",
        TokenType::Session => "session",
    }
}

fn decode<T: serde::de::DeserializeOwned>(row: &sqlx::postgres::PgRow) -> StoreResult<T> {
    let data: serde_json::Value = row.try_get("data").map_err(StoreError::from)?;
    Ok(serde_json::from_value(data)?)
}

fn encode<T: serde::Serialize>(value: &T) -> StoreResult<serde_json::Value> {
    Ok(serde_json::to_value(value)?)
}

/// Storage gateway over an `sqlx` Postgres pool.
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect and create the schema.
    pub async fn connect(database_url: &str) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    pub fn with_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn init_schema(&self) -> StoreResult<()> {
        for ddl in SCHEMA.iter().copied() {
            sqlx::query(ddl).execute(&self.pool).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl StorageGateway for PgStore {
    async fn create_flow(&self, flow: &Flow) -> StoreResult<()> {
        let inserted = sqlx::query(
            "INSERT INTO flows (id, enabled, created_at, data) VALUES ($1, $2, $3, $4)
             ON CONFLICT (id) DO NOTHING",
        )
        .bind(flow.id)
        .bind(flow.enabled)
        .bind(flow.created_at)
        .bind(encode(flow)?)
        .execute(&self.pool)
        .await?
        .rows_affected();
        if inserted == 0 {
            return Err(StoreError::Conflict(format!("flow {}", flow.id)));
        }
        Ok(())
    }

    async fn get_flow(&self, id: Uuid) -> StoreResult<Option<Flow>> {
        let row = sqlx::query("SELECT data FROM flows WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(decode).transpose()
    }

    async fn update_flow(&self, flow: &Flow) -> StoreResult<()> {
        let updated = sqlx::query("UPDATE flows SET enabled = $2, data = $3 WHERE id = $1")
            .bind(flow.id)
            .bind(flow.enabled)
            .bind(encode(flow)?)
            .execute(&self.pool)
            .await?
            .rows_affected();
        if updated == 0 {
            return Err(StoreError::NotFound(format!("flow {}", flow.id)));
        }
        Ok(())
    }

    async fn delete_flow(&self, id: Uuid) -> StoreResult<bool> {
        let deleted = sqlx::query("DELETE FROM flows WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(deleted > 0)
    }

    async fn list_flows(&self) -> StoreResult<Vec<Flow>> {
        let rows = sqlx::query("SELECT data FROM flows ORDER BY created_at")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(decode).collect()
    }

    async fn list_enabled_flows(&self) -> StoreResult<Vec<Flow>> {
        let rows = sqlx::query("SELECT data FROM flows WHERE enabled ORDER BY created_at")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(decode).collect()
    }

    async fn create_version(&self, version: &FlowVersion) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO flow_versions (id, flow_id, created_at, data) VALUES ($1, $2, $3, $4)
             ON CONFLICT (id) DO UPDATE SET data = EXCLUDED.data",
        )
        .bind(version.id)
        .bind(version.flow_id)
        .bind(version.created_at)
        .bind(encode(version)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_version(&self, id: Uuid) -> StoreResult<Option<FlowVersion>> {
        let row = sqlx::query("SELECT data FROM flow_versions WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(decode).transpose()
    }

    async fn update_version(&self, version: &FlowVersion) -> StoreResult<()> {
        let updated = sqlx::query("UPDATE flow_versions SET data = $2 WHERE id = $1")
            .bind(version.id)
            .bind(encode(version)?)
            .execute(&self.pool)
            .await?
            .rows_affected();
        if updated == 0 {
            return Err(StoreError::NotFound(format!("version {}", version.id)));
        }
        Ok(())
    }

    async fn list_versions(&self, flow_id: Uuid) -> StoreResult<Vec<FlowVersion>> {
        let rows = sqlx::query(
            "SELECT data FROM flow_versions WHERE flow_id = $1 ORDER BY created_at DESC",
        )
        .bind(flow_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(decode).collect()
    }

    async fn create_run(&self, run: &FlowRun) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO flow_runs (id, flow_id, started_at, data) VALUES ($1, $2, $3, $4)",
        )
        .bind(run.id)
        .bind(run.flow_id)
        .bind(run.started_at)
        .bind(encode(run)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_run(&self, run: &FlowRun) -> StoreResult<()> {
        sqlx::query("UPDATE flow_runs SET data = $2 WHERE id = $1")
            .bind(run.id)
            .bind(encode(run)?)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_run(&self, id: Uuid) -> StoreResult<Option<FlowRun>> {
        let row = sqlx::query("SELECT data FROM flow_runs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(decode).transpose()
    }

    async fn list_runs(&self, flow_id: Uuid, limit: usize) -> StoreResult<Vec<FlowRun>> {
        let rows = sqlx::query(
            "SELECT data FROM flow_runs WHERE flow_id = $1 ORDER BY started_at DESC LIMIT $2",
        )
        .bind(flow_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(decode).collect()
    }

    async fn get_join(
        &self,
        flow_id: Uuid,
        node_id: &str,
        correlation_value: &str,
    ) -> StoreResult<Option<JoinState>> {
        let row = sqlx::query(
            "SELECT data FROM join_states
             WHERE flow_id = $1 AND node_id = $2 AND correlation_value = $3",
        )
        .bind(flow_id)
        .bind(node_id)
        .bind(correlation_value)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(decode).transpose()
    }

    async fn insert_join(&self, state: &JoinState) -> StoreResult<bool> {
        let inserted = sqlx::query(
            "INSERT INTO join_states (flow_id, node_id, correlation_value, status, expires_at, data)
             VALUES ($1, $2, $3, $4, $5, $6)
             ON CONFLICT (flow_id, node_id, correlation_value) DO NOTHING",
        )
        .bind(state.flow_id)
        .bind(&state.node_id)
        .bind(&state.correlation_value)
        .bind(join_status_str(state.status))
        .bind(state.expires_at)
        .bind(encode(state)?)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(inserted == 1)
    }

    async fn update_join_guarded(
        &self,
        state: &JoinState,
        expected: JoinStatus,
    ) -> StoreResult<bool> {
        let updated = sqlx::query(
            "UPDATE join_states SET status = $4, expires_at = $5, data = $6
             WHERE flow_id = $1 AND node_id = $2 AND correlation_value = $3 AND status = $7",
        )
        .bind(state.flow_id)
        .bind(&state.node_id)
        .bind(&state.correlation_value)
        .bind(join_status_str(state.status))
        .bind(state.expires_at)
        .bind(encode(state)?)
        .bind(join_status_str(expected))
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(updated == 1)
    }

    async fn expired_joins(&self, now: DateTime<Utc>) -> StoreResult<Vec<JoinState>> {
        let rows = sqlx::query(
            "SELECT data FROM join_states
             WHERE status IN ('waiting_a', 'waiting_b') AND expires_at < $1",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(decode).collect()
    }

    async fn get_poller_state(
        &self,
        flow_id: Uuid,
        node_id: &str,
    ) -> StoreResult<Option<PollerState>> {
        let row = sqlx::query(
            "SELECT data FROM poller_states WHERE flow_id = $1 AND node_id = $2",
        )
        .bind(flow_id)
        .bind(node_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(decode).transpose()
    }

    async fn put_poller_state(&self, state: &PollerState) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO poller_states (flow_id, node_id, data) VALUES ($1, $2, $3)
             ON CONFLICT (flow_id, node_id) DO UPDATE SET data = EXCLUDED.data",
        )
        .bind(state.flow_id)
        .bind(&state.node_id)
        .bind(encode(state)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_token(&self, key: &TokenCacheKey) -> StoreResult<Option<TokenCacheEntry>> {
        let row = sqlx::query(
            "SELECT data FROM token_cache
             WHERE adapter_id = $1 AND token_type = $2 AND scope = $3",
        )
        .bind(key.adapter_id)
        .bind(token_type_str(key.token_type))
        .bind(&key.scope)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(decode).transpose()
    }

    async fn insert_token(&self, entry: &TokenCacheEntry) -> StoreResult<bool> {
        let inserted = sqlx::query(
            "INSERT INTO token_cache (adapter_id, token_type, scope, version, expires_at, data)
             VALUES ($1, $2, $3, $4, $5, $6)
             ON CONFLICT (adapter_id, token_type, scope) DO NOTHING",
        )
        .bind(entry.key.adapter_id)
        .bind(token_type_str(entry.key.token_type))
        .bind(&entry.key.scope)
        .bind(entry.version)
        .bind(entry.expires_at)
        .bind(encode(entry)?)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(inserted == 1)
    }

    async fn cas_token(&self, entry: &TokenCacheEntry, expected_version: i64) -> StoreResult<bool> {
        let updated = sqlx::query(
            "UPDATE token_cache SET version = $4, expires_at = $5, data = $6
             WHERE adapter_id = $1 AND token_type = $2 AND scope = $3 AND version = $7",
        )
        .bind(entry.key.adapter_id)
        .bind(token_type_str(entry.key.token_type))
        .bind(&entry.key.scope)
        .bind(entry.version)
        .bind(entry.expires_at)
        .bind(encode(entry)?)
        .bind(expected_version)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(updated == 1)
    }

    async fn delete_tokens_for_adapter(&self, adapter_id: Uuid) -> StoreResult<()> {
        sqlx::query("DELETE FROM token_cache WHERE adapter_id = $1")
            .bind(adapter_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn tokens_expiring_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> StoreResult<Vec<TokenCacheEntry>> {
        let rows = sqlx::query("SELECT data FROM token_cache WHERE expires_at < $1")
            .bind(cutoff)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(decode).collect()
    }

    async fn put_secret(&self, secret: &SecretRecord) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO secrets (id, data) VALUES ($1, $2)
             ON CONFLICT (id) DO UPDATE SET data = EXCLUDED.data",
        )
        .bind(secret.id)
        .bind(encode(secret)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_secret(&self, id: Uuid) -> StoreResult<Option<SecretRecord>> {
        let row = sqlx::query("SELECT data FROM secrets WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(decode).transpose()
    }

    async fn list_secrets(&self) -> StoreResult<Vec<SecretRecord>> {
        let rows = sqlx::query("SELECT data FROM secrets")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(decode).collect()
    }

    async fn delete_secret(&self, id: Uuid) -> StoreResult<bool> {
        let deleted = sqlx::query("DELETE FROM secrets WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(deleted > 0)
    }

    async fn wipe_secrets(&self) -> StoreResult<()> {
        sqlx::query("DELETE FROM secrets").execute(&self.pool).await?;
        Ok(())
    }

    async fn get_master_key(&self) -> StoreResult<Option<MasterKeyRecord>> {
        let row = sqlx::query("SELECT data FROM master_key WHERE singleton = 1")
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(decode).transpose()
    }

    async fn put_master_key(&self, record: &MasterKeyRecord) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO master_key (singleton, data) VALUES (1, $1)
             ON CONFLICT (singleton) DO UPDATE SET data = EXCLUDED.data",
        )
        .bind(encode(record)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn clear_master_key(&self) -> StoreResult<()> {
        sqlx::query("DELETE FROM master_key").execute(&self.pool).await?;
        Ok(())
    }

    async fn put_adapter(&self, adapter: &AuthAdapter) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO auth_adapters (id, data) VALUES ($1, $2)
             ON CONFLICT (id) DO UPDATE SET data = EXCLUDED.data",
        )
        .bind(adapter.id)
        .bind(encode(adapter)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_adapter(&self, id: Uuid) -> StoreResult<Option<AuthAdapter>> {
        let row = sqlx::query("SELECT data FROM auth_adapters WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(decode).transpose()
    }

    async fn list_adapters(&self) -> StoreResult<Vec<AuthAdapter>> {
        let rows = sqlx::query("SELECT data FROM auth_adapters")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(decode).collect()
    }

    async fn delete_adapter(&self, id: Uuid) -> StoreResult<bool> {
        let deleted = sqlx::query("DELETE FROM auth_adapters WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        if deleted > 0 {
            self.delete_tokens_for_adapter(id).await?;
        }
        Ok(deleted > 0)
    }

    async fn put_policy(&self, policy: &InboundAuthPolicy) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO inbound_policies (id, priority, data) VALUES ($1, $2, $3)
             ON CONFLICT (id) DO UPDATE SET priority = EXCLUDED.priority, data = EXCLUDED.data",
        )
        .bind(policy.id)
        .bind(policy.priority)
        .bind(encode(policy)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_policies(&self) -> StoreResult<Vec<InboundAuthPolicy>> {
        let rows = sqlx::query("SELECT data FROM inbound_policies ORDER BY priority")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(decode).collect()
    }

    async fn delete_policy(&self, id: Uuid) -> StoreResult<bool> {
        let deleted = sqlx::query("DELETE FROM inbound_policies WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(deleted > 0)
    }

    async fn create_report(&self, report: &ErrorReport) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO error_reports (id, created_at, data) VALUES ($1, $2, $3)",
        )
        .bind(report.id)
        .bind(report.created_at)
        .bind(encode(report)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_report(&self, id: Uuid) -> StoreResult<Option<ErrorReport>> {
        let row = sqlx::query("SELECT data FROM error_reports WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(decode).transpose()
    }

    async fn update_report(&self, report: &ErrorReport) -> StoreResult<()> {
        let updated = sqlx::query("UPDATE error_reports SET data = $2 WHERE id = $1")
            .bind(report.id)
            .bind(encode(report)?)
            .execute(&self.pool)
            .await?
            .rows_affected();
        if updated == 0 {
            return Err(StoreError::NotFound(format!("report {}", report.id)));
        }
        Ok(())
    }

    async fn list_reports(&self, limit: usize) -> StoreResult<Vec<ErrorReport>> {
        let rows = sqlx::query(
            "SELECT data FROM error_reports ORDER BY created_at DESC LIMIT $1",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(decode).collect()
    }

    async fn append_event(&self, event: &IntegrationEvent) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO integration_events (id, run_id, at, data) VALUES ($1, $2, $3, $4)",
        )
        .bind(event.id)
        .bind(event.run_id)
        .bind(event.at)
        .bind(encode(event)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn events_for_run(&self, run_id: Uuid) -> StoreResult<Vec<IntegrationEvent>> {
        let rows = sqlx::query(
            "SELECT data FROM integration_events WHERE run_id = $1 ORDER BY at",
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(decode).collect()
    }

    async fn get_queue_switch(&self) -> StoreResult<Option<QueueSwitch>> {
        let row = sqlx::query("SELECT data FROM queue_switch WHERE singleton = 1")
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(decode).transpose()
    }

    async fn put_queue_switch(&self, switch: &QueueSwitch) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO queue_switch (singleton, data) VALUES (1, $1)
             ON CONFLICT (singleton) DO UPDATE SET data = EXCLUDED.data",
        )
        .bind(encode(switch)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
