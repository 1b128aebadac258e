//! Token cache with guarded refresh.
//!
//! One entry per (adapter, token type, scope). Every mutation is a
//! compare-and-swap on the entry's version counter:
//!
//! 1. A caller finding a stale entry claims the refresh by CAS-ing
//!    `refresh_in_flight = true` with a heartbeat; the claim bumps the
//!    version, so exactly one concurrent claimer wins.
//! 2. Losers poll with backoff while the winner's heartbeat is recent,
//!    then read the refreshed value.
//! 3. A heartbeat older than the staleness threshold marks the refresh as
//!    stuck; the next caller reclaims it.
//!
//! The completed refresh writes tokens (vault-sealed) without a further
//! version bump, so one refresh advances the version by exactly one.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use manifold_core::model::adapter::{AdapterGrant, AuthAdapter};
use manifold_core::model::token::{TokenCacheEntry, TokenCacheKey, TokenType};
use manifold_store::StorageGateway;
use manifold_vault::Vault;

use crate::error::AuthError;
use crate::{jwt, oauth};

const DEFAULT_TOKEN_TTL_SECS: u64 = 3600;
const WAITER_INITIAL_BACKOFF: Duration = Duration::from_millis(100);
const WAITER_MAX_BACKOFF: Duration = Duration::from_secs(1);

/// Tunables mirroring the engine config.
#[derive(Clone, Copy, Debug)]
pub struct TokenServiceConfig {
    pub refresh_skew: Duration,
    pub stuck_threshold: Duration,
    /// Upper bound a waiter spends polling for another holder's refresh.
    pub waiter_deadline: Duration,
}

impl Default for TokenServiceConfig {
    fn default() -> Self {
        Self {
            refresh_skew: Duration::from_secs(300),
            stuck_threshold: Duration::from_secs(60),
            waiter_deadline: Duration::from_secs(15),
        }
    }
}

/// Returns valid access credentials for adapters without thundering-herd
/// refresh.
pub struct TokenService {
    store: Arc<dyn StorageGateway>,
    vault: Arc<Vault>,
    http: reqwest::Client,
    config: TokenServiceConfig,
}

struct AcquiredToken {
    access_token: String,
    refresh_token: Option<String>,
    expires_in_secs: u64,
}

impl TokenService {
    pub fn new(
        store: Arc<dyn StorageGateway>,
        vault: Arc<Vault>,
        config: TokenServiceConfig,
    ) -> Self {
        Self {
            store,
            vault,
            http: reqwest::Client::new(),
            config,
        }
    }

    /// Return a valid credential for the adapter, refreshing if needed.
    pub async fn access_credential(&self, adapter: &AuthAdapter) -> Result<String, AuthError> {
        if !adapter.enabled {
            return Err(AuthError::AdapterConfig(format!(
                "adapter '{}' is disabled",
                adapter.name
            )));
        }
        // API keys are static vault material; no cache entry needed.
        if adapter.grant == AdapterGrant::ApiKey {
            let payload = self.vault.read_secret(adapter.secret_id).await?;
            return payload
                .get("api_key")
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| AuthError::AdapterConfig("secret missing 'api_key'".into()));
        }

        let key = TokenCacheKey {
            adapter_id: adapter.id,
            token_type: match adapter.grant {
                AdapterGrant::CookieSession => TokenType::Session,
                _ => TokenType::Access,
            },
            scope: adapter.scope.clone().unwrap_or_default(),
        };

        let skew = chrono::Duration::from_std(self.config.refresh_skew)
            .unwrap_or_else(|_| chrono::Duration::seconds(300));
        let stuck = chrono::Duration::from_std(self.config.stuck_threshold)
            .unwrap_or_else(|_| chrono::Duration::seconds(60));

        let deadline = Instant::now() + self.config.waiter_deadline;
        let mut backoff = WAITER_INITIAL_BACKOFF;

        loop {
            let entry = match self.store.get_token(&key).await? {
                Some(entry) => entry,
                None => {
                    // First sight of this key: seed an expired entry and
                    // loop into the refresh path.
                    let fresh = TokenCacheEntry::new(key.clone());
                    self.store.insert_token(&fresh).await?;
                    continue;
                }
            };

            let now = Utc::now();
            if entry.is_fresh(now, skew) {
                if let Some(sealed) = &entry.access_token {
                    return Ok(self.vault.open_string(sealed).await?);
                }
            }

            if entry.refresh_in_flight && !entry.refresh_is_stuck(now, stuck) {
                // Another holder is refreshing; wait for it.
                if Instant::now() + backoff > deadline {
                    return Err(AuthError::RefreshWaitTimeout);
                }
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(WAITER_MAX_BACKOFF);
                continue;
            }

            // Claim the refresh. The claim bumps the version, so exactly one
            // concurrent claimer succeeds.
            let mut claimed = entry.clone();
            claimed.refresh_in_flight = true;
            claimed.refresh_started_at = Some(now);
            claimed.version = entry.version + 1;
            if !self.store.cas_token(&claimed, entry.version).await? {
                debug!(adapter = %adapter.name, "lost refresh claim race");
                continue;
            }

            return self.run_refresh(adapter, claimed).await;
        }
    }

    /// Perform the refresh this caller owns and publish the result.
    async fn run_refresh(
        &self,
        adapter: &AuthAdapter,
        claimed: TokenCacheEntry,
    ) -> Result<String, AuthError> {
        match self.acquire(adapter, &claimed).await {
            Ok(acquired) => {
                let now = Utc::now();
                let mut done = claimed.clone();
                done.access_token = Some(self.vault.seal_string(&acquired.access_token).await?);
                done.refresh_token = match &acquired.refresh_token {
                    Some(rt) => Some(self.vault.seal_string(rt).await?),
                    None => claimed.refresh_token.clone(),
                };
                done.issued_at = now;
                done.expires_at = now + chrono::Duration::seconds(acquired.expires_in_secs as i64);
                done.last_used_at = Some(now);
                done.refresh_in_flight = false;
                done.refresh_started_at = None;
                done.last_refresh_error = None;
                // Same version as the claim: one refresh, one bump.
                if !self.store.cas_token(&done, claimed.version).await? {
                    return Err(AuthError::Storage(manifold_store::StoreError::Conflict(
                        "token entry changed under an owned refresh".into(),
                    )));
                }
                info!(adapter = %adapter.name, "token refreshed");
                Ok(acquired.access_token)
            }
            Err(err) => {
                let mut released = claimed.clone();
                released.refresh_in_flight = false;
                released.refresh_started_at = None;
                released.last_refresh_error = Some(err.to_string());
                if let Err(store_err) = self.store.cas_token(&released, claimed.version).await {
                    error!(error = %store_err, "failed to release refresh claim");
                }
                warn!(adapter = %adapter.name, error = %err, "token refresh failed");
                Err(err)
            }
        }
    }

    /// Acquire a fresh credential per the adapter's grant type.
    async fn acquire(
        &self,
        adapter: &AuthAdapter,
        entry: &TokenCacheEntry,
    ) -> Result<AcquiredToken, AuthError> {
        let secret = self.vault.read_secret(adapter.secret_id).await?;
        match adapter.grant {
            AdapterGrant::Oauth2ClientCredentials => {
                let (client_id, client_secret) = client_credentials_from(&secret)?;
                let token_url = token_url_of(adapter, &secret)?;
                let response = oauth::client_credentials(
                    &self.http,
                    &token_url,
                    client_id,
                    client_secret,
                    adapter.scope.as_deref(),
                )
                .await?;
                Ok(AcquiredToken {
                    access_token: response.access_token,
                    refresh_token: response.refresh_token,
                    expires_in_secs: response.expires_in.unwrap_or(DEFAULT_TOKEN_TTL_SECS),
                })
            }
            AdapterGrant::Oauth2RefreshToken => {
                let (client_id, client_secret) = client_credentials_from(&secret)?;
                let token_url = token_url_of(adapter, &secret)?;
                // Prefer the rotated refresh token over the seeded one.
                let refresh_token = match &entry.refresh_token {
                    Some(sealed) => self.vault.open_string(sealed).await?,
                    None => secret
                        .get("refresh_token")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .ok_or_else(|| {
                            AuthError::AdapterConfig("secret missing 'refresh_token'".into())
                        })?,
                };
                let response = oauth::refresh_token_grant(
                    &self.http,
                    &token_url,
                    client_id,
                    client_secret,
                    &refresh_token,
                )
                .await?;
                Ok(AcquiredToken {
                    access_token: response.access_token,
                    refresh_token: response.refresh_token,
                    expires_in_secs: response.expires_in.unwrap_or(DEFAULT_TOKEN_TTL_SECS),
                })
            }
            AdapterGrant::Jwt => {
                let settings = adapter.jwt.as_ref().ok_or_else(|| {
                    AuthError::AdapterConfig("jwt adapter without jwt settings".into())
                })?;
                let token = jwt::mint(settings, &secret, &adapter.name)?;
                Ok(AcquiredToken {
                    access_token: token,
                    refresh_token: None,
                    expires_in_secs: settings.expires_in_secs,
                })
            }
            AdapterGrant::CookieSession => {
                let login_url = secret
                    .get("login_url")
                    .and_then(Value::as_str)
                    .ok_or_else(|| AuthError::AdapterConfig("secret missing 'login_url'".into()))?;
                let username = secret
                    .get("username")
                    .and_then(Value::as_str)
                    .ok_or_else(|| AuthError::AdapterConfig("secret missing 'username'".into()))?;
                let password = secret
                    .get("password")
                    .and_then(Value::as_str)
                    .ok_or_else(|| AuthError::AdapterConfig("secret missing 'password'".into()))?;
                let ttl = secret
                    .get("session_ttl_secs")
                    .and_then(Value::as_u64)
                    .unwrap_or(DEFAULT_TOKEN_TTL_SECS);
                let login =
                    oauth::cookie_login(&self.http, login_url, username, password, ttl).await?;
                Ok(AcquiredToken {
                    access_token: login.session,
                    refresh_token: None,
                    expires_in_secs: login.ttl_secs,
                })
            }
            AdapterGrant::ApiKey => {
                // Handled before the cache path.
                Err(AuthError::AdapterConfig(
                    "api key adapters are not cached".into(),
                ))
            }
        }
    }

    /// One sweep of the proactive-refresh job: refresh every entry already
    /// inside its skew window.
    pub async fn proactive_refresh_sweep(&self) -> Result<usize, AuthError> {
        let cutoff = Utc::now()
            + chrono::Duration::from_std(self.config.refresh_skew)
                .unwrap_or_else(|_| chrono::Duration::seconds(300));
        let expiring = self.store.tokens_expiring_before(cutoff).await?;
        let mut refreshed = 0;
        for entry in expiring {
            let Some(adapter) = self.store.get_adapter(entry.key.adapter_id).await? else {
                continue;
            };
            if !adapter.enabled {
                continue;
            }
            match self.access_credential(&adapter).await {
                Ok(_) => refreshed += 1,
                Err(err) => {
                    warn!(adapter = %adapter.name, error = %err, "proactive refresh failed")
                }
            }
        }
        Ok(refreshed)
    }

    /// Background loop driving [`Self::proactive_refresh_sweep`].
    pub fn spawn_sweeper(
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
                        if let Err(err) = self.proactive_refresh_sweep().await {
                            error!(error = %err, "token sweep failed");
                        }
                    }
                }
            }
        })
    }

    /// Current cached entry, for diagnostics and tests.
    pub async fn entry(
        &self,
        adapter_id: Uuid,
        token_type: TokenType,
        scope: &str,
    ) -> Result<Option<TokenCacheEntry>, AuthError> {
        Ok(self
            .store
            .get_token(&TokenCacheKey {
                adapter_id,
                token_type,
                scope: scope.to_string(),
            })
            .await?)
    }
}

fn client_credentials_from(secret: &Value) -> Result<(&str, &str), AuthError> {
    let client_id = secret
        .get("client_id")
        .and_then(Value::as_str)
        .ok_or_else(|| AuthError::AdapterConfig("secret missing 'client_id'".into()))?;
    let client_secret = secret
        .get("client_secret")
        .and_then(Value::as_str)
        .ok_or_else(|| AuthError::AdapterConfig("secret missing 'client_secret'".into()))?;
    Ok((client_id, client_secret))
}

fn token_url_of(adapter: &AuthAdapter, secret: &Value) -> Result<String, AuthError> {
    adapter
        .token_url
        .clone()
        .or_else(|| {
            secret
                .get("token_url")
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .ok_or_else(|| AuthError::AdapterConfig("adapter has no token_url".into()))
}
