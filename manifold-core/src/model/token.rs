use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenType {
    Access,
    Refresh,
    Session,
}

/// Cache key for a credential: one entry per (adapter, type, scope).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TokenCacheKey {
    pub adapter_id: Uuid,
    pub token_type: TokenType,
    /// Empty string when the grant is unscoped.
    pub scope: String,
}

/// One cached credential with optimistic-locking metadata.
///
/// All mutations go through compare-and-swap on `version`; at most one
/// refresh is in flight per key. A refresh whose heartbeat
/// (`refresh_started_at`) is older than the staleness threshold is considered
/// stuck and may be reclaimed by another caller.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TokenCacheEntry {
    pub key: TokenCacheKey,
    /// Vault-encrypted access token (or session id for cookie adapters).
    #[serde(default)]
    pub access_token: Option<String>,
    /// Vault-encrypted refresh token, when the grant rotates one.
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub last_used_at: Option<DateTime<Utc>>,
    /// Monotonically increasing CAS counter.
    pub version: i64,
    pub refresh_in_flight: bool,
    #[serde(default)]
    pub refresh_started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_refresh_error: Option<String>,
}

impl TokenCacheEntry {
    pub fn new(key: TokenCacheKey) -> Self {
        let now = Utc::now();
        Self {
            key,
            access_token: None,
            refresh_token: None,
            issued_at: now,
            // A fresh entry is born expired so the first lookup refreshes it.
            expires_at: now,
            last_used_at: None,
            version: 0,
            refresh_in_flight: false,
            refresh_started_at: None,
            last_refresh_error: None,
        }
    }

    /// Whether the entry still has at least `skew` of validity left.
    pub fn is_fresh(&self, now: DateTime<Utc>, skew: chrono::Duration) -> bool {
        self.access_token.is_some() && self.expires_at - now > skew
    }

    /// Whether an in-flight refresh has outlived the heartbeat threshold.
    pub fn refresh_is_stuck(&self, now: DateTime<Utc>, threshold: chrono::Duration) -> bool {
        self.refresh_in_flight
            && self
                .refresh_started_at
                .map(|started| now - started > threshold)
                .unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn key() -> TokenCacheKey {
        TokenCacheKey {
            adapter_id: Uuid::new_v4(),
            token_type: TokenType::Access,
            scope: String::new(),
        }
    }

    #[test]
    fn fresh_entry_requires_token_and_margin() {
        let now = Utc::now();
        let mut entry = TokenCacheEntry::new(key());
        assert!(!entry.is_fresh(now, Duration::seconds(300)));

        entry.access_token = Some("enc".into());
        entry.expires_at = now + Duration::seconds(600);
        assert!(entry.is_fresh(now, Duration::seconds(300)));
        // Inside the skew window the entry counts as expired.
        assert!(!entry.is_fresh(now, Duration::seconds(900)));
    }

    #[test]
    fn stuck_refresh_detection() {
        let now = Utc::now();
        let mut entry = TokenCacheEntry::new(key());
        entry.refresh_in_flight = true;
        entry.refresh_started_at = Some(now - Duration::seconds(120));
        assert!(entry.refresh_is_stuck(now, Duration::seconds(60)));

        entry.refresh_started_at = Some(now - Duration::seconds(10));
        assert!(!entry.refresh_is_stuck(now, Duration::seconds(60)));

        // Missing heartbeat counts as stuck.
        entry.refresh_started_at = None;
        assert!(entry.refresh_is_stuck(now, Duration::seconds(60)));
    }
}
