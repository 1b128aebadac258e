//! Vault state machine: `uninitialized → locked ⇄ unlocked`, with a
//! destructive `reset` back to `uninitialized`.
//!
//! The derived encryption key is a process-wide singleton held behind a
//! read-write lock; it exists only in RAM while the vault is unlocked and is
//! zeroed on `lock()`.

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use manifold_core::model::secret::{IntegrationType, MasterKeyRecord, SecretRecord};
use manifold_store::StorageGateway;

use crate::envelope::{self, Envelope};
use crate::error::VaultError;
use crate::key;
use crate::schema::validate_payload;

/// Failed unlock attempts tolerated before lockout backoff starts.
const LOCKOUT_THRESHOLD: u32 = 5;
/// First lockout window; doubles per further failure, capped at an hour.
const LOCKOUT_BASE_SECS: i64 = 30;
const LOCKOUT_CAP_SECS: i64 = 3600;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VaultStatus {
    Uninitialized,
    Locked,
    Unlocked,
}

/// The process's typed secrets store.
pub struct Vault {
    store: Arc<dyn StorageGateway>,
    /// `Some(key)` while unlocked.
    slot: RwLock<Option<[u8; 32]>>,
}

impl Vault {
    pub fn new(store: Arc<dyn StorageGateway>) -> Self {
        Self {
            store,
            slot: RwLock::new(None),
        }
    }

    pub async fn status(&self) -> Result<VaultStatus, VaultError> {
        if self.slot.read().await.is_some() {
            return Ok(VaultStatus::Unlocked);
        }
        match self.store.get_master_key().await? {
            Some(_) => Ok(VaultStatus::Locked),
            None => Ok(VaultStatus::Uninitialized),
        }
    }

    /// `uninitialized → locked`. Returns the out-of-band recovery code.
    pub async fn initialize(&self, seed: &str) -> Result<String, VaultError> {
        if seed.len() < key::MIN_SEED_LEN {
            return Err(VaultError::InvalidSeed(format!(
                "seed must be at least {} characters",
                key::MIN_SEED_LEN
            )));
        }
        if self.store.get_master_key().await?.is_some() {
            return Err(VaultError::AlreadyInitialized);
        }

        let salt = key::generate_salt();
        let seed_owned = seed.to_string();
        let salt_owned = salt.clone();
        let seed_hash = tokio::task::spawn_blocking(move || key::hash_seed(&seed_owned, &salt_owned))
            .await
            .map_err(|e| VaultError::Crypto(e.to_string()))??;

        self.store
            .put_master_key(&MasterKeyRecord {
                seed_hash,
                salt,
                failed_attempts: 0,
                locked_until: None,
                created_at: Utc::now(),
            })
            .await?;
        info!("vault initialized");
        Ok(key::recovery_code())
    }

    /// `locked → unlocked`. Wrong seeds advance the attempt counter and,
    /// beyond the threshold, arm a lockout window with exponential backoff.
    pub async fn unlock(&self, seed: &str) -> Result<(), VaultError> {
        let mut record = self
            .store
            .get_master_key()
            .await?
            .ok_or(VaultError::NotInitialized)?;

        let now = Utc::now();
        if let Some(until) = record.locked_until {
            if until > now {
                return Err(VaultError::LockedOut { until });
            }
        }

        let seed_owned = seed.to_string();
        let hash = record.seed_hash.clone();
        let verified =
            tokio::task::spawn_blocking(move || key::verify_seed(&seed_owned, &hash))
                .await
                .map_err(|e| VaultError::Crypto(e.to_string()))??;

        if !verified {
            record.failed_attempts += 1;
            if record.failed_attempts >= LOCKOUT_THRESHOLD {
                let exponent = record.failed_attempts - LOCKOUT_THRESHOLD;
                let secs = (LOCKOUT_BASE_SECS << exponent.min(7)).min(LOCKOUT_CAP_SECS);
                record.locked_until = Some(now + Duration::seconds(secs));
                warn!(
                    attempts = record.failed_attempts,
                    backoff_secs = secs,
                    "vault unlock failed, lockout armed"
                );
            }
            self.store.put_master_key(&record).await?;
            return Err(VaultError::BadSeed);
        }

        let seed_owned = seed.to_string();
        let salt = record.salt.clone();
        let derived =
            tokio::task::spawn_blocking(move || key::derive_key(&seed_owned, &salt))
                .await
                .map_err(|e| VaultError::Crypto(e.to_string()))??;

        record.failed_attempts = 0;
        record.locked_until = None;
        self.store.put_master_key(&record).await?;

        *self.slot.write().await = Some(derived);
        info!("vault unlocked");
        Ok(())
    }

    /// `unlocked → locked`. Zeroes the in-RAM key.
    pub async fn lock(&self) {
        let mut slot = self.slot.write().await;
        if let Some(key) = slot.as_mut() {
            key.fill(0);
        }
        *slot = None;
        info!("vault locked");
    }

    /// Any state → `uninitialized`. Destroys every stored secret.
    pub async fn reset(&self) -> Result<(), VaultError> {
        self.lock().await;
        self.store.wipe_secrets().await?;
        self.store.clear_master_key().await?;
        warn!("vault reset: all secrets erased");
        Ok(())
    }

    async fn current_key(&self) -> Result<[u8; 32], VaultError> {
        (*self.slot.read().await).ok_or(VaultError::Locked)
    }

    /// Encrypt and store a typed payload. Passing an existing `id` rewrites
    /// the secret in place, preserving `created_at` and advancing
    /// `last_rotated_at`.
    pub async fn write_secret(
        &self,
        id: Option<Uuid>,
        integration_type: IntegrationType,
        label: &str,
        payload: &Value,
        metadata: Value,
    ) -> Result<SecretRecord, VaultError> {
        validate_payload(integration_type, payload)?;
        let vault_key = self.current_key().await?;

        let plaintext =
            serde_json::to_vec(payload).map_err(|e| VaultError::Crypto(e.to_string()))?;
        let envelope = envelope::seal(&vault_key, &plaintext)?;

        let now = Utc::now();
        let existing = match id {
            Some(id) => self.store.get_secret(id).await?,
            None => None,
        };
        let record = SecretRecord {
            id: id.unwrap_or_else(Uuid::new_v4),
            integration_type,
            label: label.to_string(),
            encrypted_payload: envelope.ciphertext,
            iv: envelope.iv,
            auth_tag: envelope.auth_tag,
            metadata,
            enabled: existing.as_ref().map(|e| e.enabled).unwrap_or(true),
            created_at: existing.map(|e| e.created_at).unwrap_or(now),
            last_rotated_at: now,
        };
        self.store.put_secret(&record).await?;
        Ok(record)
    }

    /// Decrypt a stored secret. The plaintext is returned to the caller and
    /// never persisted.
    pub async fn read_secret(&self, id: Uuid) -> Result<Value, VaultError> {
        let vault_key = self.current_key().await?;
        let record = self
            .store
            .get_secret(id)
            .await?
            .ok_or_else(|| VaultError::Storage(format!("secret {id} not found")))?;
        let plaintext = envelope::open(
            &vault_key,
            &Envelope {
                ciphertext: record.encrypted_payload,
                iv: record.iv,
                auth_tag: record.auth_tag,
            },
        )?;
        serde_json::from_slice(&plaintext).map_err(|e| VaultError::Crypto(e.to_string()))
    }

    pub async fn list_secrets(&self) -> Result<Vec<SecretRecord>, VaultError> {
        Ok(self.store.list_secrets().await?)
    }

    pub async fn delete_secret(&self, id: Uuid) -> Result<bool, VaultError> {
        Ok(self.store.delete_secret(id).await?)
    }

    /// Envelope a short string (token material) into a single storable
    /// field, `iv.ciphertext.tag`.
    pub async fn seal_string(&self, plaintext: &str) -> Result<String, VaultError> {
        let vault_key = self.current_key().await?;
        let env = envelope::seal(&vault_key, plaintext.as_bytes())?;
        Ok(format!("{}.{}.{}", env.iv, env.ciphertext, env.auth_tag))
    }

    /// Inverse of [`Self::seal_string`].
    pub async fn open_string(&self, sealed: &str) -> Result<String, VaultError> {
        let vault_key = self.current_key().await?;
        let mut parts = sealed.splitn(3, '.');
        let (iv, ciphertext, auth_tag) = match (parts.next(), parts.next(), parts.next()) {
            (Some(iv), Some(ct), Some(tag)) => (iv, ct, tag),
            _ => return Err(VaultError::Crypto("malformed sealed string".into())),
        };
        let plaintext = envelope::open(
            &vault_key,
            &Envelope {
                ciphertext: ciphertext.to_string(),
                iv: iv.to_string(),
                auth_tag: auth_tag.to_string(),
            },
        )?;
        String::from_utf8(plaintext).map_err(|e| VaultError::Crypto(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine;
    use manifold_store::MemoryStore;
    use serde_json::json;

    const SEED: &str = "orange-crane-battery-42";

    async fn unlocked_vault() -> (Vault, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let vault = Vault::new(store.clone());
        vault.initialize(SEED).await.unwrap();
        vault.unlock(SEED).await.unwrap();
        (vault, store)
    }

    #[tokio::test]
    async fn lifecycle_uninitialized_to_unlocked() {
        let store = Arc::new(MemoryStore::new());
        let vault = Vault::new(store);
        assert_eq!(vault.status().await.unwrap(), VaultStatus::Uninitialized);

        let code = vault.initialize(SEED).await.unwrap();
        assert!(!code.is_empty());
        assert_eq!(vault.status().await.unwrap(), VaultStatus::Locked);

        vault.unlock(SEED).await.unwrap();
        assert_eq!(vault.status().await.unwrap(), VaultStatus::Unlocked);

        vault.lock().await;
        assert_eq!(vault.status().await.unwrap(), VaultStatus::Locked);
    }

    #[tokio::test]
    async fn rejects_short_seed_and_double_init() {
        let store = Arc::new(MemoryStore::new());
        let vault = Vault::new(store);
        assert!(matches!(
            vault.initialize("short").await,
            Err(VaultError::InvalidSeed(_))
        ));
        vault.initialize(SEED).await.unwrap();
        assert!(matches!(
            vault.initialize(SEED).await,
            Err(VaultError::AlreadyInitialized)
        ));
    }

    #[tokio::test]
    async fn wrong_seed_increments_attempt_counter() {
        let store = Arc::new(MemoryStore::new());
        let vault = Vault::new(store.clone());
        vault.initialize(SEED).await.unwrap();

        assert!(matches!(
            vault.unlock("not-the-right-seed").await,
            Err(VaultError::BadSeed)
        ));
        let record = store.get_master_key().await.unwrap().unwrap();
        assert_eq!(record.failed_attempts, 1);

        // A successful unlock resets the counter.
        vault.unlock(SEED).await.unwrap();
        let record = store.get_master_key().await.unwrap().unwrap();
        assert_eq!(record.failed_attempts, 0);
    }

    #[tokio::test]
    async fn secret_round_trip() {
        let (vault, _) = unlocked_vault().await;
        let payload = json!({"api_key": "k-123"});
        let record = vault
            .write_secret(
                None,
                IntegrationType::ApiKey,
                "orders-api",
                &payload,
                json!({"service": "orders"}),
            )
            .await
            .unwrap();
        let read = vault.read_secret(record.id).await.unwrap();
        assert_eq!(read, payload);
    }

    #[tokio::test]
    async fn tampered_ciphertext_fails_decrypt() {
        let (vault, store) = unlocked_vault().await;
        let record = vault
            .write_secret(
                None,
                IntegrationType::ApiKey,
                "s",
                &json!({"api_key": "p"}),
                json!({}),
            )
            .await
            .unwrap();

        let mut stored = store.get_secret(record.id).await.unwrap().unwrap();
        let mut raw = BASE64.decode(&stored.encrypted_payload).unwrap();
        raw[0] ^= 0x01;
        stored.encrypted_payload = BASE64.encode(raw);
        store.put_secret(&stored).await.unwrap();

        assert!(matches!(
            vault.read_secret(record.id).await,
            Err(VaultError::Crypto(_))
        ));
    }

    #[tokio::test]
    async fn read_requires_unlocked() {
        let (vault, _) = unlocked_vault().await;
        let record = vault
            .write_secret(
                None,
                IntegrationType::ApiKey,
                "s",
                &json!({"api_key": "p"}),
                json!({}),
            )
            .await
            .unwrap();
        vault.lock().await;
        assert!(matches!(
            vault.read_secret(record.id).await,
            Err(VaultError::Locked)
        ));
    }

    #[tokio::test]
    async fn rewrite_advances_rotation_timestamp() {
        let (vault, _) = unlocked_vault().await;
        let first = vault
            .write_secret(
                None,
                IntegrationType::ApiKey,
                "s",
                &json!({"api_key": "one"}),
                json!({}),
            )
            .await
            .unwrap();
        let second = vault
            .write_secret(
                Some(first.id),
                IntegrationType::ApiKey,
                "s",
                &json!({"api_key": "two"}),
                json!({}),
            )
            .await
            .unwrap();
        assert_eq!(first.created_at, second.created_at);
        assert!(second.last_rotated_at >= first.last_rotated_at);
        assert_eq!(
            vault.read_secret(first.id).await.unwrap(),
            json!({"api_key": "two"})
        );
    }

    #[tokio::test]
    async fn reset_destroys_everything() {
        let (vault, store) = unlocked_vault().await;
        vault
            .write_secret(
                None,
                IntegrationType::ApiKey,
                "s",
                &json!({"api_key": "p"}),
                json!({}),
            )
            .await
            .unwrap();
        vault.reset().await.unwrap();
        assert_eq!(vault.status().await.unwrap(), VaultStatus::Uninitialized);
        assert!(store.list_secrets().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn seal_string_round_trip() {
        let (vault, _) = unlocked_vault().await;
        let sealed = vault.seal_string("access-token-xyz").await.unwrap();
        assert_ne!(sealed, "access-token-xyz");
        assert_eq!(vault.open_string(&sealed).await.unwrap(), "access-token-xyz");
    }
}
