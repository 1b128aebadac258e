use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// The closed set of credential shapes the vault validates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrationType {
    Smtp,
    Oauth2,
    Jwt,
    Cookie,
    Sftp,
    Ftp,
    Database,
    ApiKey,
    Rabbitmq,
    Kafka,
    AzureBlob,
    Custom,
}

impl IntegrationType {
    /// Fields that must be present in a typed payload of this kind.
    ///
    /// `Custom` accepts any non-empty object.
    pub fn required_fields(self) -> &'static [&'static str] {
        match self {
            IntegrationType::Smtp => &["host", "port", "username", "password"],
            IntegrationType::Oauth2 => &["client_id", "client_secret", "token_url"],
            IntegrationType::Jwt => &["algorithm", "secret"],
            IntegrationType::Cookie => &["login_url", "username", "password"],
            IntegrationType::Sftp | IntegrationType::Ftp => &["host", "username", "password"],
            IntegrationType::Database => &["connection_string"],
            IntegrationType::ApiKey => &["api_key"],
            IntegrationType::Rabbitmq => &["uri"],
            IntegrationType::Kafka => &["brokers"],
            IntegrationType::AzureBlob => &["account", "container", "sas_token"],
            IntegrationType::Custom => &[],
        }
    }
}

/// A vault-encrypted secret at rest.
///
/// The raw payload is never stored: only the AES-256-GCM triple plus
/// non-sensitive metadata usable for listing and display.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SecretRecord {
    pub id: Uuid,
    pub integration_type: IntegrationType,
    pub label: String,
    /// Base64 ciphertext.
    pub encrypted_payload: String,
    /// Base64, 16 bytes.
    pub iv: String,
    /// Base64, 16 bytes.
    pub auth_tag: String,
    /// Non-sensitive display metadata (host, username, service name).
    #[serde(default)]
    pub metadata: Value,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    /// Advances on every rewrite of the payload.
    pub last_rotated_at: DateTime<Utc>,
}

/// Vault master-key verification record. One per vault.
///
/// Holds only the Argon2id PHC hash of the master seed; the derived 32-byte
/// encryption key exists in RAM while the vault is unlocked and is never
/// persisted.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MasterKeyRecord {
    /// PHC string: algorithm, parameters, salt, and hash.
    pub seed_hash: String,
    /// Base64 salt reused for raw key derivation.
    pub salt: String,
    pub failed_attempts: u32,
    #[serde(default)]
    pub locked_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}
