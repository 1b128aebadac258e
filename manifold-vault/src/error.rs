use chrono::{DateTime, Utc};

use manifold_core::{EngineError, ErrorKind};

#[derive(Debug)]
pub enum VaultError {
    /// No master key has been initialized yet.
    NotInitialized,
    /// `initializeVault` called while a master key already exists.
    AlreadyInitialized,
    /// Operation requires the vault to be unlocked.
    Locked,
    /// The supplied master seed failed verification.
    BadSeed,
    /// Too many failed unlock attempts.
    LockedOut { until: DateTime<Utc> },
    /// Seed too short or otherwise unusable.
    InvalidSeed(String),
    /// A typed payload did not match its integration schema.
    SchemaViolation(String),
    /// AES-GCM failure: tampered ciphertext, IV, or tag.
    Crypto(String),
    Storage(String),
}

impl std::fmt::Display for VaultError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VaultError::NotInitialized => write!(f, "vault is not initialized"),
            VaultError::AlreadyInitialized => write!(f, "vault is already initialized"),
            VaultError::Locked => write!(f, "vault is locked"),
            VaultError::BadSeed => write!(f, "master seed verification failed"),
            VaultError::LockedOut { until } => {
                write!(f, "vault is locked out until {until}")
            }
            VaultError::InvalidSeed(msg) => write!(f, "invalid master seed: {msg}"),
            VaultError::SchemaViolation(msg) => write!(f, "secret payload invalid: {msg}"),
            VaultError::Crypto(msg) => write!(f, "crypto failure: {msg}"),
            VaultError::Storage(msg) => write!(f, "vault storage failure: {msg}"),
        }
    }
}

impl std::error::Error for VaultError {}

impl From<manifold_store::StoreError> for VaultError {
    fn from(err: manifold_store::StoreError) -> Self {
        VaultError::Storage(err.to_string())
    }
}

impl From<VaultError> for EngineError {
    fn from(err: VaultError) -> Self {
        let kind = match &err {
            VaultError::SchemaViolation(_) | VaultError::InvalidSeed(_) => ErrorKind::Validation,
            VaultError::NotInitialized
            | VaultError::AlreadyInitialized
            | VaultError::Locked
            | VaultError::BadSeed
            | VaultError::LockedOut { .. } => ErrorKind::Auth,
            // Tampering and backend failures are engine-level faults.
            VaultError::Crypto(_) | VaultError::Storage(_) => ErrorKind::System,
        };
        EngineError::new(kind, err.to_string())
    }
}
