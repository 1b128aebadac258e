//! # manifold-vault — the engine's typed secrets store
//!
//! Credentials used by connectors are encrypted at rest under a key derived
//! from the operator's master seed:
//!
//! - **Master key**: Argon2id (64 MiB, 3 iterations, parallelism 4). A PHC
//!   hash is stored for verification; the raw 32-byte derivation is the
//!   AES-256 key and lives only in RAM while the vault is unlocked.
//! - **Envelopes**: AES-256-GCM with a fresh 16-byte IV per write; stored as
//!   a (ciphertext, iv, authTag) triple. Tampering with any field fails
//!   decryption.
//! - **Typed payloads**: each integration type declares required fields;
//!   writes are validated before encryption.
//!
//! State machine: `uninitialized → locked ⇄ unlocked`, plus a destructive
//! `reset` that erases all secrets.

pub mod envelope;
pub mod error;
pub mod key;
pub mod schema;
pub mod vault;

pub use error::VaultError;
pub use vault::{Vault, VaultStatus};
