//! Master-key derivation and verification.
//!
//! Two uses of the same Argon2id instance: a PHC-string hash stored for seed
//! verification, and a raw 32-byte derivation that becomes the in-RAM
//! AES-256 key. The raw key is never persisted.

use argon2::password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::RngCore;

use crate::error::VaultError;

/// Argon2id memory cost in KiB (64 MiB).
const MEMORY_KIB: u32 = 64 * 1024;
const ITERATIONS: u32 = 3;
const PARALLELISM: u32 = 4;
const KEY_LEN: usize = 32;
const SALT_LEN: usize = 32;

/// Minimum master seed length accepted by `initializeVault`.
pub const MIN_SEED_LEN: usize = 12;

fn argon2() -> Result<Argon2<'static>, VaultError> {
    let params = Params::new(MEMORY_KIB, ITERATIONS, PARALLELISM, Some(KEY_LEN))
        .map_err(|e| VaultError::Crypto(format!("argon2 params: {e}")))?;
    Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
}

/// Generate a fresh 32-byte salt, base64-encoded for storage.
pub fn generate_salt() -> String {
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    BASE64.encode(salt)
}

/// Hash the master seed into a PHC string for verification at unlock time.
pub fn hash_seed(seed: &str, salt_b64: &str) -> Result<String, VaultError> {
    let salt_bytes = BASE64
        .decode(salt_b64)
        .map_err(|e| VaultError::Crypto(format!("bad salt: {e}")))?;
    let salt = SaltString::encode_b64(&salt_bytes)
        .map_err(|e| VaultError::Crypto(format!("bad salt: {e}")))?;
    let phc = argon2()?
        .hash_password(seed.as_bytes(), &salt)
        .map_err(|e| VaultError::Crypto(format!("argon2 hash: {e}")))?;
    Ok(phc.to_string())
}

/// Verify a seed against the stored PHC string.
pub fn verify_seed(seed: &str, phc: &str) -> Result<bool, VaultError> {
    let parsed =
        PasswordHash::new(phc).map_err(|e| VaultError::Crypto(format!("bad stored hash: {e}")))?;
    Ok(argon2()?
        .verify_password(seed.as_bytes(), &parsed)
        .is_ok())
}

/// Derive the raw 32-byte encryption key from the seed and the stored salt.
pub fn derive_key(seed: &str, salt_b64: &str) -> Result<[u8; KEY_LEN], VaultError> {
    let salt = BASE64
        .decode(salt_b64)
        .map_err(|e| VaultError::Crypto(format!("bad salt: {e}")))?;
    let mut key = [0u8; KEY_LEN];
    argon2()?
        .hash_password_into(seed.as_bytes(), &salt, &mut key)
        .map_err(|e| VaultError::Crypto(format!("argon2 derive: {e}")))?;
    Ok(key)
}

/// Out-of-band recovery code returned once on initialization.
pub fn recovery_code() -> String {
    let mut raw = [0u8; 16];
    OsRng.fill_bytes(&mut raw);
    raw.chunks(4)
        .map(|chunk| chunk.iter().map(|b| format!("{b:02x}")).collect::<String>())
        .collect::<Vec<_>>()
        .join("-")
}

#[cfg(test)]
mod tests {
    use super::*;

    // Argon2id at 64 MiB is slow; one round-trip test covers hash, verify
    // and derive determinism together.
    #[test]
    fn seed_hash_verifies_and_key_is_deterministic() {
        let salt = generate_salt();
        let phc = hash_seed("correct horse battery", &salt).unwrap();
        assert!(verify_seed("correct horse battery", &phc).unwrap());
        assert!(!verify_seed("wrong seed entirely", &phc).unwrap());

        let k1 = derive_key("correct horse battery", &salt).unwrap();
        let k2 = derive_key("correct horse battery", &salt).unwrap();
        assert_eq!(k1, k2);
        let k3 = derive_key("wrong seed entirely", &salt).unwrap();
        assert_ne!(k1, k3);
    }

    #[test]
    fn recovery_code_shape() {
        let code = recovery_code();
        assert_eq!(code.split('-').count(), 4);
        assert_ne!(code, recovery_code());
    }
}
