//! AES-256-GCM secret envelopes.
//!
//! Each secret is encrypted with a fresh 16-byte IV; the ciphertext, IV, and
//! authentication tag are stored as separate base64 fields. Tampering with
//! any of the three fails decryption.

use aes_gcm::aead::generic_array::typenum::U16;
use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::aes::Aes256;
use aes_gcm::AesGcm;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::RngCore;

use crate::error::VaultError;

/// AES-256-GCM with a 16-byte nonce.
type Cipher = AesGcm<Aes256, U16>;

const IV_LEN: usize = 16;
const TAG_LEN: usize = 16;

/// The stored triple: all fields base64.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Envelope {
    pub ciphertext: String,
    pub iv: String,
    pub auth_tag: String,
}

/// Encrypt plaintext under the vault key with a fresh random IV.
pub fn seal(key: &[u8; 32], plaintext: &[u8]) -> Result<Envelope, VaultError> {
    let cipher = Cipher::new(GenericArray::from_slice(key));
    let mut iv = [0u8; IV_LEN];
    rand::rngs::OsRng.fill_bytes(&mut iv);

    let mut sealed = cipher
        .encrypt(GenericArray::from_slice(&iv), plaintext)
        .map_err(|_| VaultError::Crypto("encryption failed".into()))?;
    // The aead API appends the tag; store it as its own field.
    let tag = sealed.split_off(sealed.len() - TAG_LEN);

    Ok(Envelope {
        ciphertext: BASE64.encode(sealed),
        iv: BASE64.encode(iv),
        auth_tag: BASE64.encode(tag),
    })
}

/// Decrypt an envelope. Fails when the ciphertext, IV, or tag was altered.
pub fn open(key: &[u8; 32], envelope: &Envelope) -> Result<Vec<u8>, VaultError> {
    let mut sealed = BASE64
        .decode(&envelope.ciphertext)
        .map_err(|e| VaultError::Crypto(format!("bad ciphertext encoding: {e}")))?;
    let iv = BASE64
        .decode(&envelope.iv)
        .map_err(|e| VaultError::Crypto(format!("bad iv encoding: {e}")))?;
    let tag = BASE64
        .decode(&envelope.auth_tag)
        .map_err(|e| VaultError::Crypto(format!("bad tag encoding: {e}")))?;
    if iv.len() != IV_LEN || tag.len() != TAG_LEN {
        return Err(VaultError::Crypto("wrong iv or tag length".into()));
    }
    sealed.extend_from_slice(&tag);

    let cipher = Cipher::new(GenericArray::from_slice(key));
    cipher
        .decrypt(GenericArray::from_slice(&iv), sealed.as_slice())
        .map_err(|_| VaultError::Crypto("gcm authentication failed".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> [u8; 32] {
        let mut k = [0u8; 32];
        for (i, b) in k.iter_mut().enumerate() {
            *b = i as u8;
        }
        k
    }

    #[test]
    fn round_trip() {
        let k = key();
        let env = seal(&k, b"{\"password\":\"p\"}").unwrap();
        let plain = open(&k, &env).unwrap();
        assert_eq!(plain, b"{\"password\":\"p\"}");
    }

    #[test]
    fn fresh_iv_per_seal() {
        let k = key();
        let a = seal(&k, b"same").unwrap();
        let b = seal(&k, b"same").unwrap();
        assert_ne!(a.iv, b.iv);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    fn flip_first_bit(b64: &str) -> String {
        let mut raw = BASE64.decode(b64).unwrap();
        raw[0] ^= 0x01;
        BASE64.encode(raw)
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let k = key();
        let mut env = seal(&k, b"payload").unwrap();
        env.ciphertext = flip_first_bit(&env.ciphertext);
        assert!(matches!(open(&k, &env), Err(VaultError::Crypto(_))));
    }

    #[test]
    fn tampered_iv_fails() {
        let k = key();
        let mut env = seal(&k, b"payload").unwrap();
        env.iv = flip_first_bit(&env.iv);
        assert!(open(&k, &env).is_err());
    }

    #[test]
    fn tampered_tag_fails() {
        let k = key();
        let mut env = seal(&k, b"payload").unwrap();
        env.auth_tag = flip_first_bit(&env.auth_tag);
        assert!(open(&k, &env).is_err());
    }

    #[test]
    fn wrong_key_fails() {
        let env = seal(&key(), b"payload").unwrap();
        let other = [7u8; 32];
        assert!(open(&other, &env).is_err());
    }
}
