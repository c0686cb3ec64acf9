//! AES-256-GCM encryption of seed material under an argon2id-derived key.
//!
//! # Wire format
//! ```text
//! version (1) || memory_kib (u32 LE) || iterations (u32 LE)
//!   || salt (16) || nonce (12) || ciphertext + auth_tag
//! ```
//! The KDF cost is stored with the blob so parameters can be raised without
//! breaking existing wallets.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use argon2::{Algorithm, Argon2, Params, Version};
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::error::WalletError;

const FORMAT_VERSION: u8 = 1;
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const HEADER_LEN: usize = 1 + 4 + 4 + SALT_LEN + NONCE_LEN;

/// argon2id cost parameters.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
    pub memory_kib: u32,
    pub iterations: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_kib: 19 * 1024,
            iterations: 2,
        }
    }
}

impl KdfParams {
    /// Minimal cost, for tests and throwaway wallets.
    pub const fn light() -> Self {
        Self {
            memory_kib: 8,
            iterations: 1,
        }
    }
}

/// Derive a 256-bit key from `password` and `salt` with argon2id.
pub fn derive_key(password: &[u8], salt: &[u8], params: KdfParams) -> Result<[u8; 32], WalletError> {
    let params = Params::new(params.memory_kib, params.iterations, 1, Some(32))
        .map_err(|e| WalletError::Encryption(e.to_string()))?;
    let mut key = [0u8; 32];
    Argon2::new(Algorithm::Argon2id, Version::V0x13, params)
        .hash_password_into(password, salt, &mut key)
        .map_err(|e| WalletError::Encryption(e.to_string()))?;
    Ok(key)
}

/// Encrypt `plaintext` under `password`.
pub fn encrypt(plaintext: &[u8], password: &[u8], params: KdfParams) -> Result<Vec<u8>, WalletError> {
    use rand::RngCore;
    let mut salt = [0u8; SALT_LEN];
    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::rngs::OsRng.fill_bytes(&mut salt);
    rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);

    let mut key = derive_key(password, &salt, params)?;
    let cipher =
        Aes256Gcm::new_from_slice(&key).map_err(|e| WalletError::Encryption(e.to_string()))?;
    key.zeroize();

    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
        .map_err(|e| WalletError::Encryption(e.to_string()))?;

    let mut out = Vec::with_capacity(HEADER_LEN + ciphertext.len());
    out.push(FORMAT_VERSION);
    out.extend_from_slice(&params.memory_kib.to_le_bytes());
    out.extend_from_slice(&params.iterations.to_le_bytes());
    out.extend_from_slice(&salt);
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypt a blob produced by [`encrypt`].
///
/// A wrong password surfaces as [`WalletError::InvalidPassword`].
pub fn decrypt(encrypted: &[u8], password: &[u8]) -> Result<Vec<u8>, WalletError> {
    if encrypted.len() < HEADER_LEN + TAG_LEN {
        return Err(WalletError::CorruptedKeys(format!(
            "encrypted data too short: {} < {}",
            encrypted.len(),
            HEADER_LEN + TAG_LEN
        )));
    }
    if encrypted[0] != FORMAT_VERSION {
        return Err(WalletError::CorruptedKeys(format!(
            "unknown format version {}",
            encrypted[0]
        )));
    }

    let mut word = [0u8; 4];
    word.copy_from_slice(&encrypted[1..5]);
    let memory_kib = u32::from_le_bytes(word);
    word.copy_from_slice(&encrypted[5..9]);
    let iterations = u32::from_le_bytes(word);
    let salt = &encrypted[9..9 + SALT_LEN];
    let nonce_bytes = &encrypted[9 + SALT_LEN..HEADER_LEN];
    let ciphertext = &encrypted[HEADER_LEN..];

    let mut key = derive_key(password, salt, KdfParams { memory_kib, iterations })
        .map_err(|e| WalletError::CorruptedKeys(e.to_string()))?;
    let cipher =
        Aes256Gcm::new_from_slice(&key).map_err(|e| WalletError::Encryption(e.to_string()))?;
    key.zeroize();

    cipher
        .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
        .map_err(|_| WalletError::InvalidPassword)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let encrypted = encrypt(b"seed bytes", b"hunter2", KdfParams::light()).unwrap();
        assert_eq!(decrypt(&encrypted, b"hunter2").unwrap(), b"seed bytes");
    }

    #[test]
    fn wrong_password_fails() {
        let encrypted = encrypt(b"secret", b"correct", KdfParams::light()).unwrap();
        assert_eq!(decrypt(&encrypted, b"wrong").unwrap_err(), WalletError::InvalidPassword);
    }

    #[test]
    fn params_travel_with_blob() {
        let params = KdfParams {
            memory_kib: 16,
            iterations: 2,
        };
        let encrypted = encrypt(b"x", b"pw", params).unwrap();
        assert_eq!(&encrypted[1..5], &16u32.to_le_bytes());
        assert_eq!(&encrypted[5..9], &2u32.to_le_bytes());
        assert_eq!(decrypt(&encrypted, b"pw").unwrap(), b"x");
    }

    #[test]
    fn nonce_and_salt_are_fresh() {
        let a = encrypt(b"same", b"pw", KdfParams::light()).unwrap();
        let b = encrypt(b"same", b"pw", KdfParams::light()).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn truncated_data_fails() {
        let err = decrypt(&[FORMAT_VERSION; 20], b"pw").unwrap_err();
        assert!(matches!(err, WalletError::CorruptedKeys(_)));
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let mut encrypted = encrypt(b"secret", b"pw", KdfParams::light()).unwrap();
        let last = encrypted.len() - 1;
        encrypted[last] ^= 0xFF;
        assert_eq!(decrypt(&encrypted, b"pw").unwrap_err(), WalletError::InvalidPassword);
    }

    #[test]
    fn unknown_version_rejected() {
        let mut encrypted = encrypt(b"secret", b"pw", KdfParams::light()).unwrap();
        encrypted[0] = 9;
        assert!(matches!(
            decrypt(&encrypted, b"pw").unwrap_err(),
            WalletError::CorruptedKeys(_)
        ));
    }
}
