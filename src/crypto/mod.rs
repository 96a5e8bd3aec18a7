//! AES-256-GCM sealing for channel credentials stored in the database.
//!
//! SES secret keys, SES session tokens and SMTP passwords go through
//! [`SecretCipher`]. A sealed value is `ENC:` followed by
//! base64(nonce || ciphertext || tag) with a 12 byte nonce.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::RngCore;
use ring::pbkdf2;
use std::num::NonZeroU32;

pub const KEY_LENGTH: usize = 32;
const NONCE_LENGTH: usize = 12;
const PBKDF2_ITERATIONS: u32 = 100_000;
const PBKDF2_SALT: &[u8] = b"herald-channel-secret-v1";

/// Marks a stored value as sealed. Anything else is plaintext.
pub const ENCRYPTED_PREFIX: &str = "ENC:";

/// PBKDF2-HMAC-SHA256 key from the configured `auth.encryption_key`
pub fn derive_key(secret: &str) -> [u8; KEY_LENGTH] {
    let mut key = [0u8; KEY_LENGTH];
    let iterations = NonZeroU32::new(PBKDF2_ITERATIONS).unwrap_or(NonZeroU32::MIN);
    pbkdf2::derive(
        pbkdf2::PBKDF2_HMAC_SHA256,
        iterations,
        PBKDF2_SALT,
        secret.as_bytes(),
        &mut key,
    );
    key
}

pub fn is_encrypted(value: &str) -> bool {
    value.starts_with(ENCRYPTED_PREFIX)
}

/// Holds the optional key used for channel credentials.
///
/// Without a key, secrets are stored as given. Empty values are never
/// sealed so that "not set" stays distinguishable in the database.
#[derive(Clone, Default)]
pub struct SecretCipher {
    key: Option<[u8; KEY_LENGTH]>,
}

impl SecretCipher {
    pub fn new(key: Option<[u8; KEY_LENGTH]>) -> Self {
        Self { key }
    }

    pub fn is_enabled(&self) -> bool {
        self.key.is_some()
    }

    pub fn seal(&self, value: &str) -> Result<String> {
        match &self.key {
            Some(key) if !value.is_empty() => seal_with(key, value),
            _ => Ok(value.to_string()),
        }
    }

    /// Plaintext of a stored value. Unsealed values pass through.
    pub fn open(&self, value: &str) -> Result<String> {
        if !is_encrypted(value) {
            return Ok(value.to_string());
        }
        match &self.key {
            Some(key) => open_with(key, value),
            None => anyhow::bail!("Value is encrypted but no encryption key is configured"),
        }
    }
}

impl std::fmt::Debug for SecretCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretCipher")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

fn seal_with(key: &[u8; KEY_LENGTH], plaintext: &str) -> Result<String> {
    let mut nonce = [0u8; NONCE_LENGTH];
    rand::rng().fill_bytes(&mut nonce);

    let sealed = Aes256Gcm::new_from_slice(key)
        .context("Failed to create cipher")?
        .encrypt(Nonce::from_slice(&nonce), plaintext.as_bytes())
        .map_err(|e| anyhow::anyhow!("Encryption failed: {}", e))?;

    let mut combined = nonce.to_vec();
    combined.extend_from_slice(&sealed);
    Ok(format!("{}{}", ENCRYPTED_PREFIX, BASE64.encode(combined)))
}

fn open_with(key: &[u8; KEY_LENGTH], value: &str) -> Result<String> {
    let encoded = value
        .strip_prefix(ENCRYPTED_PREFIX)
        .context("Ciphertext doesn't have expected prefix")?;
    let combined = BASE64.decode(encoded).context("Failed to decode base64")?;
    if combined.len() <= NONCE_LENGTH {
        anyhow::bail!("Ciphertext too short");
    }

    let (nonce, sealed) = combined.split_at(NONCE_LENGTH);
    let plaintext = Aes256Gcm::new_from_slice(key)
        .context("Failed to create cipher")?
        .decrypt(Nonce::from_slice(nonce), sealed)
        .map_err(|e| anyhow::anyhow!("Decryption failed (wrong key or corrupted data): {}", e))?;

    String::from_utf8(plaintext).context("Decrypted data is not valid UTF-8")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    fn cipher(secret: &str) -> SecretCipher {
        SecretCipher::new(Some(derive_key(secret)))
    }

    #[test]
    fn test_derive_key_depends_on_secret() {
        assert_eq!(derive_key("alpha"), derive_key("alpha"));
        assert_ne!(derive_key("alpha"), derive_key("beta"));
    }

    #[test]
    fn test_seal_and_open() {
        let cipher = cipher("test-key");
        let sealed = cipher.seal("aws-secret/äö").unwrap();
        assert!(is_encrypted(&sealed));
        assert_ne!(sealed, cipher.seal("aws-secret/äö").unwrap());
        assert_eq!(cipher.open(&sealed).unwrap(), "aws-secret/äö");
    }

    #[test]
    fn test_open_with_wrong_key_fails() {
        let sealed = cipher("right").seal("smtp-password").unwrap();
        assert_ok!(cipher("right").open(&sealed));
        assert_err!(cipher("wrong").open(&sealed));
        assert_err!(SecretCipher::default().open(&sealed));
    }

    #[test]
    fn test_open_rejects_truncated_value() {
        assert_err!(cipher("k").open("ENC:AAAA"));
        assert_err!(cipher("k").open("ENC:not base64!"));
    }

    #[test]
    fn test_empty_and_keyless_values_pass_through() {
        assert_eq!(cipher("test-key").seal("").unwrap(), "");
        assert_eq!(cipher("test-key").open("legacy-plain").unwrap(), "legacy-plain");

        let plain = SecretCipher::default();
        assert!(!plain.is_enabled());
        assert_eq!(plain.seal("aws-secret").unwrap(), "aws-secret");
        assert_eq!(plain.open("aws-secret").unwrap(), "aws-secret");
    }
}
