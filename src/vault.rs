//! Sealed key custody.
//!
//! Signing keys are stored only as sealed blobs. A blob is
//! `base64(version ‖ salt ‖ nonce ‖ ciphertext)` where the AES-256-GCM key
//! is `HMAC-SHA256(server_secret, salt)` and salt and nonce are fresh
//! random bytes per seal. Any tampering, truncation or wrong server secret
//! fails authentication and returns an error; there is no path that yields
//! a wrong plaintext.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::types::EngineError;

type HmacSha256 = Hmac<Sha256>;

const VERSION: u8 = 1;
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const HEADER_LEN: usize = 1 + SALT_LEN + NONCE_LEN;
/// GCM tag length; a valid blob carries at least this much ciphertext.
const TAG_LEN: usize = 16;

pub struct KeyVault {
    secret: SecretString,
}

impl std::fmt::Debug for KeyVault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyVault").finish_non_exhaustive()
    }
}

impl KeyVault {
    pub fn new(secret: SecretString) -> Result<Self, EngineError> {
        if secret.expose_secret().len() < 16 {
            return Err(EngineError::Vault("server secret must be at least 16 bytes".into()));
        }
        Ok(Self { secret })
    }

    /// Build from the environment variable named `env_name`.
    pub fn from_env(env_name: &str) -> Result<Self, EngineError> {
        let value = std::env::var(env_name)
            .map_err(|_| EngineError::Vault(format!("{env_name} is not set")))?;
        Self::new(SecretString::new(value))
    }

    fn cipher(&self, salt: &[u8]) -> Result<Aes256Gcm, EngineError> {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(self.secret.expose_secret().as_bytes())
            .map_err(|_| EngineError::Vault("bad server secret".into()))?;
        mac.update(salt);
        let mut key = Zeroizing::new([0u8; 32]);
        key.copy_from_slice(&mac.finalize().into_bytes());
        Aes256Gcm::new_from_slice(&key[..]).map_err(|_| EngineError::Vault("bad derived key".into()))
    }

    /// Encrypt `plaintext` into a sealed blob.
    pub fn seal(&self, plaintext: &SecretString) -> Result<String, EngineError> {
        let mut salt = [0u8; SALT_LEN];
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut salt);
        OsRng.fill_bytes(&mut nonce);

        let ciphertext = self
            .cipher(&salt)?
            .encrypt(Nonce::from_slice(&nonce), plaintext.expose_secret().as_bytes())
            .map_err(|_| EngineError::Vault("encryption failed".into()))?;

        let mut blob = Vec::with_capacity(HEADER_LEN + ciphertext.len());
        blob.push(VERSION);
        blob.extend_from_slice(&salt);
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&ciphertext);
        Ok(STANDARD.encode(blob))
    }

    /// Decrypt a sealed blob. Fails closed on any corruption.
    pub fn unseal(&self, blob: &str) -> Result<SecretString, EngineError> {
        let raw = STANDARD
            .decode(blob.trim())
            .map_err(|_| EngineError::Vault("sealed blob is not valid base64".into()))?;
        if raw.len() < HEADER_LEN + TAG_LEN {
            return Err(EngineError::Vault("sealed blob is truncated".into()));
        }
        if raw[0] != VERSION {
            return Err(EngineError::Vault(format!("unsupported blob version {}", raw[0])));
        }
        let salt = &raw[1..1 + SALT_LEN];
        let nonce = &raw[1 + SALT_LEN..HEADER_LEN];
        let ciphertext = &raw[HEADER_LEN..];

        let plaintext = Zeroizing::new(
            self.cipher(salt)?
                .decrypt(Nonce::from_slice(nonce), ciphertext)
                .map_err(|_| EngineError::Vault("authentication failed".into()))?,
        );
        let text = std::str::from_utf8(&plaintext)
            .map_err(|_| EngineError::Vault("sealed secret is not UTF-8".into()))?;
        Ok(SecretString::new(text.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
