//! Key vault for pool wallet private keys
//!
//! Private keys never touch disk or the state snapshot in the clear. The
//! sealing key is derived from an operator-supplied secret:
//!
//! ```text
//! vault secret (UTF-8, from config)
//!     Argon2id (256 MB RAM, 4 iterations, salt persisted in the data dir)
//! master key (256 bits)
//!     HKDF-SHA256
//! sealing key (256 bits)
//!     AES-256-GCM
//! sealed key bytes (nonce || ciphertext+tag)
//! ```
//!
//! A missing secret is a configuration error: [`KeyVault::from_configured_secret`]
//! refuses with [`VaultError::SecretMissing`], nothing falls back to plaintext.

use zeroize::Zeroizing;

use self::cipher::KeyCipher;
use self::cipher::NONCE_LEN;
use self::key_manager::VaultKeyManager;

mod cipher;
mod key_manager;

#[derive(Debug, Clone, thiserror::Error)]
#[non_exhaustive]
pub enum VaultError {
    #[error("no vault secret configured; set GATEWAY_VAULT_SECRET or pass --vault-secret")]
    SecretMissing,

    #[error("invalid AES key: {0}")]
    InvalidKey(String),

    #[error("key derivation failed: {0}")]
    KeyDerivationFailed(String),

    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("decryption failed (wrong secret or corrupted data): {0}")]
    DecryptionFailed(String),

    #[error("sealed payload too short")]
    MalformedPayload,
}

/// Seals and opens private key material for the wallet pool.
pub struct KeyVault {
    cipher: KeyCipher,
}

impl std::fmt::Debug for KeyVault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyVault").finish_non_exhaustive()
    }
}

impl KeyVault {
    /// Build the vault from the configured secret, stretching it through
    /// Argon2id. Runs once per process; takes on the order of a second.
    pub fn from_secret(secret: &str, salt: &[u8; 32]) -> Result<Self, VaultError> {
        let manager = VaultKeyManager::from_secret(secret, salt)?;
        let cipher = KeyCipher::new(&manager.derive_sealing_key())?;
        Ok(Self { cipher })
    }

    /// Build the vault from the secret exactly as configured, which may be
    /// absent. A missing secret is [`VaultError::SecretMissing`], never a
    /// plaintext fallback.
    pub fn from_configured_secret(
        secret: Option<&str>,
        salt: &[u8; 32],
    ) -> Result<Self, VaultError> {
        let secret = secret.ok_or(VaultError::SecretMissing)?;
        Self::from_secret(secret, salt)
    }

    /// Build the vault from a raw 256-bit master key, skipping the Argon2id
    /// stretch. For deployments that inject key material directly, and for
    /// test fixtures.
    pub fn from_master_key(master_key: Zeroizing<[u8; 32]>) -> Result<Self, VaultError> {
        let manager = VaultKeyManager::from_master_key(master_key);
        let cipher = KeyCipher::new(&manager.derive_sealing_key())?;
        Ok(Self { cipher })
    }

    /// Generate a random salt for a fresh vault.
    pub fn generate_salt() -> [u8; 32] {
        VaultKeyManager::generate_salt()
    }

    /// Seal private key bytes. The returned payload embeds the nonce and
    /// authentication tag and is safe to persist.
    pub fn seal_key(&self, plaintext_key: &[u8]) -> Result<Vec<u8>, VaultError> {
        let nonce = KeyCipher::generate_nonce();
        let ciphertext = self.cipher.encrypt(plaintext_key, &nonce)?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    /// Open a sealed payload. The plaintext is zeroed when the returned
    /// buffer drops.
    pub fn open_key(&self, sealed: &[u8]) -> Result<Zeroizing<Vec<u8>>, VaultError> {
        if sealed.len() <= NONCE_LEN {
            return Err(VaultError::MalformedPayload);
        }
        let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);
        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(nonce_bytes);

        let plaintext = self.cipher.decrypt(ciphertext, &nonce)?;
        Ok(Zeroizing::new(plaintext))
    }
}
