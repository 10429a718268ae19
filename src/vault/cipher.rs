//! AES-256-GCM authenticated encryption for pool wallet keys

use aes_gcm::aead::Aead;
use aes_gcm::aead::KeyInit;
use aes_gcm::Aes256Gcm;
use aes_gcm::Nonce;
use rand::Rng;

use super::VaultError;

pub(super) const NONCE_LEN: usize = 12;

/// Handles AES-256-GCM encryption/decryption of private key material.
pub(super) struct KeyCipher {
    cipher: Aes256Gcm,
}

impl KeyCipher {
    /// Create cipher from 256-bit key
    pub(super) fn new(key: &[u8; 32]) -> Result<Self, VaultError> {
        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|e| VaultError::InvalidKey(e.to_string()))?;
        Ok(Self { cipher })
    }

    /// Generate random 96-bit nonce
    pub(super) fn generate_nonce() -> [u8; NONCE_LEN] {
        let mut nonce = [0u8; NONCE_LEN];
        rand::rng().fill(&mut nonce);
        nonce
    }

    /// Encrypt plaintext with authenticated encryption.
    ///
    /// Returns ciphertext with authentication tag appended.
    pub(super) fn encrypt(
        &self,
        plaintext: &[u8],
        nonce: &[u8; NONCE_LEN],
    ) -> Result<Vec<u8>, VaultError> {
        let nonce = Nonce::from_slice(nonce);

        self.cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| VaultError::EncryptionFailed(e.to_string()))
    }

    /// Decrypt ciphertext with authentication verification
    pub(super) fn decrypt(
        &self,
        ciphertext: &[u8],
        nonce: &[u8; NONCE_LEN],
    ) -> Result<Vec<u8>, VaultError> {
        let nonce = Nonce::from_slice(nonce);

        self.cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| VaultError::DecryptionFailed(e.to_string()))
    }
}
