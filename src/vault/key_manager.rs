//! Argon2id key derivation for the pool key vault
//!
//! The operator-supplied vault secret is stretched with Argon2id, a
//! memory-hard function, before any key touches AES.

use argon2::Argon2;
use argon2::ParamsBuilder;
use argon2::Version;
use hkdf::Hkdf;
use rand::Rng;
use sha2::Sha256;
use zeroize::Zeroizing;

use super::VaultError;

/// Holds the master key derived from the vault secret (zeroed on drop).
pub(super) struct VaultKeyManager {
    master_key: Zeroizing<[u8; 32]>,
}

impl VaultKeyManager {
    /// Derive master key from the vault secret using Argon2id
    ///
    /// Parameters:
    /// - Memory cost: 256 MB (m_cost = 262144 KiB)
    /// - Time cost: 4 iterations
    /// - Parallelism: 4 threads
    /// - Takes ~1 second on modern hardware; runs once per process
    pub(super) fn from_secret(secret: &str, salt: &[u8; 32]) -> Result<Self, VaultError> {
        let params = ParamsBuilder::new()
            .m_cost(262144)
            .t_cost(4)
            .p_cost(4)
            .build()
            .map_err(|e| VaultError::KeyDerivationFailed(e.to_string()))?;

        let argon2 = Argon2::new(argon2::Algorithm::Argon2id, Version::V0x13, params);

        let mut master_key = Zeroizing::new([0u8; 32]);
        argon2
            .hash_password_into(secret.as_bytes(), salt, &mut *master_key)
            .map_err(|e| VaultError::KeyDerivationFailed(e.to_string()))?;

        Ok(Self { master_key })
    }

    pub(super) fn from_master_key(master_key: Zeroizing<[u8; 32]>) -> Self {
        Self { master_key }
    }

    /// Generate random salt for a new vault
    pub(super) fn generate_salt() -> [u8; 32] {
        let mut salt = [0u8; 32];
        rand::rng().fill(&mut salt);
        salt
    }

    /// Derive the key-sealing key using HKDF-SHA256
    pub(super) fn derive_sealing_key(&self) -> Zeroizing<[u8; 32]> {
        let hkdf = Hkdf::<Sha256>::new(None, &*self.master_key);
        let mut key = Zeroizing::new([0u8; 32]);
        hkdf.expand(b"deposit-gateway-pool-key-v1", &mut *key)
            .expect("HKDF expand failed (bug)");
        key
    }
}

impl Drop for VaultKeyManager {
    fn drop(&mut self) {
        tracing::debug!("Zeroing vault master key from memory");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Argon2 at production cost is slow; tests exercise determinism through
    // the HKDF stage with a fixed master key where possible.

    #[test]
    fn deterministic_derivation() {
        let secret = "correct-horse-battery-staple";
        let salt = [42u8; 32];

        let km1 = VaultKeyManager::from_secret(secret, &salt).unwrap();
        let km2 = VaultKeyManager::from_secret(secret, &salt).unwrap();

        assert_eq!(
            km1.derive_sealing_key().as_ref(),
            km2.derive_sealing_key().as_ref()
        );
    }

    #[test]
    fn different_master_keys_different_sealing_keys() {
        let km1 = VaultKeyManager::from_master_key(Zeroizing::new([1u8; 32]));
        let km2 = VaultKeyManager::from_master_key(Zeroizing::new([2u8; 32]));

        assert_ne!(
            km1.derive_sealing_key().as_ref(),
            km2.derive_sealing_key().as_ref()
        );
    }

    #[test]
    fn generate_salt_randomness() {
        let salt1 = VaultKeyManager::generate_salt();
        let salt2 = VaultKeyManager::generate_salt();

        assert_ne!(salt1, salt2);
    }
}
