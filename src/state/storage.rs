//! Data-directory artifacts: the state snapshot, the HD seed phrase, and the
//! vault salt.
//!
//! The whole gateway state fits comfortably in one bincode snapshot; it is
//! rewritten through a temp-file-and-rename so a crash mid-write leaves the
//! previous snapshot intact. Secret-bearing files are created with 0600 on
//! Unix.

use std::fs;
use std::path::Path;
use std::path::PathBuf;

use anyhow::Context;
use anyhow::Result;
use bip39::Language;
use bip39::Mnemonic;
use bip39::Seed;
use rand::Rng;
use tracing::info;
use zeroize::Zeroizing;

use super::GatewayState;

/// Reads and writes the gateway state snapshot at a fixed path.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    snapshot_path: PathBuf,
}

impl SnapshotStore {
    pub fn new(snapshot_path: PathBuf) -> Self {
        Self { snapshot_path }
    }

    /// The previous run's state, or `None` on first start.
    pub fn load(&self) -> Result<Option<GatewayState>> {
        if !self.snapshot_path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(&self.snapshot_path).with_context(|| {
            format!("Failed to read state snapshot {}", self.snapshot_path.display())
        })?;
        let state = bincode::deserialize(&bytes).with_context(|| {
            format!(
                "Failed to decode state snapshot {}",
                self.snapshot_path.display()
            )
        })?;
        Ok(Some(state))
    }

    /// Serialize and atomically replace the snapshot file.
    pub fn save(&self, state: &GatewayState) -> Result<()> {
        let bytes = bincode::serialize(state).context("Failed to serialize gateway state")?;

        let mut tmp_path = self.snapshot_path.clone();
        tmp_path.set_extension("tmp");
        write_restrictive(&tmp_path, &bytes)
            .with_context(|| format!("Failed to write snapshot {}", tmp_path.display()))?;
        fs::rename(&tmp_path, &self.snapshot_path).with_context(|| {
            format!(
                "Failed to move snapshot into place at {}",
                self.snapshot_path.display()
            )
        })?;
        Ok(())
    }
}

/// Load the HD seed from the phrase file, generating a fresh 24-word phrase
/// on first run. Returns the 64-byte BIP-39 seed.
pub fn load_or_create_seed(seed_file: &Path) -> Result<Zeroizing<Vec<u8>>> {
    let mnemonic = if seed_file.exists() {
        let phrase = Zeroizing::new(
            fs::read_to_string(seed_file)
                .with_context(|| format!("Failed to read seed file {}", seed_file.display()))?,
        );
        Mnemonic::from_phrase(phrase.trim(), Language::English)
            .with_context(|| format!("Seed file {} holds no valid phrase", seed_file.display()))?
    } else {
        let mut entropy = Zeroizing::new([0u8; 32]);
        rand::rng().fill(&mut *entropy);
        let mnemonic = Mnemonic::from_entropy(&*entropy, Language::English)
            .context("Failed to build mnemonic from fresh entropy")?;

        write_restrictive(seed_file, mnemonic.phrase().as_bytes())
            .with_context(|| format!("Failed to write seed file {}", seed_file.display()))?;
        info!(
            "Generated new wallet seed phrase; stored at {}",
            seed_file.display()
        );
        mnemonic
    };

    let seed = Seed::new(&mnemonic, "");
    Ok(Zeroizing::new(seed.as_bytes().to_vec()))
}

/// Load the vault salt, generating and persisting one on first run.
pub fn load_or_create_vault_salt(salt_file: &Path) -> Result<[u8; 32]> {
    if salt_file.exists() {
        let encoded = fs::read_to_string(salt_file)
            .with_context(|| format!("Failed to read vault salt {}", salt_file.display()))?;
        let bytes = hex::decode(encoded.trim())
            .with_context(|| format!("Vault salt {} is not hex", salt_file.display()))?;
        let salt: [u8; 32] = bytes
            .try_into()
            .map_err(|_| anyhow::anyhow!("Vault salt {} is not 32 bytes", salt_file.display()))?;
        return Ok(salt);
    }

    let salt = crate::vault::KeyVault::generate_salt();
    write_restrictive(salt_file, hex::encode(salt).as_bytes())
        .with_context(|| format!("Failed to write vault salt {}", salt_file.display()))?;
    info!("Generated new vault salt; stored at {}", salt_file.display());
    Ok(salt)
}

#[cfg(unix)]
fn write_restrictive(path: &Path, contents: &[u8]) -> Result<()> {
    // 600 so other users on the machine cannot read key material
    use std::io::Write;
    use std::os::unix::prelude::OpenOptionsExt;

    let mut file = fs::OpenOptions::new()
        .create(true)
        .truncate(true)
        .write(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(contents)?;
    Ok(())
}

#[cfg(not(unix))]
fn write_restrictive(path: &Path, contents: &[u8]) -> Result<()> {
    fs::write(path, contents)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn snapshot_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(dir.path().join("state.bin"));

        assert!(store.load().unwrap().is_none());

        let state = GatewayState::new();
        store.save(&state).unwrap();
        let loaded = store.load().unwrap().expect("snapshot written above");
        assert_eq!(loaded.wallet_pool.len(), 0);
    }

    #[test]
    fn corrupt_snapshot_is_an_error_not_a_reset() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.bin");
        fs::write(&path, b"not bincode").unwrap();

        let store = SnapshotStore::new(path);
        assert!(store.load().is_err());
    }

    #[test]
    fn seed_survives_restart() {
        let dir = TempDir::new().unwrap();
        let seed_file = dir.path().join("seed.phrase");

        let first = load_or_create_seed(&seed_file).unwrap();
        let second = load_or_create_seed(&seed_file).unwrap();
        assert_eq!(first.as_slice(), second.as_slice());
        assert_eq!(first.len(), 64);
    }

    #[test]
    fn salt_survives_restart() {
        let dir = TempDir::new().unwrap();
        let salt_file = dir.path().join("vault.salt");

        let first = load_or_create_vault_salt(&salt_file).unwrap();
        let second = load_or_create_vault_salt(&salt_file).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn garbage_seed_file_is_rejected() {
        let dir = TempDir::new().unwrap();
        let seed_file = dir.path().join("seed.phrase");
        fs::write(&seed_file, "definitely not a mnemonic").unwrap();

        assert!(load_or_create_seed(&seed_file).is_err());
    }
}
