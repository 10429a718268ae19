use std::path::Path;
use std::path::PathBuf;

use anyhow::Context;
use anyhow::Result;
use directories::ProjectDirs;

const SNAPSHOT_FILE_NAME: &str = "gateway_state.bin";
const SEED_FILE_NAME: &str = "seed.phrase";
const VAULT_SALT_FILE_NAME: &str = "vault_salt.hex";

#[derive(Debug, Clone)]
pub struct DataDirectory {
    data_dir: PathBuf,
}

impl DataDirectory {
    ///////////////////////////////////////////////////////////////////////////
    ///
    /// The data directory that contains the state snapshot, the wallet seed
    /// phrase, and the vault salt.
    ///
    /// The default varies by operating system, e.g.
    ///
    /// - Linux:   /home/alice/.local/share/deposit-gateway
    /// - Windows: C:\Users\Alice\AppData\Roaming\deposit-gateway
    /// - macOS:   /Users/Alice/Library/Application Support/deposit-gateway
    pub fn get(root_dir: Option<PathBuf>) -> Result<Self> {
        let project_dirs = root_dir
            .map(ProjectDirs::from_path)
            .unwrap_or_else(|| ProjectDirs::from("org", "deposit-gateway", "deposit-gateway"))
            .context("Could not determine data directory")?;

        let data_dir = project_dirs.data_dir().to_path_buf();

        Ok(DataDirectory { data_dir })
    }

    /// Create directory if it does not exist
    pub async fn create_dir_if_not_exists(dir: &Path) -> Result<()> {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Failed to create data directory {}", dir.display()))
    }

    ///////////////////////////////////////////////////////////////////////////
    ///
    /// The root data directory path
    pub fn root_dir_path(&self) -> PathBuf {
        self.data_dir.clone()
    }

    /// The state snapshot file path
    pub fn snapshot_file_path(&self) -> PathBuf {
        self.data_dir.join(Path::new(SNAPSHOT_FILE_NAME))
    }

    /// The wallet seed phrase file path
    pub fn seed_file_path(&self) -> PathBuf {
        self.data_dir.join(Path::new(SEED_FILE_NAME))
    }

    /// The vault salt file path
    pub fn vault_salt_file_path(&self) -> PathBuf {
        self.data_dir.join(Path::new(VAULT_SALT_FILE_NAME))
    }
}

impl std::fmt::Display for DataDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.data_dir.display())
    }
}

#[cfg(test)]
mod data_directory_tests {
    use super::*;

    #[test]
    fn explicit_root_keeps_file_names() {
        let dir = DataDirectory::get(Some(PathBuf::from("/tmp/gateway-test"))).unwrap();
        assert!(dir
            .snapshot_file_path()
            .to_string_lossy()
            .ends_with(SNAPSHOT_FILE_NAME));
        assert!(dir
            .seed_file_path()
            .to_string_lossy()
            .ends_with(SEED_FILE_NAME));
        assert!(dir
            .vault_salt_file_path()
            .to_string_lossy()
            .ends_with(VAULT_SALT_FILE_NAME));
    }

    #[test]
    fn all_files_share_the_root() {
        let dir = DataDirectory::get(Some(PathBuf::from("/tmp/gateway-test"))).unwrap();
        let root = dir.root_dir_path();
        assert!(dir.snapshot_file_path().starts_with(&root));
        assert!(dir.seed_file_path().starts_with(&root));
        assert!(dir.vault_salt_file_path().starts_with(&root));
    }
}
