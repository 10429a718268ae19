//! Deposit gateway for the investment platform backend.
//!
//! The gateway owns a pool of HD-derived deposit wallets on the supported
//! networks, leases them to users for a bounded window, ingests transfer
//! notifications from the watch provider, and credits confirmed deposits
//! (with the one-time bonus and the level-1 referral commission) to user
//! accounts. All state lives behind [`state::GatewayStateLock`] and is
//! snapshotted to the data directory.

pub mod chain;
pub mod config_models;
pub mod deposit_ingestor;
pub mod main_loop;
pub mod models;
pub mod notifier;
pub mod pool_manager;
pub mod rest_server;
pub mod state;
pub mod vault;

use std::sync::Arc;

use anyhow::Context;
use anyhow::Result;
use bip39::Language;
use bip39::Mnemonic;
use bip39::Seed;
use config_models::cli_args;
use tokio::net::TcpListener;
use tracing::error;
use tracing::info;
use zeroize::Zeroizing;

use crate::chain::ChainRegistry;
use crate::config_models::data_directory::DataDirectory;
use crate::deposit_ingestor::DepositIngestor;
use crate::main_loop::MainLoopHandler;
use crate::notifier::LogNotifier;
use crate::pool_manager::WalletPoolManager;
use crate::rest_server::run_rest_server;
use crate::rest_server::RestState;
use crate::state::storage;
use crate::state::storage::SnapshotStore;
use crate::state::GatewayState;
use crate::state::GatewayStateLock;
use crate::vault::KeyVault;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Bring the gateway up and hand back the main loop handler.
///
/// Order matters: key material and state restoration come first, the REST
/// listener is bound as late as possible so requests do not hang while
/// initialization code runs.
pub async fn initialize(cli_args: cli_args::Args) -> Result<MainLoopHandler> {
    info!("Starting deposit-gateway v{VERSION}.");

    // Get data directory (seed phrase, vault salt, state snapshot), create
    // one if none exists.
    let data_directory = DataDirectory::get(cli_args.data_dir.clone())?;
    DataDirectory::create_dir_if_not_exists(&data_directory.root_dir_path()).await?;
    info!("Data directory is {}", data_directory);

    // The HD seed: an explicit phrase from the environment wins, otherwise
    // the phrase file in the data directory (created on first run).
    let seed = match &cli_args.seed_phrase {
        Some(phrase) => {
            let mnemonic = Mnemonic::from_phrase(phrase.trim(), Language::English)
                .context("GATEWAY_SEED_PHRASE holds no valid BIP-39 phrase")?;
            Zeroizing::new(Seed::new(&mnemonic, "").as_bytes().to_vec())
        }
        None => storage::load_or_create_seed(&data_directory.seed_file_path())?,
    };

    let vault_salt = storage::load_or_create_vault_salt(&data_directory.vault_salt_file_path())?;
    // Argon2id over the operator secret. Deliberately slow; runs once.
    let vault = Arc::new(KeyVault::from_configured_secret(
        cli_args.vault_secret.as_deref(),
        &vault_salt,
    )?);

    let chains = Arc::new(ChainRegistry::dev(&seed));

    let snapshot_store = SnapshotStore::new(data_directory.snapshot_file_path());
    let state = match snapshot_store.load()? {
        Some(restored) => {
            info!(
                "Restored gateway state with {} pool wallet(s)",
                restored.wallet_pool.len()
            );
            restored
        }
        None => {
            info!("No state snapshot found, starting fresh");
            GatewayState::new()
        }
    };
    let snapshot = if cli_args.no_persist {
        None
    } else {
        Some(snapshot_store)
    };
    let state_lock = GatewayStateLock::new(state, cli_args.clone(), snapshot);

    let pool_manager = WalletPoolManager::new(state_lock.clone(), chains, vault);
    let ingestor = DepositIngestor::new(state_lock.clone(), Arc::new(LogNotifier));

    // Bind socket to port on this machine, to serve wallet requests and
    // webhook deliveries.
    let rest_socket_address = cli_args.rest_socket_address();
    let rest_listener = TcpListener::bind(rest_socket_address)
        .await
        .with_context(|| {
            format!(
                "Failed to bind to local TCP port {rest_socket_address}. \
                 Is an instance of this program already running?"
            )
        })?;
    info!("REST server listening on {rest_socket_address}");

    let mut task_handles = vec![];
    let rest_state = RestState {
        pool: pool_manager.clone(),
        ingestor,
    };
    let rest_join_handle = tokio::spawn(async move {
        if let Err(err) = run_rest_server(rest_listener, rest_state).await {
            error!("REST server stopped: {err:#}");
        }
    });
    task_handles.push(rest_join_handle);

    Ok(MainLoopHandler::new(state_lock, pool_manager, task_handles))
}
