//! Orchestrates the deposit wallet pool: leasing addresses to users, deriving
//! fresh wallets when the pool runs dry, and sweeping collected funds to the
//! treasury.
//!
//! Leasing is split into two critical sections with the HD derivation in
//! between, so the chain client is never called under the state lock. The
//! first section either satisfies the request from the pool or reserves a
//! derivation index; the second inserts the derived wallet and re-checks the
//! holder, so a user who won a lease during the derivation gets that lease
//! back and the new wallet is parked available. A failed derivation leaves a
//! gap in the index sequence, which is harmless.

use std::sync::Arc;

use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::chain::ChainError;
use crate::chain::ChainRegistry;
use crate::config_models::network::Network;
use crate::models::amount::Amount;
use crate::models::ids::Address;
use crate::models::ids::OnchainTxId;
use crate::models::ids::UserId;
use crate::models::ids::WalletId;
use crate::models::pool_wallet::PoolWallet;
use crate::models::timestamp::Timestamp;
use crate::state::wallet_pool::LeaseDecision;
use crate::state::wallet_pool::LeaseReceipt;
use crate::state::wallet_pool::PoolStats;
use crate::state::wallet_pool::PoolTableError;
use crate::state::GatewayStateLock;
use crate::state::ReapSummary;
use crate::vault::KeyVault;
use crate::vault::VaultError;

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum PoolError {
    /// The address computed by the chain client does not re-derive from the
    /// private key it came with. Persisting the wallet would strand every
    /// deposit sent to it, so nothing is stored.
    #[error(
        "derivation integrity failure at index {index}: derived {derived}, re-derived {rederived}"
    )]
    DerivationIntegrity {
        index: u64,
        derived: Address,
        rederived: Address,
    },

    #[error("no wallet with id {0}")]
    UnknownWallet(WalletId),

    #[error("wallet {0} holds no balance to sweep")]
    NothingToSweep(WalletId),

    #[error("no master address configured for network {0}")]
    NoMasterAddress(Network),

    #[error(transparent)]
    Vault(#[from] VaultError),

    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error(transparent)]
    Table(#[from] PoolTableError),
}

/// Result of a completed sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub wallet_id: WalletId,
    pub network: Network,
    pub from: Address,
    pub to: Address,
    pub amount: Amount,
    pub txid: OnchainTxId,
}

#[derive(Debug, Clone)]
pub struct WalletPoolManager {
    state: GatewayStateLock,
    chains: Arc<ChainRegistry>,
    vault: Arc<KeyVault>,
}

impl WalletPoolManager {
    pub fn new(state: GatewayStateLock, chains: Arc<ChainRegistry>, vault: Arc<KeyVault>) -> Self {
        Self {
            state,
            chains,
            vault,
        }
    }

    pub fn state(&self) -> &GatewayStateLock {
        &self.state
    }

    /// Return the deposit address `user` should pay into on `network`.
    ///
    /// At most one active lease exists per (user, network); concurrent calls
    /// for the same pair all come back with the same receipt. The wallet is
    /// the least recently used available one, or a freshly derived one when
    /// the pool is empty.
    pub async fn get_or_assign_wallet(
        &self,
        user: UserId,
        network: Network,
        now: Timestamp,
    ) -> Result<LeaseReceipt, PoolError> {
        let ttl = self.state.cli().lease_ttl_timestamp();

        // Fast path. A repeat caller inside the lease window only needs a
        // read guard.
        let held = {
            let state = self.state.lock_guard().await;
            state
                .wallet_pool
                .lease_held_by(user, network, now)
                .and_then(|wallet| {
                    wallet.active_lease(now).map(|lease| LeaseReceipt {
                        wallet_id: wallet.wallet_id,
                        network: wallet.network,
                        address: wallet.address.clone(),
                        leased_at: lease.leased_at,
                        expires_at: lease.expires_at,
                    })
                })
        };
        if let Some(receipt) = held {
            self.ensure_watch_subscription(&receipt).await;
            return Ok(receipt);
        }

        let decision = self
            .state
            .lock_guard_mut()
            .await
            .lease_existing_or_available(user, network, ttl, now);

        let receipt = match decision {
            LeaseDecision::Existing(receipt) => receipt,
            LeaseDecision::Leased(receipt) => {
                info!(
                    "Leased pool wallet {} ({}) to {user} until {}",
                    receipt.wallet_id, receipt.address, receipt.expires_at
                );
                self.state.persist_best_effort().await;
                receipt
            }
            LeaseDecision::MustDerive { derivation_index } => {
                let receipt = self
                    .derive_and_insert(user, network, derivation_index, ttl, now)
                    .await?;
                self.state.persist_best_effort().await;
                receipt
            }
        };

        self.ensure_watch_subscription(&receipt).await;
        Ok(receipt)
    }

    /// Derive the wallet for a reserved index, verify the derivation, seal the
    /// key, and insert. Runs with no guard held except inside
    /// `insert_derived_and_lease`.
    async fn derive_and_insert(
        &self,
        user: UserId,
        network: Network,
        derivation_index: u64,
        ttl: Timestamp,
        now: Timestamp,
    ) -> Result<LeaseReceipt, PoolError> {
        let chain = self.chains.client_for(network)?;
        let derived = chain.derive_keypair(derivation_index).await?;

        // The address must re-derive from the private key alone before
        // anything is persisted. A mismatch means funds sent to the address
        // could never be swept.
        let rederived = chain.address_for_key(&derived.private_key)?;
        if rederived != derived.address {
            error!(
                "Derivation integrity failure on {network} at index {derivation_index}: \
                 derived {} but re-derived {rederived}. Wallet not persisted.",
                derived.address
            );
            return Err(PoolError::DerivationIntegrity {
                index: derivation_index,
                derived: derived.address,
                rederived,
            });
        }

        let encrypted_key = self.vault.seal_key(&derived.private_key)?;

        let receipt = self.state.lock_guard_mut().await.insert_derived_and_lease(
            user,
            network,
            derived.address.clone(),
            encrypted_key,
            derivation_index,
            ttl,
            now,
        )?;

        if receipt.address == derived.address {
            info!(
                "Derived fresh {network} pool wallet {} at index {derivation_index}: {}",
                receipt.wallet_id, receipt.address
            );
        } else {
            // The user won another lease while the key was being derived; the
            // fresh wallet was parked available for later rotation.
            debug!(
                "Parked freshly derived {network} wallet {} for later use",
                derived.address
            );
        }
        Ok(receipt)
    }

    /// Register the wallet with the watch provider if it has no subscription
    /// yet. Best-effort: failures are logged and retried on the next access.
    async fn ensure_watch_subscription(&self, receipt: &LeaseReceipt) {
        let callback_url = self.state.cli().watch_callback_url.clone();
        if callback_url.is_empty() {
            return;
        }

        let needs_subscription = {
            let state = self.state.lock_guard().await;
            state
                .wallet_pool
                .get(receipt.wallet_id)
                .is_some_and(|wallet| wallet.watch_subscription.is_none())
        };
        if !needs_subscription {
            return;
        }

        let chain = match self.chains.client_for(receipt.network) {
            Ok(chain) => chain,
            Err(e) => {
                warn!("Cannot register watch for {}: {e}", receipt.address);
                return;
            }
        };
        match chain.subscribe_address(&receipt.address, &callback_url).await {
            Ok(subscription) => {
                debug!(
                    "Registered watch subscription {subscription} for {}",
                    receipt.address
                );
                self.state
                    .lock_guard_mut()
                    .await
                    .set_watch_subscription(receipt.wallet_id, subscription);
            }
            Err(e) => {
                warn!(
                    "Watch subscription for {} failed: {e}. Will retry on next access.",
                    receipt.address
                );
            }
        }
    }

    /// Clear the lease and return the wallet to rotation.
    pub async fn release_wallet(&self, wallet_id: WalletId, now: Timestamp) -> bool {
        let released = self.state.lock_guard_mut().await.release_wallet(wallet_id, now);
        if released {
            info!("Released pool wallet {wallet_id}");
            self.state.persist_best_effort().await;
        }
        released
    }

    /// Bump usage counters after a confirmed deposit. Keeps the lease.
    pub async fn mark_wallet_used(&self, wallet_id: WalletId, now: Timestamp) -> bool {
        self.state.lock_guard_mut().await.mark_wallet_used(wallet_id, now)
    }

    pub async fn find_wallet_by_address(&self, address: &Address) -> Option<PoolWallet> {
        self.state
            .lock_guard()
            .await
            .wallet_pool
            .by_address(address)
            .cloned()
    }

    pub async fn pool_stats(&self) -> PoolStats {
        self.state.lock_guard().await.wallet_pool.stats()
    }

    /// On-chain balance of the network's primary asset for a pool wallet.
    pub async fn wallet_balance(&self, wallet_id: WalletId) -> Result<Amount, PoolError> {
        let (network, address) = self.wallet_coordinates(wallet_id).await?;
        let chain = self.chains.client_for(network)?;
        Ok(chain.token_balance(&address, network.primary_asset()).await?)
    }

    /// Move a wallet's entire primary-asset balance to the configured master
    /// address. Fails closed: no master address or an empty wallet is an
    /// error and nothing is signed.
    pub async fn sweep_to_master(&self, wallet_id: WalletId) -> Result<SweepReport, PoolError> {
        let (network, address, encrypted_key) = {
            let state = self.state.lock_guard().await;
            let wallet = state
                .wallet_pool
                .get(wallet_id)
                .ok_or(PoolError::UnknownWallet(wallet_id))?;
            (
                wallet.network,
                wallet.address.clone(),
                wallet.encrypted_key.clone(),
            )
        };

        let master = self
            .state
            .cli()
            .master_address_for(network)
            .cloned()
            .ok_or(PoolError::NoMasterAddress(network))?;

        let chain = self.chains.client_for(network)?;
        let balance = chain
            .token_balance(&address, network.primary_asset())
            .await?;
        if balance.is_zero() {
            return Err(PoolError::NothingToSweep(wallet_id));
        }

        let private_key = self.vault.open_key(&encrypted_key)?;
        let txid = chain
            .send_token(&private_key, &master, balance, network.primary_asset())
            .await?;

        info!("Swept {balance} {} from wallet {wallet_id} ({address}) to {master}. txid: {txid}",
            network.primary_asset());

        Ok(SweepReport {
            wallet_id,
            network,
            from: address,
            to: master,
            amount: balance,
            txid,
        })
    }

    /// One reaper pass over leases and pending intents.
    pub async fn reap_expired_leases(&self, now: Timestamp) -> ReapSummary {
        let summary = self.state.lock_guard_mut().await.reap_expired(now);
        if !summary.is_empty() {
            info!(
                "Expiry reaper released {} wallet(s), cancelled {} intent(s)",
                summary.released.len(),
                summary.cancelled.len()
            );
            self.state.persist_best_effort().await;
        }
        summary
    }

    async fn wallet_coordinates(
        &self,
        wallet_id: WalletId,
    ) -> Result<(Network, Address), PoolError> {
        let state = self.state.lock_guard().await;
        let wallet = state
            .wallet_pool
            .get(wallet_id)
            .ok_or(PoolError::UnknownWallet(wallet_id))?;
        Ok((wallet.network, wallet.address.clone()))
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;
    use zeroize::Zeroizing;

    use super::*;
    use crate::chain::ChainClient;
    use crate::chain::DevChain;
    use crate::config_models::cli_args;
    use crate::state::GatewayState;

    const MASTER: &str = "0x00112233445566778899aabbccddeeff00112233";

    fn manager_with_args(args: cli_args::Args) -> (WalletPoolManager, Arc<DevChain>) {
        let seed = [13u8; 64];
        let bep = Arc::new(DevChain::new(Network::Bep20, &seed));
        let trc = Arc::new(DevChain::new(Network::Trc20, &seed));
        let registry = ChainRegistry::new([
            bep.clone() as Arc<dyn ChainClient>,
            trc as Arc<dyn ChainClient>,
        ]);
        let state = GatewayStateLock::new(GatewayState::new(), args, None);
        let vault =
            Arc::new(KeyVault::from_master_key(Zeroizing::new([7u8; 32])).unwrap());
        (
            WalletPoolManager::new(state, Arc::new(registry), vault),
            bep,
        )
    }

    fn manager() -> (WalletPoolManager, Arc<DevChain>) {
        manager_with_args(cli_args::Args::default())
    }

    #[tokio::test]
    async fn repeat_calls_return_the_same_receipt() {
        let (manager, _) = manager();
        let now = Timestamp::millis(1_000);

        let first = manager
            .get_or_assign_wallet(UserId(1), Network::Bep20, now)
            .await
            .unwrap();
        let second = manager
            .get_or_assign_wallet(UserId(1), Network::Bep20, now + Timestamp::minutes(10))
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(1, manager.state.lock_guard().await.wallet_pool.len());
    }

    #[tokio::test]
    async fn distinct_users_get_distinct_addresses() {
        let (manager, _) = manager();
        let now = Timestamp::millis(1_000);

        let a = manager
            .get_or_assign_wallet(UserId(1), Network::Bep20, now)
            .await
            .unwrap();
        let b = manager
            .get_or_assign_wallet(UserId(2), Network::Bep20, now)
            .await
            .unwrap();

        assert_ne!(a.address, b.address);
        assert_ne!(a.wallet_id, b.wallet_id);
    }

    #[tokio::test]
    async fn released_wallet_is_recycled_before_deriving() {
        let (manager, _) = manager();
        let now = Timestamp::millis(1_000);

        let first = manager
            .get_or_assign_wallet(UserId(1), Network::Bep20, now)
            .await
            .unwrap();
        assert!(manager.release_wallet(first.wallet_id, now + Timestamp::minutes(5)).await);

        let second = manager
            .get_or_assign_wallet(UserId(2), Network::Bep20, now + Timestamp::minutes(6))
            .await
            .unwrap();

        assert_eq!(first.wallet_id, second.wallet_id);
        assert_eq!(1, manager.state.lock_guard().await.wallet_pool.len());
    }

    #[tokio::test]
    async fn corrupted_derivation_persists_nothing() {
        let (manager, bep) = manager();
        let now = Timestamp::millis(1_000);

        bep.corrupt_next_derivation();
        let result = manager
            .get_or_assign_wallet(UserId(1), Network::Bep20, now)
            .await;
        assert!(matches!(
            result,
            Err(PoolError::DerivationIntegrity { index: 0, .. })
        ));
        assert!(manager.state.lock_guard().await.wallet_pool.is_empty());

        // corruption is one-shot; the retry derives a clean wallet at the
        // next index
        let receipt = manager
            .get_or_assign_wallet(UserId(1), Network::Bep20, now)
            .await
            .unwrap();
        let state = manager.state.lock_guard().await;
        let wallet = state.wallet_pool.get(receipt.wallet_id).unwrap();
        assert_eq!(1, wallet.derivation_index);
    }

    #[tokio::test]
    async fn subscription_outage_is_not_fatal_and_retries_lazily() {
        let (manager, bep) = manager();
        let now = Timestamp::millis(1_000);

        bep.set_fail_subscriptions(true);
        let receipt = manager
            .get_or_assign_wallet(UserId(1), Network::Bep20, now)
            .await
            .unwrap();
        {
            let state = manager.state.lock_guard().await;
            let wallet = state.wallet_pool.get(receipt.wallet_id).unwrap();
            assert!(wallet.watch_subscription.is_none());
        }

        bep.set_fail_subscriptions(false);
        manager
            .get_or_assign_wallet(UserId(1), Network::Bep20, now + Timestamp::minutes(1))
            .await
            .unwrap();
        let state = manager.state.lock_guard().await;
        let wallet = state.wallet_pool.get(receipt.wallet_id).unwrap();
        assert!(wallet.watch_subscription.is_some());
        assert_eq!(1, bep.subscription_count().await);
    }

    #[tokio::test]
    async fn sweep_moves_the_full_balance_to_master() {
        let master_arg = format!("bep20={MASTER}");
        let args = cli_args::Args::parse_from([
            "deposit-gateway",
            "--master-address",
            master_arg.as_str(),
        ]);
        let (manager, bep) = manager_with_args(args);
        let now = Timestamp::millis(1_000);

        let receipt = manager
            .get_or_assign_wallet(UserId(1), Network::Bep20, now)
            .await
            .unwrap();
        bep.fund_token(&receipt.address, "USDT", Amount::whole(250)).await;

        let report = manager.sweep_to_master(receipt.wallet_id).await.unwrap();
        assert_eq!(Amount::whole(250), report.amount);
        assert_eq!(MASTER, report.to.as_str());

        let master_balance = bep
            .token_balance(&Address::new(MASTER), "USDT")
            .await
            .unwrap();
        assert_eq!(Amount::whole(250), master_balance);
        assert_eq!(
            Amount::zero(),
            manager.wallet_balance(receipt.wallet_id).await.unwrap()
        );
    }

    #[tokio::test]
    async fn sweep_fails_closed_on_empty_wallet_and_missing_master() {
        let (manager, _) = manager();
        let now = Timestamp::millis(1_000);
        let receipt = manager
            .get_or_assign_wallet(UserId(1), Network::Bep20, now)
            .await
            .unwrap();

        // no master address configured at all
        let result = manager.sweep_to_master(receipt.wallet_id).await;
        assert!(matches!(result, Err(PoolError::NoMasterAddress(_))));

        let master_arg = format!("bep20={MASTER}");
        let args = cli_args::Args::parse_from([
            "deposit-gateway",
            "--master-address",
            master_arg.as_str(),
        ]);
        let (manager, _) = manager_with_args(args);
        let receipt = manager
            .get_or_assign_wallet(UserId(1), Network::Bep20, now)
            .await
            .unwrap();
        let result = manager.sweep_to_master(receipt.wallet_id).await;
        assert!(matches!(result, Err(PoolError::NothingToSweep(_))));
    }

    #[tokio::test]
    async fn reaper_releases_only_expired_leases() {
        let (manager, _) = manager();
        let now = Timestamp::millis(1_000);

        let expired = manager
            .get_or_assign_wallet(UserId(1), Network::Bep20, now)
            .await
            .unwrap();
        let late = now + Timestamp::minutes(50);
        let fresh = manager
            .get_or_assign_wallet(UserId(2), Network::Bep20, late)
            .await
            .unwrap();

        let at = expired.expires_at + Timestamp::minutes(1);
        let summary = manager.reap_expired_leases(at).await;

        assert_eq!(vec![expired.wallet_id], summary.released);
        let state = manager.state.lock_guard().await;
        assert!(state.wallet_pool.get(expired.wallet_id).unwrap().available);
        assert!(!state.wallet_pool.get(fresh.wallet_id).unwrap().available);
    }
}
