//! `GatewayState` holds every table the gateway mutates, behind one
//! `tokio::sync::RwLock` handed around as [`GatewayStateLock`].
//!
//! The lock is the store: uniqueness checks (one lease per user and network,
//! one intent per on-chain txid, one wallet per address) and their dependent
//! writes run inside a single write-guard critical section, so they are
//! linearizable without any further coordination. Methods on `GatewayState`
//! are those critical sections; the tables' own mutators are `pub(super)` to
//! keep writes from bypassing them.
//!
//! Never call a chain client, the notifier, or the filesystem while holding a
//! guard. Persistence clones the state under a read guard and writes the
//! snapshot after the guard is dropped.

use std::sync::Arc;

use anyhow::Context;
use anyhow::Result;
use serde::Deserialize;
use serde::Serialize;
use tokio::sync::RwLock;
use tokio::sync::RwLockReadGuard;
use tokio::sync::RwLockWriteGuard;
use tracing::debug;
use tracing::warn;

use crate::config_models::cli_args;
use crate::config_models::network::Network;
use crate::models::account::Account;
use crate::models::amount::Amount;
use crate::models::ids::Address;
use crate::models::ids::AssetId;
use crate::models::ids::IntentId;
use crate::models::ids::OnchainTxId;
use crate::models::ids::UserId;
use crate::models::ids::WalletId;
use crate::models::timestamp::Timestamp;

use self::deposit_ledger::ConfirmedDeposit;
use self::deposit_ledger::DepositLedger;
use self::deposit_ledger::LedgerError;
use self::storage::SnapshotStore;
use self::wallet_pool::LeaseDecision;
use self::wallet_pool::LeaseReceipt;
use self::wallet_pool::PoolTableError;
use self::wallet_pool::WalletPool;

pub mod deposit_ledger;
pub mod storage;
pub mod wallet_pool;

/// What one reaper pass changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReapSummary {
    pub released: Vec<WalletId>,
    pub cancelled: Vec<IntentId>,
}

impl ReapSummary {
    pub fn is_empty(&self) -> bool {
        self.released.is_empty() && self.cancelled.is_empty()
    }
}

/// All shared mutable state of the gateway.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayState {
    pub wallet_pool: WalletPool,
    pub ledger: DepositLedger,
}

impl GatewayState {
    pub fn new() -> Self {
        Default::default()
    }

    // Wallet pool critical sections. Thin delegations: the table enforces
    // the invariants, this layer fixes the write granularity.

    pub fn lease_existing_or_available(
        &mut self,
        user: UserId,
        network: Network,
        ttl: Timestamp,
        now: Timestamp,
    ) -> LeaseDecision {
        self.wallet_pool
            .lease_existing_or_available(user, network, ttl, now)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn insert_derived_and_lease(
        &mut self,
        user: UserId,
        network: Network,
        address: Address,
        encrypted_key: Vec<u8>,
        derivation_index: u64,
        ttl: Timestamp,
        now: Timestamp,
    ) -> Result<LeaseReceipt, PoolTableError> {
        self.wallet_pool.insert_derived_and_lease(
            user,
            network,
            address,
            encrypted_key,
            derivation_index,
            ttl,
            now,
        )
    }

    pub fn release_wallet(&mut self, wallet_id: WalletId, now: Timestamp) -> bool {
        self.wallet_pool.release(wallet_id, now)
    }

    pub fn mark_wallet_used(&mut self, wallet_id: WalletId, now: Timestamp) -> bool {
        self.wallet_pool.mark_used(wallet_id, now)
    }

    pub fn set_watch_subscription(&mut self, wallet_id: WalletId, subscription: String) {
        self.wallet_pool
            .set_watch_subscription(wallet_id, subscription)
    }

    // Ledger critical sections.

    pub fn upsert_account(&mut self, account: Account) {
        self.ledger.upsert_account(account);
    }

    #[allow(clippy::too_many_arguments)]
    pub fn declare_intent(
        &mut self,
        owner: UserId,
        network: Network,
        address: Address,
        wallet_id: WalletId,
        expected_amount: Amount,
        expires_at: Option<Timestamp>,
        now: Timestamp,
    ) -> IntentId {
        self.ledger.declare_intent(
            owner,
            network,
            address,
            wallet_id,
            expected_amount,
            expires_at,
            now,
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn record_orphan_intent(
        &mut self,
        network: Network,
        address: Address,
        wallet_id: Option<WalletId>,
        amount: Amount,
        asset: AssetId,
        txid: OnchainTxId,
        now: Timestamp,
    ) -> Result<IntentId, LedgerError> {
        self.ledger
            .record_orphan_intent(network, address, wallet_id, amount, asset, txid, now)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn record_failed_deposit(
        &mut self,
        owner: UserId,
        network: Network,
        address: Address,
        wallet_id: Option<WalletId>,
        amount: Amount,
        asset: AssetId,
        txid: OnchainTxId,
        now: Timestamp,
    ) -> Result<IntentId, LedgerError> {
        self.ledger
            .record_failed_deposit(owner, network, address, wallet_id, amount, asset, txid, now)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn confirm_deposit(
        &mut self,
        owner: UserId,
        wallet_id: WalletId,
        network: Network,
        address: &Address,
        txid: &OnchainTxId,
        amount: Amount,
        asset: &AssetId,
        bonus_percent: u64,
        now: Timestamp,
    ) -> Result<ConfirmedDeposit, LedgerError> {
        self.ledger.confirm_deposit(
            owner,
            wallet_id,
            network,
            address,
            txid,
            amount,
            asset,
            bonus_percent,
            now,
        )
    }

    pub fn apply_referral_commission(
        &mut self,
        referrer: UserId,
        depositor: UserId,
        deposit_amount: Amount,
        percent: u64,
        reference: &OnchainTxId,
        now: Timestamp,
    ) -> Result<Option<Amount>, LedgerError> {
        self.ledger
            .apply_referral_commission(referrer, depositor, deposit_amount, percent, reference, now)
    }

    /// One reaper pass: release every lease whose expiry lies before `now`
    /// and cancel the expired `Pending` intents, all inside the caller's
    /// write guard. The expiry predicate is re-evaluated against each row at
    /// write time, so leases renewed since any earlier scan survive.
    pub fn reap_expired(&mut self, now: Timestamp) -> ReapSummary {
        let mut released = Vec::new();
        for wallet_id in self.wallet_pool.expired_leases(now) {
            if self.wallet_pool.release_if_expired(wallet_id, now) {
                released.push(wallet_id);
            }
        }
        let cancelled = self.ledger.cancel_expired_pending(now);
        ReapSummary {
            released,
            cancelled,
        }
    }
}

/// Clonable handle to the gateway state, its configuration, and the snapshot
/// store. Everything that touches shared state receives one of these.
#[derive(Debug, Clone)]
pub struct GatewayStateLock {
    state: Arc<RwLock<GatewayState>>,

    /// Read-only after startup, accessible without taking the lock.
    cli: cli_args::Args,

    snapshot: Option<SnapshotStore>,
}

impl GatewayStateLock {
    pub fn new(
        state: GatewayState,
        cli: cli_args::Args,
        snapshot: Option<SnapshotStore>,
    ) -> Self {
        Self {
            state: Arc::new(RwLock::new(state)),
            cli,
            snapshot,
        }
    }

    pub fn cli(&self) -> &cli_args::Args {
        &self.cli
    }

    pub async fn lock_guard(&self) -> RwLockReadGuard<'_, GatewayState> {
        self.state.read().await
    }

    pub async fn lock_guard_mut(&self) -> RwLockWriteGuard<'_, GatewayState> {
        self.state.write().await
    }

    /// Write the current state to the snapshot file, if one is configured.
    /// The state is cloned under a read guard; the file write happens with no
    /// guard held.
    pub async fn persist(&self) -> Result<()> {
        let Some(store) = self.snapshot.clone() else {
            debug!("No snapshot store configured; skipping persist");
            return Ok(());
        };
        let state = self.lock_guard().await.clone();
        tokio::task::spawn_blocking(move || store.save(&state))
            .await
            .context("snapshot writer task panicked")?
    }

    /// Persist, demoting failures to a warning. Used after routine
    /// operations where a failed snapshot must not fail the request.
    pub async fn persist_best_effort(&self) {
        if let Err(e) = self.persist().await {
            warn!("Failed to persist state snapshot: {e:#}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reap_is_one_critical_section() {
        let cli = cli_args::Args::default();
        let state_lock = GatewayStateLock::new(GatewayState::new(), cli, None);
        let now = Timestamp::millis(10_000);
        let ttl = Timestamp::hours(1);

        let (expired_wallet, fresh_wallet) = {
            let mut state = state_lock.lock_guard_mut().await;
            let expired = state
                .insert_derived_and_lease(
                    UserId(1),
                    Network::Bep20,
                    Address::new("0xold"),
                    vec![],
                    0,
                    ttl,
                    now,
                )
                .unwrap();
            let fresh = state
                .insert_derived_and_lease(
                    UserId(2),
                    Network::Bep20,
                    Address::new("0xnew"),
                    vec![],
                    1,
                    ttl + Timestamp::hours(5),
                    now,
                )
                .unwrap();
            state.declare_intent(
                UserId(1),
                Network::Bep20,
                Address::new("0xold"),
                expired.wallet_id,
                Amount::whole(10),
                Some(expired.expires_at),
                now,
            );
            (expired, fresh)
        };

        let after_expiry = expired_wallet.expires_at + Timestamp::minutes(1);
        let summary = state_lock.lock_guard_mut().await.reap_expired(after_expiry);

        assert_eq!(summary.released, vec![expired_wallet.wallet_id]);
        assert_eq!(summary.cancelled.len(), 1);

        let state = state_lock.lock_guard().await;
        assert!(state.wallet_pool.get(expired_wallet.wallet_id).unwrap().available);
        assert!(!state.wallet_pool.get(fresh_wallet.wallet_id).unwrap().available);
    }
}
