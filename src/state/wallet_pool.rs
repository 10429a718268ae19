//! The deposit wallet pool table.
//!
//! Maintains a mapping `wallets` between wallet ids and [`PoolWallet`] rows,
//! plus an `address_index` for the ingestor's reverse lookups and a per-network
//! high-water mark of derivation indexes. Selection follows least-recently-used
//! order on `last_used_at` so addresses cycle through the whole pool instead of
//! hammering the newest one.
//!
//! All mutating methods are `pub(super)`: every write goes through
//! [`super::GatewayState`], which is what makes each state transition a single
//! critical section under the gateway lock.

use std::collections::HashMap;

use itertools::Itertools;
use serde::Deserialize;
use serde::Serialize;
use tracing::warn;

use crate::config_models::network::Network;
use crate::models::ids::Address;
use crate::models::ids::UserId;
use crate::models::ids::WalletId;
use crate::models::pool_wallet::Lease;
use crate::models::pool_wallet::PoolWallet;
use crate::models::timestamp::Timestamp;

/// What a caller gets back from a successful lease operation. Identical for
/// every concurrent caller of the same (user, network) window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseReceipt {
    pub wallet_id: WalletId,
    pub network: Network,
    pub address: Address,
    pub leased_at: Timestamp,
    pub expires_at: Timestamp,
}

/// Outcome of the first critical section of a lease request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaseDecision {
    /// The user already holds an active lease; nothing changed.
    Existing(LeaseReceipt),

    /// An available wallet was leased to the user in this call.
    Leased(LeaseReceipt),

    /// No wallet was available. The derivation index was reserved; the caller
    /// must derive a key pair outside the lock and come back through
    /// [`super::GatewayState::insert_derived_and_lease`].
    MustDerive { derivation_index: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct NetworkPoolStats {
    pub network: Network,
    pub total: usize,
    pub available: usize,
    pub leased: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub total: usize,
    pub available: usize,
    pub leased: usize,
    pub networks: Vec<NetworkPoolStats>,
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum PoolTableError {
    #[error("address {0} already exists in the pool")]
    AddressCollision(Address),

    #[error("no wallet with id {0}")]
    UnknownWallet(WalletId),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WalletPool {
    wallets: HashMap<WalletId, PoolWallet>,
    address_index: HashMap<Address, WalletId>,
    next_wallet_id: u64,
    next_derivation_index: HashMap<Network, u64>,
}

impl WalletPool {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn len(&self) -> usize {
        self.wallets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wallets.is_empty()
    }

    pub fn get(&self, wallet_id: WalletId) -> Option<&PoolWallet> {
        self.wallets.get(&wallet_id)
    }

    pub fn by_address(&self, address: &Address) -> Option<&PoolWallet> {
        self.address_index
            .get(address)
            .and_then(|id| self.wallets.get(id))
    }

    /// The wallet `user` holds an unexpired lease on for `network`, if any.
    pub fn lease_held_by(
        &self,
        user: UserId,
        network: Network,
        now: Timestamp,
    ) -> Option<&PoolWallet> {
        self.wallets.values().find(|wallet| {
            wallet.network == network
                && wallet
                    .active_lease(now)
                    .is_some_and(|lease| lease.holder == user)
        })
    }

    pub fn stats(&self) -> PoolStats {
        use strum::IntoEnumIterator;

        let per_network = |network: Network| {
            let rows = self.wallets.values().filter(|w| w.network == network);
            let (mut total, mut available) = (0, 0);
            for wallet in rows {
                total += 1;
                if wallet.available {
                    available += 1;
                }
            }
            NetworkPoolStats {
                network,
                total,
                available,
                leased: total - available,
            }
        };

        let networks: Vec<_> = Network::iter().map(per_network).collect();
        let total = self.wallets.len();
        let available = networks.iter().map(|n| n.available).sum();
        PoolStats {
            total,
            available,
            leased: total - available,
            networks,
        }
    }

    /// Wallet ids whose lease expiry lies before `now`, oldest wallet first.
    pub fn expired_leases(&self, now: Timestamp) -> Vec<WalletId> {
        self.wallets
            .values()
            .filter(|wallet| {
                wallet
                    .lease
                    .as_ref()
                    .is_some_and(|lease| lease.is_expired(now))
            })
            .map(|wallet| wallet.wallet_id)
            .sorted()
            .collect_vec()
    }

    fn receipt_for(wallet: &PoolWallet, lease: &Lease) -> LeaseReceipt {
        LeaseReceipt {
            wallet_id: wallet.wallet_id,
            network: wallet.network,
            address: wallet.address.clone(),
            leased_at: lease.leased_at,
            expires_at: lease.expires_at,
        }
    }

    /// First critical section of a lease request: return the holder's
    /// existing lease, else lease the least-recently-used available wallet,
    /// else reserve the next derivation index for the caller.
    pub(super) fn lease_existing_or_available(
        &mut self,
        user: UserId,
        network: Network,
        ttl: Timestamp,
        now: Timestamp,
    ) -> LeaseDecision {
        if let Some(wallet) = self.lease_held_by(user, network, now) {
            let lease = wallet.lease.as_ref().expect("lease checked above");
            return LeaseDecision::Existing(Self::receipt_for(wallet, lease));
        }

        let lru_available = self
            .wallets
            .values()
            .filter(|wallet| wallet.available && wallet.network == network)
            .min_by_key(|wallet| (wallet.last_used_at, wallet.wallet_id))
            .map(|wallet| wallet.wallet_id);

        if let Some(wallet_id) = lru_available {
            let wallet = self
                .wallets
                .get_mut(&wallet_id)
                .expect("id taken from the table");
            let lease = Lease {
                holder: user,
                leased_at: now,
                expires_at: now + ttl,
            };
            wallet.lease = Some(lease);
            wallet.available = false;
            wallet.last_used_at = now;
            self.debug_check_invariants();
            return LeaseDecision::Leased(Self::receipt_for(
                self.wallets.get(&wallet_id).expect("still present"),
                &lease,
            ));
        }

        let index = self.next_derivation_index.entry(network).or_insert(0);
        let derivation_index = *index;
        *index += 1;
        LeaseDecision::MustDerive { derivation_index }
    }

    /// Second critical section of a lease request: insert the freshly derived
    /// wallet. If the user won a lease elsewhere while the key was being
    /// derived, the new wallet is parked available and the existing receipt is
    /// returned; nothing is ever double-leased and no derived key is dropped.
    pub(super) fn insert_derived_and_lease(
        &mut self,
        user: UserId,
        network: Network,
        address: Address,
        encrypted_key: Vec<u8>,
        derivation_index: u64,
        ttl: Timestamp,
        now: Timestamp,
    ) -> Result<LeaseReceipt, PoolTableError> {
        if self.address_index.contains_key(&address) {
            return Err(PoolTableError::AddressCollision(address));
        }

        self.next_wallet_id += 1;
        let wallet_id = WalletId(self.next_wallet_id);
        let mut wallet = PoolWallet::new(
            wallet_id,
            network,
            address.clone(),
            encrypted_key,
            derivation_index,
            now,
        );

        let existing = self
            .lease_held_by(user, network, now)
            .map(|held| {
                let lease = held.lease.as_ref().expect("lease checked above");
                Self::receipt_for(held, lease)
            });

        let receipt = match existing {
            Some(receipt) => receipt,
            None => {
                let lease = Lease {
                    holder: user,
                    leased_at: now,
                    expires_at: now + ttl,
                };
                wallet.lease = Some(lease);
                wallet.available = false;
                Self::receipt_for(&wallet, &lease)
            }
        };

        self.address_index.insert(address, wallet_id);
        self.wallets.insert(wallet_id, wallet);
        self.debug_check_invariants();
        Ok(receipt)
    }

    /// Clear the lease and return the wallet to rotation.
    pub(super) fn release(&mut self, wallet_id: WalletId, now: Timestamp) -> bool {
        let Some(wallet) = self.wallets.get_mut(&wallet_id) else {
            warn!("Release of unknown wallet {wallet_id}. Ignoring.");
            return false;
        };
        if wallet.lease.is_none() {
            return false;
        }
        wallet.lease = None;
        wallet.available = true;
        wallet.last_used_at = now;
        self.debug_check_invariants();
        true
    }

    /// Release only if the lease expiry still lies before `now`. The reaper
    /// goes through this so a lease renewed after its scan is left alone.
    pub(super) fn release_if_expired(&mut self, wallet_id: WalletId, now: Timestamp) -> bool {
        let expired = self
            .wallets
            .get(&wallet_id)
            .and_then(|wallet| wallet.lease.as_ref())
            .is_some_and(|lease| lease.is_expired(now));
        if expired {
            self.release(wallet_id, now)
        } else {
            false
        }
    }

    /// Bump usage counters after a confirmed deposit. Keeps the lease: a
    /// wallet may receive several deposits within one window.
    pub(super) fn mark_used(&mut self, wallet_id: WalletId, now: Timestamp) -> bool {
        let Some(wallet) = self.wallets.get_mut(&wallet_id) else {
            warn!("Usage mark for unknown wallet {wallet_id}. Ignoring.");
            return false;
        };
        wallet.deposit_count += 1;
        wallet.last_used_at = now;
        true
    }

    pub(super) fn set_watch_subscription(&mut self, wallet_id: WalletId, subscription: String) {
        if let Some(wallet) = self.wallets.get_mut(&wallet_id) {
            wallet.watch_subscription = Some(subscription);
        }
    }

    fn debug_check_invariants(&self) {
        debug_assert_eq!(self.wallets.len(), self.address_index.len());
        debug_assert!(self
            .wallets
            .values()
            .all(|wallet| wallet.available == wallet.lease.is_none()));
    }
}
