use serde::Deserialize;
use serde::Serialize;

use crate::config_models::network::Network;
use crate::models::ids::Address;
use crate::models::ids::UserId;
use crate::models::ids::WalletId;
use crate::models::timestamp::Timestamp;

/// A time-boxed assignment of a pool wallet to one user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub holder: UserId,
    pub leased_at: Timestamp,
    pub expires_at: Timestamp,
}

impl Lease {
    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.expires_at < now
    }
}

/// One derived receive-address in the pool, with its encrypted private key.
///
/// Rows are append-only: a wallet is never deleted, only cycled between
/// leased and available. `available` and `lease` are kept in lockstep
/// (`available` ⇔ `lease.is_none()`); all writers live in
/// [`crate::state::wallet_pool`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolWallet {
    pub wallet_id: WalletId,
    pub network: Network,

    /// Receive-address, unique across the pool and immutable for the row's
    /// lifetime.
    pub address: Address,

    /// Private key bytes sealed by the key vault. Only the sweep path ever
    /// opens this.
    pub encrypted_key: Vec<u8>,

    /// Index in the HD derivation sequence. Unique and strictly increasing
    /// per network.
    pub derivation_index: u64,

    /// Watch-provider subscription id, once registration has succeeded.
    /// Registration is best-effort and retried lazily on later leases.
    pub watch_subscription: Option<String>,

    pub lease: Option<Lease>,
    pub available: bool,

    pub deposit_count: u64,
    pub last_used_at: Timestamp,
    pub created_at: Timestamp,
}

impl PoolWallet {
    pub fn new(
        wallet_id: WalletId,
        network: Network,
        address: Address,
        encrypted_key: Vec<u8>,
        derivation_index: u64,
        now: Timestamp,
    ) -> Self {
        Self {
            wallet_id,
            network,
            address,
            encrypted_key,
            derivation_index,
            watch_subscription: None,
            lease: None,
            available: true,
            deposit_count: 0,
            last_used_at: now,
            created_at: now,
        }
    }

    /// The lease, if one exists and has not passed its expiry.
    pub fn active_lease(&self, now: Timestamp) -> Option<&Lease> {
        self.lease.as_ref().filter(|lease| !lease.is_expired(now))
    }

    /// The holder a deposit to this address is attributed to. Expiry does not
    /// matter here: as long as the lease has not been reaped, funds sent to
    /// the address belong to its holder.
    pub fn holder(&self) -> Option<UserId> {
        self.lease.as_ref().map(|lease| lease.holder)
    }
}
