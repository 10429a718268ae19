use serde::Deserialize;
use serde::Serialize;

use crate::config_models::network::Network;
use crate::models::amount::Amount;
use crate::models::ids::Address;
use crate::models::ids::AssetId;
use crate::models::ids::IntentId;
use crate::models::ids::OnchainTxId;
use crate::models::ids::UserId;
use crate::models::ids::WalletId;
use crate::models::timestamp::Timestamp;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumIs,
)]
pub enum DepositStatus {
    /// Declared or observed, not yet credited.
    Pending,

    /// Credited to the owner's balance. Terminal.
    Confirmed,

    /// Rejected by validation (wrong asset). Terminal; kept for support
    /// visibility.
    Failed,

    /// Abandoned by the expiry reaper before any funds arrived. Terminal.
    Cancelled,
}

/// One expected or observed deposit.
///
/// An intent is created `Pending` when a user declares an expected deposit at
/// address-request time, or created directly in a terminal state when a
/// webhook arrives with no prior declaration. `onchain_txid` is set at most
/// once and is globally unique across all intents; the store's txid index
/// enforces this and gives webhook redelivery its idempotency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositIntent {
    pub intent_id: IntentId,

    /// `None` only for orphan rows: transfers observed on a pool address
    /// that had no lease holder. Kept for support reconciliation.
    pub owner: Option<UserId>,

    pub network: Network,
    pub address: Address,

    /// The pool wallet behind `address`, when it was resolvable at creation.
    pub wallet_id: Option<WalletId>,

    /// Expected amount while `Pending`; the on-chain amount once the intent
    /// is settled by a webhook.
    pub amount: Amount,
    pub asset: AssetId,

    pub onchain_txid: Option<OnchainTxId>,
    pub status: DepositStatus,

    /// One-time bonus granted with this deposit, zero for all but the
    /// owner's first confirmed deposit.
    pub bonus: Amount,

    /// Inherited from the lease active at declaration time. The reaper
    /// cancels `Pending` intents past this point.
    pub expires_at: Option<Timestamp>,

    pub confirmed_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl DepositIntent {
    pub fn expired(&self, now: Timestamp) -> bool {
        self.expires_at.is_some_and(|expiry| expiry < now)
    }
}
