use serde::Deserialize;
use serde::Serialize;

use crate::models::amount::Amount;
use crate::models::ids::OnchainTxId;
use crate::models::ids::UserId;
use crate::models::timestamp::Timestamp;

/// What a ledger row credits. Stored as a column of its own so one-time
/// checks (first deposit bonus, per-depositor referral commission) are plain
/// equality scans instead of free-text matching.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::EnumIs,
)]
pub enum TransactionKind {
    Deposit,
    DepositBonus,
    ReferralCommission,
}

/// Append-only record of one balance credit. Never updated, never deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub record_id: u64,
    pub owner: UserId,
    pub kind: TransactionKind,
    pub amount: Amount,

    /// The user whose action caused this credit, where that is not `owner`.
    /// Set for referral commissions (the depositor).
    pub source_user: Option<UserId>,

    /// On-chain transaction the credit traces back to, where one exists.
    pub reference: Option<OnchainTxId>,

    /// Human-readable line for statements. Display only; no logic reads it.
    pub note: String,

    pub created_at: Timestamp,
}
