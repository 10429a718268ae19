use serde::Deserialize;
use serde::Serialize;

use crate::models::amount::Amount;
use crate::models::ids::UserId;
use crate::models::timestamp::Timestamp;

/// The slice of a platform account the gateway reads and mutates.
///
/// Account lifecycle (registration, authentication, profile) is owned by
/// other services; rows arrive here through
/// [`crate::state::GatewayState::upsert_account`]. The gateway only credits
/// `balance`/`total_deposited` and walks `referred_by`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub user_id: UserId,
    pub email: String,

    /// Direct referrer, if the account was registered through a referral
    /// link. Weak reference; the referrer's row may be absent.
    pub referred_by: Option<UserId>,

    pub balance: Amount,

    /// Lifetime sum of raw confirmed deposit amounts, bonuses excluded.
    pub total_deposited: Amount,

    pub created_at: Timestamp,
}

impl Account {
    pub fn new(user_id: UserId, email: impl Into<String>, now: Timestamp) -> Self {
        Self {
            user_id,
            email: email.into(),
            referred_by: None,
            balance: Amount::zero(),
            total_deposited: Amount::zero(),
            created_at: now,
        }
    }

    pub fn with_referrer(mut self, referrer: UserId) -> Self {
        self.referred_by = Some(referrer);
        self
    }
}
