//! The deposit ledger: intents, append-only transaction records, and the
//! account slices they credit.
//!
//! The txid index doubles as the idempotency barrier for at-least-once
//! webhook delivery: an on-chain transaction id can be attached to exactly one
//! intent, ever. Every mutating method runs its checks before its first write,
//! so a returned error means the ledger is untouched.
//!
//! Mutating methods are `pub(super)` and reachable only through
//! [`super::GatewayState`], which runs each of them inside one write-lock
//! critical section.

use std::collections::HashMap;
use std::collections::HashSet;

use itertools::Itertools;
use serde::Deserialize;
use serde::Serialize;

use crate::config_models::network::Network;
use crate::models::account::Account;
use crate::models::amount::Amount;
use crate::models::deposit_intent::DepositIntent;
use crate::models::deposit_intent::DepositStatus;
use crate::models::ids::Address;
use crate::models::ids::AssetId;
use crate::models::ids::IntentId;
use crate::models::ids::OnchainTxId;
use crate::models::ids::UserId;
use crate::models::ids::WalletId;
use crate::models::timestamp::Timestamp;
use crate::models::transaction_record::TransactionKind;
use crate::models::transaction_record::TransactionRecord;

/// How far up the `referred_by` chain any traversal may walk.
pub const REFERRAL_MAX_DEPTH: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum LedgerError {
    #[error("transaction id {0} already recorded")]
    DuplicateTxId(OnchainTxId),

    #[error("no account row for {0}")]
    MissingAccount(UserId),

    #[error("balance overflow crediting {0}")]
    BalanceOverflow(UserId),
}

/// Everything a confirmed deposit changed, for logging and side effects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmedDeposit {
    pub intent_id: IntentId,
    pub owner: UserId,

    /// Raw on-chain amount.
    pub amount: Amount,

    /// One-time bonus granted with this deposit, zero if already consumed.
    pub bonus: Amount,

    /// `amount + bonus`, the balance delta.
    pub credited: Amount,

    pub new_balance: Amount,

    /// Whether a previously declared `Pending` intent was adopted rather
    /// than a new row created.
    pub adopted_declared_intent: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DepositLedger {
    intents: HashMap<IntentId, DepositIntent>,
    txid_index: HashMap<OnchainTxId, IntentId>,
    records: Vec<TransactionRecord>,
    accounts: HashMap<UserId, Account>,
    next_intent_id: u64,
    next_record_id: u64,
}

impl DepositLedger {
    pub fn new() -> Self {
        Default::default()
    }

    // reads

    pub fn account(&self, user: UserId) -> Option<&Account> {
        self.accounts.get(&user)
    }

    pub fn intent(&self, intent_id: IntentId) -> Option<&DepositIntent> {
        self.intents.get(&intent_id)
    }

    pub fn txid_known(&self, txid: &OnchainTxId) -> bool {
        self.txid_index.contains_key(txid)
    }

    /// All intents owned by `user`, oldest first.
    pub fn intents_for(&self, user: UserId) -> Vec<&DepositIntent> {
        self.intents
            .values()
            .filter(|intent| intent.owner == Some(user))
            .sorted_by_key(|intent| intent.intent_id)
            .collect_vec()
    }

    /// All records credited to `user`, oldest first.
    pub fn records_for(&self, user: UserId) -> Vec<&TransactionRecord> {
        self.records
            .iter()
            .filter(|record| record.owner == user)
            .collect_vec()
    }

    /// Whether `user` has ever been granted the one-time deposit bonus.
    pub fn has_deposit_bonus(&self, user: UserId) -> bool {
        self.records
            .iter()
            .any(|record| record.owner == user && record.kind.is_deposit_bonus())
    }

    /// Walk the `referred_by` chain upward from `user`, at most `max_depth`
    /// steps, stopping on a cycle or a dangling reference. The commission
    /// path only ever credits the first entry; deeper entries exist for
    /// reporting.
    pub fn referrer_chain(&self, user: UserId, max_depth: usize) -> Vec<UserId> {
        let mut chain = Vec::new();
        let mut visited = HashSet::from([user]);
        let mut current = user;

        while chain.len() < max_depth.min(REFERRAL_MAX_DEPTH) {
            let Some(referrer) = self
                .accounts
                .get(&current)
                .and_then(|account| account.referred_by)
            else {
                break;
            };
            if !visited.insert(referrer) {
                break;
            }
            chain.push(referrer);
            current = referrer;
        }
        chain
    }

    /// `Pending` intents whose own expiry lies before `now`, oldest first.
    pub fn expired_pending_intents(&self, now: Timestamp) -> Vec<IntentId> {
        self.intents
            .values()
            .filter(|intent| intent.status.is_pending() && intent.expired(now))
            .map(|intent| intent.intent_id)
            .sorted()
            .collect_vec()
    }

    // writes, all pub(super)

    pub(super) fn upsert_account(&mut self, account: Account) {
        self.accounts.insert(account.user_id, account);
    }

    /// Record a user-declared expected deposit.
    pub(super) fn declare_intent(
        &mut self,
        owner: UserId,
        network: Network,
        address: Address,
        wallet_id: WalletId,
        expected_amount: Amount,
        expires_at: Option<Timestamp>,
        now: Timestamp,
    ) -> IntentId {
        let intent_id = self.fresh_intent_id();
        self.intents.insert(
            intent_id,
            DepositIntent {
                intent_id,
                owner: Some(owner),
                network,
                address,
                wallet_id: Some(wallet_id),
                amount: expected_amount,
                asset: AssetId::new(network.primary_asset()),
                onchain_txid: None,
                status: DepositStatus::Pending,
                bonus: Amount::zero(),
                expires_at,
                confirmed_at: None,
                created_at: now,
                updated_at: now,
            },
        );
        intent_id
    }

    /// Record a transfer to a pool address that had no lease holder. No
    /// account is touched; the row exists so support can reconcile it.
    pub(super) fn record_orphan_intent(
        &mut self,
        network: Network,
        address: Address,
        wallet_id: Option<WalletId>,
        amount: Amount,
        asset: AssetId,
        txid: OnchainTxId,
        now: Timestamp,
    ) -> Result<IntentId, LedgerError> {
        if self.txid_index.contains_key(&txid) {
            return Err(LedgerError::DuplicateTxId(txid));
        }

        let intent_id = self.fresh_intent_id();
        self.txid_index.insert(txid.clone(), intent_id);
        self.intents.insert(
            intent_id,
            DepositIntent {
                intent_id,
                owner: None,
                network,
                address,
                wallet_id,
                amount,
                asset,
                onchain_txid: Some(txid),
                status: DepositStatus::Pending,
                bonus: Amount::zero(),
                expires_at: None,
                confirmed_at: None,
                created_at: now,
                updated_at: now,
            },
        );
        self.debug_check_invariants();
        Ok(intent_id)
    }

    /// Record a transfer rejected by validation (wrong asset). Terminal;
    /// balances untouched.
    pub(super) fn record_failed_deposit(
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
        if self.txid_index.contains_key(&txid) {
            return Err(LedgerError::DuplicateTxId(txid));
        }

        let intent_id = self.fresh_intent_id();
        self.txid_index.insert(txid.clone(), intent_id);
        self.intents.insert(
            intent_id,
            DepositIntent {
                intent_id,
                owner: Some(owner),
                network,
                address,
                wallet_id,
                amount,
                asset,
                onchain_txid: Some(txid),
                status: DepositStatus::Failed,
                bonus: Amount::zero(),
                expires_at: None,
                confirmed_at: None,
                created_at: now,
                updated_at: now,
            },
        );
        self.debug_check_invariants();
        Ok(intent_id)
    }

    /// The exactly-once ledger effect of a confirmed deposit: settle or
    /// create the intent, credit `amount + bonus`, bump lifetime deposits,
    /// append records. Bonus eligibility is decided here, inside the same
    /// critical section that commits it, so concurrent first deposits cannot
    /// both win the bonus.
    ///
    /// Errors leave the ledger untouched.
    #[allow(clippy::too_many_arguments)]
    pub(super) fn confirm_deposit(
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
        if self.txid_index.contains_key(txid) {
            return Err(LedgerError::DuplicateTxId(txid.clone()));
        }
        let account = self
            .accounts
            .get(&owner)
            .ok_or(LedgerError::MissingAccount(owner))?;

        let bonus = if self.has_deposit_bonus(owner) {
            Amount::zero()
        } else {
            amount
                .percentage(bonus_percent)
                .ok_or(LedgerError::BalanceOverflow(owner))?
        };
        let credited = amount
            .checked_add(bonus)
            .ok_or(LedgerError::BalanceOverflow(owner))?;
        let new_balance = account
            .balance
            .checked_add(credited)
            .ok_or(LedgerError::BalanceOverflow(owner))?;
        let new_total_deposited = account
            .total_deposited
            .checked_add(amount)
            .ok_or(LedgerError::BalanceOverflow(owner))?;

        // no fallible step below this line

        let adopted = self
            .intents
            .values()
            .filter(|intent| {
                intent.status.is_pending()
                    && intent.owner == Some(owner)
                    && intent.wallet_id == Some(wallet_id)
                    && intent.onchain_txid.is_none()
            })
            .map(|intent| intent.intent_id)
            .min();

        let intent_id = match adopted {
            Some(intent_id) => {
                let intent = self
                    .intents
                    .get_mut(&intent_id)
                    .expect("id taken from the table");
                intent.amount = amount;
                intent.asset = asset.clone();
                intent.onchain_txid = Some(txid.clone());
                intent.status = DepositStatus::Confirmed;
                intent.bonus = bonus;
                intent.confirmed_at = Some(now);
                intent.updated_at = now;
                intent_id
            }
            None => {
                let intent_id = self.fresh_intent_id();
                self.intents.insert(
                    intent_id,
                    DepositIntent {
                        intent_id,
                        owner: Some(owner),
                        network,
                        address: address.clone(),
                        wallet_id: Some(wallet_id),
                        amount,
                        asset: asset.clone(),
                        onchain_txid: Some(txid.clone()),
                        status: DepositStatus::Confirmed,
                        bonus,
                        expires_at: None,
                        confirmed_at: Some(now),
                        created_at: now,
                        updated_at: now,
                    },
                );
                intent_id
            }
        };
        self.txid_index.insert(txid.clone(), intent_id);

        let account = self
            .accounts
            .get_mut(&owner)
            .expect("account presence checked above");
        account.balance = new_balance;
        account.total_deposited = new_total_deposited;

        self.push_record(
            owner,
            TransactionKind::Deposit,
            amount,
            None,
            Some(txid.clone()),
            format!("Deposit via {}", network),
            now,
        );
        if !bonus.is_zero() {
            self.push_record(
                owner,
                TransactionKind::DepositBonus,
                bonus,
                None,
                Some(txid.clone()),
                format!("First deposit bonus ({bonus_percent}%)"),
                now,
            );
        }

        self.debug_check_invariants();
        Ok(ConfirmedDeposit {
            intent_id,
            owner,
            amount,
            bonus,
            credited,
            new_balance,
            adopted_declared_intent: adopted.is_some(),
        })
    }

    /// Credit the direct referrer's commission for one deposit. One-time per
    /// (referrer, depositor) pair; `Ok(None)` when already granted or the
    /// commission truncates to zero.
    pub(super) fn apply_referral_commission(
        &mut self,
        referrer: UserId,
        depositor: UserId,
        deposit_amount: Amount,
        percent: u64,
        reference: &OnchainTxId,
        now: Timestamp,
    ) -> Result<Option<Amount>, LedgerError> {
        let already_granted = self.records.iter().any(|record| {
            record.kind.is_referral_commission()
                && record.owner == referrer
                && record.source_user == Some(depositor)
        });
        if already_granted {
            return Ok(None);
        }

        let commission = deposit_amount
            .percentage(percent)
            .ok_or(LedgerError::BalanceOverflow(referrer))?;
        if commission.is_zero() {
            return Ok(None);
        }

        let account = self
            .accounts
            .get_mut(&referrer)
            .ok_or(LedgerError::MissingAccount(referrer))?;
        account.balance = account
            .balance
            .checked_add(commission)
            .ok_or(LedgerError::BalanceOverflow(referrer))?;

        self.push_record(
            referrer,
            TransactionKind::ReferralCommission,
            commission,
            Some(depositor),
            Some(reference.clone()),
            format!("Referral commission from {}", depositor),
            now,
        );
        Ok(Some(commission))
    }

    /// Cancel every `Pending` intent whose expiry lies before `now`. The
    /// predicate is evaluated here, at write time, never from a stale scan.
    /// Returns the cancelled ids, oldest first.
    pub(super) fn cancel_expired_pending(&mut self, now: Timestamp) -> Vec<IntentId> {
        let expired = self.expired_pending_intents(now);
        for intent_id in &expired {
            let intent = self
                .intents
                .get_mut(intent_id)
                .expect("id taken from the table");
            intent.status = DepositStatus::Cancelled;
            intent.updated_at = now;
        }
        expired
    }

    fn fresh_intent_id(&mut self) -> IntentId {
        self.next_intent_id += 1;
        IntentId(self.next_intent_id)
    }

    #[allow(clippy::too_many_arguments)]
    fn push_record(
        &mut self,
        owner: UserId,
        kind: TransactionKind,
        amount: Amount,
        source_user: Option<UserId>,
        reference: Option<OnchainTxId>,
        note: String,
        now: Timestamp,
    ) {
        self.next_record_id += 1;
        self.records.push(TransactionRecord {
            record_id: self.next_record_id,
            owner,
            kind,
            amount,
            source_user,
            reference,
            note,
            created_at: now,
        });
    }

    fn debug_check_invariants(&self) {
        debug_assert!(self
            .txid_index
            .iter()
            .all(|(txid, intent_id)| self.intents[intent_id].onchain_txid.as_ref() == Some(txid)));
        debug_assert!(self.records.len() <= self.next_record_id as usize);
    }
}
