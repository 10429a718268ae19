//! Webhook ingestion of on-chain transfer notifications.
//!
//! A notification travels a fixed pipeline: duplicate txid, unknown address,
//! missing lease holder, unsupported asset, malformed amount, then the atomic
//! ledger commit and its side effects. Every early exit is a terminal state
//! or a logged discard; the webhook endpoint answers 2xx regardless, so the
//! watch provider never retries into a different outcome.
//!
//! The on-chain transaction id is the idempotency key. The pre-checks here
//! are advisory reads; the commit re-runs the uniqueness check inside its
//! write-guard critical section, so two racing deliveries of the same txid
//! collapse to one credit and one `Duplicate`.

use std::sync::Arc;

use hmac::Hmac;
use hmac::Mac;
use serde::Deserialize;
use serde::Serialize;
use sha2::Sha256;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::config_models::network::Network;
use crate::models::amount::Amount;
use crate::models::ids::Address;
use crate::models::ids::AssetId;
use crate::models::ids::IntentId;
use crate::models::ids::OnchainTxId;
use crate::models::ids::UserId;
use crate::models::pool_wallet::PoolWallet;
use crate::models::timestamp::Timestamp;
use crate::notifier::Notifier;
use crate::state::deposit_ledger::ConfirmedDeposit;
use crate::state::deposit_ledger::LedgerError;
use crate::state::GatewayStateLock;

type HmacSha256 = Hmac<Sha256>;

/// A transfer event as the watch provider posts it. Amounts arrive as decimal
/// strings and are parsed at this boundary; a bad amount never reaches the
/// ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferNotification {
    pub address: String,
    pub txid: String,
    pub amount: String,
    pub asset: String,

    /// Network the provider claims the transfer happened on. Optional; when
    /// present it must agree with the wallet's network.
    #[serde(default)]
    pub network: Option<String>,
}

/// Why a notification was dropped without touching the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum DiscardReason {
    MalformedBody,
    UnparsableAmount,
    NonPositiveAmount,
}

/// Terminal state of one processed notification.
#[derive(Debug, Clone, PartialEq, Eq, strum::Display, strum::EnumIs)]
#[strum(serialize_all = "snake_case")]
#[non_exhaustive]
pub enum IngestOutcome {
    /// The txid is already in the ledger. Nothing changed.
    Duplicate,

    /// The destination address does not belong to the pool.
    UnknownAddress,

    /// The wallet has no lease holder; the transfer was recorded for manual
    /// review and nobody was credited.
    Orphaned(IntentId),

    /// Unsupported asset or contradicting network field. A `Failed` intent
    /// was recorded and the user notified; balances untouched.
    WrongAsset(IntentId),

    /// Dropped before the ledger.
    Discarded(DiscardReason),

    /// Signature verification failed and the node runs with
    /// `--require-signed-webhooks`.
    RejectedSignature,

    /// Credited.
    Confirmed(ConfirmedDeposit),

    /// The ledger refused the commit for an internal reason, e.g. a missing
    /// account row. Logged; the delivery is not retried.
    InternalError(String),
}

enum SignatureStatus {
    Valid,
    NoSecret,
    MissingHeader,
    Mismatch,
}

/// Hex HMAC-SHA256 of `body` under `secret`, the digest a well-behaved watch
/// provider puts in `x-webhook-signature`.
pub fn webhook_signature(secret: &str, body: &[u8]) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

pub struct DepositIngestor {
    state: GatewayStateLock,
    notifier: Arc<dyn Notifier>,
}

impl std::fmt::Debug for DepositIngestor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DepositIngestor")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl Clone for DepositIngestor {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
            notifier: self.notifier.clone(),
        }
    }
}

impl DepositIngestor {
    pub fn new(state: GatewayStateLock, notifier: Arc<dyn Notifier>) -> Self {
        Self { state, notifier }
    }

    /// Entry point for the raw webhook delivery: signature policy, body
    /// parsing, then [`Self::process_notification`].
    pub async fn handle_webhook(
        &self,
        raw_body: &[u8],
        signature_header: Option<&str>,
        now: Timestamp,
    ) -> IngestOutcome {
        let require_signed = self.state.cli().require_signed_webhooks;
        match self.check_signature(raw_body, signature_header) {
            SignatureStatus::Valid => {}
            SignatureStatus::NoSecret => {
                debug!("No webhook secret configured; accepting unsigned delivery");
            }
            SignatureStatus::MissingHeader => {
                if require_signed {
                    warn!("Discarding unsigned webhook delivery");
                    return IngestOutcome::RejectedSignature;
                }
                debug!("Webhook delivery without signature header; processing anyway");
            }
            SignatureStatus::Mismatch => {
                if require_signed {
                    warn!("Discarding webhook delivery with wrong signature");
                    return IngestOutcome::RejectedSignature;
                }
                warn!(
                    "Webhook signature mismatch; processing anyway. \
                     Txid dedup and address resolution are the effective guards."
                );
            }
        }

        let notification: TransferNotification = match serde_json::from_slice(raw_body) {
            Ok(notification) => notification,
            Err(e) => {
                warn!("Unparsable webhook body: {e}");
                return IngestOutcome::Discarded(DiscardReason::MalformedBody);
            }
        };
        self.process_notification(notification, now).await
    }

    /// Run one notification through the pipeline.
    pub async fn process_notification(
        &self,
        notification: TransferNotification,
        now: Timestamp,
    ) -> IngestOutcome {
        let txid_raw = notification.txid.trim();
        let address_raw = notification.address.trim();
        if txid_raw.is_empty() || address_raw.is_empty() {
            warn!("Notification without txid or address. Discarding.");
            return IngestOutcome::Discarded(DiscardReason::MalformedBody);
        }
        let txid = OnchainTxId::new(txid_raw);
        let address = Address::new(address_raw);

        // Duplicate pre-check and wallet resolution under one read guard.
        let wallet = {
            let state = self.state.lock_guard().await;
            if state.ledger.txid_known(&txid) {
                info!("Duplicate delivery of {txid}. No-op.");
                return IngestOutcome::Duplicate;
            }
            state.wallet_pool.by_address(&address).cloned()
        };
        let Some(wallet) = wallet else {
            warn!("Transfer {txid} to unknown address {address}. Discarding.");
            return IngestOutcome::UnknownAddress;
        };

        // Amounts are parsed before anything is recorded, so the orphan and
        // wrong-asset rows below always carry a real value.
        let amount: Amount = match notification.amount.trim().parse() {
            Ok(amount) => amount,
            Err(e) => {
                warn!("Unparsable amount '{}' in {txid}: {e}", notification.amount);
                return IngestOutcome::Discarded(DiscardReason::UnparsableAmount);
            }
        };
        if amount.is_zero() {
            warn!("Non-positive amount in {txid}. Discarding.");
            return IngestOutcome::Discarded(DiscardReason::NonPositiveAmount);
        }

        let asset = AssetId::new(notification.asset.trim());

        // No holder: record for manual review, credit nobody.
        let Some(owner) = wallet.holder() else {
            return self.record_orphan(&wallet, &address, amount, asset, txid, now).await;
        };

        // Asset must be accepted on the wallet's network, and an explicit
        // network claim must agree with it.
        if !self.asset_acceptable(&wallet, &notification, &asset) {
            return self
                .record_wrong_asset(&wallet, owner, &address, amount, asset, txid, now)
                .await;
        }

        // Atomic commit. Bonus eligibility is evaluated inside the same
        // critical section that credits, so a concurrent first deposit cannot
        // double-grant.
        let bonus_percent = self.state.cli().deposit_bonus_percent;
        let commit = self.state.lock_guard_mut().await.confirm_deposit(
            owner,
            wallet.wallet_id,
            wallet.network,
            &address,
            &txid,
            amount,
            &asset,
            bonus_percent,
            now,
        );
        let confirmed = match commit {
            Ok(confirmed) => confirmed,
            Err(LedgerError::DuplicateTxId(_)) => {
                info!("Lost the commit race for {txid}. No-op.");
                return IngestOutcome::Duplicate;
            }
            Err(e) => {
                error!("Ledger refused deposit {txid} for {owner}: {e}");
                return IngestOutcome::InternalError(e.to_string());
            }
        };

        info!(
            "Confirmed deposit {txid}: {amount} to {owner} (bonus {}, credited {}, balance {})",
            confirmed.bonus, confirmed.credited, confirmed.new_balance
        );
        self.state.persist_best_effort().await;

        self.post_commit_effects(&wallet, owner, &confirmed, &txid, amount, now)
            .await;
        IngestOutcome::Confirmed(confirmed)
    }

    fn asset_acceptable(
        &self,
        wallet: &PoolWallet,
        notification: &TransferNotification,
        asset: &AssetId,
    ) -> bool {
        if let Some(claimed) = notification.network.as_deref() {
            match claimed.parse::<Network>() {
                Ok(network) if network == wallet.network => {}
                _ => return false,
            }
        }
        self.state
            .cli()
            .accepted_assets_for(wallet.network)
            .iter()
            .any(|accepted| accepted.matches(asset.as_str()))
    }

    async fn record_orphan(
        &self,
        wallet: &PoolWallet,
        address: &Address,
        amount: Amount,
        asset: AssetId,
        txid: OnchainTxId,
        now: Timestamp,
    ) -> IngestOutcome {
        let result = self.state.lock_guard_mut().await.record_orphan_intent(
            wallet.network,
            address.clone(),
            Some(wallet.wallet_id),
            amount,
            asset,
            txid.clone(),
            now,
        );
        match result {
            Ok(intent_id) => {
                warn!(
                    "Transfer {txid} of {amount} to unleased wallet {} recorded as orphan \
                     intent {intent_id} for manual review",
                    wallet.wallet_id
                );
                self.state.persist_best_effort().await;
                IngestOutcome::Orphaned(intent_id)
            }
            Err(LedgerError::DuplicateTxId(_)) => IngestOutcome::Duplicate,
            Err(e) => {
                error!("Could not record orphan transfer {txid}: {e}");
                IngestOutcome::InternalError(e.to_string())
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn record_wrong_asset(
        &self,
        wallet: &PoolWallet,
        owner: UserId,
        address: &Address,
        amount: Amount,
        asset: AssetId,
        txid: OnchainTxId,
        now: Timestamp,
    ) -> IngestOutcome {
        let result = self.state.lock_guard_mut().await.record_failed_deposit(
            owner,
            wallet.network,
            address.clone(),
            Some(wallet.wallet_id),
            amount,
            asset.clone(),
            txid.clone(),
            now,
        );
        match result {
            Ok(intent_id) => {
                warn!(
                    "Transfer {txid} of {amount} {asset} is not an accepted asset on \
                     {}; recorded failed intent {intent_id}",
                    wallet.network
                );
                self.state.persist_best_effort().await;

                let email = self.account_email(owner).await;
                if let Some(email) = email {
                    if let Err(e) = self
                        .notifier
                        .wrong_currency(&email, asset.as_str(), amount, &txid)
                        .await
                    {
                        warn!("wrong_currency notification for {owner} failed: {e:#}");
                    }
                }
                IngestOutcome::WrongAsset(intent_id)
            }
            Err(LedgerError::DuplicateTxId(_)) => IngestOutcome::Duplicate,
            Err(e) => {
                error!("Could not record failed deposit {txid}: {e}");
                IngestOutcome::InternalError(e.to_string())
            }
        }
    }

    /// Everything that happens after the money moved. Failures here are
    /// logged and swallowed; the credit stands.
    async fn post_commit_effects(
        &self,
        wallet: &PoolWallet,
        owner: UserId,
        confirmed: &ConfirmedDeposit,
        txid: &OnchainTxId,
        amount: Amount,
        now: Timestamp,
    ) {
        self.state
            .lock_guard_mut()
            .await
            .mark_wallet_used(wallet.wallet_id, now);

        self.apply_referral_commission(owner, amount, txid, now).await;

        if let Some(email) = self.account_email(owner).await {
            if let Err(e) = self
                .notifier
                .deposit_confirmed(&email, confirmed.credited, txid)
                .await
            {
                warn!("deposit_confirmed notification for {owner} failed: {e:#}");
            }
        }

        self.state.persist_best_effort().await;
    }

    async fn apply_referral_commission(
        &self,
        depositor: UserId,
        amount: Amount,
        txid: &OnchainTxId,
        now: Timestamp,
    ) {
        let referrer = {
            let state = self.state.lock_guard().await;
            state.ledger.referrer_chain(depositor, 1).first().copied()
        };
        let Some(referrer) = referrer else {
            return;
        };

        let percent = self.state.cli().referral_commission_percent;
        let result = self.state.lock_guard_mut().await.apply_referral_commission(
            referrer,
            depositor,
            amount,
            percent,
            txid,
            now,
        );
        match result {
            Ok(Some(commission)) => {
                info!(
                    "Referral commission of {commission} credited to {referrer} \
                     for first deposit of {depositor}"
                );
            }
            Ok(None) => {
                debug!("No referral commission for {referrer}: already granted or zero");
            }
            Err(e) => {
                warn!("Referral commission for {referrer} failed: {e}. Deposit stands.");
            }
        }
    }

    async fn account_email(&self, user: UserId) -> Option<String> {
        let state = self.state.lock_guard().await;
        state.ledger.account(user).map(|account| account.email.clone())
    }

    fn check_signature(&self, body: &[u8], header: Option<&str>) -> SignatureStatus {
        let Some(secret) = self.state.cli().webhook_secret.as_deref() else {
            return SignatureStatus::NoSecret;
        };
        let Some(header) = header else {
            return SignatureStatus::MissingHeader;
        };
        let Ok(claimed) = hex::decode(header.trim()) else {
            return SignatureStatus::Mismatch;
        };

        let mut mac =
            HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
        mac.update(body);
        match mac.verify_slice(&claimed) {
            Ok(()) => SignatureStatus::Valid,
            Err(_) => SignatureStatus::Mismatch,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::config_models::cli_args;
    use crate::models::account::Account;
    use crate::models::deposit_intent::DepositStatus;
    use crate::state::GatewayState;

    const WALLET_ADDRESS: &str = "0xaaaa0000aaaa0000aaaa0000aaaa0000aaaa0000";

    #[derive(Debug, Default)]
    struct RecordingNotifier {
        confirmed: Mutex<Vec<(String, Amount)>>,
        wrong: Mutex<Vec<(String, String)>>,
        fail: bool,
    }

    #[async_trait::async_trait]
    impl Notifier for RecordingNotifier {
        async fn deposit_confirmed(
            &self,
            email: &str,
            amount: Amount,
            _txid: &OnchainTxId,
        ) -> anyhow::Result<()> {
            if self.fail {
                anyhow::bail!("smtp down");
            }
            self.confirmed.lock().unwrap().push((email.into(), amount));
            Ok(())
        }

        async fn wrong_currency(
            &self,
            email: &str,
            asset: &str,
            _amount: Amount,
            _txid: &OnchainTxId,
        ) -> anyhow::Result<()> {
            if self.fail {
                anyhow::bail!("smtp down");
            }
            self.wrong.lock().unwrap().push((email.into(), asset.into()));
            Ok(())
        }
    }

    struct Fixture {
        ingestor: DepositIngestor,
        notifier: Arc<RecordingNotifier>,
        state: GatewayStateLock,
    }

    /// One account (user 1, alice@) holding a leased bep20 wallet, plus a
    /// referrer account (user 2, bob@) with no wallet.
    async fn fixture() -> Fixture {
        fixture_with(cli_args::Args::default(), false).await
    }

    async fn fixture_with(args: cli_args::Args, failing_notifier: bool) -> Fixture {
        let state = GatewayStateLock::new(GatewayState::new(), args, None);
        let now = Timestamp::millis(1_000);
        {
            let mut guard = state.lock_guard_mut().await;
            guard.upsert_account(
                Account::new(UserId(2), "bob@example.com", now),
            );
            guard.upsert_account(
                Account::new(UserId(1), "alice@example.com", now).with_referrer(UserId(2)),
            );
            guard
                .insert_derived_and_lease(
                    UserId(1),
                    Network::Bep20,
                    Address::new(WALLET_ADDRESS),
                    vec![0u8; 32],
                    0,
                    Timestamp::hours(1),
                    now,
                )
                .unwrap();
        }
        let notifier = Arc::new(RecordingNotifier {
            fail: failing_notifier,
            ..Default::default()
        });
        Fixture {
            ingestor: DepositIngestor::new(state.clone(), notifier.clone()),
            notifier,
            state,
        }
    }

    fn usdt_notification(txid: &str, amount: &str) -> TransferNotification {
        TransferNotification {
            address: WALLET_ADDRESS.into(),
            txid: txid.into(),
            amount: amount.into(),
            asset: "USDT".into(),
            network: None,
        }
    }

    async fn balance_of(state: &GatewayStateLock, user: UserId) -> Amount {
        state
            .lock_guard()
            .await
            .ledger
            .account(user)
            .unwrap()
            .balance
    }

    #[tokio::test]
    async fn worked_example_credits_bonus_and_commission() {
        let f = fixture().await;
        let now = Timestamp::millis(5_000);

        let outcome = f
            .ingestor
            .process_notification(usdt_notification("0xtx1", "1000"), now)
            .await;

        let IngestOutcome::Confirmed(confirmed) = outcome else {
            panic!("expected confirmation, got {outcome:?}");
        };
        assert_eq!(Amount::whole(1000), confirmed.amount);
        assert_eq!(Amount::whole(30), confirmed.bonus);
        assert_eq!(Amount::whole(1030), confirmed.credited);

        assert_eq!(Amount::whole(1030), balance_of(&f.state, UserId(1)).await);
        // direct referrer got the 7% commission
        assert_eq!(Amount::whole(70), balance_of(&f.state, UserId(2)).await);

        // notification carried the credited amount
        let sent = f.notifier.confirmed.lock().unwrap().clone();
        assert_eq!(
            vec![("alice@example.com".to_string(), Amount::whole(1030))],
            sent
        );

        // wallet usage was stamped
        let state = f.state.lock_guard().await;
        let wallet = state.wallet_pool.by_address(&Address::new(WALLET_ADDRESS)).unwrap();
        assert_eq!(1, wallet.deposit_count);
    }

    #[tokio::test]
    async fn second_delivery_of_same_txid_is_a_noop() {
        let f = fixture().await;
        let now = Timestamp::millis(5_000);

        let first = f
            .ingestor
            .process_notification(usdt_notification("0xtx1", "1000"), now)
            .await;
        assert!(first.is_confirmed());

        let second = f
            .ingestor
            .process_notification(usdt_notification("0xtx1", "1000"), now)
            .await;
        assert_eq!(IngestOutcome::Duplicate, second);
        assert_eq!(Amount::whole(1030), balance_of(&f.state, UserId(1)).await);
    }

    #[tokio::test]
    async fn bonus_and_commission_are_one_time() {
        let f = fixture().await;
        let now = Timestamp::millis(5_000);

        f.ingestor
            .process_notification(usdt_notification("0xtx1", "1000"), now)
            .await;
        let outcome = f
            .ingestor
            .process_notification(usdt_notification("0xtx2", "500"), now)
            .await;

        let IngestOutcome::Confirmed(confirmed) = outcome else {
            panic!("expected confirmation");
        };
        assert!(confirmed.bonus.is_zero());
        // 1030 + 500, no second bonus
        assert_eq!(Amount::whole(1530), balance_of(&f.state, UserId(1)).await);
        // no second commission either
        assert_eq!(Amount::whole(70), balance_of(&f.state, UserId(2)).await);
    }

    #[tokio::test]
    async fn unknown_address_is_discarded() {
        let f = fixture().await;
        let mut notification = usdt_notification("0xtx1", "1000");
        notification.address = "0xffff0000ffff0000ffff0000ffff0000ffff0000".into();

        let outcome = f
            .ingestor
            .process_notification(notification, Timestamp::millis(5_000))
            .await;
        assert_eq!(IngestOutcome::UnknownAddress, outcome);
        assert!(f.state.lock_guard().await.ledger.records_for(UserId(1)).is_empty());
    }

    #[tokio::test]
    async fn transfer_to_unleased_wallet_is_orphaned() {
        let f = fixture().await;
        let now = Timestamp::millis(5_000);
        {
            let mut guard = f.state.lock_guard_mut().await;
            let wallet_id = guard
                .wallet_pool
                .by_address(&Address::new(WALLET_ADDRESS))
                .unwrap()
                .wallet_id;
            guard.release_wallet(wallet_id, now);
        }

        let outcome = f
            .ingestor
            .process_notification(usdt_notification("0xtx1", "1000"), now)
            .await;

        let IngestOutcome::Orphaned(intent_id) = outcome else {
            panic!("expected orphan, got {outcome:?}");
        };
        let state = f.state.lock_guard().await;
        let intent = state.ledger.intent(intent_id).unwrap();
        assert_eq!(None, intent.owner);
        assert_eq!(DepositStatus::Pending, intent.status);
        assert!(state.ledger.txid_known(&OnchainTxId::new("0xtx1")));
        drop(state);
        assert_eq!(Amount::zero(), balance_of(&f.state, UserId(1)).await);

        // redelivery of the orphan is idempotent
        let again = f
            .ingestor
            .process_notification(usdt_notification("0xtx1", "1000"), now)
            .await;
        assert_eq!(IngestOutcome::Duplicate, again);
    }

    #[tokio::test]
    async fn wrong_asset_fails_with_notification_and_no_credit() {
        let f = fixture().await;
        let now = Timestamp::millis(5_000);
        let mut notification = usdt_notification("0xtx1", "250");
        notification.asset = "SHIB".into();

        let outcome = f.ingestor.process_notification(notification, now).await;

        let IngestOutcome::WrongAsset(intent_id) = outcome else {
            panic!("expected wrong-asset, got {outcome:?}");
        };
        let state = f.state.lock_guard().await;
        let intent = state.ledger.intent(intent_id).unwrap();
        assert_eq!(DepositStatus::Failed, intent.status);
        assert_eq!(Some(UserId(1)), intent.owner);
        drop(state);

        assert_eq!(Amount::zero(), balance_of(&f.state, UserId(1)).await);
        let wrong = f.notifier.wrong.lock().unwrap().clone();
        assert_eq!(
            vec![("alice@example.com".to_string(), "SHIB".to_string())],
            wrong
        );
    }

    #[tokio::test]
    async fn contradicting_network_claim_fails_the_asset_check() {
        let f = fixture().await;
        let mut notification = usdt_notification("0xtx1", "250");
        notification.network = Some("trc20".into());

        let outcome = f
            .ingestor
            .process_notification(notification, Timestamp::millis(5_000))
            .await;
        assert!(matches!(outcome, IngestOutcome::WrongAsset(_)));

        // a matching claim sails through
        let mut notification = usdt_notification("0xtx2", "250");
        notification.network = Some("BSC".into());
        let outcome = f
            .ingestor
            .process_notification(notification, Timestamp::millis(6_000))
            .await;
        assert!(outcome.is_confirmed());
    }

    #[tokio::test]
    async fn bad_amounts_never_reach_the_ledger() {
        let f = fixture().await;
        let now = Timestamp::millis(5_000);

        for (amount, reason) in [
            ("0", DiscardReason::NonPositiveAmount),
            ("0.000000", DiscardReason::NonPositiveAmount),
            ("-5", DiscardReason::UnparsableAmount),
            ("12abc", DiscardReason::UnparsableAmount),
            ("", DiscardReason::UnparsableAmount),
        ] {
            let outcome = f
                .ingestor
                .process_notification(usdt_notification("0xtx1", amount), now)
                .await;
            assert_eq!(IngestOutcome::Discarded(reason), outcome, "amount {amount:?}");
        }

        let state = f.state.lock_guard().await;
        assert!(!state.ledger.txid_known(&OnchainTxId::new("0xtx1")));
        assert!(state.ledger.intents_for(UserId(1)).is_empty());
    }

    #[tokio::test]
    async fn notifier_outage_does_not_void_the_credit() {
        let f = fixture_with(cli_args::Args::default(), true).await;
        let outcome = f
            .ingestor
            .process_notification(usdt_notification("0xtx1", "1000"), Timestamp::millis(5_000))
            .await;
        assert!(outcome.is_confirmed());
        assert_eq!(Amount::whole(1030), balance_of(&f.state, UserId(1)).await);
    }

    #[tokio::test]
    async fn signature_policy_permissive_vs_strict() {
        let mut args = cli_args::Args::default();
        args.webhook_secret = Some("sekrit".into());

        // permissive: bad signature is logged, still processed
        let f = fixture_with(args.clone(), false).await;
        let body = serde_json::to_vec(&usdt_notification("0xtx1", "1000")).unwrap();
        let outcome = f
            .ingestor
            .handle_webhook(&body, Some("deadbeef"), Timestamp::millis(5_000))
            .await;
        assert!(outcome.is_confirmed());

        // strict: bad or missing signature is rejected before processing
        args.require_signed_webhooks = true;
        let f = fixture_with(args, false).await;
        let body = serde_json::to_vec(&usdt_notification("0xtx2", "1000")).unwrap();

        let bad = f
            .ingestor
            .handle_webhook(&body, Some("deadbeef"), Timestamp::millis(5_000))
            .await;
        assert_eq!(IngestOutcome::RejectedSignature, bad);
        let unsigned = f
            .ingestor
            .handle_webhook(&body, None, Timestamp::millis(5_000))
            .await;
        assert_eq!(IngestOutcome::RejectedSignature, unsigned);
        assert!(!f
            .state
            .lock_guard()
            .await
            .ledger
            .txid_known(&OnchainTxId::new("0xtx2")));

        // a correct signature passes strict mode
        let good = webhook_signature("sekrit", &body);
        let outcome = f
            .ingestor
            .handle_webhook(&body, Some(&good), Timestamp::millis(5_000))
            .await;
        assert!(outcome.is_confirmed());
    }

    #[tokio::test]
    async fn declared_intent_is_adopted_by_the_webhook() {
        let f = fixture().await;
        let now = Timestamp::millis(5_000);
        let intent_id = {
            let mut guard = f.state.lock_guard_mut().await;
            let wallet_id = guard
                .wallet_pool
                .by_address(&Address::new(WALLET_ADDRESS))
                .unwrap()
                .wallet_id;
            guard.declare_intent(
                UserId(1),
                Network::Bep20,
                Address::new(WALLET_ADDRESS),
                wallet_id,
                Amount::whole(1000),
                None,
                now,
            )
        };

        let outcome = f
            .ingestor
            .process_notification(usdt_notification("0xtx1", "1000"), now)
            .await;
        let IngestOutcome::Confirmed(confirmed) = outcome else {
            panic!("expected confirmation");
        };
        assert!(confirmed.adopted_declared_intent);
        assert_eq!(intent_id, confirmed.intent_id);

        let state = f.state.lock_guard().await;
        let intent = state.ledger.intent(intent_id).unwrap();
        assert_eq!(DepositStatus::Confirmed, intent.status);
        assert_eq!(Some(OnchainTxId::new("0xtx1")), intent.onchain_txid);
    }
}
