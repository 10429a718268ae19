//! Outbound notifications for deposit events.
//!
//! Notification delivery is best-effort by contract: the ingestion pipeline
//! fires these after its ledger commit, logs any failure, and moves on. A
//! notifier must never be called while a state guard is held.

use tracing::info;
use tracing::warn;

use crate::models::amount::Amount;
use crate::models::ids::OnchainTxId;

#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    /// The deposit with `txid` was credited to the account behind `email`.
    async fn deposit_confirmed(
        &self,
        email: &str,
        amount: Amount,
        txid: &OnchainTxId,
    ) -> anyhow::Result<()>;

    /// A transfer in an unsupported asset arrived on the user's deposit
    /// address and was not credited.
    async fn wrong_currency(
        &self,
        email: &str,
        asset: &str,
        amount: Amount,
        txid: &OnchainTxId,
    ) -> anyhow::Result<()>;
}

/// Writes notifications to the log. Default wiring until a mail or push
/// provider is plugged in.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait::async_trait]
impl Notifier for LogNotifier {
    async fn deposit_confirmed(
        &self,
        email: &str,
        amount: Amount,
        txid: &OnchainTxId,
    ) -> anyhow::Result<()> {
        info!("Deposit of {amount} confirmed for {email}. txid: {txid}");
        Ok(())
    }

    async fn wrong_currency(
        &self,
        email: &str,
        asset: &str,
        amount: Amount,
        txid: &OnchainTxId,
    ) -> anyhow::Result<()> {
        warn!("Ignored transfer of {amount} {asset} for {email}: unsupported asset. txid: {txid}");
        Ok(())
    }
}
