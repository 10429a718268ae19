//! In-process deterministic chain client
//!
//! Backs regtest-style operation and the test suite. Keys come from the real
//! HD derivation path; balances, transfers and subscriptions are simulated in
//! memory. Two failure levers exist so callers' degraded paths can be
//! exercised: subscription outage and a one-shot corrupted derivation.

use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use async_trait::async_trait;
use sha3::Digest;
use sha3::Keccak256;
use tokio::sync::Mutex;

use super::hd_keys::public_key_for;
use super::hd_keys::HdKeyTree;
use super::ChainClient;
use super::ChainError;
use super::ChainTransaction;
use super::DerivedKey;
use crate::config_models::network::Network;
use crate::models::amount::Amount;
use crate::models::ids::Address;
use crate::models::ids::AssetId;
use crate::models::ids::OnchainTxId;

#[derive(Debug, Default)]
struct DevLedger {
    token_balances: HashMap<(Address, String), Amount>,
    native_balances: HashMap<Address, Amount>,
    transactions: HashMap<OnchainTxId, ChainTransaction>,
    subscriptions: Vec<(Address, String)>,
    next_subscription_id: u64,
    next_tx_nonce: u64,
}

/// Deterministic, seed-keyed [`ChainClient`] over an in-memory ledger.
#[derive(Debug)]
pub struct DevChain {
    network: Network,
    keys: HdKeyTree,
    ledger: Mutex<DevLedger>,
    fail_subscriptions: AtomicBool,
    corrupt_next_derivation: AtomicBool,
}

impl DevChain {
    pub fn new(network: Network, seed: &[u8]) -> Self {
        Self {
            network,
            keys: HdKeyTree::from_seed(seed),
            ledger: Mutex::new(DevLedger::default()),
            fail_subscriptions: AtomicBool::new(false),
            corrupt_next_derivation: AtomicBool::new(false),
        }
    }

    fn address_from_public(network: Network, public_key: &[u8]) -> Address {
        let digest = Keccak256::digest(public_key);
        let encoded = hex::encode(&digest[12..32]);
        match network {
            Network::Bep20 => Address::new(format!("0x{encoded}")),
            // truncated hex stands in for base58check here
            Network::Trc20 => Address::new(format!("T{}", &encoded[..33])),
        }
    }

    fn normalize(asset: &str) -> String {
        asset.to_ascii_uppercase()
    }

    /// Make the watch provider refuse registrations until reset.
    pub fn set_fail_subscriptions(&self, fail: bool) {
        self.fail_subscriptions.store(fail, Ordering::SeqCst);
    }

    /// Corrupt the next `derive_keypair` answer: the reported address will
    /// not belong to the returned private key.
    pub fn corrupt_next_derivation(&self) {
        self.corrupt_next_derivation.store(true, Ordering::SeqCst);
    }

    /// Simulate an incoming on-chain token transfer to `address`. Returns the
    /// transaction id a watch provider would report.
    pub async fn fund_token(
        &self,
        address: &Address,
        asset: &str,
        amount: Amount,
    ) -> OnchainTxId {
        let mut ledger = self.ledger.lock().await;

        let balance = ledger
            .token_balances
            .entry((address.clone(), Self::normalize(asset)))
            .or_insert_with(Amount::zero);
        *balance = balance.checked_add(amount).unwrap_or(*balance);

        ledger.next_tx_nonce += 1;
        let nonce = ledger.next_tx_nonce;
        let txid = Self::fabricate_txid(address, amount, nonce);
        ledger.transactions.insert(
            txid.clone(),
            ChainTransaction {
                txid: txid.clone(),
                to: address.clone(),
                amount,
                asset: AssetId::new(asset),
                confirmations: 12,
            },
        );
        txid
    }

    pub async fn fund_native(&self, address: &Address, amount: Amount) {
        let mut ledger = self.ledger.lock().await;
        let balance = ledger
            .native_balances
            .entry(address.clone())
            .or_insert_with(Amount::zero);
        *balance = balance.checked_add(amount).unwrap_or(*balance);
    }

    pub async fn subscription_count(&self) -> usize {
        self.ledger.lock().await.subscriptions.len()
    }

    fn fabricate_txid(to: &Address, amount: Amount, nonce: u64) -> OnchainTxId {
        let mut hasher = Keccak256::new();
        hasher.update(to.as_str().as_bytes());
        hasher.update(amount.to_micro_units().to_be_bytes());
        hasher.update(nonce.to_be_bytes());
        OnchainTxId::new(format!("0x{}", hex::encode(hasher.finalize())))
    }
}

#[async_trait]
impl ChainClient for DevChain {
    fn network(&self) -> Network {
        self.network
    }

    async fn derive_keypair(&self, index: u64) -> Result<DerivedKey, ChainError> {
        let private_key = self.keys.private_key_at(self.network, index);

        let address_source_key = if self.corrupt_next_derivation.swap(false, Ordering::SeqCst) {
            // wrong index on purpose, see corrupt_next_derivation()
            self.keys.private_key_at(self.network, index + 1)
        } else {
            private_key.clone()
        };
        let address =
            Self::address_from_public(self.network, &public_key_for(&address_source_key));

        Ok(DerivedKey {
            private_key,
            address,
            derivation_index: index,
        })
    }

    fn address_for_key(&self, private_key: &[u8]) -> Result<Address, ChainError> {
        Ok(Self::address_from_public(
            self.network,
            &public_key_for(private_key),
        ))
    }

    async fn native_balance(&self, address: &Address) -> Result<Amount, ChainError> {
        let ledger = self.ledger.lock().await;
        Ok(ledger
            .native_balances
            .get(address)
            .copied()
            .unwrap_or_else(Amount::zero))
    }

    async fn token_balance(&self, address: &Address, asset: &str) -> Result<Amount, ChainError> {
        let ledger = self.ledger.lock().await;
        Ok(ledger
            .token_balances
            .get(&(address.clone(), Self::normalize(asset)))
            .copied()
            .unwrap_or_else(Amount::zero))
    }

    async fn send_token(
        &self,
        private_key: &[u8],
        to: &Address,
        amount: Amount,
        asset: &str,
    ) -> Result<OnchainTxId, ChainError> {
        let from = self.address_for_key(private_key)?;
        let asset_key = Self::normalize(asset);

        let mut ledger = self.ledger.lock().await;

        let have = ledger
            .token_balances
            .get(&(from.clone(), asset_key.clone()))
            .copied()
            .unwrap_or_else(Amount::zero);
        let remaining = have
            .checked_sub(amount)
            .ok_or(ChainError::InsufficientFunds { have, need: amount })?;

        ledger
            .token_balances
            .insert((from.clone(), asset_key.clone()), remaining);
        let recipient = ledger
            .token_balances
            .entry((to.clone(), asset_key))
            .or_insert_with(Amount::zero);
        *recipient = recipient
            .checked_add(amount)
            .ok_or_else(|| ChainError::Rejected("recipient balance overflow".into()))?;

        ledger.next_tx_nonce += 1;
        let nonce = ledger.next_tx_nonce;
        let txid = Self::fabricate_txid(to, amount, nonce);
        ledger.transactions.insert(
            txid.clone(),
            ChainTransaction {
                txid: txid.clone(),
                to: to.clone(),
                amount,
                asset: AssetId::new(asset),
                confirmations: 12,
            },
        );
        Ok(txid)
    }

    async fn subscribe_address(
        &self,
        address: &Address,
        callback_url: &str,
    ) -> Result<String, ChainError> {
        if self.fail_subscriptions.load(Ordering::SeqCst) {
            return Err(ChainError::Unavailable(
                "watch provider refused subscription".into(),
            ));
        }

        let mut ledger = self.ledger.lock().await;
        ledger.next_subscription_id += 1;
        let id = format!("devsub-{}-{}", self.network, ledger.next_subscription_id);
        ledger
            .subscriptions
            .push((address.clone(), callback_url.to_string()));
        Ok(id)
    }

    async fn get_transaction(
        &self,
        txid: &OnchainTxId,
    ) -> Result<Option<ChainTransaction>, ChainError> {
        let ledger = self.ledger.lock().await;
        Ok(ledger.transactions.get(txid).cloned())
    }
}
