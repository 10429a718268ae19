//! Chain access seam
//!
//! Everything the gateway needs from a blockchain sits behind [`ChainClient`].
//! Production deployments implement it over a node RPC or a custody provider;
//! the built-in [`DevChain`] implements it in-process for regtest-style
//! operation and tests. Per-network clients are looked up through
//! [`ChainRegistry`], so call sites match on [`Network`] capabilities instead
//! of dispatching on strings.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use zeroize::Zeroizing;

use crate::config_models::network::Network;
use crate::models::amount::Amount;
use crate::models::ids::Address;
use crate::models::ids::AssetId;
use crate::models::ids::OnchainTxId;

pub mod dev_chain;
pub mod hd_keys;

pub use dev_chain::DevChain;

#[derive(Debug, Clone, thiserror::Error)]
#[non_exhaustive]
pub enum ChainError {
    #[error("no chain client registered for network {0}")]
    UnsupportedNetwork(Network),

    #[error("chain provider unavailable: {0}")]
    Unavailable(String),

    #[error("key derivation failed: {0}")]
    DerivationFailed(String),

    #[error("insufficient funds: have {have}, need {need}")]
    InsufficientFunds { have: Amount, need: Amount },

    #[error("transaction rejected: {0}")]
    Rejected(String),
}

/// A fresh keypair from the HD sequence, with the address the chain side
/// computed for it.
pub struct DerivedKey {
    pub private_key: Zeroizing<Vec<u8>>,
    pub address: Address,
    pub derivation_index: u64,
}

impl std::fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivedKey")
            .field("address", &self.address)
            .field("derivation_index", &self.derivation_index)
            .finish_non_exhaustive()
    }
}

/// A settled transfer as the chain reports it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainTransaction {
    pub txid: OnchainTxId,
    pub to: Address,
    pub amount: Amount,
    pub asset: AssetId,
    pub confirmations: u32,
}

/// Per-network chain operations used by the pool manager and the sweep path.
///
/// Implementations must be cheap to clone behind an `Arc` and safe to call
/// concurrently. No method is ever invoked while gateway state is locked.
#[async_trait]
pub trait ChainClient: Send + Sync {
    fn network(&self) -> Network;

    /// Derive the keypair at `index` of this network's HD sequence.
    async fn derive_keypair(&self, index: u64) -> Result<DerivedKey, ChainError>;

    /// Recompute the receive-address for a private key. Pure; used to verify
    /// a derivation before anything is persisted.
    fn address_for_key(&self, private_key: &[u8]) -> Result<Address, ChainError>;

    /// Balance of the network's fee currency.
    async fn native_balance(&self, address: &Address) -> Result<Amount, ChainError>;

    /// Balance of a token, named by symbol or contract.
    async fn token_balance(&self, address: &Address, asset: &str) -> Result<Amount, ChainError>;

    /// Transfer `amount` of `asset` out of the address owned by
    /// `private_key`. Returns the on-chain transaction id.
    async fn send_token(
        &self,
        private_key: &[u8],
        to: &Address,
        amount: Amount,
        asset: &str,
    ) -> Result<OnchainTxId, ChainError>;

    /// Register `address` with the watch provider so transfers are posted to
    /// `callback_url`. Returns the provider's subscription id.
    async fn subscribe_address(
        &self,
        address: &Address,
        callback_url: &str,
    ) -> Result<String, ChainError>;

    /// Look up a settled transaction, `None` when the chain does not know it.
    async fn get_transaction(
        &self,
        txid: &OnchainTxId,
    ) -> Result<Option<ChainTransaction>, ChainError>;
}

/// Maps each supported [`Network`] to its client. Built once at startup and
/// shared read-only.
#[derive(Clone)]
pub struct ChainRegistry {
    clients: HashMap<Network, Arc<dyn ChainClient>>,
}

impl std::fmt::Debug for ChainRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainRegistry")
            .field("networks", &self.clients.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ChainRegistry {
    pub fn new(clients: impl IntoIterator<Item = Arc<dyn ChainClient>>) -> Self {
        Self {
            clients: clients
                .into_iter()
                .map(|client| (client.network(), client))
                .collect(),
        }
    }

    /// An in-process deterministic registry covering every network. Used for
    /// dev mode and tests.
    pub fn dev(seed: &[u8]) -> Self {
        use strum::IntoEnumIterator;

        Self::new(Network::iter().map(|network| {
            Arc::new(DevChain::new(network, seed)) as Arc<dyn ChainClient>
        }))
    }

    pub fn client_for(&self, network: Network) -> Result<&Arc<dyn ChainClient>, ChainError> {
        self.clients
            .get(&network)
            .ok_or(ChainError::UnsupportedNetwork(network))
    }

    pub fn networks(&self) -> impl Iterator<Item = Network> + '_ {
        self.clients.keys().copied()
    }
}
