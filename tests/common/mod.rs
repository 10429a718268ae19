use std::sync::Arc;

use clap::Parser;
use deposit_gateway::chain::ChainClient;
use deposit_gateway::chain::ChainRegistry;
use deposit_gateway::chain::DevChain;
use deposit_gateway::config_models::cli_args::Args;
use deposit_gateway::config_models::network::Network;
use deposit_gateway::deposit_ingestor::DepositIngestor;
use deposit_gateway::models::account::Account;
use deposit_gateway::models::amount::Amount;
use deposit_gateway::models::ids::UserId;
use deposit_gateway::models::timestamp::Timestamp;
use deposit_gateway::notifier::LogNotifier;
use deposit_gateway::pool_manager::WalletPoolManager;
use deposit_gateway::state::GatewayState;
use deposit_gateway::state::GatewayStateLock;
use deposit_gateway::vault::KeyVault;
use zeroize::Zeroizing;

/// A fully wired gateway with deterministic dev-chain backends, no REST
/// listener and no disk persistence. Tests drive the pool manager and the
/// ingestor directly, the way the REST handlers would.
pub struct Gateway {
    pub state: GatewayStateLock,
    pub pool: WalletPoolManager,
    pub ingestor: DepositIngestor,
    pub bep20: Arc<DevChain>,
    pub trc20: Arc<DevChain>,
}

impl Gateway {
    pub fn default_args() -> Args {
        Args::parse_from(Vec::<String>::new())
    }

    pub fn start(args: Args) -> Gateway {
        let seed = [99u8; 64];
        let bep20 = Arc::new(DevChain::new(Network::Bep20, &seed));
        let trc20 = Arc::new(DevChain::new(Network::Trc20, &seed));
        let chains = Arc::new(ChainRegistry::new([
            bep20.clone() as Arc<dyn ChainClient>,
            trc20.clone() as Arc<dyn ChainClient>,
        ]));
        let vault = Arc::new(
            KeyVault::from_master_key(Zeroizing::new([7u8; 32])).expect("fixed key is valid"),
        );

        let state = GatewayStateLock::new(GatewayState::new(), args, None);
        let pool = WalletPoolManager::new(state.clone(), chains, vault);
        let ingestor = DepositIngestor::new(state.clone(), Arc::new(LogNotifier));

        Gateway {
            state,
            pool,
            ingestor,
            bep20,
            trc20,
        }
    }

    pub fn start_default() -> Gateway {
        Self::start(Self::default_args())
    }

    pub async fn register_user(&self, user: UserId, email: &str, referred_by: Option<UserId>) {
        let mut account = Account::new(user, email, Timestamp::now());
        if let Some(referrer) = referred_by {
            account = account.with_referrer(referrer);
        }
        self.state.lock_guard_mut().await.upsert_account(account);
    }

    pub async fn balance_of(&self, user: UserId) -> Amount {
        self.state
            .lock_guard()
            .await
            .ledger
            .account(user)
            .map(|account| account.balance)
            .unwrap_or_else(Amount::zero)
    }
}

/// A USDT transfer notification body as the watch provider would deliver it.
pub fn transfer_body(address: &str, txid: &str, amount: &str) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({
        "address": address,
        "txid": txid,
        "amount": amount,
        "asset": "USDT",
    }))
    .expect("notification body serializes")
}
