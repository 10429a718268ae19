use std::net::IpAddr;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::config_models::network::Network;
use crate::models::amount::Amount;
use crate::models::ids::Address;
use crate::models::ids::AssetId;
use crate::models::timestamp::Timestamp;

/// The `deposit-gateway` command-line program starts a deposit gateway node.
#[derive(Parser, Debug, Clone)]
#[clap(author, version, about)]
pub struct Args {
    /// The data directory that contains the state snapshot, the wallet seed
    /// phrase, and the vault salt.
    ///
    /// The default varies by operating system, e.g.
    ///
    /// Linux:   /home/alice/.local/share/deposit-gateway
    ///
    /// Windows: C:\Users\Alice\AppData\Roaming\deposit-gateway
    ///
    /// macOS:   /Users/Alice/Library/Application Support/deposit-gateway
    #[clap(long, value_name = "DIR")]
    pub data_dir: Option<PathBuf>,

    /// IP on which to listen for REST connections.
    #[clap(short, long, default_value = "127.0.0.1")]
    pub listen_addr: IpAddr,

    /// Port on which to listen for REST connections.
    #[clap(long, default_value = "9800", value_name = "PORT")]
    pub rest_port: u16,

    /// How long a deposit-address lease stays bound to a user before the
    /// reaper may return the wallet to the pool.
    ///
    /// E.g. --lease-ttl 1h, --lease-ttl 30m.
    #[clap(long, default_value = "1h", value_parser = humantime::parse_duration, value_name = "DURATION")]
    pub lease_ttl: Duration,

    /// Interval between expiry-reaper passes.
    #[clap(long, default_value = "5m", value_parser = humantime::parse_duration, value_name = "DURATION")]
    pub reap_interval: Duration,

    /// One-time bonus credited on a user's first confirmed deposit, as an
    /// integer percentage of the deposited amount.
    #[clap(long, default_value = "3", value_name = "PERCENT")]
    pub deposit_bonus_percent: u64,

    /// One-time commission credited to the depositor's direct referrer, as an
    /// integer percentage of the deposited amount.
    #[clap(long, default_value = "7", value_name = "PERCENT")]
    pub referral_commission_percent: u64,

    /// Smallest deposit a user may declare when requesting a deposit address.
    ///
    /// On-chain transfers below this value are still credited; the floor only
    /// applies to declared intents.
    #[clap(long, default_value = "10", value_name = "AMOUNT")]
    pub min_deposit: Amount,

    /// Master address that `sweep` moves pool-wallet funds to, one per
    /// network.
    ///
    /// E.g.: --master-address bep20=0x12ab... --master-address trc20=TXYZ...
    #[clap(long = "master-address", value_name = "NETWORK=ADDRESS", value_parser = parse_master_address)]
    pub master_addresses: Vec<(Network, Address)>,

    /// Accept an additional token contract as a valid deposit asset on a
    /// network, on top of the built-in USDT contracts.
    ///
    /// E.g.: --accept-asset bep20=0xTOKEN.
    #[clap(long = "accept-asset", value_name = "NETWORK=ASSET", value_parser = parse_accepted_asset)]
    pub accept_assets: Vec<(Network, AssetId)>,

    /// Secret the pool-key vault derives its sealing keys from.
    ///
    /// Prefer the environment variable over the flag so the secret stays out
    /// of the process list.
    #[clap(long, env = "GATEWAY_VAULT_SECRET", hide_env_values = true)]
    pub vault_secret: Option<String>,

    /// Shared secret for verifying the `x-webhook-signature` header on
    /// incoming transfer notifications.
    #[clap(long, env = "GATEWAY_WEBHOOK_SECRET", hide_env_values = true)]
    pub webhook_secret: Option<String>,

    /// Discard webhook deliveries whose signature is missing or wrong instead
    /// of processing them best-effort. The endpoint still answers 200.
    #[clap(long)]
    pub require_signed_webhooks: bool,

    /// URL the chain watcher is asked to deliver transfer notifications to.
    #[clap(
        long,
        default_value = "http://127.0.0.1:9800/webhook/transfer",
        value_name = "URL"
    )]
    pub watch_callback_url: String,

    /// Import an existing wallet seed phrase instead of generating one on
    /// first run. 24 BIP-39 words, whitespace separated.
    #[clap(long, env = "GATEWAY_SEED_PHRASE", hide_env_values = true)]
    pub seed_phrase: Option<String>,

    /// Skip snapshot persistence entirely. All pool and ledger state is lost
    /// on shutdown.
    #[clap(long)]
    pub no_persist: bool,
}

impl Args {
    pub fn rest_socket_address(&self) -> SocketAddr {
        SocketAddr::new(self.listen_addr, self.rest_port)
    }

    pub fn lease_ttl_timestamp(&self) -> Timestamp {
        Timestamp::from_duration(self.lease_ttl)
    }

    pub fn master_address_for(&self, network: Network) -> Option<&Address> {
        self.master_addresses
            .iter()
            .find(|(n, _)| *n == network)
            .map(|(_, addr)| addr)
    }

    /// The asset identifiers accepted as a deposit on `network`: the built-in
    /// set plus any `--accept-asset` extras.
    pub fn accepted_assets_for(&self, network: Network) -> Vec<AssetId> {
        let mut assets: Vec<AssetId> = network
            .accepted_assets()
            .iter()
            .map(|asset| AssetId::new(*asset))
            .collect();
        assets.extend(
            self.accept_assets
                .iter()
                .filter(|(n, _)| *n == network)
                .map(|(_, asset)| asset.clone()),
        );
        assets
    }
}

impl Default for Args {
    fn default() -> Self {
        let empty: Vec<String> = vec![];
        Self::parse_from(empty)
    }
}

fn parse_master_address(input: &str) -> Result<(Network, Address), String> {
    let (network, address) = split_network_pair(input)?;
    if !network.address_looks_valid(&address) {
        return Err(format!("'{address}' is not a valid {network} address"));
    }
    Ok((network, Address::new(address)))
}

fn parse_accepted_asset(input: &str) -> Result<(Network, AssetId), String> {
    let (network, asset) = split_network_pair(input)?;
    Ok((network, AssetId::new(asset)))
}

fn split_network_pair(input: &str) -> Result<(Network, String), String> {
    let (network, value) = input
        .split_once('=')
        .ok_or_else(|| format!("expected NETWORK=VALUE, got '{input}'"))?;
    let network: Network = network.trim().parse()?;
    let value = value.trim();
    if value.is_empty() {
        return Err(format!("empty value in '{input}'"));
    }
    Ok((network, value.to_string()))
}

#[cfg(test)]
mod cli_args_tests {
    use std::net::Ipv4Addr;

    use super::*;

    #[test]
    fn default_args_test() {
        let default_args = Args::default();

        assert_eq!(Ipv4Addr::new(127, 0, 0, 1), default_args.listen_addr);
        assert_eq!(9800, default_args.rest_port);
        assert_eq!(Duration::from_secs(3600), default_args.lease_ttl);
        assert_eq!(Duration::from_secs(300), default_args.reap_interval);
        assert_eq!(3, default_args.deposit_bonus_percent);
        assert_eq!(7, default_args.referral_commission_percent);
        assert_eq!(Amount::whole(10), default_args.min_deposit);
        assert!(!default_args.require_signed_webhooks);
        assert!(default_args.master_addresses.is_empty());
    }

    #[test]
    fn master_address_pairs_parse() {
        let args = Args::parse_from([
            "deposit-gateway",
            "--master-address",
            "bep20=0x00112233445566778899aabbccddeeff00112233",
        ]);
        let master = args.master_address_for(Network::Bep20).unwrap();
        assert_eq!(
            "0x00112233445566778899aabbccddeeff00112233",
            master.as_str()
        );
        assert!(args.master_address_for(Network::Trc20).is_none());
    }

    #[test]
    fn bad_master_address_is_rejected() {
        assert!(parse_master_address("bep20=nonsense").is_err());
        assert!(parse_master_address("doge=0x00").is_err());
        assert!(parse_master_address("bep20").is_err());
    }

    #[test]
    fn extra_assets_extend_the_builtin_set() {
        let args = Args::parse_from([
            "deposit-gateway",
            "--accept-asset",
            "trc20=TExtraToken111111111111111111111",
        ]);
        let trc = args.accepted_assets_for(Network::Trc20);
        assert!(trc
            .iter()
            .any(|a| a.matches("TExtraToken111111111111111111111")));
        assert!(trc.iter().any(|a| a.matches("USDT")));
        // the extra asset is scoped to its network
        let bep = args.accepted_assets_for(Network::Bep20);
        assert!(!bep
            .iter()
            .any(|a| a.matches("TExtraToken111111111111111111111")));
    }

    #[test]
    fn humantime_durations_parse() {
        let args = Args::parse_from([
            "deposit-gateway",
            "--lease-ttl",
            "90m",
            "--reap-interval",
            "30s",
        ]);
        assert_eq!(Duration::from_secs(5400), args.lease_ttl);
        assert_eq!(Duration::from_secs(30), args.reap_interval);
        assert_eq!(Timestamp::minutes(90), args.lease_ttl_timestamp());
    }
}
