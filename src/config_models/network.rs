use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use serde::Serialize;
use strum::EnumIter;

/// The deposit networks the gateway can lease addresses on.
///
/// The set is closed on purpose: every capability of a network is answered by
/// an exhaustive match below, so adding a variant surfaces every site that
/// needs a decision as a compile error.
#[derive(
    Clone,
    Copy,
    Debug,
    Hash,
    Serialize,
    Deserialize,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Default,
    EnumIter,
    strum::EnumIs,
)]
#[non_exhaustive]
pub enum Network {
    /// BNB Smart Chain, BEP-20 token standard. Hex addresses with an `0x`
    /// prefix.
    #[default]
    Bep20,

    /// TRON, TRC-20 token standard. Base58Check addresses with a `T` prefix.
    Trc20,
}

impl Network {
    /// The token the platform credits deposits in on this network.
    pub fn primary_asset(&self) -> &'static str {
        match self {
            Network::Bep20 => "USDT",
            Network::Trc20 => "USDT",
        }
    }

    /// Asset identifiers accepted as a deposit on this network, by ticker
    /// symbol or token contract. Watch providers report one or the other.
    pub fn accepted_assets(&self) -> &'static [&'static str] {
        match self {
            Network::Bep20 => &[
                "USDT",
                "BSC-USD",
                "0x55d398326f99059fF775485246999027B3197955",
            ],
            Network::Trc20 => &["USDT", "TR7NHqjeKQxGTCi8q8ZY4pL8otSzgjLj6t"],
        }
    }

    /// BIP-44 coin type used in this network's derivation path.
    pub fn coin_type(&self) -> u32 {
        match self {
            Network::Bep20 => 60,
            Network::Trc20 => 195,
        }
    }

    /// Cheap shape check for addresses on this network. Used to validate
    /// operator-supplied master addresses, not to authenticate anything.
    pub fn address_looks_valid(&self, address: &str) -> bool {
        match self {
            Network::Bep20 => {
                address.len() == 42
                    && address.starts_with("0x")
                    && address[2..].chars().all(|c| c.is_ascii_hexdigit())
            }
            Network::Trc20 => {
                address.len() == 34
                    && address.starts_with('T')
                    && address.chars().all(|c| c.is_ascii_alphanumeric())
            }
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let string = match self {
            Network::Bep20 => "bep20",
            Network::Trc20 => "trc20",
        };
        write!(f, "{}", string)
    }
}

impl FromStr for Network {
    type Err = String;
    fn from_str(input: &str) -> Result<Network, Self::Err> {
        match input.to_ascii_lowercase().as_str() {
            "bep20" | "bsc" => Ok(Network::Bep20),
            "trc20" | "tron" => Ok(Network::Trc20),
            _ => Err(format!("Failed to parse {} as network", input)),
        }
    }
}
