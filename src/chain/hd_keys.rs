//! Deterministic HD key derivation for the deposit pool
//!
//! BIP-44 style paths (`m/44'/coin'/0'/0/index`) over an HMAC-SHA512 chain.
//! The same seed always yields the same key at the same index, which is what
//! lets a restarted gateway re-derive every pool address it has ever handed
//! out.

use hmac::Hmac;
use hmac::Mac;
use sha2::Sha512;
use zeroize::Zeroizing;

use crate::config_models::network::Network;

type HmacSha512 = Hmac<Sha512>;

/// Master key plus chain code, split from the seed the BIP-32 way.
pub struct HdKeyTree {
    master_key: Zeroizing<Vec<u8>>,
    chain_code: Zeroizing<Vec<u8>>,
}

impl std::fmt::Debug for HdKeyTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HdKeyTree").finish_non_exhaustive()
    }
}

impl HdKeyTree {
    pub fn from_seed(seed: &[u8]) -> Self {
        let mut mac = HmacSha512::new_from_slice(b"Bitcoin seed")
            .expect("HMAC accepts any key length (bug)");
        mac.update(seed);
        let digest = mac.finalize().into_bytes();

        Self {
            master_key: Zeroizing::new(digest[0..32].to_vec()),
            chain_code: Zeroizing::new(digest[32..64].to_vec()),
        }
    }

    /// Private key at `m/44'/coin_type'/0'/0/index` for the given network.
    pub fn private_key_at(&self, network: Network, index: u64) -> Zeroizing<Vec<u8>> {
        let path = format!("m/44'/{}'/0'/0/{}", network.coin_type(), index);
        let mut mac = HmacSha512::new_from_slice(&self.chain_code)
            .expect("HMAC accepts any key length (bug)");
        mac.update(&self.master_key);
        mac.update(path.as_bytes());
        let digest = mac.finalize().into_bytes();

        Zeroizing::new(digest[0..32].to_vec())
    }
}

/// Public key for a private key.
///
/// Hash-based stand-in for the curve multiplication a production signer
/// performs. Pure: the same private key always maps to the same public key,
/// which is all the derive/re-derive integrity check relies on.
pub fn public_key_for(private_key: &[u8]) -> Vec<u8> {
    use sha2::Digest;
    let mut hasher = sha2::Sha256::new();
    hasher.update(b"deposit-gateway-pubkey");
    hasher.update(private_key);
    hasher.finalize().to_vec()
}
