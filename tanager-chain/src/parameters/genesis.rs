//! Genesis anchors.

use crate::block::{self, merkle};
use crate::parameters::Network;
use crate::work::CompactDifficulty;

/// The hash of the genesis block for `network`.
///
/// Genesis blocks are not downloaded or validated like other blocks; the
/// chain is anchored on these hashes.
pub fn genesis_hash(network: Network) -> block::Hash {
    match network {
        // The one Satoshi mined on 2009-01-03.
        Network::Mainnet => "000000000019d6689c085ae165831e934ff763ae46a2a6c172b3f1b60a8ce26f",
        Network::Testnet => "000000000933ea01ad0ee984209779baaec3ced90fa3f408719526f8d77f4943",
        Network::Regtest => "0f9188f13cb7b2c71f2a335e3a4fc328bf5beb436012afca590b1a11466e2206",
    }
    .parse()
    .expect("hard-coded hashes parse")
}

/// The genesis block header for `network`, field for field.
///
/// All three networks share the same genesis coinbase, so the merkle
/// root is common; time, bits, and nonce differ. The header index seeds
/// itself with this header so the chain is rooted before any peer says
/// a word.
pub fn genesis_header(network: Network) -> block::Header {
    let merkle_root: block::Hash =
        "4a5e1e4baab89f3a32518a88c31bc87f618f76673e2cc77ab2127b7afdeda33b"
            .parse()
            .expect("hard-coded hashes parse");
    let (time, bits, nonce) = match network {
        Network::Mainnet => (1_231_006_505, 0x1d00_ffff, 2_083_236_893),
        Network::Testnet => (1_296_688_602, 0x1d00_ffff, 414_098_458),
        Network::Regtest => (1_296_688_602, 0x207f_ffff, 2),
    };
    block::Header::new(
        1,
        GENESIS_PREVIOUS_BLOCK_HASH,
        merkle::Root(merkle_root.0),
        time,
        CompactDifficulty(bits),
        nonce,
    )
}

/// The all-zero hash a genesis header names as its parent.
pub const GENESIS_PREVIOUS_BLOCK_HASH: block::Hash = block::Hash([0u8; 32]);
