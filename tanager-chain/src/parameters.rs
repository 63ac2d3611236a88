//! Network parameters: chain selection, genesis anchors, activation
//! heights, and the frozen consensus limits.

mod genesis;

pub use genesis::{genesis_hash, genesis_header, GENESIS_PREVIOUS_BLOCK_HASH};

use crate::block::Height;
use crate::work::{CompactDifficulty, ExpandedDifficulty};
use primitive_types::U256;

/// The maximum block weight (BIP-141 weight units).
pub const MAX_BLOCK_WEIGHT: usize = 4_000_000;

/// The legacy maximum block size in bytes, still the bound on the
/// non-witness serialization.
pub const MAX_BLOCK_SIZE: usize = 1_000_000;

/// The maximum number of signature operations in a block.
pub const MAX_BLOCK_SIGOPS: usize = 80_000;

/// Blocks a coinbase output must wait before it can be spent.
pub const COINBASE_MATURITY: u32 = 100;

/// The difficulty retargeting interval, in blocks.
pub const DIFFICULTY_INTERVAL: u32 = 2016;

/// The target spacing between blocks, in seconds.
pub const TARGET_BLOCK_TIME: u32 = 600;

/// A sequence number of all ones opts an input out of lock-time checks.
pub const SEQUENCE_FINAL: u32 = 0xffff_ffff;

/// BIP-68: bit 31 disables relative lock-time for the input.
pub const SEQUENCE_LOCKTIME_DISABLE: u32 = 1 << 31;

/// BIP-68: bit 22 selects time-based (512 s granules) relative locks.
pub const SEQUENCE_LOCKTIME_TYPE: u32 = 1 << 22;

/// BIP-68: the low 16 bits carry the relative lock value.
pub const SEQUENCE_LOCKTIME_MASK: u32 = 0x0000_ffff;

/// An address-prefix-free identifier for the chain we are following.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    /// The production network.
    Mainnet,
    /// The public test network.
    Testnet,
    /// A local regression-test network with trivial difficulty.
    Regtest,
}

impl Default for Network {
    fn default() -> Network {
        Network::Mainnet
    }
}

impl std::fmt::Display for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Network::Mainnet => f.write_str("mainnet"),
            Network::Testnet => f.write_str("testnet"),
            Network::Regtest => f.write_str("regtest"),
        }
    }
}

impl Network {
    /// The easiest target this network permits (the "proof of work
    /// limit").
    pub fn target_difficulty_limit(self) -> ExpandedDifficulty {
        let limit = match self {
            // Mainnet and testnet share nBits 0x1d00ffff.
            Network::Mainnet | Network::Testnet => U256::from_big_endian(&{
                let mut bytes = [0u8; 32];
                bytes[4] = 0xff;
                bytes[5] = 0xff;
                bytes
            }),
            // Regtest: almost no work required.
            Network::Regtest => U256::max_value() >> 1,
        };
        ExpandedDifficulty::from_u256(limit)
    }

    /// The compact form of the difficulty limit, used by genesis and
    /// regtest blocks.
    pub fn limit_bits(self) -> CompactDifficulty {
        match self {
            Network::Mainnet | Network::Testnet => CompactDifficulty(0x1d00_ffff),
            Network::Regtest => CompactDifficulty(0x207f_ffff),
        }
    }

    /// BIP-34: coinbase must begin with the block height.
    pub fn bip34_height(self) -> Height {
        match self {
            Network::Mainnet => Height(227_931),
            Network::Testnet => Height(21_111),
            Network::Regtest => Height(0),
        }
    }

    /// BIP-16: pay-to-script-hash evaluation.
    pub fn bip16_height(self) -> Height {
        match self {
            Network::Mainnet => Height(173_805),
            Network::Testnet | Network::Regtest => Height(0),
        }
    }

    /// BIP-66: strict DER signature encoding.
    pub fn bip66_height(self) -> Height {
        match self {
            Network::Mainnet => Height(363_725),
            Network::Testnet => Height(330_776),
            Network::Regtest => Height(0),
        }
    }

    /// BIP-65: OP_CHECKLOCKTIMEVERIFY.
    pub fn bip65_height(self) -> Height {
        match self {
            Network::Mainnet => Height(388_381),
            Network::Testnet => Height(581_885),
            Network::Regtest => Height(0),
        }
    }

    /// BIP-68/112/113: relative lock-times and OP_CHECKSEQUENCEVERIFY.
    pub fn bip68_height(self) -> Height {
        match self {
            Network::Mainnet => Height(419_328),
            Network::Testnet => Height(770_112),
            Network::Regtest => Height(0),
        }
    }

    /// BIP-141/143: segregated witness.
    pub fn segwit_height(self) -> Height {
        match self {
            Network::Mainnet => Height(481_824),
            Network::Testnet => Height(834_624),
            Network::Regtest => Height(0),
        }
    }

    /// BIP-341/342: taproot.
    pub fn taproot_height(self) -> Height {
        match self {
            Network::Mainnet => Height(709_632),
            Network::Testnet => Height(2_064_406),
            Network::Regtest => Height(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_bits_expand_to_the_limit() {
        for &network in &[Network::Mainnet, Network::Testnet] {
            let expanded = network
                .limit_bits()
                .to_expanded()
                .expect("limit bits are a valid encoding");
            assert_eq!(expanded, network.target_difficulty_limit());
        }
    }
}
