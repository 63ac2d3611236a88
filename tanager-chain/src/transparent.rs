//! Transparent inputs and outputs: the UTXO-facing half of a transaction.

mod script;
mod serialize;

pub use script::Script;

use std::fmt;

use crate::amount::Amount;
use crate::block::Height;
use crate::serialize::VarInt;
use crate::transaction::Txid;

/// A reference to a particular output of a particular transaction.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OutPoint {
    /// The transaction whose output is being referenced.
    pub txid: Txid,
    /// The index of the output within that transaction, starting at 0.
    pub index: u32,
}

impl OutPoint {
    /// Serialized length: a txid plus a u32 index.
    pub const LEN: usize = 36;

    /// The null outpoint carried by coinbase inputs.
    pub const fn null() -> OutPoint {
        OutPoint {
            txid: Txid::zero(),
            index: u32::MAX,
        }
    }

    pub fn is_null(&self) -> bool {
        self.index == u32::MAX && self.txid == Txid::zero()
    }
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.txid, self.index)
    }
}

/// Arbitrary data miners place in a coinbase input where the unlock script
/// would otherwise be. After BIP-34 the data must begin with a script push
/// of the block height.
#[derive(Clone, Eq, PartialEq)]
pub struct CoinbaseData(pub(crate) Vec<u8>);

impl CoinbaseData {
    /// Consensus bounds on the coinbase script length.
    pub const MIN_LEN: usize = 2;
    pub const MAX_LEN: usize = 100;

    pub fn new(data: Vec<u8>) -> CoinbaseData {
        CoinbaseData(data)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The BIP-34 height prefix, if the data begins with a well-formed
    /// height push.
    ///
    /// BIP-34 heights are serialized as a minimal script-number push:
    /// a length byte (1..=5) followed by that many little-endian bytes.
    /// The small direct-push opcodes OP_1..OP_16 cover heights 1..=16,
    /// which only occur on test networks.
    pub fn reported_height(&self) -> Option<Height> {
        let first = *self.0.get(0)?;
        match first {
            0x01..=0x05 => {
                let len = first as usize;
                let bytes = self.0.get(1..1 + len)?;
                // The high bit of the last byte is a script-number sign
                // bit; a negative or overflowing height is not a height.
                let mut value: u64 = 0;
                for (i, &b) in bytes.iter().enumerate() {
                    value |= (b as u64) << (8 * i);
                }
                if bytes.last().map(|b| b & 0x80 != 0) == Some(true) || value > u32::MAX as u64 {
                    return None;
                }
                Some(Height(value as u32))
            }
            0x51..=0x60 => Some(Height((first - 0x50) as u32)),
            _ => None,
        }
    }

    /// Encode a height as the BIP-34 script push.
    pub fn height_prefix(height: Height) -> Vec<u8> {
        let mut bytes = Vec::new();
        let mut value = height.0;
        if value == 0 {
            return vec![0x01, 0x00];
        }
        while value > 0 {
            bytes.push((value & 0xff) as u8);
            value >>= 8;
        }
        // Keep the sign bit clear so the number reads back non-negative.
        if bytes.last().map(|b| b & 0x80 != 0) == Some(true) {
            bytes.push(0x00);
        }
        let mut out = vec![bytes.len() as u8];
        out.extend(bytes);
        out
    }
}

impl fmt::Debug for CoinbaseData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let escaped = String::from_utf8(
            self.0
                .iter()
                .cloned()
                .flat_map(std::ascii::escape_default)
                .collect(),
        )
        .expect("ascii::escape_default produces utf8");
        f.debug_tuple("CoinbaseData").field(&escaped).finish()
    }
}

/// A transparent input to a transaction.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Input {
    /// A spend of an output of a previous transaction.
    PrevOut {
        /// The previous output being consumed.
        outpoint: OutPoint,
        /// The script that authorizes spending `outpoint`.
        unlock_script: Script,
        /// The sequence number, consumed by BIP-68 relative locks.
        sequence: u32,
    },
    /// New coins minted by the block reward. Carries a null prevout on
    /// the wire.
    Coinbase {
        /// Free data inserted by miners; includes the BIP-34 height.
        data: CoinbaseData,
        /// The sequence number.
        sequence: u32,
    },
}

impl Input {
    /// The input's sequence number.
    pub fn sequence(&self) -> u32 {
        match self {
            Input::PrevOut { sequence, .. } | Input::Coinbase { sequence, .. } => *sequence,
        }
    }

    /// The outpoint this input consumes, `None` for coinbase inputs.
    pub fn outpoint(&self) -> Option<OutPoint> {
        match self {
            Input::PrevOut { outpoint, .. } => Some(*outpoint),
            Input::Coinbase { .. } => None,
        }
    }

    /// Serialized length of this input.
    pub fn serialized_len(&self) -> usize {
        match self {
            Input::PrevOut { unlock_script, .. } => {
                OutPoint::LEN + unlock_script.serialized_len() + 4
            }
            Input::Coinbase { data, .. } => {
                OutPoint::LEN + VarInt::size(data.len()) + data.len() + 4
            }
        }
    }
}

/// A transparent output of a transaction.
///
/// Outputs are indivisible, discrete units of value that can only be
/// consumed whole; the set of unspent outputs is the chain's monetary
/// state.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct Output {
    /// The output value.
    pub value: Amount,
    /// The lock script: the conditions under which the output may be
    /// spent.
    pub lock_script: Script,
}

impl Output {
    /// Serialized length of this output.
    pub fn serialized_len(&self) -> usize {
        8 + self.lock_script.serialized_len()
    }
}
