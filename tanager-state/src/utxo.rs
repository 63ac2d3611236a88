use std::io;

use tanager_chain::block::Height;
use tanager_chain::serialize::{Decode, Encode, SerializationError};
use tanager_chain::transparent;

/// An unspent transaction output, as stored.
///
/// The outpoint is the store key; the value carries what validation
/// needs at spend time: the output itself, the height it was confirmed
/// at, and whether it was minted by a coinbase (for the maturity rule).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Utxo {
    /// The output being tracked.
    pub output: transparent::Output,
    /// The height of the block that created it.
    pub height: Height,
    /// Coinbase outputs are spendable only after 100 blocks.
    pub from_coinbase: bool,
}

impl Utxo {
    pub fn new(output: transparent::Output, height: Height, from_coinbase: bool) -> Utxo {
        Utxo {
            output,
            height,
            from_coinbase,
        }
    }

    /// The maturity rule: a coinbase output is spendable at
    /// `spend_height` only once 100 further blocks exist.
    pub fn is_spendable_at(&self, spend_height: Height) -> bool {
        if !self.from_coinbase {
            return true;
        }
        spend_height.0
            >= self
                .height
                .0
                .saturating_add(tanager_chain::parameters::COINBASE_MATURITY)
    }
}

impl Encode for Utxo {
    fn encode<W: io::Write>(&self, mut writer: W) -> Result<(), io::Error> {
        self.output.encode(&mut writer)?;
        self.height.0.encode(&mut writer)?;
        (self.from_coinbase as u8).encode(&mut writer)
    }
}

impl Decode for Utxo {
    fn decode<R: io::Read>(mut reader: R) -> Result<Self, SerializationError> {
        let output = transparent::Output::decode(&mut reader)?;
        let height = Height(u32::decode(&mut reader)?);
        let from_coinbase = match u8::decode(&mut reader)? {
            0 => false,
            1 => true,
            _ => return Err(SerializationError::Parse("invalid coinbase flag")),
        };
        Ok(Utxo {
            output,
            height,
            from_coinbase,
        })
    }
}

/// The store key for an outpoint: txid bytes then the index, big-endian
/// so sled's ordered iteration groups a transaction's outputs together.
pub(crate) fn outpoint_key(outpoint: &transparent::OutPoint) -> [u8; 36] {
    let mut key = [0u8; 36];
    key[..32].copy_from_slice(&outpoint.txid.0);
    key[32..].copy_from_slice(&outpoint.index.to_be_bytes());
    key
}
