//! Blocks and block-related structures (heights, headers, merkle trees).

mod hash;
mod header;
mod height;

pub mod merkle;


use std::{fmt, io};

use crate::serialize::{self, Decode, Encode, SerializationError};
use crate::transaction::Transaction;
use crate::transparent;

pub use hash::Hash;
pub use header::Header;
pub use height::Height;

/// The maximum serialized size of a block, in bytes, witness included.
pub const MAX_BLOCK_BYTES: u64 = 4_000_000;

/// A Bitcoin block: a header plus the transactions it commits to.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Block {
    /// The block header, containing block metadata.
    pub header: Header,
    /// The block transactions. The first must be the coinbase.
    pub transactions: Vec<std::sync::Arc<Transaction>>,
}

impl Block {
    /// Compute the hash of this block.
    pub fn hash(&self) -> Hash {
        self.header.hash()
    }

    /// The block height reported in the coinbase scriptSig (BIP-34), if
    /// the coinbase carries one.
    pub fn coinbase_height(&self) -> Option<Height> {
        self.transactions
            .get(0)
            .and_then(|tx| tx.inputs.get(0))
            .and_then(|input| match input {
                transparent::Input::Coinbase { data, .. } => data.reported_height(),
                _ => None,
            })
    }

    /// Serialized size of the full block, witness data included.
    pub fn serialized_len(&self) -> usize {
        Header::LEN
            + serialize::VarInt::size(self.transactions.len())
            + self
                .transactions
                .iter()
                .map(|tx| tx.serialized_len())
                .sum::<usize>()
    }

    /// Serialized size counting only the non-witness form of each
    /// transaction, the pre-SegWit "base size".
    pub fn base_len(&self) -> usize {
        Header::LEN
            + serialize::VarInt::size(self.transactions.len())
            + self.transactions.iter().map(|tx| tx.base_len()).sum::<usize>()
    }

    /// BIP-141 block weight: three times the base size plus the total size.
    pub fn weight(&self) -> usize {
        3 * self.base_len() + self.serialized_len()
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut fmter = f.debug_struct("Block");
        if let Some(height) = self.coinbase_height() {
            fmter.field("height", &height);
        }
        fmter.field("hash", &self.hash()).finish()
    }
}

impl Encode for Block {
    fn encode<W: io::Write>(&self, mut writer: W) -> Result<(), io::Error> {
        self.header.encode(&mut writer)?;
        serialize::encode_seq(&self.transactions, &mut writer)
    }
}

impl Decode for Block {
    fn decode<R: io::Read>(reader: R) -> Result<Self, SerializationError> {
        // If the limit is hit mid-transaction we get an UnexpectedEof.
        let mut reader = reader.take(MAX_BLOCK_BYTES);
        let header = Header::decode(&mut reader)?;

        let tx_count = serialize::VarInt::decode(&mut reader)?.value();
        // Every transaction needs at least one input, so this bound holds
        // for any block that could possibly be valid.
        if tx_count > MAX_BLOCK_BYTES / (36 * 4) {
            return Err(SerializationError::Parse(
                "block claims more transactions than could fit",
            ));
        }

        let mut transactions = Vec::with_capacity(std::cmp::min(tx_count as usize, 1024));
        for _ in 0..tx_count {
            transactions.push(std::sync::Arc::new(Transaction::decode(&mut reader)?));
        }

        Ok(Block {
            header,
            transactions,
        })
    }
}
