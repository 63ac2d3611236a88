//! Transactions and transaction-related structures.

mod hash;
mod lock_time;
mod serialize;

#[cfg(test)]
mod tests;

use crate::serialize::VarInt;
use crate::transparent;
use crate::Cached;

pub use hash::{Txid, WtxId};
pub use lock_time::{LockTime, LOCK_TIME_THRESHOLD};

/// The maximum serialized transaction size, in bytes.
pub const MAX_TX_BYTES: usize = 400_000;

/// One input's segregated witness: a stack of byte strings consumed by
/// SegWit script evaluation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Witness(pub Vec<Vec<u8>>);

impl Witness {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A Bitcoin transaction.
///
/// A transaction destroys the outputs its inputs name and creates its own
/// outputs in their place; the network-wide set of unspent outputs is the
/// whole of the monetary state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transaction {
    /// The transaction version. Version 2 and up opt in to BIP-68
    /// relative lock-time semantics.
    pub version: i32,
    /// The transaction inputs.
    pub inputs: Vec<transparent::Input>,
    /// The transaction outputs.
    pub outputs: Vec<transparent::Output>,
    /// The earliest height or time this transaction may be mined at.
    pub lock_time: LockTime,
    /// Per-input witness stacks. Empty for pre-SegWit transactions;
    /// otherwise exactly one stack per input.
    pub witnesses: Vec<Witness>,
    /// Memoized txid; never serialized.
    hash: Cached<Txid>,
}

impl Transaction {
    pub fn new(
        version: i32,
        inputs: Vec<transparent::Input>,
        outputs: Vec<transparent::Output>,
        lock_time: LockTime,
    ) -> Transaction {
        Transaction {
            version,
            inputs,
            outputs,
            lock_time,
            witnesses: Vec::new(),
            hash: Cached::empty(),
        }
    }

    /// The txid: the sha256d of the non-witness serialization.
    pub fn hash(&self) -> Txid {
        if let Some(hash) = self.hash.value() {
            return hash;
        }
        Txid::from(self)
    }

    /// The wtxid: the sha256d of the full serialization, witness included.
    /// Equal to the txid when no input carries a witness.
    pub fn witness_hash(&self) -> WtxId {
        WtxId::from(self)
    }

    /// Does any input carry witness data?
    pub fn has_witness(&self) -> bool {
        self.witnesses.iter().any(|w| !w.is_empty())
    }

    /// Returns `true` if this transaction is a coinbase transaction.
    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1
            && matches!(self.inputs.get(0), Some(transparent::Input::Coinbase { .. }))
    }

    /// Does the transaction contain a coinbase input anywhere? Used to
    /// reject coinbase inputs smuggled into non-coinbase positions.
    pub fn contains_coinbase_input(&self) -> bool {
        self.inputs
            .iter()
            .any(|input| matches!(input, transparent::Input::Coinbase { .. }))
    }

    /// Serialized length of the non-witness form.
    pub fn base_len(&self) -> usize {
        let mut size = 4; // version
        size += VarInt::size(self.inputs.len());
        for input in self.inputs.iter() {
            size += input.serialized_len();
        }
        size += VarInt::size(self.outputs.len());
        for output in self.outputs.iter() {
            size += output.serialized_len();
        }
        size + 4 // lock_time
    }

    /// Serialized length of the full form, witness included.
    pub fn serialized_len(&self) -> usize {
        if !self.has_witness() {
            return self.base_len();
        }
        let witness_len: usize = self
            .witnesses
            .iter()
            .map(|w| {
                VarInt::size(w.0.len())
                    + w.0
                        .iter()
                        .map(|item| VarInt::size(item.len()) + item.len())
                        .sum::<usize>()
            })
            .sum();
        self.base_len() + 2 + witness_len // marker + flag
    }

    /// BIP-141 transaction weight.
    pub fn weight(&self) -> usize {
        3 * self.base_len() + self.serialized_len()
    }
}
