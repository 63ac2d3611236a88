use std::{fmt, io};

use crate::primitives::sha256d;
use crate::serialize::{Decode, Encode, SerializationError};

use super::Transaction;

/// A transaction id: the sha256d of the non-witness serialization.
///
/// Displayed in reversed hex like block hashes.
#[derive(Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Txid(pub [u8; 32]);

/// A witness transaction id: the sha256d of the full serialization.
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct WtxId(pub [u8; 32]);

impl Txid {
    /// The null txid used by coinbase prevouts.
    pub const fn zero() -> Txid {
        Txid([0u8; 32])
    }
}

impl<'a> From<&'a Transaction> for Txid {
    fn from(tx: &'a Transaction) -> Self {
        let mut hash_writer = sha256d::Writer::default();
        tx.encode_base(&mut hash_writer)
            .expect("hash writers are infallible");
        Txid(hash_writer.finish())
    }
}

impl<'a> From<&'a Transaction> for WtxId {
    fn from(tx: &'a Transaction) -> Self {
        let mut hash_writer = sha256d::Writer::default();
        tx.encode(&mut hash_writer)
            .expect("hash writers are infallible");
        WtxId(hash_writer.finish())
    }
}

impl fmt::Display for Txid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut reversed = self.0;
        reversed.reverse();
        f.write_str(&hex::encode(reversed))
    }
}

impl fmt::Debug for Txid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut reversed = self.0;
        reversed.reverse();
        f.debug_tuple("Txid").field(&hex::encode(reversed)).finish()
    }
}

impl fmt::Debug for WtxId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut reversed = self.0;
        reversed.reverse();
        f.debug_tuple("WtxId").field(&hex::encode(reversed)).finish()
    }
}

impl std::str::FromStr for Txid {
    type Err = SerializationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 32];
        if hex::decode_to_slice(s, &mut bytes[..]).is_err() {
            Err(SerializationError::Parse("hex decoding error"))
        } else {
            bytes.reverse();
            Ok(Txid(bytes))
        }
    }
}

impl Encode for Txid {
    fn encode<W: io::Write>(&self, mut writer: W) -> Result<(), io::Error> {
        writer.write_all(&self.0)
    }

    fn encoded_len(&self) -> usize {
        32
    }
}

impl Decode for Txid {
    fn decode<R: io::Read>(reader: R) -> Result<Self, SerializationError> {
        Ok(Txid(<[u8; 32]>::decode(reader)?))
    }
}
