use std::{fmt, io};

use crate::primitives::sha256d;
use crate::serialize::{Decode, Encode, SerializationError};

use super::Header;

/// A hash of a block, used to identify blocks and link them into a chain.
///
/// Technically this is the sha256d hash of the block *header*, but because
/// the header commits to the transaction merkle root it identifies the
/// whole block. Displayed in reversed (big-endian) hex, following the u256
/// convention Bitcoin established.
#[derive(Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Hash(pub [u8; 32]);

impl Hash {
    /// The all-zero hash, used as the "previous block" of genesis and the
    /// null prevout txid.
    pub const fn zero() -> Hash {
        Hash([0u8; 32])
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut reversed = self.0;
        reversed.reverse();
        f.write_str(&hex::encode(reversed))
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut reversed = self.0;
        reversed.reverse();
        f.debug_tuple("block::Hash")
            .field(&hex::encode(reversed))
            .finish()
    }
}

impl std::str::FromStr for Hash {
    type Err = SerializationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 32];
        if hex::decode_to_slice(s, &mut bytes[..]).is_err() {
            Err(SerializationError::Parse("hex decoding error"))
        } else {
            bytes.reverse();
            Ok(Hash(bytes))
        }
    }
}

impl<'a> From<&'a Header> for Hash {
    fn from(header: &'a Header) -> Self {
        let mut hash_writer = sha256d::Writer::default();
        header
            .encode(&mut hash_writer)
            .expect("hash writers are infallible");
        Hash(hash_writer.finish())
    }
}

impl Encode for Hash {
    fn encode<W: io::Write>(&self, mut writer: W) -> Result<(), io::Error> {
        writer.write_all(&self.0)
    }

    fn encoded_len(&self) -> usize {
        32
    }
}

impl Decode for Hash {
    fn decode<R: io::Read>(reader: R) -> Result<Self, SerializationError> {
        Ok(Hash(<[u8; 32]>::decode(reader)?))
    }
}
