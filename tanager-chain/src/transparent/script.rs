use std::{
    fmt,
    io::{self, Read},
};

use crate::serialize::{Decode, Encode, SerializationError, VarInt};

/// An encoding of a Bitcoin script.
///
/// At this layer a script is only bytes; parsing and execution live in the
/// script crate.
#[derive(Clone, Eq, PartialEq, Hash, Serialize, Deserialize, Default)]
pub struct Script(pub Vec<u8>);

impl Script {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Length on the wire: varint prefix plus the raw bytes.
    pub fn serialized_len(&self) -> usize {
        VarInt::size(self.0.len()) + self.0.len()
    }

    /// Is this an OP_RETURN data carrier? Such outputs are provably
    /// unspendable and never enter the UTXO set.
    pub fn is_op_return(&self) -> bool {
        self.0.first() == Some(&0x6a)
    }
}

impl fmt::Debug for Script {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_tuple("Script").field(&hex::encode(&self.0)).finish()
    }
}

impl Encode for Script {
    fn encode<W: io::Write>(&self, mut writer: W) -> Result<(), io::Error> {
        VarInt::from(self.0.len()).encode(&mut writer)?;
        writer.write_all(&self.0)
    }

    fn encoded_len(&self) -> usize {
        self.serialized_len()
    }
}

impl Decode for Script {
    fn decode<R: io::Read>(mut reader: R) -> Result<Self, SerializationError> {
        let len = VarInt::decode(&mut reader)?.value();
        let mut bytes = Vec::with_capacity(std::cmp::min(len as usize, 1024));
        let read = (&mut reader).take(len).read_to_end(&mut bytes)?;
        if read as u64 != len {
            return Err(SerializationError::Parse("truncated script"));
        }
        Ok(Script(bytes))
    }
}
