//! The Bitcoin consensus wire encoding.
//!
//! `Encode` and `Decode` are analogs of serde's `Serialize`/`Deserialize`
//! for the consensus-critical byte format: little-endian integers, length
//! prefixes as Bitcoin variable integers, and raw byte arrays. Every type
//! that crosses the wire or a hash function implements them by hand; the
//! format is frozen, so there is nothing for a derive to save us from.

use std::io::{self, Read};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use thiserror::Error;

/// An error that prevented deserialization of a consensus object.
#[derive(Error, Debug)]
pub enum SerializationError {
    /// An io error that prevented deserialization
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    /// The data to be deserialized was malformed.
    #[error("parse error: {0}")]
    Parse(&'static str),
}

type Result<T> = std::result::Result<T, SerializationError>;

/// Consensus serialization to the Bitcoin wire format.
pub trait Encode {
    fn encode<W: io::Write>(&self, writer: W) -> std::result::Result<(), io::Error>;

    fn encode_to_vec(&self) -> Vec<u8> {
        let mut data = Vec::new();
        self.encode(&mut data)
            .expect("writing to a Vec never fails");
        data
    }

    /// The exact length of the encoding, in bytes.
    fn encoded_len(&self) -> usize {
        self.encode_to_vec().len()
    }
}

/// Consensus deserialization from the Bitcoin wire format.
pub trait Decode {
    fn decode<R: io::Read>(reader: R) -> Result<Self>
    where
        Self: Sized;
}

/// Helper for deserializing more succinctly via type inference.
pub trait DecodeInto {
    fn decode_into<T: Decode>(self) -> Result<T>;
}

impl<R: io::Read> DecodeInto for R {
    fn decode_into<T: Decode>(self) -> Result<T> {
        T::decode(self)
    }
}

/// The Bitcoin variable-length integer.
///
/// Values below 0xfd are a single byte; larger values carry a one-byte
/// marker followed by a little-endian u16, u32, or u64.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct VarInt(pub u64);

impl VarInt {
    pub fn value(self) -> u64 {
        self.0
    }

    /// Encoded size of a varint holding `value`.
    pub fn size(value: usize) -> usize {
        match value as u64 {
            0..=0xfc => 1,
            0xfd..=0xffff => 3,
            0x1_0000..=0xffff_ffff => 5,
            _ => 9,
        }
    }
}

impl From<usize> for VarInt {
    fn from(value: usize) -> VarInt {
        VarInt(value as u64)
    }
}

impl Encode for VarInt {
    fn encode<W: io::Write>(&self, mut writer: W) -> std::result::Result<(), io::Error> {
        match self.0 {
            0..=0xfc => writer.write_u8(self.0 as u8),
            0xfd..=0xffff => {
                writer.write_u8(0xfd)?;
                writer.write_u16::<LittleEndian>(self.0 as u16)
            }
            0x1_0000..=0xffff_ffff => {
                writer.write_u8(0xfe)?;
                writer.write_u32::<LittleEndian>(self.0 as u32)
            }
            _ => {
                writer.write_u8(0xff)?;
                writer.write_u64::<LittleEndian>(self.0)
            }
        }
    }

    fn encoded_len(&self) -> usize {
        VarInt::size(self.0 as usize)
    }
}

impl Decode for VarInt {
    fn decode<R: io::Read>(mut reader: R) -> Result<VarInt> {
        let first = reader.read_u8()?;
        let value = match first {
            0xfd => reader.read_u16::<LittleEndian>()? as u64,
            0xfe => reader.read_u32::<LittleEndian>()? as u64,
            0xff => reader.read_u64::<LittleEndian>()?,
            _ => first as u64,
        };
        Ok(VarInt(value))
    }
}

impl Encode for u8 {
    fn encode<W: io::Write>(&self, mut writer: W) -> std::result::Result<(), io::Error> {
        writer.write_u8(*self)
    }
}

impl Decode for u8 {
    fn decode<R: io::Read>(mut reader: R) -> Result<u8> {
        Ok(reader.read_u8()?)
    }
}

impl Encode for u16 {
    fn encode<W: io::Write>(&self, mut writer: W) -> std::result::Result<(), io::Error> {
        writer.write_u16::<LittleEndian>(*self)
    }
}

impl Decode for u16 {
    fn decode<R: io::Read>(mut reader: R) -> Result<u16> {
        Ok(reader.read_u16::<LittleEndian>()?)
    }
}

impl Encode for u32 {
    fn encode<W: io::Write>(&self, mut writer: W) -> std::result::Result<(), io::Error> {
        writer.write_u32::<LittleEndian>(*self)
    }
}

impl Decode for u32 {
    fn decode<R: io::Read>(mut reader: R) -> Result<u32> {
        Ok(reader.read_u32::<LittleEndian>()?)
    }
}

impl Encode for u64 {
    fn encode<W: io::Write>(&self, mut writer: W) -> std::result::Result<(), io::Error> {
        writer.write_u64::<LittleEndian>(*self)
    }
}

impl Decode for u64 {
    fn decode<R: io::Read>(mut reader: R) -> Result<u64> {
        Ok(reader.read_u64::<LittleEndian>()?)
    }
}

impl Encode for i32 {
    fn encode<W: io::Write>(&self, mut writer: W) -> std::result::Result<(), io::Error> {
        writer.write_i32::<LittleEndian>(*self)
    }
}

impl Decode for i32 {
    fn decode<R: io::Read>(mut reader: R) -> Result<i32> {
        Ok(reader.read_i32::<LittleEndian>()?)
    }
}

impl Encode for i64 {
    fn encode<W: io::Write>(&self, mut writer: W) -> std::result::Result<(), io::Error> {
        writer.write_i64::<LittleEndian>(*self)
    }
}

impl Decode for i64 {
    fn decode<R: io::Read>(mut reader: R) -> Result<i64> {
        Ok(reader.read_i64::<LittleEndian>()?)
    }
}

impl Encode for [u8; 32] {
    fn encode<W: io::Write>(&self, mut writer: W) -> std::result::Result<(), io::Error> {
        writer.write_all(self)
    }
}

impl Decode for [u8; 32] {
    fn decode<R: io::Read>(mut reader: R) -> Result<[u8; 32]> {
        let mut bytes = [0u8; 32];
        reader.read_exact(&mut bytes)?;
        Ok(bytes)
    }
}

/// Byte vectors carry a varint length prefix followed by the raw bytes.
impl Encode for Vec<u8> {
    fn encode<W: io::Write>(&self, mut writer: W) -> std::result::Result<(), io::Error> {
        VarInt::from(self.len()).encode(&mut writer)?;
        writer.write_all(self)
    }

    fn encoded_len(&self) -> usize {
        VarInt::size(self.len()) + self.len()
    }
}

impl Decode for Vec<u8> {
    fn decode<R: io::Read>(mut reader: R) -> Result<Vec<u8>> {
        let len = VarInt::decode(&mut reader)?.value();
        // Blind preallocation from an attacker-supplied length is a DoS
        // vector; cap the initial reservation and let read_to_end grow.
        let mut bytes = Vec::with_capacity(std::cmp::min(len as usize, 1024));
        let read = (&mut reader).take(len).read_to_end(&mut bytes)?;
        if read as u64 != len {
            return Err(SerializationError::Parse("truncated byte vector"));
        }
        Ok(bytes)
    }
}

impl<T: Encode> Encode for std::sync::Arc<T> {
    fn encode<W: io::Write>(&self, writer: W) -> std::result::Result<(), io::Error> {
        self.as_ref().encode(writer)
    }

    fn encoded_len(&self) -> usize {
        self.as_ref().encoded_len()
    }
}

impl<T: Decode> Decode for std::sync::Arc<T> {
    fn decode<R: io::Read>(reader: R) -> Result<std::sync::Arc<T>> {
        Ok(std::sync::Arc::new(T::decode(reader)?))
    }
}

/// Encode a sequence as a varint count followed by each element.
///
/// Written as a free function rather than a blanket `Vec<T>` impl so the
/// dedicated `Vec<u8>` byte-payload impl above cannot conflict with it.
pub fn encode_seq<T: Encode, W: io::Write>(
    items: &[T],
    mut writer: W,
) -> std::result::Result<(), io::Error> {
    VarInt::from(items.len()).encode(&mut writer)?;
    for item in items {
        item.encode(&mut writer)?;
    }
    Ok(())
}

/// Decode a varint-counted sequence of elements.
pub fn decode_seq<T: Decode, R: io::Read>(mut reader: R) -> Result<Vec<T>> {
    let len = VarInt::decode(&mut reader)?.value() as usize;
    let mut items = Vec::with_capacity(std::cmp::min(len, 1024));
    for _ in 0..len {
        items.push(T::decode(&mut reader)?);
    }
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn varint_boundaries() {
        for (value, bytes) in [
            (0u64, vec![0x00]),
            (0xfc, vec![0xfc]),
            (0xfd, vec![0xfd, 0xfd, 0x00]),
            (0xffff, vec![0xfd, 0xff, 0xff]),
            (0x1_0000, vec![0xfe, 0x00, 0x00, 0x01, 0x00]),
            (
                0x1_0000_0000,
                vec![0xff, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00],
            ),
        ] {
            let encoded = VarInt(value).encode_to_vec();
            assert_eq!(encoded, bytes, "encoding of {}", value);
            let decoded = VarInt::decode(&encoded[..]).expect("valid varint");
            assert_eq!(decoded.value(), value);
        }
    }

    #[test]
    fn byte_vector_roundtrip() {
        let data = vec![1u8, 2, 3, 4, 5];
        let encoded = data.encode_to_vec();
        assert_eq!(encoded[0], 5);
        let decoded = Vec::<u8>::decode(&encoded[..]).expect("valid vector");
        assert_eq!(decoded, data);
    }

    #[test]
    fn truncated_byte_vector_is_rejected() {
        // Claims 10 bytes, provides 2.
        let encoded = vec![0x0a, 0x01, 0x02];
        assert!(Vec::<u8>::decode(&encoded[..]).is_err());
    }
}
