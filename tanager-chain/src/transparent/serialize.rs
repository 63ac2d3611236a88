use std::io::{self, Read};

use crate::serialize::{Decode, Encode, SerializationError, VarInt};
use crate::transaction::Txid;

use super::{CoinbaseData, Input, OutPoint, Output, Script};

impl Encode for OutPoint {
    fn encode<W: io::Write>(&self, mut writer: W) -> Result<(), io::Error> {
        self.txid.encode(&mut writer)?;
        self.index.encode(&mut writer)
    }

    fn encoded_len(&self) -> usize {
        OutPoint::LEN
    }
}

impl Decode for OutPoint {
    fn decode<R: io::Read>(mut reader: R) -> Result<Self, SerializationError> {
        Ok(OutPoint {
            txid: Txid::decode(&mut reader)?,
            index: u32::decode(&mut reader)?,
        })
    }
}

/// Both input kinds share the wire layout `prevout ‖ script ‖ sequence`;
/// a coinbase is recognized by its null prevout.
impl Encode for Input {
    fn encode<W: io::Write>(&self, mut writer: W) -> Result<(), io::Error> {
        match self {
            Input::PrevOut {
                outpoint,
                unlock_script,
                sequence,
            } => {
                outpoint.encode(&mut writer)?;
                unlock_script.encode(&mut writer)?;
                sequence.encode(&mut writer)
            }
            Input::Coinbase { data, sequence } => {
                OutPoint::null().encode(&mut writer)?;
                VarInt::from(data.len()).encode(&mut writer)?;
                writer.write_all(data.as_bytes())?;
                sequence.encode(&mut writer)
            }
        }
    }

    fn encoded_len(&self) -> usize {
        self.serialized_len()
    }
}

impl Decode for Input {
    fn decode<R: io::Read>(mut reader: R) -> Result<Self, SerializationError> {
        let outpoint = OutPoint::decode(&mut reader)?;
        if outpoint.is_null() {
            let len = VarInt::decode(&mut reader)?.value();
            if len > CoinbaseData::MAX_LEN as u64 {
                return Err(SerializationError::Parse("coinbase data too long"));
            }
            let mut data = vec![0u8; len as usize];
            reader.read_exact(&mut data)?;
            Ok(Input::Coinbase {
                data: CoinbaseData::new(data),
                sequence: u32::decode(&mut reader)?,
            })
        } else {
            Ok(Input::PrevOut {
                outpoint,
                unlock_script: Script::decode(&mut reader)?,
                sequence: u32::decode(&mut reader)?,
            })
        }
    }
}

impl Encode for Output {
    fn encode<W: io::Write>(&self, mut writer: W) -> Result<(), io::Error> {
        self.value.encode(&mut writer)?;
        self.lock_script.encode(&mut writer)
    }

    fn encoded_len(&self) -> usize {
        self.serialized_len()
    }
}

impl Decode for Output {
    fn decode<R: io::Read>(mut reader: R) -> Result<Self, SerializationError> {
        Ok(Output {
            value: crate::amount::Amount::decode(&mut reader)?,
            lock_script: Script::decode(&mut reader)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coinbase_input_roundtrips_through_null_prevout() {
        let input = Input::Coinbase {
            data: CoinbaseData::new(vec![0x03, 0x5b, 0x7a, 0x03]),
            sequence: 0xffff_ffff,
        };
        let bytes = input.encode_to_vec();
        // Null prevout on the wire.
        assert_eq!(&bytes[..32], &[0u8; 32]);
        assert_eq!(&bytes[32..36], &[0xff; 4]);

        let decoded = Input::decode(&bytes[..]).expect("valid input");
        assert_eq!(decoded, input);
    }

    #[test]
    fn bip34_height_prefix_roundtrips() {
        for &height in &[1u32, 16, 17, 127, 128, 227_931, 500_000, 840_000] {
            let prefix = CoinbaseData::height_prefix(crate::block::Height(height));
            let data = CoinbaseData::new(prefix);
            assert_eq!(
                data.reported_height(),
                Some(crate::block::Height(height)),
                "height {}",
                height
            );
        }
    }

    #[test]
    fn spec_height_encoding_example() {
        // Push of 0x5b 0x7a 0x03 little-endian = 227,931.
        let data = CoinbaseData::new(vec![0x03, 0x5b, 0x7a, 0x03, 0xff]);
        assert_eq!(data.reported_height(), Some(crate::block::Height(227_931)));
    }
}
