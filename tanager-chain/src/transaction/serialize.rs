//! BIP-144 transaction serialization.
//!
//! The non-witness ("base") form is the original layout; the full form
//! inserts the `0x00 0x01` marker/flag pair after the version and appends
//! one witness stack per input before the lock time. Txids hash the base
//! form, wtxids the full form.

use std::io;

use crate::serialize::{self, Decode, Encode, SerializationError, VarInt};
use crate::transparent;
use crate::Cached;

use super::{LockTime, Transaction, Txid, Witness, MAX_TX_BYTES};

impl Transaction {
    /// Encode the non-witness form, the digest input for txids.
    pub fn encode_base<W: io::Write>(&self, mut writer: W) -> Result<(), io::Error> {
        self.version.encode(&mut writer)?;
        serialize::encode_seq(&self.inputs, &mut writer)?;
        serialize::encode_seq(&self.outputs, &mut writer)?;
        self.lock_time.encode(&mut writer)
    }
}

impl Encode for Transaction {
    fn encode<W: io::Write>(&self, mut writer: W) -> Result<(), io::Error> {
        if !self.has_witness() {
            return self.encode_base(writer);
        }

        self.version.encode(&mut writer)?;
        writer.write_all(&[0x00, 0x01])?;
        serialize::encode_seq(&self.inputs, &mut writer)?;
        serialize::encode_seq(&self.outputs, &mut writer)?;
        for witness in self.witnesses.iter() {
            serialize::encode_seq(&witness.0, &mut writer)?;
        }
        self.lock_time.encode(&mut writer)
    }

    fn encoded_len(&self) -> usize {
        self.serialized_len()
    }
}

impl Decode for Transaction {
    fn decode<R: io::Read>(reader: R) -> Result<Self, SerializationError> {
        let mut reader = reader.take(MAX_TX_BYTES as u64);
        let version = i32::decode(&mut reader)?;

        // A zero "input count" here is the SegWit marker: no valid base
        // transaction has zero inputs.
        let first_count = VarInt::decode(&mut reader)?.value();
        let (segwit, input_count) = if first_count == 0 {
            let flag = u8::decode(&mut reader)?;
            if flag != 0x01 {
                return Err(SerializationError::Parse("invalid segwit flag"));
            }
            (true, VarInt::decode(&mut reader)?.value())
        } else {
            (false, first_count)
        };

        let mut inputs = Vec::with_capacity(std::cmp::min(input_count as usize, 1024));
        for _ in 0..input_count {
            inputs.push(transparent::Input::decode(&mut reader)?);
        }
        let outputs = serialize::decode_seq::<transparent::Output, _>(&mut reader)?;

        let mut witnesses = Vec::new();
        if segwit {
            for _ in 0..input_count {
                witnesses.push(Witness(serialize::decode_seq::<Vec<u8>, _>(&mut reader)?));
            }
        }

        let lock_time = LockTime::decode(&mut reader)?;

        let mut tx = Transaction {
            version,
            inputs,
            outputs,
            lock_time,
            witnesses,
            hash: Cached::empty(),
        };
        tx.hash = Cached::from(Txid::from(&tx));
        Ok(tx)
    }
}
