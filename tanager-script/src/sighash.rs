//! Signature hashing, all three generations.
//!
//! Legacy (pre-SegWit) hashing re-serializes a modified transaction;
//! BIP-143 (witness v0) commits to the spent amount and memoizable
//! prevout/sequence/output digests; BIP-341 (taproot) commits to every
//! spent output and uses tagged single-SHA256 hashes.

use tanager_chain::primitives::{sha256, sha256d, tagged_hash};
use tanager_chain::serialize::{Encode, VarInt};
use tanager_chain::transaction::Transaction;
use tanager_chain::transparent::Output;

use crate::ScriptError;

/// The base sighash modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigHashBase {
    All,
    None,
    Single,
}

/// A parsed signature hash type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SigHashType {
    pub base: SigHashBase,
    pub anyone_can_pay: bool,
    raw: u32,
}

impl SigHashType {
    /// The taproot default (equivalent to ALL, encoded as 0x00).
    pub const DEFAULT: SigHashType = SigHashType {
        base: SigHashBase::All,
        anyone_can_pay: false,
        raw: 0,
    };

    /// Interpret a legacy/v0 hash-type byte. Every value is accepted;
    /// undefined low bits historically behave as ALL.
    pub fn from_raw(raw: u32) -> SigHashType {
        let base = match raw & 0x1f {
            0x02 => SigHashBase::None,
            0x03 => SigHashBase::Single,
            _ => SigHashBase::All,
        };
        SigHashType {
            base,
            anyone_can_pay: raw & 0x80 != 0,
            raw,
        }
    }

    /// Is the raw value one of the six defined encodings? Required under
    /// STRICTENC/DERSIG-era rules.
    pub fn is_defined(self) -> bool {
        matches!(self.raw & !0x80, 0x01..=0x03)
    }

    /// Parse a taproot hash-type byte, where only seven encodings exist.
    pub fn from_taproot_raw(raw: u8) -> Result<SigHashType, ScriptError> {
        match raw {
            0x00 => Ok(SigHashType::DEFAULT),
            0x01..=0x03 | 0x81..=0x83 => Ok(SigHashType::from_raw(raw as u32)),
            _ => Err(ScriptError::SigHashType),
        }
    }

    pub fn raw(self) -> u32 {
        self.raw
    }
}

/// Remove every occurrence of `pattern` (as a whole push) from
/// `script_code`. Legacy sighash deletes the signature being checked
/// from the script it signs.
pub fn find_and_delete(script_code: &[u8], pattern: &[u8]) -> Vec<u8> {
    if pattern.is_empty() {
        return script_code.to_vec();
    }
    // The pattern is matched as the full push operation: opcode, length
    // prefix, and payload.
    let mut needle = Vec::with_capacity(pattern.len() + 1);
    if pattern.len() <= 0x4b {
        needle.push(pattern.len() as u8);
    } else if pattern.len() <= 0xff {
        needle.push(0x4c);
        needle.push(pattern.len() as u8);
    } else {
        needle.push(0x4d);
        needle.extend_from_slice(&(pattern.len() as u16).to_le_bytes());
    }
    needle.extend_from_slice(pattern);

    let mut out = Vec::with_capacity(script_code.len());
    let mut it = crate::opcode::iter_ops(script_code);
    let mut start = 0;
    while let Some(op) = it.next() {
        let end = it.position();
        let raw = &script_code[start..end];
        if !(op.is_ok() && raw == needle.as_slice()) {
            out.extend_from_slice(raw);
        }
        start = end;
    }
    out
}

/// Compute the three signature-hash generations for one transaction.
///
/// The caches are per-transaction, so one value should be reused across
/// all of a transaction's inputs.
pub struct SigHashCache<'a> {
    tx: &'a Transaction,

    // BIP-143 double-SHA caches.
    hash_prevouts: Option<[u8; 32]>,
    hash_sequence: Option<[u8; 32]>,
    hash_outputs: Option<[u8; 32]>,

    // BIP-341 single-SHA caches.
    sha_prevouts: Option<[u8; 32]>,
    sha_amounts: Option<[u8; 32]>,
    sha_scriptpubkeys: Option<[u8; 32]>,
    sha_sequences: Option<[u8; 32]>,
    sha_outputs: Option<[u8; 32]>,
}

impl<'a> SigHashCache<'a> {
    pub fn new(tx: &'a Transaction) -> SigHashCache<'a> {
        SigHashCache {
            tx,
            hash_prevouts: None,
            hash_sequence: None,
            hash_outputs: None,
            sha_prevouts: None,
            sha_amounts: None,
            sha_scriptpubkeys: None,
            sha_sequences: None,
            sha_outputs: None,
        }
    }

    /// The legacy signature hash.
    ///
    /// `script_code` must already be trimmed to the last executed
    /// OP_CODESEPARATOR and have had the signature deleted.
    pub fn legacy_signature_hash(
        &self,
        input_index: usize,
        script_code: &[u8],
        hash_type: SigHashType,
    ) -> [u8; 32] {
        let tx = self.tx;

        // The famous SIGHASH_SINGLE bug: out-of-range input indices hash
        // to the constant 1 rather than failing.
        if input_index >= tx.inputs.len()
            || (hash_type.base == SigHashBase::Single && input_index >= tx.outputs.len())
        {
            let mut one = [0u8; 32];
            one[0] = 1;
            return one;
        }

        let mut buf = Vec::new();
        tx.version.encode(&mut buf).expect("vec write");

        // Inputs. The checked input keeps the script code; the others get
        // an empty script, and outside ALL their sequences are zeroed.
        let serialize_input = |buf: &mut Vec<u8>, i: usize| {
            let input = &tx.inputs[i];
            outpoint_of(input).encode(&mut *buf).expect("vec write");
            if i == input_index {
                VarInt::from(script_code.len())
                    .encode(&mut *buf)
                    .expect("vec write");
                buf.extend_from_slice(script_code);
                buf.extend_from_slice(&input.sequence().to_le_bytes());
            } else {
                buf.push(0);
                let sequence = if hash_type.base == SigHashBase::All {
                    input.sequence()
                } else {
                    0
                };
                buf.extend_from_slice(&sequence.to_le_bytes());
            }
        };

        if hash_type.anyone_can_pay {
            VarInt(1).encode(&mut buf).expect("vec write");
            serialize_input(&mut buf, input_index);
        } else {
            VarInt::from(tx.inputs.len())
                .encode(&mut buf)
                .expect("vec write");
            for i in 0..tx.inputs.len() {
                serialize_input(&mut buf, i);
            }
        }

        // Outputs.
        match hash_type.base {
            SigHashBase::None => VarInt(0).encode(&mut buf).expect("vec write"),
            SigHashBase::Single => {
                VarInt::from(input_index + 1).encode(&mut buf).expect("vec write");
                // Outputs before the signed one are "null": value -1,
                // empty script.
                for _ in 0..input_index {
                    buf.extend_from_slice(&(-1i64).to_le_bytes());
                    buf.push(0);
                }
                tx.outputs[input_index].encode(&mut buf).expect("vec write");
            }
            SigHashBase::All => {
                VarInt::from(tx.outputs.len()).encode(&mut buf).expect("vec write");
                for output in tx.outputs.iter() {
                    output.encode(&mut buf).expect("vec write");
                }
            }
        }

        tx.lock_time.encode(&mut buf).expect("vec write");
        buf.extend_from_slice(&hash_type.raw().to_le_bytes());
        sha256d::hash(&buf)
    }

    fn bip143_hash_prevouts(&mut self) -> [u8; 32] {
        let tx = self.tx;
        *self.hash_prevouts.get_or_insert_with(|| {
            let mut buf = Vec::new();
            for input in tx.inputs.iter() {
                outpoint_of(input).encode(&mut buf).expect("vec write");
            }
            sha256d::hash(&buf)
        })
    }

    fn bip143_hash_sequence(&mut self) -> [u8; 32] {
        let tx = self.tx;
        *self.hash_sequence.get_or_insert_with(|| {
            let mut buf = Vec::new();
            for input in tx.inputs.iter() {
                buf.extend_from_slice(&input.sequence().to_le_bytes());
            }
            sha256d::hash(&buf)
        })
    }

    fn bip143_hash_outputs(&mut self) -> [u8; 32] {
        let tx = self.tx;
        *self.hash_outputs.get_or_insert_with(|| {
            let mut buf = Vec::new();
            for output in tx.outputs.iter() {
                output.encode(&mut buf).expect("vec write");
            }
            sha256d::hash(&buf)
        })
    }

    /// The BIP-143 (witness v0) signature hash.
    pub fn segwit_v0_signature_hash(
        &mut self,
        input_index: usize,
        script_code: &[u8],
        amount: i64,
        hash_type: SigHashType,
    ) -> [u8; 32] {
        let zero = [0u8; 32];

        let hash_prevouts = if hash_type.anyone_can_pay {
            zero
        } else {
            self.bip143_hash_prevouts()
        };
        let hash_sequence = if hash_type.anyone_can_pay || hash_type.base != SigHashBase::All {
            zero
        } else {
            self.bip143_hash_sequence()
        };
        let hash_outputs = match hash_type.base {
            SigHashBase::All => self.bip143_hash_outputs(),
            SigHashBase::Single if input_index < self.tx.outputs.len() => {
                let mut buf = Vec::new();
                self.tx.outputs[input_index].encode(&mut buf).expect("vec write");
                sha256d::hash(&buf)
            }
            _ => zero,
        };

        let tx = self.tx;
        let input = &tx.inputs[input_index];

        let mut buf = Vec::new();
        tx.version.encode(&mut buf).expect("vec write");
        buf.extend_from_slice(&hash_prevouts);
        buf.extend_from_slice(&hash_sequence);
        outpoint_of(input).encode(&mut buf).expect("vec write");
        VarInt::from(script_code.len()).encode(&mut buf).expect("vec write");
        buf.extend_from_slice(script_code);
        buf.extend_from_slice(&amount.to_le_bytes());
        buf.extend_from_slice(&input.sequence().to_le_bytes());
        buf.extend_from_slice(&hash_outputs);
        tx.lock_time.encode(&mut buf).expect("vec write");
        buf.extend_from_slice(&hash_type.raw().to_le_bytes());
        sha256d::hash(&buf)
    }

    fn bip341_sha_prevouts(&mut self) -> [u8; 32] {
        let tx = self.tx;
        *self.sha_prevouts.get_or_insert_with(|| {
            let mut buf = Vec::new();
            for input in tx.inputs.iter() {
                outpoint_of(input).encode(&mut buf).expect("vec write");
            }
            sha256(&buf)
        })
    }

    fn bip341_sha_amounts(&mut self, prevouts: &[Output]) -> [u8; 32] {
        *self.sha_amounts.get_or_insert_with(|| {
            let mut buf = Vec::new();
            for prevout in prevouts.iter() {
                buf.extend_from_slice(&prevout.value.satoshis().to_le_bytes());
            }
            sha256(&buf)
        })
    }

    fn bip341_sha_scriptpubkeys(&mut self, prevouts: &[Output]) -> [u8; 32] {
        *self.sha_scriptpubkeys.get_or_insert_with(|| {
            let mut buf = Vec::new();
            for prevout in prevouts.iter() {
                prevout.lock_script.encode(&mut buf).expect("vec write");
            }
            sha256(&buf)
        })
    }

    fn bip341_sha_sequences(&mut self) -> [u8; 32] {
        let tx = self.tx;
        *self.sha_sequences.get_or_insert_with(|| {
            let mut buf = Vec::new();
            for input in tx.inputs.iter() {
                buf.extend_from_slice(&input.sequence().to_le_bytes());
            }
            sha256(&buf)
        })
    }

    fn bip341_sha_outputs(&mut self) -> [u8; 32] {
        let tx = self.tx;
        *self.sha_outputs.get_or_insert_with(|| {
            let mut buf = Vec::new();
            for output in tx.outputs.iter() {
                output.encode(&mut buf).expect("vec write");
            }
            sha256(&buf)
        })
    }

    /// The BIP-341 signature hash.
    ///
    /// `leaf` carries `(tapleaf_hash, codeseparator_position)` for
    /// script-path spends; key-path spends pass `None`.
    pub fn taproot_signature_hash(
        &mut self,
        input_index: usize,
        prevouts: &[Output],
        hash_type: SigHashType,
        annex: Option<&[u8]>,
        leaf: Option<([u8; 32], u32)>,
    ) -> Result<[u8; 32], ScriptError> {
        if hash_type.base == SigHashBase::Single && input_index >= self.tx.outputs.len() {
            return Err(ScriptError::SigHashType);
        }

        let mut msg = Vec::new();
        msg.push(0x00); // epoch
        msg.push(hash_type.raw() as u8);
        self.tx.version.encode(&mut msg).expect("vec write");
        self.tx.lock_time.encode(&mut msg).expect("vec write");

        if !hash_type.anyone_can_pay {
            let prevouts_hash = self.bip341_sha_prevouts();
            let amounts_hash = self.bip341_sha_amounts(prevouts);
            let scripts_hash = self.bip341_sha_scriptpubkeys(prevouts);
            let sequences_hash = self.bip341_sha_sequences();
            msg.extend_from_slice(&prevouts_hash);
            msg.extend_from_slice(&amounts_hash);
            msg.extend_from_slice(&scripts_hash);
            msg.extend_from_slice(&sequences_hash);
        }
        if !matches!(hash_type.base, SigHashBase::None | SigHashBase::Single) {
            let outputs_hash = self.bip341_sha_outputs();
            msg.extend_from_slice(&outputs_hash);
        }

        let ext_flag: u8 = if leaf.is_some() { 1 } else { 0 };
        let spend_type = ext_flag * 2 + annex.is_some() as u8;
        msg.push(spend_type);

        let input = &self.tx.inputs[input_index];
        if hash_type.anyone_can_pay {
            outpoint_of(input).encode(&mut msg).expect("vec write");
            let prevout = &prevouts[input_index];
            msg.extend_from_slice(&prevout.value.satoshis().to_le_bytes());
            prevout.lock_script.encode(&mut msg).expect("vec write");
            msg.extend_from_slice(&input.sequence().to_le_bytes());
        } else {
            msg.extend_from_slice(&(input_index as u32).to_le_bytes());
        }

        if let Some(annex) = annex {
            let mut annex_buf = Vec::new();
            VarInt::from(annex.len()).encode(&mut annex_buf).expect("vec write");
            annex_buf.extend_from_slice(annex);
            msg.extend_from_slice(&sha256(&annex_buf));
        }

        if hash_type.base == SigHashBase::Single {
            let mut buf = Vec::new();
            self.tx.outputs[input_index].encode(&mut buf).expect("vec write");
            msg.extend_from_slice(&sha256(&buf));
        }

        if let Some((leaf_hash, codesep_pos)) = leaf {
            msg.extend_from_slice(&leaf_hash);
            msg.push(0x00); // key version
            msg.extend_from_slice(&codesep_pos.to_le_bytes());
        }

        Ok(tagged_hash("TapSighash", &msg))
    }
}

fn outpoint_of(input: &tanager_chain::transparent::Input) -> tanager_chain::transparent::OutPoint {
    input
        .outpoint()
        .unwrap_or_else(tanager_chain::transparent::OutPoint::null)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_types_parse() {
        assert_eq!(SigHashType::from_raw(0x01).base, SigHashBase::All);
        assert_eq!(SigHashType::from_raw(0x02).base, SigHashBase::None);
        assert_eq!(SigHashType::from_raw(0x03).base, SigHashBase::Single);
        assert!(SigHashType::from_raw(0x81).anyone_can_pay);
        assert!(SigHashType::from_raw(0x01).is_defined());
        assert!(!SigHashType::from_raw(0x04).is_defined());
        // Undefined low bits degrade to ALL.
        assert_eq!(SigHashType::from_raw(0x00).base, SigHashBase::All);
    }

    #[test]
    fn taproot_hash_types_are_restricted() {
        assert!(SigHashType::from_taproot_raw(0x00).is_ok());
        assert!(SigHashType::from_taproot_raw(0x83).is_ok());
        assert!(SigHashType::from_taproot_raw(0x04).is_err());
        assert!(SigHashType::from_taproot_raw(0x80).is_err());
    }

    #[test]
    fn find_and_delete_removes_whole_pushes() {
        // <sig> OP_CHECKSIG with sig deleted leaves only OP_CHECKSIG.
        let sig = [0xde, 0xad, 0xbe, 0xef];
        let mut script = vec![0x04];
        script.extend_from_slice(&sig);
        script.push(0xac);
        assert_eq!(find_and_delete(&script, &sig), vec![0xac]);

        // A bare substring that is not a push is untouched.
        let script = vec![0xde, 0xad];
        assert_eq!(find_and_delete(&script, &sig), script);
    }
}
