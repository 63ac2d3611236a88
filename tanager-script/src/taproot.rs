//! BIP-341 taproot commitment verification.

use secp256k1::{Parity, Scalar, XOnlyPublicKey};

use tanager_chain::primitives::{tagged_hash, SECP256K1};
use tanager_chain::serialize::{Encode, VarInt};

use crate::ScriptError;

/// The tapscript leaf version.
pub const LEAF_VERSION_TAPSCRIPT: u8 = 0xc0;

/// Mask extracting the leaf version from a control byte (the low bit is
/// the output-key parity).
pub const LEAF_VERSION_MASK: u8 = 0xfe;

/// Control blocks are 33 bytes plus up to 128 levels of 32-byte merkle
/// path.
pub const CONTROL_BASE_SIZE: usize = 33;
pub const CONTROL_NODE_SIZE: usize = 32;
pub const CONTROL_MAX_NODE_COUNT: usize = 128;

/// A parsed script-path control block.
#[derive(Debug, Clone)]
pub struct ControlBlock<'a> {
    pub leaf_version: u8,
    pub output_key_parity: Parity,
    pub internal_key: XOnlyPublicKey,
    pub merkle_path: &'a [u8],
}

impl<'a> ControlBlock<'a> {
    /// Parse and size-check a raw control block.
    pub fn parse(control: &'a [u8]) -> Result<ControlBlock<'a>, ScriptError> {
        if control.len() < CONTROL_BASE_SIZE
            || (control.len() - CONTROL_BASE_SIZE) % CONTROL_NODE_SIZE != 0
            || control.len() > CONTROL_BASE_SIZE + CONTROL_NODE_SIZE * CONTROL_MAX_NODE_COUNT
        {
            return Err(ScriptError::TaprootWrongControlSize);
        }

        let parity = if control[0] & 0x01 == 0 {
            Parity::Even
        } else {
            Parity::Odd
        };
        let internal_key = XOnlyPublicKey::from_slice(&control[1..33])
            .map_err(|_| ScriptError::WitnessProgramMismatch)?;

        Ok(ControlBlock {
            leaf_version: control[0] & LEAF_VERSION_MASK,
            output_key_parity: parity,
            internal_key,
            merkle_path: &control[33..],
        })
    }

    /// Verify that `script` under this control block commits to
    /// `output_key` (the 32-byte witness program).
    pub fn verify_commitment(
        &self,
        script: &[u8],
        output_key: &XOnlyPublicKey,
    ) -> Result<[u8; 32], ScriptError> {
        let leaf_hash = tapleaf_hash(self.leaf_version, script);

        // Climb the merkle path; pairs hash in lexicographic order.
        let mut node = leaf_hash;
        for sibling in self.merkle_path.chunks(CONTROL_NODE_SIZE) {
            let mut payload = [0u8; 64];
            if node.as_ref() <= sibling {
                payload[..32].copy_from_slice(&node);
                payload[32..].copy_from_slice(sibling);
            } else {
                payload[..32].copy_from_slice(sibling);
                payload[32..].copy_from_slice(&node);
            }
            node = tagged_hash("TapBranch", &payload);
        }

        // t = H_TapTweak(internal_key || merkle_root); Q = P + tG.
        let mut tweak_input = [0u8; 64];
        tweak_input[..32].copy_from_slice(&self.internal_key.serialize());
        tweak_input[32..].copy_from_slice(&node);
        let tweak = tagged_hash("TapTweak", &tweak_input);
        let tweak =
            Scalar::from_be_bytes(tweak).map_err(|_| ScriptError::WitnessProgramMismatch)?;

        let matches = self.internal_key.tweak_add_check(
            &SECP256K1,
            output_key,
            self.output_key_parity,
            tweak,
        );
        if matches {
            Ok(leaf_hash)
        } else {
            Err(ScriptError::WitnessProgramMismatch)
        }
    }
}

/// The BIP-341 tapleaf hash of a script.
pub fn tapleaf_hash(leaf_version: u8, script: &[u8]) -> [u8; 32] {
    let mut payload = Vec::with_capacity(script.len() + 4);
    payload.push(leaf_version);
    VarInt::from(script.len())
        .encode(&mut payload)
        .expect("vec write");
    payload.extend_from_slice(script);
    tagged_hash("TapLeaf", &payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_block_size_discipline() {
        let valid_key = {
            // The generator's x coordinate is a valid x-only key.
            let mut c = vec![0xc0];
            c.extend_from_slice(
                &hex::decode("79be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798")
                    .unwrap(),
            );
            c
        };
        assert!(ControlBlock::parse(&valid_key).is_ok());

        // One byte short.
        assert!(matches!(
            ControlBlock::parse(&valid_key[..32]),
            Err(ScriptError::TaprootWrongControlSize)
        ));

        // A partial merkle node.
        let mut partial = valid_key.clone();
        partial.extend_from_slice(&[0u8; 31]);
        assert!(matches!(
            ControlBlock::parse(&partial),
            Err(ScriptError::TaprootWrongControlSize)
        ));

        // A full merkle node is fine.
        let mut one_node = valid_key;
        one_node.extend_from_slice(&[0u8; 32]);
        assert!(ControlBlock::parse(&one_node).is_ok());
    }

    #[test]
    fn leaf_version_strips_parity() {
        let mut control = vec![0xc1];
        control.extend_from_slice(
            &hex::decode("79be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798")
                .unwrap(),
        );
        let parsed = ControlBlock::parse(&control).unwrap();
        assert_eq!(parsed.leaf_version, 0xc0);
        assert_eq!(parsed.output_key_parity, Parity::Odd);
    }
}
