//! The signature-checking seam between the interpreter and transaction
//! context.

use secp256k1::{ecdsa, schnorr, Message, XOnlyPublicKey};

use tanager_chain::parameters::{
    SEQUENCE_FINAL, SEQUENCE_LOCKTIME_DISABLE, SEQUENCE_LOCKTIME_MASK, SEQUENCE_LOCKTIME_TYPE,
};
use tanager_chain::primitives::SECP256K1;
use tanager_chain::transaction::{Transaction, LOCK_TIME_THRESHOLD};
use tanager_chain::transparent::Output;

use crate::sighash::{find_and_delete, SigHashCache, SigHashType};
use crate::{ScriptError, VerifyFlags};

/// Which sighash generation a signature covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigVersion {
    /// Legacy scriptSig/scriptPubKey evaluation.
    Base,
    /// BIP-143, witness v0.
    WitnessV0,
    /// BIP-341 key path.
    Taproot,
    /// BIP-342 script path.
    Tapscript,
}

/// The interpreter's window onto the spending transaction.
///
/// Implementations provide signature verification against the right
/// sighash and the lock-time comparisons for CHECKLOCKTIMEVERIFY and
/// CHECKSEQUENCEVERIFY.
pub trait SignatureChecker {
    /// Verify an ECDSA signature (with trailing hash-type byte) for
    /// legacy or witness-v0 evaluation.
    fn check_ecdsa(&mut self, sig: &[u8], pubkey: &[u8], script_code: &[u8], version: SigVersion)
        -> bool;

    /// Verify a Schnorr signature for taproot key-path or tapscript
    /// evaluation. `leaf` is `(tapleaf_hash, codeseparator_pos)` for
    /// tapscript.
    fn check_schnorr(
        &mut self,
        sig: &[u8],
        pubkey: &XOnlyPublicKey,
        leaf: Option<([u8; 32], u32)>,
    ) -> Result<bool, ScriptError>;

    /// BIP-65 comparison against the transaction lock time.
    fn check_lock_time(&self, lock_time: i64) -> bool;

    /// BIP-68/112 comparison against the input sequence.
    fn check_sequence(&self, sequence: i64) -> bool;
}

/// A checker with no transaction: every signature fails, every lock-time
/// passes vacuously false. Used for classification-only evaluation and
/// tests.
pub struct NoSignatures;

impl SignatureChecker for NoSignatures {
    fn check_ecdsa(&mut self, _: &[u8], _: &[u8], _: &[u8], _: SigVersion) -> bool {
        false
    }

    fn check_schnorr(
        &mut self,
        _: &[u8],
        _: &XOnlyPublicKey,
        _: Option<([u8; 32], u32)>,
    ) -> Result<bool, ScriptError> {
        Ok(false)
    }

    fn check_lock_time(&self, _: i64) -> bool {
        false
    }

    fn check_sequence(&self, _: i64) -> bool {
        false
    }
}

/// The real checker: one spending transaction, one input.
pub struct TransactionSignatureChecker<'a> {
    tx: &'a Transaction,
    input_index: usize,
    /// All spent outputs of the transaction, in input order. Witness v0
    /// needs the checked input's amount; taproot commits to all of them.
    prevouts: &'a [Output],
    cache: SigHashCache<'a>,
    /// The input's witness annex, when one is present (taproot only).
    pub annex: Option<Vec<u8>>,
}

impl<'a> TransactionSignatureChecker<'a> {
    pub fn new(
        tx: &'a Transaction,
        input_index: usize,
        prevouts: &'a [Output],
    ) -> TransactionSignatureChecker<'a> {
        TransactionSignatureChecker {
            tx,
            input_index,
            prevouts,
            cache: SigHashCache::new(tx),
            annex: None,
        }
    }
}

impl<'a> SignatureChecker for TransactionSignatureChecker<'a> {
    fn check_ecdsa(
        &mut self,
        sig: &[u8],
        pubkey: &[u8],
        script_code: &[u8],
        version: SigVersion,
    ) -> bool {
        if sig.is_empty() {
            return false;
        }
        let (sig_der, hash_type_byte) = sig.split_at(sig.len() - 1);
        let hash_type = SigHashType::from_raw(hash_type_byte[0] as u32);

        let digest = match version {
            SigVersion::Base => {
                // Legacy hashing deletes the signature from the script it
                // signs.
                let script_code = find_and_delete(script_code, sig);
                self.cache
                    .legacy_signature_hash(self.input_index, &script_code, hash_type)
            }
            SigVersion::WitnessV0 => {
                let amount = self.prevouts[self.input_index].value.satoshis();
                self.cache.segwit_v0_signature_hash(
                    self.input_index,
                    script_code,
                    amount,
                    hash_type,
                )
            }
            SigVersion::Taproot | SigVersion::Tapscript => return false,
        };

        let parsed = match ecdsa::Signature::from_der_lax(sig_der) {
            Ok(sig) => sig,
            Err(_) => return false,
        };
        // Consensus accepts high-S signatures unless LOW_S policy is on;
        // the underlying library only verifies normalized signatures.
        let mut normalized = parsed;
        normalized.normalize_s();

        let message = Message::from_slice(&digest).expect("digest is 32 bytes");
        match secp256k1::PublicKey::from_slice(pubkey) {
            Ok(pk) => SECP256K1.verify_ecdsa(&message, &normalized, &pk).is_ok(),
            Err(_) => false,
        }
    }

    fn check_schnorr(
        &mut self,
        sig: &[u8],
        pubkey: &XOnlyPublicKey,
        leaf: Option<([u8; 32], u32)>,
    ) -> Result<bool, ScriptError> {
        // 64 bytes: default hash type. 65: explicit, and 0x00 is banned
        // (it would alias the default).
        let (sig_bytes, hash_type) = match sig.len() {
            64 => (&sig[..64], SigHashType::DEFAULT),
            65 => {
                let hash_type = SigHashType::from_taproot_raw(sig[64])?;
                if sig[64] == 0x00 {
                    return Err(ScriptError::SigHashType);
                }
                (&sig[..64], hash_type)
            }
            _ => return Err(ScriptError::SchnorrSig),
        };

        let digest = self.cache.taproot_signature_hash(
            self.input_index,
            self.prevouts,
            hash_type,
            self.annex.as_deref(),
            leaf,
        )?;

        let signature =
            schnorr::Signature::from_slice(sig_bytes).map_err(|_| ScriptError::SchnorrSig)?;
        let message = Message::from_slice(&digest).expect("digest is 32 bytes");
        Ok(SECP256K1.verify_schnorr(&signature, &message, pubkey).is_ok())
    }

    fn check_lock_time(&self, lock_time: i64) -> bool {
        let tx_lock_time = self.tx.lock_time.raw() as i64;
        let threshold = LOCK_TIME_THRESHOLD as i64;

        // Both operands must be on the same side of the height/time
        // threshold for the comparison to mean anything.
        let same_kind = (lock_time < threshold) == (tx_lock_time < threshold);
        if !same_kind || lock_time > tx_lock_time {
            return false;
        }

        // A final sequence opts the input out of lock-time semantics, so
        // the lock would never actually be enforced.
        self.tx.inputs[self.input_index].sequence() != SEQUENCE_FINAL
    }

    fn check_sequence(&self, sequence: i64) -> bool {
        let input_sequence = self.tx.inputs[self.input_index].sequence();

        // Relative lock-times require the v2 transaction format.
        if self.tx.version < 2 {
            return false;
        }
        if input_sequence & SEQUENCE_LOCKTIME_DISABLE != 0 {
            return false;
        }

        let mask = (SEQUENCE_LOCKTIME_TYPE | SEQUENCE_LOCKTIME_MASK) as i64;
        let masked_stack = sequence & mask;
        let masked_input = (input_sequence as i64) & mask;

        let type_bit = SEQUENCE_LOCKTIME_TYPE as i64;
        let same_kind = (masked_stack < type_bit) == (masked_input < type_bit);
        same_kind && masked_stack <= masked_input
    }
}

/// BIP-66 strict DER check, including the hash-type byte bounds.
pub fn is_valid_der_encoding(sig: &[u8]) -> bool {
    // Layout: 0x30 [total] 0x02 [len R] [R] 0x02 [len S] [S] [hashtype]
    if sig.len() < 9 || sig.len() > 73 {
        return false;
    }
    if sig[0] != 0x30 || sig[1] as usize != sig.len() - 3 {
        return false;
    }

    let len_r = sig[3] as usize;
    if 5 + len_r >= sig.len() {
        return false;
    }
    let len_s = sig[5 + len_r] as usize;
    if len_r + len_s + 7 != sig.len() {
        return false;
    }

    if sig[2] != 0x02 || len_r == 0 || sig[4] & 0x80 != 0 {
        return false;
    }
    // No unnecessary leading zero in R.
    if len_r > 1 && sig[4] == 0x00 && sig[5] & 0x80 == 0 {
        return false;
    }

    if sig[len_r + 4] != 0x02 || len_s == 0 || sig[len_r + 6] & 0x80 != 0 {
        return false;
    }
    if len_s > 1 && sig[len_r + 6] == 0x00 && sig[len_r + 7] & 0x80 == 0 {
        return false;
    }

    true
}

/// Is the S value in the lower half of the group order?
pub fn is_low_s(sig: &[u8]) -> bool {
    if sig.is_empty() {
        return false;
    }
    let der = &sig[..sig.len() - 1];
    match ecdsa::Signature::from_der_lax(der) {
        Ok(parsed) => {
            let mut normalized = parsed;
            normalized.normalize_s();
            normalized == parsed
        }
        Err(_) => false,
    }
}

/// Flag-dependent signature encoding rules, applied before verification.
/// An empty signature is always acceptable *encoding* (it simply fails
/// verification).
pub fn check_signature_encoding(sig: &[u8], flags: VerifyFlags) -> Result<(), ScriptError> {
    if sig.is_empty() {
        return Ok(());
    }
    if flags.intersects(VerifyFlags::DERSIG | VerifyFlags::LOW_S) && !is_valid_der_encoding(sig) {
        return Err(ScriptError::SigDer);
    }
    if flags.contains(VerifyFlags::LOW_S) && !is_low_s(sig) {
        return Err(ScriptError::SigHighS);
    }
    if flags.contains(VerifyFlags::DERSIG) {
        let hash_type = SigHashType::from_raw(sig[sig.len() - 1] as u32);
        if !hash_type.is_defined() {
            return Err(ScriptError::SigHashType);
        }
    }
    Ok(())
}

/// Flag-dependent public key encoding rules.
pub fn check_pubkey_encoding(
    pubkey: &[u8],
    flags: VerifyFlags,
    version: SigVersion,
) -> Result<(), ScriptError> {
    let well_formed = match pubkey.first() {
        Some(0x02) | Some(0x03) => pubkey.len() == 33,
        Some(0x04) => pubkey.len() == 65,
        _ => false,
    };
    if flags.contains(VerifyFlags::DERSIG) && !well_formed {
        return Err(ScriptError::PubkeyType);
    }
    // BIP-143 outputs commit to compressed keys only.
    if flags.contains(VerifyFlags::WITNESS_PUBKEYTYPE)
        && version == SigVersion::WitnessV0
        && !(pubkey.len() == 33 && matches!(pubkey.first(), Some(0x02) | Some(0x03)))
    {
        return Err(ScriptError::WitnessPubkeyType);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    // A syntactically valid strict-DER signature plus SIGHASH_ALL.
    fn sample_der_sig() -> Vec<u8> {
        let mut sig = vec![0x30, 0x06, 0x02, 0x01, 0x01, 0x02, 0x01, 0x01];
        sig.push(0x01); // hash type
        sig
    }

    #[test]
    fn strict_der_accepts_the_canonical_shape() {
        assert!(is_valid_der_encoding(&sample_der_sig()));
    }

    #[test]
    fn strict_der_rejects_malformed_signatures() {
        let good = sample_der_sig();

        let mut wrong_tag = good.clone();
        wrong_tag[0] = 0x31;
        assert!(!is_valid_der_encoding(&wrong_tag));

        let mut negative_r = good.clone();
        negative_r[4] = 0x81;
        assert!(!is_valid_der_encoding(&negative_r));

        let mut bad_len = good;
        bad_len[1] = 0x07;
        assert!(!is_valid_der_encoding(&bad_len));

        assert!(!is_valid_der_encoding(&[0x30]));
    }

    #[test]
    fn encoding_checks_follow_flags() {
        let junk = vec![0xff, 0xee, 0x01];
        // No flags: anything goes.
        assert!(check_signature_encoding(&junk, VerifyFlags::empty()).is_ok());
        // DERSIG: junk is rejected.
        assert_eq!(
            check_signature_encoding(&junk, VerifyFlags::DERSIG),
            Err(ScriptError::SigDer)
        );
        // Empty is fine either way.
        assert!(check_signature_encoding(&[], VerifyFlags::DERSIG).is_ok());
    }

    #[test]
    fn pubkey_encoding_checks() {
        let compressed = {
            let mut k = vec![0x02];
            k.extend_from_slice(&[0x11; 32]);
            k
        };
        let uncompressed = {
            let mut k = vec![0x04];
            k.extend_from_slice(&[0x11; 64]);
            k
        };

        for key in [&compressed, &uncompressed].iter() {
            assert!(check_pubkey_encoding(key, VerifyFlags::DERSIG, SigVersion::Base).is_ok());
        }
        assert_eq!(
            check_pubkey_encoding(&[0x05, 0x01], VerifyFlags::DERSIG, SigVersion::Base),
            Err(ScriptError::PubkeyType)
        );
        // Witness v0 + WITNESS_PUBKEYTYPE: compressed only.
        assert_eq!(
            check_pubkey_encoding(
                &uncompressed,
                VerifyFlags::WITNESS_PUBKEYTYPE,
                SigVersion::WitnessV0
            ),
            Err(ScriptError::WitnessPubkeyType)
        );
    }
}
