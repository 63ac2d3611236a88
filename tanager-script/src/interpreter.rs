//! Script execution.
//!
//! [`eval_script`] runs one script against a stack; [`verify_script`]
//! drives the full spend protocol: scriptSig, scriptPubKey, BIP-16
//! redeem scripts, BIP-141 witness programs, and BIP-341 taproot spends.

use secp256k1::XOnlyPublicKey;

use tanager_chain::primitives::{hash160, ripemd160, sha1, sha256, sha256d};
use tanager_chain::serialize::VarInt;

use crate::checker::{
    check_pubkey_encoding, check_signature_encoding, SigVersion, SignatureChecker,
};
use crate::opcode::{self, is_minimal_push, iter_ops, Opcode};
use crate::pattern::{witness_program, WitnessProgram};
use crate::sighash::find_and_delete;
use crate::stack::Stack;
use crate::taproot::{ControlBlock, LEAF_VERSION_TAPSCRIPT};
use crate::{
    ScriptError, ScriptNum, VerifyFlags, MAX_ELEMENT_SIZE, MAX_OPS_PER_SCRIPT,
    MAX_PUBKEYS_PER_MULTISIG, MAX_SCRIPT_SIZE, MAX_STACK_SIZE,
};

/// Tapscript signature opcodes each cost 50 weight; the budget starts at
/// the witness size plus the same constant.
const VALIDATION_WEIGHT_PER_SIGOP: i64 = 50;
const VALIDATION_WEIGHT_OFFSET: i64 = 50;

/// The annex marker byte (BIP-341).
const ANNEX_TAG: u8 = 0x50;

/// Per-evaluation context threaded through `eval_script`.
pub struct ExecCtx {
    pub version: SigVersion,
    /// The tapleaf hash, for tapscript signature hashing.
    pub leaf_hash: Option<[u8; 32]>,
    /// Remaining tapscript validation weight.
    pub validation_weight: i64,
    /// Last executed OP_CODESEPARATOR, as an opcode index (tapscript) or
    /// byte offset (legacy); u32::MAX when none has executed.
    pub codesep_pos: u32,
}

impl ExecCtx {
    pub fn new(version: SigVersion) -> ExecCtx {
        ExecCtx {
            version,
            leaf_hash: None,
            validation_weight: 0,
            codesep_pos: u32::MAX,
        }
    }
}

fn is_op_success(byte: u8) -> bool {
    matches!(
        byte,
        0x50 | 0x62
            | 0x7e..=0x81
            | 0x83..=0x86
            | 0x89..=0x8a
            | 0x8d..=0x8e
            | 0x95..=0x99
            | 0xbb..=0xfe
    )
}

/// Is every operation in the script a push?
pub fn is_push_only(script: &[u8]) -> bool {
    iter_ops(script).all(|op| op.map(|op| op.opcode.is_push()).unwrap_or(false))
}

/// Execute one script against `stack`.
pub fn eval_script(
    stack: &mut Stack,
    script: &[u8],
    flags: VerifyFlags,
    checker: &mut dyn SignatureChecker,
    ctx: &mut ExecCtx,
) -> Result<(), ScriptError> {
    let tapscript = ctx.version == SigVersion::Tapscript;

    if !tapscript && script.len() > MAX_SCRIPT_SIZE {
        return Err(ScriptError::ScriptSize);
    }

    let minimal = flags.contains(VerifyFlags::MINIMALDATA);
    let mut altstack = Stack::new();
    let mut exec_stack: Vec<bool> = Vec::new();
    let mut op_count = 0usize;
    let mut opcode_pos: u32 = 0;

    let mut ops = iter_ops(script);
    loop {
        let op = match ops.next() {
            Some(op) => op?,
            None => break,
        };
        let executing = exec_stack.iter().all(|&b| b);

        if let Some(data) = op.push {
            if data.len() > MAX_ELEMENT_SIZE {
                return Err(ScriptError::PushSize);
            }
        }

        if !op.opcode.is_push() && !tapscript {
            op_count += 1;
            if op_count > MAX_OPS_PER_SCRIPT {
                return Err(ScriptError::OpCount);
            }
        }

        // Disabled opcodes poison the script whether or not the branch
        // executes. In tapscript they were re-assigned to OP_SUCCESS and
        // handled above.
        if !tapscript && op.opcode.is_disabled() {
            return Err(ScriptError::DisabledOpcode);
        }
        // OP_VERIF and OP_VERNOTIF fail even in unexecuted branches.
        if !tapscript && matches!(op.opcode, opcode::OP_VERIF | opcode::OP_VERNOTIF) {
            return Err(ScriptError::BadOpcode);
        }

        if !executing && !op.opcode.is_conditional() {
            opcode_pos += 1;
            continue;
        }

        if let Some(data) = op.push {
            if minimal && !is_minimal_push(op.opcode, data) {
                return Err(ScriptError::MinimalData);
            }
            stack.push(data.to_vec(), altstack.depth())?;
            opcode_pos += 1;
            continue;
        }

        match op.opcode {
            opcode::OP_0 => stack.push(vec![], altstack.depth())?,
            op if op.small_int().is_some() && op != opcode::OP_0 => {
                stack.push_num(ScriptNum(op.small_int().expect("checked")), altstack.depth())?
            }

            // Flow control -------------------------------------------------
            opcode::OP_NOP => {}
            opcode::OP_IF | opcode::OP_NOTIF => {
                let mut branch = false;
                if executing {
                    let item = stack
                        .pop()
                        .map_err(|_| ScriptError::UnbalancedConditional)?;
                    // Tapscript requires minimal booleans; witness v0
                    // requires them under MINIMALIF.
                    if tapscript || (ctx.version == SigVersion::WitnessV0
                        && flags.contains(VerifyFlags::MINIMALIF))
                    {
                        let minimal_bool = item.is_empty() || item == [1u8];
                        if !minimal_bool {
                            return Err(if tapscript {
                                ScriptError::TaprootMinimalIf
                            } else {
                                ScriptError::WitnessMalleated
                            });
                        }
                    }
                    branch = ScriptNum::element_to_bool(&item);
                    if op.opcode == opcode::OP_NOTIF {
                        branch = !branch;
                    }
                }
                exec_stack.push(executing && branch);
            }
            opcode::OP_ELSE => {
                let last = exec_stack
                    .last_mut()
                    .ok_or(ScriptError::UnbalancedConditional)?;
                *last = !*last;
            }
            opcode::OP_ENDIF => {
                exec_stack.pop().ok_or(ScriptError::UnbalancedConditional)?;
            }
            opcode::OP_VERIFY => {
                if !stack.pop_bool()? {
                    return Err(ScriptError::Verify);
                }
            }
            opcode::OP_RETURN => return Err(ScriptError::OpReturn),
            opcode::OP_VER | opcode::OP_RESERVED | opcode::OP_RESERVED1 | opcode::OP_RESERVED2 => {
                return Err(ScriptError::ReservedOpcode)
            }

            // Stack ops ----------------------------------------------------
            opcode::OP_TOALTSTACK => {
                let item = stack.pop()?;
                altstack
                    .push(item, stack.depth())
                    .map_err(|_| ScriptError::StackSize)?;
            }
            opcode::OP_FROMALTSTACK => {
                let item = altstack
                    .pop()
                    .map_err(|_| ScriptError::InvalidAltstackOperation)?;
                stack.push(item, altstack.depth())?;
            }
            opcode::OP_2DROP => {
                stack.pop()?;
                stack.pop()?;
            }
            opcode::OP_2DUP => {
                let a = stack.peek(1)?.to_vec();
                let b = stack.peek(0)?.to_vec();
                stack.push(a, altstack.depth())?;
                stack.push(b, altstack.depth())?;
            }
            opcode::OP_3DUP => {
                let a = stack.peek(2)?.to_vec();
                let b = stack.peek(1)?.to_vec();
                let c = stack.peek(0)?.to_vec();
                stack.push(a, altstack.depth())?;
                stack.push(b, altstack.depth())?;
                stack.push(c, altstack.depth())?;
            }
            opcode::OP_2OVER => {
                let a = stack.peek(3)?.to_vec();
                let b = stack.peek(2)?.to_vec();
                stack.push(a, altstack.depth())?;
                stack.push(b, altstack.depth())?;
            }
            opcode::OP_2ROT => {
                let b = stack.remove(4)?;
                let a = stack.remove(4)?;
                stack.push(a, altstack.depth())?;
                stack.push(b, altstack.depth())?;
            }
            opcode::OP_2SWAP => {
                let b = stack.remove(3)?;
                let a = stack.remove(3)?;
                stack.push(a, altstack.depth())?;
                stack.push(b, altstack.depth())?;
            }
            opcode::OP_IFDUP => {
                if stack.peek_bool()? {
                    let top = stack.peek(0)?.to_vec();
                    stack.push(top, altstack.depth())?;
                }
            }
            opcode::OP_DEPTH => {
                let depth = stack.depth();
                stack.push_num(ScriptNum(depth as i64), altstack.depth())?;
            }
            opcode::OP_DROP => {
                stack.pop()?;
            }
            opcode::OP_DUP => {
                let top = stack.peek(0)?.to_vec();
                stack.push(top, altstack.depth())?;
            }
            opcode::OP_NIP => {
                stack.remove(1)?;
            }
            opcode::OP_OVER => {
                let item = stack.peek(1)?.to_vec();
                stack.push(item, altstack.depth())?;
            }
            opcode::OP_PICK | opcode::OP_ROLL => {
                let n = stack.pop_num(minimal)?.0;
                if n < 0 || n as usize >= stack.depth() {
                    return Err(ScriptError::InvalidStackOperation);
                }
                let item = if op.opcode == opcode::OP_ROLL {
                    stack.remove(n as usize)?
                } else {
                    stack.peek(n as usize)?.to_vec()
                };
                stack.push(item, altstack.depth())?;
            }
            opcode::OP_ROT => {
                let item = stack.remove(2)?;
                stack.push(item, altstack.depth())?;
            }
            opcode::OP_SWAP => {
                let item = stack.remove(1)?;
                stack.push(item, altstack.depth())?;
            }
            opcode::OP_TUCK => {
                let top = stack.peek(0)?.to_vec();
                stack.insert(2, top)?;
            }
            opcode::OP_SIZE => {
                let len = stack.peek(0)?.len();
                stack.push_num(ScriptNum(len as i64), altstack.depth())?;
            }

            // Equality -----------------------------------------------------
            opcode::OP_EQUAL | opcode::OP_EQUALVERIFY => {
                let b = stack.pop()?;
                let a = stack.pop()?;
                let equal = a == b;
                if op.opcode == opcode::OP_EQUALVERIFY {
                    if !equal {
                        return Err(ScriptError::EqualVerify);
                    }
                } else {
                    stack.push_bool(equal, altstack.depth())?;
                }
            }

            // Arithmetic ---------------------------------------------------
            opcode::OP_1ADD | opcode::OP_1SUB | opcode::OP_NEGATE | opcode::OP_ABS
            | opcode::OP_NOT | opcode::OP_0NOTEQUAL => {
                let n = stack.pop_num(minimal)?.0;
                let result = match op.opcode {
                    opcode::OP_1ADD => n + 1,
                    opcode::OP_1SUB => n - 1,
                    opcode::OP_NEGATE => -n,
                    opcode::OP_ABS => n.abs(),
                    opcode::OP_NOT => (n == 0) as i64,
                    _ => (n != 0) as i64,
                };
                stack.push_num(ScriptNum(result), altstack.depth())?;
            }
            opcode::OP_ADD | opcode::OP_SUB | opcode::OP_BOOLAND | opcode::OP_BOOLOR
            | opcode::OP_NUMEQUAL | opcode::OP_NUMEQUALVERIFY | opcode::OP_NUMNOTEQUAL
            | opcode::OP_LESSTHAN | opcode::OP_GREATERTHAN | opcode::OP_LESSTHANOREQUAL
            | opcode::OP_GREATERTHANOREQUAL | opcode::OP_MIN | opcode::OP_MAX => {
                let b = stack.pop_num(minimal)?.0;
                let a = stack.pop_num(minimal)?.0;
                let result = match op.opcode {
                    opcode::OP_ADD => a + b,
                    opcode::OP_SUB => a - b,
                    opcode::OP_BOOLAND => (a != 0 && b != 0) as i64,
                    opcode::OP_BOOLOR => (a != 0 || b != 0) as i64,
                    opcode::OP_NUMEQUAL | opcode::OP_NUMEQUALVERIFY => (a == b) as i64,
                    opcode::OP_NUMNOTEQUAL => (a != b) as i64,
                    opcode::OP_LESSTHAN => (a < b) as i64,
                    opcode::OP_GREATERTHAN => (a > b) as i64,
                    opcode::OP_LESSTHANOREQUAL => (a <= b) as i64,
                    opcode::OP_GREATERTHANOREQUAL => (a >= b) as i64,
                    opcode::OP_MIN => a.min(b),
                    _ => a.max(b),
                };
                if op.opcode == opcode::OP_NUMEQUALVERIFY {
                    if result == 0 {
                        return Err(ScriptError::NumEqualVerify);
                    }
                } else {
                    stack.push_num(ScriptNum(result), altstack.depth())?;
                }
            }
            opcode::OP_WITHIN => {
                let max = stack.pop_num(minimal)?.0;
                let min = stack.pop_num(minimal)?.0;
                let x = stack.pop_num(minimal)?.0;
                stack.push_bool(min <= x && x < max, altstack.depth())?;
            }

            // Crypto -------------------------------------------------------
            opcode::OP_RIPEMD160 => {
                let item = stack.pop()?;
                stack.push(ripemd160(&item).to_vec(), altstack.depth())?;
            }
            opcode::OP_SHA1 => {
                let item = stack.pop()?;
                stack.push(sha1(&item).to_vec(), altstack.depth())?;
            }
            opcode::OP_SHA256 => {
                let item = stack.pop()?;
                stack.push(sha256(&item).to_vec(), altstack.depth())?;
            }
            opcode::OP_HASH160 => {
                let item = stack.pop()?;
                stack.push(hash160(&item).to_vec(), altstack.depth())?;
            }
            opcode::OP_HASH256 => {
                let item = stack.pop()?;
                stack.push(sha256d::hash(&item).to_vec(), altstack.depth())?;
            }
            opcode::OP_CODESEPARATOR => {
                // Legacy records a byte offset (into the script after
                // this opcode); tapscript records the opcode index.
                ctx.codesep_pos = if tapscript {
                    opcode_pos
                } else {
                    ops.position() as u32
                };
            }
            opcode::OP_CHECKSIG | opcode::OP_CHECKSIGVERIFY => {
                let pubkey = stack.pop()?;
                let sig = stack.pop()?;
                let success = if tapscript {
                    eval_checksig_tapscript(&sig, &pubkey, checker, ctx)?
                } else {
                    let script_code = legacy_script_code(script, ctx);
                    check_signature_encoding(&sig, flags)?;
                    check_pubkey_encoding(&pubkey, flags, ctx.version)?;
                    checker.check_ecdsa(&sig, &pubkey, script_code, ctx.version)
                };
                if !success && flags.contains(VerifyFlags::NULLFAIL) && !sig.is_empty() {
                    return Err(ScriptError::SigNullFail);
                }
                if op.opcode == opcode::OP_CHECKSIGVERIFY {
                    if !success {
                        return Err(ScriptError::CheckSigVerify);
                    }
                } else {
                    stack.push_bool(success, altstack.depth())?;
                }
            }
            opcode::OP_CHECKSIGADD => {
                if !tapscript {
                    return Err(ScriptError::BadOpcode);
                }
                let pubkey = stack.pop()?;
                let n = ScriptNum::decode(stack.pop()?.as_slice(), 4, true)?;
                let sig = stack.pop()?;
                let success = eval_checksig_tapscript(&sig, &pubkey, checker, ctx)?;
                stack.push_num(ScriptNum(n.0 + success as i64), altstack.depth())?;
            }
            opcode::OP_CHECKMULTISIG | opcode::OP_CHECKMULTISIGVERIFY => {
                if tapscript {
                    return Err(ScriptError::TaprootCheckMultisig);
                }

                let key_count = stack.pop_num(minimal)?.0;
                if !(0..=MAX_PUBKEYS_PER_MULTISIG as i64).contains(&key_count) {
                    return Err(ScriptError::OpCount);
                }
                op_count += key_count as usize;
                if op_count > MAX_OPS_PER_SCRIPT {
                    return Err(ScriptError::OpCount);
                }
                let mut pubkeys = Vec::with_capacity(key_count as usize);
                for _ in 0..key_count {
                    pubkeys.push(stack.pop()?);
                }

                let sig_count = stack.pop_num(minimal)?.0;
                if sig_count < 0 || sig_count > key_count {
                    return Err(ScriptError::InvalidStackOperation);
                }
                let mut sigs = Vec::with_capacity(sig_count as usize);
                for _ in 0..sig_count {
                    sigs.push(stack.pop()?);
                }

                // The historical off-by-one consumes one extra element,
                // which NULLDUMMY pins to the empty string.
                let dummy = stack.pop()?;
                if flags.contains(VerifyFlags::NULLDUMMY) && !dummy.is_empty() {
                    return Err(ScriptError::SigNullDummy);
                }

                // Delete every signature from the legacy script code
                // before hashing.
                let mut script_code = legacy_script_code(script, ctx).to_vec();
                if ctx.version == SigVersion::Base {
                    for sig in sigs.iter() {
                        script_code = find_and_delete(&script_code, sig);
                    }
                }

                // Signatures must appear in key order, so one forward
                // pass suffices: advance keys until each sig matches.
                let mut success = true;
                let mut sig_idx = 0;
                let mut key_idx = 0;
                while sig_idx < sigs.len() {
                    if sigs.len() - sig_idx > pubkeys.len() - key_idx {
                        success = false;
                        break;
                    }
                    let sig = &sigs[sig_idx];
                    let pubkey = &pubkeys[key_idx];
                    check_signature_encoding(sig, flags)?;
                    check_pubkey_encoding(pubkey, flags, ctx.version)?;
                    if checker.check_ecdsa(sig, pubkey, &script_code, ctx.version) {
                        sig_idx += 1;
                    }
                    key_idx += 1;
                }

                if !success && flags.contains(VerifyFlags::NULLFAIL) {
                    if sigs.iter().any(|sig| !sig.is_empty()) {
                        return Err(ScriptError::SigNullFail);
                    }
                }

                if op.opcode == opcode::OP_CHECKMULTISIGVERIFY {
                    if !success {
                        return Err(ScriptError::CheckMultisigVerify);
                    }
                } else {
                    stack.push_bool(success, altstack.depth())?;
                }
            }

            // Lock times ---------------------------------------------------
            opcode::OP_CHECKLOCKTIMEVERIFY => {
                if !flags.contains(VerifyFlags::CHECKLOCKTIMEVERIFY) {
                    if flags.contains(VerifyFlags::DISCOURAGE_UPGRADABLE_NOPS) {
                        return Err(ScriptError::DiscourageUpgradableNops);
                    }
                } else {
                    // Lock times are 5-byte numbers: they outgrew 4 bytes
                    // in 2038 terms long ago.
                    let n = ScriptNum::decode(stack.peek(0)?, 5, minimal)?;
                    if n.0 < 0 {
                        return Err(ScriptError::NegativeLocktime);
                    }
                    if !checker.check_lock_time(n.0) {
                        return Err(ScriptError::UnsatisfiedLocktime);
                    }
                }
            }
            opcode::OP_CHECKSEQUENCEVERIFY => {
                if !flags.contains(VerifyFlags::CHECKSEQUENCEVERIFY) {
                    if flags.contains(VerifyFlags::DISCOURAGE_UPGRADABLE_NOPS) {
                        return Err(ScriptError::DiscourageUpgradableNops);
                    }
                } else {
                    let n = ScriptNum::decode(stack.peek(0)?, 5, minimal)?;
                    if n.0 < 0 {
                        return Err(ScriptError::NegativeLocktime);
                    }
                    // Bit 31 set: behave as a NOP for upgradeability.
                    if n.0 & (1 << 31) == 0 && !checker.check_sequence(n.0) {
                        return Err(ScriptError::UnsatisfiedLocktime);
                    }
                }
            }

            // Upgradable NOPs ----------------------------------------------
            Opcode(0xb0) | Opcode(0xb3..=0xb9) => {
                if flags.contains(VerifyFlags::DISCOURAGE_UPGRADABLE_NOPS) {
                    return Err(ScriptError::DiscourageUpgradableNops);
                }
            }

            _ => return Err(ScriptError::BadOpcode),
        }

        opcode_pos += 1;
    }

    if !exec_stack.is_empty() {
        return Err(ScriptError::UnbalancedConditional);
    }
    Ok(())
}

/// The subscript a legacy signature signs: everything after the last
/// executed OP_CODESEPARATOR.
fn legacy_script_code<'a>(script: &'a [u8], ctx: &ExecCtx) -> &'a [u8] {
    if ctx.codesep_pos != u32::MAX {
        &script[ctx.codesep_pos as usize..]
    } else {
        script
    }
}

/// BIP-342 CHECKSIG semantics shared by OP_CHECKSIG[VERIFY] and
/// OP_CHECKSIGADD in tapscript.
fn eval_checksig_tapscript(
    sig: &[u8],
    pubkey: &[u8],
    checker: &mut dyn SignatureChecker,
    ctx: &mut ExecCtx,
) -> Result<bool, ScriptError> {
    let success = !sig.is_empty();

    if success {
        ctx.validation_weight -= VALIDATION_WEIGHT_PER_SIGOP;
        if ctx.validation_weight < 0 {
            return Err(ScriptError::TaprootValidationWeight);
        }
    }

    if pubkey.is_empty() {
        return Err(ScriptError::PubkeyType);
    }
    if pubkey.len() == 32 {
        if success {
            let key =
                XOnlyPublicKey::from_slice(pubkey).map_err(|_| ScriptError::SchnorrSig)?;
            let leaf = ctx
                .leaf_hash
                .map(|leaf_hash| (leaf_hash, ctx.codesep_pos));
            if !checker.check_schnorr(sig, &key, leaf)? {
                return Err(ScriptError::SchnorrSig);
            }
        }
    }
    // Pubkeys of any other length are reserved for future upgrades and
    // treated as always-valid.
    Ok(success)
}

/// Full spend verification.
pub fn verify_script(
    script_sig: &[u8],
    script_pubkey: &[u8],
    witness: &[Vec<u8>],
    flags: VerifyFlags,
    checker: &mut dyn SignatureChecker,
) -> Result<(), ScriptError> {
    if flags.contains(VerifyFlags::SIGPUSHONLY) && !is_push_only(script_sig) {
        return Err(ScriptError::SigPushOnly);
    }

    let mut stack = Stack::new();
    let mut ctx = ExecCtx::new(SigVersion::Base);
    eval_script(&mut stack, script_sig, flags, checker, &mut ctx)?;
    let stack_after_sig = stack.clone();

    let mut ctx = ExecCtx::new(SigVersion::Base);
    eval_script(&mut stack, script_pubkey, flags, checker, &mut ctx)?;
    if stack.is_empty() || !stack.peek_bool()? {
        return Err(ScriptError::EvalFalse);
    }

    let mut had_witness = false;

    if flags.contains(VerifyFlags::WITNESS) {
        if let Some(program) = witness_program(script_pubkey) {
            had_witness = true;
            // A native witness spend must leave the scriptSig empty.
            if !script_sig.is_empty() {
                return Err(ScriptError::WitnessMalleated);
            }
            verify_witness_program(witness, program, flags, checker, false)?;
        }
    }

    // BIP-16.
    if flags.contains(VerifyFlags::P2SH)
        && crate::pattern::classify(script_pubkey) == crate::pattern::ScriptType::P2sh
        && !had_witness
    {
        if !is_push_only(script_sig) {
            return Err(ScriptError::SigPushOnly);
        }

        let mut stack_p2sh = stack_after_sig;
        let redeem_script = stack_p2sh.pop()?;

        let mut ctx = ExecCtx::new(SigVersion::Base);
        eval_script(&mut stack_p2sh, &redeem_script, flags, checker, &mut ctx)?;
        if stack_p2sh.is_empty() || !stack_p2sh.peek_bool()? {
            return Err(ScriptError::EvalFalse);
        }

        if flags.contains(VerifyFlags::WITNESS) {
            if let Some(program) = witness_program(&redeem_script) {
                had_witness = true;
                // The scriptSig must be exactly the push of the redeem
                // script, or the txid is malleable.
                let expected = {
                    let mut buf = Vec::with_capacity(redeem_script.len() + 3);
                    push_encode(&redeem_script, &mut buf);
                    buf
                };
                if script_sig != expected.as_slice() {
                    return Err(ScriptError::WitnessMalleated);
                }
                verify_witness_program(witness, program, flags, checker, true)?;
            }
        }
        stack = stack_p2sh;
    }

    if flags.contains(VerifyFlags::CLEANSTACK) && !had_witness && stack.depth() != 1 {
        return Err(ScriptError::CleanStack);
    }

    if !witness.is_empty() && !had_witness {
        return Err(ScriptError::WitnessUnexpected);
    }

    Ok(())
}

/// Minimal push encoding of arbitrary data, for the P2SH-witness
/// scriptSig comparison.
fn push_encode(data: &[u8], out: &mut Vec<u8>) {
    match data.len() {
        0 => out.push(0x00),
        len if len <= 0x4b => {
            out.push(len as u8);
            out.extend_from_slice(data);
        }
        len if len <= 0xff => {
            out.push(0x4c);
            out.push(len as u8);
            out.extend_from_slice(data);
        }
        len => {
            out.push(0x4d);
            out.extend_from_slice(&(len as u16).to_le_bytes());
            out.extend_from_slice(data);
        }
    }
}

/// Size of the witness stack as serialized on the wire, the base of the
/// tapscript validation budget.
fn witness_serialized_size(witness: &[Vec<u8>]) -> i64 {
    let mut size = VarInt::size(witness.len());
    for item in witness {
        size += VarInt::size(item.len()) + item.len();
    }
    size as i64
}

fn verify_witness_program(
    witness: &[Vec<u8>],
    program: WitnessProgram<'_>,
    flags: VerifyFlags,
    checker: &mut dyn SignatureChecker,
    is_p2sh: bool,
) -> Result<(), ScriptError> {
    match (program.version, program.program.len()) {
        (0, 32) => {
            // P2WSH: the last witness element is the script.
            if witness.is_empty() {
                return Err(ScriptError::WitnessProgramEmpty);
            }
            let (script, rest) = witness.split_last().expect("non-empty");
            if sha256(script) != program.program[..] {
                return Err(ScriptError::WitnessProgramMismatch);
            }
            execute_witness_script(rest, script, SigVersion::WitnessV0, flags, checker, None, 0)
        }
        (0, 20) => {
            // P2WPKH: implicit P2PKH-shaped script over (sig, pubkey).
            if witness.len() != 2 {
                return Err(ScriptError::WitnessProgramMismatch);
            }
            let mut script = Vec::with_capacity(25);
            script.extend_from_slice(&[0x76, 0xa9, 0x14]);
            script.extend_from_slice(program.program);
            script.extend_from_slice(&[0x88, 0xac]);
            execute_witness_script(
                witness,
                &script,
                SigVersion::WitnessV0,
                flags,
                checker,
                None,
                0,
            )
        }
        (0, _) => Err(ScriptError::WitnessProgramWrongLength),
        (1, 32) if flags.contains(VerifyFlags::TAPROOT) && !is_p2sh => {
            verify_taproot_spend(witness, program.program, flags, checker)
        }
        _ => {
            // Unknown witness versions are anyone-can-spend until a
            // soft fork defines them.
            if flags.contains(VerifyFlags::DISCOURAGE_UPGRADABLE_WITNESS_PROGRAM) {
                Err(ScriptError::DiscourageUpgradableWitnessProgram)
            } else {
                Ok(())
            }
        }
    }
}

fn verify_taproot_spend(
    witness: &[Vec<u8>],
    program: &[u8],
    flags: VerifyFlags,
    checker: &mut dyn SignatureChecker,
) -> Result<(), ScriptError> {
    if witness.is_empty() {
        return Err(ScriptError::WitnessProgramEmpty);
    }

    // The validation budget is based on the witness as serialized,
    // annex included.
    let budget = witness_serialized_size(witness) + VALIDATION_WEIGHT_OFFSET;

    // Strip the annex, when present.
    let mut witness = witness;
    if witness.len() >= 2
        && witness
            .last()
            .map(|item| item.first() == Some(&ANNEX_TAG))
            .unwrap_or(false)
    {
        witness = &witness[..witness.len() - 1];
    }

    let output_key =
        XOnlyPublicKey::from_slice(program).map_err(|_| ScriptError::WitnessProgramMismatch)?;

    if witness.len() == 1 {
        // Key path: one Schnorr signature over the BIP-341 sighash.
        if !checker.check_schnorr(&witness[0], &output_key, None)? {
            return Err(ScriptError::SchnorrSig);
        }
        return Ok(());
    }

    // Script path: last element is the control block, second-to-last the
    // script.
    let control = witness.last().expect("len >= 2");
    let script = &witness[witness.len() - 2];
    let stack = &witness[..witness.len() - 2];

    let parsed = ControlBlock::parse(control)?;
    let leaf_hash = parsed.verify_commitment(script, &output_key)?;

    if parsed.leaf_version != LEAF_VERSION_TAPSCRIPT {
        // Unknown leaf versions are reserved for upgrades.
        if flags.contains(VerifyFlags::DISCOURAGE_UPGRADABLE_WITNESS_PROGRAM) {
            return Err(ScriptError::DiscourageUpgradableWitnessProgram);
        }
        return Ok(());
    }

    execute_witness_script(
        stack,
        script,
        SigVersion::Tapscript,
        flags,
        checker,
        Some(leaf_hash),
        budget,
    )
}

fn execute_witness_script(
    stack_items: &[Vec<u8>],
    script: &[u8],
    version: SigVersion,
    flags: VerifyFlags,
    checker: &mut dyn SignatureChecker,
    leaf_hash: Option<[u8; 32]>,
    budget: i64,
) -> Result<(), ScriptError> {
    if stack_items.len() > MAX_STACK_SIZE {
        return Err(ScriptError::StackSize);
    }
    for item in stack_items {
        if item.len() > MAX_ELEMENT_SIZE {
            return Err(ScriptError::PushSize);
        }
    }
    if version == SigVersion::WitnessV0 && script.len() > MAX_SCRIPT_SIZE {
        return Err(ScriptError::ScriptSize);
    }

    if version == SigVersion::Tapscript {
        // Any OP_SUCCESS opcode makes the whole script succeed before
        // execution starts, bypassing even the final stack discipline.
        // The script must still parse.
        let mut found_success = false;
        for op in iter_ops(script) {
            let op = op?;
            if op.push.is_none() && is_op_success(op.opcode.0) {
                found_success = true;
            }
        }
        if found_success {
            return Ok(());
        }
    }

    let mut stack = Stack::from_items(stack_items.to_vec());
    let mut ctx = ExecCtx::new(version);
    ctx.leaf_hash = leaf_hash;
    ctx.validation_weight = budget;

    // Witness evaluation always enforces minimal pushes.
    let flags = flags | VerifyFlags::MINIMALDATA;
    eval_script(&mut stack, script, flags, checker, &mut ctx)?;

    // Witness scripts must finish with exactly one true element.
    if stack.depth() != 1 {
        return Err(ScriptError::CleanStack);
    }
    if !stack.peek_bool()? {
        return Err(ScriptError::EvalFalse);
    }
    Ok(())
}
