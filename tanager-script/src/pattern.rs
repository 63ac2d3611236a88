//! Script pattern recognition and sigop accounting.

use crate::opcode::{self, iter_ops, Opcode};
use crate::MAX_PUBKEYS_PER_MULTISIG;

/// The recognized output script shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptType {
    /// `<pubkey> OP_CHECKSIG`
    P2pk,
    /// `OP_DUP OP_HASH160 <20> OP_EQUALVERIFY OP_CHECKSIG`
    P2pkh,
    /// `OP_HASH160 <20> OP_EQUAL` (BIP-16)
    P2sh,
    /// `OP_0 <20>` (BIP-141)
    P2wpkh,
    /// `OP_0 <32>` (BIP-141)
    P2wsh,
    /// `OP_1 <32>` (BIP-341)
    P2tr,
    /// `<m> <pubkey>* <n> OP_CHECKMULTISIG`
    Multisig,
    /// `OP_RETURN ...` — a provably unspendable data carrier.
    NullData,
    /// A witness program with a version this node does not know.
    WitnessUnknown,
    /// Anything else.
    Unknown,
}

/// A parsed BIP-141 witness program: `<version> <2..=40 byte program>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WitnessProgram<'a> {
    pub version: u8,
    pub program: &'a [u8],
}

/// Parse a script as a witness program, if it has that exact shape.
pub fn witness_program(script: &[u8]) -> Option<WitnessProgram<'_>> {
    if script.len() < 4 || script.len() > 42 {
        return None;
    }
    let version = match script[0] {
        0x00 => 0,
        v @ 0x51..=0x60 => v - 0x50,
        _ => return None,
    };
    // The program must be a single direct push covering the remainder.
    let push_len = script[1] as usize;
    if !(2..=40).contains(&push_len) || script.len() != push_len + 2 {
        return None;
    }
    Some(WitnessProgram {
        version,
        program: &script[2..],
    })
}

fn is_compressed_or_uncompressed_pubkey_len(len: usize) -> bool {
    len == 33 || len == 65
}

/// Classify an output script.
pub fn classify(script: &[u8]) -> ScriptType {
    // Fixed-shape patterns first.
    if script.len() == 25
        && script[0] == opcode::OP_DUP.0
        && script[1] == opcode::OP_HASH160.0
        && script[2] == 20
        && script[23] == opcode::OP_EQUALVERIFY.0
        && script[24] == opcode::OP_CHECKSIG.0
    {
        return ScriptType::P2pkh;
    }
    if script.len() == 23
        && script[0] == opcode::OP_HASH160.0
        && script[1] == 20
        && script[22] == opcode::OP_EQUAL.0
    {
        return ScriptType::P2sh;
    }
    if let Some(program) = witness_program(script) {
        return match (program.version, program.program.len()) {
            (0, 20) => ScriptType::P2wpkh,
            (0, 32) => ScriptType::P2wsh,
            (1, 32) => ScriptType::P2tr,
            _ => ScriptType::WitnessUnknown,
        };
    }
    if script.first() == Some(&opcode::OP_RETURN.0) {
        return ScriptType::NullData;
    }
    if script.len() >= 35
        && is_compressed_or_uncompressed_pubkey_len(script[0] as usize)
        && script.len() == script[0] as usize + 2
        && script[script.len() - 1] == opcode::OP_CHECKSIG.0
    {
        return ScriptType::P2pk;
    }
    if is_multisig(script) {
        return ScriptType::Multisig;
    }
    ScriptType::Unknown
}

/// Bare multisig: `<m> <pubkey>* <n> OP_CHECKMULTISIG` with
/// `1 <= m <= n <= 20` and every push a plausible key.
fn is_multisig(script: &[u8]) -> bool {
    let mut ops = Vec::new();
    for op in iter_ops(script) {
        match op {
            Ok(op) => ops.push(op),
            Err(_) => return false,
        }
    }
    if ops.len() < 4 {
        return false;
    }
    let m = match ops[0].opcode.small_int() {
        Some(m) if m >= 1 => m,
        _ => return false,
    };
    let n = match ops[ops.len() - 2].opcode.small_int() {
        Some(n) if n >= m && n <= MAX_PUBKEYS_PER_MULTISIG as i64 => n,
        _ => return false,
    };
    if ops[ops.len() - 1].opcode != opcode::OP_CHECKMULTISIG {
        return false;
    }
    let keys = &ops[1..ops.len() - 2];
    keys.len() as i64 == n
        && keys.iter().all(|op| {
            op.push
                .map(|data| is_compressed_or_uncompressed_pubkey_len(data.len()))
                .unwrap_or(false)
        })
}

/// Count signature operations in a script.
///
/// CHECKSIG and CHECKSIGVERIFY count 1. CHECKMULTISIG[VERIFY] counts the
/// preceding small-integer key count when `accurate`, else the maximum
/// (20). Unparseable tails count what was seen before the parse error,
/// matching the historical behavior this rule froze around.
pub fn count_sigops(script: &[u8], accurate: bool) -> usize {
    let mut count = 0;
    let mut last_opcode: Option<Opcode> = None;

    for op in iter_ops(script) {
        let op = match op {
            Ok(op) => op,
            Err(_) => break,
        };
        match op.opcode {
            opcode::OP_CHECKSIG | opcode::OP_CHECKSIGVERIFY => count += 1,
            opcode::OP_CHECKMULTISIG | opcode::OP_CHECKMULTISIGVERIFY => {
                count += match last_opcode.and_then(Opcode::small_int) {
                    Some(n) if accurate && (1..=MAX_PUBKEYS_PER_MULTISIG as i64).contains(&n) => {
                        n as usize
                    }
                    _ => MAX_PUBKEYS_PER_MULTISIG,
                }
            }
            _ => {}
        }
        last_opcode = Some(op.opcode);
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_the_standard_shapes() {
        let mut p2pkh = vec![0x76, 0xa9, 0x14];
        p2pkh.extend_from_slice(&[0u8; 20]);
        p2pkh.extend_from_slice(&[0x88, 0xac]);
        assert_eq!(classify(&p2pkh), ScriptType::P2pkh);

        let mut p2sh = vec![0xa9, 0x14];
        p2sh.extend_from_slice(&[0u8; 20]);
        p2sh.push(0x87);
        assert_eq!(classify(&p2sh), ScriptType::P2sh);

        let mut p2wpkh = vec![0x00, 0x14];
        p2wpkh.extend_from_slice(&[0u8; 20]);
        assert_eq!(classify(&p2wpkh), ScriptType::P2wpkh);

        let mut p2wsh = vec![0x00, 0x20];
        p2wsh.extend_from_slice(&[0u8; 32]);
        assert_eq!(classify(&p2wsh), ScriptType::P2wsh);

        let mut p2tr = vec![0x51, 0x20];
        p2tr.extend_from_slice(&[0u8; 32]);
        assert_eq!(classify(&p2tr), ScriptType::P2tr);

        let mut p2wsh_v2 = vec![0x52, 0x20];
        p2wsh_v2.extend_from_slice(&[0u8; 32]);
        assert_eq!(classify(&p2wsh_v2), ScriptType::WitnessUnknown);

        assert_eq!(classify(&[0x6a, 0x01, 0xff]), ScriptType::NullData);

        let mut p2pk = vec![33];
        p2pk.extend_from_slice(&[0x02; 33]);
        p2pk.push(0xac);
        assert_eq!(classify(&p2pk), ScriptType::P2pk);

        // 1-of-2 bare multisig.
        let mut multisig = vec![0x51, 33];
        multisig.extend_from_slice(&[0x02; 33]);
        multisig.push(33);
        multisig.extend_from_slice(&[0x03; 33]);
        multisig.extend_from_slice(&[0x52, 0xae]);
        assert_eq!(classify(&multisig), ScriptType::Multisig);

        assert_eq!(classify(&[0x99]), ScriptType::Unknown);
    }

    #[test]
    fn sigop_counting() {
        // Two bare checksigs.
        assert_eq!(count_sigops(&[0xac, 0xad], true), 2);

        // Multisig preceded by OP_3: 3 accurate, 20 legacy.
        let script = [0x53, 0xae];
        assert_eq!(count_sigops(&script, true), 3);
        assert_eq!(count_sigops(&script, false), 20);

        // Multisig with no preceding count: 20 either way.
        assert_eq!(count_sigops(&[0xae], true), 20);
    }
}
