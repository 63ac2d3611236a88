//! Opcode definitions and raw script iteration.
//!
//! The opcode set is frozen. Direct pushes occupy 0x01..=0x4b; everything
//! else is a named operation, a disabled operation, or undefined.

use crate::ScriptError;

/// A single script opcode byte.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Opcode(pub u8);

// Push value
pub const OP_0: Opcode = Opcode(0x00);
pub const OP_PUSHDATA1: Opcode = Opcode(0x4c);
pub const OP_PUSHDATA2: Opcode = Opcode(0x4d);
pub const OP_PUSHDATA4: Opcode = Opcode(0x4e);
pub const OP_1NEGATE: Opcode = Opcode(0x4f);
pub const OP_RESERVED: Opcode = Opcode(0x50);
pub const OP_1: Opcode = Opcode(0x51);
pub const OP_2: Opcode = Opcode(0x52);
pub const OP_3: Opcode = Opcode(0x53);
pub const OP_16: Opcode = Opcode(0x60);

// Flow control
pub const OP_NOP: Opcode = Opcode(0x61);
pub const OP_VER: Opcode = Opcode(0x62);
pub const OP_IF: Opcode = Opcode(0x63);
pub const OP_NOTIF: Opcode = Opcode(0x64);
pub const OP_VERIF: Opcode = Opcode(0x65);
pub const OP_VERNOTIF: Opcode = Opcode(0x66);
pub const OP_ELSE: Opcode = Opcode(0x67);
pub const OP_ENDIF: Opcode = Opcode(0x68);
pub const OP_VERIFY: Opcode = Opcode(0x69);
pub const OP_RETURN: Opcode = Opcode(0x6a);

// Stack
pub const OP_TOALTSTACK: Opcode = Opcode(0x6b);
pub const OP_FROMALTSTACK: Opcode = Opcode(0x6c);
pub const OP_2DROP: Opcode = Opcode(0x6d);
pub const OP_2DUP: Opcode = Opcode(0x6e);
pub const OP_3DUP: Opcode = Opcode(0x6f);
pub const OP_2OVER: Opcode = Opcode(0x70);
pub const OP_2ROT: Opcode = Opcode(0x71);
pub const OP_2SWAP: Opcode = Opcode(0x72);
pub const OP_IFDUP: Opcode = Opcode(0x73);
pub const OP_DEPTH: Opcode = Opcode(0x74);
pub const OP_DROP: Opcode = Opcode(0x75);
pub const OP_DUP: Opcode = Opcode(0x76);
pub const OP_NIP: Opcode = Opcode(0x77);
pub const OP_OVER: Opcode = Opcode(0x78);
pub const OP_PICK: Opcode = Opcode(0x79);
pub const OP_ROLL: Opcode = Opcode(0x7a);
pub const OP_ROT: Opcode = Opcode(0x7b);
pub const OP_SWAP: Opcode = Opcode(0x7c);
pub const OP_TUCK: Opcode = Opcode(0x7d);

// Splice (all disabled except OP_SIZE)
pub const OP_CAT: Opcode = Opcode(0x7e);
pub const OP_SUBSTR: Opcode = Opcode(0x7f);
pub const OP_LEFT: Opcode = Opcode(0x80);
pub const OP_RIGHT: Opcode = Opcode(0x81);
pub const OP_SIZE: Opcode = Opcode(0x82);

// Bitwise logic (disabled except the equality tests)
pub const OP_INVERT: Opcode = Opcode(0x83);
pub const OP_AND: Opcode = Opcode(0x84);
pub const OP_OR: Opcode = Opcode(0x85);
pub const OP_XOR: Opcode = Opcode(0x86);
pub const OP_EQUAL: Opcode = Opcode(0x87);
pub const OP_EQUALVERIFY: Opcode = Opcode(0x88);
pub const OP_RESERVED1: Opcode = Opcode(0x89);
pub const OP_RESERVED2: Opcode = Opcode(0x8a);

// Arithmetic
pub const OP_1ADD: Opcode = Opcode(0x8b);
pub const OP_1SUB: Opcode = Opcode(0x8c);
pub const OP_2MUL: Opcode = Opcode(0x8d);
pub const OP_2DIV: Opcode = Opcode(0x8e);
pub const OP_NEGATE: Opcode = Opcode(0x8f);
pub const OP_ABS: Opcode = Opcode(0x90);
pub const OP_NOT: Opcode = Opcode(0x91);
pub const OP_0NOTEQUAL: Opcode = Opcode(0x92);
pub const OP_ADD: Opcode = Opcode(0x93);
pub const OP_SUB: Opcode = Opcode(0x94);
pub const OP_MUL: Opcode = Opcode(0x95);
pub const OP_DIV: Opcode = Opcode(0x96);
pub const OP_MOD: Opcode = Opcode(0x97);
pub const OP_LSHIFT: Opcode = Opcode(0x98);
pub const OP_RSHIFT: Opcode = Opcode(0x99);
pub const OP_BOOLAND: Opcode = Opcode(0x9a);
pub const OP_BOOLOR: Opcode = Opcode(0x9b);
pub const OP_NUMEQUAL: Opcode = Opcode(0x9c);
pub const OP_NUMEQUALVERIFY: Opcode = Opcode(0x9d);
pub const OP_NUMNOTEQUAL: Opcode = Opcode(0x9e);
pub const OP_LESSTHAN: Opcode = Opcode(0x9f);
pub const OP_GREATERTHAN: Opcode = Opcode(0xa0);
pub const OP_LESSTHANOREQUAL: Opcode = Opcode(0xa1);
pub const OP_GREATERTHANOREQUAL: Opcode = Opcode(0xa2);
pub const OP_MIN: Opcode = Opcode(0xa3);
pub const OP_MAX: Opcode = Opcode(0xa4);
pub const OP_WITHIN: Opcode = Opcode(0xa5);

// Crypto
pub const OP_RIPEMD160: Opcode = Opcode(0xa6);
pub const OP_SHA1: Opcode = Opcode(0xa7);
pub const OP_SHA256: Opcode = Opcode(0xa8);
pub const OP_HASH160: Opcode = Opcode(0xa9);
pub const OP_HASH256: Opcode = Opcode(0xaa);
pub const OP_CODESEPARATOR: Opcode = Opcode(0xab);
pub const OP_CHECKSIG: Opcode = Opcode(0xac);
pub const OP_CHECKSIGVERIFY: Opcode = Opcode(0xad);
pub const OP_CHECKMULTISIG: Opcode = Opcode(0xae);
pub const OP_CHECKMULTISIGVERIFY: Opcode = Opcode(0xaf);

// Expansion
pub const OP_NOP1: Opcode = Opcode(0xb0);
pub const OP_CHECKLOCKTIMEVERIFY: Opcode = Opcode(0xb1);
pub const OP_CHECKSEQUENCEVERIFY: Opcode = Opcode(0xb2);
pub const OP_NOP4: Opcode = Opcode(0xb3);
pub const OP_NOP10: Opcode = Opcode(0xb9);

// Tapscript (BIP-342)
pub const OP_CHECKSIGADD: Opcode = Opcode(0xba);

pub const OP_INVALIDOPCODE: Opcode = Opcode(0xff);

impl Opcode {
    /// Is this byte a push operation (OP_0, a direct push, PUSHDATA, a
    /// small integer, or OP_1NEGATE)?
    pub fn is_push(self) -> bool {
        self.0 <= OP_16.0
    }

    /// The frozen disabled set; executing any of these fails the script
    /// whether or not the branch is taken.
    pub fn is_disabled(self) -> bool {
        matches!(
            self,
            OP_CAT
                | OP_SUBSTR
                | OP_LEFT
                | OP_RIGHT
                | OP_INVERT
                | OP_AND
                | OP_OR
                | OP_XOR
                | OP_2MUL
                | OP_2DIV
                | OP_MUL
                | OP_DIV
                | OP_MOD
                | OP_LSHIFT
                | OP_RSHIFT
        )
    }

    /// OP_IF..OP_ENDIF flow control, processed even in unexecuted
    /// branches.
    pub fn is_conditional(self) -> bool {
        matches!(self, OP_IF | OP_NOTIF | OP_ELSE | OP_ENDIF)
    }

    /// Decode OP_1..OP_16 and OP_1NEGATE to their small-number values.
    pub fn small_int(self) -> Option<i64> {
        match self.0 {
            0x4f => Some(-1),
            0x51..=0x60 => Some((self.0 - 0x50) as i64),
            _ => None,
        }
    }

    /// Encode 0..=16 as the matching small-integer opcode.
    pub fn from_small_int(n: u8) -> Opcode {
        debug_assert!(n <= 16);
        if n == 0 {
            OP_0
        } else {
            Opcode(0x50 + n)
        }
    }
}

/// One parsed operation: the opcode, plus its payload when it pushes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawOp<'a> {
    pub opcode: Opcode,
    pub push: Option<&'a [u8]>,
}

/// Iterate the operations of a script lazily.
///
/// The iterator yields an error item and stops if a push runs past the
/// end of the script; trailing garbage is unrepresentable.
pub fn iter_ops(script: &[u8]) -> OpIter<'_> {
    OpIter { script, pos: 0 }
}

pub struct OpIter<'a> {
    script: &'a [u8],
    pos: usize,
}

impl<'a> OpIter<'a> {
    /// Current byte offset, used by OP_CODESEPARATOR bookkeeping.
    pub fn position(&self) -> usize {
        self.pos
    }
}

impl<'a> Iterator for OpIter<'a> {
    type Item = Result<RawOp<'a>, ScriptError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.script.len() {
            return None;
        }

        let opcode = Opcode(self.script[self.pos]);
        self.pos += 1;

        let push_len = match opcode.0 {
            0x01..=0x4b => opcode.0 as usize,
            0x4c..=0x4e => {
                let len_bytes = 1 << (opcode.0 - 0x4c);
                if self.pos + len_bytes > self.script.len() {
                    self.pos = self.script.len();
                    return Some(Err(ScriptError::BadOpcode));
                }
                let mut len = 0usize;
                for i in 0..len_bytes {
                    len |= (self.script[self.pos + i] as usize) << (8 * i);
                }
                self.pos += len_bytes;
                len
            }
            _ => {
                // OP_0, small ints, and every named op carry no payload.
                return Some(Ok(RawOp { opcode, push: None }));
            }
        };

        if self.pos + push_len > self.script.len() {
            self.pos = self.script.len();
            return Some(Err(ScriptError::BadOpcode));
        }
        let data = &self.script[self.pos..self.pos + push_len];
        self.pos += push_len;
        Some(Ok(RawOp {
            opcode,
            push: Some(data),
        }))
    }
}

/// Was this push the minimal way to produce its data? Required by
/// MINIMALDATA.
pub fn is_minimal_push(opcode: Opcode, data: &[u8]) -> bool {
    match data.len() {
        0 => opcode == OP_0,
        1 => {
            let b = data[0];
            if (1..=16).contains(&b) {
                opcode == Opcode(0x50 + b)
            } else if b == 0x81 {
                opcode == OP_1NEGATE
            } else {
                opcode.0 == 1
            }
        }
        len if len <= 75 => opcode.0 as usize == len,
        len if len <= 255 => opcode == OP_PUSHDATA1,
        len if len <= 65535 => opcode == OP_PUSHDATA2,
        _ => opcode == OP_PUSHDATA4,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_pushes() {
        let script = [0x03, 0xaa, 0xbb, 0xcc, 0x51];
        let ops: Vec<_> = iter_ops(&script).collect::<Result<_, _>>().expect("parses");
        assert_eq!(ops.len(), 2);
        assert_eq!(ops[0].push, Some(&[0xaa, 0xbb, 0xcc][..]));
        assert_eq!(ops[1].opcode, OP_1);
        assert_eq!(ops[1].push, None);
    }

    #[test]
    fn pushdata_length_prefixes() {
        let mut script = vec![0x4c, 0x02, 0x01, 0x02]; // PUSHDATA1
        script.extend_from_slice(&[0x4d, 0x01, 0x00, 0xff]); // PUSHDATA2, len 1
        let ops: Vec<_> = iter_ops(&script).collect::<Result<_, _>>().expect("parses");
        assert_eq!(ops[0].push, Some(&[0x01, 0x02][..]));
        assert_eq!(ops[1].push, Some(&[0xff][..]));
    }

    #[test]
    fn truncated_pushes_error() {
        for script in [&[0x05, 0x01][..], &[0x4c][..], &[0x4c, 0x09, 0x00][..]].iter() {
            let last = iter_ops(script).last().expect("yields something");
            assert!(last.is_err(), "script {:?} should fail", script);
        }
    }

    #[test]
    fn disabled_set_is_frozen() {
        let disabled = [
            0x7e, 0x7f, 0x80, 0x81, 0x83, 0x84, 0x85, 0x86, 0x8d, 0x8e, 0x95, 0x96, 0x97, 0x98,
            0x99,
        ];
        for byte in 0..=0xffu8 {
            assert_eq!(
                Opcode(byte).is_disabled(),
                disabled.contains(&byte),
                "opcode {:#04x}",
                byte
            );
        }
    }
}
