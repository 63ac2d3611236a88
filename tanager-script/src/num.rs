//! Script numbers.
//!
//! Numbers on the stack are little-endian sign-magnitude byte strings:
//! the high bit of the last byte is the sign, and zero is the empty
//! string. Arithmetic operands must fit in 4 bytes; results may grow to
//! 5. CHECKLOCKTIMEVERIFY and CHECKSEQUENCEVERIFY accept 5-byte operands.

use crate::ScriptError;

/// A decoded script number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ScriptNum(pub i64);

impl ScriptNum {
    /// Decode a stack element as a number.
    ///
    /// `max_len` is 4 for arithmetic, 5 for the lock-time opcodes. When
    /// `minimal` is set (MINIMALDATA), padding bytes that could be
    /// stripped without changing the value are rejected.
    pub fn decode(data: &[u8], max_len: usize, minimal: bool) -> Result<ScriptNum, ScriptError> {
        if data.len() > max_len {
            return Err(ScriptError::InvalidNumberRange);
        }
        if data.is_empty() {
            return Ok(ScriptNum(0));
        }

        if minimal {
            // The top byte must carry information beyond the sign bit,
            // unless the sign bit would otherwise collide with the value.
            let last = data[data.len() - 1];
            if last & 0x7f == 0 && (data.len() == 1 || data[data.len() - 2] & 0x80 == 0) {
                return Err(ScriptError::ImpossibleEncoding);
            }
        }

        let mut value: i64 = 0;
        for (i, &byte) in data.iter().enumerate() {
            value |= (byte as i64) << (8 * i);
        }

        // Strip the sign bit out of the top byte and apply it.
        let sign_bit = 1i64 << (8 * data.len() - 1);
        if value & sign_bit != 0 {
            value = -(value & !sign_bit);
        }
        Ok(ScriptNum(value))
    }

    /// Encode to the minimal byte representation.
    pub fn encode(self) -> Vec<u8> {
        let mut result = Vec::new();
        if self.0 == 0 {
            return result;
        }

        let negative = self.0 < 0;
        let mut abs = self.0.unsigned_abs();
        while abs > 0 {
            result.push((abs & 0xff) as u8);
            abs >>= 8;
        }

        // If the high bit of the top byte is taken by the magnitude, add
        // a byte to hold the sign.
        let last = *result.last().expect("non-zero magnitude");
        if last & 0x80 != 0 {
            result.push(if negative { 0x80 } else { 0x00 });
        } else if negative {
            let idx = result.len() - 1;
            result[idx] |= 0x80;
        }
        result
    }

    /// Truth value of a stack element: false is empty or all zeroes,
    /// allowing a sign byte on the end (negative zero is false).
    pub fn element_to_bool(data: &[u8]) -> bool {
        for (i, &byte) in data.iter().enumerate() {
            if byte != 0 {
                // Negative zero: sign bit alone in the last byte.
                return !(i == data.len() - 1 && byte == 0x80);
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn zero_is_the_empty_string() {
        assert_eq!(ScriptNum(0).encode(), Vec::<u8>::new());
        assert_eq!(ScriptNum::decode(&[], 4, true).unwrap(), ScriptNum(0));
    }

    #[test]
    fn known_encodings() {
        assert_eq!(ScriptNum(1).encode(), vec![0x01]);
        assert_eq!(ScriptNum(-1).encode(), vec![0x81]);
        assert_eq!(ScriptNum(127).encode(), vec![0x7f]);
        assert_eq!(ScriptNum(128).encode(), vec![0x80, 0x00]);
        assert_eq!(ScriptNum(-128).encode(), vec![0x80, 0x80]);
        assert_eq!(ScriptNum(255).encode(), vec![0xff, 0x00]);
        assert_eq!(ScriptNum(256).encode(), vec![0x00, 0x01]);
    }

    #[test]
    fn non_minimal_encodings_are_rejected() {
        // 1 with a padding byte.
        assert_eq!(
            ScriptNum::decode(&[0x01, 0x00], 4, true),
            Err(ScriptError::ImpossibleEncoding)
        );
        // Negative zero.
        assert_eq!(
            ScriptNum::decode(&[0x80], 4, true),
            Err(ScriptError::ImpossibleEncoding)
        );
        // But a sign byte needed to keep the value positive is fine.
        assert_eq!(
            ScriptNum::decode(&[0x80, 0x00], 4, true).unwrap(),
            ScriptNum(128)
        );
        // Without MINIMALDATA they all decode.
        assert_eq!(
            ScriptNum::decode(&[0x01, 0x00], 4, false).unwrap(),
            ScriptNum(1)
        );
    }

    #[test]
    fn five_byte_numbers_only_where_permitted() {
        let five = [0xff, 0xff, 0xff, 0xff, 0x7f];
        assert!(ScriptNum::decode(&five, 4, false).is_err());
        assert_eq!(
            ScriptNum::decode(&five, 5, false).unwrap(),
            ScriptNum(0x7fff_ffff_ff)
        );
    }

    #[test]
    fn boolean_conversion() {
        assert!(!ScriptNum::element_to_bool(&[]));
        assert!(!ScriptNum::element_to_bool(&[0x00]));
        assert!(!ScriptNum::element_to_bool(&[0x00, 0x00]));
        assert!(!ScriptNum::element_to_bool(&[0x00, 0x80])); // negative zero
        assert!(ScriptNum::element_to_bool(&[0x01]));
        assert!(ScriptNum::element_to_bool(&[0x80, 0x00]));
        assert!(ScriptNum::element_to_bool(&[0x00, 0x01]));
    }

    proptest! {
        /// decode(encode(n)) == n over the full arithmetic range.
        #[test]
        fn roundtrip(n in -0x7fff_ffffi64..=0x7fff_ffff) {
            tanager_test::init();

            let encoded = ScriptNum(n).encode();
            prop_assert!(encoded.len() <= 4);
            let decoded = ScriptNum::decode(&encoded, 4, true).unwrap();
            prop_assert_eq!(decoded, ScriptNum(n));
        }
    }
}
