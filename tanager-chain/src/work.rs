//! Difficulty targets and accumulated proof of work.

use std::{cmp::Ordering, fmt, io, ops::Add};

use primitive_types::U256;

use crate::block;
use crate::serialize::{Decode, Encode, SerializationError};

/// The nBits compact encoding of a difficulty target.
///
/// A floating-point-like format: one exponent byte followed by a 24-bit
/// mantissa. Invalid encodings (zero, negative, or overflowing mantissas)
/// exist and must be rejected by expanding before use.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct CompactDifficulty(pub u32);

/// A 256-bit expanded difficulty target.
///
/// A block hash, read as a little-endian 256-bit integer, must be less
/// than or equal to this target. Greater targets represent *less* work.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd)]
pub struct ExpandedDifficulty(U256);

/// Accumulated proof of work: `(2^256 − target) / (target + 1) + 1`
/// summed over a chain of headers.
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd)]
pub struct Work(U256);

impl CompactDifficulty {
    /// Expand the compact encoding to a full 256-bit target.
    ///
    /// Returns `None` for the invalid encodings: zero or negative
    /// mantissas, and exponents that shift the mantissa past 256 bits.
    pub fn to_expanded(self) -> Option<ExpandedDifficulty> {
        const MANTISSA_MASK: u32 = 0x00ff_ffff;
        const SIGN_BIT: u32 = 0x0080_0000;

        let exponent = (self.0 >> 24) as i64;
        let mantissa = self.0 & MANTISSA_MASK;

        if mantissa == 0 || self.0 & SIGN_BIT != 0 {
            return None;
        }

        let result = if exponent <= 3 {
            U256::from(mantissa >> (8 * (3 - exponent) as u32))
        } else {
            let shift = 8 * (exponent - 3) as usize;
            // 256-bit overflow: any mantissa bit pushed past bit 255.
            if shift > 255 || (shift > 232 && U256::from(mantissa) >> (256 - shift) != U256::zero())
            {
                return None;
            }
            U256::from(mantissa) << shift
        };

        if result == U256::zero() {
            None
        } else {
            Some(ExpandedDifficulty(result))
        }
    }
}

impl ExpandedDifficulty {
    pub(crate) fn from_u256(target: U256) -> ExpandedDifficulty {
        ExpandedDifficulty(target)
    }

    /// The work a single header meeting this target proves.
    pub fn to_work(self) -> Work {
        // (2^256 - target) / (target + 1) + 1, computed without the
        // unrepresentable 2^256 term as !target / (target + 1) + 1.
        let numerator = !self.0;
        let denominator = self
            .0
            .checked_add(U256::one())
            .expect("a target below the 256-bit maximum");
        Work(numerator / denominator + U256::one())
    }
}

/// Block hashes compare against targets as little-endian 256-bit
/// integers.
impl PartialEq<block::Hash> for ExpandedDifficulty {
    fn eq(&self, other: &block::Hash) -> bool {
        self.partial_cmp(other) == Some(Ordering::Equal)
    }
}

impl PartialOrd<block::Hash> for ExpandedDifficulty {
    fn partial_cmp(&self, other: &block::Hash) -> Option<Ordering> {
        Some(self.0.cmp(&U256::from_little_endian(&other.0)))
    }
}

impl PartialEq<ExpandedDifficulty> for block::Hash {
    fn eq(&self, other: &ExpandedDifficulty) -> bool {
        other.eq(self)
    }
}

impl PartialOrd<ExpandedDifficulty> for block::Hash {
    fn partial_cmp(&self, other: &ExpandedDifficulty) -> Option<Ordering> {
        other.partial_cmp(self).map(Ordering::reverse)
    }
}

impl Work {
    pub fn zero() -> Work {
        Work(U256::zero())
    }

    /// Saturating accumulation; cumulative work cannot overflow in
    /// practice but the arithmetic should not be able to wrap either.
    pub fn saturating_add(self, other: Work) -> Work {
        Work(self.0.checked_add(other.0).unwrap_or_else(U256::max_value))
    }
}

impl Add for Work {
    type Output = Work;

    fn add(self, other: Work) -> Work {
        self.saturating_add(other)
    }
}

impl fmt::Debug for CompactDifficulty {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_tuple("CompactDifficulty")
            .field(&format_args!("{:#010x}", self.0))
            .finish()
    }
}

impl fmt::Debug for ExpandedDifficulty {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut bytes = [0u8; 32];
        self.0.to_big_endian(&mut bytes);
        f.debug_tuple("ExpandedDifficulty")
            .field(&hex::encode(bytes))
            .finish()
    }
}

impl fmt::Debug for Work {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_tuple("Work").field(&self.0).finish()
    }
}

impl Encode for CompactDifficulty {
    fn encode<W: io::Write>(&self, writer: W) -> Result<(), io::Error> {
        self.0.encode(writer)
    }

    fn encoded_len(&self) -> usize {
        4
    }
}

impl Decode for CompactDifficulty {
    fn decode<R: io::Read>(reader: R) -> Result<Self, SerializationError> {
        Ok(CompactDifficulty(u32::decode(reader)?))
    }
}

/// Work serializes as 32 big-endian bytes for block-index persistence.
impl Encode for Work {
    fn encode<W: io::Write>(&self, mut writer: W) -> Result<(), io::Error> {
        let mut bytes = [0u8; 32];
        self.0.to_big_endian(&mut bytes);
        writer.write_all(&bytes)
    }

    fn encoded_len(&self) -> usize {
        32
    }
}

impl Decode for Work {
    fn decode<R: io::Read>(reader: R) -> Result<Self, SerializationError> {
        Ok(Work(U256::from_big_endian(&<[u8; 32]>::decode(reader)?)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expands_the_genesis_bits() {
        // Mainnet genesis nBits.
        let target = CompactDifficulty(0x1d00_ffff)
            .to_expanded()
            .expect("valid encoding");
        let mut bytes = [0u8; 32];
        target.0.to_big_endian(&mut bytes);
        assert_eq!(
            hex::encode(bytes),
            "00000000ffff0000000000000000000000000000000000000000000000000000"
        );
    }

    #[test]
    fn rejects_invalid_encodings() {
        // Zero mantissa.
        assert!(CompactDifficulty(0x1d00_0000).to_expanded().is_none());
        // Negative (sign bit set).
        assert!(CompactDifficulty(0x1d80_0001).to_expanded().is_none());
        // Mantissa shifted past 256 bits.
        assert!(CompactDifficulty(0xff00_ffff).to_expanded().is_none());
    }

    #[test]
    fn hash_to_target_ordering() {
        let target = CompactDifficulty(0x1d00_ffff)
            .to_expanded()
            .expect("valid encoding");
        // The genesis hash is far below the genesis target.
        let low_hash = block::Hash([0u8; 32]);
        assert!(low_hash <= target);

        let mut high = [0u8; 32];
        high[31] = 0xff; // big-endian top byte, little-endian tail
        let high_hash = block::Hash(high);
        assert!(high_hash > target);
    }

    #[test]
    fn work_is_inverse_in_target() {
        let easy = CompactDifficulty(0x1d00_ffff).to_expanded().unwrap();
        let hard = CompactDifficulty(0x1b00_ffff).to_expanded().unwrap();
        assert!(hard.to_work() > easy.to_work());

        let total = easy.to_work() + hard.to_work();
        assert!(total > hard.to_work());
    }
}
