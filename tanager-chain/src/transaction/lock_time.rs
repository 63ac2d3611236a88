use std::io;

use crate::block::Height;
use crate::serialize::{Decode, Encode, SerializationError};

/// The raw locktime values at or above this threshold are Unix timestamps;
/// below it they are block heights.
pub const LOCK_TIME_THRESHOLD: u32 = 500_000_000;

/// A transaction's absolute lock time.
///
/// The raw field is a u32 whose meaning flips at `LOCK_TIME_THRESHOLD`:
/// small values are block heights, large values are Unix times.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LockTime {
    /// Unlocked once the chain reaches this height.
    Height(Height),
    /// Unlocked once the median-time-past reaches this Unix time.
    Time(u32),
}

impl LockTime {
    /// A lock time that never locks anything.
    pub const fn unlocked() -> LockTime {
        LockTime::Height(Height(0))
    }

    /// Interpret a raw consensus u32.
    pub fn from_raw(raw: u32) -> LockTime {
        if raw < LOCK_TIME_THRESHOLD {
            LockTime::Height(Height(raw))
        } else {
            LockTime::Time(raw)
        }
    }

    /// The raw consensus u32.
    pub fn raw(self) -> u32 {
        match self {
            LockTime::Height(height) => height.0,
            LockTime::Time(time) => time,
        }
    }
}

impl Encode for LockTime {
    fn encode<W: io::Write>(&self, writer: W) -> Result<(), io::Error> {
        self.raw().encode(writer)
    }

    fn encoded_len(&self) -> usize {
        4
    }
}

impl Decode for LockTime {
    fn decode<R: io::Read>(reader: R) -> Result<Self, SerializationError> {
        Ok(LockTime::from_raw(u32::decode(reader)?))
    }
}
