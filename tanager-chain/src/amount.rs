//! Satoshi amounts with checked arithmetic.

use std::convert::TryFrom;
use std::fmt;

use thiserror::Error;

use crate::serialize::{Decode, Encode, SerializationError};

/// One bitcoin, in satoshis.
pub const COIN: i64 = 100_000_000;

/// The monetary cap: 21 million BTC in satoshis.
///
/// This is above the true issuance (20,999,999.9769 BTC); consensus only
/// requires that no value or sum of values exceeds it.
pub const MAX_MONEY: i64 = 21_000_000 * COIN;

/// An amount of satoshis in the valid monetary range `[0, MAX_MONEY]`.
///
/// All arithmetic is checked: overflow or leaving the monetary range is an
/// [`Error`], never a wrap or a panic.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Amount(i64);

impl Amount {
    /// The zero amount.
    pub const fn zero() -> Amount {
        Amount(0)
    }

    /// The raw satoshi value.
    pub fn satoshis(self) -> i64 {
        self.0
    }

    /// Checked addition.
    pub fn checked_add(self, other: Amount) -> Result<Amount, Error> {
        let sum = self
            .0
            .checked_add(other.0)
            .ok_or(Error::Overflow { a: self.0, b: other.0 })?;
        Amount::try_from(sum)
    }

    /// Checked subtraction. Fails if the result would be negative.
    pub fn checked_sub(self, other: Amount) -> Result<Amount, Error> {
        Amount::try_from(self.0 - other.0)
    }
}

impl TryFrom<i64> for Amount {
    type Error = Error;

    fn try_from(satoshis: i64) -> Result<Amount, Error> {
        if (0..=MAX_MONEY).contains(&satoshis) {
            Ok(Amount(satoshis))
        } else {
            Err(Error::OutOfRange(satoshis))
        }
    }
}

impl TryFrom<u64> for Amount {
    type Error = Error;

    fn try_from(satoshis: u64) -> Result<Amount, Error> {
        i64::try_from(satoshis)
            .map_err(|_| Error::OutOfRange(i64::MAX))
            .and_then(Amount::try_from)
    }
}

impl From<Amount> for i64 {
    fn from(amount: Amount) -> i64 {
        amount.0
    }
}

impl fmt::Debug for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Amount").field(&self.0).finish()
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} sat", self.0)
    }
}

/// Sum a sequence of amounts, failing on overflow past `MAX_MONEY`.
impl std::iter::Sum<Amount> for Result<Amount, Error> {
    fn sum<I: Iterator<Item = Amount>>(iter: I) -> Self {
        iter.fold(Ok(Amount::zero()), |acc, x| acc?.checked_add(x))
    }
}

/// An amount operation that left the valid monetary range.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// amount {0} is outside the valid range [0, MAX_MONEY]
    #[error("amount {0} is outside the valid range [0, {}]", MAX_MONEY)]
    OutOfRange(i64),
    /// adding {a} and {b} overflowed
    #[error("adding {a} and {b} overflowed")]
    Overflow { a: i64, b: i64 },
}

impl Encode for Amount {
    fn encode<W: std::io::Write>(&self, writer: W) -> Result<(), std::io::Error> {
        self.0.encode(writer)
    }

    fn encoded_len(&self) -> usize {
        8
    }
}

impl Decode for Amount {
    fn decode<R: std::io::Read>(reader: R) -> Result<Amount, SerializationError> {
        let raw = i64::decode(reader)?;
        Amount::try_from(raw).map_err(|_| SerializationError::Parse("amount out of range"))
    }
}

#[cfg(any(test, feature = "proptest-impl"))]
impl proptest::arbitrary::Arbitrary for Amount {
    type Parameters = ();
    type Strategy = proptest::strategy::BoxedStrategy<Self>;

    fn arbitrary_with(_: ()) -> Self::Strategy {
        use proptest::prelude::*;
        (0..=MAX_MONEY).prop_map(Amount).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_is_enforced() {
        assert!(Amount::try_from(0i64).is_ok());
        assert!(Amount::try_from(MAX_MONEY).is_ok());
        assert!(Amount::try_from(-1i64).is_err());
        assert!(Amount::try_from(MAX_MONEY + 1).is_err());
    }

    #[test]
    fn sums_are_checked() {
        let half = Amount::try_from(MAX_MONEY / 2 + 1).expect("in range");
        assert!(half.checked_add(half).is_err());

        let amounts = vec![Amount::try_from(5i64).unwrap(), Amount::try_from(7i64).unwrap()];
        let total: Result<Amount, Error> = amounts.into_iter().sum();
        assert_eq!(total.unwrap().satoshis(), 12);
    }

    #[test]
    fn subtraction_cannot_go_negative() {
        let five = Amount::try_from(5i64).unwrap();
        let seven = Amount::try_from(7i64).unwrap();
        assert_eq!(seven.checked_sub(five).unwrap().satoshis(), 2);
        assert!(five.checked_sub(seven).is_err());
    }
}
