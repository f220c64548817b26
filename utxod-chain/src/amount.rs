//! A validated money amount: non-negative and within the 21-million-coin
//! monetary base.
//!
//! Wrapping the raw `i64` in a constrained newtype means "this output's
//! value is out of range" becomes a construction-time error instead of a
//! fact some validation pass has to remember to check later.

use crate::serialization::{CodecError, Decode, Encode};
use std::marker::PhantomData;
use thiserror::Error;

/// Total monetary base: 21 million coins at 1e8 smallest units each.
pub const MAX_MONEY: i64 = 21_000_000 * 100_000_000;

pub trait Constraint {
    fn validate(value: i64) -> Result<(), AmountError>;
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct NonNegative;
impl Constraint for NonNegative {
    fn validate(value: i64) -> Result<(), AmountError> {
        if !(0..=MAX_MONEY).contains(&value) {
            return Err(AmountError::OutOfRange(value));
        }
        Ok(())
    }
}

/// No constraint beyond fitting in an `i64` — used for signed sums (fees,
/// value deltas) that may be negative or exceed `MAX_MONEY` transiently
/// before a final range check.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct Unconstrained;
impl Constraint for Unconstrained {
    fn validate(_value: i64) -> Result<(), AmountError> {
        Ok(())
    }
}

#[derive(Error, Debug, Clone, Copy, Eq, PartialEq)]
pub enum AmountError {
    #[error("amount {0} is outside the valid money range")]
    OutOfRange(i64),
}

#[derive(Clone, Copy, Eq, PartialEq, PartialOrd, Ord, Hash)]
pub struct Amount<C: Constraint = NonNegative>(i64, PhantomData<C>);

impl<C: Constraint> Amount<C> {
    pub fn try_new(value: i64) -> Result<Self, AmountError> {
        C::validate(value)?;
        Ok(Amount(value, PhantomData))
    }

    pub fn zero() -> Self {
        Amount(0, PhantomData)
    }

    pub fn value(&self) -> i64 {
        self.0
    }

    pub fn constrain<D: Constraint>(self) -> Result<Amount<D>, AmountError> {
        Amount::<D>::try_new(self.0)
    }
}

impl<C: Constraint> std::fmt::Debug for Amount<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Amount({})", self.0)
    }
}

impl<C: Constraint> std::fmt::Display for Amount<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Fixed 8-decimal-place string, the form the RPC surface reports.
        write!(f, "{}.{:08}", self.0 / 100_000_000, (self.0 % 100_000_000).abs())
    }
}

impl<C: Constraint> Encode for Amount<C> {
    fn encode<W: std::io::Write>(&self, target: W) -> std::io::Result<()> {
        self.0.encode(target)
    }
}
impl<C: Constraint> Decode for Amount<C> {
    fn decode<R: std::io::Read>(target: R) -> Result<Self, CodecError> {
        let value = i64::decode(target)?;
        Amount::try_new(value).map_err(|_| CodecError::Parse("amount out of valid money range"))
    }
}

impl<C: Constraint> serde::Serialize for Amount<C> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}
impl<'de, C: Constraint> serde::Deserialize<'de> for Amount<C> {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = i64::deserialize(deserializer)?;
        Amount::try_new(value).map_err(serde::de::Error::custom)
    }
}

#[cfg(any(test, feature = "proptest-impl"))]
impl<C: Constraint> proptest::arbitrary::Arbitrary for Amount<C> {
    type Parameters = ();
    type Strategy = proptest::strategy::BoxedStrategy<Self>;

    fn arbitrary_with(_args: ()) -> Self::Strategy {
        use proptest::prelude::*;
        any::<i64>().prop_filter_map("value out of range for Amount constraint", |v| Amount::try_new(v).ok()).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_out_of_range() {
        assert!(Amount::<NonNegative>::try_new(-1).is_err());
        assert!(Amount::<NonNegative>::try_new(MAX_MONEY + 1).is_err());
        assert!(Amount::<NonNegative>::try_new(MAX_MONEY).is_ok());
    }

    #[test]
    fn displays_eight_decimals() {
        let amount = Amount::<NonNegative>::try_new(123_456_789).unwrap();
        assert_eq!(amount.to_string(), "1.23456789");
    }
}
