//! Absolute transaction finality: `nLockTime` and its interpretation as
//! either a block height or a Unix timestamp, depending on which side of
//! [`LOCK_TIME_THRESHOLD`] the raw value falls.

use crate::block;
use crate::serialization::{CodecError, Decode, Encode};
use chrono::{DateTime, TimeZone, Utc};

/// Values below this are block heights; at or above it, Unix timestamps.
pub const LOCK_TIME_THRESHOLD: u32 = 500_000_000;

#[derive(Copy, Clone, Debug, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum LockTime {
    Height(block::Height),
    Time(DateTime<Utc>),
}

impl LockTime {
    pub fn zero() -> LockTime {
        LockTime::Height(block::Height(0))
    }

    pub fn raw_value(self) -> u32 {
        match self {
            LockTime::Height(height) => height.0,
            LockTime::Time(time) => time.timestamp() as u32,
        }
    }

    /// Whether a transaction carrying this locktime (and these inputs) has
    /// matured, per the reference finality rule: a zero locktime, or any
    /// input with a non-final sequence number absent, makes the check moot —
    /// otherwise the locktime is compared against the supplied chain tip
    /// height or block time depending on [`LOCK_TIME_THRESHOLD`].
    pub fn is_final(self, tip_height: block::Height, tip_time: DateTime<Utc>, all_inputs_final: bool) -> bool {
        if all_inputs_final {
            return true;
        }
        if self.raw_value() == 0 {
            return true;
        }
        match self {
            LockTime::Height(height) => height.0 < tip_height.0,
            LockTime::Time(time) => time < tip_time,
        }
    }
}

impl From<u32> for LockTime {
    fn from(raw: u32) -> LockTime {
        if raw < LOCK_TIME_THRESHOLD {
            LockTime::Height(block::Height(raw))
        } else {
            LockTime::Time(Utc.timestamp(raw as i64, 0))
        }
    }
}

impl Encode for LockTime {
    fn encode<W: std::io::Write>(&self, target: W) -> std::io::Result<()> {
        self.raw_value().encode(target)
    }
}
impl Decode for LockTime {
    fn decode<R: std::io::Read>(target: R) -> Result<Self, CodecError> {
        Ok(LockTime::from(u32::decode(target)?))
    }
}

#[cfg(any(test, feature = "proptest-impl"))]
impl proptest::prelude::Arbitrary for LockTime {
    type Parameters = ();
    type Strategy = proptest::strategy::BoxedStrategy<Self>;

    fn arbitrary_with(_args: ()) -> Self::Strategy {
        use proptest::prelude::*;
        prop_oneof![
            (0u32..LOCK_TIME_THRESHOLD).prop_map(|n| LockTime::Height(block::Height(n))),
            (LOCK_TIME_THRESHOLD..=u32::MAX).prop_map(LockTime::from),
        ]
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn below_threshold_is_a_height() {
        let lt = LockTime::from(500_000);
        assert!(matches!(lt, LockTime::Height(block::Height(500_000))));
    }

    #[test]
    fn at_threshold_is_a_timestamp() {
        let lt = LockTime::from(LOCK_TIME_THRESHOLD);
        assert!(matches!(lt, LockTime::Time(_)));
    }

    #[test]
    fn zero_locktime_is_always_final() {
        let lt = LockTime::zero();
        let tip_time = Utc.timestamp(0, 0);
        assert!(lt.is_final(block::Height(0), tip_time, false));
    }

    #[test]
    fn final_sequence_numbers_short_circuit() {
        let lt = LockTime::from(999_999);
        let tip_time = Utc.timestamp(0, 0);
        assert!(lt.is_final(block::Height(0), tip_time, true));
        assert!(!lt.is_final(block::Height(0), tip_time, false));
    }
}
