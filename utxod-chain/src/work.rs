//! Proof-of-work target/difficulty encoding and chain work accumulation.

use crate::serialization::{CodecError, Decode, Encode};
use primitive_types::U256;

/// The "nBits" compact encoding of a 256-bit target: a byte exponent and a
/// 3-byte mantissa, exactly as it appears on the wire in a block header.
#[derive(Copy, Clone, Debug, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
#[cfg_attr(any(test, feature = "proptest-impl"), derive(proptest_derive::Arbitrary))]
pub struct CompactDifficulty(pub u32);

/// The network-wide floor on difficulty: no target may be easier than this.
pub const POW_LIMIT: U256 = U256([0xFFFF_FFFF_FFFF_FFFFu64, 0xFFFF_FFFF_FFFF_FFFFu64, 0xFFFF_FFFF_FFFF_FFFFu64, 0x0000_0000_7FFF_FFFFu64]);

impl Encode for U256 {
    fn encode<W: std::io::Write>(&self, mut target: W) -> std::io::Result<()> {
        let mut bytes = [0u8; 32];
        self.to_little_endian(&mut bytes);
        bytes.encode(&mut target)
    }
}
impl Decode for U256 {
    fn decode<R: std::io::Read>(target: R) -> Result<Self, CodecError> {
        let bytes = <[u8; 32]>::decode(target)?;
        Ok(U256::from_little_endian(&bytes))
    }
}

impl CompactDifficulty {
    pub fn to_target(self) -> U256 {
        let bits = self.0;
        let exponent = (bits >> 24) as u32;
        let mantissa = bits & 0x007F_FFFF;
        let target = if exponent <= 3 {
            U256::from(mantissa) >> (8 * (3 - exponent))
        } else {
            U256::from(mantissa) << (8 * (exponent - 3))
        };
        if target > POW_LIMIT {
            POW_LIMIT
        } else {
            target
        }
    }

    pub fn from_target(mut target: U256) -> CompactDifficulty {
        if target > POW_LIMIT {
            target = POW_LIMIT;
        }
        let mut size = (target.bits() + 7) / 8;
        let mut compact = if size <= 3 {
            (target.low_u64() as u32) << (8 * (3 - size))
        } else {
            let shifted = target >> (8 * (size - 3));
            shifted.low_u32()
        };
        // If the sign bit (0x00800000) would be set, the encoding reads as
        // negative; shift one more byte right and bump size, matching the
        // reference nBits convention.
        if compact & 0x0080_0000 != 0 {
            compact >>= 8;
            size += 1;
        }
        CompactDifficulty(compact | ((size as u32) << 24))
    }

    /// The amount of work represented by a block with this target:
    /// `2^256 / (target + 1)`.
    pub fn work(self) -> ChainWork {
        let target = self.to_target();
        if target.is_zero() {
            return ChainWork(U256::zero());
        }
        let divisor = target + U256::one();
        // (!target / divisor) + 1 == floor(2^256 / divisor) computed without
        // requiring a 257-bit numerator.
        let work = (!divisor / divisor) + U256::one();
        ChainWork(work)
    }
}

impl Encode for CompactDifficulty {
    fn encode<W: std::io::Write>(&self, target: W) -> std::io::Result<()> {
        self.0.encode(target)
    }
}
impl Decode for CompactDifficulty {
    fn decode<R: std::io::Read>(target: R) -> Result<Self, CodecError> {
        Ok(CompactDifficulty(u32::decode(target)?))
    }
}

/// Cumulative chain work: the sum of `work(bits)` over a chain's ancestors.
/// The main chain is the one with the greatest `ChainWork` among validated
/// chains.
#[derive(Copy, Clone, Debug, Eq, PartialEq, PartialOrd, Ord, Default)]
pub struct ChainWork(pub U256);

impl std::ops::Add for ChainWork {
    type Output = ChainWork;
    fn add(self, rhs: ChainWork) -> ChainWork {
        ChainWork(self.0 + rhs.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn genesis_difficulty_has_expected_work() {
        // 0x1d00ffff is the mainnet genesis difficulty_threshold.
        let bits = CompactDifficulty(0x1d00ffff);
        let work = bits.work();
        // floor(2^256 / (target + 1)) for the genesis target, 0x100010001.
        assert_eq!(work.0, U256::from(4_295_032_833u64));
    }

    #[test]
    fn compact_round_trips_through_target() {
        let bits = CompactDifficulty(0x1d00ffff);
        let target = bits.to_target();
        let back = CompactDifficulty::from_target(target);
        assert_eq!(back.to_target(), target);
    }
}
