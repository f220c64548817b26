//! The two hash primitives used throughout the protocol: a 256-bit
//! hash for block/transaction identity and the Merkle tree, and a 160-bit
//! hash for addresses derived from public keys.
//!
//! Both are stored little-endian (the wire/disk byte order) but *displayed*
//! big-endian/reversed, following the convention set by the reference
//! implementation this protocol descends from — copy-pasting a hash from a
//! block explorer and comparing it to `format!("{}", hash)` should just work.

use crate::serialization::{sha256d, CodecError, Decode, Encode};
use ripemd160::Ripemd160;
use sha2::{Digest, Sha256};
use std::fmt;
use std::io::{Read, Write};

#[cfg(any(test, feature = "proptest-impl"))]
use proptest_derive::Arbitrary;

/// A double-SHA256 digest.
#[derive(Copy, Clone, Eq, PartialEq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
#[cfg_attr(any(test, feature = "proptest-impl"), derive(Arbitrary))]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    pub fn of(bytes: &[u8]) -> Hash256 {
        Hash256(sha256d::hash(bytes))
    }

    pub fn zero() -> Hash256 {
        Hash256([0u8; 32])
    }
}

impl Encode for Hash256 {
    fn encode<W: Write>(&self, target: W) -> std::io::Result<()> {
        self.0.encode(target)
    }
}
impl Decode for Hash256 {
    fn decode<R: Read>(target: R) -> Result<Self, CodecError> {
        Ok(Hash256(<[u8; 32]>::decode(target)?))
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut reversed = self.0;
        reversed.reverse();
        f.write_str(&hex::encode(reversed))
    }
}
impl fmt::Debug for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash256({})", self)
    }
}

impl std::str::FromStr for Hash256 {
    type Err = CodecError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes).map_err(|_| CodecError::Parse("invalid hex hash"))?;
        bytes.reverse();
        Ok(Hash256(bytes))
    }
}

/// A RIPEMD160(SHA256(x)) digest, used for pay-to-pubkey-hash addresses.
#[derive(Copy, Clone, Eq, PartialEq, Hash, serde::Serialize, serde::Deserialize)]
#[cfg_attr(any(test, feature = "proptest-impl"), derive(Arbitrary))]
pub struct Hash160(pub [u8; 20]);

impl Hash160 {
    pub fn of(bytes: &[u8]) -> Hash160 {
        let sha = Sha256::digest(bytes);
        let ripemd = Ripemd160::digest(&sha);
        let mut out = [0u8; 20];
        out.copy_from_slice(&ripemd);
        Hash160(out)
    }
}

impl Encode for Hash160 {
    fn encode<W: Write>(&self, target: W) -> std::io::Result<()> {
        self.0.encode(target)
    }
}
impl Decode for Hash160 {
    fn decode<R: Read>(target: R) -> Result<Self, CodecError> {
        Ok(Hash160(<[u8; 20]>::decode(target)?))
    }
}

impl fmt::Display for Hash160 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}
impl fmt::Debug for Hash160 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash160({})", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_byte_reversed() {
        let mut bytes = [0u8; 32];
        bytes[0] = 0xAB;
        bytes[31] = 0x01;
        let hash = Hash256(bytes);
        assert!(hash.to_string().starts_with("01"));
        assert!(hash.to_string().ends_with("ab"));
    }

    #[test]
    fn from_str_round_trips_display() {
        let hash = Hash256::of(b"genesis");
        let text = hash.to_string();
        let parsed: Hash256 = text.parse().unwrap();
        assert_eq!(hash, parsed);
    }
}
