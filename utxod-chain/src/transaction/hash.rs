//! Transaction identifiers (txids).

use std::{fmt, io, str::FromStr};

use crate::serialization::{sha256d, CodecError, Decode, Encode};
use utxod_wire_derive::Encode as WireEncode;

#[cfg(any(test, feature = "proptest-impl"))]
use proptest_derive::Arbitrary;

use super::Transaction;

/// The double-SHA256 hash of a transaction's consensus-critical fields.
#[derive(Copy, Clone, Eq, PartialEq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize, WireEncode)]
#[cfg_attr(any(test, feature = "proptest-impl"), derive(Arbitrary))]
pub struct Hash(pub crate::hash::Hash256);

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_tuple("transaction::Hash").field(&self.0).finish()
    }
}

impl Decode for Hash {
    fn decode<R: io::Read>(target: R) -> Result<Self, CodecError> {
        Ok(Hash(crate::hash::Hash256::decode(target)?))
    }
}

impl<'a> From<&'a Transaction> for Hash {
    fn from(tx: &'a Transaction) -> Self {
        let mut hash_writer = sha256d::Writer::default();
        tx.encode(&mut hash_writer).expect("hash writer is infallible");
        Hash(crate::hash::Hash256(hash_writer.finish()))
    }
}

impl std::str::FromStr for Hash {
    type Err = CodecError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Hash(crate::hash::Hash256::from_str(s)?))
    }
}
