use std::{fmt, io, str::FromStr};

use crate::serialization::{sha256d, CodecError, Decode, Encode};
use utxod_wire_derive::Encode as WireEncode;

#[cfg(any(test, feature = "proptest-impl"))]
use proptest_derive::Arbitrary;

use super::Header;

/// A block identifier: the double-SHA256 hash of the block's `Header`.
/// Because the header embeds the transaction Merkle root, this single hash
/// binds the entire block.
#[derive(Copy, Clone, Eq, PartialEq, Hash, serde::Serialize, serde::Deserialize, WireEncode)]
#[cfg_attr(any(test, feature = "proptest-impl"), derive(Arbitrary))]
pub struct Hash(pub [u8; 32]);

impl Hash {
    pub fn from_bytes_exact(bytes: [u8; 32]) -> Hash {
        Hash(bytes)
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut reversed = self.0;
        reversed.reverse();
        f.write_str(&hex::encode(reversed))
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut reversed = self.0;
        reversed.reverse();
        f.debug_tuple("block::Hash").field(&hex::encode(reversed)).finish()
    }
}

impl Decode for Hash {
    fn decode<R: io::Read>(target: R) -> Result<Self, CodecError> {
        Ok(Hash(<[u8; 32]>::decode(target)?))
    }
}

impl<'a> From<&'a Header> for Hash {
    fn from(header: &'a Header) -> Self {
        let mut hash_writer = sha256d::Writer::default();
        header.encode(&mut hash_writer).expect("hash writer is infallible");
        Hash(hash_writer.finish())
    }
}

impl FromStr for Hash {
    type Err = CodecError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes).map_err(|_| CodecError::Parse("invalid hex hash"))?;
        bytes.reverse();
        Ok(Hash(bytes))
    }
}
