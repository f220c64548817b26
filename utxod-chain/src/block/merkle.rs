//! The transaction Merkle tree: binds a block's transaction set to a
//! single 32-byte root carried in the block header.

use std::{fmt, io};

use crate::serialization::{sha256d, CodecError, Decode, Encode};
use utxod_wire_derive::Encode as WireEncode;

#[cfg(any(test, feature = "proptest-impl"))]
use proptest_derive::Arbitrary;

/// The root of a block's transaction Merkle tree.
#[derive(Copy, Clone, Eq, PartialEq, Hash, serde::Serialize, serde::Deserialize, WireEncode)]
#[cfg_attr(any(test, feature = "proptest-impl"), derive(Arbitrary))]
pub struct Root(pub [u8; 32]);

impl fmt::Debug for Root {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut reversed = self.0;
        reversed.reverse();
        f.debug_tuple("merkle::Root").field(&hex::encode(reversed)).finish()
    }
}

impl Decode for Root {
    fn decode<R: io::Read>(target: R) -> Result<Self, CodecError> {
        Ok(Root(<[u8; 32]>::decode(target)?))
    }
}

/// Combines two child hashes into their parent: `sha256d(left || right)`.
fn combine(left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
    let mut pair = [0u8; 64];
    pair[..32].copy_from_slice(left);
    pair[32..].copy_from_slice(right);
    sha256d::hash(&pair)
}

/// Builds the Merkle root over a transaction hash list. An odd row duplicates
/// its last element before combining, matching the reference algorithm — and
/// its well-known CVE-2012-2459 quirk, which this type intentionally
/// reproduces rather than silently "fixing" the wire format.
pub fn root<I: IntoIterator<Item = [u8; 32]>>(hashes: I) -> Root {
    let mut level: Vec<[u8; 32]> = hashes.into_iter().collect();
    if level.is_empty() {
        return Root([0u8; 32]);
    }
    while level.len() > 1 {
        if level.len() % 2 == 1 {
            level.push(*level.last().unwrap());
        }
        level = level.chunks_exact(2).map(|pair| combine(&pair[0], &pair[1])).collect();
    }
    Root(level[0])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_transaction_root_is_its_own_hash() {
        let hash = sha256d::hash(b"only tx");
        assert_eq!(root(vec![hash]).0, hash);
    }

    #[test]
    fn odd_count_duplicates_the_last_hash() {
        let a = sha256d::hash(b"a");
        let b = sha256d::hash(b"b");
        let c = sha256d::hash(b"c");
        let with_explicit_duplicate = root(vec![a, b, c, c]);
        let with_implicit_duplicate = root(vec![a, b, c]);
        assert_eq!(with_explicit_duplicate.0, with_implicit_duplicate.0);
    }

    #[test]
    fn empty_transaction_list_is_the_zero_root() {
        assert_eq!(root(Vec::<[u8; 32]>::new()).0, [0u8; 32]);
    }
}
