//! The `getblocks` request and the block locator it carries.

use std::io::{Read, Write};

use utxod_chain::block;
use utxod_chain::serialization::{CodecError, Decode, Encode};

/// A sparse list of best-chain hashes, newest first, stepping back
/// exponentially. The responder finds the first hash it recognizes on its
/// own best chain and answers with what follows.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Locator(pub Vec<block::Hash>);

impl Encode for Locator {
    fn encode<W: Write>(&self, target: W) -> std::io::Result<()> {
        self.0.encode(target)
    }
}
impl Decode for Locator {
    fn decode<R: Read>(target: R) -> Result<Self, CodecError> {
        Ok(Locator(Vec::decode(target)?))
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct GetBlocks {
    pub locator: Locator,
    /// The last hash being requested. `None` (all zeroes on the wire) asks
    /// for as many as the responder will send.
    pub stop: Option<block::Hash>,
}

impl Encode for GetBlocks {
    fn encode<W: Write>(&self, mut target: W) -> std::io::Result<()> {
        self.locator.encode(&mut target)?;
        match self.stop {
            Some(hash) => hash.0.encode(&mut target),
            None => [0u8; 32].encode(&mut target),
        }
    }
}

impl Decode for GetBlocks {
    fn decode<R: Read>(mut target: R) -> Result<Self, CodecError> {
        let locator = Locator::decode(&mut target)?;
        let raw_stop = <[u8; 32]>::decode(&mut target)?;
        let stop = if raw_stop == [0u8; 32] { None } else { Some(block::Hash(raw_stop)) };
        Ok(GetBlocks { locator, stop })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use utxod_chain::serialization::DecodeInto;

    #[test]
    fn zero_stop_hash_decodes_as_none() {
        let msg = GetBlocks { locator: Locator(vec![block::Hash([1; 32]), block::Hash([2; 32])]), stop: None };
        let bytes = msg.encode_to_vec().unwrap();
        // varint count + two hashes + stop hash
        assert_eq!(bytes.len(), 1 + 64 + 32);
        assert_eq!(bytes.decode_into::<GetBlocks>().unwrap(), msg);
    }

    #[test]
    fn explicit_stop_hash_survives() {
        let msg = GetBlocks { locator: Locator(vec![block::Hash([1; 32])]), stop: Some(block::Hash([9; 32])) };
        let bytes = msg.encode_to_vec().unwrap();
        assert_eq!(bytes.decode_into::<GetBlocks>().unwrap(), msg);
    }
}
