//! Inventory items: typed hashes advertising or requesting data.

use std::io::{Read, Write};

use utxod_chain::serialization::{CodecError, Decode, Encode};
use utxod_chain::{block, transaction};

/// An advertised or requested object. The wire form is a 4-byte type code
/// followed by a 32-byte hash.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Inventory {
    /// "Any data of this number may be ignored."
    Error,
    Tx(transaction::Hash),
    Block(block::Hash),
}

impl From<transaction::Hash> for Inventory {
    fn from(hash: transaction::Hash) -> Inventory {
        Inventory::Tx(hash)
    }
}

impl From<block::Hash> for Inventory {
    fn from(hash: block::Hash) -> Inventory {
        Inventory::Block(hash)
    }
}

impl Encode for Inventory {
    fn encode<W: Write>(&self, mut target: W) -> std::io::Result<()> {
        let (code, bytes): (u32, [u8; 32]) = match *self {
            Inventory::Error => (0, [0; 32]),
            Inventory::Tx(hash) => (1, hash.0 .0),
            Inventory::Block(hash) => (2, hash.0),
        };
        code.encode(&mut target)?;
        bytes.encode(&mut target)
    }
}

impl Decode for Inventory {
    fn decode<R: Read>(mut target: R) -> Result<Self, CodecError> {
        let code = u32::decode(&mut target)?;
        let bytes = <[u8; 32]>::decode(&mut target)?;
        match code {
            0 => Ok(Inventory::Error),
            1 => Ok(Inventory::Tx(transaction::Hash(utxod_chain::hash::Hash256(bytes)))),
            2 => Ok(Inventory::Block(block::Hash(bytes))),
            _ => Err(CodecError::Parse("invalid inventory type code")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use utxod_chain::hash::Hash256;
    use utxod_chain::serialization::DecodeInto;

    #[test]
    fn inventory_round_trips() {
        let inv = Inventory::Tx(transaction::Hash(Hash256::of(b"tx")));
        let bytes = inv.encode_to_vec().unwrap();
        assert_eq!(bytes.len(), 36);
        assert_eq!(bytes.decode_into::<Inventory>().unwrap(), inv);
    }

    #[test]
    fn unknown_type_code_is_rejected() {
        let mut bytes = 9u32.encode_to_vec().unwrap();
        bytes.extend_from_slice(&[0u8; 32]);
        assert!(bytes.decode_into::<Inventory>().is_err());
    }
}
