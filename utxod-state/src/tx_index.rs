//! `TxIndex`: the on-disk record locating a confirmed transaction and
//! tracking which of its outputs are still unspent.

use utxod_chain::{CodecError, Decode, Encode};

use crate::blockfile::DiskTxPos;

/// One confirmed transaction's disk position and per-output spent status.
/// `spent[i]` is `None` iff output *i* is unspent — the UTXO set is this
/// field, never a separately maintained set.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TxIndex {
    pub position: DiskTxPos,
    pub spent: Vec<Option<DiskTxPos>>,
}

impl TxIndex {
    pub fn new(position: DiskTxPos, output_count: usize) -> TxIndex {
        TxIndex { position, spent: vec![None; output_count] }
    }

    pub fn is_spent(&self, output_index: usize) -> bool {
        matches!(self.spent.get(output_index), Some(Some(_)))
    }
}

impl Encode for TxIndex {
    fn encode<W: std::io::Write>(&self, mut target: W) -> std::io::Result<()> {
        self.position.encode(&mut target)?;
        // A per-entry presence flag, then the position if present — `Option`
        // has no blanket codec impl in utxod_chain, so this is spelled out.
        utxod_chain::serialization::VarInt::from(self.spent.len()).encode(&mut target)?;
        for entry in self.spent.iter() {
            match entry {
                Some(pos) => {
                    true.encode(&mut target)?;
                    pos.encode(&mut target)?;
                }
                None => false.encode(&mut target)?,
            }
        }
        Ok(())
    }
}

impl Decode for TxIndex {
    fn decode<R: std::io::Read>(mut target: R) -> Result<Self, CodecError> {
        let position = DiskTxPos::decode(&mut target)?;
        let count = utxod_chain::serialization::VarInt::decode(&mut target)?.value();
        let mut spent = Vec::with_capacity(std::cmp::min(count, 1 << 20) as usize);
        for _ in 0..count {
            let present = bool::decode(&mut target)?;
            spent.push(if present { Some(DiskTxPos::decode(&mut target)?) } else { None });
        }
        Ok(TxIndex { position, spent })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_encode_decode() {
        let position = DiskTxPos { file_no: 0, block_offset: 8, tx_offset: 88 };
        let mut index = TxIndex::new(position, 2);
        index.spent[0] = Some(DiskTxPos { file_no: 1, block_offset: 0, tx_offset: 0 });
        let bytes = index.encode_to_vec().unwrap();
        let back = TxIndex::decode(&bytes[..]).unwrap();
        assert_eq!(back, index);
        assert!(back.is_spent(0));
        assert!(!back.is_spent(1));
    }
}
