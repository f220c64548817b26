//! The block store: an append-only block file plus a key-value index
//! over transaction positions, block metadata, and address credit/debit
//! sets. Callers treat [`Store`] as the single point of contact; the split
//! between [`blockfile`] and [`index`] mirrors how a reorg needs both a new
//! best-tip pointer and (sometimes) new block-file records committed
//! together.

pub mod blockfile;
pub mod error;
pub mod index;
pub mod tx_index;

use std::path::Path;

use utxod_chain::block::{Block, Hash as BlockHash};

pub use blockfile::{BlockFile, BlockPosition, DiskTxPos};
pub use error::StateError;
pub use index::{Index, IndexOp, StoredBlockIndex};
pub use tx_index::TxIndex;

/// A data directory's block file plus its key-value index, opened together
/// since every block acceptance touches both.
pub struct Store {
    pub blocks: BlockFile,
    pub index: Index,
}

impl Store {
    /// Opens (or initializes) a store rooted at `dir`, laying out the block
    /// files directly under it and the sled index under `dir/index`.
    pub fn open(dir: impl AsRef<Path>) -> Result<Store, StateError> {
        let dir = dir.as_ref();
        let blocks = BlockFile::open(dir)?;
        let index = Index::open(dir.join("index"))?;
        Ok(Store { blocks, index })
    }

    /// Appends `block` to the block file and records its position and
    /// metadata in the index in one call, leaving the caller to decide
    /// whether this makes the block the new best tip.
    pub fn store_block(&mut self, block: &Block, stored: StoredBlockIndex) -> Result<BlockHash, StateError> {
        let hash = block.hash();
        self.blocks.append(block)?;
        self.index.put_block_index(&hash, &stored)?;
        Ok(hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use utxod_chain::parameters::Network;
    use utxod_chain::work::ChainWork;

    #[test]
    fn stores_and_recovers_a_block_and_its_metadata() {
        let dir = tempdir::TempDir::new("utxod-store").unwrap();
        let mut store = Store::open(dir.path()).unwrap();
        let genesis = Network::Mainnet.genesis_block();
        let stored = StoredBlockIndex {
            header: genesis.header.clone(),
            height: utxod_chain::block::Height(0),
            chain_work: ChainWork::default(),
            file_no: 0,
            offset: 0,
            parent: None,
            next_in_main_chain: None,
        };
        let hash = store.store_block(&genesis, stored.clone()).unwrap();
        assert_eq!(hash, genesis.hash());
        let back = store.index.get_block_index(&hash).unwrap().unwrap();
        assert_eq!(back, stored);

        store.index.set_best_tip(&hash).unwrap();
        assert_eq!(store.index.best_tip().unwrap(), Some(hash));
    }
}
