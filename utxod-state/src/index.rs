//! The key-value index: prefix-typed keys over a single `sled` tree.

use std::collections::HashSet;

use utxod_chain::block::Hash as BlockHash;
use utxod_chain::hash::Hash160;
use utxod_chain::transaction::Hash as TxHash;
use utxod_chain::transparent::Coin;
use utxod_chain::work::ChainWork;
use utxod_chain::{Decode, Encode};

use crate::error::StateError;
use crate::tx_index::TxIndex;

/// One block's persisted metadata, the disk-backed twin of
/// `utxod_chain::block_index::BlockNode` (that type lives in memory, keyed
/// by arena index; this one lives on disk, keyed by hash).
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StoredBlockIndex {
    pub header: utxod_chain::block::Header,
    pub height: utxod_chain::block::Height,
    pub chain_work: ChainWork,
    pub file_no: u32,
    pub offset: u64,
    pub parent: Option<BlockHash>,
    pub next_in_main_chain: Option<BlockHash>,
}

impl Encode for StoredBlockIndex {
    fn encode<W: std::io::Write>(&self, mut target: W) -> std::io::Result<()> {
        self.header.encode(&mut target)?;
        self.height.encode(&mut target)?;
        self.chain_work.0.encode(&mut target)?;
        self.file_no.encode(&mut target)?;
        self.offset.encode(&mut target)?;
        encode_optional_hash(self.parent, &mut target)?;
        encode_optional_hash(self.next_in_main_chain, &mut target)
    }
}
impl Decode for StoredBlockIndex {
    fn decode<R: std::io::Read>(mut target: R) -> Result<Self, utxod_chain::CodecError> {
        Ok(StoredBlockIndex {
            header: utxod_chain::block::Header::decode(&mut target)?,
            height: utxod_chain::block::Height::decode(&mut target)?,
            chain_work: ChainWork(primitive_types::U256::decode(&mut target)?),
            file_no: u32::decode(&mut target)?,
            offset: u64::decode(&mut target)?,
            parent: decode_optional_hash(&mut target)?,
            next_in_main_chain: decode_optional_hash(&mut target)?,
        })
    }
}

fn encode_optional_hash<W: std::io::Write>(hash: Option<BlockHash>, mut target: W) -> std::io::Result<()> {
    match hash {
        Some(h) => {
            true.encode(&mut target)?;
            h.0.encode(&mut target)
        }
        None => false.encode(&mut target),
    }
}
fn decode_optional_hash<R: std::io::Read>(mut target: R) -> Result<Option<BlockHash>, utxod_chain::CodecError> {
    Ok(if bool::decode(&mut target)? { Some(BlockHash(<[u8; 32]>::decode(&mut target)?)) } else { None })
}

const BEST_KEY: &[u8] = b"best";
const INVALID_WORK_KEY: &[u8] = b"invalid-work";

fn tx_key(hash: &TxHash) -> Vec<u8> {
    [b"tx".as_slice(), &hash.0 .0].concat()
}
fn blockindex_key(hash: &BlockHash) -> Vec<u8> {
    [b"blockindex".as_slice(), &hash.0].concat()
}
fn debit_key(addr: &Hash160) -> Vec<u8> {
    [b"dr".as_slice(), &addr.0].concat()
}
fn credit_key(addr: &Hash160) -> Vec<u8> {
    [b"cr".as_slice(), &addr.0].concat()
}

/// The embedded key-value store backing the block index, the per-tx spent
/// vectors, and the address-indexed debit/credit coin sets.
pub struct Index {
    db: sled::Db,
}

impl Index {
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Index, StateError> {
        Ok(Index { db: sled::open(path)? })
    }

    pub fn get_tx_index(&self, hash: &TxHash) -> Result<Option<TxIndex>, StateError> {
        get_decoded(&self.db, &tx_key(hash))
    }

    pub fn get_block_index(&self, hash: &BlockHash) -> Result<Option<StoredBlockIndex>, StateError> {
        get_decoded(&self.db, &blockindex_key(hash))
    }

    pub fn put_block_index(&self, hash: &BlockHash, index: &StoredBlockIndex) -> Result<(), StateError> {
        self.db.insert(blockindex_key(hash), index.encode_to_vec()?)?;
        Ok(())
    }

    /// Every stored block-index record, in no particular order. Used once at
    /// startup to rebuild the in-memory block metadata graph.
    pub fn block_indexes(&self) -> Result<Vec<(BlockHash, StoredBlockIndex)>, StateError> {
        let mut indexes = Vec::new();
        for entry in self.db.scan_prefix(b"blockindex") {
            let (key, value) = entry?;
            let mut raw = [0u8; 32];
            raw.copy_from_slice(&key[b"blockindex".len()..]);
            indexes.push((BlockHash(raw), StoredBlockIndex::decode(&value[..])?));
        }
        Ok(indexes)
    }

    pub fn best_tip(&self) -> Result<Option<BlockHash>, StateError> {
        Ok(self.db.get(BEST_KEY)?.map(|bytes| {
            let mut raw = [0u8; 32];
            raw.copy_from_slice(&bytes);
            BlockHash(raw)
        }))
    }

    pub fn set_best_tip(&self, hash: &BlockHash) -> Result<(), StateError> {
        self.db.insert(BEST_KEY, hash.0.to_vec())?;
        Ok(())
    }

    pub fn best_invalid_work(&self) -> Result<ChainWork, StateError> {
        Ok(match self.db.get(INVALID_WORK_KEY)? {
            Some(bytes) => ChainWork(primitive_types::U256::decode(&bytes[..])?),
            None => ChainWork::default(),
        })
    }

    pub fn set_best_invalid_work(&self, work: ChainWork) -> Result<(), StateError> {
        self.db.insert(INVALID_WORK_KEY, work.0.encode_to_vec()?)?;
        Ok(())
    }

    pub fn debit_set(&self, addr: &Hash160) -> Result<HashSet<Coin>, StateError> {
        get_coin_set(&self.db, &debit_key(addr))
    }

    pub fn credit_set(&self, addr: &Hash160) -> Result<HashSet<Coin>, StateError> {
        get_coin_set(&self.db, &credit_key(addr))
    }

    /// Applies a batch of index mutations atomically: a block connect,
    /// disconnect, or whole reorganization is one call, and `sled::Batch`
    /// guarantees all-or-nothing application of every key touched.
    ///
    /// Address coin sets are read-modify-write records, so ops touching
    /// them accumulate in a side map first — two ops against the same
    /// address within one batch must see each other's effect, which the
    /// raw batch (last-write-wins per key) would not provide.
    pub fn apply(&self, ops: Vec<IndexOp>) -> Result<(), StateError> {
        let mut batch = sled::Batch::default();
        let mut coin_sets: std::collections::HashMap<Vec<u8>, HashSet<Coin>> = std::collections::HashMap::new();
        for op in ops {
            match op {
                IndexOp::PutTx(hash, index) => batch.insert(tx_key(&hash), index.encode_to_vec()?),
                IndexOp::DeleteTx(hash) => batch.remove(tx_key(&hash)),
                IndexOp::PutBlockIndex(hash, index) => batch.insert(blockindex_key(&hash), index.encode_to_vec()?),
                IndexOp::AddDebit(addr, coin) => {
                    staged_coin_set(&self.db, &mut coin_sets, debit_key(&addr))?.insert(coin);
                }
                IndexOp::RemoveDebit(addr, coin) => {
                    staged_coin_set(&self.db, &mut coin_sets, debit_key(&addr))?.remove(&coin);
                }
                IndexOp::AddCredit(addr, coin) => {
                    staged_coin_set(&self.db, &mut coin_sets, credit_key(&addr))?.insert(coin);
                }
                IndexOp::RemoveCredit(addr, coin) => {
                    staged_coin_set(&self.db, &mut coin_sets, credit_key(&addr))?.remove(&coin);
                }
                IndexOp::SetBestTip(hash) => batch.insert(BEST_KEY, hash.0.to_vec()),
            }
        }
        for (key, set) in coin_sets {
            if set.is_empty() {
                batch.remove(key);
            } else {
                batch.insert(key, encode_coin_set(&set)?);
            }
        }
        self.db.apply_batch(batch)?;
        Ok(())
    }
}

/// A single mutation to enqueue into an [`Index::apply`] call. Grouping a
/// connect/disconnect/reorg's writes into a `Vec<IndexOp>` and applying them
/// in one call is what gives the block store its atomicity guarantee.
pub enum IndexOp {
    PutTx(TxHash, TxIndex),
    DeleteTx(TxHash),
    PutBlockIndex(BlockHash, StoredBlockIndex),
    AddDebit(Hash160, Coin),
    RemoveDebit(Hash160, Coin),
    AddCredit(Hash160, Coin),
    RemoveCredit(Hash160, Coin),
    SetBestTip(BlockHash),
}

fn get_decoded<T: Decode>(db: &sled::Db, key: &[u8]) -> Result<Option<T>, StateError> {
    Ok(match db.get(key)? {
        Some(bytes) => Some(T::decode(&bytes[..])?),
        None => None,
    })
}

fn staged_coin_set<'a>(
    db: &sled::Db,
    sets: &'a mut std::collections::HashMap<Vec<u8>, HashSet<Coin>>,
    key: Vec<u8>,
) -> Result<&'a mut HashSet<Coin>, StateError> {
    if !sets.contains_key(&key) {
        let loaded = get_coin_set(db, &key)?;
        sets.insert(key.clone(), loaded);
    }
    Ok(sets.get_mut(&key).expect("just inserted"))
}

fn get_coin_set(db: &sled::Db, key: &[u8]) -> Result<HashSet<Coin>, StateError> {
    Ok(match db.get(key)? {
        Some(bytes) => Vec::<Coin>::decode(&bytes[..])?.into_iter().collect(),
        None => HashSet::new(),
    })
}

fn encode_coin_set(set: &HashSet<Coin>) -> Result<Vec<u8>, StateError> {
    let coins: Vec<Coin> = set.iter().copied().collect();
    Ok(coins.encode_to_vec()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use utxod_chain::hash::Hash256;

    fn index() -> Index {
        let dir = tempdir::TempDir::new("utxod-index").unwrap();
        Index::open(dir.path()).unwrap()
    }

    #[test]
    fn best_tip_round_trips() {
        let index = index();
        assert_eq!(index.best_tip().unwrap(), None);
        let hash = BlockHash([7u8; 32]);
        index.set_best_tip(&hash).unwrap();
        assert_eq!(index.best_tip().unwrap(), Some(hash));
    }

    #[test]
    fn debit_set_accumulates_across_applied_batches() {
        let index = index();
        let addr = Hash160([1u8; 20]);
        let coin = Coin { tx_hash: TxHash(Hash256::of(b"x")), index: 0 };
        index.apply(vec![IndexOp::AddDebit(addr, coin)]).unwrap();
        assert!(index.debit_set(&addr).unwrap().contains(&coin));
        index.apply(vec![IndexOp::RemoveDebit(addr, coin)]).unwrap();
        assert!(!index.debit_set(&addr).unwrap().contains(&coin));
    }

    #[test]
    fn tx_index_round_trips_through_apply() {
        let index = index();
        let hash = TxHash(Hash256::of(b"tx"));
        let tx_index = TxIndex::new(crate::blockfile::DiskTxPos { file_no: 0, block_offset: 0, tx_offset: 0 }, 1);
        index.apply(vec![IndexOp::PutTx(hash, tx_index.clone())]).unwrap();
        assert_eq!(index.get_tx_index(&hash).unwrap(), Some(tx_index));
    }
}
