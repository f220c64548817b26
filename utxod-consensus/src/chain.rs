//! The chain state machine: one writer, holding the block metadata graph,
//! the block store, and the pool of unconfirmed transactions.
//!
//! All paths that change what the node believes funnel through two entry
//! points: [`Chain::accept_block`] and [`Chain::accept_transaction`].
//! Everything else is a read. Callers share a `Chain` behind a lock; the
//! methods themselves never block on anything but storage.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use utxod_chain::amount::MAX_MONEY;
use utxod_chain::block::{self, Block, Header, Height};
use utxod_chain::block_index::{BlockIndexArena, BlockStatus, NodeId, NONE};
use utxod_chain::hash::Hash160;
use utxod_chain::parameters::{subsidy_at, Network, COINBASE_MATURITY};
use utxod_chain::serialization::VarInt;
use utxod_chain::transaction::{Hash as TxHash, Transaction};
use utxod_chain::transparent::{Coin, Input, Output};
use utxod_chain::work::ChainWork;
use utxod_script::sighash;
use utxod_script::template::Template;
use utxod_script::{Verifier, Vm};
use utxod_state::{BlockPosition, DiskTxPos, IndexOp, StateError, Store, StoredBlockIndex, TxIndex};

use crate::block::check as block_check;
use crate::checkpoint;
use crate::error::{BlockError, TransactionError};
use crate::hooks::Observer;
use crate::mempool::{self, Mempool};
use crate::retarget;
use crate::transaction::check as tx_check;

/// The orphan block buffer keeps at most this many parentless blocks.
const MAX_ORPHAN_BLOCKS: usize = 750;

/// How far forward one `getblocks` response walks the best chain.
pub const MAX_BLOCKS_PER_RESPONSE: usize = 500;

/// How far forward one `getheaders` response walks the best chain.
pub const MAX_HEADERS_PER_RESPONSE: usize = 2_000;

/// What became of a block handed to [`Chain::accept_block`].
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum BlockOutcome {
    /// The block extended the best chain, directly or through a
    /// reorganization.
    Connected { hash: block::Hash, height: Height },
    /// Valid and stored, but on a branch with less work than the best tip.
    SideChain { hash: block::Hash },
    /// Parent unknown: buffered. `missing_root` is the earliest ancestor we
    /// know nothing about, the right starting point for a `getblocks`
    /// request to the block's origin.
    Orphan { missing_root: block::Hash },
}

/// What became of a transaction handed to [`Chain::accept_transaction`].
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum TxOutcome {
    /// In the pool. `also_accepted` lists buffered orphans this transaction
    /// unlocked, in acceptance order — all of them want relaying.
    Accepted { also_accepted: Vec<TxHash> },
    /// Buffered until the named parents show up. Not relayed.
    Orphan { missing: Vec<TxHash> },
}

/// A confirmed or pooled transaction located for a caller.
pub struct TxInfo {
    pub tx: Transaction,
    /// `None` while unconfirmed.
    pub height: Option<Height>,
    pub block_time: Option<DateTime<Utc>>,
}

struct OrphanBlocks {
    by_hash: HashMap<block::Hash, Arc<Block>>,
    by_prev: HashMap<block::Hash, Vec<block::Hash>>,
    arrivals: VecDeque<block::Hash>,
}

impl OrphanBlocks {
    fn new() -> OrphanBlocks {
        OrphanBlocks { by_hash: HashMap::new(), by_prev: HashMap::new(), arrivals: VecDeque::new() }
    }

    fn contains(&self, hash: &block::Hash) -> bool {
        self.by_hash.contains_key(hash)
    }

    /// Buffers `block`, evicting the oldest orphan if the buffer is full.
    /// Returns the deepest missing ancestor hash among the orphan's known
    /// forebears.
    fn insert(&mut self, block: Arc<Block>) -> block::Hash {
        if self.by_hash.len() >= MAX_ORPHAN_BLOCKS {
            if let Some(evict) = self.arrivals.pop_front() {
                tracing::warn!(orphan = %evict, "orphan block buffer full, evicting oldest");
                self.remove(&evict);
            }
        }
        let hash = block.hash();
        let prev = block.header.previous_block_hash;
        self.by_hash.insert(hash, block);
        self.by_prev.entry(prev).or_default().push(hash);
        self.arrivals.push_back(hash);
        self.root_of(&hash)
    }

    /// Walks the orphan's ancestry as far as the buffer knows it and
    /// returns the first hash beyond our knowledge.
    fn root_of(&self, hash: &block::Hash) -> block::Hash {
        let mut walk = *hash;
        while let Some(block) = self.by_hash.get(&walk) {
            walk = block.header.previous_block_hash;
        }
        walk
    }

    fn take_children_of(&mut self, parent: &block::Hash) -> Vec<Arc<Block>> {
        let children = self.by_prev.remove(parent).unwrap_or_default();
        let mut ready = Vec::new();
        for child in children {
            if let Some(block) = self.by_hash.remove(&child) {
                self.arrivals.retain(|h| h != &child);
                ready.push(block);
            }
        }
        ready
    }

    fn remove(&mut self, hash: &block::Hash) {
        if let Some(block) = self.by_hash.remove(hash) {
            let prev = block.header.previous_block_hash;
            if let Some(children) = self.by_prev.get_mut(&prev) {
                children.retain(|h| h != hash);
                if children.is_empty() {
                    self.by_prev.remove(&prev);
                }
            }
        }
        self.arrivals.retain(|h| h != hash);
    }
}

/// Uncommitted per-transaction index state accumulated while connecting or
/// disconnecting blocks. Reads fall through to the committed index, so a
/// transaction later in a block can spend an output created earlier in the
/// same block, and a reorganization's connects see its disconnects.
struct Staging<'a> {
    index: &'a utxod_state::Index,
    entries: HashMap<TxHash, TxIndex>,
    erased: HashSet<TxHash>,
    address_ops: Vec<IndexOp>,
}

impl<'a> Staging<'a> {
    fn new(index: &'a utxod_state::Index) -> Staging<'a> {
        Staging { index, entries: HashMap::new(), erased: HashSet::new(), address_ops: Vec::new() }
    }

    fn get(&self, hash: &TxHash) -> Result<Option<TxIndex>, StateError> {
        if self.erased.contains(hash) {
            return Ok(None);
        }
        if let Some(entry) = self.entries.get(hash) {
            return Ok(Some(entry.clone()));
        }
        self.index.get_tx_index(hash)
    }

    fn put(&mut self, hash: TxHash, entry: TxIndex) {
        self.erased.remove(&hash);
        self.entries.insert(hash, entry);
    }

    fn erase(&mut self, hash: TxHash) {
        self.entries.remove(&hash);
        self.erased.insert(hash);
    }

    fn op(&mut self, op: IndexOp) {
        self.address_ops.push(op);
    }

    fn into_ops(self) -> Vec<IndexOp> {
        let mut ops = self.address_ops;
        for hash in self.erased {
            ops.push(IndexOp::DeleteTx(hash));
        }
        for (hash, entry) in self.entries {
            ops.push(IndexOp::PutTx(hash, entry));
        }
        ops
    }
}

pub struct Chain {
    network: Network,
    arena: BlockIndexArena,
    store: Store,
    positions: HashMap<block::Hash, BlockPosition>,
    by_position: HashMap<(u32, u64), block::Hash>,
    mempool: Mempool,
    orphans: OrphanBlocks,
    observers: Vec<Box<dyn Observer>>,
    verifier: Arc<dyn Verifier + Send + Sync>,
    best_invalid_work: ChainWork,
}

impl Chain {
    /// Opens (or initializes) the chain state under `dir`. A fresh data
    /// directory ends up holding exactly the genesis block, with the tip at
    /// height 0.
    pub fn open(network: Network, dir: impl AsRef<Path>, verifier: Arc<dyn Verifier + Send + Sync>) -> Result<Chain, StateError> {
        let mut store = Store::open(dir)?;
        let mut arena = BlockIndexArena::new();
        let mut positions = HashMap::new();
        let mut by_position = HashMap::new();

        let mut stored = store.index.block_indexes()?;
        if stored.is_empty() {
            let genesis = network.genesis_block();
            let hash = genesis.hash();
            let position = store.blocks.append(&genesis)?;
            let record = StoredBlockIndex {
                header: genesis.header,
                height: Height(0),
                chain_work: genesis.header.difficulty_threshold.work(),
                file_no: position.file_no,
                offset: position.offset,
                parent: None,
                next_in_main_chain: None,
            };
            store.index.put_block_index(&hash, &record)?;
            store.index.set_best_tip(&hash)?;
            let id = arena.insert(hash, genesis.header, NONE, BlockStatus::Valid);
            arena.set_tip(id);
            positions.insert(hash, position);
            by_position.insert((position.file_no, position.offset), hash);
            tracing::info!(%hash, "initialized a fresh data directory with the genesis block");
        } else {
            stored.sort_by_key(|(_, record)| record.height.0);
            for (hash, record) in stored {
                let parent = match record.parent {
                    Some(parent_hash) => arena
                        .find(&parent_hash)
                        .ok_or(StateError::Corrupt("block index references an unknown parent"))?,
                    None => NONE,
                };
                arena.insert(hash, record.header, parent, BlockStatus::Valid);
                let position = BlockPosition { file_no: record.file_no, offset: record.offset };
                positions.insert(hash, position);
                by_position.insert((record.file_no, record.offset), hash);
            }
            let tip_hash = store.index.best_tip()?.ok_or(StateError::Corrupt("index has blocks but no best tip"))?;
            let tip = arena.find(&tip_hash).ok_or(StateError::Corrupt("best tip is not in the block index"))?;
            arena.set_tip(tip);
            tracing::info!(height = arena.get(tip).map(|n| n.height.0).unwrap_or(0), "loaded chain state");
        }

        let best_invalid_work = store.index.best_invalid_work()?;
        Ok(Chain {
            network,
            arena,
            store,
            positions,
            by_position,
            mempool: Mempool::new(),
            orphans: OrphanBlocks::new(),
            observers: Vec::new(),
            verifier,
            best_invalid_work,
        })
    }

    pub fn register_observer(&mut self, observer: Box<dyn Observer>) {
        self.observers.push(observer);
    }

    pub fn network(&self) -> Network {
        self.network
    }

    pub fn best_height(&self) -> Height {
        self.arena.get(self.arena.tip()).map(|n| n.height).unwrap_or(Height(0))
    }

    pub fn best_hash(&self) -> block::Hash {
        self.arena
            .get(self.arena.tip())
            .map(|n| n.header.hash())
            .unwrap_or_else(|| self.network.genesis_hash())
    }

    pub fn best_work(&self) -> ChainWork {
        self.arena.tip_work()
    }

    pub fn best_invalid_work(&self) -> ChainWork {
        self.best_invalid_work
    }

    pub fn mempool(&self) -> &Mempool {
        &self.mempool
    }

    // ---- block acceptance ----

    pub fn accept_block(&mut self, block: Arc<Block>) -> Result<BlockOutcome, BlockError> {
        self.accept_block_at(block, Utc::now())
    }

    /// [`Chain::accept_block`] with an injected clock.
    pub fn accept_block_at(&mut self, block: Arc<Block>, now: DateTime<Utc>) -> Result<BlockOutcome, BlockError> {
        let hash = block.hash();
        if self.arena.find(&hash).is_some() || self.orphans.contains(&hash) {
            return Err(BlockError::Duplicate);
        }
        block_check::block_is_valid(&block, now)?;

        let parent = match self.arena.find(&block.header.previous_block_hash) {
            Some(parent) => parent,
            None => {
                tracing::debug!(%hash, "parent unknown, buffering orphan block");
                let missing_root = self.orphans.insert(block);
                return Ok(BlockOutcome::Orphan { missing_root });
            }
        };
        self.contextual_checks(&block, parent, &hash)?;

        let position = self.store.blocks.append(&block)?;
        let node = self.arena.insert(hash, block.header, parent, BlockStatus::Valid);
        let (height, chain_work) = {
            let node_ref = self.arena.get(node).expect("node was just inserted");
            (node_ref.height, node_ref.chain_work)
        };
        let record = StoredBlockIndex {
            header: block.header,
            height,
            chain_work,
            file_no: position.file_no,
            offset: position.offset,
            parent: Some(block.header.previous_block_hash),
            next_in_main_chain: None,
        };
        self.store.index.put_block_index(&hash, &record)?;
        self.positions.insert(hash, position);
        self.by_position.insert((position.file_no, position.offset), hash);

        let outcome = if chain_work > self.arena.tip_work() {
            self.set_best_chain(node, &block, now)?;
            tracing::info!(%hash, height = height.0, "new best block");
            BlockOutcome::Connected { hash, height }
        } else {
            tracing::debug!(%hash, height = height.0, "stored side-chain block");
            BlockOutcome::SideChain { hash }
        };

        // The new block may be the missing parent of buffered orphans;
        // each acceptance below drains that orphan's own children in turn.
        for orphan in self.orphans.take_children_of(&hash) {
            let orphan_hash = orphan.hash();
            if let Err(error) = self.accept_block_at(orphan, now) {
                tracing::debug!(orphan = %orphan_hash, %error, "buffered orphan block was rejected");
            }
        }
        Ok(outcome)
    }

    fn contextual_checks(&self, block: &Block, parent: NodeId, hash: &block::Hash) -> Result<(), BlockError> {
        let parent_node = self.arena.get(parent).expect("caller resolved the parent");
        let height = Height(parent_node.height.0 + 1);

        let required = retarget::next_difficulty(&self.arena, parent);
        if block.header.difficulty_threshold != required {
            return Err(BlockError::BadDifficulty(height));
        }
        if let Some(median) = retarget::median_time_past(&self.arena, parent) {
            if block.header.time <= median {
                return Err(BlockError::TimeBeforeMedian);
            }
        }
        for tx in block.transactions.iter() {
            if !tx.lock_time.is_final(height, block.header.time, tx.all_inputs_final()) {
                return Err(BlockError::NonFinalTransaction(tx.hash()));
            }
        }
        checkpoint::verify(self.network, height, hash).map_err(BlockError::CheckpointMismatch)?;
        Ok(())
    }

    // ---- best-chain selection ----

    fn set_best_chain(&mut self, new_tip: NodeId, new_block: &Arc<Block>, now: DateTime<Utc>) -> Result<(), BlockError> {
        let old_tip = self.arena.tip();
        let new_hash = new_block.hash();

        if old_tip == NONE {
            self.store.index.apply(vec![IndexOp::SetBestTip(new_hash)])?;
            self.arena.set_tip(new_tip);
            return Ok(());
        }

        let parent = self.arena.get(new_tip).map(|n| n.parent).unwrap_or(NONE);
        if parent == old_tip {
            // Fast path: the new block extends the current tip.
            let mut staging = Staging::new(&self.store.index);
            let connect_result = self.connect_block(new_block, new_tip, &mut staging, now);
            let mut ops = match connect_result {
                Ok(()) => staging.into_ops(),
                Err(error) => {
                    drop(staging);
                    self.mark_invalid(new_tip)?;
                    return Err(error);
                }
            };
            ops.extend(self.next_pointer_ops(&[], &[new_tip])?);
            ops.push(IndexOp::SetBestTip(new_hash));
            self.store.index.apply(ops)?;
            self.arena.set_tip(new_tip);
            self.finish_connect(&[(new_tip, new_block.clone())], Vec::new(), now);
            Ok(())
        } else {
            self.reorganize(old_tip, new_tip, now)
        }
    }

    fn reorganize(&mut self, old_tip: NodeId, new_tip: NodeId, now: DateTime<Utc>) -> Result<(), BlockError> {
        let fork = self.arena.fork_point(old_tip, new_tip);
        let new_hash = self.hash_of(new_tip);

        let mut to_disconnect = Vec::new();
        let mut walk = old_tip;
        while walk != fork && walk != NONE {
            to_disconnect.push(walk);
            walk = self.arena.get(walk).map(|n| n.parent).unwrap_or(NONE);
        }
        let mut to_connect = Vec::new();
        let mut walk = new_tip;
        while walk != fork && walk != NONE {
            to_connect.push(walk);
            walk = self.arena.get(walk).map(|n| n.parent).unwrap_or(NONE);
        }
        to_connect.reverse();
        let depth = to_disconnect.len() as u32;
        tracing::info!(depth, connecting = to_connect.len(), "reorganizing onto a higher-work branch");

        let mut disconnect_blocks = Vec::with_capacity(to_disconnect.len());
        for id in to_disconnect.iter() {
            disconnect_blocks.push((*id, Arc::new(self.read_block_of(*id)?)));
        }
        let mut connect_blocks = Vec::with_capacity(to_connect.len());
        for id in to_connect.iter() {
            connect_blocks.push((*id, Arc::new(self.read_block_of(*id)?)));
        }

        let mut staging = Staging::new(&self.store.index);
        let mut failure = None;
        for (_, block) in disconnect_blocks.iter() {
            if let Err(error) = self.disconnect_block(block, &mut staging) {
                failure = Some(error);
                break;
            }
        }
        if failure.is_none() {
            for (id, block) in connect_blocks.iter() {
                if let Err(error) = self.connect_block(block, *id, &mut staging, now) {
                    failure = Some(error);
                    break;
                }
            }
        }
        match failure {
            Some(error) => {
                // Nothing was committed; the old tip stands. Record that
                // this branch looked better but could not be validated.
                drop(staging);
                self.mark_invalid(new_tip)?;
                Err(error)
            }
            None => {
                let mut ops = staging.into_ops();
                ops.extend(self.next_pointer_ops(&to_disconnect, &to_connect)?);
                ops.push(IndexOp::SetBestTip(new_hash));
                self.store.index.apply(ops)?;

                let old_hash = self.hash_of(old_tip);
                self.arena.set_tip(new_tip);

                // Transactions that only existed on the losing branch get a
                // second chance in the pool.
                let connected_hashes: HashSet<TxHash> = connect_blocks
                    .iter()
                    .flat_map(|(_, b)| b.transactions.iter().map(|tx| tx.hash()))
                    .collect();
                let mut resurrect = Vec::new();
                for (_, block) in disconnect_blocks.iter() {
                    for tx in block.transactions.iter().skip(1) {
                        if !connected_hashes.contains(&tx.hash()) {
                            resurrect.push(tx.clone());
                        }
                    }
                }
                for observer in self.observers.iter() {
                    observer.on_reorganize(old_hash, new_hash, depth);
                }
                self.finish_connect(&connect_blocks, resurrect, now);
                Ok(())
            }
        }
    }

    /// Post-commit bookkeeping shared by the fast path and the reorg path:
    /// evict mined and conflicting transactions from the pool, fire hooks,
    /// and retry transactions orphaned by a disconnect.
    fn finish_connect(&mut self, connected: &[(NodeId, Arc<Block>)], resurrect: Vec<Arc<Transaction>>, now: DateTime<Utc>) {
        for (id, block) in connected.iter() {
            for tx in block.transactions.iter() {
                self.mempool.remove(&tx.hash());
                let spent = tx.inputs.iter().filter_map(|input| match input {
                    Input::PrevOut { prev, .. } => Some(*prev),
                    Input::Coinbase { .. } => None,
                });
                for evicted in self.mempool.remove_conflicts(spent) {
                    tracing::debug!(tx = %evicted.hash(), "dropped pooled transaction whose input was mined");
                }
            }
            let height = self.arena.get(*id).map(|n| n.height).unwrap_or(Height(0));
            for observer in self.observers.iter() {
                observer.on_block_connected(block, height);
            }
        }
        for tx in resurrect {
            let hash = tx.hash();
            match self.accept_transaction_at(tx, now) {
                Ok(_) => tracing::debug!(%hash, "returned disconnected transaction to the pool"),
                Err(error) => tracing::debug!(%hash, %error, "disconnected transaction did not re-enter the pool"),
            }
        }
    }

    fn mark_invalid(&mut self, node: NodeId) -> Result<(), BlockError> {
        let work = match self.arena.get_mut(node) {
            Some(entry) => {
                entry.status = BlockStatus::Invalid;
                entry.chain_work
            }
            None => return Ok(()),
        };
        if work > self.best_invalid_work {
            self.best_invalid_work = work;
            self.store.index.set_best_invalid_work(work)?;
            tracing::warn!("a higher-work branch failed validation; best tip unchanged");
        }
        Ok(())
    }

    /// Persisted main-chain linkage: each disconnected node forgets its
    /// child; each connected node becomes its parent's child.
    fn next_pointer_ops(&self, disconnected: &[NodeId], connected: &[NodeId]) -> Result<Vec<IndexOp>, BlockError> {
        let mut ops = Vec::new();
        for id in disconnected.iter() {
            let hash = self.hash_of(*id);
            let mut record = self.stored_index_of(&hash)?;
            record.next_in_main_chain = None;
            ops.push(IndexOp::PutBlockIndex(hash, record));
        }
        for id in connected.iter() {
            let node = match self.arena.get(*id) {
                Some(node) => node,
                None => continue,
            };
            if node.parent == NONE {
                continue;
            }
            let parent_hash = self.hash_of(node.parent);
            let mut record = self.stored_index_of(&parent_hash)?;
            record.next_in_main_chain = Some(node.header.hash());
            ops.push(IndexOp::PutBlockIndex(parent_hash, record));
        }
        Ok(ops)
    }

    // ---- connect / disconnect ----

    fn connect_block(&self, block: &Block, id: NodeId, staging: &mut Staging<'_>, now: DateTime<Utc>) -> Result<(), BlockError> {
        block_check::block_is_valid(block, now)?;
        let hash = block.hash();
        let height = self.arena.get(id).map(|n| n.height).ok_or(StateError::Corrupt("connecting a block with no index entry"))?;
        let position = self
            .positions
            .get(&hash)
            .copied()
            .ok_or(StateError::Corrupt("connecting a block with no recorded position"))?;

        let mut tx_offset = Header::len() + VarInt::size(block.transactions.len());
        let mut total_fees: i64 = 0;

        for tx in block.transactions.iter() {
            let tx_hash = tx.hash();
            let pos = DiskTxPos { file_no: position.file_no, block_offset: position.offset, tx_offset: tx_offset as u32 };
            tx_offset += tx.len();

            if !tx.is_coinbase() {
                let mut value_in: i64 = 0;
                for (input_index, input) in tx.inputs.iter().enumerate() {
                    let (prev, signature_script) = match input {
                        Input::PrevOut { prev, signature_script, .. } => (prev, signature_script),
                        Input::Coinbase { .. } => continue,
                    };
                    let mut prev_entry = staging.get(&prev.tx_hash)?.ok_or(BlockError::MissingOrSpentInput)?;
                    if prev_entry.is_spent(prev.index as usize) {
                        return Err(BlockError::MissingOrSpentInput);
                    }
                    let prev_tx = self.store.blocks.read_tx(prev_entry.position)?;
                    let prev_output = prev_tx.outputs.get(prev.index as usize).ok_or(BlockError::MissingOrSpentInput)?;

                    if prev_tx.is_coinbase() {
                        let prev_height = self.height_of_position(prev_entry.position)?;
                        if height.0.saturating_sub(prev_height.0) < COINBASE_MATURITY {
                            return Err(BlockError::ImmatureCoinbaseSpend);
                        }
                    }

                    let hash_type = sighash::hash_type_of(signature_script);
                    let digest = sighash::compute(tx, input_index, &prev_output.script, hash_type);
                    let mut vm = Vm::new(&digest, self.verifier.as_ref());
                    if !vm.verify_spend(signature_script.as_bytes(), prev_output.script.as_bytes())? {
                        return Err(BlockError::ScriptRejected);
                    }

                    value_in = value_in.checked_add(prev_output.value.value()).ok_or(BlockError::ValueOutOfRange)?;
                    prev_entry.spent[prev.index as usize] = Some(pos);
                    staging.put(prev.tx_hash, prev_entry);
                    if let Some(addr) = Template::match_script(&prev_output.script).address_hash() {
                        staging.op(IndexOp::AddCredit(addr, Coin { tx_hash, index: input_index as u32 }));
                    }
                }
                let value_out: i64 = tx.outputs.iter().map(|o| o.value.value()).sum();
                let fee = value_in - value_out;
                if fee < 0 || fee > MAX_MONEY {
                    return Err(BlockError::ValueOutOfRange);
                }
                total_fees = total_fees.checked_add(fee).ok_or(BlockError::ValueOutOfRange)?;
            }

            for (index, output) in tx.outputs.iter().enumerate() {
                if let Some(addr) = Template::match_script(&output.script).address_hash() {
                    staging.op(IndexOp::AddDebit(addr, Coin { tx_hash, index: index as u32 }));
                }
            }
            staging.put(tx_hash, TxIndex::new(pos, tx.outputs.len()));
        }

        let coinbase_out: i64 = block.transactions[0].outputs.iter().map(|o| o.value.value()).sum();
        let allowed = subsidy_at(height).value() + total_fees;
        if coinbase_out > allowed {
            return Err(BlockError::BadCoinbaseValue { claimed: coinbase_out, allowed });
        }
        Ok(())
    }

    fn disconnect_block(&self, block: &Block, staging: &mut Staging<'_>) -> Result<(), BlockError> {
        for tx in block.transactions.iter().rev() {
            let tx_hash = tx.hash();
            for (input_index, input) in tx.inputs.iter().enumerate() {
                let prev = match input {
                    Input::PrevOut { prev, .. } => prev,
                    Input::Coinbase { .. } => continue,
                };
                if let Some(mut prev_entry) = staging.get(&prev.tx_hash)? {
                    if let Some(slot) = prev_entry.spent.get_mut(prev.index as usize) {
                        *slot = None;
                    }
                    let prev_tx = self.store.blocks.read_tx(prev_entry.position)?;
                    staging.put(prev.tx_hash, prev_entry);
                    if let Some(prev_output) = prev_tx.outputs.get(prev.index as usize) {
                        if let Some(addr) = Template::match_script(&prev_output.script).address_hash() {
                            staging.op(IndexOp::RemoveCredit(addr, Coin { tx_hash, index: input_index as u32 }));
                        }
                    }
                }
            }
            for (index, output) in tx.outputs.iter().enumerate() {
                if let Some(addr) = Template::match_script(&output.script).address_hash() {
                    staging.op(IndexOp::RemoveDebit(addr, Coin { tx_hash, index: index as u32 }));
                }
            }
            staging.erase(tx_hash);
        }
        Ok(())
    }

    // ---- transaction acceptance ----

    /// Sequence-based replacement of a pooled conflicting spend. The rule
    /// is carried in the wire format (`sequence` travels with every input)
    /// but is switched off: no replacement is ever allowed.
    fn replacement_allowed(_existing: &Transaction, _candidate: &Transaction) -> bool {
        false
    }

    pub fn accept_transaction(&mut self, tx: Arc<Transaction>) -> Result<TxOutcome, TransactionError> {
        self.accept_transaction_at(tx, Utc::now())
    }

    /// [`Chain::accept_transaction`] with an injected clock.
    pub fn accept_transaction_at(&mut self, tx: Arc<Transaction>, now: DateTime<Utc>) -> Result<TxOutcome, TransactionError> {
        tx_check::is_well_formed(&tx)?;
        if tx.is_coinbase() {
            return Err(TransactionError::Coinbase);
        }
        if tx.lock_time.raw_value() > i32::MAX as u32 {
            return Err(TransactionError::LockTimeOutOfRange);
        }
        tx_check::is_standard(&tx)?;

        let hash = tx.hash();
        if self.mempool.contains(&hash) || self.store.index.get_tx_index(&hash)?.is_some() {
            return Err(TransactionError::AlreadyHave);
        }

        for input in tx.inputs.iter() {
            if let Input::PrevOut { prev, .. } = input {
                if let Some(spender) = self.mempool.spender_of(prev) {
                    let existing = self.mempool.get(&spender.tx_hash).cloned();
                    let replaceable = existing.map(|e| Self::replacement_allowed(&e, &tx)).unwrap_or(false);
                    if !replaceable {
                        return Err(TransactionError::Conflict);
                    }
                }
            }
        }

        // Resolve every input to the output it spends, out of the pool or
        // the confirmed index.
        let best_height = self.best_height();
        let mut resolved: Vec<(Coin, Output)> = Vec::with_capacity(tx.inputs.len());
        let mut missing: Vec<TxHash> = Vec::new();
        for input in tx.inputs.iter() {
            let prev = match input {
                Input::PrevOut { prev, .. } => *prev,
                Input::Coinbase { .. } => continue,
            };
            if let Some(pool_tx) = self.mempool.get(&prev.tx_hash) {
                let output = pool_tx.outputs.get(prev.index as usize).ok_or(TransactionError::MissingOrSpentInput)?;
                resolved.push((prev, output.clone()));
            } else if let Some(entry) = self.store.index.get_tx_index(&prev.tx_hash)? {
                if entry.is_spent(prev.index as usize) {
                    return Err(TransactionError::MissingOrSpentInput);
                }
                let prev_tx = self.store.blocks.read_tx(entry.position)?;
                if prev_tx.is_coinbase() {
                    let prev_height = self
                        .height_of_position(entry.position)
                        .map_err(|_| TransactionError::MissingOrSpentInput)?;
                    if best_height.0.saturating_sub(prev_height.0) + 1 < COINBASE_MATURITY {
                        return Err(TransactionError::ImmatureCoinbaseSpend);
                    }
                }
                let output = prev_tx.outputs.get(prev.index as usize).ok_or(TransactionError::MissingOrSpentInput)?;
                resolved.push((prev, output.clone()));
            } else {
                missing.push(prev.tx_hash);
            }
        }
        if !missing.is_empty() {
            missing.sort();
            missing.dedup();
            tracing::debug!(%hash, missing = missing.len(), "buffering orphan transaction");
            self.mempool.insert_orphan(tx, &missing);
            return Ok(TxOutcome::Orphan { missing });
        }

        // Scripts and value accounting.
        let mut value_in: i64 = 0;
        for (input_index, (input, (_, prev_output))) in tx.inputs.iter().zip(resolved.iter()).enumerate() {
            let signature_script = match input {
                Input::PrevOut { signature_script, .. } => signature_script,
                Input::Coinbase { .. } => continue,
            };
            let hash_type = sighash::hash_type_of(signature_script);
            let digest = sighash::compute(&tx, input_index, &prev_output.script, hash_type);
            let mut vm = Vm::new(&digest, self.verifier.as_ref());
            if !vm.verify_spend(signature_script.as_bytes(), prev_output.script.as_bytes())? {
                return Err(TransactionError::ScriptRejected);
            }
            value_in = value_in.checked_add(prev_output.value.value()).ok_or(TransactionError::ValueOutOfRange)?;
        }
        let value_out: i64 = tx.outputs.iter().map(|o| o.value.value()).sum();
        let fee = value_in - value_out;
        if fee < 0 {
            return Err(TransactionError::ValueOutOfRange);
        }

        let size = tx.len();
        let has_dust = tx.outputs.iter().any(|o| o.value.value() < mempool::CENT);
        let required = mempool::min_fee(size, true, has_dust);
        if fee < required {
            return Err(TransactionError::InsufficientFee { paid: fee, required });
        }
        if fee < mempool::MIN_RELAY_TX_FEE && !self.mempool.admit_free(size, now) {
            return Err(TransactionError::FreeRelayThrottled);
        }

        self.mempool.insert(tx.clone(), &resolved);
        tracing::debug!(%hash, fee, "accepted transaction into the pool");
        for observer in self.observers.iter() {
            observer.on_transaction_accepted(&tx);
        }

        // This hash may be the missing parent of buffered orphans.
        let mut also_accepted = Vec::new();
        for orphan in self.mempool.take_orphans_of(&hash) {
            let orphan_hash = orphan.hash();
            match self.accept_transaction_at(orphan, now) {
                Ok(TxOutcome::Accepted { also_accepted: nested }) => {
                    also_accepted.push(orphan_hash);
                    also_accepted.extend(nested);
                }
                Ok(TxOutcome::Orphan { .. }) => {}
                Err(error) => tracing::debug!(orphan = %orphan_hash, %error, "buffered orphan transaction was rejected"),
            }
        }
        Ok(TxOutcome::Accepted { also_accepted })
    }

    // ---- reads ----

    /// Whether `hash` names a block we already hold in any form.
    pub fn has_block(&self, hash: &block::Hash) -> bool {
        self.arena.find(hash).is_some() || self.orphans.contains(hash)
    }

    /// Whether `hash` names a transaction we already hold in any form.
    pub fn has_transaction(&self, hash: &TxHash) -> Result<bool, StateError> {
        Ok(self.mempool.contains(hash) || self.mempool.is_orphan(hash) || self.store.index.get_tx_index(hash)?.is_some())
    }

    /// Reads a stored block back out of the block file.
    pub fn read_block(&self, hash: &block::Hash) -> Result<Option<Block>, StateError> {
        match self.positions.get(hash) {
            Some(position) => Ok(Some(self.store.blocks.read(*position)?)),
            None => Ok(None),
        }
    }

    /// A sparse trail of best-chain hashes, newest first, stepping back
    /// exponentially after the first ten. Peers use it to find the fork
    /// point between their chain and ours.
    pub fn locator(&self) -> Vec<block::Hash> {
        let mut hashes = Vec::new();
        let mut walk = self.arena.tip();
        let mut step = 1u64;
        while walk != NONE {
            let node = match self.arena.get(walk) {
                Some(node) => node,
                None => break,
            };
            hashes.push(node.header.hash());
            if hashes.len() >= 10 {
                step *= 2;
            }
            let mut next = node.parent;
            for _ in 1..step {
                match self.arena.get(next) {
                    Some(ancestor) if ancestor.parent != NONE => next = ancestor.parent,
                    _ => break,
                }
            }
            if next == walk {
                break;
            }
            walk = next;
        }
        let genesis = self.network.genesis_hash();
        if hashes.last() != Some(&genesis) {
            hashes.push(genesis);
        }
        hashes
    }

    /// Best-chain block hashes following the fork point implied by
    /// `locator`, up to `limit` of them, stopping after `stop` if given.
    pub fn block_hashes_after(&self, locator: &[block::Hash], stop: Option<block::Hash>, limit: usize) -> Vec<block::Hash> {
        let mut start = NONE;
        for hash in locator.iter() {
            if let Some(id) = self.arena.find(hash) {
                if self.arena.is_on_main_chain(id) {
                    start = id;
                    break;
                }
            }
        }
        let mut walk = match start {
            NONE => self.arena.find(&self.network.genesis_hash()).unwrap_or(NONE),
            id => self.arena.get(id).map(|n| n.main_chain_child).unwrap_or(NONE),
        };
        // An unknown locator starts the walk at genesis itself, which the
        // peer necessarily has; skip to its child.
        if start == NONE && walk != NONE {
            walk = self.arena.get(walk).map(|n| n.main_chain_child).unwrap_or(NONE);
        }
        let mut hashes = Vec::new();
        while walk != NONE && hashes.len() < limit {
            let node = match self.arena.get(walk) {
                Some(node) => node,
                None => break,
            };
            let hash = node.header.hash();
            hashes.push(hash);
            if Some(hash) == stop {
                break;
            }
            walk = node.main_chain_child;
        }
        hashes
    }

    /// Like [`Chain::block_hashes_after`] but returning headers.
    pub fn headers_after(&self, locator: &[block::Hash], stop: Option<block::Hash>, limit: usize) -> Vec<Header> {
        self.block_hashes_after(locator, stop, limit)
            .into_iter()
            .filter_map(|hash| self.arena.find(&hash).and_then(|id| self.arena.get(id)).map(|n| n.header))
            .collect()
    }

    /// Locates a transaction in the pool or on the main chain.
    pub fn transaction_info(&self, hash: &TxHash) -> Result<Option<TxInfo>, StateError> {
        if let Some(tx) = self.mempool.get(hash) {
            return Ok(Some(TxInfo { tx: (**tx).clone(), height: None, block_time: None }));
        }
        match self.store.index.get_tx_index(hash)? {
            Some(entry) => {
                let tx = self.store.blocks.read_tx(entry.position)?;
                let block_hash = self
                    .by_position
                    .get(&(entry.position.file_no, entry.position.block_offset))
                    .copied();
                let node = block_hash.and_then(|h| self.arena.find(&h)).and_then(|id| self.arena.get(id));
                Ok(Some(TxInfo {
                    tx,
                    height: node.map(|n| n.height),
                    block_time: node.map(|n| n.header.time),
                }))
            }
            None => Ok(None),
        }
    }

    /// Confirmation count: depth below the tip plus one, or zero while
    /// unconfirmed or unknown.
    pub fn confirmations(&self, hash: &TxHash) -> Result<u32, StateError> {
        match self.transaction_info(hash)? {
            Some(TxInfo { height: Some(height), .. }) => Ok(self.best_height().0.saturating_sub(height.0) + 1),
            _ => Ok(0),
        }
    }

    // ---- address balance ----

    /// Every coin (confirmed or pooled) paying `addr`.
    pub fn debits(&self, addr: &Hash160) -> Result<HashSet<Coin>, StateError> {
        let mut set = self.store.index.debit_set(addr)?;
        set.extend(self.mempool.debits(addr));
        Ok(set)
    }

    /// Every spending position (confirmed or pooled) drawing from `addr`.
    pub fn credits(&self, addr: &Hash160) -> Result<HashSet<Coin>, StateError> {
        let mut set = self.store.index.credit_set(addr)?;
        set.extend(self.mempool.credits(addr));
        Ok(set)
    }

    /// The outpoints consumed by `addr`'s credits: each credit names a
    /// spending input; this resolves them back to the coins they spent.
    fn spent_outpoints(&self, addr: &Hash160) -> Result<HashSet<Coin>, StateError> {
        let mut spent = HashSet::new();
        for credit in self.credits(addr)? {
            let spender = match self.mempool.get(&credit.tx_hash) {
                Some(tx) => (**tx).clone(),
                None => match self.store.index.get_tx_index(&credit.tx_hash)? {
                    Some(entry) => self.store.blocks.read_tx(entry.position)?,
                    None => continue,
                },
            };
            if let Some(Input::PrevOut { prev, .. }) = spender.inputs.get(credit.index as usize) {
                spent.insert(*prev);
            }
        }
        Ok(spent)
    }

    /// The unspent coins paying `addr`: debits minus the outpoints its
    /// credits consumed.
    pub fn unspent_coins(&self, addr: &Hash160) -> Result<Vec<Coin>, StateError> {
        let spent = self.spent_outpoints(addr)?;
        let mut coins: Vec<Coin> = self.debits(addr)?.into_iter().filter(|coin| !spent.contains(coin)).collect();
        coins.sort();
        Ok(coins)
    }

    /// Total unspent value paying `addr`, in the smallest unit.
    pub fn balance(&self, addr: &Hash160) -> Result<i64, StateError> {
        let mut total = 0i64;
        for coin in self.unspent_coins(addr)? {
            let output_value = match self.mempool.get(&coin.tx_hash) {
                Some(tx) => tx.outputs.get(coin.index as usize).map(|o| o.value.value()),
                None => match self.store.index.get_tx_index(&coin.tx_hash)? {
                    Some(entry) => {
                        let tx = self.store.blocks.read_tx(entry.position)?;
                        tx.outputs.get(coin.index as usize).map(|o| o.value.value())
                    }
                    None => None,
                },
            };
            total += output_value.unwrap_or(0);
        }
        Ok(total)
    }

    // ---- internal helpers ----

    fn hash_of(&self, id: NodeId) -> block::Hash {
        self.arena.get(id).map(|n| n.header.hash()).unwrap_or(block::Hash([0u8; 32]))
    }

    fn stored_index_of(&self, hash: &block::Hash) -> Result<StoredBlockIndex, BlockError> {
        Ok(self
            .store
            .index
            .get_block_index(hash)?
            .ok_or(StateError::Corrupt("block index record missing for a known block"))?)
    }

    fn read_block_of(&self, id: NodeId) -> Result<Block, BlockError> {
        let hash = self.hash_of(id);
        let position = self
            .positions
            .get(&hash)
            .copied()
            .ok_or(StateError::Corrupt("no recorded position for a known block"))?;
        Ok(self.store.blocks.read(position)?)
    }

    fn height_of_position(&self, position: DiskTxPos) -> Result<Height, StateError> {
        let hash = self
            .by_position
            .get(&(position.file_no, position.block_offset))
            .ok_or(StateError::Corrupt("transaction position points outside every known block"))?;
        self.arena
            .find(hash)
            .and_then(|id| self.arena.get(id))
            .map(|n| n.height)
            .ok_or(StateError::Corrupt("transaction position names an unindexed block"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use utxod_script::RejectAll;

    fn open_chain(dir: &std::path::Path) -> Chain {
        Chain::open(Network::Mainnet, dir, Arc::new(RejectAll)).unwrap()
    }

    #[test]
    fn fresh_directory_holds_exactly_genesis() {
        let dir = tempdir::TempDir::new("utxod-chain").unwrap();
        let chain = open_chain(dir.path());
        assert_eq!(chain.best_height(), Height(0));
        assert_eq!(chain.best_hash(), Network::Mainnet.genesis_hash());
        // Genesis difficulty 0x1d00ffff contributes 2^32 of work (to the
        // nearest integer division).
        assert_eq!(chain.best_work(), utxod_chain::work::CompactDifficulty(0x1d00ffff).work());
    }

    #[test]
    fn chain_state_survives_reopen() {
        let dir = tempdir::TempDir::new("utxod-chain").unwrap();
        let first_hash = {
            let chain = open_chain(dir.path());
            chain.best_hash()
        };
        let chain = open_chain(dir.path());
        assert_eq!(chain.best_hash(), first_hash);
        assert_eq!(chain.best_height(), Height(0));
    }

    #[test]
    fn locator_starts_at_tip_and_ends_at_genesis() {
        let dir = tempdir::TempDir::new("utxod-chain").unwrap();
        let chain = open_chain(dir.path());
        let locator = chain.locator();
        assert_eq!(locator.first(), Some(&chain.best_hash()));
        assert_eq!(locator.last(), Some(&Network::Mainnet.genesis_hash()));
    }

    #[test]
    fn duplicate_genesis_is_rejected() {
        let dir = tempdir::TempDir::new("utxod-chain").unwrap();
        let mut chain = open_chain(dir.path());
        let genesis = Arc::new(Network::Mainnet.genesis_block());
        assert!(matches!(chain.accept_block(genesis), Err(BlockError::Duplicate)));
    }
}
