//! The seam between the peer engine and the chain engine.
//!
//! The peer engine is generic over [`ChainView`] so this crate never
//! depends on validation logic: the node binary implements the trait over
//! the chain engine and its lock.

use std::sync::Arc;

use utxod_chain::block::{self, Block, Header, Height};
use utxod_chain::transaction::{Hash as TxHash, Transaction};

use crate::protocol::external::RejectReason;

/// What the chain engine made of a submitted block.
#[derive(Debug, Clone)]
pub enum BlockSubmission {
    /// Connected to the best chain; announce it onward.
    Connected,
    /// Stored on a side branch; nothing to announce.
    Stored,
    /// Parent unknown. `missing_root` is where a `getblocks` request to
    /// the origin peer should aim.
    Orphan { missing_root: block::Hash },
    /// Rejected. The reason pair is relayed outward in a `reject` message.
    Rejected { ccode: RejectReason, reason: String },
}

/// What the chain engine made of a submitted transaction.
#[derive(Debug, Clone)]
pub enum TxSubmission {
    /// In the pool. `also_accepted` lists orphans this unlocked; all of
    /// them should be announced.
    Accepted { also_accepted: Vec<TxHash> },
    /// Buffered as an orphan; not announced.
    Orphan,
    /// Rejected. The reason pair is relayed outward in a `reject` message.
    Rejected { ccode: RejectReason, reason: String },
}

/// Chain-engine operations the peer engine needs. Implementations
/// serialize access internally; methods may block briefly on the chain
/// lock or on storage.
pub trait ChainView: Send + Sync + 'static {
    fn best_height(&self) -> Height;

    /// The sparse locator describing our best chain, for `getblocks`.
    fn locator(&self) -> Vec<block::Hash>;

    /// Whether this block is already held in any form (chain, side branch,
    /// or orphan buffer).
    fn has_block(&self, hash: &block::Hash) -> bool;

    /// Whether this transaction is already held in any form (pool, orphan
    /// buffer, or confirmed index).
    fn has_transaction(&self, hash: &TxHash) -> bool;

    fn submit_block(&self, block: Arc<Block>) -> BlockSubmission;

    fn submit_transaction(&self, tx: Arc<Transaction>) -> TxSubmission;

    /// Best-chain hashes after the locator's fork point, for `getblocks`.
    fn block_hashes_after(&self, locator: &[block::Hash], stop: Option<block::Hash>, limit: usize) -> Vec<block::Hash>;

    /// Best-chain headers after the locator's fork point, for `getheaders`.
    fn headers_after(&self, locator: &[block::Hash], stop: Option<block::Hash>, limit: usize) -> Vec<Header>;

    /// Reads a stored block for `getdata` service.
    fn fetch_block(&self, hash: &block::Hash) -> Option<Block>;

    /// Reads a pooled (unconfirmed) transaction, as a fallback behind the
    /// relay cache when serving `getdata`.
    fn fetch_transaction(&self, hash: &TxHash) -> Option<Transaction>;
}
