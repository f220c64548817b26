//! Listener registration for wallets and RPC surfaces.
//!
//! Observers run synchronously while the chain lock is held, so a slow
//! observer slows block processing for the whole node. Implementations
//! should record what happened and return; anything expensive belongs on
//! the observer's own task.

use utxod_chain::block::{Block, Hash as BlockHash, Height};
use utxod_chain::transaction::Transaction;

/// Callbacks fired by [`crate::chain::Chain`] as it mutates state. All
/// methods default to no-ops so an observer only implements the events it
/// cares about.
pub trait Observer: Send {
    /// An unconfirmed transaction entered the pool.
    fn on_transaction_accepted(&self, _tx: &Transaction) {}

    /// A block was connected to the best chain.
    fn on_block_connected(&self, _block: &Block, _height: Height) {}

    /// The best chain switched branches: `depth` blocks were disconnected
    /// before the new branch took over.
    fn on_reorganize(&self, _old_tip: BlockHash, _new_tip: BlockHash, _depth: u32) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Counter(Arc<AtomicUsize>);
    impl Observer for Counter {
        fn on_block_connected(&self, _block: &Block, _height: Height) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn unimplemented_events_are_no_ops() {
        let count = Arc::new(AtomicUsize::new(0));
        let observer = Counter(count.clone());
        observer.on_transaction_accepted(&utxod_chain::parameters::Network::Mainnet.genesis_block().transactions[0]);
        observer.on_reorganize(BlockHash([0; 32]), BlockHash([1; 32]), 2);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
