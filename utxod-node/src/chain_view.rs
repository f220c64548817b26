//! The adapter between the peer engine's chain seam and the chain engine
//! proper: takes the chain lock, runs the call, and maps rejections onto
//! wire reject codes.

use std::sync::{Arc, Mutex};

use utxod_chain::block::{self, Block, Header, Height};
use utxod_chain::transaction::{Hash as TxHash, Transaction};
use utxod_consensus::chain::{BlockOutcome, Chain, TxOutcome};
use utxod_consensus::{BlockError, TransactionError};
use utxod_network::protocol::external::RejectReason;
use utxod_network::{BlockSubmission, ChainView, TxSubmission};

#[derive(Clone)]
pub struct ChainHandle {
    chain: Arc<Mutex<Chain>>,
}

impl ChainHandle {
    pub fn new(chain: Arc<Mutex<Chain>>) -> ChainHandle {
        ChainHandle { chain }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Chain> {
        self.chain.lock().expect("chain lock poisoned")
    }
}

fn block_reject_code(error: &BlockError) -> RejectReason {
    match error {
        BlockError::Duplicate | BlockError::DuplicateTransaction => RejectReason::Duplicate,
        BlockError::NoTransactions | BlockError::TooLarge(_) => RejectReason::Malformed,
        BlockError::CheckpointMismatch(_) => RejectReason::Checkpoint,
        BlockError::Fatal(_) => RejectReason::Other,
        _ => RejectReason::Invalid,
    }
}

fn tx_reject_code(error: &TransactionError) -> RejectReason {
    match error {
        TransactionError::AlreadyHave | TransactionError::Conflict => RejectReason::Duplicate,
        TransactionError::NoInputs | TransactionError::NoOutputs | TransactionError::TooLarge(_) => RejectReason::Malformed,
        TransactionError::NonStandardScript | TransactionError::Undersized(_) | TransactionError::TooManySigOps => {
            RejectReason::Nonstandard
        }
        TransactionError::InsufficientFee { .. } | TransactionError::FreeRelayThrottled => RejectReason::InsufficientFee,
        TransactionError::Fatal(_) => RejectReason::Other,
        _ => RejectReason::Invalid,
    }
}

impl ChainView for ChainHandle {
    fn best_height(&self) -> Height {
        self.lock().best_height()
    }

    fn locator(&self) -> Vec<block::Hash> {
        self.lock().locator()
    }

    fn has_block(&self, hash: &block::Hash) -> bool {
        self.lock().has_block(hash)
    }

    fn has_transaction(&self, hash: &TxHash) -> bool {
        self.lock().has_transaction(hash).unwrap_or(false)
    }

    fn submit_block(&self, block: Arc<Block>) -> BlockSubmission {
        match self.lock().accept_block(block) {
            Ok(BlockOutcome::Connected { .. }) => BlockSubmission::Connected,
            Ok(BlockOutcome::SideChain { .. }) => BlockSubmission::Stored,
            Ok(BlockOutcome::Orphan { missing_root }) => BlockSubmission::Orphan { missing_root },
            Err(error) => BlockSubmission::Rejected { ccode: block_reject_code(&error), reason: error.to_string() },
        }
    }

    fn submit_transaction(&self, tx: Arc<Transaction>) -> TxSubmission {
        match self.lock().accept_transaction(tx) {
            Ok(TxOutcome::Accepted { also_accepted }) => TxSubmission::Accepted { also_accepted },
            Ok(TxOutcome::Orphan { .. }) => TxSubmission::Orphan,
            Err(error) => TxSubmission::Rejected { ccode: tx_reject_code(&error), reason: error.to_string() },
        }
    }

    fn block_hashes_after(&self, locator: &[block::Hash], stop: Option<block::Hash>, limit: usize) -> Vec<block::Hash> {
        self.lock().block_hashes_after(locator, stop, limit)
    }

    fn headers_after(&self, locator: &[block::Hash], stop: Option<block::Hash>, limit: usize) -> Vec<Header> {
        self.lock().headers_after(locator, stop, limit)
    }

    fn fetch_block(&self, hash: &block::Hash) -> Option<Block> {
        self.lock().read_block(hash).ok().flatten()
    }

    fn fetch_transaction(&self, hash: &TxHash) -> Option<Transaction> {
        let chain = self.lock();
        chain.mempool().get(hash).map(|tx| (**tx).clone())
    }
}
