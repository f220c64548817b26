//! Rejection kinds for blocks and transactions.
//!
//! Variants are grouped by how callers recover: a `BlockError` rejects one
//! block without touching chain state; a `TransactionError` rejects one
//! transaction and tells the relay layer not to forward it; a `Fatal`
//! storage failure aborts the enclosing batch and initiates shutdown.

use thiserror::Error;

use utxod_chain::block;
use utxod_script::ScriptError;
use utxod_state::StateError;

#[derive(Error, Debug)]
pub enum BlockError {
    #[error("block is already known")]
    Duplicate,
    #[error("block has no transactions")]
    NoTransactions,
    #[error("block exceeds the {0}-byte size cap")]
    TooLarge(u64),
    #[error("block hash does not satisfy its own claimed difficulty")]
    HeaderWorkInvalid,
    #[error("block time is too far in the future")]
    TimeTooFarAhead(#[from] block::BlockTimeError),
    #[error("first transaction is not a coinbase, or a later one is")]
    CoinbasePosition,
    #[error("block exceeds the {0} signature-operation cap")]
    TooManySigOps(usize),
    #[error("merkle root does not match the block's transactions")]
    BadMerkleRoot,
    #[error("block contains a duplicate transaction")]
    DuplicateTransaction,
    #[error("claimed difficulty does not match the retarget rule at height {0:?}")]
    BadDifficulty(block::Height),
    #[error("block time is not after the median of the previous 11 blocks")]
    TimeBeforeMedian,
    #[error("transaction {0} is not final at this height and time")]
    NonFinalTransaction(utxod_chain::transaction::Hash),
    #[error("block at height {0:?} contradicts a checkpoint")]
    CheckpointMismatch(block::Height),
    #[error("coinbase pays {claimed} but only {allowed} is available in subsidy and fees")]
    BadCoinbaseValue { claimed: i64, allowed: i64 },
    #[error("input spends an output that is missing or already spent")]
    MissingOrSpentInput,
    #[error("input spends a coinbase that has not matured")]
    ImmatureCoinbaseSpend,
    #[error("input value accounting left the valid money range")]
    ValueOutOfRange,
    #[error("script validation failed: {0}")]
    Script(#[from] ScriptError),
    #[error("a spend was not authorized by the previous output's script")]
    ScriptRejected,
    #[error("invalid transaction in block: {0}")]
    Transaction(#[from] TransactionError),
    #[error("storage fault: {0}")]
    Fatal(#[from] StateError),
}

#[derive(Error, Debug)]
pub enum TransactionError {
    #[error("transaction has no inputs")]
    NoInputs,
    #[error("transaction has no outputs")]
    NoOutputs,
    #[error("transaction exceeds the {0}-byte size cap")]
    TooLarge(u64),
    #[error("transaction is below the {0}-byte relay floor")]
    Undersized(usize),
    #[error("output values sum outside the valid money range")]
    OutputsOutOfRange,
    #[error("transaction spends the same output twice")]
    DuplicateInputs,
    #[error("non-coinbase transaction has a null previous output")]
    NullPrevOut,
    #[error("coinbase data length {0} is outside 2..=100 bytes")]
    BadCoinbaseData(usize),
    #[error("coinbase transactions cannot enter the pool of unconfirmed transactions")]
    Coinbase,
    #[error("lock time is past the supported range")]
    LockTimeOutOfRange,
    #[error("output script does not match a standard template")]
    NonStandardScript,
    #[error("too many signature operations for the transaction's size")]
    TooManySigOps,
    #[error("transaction is already known")]
    AlreadyHave,
    #[error("an input conflicts with an unconfirmed spend of the same output")]
    Conflict,
    #[error("input spends an output that is missing or already spent")]
    MissingOrSpentInput,
    #[error("input spends a coinbase that has not matured")]
    ImmatureCoinbaseSpend,
    #[error("input value accounting left the valid money range")]
    ValueOutOfRange,
    #[error("fee {paid} is below the required minimum {required}")]
    InsufficientFee { paid: i64, required: i64 },
    #[error("free-relay budget is exhausted, try again with a fee")]
    FreeRelayThrottled,
    #[error("a spend was not authorized by the previous output's script")]
    ScriptRejected,
    #[error("script validation failed: {0}")]
    Script(#[from] ScriptError),
    #[error("storage fault: {0}")]
    Fatal(#[from] StateError),
}
