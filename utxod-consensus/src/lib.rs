//! The chain engine: decides which blocks and transactions this node
//! accepts, which chain is the best chain, and what the resulting set of
//! unspent coins is.
//!
//! The engine is synchronous and single-writer: all mutation goes through
//! [`chain::Chain`], which callers share behind a lock. Network and RPC
//! layers stay out of this crate; they hand blocks and transactions in and
//! observe results through [`hooks::Observer`] callbacks and read methods.

pub mod block;
pub mod chain;
pub mod checkpoint;
pub mod error;
pub mod hooks;
pub mod mempool;
pub mod retarget;
pub mod transaction;

pub use chain::{BlockOutcome, Chain, TxOutcome};
pub use error::{BlockError, TransactionError};
pub use hooks::Observer;
