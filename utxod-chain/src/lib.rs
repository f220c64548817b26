//! Consensus data model, wire/disk codec, and hashing primitives for a
//! proof-of-work UTXO network.

pub mod amount;
pub mod block;
pub mod cached;
mod fmt;
pub mod hash;
pub mod parameters;
pub mod serialization;
pub mod transaction;
pub mod transparent;
pub mod work;

pub mod block_index;

pub use cached::Lazy;
pub use serialization::{CodecError, Decode, DecodeInto, Encode};
