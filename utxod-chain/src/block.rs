//! Blocks and block-related structures.

mod hash;
mod header;
mod height;

pub mod merkle;

#[cfg(any(test, feature = "proptest-impl"))]
mod arbitrary;

use std::{fmt, io, sync::Arc};

use crate::fmt::DisplayToDebug;
use crate::serialization::{CodecError, Decode, Encode, VarInt};
use crate::transaction::Transaction;
use crate::transparent;

pub use hash::Hash;
pub use header::{BlockTimeError, CountedHeader, Header};
pub use height::Height;

/// The maximum encoded size of a block, in bytes.
pub const MAX_BLOCK_BYTES: u64 = 4_000_000;

/// A block: a header and the list of transactions it commits to.
#[derive(Clone, Debug, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Block {
    pub header: Header,
    pub transactions: Vec<Arc<Transaction>>,
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut fmter = f.debug_struct("Block");
        if let Some(height) = self.coinbase_height() {
            fmter.field("height", &height);
        }
        fmter.field("hash", &DisplayToDebug(self.hash())).finish()
    }
}

impl Block {
    /// The height reported in the coinbase input, if the coinbase decoder
    /// has already parsed it (the BIP34-style height commitment; see
    /// `transparent::Input::Coinbase`).
    pub fn coinbase_height(&self) -> Option<Height> {
        if let Some(height) = self.header.reported_height() {
            return Some(height);
        }
        self.transactions
            .get(0)
            .and_then(|tx| tx.inputs.get(0))
            .and_then(|input| match input {
                transparent::Input::Coinbase { height, .. } => height.as_ref().and_then(|h| h.get()),
                _ => None,
            })
    }

    pub fn hash(&self) -> Hash {
        Hash::from(self)
    }

    /// The merkle root actually implied by this block's transactions,
    /// independent of whatever the header claims — used by the chain
    /// engine's structural-validity check.
    pub fn computed_merkle_root(&self) -> merkle::Root {
        merkle::root(self.transactions.iter().map(|tx| tx.hash().0 .0))
    }

    pub fn has_exactly_one_leading_coinbase(&self) -> bool {
        matches!(self.transactions.get(0).map(|tx| tx.is_coinbase()), Some(true))
            && self.transactions.iter().skip(1).all(|tx| !tx.is_coinbase())
    }
}

impl Encode for Block {
    fn encode<W: io::Write>(&self, mut target: W) -> io::Result<()> {
        self.header.encode(&mut target)?;
        self.transactions.encode(&mut target)
    }
}

impl Decode for Block {
    fn decode<R: io::Read>(target: R) -> Result<Self, CodecError> {
        let mut target = target.take(MAX_BLOCK_BYTES);
        let header = Header::decode(&mut target)?;
        let tx_count = VarInt::decode(&mut target)?.value();
        if tx_count > MAX_BLOCK_BYTES / (36 * 4) {
            return Err(CodecError::Parse("block claims more transactions than could fit even one input each"));
        }
        let mut transactions = Vec::with_capacity(std::cmp::min(tx_count, 1 << 16) as usize);
        for _ in 0..tx_count {
            transactions.push(Arc::<Transaction>::decode(&mut target)?);
        }
        Ok(Block { header, transactions })
    }
}

impl<'a> From<&'a Block> for Hash {
    fn from(block: &'a Block) -> Hash {
        Hash::from(&block.header)
    }
}
