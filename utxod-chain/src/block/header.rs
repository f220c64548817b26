use std::io;

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

use crate::cached::Lazy;
use crate::serialization::{CodecError, Decode, Encode};
use crate::work::CompactDifficulty;
use utxod_wire_derive::{Decode as WireDecode, Encode as WireEncode};

use super::{merkle, Hash, Height};

/// A block header: the 80-byte consensus-critical record that
/// chains blocks together and commits to their transactions.
///
/// `hash` and `reported_height` are not part of the wire encoding — the
/// derive macros skip nothing, but [`Lazy`]'s own `Encode`/`Decode` impls
/// are no-ops, so appending them here costs nothing on the wire while
/// letting every header carry its own memoized hash.
#[derive(Clone, Copy, Debug, Eq, PartialEq, serde::Serialize, serde::Deserialize, WireEncode, WireDecode)]
pub struct Header {
    pub version: u32,
    pub previous_block_hash: Hash,
    pub merkle_root: merkle::Root,
    pub time: DateTime<Utc>,
    pub difficulty_threshold: CompactDifficulty,
    pub nonce: u32,
    hash: Lazy<Hash>,
    reported_height: Lazy<Height>,
}

#[derive(Error, Debug)]
pub enum BlockTimeError {
    #[error("block time {0:?} at height {1} is more than 2 hours in the future (now is {2:?})")]
    TooFarInFuture(DateTime<Utc>, crate::block::Height, DateTime<Utc>),
}

impl Header {
    pub const fn len() -> usize {
        80
    }

    #[allow(clippy::too_many_arguments)]
    pub fn new(
        version: u32,
        previous_block_hash: Hash,
        merkle_root: merkle::Root,
        time: DateTime<Utc>,
        difficulty_threshold: CompactDifficulty,
        nonce: u32,
    ) -> Header {
        Header {
            version,
            previous_block_hash,
            merkle_root,
            time,
            difficulty_threshold,
            nonce,
            hash: Lazy::empty(),
            reported_height: Lazy::empty(),
        }
    }

    pub fn hash(&self) -> Hash {
        self.hash.get().unwrap_or_else(|| Hash::from(self))
    }

    pub fn reported_height(&self) -> Option<Height> {
        self.reported_height.get()
    }

    pub fn set_reported_height(&mut self, height: Height) {
        self.reported_height = Lazy::filled(height);
    }

    /// The context-free time check: a block's timestamp must not be
    /// more than two hours ahead of the receiving node's clock.
    pub fn time_is_valid_at(&self, now: DateTime<Utc>, height: &Height) -> Result<(), BlockTimeError> {
        let two_hours_from_now = now.checked_add_signed(Duration::hours(2)).expect("adding 2 hours does not overflow");
        if self.time <= two_hours_from_now {
            Ok(())
        } else {
            Err(BlockTimeError::TooFarInFuture(self.time, *height, two_hours_from_now))
        }
    }
}

/// A header paired with the transaction count that follows it on the wire,
/// as used in `headers` messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CountedHeader {
    pub header: Header,
    pub transaction_count: usize,
}

impl Encode for CountedHeader {
    fn encode<W: io::Write>(&self, mut target: W) -> io::Result<()> {
        self.header.encode(&mut target)?;
        crate::serialization::VarInt::from(self.transaction_count).encode(&mut target)
    }
}
impl Decode for CountedHeader {
    fn decode<R: io::Read>(mut target: R) -> Result<Self, CodecError> {
        Ok(CountedHeader {
            header: Header::decode(&mut target)?,
            transaction_count: crate::serialization::VarInt::decode(&mut target)?.value() as usize,
        })
    }
}
