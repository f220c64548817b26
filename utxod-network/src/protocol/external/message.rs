//! Definitions of network messages.
//!
//! The wire identifies messages by a 12-byte ASCII command string; that is
//! a serialization detail, so this enum uses its discriminant instead and
//! the translation happens only inside the codec.

mod get_blocks;
mod version;

pub use get_blocks::{GetBlocks, Locator};
pub use version::Version;

use std::fmt;
use std::sync::Arc;

use utxod_chain::block::{Block, CountedHeader};
use utxod_chain::transaction::Transaction;

use super::command::Command;
use super::inv::Inventory;
use super::types::Nonce;
use crate::alert::Alert;
use crate::endpoint::Endpoint;

/// A `getheaders` request: the same locator shape as [`GetBlocks`], but the
/// response carries headers instead of inventory.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct GetHeaders {
    pub locator: Locator,
    pub stop: Option<utxod_chain::block::Hash>,
}

/// One wire message, in internal representation.
#[derive(Clone, Debug)]
pub enum Message {
    /// Opens the handshake; carries the sender's identity and best height.
    Version(Version),
    /// Acknowledges a `version`.
    Verack,
    /// Liveness probe with a nonce echoed by the matching `pong`.
    Ping(Nonce),
    Pong(Nonce),
    /// Why a previously sent message was refused.
    Reject {
        /// The command being rejected.
        message: String,
        ccode: RejectReason,
        reason: String,
        /// The hash of the rejected object, when there is one.
        data: Option<[u8; 32]>,
    },
    /// Requests a batch of the receiver's known endpoints.
    GetAddr,
    /// Shares known endpoints.
    Addr(Vec<Endpoint>),
    /// Advertises objects the sender has.
    Inv(Vec<Inventory>),
    /// Requests objects by inventory entry.
    GetData(Vec<Inventory>),
    /// Asks the receiver to walk its best chain forward from the locator's
    /// fork point, answering with `inv` entries.
    GetBlocks(GetBlocks),
    /// Like `getblocks`, answered with `headers`.
    GetHeaders(GetHeaders),
    /// Headers following a `getheaders` locator.
    Headers(Vec<CountedHeader>),
    Block(Arc<Block>),
    Tx(Arc<Transaction>),
    /// A signed operator alert.
    Alert(Alert),
}

impl Message {
    pub fn command(&self) -> Command {
        match self {
            Message::Version(_) => Command::Version,
            Message::Verack => Command::Verack,
            Message::Ping(_) => Command::Ping,
            Message::Pong(_) => Command::Pong,
            Message::Reject { .. } => Command::Reject,
            Message::GetAddr => Command::GetAddr,
            Message::Addr(_) => Command::Addr,
            Message::Inv(_) => Command::Inv,
            Message::GetData(_) => Command::GetData,
            Message::GetBlocks(_) => Command::GetBlocks,
            Message::GetHeaders(_) => Command::GetHeaders,
            Message::Headers(_) => Command::Headers,
            Message::Block(_) => Command::Block,
            Message::Tx(_) => Command::Tx,
            Message::Alert(_) => Command::Alert,
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.command().name())
    }
}

/// Machine-readable rejection codes carried by `reject` messages.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum RejectReason {
    Malformed = 0x01,
    Invalid = 0x10,
    Obsolete = 0x11,
    Duplicate = 0x12,
    Nonstandard = 0x40,
    Dust = 0x41,
    InsufficientFee = 0x42,
    Checkpoint = 0x43,
    Other = 0x50,
}

impl RejectReason {
    pub fn from_code(code: u8) -> Option<RejectReason> {
        Some(match code {
            0x01 => RejectReason::Malformed,
            0x10 => RejectReason::Invalid,
            0x11 => RejectReason::Obsolete,
            0x12 => RejectReason::Duplicate,
            0x40 => RejectReason::Nonstandard,
            0x41 => RejectReason::Dust,
            0x42 => RejectReason::InsufficientFee,
            0x43 => RejectReason::Checkpoint,
            0x50 => RejectReason::Other,
            _ => return None,
        })
    }
}
