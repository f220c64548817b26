//! The external wire protocol: framing, commands, and message bodies.

/// A Tokio codec that transforms an `AsyncRead` into a `Stream` of
/// `Message`s.
pub mod codec;
/// The 12-byte ASCII command field.
mod command;
/// Inventory items.
mod inv;
/// An enum of all supported message types.
mod message;
/// Newtype wrappers for primitive protocol types.
pub mod types;

pub use codec::Codec;
pub use command::Command;
pub use inv::Inventory;
pub use message::{GetBlocks, GetHeaders, Locator, Message, RejectReason, Version};
