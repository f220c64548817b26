//! The peer protocol engine: everything between a TCP socket and the chain
//! engine.
//!
//! The crate does not validate blocks or transactions itself — it speaks
//! the wire protocol, tracks per-peer state, gossips inventory, and hands
//! payloads to whatever implements [`service::ChainView`]. The node binary
//! wires that seam to the chain engine.

#![allow(clippy::too_many_arguments)]

#[macro_use]
extern crate tracing;

pub mod address_book;
pub mod alert;
pub mod config;
pub mod constants;
pub mod endpoint;
pub mod peer;
pub mod peer_set;
pub mod protocol;
pub mod relay;
pub mod service;

pub use address_book::AddressBook;
pub use alert::{Alert, AlertRegistry};
pub use config::Config;
pub use endpoint::Endpoint;
pub use peer_set::{NetworkEvent, PeerSet};
pub use protocol::external::{Inventory, Message};
pub use service::{BlockSubmission, ChainView, TxSubmission};
