//! Per-peer machinery: the handshake, the connection state machine, and
//! the errors that end a connection.

mod connection;
mod error;
mod handshake;

pub use connection::{Connection, PeerEvent, SharedTables};
pub use error::PeerError;
pub use handshake::{negotiate, HandshakeParams, NonceRegistry};
