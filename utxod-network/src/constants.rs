//! Protocol-wide constants: negotiated versions, message caps, and the
//! timers that govern peer lifecycle.

use std::time::Duration;

use crate::protocol::external::types::ProtocolVersion;

/// The protocol version this node speaks.
pub const CURRENT_VERSION: ProtocolVersion = ProtocolVersion(31_800);

/// Peers older than this are disconnected during the handshake.
pub const MIN_PEER_VERSION: ProtocolVersion = ProtocolVersion(209);

/// At or below this protocol version, `version` and `verack` frames carry
/// no checksum field; every later message does.
pub const CHECKSUMLESS_VERSION: u32 = 209;

/// Peers at or above this version answer `getaddr`.
pub const GETADDR_VERSION: u32 = 31_402;

/// A frame whose payload claims to be larger than this is a protocol
/// violation and closes the connection.
pub const MAX_PROTOCOL_MESSAGE_LEN: usize = 32 * 1024 * 1024;

/// The most inventory items one `inv` or `getdata` may carry.
pub const MAX_INV_PER_MESSAGE: usize = 1_000;

/// The most addresses one `addr` may carry.
pub const MAX_ADDR_PER_MESSAGE: usize = 1_000;

/// `getblocks` responses walk at most this many hashes forward.
pub const MAX_BLOCKS_IN_RESPONSE: usize = 500;

/// `getheaders` responses walk at most this many headers forward.
pub const MAX_HEADERS_IN_RESPONSE: usize = 2_000;

/// A peer that has not completed its handshake within this window is
/// disconnected.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(60);

/// A peer silent for this long is disconnected.
pub const INACTIVITY_TIMEOUT: Duration = Duration::from_secs(90 * 60);

/// An idle peer is pinged this often.
pub const PING_INTERVAL: Duration = Duration::from_secs(2 * 60);

/// How often each peer's pending inventory queue is drained.
pub const TRICKLE_INTERVAL: Duration = Duration::from_millis(100);

/// The longest deterministic delay a trickled transaction announcement
/// waits before release.
pub const TRICKLE_MAX_DELAY: Duration = Duration::from_secs(5);

/// Outbound connection attempts give up after this long.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Recently relayed transactions are served to `getdata` for this long.
pub const RELAY_CACHE_TTL: Duration = Duration::from_secs(15 * 60);

/// A repeated `getdata` for the same inventory within this window is
/// suppressed.
pub const REQUEST_DEDUP_WINDOW: Duration = Duration::from_secs(2 * 60);

/// Cached relay-pool announcements are repeated on roughly this schedule.
pub const REBROADCAST_INTERVAL: Duration = Duration::from_secs(30 * 60);

/// Endpoints unseen for this long are purged from the pool.
pub const ENDPOINT_PURGE_AGE: Duration = Duration::from_secs(14 * 24 * 60 * 60);

/// How long an address that committed a protocol violation is refused
/// reconnection, inbound or outbound.
pub const MISBEHAVIOR_BAN_WINDOW: Duration = Duration::from_secs(15 * 60);

/// Concurrent outbound connections.
pub const MAX_OUTBOUND_CONNECTIONS: usize = 8;

/// Concurrent inbound connections.
pub const MAX_INBOUND_CONNECTIONS: usize = 117;

/// The user agent advertised in our `version` messages.
pub const USER_AGENT: &str = "/utxod:0.1.0/";
