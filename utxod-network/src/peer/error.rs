use thiserror::Error;

use utxod_chain::serialization::CodecError;

/// Why a peer connection ended. Every variant closes the socket; protocol
/// violations additionally record a transient ban in the endpoint pool so
/// the offender cannot simply reconnect.
#[derive(Error, Debug)]
pub enum PeerError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed frame: {0}")]
    Codec(#[from] CodecError),
    #[error("handshake did not complete in time")]
    HandshakeTimeout,
    #[error("peer echoed one of our own handshake nonces (connected to self)")]
    SelfConnect,
    #[error("peer speaks obsolete protocol version {0}")]
    ObsoleteVersion(u32),
    #[error("peer sent {0} before completing the handshake")]
    MessageBeforeHandshake(&'static str),
    #[error("peer sent a second version message")]
    DuplicateVersion,
    #[error("peer was silent past the inactivity limit")]
    Inactivity,
    #[error("peer closed the connection")]
    ConnectionClosed,
}

impl PeerError {
    /// Whether this is a protocol violation: the kind of failure that earns
    /// the address a transient ban, not just a close.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            PeerError::SelfConnect
                | PeerError::DuplicateVersion
                | PeerError::MessageBeforeHandshake(_)
                | PeerError::ObsoleteVersion(_)
        )
    }
}
