//! The version/verack exchange that opens every connection.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;

use utxod_chain::block::Height;

use crate::constants;
use crate::protocol::external::types::{Nonce, PeerServices, ProtocolVersion};
use crate::protocol::external::{Codec, Message, Version};

use super::error::PeerError;

/// The nonces of our own in-flight handshakes. A peer whose `version`
/// carries one of these is ourselves, reached through some address that
/// loops back.
#[derive(Clone, Default)]
pub struct NonceRegistry {
    nonces: Arc<Mutex<HashSet<u64>>>,
}

impl NonceRegistry {
    pub fn new() -> NonceRegistry {
        NonceRegistry { nonces: Arc::new(Mutex::new(HashSet::new())) }
    }

    /// Registers and returns a fresh nonce for one handshake.
    pub fn issue(&self) -> Nonce {
        let nonce = Nonce::random();
        self.nonces.lock().expect("nonce registry lock poisoned").insert(nonce.0);
        nonce
    }

    pub fn contains(&self, nonce: Nonce) -> bool {
        self.nonces.lock().expect("nonce registry lock poisoned").contains(&nonce.0)
    }

    pub fn release(&self, nonce: Nonce) {
        self.nonces.lock().expect("nonce registry lock poisoned").remove(&nonce.0);
    }
}

/// Everything [`negotiate`] needs to introduce this node.
#[derive(Clone)]
pub struct HandshakeParams {
    pub user_agent: String,
    /// The address we advertise as our own.
    pub local_addr: SocketAddr,
    pub nonces: NonceRegistry,
}

/// Runs the handshake over a framed connection: sends our `version`, reads
/// and validates the peer's, exchanges `verack`, and drops the codec to
/// the negotiated version. Returns the peer's `version` message.
///
/// Callers wrap this in a timeout; a silent peer is cut off rather than
/// occupying a connection slot.
pub async fn negotiate(
    framed: &mut Framed<TcpStream, Codec>,
    params: &HandshakeParams,
    peer_addr: SocketAddr,
    best_height: Height,
) -> Result<Version, PeerError> {
    let our_nonce = params.nonces.issue();
    let our_version = Version::new(
        constants::CURRENT_VERSION,
        peer_addr,
        PeerServices::NODE_NETWORK,
        PeerServices::NODE_NETWORK,
        params.local_addr,
        our_nonce,
        params.user_agent.clone(),
        best_height,
    );
    framed.send(Message::Version(our_version)).await?;

    let result = exchange(framed, params).await;
    params.nonces.release(our_nonce);
    result
}

async fn exchange(framed: &mut Framed<TcpStream, Codec>, params: &HandshakeParams) -> Result<Version, PeerError> {
    let theirs = match framed.next().await {
        None => return Err(PeerError::ConnectionClosed),
        Some(Err(error)) => return Err(error.into()),
        Some(Ok(Message::Version(version))) => version,
        Some(Ok(other)) => return Err(PeerError::MessageBeforeHandshake(other.command().name())),
    };

    if params.nonces.contains(theirs.nonce) {
        return Err(PeerError::SelfConnect);
    }
    if theirs.version < constants::MIN_PEER_VERSION {
        return Err(PeerError::ObsoleteVersion(theirs.version.0));
    }

    framed.send(Message::Verack).await?;
    match framed.next().await {
        None => return Err(PeerError::ConnectionClosed),
        Some(Err(error)) => return Err(error.into()),
        Some(Ok(Message::Verack)) => {}
        Some(Ok(other)) => return Err(PeerError::MessageBeforeHandshake(other.command().name())),
    }

    let negotiated = ProtocolVersion(std::cmp::min(constants::CURRENT_VERSION.0, theirs.version.0));
    framed.codec_mut().reconfigure_version(negotiated);
    debug!(peer_version = theirs.version.0, negotiated = negotiated.0, agent = %theirs.user_agent, "handshake complete");
    Ok(theirs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_nonces_are_tracked_until_released() {
        let registry = NonceRegistry::new();
        let nonce = registry.issue();
        assert!(registry.contains(nonce));
        registry.release(nonce);
        assert!(!registry.contains(nonce));
    }

    #[test]
    fn distinct_handshakes_get_distinct_nonces() {
        let registry = NonceRegistry::new();
        let a = registry.issue();
        let b = registry.issue();
        assert_ne!(a, b);
    }
}
