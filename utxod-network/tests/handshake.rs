//! Handshake behavior over real sockets on the loopback interface.

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;

use utxod_chain::block::Height;
use utxod_network::constants::{CURRENT_VERSION, USER_AGENT};
use utxod_network::peer::{negotiate, HandshakeParams, NonceRegistry, PeerError};
use utxod_network::protocol::external::types::{Nonce, PeerServices, ProtocolVersion};
use utxod_network::protocol::external::{Codec, Message, Version};

fn params(nonces: NonceRegistry) -> HandshakeParams {
    HandshakeParams {
        user_agent: USER_AGENT.to_owned(),
        local_addr: "127.0.0.1:8333".parse().unwrap(),
        nonces,
    }
}

fn version_with(nonce: Nonce, protocol: ProtocolVersion) -> Version {
    let services = PeerServices::NODE_NETWORK;
    Version::new(
        protocol,
        "127.0.0.1:8333".parse().unwrap(),
        services,
        services,
        "127.0.0.1:8334".parse().unwrap(),
        nonce,
        "/other-node:1.0/".to_owned(),
        Height(9),
    )
}

#[tokio::test]
async fn two_honest_nodes_complete_the_handshake() {
    utxod_test::init();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (stream, peer_addr) = listener.accept().await.unwrap();
        let mut framed = Framed::new(stream, Codec::builder().finish());
        negotiate(&mut framed, &params(NonceRegistry::new()), peer_addr, Height(3)).await
    });

    let stream = TcpStream::connect(addr).await.unwrap();
    let mut framed = Framed::new(stream, Codec::builder().finish());
    let client_result = negotiate(&mut framed, &params(NonceRegistry::new()), addr, Height(0)).await;

    let server_result = server.await.unwrap();
    assert_eq!(client_result.unwrap().start_height, Height(3));
    assert_eq!(server_result.unwrap().start_height, Height(0));
}

#[tokio::test]
async fn echoed_nonce_is_a_self_connection() {
    utxod_test::init();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    // The "remote" is a mirror: it reflects our own nonce back at us, the
    // observable symptom of having dialed ourselves through a loop.
    let mirror = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut framed = Framed::new(stream, Codec::builder().finish());
        let theirs = match framed.next().await.unwrap().unwrap() {
            Message::Version(version) => version,
            other => panic!("expected a version message, got {}", other),
        };
        framed
            .send(Message::Version(version_with(theirs.nonce, CURRENT_VERSION)))
            .await
            .unwrap();
    });

    let nonces = NonceRegistry::new();
    let stream = TcpStream::connect(addr).await.unwrap();
    let mut framed = Framed::new(stream, Codec::builder().finish());
    let result = negotiate(&mut framed, &params(nonces.clone()), addr, Height(0)).await;
    assert!(matches!(result, Err(PeerError::SelfConnect)));
    mirror.await.unwrap();
}

#[tokio::test]
async fn obsolete_peer_version_is_refused() {
    utxod_test::init();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let ancient = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut framed = Framed::new(stream, Codec::builder().finish());
        let _ = framed.next().await;
        framed
            .send(Message::Version(version_with(Nonce::random(), ProtocolVersion(60))))
            .await
            .unwrap();
    });

    let stream = TcpStream::connect(addr).await.unwrap();
    let mut framed = Framed::new(stream, Codec::builder().finish());
    let result = negotiate(&mut framed, &params(NonceRegistry::new()), addr, Height(0)).await;
    assert!(matches!(result, Err(PeerError::ObsoleteVersion(60))));
    ancient.await.unwrap();
}

#[tokio::test]
async fn data_before_version_is_a_protocol_violation() {
    utxod_test::init();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let rude = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut framed = Framed::new(stream, Codec::builder().finish());
        let _ = framed.next().await;
        framed.send(Message::GetAddr).await.unwrap();
    });

    let stream = TcpStream::connect(addr).await.unwrap();
    let mut framed = Framed::new(stream, Codec::builder().finish());
    let result = negotiate(&mut framed, &params(NonceRegistry::new()), addr, Height(0)).await;
    assert!(matches!(result, Err(PeerError::MessageBeforeHandshake("getaddr"))));
    rude.await.unwrap();
}
