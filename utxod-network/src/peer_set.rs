//! Connection management: the inbound listener, the outbound dialer, and
//! the fan-out of announcements across every live peer.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::Utc;
use rand::Rng;
use tracing_futures::Instrument;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio_util::codec::Framed;

use utxod_chain::block;
use utxod_chain::transaction::{Hash as TxHash, Transaction};
use utxod_script::Verifier;

use crate::address_book::AddressBook;
use crate::alert::{Alert, AlertRegistry};
use crate::config::Config;
use crate::constants;
use crate::endpoint::Endpoint;
use crate::peer::{negotiate, Connection, HandshakeParams, NonceRegistry, PeerError, PeerEvent, SharedTables};
use crate::protocol::external::types::ProtocolVersion;
use crate::protocol::external::{Codec, GetBlocks, Inventory, Locator, Message};
use crate::relay::{RelayCache, RequestTracker};
use crate::service::ChainView;

/// Announcements flowing from individual connections (or the RPC surface)
/// out to every other peer.
#[derive(Debug)]
pub enum NetworkEvent {
    AnnounceBlock { hash: block::Hash, origin: Option<SocketAddr> },
    AnnounceTransaction { hash: TxHash, origin: Option<SocketAddr> },
    RelayAlert { alert: Alert, origin: SocketAddr },
}

/// The peer set's view of one live connection.
struct PeerHandle {
    events: mpsc::UnboundedSender<PeerEvent>,
    version: ProtocolVersion,
    user_agent: String,
    inbound: bool,
    known_inventory: Arc<Mutex<HashSet<Inventory>>>,
}

struct Shared<C: ChainView> {
    config: Config,
    chain: Arc<C>,
    verifier: Arc<dyn Verifier + Send + Sync>,
    nonces: NonceRegistry,
    peers: Mutex<HashMap<SocketAddr, PeerHandle>>,
    relay: Arc<Mutex<RelayCache>>,
    requests: Arc<Mutex<RequestTracker>>,
    address_book: Arc<Mutex<AddressBook>>,
    alerts: Arc<Mutex<AlertRegistry>>,
    events_tx: mpsc::UnboundedSender<NetworkEvent>,
    /// True once any handshake has completed, gating the initial
    /// `getblocks` burst.
    synced_once: Mutex<bool>,
}

/// A cheap handle onto the running peer set, for the RPC surface and
/// other subsystems that inject work.
pub struct NetworkHandle {
    events: mpsc::UnboundedSender<NetworkEvent>,
    relay: Arc<Mutex<RelayCache>>,
    peers_snapshot: Arc<dyn Fn() -> Vec<(usize, bool)> + Send + Sync>,
    known_counter: Arc<dyn Fn(Inventory) -> (usize, usize) + Send + Sync>,
}

impl NetworkHandle {
    /// Announces a locally submitted transaction to every peer.
    pub fn announce_transaction(&self, tx: Arc<Transaction>) {
        let hash = tx.hash();
        self.relay.lock().expect("relay cache lock poisoned").insert(tx, Instant::now());
        let _ = self.events.send(NetworkEvent::AnnounceTransaction { hash, origin: None });
    }

    pub fn peer_count(&self) -> usize {
        (self.peers_snapshot)().len()
    }

    /// How many connected peers are known to hold `hash`, and how many
    /// peers there are. The census is windowed over the same two-minute
    /// table that rate-limits `getdata` requests: once no peer has shown
    /// knowledge of the hash within the window, the count reads zero.
    pub fn known_in_nodes(&self, hash: TxHash) -> (usize, usize) {
        (self.known_counter)(Inventory::Tx(hash))
    }
}

pub struct PeerSet<C: ChainView> {
    shared: Arc<Shared<C>>,
    events_rx: mpsc::UnboundedReceiver<NetworkEvent>,
}

impl<C: ChainView> PeerSet<C> {
    pub fn new(
        config: Config,
        chain: Arc<C>,
        verifier: Arc<dyn Verifier + Send + Sync>,
        address_book: AddressBook,
    ) -> PeerSet<C> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            config,
            chain,
            verifier,
            nonces: NonceRegistry::new(),
            peers: Mutex::new(HashMap::new()),
            relay: Arc::new(Mutex::new(RelayCache::new())),
            requests: Arc::new(Mutex::new(RequestTracker::new())),
            address_book: Arc::new(Mutex::new(address_book)),
            alerts: Arc::new(Mutex::new(AlertRegistry::new())),
            events_tx,
            synced_once: Mutex::new(false),
        });
        PeerSet { shared, events_rx }
    }

    pub fn handle(&self) -> NetworkHandle {
        let peers = self.shared.clone();
        let counter = self.shared.clone();
        NetworkHandle {
            events: self.shared.events_tx.clone(),
            relay: self.shared.relay.clone(),
            peers_snapshot: Arc::new(move || {
                peers
                    .peers
                    .lock()
                    .expect("peer table lock poisoned")
                    .values()
                    .map(|p| (p.version.0 as usize, p.inbound))
                    .collect()
            }),
            known_counter: Arc::new(move |inv| {
                let recent = {
                    let requests = counter.requests.lock().expect("request tracker lock poisoned");
                    requests.seen_within_window(&inv, Instant::now())
                };
                let peers = counter.peers.lock().expect("peer table lock poisoned");
                let total = peers.len();
                if !recent {
                    return (0, total);
                }
                let knowing = peers
                    .values()
                    .filter(|p| p.known_inventory.lock().expect("known inventory lock poisoned").contains(&inv))
                    .count();
                (knowing, total)
            }),
        }
    }

    /// Runs the listener, dialer, fan-out, and maintenance loops until
    /// `shutdown` flips to true. The endpoint pool is saved on the way
    /// out.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<(), std::io::Error> {
        let PeerSet { shared, mut events_rx } = self;

        let listener = TcpListener::bind(shared.config.listen_addr).await?;
        info!(addr = %shared.config.listen_addr, network = ?shared.config.network, "listening for peers");

        let accept_shared = shared.clone();
        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, addr)) => {
                        let banned = {
                            let book = accept_shared.address_book.lock().expect("address book lock poisoned");
                            book.is_banned(&addr.ip(), Utc::now())
                        };
                        if banned {
                            debug!(%addr, "refusing connection from a banned address");
                            continue;
                        }
                        let inbound_count = accept_shared
                            .peers
                            .lock()
                            .expect("peer table lock poisoned")
                            .values()
                            .filter(|p| p.inbound)
                            .count();
                        if inbound_count >= accept_shared.config.max_inbound {
                            debug!(%addr, "inbound slots full, dropping connection");
                            continue;
                        }
                        let span = info_span!("peer", %addr, dir = "in");
                        tokio::spawn(serve_peer(accept_shared.clone(), stream, addr, true).instrument(span));
                    }
                    Err(error) => {
                        warn!(%error, "accept failed");
                        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                    }
                }
            }
        });

        let dial_shared = shared.clone();
        let dial_shutdown = shutdown.clone();
        tokio::spawn(async move {
            let mut initial: Vec<SocketAddr> = dial_shared.config.initial_peers.clone();
            loop {
                if *dial_shutdown.borrow() {
                    return;
                }
                tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                let outbound_count = dial_shared
                    .peers
                    .lock()
                    .expect("peer table lock poisoned")
                    .values()
                    .filter(|p| !p.inbound)
                    .count();
                if outbound_count >= dial_shared.config.max_outbound {
                    continue;
                }
                let target = next_dial_target(&dial_shared, &mut initial);
                let addr = match target {
                    Some(addr) => addr,
                    None => continue,
                };
                debug!(%addr, "dialing");
                let attempt = dial(addr, dial_shared.config.proxy);
                match tokio::time::timeout(constants::CONNECT_TIMEOUT, attempt).await {
                    Ok(Ok(stream)) => {
                        let span = info_span!("peer", %addr, dir = "out");
                        tokio::spawn(serve_peer(dial_shared.clone(), stream, addr, false).instrument(span));
                    }
                    Ok(Err(error)) => debug!(%addr, %error, "connect failed"),
                    Err(_) => debug!(%addr, "connect timed out"),
                }
            }
        });

        let fanout_shared = shared.clone();
        tokio::spawn(async move {
            while let Some(event) = events_rx.recv().await {
                dispatch_event(&fanout_shared, event);
            }
        });

        let maintenance_shared = shared.clone();
        tokio::spawn(async move {
            let mut last_rebroadcast = Instant::now();
            loop {
                tokio::time::sleep(std::time::Duration::from_secs(60)).await;
                let now = Utc::now();
                {
                    let mut book = maintenance_shared.address_book.lock().expect("address book lock poisoned");
                    book.purge(now);
                    if let Err(error) = book.save() {
                        warn!(%error, "failed to persist the endpoint pool");
                    }
                }
                {
                    let mut relay = maintenance_shared.relay.lock().expect("relay cache lock poisoned");
                    relay.purge(Instant::now());
                }
                if last_rebroadcast.elapsed() >= constants::REBROADCAST_INTERVAL {
                    last_rebroadcast = Instant::now();
                    let hashes = {
                        let relay = maintenance_shared.relay.lock().expect("relay cache lock poisoned");
                        relay.hashes()
                    };
                    debug!(count = hashes.len(), "re-announcing cached transactions");
                    for hash in hashes {
                        let _ = maintenance_shared
                            .events_tx
                            .send(NetworkEvent::AnnounceTransaction { hash, origin: None });
                    }
                }
            }
        });

        // Park until shutdown, then persist the endpoint pool one last
        // time. Connection tasks notice their channels closing as the
        // runtime winds down.
        while !*shutdown.borrow() {
            if shutdown.changed().await.is_err() {
                break;
            }
        }
        let book = shared.address_book.lock().expect("address book lock poisoned");
        book.save()?;
        info!("peer engine stopped");
        Ok(())
    }
}

/// Connects to `addr` directly, or through the configured SOCKS4 proxy.
/// The proxy exchange is the classic 9-byte connect request (version 4,
/// command 1, port, IPv4 address, empty user) answered by an 8-byte reply
/// whose second byte grants (0x5A) or refuses the tunnel.
async fn dial(addr: SocketAddr, proxy: Option<SocketAddr>) -> std::io::Result<TcpStream> {
    use std::io::{Error, ErrorKind};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let proxy_addr = match proxy {
        None => return TcpStream::connect(addr).await,
        Some(proxy_addr) => proxy_addr,
    };
    let target = match addr.ip() {
        std::net::IpAddr::V4(v4) => v4,
        std::net::IpAddr::V6(_) => return Err(Error::new(ErrorKind::Unsupported, "the SOCKS4 proxy only carries IPv4")),
    };
    let mut stream = TcpStream::connect(proxy_addr).await?;
    let mut request = vec![4u8, 1u8];
    request.extend_from_slice(&addr.port().to_be_bytes());
    request.extend_from_slice(&target.octets());
    request.push(0);
    stream.write_all(&request).await?;
    let mut reply = [0u8; 8];
    stream.read_exact(&mut reply).await?;
    if reply[1] != 0x5A {
        return Err(Error::new(ErrorKind::ConnectionRefused, "proxy refused the connection"));
    }
    Ok(stream)
}

fn next_dial_target<C: ChainView>(shared: &Arc<Shared<C>>, initial: &mut Vec<SocketAddr>) -> Option<SocketAddr> {
    let peers = shared.peers.lock().expect("peer table lock poisoned");
    while let Some(addr) = initial.pop() {
        if !peers.contains_key(&addr) {
            return Some(addr);
        }
    }
    let now = Utc::now();
    let mut book = shared.address_book.lock().expect("address book lock poisoned");
    let candidate = book.select(now, &|endpoint| peers.contains_key(&endpoint.addr))?;
    book.record_attempt(&candidate, now);
    Some(candidate.addr)
}

fn dispatch_event<C: ChainView>(shared: &Arc<Shared<C>>, event: NetworkEvent) {
    let peers = shared.peers.lock().expect("peer table lock poisoned");
    match event {
        NetworkEvent::AnnounceBlock { hash, origin } => {
            for (addr, peer) in peers.iter() {
                if Some(*addr) != origin {
                    let _ = peer.events.send(PeerEvent::Announce(Inventory::Block(hash)));
                }
            }
        }
        NetworkEvent::AnnounceTransaction { hash, origin } => {
            for (addr, peer) in peers.iter() {
                if Some(*addr) != origin {
                    let _ = peer.events.send(PeerEvent::Announce(Inventory::Tx(hash)));
                }
            }
        }
        NetworkEvent::RelayAlert { alert, origin } => {
            let now = Utc::now();
            for (addr, peer) in peers.iter() {
                if *addr != origin && alert.applies_to(now, peer.version, &peer.user_agent) {
                    let _ = peer.events.send(PeerEvent::Send(Message::Alert(alert.clone())));
                }
            }
        }
    }
}

/// A protocol violation closes the connection *and* bans the address for
/// the misbehavior window; lesser failures just close.
fn ban_if_violation<C: ChainView>(shared: &Arc<Shared<C>>, addr: SocketAddr, error: &PeerError) {
    if error.is_protocol_violation() {
        let mut book = shared.address_book.lock().expect("address book lock poisoned");
        book.record_ban(addr.ip(), Utc::now());
    }
}

/// Handshakes and then serves one peer connection, registering it in the
/// peer table for its lifetime.
async fn serve_peer<C: ChainView>(shared: Arc<Shared<C>>, stream: TcpStream, addr: SocketAddr, inbound: bool) {
    let codec = Codec::builder()
        .for_network(shared.config.network)
        .with_metrics_label(addr.to_string())
        .finish();
    let mut framed = Framed::new(stream, codec);
    let params = HandshakeParams {
        user_agent: shared.config.user_agent.clone(),
        local_addr: shared.config.listen_addr,
        nonces: shared.nonces.clone(),
    };

    let handshake = negotiate(&mut framed, &params, addr, shared.chain.best_height());
    let peer_version = match tokio::time::timeout(constants::HANDSHAKE_TIMEOUT, handshake).await {
        Ok(Ok(version)) => version,
        Ok(Err(error)) => {
            debug!(%addr, %error, "handshake failed");
            ban_if_violation(&shared, addr, &error);
            return;
        }
        Err(_) => {
            debug!(%addr, "handshake timed out");
            return;
        }
    };

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let known_inventory = Arc::new(Mutex::new(HashSet::new()));
    {
        let mut peers = shared.peers.lock().expect("peer table lock poisoned");
        peers.insert(
            addr,
            PeerHandle {
                events: events_tx.clone(),
                version: peer_version.version,
                user_agent: peer_version.user_agent.clone(),
                inbound,
                known_inventory: known_inventory.clone(),
            },
        );
        metrics::gauge!("peers.connected", peers.len() as f64);
    }
    if !inbound {
        let endpoint = Endpoint::new(addr, peer_version.services, Utc::now());
        let mut book = shared.address_book.lock().expect("address book lock poisoned");
        book.record_seen(&endpoint, Utc::now());
    }

    // Post-handshake pushes ride the event channel so the connection loop
    // owns the socket from here on.
    let pool_is_small = {
        let book = shared.address_book.lock().expect("address book lock poisoned");
        book.len() < 1000
    };
    if peer_version.version.0 >= constants::GETADDR_VERSION || pool_is_small {
        let _ = events_tx.send(PeerEvent::Send(Message::GetAddr));
    }
    let first_sync = {
        let mut synced = shared.synced_once.lock().expect("sync flag lock poisoned");
        let first = !*synced;
        *synced = true;
        first
    };
    let peer_count = shared.peers.lock().expect("peer table lock poisoned").len();
    if first_sync || peer_count < 2 {
        let request = GetBlocks { locator: Locator(shared.chain.locator()), stop: None };
        let _ = events_tx.send(PeerEvent::Send(Message::GetBlocks(request)));
    }
    {
        let alerts = shared.alerts.lock().expect("alert registry lock poisoned");
        for alert in alerts.applicable(Utc::now(), peer_version.version, &peer_version.user_agent) {
            let _ = events_tx.send(PeerEvent::Send(Message::Alert(alert)));
        }
    }

    let tables = SharedTables {
        relay: shared.relay.clone(),
        requests: shared.requests.clone(),
        address_book: shared.address_book.clone(),
        alerts: shared.alerts.clone(),
    };
    let connection = Connection::new(
        addr,
        framed,
        shared.chain.clone(),
        peer_version,
        events_rx,
        shared.events_tx.clone(),
        tables,
        shared.verifier.clone(),
        known_inventory,
        rand::thread_rng().gen(),
    );
    match connection.run().await {
        Ok(()) => debug!(%addr, "peer disconnected"),
        Err(error) => {
            info!(%addr, %error, "closing peer connection");
            ban_if_violation(&shared, addr, &error);
        }
    }

    let mut peers = shared.peers.lock().expect("peer table lock poisoned");
    peers.remove(&addr);
    metrics::gauge!("peers.connected", peers.len() as f64);
}
