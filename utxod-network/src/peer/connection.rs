//! The per-peer connection loop: parse incoming frames in order, dispatch
//! them, and drain the outbound inventory queue on a trickle timer.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::Utc;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::Framed;

use utxod_chain::block::CountedHeader;
use utxod_script::Verifier;

use crate::address_book::AddressBook;
use crate::alert::AlertRegistry;
use crate::constants;
use crate::endpoint::Endpoint;
use crate::peer_set::NetworkEvent;
use crate::protocol::external::types::Nonce;
use crate::protocol::external::{Codec, GetBlocks, Inventory, Locator, Message, Version};
use crate::relay::{RelayCache, RequestTracker};
use crate::service::{BlockSubmission, ChainView, TxSubmission};

use super::error::PeerError;

/// Instructions delivered to a connection from the rest of the node.
#[derive(Debug)]
pub enum PeerEvent {
    /// Queue an inventory announcement, subject to the trickle.
    Announce(Inventory),
    /// Send a message as-is.
    Send(Message),
}

/// One announcement waiting in the trickle queue.
struct Pending {
    inv: Inventory,
    ready_at: Instant,
}

/// Shared relay tables every connection consults.
pub struct SharedTables {
    pub relay: Arc<Mutex<RelayCache>>,
    pub requests: Arc<Mutex<RequestTracker>>,
    pub address_book: Arc<Mutex<AddressBook>>,
    pub alerts: Arc<Mutex<AlertRegistry>>,
}

impl Clone for SharedTables {
    fn clone(&self) -> SharedTables {
        SharedTables {
            relay: self.relay.clone(),
            requests: self.requests.clone(),
            address_book: self.address_book.clone(),
            alerts: self.alerts.clone(),
        }
    }
}

pub struct Connection<C: ChainView> {
    pub addr: SocketAddr,
    framed: Framed<TcpStream, Codec>,
    chain: Arc<C>,
    peer_version: Version,
    events: mpsc::UnboundedReceiver<PeerEvent>,
    network_events: mpsc::UnboundedSender<NetworkEvent>,
    tables: SharedTables,
    verifier: Arc<dyn Verifier + Send + Sync>,
    /// Inventory this peer is known to have, so we never announce an item
    /// back to its source. Shared with the peer set, which uses it as the
    /// "known in N of M nodes" maturity proxy for unconfirmed transactions.
    known_inventory: Arc<Mutex<HashSet<Inventory>>>,
    queue: Vec<Pending>,
    /// Per-session salt for the deterministic trickle delay.
    trickle_salt: u64,
    last_recv: Instant,
}

impl<C: ChainView> Connection<C> {
    pub fn new(
        addr: SocketAddr,
        framed: Framed<TcpStream, Codec>,
        chain: Arc<C>,
        peer_version: Version,
        events: mpsc::UnboundedReceiver<PeerEvent>,
        network_events: mpsc::UnboundedSender<NetworkEvent>,
        tables: SharedTables,
        verifier: Arc<dyn Verifier + Send + Sync>,
        known_inventory: Arc<Mutex<HashSet<Inventory>>>,
        trickle_salt: u64,
    ) -> Connection<C> {
        Connection {
            addr,
            framed,
            chain,
            peer_version,
            events,
            network_events,
            tables,
            verifier,
            known_inventory,
            queue: Vec::new(),
            trickle_salt,
            last_recv: Instant::now(),
        }
    }

    /// Runs the connection to completion. Any error closes the socket;
    /// `Ok` means the remote hung up or the node is shutting down.
    pub async fn run(mut self) -> Result<(), PeerError> {
        let mut trickle = tokio::time::interval(constants::TRICKLE_INTERVAL);
        let mut ping = tokio::time::interval(constants::PING_INTERVAL);
        loop {
            tokio::select! {
                frame = self.framed.next() => match frame {
                    Some(Ok(message)) => {
                        self.last_recv = Instant::now();
                        self.handle(message).await?;
                    }
                    Some(Err(error)) => return Err(error.into()),
                    None => return Ok(()),
                },
                event = self.events.recv() => match event {
                    Some(PeerEvent::Announce(inv)) => self.enqueue(inv),
                    Some(PeerEvent::Send(message)) => self.framed.send(message).await?,
                    None => return Ok(()),
                },
                _ = trickle.tick() => self.flush_queue().await?,
                _ = ping.tick() => self.heartbeat().await?,
            }
        }
    }

    async fn handle(&mut self, message: Message) -> Result<(), PeerError> {
        trace!(peer = %self.addr, %message, "dispatching");
        match message {
            Message::Version(_) => return Err(PeerError::DuplicateVersion),
            Message::Verack => {}
            Message::Ping(nonce) => self.framed.send(Message::Pong(nonce)).await?,
            Message::Pong(_) => {}
            Message::Reject { message, reason, .. } => {
                debug!(peer = %self.addr, command = %message, %reason, "peer rejected one of our messages");
            }
            Message::GetAddr => {
                let sample = {
                    let book = self.tables.address_book.lock().expect("address book lock poisoned");
                    book.sample(constants::MAX_ADDR_PER_MESSAGE)
                };
                self.framed.send(Message::Addr(sample)).await?;
            }
            Message::Addr(addrs) => {
                let now = Utc::now();
                let mut book = self.tables.address_book.lock().expect("address book lock poisoned");
                for endpoint in addrs {
                    book.insert(endpoint, now);
                }
            }
            Message::Inv(items) => self.handle_inv(items).await?,
            Message::GetData(items) => self.handle_getdata(items).await?,
            Message::GetBlocks(request) => {
                let hashes = self.chain.block_hashes_after(
                    &request.locator.0,
                    request.stop,
                    constants::MAX_BLOCKS_IN_RESPONSE,
                );
                if !hashes.is_empty() {
                    let items: Vec<Inventory> = hashes.into_iter().map(Inventory::Block).collect();
                    self.framed.send(Message::Inv(items)).await?;
                }
            }
            Message::GetHeaders(request) => {
                let headers = self
                    .chain
                    .headers_after(&request.locator.0, request.stop, constants::MAX_HEADERS_IN_RESPONSE)
                    .into_iter()
                    .map(|header| CountedHeader { header, transaction_count: 0 })
                    .collect();
                self.framed.send(Message::Headers(headers)).await?;
            }
            // We fetch full blocks via getblocks/getdata; header-only
            // announcements carry nothing we act on.
            Message::Headers(_) => {}
            Message::Block(block) => self.handle_block(block).await?,
            Message::Tx(tx) => self.handle_tx(tx).await?,
            Message::Alert(alert) => {
                let accepted = {
                    let mut alerts = self.tables.alerts.lock().expect("alert registry lock poisoned");
                    alerts.insert(alert.clone(), self.verifier.as_ref(), Utc::now())
                };
                if accepted {
                    let _ = self.network_events.send(NetworkEvent::RelayAlert { alert, origin: self.addr });
                }
            }
        }
        Ok(())
    }

    async fn handle_inv(&mut self, items: Vec<Inventory>) -> Result<(), PeerError> {
        let mut wanted = Vec::new();
        let now = Instant::now();
        for inv in items {
            self.mark_known(inv);
            {
                let mut requests = self.tables.requests.lock().expect("request tracker lock poisoned");
                requests.note_seen(inv, now);
            }
            let missing = match inv {
                Inventory::Block(hash) => !self.chain.has_block(&hash),
                Inventory::Tx(hash) => !self.chain.has_transaction(&hash),
                Inventory::Error => false,
            };
            if !missing {
                continue;
            }
            let allowed = {
                let mut requests = self.tables.requests.lock().expect("request tracker lock poisoned");
                requests.should_request(inv, now)
            };
            if allowed {
                wanted.push(inv);
            }
        }
        if !wanted.is_empty() {
            debug!(peer = %self.addr, count = wanted.len(), "requesting advertised inventory");
            self.framed.send(Message::GetData(wanted)).await?;
        }
        Ok(())
    }

    async fn handle_getdata(&mut self, items: Vec<Inventory>) -> Result<(), PeerError> {
        for inv in items {
            match inv {
                Inventory::Block(hash) => {
                    if let Some(block) = self.chain.fetch_block(&hash) {
                        self.framed.send(Message::Block(Arc::new(block))).await?;
                    }
                }
                Inventory::Tx(hash) => {
                    // A peer asking for a transaction will hold it shortly;
                    // that counts as a sighting for the maturity proxy.
                    {
                        let mut requests = self.tables.requests.lock().expect("request tracker lock poisoned");
                        requests.note_seen(inv, Instant::now());
                    }
                    let cached = {
                        let relay = self.tables.relay.lock().expect("relay cache lock poisoned");
                        relay.get(&hash)
                    };
                    let tx = cached.or_else(|| self.chain.fetch_transaction(&hash).map(Arc::new));
                    if let Some(tx) = tx {
                        self.framed.send(Message::Tx(tx)).await?;
                    }
                }
                Inventory::Error => {}
            }
        }
        Ok(())
    }

    async fn handle_block(&mut self, block: Arc<utxod_chain::block::Block>) -> Result<(), PeerError> {
        let hash = block.hash();
        self.mark_known(Inventory::Block(hash));
        match self.chain.submit_block(block) {
            BlockSubmission::Connected => {
                let _ = self.network_events.send(NetworkEvent::AnnounceBlock { hash, origin: Some(self.addr) });
            }
            BlockSubmission::Stored => {}
            BlockSubmission::Orphan { missing_root } => {
                // Ask the origin peer to fill the gap between our best
                // chain and the orphan's earliest known ancestor.
                let request = GetBlocks { locator: Locator(self.chain.locator()), stop: Some(missing_root) };
                self.framed.send(Message::GetBlocks(request)).await?;
            }
            BlockSubmission::Rejected { ccode, reason } => {
                debug!(peer = %self.addr, %hash, %reason, "rejected block");
                self.framed
                    .send(Message::Reject { message: "block".to_owned(), ccode, reason, data: Some(hash.0) })
                    .await?;
            }
        }
        Ok(())
    }

    async fn handle_tx(&mut self, tx: Arc<utxod_chain::transaction::Transaction>) -> Result<(), PeerError> {
        let hash = tx.hash();
        self.mark_known(Inventory::Tx(hash));
        {
            let mut requests = self.tables.requests.lock().expect("request tracker lock poisoned");
            requests.note_seen(Inventory::Tx(hash), Instant::now());
        }
        match self.chain.submit_transaction(tx.clone()) {
            TxSubmission::Accepted { also_accepted } => {
                let now = Instant::now();
                {
                    let mut relay = self.tables.relay.lock().expect("relay cache lock poisoned");
                    relay.insert(tx, now);
                    for other in also_accepted.iter() {
                        if let Some(unlocked) = self.chain.fetch_transaction(other) {
                            relay.insert(Arc::new(unlocked), now);
                        }
                    }
                }
                let _ = self.network_events.send(NetworkEvent::AnnounceTransaction { hash, origin: Some(self.addr) });
                for other in also_accepted {
                    let _ = self.network_events.send(NetworkEvent::AnnounceTransaction { hash: other, origin: Some(self.addr) });
                }
            }
            TxSubmission::Orphan => {
                debug!(peer = %self.addr, %hash, "transaction buffered as an orphan, not relayed");
            }
            TxSubmission::Rejected { ccode, reason } => {
                debug!(peer = %self.addr, %hash, %reason, "rejected transaction");
                self.framed
                    .send(Message::Reject { message: "tx".to_owned(), ccode, reason, data: Some(hash.0 .0) })
                    .await?;
            }
        }
        Ok(())
    }

    /// Queues an announcement. Blocks go out on the next trickle tick;
    /// three quarters of transactions wait out a deterministic delay
    /// derived from the hash and a per-session salt, so the timing of our
    /// announcements does not fingerprint our pool.
    fn enqueue(&mut self, inv: Inventory) {
        if self.is_known(inv) {
            return;
        }
        let ready_at = match inv {
            Inventory::Tx(hash) => {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(&hash.0 .0[..8]);
                let mixed = u64::from_le_bytes(raw) ^ self.trickle_salt;
                if mixed % 4 == 0 {
                    Instant::now()
                } else {
                    let delay_ms = (mixed >> 2) % constants::TRICKLE_MAX_DELAY.as_millis() as u64;
                    Instant::now() + std::time::Duration::from_millis(delay_ms)
                }
            }
            _ => Instant::now(),
        };
        self.queue.push(Pending { inv, ready_at });
    }

    async fn flush_queue(&mut self) -> Result<(), PeerError> {
        if self.queue.is_empty() {
            return Ok(());
        }
        let now = Instant::now();
        let mut due = Vec::new();
        let mut waiting = Vec::new();
        for pending in self.queue.drain(..) {
            if pending.ready_at <= now && due.len() < constants::MAX_INV_PER_MESSAGE {
                due.push(pending.inv);
            } else {
                waiting.push(pending);
            }
        }
        self.queue = waiting;
        due.retain(|inv| !self.is_known(*inv));
        if !due.is_empty() {
            for inv in due.iter() {
                self.mark_known(*inv);
            }
            self.framed.send(Message::Inv(due)).await?;
        }
        Ok(())
    }

    fn mark_known(&self, inv: Inventory) {
        self.known_inventory.lock().expect("known inventory lock poisoned").insert(inv);
    }

    fn is_known(&self, inv: Inventory) -> bool {
        self.known_inventory.lock().expect("known inventory lock poisoned").contains(&inv)
    }

    /// Fires on the ping interval: cut off a silent peer, probe a quiet
    /// one, and refresh the endpoint pool's sighting of it.
    async fn heartbeat(&mut self) -> Result<(), PeerError> {
        if self.last_recv.elapsed() > constants::INACTIVITY_TIMEOUT {
            return Err(PeerError::Inactivity);
        }
        {
            let endpoint = Endpoint::new(self.addr, self.peer_version.services, Utc::now());
            let mut book = self.tables.address_book.lock().expect("address book lock poisoned");
            book.record_seen(&endpoint, Utc::now());
        }
        self.framed.send(Message::Ping(Nonce::random())).await?;
        Ok(())
    }
}
