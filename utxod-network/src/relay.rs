//! Relay-side bookkeeping shared across peers: the recently-announced
//! transaction cache served to `getdata`, and the process-wide request
//! dedup table that keeps us from fetching the same inventory from many
//! peers at once.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use utxod_chain::transaction::{Hash as TxHash, Transaction};

use crate::constants::{RELAY_CACHE_TTL, REQUEST_DEDUP_WINDOW};
use crate::protocol::external::Inventory;

/// Transactions we have announced recently, kept long enough for peers to
/// come back with `getdata`. Confirmed transactions are served from the
/// block store instead, so this cache only holds loose transactions.
#[derive(Default)]
pub struct RelayCache {
    entries: HashMap<TxHash, (Arc<Transaction>, Instant)>,
}

impl RelayCache {
    pub fn new() -> RelayCache {
        RelayCache { entries: HashMap::new() }
    }

    pub fn insert(&mut self, tx: Arc<Transaction>, now: Instant) {
        self.entries.insert(tx.hash(), (tx, now));
        self.purge(now);
    }

    pub fn get(&self, hash: &TxHash) -> Option<Arc<Transaction>> {
        self.entries.get(hash).map(|(tx, _)| tx.clone())
    }

    /// Hashes still in the cache, for periodic re-announcement.
    pub fn hashes(&self) -> Vec<TxHash> {
        self.entries.keys().copied().collect()
    }

    pub fn purge(&mut self, now: Instant) {
        self.entries.retain(|_, (_, inserted)| now.duration_since(*inserted) < RELAY_CACHE_TTL);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The process-wide inventory rate-limit table: one outstanding `getdata`
/// per item per window, no matter how many peers advertise it. The same
/// window doubles as the recency horizon for the "known in N of M nodes"
/// maturity proxy, fed by every sighting of an item in peer traffic.
#[derive(Default)]
pub struct RequestTracker {
    next_allowed: HashMap<Inventory, Instant>,
    last_seen: HashMap<Inventory, Instant>,
}

impl RequestTracker {
    pub fn new() -> RequestTracker {
        RequestTracker { next_allowed: HashMap::new(), last_seen: HashMap::new() }
    }

    /// Whether `inv` may be requested at `now`; recording the request if
    /// so.
    pub fn should_request(&mut self, inv: Inventory, now: Instant) -> bool {
        match self.next_allowed.get(&inv) {
            Some(next) if now < *next => false,
            _ => {
                self.next_allowed.insert(inv, now + REQUEST_DEDUP_WINDOW);
                self.bound(now);
                true
            }
        }
    }

    /// Notes that a peer showed knowledge of `inv` (an `inv` entry, a
    /// `getdata` for it, or the object itself).
    pub fn note_seen(&mut self, inv: Inventory, now: Instant) {
        self.last_seen.insert(inv, now);
        self.bound(now);
    }

    /// Whether any peer showed knowledge of `inv` within the window.
    pub fn seen_within_window(&self, inv: &Inventory, now: Instant) -> bool {
        self.last_seen
            .get(inv)
            .map(|seen| now.duration_since(*seen) < REQUEST_DEDUP_WINDOW)
            .unwrap_or(false)
    }

    /// Bounds both tables; expired entries are useless anyway.
    fn bound(&mut self, now: Instant) {
        if self.next_allowed.len() > 50_000 {
            self.next_allowed.retain(|_, next| now < *next);
        }
        if self.last_seen.len() > 50_000 {
            self.last_seen.retain(|_, seen| now.duration_since(*seen) < REQUEST_DEDUP_WINDOW);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use utxod_chain::hash::Hash256;
    use utxod_test::fixtures;

    #[test]
    fn relay_cache_expires_entries() {
        let mut cache = RelayCache::new();
        let tx = Arc::new(fixtures::dummy_coinbase(1, 50_0000_0000));
        let start = Instant::now();
        cache.insert(tx.clone(), start);
        assert!(cache.get(&tx.hash()).is_some());
        cache.purge(start + RELAY_CACHE_TTL);
        assert!(cache.get(&tx.hash()).is_none());
    }

    #[test]
    fn repeat_requests_inside_the_window_are_suppressed() {
        let mut tracker = RequestTracker::new();
        let inv = Inventory::Tx(utxod_chain::transaction::Hash(Hash256::of(b"tx")));
        let start = Instant::now();
        assert!(tracker.should_request(inv, start));
        assert!(!tracker.should_request(inv, start + REQUEST_DEDUP_WINDOW / 2));
        assert!(tracker.should_request(inv, start + REQUEST_DEDUP_WINDOW));
    }

    #[test]
    fn sightings_age_out_with_the_window() {
        let mut tracker = RequestTracker::new();
        let inv = Inventory::Tx(utxod_chain::transaction::Hash(Hash256::of(b"tx")));
        let start = Instant::now();
        assert!(!tracker.seen_within_window(&inv, start));
        tracker.note_seen(inv, start);
        assert!(tracker.seen_within_window(&inv, start + REQUEST_DEDUP_WINDOW / 2));
        assert!(!tracker.seen_within_window(&inv, start + REQUEST_DEDUP_WINDOW));
    }
}
