//! The persistent endpoint pool: every peer address this node has heard
//! of, scored for outbound candidate selection.

use std::collections::HashMap;
use std::io::Write;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};

use utxod_chain::serialization::{DecodeInto, Encode};

use crate::constants::{ENDPOINT_PURGE_AGE, MISBEHAVIOR_BAN_WINDOW};
use crate::endpoint::Endpoint;

/// Endpoints claiming to have been seen further in the future than this
/// are dropped as nonsense.
const MAX_FUTURE_DRIFT: i64 = 10 * 60;

/// One purge pass removes at most this many endpoints, amortizing the
/// work across passes.
const MAX_PURGE_PER_PASS: usize = 200;

pub struct AddressBook {
    entries: HashMap<[u8; 18], Endpoint>,
    /// Addresses refused until the recorded time, for protocol violations.
    /// Keyed by IP because inbound offenders arrive on ephemeral ports.
    /// In-memory only: the ban is transient and does not survive a restart.
    bans: HashMap<IpAddr, DateTime<Utc>>,
    path: Option<PathBuf>,
}

impl AddressBook {
    pub fn new() -> AddressBook {
        AddressBook { entries: HashMap::new(), bans: HashMap::new(), path: None }
    }

    /// Loads (or starts) the pool backed by `path`, conventionally
    /// `addr.dat` under the data directory.
    pub fn open(path: impl AsRef<Path>) -> std::io::Result<AddressBook> {
        let path = path.as_ref().to_path_buf();
        let mut entries = HashMap::new();
        match std::fs::read(&path) {
            Ok(bytes) => {
                let endpoints: Vec<Endpoint> = bytes
                    .decode_into()
                    .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidData, "corrupt endpoint pool file"))?;
                for endpoint in endpoints {
                    entries.insert(endpoint.key(), endpoint);
                }
            }
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
            Err(error) => return Err(error),
        }
        info!(endpoints = entries.len(), "loaded endpoint pool");
        Ok(AddressBook { entries, bans: HashMap::new(), path: Some(path) })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Records a gossiped endpoint: unroutable and far-future entries are
    /// dropped, stale claims are clamped, and a known endpoint's last-seen
    /// time only moves forward.
    pub fn insert(&mut self, mut endpoint: Endpoint, now: DateTime<Utc>) -> bool {
        if !endpoint.is_routable() {
            return false;
        }
        if endpoint.last_seen > now + Duration::seconds(MAX_FUTURE_DRIFT) {
            return false;
        }
        if endpoint.last_seen > now {
            endpoint.last_seen = now;
        }
        match self.entries.get_mut(&endpoint.key()) {
            Some(existing) => {
                if endpoint.last_seen > existing.last_seen {
                    existing.last_seen = endpoint.last_seen;
                    existing.services = endpoint.services;
                }
                false
            }
            None => {
                self.entries.insert(endpoint.key(), endpoint);
                metrics::gauge!("endpoint_pool.size", self.entries.len() as f64);
                true
            }
        }
    }

    /// Notes an attempt (successful or not) to dial `endpoint`.
    pub fn record_attempt(&mut self, endpoint: &Endpoint, now: DateTime<Utc>) {
        self.entries.entry(endpoint.key()).or_insert(*endpoint).last_try = now;
    }

    /// Notes traffic from a connected peer, refreshing its last-seen time.
    pub fn record_seen(&mut self, endpoint: &Endpoint, now: DateTime<Utc>) {
        self.entries.entry(endpoint.key()).or_insert(*endpoint).last_seen = now;
    }

    /// Bans `ip` for the misbehavior window: it is neither dialed nor
    /// accepted until the window lapses.
    pub fn record_ban(&mut self, ip: IpAddr, now: DateTime<Utc>) {
        let until = now + Duration::from_std(MISBEHAVIOR_BAN_WINDOW).expect("ban window fits in a chrono duration");
        warn!(%ip, %until, "banning address after a protocol violation");
        self.bans.insert(ip, until);
    }

    pub fn is_banned(&self, ip: &IpAddr, now: DateTime<Utc>) -> bool {
        self.bans.get(ip).map(|until| now < *until).unwrap_or(false)
    }

    /// The best outbound candidate at `now`: the highest-scoring routable
    /// endpoint whose retry backoff has elapsed, excluding `connected` and
    /// anything currently banned.
    pub fn select(&self, now: DateTime<Utc>, connected: &dyn Fn(&Endpoint) -> bool) -> Option<Endpoint> {
        self.entries
            .values()
            .filter(|e| e.is_routable() && e.ready_for_retry(now) && !self.is_banned(&e.addr.ip(), now) && !connected(e))
            .max_by_key(|e| e.score(now))
            .copied()
    }

    /// Up to `limit` endpoints for answering `getaddr`, freshest first.
    pub fn sample(&self, limit: usize) -> Vec<Endpoint> {
        let mut endpoints: Vec<Endpoint> = self.entries.values().copied().collect();
        endpoints.sort_by_key(|e| std::cmp::Reverse(e.last_seen));
        endpoints.truncate(limit);
        endpoints
    }

    /// Drops endpoints unseen for two weeks, bounded per pass, and forgets
    /// expired bans.
    pub fn purge(&mut self, now: DateTime<Utc>) -> usize {
        self.bans.retain(|_, until| now < *until);
        let cutoff = now - Duration::from_std(ENDPOINT_PURGE_AGE).expect("purge age fits in a chrono duration");
        let stale: Vec<[u8; 18]> = self
            .entries
            .iter()
            .filter(|(_, e)| e.last_seen < cutoff)
            .map(|(k, _)| *k)
            .take(MAX_PURGE_PER_PASS)
            .collect();
        for key in stale.iter() {
            self.entries.remove(key);
        }
        if !stale.is_empty() {
            debug!(purged = stale.len(), "purged stale endpoints");
        }
        stale.len()
    }

    /// Writes the pool back to its backing file.
    pub fn save(&self) -> std::io::Result<()> {
        let path = match &self.path {
            Some(path) => path,
            None => return Ok(()),
        };
        let endpoints: Vec<Endpoint> = self.entries.values().copied().collect();
        let bytes = endpoints.encode_to_vec()?;
        let mut file = std::fs::File::create(path)?;
        file.write_all(&bytes)?;
        file.flush()
    }
}

impl Default for AddressBook {
    fn default() -> AddressBook {
        AddressBook::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    use crate::protocol::external::types::PeerServices;

    fn endpoint(addr: &str, seen: i64) -> Endpoint {
        Endpoint::new(addr.parse().unwrap(), PeerServices::NODE_NETWORK, Utc.timestamp(seen, 0))
    }

    #[test]
    fn far_future_endpoints_are_dropped() {
        let now = Utc.timestamp(1_600_000_000, 0);
        let mut book = AddressBook::new();
        assert!(!book.insert(endpoint("203.0.113.6:8333", 1_600_001_000), now));
        // Slightly-ahead timestamps are clamped instead.
        assert!(book.insert(endpoint("203.0.113.7:8333", 1_600_000_100), now));
        assert_eq!(book.len(), 1);
    }

    #[test]
    fn unroutable_endpoints_never_enter() {
        let now = Utc.timestamp(1_600_000_000, 0);
        let mut book = AddressBook::new();
        assert!(!book.insert(endpoint("10.0.0.1:8333", 1_599_999_000), now));
        assert!(book.is_empty());
    }

    #[test]
    fn purge_removes_two_week_old_entries() {
        let now = Utc.timestamp(1_600_000_000, 0);
        let mut book = AddressBook::new();
        book.insert(endpoint("203.0.113.6:8333", 1_599_999_000), now);
        let later = now + Duration::days(15);
        assert_eq!(book.purge(later), 1);
        assert!(book.is_empty());
    }

    #[test]
    fn bans_refuse_an_address_until_the_window_lapses() {
        let now = Utc.timestamp(1_600_000_000, 0);
        let mut book = AddressBook::new();
        let ep = endpoint("203.0.113.6:8333", 1_599_999_000);
        book.insert(ep, now);
        book.record_ban(ep.addr.ip(), now);

        assert!(book.is_banned(&ep.addr.ip(), now));
        assert!(book.select(now, &|_| false).is_none());

        // Past the window the ban lapses, and a purge forgets it entirely.
        let later = now + Duration::from_std(MISBEHAVIOR_BAN_WINDOW).unwrap();
        assert!(!book.is_banned(&ep.addr.ip(), later));
        book.purge(later);
        assert_eq!(book.select(later, &|_| false).unwrap().addr, ep.addr);
    }

    #[test]
    fn pool_round_trips_through_its_file() {
        let dir = tempdir::TempDir::new("utxod-addrbook").unwrap();
        let path = dir.path().join("addr.dat");
        let now = Utc.timestamp(1_600_000_000, 0);
        {
            let mut book = AddressBook::open(&path).unwrap();
            book.insert(endpoint("203.0.113.6:8333", 1_599_999_000), now);
            book.save().unwrap();
        }
        let book = AddressBook::open(&path).unwrap();
        assert_eq!(book.len(), 1);
    }
}
