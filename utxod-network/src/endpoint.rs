//! A known peer address with the bookkeeping the dialer scores it by.

use std::io::{Read, Write};
use std::net::{IpAddr, SocketAddr};

use chrono::{DateTime, Duration, TimeZone, Utc};

use utxod_chain::serialization::{CodecError, Decode, Encode};

use crate::protocol::external::types::PeerServices;

/// One known peer address. The wire form (an `addr` entry) carries the
/// last-seen time, services, address, and port; the last-try time is local
/// bookkeeping and travels only through the endpoint pool's own file.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Endpoint {
    pub addr: SocketAddr,
    pub services: PeerServices,
    pub last_seen: DateTime<Utc>,
    pub last_try: DateTime<Utc>,
}

impl Endpoint {
    pub fn new(addr: SocketAddr, services: PeerServices, last_seen: DateTime<Utc>) -> Endpoint {
        Endpoint { addr, services, last_seen, last_try: Utc.timestamp(0, 0) }
    }

    /// The pool key: 16 address bytes (IPv4 mapped into IPv6) plus the
    /// big-endian port.
    pub fn key(&self) -> [u8; 18] {
        let mut key = [0u8; 18];
        let octets = match self.addr.ip() {
            IpAddr::V4(v4) => v4.to_ipv6_mapped().octets(),
            IpAddr::V6(v6) => v6.octets(),
        };
        key[..16].copy_from_slice(&octets);
        key[16..].copy_from_slice(&self.addr.port().to_be_bytes());
        key
    }

    /// Whether this address is worth dialing from the open internet.
    pub fn is_routable(&self) -> bool {
        match self.addr.ip() {
            IpAddr::V4(v4) => !(v4.is_loopback() || v4.is_private() || v4.is_unspecified() || v4.is_broadcast() || v4.is_link_local()),
            // Outbound connections are IPv4-only for now; v6 entries are
            // stored but never selected.
            IpAddr::V6(v6) => v6.to_ipv4().map(|v4| Endpoint { addr: SocketAddr::new(IpAddr::V4(v4), self.addr.port()), ..*self }.is_routable()).unwrap_or(false),
        }
    }

    /// The dialer's ranking: prefer endpoints not tried recently, demote
    /// endpoints not seen recently, and break ties with a deterministic
    /// jitter so the whole network does not dial the same peer first.
    pub fn score(&self, now: DateTime<Utc>) -> i64 {
        let since_try = (now - self.last_try).num_seconds().clamp(0, 24 * 60 * 60);
        let since_seen = (now - self.last_seen).num_seconds().max(0);
        since_try - since_seen - self.jitter()
    }

    fn jitter(&self) -> i64 {
        let key = self.key();
        let mut acc: u64 = self.last_try.timestamp() as u64;
        for byte in key.iter() {
            acc = acc.wrapping_mul(0x100000001b3).wrapping_add(*byte as u64);
        }
        (acc % 30 * 60) as i64
    }

    /// Whether enough time has passed since the last attempt: ten minutes
    /// right after a sighting, growing with the square root of the
    /// staleness for addresses we have not seen in a while.
    pub fn ready_for_retry(&self, now: DateTime<Utc>) -> bool {
        let since_try = now - self.last_try;
        let since_seen = (now - self.last_seen).num_seconds().max(0) as f64;
        let backoff_secs = if since_seen < 60.0 * 60.0 {
            10.0 * 60.0
        } else {
            3600.0 * (since_seen / 3600.0).sqrt()
        };
        since_try >= Duration::seconds(backoff_secs as i64)
    }
}

impl Encode for Endpoint {
    fn encode<W: Write>(&self, mut target: W) -> std::io::Result<()> {
        self.last_seen.encode(&mut target)?;
        self.services.encode(&mut target)?;
        self.addr.encode(&mut target)
    }
}

impl Decode for Endpoint {
    fn decode<R: Read>(mut target: R) -> Result<Self, CodecError> {
        Ok(Endpoint {
            last_seen: DateTime::<Utc>::decode(&mut target)?,
            services: PeerServices::decode(&mut target)?,
            addr: SocketAddr::decode(&mut target)?,
            last_try: Utc.timestamp(0, 0),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use utxod_chain::serialization::DecodeInto;

    fn endpoint(addr: &str) -> Endpoint {
        Endpoint::new(addr.parse().unwrap(), PeerServices::NODE_NETWORK, Utc.timestamp(1_600_000_000, 0))
    }

    #[test]
    fn wire_form_round_trips() {
        let ep = endpoint("203.0.113.6:8333");
        let bytes = ep.encode_to_vec().unwrap();
        // time + services + 16-byte address + port
        assert_eq!(bytes.len(), 4 + 8 + 16 + 2);
        let back = bytes.decode_into::<Endpoint>().unwrap();
        assert_eq!(back.addr, ep.addr);
        assert_eq!(back.last_seen, ep.last_seen);
    }

    #[test]
    fn private_addresses_are_not_routable() {
        assert!(!endpoint("192.168.1.5:8333").is_routable());
        assert!(!endpoint("127.0.0.1:8333").is_routable());
        assert!(endpoint("203.0.113.6:8333").is_routable());
    }

    #[test]
    fn untried_endpoints_outscore_just_tried_ones() {
        let now = Utc.timestamp(1_600_010_000, 0);
        let fresh = endpoint("203.0.113.6:8333");
        let mut tried = endpoint("203.0.113.7:8333");
        tried.last_try = now;
        assert!(fresh.score(now) > tried.score(now));
    }

    #[test]
    fn retry_backoff_grows_with_staleness() {
        let seen = Utc.timestamp(1_600_000_000, 0);
        let mut ep = endpoint("203.0.113.6:8333");
        ep.last_try = seen;
        // Eleven minutes after a fresh sighting: ready again.
        ep.last_seen = seen;
        assert!(ep.ready_for_retry(seen + Duration::minutes(11)));
        // Seen four hours ago: the backoff is two hours, so one hour is
        // not enough.
        ep.last_seen = seen - Duration::hours(4);
        assert!(!ep.ready_for_retry(seen + Duration::hours(1)));
    }
}
