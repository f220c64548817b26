//! Signed operator alerts: out-of-band notices gated by a fixed authority
//! key, relayed only to peers the alert says it applies to.

use std::collections::HashMap;
use std::io::{Read, Write};

use chrono::{DateTime, TimeZone, Utc};

use utxod_chain::hash::Hash256;
use utxod_chain::serialization::{CodecError, Decode, DecodeInto, Encode};
use utxod_script::Verifier;

use crate::protocol::external::types::ProtocolVersion;

/// The authority public key alerts must be signed by. A deployment bakes
/// its own key in here; the all-zero placeholder verifies nothing.
pub const ALERT_AUTHORITY_KEY: [u8; 33] = [0u8; 33];

/// The signed body of an alert.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AlertPayload {
    pub version: i32,
    /// Stop relaying after this time.
    pub relay_until: DateTime<Utc>,
    /// Stop displaying after this time.
    pub expiration: DateTime<Utc>,
    pub id: i32,
    /// All alerts with ids at or below this are cancelled.
    pub cancel: i32,
    pub set_cancel: Vec<i32>,
    pub min_version: ProtocolVersion,
    pub max_version: ProtocolVersion,
    /// When non-empty, only peers with one of these user agents apply.
    pub set_sub_version: Vec<String>,
    pub priority: i32,
    pub comment: String,
    pub status_bar: String,
    pub reserved: String,
}

impl Encode for AlertPayload {
    fn encode<W: Write>(&self, mut target: W) -> std::io::Result<()> {
        self.version.encode(&mut target)?;
        self.relay_until.timestamp().encode(&mut target)?;
        self.expiration.timestamp().encode(&mut target)?;
        self.id.encode(&mut target)?;
        self.cancel.encode(&mut target)?;
        self.set_cancel.encode(&mut target)?;
        self.min_version.encode(&mut target)?;
        self.max_version.encode(&mut target)?;
        self.set_sub_version.encode(&mut target)?;
        self.priority.encode(&mut target)?;
        self.comment.encode(&mut target)?;
        self.status_bar.encode(&mut target)?;
        self.reserved.encode(&mut target)
    }
}

impl Decode for AlertPayload {
    fn decode<R: Read>(mut target: R) -> Result<Self, CodecError> {
        Ok(AlertPayload {
            version: i32::decode(&mut target)?,
            relay_until: Utc.timestamp(i64::decode(&mut target)?, 0),
            expiration: Utc.timestamp(i64::decode(&mut target)?, 0),
            id: i32::decode(&mut target)?,
            cancel: i32::decode(&mut target)?,
            set_cancel: Vec::decode(&mut target)?,
            min_version: ProtocolVersion::decode(&mut target)?,
            max_version: ProtocolVersion::decode(&mut target)?,
            set_sub_version: Vec::decode(&mut target)?,
            priority: i32::decode(&mut target)?,
            comment: String::decode(&mut target)?,
            status_bar: String::decode(&mut target)?,
            reserved: String::decode(&mut target)?,
        })
    }
}

/// An alert as it travels: the serialized payload (the exact bytes the
/// signature covers) plus the signature.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Alert {
    pub signed_bytes: Vec<u8>,
    pub signature: Vec<u8>,
}

impl Alert {
    pub fn payload(&self) -> Result<AlertPayload, CodecError> {
        self.signed_bytes.decode_into()
    }

    /// Checks the authority signature over the payload bytes. Signature
    /// verification goes through the same injected seam the script
    /// interpreter uses, so this crate carries no curve arithmetic.
    pub fn verify(&self, verifier: &dyn Verifier) -> bool {
        let digest = Hash256::of(&self.signed_bytes);
        verifier.verify(&ALERT_AUTHORITY_KEY, &self.signature, &digest.0)
    }

    /// Whether this alert should be relayed to a peer with the given
    /// version and user agent at `now`.
    pub fn applies_to(&self, now: DateTime<Utc>, peer_version: ProtocolVersion, peer_sub_version: &str) -> bool {
        let payload = match self.payload() {
            Ok(payload) => payload,
            Err(_) => return false,
        };
        if now >= payload.relay_until {
            return false;
        }
        if !(payload.min_version..=payload.max_version).contains(&peer_version) {
            return false;
        }
        payload.set_sub_version.is_empty() || payload.set_sub_version.iter().any(|sv| sv == peer_sub_version)
    }
}

impl Encode for Alert {
    fn encode<W: Write>(&self, mut target: W) -> std::io::Result<()> {
        self.signed_bytes.encode(&mut target)?;
        self.signature.encode(&mut target)
    }
}
impl Decode for Alert {
    fn decode<R: Read>(mut target: R) -> Result<Self, CodecError> {
        Ok(Alert { signed_bytes: Vec::decode(&mut target)?, signature: Vec::decode(&mut target)? })
    }
}

/// The set of alerts currently in effect, keyed by id, with cancellations
/// applied.
#[derive(Default)]
pub struct AlertRegistry {
    alerts: HashMap<i32, Alert>,
}

impl AlertRegistry {
    pub fn new() -> AlertRegistry {
        AlertRegistry { alerts: HashMap::new() }
    }

    /// Validates and stores `alert`. Returns `true` if it is new and worth
    /// relaying.
    pub fn insert(&mut self, alert: Alert, verifier: &dyn Verifier, now: DateTime<Utc>) -> bool {
        if !alert.verify(verifier) {
            debug!("dropping alert with a bad authority signature");
            return false;
        }
        let payload = match alert.payload() {
            Ok(payload) => payload,
            Err(_) => return false,
        };
        if now >= payload.expiration {
            return false;
        }
        if self.is_cancelled(payload.id) || self.alerts.contains_key(&payload.id) {
            return false;
        }
        // Apply this alert's cancellations before storing it.
        self.alerts.retain(|id, _| *id > payload.cancel && !payload.set_cancel.contains(id));
        warn!(id = payload.id, status = %payload.status_bar, "operator alert in effect");
        self.alerts.insert(payload.id, alert);
        true
    }

    fn is_cancelled(&self, id: i32) -> bool {
        self.alerts.values().any(|alert| match alert.payload() {
            Ok(payload) => id <= payload.cancel || payload.set_cancel.contains(&id),
            Err(_) => false,
        })
    }

    /// Alerts that should be offered to a newly connected peer.
    pub fn applicable(&self, now: DateTime<Utc>, peer_version: ProtocolVersion, peer_sub_version: &str) -> Vec<Alert> {
        self.alerts
            .values()
            .filter(|alert| alert.applies_to(now, peer_version, peer_sub_version))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AcceptAll;
    impl Verifier for AcceptAll {
        fn verify(&self, _pubkey: &[u8], _signature: &[u8], _message: &[u8; 32]) -> bool {
            true
        }
    }

    fn alert(id: i32, cancel: i32, relay_until: i64) -> Alert {
        let payload = AlertPayload {
            version: 1,
            relay_until: Utc.timestamp(relay_until, 0),
            expiration: Utc.timestamp(relay_until + 3600, 0),
            id,
            cancel,
            set_cancel: Vec::new(),
            min_version: ProtocolVersion(0),
            max_version: ProtocolVersion(u32::MAX),
            set_sub_version: Vec::new(),
            priority: 1,
            comment: String::new(),
            status_bar: format!("alert {}", id),
            reserved: String::new(),
        };
        Alert { signed_bytes: payload.encode_to_vec().unwrap(), signature: vec![0x30, 0x01] }
    }

    #[test]
    fn payload_round_trips_through_signed_bytes() {
        let a = alert(7, 0, 2_000_000_000);
        assert_eq!(a.payload().unwrap().id, 7);
        let bytes = a.encode_to_vec().unwrap();
        let back: Alert = bytes.decode_into().unwrap();
        assert_eq!(back, a);
    }

    #[test]
    fn cancelled_alerts_are_dropped_and_stay_out() {
        let now = Utc.timestamp(1_900_000_000, 0);
        let mut registry = AlertRegistry::new();
        assert!(registry.insert(alert(5, 0, 2_000_000_000), &AcceptAll, now));
        // Alert 10 cancels everything up to id 9.
        assert!(registry.insert(alert(10, 9, 2_000_000_000), &AcceptAll, now));
        assert!(!registry.insert(alert(5, 0, 2_000_000_000), &AcceptAll, now));
        let applicable = registry.applicable(now, ProtocolVersion(31_800), "/utxod:0.1.0/");
        assert_eq!(applicable.len(), 1);
        assert_eq!(applicable[0].payload().unwrap().id, 10);
    }

    #[test]
    fn version_window_gates_relay() {
        let now = Utc.timestamp(1_900_000_000, 0);
        let mut a = alert(3, 0, 2_000_000_000);
        let mut payload = a.payload().unwrap();
        payload.min_version = ProtocolVersion(40_000);
        a.signed_bytes = payload.encode_to_vec().unwrap();
        assert!(!a.applies_to(now, ProtocolVersion(31_800), "/utxod:0.1.0/"));
        assert!(a.applies_to(now, ProtocolVersion(40_000), "/utxod:0.1.0/"));
    }
}
