//! The `version` message: the opening move of every handshake.

use std::io::{Read, Write};
use std::net::SocketAddr;

use chrono::{DateTime, TimeZone, Utc};

use utxod_chain::block;
use utxod_chain::serialization::{CodecError, Decode, Encode};

use super::super::types::{Nonce, PeerServices, ProtocolVersion};

/// The sender's identity, capabilities, and best height.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Version {
    pub version: ProtocolVersion,
    pub services: PeerServices,
    pub timestamp: DateTime<Utc>,
    /// The receiving node's address as the sender sees it, with the
    /// services the sender believes it offers.
    pub address_recv: (PeerServices, SocketAddr),
    /// The sending node's own address and services.
    pub address_from: (PeerServices, SocketAddr),
    /// Random per-handshake value used to detect a self-connection.
    pub nonce: Nonce,
    pub user_agent: String,
    /// The height of the sender's best chain.
    pub start_height: block::Height,
}

impl Version {
    pub fn new(
        version: ProtocolVersion,
        their_addr: SocketAddr,
        their_services: PeerServices,
        our_services: PeerServices,
        our_addr: SocketAddr,
        nonce: Nonce,
        user_agent: String,
        start_height: block::Height,
    ) -> Version {
        // Truncate to the nearest five minutes so minor clock skew between
        // peers does not leak a precise local clock reading.
        let now = Utc::now().timestamp();
        let timestamp = Utc.timestamp(now - now.rem_euclid(5 * 60), 0);
        Version {
            version,
            services: our_services,
            timestamp,
            address_recv: (their_services, their_addr),
            address_from: (our_services, our_addr),
            nonce,
            user_agent,
            start_height,
        }
    }
}

impl Encode for Version {
    fn encode<W: Write>(&self, mut target: W) -> std::io::Result<()> {
        self.version.encode(&mut target)?;
        self.services.encode(&mut target)?;
        // The version timestamp is 64-bit on the wire, unlike the 32-bit
        // block times.
        self.timestamp.timestamp().encode(&mut target)?;
        self.address_recv.0.encode(&mut target)?;
        self.address_recv.1.encode(&mut target)?;
        self.address_from.0.encode(&mut target)?;
        self.address_from.1.encode(&mut target)?;
        self.nonce.encode(&mut target)?;
        self.user_agent.encode(&mut target)?;
        self.start_height.0.encode(&mut target)
    }
}

impl Decode for Version {
    fn decode<R: Read>(mut target: R) -> Result<Self, CodecError> {
        Ok(Version {
            version: ProtocolVersion::decode(&mut target)?,
            services: PeerServices::decode(&mut target)?,
            timestamp: Utc.timestamp(i64::decode(&mut target)?, 0),
            address_recv: (PeerServices::decode(&mut target)?, SocketAddr::decode(&mut target)?),
            address_from: (PeerServices::decode(&mut target)?, SocketAddr::decode(&mut target)?),
            nonce: Nonce::decode(&mut target)?,
            user_agent: String::decode(&mut target)?,
            start_height: block::Height(u32::decode(&mut target)?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use utxod_chain::serialization::DecodeInto;

    #[test]
    fn version_round_trips() {
        let services = PeerServices::NODE_NETWORK;
        let v = Version::new(
            crate::constants::CURRENT_VERSION,
            "203.0.113.6:8333".parse().unwrap(),
            services,
            services,
            "203.0.113.7:8333".parse().unwrap(),
            Nonce(0x9082_4908_8927_9238),
            crate::constants::USER_AGENT.to_owned(),
            block::Height(540_000),
        );
        let bytes = v.encode_to_vec().unwrap();
        assert_eq!(bytes.decode_into::<Version>().unwrap(), v);
    }
}
