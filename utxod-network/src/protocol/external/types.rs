//! Newtype wrappers for primitive protocol fields, so a nonce can never be
//! passed where a version belongs.

use std::io::{Read, Write};

use utxod_chain::serialization::{CodecError, Decode, Encode};

/// A protocol version number, negotiated down to the lower of the two
/// sides' versions during the handshake.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ProtocolVersion(pub u32);

impl Encode for ProtocolVersion {
    fn encode<W: Write>(&self, target: W) -> std::io::Result<()> {
        self.0.encode(target)
    }
}
impl Decode for ProtocolVersion {
    fn decode<R: Read>(target: R) -> Result<Self, CodecError> {
        Ok(ProtocolVersion(u32::decode(target)?))
    }
}

/// A random 64-bit value identifying one side of one handshake, used to
/// detect a node dialing itself.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct Nonce(pub u64);

impl Nonce {
    pub fn random() -> Nonce {
        use rand::Rng;
        Nonce(rand::thread_rng().gen())
    }
}

impl Encode for Nonce {
    fn encode<W: Write>(&self, target: W) -> std::io::Result<()> {
        self.0.encode(target)
    }
}
impl Decode for Nonce {
    fn decode<R: Read>(target: R) -> Result<Self, CodecError> {
        Ok(Nonce(u64::decode(target)?))
    }
}

bitflags::bitflags! {
    /// The services a peer advertises in its `version` and `addr` entries.
    pub struct PeerServices: u64 {
        /// The peer serves full blocks.
        const NODE_NETWORK = 1;
    }
}

impl Encode for PeerServices {
    fn encode<W: Write>(&self, target: W) -> std::io::Result<()> {
        self.bits().encode(target)
    }
}
impl Decode for PeerServices {
    fn decode<R: Read>(target: R) -> Result<Self, CodecError> {
        // Unknown service bits are preserved, not rejected: future peers
        // may advertise services we have never heard of.
        Ok(PeerServices::from_bits_truncate(u64::decode(target)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use utxod_chain::serialization::DecodeInto;

    #[test]
    fn protocol_version_orders_numerically() {
        assert!(ProtocolVersion(209) < ProtocolVersion(31_800));
    }

    #[test]
    fn services_round_trip() {
        let services = PeerServices::NODE_NETWORK;
        let bytes = services.encode_to_vec().unwrap();
        assert_eq!(bytes.decode_into::<PeerServices>().unwrap(), services);
    }
}
