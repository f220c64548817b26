//! Consensus-critical serialization.
//!
//! `Encode`/`Decode` are the wire and on-disk codec used by every
//! consensus-relevant record: integers little-endian, length-prefixed
//! vectors, nested composites in declared field order. Bit-exact with the
//! network protocol this node speaks, and shared between the wire framer
//! and the block store — both read and write records with
//! the same trait pair so there is exactly one definition of "the bytes
//! that make up a transaction".

mod error;
mod varint;

pub mod sha256d;

pub use error::CodecError;
pub use varint::VarInt;

use byteorder::{BigEndian, LittleEndian, ReadBytesExt, WriteBytesExt};
use chrono::{DateTime, TimeZone, Utc};
use std::convert::TryFrom;
use std::io::{self, Read, Write};
use std::net::IpAddr;

pub trait Encode {
    fn encode<W: Write>(&self, target: W) -> io::Result<()>;

    fn encode_to_vec(&self) -> io::Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.encode(&mut buf)?;
        Ok(buf)
    }
}

pub trait Decode: Sized {
    fn decode<R: Read>(target: R) -> Result<Self, CodecError>;
}

pub trait DecodeInto {
    fn decode_into<T: Decode>(&self) -> Result<T, CodecError>;
}

impl<S: AsRef<[u8]>> DecodeInto for S {
    fn decode_into<T: Decode>(&self) -> Result<T, CodecError> {
        T::decode(self.as_ref())
    }
}

impl Encode for bool {
    fn encode<W: Write>(&self, mut target: W) -> io::Result<()> {
        target.write_all(&[*self as u8])
    }
}
impl Decode for bool {
    fn decode<R: Read>(mut target: R) -> Result<Self, CodecError> {
        Ok(target.read_u8()? != 0)
    }
}

impl Encode for u8 {
    fn encode<W: Write>(&self, mut target: W) -> io::Result<()> {
        target.write_all(&[*self])
    }
}
impl Decode for u8 {
    fn decode<R: Read>(mut target: R) -> Result<Self, CodecError> {
        Ok(target.read_u8()?)
    }
}

macro_rules! impl_int_codec {
    ($t:ty, $write:ident, $read:ident) => {
        impl Encode for $t {
            fn encode<W: Write>(&self, mut target: W) -> io::Result<()> {
                target.$write::<LittleEndian>(*self)
            }
        }
        impl Decode for $t {
            fn decode<R: Read>(mut target: R) -> Result<Self, CodecError> {
                Ok(target.$read::<LittleEndian>()?)
            }
        }
    };
}

impl_int_codec!(u16, write_u16, read_u16);
impl_int_codec!(u32, write_u32, read_u32);
impl_int_codec!(u64, write_u64, read_u64);
impl_int_codec!(i32, write_i32, read_i32);
impl_int_codec!(i64, write_i64, read_i64);

impl Encode for DateTime<Utc> {
    fn encode<W: Write>(&self, mut target: W) -> io::Result<()> {
        let secs = u32::try_from(self.timestamp()).unwrap_or(u32::MAX);
        target.write_u32::<LittleEndian>(secs)
    }
}
impl Decode for DateTime<Utc> {
    fn decode<R: Read>(mut target: R) -> Result<Self, CodecError> {
        let secs = target.read_u32::<LittleEndian>()?;
        Ok(Utc.timestamp(secs as i64, 0))
    }
}

impl Encode for std::net::Ipv6Addr {
    fn encode<W: Write>(&self, mut target: W) -> io::Result<()> {
        target.write_all(&self.octets())
    }
}
impl Decode for std::net::Ipv6Addr {
    fn decode<R: Read>(mut target: R) -> Result<Self, CodecError> {
        let mut octets = [0u8; 16];
        target.read_exact(&mut octets)?;
        Ok(std::net::Ipv6Addr::from(octets))
    }
}

impl Encode for IpAddr {
    fn encode<W: Write>(&self, mut target: W) -> io::Result<()> {
        match self {
            IpAddr::V4(addr) => addr.to_ipv6_mapped().encode(&mut target),
            IpAddr::V6(addr) => addr.encode(&mut target),
        }
    }
}
impl Decode for IpAddr {
    fn decode<R: Read>(mut target: R) -> Result<Self, CodecError> {
        Ok(IpAddr::V6(std::net::Ipv6Addr::decode(&mut target)?))
    }
}

impl Encode for std::net::SocketAddr {
    fn encode<W: Write>(&self, mut target: W) -> io::Result<()> {
        self.ip().encode(&mut target)?;
        target.write_u16::<BigEndian>(self.port())
    }
}
impl Decode for std::net::SocketAddr {
    fn decode<R: Read>(mut target: R) -> Result<Self, CodecError> {
        let ip = IpAddr::decode(&mut target)?;
        let port = target.read_u16::<BigEndian>()?;
        Ok(std::net::SocketAddr::new(ip, port))
    }
}

impl Encode for [u8; 4] {
    fn encode<W: Write>(&self, mut target: W) -> io::Result<()> {
        target.write_all(self)
    }
}
impl Decode for [u8; 4] {
    fn decode<R: Read>(mut target: R) -> Result<Self, CodecError> {
        let mut bytes = [0u8; 4];
        target.read_exact(&mut bytes)?;
        Ok(bytes)
    }
}

impl Encode for [u8; 12] {
    fn encode<W: Write>(&self, mut target: W) -> io::Result<()> {
        target.write_all(self)
    }
}
impl Decode for [u8; 12] {
    fn decode<R: Read>(mut target: R) -> Result<Self, CodecError> {
        let mut bytes = [0u8; 12];
        target.read_exact(&mut bytes)?;
        Ok(bytes)
    }
}

impl Encode for [u8; 20] {
    fn encode<W: Write>(&self, mut target: W) -> io::Result<()> {
        target.write_all(self)
    }
}
impl Decode for [u8; 20] {
    fn decode<R: Read>(mut target: R) -> Result<Self, CodecError> {
        let mut bytes = [0u8; 20];
        target.read_exact(&mut bytes)?;
        Ok(bytes)
    }
}

impl Encode for [u8; 32] {
    fn encode<W: Write>(&self, mut target: W) -> io::Result<()> {
        target.write_all(self)
    }
}
impl Decode for [u8; 32] {
    fn decode<R: Read>(mut target: R) -> Result<Self, CodecError> {
        let mut bytes = [0u8; 32];
        target.read_exact(&mut bytes)?;
        Ok(bytes)
    }
}

// Note: there is deliberately no specialized `impl Encode for Vec<u8>` —
// since `u8: Encode`, that would overlap with the blanket `Vec<T: Encode>`
// impl below and fail to compile. The blanket impl produces the identical
// wire format (varint length, then each byte) at the cost of a per-byte
// call instead of a bulk `write_all`.
impl<T: Encode> Encode for Vec<T> {
    fn encode<W: Write>(&self, mut target: W) -> io::Result<()> {
        VarInt::from(self.len()).encode(&mut target)?;
        for item in self.iter() {
            item.encode(&mut target)?;
        }
        Ok(())
    }
}
impl<T: Decode> Decode for Vec<T> {
    fn decode<R: Read>(mut target: R) -> Result<Self, CodecError> {
        let len = VarInt::decode(&mut target)?.value();
        let mut items = Vec::with_capacity(std::cmp::min(len, 1 << 20) as usize);
        for _ in 0..len {
            items.push(T::decode(&mut target)?);
        }
        Ok(items)
    }
}

impl<T: Encode, U: Encode> Encode for (T, U) {
    fn encode<W: Write>(&self, mut target: W) -> io::Result<()> {
        self.0.encode(&mut target)?;
        self.1.encode(&mut target)
    }
}

impl Encode for String {
    fn encode<W: Write>(&self, mut target: W) -> io::Result<()> {
        VarInt::from(self.len()).encode(&mut target)?;
        target.write_all(self.as_bytes())
    }
}
impl Decode for String {
    fn decode<R: Read>(mut target: R) -> Result<Self, CodecError> {
        let bytes = Vec::decode(&mut target)?;
        String::from_utf8(bytes).map_err(|_| CodecError::Parse("invalid utf-8 in string field"))
    }
}

impl<T: Encode> Encode for std::sync::Arc<T> {
    fn encode<W: Write>(&self, target: W) -> io::Result<()> {
        (**self).encode(target)
    }
}
impl<T: Decode> Decode for std::sync::Arc<T> {
    fn decode<R: Read>(target: R) -> Result<Self, CodecError> {
        Ok(std::sync::Arc::new(T::decode(target)?))
    }
}
