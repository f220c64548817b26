use super::{CodecError, Decode, Encode};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

/// The Bitcoin-style variable-length integer: one byte if < 0xFD, else a
/// marker byte (`0xFD`/`0xFE`/`0xFF`) followed by a 16/32/64-bit
/// little-endian value. Used as the length prefix for every vector and
/// string on the wire and on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VarInt(u64);

impl VarInt {
    pub fn from(value: usize) -> VarInt {
        VarInt(value as u64)
    }

    pub fn value(&self) -> u64 {
        self.0
    }

    /// Serialized size in bytes of the varint encoding `value`.
    pub fn size(value: usize) -> usize {
        if value < 0xFD {
            1
        } else if value <= u16::MAX as usize {
            3
        } else if value <= u32::MAX as usize {
            5
        } else {
            9
        }
    }
}

impl Encode for VarInt {
    fn encode<W: Write>(&self, mut target: W) -> std::io::Result<()> {
        if self.0 < 0xFD {
            target.write_all(&[self.0 as u8])
        } else if self.0 <= u16::MAX as u64 {
            target.write_all(&[0xFD])?;
            target.write_u16::<LittleEndian>(self.0 as u16)
        } else if self.0 <= u32::MAX as u64 {
            target.write_all(&[0xFE])?;
            target.write_u32::<LittleEndian>(self.0 as u32)
        } else {
            target.write_all(&[0xFF])?;
            target.write_u64::<LittleEndian>(self.0)
        }
    }
}

impl Decode for VarInt {
    fn decode<R: Read>(mut target: R) -> Result<Self, CodecError> {
        let first = u8::decode(&mut target)?;
        let value = match first {
            0xFF => target.read_u64::<LittleEndian>()?,
            0xFE => target.read_u32::<LittleEndian>()? as u64,
            0xFD => target.read_u16::<LittleEndian>()? as u64,
            small => small as u64,
        };
        Ok(VarInt(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_boundary_values() {
        for value in [0usize, 1, 252, 253, 0xFFFF, 0x1_0000, u32::MAX as usize, u32::MAX as usize + 1] {
            let encoded = VarInt::from(value).encode_to_vec().unwrap();
            assert_eq!(encoded.len(), VarInt::size(value));
            let decoded = VarInt::decode(&encoded[..]).unwrap();
            assert_eq!(decoded.value(), value as u64);
        }
    }
}
