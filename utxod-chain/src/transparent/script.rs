use crate::serialization::{CodecError, Decode, Encode, VarInt};
use std::fmt;
use std::io::{self, Read};

#[cfg(any(test, feature = "proptest-impl"))]
use proptest_derive::Arbitrary;

/// A script's raw byte code. Interpreting these bytes is `utxod-script`'s
/// job; this type only knows how to serialize and deserialize them.
#[derive(Clone, Eq, PartialEq, Hash, serde::Serialize, serde::Deserialize)]
#[cfg_attr(any(test, feature = "proptest-impl"), derive(Arbitrary))]
pub struct Script(pub Vec<u8>);

impl Script {
    pub fn serialized_size(&self) -> usize {
        VarInt::size(self.0.len()) + self.0.len()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Script {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_tuple("Script").field(&hex::encode(&self.0)).finish()
    }
}

impl Encode for Script {
    fn encode<W: io::Write>(&self, mut target: W) -> io::Result<()> {
        VarInt::from(self.0.len()).encode(&mut target)?;
        target.write_all(&self.0)
    }
}

impl Decode for Script {
    fn decode<R: io::Read>(mut target: R) -> Result<Self, CodecError> {
        let len = VarInt::decode(&mut target)?.value();
        let mut bytes = Vec::new();
        target.take(len).read_to_end(&mut bytes)?;
        Ok(Script(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let script = Script(vec![0x76, 0xa9, 0x14]);
        let bytes = script.encode_to_vec().unwrap();
        assert_eq!(bytes.len(), script.serialized_size());
        let back = Script::decode(&bytes[..]).unwrap();
        assert_eq!(script, back);
    }
}
