use crate::serialization::{CodecError, Decode, Encode};

/// A block's distance from genesis (height 0).
#[derive(Copy, Clone, Debug, Eq, PartialEq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
#[cfg_attr(any(test, feature = "proptest-impl"), derive(proptest_derive::Arbitrary))]
pub struct Height(pub u32);

impl Height {
    pub fn value(self) -> Option<u32> {
        Some(self.0)
    }
}

impl std::fmt::Display for Height {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Encode for Height {
    fn encode<W: std::io::Write>(&self, target: W) -> std::io::Result<()> {
        self.0.encode(target)
    }
}
impl Decode for Height {
    fn decode<R: std::io::Read>(target: R) -> Result<Self, CodecError> {
        Ok(Height(u32::decode(target)?))
    }
}
