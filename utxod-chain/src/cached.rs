//! A memoized value that is never part of the wire/disk encoding.
//!
//! Adding a `Lazy<T>` field to a struct can never cause a consensus break:
//! its `Encode`/`Decode` impls are no-ops, and equality treats an empty
//! cache as equal to anything (so a freshly-constructed value compares
//! equal to its round-tripped, fully-cached counterpart).

use crate::serialization::{CodecError, Decode, Encode};

#[derive(Clone, Copy)]
pub struct Lazy<T: Clone + Copy>(Option<T>);

impl<T: Clone + Copy> Lazy<T> {
    pub fn empty() -> Lazy<T> {
        Lazy(None)
    }

    pub fn filled(value: T) -> Lazy<T> {
        Lazy(Some(value))
    }

    pub fn get(&self) -> Option<T> {
        self.0
    }

    pub fn get_or_insert_with(&mut self, f: impl FnOnce() -> T) -> T {
        *self.0.get_or_insert_with(f)
    }
}

impl<T: Clone + Copy> Default for Lazy<T> {
    fn default() -> Self {
        Lazy::empty()
    }
}

impl<T: PartialEq + Copy> PartialEq for Lazy<T> {
    fn eq(&self, other: &Self) -> bool {
        match (self.0, other.0) {
            (Some(a), Some(b)) => a == b,
            _ => true,
        }
    }
}
impl<T: PartialEq + Copy> Eq for Lazy<T> {}

impl<T: Clone + Copy + std::fmt::Debug> std::fmt::Debug for Lazy<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl<T: Clone + Copy> Encode for Lazy<T> {
    fn encode<W: std::io::Write>(&self, _target: W) -> std::io::Result<()> {
        Ok(())
    }
}
impl<T: Clone + Copy> Decode for Lazy<T> {
    fn decode<R: std::io::Read>(_target: R) -> Result<Self, CodecError> {
        Ok(Lazy(None))
    }
}

impl<T: Clone + Copy + serde::Serialize> serde::Serialize for Lazy<T> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}
impl<'de, T: Clone + Copy + serde::Deserialize<'de>> serde::Deserialize<'de> for Lazy<T> {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(Lazy(Option::deserialize(deserializer)?))
    }
}
