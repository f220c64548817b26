//! Transaction inputs and outputs.

mod script;
pub use script::Script;

use crate::amount::{Amount, NonNegative};
use crate::block;
use crate::cached::Lazy;
use crate::serialization::{CodecError, Decode, Encode, VarInt};
use crate::transaction;
use utxod_wire_derive::{Decode as WireDecode, Encode as WireEncode};

#[cfg(any(test, feature = "proptest-impl"))]
use proptest_derive::Arbitrary;

/// Arbitrary data inserted by miners into a coinbase transaction, including
/// (after the block-height activation rule) the serialized block height.
#[derive(Clone, Eq, PartialEq, serde::Serialize, serde::Deserialize, WireEncode, WireDecode)]
pub struct CoinbaseData(pub Vec<u8>);

impl CoinbaseData {
    pub fn serialized_size(&self) -> usize {
        VarInt::size(self.0.len()) + self.0.len()
    }
}

impl std::fmt::Debug for CoinbaseData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let escaped: String = self.0.iter().cloned().flat_map(std::ascii::escape_default).map(|b| b as char).collect();
        f.debug_tuple("CoinbaseData").field(&escaped).finish()
    }
}

/// A reference to a previous transaction output, i.e. a `Coin`. The
/// null sentinel `(zero-hash, 0xFFFFFFFF)` marks a coinbase input.
#[derive(Copy, Clone, Debug, Eq, PartialEq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize, WireEncode)]
#[cfg_attr(any(test, feature = "proptest-impl"), derive(Arbitrary))]
pub struct Coin {
    pub tx_hash: transaction::Hash,
    pub index: u32,
}

impl Coin {
    pub const fn len() -> usize {
        36
    }

    pub fn null() -> Coin {
        Coin {
            tx_hash: transaction::Hash(crate::hash::Hash256::zero()),
            index: u32::MAX,
        }
    }

    pub fn is_null(&self) -> bool {
        *self == Coin::null()
    }
}

impl Decode for Coin {
    fn decode<R: std::io::Read>(mut target: R) -> Result<Self, CodecError> {
        Ok(Coin {
            tx_hash: transaction::Hash::decode(&mut target)?,
            index: u32::decode(&mut target)?,
        })
    }
}

/// A transparent input. `Coinbase` inputs mint new value and carry no
/// spendable previous output; `PrevOut` inputs spend a specific `Coin`.
#[derive(Clone, Debug, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Input {
    PrevOut {
        prev: Coin,
        signature_script: Script,
        sequence: u32,
    },
    Coinbase {
        /// The BIP34-style block height encoded in the coinbase data, once
        /// parsed. `None` until a context-aware deserializer (one that
        /// knows whether height-encoding has activated) fills it in.
        height: Option<Lazy<block::Height>>,
        data: CoinbaseData,
        sequence: u32,
    },
}

/// `sequence == 0xFFFFFFFF` marks a *final* input.
pub const SEQUENCE_FINAL: u32 = 0xFFFF_FFFF;

impl Input {
    pub fn is_final(&self) -> bool {
        self.sequence() == SEQUENCE_FINAL
    }

    pub fn is_coinbase(&self) -> bool {
        matches!(self, Input::Coinbase { .. })
    }

    pub fn sequence(&self) -> u32 {
        match self {
            Input::PrevOut { sequence, .. } => *sequence,
            Input::Coinbase { sequence, .. } => *sequence,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Input::PrevOut { signature_script, .. } => Coin::len() + signature_script.serialized_size() + 4,
            Input::Coinbase { data, .. } => data.serialized_size() + 4,
        }
    }
}

impl Encode for Input {
    fn encode<W: std::io::Write>(&self, mut target: W) -> std::io::Result<()> {
        match self {
            Input::PrevOut { prev, signature_script, sequence } => {
                prev.encode(&mut target)?;
                signature_script.encode(&mut target)?;
                sequence.encode(&mut target)
            }
            Input::Coinbase { data, sequence, .. } => {
                Coin::null().encode(&mut target)?;
                data.0.encode(&mut target)?;
                sequence.encode(&mut target)
            }
        }
    }
}

impl Decode for Input {
    /// Decoding alone cannot distinguish "PrevOut whose prev happens to be
    /// the null coin" from "Coinbase": both serialize the same 36 null
    /// bytes. We disambiguate the way the wire format does — a null `Coin`
    /// means Coinbase — the protocol defines coinbase inputs by exactly
    /// that condition.
    fn decode<R: std::io::Read>(mut target: R) -> Result<Self, CodecError> {
        let prev = Coin::decode(&mut target)?;
        if prev.is_null() {
            let data = CoinbaseData(Vec::decode(&mut target)?);
            let sequence = u32::decode(&mut target)?;
            Ok(Input::Coinbase { height: None, data, sequence })
        } else {
            let signature_script = Script::decode(&mut target)?;
            let sequence = u32::decode(&mut target)?;
            Ok(Input::PrevOut { prev, signature_script, sequence })
        }
    }
}

/// A transparent output: a value and the script that authorizes
/// spending it.
#[derive(Clone, Debug, Eq, PartialEq, Hash, serde::Serialize, serde::Deserialize, WireEncode, WireDecode)]
#[cfg_attr(any(test, feature = "proptest-impl"), derive(Arbitrary))]
pub struct Output {
    pub value: Amount<NonNegative>,
    pub script: Script,
}

impl Output {
    pub fn len(&self) -> usize {
        8 + self.script.serialized_size()
    }
}

#[cfg(any(test, feature = "proptest-impl"))]
impl proptest::prelude::Arbitrary for Input {
    type Parameters = ();
    type Strategy = proptest::strategy::BoxedStrategy<Self>;

    fn arbitrary_with(_args: ()) -> Self::Strategy {
        use proptest::prelude::*;
        prop_oneof![
            (any::<Coin>(), any::<Script>(), any::<u32>()).prop_map(|(prev, signature_script, sequence)| {
                Input::PrevOut { prev, signature_script, sequence }
            }),
            (proptest::collection::vec(any::<u8>(), 2..100), any::<u32>()).prop_map(|(data, sequence)| {
                Input::Coinbase { height: None, data: CoinbaseData(data), sequence }
            }),
        ]
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coin_null_sentinel_is_distinguishable() {
        let null = Coin::null();
        assert!(null.is_null());
        let spend = Coin { tx_hash: transaction::Hash(crate::hash::Hash256::of(b"x")), index: 0 };
        assert!(!spend.is_null());
    }

    #[test]
    fn coinbase_input_round_trips_through_decode() {
        let input = Input::Coinbase {
            height: None,
            data: CoinbaseData(vec![1, 2, 3]),
            sequence: SEQUENCE_FINAL,
        };
        let bytes = input.encode_to_vec().unwrap();
        let back = Input::decode(&bytes[..]).unwrap();
        assert!(back.is_coinbase());
        assert_eq!(back.sequence(), SEQUENCE_FINAL);
    }
}
