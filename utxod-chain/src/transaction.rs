//! Transactions: the unit of value transfer between `Coin`s.

mod hash;
mod lock_time;

#[cfg(any(test, feature = "proptest-impl"))]
mod arbitrary;

pub use hash::Hash;
pub use lock_time::{LockTime, LOCK_TIME_THRESHOLD};

use crate::cached::Lazy;
use crate::serialization::{CodecError, Decode, Encode, VarInt};
use crate::transparent;
use std::io::{self, Read};

/// The maximum size of a transaction in bytes, matching the block size
/// cap: nothing consensus-critical can be larger than a whole block.
pub const MAX_TX_SIZE: u64 = 1_000_000;

/// A transaction moving value between `Coin`s.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Transaction {
    pub version: i32,
    pub inputs: Vec<transparent::Input>,
    pub outputs: Vec<transparent::Output>,
    pub lock_time: LockTime,
    hash: Lazy<Hash>,
}

impl Transaction {
    pub fn new(version: i32, inputs: Vec<transparent::Input>, outputs: Vec<transparent::Output>, lock_time: LockTime) -> Transaction {
        Transaction { version, inputs, outputs, lock_time, hash: Lazy::empty() }
    }

    /// The transaction's id: whatever was cached at construction or decode
    /// time, or freshly computed if this value was never cached.
    pub fn hash(&self) -> Hash {
        self.hash.get().unwrap_or_else(|| Hash::from(self))
    }

    pub fn contains_coinbase_input(&self) -> bool {
        self.inputs.iter().any(transparent::Input::is_coinbase)
    }

    /// A transaction is a coinbase transaction iff its sole input is a
    /// `Coinbase` input.
    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].is_coinbase()
    }

    pub fn all_inputs_final(&self) -> bool {
        self.inputs.iter().all(transparent::Input::is_final)
    }

    /// Serialized length in bytes.
    pub fn len(&self) -> usize {
        let mut size = 4 + VarInt::size(self.inputs.len());
        for input in self.inputs.iter() {
            size += input.len();
        }
        size += VarInt::size(self.outputs.len());
        for output in self.outputs.iter() {
            size += output.len();
        }
        size + 4
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty() && self.outputs.is_empty()
    }
}

impl Encode for Transaction {
    fn encode<W: io::Write>(&self, mut target: W) -> io::Result<()> {
        self.version.encode(&mut target)?;
        self.inputs.encode(&mut target)?;
        self.outputs.encode(&mut target)?;
        self.lock_time.encode(&mut target)
    }
}

impl Decode for Transaction {
    fn decode<R: Read>(target: R) -> Result<Self, CodecError> {
        let mut target = target.take(MAX_TX_SIZE);
        let version = i32::decode(&mut target)?;
        let inputs = Vec::<transparent::Input>::decode(&mut target)?;
        let outputs = Vec::<transparent::Output>::decode(&mut target)?;
        let lock_time = LockTime::decode(&mut target)?;
        let tx = Transaction { version, inputs, outputs, lock_time, hash: Lazy::empty() };
        let own_hash = tx.hash();
        Ok(Transaction { hash: Lazy::filled(own_hash), ..tx })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amount::{Amount, NonNegative};
    use crate::transparent::{CoinbaseData, Input, Output, Script};

    fn coinbase_tx() -> Transaction {
        Transaction::new(
            1,
            vec![Input::Coinbase { height: None, data: CoinbaseData(vec![4]), sequence: transparent::SEQUENCE_FINAL }],
            vec![Output { value: Amount::<NonNegative>::try_new(50_0000_0000).unwrap(), script: Script(vec![]) }],
            LockTime::zero(),
        )
    }

    #[test]
    fn coinbase_transaction_is_identified() {
        let tx = coinbase_tx();
        assert!(tx.is_coinbase());
        assert!(tx.contains_coinbase_input());
    }

    #[test]
    fn hash_is_cached_after_first_access() {
        let tx = coinbase_tx();
        let first = tx.hash();
        let second = tx.hash();
        assert_eq!(first, second);
    }

    #[test]
    fn round_trips_through_encode_decode() {
        let tx = coinbase_tx();
        let bytes = tx.encode_to_vec().unwrap();
        let back = Transaction::decode(&bytes[..]).unwrap();
        assert_eq!(back.hash(), tx.hash());
    }
}
