//! Network-wide consensus parameters: magic bytes,
//! default ports, the genesis block, and difficulty retarget constants.
//!
//! Grounded on the reference implementation's `pchMessageStart`, default
//! port, and genesis block constants (`BlockChain.cpp`, `net.cpp`).

use chrono::{TimeZone, Utc};

use crate::amount::{Amount, NonNegative};
use crate::block::{self, merkle, Header};
use crate::transaction::{LockTime, Transaction};
use crate::transparent::{CoinbaseData, Input, Output, Script};
use crate::work::CompactDifficulty;

/// Which of the two networks a node is speaking to.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Network {
    Mainnet,
    Testnet,
}

/// The 4-byte magic prefixing every wire message.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Magic(pub [u8; 4]);

impl Network {
    pub fn magic(self) -> Magic {
        match self {
            Network::Mainnet => Magic([0xF9, 0xBE, 0xB4, 0xD9]),
            Network::Testnet => Magic([0xFA, 0xBF, 0xB5, 0xDA]),
        }
    }

    pub fn default_port(self) -> u16 {
        match self {
            Network::Mainnet => 8333,
            Network::Testnet => 18333,
        }
    }

    pub fn genesis_block(self) -> block::Block {
        genesis_block(self)
    }

    pub fn genesis_hash(self) -> block::Hash {
        self.genesis_block().hash()
    }

    /// The difficulty of the genesis block, which anchors the retarget
    /// schedule. The test network starts at the proof-of-work floor so
    /// blocks can be mined in microseconds.
    pub fn genesis_difficulty(self) -> CompactDifficulty {
        match self {
            Network::Mainnet => CompactDifficulty(0x1d00ffff),
            Network::Testnet => CompactDifficulty(0x207fffff),
        }
    }
}

/// Subsidy halves every this many blocks.
pub const SUBSIDY_HALVING_INTERVAL: u32 = 210_000;

/// The initial block subsidy, before any halving.
pub fn initial_subsidy() -> Amount<NonNegative> {
    Amount::try_new(50_0000_0000).expect("50 coin is in range")
}

/// The subsidy paid to the miner of the block at `height`.
pub fn subsidy_at(height: block::Height) -> Amount<NonNegative> {
    let halvings = height.0 / SUBSIDY_HALVING_INTERVAL;
    if halvings >= 64 {
        return Amount::zero();
    }
    let base = initial_subsidy().value();
    Amount::try_new(base >> halvings).expect("halved subsidy stays non-negative")
}

/// A coinbase output must mature this many blocks before it is spendable
/// (GLOSSARY "Coinbase maturity").
pub const COINBASE_MATURITY: u32 = 100;

/// Target spacing between blocks, in seconds.
pub const TARGET_SPACING_SECS: i64 = 10 * 60;

/// Target total time for one retarget window, in seconds: two weeks.
pub const TARGET_TIMESPAN_SECS: i64 = 14 * 24 * 60 * 60;

/// The number of blocks between difficulty retargets.
pub const RETARGET_INTERVAL: u32 = (TARGET_TIMESPAN_SECS / TARGET_SPACING_SECS) as u32;

/// The hardcoded genesis block. Both networks share the coinbase; only the
/// starting difficulty differs.
pub fn genesis_block(network: Network) -> block::Block {
    let coinbase_script = Script(hex::decode(
        "04ffff001d0104455468652054696d65732030332f4a616e2f32303039204368616e63656c6c6f72206f6e206272696e6b206f66207365636f6e64206261696c6f757420666f722062616e6b73",
    ).expect("hard-coded genesis coinbase script is valid hex"));
    let coinbase = Transaction::new(
        1,
        vec![Input::Coinbase { height: None, data: CoinbaseData(coinbase_script.0), sequence: crate::transparent::SEQUENCE_FINAL }],
        vec![Output { value: initial_subsidy(), script: Script(vec![]) }],
        LockTime::zero(),
    );
    let header = Header::new(
        1,
        block::Hash([0u8; 32]),
        merkle::root(vec![coinbase.hash().0 .0]),
        Utc.timestamp(1_231_006_505, 0),
        network.genesis_difficulty(),
        2_083_236_893,
    );
    block::Block { header, transactions: vec![std::sync::Arc::new(coinbase)] }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn genesis_merkle_root_matches_its_sole_coinbase() {
        let genesis = genesis_block(Network::Mainnet);
        assert_eq!(genesis.computed_merkle_root(), genesis.header.merkle_root);
    }

    #[test]
    fn networks_share_a_coinbase_but_not_a_genesis_hash() {
        let mainnet = genesis_block(Network::Mainnet);
        let testnet = genesis_block(Network::Testnet);
        assert_eq!(mainnet.transactions[0].hash(), testnet.transactions[0].hash());
        assert_ne!(mainnet.hash(), testnet.hash());
    }

    #[test]
    fn subsidy_halves_on_schedule() {
        assert_eq!(subsidy_at(block::Height(0)).value(), 50_0000_0000);
        assert_eq!(subsidy_at(block::Height(SUBSIDY_HALVING_INTERVAL)).value(), 25_0000_0000);
    }
}
