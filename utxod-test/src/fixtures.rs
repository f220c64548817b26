//! Canned blocks and transactions used across crate test suites.

use std::sync::Arc;

use chrono::Duration;
use primitive_types::U256;

use utxod_chain::amount::{Amount, NonNegative};
use utxod_chain::block::{merkle, Block, Header};
use utxod_chain::parameters::Network;
use utxod_chain::transaction::{LockTime, Transaction};
use utxod_chain::transparent::{CoinbaseData, Input, Output, Script};

/// Mainnet's genesis block, built the same way `utxod_chain::parameters`
/// builds it — a convenience so consumers don't have to depend on
/// `utxod-chain`'s internal `parameters::genesis_block` directly.
pub fn mainnet_genesis() -> Block {
    Network::Mainnet.genesis_block()
}

/// A syntactically valid, semantically meaningless coinbase transaction
/// paying a fixed subsidy to an empty (anyone-can-spend) script.
pub fn dummy_coinbase(height_data: u8, subsidy: i64) -> Transaction {
    Transaction::new(
        1,
        vec![Input::Coinbase {
            height: None,
            data: CoinbaseData(vec![0x03, height_data, 0x00, 0x00]),
            sequence: utxod_chain::transparent::SEQUENCE_FINAL,
        }],
        vec![Output { value: Amount::<NonNegative>::try_new(subsidy).unwrap(), script: Script(Vec::new()) }],
        LockTime::zero(),
    )
}

/// A transaction spending `coin`, with a single empty-script output of
/// `value`. Useful as a minimal non-coinbase transaction in state/consensus
/// tests that don't exercise script validation.
pub fn dummy_spend(coin: utxod_chain::transparent::Coin, value: i64) -> Transaction {
    Transaction::new(
        1,
        vec![Input::PrevOut { prev: coin, signature_script: Script(Vec::new()), sequence: utxod_chain::transparent::SEQUENCE_FINAL }],
        vec![Output { value: Amount::<NonNegative>::try_new(value).unwrap(), script: Script(Vec::new()) }],
        LockTime::zero(),
    )
}

/// Mines a child of `parent` carrying `transactions`, inheriting the
/// parent's difficulty and advancing time by ten minutes. Only practical on
/// the test network, whose difficulty floor lets the nonce search finish in
/// a handful of attempts.
pub fn mine_on(parent: &Header, transactions: Vec<Arc<Transaction>>) -> Block {
    let root = merkle::root(transactions.iter().map(|tx| tx.hash().0 .0));
    let time = parent.time + Duration::seconds(10 * 60);
    let bits = parent.difficulty_threshold;
    let target = bits.to_target();
    for nonce in 0..u32::MAX {
        let header = Header::new(1, parent.hash(), root, time, bits, nonce);
        if U256::from_little_endian(&header.hash().0) <= target {
            return Block { header, transactions };
        }
    }
    unreachable!("the difficulty floor admits roughly half of all nonces")
}
