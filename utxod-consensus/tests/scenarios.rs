//! End-to-end chain engine scenarios on the test network, whose difficulty
//! floor makes real proof-of-work mining practical inside a test.

use std::sync::Arc;

use utxod_chain::amount::{Amount, NonNegative};
use utxod_chain::block::{Block, Header, Height};
use utxod_chain::hash::Hash160;
use utxod_chain::parameters::{subsidy_at, Network, COINBASE_MATURITY};
use utxod_chain::transaction::{LockTime, Transaction};
use utxod_chain::transparent::{Coin, CoinbaseData, Input, Output, Script, SEQUENCE_FINAL};
use utxod_consensus::chain::{BlockOutcome, Chain, TxOutcome};
use utxod_consensus::TransactionError;
use utxod_script::Opcode;
use utxod_test::fixtures;

/// Signature checking is exercised through the script machinery with a
/// verifier that accepts everything; curve arithmetic is someone else's
/// test suite.
struct AcceptAll;
impl utxod_script::Verifier for AcceptAll {
    fn verify(&self, _pubkey: &[u8], _signature: &[u8], _message: &[u8; 32]) -> bool {
        true
    }
}

fn open_chain(dir: &std::path::Path) -> Chain {
    utxod_test::init();
    Chain::open(Network::Testnet, dir, Arc::new(AcceptAll)).unwrap()
}

fn test_pubkey() -> Vec<u8> {
    vec![0x02; 33]
}

fn test_addr() -> Hash160 {
    Hash160::of(&test_pubkey())
}

fn p2pkh_script(addr: Hash160) -> Script {
    let mut bytes = vec![Opcode::Dup as u8, Opcode::Hash160 as u8, 0x14];
    bytes.extend_from_slice(&addr.0);
    bytes.push(Opcode::EqualVerify as u8);
    bytes.push(Opcode::CheckSig as u8);
    Script(bytes)
}

fn p2pkh_sig_script() -> Script {
    // A 71-byte placeholder signature whose trailing byte is the ALL hash
    // type, then the public key push.
    let mut sig = vec![0x30; 70];
    sig.push(0x01);
    let mut bytes = vec![sig.len() as u8];
    bytes.extend_from_slice(&sig);
    let pubkey = test_pubkey();
    bytes.push(pubkey.len() as u8);
    bytes.extend_from_slice(&pubkey);
    Script(bytes)
}

fn coinbase_to(addr: Hash160, tag: u8, value: i64) -> Transaction {
    Transaction::new(
        1,
        vec![Input::Coinbase { height: None, data: CoinbaseData(vec![0x03, tag, 0x00, 0x00]), sequence: SEQUENCE_FINAL }],
        vec![Output { value: Amount::<NonNegative>::try_new(value).unwrap(), script: p2pkh_script(addr) }],
        LockTime::zero(),
    )
}

fn spend_to(prev: Coin, addr: Hash160, value: i64) -> Transaction {
    Transaction::new(
        1,
        vec![Input::PrevOut { prev, signature_script: p2pkh_sig_script(), sequence: SEQUENCE_FINAL }],
        vec![Output { value: Amount::<NonNegative>::try_new(value).unwrap(), script: p2pkh_script(addr) }],
        LockTime::zero(),
    )
}

/// Extends the chain by one block carrying `extra` transactions after a
/// fresh coinbase, returning the new block.
fn extend(chain: &mut Chain, parent: &Header, tag: u8, extra: Vec<Arc<Transaction>>) -> Block {
    let height = chain.best_height().0 + 1;
    let mut txs = vec![Arc::new(coinbase_to(test_addr(), tag, subsidy_at(Height(height)).value()))];
    txs.extend(extra);
    let block = fixtures::mine_on(parent, txs);
    let outcome = chain.accept_block(Arc::new(block.clone())).unwrap();
    assert!(matches!(outcome, BlockOutcome::Connected { .. }), "block at height {} should connect", height);
    block
}

#[test]
fn fast_forward_advances_the_tip_without_churn() {
    let dir = tempdir::TempDir::new("utxod-scenarios").unwrap();
    let mut chain = open_chain(dir.path());
    let mut parent = Network::Testnet.genesis_block().header;
    for tag in 1..=5u8 {
        parent = extend(&mut chain, &parent, tag, Vec::new()).header;
    }
    assert_eq!(chain.best_height(), Height(5));
    // Five coinbases pay the test address; the genesis coinbase pays an
    // empty script and is not indexed under any address.
    assert_eq!(chain.debits(&test_addr()).unwrap().len(), 5);
    assert_eq!(chain.credits(&test_addr()).unwrap().len(), 0);
    assert_eq!(chain.balance(&test_addr()).unwrap(), 5 * subsidy_at(Height(1)).value());
}

#[test]
fn chain_work_never_decreases_across_acceptance() {
    let dir = tempdir::TempDir::new("utxod-scenarios").unwrap();
    let mut chain = open_chain(dir.path());
    let mut parent = Network::Testnet.genesis_block().header;
    let mut last_work = chain.best_work();
    for tag in 1..=3u8 {
        parent = extend(&mut chain, &parent, tag, Vec::new()).header;
        assert!(chain.best_work() > last_work);
        last_work = chain.best_work();
    }
}

#[test]
fn deeper_branch_wins_a_reorganization() {
    let dir = tempdir::TempDir::new("utxod-scenarios").unwrap();
    let mut chain = open_chain(dir.path());

    // Branch A: heights 1..=5.
    let mut a_headers = vec![Network::Testnet.genesis_block().header];
    for tag in 1..=5u8 {
        let header = extend(&mut chain, a_headers.last().unwrap(), tag, Vec::new()).header;
        a_headers.push(header);
    }
    let a_tip = chain.best_hash();
    let a4_coinbase = chain
        .read_block(&a_headers[4].hash())
        .unwrap()
        .unwrap()
        .transactions[0]
        .hash();

    // Branch B forks from height 3 and reaches height 6.
    let mut b_parent = a_headers[3];
    let mut b_blocks = Vec::new();
    for tag in 101..=103u8 {
        let height = 4 + (tag - 101) as u32;
        let txs = vec![Arc::new(coinbase_to(test_addr(), tag, subsidy_at(Height(height)).value()))];
        let block = fixtures::mine_on(&b_parent, txs);
        b_parent = block.header;
        b_blocks.push(Arc::new(block));
    }
    assert!(matches!(chain.accept_block(b_blocks[0].clone()).unwrap(), BlockOutcome::SideChain { .. }));
    assert!(matches!(chain.accept_block(b_blocks[1].clone()).unwrap(), BlockOutcome::SideChain { .. }));
    assert!(matches!(chain.accept_block(b_blocks[2].clone()).unwrap(), BlockOutcome::Connected { .. }));

    assert_eq!(chain.best_height(), Height(6));
    assert_eq!(chain.best_hash(), b_blocks[2].hash());
    assert_ne!(chain.best_hash(), a_tip);

    // The disconnected branch's coinbase left the confirmed index, and the
    // winning branch's five coinbases (3 shared + 3 new = heights 1,2,3 on
    // A plus 4,5,6 on B) are what the address holds now.
    assert!(!chain.has_transaction(&a4_coinbase).unwrap());
    assert_eq!(chain.debits(&test_addr()).unwrap().len(), 6);
}

#[test]
fn orphan_block_connects_when_its_parent_arrives() {
    let dir = tempdir::TempDir::new("utxod-scenarios").unwrap();
    let mut chain = open_chain(dir.path());
    let genesis = Network::Testnet.genesis_block().header;

    let block1 = fixtures::mine_on(&genesis, vec![Arc::new(coinbase_to(test_addr(), 1, subsidy_at(Height(1)).value()))]);
    let block2 = fixtures::mine_on(&block1.header, vec![Arc::new(coinbase_to(test_addr(), 2, subsidy_at(Height(2)).value()))]);

    let outcome = chain.accept_block(Arc::new(block2.clone())).unwrap();
    match outcome {
        BlockOutcome::Orphan { missing_root } => assert_eq!(missing_root, block1.hash()),
        other => panic!("expected an orphan outcome, got {:?}", other),
    }
    assert_eq!(chain.best_height(), Height(0));

    // Delivering the parent drains the buffered child too.
    chain.accept_block(Arc::new(block1)).unwrap();
    assert_eq!(chain.best_height(), Height(2));
    assert_eq!(chain.best_hash(), block2.hash());
}

/// Builds a chain long enough that the earliest coinbases are spendable.
fn mature_chain(chain: &mut Chain) -> Vec<Header> {
    let mut headers = vec![Network::Testnet.genesis_block().header];
    for tag in 0..COINBASE_MATURITY as u16 {
        let header = extend(chain, headers.last().unwrap(), (tag % 251) as u8 + 1, Vec::new()).header;
        headers.push(header);
    }
    headers
}

fn coinbase_coin(chain: &Chain, header: &Header) -> Coin {
    let block = chain.read_block(&header.hash()).unwrap().unwrap();
    Coin { tx_hash: block.transactions[0].hash(), index: 0 }
}

#[test]
fn orphan_transaction_waits_for_its_parent() {
    let dir = tempdir::TempDir::new("utxod-scenarios").unwrap();
    let mut chain = open_chain(dir.path());
    let headers = mature_chain(&mut chain);

    let mature = coinbase_coin(&chain, &headers[1]);
    let parent = Arc::new(spend_to(mature, test_addr(), subsidy_at(Height(1)).value()));
    let child = Arc::new(spend_to(Coin { tx_hash: parent.hash(), index: 0 }, test_addr(), subsidy_at(Height(1)).value()));

    match chain.accept_transaction(child.clone()).unwrap() {
        TxOutcome::Orphan { missing } => assert_eq!(missing, vec![parent.hash()]),
        other => panic!("expected an orphan outcome, got {:?}", other),
    }
    assert!(!chain.mempool().contains(&child.hash()));

    match chain.accept_transaction(parent.clone()).unwrap() {
        TxOutcome::Accepted { also_accepted } => assert_eq!(also_accepted, vec![child.hash()]),
        other => panic!("expected acceptance, got {:?}", other),
    }
    assert!(chain.mempool().contains(&parent.hash()));
    assert!(chain.mempool().contains(&child.hash()));
    assert!(chain.mempool().spender_of(&mature).is_some());
    assert!(chain.mempool().spender_of(&Coin { tx_hash: parent.hash(), index: 0 }).is_some());
}

#[test]
fn second_spend_of_an_outpoint_is_a_conflict() {
    let dir = tempdir::TempDir::new("utxod-scenarios").unwrap();
    let mut chain = open_chain(dir.path());
    let headers = mature_chain(&mut chain);

    let mature = coinbase_coin(&chain, &headers[1]);
    let tx_a = Arc::new(spend_to(mature, test_addr(), subsidy_at(Height(1)).value()));
    let tx_b = Arc::new(spend_to(mature, test_addr(), subsidy_at(Height(1)).value() - 2_000_000));
    assert_ne!(tx_a.hash(), tx_b.hash());

    assert!(matches!(chain.accept_transaction(tx_a.clone()).unwrap(), TxOutcome::Accepted { .. }));
    assert!(matches!(chain.accept_transaction(tx_b), Err(TransactionError::Conflict)));
    assert!(chain.mempool().contains(&tx_a.hash()));
    assert_eq!(chain.mempool().spender_of(&mature).unwrap().tx_hash, tx_a.hash());
}

#[test]
fn immature_coinbase_cannot_be_spent() {
    let dir = tempdir::TempDir::new("utxod-scenarios").unwrap();
    let mut chain = open_chain(dir.path());
    let headers = mature_chain(&mut chain);

    // The most recent coinbase is 1 confirmation deep, 99 short of maturity.
    let young = coinbase_coin(&chain, headers.last().unwrap());
    let tx = Arc::new(spend_to(young, test_addr(), subsidy_at(Height(1)).value()));
    assert!(matches!(chain.accept_transaction(tx), Err(TransactionError::ImmatureCoinbaseSpend)));
}

#[test]
fn mined_transaction_leaves_the_pool() {
    let dir = tempdir::TempDir::new("utxod-scenarios").unwrap();
    let mut chain = open_chain(dir.path());
    let headers = mature_chain(&mut chain);

    let mature = coinbase_coin(&chain, &headers[1]);
    let tx = Arc::new(spend_to(mature, test_addr(), subsidy_at(Height(1)).value()));
    chain.accept_transaction(tx.clone()).unwrap();
    assert!(chain.mempool().contains(&tx.hash()));

    let tip = *headers.last().unwrap();
    extend(&mut chain, &tip, 200, vec![tx.clone()]);
    assert!(!chain.mempool().contains(&tx.hash()));
    assert!(chain.has_transaction(&tx.hash()).unwrap());
    // The outpoint is now spent on the chain; respending it is refused.
    let retry = Arc::new(spend_to(mature, test_addr(), subsidy_at(Height(1)).value() - 2_000_000));
    assert!(matches!(chain.accept_transaction(retry), Err(TransactionError::MissingOrSpentInput)));
}

#[test]
fn spending_within_a_block_updates_the_spent_vector() {
    let dir = tempdir::TempDir::new("utxod-scenarios").unwrap();
    let mut chain = open_chain(dir.path());
    let headers = mature_chain(&mut chain);

    let mature = coinbase_coin(&chain, &headers[1]);
    let parent = Arc::new(spend_to(mature, test_addr(), subsidy_at(Height(1)).value()));
    let child = Arc::new(spend_to(Coin { tx_hash: parent.hash(), index: 0 }, test_addr(), subsidy_at(Height(1)).value()));

    // Both the parent and its same-block child connect in one block.
    let tip = *headers.last().unwrap();
    extend(&mut chain, &tip, 201, vec![parent.clone(), child.clone()]);
    assert_eq!(chain.confirmations(&parent.hash()).unwrap(), 1);
    assert_eq!(chain.confirmations(&child.hash()).unwrap(), 1);
    // The parent's only output is marked spent by the child.
    let respend = Arc::new(spend_to(Coin { tx_hash: parent.hash(), index: 0 }, test_addr(), 40_0000_0000));
    assert!(matches!(chain.accept_transaction(respend), Err(TransactionError::MissingOrSpentInput)));
}
