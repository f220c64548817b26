//! End-to-end RPC method behavior against a real chain engine on the test
//! network.

use std::sync::{Arc, Mutex};

use serde_json::{json, Value};

use utxod_chain::amount::{Amount, NonNegative};
use utxod_chain::block::Height;
use utxod_chain::hash::Hash160;
use utxod_chain::parameters::{subsidy_at, Network, COINBASE_MATURITY};
use utxod_chain::transaction::{LockTime, Transaction};
use utxod_chain::transparent::{CoinbaseData, Input, Output, Script, SEQUENCE_FINAL};
use utxod_consensus::chain::Chain;
use utxod_rpc::methods::{dispatch, RpcContext};
use utxod_script::Opcode;
use utxod_test::fixtures;

struct AcceptAll;
impl utxod_script::Verifier for AcceptAll {
    fn verify(&self, _pubkey: &[u8], _signature: &[u8], _message: &[u8; 32]) -> bool {
        true
    }
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

fn p2pkh_sig_script_hex() -> String {
    let mut sig = vec![0x30; 70];
    sig.push(0x01);
    let mut bytes = vec![sig.len() as u8];
    bytes.extend_from_slice(&sig);
    let pubkey = test_pubkey();
    bytes.push(pubkey.len() as u8);
    bytes.extend_from_slice(&pubkey);
    hex::encode(bytes)
}

fn coinbase_to(addr: Hash160, tag: u8, value: i64) -> Transaction {
    Transaction::new(
        1,
        vec![Input::Coinbase { height: None, data: CoinbaseData(vec![0x03, tag, 0x00, 0x00]), sequence: SEQUENCE_FINAL }],
        vec![Output { value: Amount::<NonNegative>::try_new(value).unwrap(), script: p2pkh_script(addr) }],
        LockTime::zero(),
    )
}

/// A chain whose first coinbase has matured, every block paying the test
/// address.
fn mature_chain(dir: &std::path::Path) -> Chain {
    utxod_test::init();
    let mut chain = Chain::open(Network::Testnet, dir, Arc::new(AcceptAll)).unwrap();
    let mut parent = Network::Testnet.genesis_block().header;
    for tag in 0..COINBASE_MATURITY as u16 {
        let height = chain.best_height().0 + 1;
        let coinbase = coinbase_to(test_addr(), (tag % 251) as u8 + 1, subsidy_at(Height(height)).value());
        let block = fixtures::mine_on(&parent, vec![Arc::new(coinbase)]);
        parent = block.header;
        chain.accept_block(Arc::new(block)).unwrap();
    }
    chain
}

fn context(chain: Chain) -> RpcContext {
    RpcContext { chain: Arc::new(Mutex::new(chain)), network: None }
}

#[test]
fn balance_methods_agree_with_the_chain() {
    let dir = tempdir::TempDir::new("utxod-rpc").unwrap();
    let ctx = context(mature_chain(dir.path()));
    let addr_text = test_addr().to_string();

    let debits = dispatch(&ctx, "getdebit", &[json!(addr_text)]).unwrap();
    assert_eq!(debits.as_array().unwrap().len(), COINBASE_MATURITY as usize);

    let credits = dispatch(&ctx, "getcredit", &[json!(addr_text)]).unwrap();
    assert!(credits.as_array().unwrap().is_empty());

    let coins = dispatch(&ctx, "getcoins", &[json!(addr_text)]).unwrap();
    assert_eq!(coins.as_array().unwrap().len(), COINBASE_MATURITY as usize);

    let value = dispatch(&ctx, "getvalue", &[json!(addr_text)]).unwrap();
    assert_eq!(value.as_i64().unwrap(), COINBASE_MATURITY as i64 * subsidy_at(Height(1)).value());
}

#[test]
fn unknown_method_and_bad_params_are_rejected() {
    let dir = tempdir::TempDir::new("utxod-rpc").unwrap();
    let chain = {
        utxod_test::init();
        Chain::open(Network::Testnet, dir.path(), Arc::new(AcceptAll)).unwrap()
    };
    let ctx = context(chain);
    assert!(dispatch(&ctx, "frobnicate", &[]).is_err());
    assert!(dispatch(&ctx, "getvalue", &[json!("not hex")]).is_err());
    assert!(dispatch(&ctx, "getvalue", &[]).is_err());
}

#[test]
fn posttx_accepts_a_spend_and_details_report_it() {
    let dir = tempdir::TempDir::new("utxod-rpc").unwrap();
    let ctx = context(mature_chain(dir.path()));

    // The first mined coinbase is now spendable.
    let mature_coinbase_hash = {
        let chain = ctx.chain.lock().unwrap();
        let debits = chain.debits(&test_addr()).unwrap();
        let mut coins: Vec<_> = debits.into_iter().collect();
        coins.sort();
        let spendable = coins
            .iter()
            .find(|coin| chain.confirmations(&coin.tx_hash).unwrap() >= COINBASE_MATURITY)
            .expect("some coinbase has matured");
        spendable.tx_hash
    };

    let description = json!({
        "version": 1,
        "lock_time": 0,
        "in": [{
            "prev_out": { "hash": mature_coinbase_hash.to_string(), "n": 0 },
            "scriptSig": p2pkh_sig_script_hex(),
        }],
        "out": [{
            "value": "50.00000000",
            "scriptPubKey": hex::encode(p2pkh_script(test_addr()).as_bytes()),
        }],
    });
    let result = dispatch(&ctx, "posttx", &[description]).unwrap();
    assert_eq!(result, Value::Null);

    // The pooled transaction shows up unconfirmed in the details view.
    let spender_hash = {
        let chain = ctx.chain.lock().unwrap();
        let hash = chain.mempool().transactions().next().unwrap().hash();
        hash
    };
    let details = dispatch(&ctx, "gettxdetails", &[json!(spender_hash.to_string())]).unwrap();
    assert_eq!(details["blockheight"], Value::Null);
    assert_eq!(details["vin_sz"], json!(1));
    assert_eq!(details["out"][0]["value"], json!("50.00000000"));

    let maturity = dispatch(&ctx, "gettxmaturity", &[json!(spender_hash.to_string())]).unwrap();
    assert_eq!(maturity["confirmations"], json!(0));
    assert_eq!(maturity["of_nodes"], json!(0));

    // Double-submitting the same outpoint is refused.
    let double = json!({
        "version": 1,
        "lock_time": 0,
        "in": [{
            "prev_out": { "hash": mature_coinbase_hash.to_string(), "n": 0 },
            "scriptSig": p2pkh_sig_script_hex(),
        }],
        "out": [{
            "value": "49.00000000",
            "scriptPubKey": hex::encode(p2pkh_script(test_addr()).as_bytes()),
        }],
    });
    assert!(dispatch(&ctx, "posttx", &[double]).is_err());
}
