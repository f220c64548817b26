//! The RPC method implementations.
//!
//! Addresses travel as hex-encoded 160-bit hashes (the wallet owns the
//! human-readable address codec); transaction ids as the usual reversed
//! hex. Monetary values are fixed 8-decimal strings in outputs and in the
//! `posttx` input shape, and plain integers where the method name says so.

use std::str::FromStr;
use std::sync::{Arc, Mutex};

use serde_json::{json, Value};

use utxod_chain::amount::{Amount, NonNegative};
use utxod_chain::hash::Hash160;
use utxod_chain::transaction::{Hash as TxHash, LockTime, Transaction};
use utxod_chain::transparent::{Coin, Input, Output, Script, SEQUENCE_FINAL};
use utxod_consensus::chain::{Chain, TxOutcome};
use utxod_network::peer_set::NetworkHandle;

use crate::error::RpcError;

/// Everything the method handlers reach for.
pub struct RpcContext {
    pub chain: Arc<Mutex<Chain>>,
    /// Absent in isolated setups (no peers, e.g. some tests); maturity
    /// then reports zero peers and `posttx` skips relay.
    pub network: Option<NetworkHandle>,
}

pub fn dispatch(ctx: &RpcContext, method: &str, params: &[Value]) -> Result<Value, RpcError> {
    match method {
        "getdebit" => getdebit(ctx, params),
        "getcredit" => getcredit(ctx, params),
        "getcoins" => getcoins(ctx, params),
        "getvalue" => getvalue(ctx, params),
        "gettxdetails" => gettxdetails(ctx, params),
        "gettxmaturity" => gettxmaturity(ctx, params),
        "posttx" => posttx(ctx, params),
        _ => Err(RpcError::MethodNotFound),
    }
}

fn address_param(params: &[Value]) -> Result<Hash160, RpcError> {
    let text = params
        .get(0)
        .and_then(Value::as_str)
        .ok_or_else(|| RpcError::InvalidParams("expected an address string".to_owned()))?;
    let mut bytes = [0u8; 20];
    hex::decode_to_slice(text, &mut bytes)
        .map_err(|_| RpcError::InvalidParams("address must be 40 hex characters".to_owned()))?;
    Ok(Hash160(bytes))
}

fn tx_hash_param(params: &[Value]) -> Result<TxHash, RpcError> {
    let text = params
        .get(0)
        .and_then(Value::as_str)
        .ok_or_else(|| RpcError::InvalidParams("expected a transaction hash string".to_owned()))?;
    TxHash::from_str(text).map_err(|_| RpcError::InvalidParams("malformed transaction hash".to_owned()))
}

fn coin_json(coin: &Coin) -> Value {
    json!({ "hash": coin.tx_hash.to_string(), "n": coin.index })
}

fn coins_json(coins: impl IntoIterator<Item = Coin>) -> Value {
    let mut coins: Vec<Coin> = coins.into_iter().collect();
    coins.sort();
    Value::Array(coins.iter().map(coin_json).collect())
}

fn getdebit(ctx: &RpcContext, params: &[Value]) -> Result<Value, RpcError> {
    let addr = address_param(params)?;
    let chain = ctx.chain.lock().expect("chain lock poisoned");
    let debits = chain.debits(&addr).map_err(|e| RpcError::Internal(e.to_string()))?;
    Ok(coins_json(debits))
}

fn getcredit(ctx: &RpcContext, params: &[Value]) -> Result<Value, RpcError> {
    let addr = address_param(params)?;
    let chain = ctx.chain.lock().expect("chain lock poisoned");
    let credits = chain.credits(&addr).map_err(|e| RpcError::Internal(e.to_string()))?;
    Ok(coins_json(credits))
}

fn getcoins(ctx: &RpcContext, params: &[Value]) -> Result<Value, RpcError> {
    let addr = address_param(params)?;
    let chain = ctx.chain.lock().expect("chain lock poisoned");
    let coins = chain.unspent_coins(&addr).map_err(|e| RpcError::Internal(e.to_string()))?;
    Ok(coins_json(coins))
}

fn getvalue(ctx: &RpcContext, params: &[Value]) -> Result<Value, RpcError> {
    let addr = address_param(params)?;
    let chain = ctx.chain.lock().expect("chain lock poisoned");
    let balance = chain.balance(&addr).map_err(|e| RpcError::Internal(e.to_string()))?;
    Ok(json!(balance))
}

fn gettxdetails(ctx: &RpcContext, params: &[Value]) -> Result<Value, RpcError> {
    let hash = tx_hash_param(params)?;
    let chain = ctx.chain.lock().expect("chain lock poisoned");
    let info = chain
        .transaction_info(&hash)
        .map_err(|e| RpcError::Internal(e.to_string()))?
        .ok_or_else(|| RpcError::InvalidParams("unknown transaction".to_owned()))?;

    let inputs: Vec<Value> = info
        .tx
        .inputs
        .iter()
        .map(|input| match input {
            Input::PrevOut { prev, signature_script, .. } => json!({
                "prev_out": coin_json(prev),
                "scriptSig": hex::encode(signature_script.as_bytes()),
            }),
            Input::Coinbase { data, .. } => json!({ "coinbase": hex::encode(&data.0) }),
        })
        .collect();
    let outputs: Vec<Value> = info
        .tx
        .outputs
        .iter()
        .map(|output| {
            json!({
                "value": output.value.to_string(),
                "scriptPubKey": hex::encode(output.script.as_bytes()),
            })
        })
        .collect();

    Ok(json!({
        "hash": hash.to_string(),
        "ver": info.tx.version,
        "vin_sz": info.tx.inputs.len(),
        "vout_sz": info.tx.outputs.len(),
        "lock_time": info.tx.lock_time.raw_value(),
        "size": info.tx.len(),
        "timestamp": info.block_time.map(|t| t.timestamp()),
        "blockheight": info.height.map(|h| h.0),
        "in": inputs,
        "out": outputs,
    }))
}

fn gettxmaturity(ctx: &RpcContext, params: &[Value]) -> Result<Value, RpcError> {
    let hash = tx_hash_param(params)?;
    let confirmations = {
        let chain = ctx.chain.lock().expect("chain lock poisoned");
        chain.confirmations(&hash).map_err(|e| RpcError::Internal(e.to_string()))?
    };
    let (known, total) = match &ctx.network {
        Some(network) if confirmations == 0 => network.known_in_nodes(hash),
        _ => (0, ctx.network.as_ref().map(|n| n.peer_count()).unwrap_or(0)),
    };
    Ok(json!({
        "confirmations": confirmations,
        "known_in_nodes": known,
        "of_nodes": total,
    }))
}

fn posttx(ctx: &RpcContext, params: &[Value]) -> Result<Value, RpcError> {
    let description = params
        .get(0)
        .ok_or_else(|| RpcError::InvalidParams("expected a transaction object".to_owned()))?;
    let tx = Arc::new(parse_transaction(description)?);

    let outcome = {
        let mut chain = ctx.chain.lock().expect("chain lock poisoned");
        chain.accept_transaction(tx.clone())?
    };
    match outcome {
        TxOutcome::Accepted { .. } => {
            if let Some(network) = &ctx.network {
                network.announce_transaction(tx);
            }
            Ok(Value::Null)
        }
        TxOutcome::Orphan { missing } => Err(RpcError::InvalidParams(format!(
            "transaction spends {} unknown parent(s); submit those first",
            missing.len()
        ))),
    }
}

/// Parses the `posttx` transaction shape, the mirror of `gettxdetails`:
/// `{version, lock_time, in: [{prev_out: {hash, n}, scriptSig}], out:
/// [{value: "x.xxxxxxxx", scriptPubKey}]}`.
fn parse_transaction(value: &Value) -> Result<Transaction, RpcError> {
    let bad = |msg: &str| RpcError::InvalidParams(msg.to_owned());

    let version = value.get("version").and_then(Value::as_i64).unwrap_or(1) as i32;
    let lock_time = LockTime::from(value.get("lock_time").and_then(Value::as_u64).unwrap_or(0) as u32);

    let mut inputs = Vec::new();
    for input in value.get("in").and_then(Value::as_array).ok_or_else(|| bad("missing 'in' array"))? {
        let prev_out = input.get("prev_out").ok_or_else(|| bad("input is missing prev_out"))?;
        let hash_text = prev_out.get("hash").and_then(Value::as_str).ok_or_else(|| bad("prev_out is missing hash"))?;
        let tx_hash = TxHash::from_str(hash_text).map_err(|_| bad("malformed prev_out hash"))?;
        let index = prev_out.get("n").and_then(Value::as_u64).ok_or_else(|| bad("prev_out is missing n"))? as u32;
        let script_hex = input.get("scriptSig").and_then(Value::as_str).ok_or_else(|| bad("input is missing scriptSig"))?;
        let signature_script = Script(hex::decode(script_hex).map_err(|_| bad("scriptSig is not hex"))?);
        inputs.push(Input::PrevOut { prev: Coin { tx_hash, index }, signature_script, sequence: SEQUENCE_FINAL });
    }

    let mut outputs = Vec::new();
    for output in value.get("out").and_then(Value::as_array).ok_or_else(|| bad("missing 'out' array"))? {
        let value_text = output.get("value").and_then(Value::as_str).ok_or_else(|| bad("output is missing value"))?;
        let satoshis = parse_amount(value_text).ok_or_else(|| bad("malformed output value"))?;
        let amount = Amount::<NonNegative>::try_new(satoshis).map_err(|_| bad("output value out of range"))?;
        let script_hex = output.get("scriptPubKey").and_then(Value::as_str).ok_or_else(|| bad("output is missing scriptPubKey"))?;
        let script = Script(hex::decode(script_hex).map_err(|_| bad("scriptPubKey is not hex"))?);
        outputs.push(Output { value: amount, script });
    }

    Ok(Transaction::new(version, inputs, outputs, lock_time))
}

/// Parses a fixed-point decimal coin amount ("12.34500000") into the
/// smallest unit. At most eight fractional digits.
fn parse_amount(text: &str) -> Option<i64> {
    let mut parts = text.splitn(2, '.');
    let whole: i64 = parts.next()?.parse().ok()?;
    let frac_text = parts.next().unwrap_or("0");
    if frac_text.len() > 8 || frac_text.is_empty() {
        return None;
    }
    let frac: i64 = frac_text.parse().ok()?;
    let scale = 10i64.pow(8 - frac_text.len() as u32);
    Some(whole.checked_mul(100_000_000)?.checked_add(frac.checked_mul(scale)?)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn amounts_parse_to_the_smallest_unit() {
        assert_eq!(parse_amount("50.00000000"), Some(50_0000_0000));
        assert_eq!(parse_amount("0.00000001"), Some(1));
        assert_eq!(parse_amount("1.5"), Some(1_5000_0000));
        assert_eq!(parse_amount("12"), Some(12_0000_0000));
        assert_eq!(parse_amount("1.123456789"), None);
        assert_eq!(parse_amount("abc"), None);
    }

    #[test]
    fn transaction_shape_round_trips_through_parse() {
        let description = json!({
            "version": 1,
            "lock_time": 0,
            "in": [{
                "prev_out": { "hash": "00".repeat(32), "n": 0 },
                "scriptSig": "0101",
            }],
            "out": [{
                "value": "49.99000000",
                "scriptPubKey": "76a914".to_owned() + &"ab".repeat(20) + "88ac",
            }],
        });
        let tx = parse_transaction(&description).unwrap();
        assert_eq!(tx.inputs.len(), 1);
        assert_eq!(tx.outputs.len(), 1);
        assert_eq!(tx.outputs[0].value.value(), 49_9900_0000);
    }
}
