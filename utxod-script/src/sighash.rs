//! Signature hash construction: the message an input's signature
//! actually signs — the transaction with every other input's script
//! blanked out and the spent input's previous script substituted in,
//! following the reference implementation's `SignatureHash`.

use utxod_chain::amount::{Amount, NonNegative};
use utxod_chain::hash::Hash256;
use utxod_chain::serialization::Encode;
use utxod_chain::transaction::Transaction;
use utxod_chain::transparent::{Input, Output, Script};

pub const SIGHASH_ALL: u8 = 1;
pub const SIGHASH_NONE: u8 = 2;
pub const SIGHASH_SINGLE: u8 = 3;
pub const SIGHASH_ANYONECANPAY: u8 = 0x80;

/// Computes the sighash for `input_index` of `tx`, as if that input's
/// script were `subscript` (the previous output's script, with the most
/// recent `OP_CODESEPARATOR` and any push of the signature itself removed —
/// simplified here to "the whole previous script", since this crate drops
/// `OP_CODESEPARATOR` sub-scripting).
pub fn compute(tx: &Transaction, input_index: usize, subscript: &Script, hash_type: u8) -> [u8; 32] {
    let base_type = hash_type & !SIGHASH_ANYONECANPAY;

    let inputs: Vec<Input> = if hash_type & SIGHASH_ANYONECANPAY != 0 {
        vec![blanked_input(&tx.inputs[input_index], subscript)]
    } else {
        tx.inputs
            .iter()
            .enumerate()
            .map(|(i, input)| if i == input_index { blanked_input(input, subscript) } else { blank_script(input) })
            .collect()
    };

    let outputs = match base_type {
        SIGHASH_NONE => Vec::new(),
        SIGHASH_SINGLE if input_index < tx.outputs.len() => {
            let blank = Output { value: Amount::<NonNegative>::zero(), script: Script(Vec::new()) };
            let mut outs = vec![blank; input_index];
            outs.push(tx.outputs[input_index].clone());
            outs
        }
        _ => tx.outputs.clone(),
    };

    let sequences_zeroed = base_type == SIGHASH_NONE || base_type == SIGHASH_SINGLE;
    let inputs = if sequences_zeroed {
        inputs
            .into_iter()
            .enumerate()
            .map(|(i, input)| if i == input_index { input } else { zero_sequence(input) })
            .collect()
    } else {
        inputs
    };

    let shallow = Transaction::new(tx.version, inputs, outputs, tx.lock_time);
    let mut bytes = shallow.encode_to_vec().expect("in-memory encode is infallible");
    bytes.extend_from_slice(&(hash_type as u32).to_le_bytes());
    Hash256::of(&bytes).0
}

/// The hash-type byte an input's signature was made under: the last byte of
/// the first push in its signature script. Defaults to `SIGHASH_ALL` when
/// the script has no leading push (an empty or non-standard scriptSig).
pub fn hash_type_of(signature_script: &Script) -> u8 {
    let bytes = signature_script.as_bytes();
    let len = match bytes.first() {
        Some(&op) if (0x01..=0x4b).contains(&op) => op as usize,
        _ => return SIGHASH_ALL,
    };
    match bytes.get(1..1 + len).and_then(<[u8]>::last) {
        Some(&hash_type) => hash_type,
        None => SIGHASH_ALL,
    }
}

fn blanked_input(input: &Input, subscript: &Script) -> Input {
    match input {
        Input::PrevOut { prev, sequence, .. } => Input::PrevOut { prev: *prev, signature_script: subscript.clone(), sequence: *sequence },
        Input::Coinbase { height, data, sequence } => Input::Coinbase { height: *height, data: data.clone(), sequence: *sequence },
    }
}

fn blank_script(input: &Input) -> Input {
    match input {
        Input::PrevOut { prev, sequence, .. } => Input::PrevOut { prev: *prev, signature_script: Script(Vec::new()), sequence: *sequence },
        other => other.clone(),
    }
}

fn zero_sequence(input: Input) -> Input {
    match input {
        Input::PrevOut { prev, signature_script, .. } => Input::PrevOut { prev, signature_script, sequence: 0 },
        Input::Coinbase { height, data, .. } => Input::Coinbase { height, data, sequence: 0 },
    }
}
