//! Context-free transaction checks: everything that can be decided from
//! the transaction bytes alone, with no index lookups.

use std::collections::HashSet;

use utxod_chain::amount::MAX_MONEY;
use utxod_chain::transaction::{Transaction, MAX_TX_SIZE};
use utxod_chain::transparent::Input;
use utxod_script::template::{self, Template};

use crate::error::TransactionError;

/// The relay floor: anything smaller cannot be a meaningful spend and is
/// refused by the pool of unconfirmed transactions.
pub const MIN_RELAY_TX_SIZE: usize = 100;

/// One signature operation is allowed per this many bytes of transaction.
pub const BYTES_PER_SIGOP: usize = 34;

/// Structural validity, applied to every transaction whether it arrived in
/// a block or on its own.
pub fn is_well_formed(tx: &Transaction) -> Result<(), TransactionError> {
    if tx.inputs.is_empty() {
        return Err(TransactionError::NoInputs);
    }
    if tx.outputs.is_empty() {
        return Err(TransactionError::NoOutputs);
    }
    if tx.len() as u64 > MAX_TX_SIZE {
        return Err(TransactionError::TooLarge(MAX_TX_SIZE));
    }

    // Individual output values are range-checked at construction; the sum
    // still has to be checked here.
    let mut total: i64 = 0;
    for output in tx.outputs.iter() {
        total = total.checked_add(output.value.value()).ok_or(TransactionError::OutputsOutOfRange)?;
        if total > MAX_MONEY {
            return Err(TransactionError::OutputsOutOfRange);
        }
    }

    let mut seen = HashSet::new();
    for input in tx.inputs.iter() {
        match input {
            Input::PrevOut { prev, .. } => {
                if prev.is_null() {
                    return Err(TransactionError::NullPrevOut);
                }
                if !seen.insert(*prev) {
                    return Err(TransactionError::DuplicateInputs);
                }
            }
            Input::Coinbase { data, .. } => {
                if !tx.is_coinbase() {
                    // A coinbase input anywhere but as the sole input of a
                    // coinbase transaction reads as a null prev-out.
                    return Err(TransactionError::NullPrevOut);
                }
                if !(2..=100).contains(&data.0.len()) {
                    return Err(TransactionError::BadCoinbaseData(data.0.len()));
                }
            }
        }
    }
    Ok(())
}

/// Relay policy: only recognized script shapes, a sane size, and a bounded
/// signature-operation density. Blocks may carry transactions this refuses;
/// the unconfirmed pool will not.
pub fn is_standard(tx: &Transaction) -> Result<(), TransactionError> {
    let size = tx.len();
    if size < MIN_RELAY_TX_SIZE {
        return Err(TransactionError::Undersized(MIN_RELAY_TX_SIZE));
    }
    for output in tx.outputs.iter() {
        match template::Template::match_script(&output.script) {
            Template::Pubkey(_) | Template::PubkeyHash(_) | Template::ScriptHash(_) | Template::Multisig { .. } => {}
            Template::NullData(_) | Template::NonStandard => return Err(TransactionError::NonStandardScript),
        }
    }
    if sigop_count(tx) > size / BYTES_PER_SIGOP {
        return Err(TransactionError::TooManySigOps);
    }
    Ok(())
}

/// Signature operations across every script the transaction carries.
pub fn sigop_count(tx: &Transaction) -> usize {
    let mut count = 0;
    for input in tx.inputs.iter() {
        if let Input::PrevOut { signature_script, .. } = input {
            count += template::sigop_count(signature_script.as_bytes());
        }
    }
    for output in tx.outputs.iter() {
        count += template::sigop_count(output.script.as_bytes());
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use utxod_chain::amount::{Amount, NonNegative};
    use utxod_chain::transaction::LockTime;
    use utxod_chain::transparent::{Coin, Output, Script, SEQUENCE_FINAL};
    use utxod_chain::{hash::Hash256, transaction};

    fn coin(tag: &[u8], index: u32) -> Coin {
        Coin { tx_hash: transaction::Hash(Hash256::of(tag)), index }
    }

    fn spend(inputs: Vec<Input>) -> Transaction {
        Transaction::new(
            1,
            inputs,
            vec![Output { value: Amount::<NonNegative>::try_new(1).unwrap(), script: Script(Vec::new()) }],
            LockTime::zero(),
        )
    }

    fn prev_out(prev: Coin) -> Input {
        Input::PrevOut { prev, signature_script: Script(Vec::new()), sequence: SEQUENCE_FINAL }
    }

    #[test]
    fn duplicate_inputs_are_rejected() {
        let tx = spend(vec![prev_out(coin(b"a", 0)), prev_out(coin(b"a", 0))]);
        assert!(matches!(is_well_formed(&tx), Err(TransactionError::DuplicateInputs)));
    }

    #[test]
    fn distinct_inputs_pass() {
        let tx = spend(vec![prev_out(coin(b"a", 0)), prev_out(coin(b"a", 1))]);
        assert!(is_well_formed(&tx).is_ok());
    }

    #[test]
    fn null_prev_out_is_rejected() {
        let tx = spend(vec![prev_out(Coin::null())]);
        assert!(matches!(is_well_formed(&tx), Err(TransactionError::NullPrevOut)));
    }

    #[test]
    fn output_sum_must_stay_in_money_range() {
        let half = Amount::<NonNegative>::try_new(MAX_MONEY / 2 + 1).unwrap();
        let tx = Transaction::new(
            1,
            vec![prev_out(coin(b"a", 0))],
            vec![
                Output { value: half, script: Script(Vec::new()) },
                Output { value: half, script: Script(Vec::new()) },
            ],
            LockTime::zero(),
        );
        assert!(matches!(is_well_formed(&tx), Err(TransactionError::OutputsOutOfRange)));
    }

    #[test]
    fn non_standard_output_script_fails_policy() {
        let mut tx = spend(vec![prev_out(coin(b"a", 0))]);
        // Pad the scriptSig so the transaction clears the size floor; the
        // empty output script is still non-standard.
        tx.inputs[0] = Input::PrevOut { prev: coin(b"a", 0), signature_script: Script(vec![0x01; 120]), sequence: SEQUENCE_FINAL };
        assert!(matches!(is_standard(&tx), Err(TransactionError::NonStandardScript)));
    }
}
