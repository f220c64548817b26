//! Context-free block checks: everything decidable from the block bytes
//! and the local clock, before the parent is even looked up.

use chrono::{DateTime, Utc};
use primitive_types::U256;

use utxod_chain::block::{Block, Height, MAX_BLOCK_BYTES};
use utxod_chain::serialization::VarInt;

use crate::error::BlockError;
use crate::transaction::check as tx_check;

/// The cap on signature operations per block, bounding worst-case
/// validation cost.
pub const MAX_BLOCK_SIGOPS: usize = 20_000;

/// Serialized size of the block, computed without serializing.
pub fn serialized_len(block: &Block) -> usize {
    let mut size = utxod_chain::block::Header::len() + VarInt::size(block.transactions.len());
    for tx in block.transactions.iter() {
        size += tx.len();
    }
    size
}

/// Runs the full context-free suite. `now` is the local clock, injected so
/// tests can pin it.
pub fn block_is_valid(block: &Block, now: DateTime<Utc>) -> Result<(), BlockError> {
    has_transactions_within_size(block)?;
    header_satisfies_own_work(block)?;
    let height = block.coinbase_height().unwrap_or(Height(0));
    block.header.time_is_valid_at(now, &height)?;
    coinbase_is_first(block)?;
    for tx in block.transactions.iter() {
        tx_check::is_well_formed(tx)?;
    }
    sigops_within_limit(block)?;
    merkle_root_matches(block)?;
    Ok(())
}

pub fn has_transactions_within_size(block: &Block) -> Result<(), BlockError> {
    if block.transactions.is_empty() {
        return Err(BlockError::NoTransactions);
    }
    if serialized_len(block) as u64 > MAX_BLOCK_BYTES {
        return Err(BlockError::TooLarge(MAX_BLOCK_BYTES));
    }
    Ok(())
}

/// The header's own hash must satisfy the target the header claims. Whether
/// that claim matches the retarget schedule is a contextual question
/// answered later; a header that fails its *own* claim is garbage now.
pub fn header_satisfies_own_work(block: &Block) -> Result<(), BlockError> {
    let target = block.header.difficulty_threshold.to_target();
    let hash_value = U256::from_little_endian(&block.hash().0);
    if hash_value > target {
        return Err(BlockError::HeaderWorkInvalid);
    }
    Ok(())
}

/// Exactly one coinbase, and it comes first.
pub fn coinbase_is_first(block: &Block) -> Result<(), BlockError> {
    let first = block.transactions.get(0).ok_or(BlockError::NoTransactions)?;
    if !first.is_coinbase() {
        return Err(BlockError::CoinbasePosition);
    }
    if block.transactions.iter().skip(1).any(|tx| tx.contains_coinbase_input()) {
        return Err(BlockError::CoinbasePosition);
    }
    Ok(())
}

pub fn sigops_within_limit(block: &Block) -> Result<(), BlockError> {
    let total: usize = block.transactions.iter().map(|tx| tx_check::sigop_count(tx)).sum();
    if total > MAX_BLOCK_SIGOPS {
        return Err(BlockError::TooManySigOps(MAX_BLOCK_SIGOPS));
    }
    Ok(())
}

/// The header's merkle root must match the tree rebuilt from the block's
/// transactions, and no transaction may appear twice. The duplicate check
/// closes the known tree malleability: duplicating trailing transactions
/// can produce the same root as the honest list.
pub fn merkle_root_matches(block: &Block) -> Result<(), BlockError> {
    if block.computed_merkle_root() != block.header.merkle_root {
        return Err(BlockError::BadMerkleRoot);
    }
    let mut seen = std::collections::HashSet::new();
    for tx in block.transactions.iter() {
        if !seen.insert(tx.hash()) {
            return Err(BlockError::DuplicateTransaction);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use utxod_chain::parameters::Network;

    #[test]
    fn genesis_passes_the_structural_checks() {
        // The genesis block is written at initialization rather than mined,
        // so it is exempt from the work check — everything else holds.
        let genesis = Network::Mainnet.genesis_block();
        has_transactions_within_size(&genesis).unwrap();
        coinbase_is_first(&genesis).unwrap();
        merkle_root_matches(&genesis).unwrap();
        sigops_within_limit(&genesis).unwrap();
    }

    #[test]
    fn tampered_merkle_root_is_caught() {
        let mut block = Network::Mainnet.genesis_block();
        block.header.merkle_root = utxod_chain::block::merkle::Root([0xAB; 32]);
        assert!(matches!(merkle_root_matches(&block), Err(BlockError::BadMerkleRoot)));
    }

    #[test]
    fn a_block_without_a_leading_coinbase_is_rejected() {
        let mut block = Network::Mainnet.genesis_block();
        block.transactions.clear();
        assert!(matches!(coinbase_is_first(&block), Err(BlockError::NoTransactions)));
    }

    #[test]
    fn serialized_len_matches_the_codec() {
        let genesis = Network::Mainnet.genesis_block();
        let encoded = utxod_chain::Encode::encode_to_vec(&genesis).unwrap();
        assert_eq!(serialized_len(&genesis), encoded.len());
    }
}
