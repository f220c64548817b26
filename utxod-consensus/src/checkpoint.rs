//! Hard-coded checkpoints: heights at which exactly one block hash is
//! acceptable, regardless of accumulated work. A peer feeding us an
//! alternative history below the latest checkpoint is wasting its breath.

use once_cell::sync::Lazy;

use utxod_chain::block::{Hash, Height};
use utxod_chain::parameters::Network;

static MAINNET: Lazy<Vec<(Height, Hash)>> = Lazy::new(|| vec![(Height(0), Network::Mainnet.genesis_hash())]);
static TESTNET: Lazy<Vec<(Height, Hash)>> = Lazy::new(|| vec![(Height(0), Network::Testnet.genesis_hash())]);

fn table(network: Network) -> &'static [(Height, Hash)] {
    match network {
        Network::Mainnet => &MAINNET,
        Network::Testnet => &TESTNET,
    }
}

/// Returns `Ok(())` unless `height` is a checkpointed height and `hash`
/// differs from the checkpointed hash.
pub fn verify(network: Network, height: Height, hash: &Hash) -> Result<(), Height> {
    let checkpoints = table(network);
    match checkpoints.binary_search_by_key(&height, |entry| entry.0) {
        Ok(i) if checkpoints[i].1 == *hash => Ok(()),
        Ok(_) => Err(height),
        Err(_) => Ok(()),
    }
}

/// The height of the highest checkpoint at or below `height`, used to size
/// how much history a peer could plausibly still reorganize.
pub fn last_checkpoint_at_or_below(network: Network, height: Height) -> Height {
    let checkpoints = table(network);
    match checkpoints.binary_search_by_key(&height, |entry| entry.0) {
        Ok(i) => checkpoints[i].0,
        Err(0) => Height(0),
        Err(i) => checkpoints[i - 1].0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn genesis_checkpoint_accepts_only_the_genesis_hash() {
        let genesis = Network::Mainnet.genesis_hash();
        assert!(verify(Network::Mainnet, Height(0), &genesis).is_ok());
        assert!(verify(Network::Mainnet, Height(0), &Hash([0xAB; 32])).is_err());
    }

    #[test]
    fn unlisted_heights_are_unconstrained() {
        assert!(verify(Network::Mainnet, Height(42), &Hash([0xAB; 32])).is_ok());
    }
}
