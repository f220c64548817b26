//! The pool of accepted, unconfirmed transactions.
//!
//! This module is the bookkeeping half: membership, the one-spender-per-
//! outpoint map, the address-indexed views of unconfirmed coins, the
//! orphan buffer, and the free-relay throttle. Admission policy (fees,
//! scripts, input resolution) lives in [`crate::chain::Chain`], which has
//! the index access those checks need.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};

use utxod_chain::hash::Hash160;
use utxod_chain::transaction::{Hash as TxHash, Transaction};
use utxod_chain::transparent::{Coin, Input, Output};
use utxod_script::template::Template;

/// Fee floor per started kilobyte for pool admission and relay.
pub const MIN_RELAY_TX_FEE: i64 = 10_000;

/// Below this output value the fee floor is raised: sub-cent outputs are
/// close to dust and must pay their way.
pub const CENT: i64 = 1_000_000;

/// Fee floor applied when any output is below [`CENT`].
pub const DUST_TX_FEE: i64 = 50_000;

/// Free transactions may consume this many bytes per rolling ten-minute
/// window before the throttle closes (15 kB/minute).
pub const FREE_RELAY_BYTES: f64 = 150_000.0;

/// Decay time constant of the free-relay counter, in seconds.
const FREE_RELAY_DECAY_SECS: f64 = 600.0;

/// The orphan buffer keeps at most this many parentless transactions.
const MAX_ORPHAN_TRANSACTIONS: usize = 1_000;

/// Transactions smaller than this may qualify for free relay.
pub const FREE_TX_SIZE: usize = 10_000;

/// The minimum fee for a transaction of `size` bytes. Small relayed
/// transactions may ride free (subject to the throttle), but a dust output
/// always pays the raised floor.
pub fn min_fee(size: usize, allow_free: bool, has_dust_output: bool) -> i64 {
    let mut fee = (size as i64 + 999) / 1000 * MIN_RELAY_TX_FEE;
    if allow_free && size < FREE_TX_SIZE {
        fee = 0;
    }
    if has_dust_output {
        fee = fee.max(DUST_TX_FEE);
    }
    fee
}

/// Which input of which unconfirmed transaction spends an outpoint.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Spender {
    pub tx_hash: TxHash,
    pub input_index: usize,
}

/// Exponentially-decayed count of free bytes admitted recently.
struct FreeRelay {
    count: f64,
    last: Option<DateTime<Utc>>,
}

impl FreeRelay {
    fn allow(&mut self, size: usize, now: DateTime<Utc>) -> bool {
        if let Some(last) = self.last {
            let dt = (now - last).num_milliseconds() as f64 / 1000.0;
            if dt > 0.0 {
                self.count *= (-dt / FREE_RELAY_DECAY_SECS).exp();
            }
        }
        self.last = Some(now);
        if self.count + size as f64 > FREE_RELAY_BYTES {
            return false;
        }
        self.count += size as f64;
        true
    }
}

pub struct Mempool {
    by_hash: HashMap<TxHash, Arc<Transaction>>,
    by_prev: HashMap<Coin, Spender>,
    debits: HashMap<Hash160, HashSet<Coin>>,
    credits: HashMap<Hash160, HashSet<Coin>>,
    orphans: HashMap<TxHash, Arc<Transaction>>,
    orphans_by_missing: HashMap<TxHash, Vec<TxHash>>,
    orphan_arrivals: Vec<TxHash>,
    free_relay: FreeRelay,
}

impl Default for Mempool {
    fn default() -> Mempool {
        Mempool::new()
    }
}

impl Mempool {
    pub fn new() -> Mempool {
        Mempool {
            by_hash: HashMap::new(),
            by_prev: HashMap::new(),
            debits: HashMap::new(),
            credits: HashMap::new(),
            orphans: HashMap::new(),
            orphans_by_missing: HashMap::new(),
            orphan_arrivals: Vec::new(),
            free_relay: FreeRelay { count: 0.0, last: None },
        }
    }

    pub fn len(&self) -> usize {
        self.by_hash.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_hash.is_empty()
    }

    pub fn contains(&self, hash: &TxHash) -> bool {
        self.by_hash.contains_key(hash)
    }

    pub fn get(&self, hash: &TxHash) -> Option<&Arc<Transaction>> {
        self.by_hash.get(hash)
    }

    pub fn transactions(&self) -> impl Iterator<Item = &Arc<Transaction>> {
        self.by_hash.values()
    }

    /// The unconfirmed transaction already spending `outpoint`, if any.
    pub fn spender_of(&self, outpoint: &Coin) -> Option<Spender> {
        self.by_prev.get(outpoint).copied()
    }

    /// Whether the throttle admits `size` more bytes of free relay at `now`.
    pub fn admit_free(&mut self, size: usize, now: DateTime<Utc>) -> bool {
        self.free_relay.allow(size, now)
    }

    /// Inserts an accepted transaction. `resolved` pairs each non-coinbase
    /// input with the output it spends, in input order, so the address
    /// views can be credited without re-resolving.
    pub fn insert(&mut self, tx: Arc<Transaction>, resolved: &[(Coin, Output)]) {
        let hash = tx.hash();
        let mut resolved_iter = resolved.iter();
        for (index, input) in tx.inputs.iter().enumerate() {
            if let Input::PrevOut { prev, .. } = input {
                self.by_prev.insert(*prev, Spender { tx_hash: hash, input_index: index });
                if let Some((_, prev_output)) = resolved_iter.next() {
                    if let Some(addr) = Template::match_script(&prev_output.script).address_hash() {
                        self.credits.entry(addr).or_default().insert(Coin { tx_hash: hash, index: index as u32 });
                    }
                }
            }
        }
        for (index, output) in tx.outputs.iter().enumerate() {
            if let Some(addr) = Template::match_script(&output.script).address_hash() {
                self.debits.entry(addr).or_default().insert(Coin { tx_hash: hash, index: index as u32 });
            }
        }
        self.by_hash.insert(hash, tx);
        metrics::gauge!("mempool.size", self.by_hash.len() as f64);
    }

    /// Removes `hash` (typically because it was mined) and unwinds its
    /// spender and address entries. Returns the transaction if it was
    /// present.
    pub fn remove(&mut self, hash: &TxHash) -> Option<Arc<Transaction>> {
        let tx = self.by_hash.remove(hash)?;
        for input in tx.inputs.iter() {
            if let Input::PrevOut { prev, .. } = input {
                if self.by_prev.get(prev).map(|s| s.tx_hash) == Some(*hash) {
                    self.by_prev.remove(prev);
                }
            }
        }
        let spent_position = |index: usize| Coin { tx_hash: *hash, index: index as u32 };
        for set in self.credits.values_mut() {
            for index in 0..tx.inputs.len() {
                set.remove(&spent_position(index));
            }
        }
        for set in self.debits.values_mut() {
            for index in 0..tx.outputs.len() {
                set.remove(&spent_position(index));
            }
        }
        self.credits.retain(|_, set| !set.is_empty());
        self.debits.retain(|_, set| !set.is_empty());
        metrics::gauge!("mempool.size", self.by_hash.len() as f64);
        Some(tx)
    }

    /// Removes any pooled transaction that spends one of `outpoints` — used
    /// when a connected block claims outpoints the pool was also spending.
    pub fn remove_conflicts(&mut self, outpoints: impl Iterator<Item = Coin>) -> Vec<Arc<Transaction>> {
        let mut evicted = Vec::new();
        for outpoint in outpoints {
            if let Some(spender) = self.by_prev.get(&outpoint).copied() {
                if let Some(tx) = self.remove(&spender.tx_hash) {
                    evicted.push(tx);
                }
            }
        }
        evicted
    }

    /// Unconfirmed coins paying `addr`.
    pub fn debits(&self, addr: &Hash160) -> HashSet<Coin> {
        self.debits.get(addr).cloned().unwrap_or_default()
    }

    /// Unconfirmed spending positions drawing from `addr`.
    pub fn credits(&self, addr: &Hash160) -> HashSet<Coin> {
        self.credits.get(addr).cloned().unwrap_or_default()
    }

    /// Buffers a transaction whose parents are unknown, keyed by each
    /// missing parent. The buffer is bounded; the oldest orphan is evicted
    /// to make room.
    pub fn insert_orphan(&mut self, tx: Arc<Transaction>, missing: &[TxHash]) {
        if self.orphans.len() >= MAX_ORPHAN_TRANSACTIONS {
            if let Some(evict) = self.orphan_arrivals.first().copied() {
                tracing::warn!(orphan = %evict, "orphan buffer full, evicting oldest");
                self.forget_orphan(&evict);
            }
        }
        let hash = tx.hash();
        self.orphans.insert(hash, tx);
        self.orphan_arrivals.push(hash);
        for parent in missing {
            self.orphans_by_missing.entry(*parent).or_default().push(hash);
        }
    }

    pub fn is_orphan(&self, hash: &TxHash) -> bool {
        self.orphans.contains_key(hash)
    }

    /// Orphans that were waiting on `parent`, removed from the buffer for
    /// the caller to retry.
    pub fn take_orphans_of(&mut self, parent: &TxHash) -> Vec<Arc<Transaction>> {
        let children = self.orphans_by_missing.remove(parent).unwrap_or_default();
        let mut ready = Vec::new();
        for child in children {
            if let Some(tx) = self.orphans.remove(&child) {
                self.orphan_arrivals.retain(|h| h != &child);
                ready.push(tx);
            }
        }
        ready
    }

    fn forget_orphan(&mut self, hash: &TxHash) {
        self.orphans.remove(hash);
        self.orphan_arrivals.retain(|h| h != hash);
        for waiters in self.orphans_by_missing.values_mut() {
            waiters.retain(|h| h != hash);
        }
        self.orphans_by_missing.retain(|_, waiters| !waiters.is_empty());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use utxod_chain::hash::Hash256;
    use utxod_test::fixtures;

    fn coin(tag: &[u8], index: u32) -> Coin {
        Coin { tx_hash: TxHash(Hash256::of(tag)), index }
    }

    #[test]
    fn insert_tracks_the_spender_of_each_outpoint() {
        let mut pool = Mempool::new();
        let spent = coin(b"parent", 0);
        let tx = Arc::new(fixtures::dummy_spend(spent, 40));
        pool.insert(tx.clone(), &[]);
        let spender = pool.spender_of(&spent).unwrap();
        assert_eq!(spender.tx_hash, tx.hash());
        assert_eq!(spender.input_index, 0);
    }

    #[test]
    fn remove_unwinds_the_spender_map() {
        let mut pool = Mempool::new();
        let spent = coin(b"parent", 0);
        let tx = Arc::new(fixtures::dummy_spend(spent, 40));
        let hash = tx.hash();
        pool.insert(tx, &[]);
        pool.remove(&hash);
        assert!(pool.spender_of(&spent).is_none());
        assert!(pool.is_empty());
    }

    #[test]
    fn conflicting_spend_is_evicted_when_its_outpoint_is_claimed() {
        let mut pool = Mempool::new();
        let spent = coin(b"parent", 0);
        let tx = Arc::new(fixtures::dummy_spend(spent, 40));
        pool.insert(tx.clone(), &[]);
        let evicted = pool.remove_conflicts(vec![spent].into_iter());
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].hash(), tx.hash());
        assert!(pool.is_empty());
    }

    #[test]
    fn orphans_drain_when_their_parent_is_named() {
        let mut pool = Mempool::new();
        let parent_hash = TxHash(Hash256::of(b"parent"));
        let child = Arc::new(fixtures::dummy_spend(Coin { tx_hash: parent_hash, index: 0 }, 40));
        pool.insert_orphan(child.clone(), &[parent_hash]);
        assert!(pool.is_orphan(&child.hash()));
        let drained = pool.take_orphans_of(&parent_hash);
        assert_eq!(drained.len(), 1);
        assert!(!pool.is_orphan(&child.hash()));
    }

    #[test]
    fn free_relay_throttle_closes_and_reopens() {
        let mut pool = Mempool::new();
        let start = Utc.timestamp(1_600_000_000, 0);
        assert!(pool.admit_free(100_000, start));
        // A second large free transaction in the same instant blows the
        // budget.
        assert!(!pool.admit_free(100_000, start));
        // After an hour the counter has decayed to almost nothing.
        assert!(pool.admit_free(100_000, start + chrono::Duration::hours(1)));
    }

    #[test]
    fn fee_floor_scales_with_size_and_dust() {
        assert_eq!(min_fee(300, false, false), MIN_RELAY_TX_FEE);
        assert_eq!(min_fee(1_500, false, false), 2 * MIN_RELAY_TX_FEE);
        assert_eq!(min_fee(300, true, false), 0);
        assert_eq!(min_fee(FREE_TX_SIZE + 1, true, false), (FREE_TX_SIZE as i64 + 1 + 999) / 1000 * MIN_RELAY_TX_FEE);
        assert_eq!(min_fee(300, true, true), DUST_TX_FEE);
    }
}
