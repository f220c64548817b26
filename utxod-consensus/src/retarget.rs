//! The difficulty retarget rule and the median-time-past helper.
//!
//! Every 2016 blocks the target is rescaled so that, had the new target
//! been in effect, the previous 2016 blocks would have taken two weeks.
//! The measured timespan is clamped to a factor of 4 in either direction,
//! bounding how fast difficulty can move no matter what timestamps miners
//! claim.

use chrono::{DateTime, Utc};
use primitive_types::U256;

use utxod_chain::block_index::{BlockIndexArena, NodeId, NONE};
use utxod_chain::parameters::{RETARGET_INTERVAL, TARGET_TIMESPAN_SECS};
use utxod_chain::work::CompactDifficulty;

/// The number of trailing block times the median-time-past rule looks at.
pub const MEDIAN_TIME_SPAN: usize = 11;

/// The difficulty required of the block extending `parent`.
pub fn next_difficulty(arena: &BlockIndexArena, parent: NodeId) -> CompactDifficulty {
    let parent_node = match arena.get(parent) {
        Some(node) => node,
        None => return CompactDifficulty(0x1d00ffff),
    };
    let next_height = parent_node.height.0 + 1;
    if next_height % RETARGET_INTERVAL != 0 {
        return parent_node.header.difficulty_threshold;
    }

    // Walk back to the first block of the closing interval.
    let mut first = parent;
    for _ in 0..RETARGET_INTERVAL - 1 {
        match arena.get(first) {
            Some(node) if node.parent != NONE => first = node.parent,
            _ => break,
        }
    }
    let first_time = arena.get(first).map(|n| n.header.time).unwrap_or(parent_node.header.time);

    let mut actual_timespan = (parent_node.header.time - first_time).num_seconds();
    actual_timespan = actual_timespan.clamp(TARGET_TIMESPAN_SECS / 4, TARGET_TIMESPAN_SECS * 4);

    let old_target = parent_node.header.difficulty_threshold.to_target();
    let new_target = old_target * U256::from(actual_timespan as u64) / U256::from(TARGET_TIMESPAN_SECS as u64);
    CompactDifficulty::from_target(new_target)
}

/// The median of the last [`MEDIAN_TIME_SPAN`] block times ending at `from`.
/// A new block's time must be strictly greater than this value.
pub fn median_time_past(arena: &BlockIndexArena, from: NodeId) -> Option<DateTime<Utc>> {
    let mut times = Vec::with_capacity(MEDIAN_TIME_SPAN);
    let mut walk = from;
    while walk != NONE && times.len() < MEDIAN_TIME_SPAN {
        let node = arena.get(walk)?;
        times.push(node.header.time);
        walk = node.parent;
    }
    if times.is_empty() {
        return None;
    }
    times.sort();
    Some(times[times.len() / 2])
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use utxod_chain::block::{self, merkle, Header};
    use utxod_chain::block_index::BlockStatus;
    use utxod_chain::parameters::TARGET_SPACING_SECS;

    fn build_chain(arena: &mut BlockIndexArena, length: u32, spacing_secs: i64) -> NodeId {
        let mut prev_hash = block::Hash([0u8; 32]);
        let mut parent = NONE;
        for i in 0..length {
            let header = Header::new(
                1,
                prev_hash,
                merkle::Root([0; 32]),
                Utc.timestamp(1_231_006_505 + i as i64 * spacing_secs, 0),
                CompactDifficulty(0x1d00ffff),
                i,
            );
            prev_hash = header.hash();
            parent = arena.insert(prev_hash, header, parent, BlockStatus::Valid);
        }
        parent
    }

    #[test]
    fn difficulty_is_inherited_off_boundary() {
        let mut arena = BlockIndexArena::new();
        let tip = build_chain(&mut arena, 10, TARGET_SPACING_SECS);
        assert_eq!(next_difficulty(&arena, tip), CompactDifficulty(0x1d00ffff));
    }

    #[test]
    fn on_schedule_interval_barely_moves_the_target() {
        let mut arena = BlockIndexArena::new();
        // RETARGET_INTERVAL blocks at the target spacing span 2015 gaps, so
        // the measured timespan is one spacing short of ideal and the target
        // shifts by well under a part in a thousand.
        let tip = build_chain(&mut arena, RETARGET_INTERVAL, TARGET_SPACING_SECS);
        let next = next_difficulty(&arena, tip).to_target();
        let old = CompactDifficulty(0x1d00ffff).to_target();
        assert!(next <= old);
        assert!(next >= old - old / 1000);
    }

    #[test]
    fn fast_interval_tightens_the_target() {
        let mut arena = BlockIndexArena::new();
        // Blocks found at twice the intended rate: the new target should be
        // roughly half the old one (harder).
        let tip = build_chain(&mut arena, RETARGET_INTERVAL, TARGET_SPACING_SECS / 2);
        let next = next_difficulty(&arena, tip);
        assert!(next.to_target() < CompactDifficulty(0x1d00ffff).to_target());
    }

    #[test]
    fn clamp_bounds_a_pathological_timespan() {
        let mut arena = BlockIndexArena::new();
        // A degenerate interval mined "instantly" is clamped to
        // timespan / 4, not scaled to zero.
        let tip = build_chain(&mut arena, RETARGET_INTERVAL, 0);
        let next = next_difficulty(&arena, tip);
        let old = CompactDifficulty(0x1d00ffff).to_target();
        assert!(next.to_target() >= old / 4 - old / 1000);
    }

    #[test]
    fn median_time_past_is_the_middle_of_eleven() {
        let mut arena = BlockIndexArena::new();
        let tip = build_chain(&mut arena, 15, TARGET_SPACING_SECS);
        let median = median_time_past(&arena, tip).unwrap();
        let tip_time = arena.get(tip).unwrap().header.time;
        // The median of 11 equally spaced times is 5 spacings behind the tip.
        assert_eq!(tip_time - median, Duration::seconds(5 * TARGET_SPACING_SECS));
    }
}
