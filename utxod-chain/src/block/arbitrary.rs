use std::sync::Arc;

use chrono::{TimeZone, Utc};
use proptest::{collection::vec, prelude::*};

use crate::transaction::Transaction;
use crate::work::CompactDifficulty;

use super::{merkle, Block, Hash, Header};

impl Arbitrary for Header {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_args: ()) -> Self::Strategy {
        (any::<u32>(), any::<Hash>(), any::<merkle::Root>(), 0i64..4_102_444_800, any::<u32>(), any::<u32>())
            .prop_map(|(version, previous_block_hash, merkle_root, secs, bits, nonce)| {
                Header::new(version, previous_block_hash, merkle_root, Utc.timestamp(secs, 0), CompactDifficulty(bits), nonce)
            })
            .boxed()
    }
}

impl Arbitrary for Block {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_args: ()) -> Self::Strategy {
        (any::<Header>(), vec(any::<Transaction>().prop_map(Arc::new), 0..4))
            .prop_map(|(header, transactions)| Block { header, transactions })
            .boxed()
    }
}
