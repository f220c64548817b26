use proptest::{collection::vec, prelude::*};

use crate::cached::Lazy;
use crate::transparent;

use super::{LockTime, Transaction};

impl Arbitrary for Transaction {
    type Parameters = ();

    fn arbitrary_with(_args: ()) -> Self::Strategy {
        (
            vec(any::<transparent::Input>(), 1..8),
            vec(any::<transparent::Output>(), 0..8),
            any::<LockTime>(),
        )
            .prop_map(|(inputs, outputs, lock_time)| Transaction {
                version: 1,
                inputs,
                outputs,
                lock_time,
                hash: Lazy::empty(),
            })
            .boxed()
    }

    type Strategy = BoxedStrategy<Self>;
}
