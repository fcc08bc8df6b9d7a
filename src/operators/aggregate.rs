//! The weight-combining reduce logic.

use crate::operators::binary::ReduceLogic;
use crate::{Data, Weight, Weighted};

/// Combines the total weights of the two collections sharing a key into a
/// single synthetic record.
///
/// Useful for multiset operators whose output depends only on multiplicities,
/// such as intersection (`min`), union (`max`), or difference. Typically run
/// without an output trace: prior output is a function of prior totals and can
/// always be recomputed.
pub struct AggregateLogic<F, M> {
    combine: F,
    make_record: M,
}

impl<F, M> AggregateLogic<F, M> {
    /// An aggregate emitting `make_record(key)` with weight
    /// `combine(total1, total2)` whenever that weight is nonzero.
    pub fn new(combine: F, make_record: M) -> Self {
        AggregateLogic { combine, make_record }
    }
}

impl<K, V1, V2, R, F, M> ReduceLogic<K, V1, V2, R> for AggregateLogic<F, M>
where
    K: Data,
    V1: Data,
    V2: Data,
    R: Data,
    F: Fn(Weight, Weight) -> Weight,
    M: Fn(&K) -> R,
{
    fn reduce(
        &mut self,
        key: &K,
        input1: &[Weighted<V1>],
        input2: &[Weighted<V2>],
        output: &mut Vec<Weighted<R>>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let total1: Weight = input1.iter().map(|entry| entry.weight).sum();
        let total2: Weight = input2.iter().map(|entry| entry.weight).sum();
        let weight = (self.combine)(total1, total2);
        if weight != 0 {
            output.push(Weighted::new((self.make_record)(key), weight));
        }
        Ok(())
    }
}
