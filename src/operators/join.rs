//! The equi-join reduce logic.

use crate::operators::binary::ReduceLogic;
use crate::{Data, Weighted};

/// Joins the two collections sharing a key: every pair of a left and a right
/// value produces one result record, weighted by the product of their weights.
pub struct JoinLogic<F> {
    result: F,
}

impl<F> JoinLogic<F> {
    /// A join emitting `result(key, left, right)` per matching pair.
    pub fn new(result: F) -> Self {
        JoinLogic { result }
    }
}

impl<K, V1, V2, R, F> ReduceLogic<K, V1, V2, R> for JoinLogic<F>
where
    K: Data,
    V1: Data,
    V2: Data,
    R: Data,
    F: Fn(&K, &V1, &V2) -> R,
{
    fn reduce(
        &mut self,
        key: &K,
        input1: &[Weighted<V1>],
        input2: &[Weighted<V2>],
        output: &mut Vec<Weighted<R>>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        for left in input1.iter() {
            for right in input2.iter() {
                output.push(Weighted::new(
                    (self.result)(key, &left.record, &right.record),
                    left.weight * right.weight,
                ));
            }
        }
        Ok(())
    }
}
