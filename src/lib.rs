//! The incremental computation core of a differential dataflow engine.
//!
//! A differential operator receives weighted records tagged with partially ordered
//! virtual times, and must re-derive exactly those output changes implied by newly
//! arrived input, reusing everything it has already computed. This crate contains
//! the machinery each operator instance needs to do that: a table interning times
//! as dense integer identifiers and compacting them as the reachable-time frontier
//! advances, per-key traces of weighted updates indexed by interned time, and the
//! stateful binary operator evaluation loop that determines the *interesting*
//! times at which output could change and recomputes output deltas at exactly
//! those times.
//!
//! The surrounding dataflow graph, its scheduler, and its channels are external
//! collaborators: they deliver input batches, announce time completion, accept
//! output records, and decide when to checkpoint. Their interfaces appear here as
//! traits ([`channels::Output`], [`channels::Notify`]) and as the checkpoint
//! codec seam ([`checkpoint::Codec`]); their implementations do not.
//!
//! Everything in this crate assumes the framework serializes calls per operator
//! instance. There is no internal locking, and no operation blocks.

use std::fmt::Debug;
use std::hash::Hash;

use serde::{Deserialize, Serialize};

pub mod channels;
pub mod checkpoint;
pub mod error;
pub mod input;
pub mod lattice;
pub mod intern;
pub mod operators;
pub mod trace;

pub use crate::error::Fault;
pub use crate::intern::{LatticeInternTable, TimeIndex};
pub use crate::lattice::{Lattice, PartialOrder};
pub use crate::operators::binary::{BinaryStatefulOperator, OperatorConfig};
pub use crate::trace::CollectionTrace;

/// A change in the multiplicity of a record.
///
/// Zero-weight records are logically absent; negative weights retract prior
/// additions.
pub type Weight = i64;

/// A composite trait for data types usable as keys, values, and records.
pub trait Data: Clone + Eq + Ord + Hash + Debug + 'static {}
impl<T: Clone + Eq + Ord + Hash + Debug + 'static> Data for T {}

/// A record paired with the change in its multiplicity.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Default, Serialize, Deserialize)]
pub struct Weighted<T> {
    /// The record whose multiplicity changed.
    pub record: T,
    /// The change in multiplicity.
    pub weight: Weight,
}

impl<T> Weighted<T> {
    /// A record with the given change in multiplicity.
    pub fn new(record: T, weight: Weight) -> Self {
        Weighted { record, weight }
    }
}
