//! Per-key histories of weighted records indexed by interned time.
//!
//! A collection trace stores, for each key an operator has seen, the sequence of
//! `(value, weight, time)` changes that key has received, and answers the two
//! questions the evaluation loop needs: what is the accumulated multiset of
//! values as of a given time, and at which times did this key change at all.
//!
//! Entries live in a per-trace arena and are linked into chains. A chain is
//! named by its head, a small `Copy` handle the *caller* stores (in its
//! per-key index record) and passes back in; operations that restructure a
//! chain accept the head by `&mut` and leave the caller holding the new head.
//! The trace itself never remembers which keys exist.
//!
//! Three variants implement one contract, differing only in storage layout;
//! see [`TraceVariant`] for how one is selected at operator construction.

use std::io::{Read, Write};

use serde::{Deserialize, Serialize};

use crate::checkpoint::{self, CheckpointError, Codec};
use crate::intern::TimeIndex;
use crate::{Data, Weighted};

pub mod flat;
pub mod heap;
pub mod immutable;

pub use self::flat::FlatTrace;
pub use self::heap::HeapTrace;
pub use self::immutable::ImmutableTrace;

/// An index into a trace's arena of list entries.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct Offset {
    dataz: u32,
}

impl Offset {
    #[inline(always)]
    pub fn new(offset: usize) -> Offset {
        assert!(offset < u32::MAX as usize); // note strict inequality
        Offset { dataz: u32::MAX - offset as u32 }
    }
    #[inline(always)]
    pub fn val(&self) -> usize {
        (u32::MAX - self.dataz) as usize
    }
}

/// The head of one chain of trace entries; `None` is the empty chain.
pub type Head = Option<Offset>;

/// Sentinel encoding of the empty head in checkpoints.
const EMPTY_HEAD: u32 = u32::MAX;

/// Writes a head as a fixed-width `u32`.
pub(crate) fn write_head(writer: &mut dyn Write, head: Head) -> Result<(), CheckpointError> {
    checkpoint::write_u32(writer, head.map(|offset| offset.val() as u32).unwrap_or(EMPTY_HEAD))
}

/// Reads a head written by [`write_head`].
pub(crate) fn read_head(reader: &mut dyn Read) -> Result<Head, CheckpointError> {
    let value = checkpoint::read_u32(reader)?;
    if value == EMPTY_HEAD {
        Ok(None)
    } else {
        Ok(Some(Offset::new(value as usize)))
    }
}

/// The ordering oracle traces consult to compare stored time indices.
///
/// Implemented by the operator's intern table; traces store indices only and
/// never look at times themselves.
pub trait TimeOrder {
    /// True iff the time at `index1` strictly precedes the time at `index2`.
    fn less_than(&self, index1: TimeIndex, index2: TimeIndex) -> bool;
    /// The canonical representative of `index` under current redirection.
    fn update_time(&self, index: TimeIndex) -> TimeIndex;
    /// True iff the times are equal once canonicalized, or strictly ordered.
    fn less_equal(&self, index1: TimeIndex, index2: TimeIndex) -> bool {
        self.update_time(index1) == self.update_time(index2) || self.less_than(index1, index2)
    }
}

/// Sorts `list` by record and accumulates the weights of equal records,
/// discarding those that accumulate to zero.
pub fn consolidate<T: Ord>(list: &mut Vec<Weighted<T>>) {
    list.sort_by(|x, y| x.record.cmp(&y.record));
    for index in 1..list.len() {
        if list[index].record == list[index - 1].record {
            list[index].weight += list[index - 1].weight;
            list[index - 1].weight = 0;
        }
    }
    list.retain(|x| x.weight != 0);
}

/// The heads of the five chains maintained for one key of a binary operator.
///
/// One record exists per key that has ever received or produced data; records
/// are created lazily and never deleted, so a key can always receive further
/// incremental updates.
#[derive(Copy, Clone, Default, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct BinaryKeyIndices {
    /// Changes received on input 1 since the key's last compute pass.
    pub unprocessed1: Head,
    /// Changes received on input 2 since the key's last compute pass.
    pub unprocessed2: Head,
    /// The authoritative history of input 1.
    pub processed1: Head,
    /// The authoritative history of input 2.
    pub processed2: Head,
    /// The history of output produced for this key.
    pub output: Head,
}

impl BinaryKeyIndices {
    /// True iff the key has pending changes awaiting a compute pass.
    pub fn pending(&self) -> bool {
        self.unprocessed1.is_some() || self.unprocessed2.is_some()
    }

    pub(crate) fn checkpoint(&self, writer: &mut dyn Write) -> Result<(), CheckpointError> {
        write_head(writer, self.unprocessed1)?;
        write_head(writer, self.unprocessed2)?;
        write_head(writer, self.processed1)?;
        write_head(writer, self.processed2)?;
        write_head(writer, self.output)?;
        Ok(())
    }

    pub(crate) fn restore(reader: &mut dyn Read) -> Result<Self, CheckpointError> {
        Ok(BinaryKeyIndices {
            unprocessed1: read_head(reader)?,
            unprocessed2: read_head(reader)?,
            processed1: read_head(reader)?,
            processed2: read_head(reader)?,
            output: read_head(reader)?,
        })
    }
}

/// Storage for per-key chains of weighted updates.
///
/// All operations that restructure a chain take its head by `&mut`; a head the
/// caller has let go of (by splicing it elsewhere with `clear_source`, or by
/// zeroing it) must not be used again.
pub trait CollectionTrace {
    /// The value type stored in each entry.
    type Value: Data;

    /// Appends one weighted value at `time` to the chain at `head`.
    fn introduce(&mut self, head: &mut Head, value: Self::Value, weight: crate::Weight, time: TimeIndex);

    /// Adds the chain at `source` to the chain at `destination`.
    ///
    /// With `clear_source` the entries are moved and `source` becomes empty;
    /// without it they are copied and `source` remains readable.
    fn introduce_from(&mut self, destination: &mut Head, source: &mut Head, clear_source: bool);

    /// Appends the distinct time indices present in the chain to `times`.
    fn enumerate_times(&self, head: Head, times: &mut Vec<TimeIndex>);

    /// Accumulates into `target` the multiset of values as of `time`: all
    /// entries at times less than or equal to it, coalesced by value.
    fn enumerate_collection_at<O: TimeOrder>(
        &self,
        order: &O,
        head: Head,
        time: TimeIndex,
        target: &mut Vec<Weighted<Self::Value>>,
    );

    /// Accumulates into `target` the net change recorded exactly at `time`.
    fn enumerate_difference_at<O: TimeOrder>(
        &self,
        order: &O,
        head: Head,
        time: TimeIndex,
        target: &mut Vec<Weighted<Self::Value>>,
    );

    /// Cancels, at `time`, everything the chain accumulates at times strictly
    /// prior to it, so that the chain's accumulation at `time` starts from
    /// nothing while entries at the prior times themselves survive.
    fn subtract_strictly_prior_differences<O: TimeOrder>(
        &mut self,
        order: &O,
        head: &mut Head,
        time: TimeIndex,
    );

    /// Rewrites the chain so every entry carries its canonical time index,
    /// merging entries that collapse to the same value and time and dropping
    /// those whose weights cancel. This is where frontier advancement actually
    /// reclaims space.
    fn advance_state<O: TimeOrder>(&mut self, order: &O, head: &mut Head);

    /// Empties the chain at `head`, recycling its storage where the variant
    /// supports pooling.
    fn zero_state(&mut self, head: &mut Head);

    /// Amortized reclamation of storage no live chain references.
    fn compact(&mut self);
}

/// The trace representations an operator can instantiate.
///
/// Selection is a memory/speed trade only; every variant satisfies the same
/// contract. Inputs whose value projection is the identity skip the shared
/// update heap, and inputs declared immutable skip the compaction machinery
/// entirely.
pub enum TraceVariant<V: Data> {
    /// General storage: chain entries reference runs in a shared update heap.
    Heap(HeapTrace<V>),
    /// One value inline per entry; for identity value projections.
    Flat(FlatTrace<V>),
    /// Single-pass storage for inputs that are never revised.
    Immutable(ImmutableTrace<V>),
}

impl<V: Data> TraceVariant<V> {
    /// Chooses the representation for input `stream` of an operator.
    pub fn for_input(stream: usize, identity_value: bool, immutable: bool) -> Self {
        if immutable {
            log::debug!("allocating immutable trace for input {}", stream);
            TraceVariant::Immutable(ImmutableTrace::new())
        } else if identity_value {
            log::debug!("allocating flat trace for input {}", stream);
            TraceVariant::Flat(FlatTrace::new())
        } else {
            TraceVariant::Heap(HeapTrace::new())
        }
    }

    /// The representation for an operator's output trace and workspace.
    pub fn for_output() -> Self {
        TraceVariant::Heap(HeapTrace::new())
    }

    fn tag(&self) -> u8 {
        match self {
            TraceVariant::Heap(_) => 0,
            TraceVariant::Flat(_) => 1,
            TraceVariant::Immutable(_) => 2,
        }
    }

    /// Writes the trace to `writer`.
    pub fn checkpoint(
        &self,
        writer: &mut dyn Write,
        value_codec: &dyn Codec<V>,
    ) -> Result<(), CheckpointError> {
        writer.write_all(&[self.tag()])?;
        match self {
            TraceVariant::Heap(trace) => trace.checkpoint(writer, value_codec),
            TraceVariant::Flat(trace) => trace.checkpoint(writer, value_codec),
            TraceVariant::Immutable(trace) => trace.checkpoint(writer, value_codec),
        }
    }

    /// Reconstructs the trace from `reader`, replacing current contents.
    ///
    /// The stored variant must match this one: variant selection is derived
    /// from operator configuration, which a restore does not change.
    pub fn restore(
        &mut self,
        reader: &mut dyn Read,
        value_codec: &dyn Codec<V>,
    ) -> Result<(), CheckpointError> {
        let mut tag = [0u8; 1];
        reader.read_exact(&mut tag)?;
        if tag[0] != self.tag() {
            return Err(CheckpointError::Corrupt("trace variant mismatch"));
        }
        match self {
            TraceVariant::Heap(trace) => trace.restore(reader, value_codec),
            TraceVariant::Flat(trace) => trace.restore(reader, value_codec),
            TraceVariant::Immutable(trace) => trace.restore(reader, value_codec),
        }
    }
}

impl<V: Data> CollectionTrace for TraceVariant<V> {
    type Value = V;

    fn introduce(&mut self, head: &mut Head, value: V, weight: crate::Weight, time: TimeIndex) {
        match self {
            TraceVariant::Heap(trace) => trace.introduce(head, value, weight, time),
            TraceVariant::Flat(trace) => trace.introduce(head, value, weight, time),
            TraceVariant::Immutable(trace) => trace.introduce(head, value, weight, time),
        }
    }

    fn introduce_from(&mut self, destination: &mut Head, source: &mut Head, clear_source: bool) {
        match self {
            TraceVariant::Heap(trace) => trace.introduce_from(destination, source, clear_source),
            TraceVariant::Flat(trace) => trace.introduce_from(destination, source, clear_source),
            TraceVariant::Immutable(trace) => trace.introduce_from(destination, source, clear_source),
        }
    }

    fn enumerate_times(&self, head: Head, times: &mut Vec<TimeIndex>) {
        match self {
            TraceVariant::Heap(trace) => trace.enumerate_times(head, times),
            TraceVariant::Flat(trace) => trace.enumerate_times(head, times),
            TraceVariant::Immutable(trace) => trace.enumerate_times(head, times),
        }
    }

    fn enumerate_collection_at<O: TimeOrder>(
        &self,
        order: &O,
        head: Head,
        time: TimeIndex,
        target: &mut Vec<Weighted<V>>,
    ) {
        match self {
            TraceVariant::Heap(trace) => trace.enumerate_collection_at(order, head, time, target),
            TraceVariant::Flat(trace) => trace.enumerate_collection_at(order, head, time, target),
            TraceVariant::Immutable(trace) => trace.enumerate_collection_at(order, head, time, target),
        }
    }

    fn enumerate_difference_at<O: TimeOrder>(
        &self,
        order: &O,
        head: Head,
        time: TimeIndex,
        target: &mut Vec<Weighted<V>>,
    ) {
        match self {
            TraceVariant::Heap(trace) => trace.enumerate_difference_at(order, head, time, target),
            TraceVariant::Flat(trace) => trace.enumerate_difference_at(order, head, time, target),
            TraceVariant::Immutable(trace) => trace.enumerate_difference_at(order, head, time, target),
        }
    }

    fn subtract_strictly_prior_differences<O: TimeOrder>(
        &mut self,
        order: &O,
        head: &mut Head,
        time: TimeIndex,
    ) {
        match self {
            TraceVariant::Heap(trace) => trace.subtract_strictly_prior_differences(order, head, time),
            TraceVariant::Flat(trace) => trace.subtract_strictly_prior_differences(order, head, time),
            TraceVariant::Immutable(trace) => trace.subtract_strictly_prior_differences(order, head, time),
        }
    }

    fn advance_state<O: TimeOrder>(&mut self, order: &O, head: &mut Head) {
        match self {
            TraceVariant::Heap(trace) => trace.advance_state(order, head),
            TraceVariant::Flat(trace) => trace.advance_state(order, head),
            TraceVariant::Immutable(trace) => trace.advance_state(order, head),
        }
    }

    fn zero_state(&mut self, head: &mut Head) {
        match self {
            TraceVariant::Heap(trace) => trace.zero_state(head),
            TraceVariant::Flat(trace) => trace.zero_state(head),
            TraceVariant::Immutable(trace) => trace.zero_state(head),
        }
    }

    fn compact(&mut self) {
        match self {
            TraceVariant::Heap(trace) => trace.compact(),
            TraceVariant::Flat(trace) => trace.compact(),
            TraceVariant::Immutable(trace) => trace.compact(),
        }
    }
}
