//! Interning of virtual times as dense integer identifiers.
//!
//! Each operator instance sees an unbounded stream of times drawn from a
//! lattice. To keep per-record state small, times are interned: the first
//! occurrence of a time is assigned the next dense index into a flat array, and
//! all trace state refers to times by index. As the set of times that can still
//! reach the operator shrinks, previously distinct times become
//! indistinguishable to every future query; the table then redirects their
//! indices to a single canonical representative, which is what lets dependent
//! trace state collapse.

use std::cmp::Ordering;
use std::collections::hash_map::Entry;
use std::io::{Read, Write};

use fnv::{FnvHashMap, FnvHashSet};
use smallvec::SmallVec;

use crate::checkpoint::{self, CheckpointError, Codec};
use crate::error::Fault;
use crate::lattice::{Lattice, PartialOrder};
use crate::trace::TimeOrder;
use crate::Data;

/// A dense index naming one interned time within one operator instance.
pub type TimeIndex = usize;

/// Assigns dense indices to distinct times, and redirects indices to canonical
/// representatives as the reachable-time frontier advances.
pub struct LatticeInternTable<T> {
    indices: FnvHashMap<T, TimeIndex>,
    times: Vec<T>,
    // redirection[i] != i means time i has been advanced to the time at
    // redirection[i]. The table maintains the fixed point: after any
    // `update_reachability`, redirection[redirection[i]] == redirection[i].
    redirection: Vec<TimeIndex>,
    // lattice elements still able to reach this operator, the basis of advancement.
    reachable: SmallVec<[T; 4]>,
    last_interned: (T, TimeIndex),
    seen: FnvHashSet<T>,
}

impl<T: Data + Lattice> Default for LatticeInternTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Data + Lattice> LatticeInternTable<T> {
    /// Creates a table with the minimum time pre-interned at index zero.
    pub fn new() -> Self {
        let minimum = T::minimum();
        let mut indices = FnvHashMap::default();
        indices.insert(minimum.clone(), 0);
        LatticeInternTable {
            indices,
            times: vec![minimum.clone()],
            redirection: vec![0],
            reachable: SmallVec::new(),
            last_interned: (minimum, 0),
            seen: FnvHashSet::default(),
        }
    }

    /// The number of distinct times interned so far.
    pub fn len(&self) -> usize {
        self.times.len()
    }

    /// True iff no time beyond the minimum has been interned.
    pub fn is_empty(&self) -> bool {
        self.times.len() <= 1
    }

    /// The time interned at `index`.
    pub fn time(&self, index: TimeIndex) -> &T {
        &self.times[index]
    }

    /// Returns the index that uniquely identifies `time` in this table.
    ///
    /// Interning the same time twice yields the same index. A one-entry cache
    /// short-circuits repeated interning of the value seen most recently.
    pub fn intern(&mut self, time: T) -> TimeIndex {
        if time != self.last_interned.0 {
            let index = match self.indices.get(&time) {
                Some(&index) => index,
                None => {
                    let index = self.times.len();
                    self.times.push(time.clone());
                    self.redirection.push(index);
                    self.indices.insert(time.clone(), index);
                    index
                }
            };
            self.last_interned = (time, index);
        }
        self.last_interned.1
    }

    /// The canonical representative of `index` under the current redirection.
    pub fn update_time(&self, index: TimeIndex) -> TimeIndex {
        self.redirection[index]
    }

    /// Joins `time` against each reachable time, and returns the meet of the results:
    /// the earliest time at which any future input could still be distinguished from `time`.
    fn advance(&self, time: &T) -> T {
        debug_assert!(!self.reachable.is_empty());
        let mut result = self.reachable[0].join(time);
        for element in self.reachable[1..].iter() {
            result = result.meet(&element.join(time));
        }
        result
    }

    /// Installs `frontier` as the set of times that can still reach this
    /// operator, and recomputes the redirection of every interned time.
    ///
    /// Times whose advanced values coincide are merged; the representative is
    /// the index whose original time is smallest in the total order, so that
    /// older indices stay stable and dependent state churns as little as
    /// possible. Runs in time proportional to interned times times frontier size.
    pub fn update_reachability(&mut self, frontier: &[T]) -> Result<(), Fault> {
        if frontier.is_empty() {
            return Err(Fault::Consistency("reachability update with an empty frontier"));
        }

        self.reachable.clear();
        self.reachable.extend(frontier.iter().cloned());

        let mut advanced = Vec::with_capacity(self.times.len());
        for time in self.times.iter() {
            advanced.push(self.advance(time));
        }

        // Choose, for each advanced value, the index with the smallest original time.
        let mut representatives = FnvHashMap::default();
        for (index, advanced_time) in advanced.iter().enumerate() {
            match representatives.entry(advanced_time.clone()) {
                Entry::Vacant(entry) => {
                    entry.insert(index);
                }
                Entry::Occupied(mut entry) => {
                    if self.times[*entry.get()].cmp(&self.times[index]) == Ordering::Greater {
                        entry.insert(index);
                    }
                }
            }
        }

        for index in 0..self.times.len() {
            self.redirection[index] = representatives[&advanced[index]];
        }

        log::debug!(
            "advanced {} interned times against a frontier of {}; {} canonical remain",
            self.times.len(),
            self.reachable.len(),
            representatives.len()
        );

        Ok(())
    }

    /// Populates `time_list` with the closure, under pairwise join, of `delta`
    /// against `truth` and against itself.
    ///
    /// Each delta time is joined with every truth time not already known to
    /// precede it, and the growing result is then joined against itself until no
    /// new time appears. Joins are interned as they are discovered, deduplicated
    /// through a transient set, and the final list is sorted by the time total
    /// order (ties by index). These are exactly the times at which the output of
    /// a computation monotone in its input times could change.
    pub fn interesting_times(
        &mut self,
        time_list: &mut Vec<TimeIndex>,
        truth: &[TimeIndex],
        delta: &[TimeIndex],
    ) {
        let mut seen = std::mem::take(&mut self.seen);
        debug_assert!(seen.is_empty());

        for &delta_index in delta.iter() {
            if seen.insert(self.times[delta_index].clone()) {
                time_list.push(delta_index);
            }
            for &truth_index in truth.iter() {
                // times already at or before the delta cannot produce new joins.
                if !self.less_than(truth_index, delta_index) {
                    let join = self.times[delta_index].join(&self.times[truth_index]);
                    if seen.insert(join.clone()) {
                        let index = self.intern(join);
                        time_list.push(index);
                    }
                }
            }
        }

        // Join every pair within the list itself until no new times are discovered.
        let mut cursor = 0;
        while cursor < time_list.len() {
            for position in 0..cursor {
                if !self.less_than(time_list[position], time_list[cursor]) {
                    let join = self.times[time_list[cursor]].join(&self.times[time_list[position]]);
                    if seen.insert(join.clone()) {
                        let index = self.intern(join);
                        time_list.push(index);
                    }
                }
            }
            cursor += 1;
        }

        seen.clear();
        self.seen = seen;

        time_list.sort_by(|&a, &b| self.compare(a, b));
    }

    /// True iff the time at `index1` strictly precedes the time at `index2` in
    /// the partial order.
    pub fn less_than(&self, index1: TimeIndex, index2: TimeIndex) -> bool {
        self.times[index1].less_than(&self.times[index2])
    }

    /// Orders indices by the time total order, with the index as tie-break.
    pub fn compare(&self, index1: TimeIndex, index2: TimeIndex) -> Ordering {
        let ordering = self.times[index1].cmp(&self.times[index2]);
        debug_assert!(
            !(self.times[index1].less_than(&self.times[index2]) && ordering == Ordering::Greater),
            "time total order disagrees with partial order"
        );
        ordering.then(index1.cmp(&index2))
    }

    /* Checkpoint format:
     * u32                 interned count
     * (Time, u32)*count   value -> index map entries
     * u32                 times length
     * Time*length         times
     * u32                 redirection length
     * u32*length          redirection
     * Time                last interned cache
     * u32                 last interned index cache
     */

    /// Writes the table to `writer`.
    pub fn checkpoint(
        &self,
        writer: &mut dyn Write,
        time_codec: &dyn Codec<T>,
    ) -> Result<(), CheckpointError> {
        checkpoint::write_len(writer, self.indices.len())?;
        for (index, time) in self.times.iter().enumerate() {
            time_codec.encode(time, writer)?;
            checkpoint::write_u32(writer, index as u32)?;
        }
        checkpoint::write_len(writer, self.times.len())?;
        for time in self.times.iter() {
            time_codec.encode(time, writer)?;
        }
        checkpoint::write_len(writer, self.redirection.len())?;
        for &target in self.redirection.iter() {
            checkpoint::write_u32(writer, target as u32)?;
        }
        time_codec.encode(&self.last_interned.0, writer)?;
        checkpoint::write_u32(writer, self.last_interned.1 as u32)?;
        Ok(())
    }

    /// Reconstructs the table from `reader`, replacing current contents.
    pub fn restore(
        &mut self,
        reader: &mut dyn Read,
        time_codec: &dyn Codec<T>,
    ) -> Result<(), CheckpointError> {
        let count = checkpoint::read_len(reader)?;
        self.indices.clear();
        self.indices.reserve(count);
        for _ in 0..count {
            let time = time_codec.decode(reader)?;
            let index = checkpoint::read_u32(reader)? as TimeIndex;
            if index >= count {
                return Err(CheckpointError::Corrupt("intern index out of range"));
            }
            self.indices.insert(time, index);
        }
        if self.indices.len() != count {
            return Err(CheckpointError::Corrupt("duplicate interned time"));
        }

        let times_length = checkpoint::read_len(reader)?;
        if times_length != count {
            return Err(CheckpointError::Corrupt("interned time count mismatch"));
        }
        self.times.clear();
        self.times.reserve(times_length);
        for _ in 0..times_length {
            self.times.push(time_codec.decode(reader)?);
        }

        let redirection_length = checkpoint::read_len(reader)?;
        if redirection_length != times_length {
            return Err(CheckpointError::Corrupt("redirection length mismatch"));
        }
        self.redirection.clear();
        self.redirection.reserve(redirection_length);
        for _ in 0..redirection_length {
            let target = checkpoint::read_u32(reader)? as TimeIndex;
            if target >= times_length {
                return Err(CheckpointError::Corrupt("redirection target out of range"));
            }
            self.redirection.push(target);
        }

        let cached_time = time_codec.decode(reader)?;
        let cached_index = checkpoint::read_u32(reader)? as TimeIndex;
        if cached_index >= times_length {
            return Err(CheckpointError::Corrupt("intern cache out of range"));
        }
        self.last_interned = (cached_time, cached_index);
        self.reachable.clear();
        Ok(())
    }
}

impl<T: Data + Lattice> TimeOrder for LatticeInternTable<T> {
    fn less_than(&self, index1: TimeIndex, index2: TimeIndex) -> bool {
        LatticeInternTable::less_than(self, index1, index2)
    }
    fn update_time(&self, index: TimeIndex) -> TimeIndex {
        LatticeInternTable::update_time(self, index)
    }
}
