//! The general trace representation: chain entries reference runs of weighted
//! values in a shared update heap, so a key's whole batch at one time costs a
//! single entry.

use std::io::{Read, Write};

use crate::checkpoint::{self, CheckpointError, Codec};
use crate::intern::TimeIndex;
use crate::{Data, Weight, Weighted};

use super::{consolidate, read_head, write_head, CollectionTrace, Head, Offset, TimeOrder};

#[derive(Copy, Clone)]
struct ListEntry {
    time: u32,
    lower: u32,
    upper: u32,
    next: Head,
}

/// Heap-backed collection trace.
///
/// `links` is the arena chains are threaded through; `updates` is the shared
/// heap its entries reference by `[lower, upper)` range. Recycled link slots
/// go on a free list; abandoned update ranges stay dead until [`Self::compact`].
pub struct HeapTrace<V> {
    links: Vec<ListEntry>,
    updates: Vec<(V, Weight)>,
    free: Vec<u32>,
}

impl<V: Data> Default for HeapTrace<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Data> HeapTrace<V> {
    /// Creates an empty trace.
    pub fn new() -> Self {
        HeapTrace {
            links: Vec::new(),
            updates: Vec::new(),
            free: Vec::new(),
        }
    }

    fn allocate(&mut self, entry: ListEntry) -> Offset {
        if let Some(slot) = self.free.pop() {
            self.links[slot as usize] = entry;
            Offset::new(slot as usize)
        } else {
            self.links.push(entry);
            Offset::new(self.links.len() - 1)
        }
    }

    /* Checkpoint format:
     * u32                            links length
     * (u32,u32,u32,head)*length      links
     * u32                            updates length
     * (V,i64)*length                 updates
     * u32                            free length
     * u32*length                     free slots
     */

    pub(crate) fn checkpoint(
        &self,
        writer: &mut dyn Write,
        value_codec: &dyn Codec<V>,
    ) -> Result<(), CheckpointError> {
        checkpoint::write_len(writer, self.links.len())?;
        for entry in self.links.iter() {
            checkpoint::write_u32(writer, entry.time)?;
            checkpoint::write_u32(writer, entry.lower)?;
            checkpoint::write_u32(writer, entry.upper)?;
            write_head(writer, entry.next)?;
        }
        checkpoint::write_len(writer, self.updates.len())?;
        for (value, weight) in self.updates.iter() {
            value_codec.encode(value, writer)?;
            checkpoint::write_i64(writer, *weight)?;
        }
        checkpoint::write_len(writer, self.free.len())?;
        for &slot in self.free.iter() {
            checkpoint::write_u32(writer, slot)?;
        }
        Ok(())
    }

    pub(crate) fn restore(
        &mut self,
        reader: &mut dyn Read,
        value_codec: &dyn Codec<V>,
    ) -> Result<(), CheckpointError> {
        let links_length = checkpoint::read_len(reader)?;
        self.links.clear();
        self.links.reserve(links_length);
        for _ in 0..links_length {
            let time = checkpoint::read_u32(reader)?;
            let lower = checkpoint::read_u32(reader)?;
            let upper = checkpoint::read_u32(reader)?;
            let next = read_head(reader)?;
            if lower > upper {
                return Err(CheckpointError::Corrupt("inverted update range"));
            }
            if let Some(position) = next {
                if position.val() >= links_length {
                    return Err(CheckpointError::Corrupt("chain link out of range"));
                }
            }
            self.links.push(ListEntry { time, lower, upper, next });
        }

        let updates_length = checkpoint::read_len(reader)?;
        self.updates.clear();
        self.updates.reserve(updates_length);
        for _ in 0..updates_length {
            let value = value_codec.decode(reader)?;
            let weight = checkpoint::read_i64(reader)?;
            self.updates.push((value, weight));
        }
        for entry in self.links.iter() {
            if entry.upper as usize > updates_length {
                return Err(CheckpointError::Corrupt("update range out of range"));
            }
        }

        let free_length = checkpoint::read_len(reader)?;
        self.free.clear();
        self.free.reserve(free_length);
        for _ in 0..free_length {
            let slot = checkpoint::read_u32(reader)?;
            if slot as usize >= links_length {
                return Err(CheckpointError::Corrupt("free slot out of range"));
            }
            self.free.push(slot);
        }
        Ok(())
    }
}

impl<V: Data> CollectionTrace for HeapTrace<V> {
    type Value = V;

    fn introduce(&mut self, head: &mut Head, value: V, weight: Weight, time: TimeIndex) {
        let time = time as u32;
        // extend the head entry's run when it is the tail of the heap.
        if let Some(position) = *head {
            let entry = &mut self.links[position.val()];
            if entry.time == time && entry.upper as usize == self.updates.len() {
                self.updates.push((value, weight));
                entry.upper += 1;
                return;
            }
        }
        let lower = self.updates.len() as u32;
        self.updates.push((value, weight));
        let position = self.allocate(ListEntry { time, lower, upper: lower + 1, next: *head });
        *head = Some(position);
    }

    fn introduce_from(&mut self, destination: &mut Head, source: &mut Head, clear_source: bool) {
        if clear_source {
            if let Some(first) = *source {
                let mut cursor = first;
                while let Some(next) = self.links[cursor.val()].next {
                    cursor = next;
                }
                self.links[cursor.val()].next = *destination;
                *destination = Some(first);
                *source = None;
            }
        } else {
            let mut cursor = *source;
            while let Some(position) = cursor {
                let ListEntry { time, lower, upper, next } = self.links[position.val()];
                for index in lower..upper {
                    let (value, weight) = self.updates[index as usize].clone();
                    self.introduce(destination, value, weight, time as TimeIndex);
                }
                cursor = next;
            }
        }
    }

    fn enumerate_times(&self, head: Head, times: &mut Vec<TimeIndex>) {
        let mut cursor = head;
        while let Some(position) = cursor {
            let entry = &self.links[position.val()];
            let time = entry.time as TimeIndex;
            if !times.contains(&time) {
                times.push(time);
            }
            cursor = entry.next;
        }
    }

    fn enumerate_collection_at<O: TimeOrder>(
        &self,
        order: &O,
        head: Head,
        time: TimeIndex,
        target: &mut Vec<Weighted<V>>,
    ) {
        let mut cursor = head;
        while let Some(position) = cursor {
            let entry = &self.links[position.val()];
            if order.less_equal(entry.time as TimeIndex, time) {
                for index in entry.lower..entry.upper {
                    let (value, weight) = self.updates[index as usize].clone();
                    target.push(Weighted::new(value, weight));
                }
            }
            cursor = entry.next;
        }
        consolidate(target);
    }

    fn enumerate_difference_at<O: TimeOrder>(
        &self,
        order: &O,
        head: Head,
        time: TimeIndex,
        target: &mut Vec<Weighted<V>>,
    ) {
        let time = order.update_time(time);
        let mut cursor = head;
        while let Some(position) = cursor {
            let entry = &self.links[position.val()];
            if order.update_time(entry.time as TimeIndex) == time {
                for index in entry.lower..entry.upper {
                    let (value, weight) = self.updates[index as usize].clone();
                    target.push(Weighted::new(value, weight));
                }
            }
            cursor = entry.next;
        }
        consolidate(target);
    }

    fn subtract_strictly_prior_differences<O: TimeOrder>(
        &mut self,
        order: &O,
        head: &mut Head,
        time: TimeIndex,
    ) {
        let mut accumulated = Vec::new();
        let mut cursor = *head;
        while let Some(position) = cursor {
            let entry = &self.links[position.val()];
            if order.less_than(entry.time as TimeIndex, time) {
                for index in entry.lower..entry.upper {
                    let (value, weight) = self.updates[index as usize].clone();
                    accumulated.push(Weighted::new(value, weight));
                }
            }
            cursor = entry.next;
        }
        consolidate(&mut accumulated);
        for entry in accumulated {
            self.introduce(head, entry.record, -entry.weight, time);
        }
    }

    fn advance_state<O: TimeOrder>(&mut self, order: &O, head: &mut Head) {
        if head.is_none() {
            return;
        }

        // Gather the chain at canonical times, recycling its entries.
        let mut gathered: Vec<(TimeIndex, V, Weight)> = Vec::new();
        let mut cursor = *head;
        while let Some(position) = cursor {
            let ListEntry { time, lower, upper, next } = self.links[position.val()];
            let canonical = order.update_time(time as TimeIndex);
            for index in lower..upper {
                let (value, weight) = self.updates[index as usize].clone();
                gathered.push((canonical, value, weight));
            }
            self.free.push(position.val() as u32);
            cursor = next;
        }
        *head = None;

        // Merge entries that collapse to the same value and time.
        gathered.sort_by(|x, y| x.0.cmp(&y.0).then_with(|| x.1.cmp(&y.1)));
        for index in 1..gathered.len() {
            if gathered[index].0 == gathered[index - 1].0 && gathered[index].1 == gathered[index - 1].1 {
                gathered[index].2 += gathered[index - 1].2;
                gathered[index - 1].2 = 0;
            }
        }
        gathered.retain(|x| x.2 != 0);

        // Rebuild; consecutive entries at one time share a single run.
        for (time, value, weight) in gathered {
            self.introduce(head, value, weight, time);
        }
    }

    fn zero_state(&mut self, head: &mut Head) {
        let mut cursor = *head;
        while let Some(position) = cursor {
            cursor = self.links[position.val()].next;
            self.free.push(position.val() as u32);
        }
        *head = None;
    }

    fn compact(&mut self) {
        let mut is_free = vec![false; self.links.len()];
        for &slot in self.free.iter() {
            is_free[slot as usize] = true;
        }

        // Rewrite the update heap around the ranges live entries reference.
        // Link slots stay in place: outstanding heads index into them.
        let mut updates = Vec::new();
        for (slot, entry) in self.links.iter_mut().enumerate() {
            if !is_free[slot] {
                let lower = updates.len() as u32;
                updates.extend(self.updates[entry.lower as usize..entry.upper as usize].iter().cloned());
                entry.lower = lower;
                entry.upper = updates.len() as u32;
            } else {
                // recycled entries must not keep ranges into the old heap.
                entry.lower = 0;
                entry.upper = 0;
            }
        }

        let reclaimed = self.updates.len() - updates.len();
        if reclaimed > 0 {
            log::trace!("compaction reclaimed {} of {} updates", reclaimed, self.updates.len());
        }
        self.updates = updates;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intern::LatticeInternTable;

    #[test]
    fn introduce_extends_tail_runs() {
        let mut trace = HeapTrace::<u64>::new();
        let mut head = None;
        trace.introduce(&mut head, 10, 1, 0);
        trace.introduce(&mut head, 11, 1, 0);
        trace.introduce(&mut head, 12, 1, 1);
        // two chain entries: one run for time 0, one for time 1.
        let mut times = Vec::new();
        trace.enumerate_times(head, &mut times);
        assert_eq!(times, vec![1, 0]);
        assert_eq!(trace.links.len(), 2);
    }

    #[test]
    fn collection_accumulates_and_cancels() {
        let mut table = LatticeInternTable::<u64>::new();
        let t0 = table.intern(0);
        let t1 = table.intern(1);
        let mut trace = HeapTrace::<&'static str>::new();
        let mut head = None;
        trace.introduce(&mut head, "a", 2, t0);
        trace.introduce(&mut head, "a", -2, t1);
        trace.introduce(&mut head, "b", 1, t1);

        let mut collection = Vec::new();
        trace.enumerate_collection_at(&table, head, t0, &mut collection);
        assert_eq!(collection, vec![Weighted::new("a", 2)]);

        collection.clear();
        trace.enumerate_collection_at(&table, head, t1, &mut collection);
        assert_eq!(collection, vec![Weighted::new("b", 1)]);
    }
}
