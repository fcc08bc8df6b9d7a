//! Trace representation for inputs that are never revised after delivery:
//! single-pass storage with no free list and no compaction machinery.
//!
//! Frontier-driven merging is a space optimization, not a correctness
//! requirement, so an immutable input can skip it entirely: accumulating at an
//! original time and at its advanced time answer every still-reachable query
//! identically.

use std::io::{Read, Write};

use crate::checkpoint::{self, CheckpointError, Codec};
use crate::intern::TimeIndex;
use crate::{Data, Weight, Weighted};

use super::{consolidate, read_head, write_head, CollectionTrace, Head, Offset, TimeOrder};

#[derive(Clone)]
struct ListEntry<V> {
    time: u32,
    value: V,
    weight: Weight,
    next: Head,
}

/// Collection trace for one-shot static collections.
pub struct ImmutableTrace<V> {
    links: Vec<ListEntry<V>>,
}

impl<V: Data> Default for ImmutableTrace<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Data> ImmutableTrace<V> {
    /// Creates an empty trace.
    pub fn new() -> Self {
        ImmutableTrace { links: Vec::new() }
    }

    /* Checkpoint format:
     * u32                       links length
     * (u32,V,i64,head)*length   links
     */

    pub(crate) fn checkpoint(
        &self,
        writer: &mut dyn Write,
        value_codec: &dyn Codec<V>,
    ) -> Result<(), CheckpointError> {
        checkpoint::write_len(writer, self.links.len())?;
        for entry in self.links.iter() {
            checkpoint::write_u32(writer, entry.time)?;
            value_codec.encode(&entry.value, writer)?;
            checkpoint::write_i64(writer, entry.weight)?;
            write_head(writer, entry.next)?;
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
            let value = value_codec.decode(reader)?;
            let weight = checkpoint::read_i64(reader)?;
            let next = read_head(reader)?;
            if let Some(position) = next {
                if position.val() >= links_length {
                    return Err(CheckpointError::Corrupt("chain link out of range"));
                }
            }
            self.links.push(ListEntry { time, value, weight, next });
        }
        Ok(())
    }
}

impl<V: Data> CollectionTrace for ImmutableTrace<V> {
    type Value = V;

    fn introduce(&mut self, head: &mut Head, value: V, weight: Weight, time: TimeIndex) {
        self.links.push(ListEntry { time: time as u32, value, weight, next: *head });
        *head = Some(Offset::new(self.links.len() - 1));
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
                let entry = self.links[position.val()].clone();
                self.introduce(destination, entry.value, entry.weight, entry.time as TimeIndex);
                cursor = entry.next;
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
                target.push(Weighted::new(entry.value.clone(), entry.weight));
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
                target.push(Weighted::new(entry.value.clone(), entry.weight));
            }
            cursor = entry.next;
        }
        consolidate(target);
    }

    fn subtract_strictly_prior_differences<O: TimeOrder>(
        &mut self,
        _order: &O,
        _head: &mut Head,
        _time: TimeIndex,
    ) {
        // the difference workspace belongs to the output trace, which is never immutable.
        unimplemented!("immutable traces do not maintain a difference workspace");
    }

    fn advance_state<O: TimeOrder>(&mut self, _order: &O, _head: &mut Head) {}

    fn zero_state(&mut self, head: &mut Head) {
        *head = None;
    }

    fn compact(&mut self) {}
}
