//! Trace representation for identity value projections: each chain entry
//! carries its single weighted value inline, skipping the shared update heap.

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

/// Collection trace with one inline weighted value per entry.
pub struct FlatTrace<V> {
    links: Vec<ListEntry<V>>,
    free: Vec<u32>,
}

impl<V: Data> Default for FlatTrace<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Data> FlatTrace<V> {
    /// Creates an empty trace.
    pub fn new() -> Self {
        FlatTrace { links: Vec::new(), free: Vec::new() }
    }

    fn allocate(&mut self, entry: ListEntry<V>) -> Offset {
        if let Some(slot) = self.free.pop() {
            self.links[slot as usize] = entry;
            Offset::new(slot as usize)
        } else {
            self.links.push(entry);
            Offset::new(self.links.len() - 1)
        }
    }

    /* Checkpoint format:
     * u32                       links length
     * (u32,V,i64,head)*length   links
     * u32                       free length
     * u32*length                free slots
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

impl<V: Data> CollectionTrace for FlatTrace<V> {
    type Value = V;

    fn introduce(&mut self, head: &mut Head, value: V, weight: Weight, time: TimeIndex) {
        let position = self.allocate(ListEntry { time: time as u32, value, weight, next: *head });
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
        order: &O,
        head: &mut Head,
        time: TimeIndex,
    ) {
        let mut accumulated = Vec::new();
        let mut cursor = *head;
        while let Some(position) = cursor {
            let entry = &self.links[position.val()];
            if order.less_than(entry.time as TimeIndex, time) {
                accumulated.push(Weighted::new(entry.value.clone(), entry.weight));
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

        let mut gathered: Vec<(TimeIndex, V, Weight)> = Vec::new();
        let mut cursor = *head;
        while let Some(position) = cursor {
            let entry = self.links[position.val()].clone();
            gathered.push((order.update_time(entry.time as TimeIndex), entry.value, entry.weight));
            self.free.push(position.val() as u32);
            cursor = entry.next;
        }
        *head = None;

        gathered.sort_by(|x, y| x.0.cmp(&y.0).then_with(|| x.1.cmp(&y.1)));
        for index in 1..gathered.len() {
            if gathered[index].0 == gathered[index - 1].0 && gathered[index].1 == gathered[index - 1].1 {
                gathered[index].2 += gathered[index - 1].2;
                gathered[index - 1].2 = 0;
            }
        }
        gathered.retain(|x| x.2 != 0);

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
        // entries are pooled through the free list; nothing further to reclaim.
        log::trace!("flat trace holds {} entries, {} free", self.links.len(), self.free.len());
    }
}
