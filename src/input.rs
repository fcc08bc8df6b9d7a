//! Buffering of received records awaiting the completion of their time.
//!
//! Operators whose inputs may still be revised do not act on records as they
//! arrive; they park them here, keyed by time, and replay them once the
//! framework announces that no more input at or before that time is possible.

use std::io::{Read, Write};

use crate::checkpoint::{self, CheckpointError, Codec};
use crate::{Data, Weighted};

/// Records received for one input stream, grouped by the time they arrived at.
pub struct InputBuffer<S, T> {
    batches: Vec<(T, Vec<Weighted<S>>)>,
}

impl<S: Data, T: Data> Default for InputBuffer<S, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Data, T: Data> InputBuffer<S, T> {
    /// Creates an empty buffer.
    pub fn new() -> Self {
        InputBuffer { batches: Vec::new() }
    }

    /// Parks one record until `time` completes.
    pub fn push(&mut self, record: Weighted<S>, time: &T) {
        if let Some((_, records)) = self.batches.iter_mut().find(|(t, _)| t == time) {
            records.push(record);
        } else {
            self.batches.push((time.clone(), vec![record]));
        }
    }

    /// Removes and returns the records parked at exactly `time`.
    pub fn records_at(&mut self, time: &T) -> Vec<Weighted<S>> {
        if let Some(position) = self.batches.iter().position(|(t, _)| t == time) {
            self.batches.swap_remove(position).1
        } else {
            Vec::new()
        }
    }

    /// True iff no records are parked.
    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    /// Discards all parked records.
    pub fn clear(&mut self) {
        self.batches.clear();
    }

    /* Checkpoint format:
     * u32                                     batch count
     * (T, u32, (S,i64)*count)*batch count     batches
     */

    /// Writes the buffer to `writer`.
    pub fn checkpoint(
        &self,
        writer: &mut dyn Write,
        time_codec: &dyn Codec<T>,
        record_codec: &dyn Codec<S>,
    ) -> Result<(), CheckpointError> {
        checkpoint::write_len(writer, self.batches.len())?;
        for (time, records) in self.batches.iter() {
            time_codec.encode(time, writer)?;
            checkpoint::write_len(writer, records.len())?;
            for record in records.iter() {
                record_codec.encode(&record.record, writer)?;
                checkpoint::write_i64(writer, record.weight)?;
            }
        }
        Ok(())
    }

    /// Reconstructs the buffer from `reader`, replacing current contents.
    pub fn restore(
        &mut self,
        reader: &mut dyn Read,
        time_codec: &dyn Codec<T>,
        record_codec: &dyn Codec<S>,
    ) -> Result<(), CheckpointError> {
        let batch_count = checkpoint::read_len(reader)?;
        self.batches.clear();
        self.batches.reserve(batch_count);
        for _ in 0..batch_count {
            let time = time_codec.decode(reader)?;
            let record_count = checkpoint::read_len(reader)?;
            let mut records = Vec::with_capacity(record_count);
            for _ in 0..record_count {
                let record = record_codec.decode(reader)?;
                let weight = checkpoint::read_i64(reader)?;
                records.push(Weighted::new(record, weight));
            }
            self.batches.push((time, records));
        }
        Ok(())
    }
}
