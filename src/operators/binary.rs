//! A stateful operator over two keyed input streams.
//!
//! The operator buffers weighted input records against their key until the
//! framework announces a time as complete, then, for each key with pending
//! changes, determines the set of *interesting* times (the join-closure of the
//! new times against the key's history), re-derives the output at exactly
//! those times, and emits the difference between new and previously produced
//! output. Records only ever move forward: unprocessed deltas are merged into
//! the processed history, and output differences are retained so later times
//! can be computed against them.

use std::io::{Read, Write};

use fnv::FnvHashMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::channels::{Notify, Output};
use crate::checkpoint::{self, BincodeCodec, CheckpointError, Codec};
use crate::error::Fault;
use crate::input::InputBuffer;
use crate::intern::{LatticeInternTable, TimeIndex};
use crate::lattice::Lattice;
use crate::trace::{consolidate, BinaryKeyIndices, CollectionTrace, Head, TraceVariant};
use crate::{Data, Weighted};

/// Per-instance construction options.
///
/// Immutability and identity-projection flags only select trace
/// representations; behavior is identical whichever representation is chosen.
/// Disabling `maintain_output_trace` trades memory for recomputation of prior
/// output. It is only sound when no later time will ask for output history,
/// a precondition the hosting framework must enforce.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorConfig {
    /// Input 1 will never be revised after delivery.
    pub input1_immutable: bool,
    /// Input 2 will never be revised after delivery.
    pub input2_immutable: bool,
    /// The value projection for input 1 is the identity.
    pub identity_value1: bool,
    /// The value projection for input 2 is the identity.
    pub identity_value2: bool,
    /// Retain produced output per key and time.
    pub maintain_output_trace: bool,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        OperatorConfig {
            input1_immutable: false,
            input2_immutable: false,
            identity_value1: false,
            identity_value2: false,
            maintain_output_trace: true,
        }
    }
}

/// Recomputes a key's output contribution at one time from the accumulated
/// input collections.
///
/// Implementations see the full multisets as of the queried time and write the
/// full output multiset; the operator subtracts previously produced output
/// itself. Failures surface as [`Fault::Reduce`] and abort the compute pass.
pub trait ReduceLogic<K, V1, V2, R> {
    /// Writes into `output` the output multiset for `key` given the input
    /// collections accumulated as of the queried time.
    fn reduce(
        &mut self,
        key: &K,
        input1: &[Weighted<V1>],
        input2: &[Weighted<V2>],
        output: &mut Vec<Weighted<R>>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// The codec objects one operator's checkpoint and restore pass through.
///
/// Constructed once at startup by whoever owns serialization decisions and
/// handed to every checkpoint call; nothing here is cached process-wide.
pub struct OperatorCodecs<K, V1, V2, S1, S2, T, R> {
    /// Codec for times.
    pub time: Box<dyn Codec<T>>,
    /// Codec for keys.
    pub key: Box<dyn Codec<K>>,
    /// Codec for input 1 values.
    pub value1: Box<dyn Codec<V1>>,
    /// Codec for input 2 values.
    pub value2: Box<dyn Codec<V2>>,
    /// Codec for input 1 records.
    pub record1: Box<dyn Codec<S1>>,
    /// Codec for input 2 records.
    pub record2: Box<dyn Codec<S2>>,
    /// Codec for output records.
    pub output: Box<dyn Codec<R>>,
}

impl<K, V1, V2, S1, S2, T, R> OperatorCodecs<K, V1, V2, S1, S2, T, R>
where
    K: Serialize + DeserializeOwned + 'static,
    V1: Serialize + DeserializeOwned + 'static,
    V2: Serialize + DeserializeOwned + 'static,
    S1: Serialize + DeserializeOwned + 'static,
    S2: Serialize + DeserializeOwned + 'static,
    T: Serialize + DeserializeOwned + 'static,
    R: Serialize + DeserializeOwned + 'static,
{
    /// Codecs backed by `serde`/`bincode` for every type.
    pub fn bincode() -> Self {
        OperatorCodecs {
            time: Box::new(BincodeCodec::new()),
            key: Box::new(BincodeCodec::new()),
            value1: Box::new(BincodeCodec::new()),
            value2: Box::new(BincodeCodec::new()),
            record1: Box::new(BincodeCodec::new()),
            record2: Box::new(BincodeCodec::new()),
            output: Box::new(BincodeCodec::new()),
        }
    }
}

/// A stateful binary operator: two keyed inputs, one keyed output, incremental
/// re-evaluation driven by interesting times.
///
/// The framework must serialize all calls on one instance; the operator
/// performs no locking of its own.
pub struct BinaryStatefulOperator<K, V1, V2, S1, S2, T, R, L>
where
    K: Data,
    V1: Data,
    V2: Data,
    S1: Data,
    S2: Data,
    T: Data + Lattice,
    R: Data,
{
    key1: Box<dyn Fn(&S1) -> K>,
    value1: Box<dyn Fn(&S1) -> V1>,
    key2: Box<dyn Fn(&S2) -> K>,
    value2: Box<dyn Fn(&S2) -> V2>,

    logic: L,
    config: OperatorConfig,

    intern: LatticeInternTable<T>,
    input_trace1: TraceVariant<V1>,
    input_trace2: TraceVariant<V2>,
    output_trace: TraceVariant<R>,
    output_workspace: Head,

    key_indices: FnvHashMap<K, BinaryKeyIndices>,
    keys_to_process: Vec<K>,

    input1: InputBuffer<S1, T>,
    input2: InputBuffer<S2, T>,

    shut_down: bool,

    // scratch space reused across compute passes.
    collection1: Vec<Weighted<V1>>,
    collection2: Vec<Weighted<V2>>,
    difference1: Vec<Weighted<V1>>,
    difference2: Vec<Weighted<V2>>,
    time_list: Vec<TimeIndex>,
    truth_list: Vec<TimeIndex>,
    delta_list: Vec<TimeIndex>,
    output_buffer: Vec<Weighted<R>>,
    output_collection: Vec<Weighted<R>>,
}

impl<K, V1, V2, S1, S2, T, R, L> BinaryStatefulOperator<K, V1, V2, S1, S2, T, R, L>
where
    K: Data,
    V1: Data,
    V2: Data,
    S1: Data,
    S2: Data,
    T: Data + Lattice,
    R: Data,
    L: ReduceLogic<K, V1, V2, R>,
{
    /// Creates an operator from its key and value projections, its reduce
    /// logic, and its configuration.
    pub fn new(
        key1: impl Fn(&S1) -> K + 'static,
        value1: impl Fn(&S1) -> V1 + 'static,
        key2: impl Fn(&S2) -> K + 'static,
        value2: impl Fn(&S2) -> V2 + 'static,
        logic: L,
        config: OperatorConfig,
    ) -> Self {
        BinaryStatefulOperator {
            key1: Box::new(key1),
            value1: Box::new(value1),
            key2: Box::new(key2),
            value2: Box::new(value2),
            logic,
            config,
            intern: LatticeInternTable::new(),
            input_trace1: TraceVariant::for_input(1, config.identity_value1, config.input1_immutable),
            input_trace2: TraceVariant::for_input(2, config.identity_value2, config.input2_immutable),
            output_trace: TraceVariant::for_output(),
            output_workspace: None,
            key_indices: FnvHashMap::default(),
            keys_to_process: Vec::new(),
            input1: InputBuffer::new(),
            input2: InputBuffer::new(),
            shut_down: false,
            collection1: Vec::new(),
            collection2: Vec::new(),
            difference1: Vec::new(),
            difference2: Vec::new(),
            time_list: Vec::new(),
            truth_list: Vec::new(),
            delta_list: Vec::new(),
            output_buffer: Vec::new(),
            output_collection: Vec::new(),
        }
    }

    /// The operator's configuration.
    pub fn config(&self) -> &OperatorConfig {
        &self.config
    }

    /// Accepts a message batch on input 1.
    ///
    /// Immutable inputs are applied eagerly per record; otherwise records are
    /// parked until their time completes. Either way a completion notification
    /// is requested for each record's time.
    pub fn on_recv1(
        &mut self,
        message: impl IntoIterator<Item = (Weighted<S1>, T)>,
        notify: &mut impl Notify<T>,
    ) {
        for (record, time) in message {
            if self.config.input1_immutable {
                self.on_input1(record, &time);
            } else {
                self.input1.push(record, &time);
            }
            notify.notify_at(&time);
        }
    }

    /// Accepts a message batch on input 2.
    pub fn on_recv2(
        &mut self,
        message: impl IntoIterator<Item = (Weighted<S2>, T)>,
        notify: &mut impl Notify<T>,
    ) {
        for (record, time) in message {
            if self.config.input2_immutable {
                self.on_input2(record, &time);
            } else {
                self.input2.push(record, &time);
            }
            notify.notify_at(&time);
        }
    }

    /// Applies one record from input 1 to the key's unprocessed state.
    pub fn on_input1(&mut self, entry: Weighted<S1>, time: &T) {
        debug_assert!(!self.shut_down);
        let key = (self.key1)(&entry.record);
        let mut state = self.key_indices.get(&key).copied().unwrap_or_default();
        if !state.pending() {
            self.keys_to_process.push(key.clone());
        }
        let value = (self.value1)(&entry.record);
        let time = self.intern.intern(time.clone());
        self.input_trace1.introduce(&mut state.unprocessed1, value, entry.weight, time);
        self.key_indices.insert(key, state);
    }

    /// Applies one record from input 2 to the key's unprocessed state.
    pub fn on_input2(&mut self, entry: Weighted<S2>, time: &T) {
        debug_assert!(!self.shut_down);
        let key = (self.key2)(&entry.record);
        let mut state = self.key_indices.get(&key).copied().unwrap_or_default();
        if !state.pending() {
            self.keys_to_process.push(key.clone());
        }
        let value = (self.value2)(&entry.record);
        let time = self.intern.intern(time.clone());
        self.input_trace2.introduce(&mut state.unprocessed2, value, entry.weight, time);
        self.key_indices.insert(key, state);
    }

    /// Drains records parked at `time`, recomputes every pending key, flushes
    /// the output, and compacts the input traces.
    ///
    /// Invoked by the framework once no input at or before `time` can arrive.
    pub fn on_done(&mut self, time: &T, output: &mut impl Output<R, T>) -> Result<(), Fault> {
        debug_assert!(!self.shut_down);
        if !self.config.input1_immutable {
            for record in self.input1.records_at(time) {
                self.on_input1(record, time);
            }
        }
        if !self.config.input2_immutable {
            for record in self.input2.records_at(time) {
                self.on_input2(record, time);
            }
        }
        self.compute(output)?;
        output.flush();
        self.input_trace1.compact();
        self.input_trace2.compact();
        Ok(())
    }

    /// Recomputes every key enqueued since the last pass. Idempotent when the
    /// queue is empty.
    ///
    /// On failure, keys not yet attempted stay enqueued with their pending
    /// state intact; the failed key's merged input state remains merged.
    pub fn compute(&mut self, output: &mut impl Output<R, T>) -> Result<(), Fault> {
        let keys = std::mem::take(&mut self.keys_to_process);
        for (position, key) in keys.iter().enumerate() {
            if let Err(fault) = self.update(key, output) {
                self.keys_to_process.extend_from_slice(&keys[position + 1..]);
                return Err(fault);
            }
        }
        Ok(())
    }

    /// Installs a new reachable-time frontier, forwarded to the intern table.
    ///
    /// Trace compaction against the new redirection happens lazily, the next
    /// time each key is touched by an update.
    pub fn update_reachability(&mut self, frontier: &[T]) -> Result<(), Fault> {
        self.intern.update_reachability(frontier)
    }

    /// Releases all state. Safe to call repeatedly, and after a failed pass.
    pub fn on_shutdown(&mut self) {
        self.input_trace1 = TraceVariant::for_input(1, self.config.identity_value1, self.config.input1_immutable);
        self.input_trace2 = TraceVariant::for_input(2, self.config.identity_value2, self.config.input2_immutable);
        self.output_trace = TraceVariant::for_output();
        self.output_workspace = None;
        self.intern = LatticeInternTable::new();
        self.key_indices.clear();
        self.keys_to_process.clear();
        self.input1.clear();
        self.input2.clear();
        self.shut_down = true;
    }

    // Moves a key's unprocessed state into processed state, updating its output
    // and emitting the differences.
    fn update(&mut self, key: &K, output: &mut impl Output<R, T>) -> Result<(), Fault> {
        let mut indices = match self.key_indices.get(key) {
            Some(indices) => *indices,
            None => return Ok(()),
        };
        if !indices.pending() {
            return Ok(());
        }

        // bring processed state to canonical times before any comparisons.
        self.input_trace1.advance_state(&self.intern, &mut indices.processed1);
        self.input_trace2.advance_state(&self.intern, &mut indices.processed2);

        // the times that may require updates.
        self.delta_list.clear();
        self.input_trace1.enumerate_times(indices.unprocessed1, &mut self.delta_list);
        self.input_trace2.enumerate_times(indices.unprocessed2, &mut self.delta_list);
        self.truth_list.clear();
        self.input_trace1.enumerate_times(indices.processed1, &mut self.truth_list);
        self.input_trace2.enumerate_times(indices.processed2, &mut self.truth_list);
        self.time_list.clear();
        self.intern.interesting_times(&mut self.time_list, &self.truth_list, &self.delta_list);

        // incorporate the updates, so old and new outputs can be compared.
        // without an output trace the unprocessed chains must stay readable:
        // prior output is recomputed from processed-minus-unprocessed.
        let clear_source = self.config.maintain_output_trace;
        self.input_trace1.introduce_from(&mut indices.processed1, &mut indices.unprocessed1, clear_source);
        self.input_trace2.introduce_from(&mut indices.processed2, &mut indices.unprocessed2, clear_source);

        let result = self.update_times(key, &mut indices, output);

        // clean out the state just processed.
        self.input_trace1.zero_state(&mut indices.unprocessed1);
        self.input_trace2.zero_state(&mut indices.unprocessed2);

        match result {
            Ok(()) => {
                // move the differences produced from workspace to persistent storage.
                if self.config.maintain_output_trace {
                    self.output_trace.introduce_from(&mut indices.output, &mut self.output_workspace, true);
                    self.output_trace.advance_state(&self.intern, &mut indices.output);
                } else {
                    self.output_trace.zero_state(&mut self.output_workspace);
                }
                self.key_indices.insert(key.clone(), indices);
                Ok(())
            }
            Err(fault) => {
                // a partially computed workspace is discarded: the output trace
                // keeps describing exactly what earlier passes emitted.
                self.output_trace.zero_state(&mut self.output_workspace);
                self.key_indices.insert(key.clone(), indices);
                Err(fault)
            }
        }
    }

    fn update_times(
        &mut self,
        key: &K,
        indices: &mut BinaryKeyIndices,
        output: &mut impl Output<R, T>,
    ) -> Result<(), Fault> {
        let mut position = 0;
        while position < self.time_list.len() {
            let time = self.time_list[position];
            self.update_time(key, indices, time, output)?;
            position += 1;
        }
        Ok(())
    }

    // Re-derives the output difference at one interesting time and emits it.
    fn update_time(
        &mut self,
        key: &K,
        indices: &mut BinaryKeyIndices,
        time: TimeIndex,
        output: &mut impl Output<R, T>,
    ) -> Result<(), Fault> {
        // cancel prior workspace state, so accumulation at `time` starts empty.
        self.output_trace.subtract_strictly_prior_differences(&self.intern, &mut self.output_workspace, time);

        self.new_output_minus_old_output(key, indices, time)?;

        self.output_collection.clear();
        self.output_trace.enumerate_difference_at(&self.intern, self.output_workspace, time, &mut self.output_collection);
        let output_time = self.intern.time(time).clone();
        for record in self.output_collection.drain(..) {
            output.send(record, &output_time);
        }
        Ok(())
    }

    // Populates the workspace at `time` with the reduce output net of output
    // already produced for this key at this time.
    fn new_output_minus_old_output(
        &mut self,
        key: &K,
        indices: &mut BinaryKeyIndices,
        time: TimeIndex,
    ) -> Result<(), Fault> {
        self.collection1.clear();
        self.input_trace1.enumerate_collection_at(&self.intern, indices.processed1, time, &mut self.collection1);
        self.collection2.clear();
        self.input_trace2.enumerate_collection_at(&self.intern, indices.processed2, time, &mut self.collection2);

        self.output_buffer.clear();
        self.logic
            .reduce(key, &self.collection1, &self.collection2, &mut self.output_buffer)
            .map_err(Fault::Reduce)?;
        for entry in self.output_buffer.drain(..) {
            self.output_trace.introduce(&mut self.output_workspace, entry.record, entry.weight, time);
        }

        if self.config.maintain_output_trace {
            // old output is on record; subtract it.
            self.output_collection.clear();
            self.output_trace.enumerate_collection_at(&self.intern, indices.output, time, &mut self.output_collection);
            for entry in self.output_collection.drain(..) {
                self.output_trace.introduce(&mut self.output_workspace, entry.record, -entry.weight, time);
            }
        } else {
            // old output is not on record; recompute it from the collections as
            // they stood before this batch (the unprocessed chains are intact).
            self.difference1.clear();
            self.input_trace1.enumerate_collection_at(&self.intern, indices.unprocessed1, time, &mut self.difference1);
            for entry in self.difference1.drain(..) {
                self.collection1.push(Weighted::new(entry.record, -entry.weight));
            }
            consolidate(&mut self.collection1);

            self.difference2.clear();
            self.input_trace2.enumerate_collection_at(&self.intern, indices.unprocessed2, time, &mut self.difference2);
            for entry in self.difference2.drain(..) {
                self.collection2.push(Weighted::new(entry.record, -entry.weight));
            }
            consolidate(&mut self.collection2);

            self.output_buffer.clear();
            self.logic
                .reduce(key, &self.collection1, &self.collection2, &mut self.output_buffer)
                .map_err(Fault::Reduce)?;
            for entry in self.output_buffer.drain(..) {
                self.output_trace.introduce(&mut self.output_workspace, entry.record, -entry.weight, time);
            }
        }
        Ok(())
    }

    /* Checkpoint format:
     * bool                      shut down
     * if !shut down:
     *     LatticeInternTable    intern table
     *     TraceVariant          input trace 1
     *     TraceVariant          input trace 2
     *     TraceVariant          output trace
     *     u32                   key count
     *     (K, KeyIndices)*count key indices
     *     u32                   pending key count
     *     K*count               pending keys
     *     InputBuffer           input 1
     *     InputBuffer           input 2
     */

    /// Writes the operator's state to `writer`.
    ///
    /// Must only be called at a quiescent point: no `on_input`/`on_done` call
    /// in progress on this instance.
    pub fn checkpoint(
        &self,
        writer: &mut dyn Write,
        codecs: &OperatorCodecs<K, V1, V2, S1, S2, T, R>,
    ) -> Result<(), CheckpointError> {
        debug_assert!(self.output_workspace.is_none());
        checkpoint::write_bool(writer, self.shut_down)?;
        if !self.shut_down {
            self.intern.checkpoint(writer, codecs.time.as_ref())?;
            self.input_trace1.checkpoint(writer, codecs.value1.as_ref())?;
            self.input_trace2.checkpoint(writer, codecs.value2.as_ref())?;
            self.output_trace.checkpoint(writer, codecs.output.as_ref())?;

            checkpoint::write_len(writer, self.key_indices.len())?;
            for (key, indices) in self.key_indices.iter() {
                codecs.key.encode(key, writer)?;
                indices.checkpoint(writer)?;
            }

            checkpoint::write_len(writer, self.keys_to_process.len())?;
            for key in self.keys_to_process.iter() {
                codecs.key.encode(key, writer)?;
            }

            self.input1.checkpoint(writer, codecs.time.as_ref(), codecs.record1.as_ref())?;
            self.input2.checkpoint(writer, codecs.time.as_ref(), codecs.record2.as_ref())?;
        }
        Ok(())
    }

    /// Reconstructs the operator's state from `reader`.
    ///
    /// After a successful restore, subsequent calls behave as if no restart
    /// had occurred. A malformed stream fails before any call is accepted.
    pub fn restore(
        &mut self,
        reader: &mut dyn Read,
        codecs: &OperatorCodecs<K, V1, V2, S1, S2, T, R>,
    ) -> Result<(), CheckpointError> {
        self.shut_down = checkpoint::read_bool(reader)?;
        self.output_workspace = None;
        if self.shut_down {
            self.key_indices.clear();
            self.keys_to_process.clear();
            self.input1.clear();
            self.input2.clear();
            return Ok(());
        }

        self.intern.restore(reader, codecs.time.as_ref())?;
        self.input_trace1.restore(reader, codecs.value1.as_ref())?;
        self.input_trace2.restore(reader, codecs.value2.as_ref())?;
        self.output_trace.restore(reader, codecs.output.as_ref())?;

        let key_count = checkpoint::read_len(reader)?;
        self.key_indices.clear();
        self.key_indices.reserve(key_count);
        for _ in 0..key_count {
            let key = codecs.key.decode(reader)?;
            let indices = BinaryKeyIndices::restore(reader)?;
            self.key_indices.insert(key, indices);
        }
        if self.key_indices.len() != key_count {
            return Err(CheckpointError::Corrupt("duplicate key in key indices"));
        }

        let pending_count = checkpoint::read_len(reader)?;
        self.keys_to_process.clear();
        self.keys_to_process.reserve(pending_count);
        for _ in 0..pending_count {
            self.keys_to_process.push(codecs.key.decode(reader)?);
        }

        self.input1.restore(reader, codecs.time.as_ref(), codecs.record1.as_ref())?;
        self.input2.restore(reader, codecs.time.as_ref(), codecs.record2.as_ref())?;
        Ok(())
    }
}
