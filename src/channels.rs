//! Interfaces to the hosting framework's channels and scheduler.
//!
//! The framework owns message transport and progress tracking; an operator
//! only ever pushes weighted records into an output and registers interest in
//! the completion of times. Emission goes through a buffering sink the caller
//! drains at its own pace, which is what lets the framework apply back-pressure
//! without the operator losing state mid-update.

use crate::{Data, Weighted};

/// The downstream side of an operator: accepts weighted records tagged with
/// the time at which they hold.
pub trait Output<R: Data, T> {
    /// Accepts one output record at `time`.
    fn send(&mut self, record: Weighted<R>, time: &T);
    /// Indicates a batch boundary; buffered records may now be delivered.
    fn flush(&mut self);
}

/// Registration of interest in the completion of a time.
///
/// The framework calls the operator back (`on_done`) once no input at or
/// before a registered time can arrive.
pub trait Notify<T> {
    /// Requests a completion notification for `time`.
    fn notify_at(&mut self, time: &T);
}

/// An output that retains everything sent to it; the in-process stand-in used
/// by tests and by single-process harnesses.
#[derive(Debug)]
pub struct VecOutput<R, T> {
    /// Every record sent, in emission order, with its time.
    pub sent: Vec<(T, Weighted<R>)>,
    /// The number of flushes observed.
    pub flushes: usize,
}

impl<R, T> Default for VecOutput<R, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R, T> VecOutput<R, T> {
    /// Creates an empty output.
    pub fn new() -> Self {
        VecOutput { sent: Vec::new(), flushes: 0 }
    }
}

impl<R: Data, T: Clone> Output<R, T> for VecOutput<R, T> {
    fn send(&mut self, record: Weighted<R>, time: &T) {
        self.sent.push((time.clone(), record));
    }
    fn flush(&mut self) {
        self.flushes += 1;
    }
}

/// A notification sink that records requested times; tests replay them as
/// `on_done` calls in completion order.
#[derive(Debug)]
pub struct VecNotify<T> {
    /// Times for which completion notifications were requested.
    pub requested: Vec<T>,
}

impl<T> Default for VecNotify<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> VecNotify<T> {
    /// Creates an empty sink.
    pub fn new() -> Self {
        VecNotify { requested: Vec::new() }
    }
}

impl<T: Clone + PartialEq> Notify<T> for VecNotify<T> {
    fn notify_at(&mut self, time: &T) {
        if !self.requested.contains(time) {
            self.requested.push(time.clone());
        }
    }
}
