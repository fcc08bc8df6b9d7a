//! Faults an operator instance can surface to the hosting framework.

use thiserror::Error;

use crate::checkpoint::CheckpointError;

/// An unrecoverable condition within one operator instance.
///
/// None of these are retried locally. The framework decides whether to tear the
/// instance down or to restore it from a checkpoint and replay; the operator's
/// own state remains internally consistent in either case.
#[derive(Debug, Error)]
pub enum Fault {
    /// An internal invariant no longer holds (for example, an empty reachable
    /// frontier, or a redirection that fails to reach a fixed point).
    #[error("internal consistency violation: {0}")]
    Consistency(&'static str),

    /// The user-supplied reduce logic failed for some key.
    ///
    /// Input state merged before the failure stays merged; a restore-and-replay
    /// reprocesses it correctly.
    #[error("reduce logic failed")]
    Reduce(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Writing or reading persisted state failed.
    #[error("checkpoint failure")]
    Checkpoint(#[from] CheckpointError),
}
