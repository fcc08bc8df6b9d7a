//! Stateful operators over keyed, weighted, time-tagged inputs.
//!
//! The binary stateful operator in this module is the general shell: it owns
//! the intern table, the input and output traces, and the per-key evaluation
//! loop, and defers only the per-time recomputation of output to a pluggable
//! [`ReduceLogic`]. The sibling modules supply the two standard logics: the
//! equi-join and the weight-combining aggregate.

pub mod aggregate;
pub mod binary;
pub mod join;

pub use self::aggregate::AggregateLogic;
pub use self::binary::{BinaryStatefulOperator, OperatorCodecs, OperatorConfig, ReduceLogic};
pub use self::join::JoinLogic;
