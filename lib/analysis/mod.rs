//! The Kestrel dataflow analyzer.
//!
//! Dataflow analysis computes three mutually dependent facts for every
//! term of a function, by abstract interpretation over its control-flow
//! graph:
//!
//! * an abstract value: partial knowledge of the bit pattern the term
//!   may hold,
//! * a memory location, with dereferences resolved when their addresses
//!   are known,
//! * reaching definitions: which writes may supply the value of each
//!   read, and how their values combine.
//!
//! Resolving a dereference produces a new memory location, which produces
//! new reaching definitions, which can change abstract values, which can
//! resolve further dereferences; the three problems are therefore solved
//! together, by sweeping all blocks until three consecutive passes change
//! nothing.

pub mod abstract_value;
pub mod dataflow;
pub mod dataflow_analyzer;
pub mod execution_context;
pub mod reaching_definitions;
pub mod value;

pub use self::abstract_value::AbstractValue;
pub use self::dataflow::Dataflow;
pub use self::dataflow_analyzer::{dataflow, DataflowAnalyzer};
pub use self::execution_context::ExecutionContext;
pub use self::reaching_definitions::{ReachingDefinition, ReachingDefinitions};
pub use self::value::Value;
