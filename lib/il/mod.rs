//! Kestrel Intermediate Language
//!
//! A function is a `ControlFlowGraph` of `Block`. A `Block` is a sequence
//! of `Instruction`, each wrapping one `Statement`. Statements reference
//! trees of `Term`: the expression forest the dataflow analyzer walks.

pub mod block;
pub mod constant;
pub mod control_flow_graph;
pub mod edge;
pub mod function;
pub mod instruction;
pub mod memory_location;
pub mod statement;
pub mod term;

pub use self::block::*;
pub use self::constant::*;
pub use self::control_flow_graph::*;
pub use self::edge::*;
pub use self::function::*;
pub use self::instruction::*;
pub use self::memory_location::*;
pub use self::statement::*;
pub use self::term::*;

use crate::Error;

/// A convenience function to create a new constant.
///
/// This is the preferred way to create a `Constant`.
pub fn const_(value: u64, bits: usize) -> Constant {
    Constant::new(value, bits)
}

/// A convenience function to create a new integer-constant term.
pub fn const_term(value: u64, bits: usize) -> Term {
    Term::int_const(Constant::new(value, bits))
}

/// A convenience function to create a term accessing a register.
///
/// `offset` is the bit offset of the register within the register bank.
pub fn register(offset: i64, bits: usize) -> Term {
    Term::memory_location_access(MemoryLocation::new(MemoryDomain::Registers, offset, bits))
}

/// A convenience function to create a dereference of machine memory.
pub fn deref(address: Term, bits: usize) -> Term {
    Term::dereference(address, MemoryDomain::Memory, bits)
}

/// A convenience function to create an addition term.
pub fn add(left: Term, right: Term) -> Result<Term, Error> {
    Term::binary(BinaryOperatorKind::Add, left, right)
}

/// A convenience function to create a subtraction term.
pub fn sub(left: Term, right: Term) -> Result<Term, Error> {
    Term::binary(BinaryOperatorKind::Sub, left, right)
}

/// A convenience function to create a bitwise-and term.
pub fn and(left: Term, right: Term) -> Result<Term, Error> {
    Term::binary(BinaryOperatorKind::And, left, right)
}

/// A convenience function to create an intrinsic term.
pub fn intrinsic(kind: IntrinsicKind, bits: usize) -> Term {
    Term::intrinsic(kind, bits)
}
