//! A `Term` is a node in a function's expression forest.
//!
//! Terms always evaluate to some value, and some terms additionally name a
//! storage location: a `MemoryLocationAccess` names one directly, a
//! `Dereference` names one indirectly through the value of its address
//! sub-term. Whether such a term reads, writes or kills its location is a
//! property of the statement that owns it, recorded in the term's access
//! flags when the statement is built.

use crate::il::{Constant, MemoryDomain, MemoryLocation};
use crate::Error;
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_TERM_INDEX: AtomicU64 = AtomicU64::new(0);

fn next_term_index() -> u64 {
    NEXT_TERM_INDEX.fetch_add(1, Ordering::Relaxed)
}

bitflags! {
    /// How a term touches the memory location it names.
    #[derive(Deserialize, Serialize)]
    pub struct Access: u8 {
        const READ  = 0b001;
        const WRITE = 0b010;
        const KILL  = 0b100;
    }
}

impl Default for Access {
    fn default() -> Access {
        Access::READ
    }
}

/// The intrinsic terms the IR builder may emit.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum IntrinsicKind {
    /// A value nothing is known about.
    Unknown,
    /// A value read before any write, i.e. undefined behavior.
    Undefined,
    /// The stack pointer's value at function entry.
    ZeroStackOffset,
    /// A hook capturing the reaching definitions at this program point.
    ReachingSnapshot,
    /// The address of the instruction this term belongs to.
    InstructionAddress,
    /// The address of the instruction following this term's instruction.
    NextInstructionAddress,
}

/// Unary operators.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum UnaryOperatorKind {
    Not,
    Negate,
    SignExtend,
    ZeroExtend,
    Truncate,
}

/// Binary operators. `Shr` is the logical right shift, `Sar` the
/// arithmetic one. Comparisons produce 1-bit terms.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum BinaryOperatorKind {
    And,
    Or,
    Xor,
    Shl,
    Shr,
    Sar,
    Add,
    Sub,
    Mul,
    Divs,
    Divu,
    Mods,
    Modu,
    Cmpeq,
    Cmplts,
    Cmples,
    Cmpltu,
    Cmpleu,
}

impl BinaryOperatorKind {
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinaryOperatorKind::Cmpeq
                | BinaryOperatorKind::Cmplts
                | BinaryOperatorKind::Cmples
                | BinaryOperatorKind::Cmpltu
                | BinaryOperatorKind::Cmpleu
        )
    }
}

/// The variants of a `Term`.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum TermKind {
    IntConst(Constant),
    Intrinsic(IntrinsicKind),
    MemoryLocationAccess(MemoryLocation),
    Dereference {
        address: Box<Term>,
        domain: MemoryDomain,
    },
    UnaryOperator {
        kind: UnaryOperatorKind,
        operand: Box<Term>,
    },
    BinaryOperator {
        kind: BinaryOperatorKind,
        left: Box<Term>,
        right: Box<Term>,
    },
    Choice {
        preferred: Box<Term>,
        default: Box<Term>,
    },
}

/// A term in Kestrel IL.
///
/// Every term carries a crate-unique index; the dataflow store is keyed by
/// it. Cloning a term preserves the index, so a clone denotes the same
/// program point, not a new one.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Term {
    index: u64,
    bits: usize,
    access: Access,
    kind: TermKind,
}

impl Term {
    fn new(bits: usize, kind: TermKind) -> Term {
        Term {
            index: next_term_index(),
            bits,
            access: Access::READ,
            kind,
        }
    }

    /// Create a new integer-constant term.
    pub fn int_const(constant: Constant) -> Term {
        let bits = constant.bits();
        Term::new(bits, TermKind::IntConst(constant))
    }

    /// Create a new intrinsic term of the given width.
    pub fn intrinsic(kind: IntrinsicKind, bits: usize) -> Term {
        Term::new(bits, TermKind::Intrinsic(kind))
    }

    /// Create a term accessing the given memory location directly.
    pub fn memory_location_access(memory_location: MemoryLocation) -> Term {
        let bits = memory_location.size();
        Term::new(bits, TermKind::MemoryLocationAccess(memory_location))
    }

    /// Create a term dereferencing the value of `address` in `domain`.
    ///
    /// `bits` is the width of the value read or written through the
    /// dereference, not the width of the address.
    pub fn dereference(address: Term, domain: MemoryDomain, bits: usize) -> Term {
        Term::new(
            bits,
            TermKind::Dereference {
                address: Box::new(address),
                domain,
            },
        )
    }

    /// Create a unary-operator term.
    ///
    /// # Error
    /// `SignExtend` and `ZeroExtend` require `bits` greater than the
    /// operand's width, `Truncate` requires it smaller, and `Not` and
    /// `Negate` require it equal.
    pub fn unary(kind: UnaryOperatorKind, operand: Term, bits: usize) -> Result<Term, Error> {
        let valid = match kind {
            UnaryOperatorKind::Not | UnaryOperatorKind::Negate => bits == operand.bits(),
            UnaryOperatorKind::SignExtend | UnaryOperatorKind::ZeroExtend => {
                bits > operand.bits() && operand.bits() > 0
            }
            UnaryOperatorKind::Truncate => bits < operand.bits() && bits > 0,
        };
        if !valid {
            return Err(Error::Sort);
        }
        Ok(Term::new(
            bits,
            TermKind::UnaryOperator {
                kind,
                operand: Box::new(operand),
            },
        ))
    }

    /// Create a binary-operator term.
    ///
    /// The result is as wide as the operands, except for comparisons,
    /// which produce a 1-bit term.
    ///
    /// # Error
    /// The widths of the two operands are not the same.
    pub fn binary(kind: BinaryOperatorKind, left: Term, right: Term) -> Result<Term, Error> {
        if left.bits() != right.bits() || left.bits() == 0 {
            return Err(Error::Sort);
        }
        let bits = if kind.is_comparison() { 1 } else { left.bits() };
        Ok(Term::new(
            bits,
            TermKind::BinaryOperator {
                kind,
                left: Box::new(left),
                right: Box::new(right),
            },
        ))
    }

    /// Create a choice term, selecting `preferred` when a definition of it
    /// reaches the term and `default` otherwise.
    ///
    /// # Error
    /// The widths of the two alternatives are not the same.
    pub fn choice(preferred: Term, default: Term) -> Result<Term, Error> {
        if preferred.bits() != default.bits() {
            return Err(Error::Sort);
        }
        let bits = preferred.bits();
        Ok(Term::new(
            bits,
            TermKind::Choice {
                preferred: Box::new(preferred),
                default: Box::new(default),
            },
        ))
    }

    /// This term's crate-unique index.
    pub fn index(&self) -> u64 {
        self.index
    }

    /// The width of this term in bits.
    pub fn bits(&self) -> usize {
        self.bits
    }

    pub fn kind(&self) -> &TermKind {
        &self.kind
    }

    pub fn access(&self) -> Access {
        self.access
    }

    pub(crate) fn set_access(&mut self, access: Access) {
        self.access = access;
    }

    pub fn is_read(&self) -> bool {
        self.access.contains(Access::READ)
    }

    pub fn is_write(&self) -> bool {
        self.access.contains(Access::WRITE)
    }

    pub fn is_kill(&self) -> bool {
        self.access.contains(Access::KILL)
    }

    /// This term and all terms beneath it, parents before children.
    pub fn terms(&self) -> Vec<&Term> {
        let mut terms: Vec<&Term> = vec![self];
        match self.kind {
            TermKind::IntConst(_)
            | TermKind::Intrinsic(_)
            | TermKind::MemoryLocationAccess(_) => {}
            TermKind::Dereference { ref address, .. } => {
                terms.append(&mut address.terms());
            }
            TermKind::UnaryOperator { ref operand, .. } => {
                terms.append(&mut operand.terms());
            }
            TermKind::BinaryOperator {
                ref left,
                ref right,
                ..
            } => {
                terms.append(&mut left.terms());
                terms.append(&mut right.terms());
            }
            TermKind::Choice {
                ref preferred,
                ref default,
            } => {
                terms.append(&mut preferred.terms());
                terms.append(&mut default.terms());
            }
        }
        terms
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.kind {
            TermKind::IntConst(ref constant) => constant.fmt(f),
            TermKind::Intrinsic(kind) => write!(f, "intrinsic.{:?}:{}", kind, self.bits),
            TermKind::MemoryLocationAccess(ref memory_location) => memory_location.fmt(f),
            TermKind::Dereference {
                ref address,
                domain,
            } => write!(f, "*{:?}({}):{}", domain, address, self.bits),
            TermKind::UnaryOperator { kind, ref operand } => match kind {
                UnaryOperatorKind::Not => write!(f, "~{}", operand),
                UnaryOperatorKind::Negate => write!(f, "-{}", operand),
                UnaryOperatorKind::SignExtend => write!(f, "sext.{}({})", self.bits, operand),
                UnaryOperatorKind::ZeroExtend => write!(f, "zext.{}({})", self.bits, operand),
                UnaryOperatorKind::Truncate => write!(f, "trun.{}({})", self.bits, operand),
            },
            TermKind::BinaryOperator {
                kind,
                ref left,
                ref right,
            } => {
                let symbol = match kind {
                    BinaryOperatorKind::And => "&",
                    BinaryOperatorKind::Or => "|",
                    BinaryOperatorKind::Xor => "^",
                    BinaryOperatorKind::Shl => "<<",
                    BinaryOperatorKind::Shr => ">>",
                    BinaryOperatorKind::Sar => ">>s",
                    BinaryOperatorKind::Add => "+",
                    BinaryOperatorKind::Sub => "-",
                    BinaryOperatorKind::Mul => "*",
                    BinaryOperatorKind::Divs => "/s",
                    BinaryOperatorKind::Divu => "/u",
                    BinaryOperatorKind::Mods => "%s",
                    BinaryOperatorKind::Modu => "%u",
                    BinaryOperatorKind::Cmpeq => "==",
                    BinaryOperatorKind::Cmplts => "<s",
                    BinaryOperatorKind::Cmples => "<=s",
                    BinaryOperatorKind::Cmpltu => "<u",
                    BinaryOperatorKind::Cmpleu => "<=u",
                };
                write!(f, "({} {} {})", left, symbol, right)
            }
            TermKind::Choice {
                ref preferred,
                ref default,
            } => write!(f, "choice({}, {})", preferred, default),
        }
    }
}
