//! A `Statement` updates program state with the values of `Term`.

use crate::il::{Access, Function, Term};
use crate::RC;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A hook embedded in the IR, invoked whenever the analyzer executes its
/// statement.
///
/// Hooks are the escape hatch for structural changes mid-analysis, e.g.
/// de-instrumenting a call once it is recognized: they receive the
/// function under analysis and may add or remove blocks and statements.
/// The analyzer observes such changes on its next pass and drops dataflow
/// facts about terms that disappeared when the analysis finishes.
#[derive(Clone)]
pub struct Callback(RC<dyn Fn(&mut Function)>);

impl Callback {
    pub fn new<F: Fn(&mut Function) + 'static>(hook: F) -> Callback {
        Callback(RC::new(hook))
    }

    pub fn call(&self, function: &mut Function) {
        (self.0)(function)
    }
}

impl Default for Callback {
    fn default() -> Callback {
        Callback(RC::new(|_| {}))
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Callback(..)")
    }
}

impl PartialEq for Callback {
    fn eq(&self, other: &Callback) -> bool {
        RC::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Callback {}

/// A statement in Kestrel IL.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum Statement {
    /// Inline assembly the lifter could not translate. Opaque to analysis.
    InlineAssembly,
    /// Assign the value of `right` to the location named by `left`.
    Assign { left: Term, right: Term },
    /// Transfer control. Targets computed at runtime carry address terms.
    Jump {
        condition: Option<Term>,
        then_target: Option<Term>,
        else_target: Option<Term>,
    },
    /// Call the function whose address `target` evaluates to.
    Call { target: Term },
    /// Return from the enclosing function.
    Return,
    /// Evaluate a term purely for its effect on locations and definitions.
    Touch { term: Term },
    /// Invoke an embedded hook.
    Callback {
        #[serde(skip)]
        callback: Callback,
    },
}

impl Statement {
    /// Create a new `Statement::Assign`. The top of `left` is marked as a
    /// write; everything beneath it, e.g. the address of a dereference,
    /// keeps its read access.
    pub fn assign(mut left: Term, right: Term) -> Statement {
        left.set_access(Access::WRITE);
        Statement::Assign { left, right }
    }

    /// Create a new `Statement::Jump`.
    pub fn jump(
        condition: Option<Term>,
        then_target: Option<Term>,
        else_target: Option<Term>,
    ) -> Statement {
        Statement::Jump {
            condition,
            then_target,
            else_target,
        }
    }

    /// Create a new `Statement::Call`.
    pub fn call(target: Term) -> Statement {
        Statement::Call { target }
    }

    /// Create a new `Statement::Touch` with the given access flags.
    pub fn touch(mut term: Term, access: Access) -> Statement {
        term.set_access(access);
        Statement::Touch { term }
    }

    /// Create a new `Statement::Callback`.
    pub fn callback(callback: Callback) -> Statement {
        Statement::Callback { callback }
    }

    /// Every top-level term of this statement together with its sub-terms.
    pub fn terms(&self) -> Vec<&Term> {
        let mut terms: Vec<&Term> = Vec::new();
        match self {
            Statement::InlineAssembly | Statement::Return | Statement::Callback { .. } => {}
            Statement::Assign { left, right } => {
                terms.append(&mut right.terms());
                terms.append(&mut left.terms());
            }
            Statement::Jump {
                condition,
                then_target,
                else_target,
            } => {
                for term in [condition, then_target, else_target]
                    .iter()
                    .filter_map(|term| term.as_ref())
                {
                    terms.append(&mut term.terms());
                }
            }
            Statement::Call { target } => {
                terms.append(&mut target.terms());
            }
            Statement::Touch { term } => {
                terms.append(&mut term.terms());
            }
        }
        terms
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Statement::InlineAssembly => write!(f, "asm"),
            Statement::Assign { left, right } => write!(f, "{} = {}", left, right),
            Statement::Jump {
                condition,
                then_target,
                else_target,
            } => {
                write!(f, "jump")?;
                if let Some(condition) = condition {
                    write!(f, " if {}", condition)?;
                }
                if let Some(then_target) = then_target {
                    write!(f, " then {}", then_target)?;
                }
                if let Some(else_target) = else_target {
                    write!(f, " else {}", else_target)?;
                }
                Ok(())
            }
            Statement::Call { target } => write!(f, "call {}", target),
            Statement::Return => write!(f, "return"),
            Statement::Touch { term } => write!(f, "touch {}", term),
            Statement::Callback { .. } => write!(f, "callback"),
        }
    }
}
