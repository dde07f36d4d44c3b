//! A `Value` is everything the analysis knows about one term.
//!
//! Besides the abstract bit pattern, two semantic flags are tracked
//! because downstream passes interpret addresses through them: whether
//! the value is the stack pointer plus a known constant, and whether it
//! is the result of a multiplicative combination.
//!
//! Both flags are tri-states. Positive and negative evidence are recorded
//! independently; once negative evidence exists it wins, so a value that
//! looks like a stack offset on one path and not on another is treated as
//! not being one.

use crate::analysis::AbstractValue;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct Value {
    abstract_value: AbstractValue,
    stack_offset: i64,
    is_stack_offset: bool,
    is_not_stack_offset: bool,
    is_product: bool,
    is_not_product: bool,
}

impl Value {
    pub fn new() -> Value {
        Value::default()
    }

    pub fn abstract_value(&self) -> &AbstractValue {
        &self.abstract_value
    }

    pub fn set_abstract_value(&mut self, abstract_value: AbstractValue) {
        self.abstract_value = abstract_value;
    }

    /// True if this value is known to be the stack pointer plus a
    /// constant, and no path disclaimed that.
    pub fn is_stack_offset(&self) -> bool {
        self.is_stack_offset && !self.is_not_stack_offset
    }

    /// True if some path disclaimed the stack-offset interpretation.
    pub fn is_not_stack_offset(&self) -> bool {
        self.is_not_stack_offset
    }

    /// The constant offset from the stack pointer at function entry.
    /// Meaningful only when `is_stack_offset()` holds.
    pub fn stack_offset(&self) -> i64 {
        self.stack_offset
    }

    /// Record that this value is the stack pointer plus `offset`. A later
    /// claim with a different offset overwrites the earlier one.
    pub fn make_stack_offset(&mut self, offset: i64) {
        self.is_stack_offset = true;
        self.stack_offset = offset;
    }

    pub fn make_not_stack_offset(&mut self) {
        self.is_not_stack_offset = true;
    }

    /// True if this value is known to be a product and no path disclaimed
    /// that.
    pub fn is_product(&self) -> bool {
        self.is_product && !self.is_not_product
    }

    pub fn is_not_product(&self) -> bool {
        self.is_not_product
    }

    pub fn make_product(&mut self) {
        self.is_product = true;
    }

    pub fn make_not_product(&mut self) {
        self.is_not_product = true;
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.abstract_value)?;
        if self.is_stack_offset() {
            write!(f, " stack_offset({})", self.stack_offset)?;
        }
        if self.is_product() {
            write!(f, " product")?;
        }
        Ok(())
    }
}
