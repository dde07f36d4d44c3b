//! An `Instruction` is one `Statement` placed in a `Block`, optionally
//! tied back to the machine instruction it was lifted from.

use crate::il::Statement;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Instruction {
    statement: Statement,
    index: usize,
    comment: Option<String>,
    /// Address of the machine instruction this was lifted from.
    address: Option<u64>,
    /// Byte length of that machine instruction.
    byte_size: Option<u64>,
}

impl Instruction {
    pub(crate) fn new(index: usize, statement: Statement) -> Instruction {
        Instruction {
            statement,
            index,
            comment: None,
            address: None,
            byte_size: None,
        }
    }

    /// Clone this instruction and set a new index.
    pub(crate) fn clone_new_index(&self, index: usize) -> Instruction {
        let mut clone = self.clone();
        clone.index = index;
        clone
    }

    pub fn statement(&self) -> &Statement {
        &self.statement
    }

    pub fn statement_mut(&mut self) -> &mut Statement {
        &mut self.statement
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn comment(&self) -> Option<&str> {
        self.comment.as_deref()
    }

    pub fn set_comment<S: Into<String>>(&mut self, comment: S) -> &mut Instruction {
        self.comment = Some(comment.into());
        self
    }

    pub fn address(&self) -> Option<u64> {
        self.address
    }

    pub fn set_address(&mut self, address: Option<u64>) -> &mut Instruction {
        self.address = address;
        self
    }

    pub fn byte_size(&self) -> Option<u64> {
        self.byte_size
    }

    pub fn set_byte_size(&mut self, byte_size: Option<u64>) -> &mut Instruction {
        self.byte_size = byte_size;
        self
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.address {
            Some(address) => write!(f, "{:X} {:02X} {}", address, self.index, self.statement),
            None => write!(f, "{:02X} {}", self.index, self.statement),
        }
    }
}
