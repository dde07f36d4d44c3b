//! An `Edge` is a directed edge between `Block` in a `ControlFlowGraph`.
//!
//! Conditions on control transfers live in the `Jump` statements of the
//! head block; edges only record the shape of the graph.

use crate::graph;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Edge between IL blocks
#[derive(Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Default)]
pub struct Edge {
    head: usize,
    tail: usize,
    comment: Option<String>,
}

impl Edge {
    pub(crate) fn new(head: usize, tail: usize) -> Edge {
        Edge {
            head,
            tail,
            comment: None,
        }
    }

    /// Retrieve the index of the head `Block` for this `Edge`.
    pub fn head(&self) -> usize {
        self.head
    }

    /// Retrieve the index of the tail `Block` for this `Edge`.
    pub fn tail(&self) -> usize {
        self.tail
    }

    pub fn comment(&self) -> Option<&str> {
        self.comment.as_deref()
    }

    pub fn set_comment<S: Into<String>>(&mut self, comment: S) {
        self.comment = Some(comment.into());
    }
}

impl graph::Edge for Edge {
    fn head(&self) -> usize {
        self.head
    }
    fn tail(&self) -> usize {
        self.tail
    }
    fn dot_label(&self) -> String {
        format!("{}", self)
    }
}

impl fmt::Display for Edge {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "(0x{:X}->0x{:X})", self.head, self.tail)
    }
}
