//! A `Function` is a `ControlFlowGraph` with a name and an address.

use crate::il::{Block, ControlFlowGraph, Edge, Term};
use crate::Error;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Function {
    // The address where this function was found.
    address: u64,
    // The `ControlFlowGraph` capturing the semantics of the function.
    control_flow_graph: ControlFlowGraph,
    // The name of the function.
    name: Option<String>,
}

impl Function {
    /// Create a new `Function`
    ///
    /// # Parameters
    /// * `address` - The address where we recovered this function.
    /// * `control_flow_graph` - A `ControlFlowGraph` capturing the semantics of this function.
    pub fn new(address: u64, control_flow_graph: ControlFlowGraph) -> Function {
        Function {
            address,
            control_flow_graph,
            name: None,
        }
    }

    /// Get the address of this `Function`.
    pub fn address(&self) -> u64 {
        self.address
    }

    /// Get a `Block` by index from this `Function`.
    pub fn block(&self, index: usize) -> Result<&Block, Error> {
        self.control_flow_graph.block(index)
    }

    /// Get a mutable reference to a `Block` by index in this `Function`.
    pub fn block_mut(&mut self, index: usize) -> Result<&mut Block, Error> {
        self.control_flow_graph.block_mut(index)
    }

    /// Get every `Block` in this `Function`.
    pub fn blocks(&self) -> Vec<&Block> {
        self.control_flow_graph.blocks()
    }

    /// Get an `Edge` by its head and tail indices from this `Function`.
    pub fn edge(&self, head: usize, tail: usize) -> Result<&Edge, Error> {
        self.control_flow_graph.edge(head, tail)
    }

    /// Get the `ControlFlowGraph` for this `Function`.
    pub fn control_flow_graph(&self) -> &ControlFlowGraph {
        &self.control_flow_graph
    }

    /// Get a mutable reference to the `ControlFlowGraph` for this `Function`.
    pub fn control_flow_graph_mut(&mut self) -> &mut ControlFlowGraph {
        &mut self.control_flow_graph
    }

    /// Get the name of this `Function`.
    pub fn name(&self) -> String {
        match self.name {
            Some(ref name) => name.to_string(),
            None => format!("unknown@{:08X}", self.address),
        }
    }

    /// Set the name of this `Function`.
    pub fn set_name<S: Into<String>>(&mut self, name: S) {
        self.name = Some(name.into());
    }

    /// Every term currently reachable from a statement of this `Function`.
    pub fn terms(&self) -> Vec<&Term> {
        self.blocks()
            .into_iter()
            .flat_map(|block| block.instructions())
            .flat_map(|instruction| instruction.statement().terms())
            .collect()
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} 0x{:X}", self.name(), self.address)
    }
}
