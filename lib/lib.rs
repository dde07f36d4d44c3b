//! Kestrel: a dataflow analysis core for decompiling native code.
//!
//! Kestrel computes, by abstract interpretation over a function's
//! intermediate representation, the information every later stage of a
//! decompiler feeds on. A quick synopsis of Kestrel's modules:
//!
//! * **analysis** - The dataflow analyzer: abstract values, memory
//!   locations and reaching definitions, solved together to a fixpoint.
//! * **architecture** - Byte order and memory classification queries for
//!   the architectures Kestrel understands.
//! * **graph** - A simple directed graph library.
//! * **il** - Kestrel's Intermediate Language.
//!
//! The IR of a function is a control-flow graph of basic blocks whose
//! statements reference trees of terms. Dataflow analysis fills a
//! [`Dataflow`](analysis/struct.Dataflow.html) store with an abstract
//! value, a memory location and a set of reaching definitions for every
//! term:
//!
//! ```
//! use kestrel::analysis;
//! use kestrel::architecture::Amd64;
//! use kestrel::il;
//! use kestrel::CancellationToken;
//!
//! # fn example() -> Result<(), kestrel::Error> {
//! let mut control_flow_graph = il::ControlFlowGraph::new();
//!
//! let block_index = {
//!     let block = control_flow_graph.new_block()?;
//!     block.assign(il::register(0, 64), il::const_term(5, 64));
//!     block.assign(
//!         il::register(64, 64),
//!         il::add(il::register(0, 64), il::const_term(3, 64))?,
//!     );
//!     block.index()
//! };
//!
//! control_flow_graph.set_entry(block_index)?;
//!
//! let mut function = il::Function::new(0x1000, control_flow_graph);
//! let dataflow =
//!     analysis::dataflow(&mut function, &Amd64::new(), &CancellationToken::new())?;
//! assert!(dataflow.values().next().is_some());
//! # Ok(())
//! # }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub mod analysis;
pub mod architecture;
pub mod graph;
pub mod il;

#[cfg(test)]
mod tests;

use std::rc::Rc;
#[allow(clippy::upper_case_acronyms)]
pub type RC<T> = Rc<T>;

/// Kestrel error type.
#[derive(Clone, Debug, thiserror::Error)]
pub enum Error {
    #[error("Analysis error: {0}")]
    Analysis(String),
    #[error("The analysis was cancelled")]
    Cancelled,
    #[error("The edge with head {0} and tail {1} does not exist in the graph")]
    GraphEdgeNotFound(usize, usize),
    #[error("The vertex id {0} does not exist in the graph")]
    GraphVertexNotFound(usize),
    #[error("Sort error, invalid bitness between terms")]
    Sort,
    #[error("Custom error: {0}")]
    Custom(String),
}

impl From<String> for Error {
    fn from(error: String) -> Error {
        Error::Custom(error)
    }
}

impl From<&str> for Error {
    fn from(error: &str) -> Error {
        Error::Custom(error.to_string())
    }
}

/// A cooperative cancellation signal for long-running analyses.
///
/// Clones share one flag. The analyzer polls the token once per fixpoint
/// iteration and abandons the function when the token was cancelled.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> CancellationToken {
        CancellationToken::default()
    }

    /// Raise the cancellation flag.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Return `Err(Error::Cancelled)` if the token was cancelled.
    pub fn poll(&self) -> Result<(), Error> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}
