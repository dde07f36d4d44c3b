//! Information and types for Kestrel's supported architectures.

use crate::il::MemoryLocation;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// An architecture's endianness.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum Endian {
    Big,
    Little,
}

/// Necessary functions for dataflow analysis over architectures.
pub trait Architecture: Debug + Send + Sync {
    /// Get the name of this architecture.
    fn name(&self) -> &str;
    /// Get the endianness of this architecture.
    fn endian(&self) -> Endian;
    /// Get the size of a natural word for this architecture in bits.
    fn word_size(&self) -> usize;
    /// Returns true if the given memory location belongs to global memory.
    ///
    /// Reads of global memory are not resolved through reaching
    /// definitions; their values may change behind the analysis' back.
    /// The default classifies nothing as global; architectures that know
    /// the image layout override this for their data sections.
    fn is_global_memory(&self, _memory_location: &MemoryLocation) -> bool {
        false
    }
    /// Clone into a boxed `Architecture`.
    fn box_clone(&self) -> Box<dyn Architecture>;
}

/// The 64-bit X86 Architecture.
#[derive(Clone, Debug, Eq, PartialEq, Default)]
pub struct Amd64 {}

impl Amd64 {
    pub fn new() -> Amd64 {
        Amd64 {}
    }
}

impl Architecture for Amd64 {
    fn name(&self) -> &str {
        "amd64"
    }
    fn endian(&self) -> Endian {
        Endian::Little
    }
    fn word_size(&self) -> usize {
        64
    }
    fn box_clone(&self) -> Box<dyn Architecture> {
        Box::new(self.clone())
    }
}

/// The 32-bit Mips Architecture.
#[derive(Clone, Debug, Eq, PartialEq, Default)]
pub struct Mips {}

impl Mips {
    pub fn new() -> Mips {
        Mips {}
    }
}

impl Architecture for Mips {
    fn name(&self) -> &str {
        "mips"
    }
    fn endian(&self) -> Endian {
        Endian::Big
    }
    fn word_size(&self) -> usize {
        32
    }
    fn box_clone(&self) -> Box<dyn Architecture> {
        Box::new(self.clone())
    }
}
