//! `ReachingDefinitions` tracks which writes may still supply each bit
//! of a memory location.
//!
//! The set is kept as an ordered list of chunks, one per maximal
//! sub-range sharing the same set of defining terms. Chunks within one
//! set are disjoint, sorted by domain and address, their definition
//! lists sorted and deduplicated, and adjacent chunks with identical
//! definition sets coalesced, so two sets describing the same facts
//! compare equal. The fixpoint driver relies on that.

use crate::il::{MemoryDomain, MemoryLocation};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// One chunk: a memory range and the terms that may have written it.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ReachingDefinition {
    location: MemoryLocation,
    definitions: Vec<u64>,
}

impl ReachingDefinition {
    pub fn location(&self) -> &MemoryLocation {
        &self.location
    }

    /// Indices of the terms that may have last written this range.
    pub fn definitions(&self) -> &[u64] {
        &self.definitions
    }
}

#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct ReachingDefinitions {
    chunks: Vec<ReachingDefinition>,
}

impl ReachingDefinitions {
    pub fn new() -> ReachingDefinitions {
        ReachingDefinitions::default()
    }

    /// The chunks of this set, ordered by domain and address.
    pub fn chunks(&self) -> &[ReachingDefinition] {
        &self.chunks
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn clear(&mut self) {
        self.chunks.clear();
    }

    fn sort(&mut self) {
        self.chunks
            .sort_by_key(|chunk| (chunk.location.domain(), chunk.location.addr()));
    }

    // Coalesce adjacent chunks with identical definition sets. Assumes
    // the chunk list is sorted and disjoint.
    fn coalesce(&mut self) {
        let mut coalesced: Vec<ReachingDefinition> = Vec::with_capacity(self.chunks.len());
        for chunk in self.chunks.drain(..) {
            match coalesced.last_mut() {
                Some(last)
                    if last.location.domain() == chunk.location.domain()
                        && last.location.end_addr() == chunk.location.addr()
                        && last.definitions == chunk.definitions =>
                {
                    last.location = MemoryLocation::new(
                        last.location.domain(),
                        last.location.addr(),
                        last.location.size() + chunk.location.size(),
                    );
                }
                _ => coalesced.push(chunk),
            }
        }
        self.chunks = coalesced;
    }

    /// Record that `term` wrote the whole of `location`, superseding any
    /// previous definition of bits inside it. Definitions extending
    /// beyond `location` survive outside it, splitting their chunks.
    pub fn add_definition(&mut self, location: MemoryLocation, term: u64) {
        self.kill_definitions(&location);
        self.chunks.push(ReachingDefinition {
            location,
            definitions: vec![term],
        });
        self.sort();
        self.coalesce();
    }

    /// Forget every definition of bits inside `location`.
    pub fn kill_definitions(&mut self, location: &MemoryLocation) {
        let mut chunks: Vec<ReachingDefinition> = Vec::with_capacity(self.chunks.len());
        for chunk in self.chunks.drain(..) {
            if !chunk.location.overlaps(location) {
                chunks.push(chunk);
                continue;
            }
            if chunk.location.addr() < location.addr() {
                chunks.push(ReachingDefinition {
                    location: MemoryLocation::new(
                        chunk.location.domain(),
                        chunk.location.addr(),
                        (location.addr() - chunk.location.addr()) as usize,
                    ),
                    definitions: chunk.definitions.clone(),
                });
            }
            if chunk.location.end_addr() > location.end_addr() {
                chunks.push(ReachingDefinition {
                    location: MemoryLocation::new(
                        chunk.location.domain(),
                        location.end_addr(),
                        (chunk.location.end_addr() - location.end_addr()) as usize,
                    ),
                    definitions: chunk.definitions,
                });
            }
        }
        self.chunks = chunks;
        self.sort();
    }

    /// Union with another set. Where ranges overlap, the defining terms
    /// of both sides coexist; chunk boundaries are recomputed so each
    /// maximal sub-range again has a single definition set.
    pub fn merge(&mut self, other: &ReachingDefinitions) {
        if other.chunks.is_empty() {
            return;
        }

        let domains: BTreeSet<MemoryDomain> = self
            .chunks
            .iter()
            .chain(other.chunks.iter())
            .map(|chunk| chunk.location.domain())
            .collect();

        let mut merged: Vec<ReachingDefinition> = Vec::new();
        for domain in domains {
            let chunks: Vec<&ReachingDefinition> = self
                .chunks
                .iter()
                .chain(other.chunks.iter())
                .filter(|chunk| chunk.location.domain() == domain)
                .collect();

            let mut boundaries: BTreeSet<i64> = BTreeSet::new();
            for chunk in &chunks {
                boundaries.insert(chunk.location.addr());
                boundaries.insert(chunk.location.end_addr());
            }

            let boundaries: Vec<i64> = boundaries.into_iter().collect();
            for window in boundaries.windows(2) {
                let (addr, end) = (window[0], window[1]);
                let mut definitions: Vec<u64> = chunks
                    .iter()
                    .filter(|chunk| {
                        chunk.location.addr() <= addr && end <= chunk.location.end_addr()
                    })
                    .flat_map(|chunk| chunk.definitions.iter().cloned())
                    .collect();
                if definitions.is_empty() {
                    continue;
                }
                definitions.sort_unstable();
                definitions.dedup();
                merged.push(ReachingDefinition {
                    location: MemoryLocation::new(domain, addr, (end - addr) as usize),
                    definitions,
                });
            }
        }

        self.chunks = merged;
        self.coalesce();
    }

    /// Drop every (location, term) pair for which `pred` returns true.
    pub fn filter_out<F>(&mut self, mut pred: F)
    where
        F: FnMut(&MemoryLocation, u64) -> bool,
    {
        for chunk in &mut self.chunks {
            let location = chunk.location.clone();
            chunk.definitions.retain(|term| !pred(&location, *term));
        }
        self.chunks.retain(|chunk| !chunk.definitions.is_empty());
        self.coalesce();
    }

    /// Extract into `out` exactly the chunks lying within `location`,
    /// clipped to it.
    pub fn project(&self, location: &MemoryLocation, out: &mut ReachingDefinitions) {
        out.clear();
        for chunk in &self.chunks {
            if let Some(intersection) = chunk.location.intersect(location) {
                out.chunks.push(ReachingDefinition {
                    location: intersection,
                    definitions: chunk.definitions.clone(),
                });
            }
        }
        out.coalesce();
    }
}

impl fmt::Display for ReachingDefinitions {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for (i, chunk) in self.chunks.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{} <- {:?}", chunk.location, chunk.definitions)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mem(addr: i64, size: usize) -> MemoryLocation {
        MemoryLocation::new(MemoryDomain::Memory, addr, size)
    }

    #[test]
    fn add_kills_covered_definitions() {
        let mut definitions = ReachingDefinitions::new();
        definitions.add_definition(mem(0, 32), 1);
        definitions.add_definition(mem(0, 32), 2);

        assert_eq!(definitions.chunks().len(), 1);
        assert_eq!(definitions.chunks()[0].definitions(), &[2]);
    }

    #[test]
    fn partial_overlap_splits() {
        let mut definitions = ReachingDefinitions::new();
        definitions.add_definition(mem(0, 32), 1);
        definitions.add_definition(mem(16, 32), 2);

        let chunks = definitions.chunks();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].location(), &mem(0, 16));
        assert_eq!(chunks[0].definitions(), &[1]);
        assert_eq!(chunks[1].location(), &mem(16, 32));
        assert_eq!(chunks[1].definitions(), &[2]);
    }

    #[test]
    fn narrow_write_splits_wide_definition() {
        let mut definitions = ReachingDefinitions::new();
        definitions.add_definition(mem(0, 32), 1);
        definitions.add_definition(mem(8, 8), 2);

        let chunks = definitions.chunks();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].location(), &mem(0, 8));
        assert_eq!(chunks[1].location(), &mem(8, 8));
        assert_eq!(chunks[1].definitions(), &[2]);
        assert_eq!(chunks[2].location(), &mem(16, 16));
        assert_eq!(chunks[2].definitions(), &[1]);
    }

    #[test]
    fn merge_unions_overlapping_ranges() {
        let mut a = ReachingDefinitions::new();
        a.add_definition(mem(0, 32), 1);
        let mut b = ReachingDefinitions::new();
        b.add_definition(mem(16, 32), 2);

        a.merge(&b);

        let chunks = a.chunks();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].location(), &mem(0, 16));
        assert_eq!(chunks[0].definitions(), &[1]);
        assert_eq!(chunks[1].location(), &mem(16, 16));
        assert_eq!(chunks[1].definitions(), &[1, 2]);
        assert_eq!(chunks[2].location(), &mem(32, 16));
        assert_eq!(chunks[2].definitions(), &[2]);
    }

    #[test]
    fn merge_is_idempotent() {
        let mut a = ReachingDefinitions::new();
        a.add_definition(mem(0, 32), 1);
        a.add_definition(mem(48, 16), 2);
        let snapshot = a.clone();

        a.merge(&snapshot);
        assert_eq!(a, snapshot);
    }

    #[test]
    fn kill_definitions_removes_subranges() {
        let mut definitions = ReachingDefinitions::new();
        definitions.add_definition(mem(0, 32), 1);
        definitions.kill_definitions(&mem(0, 16));

        let chunks = definitions.chunks();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].location(), &mem(16, 16));
    }

    #[test]
    fn project_clips_chunks() {
        let mut definitions = ReachingDefinitions::new();
        definitions.add_definition(mem(0, 32), 1);
        definitions.add_definition(mem(32, 32), 2);

        let mut out = ReachingDefinitions::new();
        definitions.project(&mem(16, 32), &mut out);

        let chunks = out.chunks();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].location(), &mem(16, 16));
        assert_eq!(chunks[0].definitions(), &[1]);
        assert_eq!(chunks[1].location(), &mem(32, 16));
        assert_eq!(chunks[1].definitions(), &[2]);
    }

    #[test]
    fn filter_out_drops_pairs_and_empty_chunks() {
        let mut definitions = ReachingDefinitions::new();
        definitions.add_definition(mem(0, 16), 1);
        definitions.add_definition(mem(16, 16), 2);

        definitions.filter_out(|_, term| term == 2);

        let chunks = definitions.chunks();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].definitions(), &[1]);
    }

    #[test]
    fn domains_do_not_interfere() {
        let mut definitions = ReachingDefinitions::new();
        definitions.add_definition(mem(0, 32), 1);
        definitions.add_definition(MemoryLocation::new(MemoryDomain::Stack, 0, 32), 2);

        assert_eq!(definitions.chunks().len(), 2);
        definitions.kill_definitions(&mem(0, 32));
        assert_eq!(definitions.chunks().len(), 1);
        assert_eq!(
            definitions.chunks()[0].location().domain(),
            MemoryDomain::Stack
        );
    }
}
