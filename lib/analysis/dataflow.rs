//! The `Dataflow` store holds everything the analysis computed.
//!
//! All maps are keyed by term index. The store grows monotonically while
//! the analyzer runs and is pruned once at the end, when terms whose
//! statements no longer belong to any basic block are dropped.

use crate::analysis::{ReachingDefinitions, Value};
use crate::il::{MemoryLocation, Term};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct Dataflow {
    term2value: FxHashMap<u64, Value>,
    term2location: FxHashMap<u64, MemoryLocation>,
    term2definitions: FxHashMap<u64, ReachingDefinitions>,
}

impl Dataflow {
    pub fn new() -> Dataflow {
        Dataflow::default()
    }

    /// The `Value` computed for a term, if any was.
    pub fn value(&self, term: &Term) -> Option<&Value> {
        self.term2value.get(&term.index())
    }

    /// The `Value` computed for the term with the given index.
    pub fn index_value(&self, term_index: u64) -> Option<&Value> {
        self.term2value.get(&term_index)
    }

    pub fn value_mut(&mut self, term: &Term) -> &mut Value {
        self.term2value.entry(term.index()).or_default()
    }

    /// The memory location resolved for a term. `None` both for terms
    /// that never name a location and for unresolved dereferences.
    pub fn memory_location(&self, term: &Term) -> Option<&MemoryLocation> {
        self.term2location.get(&term.index())
    }

    /// The memory location resolved for the term with the given index.
    pub fn index_memory_location(&self, term_index: u64) -> Option<&MemoryLocation> {
        self.term2location.get(&term_index)
    }

    pub fn set_memory_location(&mut self, term: &Term, location: Option<MemoryLocation>) {
        match location {
            Some(location) => {
                self.term2location.insert(term.index(), location);
            }
            None => {
                self.term2location.remove(&term.index());
            }
        }
    }

    /// The definitions reaching a term, if the term is a read that was
    /// resolved to a location at least once.
    pub fn definitions(&self, term: &Term) -> Option<&ReachingDefinitions> {
        self.term2definitions.get(&term.index())
    }

    pub fn definitions_mut(&mut self, term: &Term) -> &mut ReachingDefinitions {
        self.term2definitions.entry(term.index()).or_default()
    }

    /// True if the location recorded for the term with the given index
    /// covers `location`.
    pub fn location_covers(&self, term_index: u64, location: &MemoryLocation) -> bool {
        self.term2location
            .get(&term_index)
            .map(|term_location| term_location.covers(location))
            .unwrap_or(false)
    }

    /// Drop definition pairs whose defining term no longer covers the
    /// range it is recorded for. Term locations migrate while the
    /// analysis runs; this re-establishes the covering invariant.
    pub fn retain_covering_definitions(&mut self) {
        let term2location = &self.term2location;
        for definitions in self.term2definitions.values_mut() {
            definitions.filter_out(|location, term_index| {
                !term2location
                    .get(&term_index)
                    .map(|term_location| term_location.covers(location))
                    .unwrap_or(false)
            });
        }
    }

    /// Keep only facts about terms for which `live` returns true, both as
    /// keys and as defining terms inside stored definition sets.
    pub fn retain_terms<F>(&mut self, live: F)
    where
        F: Fn(u64) -> bool,
    {
        for definitions in self.term2definitions.values_mut() {
            definitions.filter_out(|_, term_index| !live(term_index));
        }
        self.term2value.retain(|term_index, _| live(*term_index));
        self.term2location.retain(|term_index, _| live(*term_index));
        self.term2definitions
            .retain(|term_index, _| live(*term_index));
    }

    /// Iterate over every (term index, value) pair.
    pub fn values(&self) -> impl Iterator<Item = (u64, &Value)> + '_ {
        self.term2value.iter().map(|(index, value)| (*index, value))
    }

    /// Iterate over every (term index, memory location) pair.
    pub fn memory_locations(&self) -> impl Iterator<Item = (u64, &MemoryLocation)> + '_ {
        self.term2location
            .iter()
            .map(|(index, location)| (*index, location))
    }

    /// Iterate over every (term index, reaching definitions) pair.
    pub fn all_definitions(&self) -> impl Iterator<Item = (u64, &ReachingDefinitions)> + '_ {
        self.term2definitions
            .iter()
            .map(|(index, definitions)| (*index, definitions))
    }
}
