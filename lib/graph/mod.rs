//! Implements a directed graph.
//!
//! Kestrel keeps control-flow graphs in this structure. Vertices and edges
//! are stored in `BTreeMap`s so that iteration order, and therefore the
//! traversal order of the dataflow fixpoint, is deterministic.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::Error;

pub trait Vertex: Clone {
    // The index of this vertex.
    fn index(&self) -> usize;
    // A string to display in dot graphviz format.
    fn dot_label(&self) -> String;
    // Fill color in dot graphviz format.
    fn dot_fill_color(&self) -> String {
        "#ffddcc".to_string()
    }
    // Font color in dot graphviz format.
    fn dot_font_color(&self) -> String {
        "#000000".to_string()
    }
}

pub trait Edge: Clone {
    /// The index of the head vertex.
    fn head(&self) -> usize;
    /// The index of the tail vertex.
    fn tail(&self) -> usize;
    /// A string to display in dot graphviz format.
    fn dot_label(&self) -> String;
    // Style in dot graphviz format.
    fn dot_style(&self) -> String {
        "solid".to_string()
    }
}

/// A directed graph.
///
/// Edges are keyed by `(head, tail)`, so at most one edge connects a
/// given pair of vertices in a given direction. Adjacency sets are kept
/// alongside the edge map and updated on every mutation.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize, Default)]
pub struct Graph<V: Vertex, E: Edge> {
    vertices: BTreeMap<usize, V>,
    edges: BTreeMap<(usize, usize), E>,
    successors: BTreeMap<usize, BTreeSet<usize>>,
    predecessors: BTreeMap<usize, BTreeSet<usize>>,
}

impl<V, E> Graph<V, E>
where
    V: Vertex,
    E: Edge,
{
    pub fn new() -> Graph<V, E> {
        Graph {
            vertices: BTreeMap::new(),
            edges: BTreeMap::new(),
            successors: BTreeMap::new(),
            predecessors: BTreeMap::new(),
        }
    }

    pub fn num_vertices(&self) -> usize {
        self.vertices.len()
    }

    /// Returns true if the vertex with the given index exists in this graph
    pub fn has_vertex(&self, index: usize) -> bool {
        self.vertices.contains_key(&index)
    }

    /// Returns true if the edge with the given head and tail index exists in this graph
    pub fn has_edge(&self, head: usize, tail: usize) -> bool {
        self.edges.contains_key(&(head, tail))
    }

    /// Inserts a vertex into the graph.
    /// # Errors
    /// Error if a vertex with the same index already exists.
    pub fn insert_vertex(&mut self, vertex: V) -> Result<(), Error> {
        let index = vertex.index();
        if self.has_vertex(index) {
            return Err("duplicate vertex index".into());
        }
        self.vertices.insert(index, vertex);
        self.successors.entry(index).or_default();
        self.predecessors.entry(index).or_default();
        Ok(())
    }

    /// Inserts an edge into the graph.
    /// # Errors
    /// Error if either endpoint is missing, or the edge already exists.
    pub fn insert_edge(&mut self, edge: E) -> Result<(), Error> {
        let head = edge.head();
        let tail = edge.tail();
        if !self.has_vertex(head) {
            return Err(Error::GraphVertexNotFound(head));
        }
        if !self.has_vertex(tail) {
            return Err(Error::GraphVertexNotFound(tail));
        }
        if self.has_edge(head, tail) {
            return Err("duplicate edge".into());
        }
        self.edges.insert((head, tail), edge);
        self.successors.entry(head).or_default().insert(tail);
        self.predecessors.entry(tail).or_default().insert(head);
        Ok(())
    }

    /// Removes a vertex, and all edges associated with that vertex.
    pub fn remove_vertex(&mut self, index: usize) -> Result<(), Error> {
        if self.vertices.remove(&index).is_none() {
            return Err(Error::GraphVertexNotFound(index));
        }

        let stale: Vec<(usize, usize)> = self
            .edges
            .keys()
            .filter(|(head, tail)| *head == index || *tail == index)
            .copied()
            .collect();
        for (head, tail) in stale {
            self.remove_edge(head, tail)?;
        }

        self.successors.remove(&index);
        self.predecessors.remove(&index);

        Ok(())
    }

    /// Removes an edge
    pub fn remove_edge(&mut self, head: usize, tail: usize) -> Result<(), Error> {
        self.edges
            .remove(&(head, tail))
            .ok_or(Error::GraphEdgeNotFound(head, tail))?;
        if let Some(successors) = self.successors.get_mut(&head) {
            successors.remove(&tail);
        }
        if let Some(predecessors) = self.predecessors.get_mut(&tail) {
            predecessors.remove(&head);
        }
        Ok(())
    }

    /// Returns the indices of all immediate successors of a vertex from the graph.
    pub fn successor_indices(&self, index: usize) -> Result<Vec<usize>, Error> {
        self.successors
            .get(&index)
            .map(|successors| successors.iter().copied().collect())
            .ok_or(Error::GraphVertexNotFound(index))
    }

    /// Returns the indices of all immediate predecessors of a vertex from the graph.
    pub fn predecessor_indices(&self, index: usize) -> Result<Vec<usize>, Error> {
        self.predecessors
            .get(&index)
            .map(|predecessors| predecessors.iter().copied().collect())
            .ok_or(Error::GraphVertexNotFound(index))
    }

    /// Returns all immediate successors of a vertex from the graph.
    pub fn successors(&self, index: usize) -> Result<Vec<&V>, Error> {
        Ok(self
            .successor_indices(index)?
            .into_iter()
            .filter_map(|successor| self.vertices.get(&successor))
            .collect())
    }

    /// Returns all immediate predecessors of a vertex from the graph.
    pub fn predecessors(&self, index: usize) -> Result<Vec<&V>, Error> {
        Ok(self
            .predecessor_indices(index)?
            .into_iter()
            .filter_map(|predecessor| self.vertices.get(&predecessor))
            .collect())
    }

    /// Returns all vertices in the graph.
    pub fn vertices(&self) -> Vec<&V> {
        self.vertices.values().collect()
    }

    pub fn vertices_mut(&mut self) -> Vec<&mut V> {
        self.vertices.values_mut().collect()
    }

    /// Fetches a vertex from the graph by index.
    pub fn vertex(&self, index: usize) -> Result<&V, Error> {
        self.vertices
            .get(&index)
            .ok_or(Error::GraphVertexNotFound(index))
    }

    // Fetches a mutable instance of a vertex.
    pub fn vertex_mut(&mut self, index: usize) -> Result<&mut V, Error> {
        self.vertices
            .get_mut(&index)
            .ok_or(Error::GraphVertexNotFound(index))
    }

    pub fn edge(&self, head: usize, tail: usize) -> Result<&E, Error> {
        self.edges
            .get(&(head, tail))
            .ok_or(Error::GraphEdgeNotFound(head, tail))
    }

    pub fn edge_mut(&mut self, head: usize, tail: usize) -> Result<&mut E, Error> {
        self.edges
            .get_mut(&(head, tail))
            .ok_or(Error::GraphEdgeNotFound(head, tail))
    }

    /// Get a reference to every `Edge` in the `Graph`.
    pub fn edges(&self) -> Vec<&E> {
        self.edges.values().collect()
    }

    /// Return all edges out for a vertex
    pub fn edges_out(&self, index: usize) -> Result<Vec<&E>, Error> {
        if !self.has_vertex(index) {
            return Err(Error::GraphVertexNotFound(index));
        }
        Ok(self
            .edges
            .range((index, usize::MIN)..=(index, usize::MAX))
            .map(|(_, edge)| edge)
            .collect())
    }

    /// Return all edges in for a vertex
    pub fn edges_in(&self, index: usize) -> Result<Vec<&E>, Error> {
        self.predecessor_indices(index)?
            .into_iter()
            .map(|predecessor| self.edge(predecessor, index))
            .collect()
    }

    /// Returns a string in the graphviz format
    pub fn dot_graph(&self) -> String {
        let mut dot = String::from("digraph G {\n");
        dot.push_str("  graph [fontname=\"Courier New\", splines=\"polyline\"];\n");
        dot.push_str("  node [fontname=\"Courier New\", shape=\"box\"];\n");
        dot.push_str("  edge [fontname=\"Courier New\"];\n");

        for vertex in self.vertices.values() {
            dot.push_str(&format!(
                "  {} [label=\"{}\", style=\"filled\", fillcolor=\"{}\", fontcolor=\"{}\"];\n",
                vertex.index(),
                vertex.dot_label().replace('\n', "\\l"),
                vertex.dot_fill_color(),
                vertex.dot_font_color(),
            ));
        }

        for edge in self.edges.values() {
            dot.push_str(&format!(
                "  {} -> {} [label=\"{}\", style=\"{}\"];\n",
                edge.head(),
                edge.tail(),
                edge.dot_label().replace('\n', "\\l"),
                edge.dot_style(),
            ));
        }

        dot.push('}');
        dot
    }
}

impl<V: Vertex + fmt::Debug, E: Edge> fmt::Display for Graph<V, E> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for vertex in self.vertices() {
            writeln!(f, "{:?}", vertex)?;
        }
        for edge in self.edges() {
            writeln!(f, "{}", edge.dot_label())?;
        }
        Ok(())
    }
}
