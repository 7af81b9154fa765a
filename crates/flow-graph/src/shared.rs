//! Shared handle to the committed graph
//!
//! Bindings and the editing session never hold a copy of the node array.
//! They hold a `SharedGraph` and read the current arrays at call time, so a
//! binding built before a later edit still sees that edit.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::types::{FlowEdge, FlowGraph, FlowNode};

/// Cloneable, shared reference to the authoritative node and edge arrays
#[derive(Debug, Clone, Default)]
pub struct SharedGraph {
    inner: Arc<RwLock<FlowGraph>>,
}

impl SharedGraph {
    /// Wrap a graph
    pub fn new(graph: FlowGraph) -> Self {
        Self {
            inner: Arc::new(RwLock::new(graph)),
        }
    }

    /// Clone the current graph
    pub fn snapshot(&self) -> FlowGraph {
        self.inner.read().clone()
    }

    /// Clone the current node array
    pub fn nodes(&self) -> Vec<FlowNode> {
        self.inner.read().nodes.clone()
    }

    /// Clone the current edge array
    pub fn edges(&self) -> Vec<FlowEdge> {
        self.inner.read().edges.clone()
    }

    /// Run a read-only closure against the current graph
    pub fn read<R>(&self, f: impl FnOnce(&FlowGraph) -> R) -> R {
        f(&self.inner.read())
    }

    /// Commit a new node array
    pub fn replace_nodes(&self, nodes: Vec<FlowNode>) {
        self.inner.write().nodes = nodes;
    }

    /// Commit a new edge array
    pub fn replace_edges(&self, edges: Vec<FlowEdge>) {
        self.inner.write().edges = edges;
    }

    /// Commit nodes and edges under a single write
    pub fn replace(&self, nodes: Vec<FlowNode>, edges: Vec<FlowEdge>) {
        let mut graph = self.inner.write();
        graph.nodes = nodes;
        graph.edges = edges;
    }

    /// Derive and commit a new node array from the current one
    ///
    /// `f` sees the nodes as committed at call time and returns the
    /// replacement, or `None` to leave the graph untouched. The write lock is
    /// released before this returns, so the caller can notify listeners that
    /// read the graph again.
    pub fn update_nodes(
        &self,
        f: impl FnOnce(&[FlowNode]) -> Option<Vec<FlowNode>>,
    ) -> Option<Vec<FlowNode>> {
        let mut graph = self.inner.write();
        let nodes = f(&graph.nodes)?;
        graph.nodes = nodes.clone();
        Some(nodes)
    }

    /// Derive and commit a new graph from the current one
    pub fn update(&self, f: impl FnOnce(&FlowGraph) -> Option<FlowGraph>) -> Option<FlowGraph> {
        let mut graph = self.inner.write();
        let next = f(&graph)?;
        *graph = next.clone();
        Some(next)
    }

    /// Whether two handles point at the same cell
    pub fn ptr_eq(&self, other: &SharedGraph) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}
