//! Fluent builder for flow graphs
//!
//! Provides a fluent API for constructing graphs programmatically, mostly
//! for tests and fixtures.

use serde_json::json;

use crate::types::{FlowEdge, FlowGraph, FlowNode, NodeType, Position};

/// Fluent builder for constructing flow graphs
///
/// # Example
///
/// ```ignore
/// let graph = FlowBuilder::new()
///     .add_node("start", NodeType::Condition, (0.0, 0.0))
///     .with_data(serde_json::json!({"isStartingPoint": true, "returnText": "emailProcessing"}))
///     .add_node("call", NodeType::Api, (200.0, 0.0))
///     .add_execution_edge("start", "call")
///     .build();
/// ```
#[derive(Debug, Default)]
pub struct FlowBuilder {
    nodes: Vec<FlowNode>,
    edges: Vec<FlowEdge>,
    edge_counter: usize,
}

impl FlowBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node with an empty data object
    pub fn add_node(
        mut self,
        id: impl Into<String>,
        node_type: impl Into<NodeType>,
        position: (f64, f64),
    ) -> Self {
        self.nodes.push(FlowNode::new(
            id,
            node_type,
            Position::new(position.0, position.1),
        ));
        self
    }

    /// Set data on the most recently added node
    ///
    /// Must be called immediately after `add_node`.
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        if let Some(node) = self.nodes.last_mut() {
            node.data = data;
        }
        self
    }

    /// Add a collapsed sub-flow node standing in for `interior`
    pub fn add_sub_flow(
        mut self,
        id: impl Into<String>,
        position: (f64, f64),
        interior: FlowGraph,
        path: &[&str],
    ) -> Self {
        let node = FlowNode::new(id, NodeType::SubFlow, Position::new(position.0, position.1))
            .with_data(json!({
                "isCollapsed": true,
                "originals": { "nodes": interior.nodes, "edges": interior.edges },
                "originalPath": path,
            }));
        self.nodes.push(node);
        self
    }

    /// Add an execution edge (auto-generates edge ID)
    pub fn add_execution_edge(mut self, source: impl Into<String>, target: impl Into<String>) -> Self {
        let id = self.next_edge_id();
        self.edges.push(FlowEdge::execution(id, source, target));
        self
    }

    /// Add an execution edge with an explicit ID
    pub fn add_execution_edge_with_id(
        mut self,
        edge_id: impl Into<String>,
        source: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        self.edges.push(FlowEdge::execution(edge_id, source, target));
        self
    }

    /// Add a data edge between two ports (auto-generates edge ID)
    pub fn add_data_edge(
        mut self,
        source: impl Into<String>,
        source_handle: impl Into<String>,
        target: impl Into<String>,
        target_handle: impl Into<String>,
    ) -> Self {
        let id = self.next_edge_id();
        self.edges
            .push(FlowEdge::data(id, source, source_handle, target, target_handle));
        self
    }

    /// Build the graph without validation
    pub fn build(self) -> FlowGraph {
        FlowGraph::new(self.nodes, self.edges)
    }

    fn next_edge_id(&mut self) -> String {
        self.edge_counter += 1;
        format!("edge-{}", self.edge_counter)
    }
}
