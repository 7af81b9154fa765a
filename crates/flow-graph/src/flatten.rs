//! Sub-flow flattening
//!
//! A collapsed sub-flow node stands in for an interior subgraph stored in
//! its `data.originals`. Flattening replaces every such node with its
//! interior and rewires the boundary edges:
//!
//! - edges that entered the sub-flow now enter `originalPath[0]` through the
//!   `"execution"` handle
//! - edges that left the sub-flow now leave `originalPath[last]` through the
//!   `"execution"` handle
//!
//! The rewrite runs as a worklist over the node set, one sub-flow per pass,
//! until no expandable sub-flow remains. Nested sub-flows surface in the
//! node set after their parent expands and are handled by a later pass, so
//! nesting depth costs passes rather than stack frames.

use std::collections::HashMap;

use crate::config::defaults;
use crate::error::{FlowGraphError, Result};
use crate::types::{
    FlowEdge, FlowGraph, FlowNode, NodeId, SubFlowData, SubFlowOriginals, EXECUTION_HANDLE,
};

/// Interior subgraphs supplied from outside the nodes, keyed by node id
///
/// An entry here takes precedence over the node's own `originals`.
pub type ExternalOriginals = HashMap<NodeId, SubFlowOriginals>;

/// Result of a flatten run
#[derive(Debug, Clone, PartialEq)]
pub struct FlattenOutcome {
    /// The flattened graph
    pub graph: FlowGraph,
    /// Number of rewrite passes that expanded a sub-flow
    pub passes: usize,
    /// Sub-flow node ids in the order they were expanded
    pub expanded: Vec<NodeId>,
}

/// Rewrites collapsed sub-flow nodes into their interior subgraphs
#[derive(Debug, Clone)]
pub struct SubFlowFlattener<'a> {
    external: Option<&'a ExternalOriginals>,
    max_passes: usize,
}

impl Default for SubFlowFlattener<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> SubFlowFlattener<'a> {
    /// Create a flattener that reads interiors from the nodes themselves
    pub fn new() -> Self {
        Self {
            external: None,
            max_passes: defaults::MAX_FLATTEN_PASSES,
        }
    }

    /// Prefer interiors from an external source
    pub fn with_external(mut self, external: &'a ExternalOriginals) -> Self {
        self.external = Some(external);
        self
    }

    /// Bound the number of passes; a sub-flow whose interior contains
    /// itself would otherwise never converge
    pub fn with_max_passes(mut self, max_passes: usize) -> Self {
        self.max_passes = max_passes.max(1);
        self
    }

    /// Flatten a graph
    ///
    /// The input is left untouched. Sub-flows that are expanded
    /// (`isCollapsed == false`) or have no interior are kept as-is.
    pub fn flatten(&self, graph: &FlowGraph) -> Result<FlattenOutcome> {
        let mut nodes = graph.nodes.clone();
        let mut edges = graph.edges.clone();
        let mut expanded = Vec::new();

        while let Some((index, originals, path)) = self.next_candidate(&nodes) {
            if expanded.len() >= self.max_passes {
                return Err(FlowGraphError::FlattenLimitExceeded {
                    passes: expanded.len(),
                });
            }

            let sub_flow = nodes.remove(index);
            expand_one(&sub_flow.id, &originals, &path, &mut nodes, &mut edges);
            expanded.push(sub_flow.id);
        }

        if !expanded.is_empty() {
            log::debug!("Flattened {} sub-flow(s): {:?}", expanded.len(), expanded);
        }

        Ok(FlattenOutcome {
            graph: FlowGraph::new(nodes, edges),
            passes: expanded.len(),
            expanded,
        })
    }

    /// First collapsed sub-flow with an interior: (index, interior, path)
    ///
    /// Only the chosen node's interior is parsed.
    fn next_candidate(&self, nodes: &[FlowNode]) -> Option<(usize, SubFlowOriginals, Vec<NodeId>)> {
        nodes.iter().enumerate().find_map(|(index, node)| {
            if !node.is_collapsed_sub_flow() {
                return None;
            }

            let originals = match self.external.and_then(|ext| ext.get(&node.id)) {
                Some(external) => Some(external.clone()),
                None => SubFlowData::read_originals(&node.id, &node.data),
            };

            match originals {
                Some(originals) => Some((index, originals, SubFlowData::read_path(&node.data))),
                None => {
                    log::debug!("Sub-flow '{}' has no interior; leaving it in place", node.id);
                    None
                }
            }
        })
    }
}

/// Flatten with the node-embedded interiors and default limits
pub fn flatten(graph: &FlowGraph) -> Result<FlattenOutcome> {
    SubFlowFlattener::new().flatten(graph)
}

/// Splice one sub-flow's interior into the node and edge lists
///
/// `sub_flow_id` must already be removed from `nodes`.
fn expand_one(
    sub_flow_id: &str,
    originals: &SubFlowOriginals,
    path: &[NodeId],
    nodes: &mut Vec<FlowNode>,
    edges: &mut Vec<FlowEdge>,
) {
    // Boundary edges are captured before anything touching the sub-flow goes
    let mut incoming = Vec::new();
    let mut outgoing = Vec::new();
    let mut loops = Vec::new();
    for edge in edges.iter().filter(|e| e.touches(sub_flow_id)) {
        match (edge.source == sub_flow_id, edge.target == sub_flow_id) {
            (true, true) => loops.push(edge.clone()),
            (false, true) => incoming.push(edge.clone()),
            _ => outgoing.push(edge.clone()),
        }
    }
    edges.retain(|e| !e.touches(sub_flow_id));

    nodes.extend(originals.nodes.iter().cloned());
    edges.extend(originals.edges.iter().cloned());

    match originals.entry_id(path) {
        Some(entry_id) => {
            for edge in &incoming {
                if !edge.is_execution_link() {
                    log::debug!("Rewiring data edge '{}' into sub-flow entry '{}'", edge.id, entry_id);
                }
                edges.push(FlowEdge {
                    id: format!("{}-{}-in", edge.id, sub_flow_id),
                    target: entry_id.to_string(),
                    target_handle: EXECUTION_HANDLE.to_string(),
                    ..edge.clone()
                });
            }
        }
        None if !incoming.is_empty() => {
            log::warn!(
                "Sub-flow '{}' has an empty interior; dropping {} incoming edge(s)",
                sub_flow_id,
                incoming.len()
            );
        }
        None => {}
    }

    match originals.exit_id(path) {
        Some(exit_id) => {
            for edge in &outgoing {
                if !edge.is_execution_link() {
                    log::debug!("Rewiring data edge '{}' out of sub-flow exit '{}'", edge.id, exit_id);
                }
                edges.push(FlowEdge {
                    id: format!("{}-{}-out", edge.id, sub_flow_id),
                    source: exit_id.to_string(),
                    source_handle: EXECUTION_HANDLE.to_string(),
                    ..edge.clone()
                });
            }
        }
        None if !outgoing.is_empty() => {
            log::warn!(
                "Sub-flow '{}' has an empty interior; dropping {} outgoing edge(s)",
                sub_flow_id,
                outgoing.len()
            );
        }
        None => {}
    }

    // A sub-flow feeding itself becomes exit -> entry
    match (originals.entry_id(path), originals.exit_id(path)) {
        (Some(entry_id), Some(exit_id)) => {
            for edge in &loops {
                edges.push(FlowEdge {
                    id: format!("{}-{}-loop", edge.id, sub_flow_id),
                    source: exit_id.to_string(),
                    source_handle: EXECUTION_HANDLE.to_string(),
                    target: entry_id.to_string(),
                    target_handle: EXECUTION_HANDLE.to_string(),
                    ..edge.clone()
                });
            }
        }
        _ if !loops.is_empty() => {
            log::warn!(
                "Sub-flow '{}' has an empty interior; dropping {} self-loop edge(s)",
                sub_flow_id,
                loops.len()
            );
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{NodeType, Position};
    use serde_json::json;

    fn node(id: &str, node_type: NodeType) -> FlowNode {
        FlowNode::new(id, node_type, Position::default())
    }

    fn sub_flow(id: &str, interior: Vec<FlowNode>, edges: Vec<FlowEdge>, path: &[&str]) -> FlowNode {
        node(id, NodeType::SubFlow).with_data(json!({
            "isCollapsed": true,
            "originals": {"nodes": interior, "edges": edges},
            "originalPath": path,
        }))
    }

    #[test]
    fn test_flat_graph_unchanged() {
        let graph = FlowGraph::new(
            vec![node("a", NodeType::Condition), node("b", NodeType::End)],
            vec![FlowEdge::execution("e1", "a", "b")],
        );
        let outcome = flatten(&graph).unwrap();
        assert_eq!(outcome.graph, graph);
        assert_eq!(outcome.passes, 0);
    }

    #[test]
    fn test_expand_rewires_boundary() {
        let graph = FlowGraph::new(
            vec![
                node("P", NodeType::Condition),
                sub_flow(
                    "SF",
                    vec![node("X", NodeType::Api), node("Y", NodeType::SendingMail)],
                    vec![FlowEdge::execution("e-xy", "X", "Y")],
                    &["X", "Y"],
                ),
                node("Q", NodeType::End),
            ],
            vec![
                FlowEdge::execution("e-p", "P", "SF"),
                FlowEdge::execution("e-q", "SF", "Q"),
            ],
        );

        let outcome = flatten(&graph).unwrap();
        let flat = outcome.graph;
        let ids: Vec<&str> = flat.nodes.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["P", "Q", "X", "Y"]);
        assert!(flat.edges.iter().all(|e| !e.touches("SF")));

        let into = flat.find_edge("e-p-SF-in").unwrap();
        assert_eq!((into.source.as_str(), into.target.as_str()), ("P", "X"));
        assert_eq!(into.target_handle, EXECUTION_HANDLE);

        let out = flat.find_edge("e-q-SF-out").unwrap();
        assert_eq!((out.source.as_str(), out.target.as_str()), ("Y", "Q"));
        assert_eq!(out.source_handle, EXECUTION_HANDLE);

        assert!(flat.find_edge("e-xy").is_some());
        assert_eq!(outcome.expanded, vec!["SF"]);
    }

    #[test]
    fn test_path_falls_back_to_interior_order() {
        let graph = FlowGraph::new(
            vec![
                node("P", NodeType::Condition),
                sub_flow("SF", vec![node("X", NodeType::Api), node("Y", NodeType::Api)], vec![], &[]),
            ],
            vec![FlowEdge::execution("e", "P", "SF")],
        );
        let flat = flatten(&graph).unwrap().graph;
        assert_eq!(flat.find_edge("e-SF-in").unwrap().target, "X");
    }

    #[test]
    fn test_expanded_and_inert_sub_flows_are_kept() {
        let expanded = sub_flow("open", vec![node("X", NodeType::Api)], vec![], &["X"])
            .with_merged_attr("isCollapsed", json!(false));
        let inert = node("empty", NodeType::SubFlow);
        let graph = FlowGraph::new(vec![expanded, inert], vec![]);

        let outcome = flatten(&graph).unwrap();
        assert_eq!(outcome.graph, graph);
        assert_eq!(outcome.passes, 0);
    }

    #[test]
    fn test_external_originals_take_precedence() {
        let graph = FlowGraph::new(
            vec![sub_flow("SF", vec![node("X", NodeType::Api)], vec![], &["X"])],
            vec![],
        );
        let mut external = ExternalOriginals::new();
        external.insert(
            "SF".to_string(),
            SubFlowOriginals {
                nodes: vec![node("Z", NodeType::Api)],
                edges: vec![],
            },
        );

        let flat = SubFlowFlattener::new()
            .with_external(&external)
            .flatten(&graph)
            .unwrap()
            .graph;
        assert_eq!(flat.nodes.len(), 1);
        assert_eq!(flat.nodes[0].id, "Z");
    }

    #[test]
    fn test_self_containing_sub_flow_hits_limit() {
        // The external interior of SF contains SF again
        let graph = FlowGraph::new(vec![node("SF", NodeType::SubFlow)], vec![]);
        let mut external = ExternalOriginals::new();
        external.insert(
            "SF".to_string(),
            SubFlowOriginals {
                nodes: vec![node("SF", NodeType::SubFlow)],
                edges: vec![],
            },
        );

        let err = SubFlowFlattener::new()
            .with_external(&external)
            .with_max_passes(4)
            .flatten(&graph)
            .unwrap_err();
        assert!(matches!(err, FlowGraphError::FlattenLimitExceeded { passes: 4 }));
    }

    #[test]
    fn test_self_loop_rewired_exit_to_entry() {
        let graph = FlowGraph::new(
            vec![
                node("P", NodeType::Condition),
                sub_flow(
                    "SF",
                    vec![node("X", NodeType::Api), node("Y", NodeType::Api)],
                    vec![FlowEdge::execution("e-xy", "X", "Y")],
                    &["X", "Y"],
                ),
            ],
            vec![
                FlowEdge::execution("e-p", "P", "SF"),
                FlowEdge::execution("retry", "SF", "SF"),
            ],
        );

        let flat = flatten(&graph).unwrap().graph;
        let ids = flat.node_ids();
        assert!(flat
            .edges
            .iter()
            .all(|e| ids.contains(e.source.as_str()) && ids.contains(e.target.as_str())));

        let looped = flat.find_edge("retry-SF-loop").unwrap();
        assert_eq!((looped.source.as_str(), looped.target.as_str()), ("Y", "X"));
        assert_eq!(flat.edges.len(), 3);
    }

    #[test]
    fn test_only_chosen_interior_matters() {
        // Expanded sub-flows with broken interiors are never parsed or expanded
        let broken = node("open", NodeType::SubFlow)
            .with_data(json!({"isCollapsed": false, "originals": {"nodes": [{"id": 1}]}}));
        let graph = FlowGraph::new(
            vec![
                broken.clone(),
                sub_flow("SF", vec![node("X", NodeType::Api)], vec![], &["X"]),
            ],
            vec![],
        );

        assert!(!broken.is_collapsed_sub_flow());
        let outcome = flatten(&graph).unwrap();
        assert_eq!(outcome.expanded, vec!["SF"]);
        let ids: Vec<&str> = outcome.graph.nodes.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["open", "X"]);
        assert_eq!(outcome.graph.nodes[0], broken);
    }

    #[test]
    fn test_multiple_boundary_edges_share_entry() {
        let graph = FlowGraph::new(
            vec![
                node("A", NodeType::Condition),
                node("B", NodeType::Condition),
                sub_flow("SF", vec![node("X", NodeType::Api), node("Y", NodeType::Api)], vec![], &["X", "Y"]),
            ],
            vec![
                FlowEdge::execution("a", "A", "SF"),
                FlowEdge::data("b", "B", "attr-out", "SF", "attr-in"),
            ],
        );

        let flat = flatten(&graph).unwrap().graph;
        let into_x: Vec<&FlowEdge> = flat.incoming_edges("X").collect();
        assert_eq!(into_x.len(), 2);
        assert!(into_x.iter().all(|e| e.target_handle == EXECUTION_HANDLE));
        // The data edge keeps its source handle and flags
        let data = flat.find_edge("b-SF-in").unwrap();
        assert_eq!(data.source_handle, "attr-out");
        assert!(!data.is_execution_link());
    }
}
