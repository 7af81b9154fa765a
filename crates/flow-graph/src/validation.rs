//! Structural validation for flow graphs
//!
//! Loading never fails on a damaged graph; corrupt edges are dropped and
//! inert sub-flows are skipped. Validation is the place where those
//! problems, and a few softer ones, are reported together.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use serde::Serialize;
use serde_json::Value;

use crate::types::{FlowGraph, FlowNode, NodeType};

/// A problem found in a flow graph
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ValidationError {
    /// An edge references a non-existent node
    #[serde(rename_all = "camelCase")]
    UnknownNode { edge_id: String, node_id: String },
    /// Two nodes share an id
    #[serde(rename_all = "camelCase")]
    DuplicateNodeId { node_id: String },
    /// Two edges share an id
    #[serde(rename_all = "camelCase")]
    DuplicateEdgeId { edge_id: String },
    /// A collapsed sub-flow has no interior to expand into
    #[serde(rename_all = "camelCase")]
    MissingInterior { node_id: String },
    /// A sub-flow path names a node its interior does not contain
    #[serde(rename_all = "camelCase")]
    PathOutsideInterior { node_id: String, path_node: String },
    /// More than one starting node answers the same task type
    #[serde(rename_all = "camelCase")]
    MultipleStartNodes { task_type: String, node_ids: Vec<String> },
    /// Execution edges form a cycle
    ExecutionCycle,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownNode { edge_id, node_id } => {
                write!(f, "Edge '{}' references unknown node '{}'", edge_id, node_id)
            }
            Self::DuplicateNodeId { node_id } => write!(f, "Duplicate node id '{}'", node_id),
            Self::DuplicateEdgeId { edge_id } => write!(f, "Duplicate edge id '{}'", edge_id),
            Self::MissingInterior { node_id } => {
                write!(f, "Collapsed sub-flow '{}' has no interior", node_id)
            }
            Self::PathOutsideInterior { node_id, path_node } => {
                write!(
                    f,
                    "Sub-flow '{}' path names '{}', which is not in its interior",
                    node_id, path_node
                )
            }
            Self::MultipleStartNodes { task_type, node_ids } => {
                write!(
                    f,
                    "Task type '{}' has {} starting nodes: {}",
                    task_type,
                    node_ids.len(),
                    node_ids.join(", ")
                )
            }
            Self::ExecutionCycle => write!(f, "Execution edges form a cycle"),
        }
    }
}

impl std::error::Error for ValidationError {}

/// Validate a flow graph
///
/// Returns all validation errors found (not just the first).
pub fn validate_flow(graph: &FlowGraph) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    validate_unique_ids(graph, &mut errors);
    validate_edge_references(graph, &mut errors);
    validate_sub_flows(graph, &mut errors);
    validate_starting_nodes(graph, &mut errors);
    detect_execution_cycles(graph, &mut errors);

    errors
}

fn validate_unique_ids(graph: &FlowGraph, errors: &mut Vec<ValidationError>) {
    let mut seen = HashSet::new();
    for node in &graph.nodes {
        if !seen.insert(node.id.as_str()) {
            errors.push(ValidationError::DuplicateNodeId {
                node_id: node.id.clone(),
            });
        }
    }

    let mut seen = HashSet::new();
    for edge in &graph.edges {
        if !seen.insert(edge.id.as_str()) {
            errors.push(ValidationError::DuplicateEdgeId {
                edge_id: edge.id.clone(),
            });
        }
    }
}

/// Check that all edge source/target nodes exist
fn validate_edge_references(graph: &FlowGraph, errors: &mut Vec<ValidationError>) {
    let node_ids = graph.node_ids();

    for edge in &graph.edges {
        for endpoint in [&edge.source, &edge.target] {
            if !node_ids.contains(endpoint.as_str()) {
                errors.push(ValidationError::UnknownNode {
                    edge_id: edge.id.clone(),
                    node_id: endpoint.clone(),
                });
            }
        }
    }
}

fn validate_sub_flows(graph: &FlowGraph, errors: &mut Vec<ValidationError>) {
    for node in &graph.nodes {
        let Some(sub_flow) = node.sub_flow() else {
            continue;
        };

        let interior = sub_flow.originals.filter(|o| !o.nodes.is_empty());
        let Some(interior) = interior else {
            if sub_flow.is_collapsed {
                errors.push(ValidationError::MissingInterior {
                    node_id: node.id.clone(),
                });
            }
            continue;
        };

        let interior_ids: HashSet<&str> = interior.nodes.iter().map(|n| n.id.as_str()).collect();
        for path_node in &sub_flow.original_path {
            if !interior_ids.contains(path_node.as_str()) {
                errors.push(ValidationError::PathOutsideInterior {
                    node_id: node.id.clone(),
                    path_node: path_node.clone(),
                });
            }
        }
    }
}

/// Report task types that more than one starting node answers
fn validate_starting_nodes(graph: &FlowGraph, errors: &mut Vec<ValidationError>) {
    let mut by_task: BTreeMap<&str, Vec<String>> = BTreeMap::new();
    for node in &graph.nodes {
        if let Some(task_type) = starting_task_type(node) {
            by_task.entry(task_type).or_default().push(node.id.clone());
        }
    }

    for (task_type, node_ids) in by_task {
        if node_ids.len() > 1 {
            errors.push(ValidationError::MultipleStartNodes {
                task_type: task_type.to_string(),
                node_ids,
            });
        }
    }
}

fn starting_task_type(node: &FlowNode) -> Option<&str> {
    if node.node_type != NodeType::Condition {
        return None;
    }
    if node.attr("isStartingPoint").and_then(Value::as_bool) != Some(true) {
        return None;
    }
    node.attr("returnText").and_then(Value::as_str)
}

/// Detect cycles along execution edges using Kahn's algorithm
fn detect_execution_cycles(graph: &FlowGraph, errors: &mut Vec<ValidationError>) {
    let execution: Vec<_> = graph.edges.iter().filter(|e| e.is_execution_link()).collect();

    let mut in_degree: HashMap<&str, usize> = HashMap::new();
    for node in &graph.nodes {
        in_degree.insert(&node.id, 0);
    }
    for edge in &execution {
        *in_degree.entry(&edge.target).or_insert(0) += 1;
    }
    for edge in &execution {
        in_degree.entry(&edge.source).or_insert(0);
    }

    let total = in_degree.len();
    let mut queue: VecDeque<&str> = in_degree
        .iter()
        .filter(|(_, &deg)| deg == 0)
        .map(|(&id, _)| id)
        .collect();

    let mut visited = 0;
    while let Some(node_id) = queue.pop_front() {
        visited += 1;
        for edge in &execution {
            if edge.source == node_id {
                if let Some(deg) = in_degree.get_mut(edge.target.as_str()) {
                    *deg -= 1;
                    if *deg == 0 {
                        queue.push_back(&edge.target);
                    }
                }
            }
        }
    }

    if visited < total {
        errors.push(ValidationError::ExecutionCycle);
    }
}
