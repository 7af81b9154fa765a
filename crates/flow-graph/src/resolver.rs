//! Execution path resolution
//!
//! Given a task, the resolver picks the starting condition node registered
//! for the task's type and walks execution edges depth-first to produce the
//! sequence of nodes (and the edges used to reach them) an execution would
//! visit. Nothing is executed; the result only drives visualization.
//!
//! The working graph should already be flattened when it contains
//! collapsed sub-flows.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{attribute_handle, FlowEdge, FlowGraph, FlowNode};

/// A unit of work the flow is resolved for
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDescriptor {
    #[serde(default)]
    pub id: String,
    /// Matched against the starting node's `returnText`
    #[serde(rename = "type")]
    pub task_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient_email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment_id: Option<String>,
}

impl TaskDescriptor {
    /// Create a task of the given type
    pub fn new(id: impl Into<String>, task_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            task_type: task_type.into(),
            ..Default::default()
        }
    }

    /// Task attributes by their attribute name
    pub fn attributes(&self) -> [(&'static str, Option<&str>); 9] {
        [
            ("sourceId", self.source_id.as_deref()),
            ("senderEmail", self.sender_email.as_deref()),
            ("senderName", self.sender_name.as_deref()),
            ("recipientEmail", self.recipient_email.as_deref()),
            ("recipientName", self.recipient_name.as_deref()),
            ("subject", self.subject.as_deref()),
            ("date", self.date.as_deref()),
            ("body", self.body.as_deref()),
            ("attachmentId", self.attachment_id.as_deref()),
        ]
    }
}

/// Outcome of resolving a task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisualizationResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub starting_node_id: Option<String>,
    /// Node ids interleaved with the edge ids used to reach them
    #[serde(default)]
    pub flow_path: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl VisualizationResult {
    /// Create a successful result
    pub fn success(starting_node_id: impl Into<String>, flow_path: Vec<String>) -> Self {
        Self {
            success: true,
            starting_node_id: Some(starting_node_id.into()),
            flow_path,
            error: None,
        }
    }

    /// Create a failed result
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            starting_node_id: None,
            flow_path: Vec::new(),
            error: Some(error.into()),
        }
    }
}

/// Finds the entry node for a task and computes its execution path
#[derive(Debug, Clone, Default)]
pub struct ExecutionPathResolver {
    graph: FlowGraph,
    /// Scratch mapping of attribute handles to values for one resolution
    execution_context: HashMap<String, Value>,
}

impl ExecutionPathResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a resolver over a graph
    pub fn with_graph(graph: FlowGraph) -> Self {
        Self {
            graph,
            execution_context: HashMap::new(),
        }
    }

    /// Replace the working graph
    pub fn set_diagram(&mut self, nodes: Vec<FlowNode>, edges: Vec<FlowEdge>) {
        self.graph = FlowGraph::new(nodes, edges);
    }

    /// The working graph
    pub fn graph(&self) -> &FlowGraph {
        &self.graph
    }

    /// Context populated by the last `visualize_flow` call
    pub fn execution_context(&self) -> &HashMap<String, Value> {
        &self.execution_context
    }

    /// Select the starting node for a task
    ///
    /// A starting node is a `conditionNode` with `isStartingPoint == true`
    /// and `returnText` equal to the task type. When several match, the
    /// first in node order wins.
    pub fn find_starting_node(&self, task: &TaskDescriptor) -> Option<&FlowNode> {
        let mut matches = self
            .graph
            .nodes
            .iter()
            .filter(|n| n.is_starting_point_for(&task.task_type));

        let first = matches.next()?;
        let others = matches.count();
        if others > 0 {
            log::warn!(
                "{} starting nodes match task type '{}'; using '{}'",
                others + 1,
                task.task_type,
                first.id
            );
        }
        Some(first)
    }

    /// Resolve a task into its starting node and execution path
    ///
    /// Never fails with an error; a task without a starting node yields a
    /// result with `success == false`. The graph is not modified.
    pub fn visualize_flow(&mut self, task: &TaskDescriptor) -> VisualizationResult {
        self.execution_context.clear();

        let Some(start) = self.find_starting_node(task) else {
            log::info!("No starting node for task '{}' of type '{}'", task.id, task.task_type);
            return VisualizationResult::failure(format!(
                "No starting node found for task type '{}'",
                task.task_type
            ));
        };
        let start = start.clone();

        if task.source_id.is_some() {
            self.execution_context = build_context(task, &start);
        }

        let flow_path = self.get_flow_path(&start.id);
        log::debug!(
            "Task '{}' starts at '{}' and visits {} step(s)",
            task.id,
            start.id,
            flow_path.len()
        );
        VisualizationResult::success(start.id, flow_path)
    }

    /// Depth-first walk along execution edges from `start_id`
    ///
    /// Outgoing edges are taken in edge-array order. Each node appears at
    /// most once, even when execution edges form a cycle; an edge id is
    /// emitted only when it leads to a node not visited before.
    pub fn get_flow_path(&self, start_id: &str) -> Vec<String> {
        let mut adjacency: HashMap<&str, Vec<&FlowEdge>> = HashMap::new();
        for edge in self.graph.edges.iter().filter(|e| e.is_execution_link()) {
            adjacency.entry(edge.source.as_str()).or_default().push(edge);
        }

        let mut path = vec![start_id.to_string()];
        let mut visited: HashSet<&str> = HashSet::from([start_id]);
        let mut stack: Vec<(&str, usize)> = vec![(start_id, 0)];

        while let Some(frame) = stack.last_mut() {
            let (node_id, cursor) = *frame;
            let next = adjacency.get(node_id).and_then(|out| out.get(cursor)).copied();

            match next {
                Some(edge) => {
                    frame.1 += 1;
                    if visited.insert(edge.target.as_str()) {
                        path.push(edge.id.clone());
                        path.push(edge.target.clone());
                        stack.push((edge.target.as_str(), 0));
                    }
                }
                None => {
                    stack.pop();
                }
            }
        }

        path
    }
}

/// Map task attributes to `attr-<name>` keys
///
/// A field the task leaves empty falls back to the starting node's default
/// in `data.attributes.<name>`; fields with neither are left out.
fn build_context(task: &TaskDescriptor, start: &FlowNode) -> HashMap<String, Value> {
    let defaults = start.attr("attributes");

    task.attributes()
        .into_iter()
        .filter_map(|(name, value)| {
            let value = match value {
                Some(v) => Value::String(v.to_string()),
                None => defaults.and_then(|d| d.get(name)).cloned()?,
            };
            Some((attribute_handle(name), value))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{NodeType, Position};
    use serde_json::json;

    fn start(id: &str, task_type: &str) -> FlowNode {
        FlowNode::new(id, NodeType::Condition, Position::default())
            .with_data(json!({"isStartingPoint": true, "returnText": task_type}))
    }

    fn node(id: &str, node_type: NodeType) -> FlowNode {
        FlowNode::new(id, node_type, Position::default())
    }

    fn email_graph() -> ExecutionPathResolver {
        let mut resolver = ExecutionPathResolver::new();
        resolver.set_diagram(
            vec![
                start("A", "emailProcessing"),
                node("B", NodeType::Api),
                node("C", NodeType::End),
            ],
            vec![
                FlowEdge::execution("e-AB", "A", "B"),
                FlowEdge::execution("e-BC", "B", "C"),
            ],
        );
        resolver
    }

    #[test]
    fn test_linear_path() {
        let mut resolver = email_graph();
        let result = resolver.visualize_flow(&TaskDescriptor::new("t1", "emailProcessing"));
        assert_eq!(
            result,
            VisualizationResult::success("A", vec![
                "A".to_string(),
                "e-AB".to_string(),
                "B".to_string(),
                "e-BC".to_string(),
                "C".to_string(),
            ])
        );
    }

    #[test]
    fn test_unknown_task_type_fails_softly() {
        let mut resolver = email_graph();
        let before = resolver.graph().clone();

        let result = resolver.visualize_flow(&TaskDescriptor::new("t1", "invoice"));
        assert!(!result.success);
        assert!(!result.error.unwrap().is_empty());
        assert_eq!(resolver.graph(), &before);
    }

    #[test]
    fn test_branches_depth_first_in_edge_order() {
        let mut resolver = ExecutionPathResolver::new();
        resolver.set_diagram(
            vec![
                start("S", "t"),
                node("L", NodeType::Api),
                node("L2", NodeType::End),
                node("R", NodeType::Api),
            ],
            vec![
                FlowEdge::execution("s-l", "S", "L"),
                FlowEdge::execution("s-r", "S", "R"),
                FlowEdge::execution("l-l2", "L", "L2"),
            ],
        );
        assert_eq!(
            resolver.get_flow_path("S"),
            vec!["S", "s-l", "L", "l-l2", "L2", "s-r", "R"]
        );
    }

    #[test]
    fn test_cycle_visits_each_node_once() {
        let mut resolver = ExecutionPathResolver::new();
        resolver.set_diagram(
            vec![start("A", "t"), node("B", NodeType::Api)],
            vec![
                FlowEdge::execution("ab", "A", "B"),
                FlowEdge::execution("ba", "B", "A"),
            ],
        );
        let first = resolver.get_flow_path("A");
        assert_eq!(first, vec!["A", "ab", "B"]);
        assert_eq!(resolver.get_flow_path("A"), first);
    }

    #[test]
    fn test_data_edges_are_not_followed() {
        let mut resolver = ExecutionPathResolver::new();
        resolver.set_diagram(
            vec![start("A", "t"), node("T", NodeType::Text)],
            vec![FlowEdge::data("d", "A", "attr-out", "T", "attr-in")],
        );
        assert_eq!(resolver.get_flow_path("A"), vec!["A"]);
    }

    #[test]
    fn test_first_of_multiple_starts_wins() {
        let mut resolver = ExecutionPathResolver::new();
        resolver.set_diagram(vec![start("first", "t"), start("second", "t")], vec![]);
        let task = TaskDescriptor::new("x", "t");
        assert_eq!(resolver.find_starting_node(&task).unwrap().id, "first");
    }

    #[test]
    fn test_context_from_task_with_defaults() {
        let mut resolver = ExecutionPathResolver::new();
        resolver.set_diagram(
            vec![FlowNode::new("A", NodeType::Condition, Position::default()).with_data(json!({
                "isStartingPoint": true,
                "returnText": "emailProcessing",
                "attributes": {"subject": "(no subject)", "senderName": "Unknown"}
            }))],
            vec![],
        );

        let task = TaskDescriptor {
            source_id: Some("msg-1".to_string()),
            sender_name: Some("Ada".to_string()),
            ..TaskDescriptor::new("t1", "emailProcessing")
        };
        assert!(resolver.visualize_flow(&task).success);

        let ctx = resolver.execution_context();
        assert_eq!(ctx["attr-sourceId"], json!("msg-1"));
        assert_eq!(ctx["attr-senderName"], json!("Ada"));
        assert_eq!(ctx["attr-subject"], json!("(no subject)"));
        assert!(!ctx.contains_key("attr-body"));

        // Cleared on the next call; no source id means no context
        assert!(resolver.visualize_flow(&TaskDescriptor::new("t2", "emailProcessing")).success);
        assert!(resolver.execution_context().is_empty());
    }

    #[test]
    fn test_task_deserializes_from_camel_case() {
        let task: TaskDescriptor = serde_json::from_value(json!({
            "id": "t1",
            "type": "emailProcessing",
            "senderEmail": "a@example.com"
        }))
        .unwrap();
        assert_eq!(task.task_type, "emailProcessing");
        assert_eq!(task.sender_email.as_deref(), Some("a@example.com"));
    }
}
