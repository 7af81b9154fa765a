//! Execution submission boundary
//!
//! The core never runs node behavior. It only prepares a flattened graph
//! plus the task for an external execution backend, and defines the seam
//! that backend implements.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::flatten::{ExternalOriginals, SubFlowFlattener};
use crate::resolver::TaskDescriptor;
use crate::types::{FlowEdge, FlowGraph, FlowNode};

/// A flattened flow ready for remote execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionSubmission {
    pub nodes: Vec<FlowNode>,
    pub edges: Vec<FlowEdge>,
    pub task: TaskDescriptor,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend_config_id: Option<String>,
}

/// What the execution backend answered
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResponse {
    pub success: bool,
    #[serde(default)]
    pub result: Value,
}

impl ExecutionResponse {
    pub fn success(result: Value) -> Self {
        Self {
            success: true,
            result,
        }
    }

    pub fn failure(result: Value) -> Self {
        Self {
            success: false,
            result,
        }
    }
}

/// Transport to an execution endpoint.
///
/// Implemented by the host; the core only hands over a prepared submission.
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    /// Submit a flattened flow and wait for the backend's answer.
    async fn submit(&self, submission: ExecutionSubmission) -> Result<ExecutionResponse>;
}

/// Flatten a graph and package it with the task for submission.
///
/// Collapsed sub-flows are expanded first, so the backend never sees one.
pub fn prepare_submission(
    graph: &FlowGraph,
    task: TaskDescriptor,
    backend_config_id: Option<String>,
    flattener: &SubFlowFlattener<'_>,
) -> Result<ExecutionSubmission> {
    let flat = flattener.flatten(graph)?.graph;
    log::debug!(
        "Prepared submission for task '{}' ({} nodes, {} edges)",
        task.id,
        flat.nodes.len(),
        flat.edges.len()
    );
    Ok(ExecutionSubmission {
        nodes: flat.nodes,
        edges: flat.edges,
        task,
        backend_config_id,
    })
}

/// [`prepare_submission`] with default flattening limits
pub fn prepare_submission_with(
    graph: &FlowGraph,
    task: TaskDescriptor,
    backend_config_id: Option<String>,
    external: Option<&ExternalOriginals>,
) -> Result<ExecutionSubmission> {
    let mut flattener = SubFlowFlattener::new();
    if let Some(external) = external {
        flattener = flattener.with_external(external);
    }
    prepare_submission(graph, task, backend_config_id, &flattener)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FlowGraphError;
    use crate::types::{NodeType, Position};
    use parking_lot::Mutex;
    use serde_json::json;

    fn graph_with_sub_flow() -> FlowGraph {
        let sub_flow = FlowNode::new("sf", NodeType::SubFlow, Position::default()).with_data(json!({
            "originals": {
                "nodes": [
                    {"id": "x", "type": "apiNode", "position": {"x": 0, "y": 0}, "data": {}},
                    {"id": "y", "type": "apiNode", "position": {"x": 0, "y": 0}, "data": {}}
                ],
                "edges": [{
                    "id": "e-xy", "source": "x", "target": "y",
                    "sourceHandle": "execution", "targetHandle": "execution",
                    "data": {"isExecutionLink": true}
                }]
            },
            "originalPath": ["x", "y"]
        }));
        FlowGraph::new(
            vec![
                FlowNode::new("p", NodeType::Condition, Position::default()),
                sub_flow,
            ],
            vec![FlowEdge::execution("e-p", "p", "sf")],
        )
    }

    struct RecordingBackend {
        seen: Mutex<Vec<ExecutionSubmission>>,
    }

    #[async_trait]
    impl ExecutionBackend for RecordingBackend {
        async fn submit(&self, submission: ExecutionSubmission) -> Result<ExecutionResponse> {
            if submission.nodes.is_empty() {
                return Err(FlowGraphError::Submission("empty flow".to_string()));
            }
            let count = submission.nodes.len();
            self.seen.lock().push(submission);
            Ok(ExecutionResponse::success(json!({ "nodes": count })))
        }
    }

    #[test]
    fn test_prepare_flattens() {
        let task = TaskDescriptor::new("t1", "emailProcessing");
        let submission =
            prepare_submission_with(&graph_with_sub_flow(), task, Some("cfg-1".into()), None).unwrap();

        assert!(submission.nodes.iter().all(|n| n.node_type != NodeType::SubFlow));
        assert_eq!(submission.nodes.len(), 3);

        let wire = serde_json::to_value(&submission).unwrap();
        assert_eq!(wire["backendConfigId"], "cfg-1");
        assert_eq!(wire["task"]["type"], "emailProcessing");
    }

    #[tokio::test]
    async fn test_backend_receives_flat_graph() {
        let backend = RecordingBackend {
            seen: Mutex::new(Vec::new()),
        };
        let submission = prepare_submission_with(
            &graph_with_sub_flow(),
            TaskDescriptor::new("t1", "emailProcessing"),
            None,
            None,
        )
        .unwrap();

        let response = backend.submit(submission).await.unwrap();
        assert!(response.success);
        assert_eq!(response.result["nodes"], 3);
        assert_eq!(backend.seen.lock().len(), 1);
    }

    #[test]
    fn test_backend_error_is_returned() {
        let backend = RecordingBackend {
            seen: Mutex::new(Vec::new()),
        };
        let submission = ExecutionSubmission {
            nodes: Vec::new(),
            edges: Vec::new(),
            task: TaskDescriptor::new("t2", "other"),
            backend_config_id: None,
        };

        let result = tokio_test::block_on(backend.submit(submission));
        assert!(matches!(result, Err(FlowGraphError::Submission(_))));
    }

    #[test]
    fn test_response_defaults() {
        let response: ExecutionResponse = serde_json::from_str(r#"{"success": false}"#).unwrap();
        assert_eq!(response, ExecutionResponse::failure(Value::Null));
    }
}
