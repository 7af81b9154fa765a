//! Core types for flow graphs
//!
//! These types define the persisted shape of a flow: typed nodes placed on a
//! canvas and the edges between their handles. Edges come in two flavours,
//! execution edges (control flow) and data edges (value propagation),
//! distinguished by `data.isExecutionLink`.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Unique identifier for a node
pub type NodeId = String;

/// Unique identifier for an edge
pub type EdgeId = String;

/// Identifier of a named connection port on a node
pub type HandleId = String;

/// Handle used by control-flow edges
pub const EXECUTION_HANDLE: &str = "execution";

/// Prefix of attribute handles (`attr-<name>`)
pub const ATTRIBUTE_HANDLE_PREFIX: &str = "attr-";

/// Build the attribute handle id for an attribute name
pub fn attribute_handle(name: &str) -> HandleId {
    format!("{}{}", ATTRIBUTE_HANDLE_PREFIX, name)
}

/// The type of a node
///
/// Serialized as the camelCase type string used by the editor
/// (e.g. `"conditionNode"`). Unknown strings are preserved in `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum NodeType {
    Condition,
    Api,
    Text,
    Int,
    Boolean,
    Token,
    Base64,
    Switch,
    LogicalOperator,
    ConditionalFlow,
    MailBody,
    SendingMail,
    AiPrompt,
    SubFlow,
    End,
    Other(String),
}

impl NodeType {
    /// The type string as persisted
    pub fn as_str(&self) -> &str {
        match self {
            Self::Condition => "conditionNode",
            Self::Api => "apiNode",
            Self::Text => "textNode",
            Self::Int => "intNode",
            Self::Boolean => "booleanNode",
            Self::Token => "tokenNode",
            Self::Base64 => "base64Node",
            Self::Switch => "switchNode",
            Self::LogicalOperator => "logicalOperatorNode",
            Self::ConditionalFlow => "conditionalFlowNode",
            Self::MailBody => "mailBodyNode",
            Self::SendingMail => "sendingMailNode",
            Self::AiPrompt => "aiPromptNode",
            Self::SubFlow => "subFlowNode",
            Self::End => "endNode",
            Self::Other(s) => s,
        }
    }
}

impl From<String> for NodeType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "conditionNode" => Self::Condition,
            "apiNode" => Self::Api,
            "textNode" => Self::Text,
            "intNode" => Self::Int,
            "booleanNode" => Self::Boolean,
            "tokenNode" => Self::Token,
            "base64Node" => Self::Base64,
            "switchNode" => Self::Switch,
            "logicalOperatorNode" => Self::LogicalOperator,
            "conditionalFlowNode" => Self::ConditionalFlow,
            "mailBodyNode" => Self::MailBody,
            "sendingMailNode" => Self::SendingMail,
            "aiPromptNode" => Self::AiPrompt,
            "subFlowNode" => Self::SubFlow,
            "endNode" => Self::End,
            _ => Self::Other(s),
        }
    }
}

impl From<&str> for NodeType {
    fn from(s: &str) -> Self {
        Self::from(s.to_string())
    }
}

impl From<NodeType> for String {
    fn from(t: NodeType) -> Self {
        match t {
            NodeType::Other(s) => s,
            other => other.as_str().to_string(),
        }
    }
}

impl std::fmt::Display for NodeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Position on the canvas
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// A node instance in a flow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowNode {
    /// Unique identifier for this node instance
    pub id: NodeId,
    /// Node type
    #[serde(rename = "type")]
    pub node_type: NodeType,
    /// Position in the editor
    #[serde(default)]
    pub position: Position,
    /// Type-dependent attribute bag
    #[serde(default)]
    pub data: Value,
}

impl FlowNode {
    /// Create a node with an empty data object
    pub fn new(id: impl Into<String>, node_type: impl Into<NodeType>, position: Position) -> Self {
        Self {
            id: id.into(),
            node_type: node_type.into(),
            position,
            data: Value::Object(Map::new()),
        }
    }

    /// Set the data bag
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    /// Read a data attribute
    pub fn attr(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// Return a copy of this node whose data is shallow-merged with `key: value`
    ///
    /// A missing or non-object data bag is replaced by a fresh object.
    pub fn with_merged_attr(&self, key: &str, value: Value) -> Self {
        let mut data = match &self.data {
            Value::Object(map) => map.clone(),
            _ => Map::new(),
        };
        data.insert(key.to_string(), value);
        Self {
            data: Value::Object(data),
            ..self.clone()
        }
    }

    /// Whether this node is a valid entry point for the given task type
    pub fn is_starting_point_for(&self, task_type: &str) -> bool {
        self.node_type == NodeType::Condition
            && self.attr("isStartingPoint").and_then(Value::as_bool) == Some(true)
            && self.attr("returnText").and_then(Value::as_str) == Some(task_type)
    }

    /// Interpret this node as a sub-flow node
    ///
    /// Returns `None` for any other node type.
    pub fn sub_flow(&self) -> Option<SubFlowData> {
        if self.node_type != NodeType::SubFlow {
            return None;
        }
        Some(SubFlowData::from_data(&self.id, &self.data))
    }

    /// A sub-flow node not explicitly expanded, checked without parsing
    /// its interior
    pub fn is_collapsed_sub_flow(&self) -> bool {
        self.node_type == NodeType::SubFlow
            && self.attr("isCollapsed").and_then(Value::as_bool) != Some(false)
    }
}

/// Extra attributes carried by an edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EdgeData {
    /// Whether this edge represents control-flow order
    #[serde(default)]
    pub is_execution_link: bool,
}

/// An edge connecting two handles
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowEdge {
    /// Unique identifier for this edge
    pub id: EdgeId,
    /// Source node ID
    pub source: NodeId,
    /// Target node ID
    pub target: NodeId,
    /// Source handle
    pub source_handle: HandleId,
    /// Target handle
    pub target_handle: HandleId,
    /// Edge flags
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<EdgeData>,
}

impl FlowEdge {
    /// Create an execution edge between the execution handles of two nodes
    pub fn execution(
        id: impl Into<String>,
        source: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            target: target.into(),
            source_handle: EXECUTION_HANDLE.to_string(),
            target_handle: EXECUTION_HANDLE.to_string(),
            data: Some(EdgeData {
                is_execution_link: true,
            }),
        }
    }

    /// Create a data edge between two named handles
    pub fn data(
        id: impl Into<String>,
        source: impl Into<String>,
        source_handle: impl Into<String>,
        target: impl Into<String>,
        target_handle: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            target: target.into(),
            source_handle: source_handle.into(),
            target_handle: target_handle.into(),
            data: Some(EdgeData {
                is_execution_link: false,
            }),
        }
    }

    /// Whether this edge carries control flow
    pub fn is_execution_link(&self) -> bool {
        self.data.map_or(false, |d| d.is_execution_link)
    }

    /// Whether either end of this edge is the given node
    pub fn touches(&self, node_id: &str) -> bool {
        self.source == node_id || self.target == node_id
    }
}

/// An edge as it appears in storage, before handle checks
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawEdge {
    pub id: EdgeId,
    pub source: NodeId,
    pub target: NodeId,
    #[serde(default)]
    pub source_handle: Option<HandleId>,
    #[serde(default)]
    pub target_handle: Option<HandleId>,
    #[serde(default)]
    pub data: Option<EdgeData>,
}

impl RawEdge {
    /// Convert into a checked edge; `None` if either handle is missing
    pub fn into_edge(self) -> Option<FlowEdge> {
        match (self.source_handle, self.target_handle) {
            (Some(source_handle), Some(target_handle)) => Some(FlowEdge {
                id: self.id,
                source: self.source,
                target: self.target,
                source_handle,
                target_handle,
                data: self.data,
            }),
            _ => {
                log::warn!(
                    "Discarding edge '{}' ({} -> {}): missing handle",
                    self.id,
                    self.source,
                    self.target
                );
                None
            }
        }
    }
}

/// Convert stored edges into checked edges, dropping corrupt ones
pub fn sanitize_edges(raw: Vec<RawEdge>) -> Vec<FlowEdge> {
    raw.into_iter().filter_map(RawEdge::into_edge).collect()
}

/// Node and edge lists as stored, before edge handle checks
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StoredGraph {
    #[serde(default)]
    pub nodes: Vec<FlowNode>,
    #[serde(default)]
    pub edges: Vec<RawEdge>,
}

/// The interior subgraph represented by a collapsed sub-flow node
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "StoredGraph")]
pub struct SubFlowOriginals {
    pub nodes: Vec<FlowNode>,
    pub edges: Vec<FlowEdge>,
}

impl From<StoredGraph> for SubFlowOriginals {
    fn from(stored: StoredGraph) -> Self {
        Self {
            nodes: stored.nodes,
            edges: sanitize_edges(stored.edges),
        }
    }
}

impl SubFlowOriginals {
    /// Interior entry node: first of `path`, else the first interior node
    pub fn entry_id<'a>(&'a self, path: &'a [NodeId]) -> Option<&'a str> {
        path.first()
            .or_else(|| self.nodes.first().map(|n| &n.id))
            .map(String::as_str)
    }

    /// Interior exit node: last of `path`, else the last interior node
    pub fn exit_id<'a>(&'a self, path: &'a [NodeId]) -> Option<&'a str> {
        path.last()
            .or_else(|| self.nodes.last().map(|n| &n.id))
            .map(String::as_str)
    }
}

/// Sub-flow attributes read out of a node's data bag
#[derive(Debug, Clone, PartialEq)]
pub struct SubFlowData {
    /// Anything other than an explicit `false` counts as collapsed
    pub is_collapsed: bool,
    /// Interior subgraph, if present and well-formed
    pub originals: Option<SubFlowOriginals>,
    /// Ordered interior path; first is the entry, last is the exit
    pub original_path: Vec<NodeId>,
}

impl SubFlowData {
    fn from_data(node_id: &str, data: &Value) -> Self {
        Self {
            is_collapsed: data.get("isCollapsed").and_then(Value::as_bool) != Some(false),
            originals: Self::read_originals(node_id, data),
            original_path: Self::read_path(data),
        }
    }

    /// Parse `data.originals`; malformed interiors are logged and skipped
    pub(crate) fn read_originals(node_id: &str, data: &Value) -> Option<SubFlowOriginals> {
        match data.get("originals") {
            None | Some(Value::Null) => None,
            Some(raw) => match SubFlowOriginals::deserialize(raw) {
                Ok(originals) => Some(originals),
                Err(e) => {
                    log::warn!("Sub-flow '{}' has malformed originals: {}", node_id, e);
                    None
                }
            },
        }
    }

    pub(crate) fn read_path(data: &Value) -> Vec<NodeId> {
        data.get("originalPath")
            .and_then(Value::as_array)
            .map(|path| {
                path.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// A complete flow: the node and edge collections
///
/// Deserializing drops edges that lack a handle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "StoredGraph")]
pub struct FlowGraph {
    /// Nodes in the flow
    pub nodes: Vec<FlowNode>,
    /// Edges connecting nodes
    pub edges: Vec<FlowEdge>,
}

impl From<StoredGraph> for FlowGraph {
    fn from(stored: StoredGraph) -> Self {
        Self {
            nodes: stored.nodes,
            edges: sanitize_edges(stored.edges),
        }
    }
}

impl FlowGraph {
    /// Create a graph from node and edge collections
    pub fn new(nodes: Vec<FlowNode>, edges: Vec<FlowEdge>) -> Self {
        Self { nodes, edges }
    }

    /// Find a node by ID
    pub fn find_node(&self, id: &str) -> Option<&FlowNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Find an edge by ID
    pub fn find_edge(&self, id: &str) -> Option<&FlowEdge> {
        self.edges.iter().find(|e| e.id == id)
    }

    /// Get edges coming into a node
    pub fn incoming_edges<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a FlowEdge> + 'a {
        self.edges.iter().filter(move |e| e.target == node_id)
    }

    /// Get edges going out of a node
    pub fn outgoing_edges<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a FlowEdge> + 'a {
        self.edges.iter().filter(move |e| e.source == node_id)
    }

    /// Get outgoing execution edges of a node, in edge-array order
    pub fn execution_edges_from<'a>(
        &'a self,
        node_id: &'a str,
    ) -> impl Iterator<Item = &'a FlowEdge> + 'a {
        self.outgoing_edges(node_id).filter(|e| e.is_execution_link())
    }

    /// Set of all node IDs
    pub fn node_ids(&self) -> HashSet<&str> {
        self.nodes.iter().map(|n| n.id.as_str()).collect()
    }

    /// Number of sub-flow nodes that are still collapsed
    pub fn collapsed_sub_flow_count(&self) -> usize {
        self.nodes
            .iter()
            .filter_map(FlowNode::sub_flow)
            .filter(|sf| sf.is_collapsed)
            .count()
    }
}
