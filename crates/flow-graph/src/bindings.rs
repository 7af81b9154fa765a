//! Per-node behavioral bindings
//!
//! Bindings are the mutation callbacks an interactive node needs (text
//! edits, value edits, sub-flow expand/collapse, delete). They are never
//! persisted: after a flow version is loaded the [`CallbackRehydrator`]
//! rebuilds them from node type and id into a [`BindingTable`] keyed by
//! node id.
//!
//! Every binding resolves the node through a [`SharedGraph`] when it is
//! invoked, not when it is built. A binding created before an edit therefore
//! never writes back a stale array. The order inside a binding is fixed:
//! commit the new array, release the lock, then notify the event sink.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::events::{notify, EventSink, GraphEvent};
use crate::shared::SharedGraph;
use crate::types::{FlowNode, NodeId, NodeType};
use crate::undo::UndoStack;

/// A rebuilt mutation callback; the argument is the new attribute value
pub type Binding = Arc<dyn Fn(Value) + Send + Sync>;

/// The kinds of binding a node can carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BindingKind {
    /// Text node content changed
    TextChange,
    /// Integer node value changed
    ValueChange,
    /// AI prompt/input content changed
    PromptChange,
    /// Conditional-flow rules changed
    ConditionsChange,
    /// Sub-flow expand request
    Expand,
    /// Sub-flow collapse request
    Collapse,
    /// Node delete request
    Delete,
}

impl BindingKind {
    /// The data attribute written by an attribute binding
    pub fn data_key(&self) -> Option<&'static str> {
        match self {
            Self::TextChange => Some("text"),
            Self::ValueChange => Some("value"),
            Self::PromptChange => Some("prompt"),
            Self::ConditionsChange => Some("conditions"),
            Self::Expand | Self::Collapse | Self::Delete => None,
        }
    }
}

/// Binding kinds rebuilt on load for a node type
///
/// Returns an empty slice for non-interactive types.
pub fn interactive_bindings(node_type: &NodeType) -> &'static [BindingKind] {
    match node_type {
        NodeType::Text => &[BindingKind::TextChange],
        NodeType::Int => &[BindingKind::ValueChange],
        NodeType::AiPrompt => &[BindingKind::PromptChange],
        NodeType::ConditionalFlow => &[BindingKind::ConditionsChange],
        NodeType::SubFlow => &[BindingKind::Expand, BindingKind::Collapse],
        _ => &[],
    }
}

/// The bindings attached to one node
#[derive(Clone, Default)]
pub struct NodeBindings {
    handlers: HashMap<BindingKind, Binding>,
}

impl NodeBindings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a binding by kind
    pub fn get(&self, kind: BindingKind) -> Option<&Binding> {
        self.handlers.get(&kind)
    }

    /// Whether a binding of this kind is attached
    pub fn contains(&self, kind: BindingKind) -> bool {
        self.handlers.contains_key(&kind)
    }

    /// Attach or replace a binding
    pub fn insert(&mut self, kind: BindingKind, binding: Binding) {
        self.handlers.insert(kind, binding);
    }

    /// Attached kinds, in a stable order
    pub fn kinds(&self) -> Vec<BindingKind> {
        let mut kinds: Vec<BindingKind> = self.handlers.keys().copied().collect();
        kinds.sort_by_key(|k| *k as u8);
        kinds
    }
}

impl std::fmt::Debug for NodeBindings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeBindings").field("kinds", &self.kinds()).finish()
    }
}

/// Side-table of rebuilt bindings, keyed by node id
///
/// This is a cache; the committed node array is the source of truth.
/// Entries live for as long as the loaded flow version.
#[derive(Debug, Clone, Default)]
pub struct BindingTable {
    entries: HashMap<NodeId, NodeBindings>,
}

impl BindingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bindings for a node
    pub fn get(&self, node_id: &str) -> Option<&NodeBindings> {
        self.entries.get(node_id)
    }

    /// Bindings for a node, created on first access
    pub fn entry(&mut self, node_id: &str) -> &mut NodeBindings {
        self.entries.entry(node_id.to_string()).or_default()
    }

    /// Drop the bindings of a node
    pub fn remove(&mut self, node_id: &str) -> Option<NodeBindings> {
        self.entries.remove(node_id)
    }

    /// Invoke a binding; returns false if the node has no such binding
    pub fn invoke(&self, node_id: &str, kind: BindingKind, value: Value) -> bool {
        match self.entries.get(node_id).and_then(|b| b.get(kind)) {
            Some(binding) => {
                binding(value);
                true
            }
            None => {
                log::debug!("No {:?} binding for node '{}'", kind, node_id);
                false
            }
        }
    }

    /// Number of nodes with bindings
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the table is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every entry
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Host behavior for sub-flow expand and collapse requests
pub trait SubFlowHandler: Send + Sync {
    /// Expand the sub-flow node with the given id
    fn expand(&self, node_id: &str);

    /// Collapse the sub-flow node with the given id
    fn collapse(&self, node_id: &str);
}

/// Always-current reference to the active sub-flow handler
///
/// Bindings hold this reference and look the handler up when invoked, so
/// replacing the handler also retargets bindings built earlier.
#[derive(Clone)]
pub struct SubFlowHandlerRef {
    current: Arc<RwLock<Arc<dyn SubFlowHandler>>>,
}

impl SubFlowHandlerRef {
    pub fn new(handler: Arc<dyn SubFlowHandler>) -> Self {
        Self {
            current: Arc::new(RwLock::new(handler)),
        }
    }

    /// Swap in a new handler
    pub fn set(&self, handler: Arc<dyn SubFlowHandler>) {
        *self.current.write() = handler;
    }

    /// The handler in effect right now
    pub fn current(&self) -> Arc<dyn SubFlowHandler> {
        self.current.read().clone()
    }
}

/// Default sub-flow handler: flips `data.isCollapsed` on the node
///
/// Interior nodes stay in the sub-flow's `originals`; rendering them while
/// expanded is up to the editor.
pub struct CollapseToggle {
    graph: SharedGraph,
    sink: Arc<dyn EventSink>,
    history: Option<Arc<Mutex<UndoStack>>>,
}

impl CollapseToggle {
    pub fn new(graph: SharedGraph, sink: Arc<dyn EventSink>) -> Self {
        Self {
            graph,
            sink,
            history: None,
        }
    }

    /// Record every toggle in an undo history
    pub fn with_history(mut self, history: Arc<Mutex<UndoStack>>) -> Self {
        self.history = Some(history);
        self
    }

    fn set_collapsed(&self, node_id: &str, collapsed: bool) {
        commit_attr(
            &self.graph,
            self.sink.as_ref(),
            self.history.as_deref(),
            node_id,
            "isCollapsed",
            Value::Bool(collapsed),
        );
    }
}

impl SubFlowHandler for CollapseToggle {
    fn expand(&self, node_id: &str) {
        self.set_collapsed(node_id, false);
    }

    fn collapse(&self, node_id: &str) {
        self.set_collapsed(node_id, true);
    }
}

/// Shallow-merge one attribute into a node's data, commit, record, then notify
///
/// Returns false if the node no longer exists in the committed array.
pub(crate) fn commit_attr(
    graph: &SharedGraph,
    sink: &dyn EventSink,
    history: Option<&Mutex<UndoStack>>,
    node_id: &str,
    key: &str,
    value: Value,
) -> bool {
    let committed = graph.update(|current| {
        let index = current.nodes.iter().position(|n| n.id == node_id)?;
        let mut next = current.clone();
        next.nodes[index] = current.nodes[index].with_merged_attr(key, value);
        Some(next)
    });

    match committed {
        Some(next) => {
            log::debug!("Node '{}': set '{}'", node_id, key);
            if let Some(history) = history {
                if let Err(e) = history.lock().push(&next) {
                    log::warn!("Failed to record undo snapshot: {}", e);
                }
            }
            notify(sink, GraphEvent::NodesChanged { nodes: next.nodes });
            true
        }
        None => {
            log::debug!("Node '{}' is gone; ignoring '{}' update", node_id, key);
            false
        }
    }
}

/// Rebuilds per-node bindings after a flow version is loaded
pub struct CallbackRehydrator {
    graph: SharedGraph,
    sink: Arc<dyn EventSink>,
    sub_flows: SubFlowHandlerRef,
    history: Option<Arc<Mutex<UndoStack>>>,
}

impl CallbackRehydrator {
    /// Create a rehydrator using [`CollapseToggle`] for sub-flows
    pub fn new(graph: SharedGraph, sink: Arc<dyn EventSink>) -> Self {
        let toggle = Arc::new(CollapseToggle::new(graph.clone(), sink.clone()));
        Self {
            graph,
            sink,
            sub_flows: SubFlowHandlerRef::new(toggle),
            history: None,
        }
    }

    /// Record every attribute edit made through a binding in `history`
    ///
    /// Also reinstalls the default [`CollapseToggle`] with the same history,
    /// so call it before swapping in a custom sub-flow handler.
    pub fn with_history(mut self, history: Arc<Mutex<UndoStack>>) -> Self {
        let toggle = CollapseToggle::new(self.graph.clone(), self.sink.clone())
            .with_history(history.clone());
        self.sub_flows.set(Arc::new(toggle));
        self.history = Some(history);
        self
    }

    /// Replace the sub-flow handler; existing bindings follow the change
    pub fn set_sub_flow_handler(&self, handler: Arc<dyn SubFlowHandler>) {
        self.sub_flows.set(handler);
    }

    /// The always-current sub-flow handler reference
    pub fn sub_flow_handler(&self) -> &SubFlowHandlerRef {
        &self.sub_flows
    }

    /// Rebuild the bindings of every interactive node in `nodes`
    ///
    /// The table is cleared first, so calling this twice on the same array
    /// yields bindings with the same behavior. Nodes with a missing or
    /// malformed data bag still get their bindings. Returns the number of
    /// nodes that received bindings.
    pub fn rehydrate(&self, nodes: &[FlowNode], table: &mut BindingTable) -> usize {
        table.clear();

        let mut bound = 0;
        for node in nodes {
            let kinds = interactive_bindings(&node.node_type);
            if kinds.is_empty() {
                continue;
            }
            if !node.data.is_object() {
                log::debug!("Node '{}' has no data object; binding anyway", node.id);
            }

            let entry = table.entry(&node.id);
            for kind in kinds {
                entry.insert(*kind, self.build(&node.id, *kind));
            }
            bound += 1;
        }

        log::debug!("Rehydrated bindings for {} of {} nodes", bound, nodes.len());
        bound
    }

    fn build(&self, node_id: &str, kind: BindingKind) -> Binding {
        let node_id = node_id.to_string();
        match kind {
            BindingKind::Expand => {
                let handlers = self.sub_flows.clone();
                Arc::new(move |_: Value| handlers.current().expand(&node_id))
            }
            BindingKind::Collapse => {
                let handlers = self.sub_flows.clone();
                Arc::new(move |_: Value| handlers.current().collapse(&node_id))
            }
            _ => {
                let key = kind.data_key().unwrap_or_default();
                let graph = self.graph.clone();
                let sink = self.sink.clone();
                let history = self.history.clone();
                Arc::new(move |value: Value| {
                    commit_attr(&graph, sink.as_ref(), history.as_deref(), &node_id, key, value);
                })
            }
        }
    }
}
