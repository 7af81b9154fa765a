//! Selection cursor and guarded deletion
//!
//! The editor has at most one selected node. Selection and deletion are
//! both gated by the actor's edit permission; deletion additionally asks a
//! confirmation collaborator before touching the graph.
//!
//! Deleting a node removes its edges first, then the node, and commits both
//! arrays under a single write so no consumer ever sees a dangling edge.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;

use crate::bindings::{BindingKind, BindingTable};
use crate::error::{FlowGraphError, Result};
use crate::events::{notify, EventSink, GraphEvent};
use crate::shared::SharedGraph;
use crate::types::{EdgeId, FlowGraph, NodeId};
use crate::undo::UndoStack;

/// Interactive confirmation before a destructive edit
pub trait ConfirmDelete: Send + Sync {
    /// Return true to proceed
    fn confirm(&self, prompt: &str) -> bool;
}

impl<F> ConfirmDelete for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn confirm(&self, prompt: &str) -> bool {
        self(prompt)
    }
}

/// Confirmation that always proceeds
pub struct AlwaysConfirm;

impl ConfirmDelete for AlwaysConfirm {
    fn confirm(&self, _prompt: &str) -> bool {
        true
    }
}

/// The externally resolved "can this actor edit" signal
#[derive(Debug, Clone)]
pub struct EditPermission(Arc<AtomicBool>);

impl EditPermission {
    pub fn new(can_edit: bool) -> Self {
        Self(Arc::new(AtomicBool::new(can_edit)))
    }

    /// Update the signal; every clone observes the change
    pub fn set(&self, can_edit: bool) {
        self.0.store(can_edit, Ordering::SeqCst);
    }

    pub fn can_edit(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

impl Default for EditPermission {
    fn default() -> Self {
        Self::new(false)
    }
}

/// Result of a delete request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// The node and the listed edges were removed
    NodeDeleted {
        node_id: NodeId,
        removed_edges: Vec<EdgeId>,
    },
    /// A single edge was removed
    EdgeDeleted { edge_id: EdgeId },
    /// The user declined the confirmation; nothing changed
    Cancelled,
}

/// Remove a node and every edge touching it
///
/// Edges go first, then the node. Returns the new graph and the removed
/// edge ids, or `None` if the node is not in the graph.
pub fn remove_node(graph: &FlowGraph, node_id: &str) -> Option<(FlowGraph, Vec<EdgeId>)> {
    graph.find_node(node_id)?;

    let (removed, edges): (Vec<_>, Vec<_>) =
        graph.edges.iter().cloned().partition(|e| e.touches(node_id));
    let nodes = graph
        .nodes
        .iter()
        .filter(|n| n.id != node_id)
        .cloned()
        .collect();

    Some((
        FlowGraph::new(nodes, edges),
        removed.into_iter().map(|e| e.id).collect(),
    ))
}

/// Owns the selection cursor and performs permission-gated deletion
///
/// Cheap to clone; clones share the cursor and the graph, which lets delete
/// bindings carry their own controller.
#[derive(Clone)]
pub struct SelectionController {
    graph: SharedGraph,
    selected: Arc<Mutex<Option<NodeId>>>,
    permission: EditPermission,
    confirm: Arc<dyn ConfirmDelete>,
    require_confirmation: bool,
    history: Option<Arc<Mutex<UndoStack>>>,
    sink: Arc<dyn EventSink>,
}

impl SelectionController {
    /// Create a controller that confirms every deletion automatically
    pub fn new(graph: SharedGraph, permission: EditPermission, sink: Arc<dyn EventSink>) -> Self {
        Self {
            graph,
            selected: Arc::new(Mutex::new(None)),
            permission,
            confirm: Arc::new(AlwaysConfirm),
            require_confirmation: true,
            history: None,
            sink,
        }
    }

    /// Use a confirmation collaborator
    pub fn with_confirmation(mut self, confirm: Arc<dyn ConfirmDelete>) -> Self {
        self.confirm = confirm;
        self
    }

    /// Skip the confirmation step when false
    pub fn with_require_confirmation(mut self, require: bool) -> Self {
        self.require_confirmation = require;
        self
    }

    /// Record every committed deletion in an undo history
    pub fn with_history(mut self, history: Arc<Mutex<UndoStack>>) -> Self {
        self.history = Some(history);
        self
    }

    /// The currently selected node
    pub fn selected(&self) -> Option<NodeId> {
        self.selected.lock().clone()
    }

    /// Toggle selection of a node
    ///
    /// Selecting the selected node clears the cursor; selecting another node
    /// moves it. Without edit rights this is a no-op. Returns the selection
    /// after the call.
    pub fn select(&self, node_id: &str) -> Option<NodeId> {
        if !self.permission.can_edit() {
            log::debug!("Ignoring selection of '{}' without edit rights", node_id);
            return self.selected();
        }

        let selected = {
            let mut cursor = self.selected.lock();
            if cursor.as_deref() == Some(node_id) {
                *cursor = None;
            } else {
                *cursor = Some(node_id.to_string());
            }
            cursor.clone()
        };

        notify(
            self.sink.as_ref(),
            GraphEvent::SelectionChanged {
                selected: selected.clone(),
            },
        );
        selected
    }

    /// Clear the selection without a permission check
    pub fn clear_selection(&self) {
        let previous = self.selected.lock().take();
        if previous.is_some() {
            notify(self.sink.as_ref(), GraphEvent::SelectionChanged { selected: None });
        }
    }

    /// Delete a node and every edge touching it
    pub fn delete_node(&self, node_id: &str) -> Result<DeleteOutcome> {
        if !self.permission.can_edit() {
            return Err(deny(self.sink.as_ref(), "delete nodes"));
        }
        if self.graph.read(|g| g.find_node(node_id).is_none()) {
            return Err(FlowGraphError::NodeNotFound(node_id.to_string()));
        }
        if self.require_confirmation
            && !self
                .confirm
                .confirm(&format!("Delete node '{}' and its connections?", node_id))
        {
            log::debug!("Deletion of '{}' cancelled", node_id);
            return Ok(DeleteOutcome::Cancelled);
        }

        let mut removed_edges = Vec::new();
        let committed = self.graph.update(|graph| {
            let (next, removed) = remove_node(graph, node_id)?;
            removed_edges = removed;
            Some(next)
        });
        let Some(graph) = committed else {
            return Err(FlowGraphError::NodeNotFound(node_id.to_string()));
        };

        let was_selected = {
            let mut cursor = self.selected.lock();
            if cursor.as_deref() == Some(node_id) {
                *cursor = None;
                true
            } else {
                false
            }
        };

        self.record(&graph);
        log::debug!(
            "Deleted node '{}' with {} edge(s)",
            node_id,
            removed_edges.len()
        );

        notify(
            self.sink.as_ref(),
            GraphEvent::GraphReplaced {
                nodes: graph.nodes,
                edges: graph.edges,
            },
        );
        if was_selected {
            notify(self.sink.as_ref(), GraphEvent::SelectionChanged { selected: None });
        }

        Ok(DeleteOutcome::NodeDeleted {
            node_id: node_id.to_string(),
            removed_edges,
        })
    }

    /// Delete a single edge
    pub fn delete_edge(&self, edge_id: &str) -> Result<DeleteOutcome> {
        if !self.permission.can_edit() {
            return Err(deny(self.sink.as_ref(), "delete edges"));
        }

        let committed = self.graph.update(|graph| {
            graph.find_edge(edge_id)?;
            let mut next = graph.clone();
            next.edges.retain(|e| e.id != edge_id);
            Some(next)
        });
        let Some(graph) = committed else {
            return Err(FlowGraphError::EdgeNotFound(edge_id.to_string()));
        };

        self.record(&graph);
        log::debug!("Deleted edge '{}'", edge_id);
        notify(self.sink.as_ref(), GraphEvent::EdgesChanged { edges: graph.edges });

        Ok(DeleteOutcome::EdgeDeleted {
            edge_id: edge_id.to_string(),
        })
    }

    /// Give every node lacking one a delete binding
    ///
    /// Nodes that already carry a delete binding are left alone. Returns
    /// the number of bindings added.
    pub fn reconcile_delete_bindings(&self, table: &mut BindingTable) -> usize {
        let node_ids: Vec<NodeId> = self.graph.read(|g| g.nodes.iter().map(|n| n.id.clone()).collect());

        let mut added = 0;
        for node_id in node_ids {
            let entry = table.entry(&node_id);
            if entry.contains(BindingKind::Delete) {
                continue;
            }

            let controller = self.clone();
            let target = node_id.clone();
            entry.insert(
                BindingKind::Delete,
                Arc::new(move |_: Value| {
                    if let Err(e) = controller.delete_node(&target) {
                        log::warn!("Delete of '{}' failed: {}", target, e);
                    }
                }),
            );
            added += 1;
        }

        if added > 0 {
            log::debug!("Attached {} delete binding(s)", added);
        }
        added
    }

    fn record(&self, graph: &FlowGraph) {
        if let Some(history) = &self.history {
            if let Err(e) = history.lock().push(graph) {
                log::warn!("Failed to record undo snapshot: {}", e);
            }
        }
    }
}

/// Tell the user an edit was refused and build the matching error
pub(crate) fn deny(sink: &dyn EventSink, action: &str) -> FlowGraphError {
    notify(
        sink,
        GraphEvent::PermissionDenied {
            action: action.to_string(),
            message: format!("You do not have permission to {} in this flow", action),
        },
    );
    FlowGraphError::permission_denied(action)
}
