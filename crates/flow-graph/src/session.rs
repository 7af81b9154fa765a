//! Editing session over one loaded flow version
//!
//! The session owns the committed graph and everything derived from it:
//! the binding side-table, the selection cursor, and the undo history.
//! Loading is split into `begin_load` and `commit_load` so a host can fetch
//! the version asynchronously; a result that arrives after a newer load was
//! started is dropped before anything is committed.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;

use crate::bindings::{BindingKind, BindingTable, CallbackRehydrator, SubFlowHandler};
use crate::config::FlowGraphConfig;
use crate::error::{FlowGraphError, Result};
use crate::events::{notify, EventSink, GraphEvent};
use crate::flatten::{ExternalOriginals, SubFlowFlattener};
use crate::resolver::{ExecutionPathResolver, TaskDescriptor, VisualizationResult};
use crate::selection::{deny, ConfirmDelete, DeleteOutcome, EditPermission, SelectionController};
use crate::shared::SharedGraph;
use crate::store::{FlowDocument, FlowStore, FlowVersion};
use crate::submit::{self, ExecutionBackend, ExecutionResponse, ExecutionSubmission};
use crate::types::{FlowEdge, FlowGraph, FlowNode, NodeId, Position};
use crate::undo::UndoStack;

/// Identity of one load request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadTicket {
    pub flow_id: String,
    pub version_index: usize,
    generation: u64,
}

/// A live editing session
pub struct FlowSession {
    config: FlowGraphConfig,
    graph: SharedGraph,
    sink: Arc<dyn EventSink>,
    permission: EditPermission,
    bindings: BindingTable,
    rehydrator: CallbackRehydrator,
    selection: SelectionController,
    history: Arc<Mutex<UndoStack>>,
    external: ExternalOriginals,
    pending: Option<LoadTicket>,
    loaded: Option<LoadTicket>,
    generation: u64,
}

impl FlowSession {
    /// Create an empty session
    pub fn new(config: FlowGraphConfig, permission: EditPermission, sink: Arc<dyn EventSink>) -> Self {
        let graph = SharedGraph::default();
        let history = Arc::new(Mutex::new(UndoStack::new(config.undo_limit)));
        let rehydrator =
            CallbackRehydrator::new(graph.clone(), sink.clone()).with_history(history.clone());
        let selection = SelectionController::new(graph.clone(), permission.clone(), sink.clone())
            .with_require_confirmation(config.require_delete_confirmation)
            .with_history(history.clone());

        Self {
            config,
            graph,
            sink,
            permission,
            bindings: BindingTable::new(),
            rehydrator,
            selection,
            history,
            external: ExternalOriginals::new(),
            pending: None,
            loaded: None,
            generation: 0,
        }
    }

    /// Ask this collaborator before deleting a node
    ///
    /// Call before the first load; delete bindings capture the collaborator
    /// in effect when they are built.
    pub fn with_confirmation(mut self, confirm: Arc<dyn ConfirmDelete>) -> Self {
        self.selection = self.selection.with_confirmation(confirm);
        self
    }

    /// Replace the sub-flow expand/collapse behavior
    pub fn set_sub_flow_handler(&self, handler: Arc<dyn SubFlowHandler>) {
        self.rehydrator.set_sub_flow_handler(handler);
    }

    /// Supply sub-flow interiors kept outside the nodes
    pub fn set_external_originals(&mut self, external: ExternalOriginals) {
        self.external = external;
    }

    pub fn config(&self) -> &FlowGraphConfig {
        &self.config
    }

    /// The committed graph
    pub fn graph(&self) -> &SharedGraph {
        &self.graph
    }

    pub fn bindings(&self) -> &BindingTable {
        &self.bindings
    }

    pub fn permission(&self) -> &EditPermission {
        &self.permission
    }

    /// The flow version currently committed, if any
    pub fn loaded(&self) -> Option<&LoadTicket> {
        self.loaded.as_ref()
    }

    pub fn selected(&self) -> Option<NodeId> {
        self.selection.selected()
    }

    /// Start loading a flow version; earlier tickets become stale
    pub fn begin_load(&mut self, flow_id: impl Into<String>, version_index: usize) -> LoadTicket {
        self.generation += 1;
        let ticket = LoadTicket {
            flow_id: flow_id.into(),
            version_index,
            generation: self.generation,
        };
        log::debug!(
            "Loading flow '{}' version {} (request {})",
            ticket.flow_id,
            ticket.version_index,
            ticket.generation
        );
        self.pending = Some(ticket.clone());
        ticket
    }

    /// Commit a fetched version if its ticket is still the latest
    ///
    /// Returns false when the result was discarded. On commit the graph is
    /// replaced wholesale, bindings are rebuilt, the selection is cleared and
    /// the undo history restarts from the loaded state.
    pub fn commit_load(&mut self, ticket: &LoadTicket, version: FlowVersion) -> bool {
        if self.pending.as_ref() != Some(ticket) {
            log::info!(
                "Discarding stale load of flow '{}' version {}",
                ticket.flow_id,
                ticket.version_index
            );
            notify(
                self.sink.as_ref(),
                GraphEvent::LoadDiscarded {
                    flow_id: ticket.flow_id.clone(),
                    version_index: ticket.version_index,
                },
            );
            return false;
        }
        self.pending = None;

        let node_count = version.nodes.len();
        let edge_count = version.edges.len();
        if let Err(e) = self.history.lock().reset(&version) {
            log::warn!("Failed to record initial undo snapshot: {}", e);
        }
        self.graph.replace(version.nodes, version.edges);
        self.selection.clear_selection();
        self.refresh_bindings();
        self.loaded = Some(ticket.clone());

        log::info!(
            "Loaded flow '{}' version {} ({} nodes, {} edges)",
            ticket.flow_id,
            ticket.version_index,
            node_count,
            edge_count
        );
        let graph = self.graph.snapshot();
        notify(
            self.sink.as_ref(),
            GraphEvent::GraphReplaced {
                nodes: graph.nodes,
                edges: graph.edges,
            },
        );
        notify(
            self.sink.as_ref(),
            GraphEvent::FlowLoaded {
                flow_id: ticket.flow_id.clone(),
                version_index: ticket.version_index,
                node_count,
                edge_count,
            },
        );
        true
    }

    /// Load a version from a store in one step; `None` picks the current one
    pub fn load_from_store(&mut self, store: &FlowStore, flow_id: &str, index: Option<usize>) -> Result<()> {
        let doc = store
            .get(flow_id)
            .ok_or_else(|| FlowGraphError::FlowNotFound(flow_id.to_string()))?;
        let index = index.unwrap_or(doc.current_version_index);
        let version = doc.version(index)?.clone();

        let ticket = self.begin_load(flow_id, index);
        self.commit_load(&ticket, version);
        Ok(())
    }

    /// Add a node
    pub fn add_node(&mut self, node: FlowNode) -> Result<()> {
        self.require_edit("add nodes")?;

        let id = node.id.clone();
        let committed = self.graph.update(|graph| {
            if graph.find_node(&node.id).is_some() {
                return None;
            }
            let mut next = graph.clone();
            next.nodes.push(node);
            Some(next)
        });
        let Some(graph) = committed else {
            return Err(FlowGraphError::invalid(format!("duplicate node id '{}'", id)));
        };

        self.record(&graph);
        self.refresh_bindings();
        log::debug!("Added node '{}'", id);
        notify(self.sink.as_ref(), GraphEvent::NodesChanged { nodes: graph.nodes });
        Ok(())
    }

    /// Move a node on the canvas
    pub fn move_node(&mut self, node_id: &str, position: Position) -> Result<()> {
        self.require_edit("move nodes")?;

        let committed = self.graph.update_nodes(|nodes| {
            let index = nodes.iter().position(|n| n.id == node_id)?;
            let mut next = nodes.to_vec();
            next[index].position = position;
            Some(next)
        });
        let Some(nodes) = committed else {
            return Err(FlowGraphError::NodeNotFound(node_id.to_string()));
        };

        self.record(&self.graph.snapshot());
        notify(self.sink.as_ref(), GraphEvent::NodesChanged { nodes });
        Ok(())
    }

    /// Add an edge between two existing nodes
    ///
    /// Both handles must be named; an edge the loader would discard as
    /// corrupt is rejected here.
    pub fn connect(&mut self, edge: FlowEdge) -> Result<()> {
        self.require_edit("connect nodes")?;

        if edge.source_handle.is_empty() || edge.target_handle.is_empty() {
            return Err(FlowGraphError::invalid(format!(
                "edge '{}' must name both handles",
                edge.id
            )));
        }

        let edge_id = edge.id.clone();
        let mut problem = None;
        let committed = self.graph.update(|graph| {
            if graph.find_edge(&edge.id).is_some() {
                problem = Some(FlowGraphError::invalid(format!("duplicate edge id '{}'", edge.id)));
                return None;
            }
            for endpoint in [&edge.source, &edge.target] {
                if graph.find_node(endpoint).is_none() {
                    problem = Some(FlowGraphError::NodeNotFound(endpoint.clone()));
                    return None;
                }
            }
            let mut next = graph.clone();
            next.edges.push(edge);
            Some(next)
        });
        let Some(graph) = committed else {
            return Err(problem.unwrap_or_else(|| FlowGraphError::EdgeNotFound(edge_id)));
        };

        self.record(&graph);
        log::debug!("Connected edge '{}'", edge_id);
        notify(self.sink.as_ref(), GraphEvent::EdgesChanged { edges: graph.edges });
        Ok(())
    }

    /// Toggle selection of a node
    pub fn select(&self, node_id: &str) -> Option<NodeId> {
        self.selection.select(node_id)
    }

    /// Delete a node, its edges and its bindings
    pub fn delete_node(&mut self, node_id: &str) -> Result<DeleteOutcome> {
        let outcome = self.selection.delete_node(node_id)?;
        if matches!(outcome, DeleteOutcome::NodeDeleted { .. }) {
            self.bindings.remove(node_id);
        }
        Ok(outcome)
    }

    pub fn delete_edge(&mut self, edge_id: &str) -> Result<DeleteOutcome> {
        self.selection.delete_edge(edge_id)
    }

    /// Run a node's binding as the editor would
    ///
    /// Returns false when the node has no such binding.
    pub fn invoke_binding(&mut self, node_id: &str, kind: BindingKind, value: Value) -> bool {
        let invoked = self.bindings.invoke(node_id, kind, value);
        if invoked && kind == BindingKind::Delete && self.graph.read(|g| g.find_node(node_id).is_none()) {
            self.bindings.remove(node_id);
        }
        invoked
    }

    /// The version to persist, collapsed sub-flows included
    pub fn save(&self) -> Result<FlowVersion> {
        self.require_edit("save")?;
        Ok(self.graph.snapshot())
    }

    /// Save as a new version of the loaded flow
    ///
    /// A flow the store does not know yet is created. Returns the index of
    /// the new version.
    pub fn save_to_store(&self, store: &mut FlowStore) -> Result<usize> {
        let version = self.save()?;
        let flow_id = self
            .loaded
            .as_ref()
            .map(|t| t.flow_id.clone())
            .ok_or_else(|| FlowGraphError::invalid("no flow is loaded"))?;

        if store.contains(&flow_id) {
            store.save_version(&flow_id, version)
        } else {
            store.insert(FlowDocument::new(flow_id.clone(), flow_id, version))?;
            Ok(0)
        }
    }

    /// Flatten the committed graph and resolve the task's execution path
    ///
    /// The committed graph is not modified. A flatten that does not converge
    /// is reported as a failed result.
    pub fn visualize(&self, task: &TaskDescriptor) -> VisualizationResult {
        let outcome = match self.flattener().flatten(&self.graph.snapshot()) {
            Ok(outcome) => outcome,
            Err(e) => {
                log::warn!("Cannot visualize task '{}': {}", task.id, e);
                return VisualizationResult::failure(e.to_string());
            }
        };

        if outcome.passes > 0 {
            notify(
                self.sink.as_ref(),
                GraphEvent::Flattened {
                    passes: outcome.passes,
                    expanded: outcome.expanded,
                },
            );
        }

        ExecutionPathResolver::with_graph(outcome.graph).visualize_flow(task)
    }

    /// Flatten the committed graph and package it for an execution backend
    pub fn prepare_submission(
        &self,
        task: TaskDescriptor,
        backend_config_id: Option<String>,
    ) -> Result<ExecutionSubmission> {
        submit::prepare_submission(&self.graph.snapshot(), task, backend_config_id, &self.flattener())
    }

    /// Prepare a submission and hand it to a backend
    pub async fn submit(
        &self,
        backend: &dyn ExecutionBackend,
        task: TaskDescriptor,
        backend_config_id: Option<String>,
    ) -> Result<ExecutionResponse> {
        let submission = self.prepare_submission(task, backend_config_id)?;
        backend.submit(submission).await
    }

    /// Step back through the edit history; false when there is nothing to undo
    pub fn undo(&mut self) -> Result<bool> {
        self.require_edit("undo")?;
        let restored = self.history.lock().undo();
        self.restore(restored)
    }

    /// Step forward through the edit history; false when there is nothing to redo
    pub fn redo(&mut self) -> Result<bool> {
        self.require_edit("redo")?;
        let restored = self.history.lock().redo();
        self.restore(restored)
    }

    fn restore(&mut self, restored: Option<Result<FlowGraph>>) -> Result<bool> {
        let Some(graph) = restored.transpose()? else {
            return Ok(false);
        };

        if let Some(selected) = self.selection.selected() {
            if graph.find_node(&selected).is_none() {
                self.selection.clear_selection();
            }
        }
        self.graph.replace(graph.nodes.clone(), graph.edges.clone());
        self.refresh_bindings();
        notify(
            self.sink.as_ref(),
            GraphEvent::GraphReplaced {
                nodes: graph.nodes,
                edges: graph.edges,
            },
        );
        Ok(true)
    }

    fn flattener(&self) -> SubFlowFlattener<'_> {
        SubFlowFlattener::new()
            .with_external(&self.external)
            .with_max_passes(self.config.max_flatten_passes)
    }

    fn refresh_bindings(&mut self) {
        let nodes = self.graph.nodes();
        self.rehydrator.rehydrate(&nodes, &mut self.bindings);
        self.selection.reconcile_delete_bindings(&mut self.bindings);
    }

    fn record(&self, graph: &FlowGraph) {
        if let Err(e) = self.history.lock().push(graph) {
            log::warn!("Failed to record undo snapshot: {}", e);
        }
    }

    fn require_edit(&self, action: &str) -> Result<()> {
        if self.permission.can_edit() {
            Ok(())
        } else {
            Err(deny(self.sink.as_ref(), action))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::VecEventSink;
    use crate::types::NodeType;
    use serde_json::json;

    fn version() -> FlowVersion {
        FlowGraph::new(
            vec![
                FlowNode::new("start", NodeType::Condition, Position::default())
                    .with_data(json!({"isStartingPoint": true, "returnText": "emailProcessing"})),
                FlowNode::new("note", NodeType::Text, Position::default())
                    .with_data(json!({"text": "hello"})),
                FlowNode::new("end", NodeType::End, Position::default()),
            ],
            vec![
                FlowEdge::execution("e-1", "start", "note"),
                FlowEdge::execution("e-2", "note", "end"),
            ],
        )
    }

    fn session(can_edit: bool) -> (FlowSession, Arc<VecEventSink>) {
        let sink = Arc::new(VecEventSink::new());
        let config = FlowGraphConfig {
            require_delete_confirmation: false,
            ..Default::default()
        };
        let mut session = FlowSession::new(config, EditPermission::new(can_edit), sink.clone());
        let ticket = session.begin_load("flow", 0);
        assert!(session.commit_load(&ticket, version()));
        sink.clear();
        (session, sink)
    }

    #[test]
    fn test_stale_load_is_discarded() {
        let sink = Arc::new(VecEventSink::new());
        let mut session = FlowSession::new(FlowGraphConfig::default(), EditPermission::new(true), sink.clone());

        let first = session.begin_load("flow", 0);
        let second = session.begin_load("flow", 1);
        assert!(!session.commit_load(&first, version()));
        assert!(session.graph().nodes().is_empty());
        assert_eq!(
            sink.events()[0],
            GraphEvent::LoadDiscarded {
                flow_id: "flow".to_string(),
                version_index: 0
            }
        );

        assert!(session.commit_load(&second, version()));
        assert_eq!(session.graph().nodes().len(), 3);
        assert_eq!(session.loaded().map(|t| t.version_index), Some(1));

        // A ticket commits at most once
        assert!(!session.commit_load(&second, FlowGraph::default()));
        assert_eq!(session.graph().nodes().len(), 3);
    }

    #[test]
    fn test_load_rehydrates_bindings() {
        let (session, _) = session(true);
        let text = session.bindings().get("note").unwrap();
        assert!(text.contains(BindingKind::TextChange));
        assert!(text.contains(BindingKind::Delete));
        assert!(session.bindings().get("end").unwrap().contains(BindingKind::Delete));
    }

    #[test]
    fn test_binding_updates_committed_graph() {
        let (mut session, sink) = session(true);
        assert!(session.invoke_binding("note", BindingKind::TextChange, json!("bye")));
        let node = session.graph().read(|g| g.find_node("note").cloned()).unwrap();
        assert_eq!(node.attr("text"), Some(&json!("bye")));
        assert!(matches!(sink.events()[0], GraphEvent::NodesChanged { .. }));
    }

    #[test]
    fn test_delete_binding_removes_entry() {
        let (mut session, _) = session(true);
        assert!(session.invoke_binding("note", BindingKind::Delete, Value::Null));
        assert!(session.bindings().get("note").is_none());
        assert!(session.graph().snapshot().edges.iter().all(|e| !e.touches("note")));
    }

    #[test]
    fn test_connect_rejects_bad_edges() {
        let (mut session, _) = session(true);

        let mut no_handle = FlowEdge::execution("e-x", "start", "end");
        no_handle.target_handle.clear();
        assert!(matches!(session.connect(no_handle), Err(FlowGraphError::InvalidGraph(_))));

        assert!(matches!(
            session.connect(FlowEdge::execution("e-x", "start", "ghost")),
            Err(FlowGraphError::NodeNotFound(_))
        ));
        assert!(matches!(
            session.connect(FlowEdge::execution("e-1", "start", "end")),
            Err(FlowGraphError::InvalidGraph(_))
        ));

        session.connect(FlowEdge::execution("e-x", "start", "end")).unwrap();
        assert_eq!(session.graph().edges().len(), 3);
    }

    #[test]
    fn test_edits_require_permission() {
        let (mut session, sink) = session(false);
        let node = FlowNode::new("n", NodeType::Api, Position::default());
        assert!(matches!(session.add_node(node), Err(FlowGraphError::PermissionDenied { .. })));
        assert!(matches!(session.save(), Err(FlowGraphError::PermissionDenied { .. })));
        assert!(matches!(session.delete_node("end"), Err(FlowGraphError::PermissionDenied { .. })));
        assert_eq!(session.graph().snapshot(), version());
        assert!(sink
            .events()
            .iter()
            .all(|e| matches!(e, GraphEvent::PermissionDenied { .. })));
    }

    #[test]
    fn test_undo_redo() {
        let (mut session, _) = session(true);
        session
            .add_node(FlowNode::new("extra", NodeType::Int, Position::default()))
            .unwrap();
        assert!(session.bindings().get("extra").is_some());

        assert!(session.undo().unwrap());
        assert_eq!(session.graph().snapshot(), version());
        assert!(session.bindings().get("extra").is_none());
        assert!(!session.undo().unwrap());

        assert!(session.redo().unwrap());
        assert!(session.graph().read(|g| g.find_node("extra").is_some()));
    }

    #[test]
    fn test_binding_edits_join_history() {
        let (mut session, _) = session(true);
        let text = |session: &FlowSession| {
            session
                .graph()
                .read(|g| g.find_node("note").and_then(|n| n.attr("text").cloned()))
        };

        assert!(session.invoke_binding("note", BindingKind::TextChange, json!("edited")));
        assert!(session.undo().unwrap());
        assert_eq!(text(&session), Some(json!("hello")));

        // A binding edit after undo drops the redo branch
        session
            .add_node(FlowNode::new("extra", NodeType::Int, Position::default()))
            .unwrap();
        assert!(session.undo().unwrap());
        assert!(session.invoke_binding("note", BindingKind::TextChange, json!("again")));
        assert!(!session.redo().unwrap());
        assert_eq!(text(&session), Some(json!("again")));
        assert!(session.graph().read(|g| g.find_node("extra").is_none()));
    }

    #[test]
    fn test_visualize_does_not_touch_graph() {
        let (mut session, _) = session(true);
        session
            .move_node("end", Position::new(10.0, 20.0))
            .unwrap();
        let before = session.graph().snapshot();

        let result = session.visualize(&TaskDescriptor::new("t1", "emailProcessing"));
        assert!(result.success);
        assert_eq!(result.flow_path, vec!["start", "e-1", "note", "e-2", "end"]);
        assert_eq!(session.graph().snapshot(), before);

        let missing = session.visualize(&TaskDescriptor::new("t2", "unknown"));
        assert!(!missing.success);
        assert!(missing.error.is_some());
    }

    #[test]
    fn test_save_to_store_appends_version() {
        let (mut session, _) = session(true);
        let mut store = FlowStore::new();
        assert_eq!(session.save_to_store(&mut store).unwrap(), 0);

        session.delete_node("note").unwrap();
        assert_eq!(session.save_to_store(&mut store).unwrap(), 1);

        let mut other = FlowSession::new(
            FlowGraphConfig::default(),
            EditPermission::new(true),
            Arc::new(VecEventSink::new()),
        );
        other.load_from_store(&store, "flow", Some(0)).unwrap();
        assert_eq!(other.graph().snapshot(), version());
        other.load_from_store(&store, "flow", None).unwrap();
        assert_eq!(other.graph().nodes().len(), 2);
    }
}
