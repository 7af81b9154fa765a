//! Event types for propagating graph changes upward
//!
//! Events are sent from the core to the editor (or any consumer) after a
//! change has been committed to the shared graph. A sink may therefore read
//! the shared graph synchronously from inside `send`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{FlowEdge, FlowNode, NodeId};

/// Receiver of graph events
///
/// Implemented by whatever consumes changes (a UI store, a channel, a test
/// collector), so the core does not depend on a particular host.
pub trait EventSink: Send + Sync {
    /// Deliver one event; an error means the consumer is gone
    fn send(&self, event: GraphEvent) -> Result<(), EventError>;
}

/// Why an event could not be delivered
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EventError {
    #[error("event consumer disconnected")]
    Disconnected,
}

/// Events emitted by the graph-maintenance core
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum GraphEvent {
    /// The committed node array changed
    #[serde(rename_all = "camelCase")]
    NodesChanged { nodes: Vec<FlowNode> },

    /// The committed edge array changed
    #[serde(rename_all = "camelCase")]
    EdgesChanged { edges: Vec<FlowEdge> },

    /// Nodes and edges were replaced in one step
    #[serde(rename_all = "camelCase")]
    GraphReplaced {
        nodes: Vec<FlowNode>,
        edges: Vec<FlowEdge>,
    },

    /// The selection cursor moved
    #[serde(rename_all = "camelCase")]
    SelectionChanged { selected: Option<NodeId> },

    /// An edit was attempted without edit rights
    #[serde(rename_all = "camelCase")]
    PermissionDenied { action: String, message: String },

    /// A flow version was committed into the session
    #[serde(rename_all = "camelCase")]
    FlowLoaded {
        flow_id: String,
        version_index: usize,
        node_count: usize,
        edge_count: usize,
    },

    /// A load result arrived after a newer load was started
    #[serde(rename_all = "camelCase")]
    LoadDiscarded { flow_id: String, version_index: usize },

    /// Collapsed sub-flows were expanded
    #[serde(rename_all = "camelCase")]
    Flattened { passes: usize, expanded: Vec<NodeId> },
}

/// Send an event, logging instead of failing when the sink is gone
pub(crate) fn notify(sink: &dyn EventSink, event: GraphEvent) {
    if let Err(e) = sink.send(event) {
        log::warn!("Dropped graph event: {}", e);
    }
}

/// Discards every event
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn send(&self, _event: GraphEvent) -> Result<(), EventError> {
        Ok(())
    }
}

/// Forwards every event to a closure
pub struct FnEventSink<F>(pub F);

impl<F> EventSink for FnEventSink<F>
where
    F: Fn(GraphEvent) + Send + Sync,
{
    fn send(&self, event: GraphEvent) -> Result<(), EventError> {
        (self.0)(event);
        Ok(())
    }
}

/// Records events in arrival order, for assertions
#[derive(Default)]
pub struct VecEventSink {
    received: parking_lot::Mutex<Vec<GraphEvent>>,
}

impl VecEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything received so far
    pub fn events(&self) -> Vec<GraphEvent> {
        self.received.lock().clone()
    }

    pub fn clear(&self) {
        self.received.lock().clear();
    }
}

impl EventSink for VecEventSink {
    fn send(&self, event: GraphEvent) -> Result<(), EventError> {
        self.received.lock().push(event);
        Ok(())
    }
}
