//! Flow Graph - graph maintenance core for visual workflows
//!
//! This crate keeps a flow diagram consistent while it is edited and turns
//! it into something an execution backend can run. It supports:
//!
//! - Rehydration of per-node bindings after a flow version is loaded
//! - Permission-gated selection and deletion with cascading edge cleanup
//! - Flattening of collapsed (possibly nested) sub-flow nodes
//! - Deterministic execution-path resolution for a task
//! - Compressed snapshot-based undo/redo
//!
//! # Architecture
//!
//! - `SharedGraph`: the committed node and edge arrays behind one lock
//! - `CallbackRehydrator`: rebuilds the binding side-table on load
//! - `SelectionController`: selection cursor and atomic deletion
//! - `SubFlowFlattener`: fixed-point sub-flow expansion
//! - `ExecutionPathResolver`: starting node lookup and depth-first path
//! - `FlowSession`: ties the above together for one loaded flow version
//! - `EventSink`: upward change notification (not tied to any UI)
//!
//! # Example
//!
//! ```ignore
//! use flow_graph::{FlowSession, FlowGraphConfig, EditPermission, NullEventSink, TaskDescriptor};
//!
//! let mut session = FlowSession::new(FlowGraphConfig::default(), EditPermission::new(true), Arc::new(NullEventSink));
//! let ticket = session.begin_load("invoice-intake", 0);
//! session.commit_load(&ticket, version);
//! let result = session.visualize(&TaskDescriptor::new("task-1", "emailProcessing"));
//! ```

pub mod bindings;
pub mod builder;
pub mod config;
pub mod error;
pub mod events;
pub mod flatten;
pub mod resolver;
pub mod selection;
pub mod session;
pub mod shared;
pub mod store;
pub mod submit;
pub mod types;
pub mod undo;
pub mod validation;

// Re-export key types
pub use bindings::{BindingKind, BindingTable, CallbackRehydrator, SubFlowHandler};
pub use builder::FlowBuilder;
pub use config::FlowGraphConfig;
pub use error::{FlowGraphError, Result};
pub use events::{EventSink, GraphEvent, NullEventSink, VecEventSink};
pub use flatten::{flatten, ExternalOriginals, FlattenOutcome, SubFlowFlattener};
pub use resolver::{ExecutionPathResolver, TaskDescriptor, VisualizationResult};
pub use selection::{ConfirmDelete, DeleteOutcome, EditPermission, SelectionController};
pub use session::{FlowSession, LoadTicket};
pub use shared::SharedGraph;
pub use store::{FlowDocument, FlowStore, FlowVersion};
pub use submit::{prepare_submission, ExecutionBackend, ExecutionResponse, ExecutionSubmission};
pub use types::{FlowEdge, FlowGraph, FlowNode, NodeType, Position};
pub use undo::UndoStack;
pub use validation::{validate_flow, ValidationError};
