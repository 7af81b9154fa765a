//! Edit history of committed graphs
//!
//! Every entry is a whole committed graph, JSON-encoded and zstd-compressed.
//! A session records the graph after each edit and roots the history at the
//! loaded version, so stepping back lands on exactly what was committed.

use std::collections::VecDeque;

use crate::config::defaults;
use crate::error::{FlowGraphError, Result};
use crate::types::FlowGraph;

const COMPRESSION_LEVEL: i32 = 3;

/// One compressed graph state
struct Snapshot(Vec<u8>);

impl Snapshot {
    fn capture(graph: &FlowGraph) -> Result<Self> {
        let json = serde_json::to_vec(graph)?;
        zstd::encode_all(json.as_slice(), COMPRESSION_LEVEL)
            .map(Self)
            .map_err(|e| FlowGraphError::Compression(e.to_string()))
    }

    fn restore(&self) -> Result<FlowGraph> {
        let json = zstd::decode_all(self.0.as_slice())
            .map_err(|e| FlowGraphError::Compression(e.to_string()))?;
        Ok(serde_json::from_slice(&json)?)
    }
}

/// Bounded undo/redo history
pub struct UndoStack {
    entries: VecDeque<Snapshot>,
    /// Index of the entry matching the committed graph
    cursor: usize,
    limit: usize,
}

impl std::fmt::Debug for UndoStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UndoStack")
            .field("entries", &self.entries.len())
            .field("cursor", &self.cursor)
            .field("limit", &self.limit)
            .finish()
    }
}

impl UndoStack {
    /// History holding at most `limit` graphs (never fewer than one)
    pub fn new(limit: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            cursor: 0,
            limit: limit.max(1),
        }
    }

    /// Record a newly committed graph
    ///
    /// Anything that could have been redone is forgotten; the oldest entry
    /// is evicted once the limit is reached.
    pub fn push(&mut self, graph: &FlowGraph) -> Result<()> {
        let snapshot = Snapshot::capture(graph)?;

        if !self.entries.is_empty() {
            self.entries.truncate(self.cursor + 1);
        }
        self.entries.push_back(snapshot);

        if self.entries.len() > self.limit {
            self.entries.pop_front();
        }
        self.cursor = self.entries.len() - 1;
        Ok(())
    }

    /// Step back; `None` when already at the oldest entry
    pub fn undo(&mut self) -> Option<Result<FlowGraph>> {
        if !self.can_undo() {
            return None;
        }
        self.cursor -= 1;
        Some(self.entries[self.cursor].restore())
    }

    /// Step forward; `None` when already at the newest entry
    pub fn redo(&mut self) -> Option<Result<FlowGraph>> {
        if !self.can_redo() {
            return None;
        }
        self.cursor += 1;
        Some(self.entries[self.cursor].restore())
    }

    /// The graph at the cursor
    pub fn current(&self) -> Option<Result<FlowGraph>> {
        self.entries.get(self.cursor).map(Snapshot::restore)
    }

    pub fn can_undo(&self) -> bool {
        self.cursor > 0
    }

    pub fn can_redo(&self) -> bool {
        self.cursor + 1 < self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.cursor = 0;
    }

    /// Drop all history and root it at `graph`
    pub fn reset(&mut self, graph: &FlowGraph) -> Result<()> {
        self.clear();
        self.push(graph)
    }

    /// Bytes held by all compressed entries
    pub fn compressed_size(&self) -> usize {
        self.entries.iter().map(|s| s.0.len()).sum()
    }
}

impl Default for UndoStack {
    fn default() -> Self {
        Self::new(defaults::UNDO_LIMIT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FlowEdge, FlowNode, NodeType, Position};
    use serde_json::json;

    fn labelled(label: &str) -> FlowGraph {
        FlowGraph::new(
            vec![FlowNode::new("note", NodeType::Text, Position::default())
                .with_data(json!({ "text": label }))],
            vec![],
        )
    }

    fn label(entry: Option<Result<FlowGraph>>) -> String {
        let graph = entry.unwrap().unwrap();
        graph.nodes[0].attr("text").unwrap().as_str().unwrap().to_string()
    }

    #[test]
    fn test_walk_back_and_forth() {
        let mut history = UndoStack::new(10);
        for text in ["a", "b", "c"] {
            history.push(&labelled(text)).unwrap();
        }

        assert_eq!(label(history.current()), "c");
        assert_eq!(label(history.undo()), "b");
        assert_eq!(label(history.undo()), "a");
        assert!(history.undo().is_none());

        assert_eq!(label(history.redo()), "b");
        assert_eq!(label(history.redo()), "c");
        assert!(history.redo().is_none());
    }

    #[test]
    fn test_new_edit_discards_redo() {
        let mut history = UndoStack::new(10);
        history.push(&labelled("a")).unwrap();
        history.push(&labelled("b")).unwrap();
        history.undo();

        history.push(&labelled("z")).unwrap();
        assert!(!history.can_redo());
        assert_eq!(history.len(), 2);
        assert_eq!(label(history.undo()), "a");
    }

    #[test]
    fn test_oldest_entries_are_evicted() {
        let mut history = UndoStack::new(3);
        for i in 0..5 {
            history.push(&labelled(&i.to_string())).unwrap();
        }

        assert_eq!(history.len(), 3);
        assert_eq!(label(history.current()), "4");
        history.undo();
        assert_eq!(label(history.undo()), "2");
        assert!(!history.can_undo());
    }

    #[test]
    fn test_reset_roots_history() {
        let mut history = UndoStack::default();
        history.push(&labelled("old")).unwrap();
        history.push(&labelled("older")).unwrap();

        history.reset(&labelled("loaded")).unwrap();
        assert_eq!(history.len(), 1);
        assert!(!history.can_undo());
        assert_eq!(label(history.current()), "loaded");
    }

    #[test]
    fn test_snapshot_keeps_edges() {
        let mut graph = labelled("wired");
        graph.edges.push(FlowEdge::execution("e1", "note", "note"));

        let mut history = UndoStack::default();
        assert!(history.current().is_none());
        history.push(&graph).unwrap();
        assert!(history.compressed_size() > 0);
        assert_eq!(history.current().unwrap().unwrap(), graph);
    }
}
