//! Flow document storage with file persistence.
//!
//! A flow document holds every saved version of one flow. Versions are kept
//! exactly as saved, collapsed sub-flows included; flattening happens only
//! when a version is visualized or dispatched.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{FlowGraphError, Result};
use crate::types::FlowGraph;

/// One saved version of a flow
pub type FlowVersion = FlowGraph;

/// A persisted flow with its version history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowDocument {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub versions: Vec<FlowVersion>,
    #[serde(default)]
    pub current_version_index: usize,
}

impl FlowDocument {
    /// Create a document with a single version
    pub fn new(id: impl Into<String>, name: impl Into<String>, version: FlowVersion) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            versions: vec![version],
            current_version_index: 0,
        }
    }

    /// Parse a stored flow
    ///
    /// An object with `versions` must be a complete document. An object with
    /// `nodes` and no `versions` is a bare graph and becomes a single-version
    /// document named after `fallback_id`. Anything else is rejected.
    pub fn from_json(fallback_id: &str, json: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(json)?;

        if value.get("versions").is_some() {
            return Ok(serde_json::from_value(value)?);
        }
        if value.get("nodes").is_none() {
            return Err(FlowGraphError::invalid(format!(
                "flow '{}' has neither versions nor nodes",
                fallback_id
            )));
        }

        let graph: FlowGraph = serde_json::from_value(value)?;
        Ok(Self::new(fallback_id, fallback_id, graph))
    }

    /// The version at `index`
    pub fn version(&self, index: usize) -> Result<&FlowVersion> {
        self.versions
            .get(index)
            .ok_or_else(|| FlowGraphError::VersionNotFound {
                flow_id: self.id.clone(),
                index,
            })
    }

    /// The version marked current
    pub fn current_version(&self) -> Result<&FlowVersion> {
        self.version(self.current_version_index)
    }

    /// Append a version and make it current; returns its index
    pub fn push_version(&mut self, version: FlowVersion) -> usize {
        self.versions.push(version);
        self.current_version_index = self.versions.len() - 1;
        self.current_version_index
    }
}

/// Metadata for a flow document (for listing).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowMetadata {
    pub id: String,
    pub name: String,
    pub version_count: usize,
    pub current_version_index: usize,
}

/// In-memory flow store with optional file persistence.
///
/// Each document is stored as `<id>.json` in the persistence directory.
///
/// # Example
///
/// ```ignore
/// let mut store = FlowStore::with_persistence(".flows");
/// let count = store.load_from_disk()?;
/// let graph = store.load_version("invoice-intake", None)?;
/// ```
#[derive(Debug, Default)]
pub struct FlowStore {
    documents: HashMap<String, FlowDocument>,
    persist_path: Option<PathBuf>,
}

impl FlowStore {
    /// Create a new in-memory store without persistence.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store that persists to the given directory.
    ///
    /// The directory will be created if it doesn't exist when saving.
    pub fn with_persistence(path: impl AsRef<Path>) -> Self {
        Self {
            documents: HashMap::new(),
            persist_path: Some(path.as_ref().to_path_buf()),
        }
    }

    /// Load all flow documents from the persistence directory.
    ///
    /// Files that fail to parse are skipped with a warning. Returns the
    /// number of documents loaded.
    pub fn load_from_disk(&mut self) -> Result<usize> {
        let Some(ref path) = self.persist_path else {
            return Ok(0);
        };

        if !path.exists() {
            return Ok(0);
        }

        let mut count = 0;
        for entry in std::fs::read_dir(path)? {
            let file_path = entry?.path();
            if file_path.extension().map_or(true, |e| e != "json") {
                continue;
            }

            let stem = file_path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or_default()
                .to_string();
            let content = std::fs::read_to_string(&file_path)?;
            match FlowDocument::from_json(&stem, &content) {
                Ok(doc) => {
                    log::info!(
                        "Loaded flow '{}' ({} version(s)) from {:?}",
                        doc.id,
                        doc.versions.len(),
                        file_path
                    );
                    self.documents.insert(doc.id.clone(), doc);
                    count += 1;
                }
                Err(e) => {
                    log::warn!("Failed to parse flow from {:?}: {}", file_path, e);
                }
            }
        }
        Ok(count)
    }

    /// Read a single flow file without adding it to a store
    pub fn read_file(path: impl AsRef<Path>) -> Result<FlowDocument> {
        let path = path.as_ref();
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("flow")
            .to_string();
        let content = std::fs::read_to_string(path)?;
        FlowDocument::from_json(&stem, &content)
    }

    fn save_to_disk(&self, doc: &FlowDocument) -> Result<()> {
        let Some(ref path) = self.persist_path else {
            return Ok(());
        };

        std::fs::create_dir_all(path)?;
        let file_path = path.join(format!("{}.json", &doc.id));
        let content = serde_json::to_string_pretty(doc)?;
        std::fs::write(&file_path, content)?;
        log::debug!("Saved flow '{}' to {:?}", doc.id, file_path);
        Ok(())
    }

    fn delete_from_disk(&self, id: &str) -> Result<()> {
        let Some(ref path) = self.persist_path else {
            return Ok(());
        };

        let file_path = path.join(format!("{}.json", id));
        if file_path.exists() {
            std::fs::remove_file(&file_path)?;
            log::debug!("Deleted flow '{}' from {:?}", id, file_path);
        }
        Ok(())
    }

    /// Get a flow document by ID.
    pub fn get(&self, id: &str) -> Option<&FlowDocument> {
        self.documents.get(id)
    }

    /// Insert or replace a flow document, persisting it when enabled.
    pub fn insert(&mut self, doc: FlowDocument) -> Result<()> {
        self.save_to_disk(&doc)?;
        self.documents.insert(doc.id.clone(), doc);
        Ok(())
    }

    /// Remove a flow document by ID.
    pub fn remove(&mut self, id: &str) -> Result<Option<FlowDocument>> {
        self.delete_from_disk(id)?;
        Ok(self.documents.remove(id))
    }

    /// Append a new version to a stored flow and make it current.
    pub fn save_version(&mut self, id: &str, version: FlowVersion) -> Result<usize> {
        let doc = self
            .documents
            .get_mut(id)
            .ok_or_else(|| FlowGraphError::FlowNotFound(id.to_string()))?;
        let index = doc.push_version(version);
        let doc = doc.clone();
        self.save_to_disk(&doc)?;
        Ok(index)
    }

    /// Clone a version of a stored flow; `None` selects the current one.
    pub fn load_version(&self, id: &str, index: Option<usize>) -> Result<FlowVersion> {
        let doc = self
            .get(id)
            .ok_or_else(|| FlowGraphError::FlowNotFound(id.to_string()))?;
        let version = match index {
            Some(index) => doc.version(index)?,
            None => doc.current_version()?,
        };
        Ok(version.clone())
    }

    /// List all flow documents, sorted by ID.
    pub fn list(&self) -> Vec<FlowMetadata> {
        let mut list: Vec<FlowMetadata> = self
            .documents
            .values()
            .map(|d| FlowMetadata {
                id: d.id.clone(),
                name: d.name.clone(),
                version_count: d.versions.len(),
                current_version_index: d.current_version_index,
            })
            .collect();
        list.sort_by(|a, b| a.id.cmp(&b.id));
        list
    }

    /// Check if a flow exists.
    pub fn contains(&self, id: &str) -> bool {
        self.documents.contains_key(id)
    }
}
