//! Configuration for the flow graph core
//!
//! Loaded from a JSON file; every field falls back to a default.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Default values
pub mod defaults {
    /// Snapshots kept by the undo history
    pub const UNDO_LIMIT: usize = 100;
    /// Upper bound on sub-flow expansion passes
    pub const MAX_FLATTEN_PASSES: usize = 256;
    /// Ask before deleting a node
    pub const REQUIRE_DELETE_CONFIRMATION: bool = true;
}

/// Settings for an editing session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FlowGraphConfig {
    /// Snapshots kept by the undo history
    pub undo_limit: usize,
    /// Upper bound on sub-flow expansion passes; a cyclic interior stops here
    pub max_flatten_passes: usize,
    /// Ask the confirmation collaborator before deleting a node
    pub require_delete_confirmation: bool,
    /// Directory for flow document persistence
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store_path: Option<PathBuf>,
}

impl Default for FlowGraphConfig {
    fn default() -> Self {
        Self {
            undo_limit: defaults::UNDO_LIMIT,
            max_flatten_passes: defaults::MAX_FLATTEN_PASSES,
            require_delete_confirmation: defaults::REQUIRE_DELETE_CONFIRMATION,
            store_path: None,
        }
    }
}

impl FlowGraphConfig {
    /// Load configuration from a JSON file
    ///
    /// A missing file yields the defaults; a malformed one is an error.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            log::debug!("No config at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        log::info!("Loaded flow graph configuration from {:?}", path);
        Ok(config)
    }

    /// Write configuration to a JSON file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
