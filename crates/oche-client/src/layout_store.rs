//! Panel layout persistence.
//!
//! The layout is stored as JSON. A stored layout is only accepted if it
//! passes [`GridLayout::validate`]; anything else is treated as corrupt and
//! reported, leaving the caller on its current layout.

use std::path::{Path, PathBuf};

use oche_core::{CoreError, GridLayout};
use tracing::{debug, info};

use crate::error::ClientError;

/// JSON file holding the panel layout.
#[derive(Debug, Clone)]
pub struct LayoutStore {
    path: PathBuf,
}

impl LayoutStore {
    /// Store backed by `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the stored layout. `Ok(None)` if nothing was saved yet.
    pub fn load(&self) -> Result<Option<GridLayout>, ClientError> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no saved layout");
                return Ok(None);
            },
            Err(e) => return Err(e.into()),
        };

        let layout: GridLayout = serde_json::from_str(&text)?;
        layout.validate().map_err(CoreError::from)?;
        info!(path = %self.path.display(), "loaded saved layout");
        Ok(Some(layout))
    }

    /// Save `layout`, replacing whatever was stored.
    pub fn save(&self, layout: &GridLayout) -> Result<(), ClientError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let text = serde_json::to_string_pretty(layout)?;
        std::fs::write(&self.path, text)?;
        debug!(path = %self.path.display(), "saved layout");
        Ok(())
    }
}
