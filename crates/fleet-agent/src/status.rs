//! Local status marker for operators and provisioning scripts.

use std::path::{Path, PathBuf};
use tracing::warn;

/// Writes the current lifecycle marker (`init`, `connected`,
/// `error-rejected`, ...) to a file. Write failures are logged and ignored.
#[derive(Debug, Clone, Default)]
pub struct StatusMarker {
    path: Option<PathBuf>,
}

impl StatusMarker {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }

    /// Replace the file contents with `marker`.
    pub fn record(&self, marker: &str) {
        let Some(path) = &self.path else {
            return;
        };
        if let Err(e) = write_atomic(path, marker) {
            warn!(path = %path.display(), marker, error = %e, "Failed to write status marker");
        }
    }
}

fn write_atomic(path: &Path, marker: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, format!("{}\n", marker))?;
    std::fs::rename(&tmp, path)
}
