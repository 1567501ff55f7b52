//! Local workspace preparation.

use fleet_core::Result;
use std::path::Path;
use tracing::{debug, info};

/// Make sure `dir` exists and, when `purge` is set, empty it.
///
/// Returns the number of entries removed.
pub fn prepare_workspace(dir: &Path, purge: bool) -> Result<usize> {
    std::fs::create_dir_all(dir)?;
    if !purge {
        return Ok(0);
    }

    let mut removed = 0;
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            std::fs::remove_dir_all(&path)?;
        } else {
            std::fs::remove_file(&path)?;
        }
        debug!(path = %path.display(), "Removed stale workspace entry");
        removed += 1;
    }

    if removed > 0 {
        info!(dir = %dir.display(), removed, "Workspace purged");
    }
    Ok(removed)
}
