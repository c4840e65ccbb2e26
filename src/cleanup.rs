//! Best-effort removal of transient job files.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

/// Attempt to delete each path independently.
///
/// A failure to delete one path must not abort deletion of the others and is
/// never raised to the caller; an already-missing file is not a failure, so
/// running the same path list twice is safe.
pub fn cleanup(paths: &[PathBuf]) {
    for path in paths {
        remove_one(path);
    }
}

fn remove_one(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "removed transient file"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), "cleanup failed: {e}"),
    }
}
