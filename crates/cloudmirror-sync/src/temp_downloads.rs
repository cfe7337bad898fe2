//! Staging directory for in-flight downloads
//!
//! Each download is written to `<dir>/<correlation id>` and renamed into place
//! once complete. The registry remembers which correlation ids are live so a
//! sweep can tell leftovers of a crashed process from files still being written.

use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use cloudmirror_core::domain::CorrelationId;
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
struct RegistryState {
    live: HashSet<CorrelationId>,
    initialized: bool,
}

/// Live staging files plus the one-time sweep flag
#[derive(Debug)]
pub struct TempDownloadRegistry {
    dir: PathBuf,
    state: Mutex<RegistryState>,
}

impl TempDownloadRegistry {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            state: Mutex::new(RegistryState::default()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn state(&self) -> std::sync::MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Creates the staging directory on first call
    ///
    /// If the directory already existed, any file named after a correlation id
    /// that is not live is removed. Returns the number of files removed. Later
    /// calls do nothing once a call has succeeded.
    pub fn ensure_initialized(&self) -> io::Result<usize> {
        let mut state = self.state();
        if state.initialized {
            return Ok(0);
        }

        let existed = self.dir.is_dir();
        std::fs::create_dir_all(&self.dir)?;

        let mut removed = 0;
        if existed {
            for entry in std::fs::read_dir(&self.dir)? {
                let entry = entry?;
                let name = entry.file_name();
                let Some(id) = name.to_str().and_then(|n| n.parse::<CorrelationId>().ok()) else {
                    continue;
                };
                if state.live.contains(&id) || !entry.file_type()?.is_file() {
                    continue;
                }
                match std::fs::remove_file(entry.path()) {
                    Ok(()) => removed += 1,
                    Err(e) => warn!(
                        path = %entry.path().display(),
                        error = %e,
                        "Failed to remove stale staging file"
                    ),
                }
            }
            if removed > 0 {
                info!(removed, dir = %self.dir.display(), "Swept stale staging files");
            }
        }

        state.initialized = true;
        Ok(removed)
    }

    /// Allocates a fresh staging file name and marks it live
    pub fn register(&self) -> (CorrelationId, PathBuf) {
        let id = CorrelationId::new();
        self.state().live.insert(id);
        let path = self.path_for(&id);
        debug!(correlation_id = %id, path = %path.display(), "Registered staging file");
        (id, path)
    }

    pub fn release(&self, id: &CorrelationId) {
        self.state().live.remove(id);
    }

    pub fn is_live(&self, id: &CorrelationId) -> bool {
        self.state().live.contains(id)
    }

    pub fn live_count(&self) -> usize {
        self.state().live.len()
    }

    pub fn path_for(&self, id: &CorrelationId) -> PathBuf {
        self.dir.join(id.to_string())
    }
}
