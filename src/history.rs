//! Rejection memory
//!
//! Persists fixes the user has declined (and heuristic auto-skips) in
//! `.entfix/rejections.json` under the scanned root, keyed by exact
//! location and content, so they are never offered again.
//!
//! Saves are best-effort: a failed save costs a re-prompt on the next
//! run, so callers log and continue rather than abort. A missing or
//! corrupt store degrades to an empty memory, never a fatal error.

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, error, warn};

/// Per-tree state directory, like a lint cache dir.
pub const STATE_DIR: &str = ".entfix";
const REJECTIONS_FILE: &str = "rejections.json";

/// A fix the user declined, or the tool auto-skipped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RejectedFix {
    pub file: PathBuf,
    pub line: usize,
    pub column: usize,
    pub original: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default)]
    pub auto_skipped: bool,
}

/// Derived key uniquely identifying a candidate across runs. Positions
/// are pre-edit; columns are 0-indexed.
pub fn fix_key(file: &Path, line: usize, column: usize, original: &str) -> String {
    format!("{}:{}:{}:{}", file.display(), line, column, original)
}

/// In-memory view of the persisted rejection store.
pub struct RejectionMemory {
    store_path: PathBuf,
    entries: HashMap<String, RejectedFix>,
}

impl RejectionMemory {
    /// Load the store for a tree root. Missing file means empty memory;
    /// a corrupt file is logged and replaced by empty memory.
    pub fn load(root: &Path) -> Self {
        let store_path = root.join(STATE_DIR).join(REJECTIONS_FILE);
        let entries = match fs::read_to_string(&store_path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(entries) => entries,
                Err(err) => {
                    error!(
                        "rejection store at {} is corrupt ({}), starting empty",
                        store_path.display(),
                        err
                    );
                    HashMap::new()
                }
            },
            Err(_) => HashMap::new(),
        };
        debug!("loaded {} rejection record(s)", entries.len());
        Self { store_path, entries }
    }

    pub fn is_rejected(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Record a declined or auto-skipped fix.
    pub fn reject(
        &mut self,
        file: &Path,
        line: usize,
        column: usize,
        original: &str,
        reason: Option<String>,
        auto_skipped: bool,
    ) {
        let key = fix_key(file, line, column, original);
        self.entries.insert(
            key,
            RejectedFix {
                file: file.to_path_buf(),
                line,
                column,
                original: original.to_string(),
                timestamp: Utc::now(),
                reason,
                auto_skipped,
            },
        );
    }

    /// Persist the store. Atomic write (temp file + rename) under an
    /// exclusive lock so a concurrent entfix cannot interleave.
    pub fn save(&self) -> anyhow::Result<()> {
        let dir = self
            .store_path
            .parent()
            .ok_or_else(|| anyhow::anyhow!("rejection store has no parent directory"))?;
        fs::create_dir_all(dir)?;

        let content = serde_json::to_string_pretty(&self.entries)?;
        let tmp_path = self.store_path.with_extension("json.tmp");
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)?;
        file.try_lock_exclusive()?;
        file.write_all(content.as_bytes())?;
        file.sync_all()?;

        if let Err(err) = fs::rename(&tmp_path, &self.store_path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(err.into());
        }
        Ok(())
    }

    /// Best-effort save, logging instead of propagating.
    pub fn save_quiet(&self) {
        if let Err(err) = self.save() {
            warn!("failed to save rejection store: {}", err);
        }
    }

    /// Delete the persisted store and forget everything in memory.
    pub fn clear(root: &Path) -> anyhow::Result<()> {
        let path = root.join(STATE_DIR).join(REJECTIONS_FILE);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}
