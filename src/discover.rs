//! File discovery
//!
//! Walks the tree for JS/TS/JSX/TSX files, skipping vendored and
//! generated directories plus anything over the size ceiling.

use crate::config::RunMode;
use std::path::{Path, PathBuf};
use tracing::warn;
use walkdir::WalkDir;

const SOURCE_EXTENSIONS: [&str; 6] = ["js", "jsx", "ts", "tsx", "mjs", "cjs"];

/// Check if a path should be ignored
fn is_ignored(path: &Path) -> bool {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");

    let ignored = [
        "node_modules",
        ".git",
        ".svn",
        ".hg",
        "dist",
        "build",
        "target",
        "coverage",
        "__pycache__",
        "vendor",
        ".idea",
        ".vscode",
        crate::history::STATE_DIR,
    ];

    ignored.contains(&name) || name.starts_with('.')
}

fn has_source_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|ext| SOURCE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Collect the source files under `root`, in a stable order. Oversized
/// files are dropped here with a warning so the parser never sees them.
pub fn source_files(root: &Path, mode: &RunMode) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = Vec::new();

    for entry in WalkDir::new(root)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_ignored(e.path()))
        .filter_map(|e| e.ok())
    {
        let path = entry.path();
        if !path.is_file() || !has_source_extension(path) {
            continue;
        }

        match entry.metadata() {
            Ok(meta) if meta.len() > mode.max_file_bytes => {
                warn!(
                    "skipping {} ({} bytes exceeds the {} byte ceiling)",
                    path.display(),
                    meta.len(),
                    mode.max_file_bytes
                );
                continue;
            }
            _ => {}
        }

        files.push(path.to_path_buf());
    }

    files.sort();
    files
}
