//! Filesystem scanning helpers for indexing passes.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::errors::QuarryResult;

/// Extension of indexable source files.
pub const SOURCE_EXTENSION: &str = "py";

/// Project-local ignore file, honoured on top of `.gitignore`.
pub const IGNORE_FILE: &str = ".quarryignore";

/// Directories skipped regardless of ignore rules.  Hidden directories
/// (including `.git` and the index's own `.quarry`) are filtered out by the
/// walker already.
const IMPLICIT_IGNORED_DIRS: &[&str] = &["__pycache__", "node_modules"];

/// One file found by the scanner, fingerprinted for change detection.
#[derive(Clone, Debug)]
pub struct ScannedFile {
    /// Relative, `/`-separated path (the FileRecord key).
    pub path: String,
    pub absolute: PathBuf,
    /// SHA-256 hex digest of the raw bytes at scan time.
    pub content_hash: String,
    pub size_bytes: i64,
}

/// SHA-256 hex digest of raw file bytes.
pub fn compute_content_hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Relative `/`-separated form of `path` under `root`.
pub fn relative_path(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

fn is_ignored_dir(name: &str) -> bool {
    IMPLICIT_IGNORED_DIRS.contains(&name)
}

/// Enumerate indexable source files under `root`, honouring `.gitignore`
/// and [`IGNORE_FILE`] rules.  Results are sorted by relative path so
/// downstream passes are deterministic.
pub fn scan_project(root: &Path) -> QuarryResult<Vec<ScannedFile>> {
    let mut files = Vec::new();

    let walker = ignore::WalkBuilder::new(root)
        .require_git(false)
        .add_custom_ignore_filename(IGNORE_FILE)
        .filter_entry(|entry| {
            let name = entry.file_name().to_string_lossy();
            !(entry.file_type().is_some_and(|t| t.is_dir()) && is_ignored_dir(&name))
        })
        .build();

    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(err) => {
                tracing::debug!(error = %err, "skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_some_and(|t| t.is_file()) {
            continue;
        }
        let path = entry.path();
        if path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .as_deref()
            != Some(SOURCE_EXTENSION)
        {
            continue;
        }
        let data = match std::fs::read(path) {
            Ok(d) => d,
            Err(err) => {
                tracing::debug!(path = %path.display(), error = %err, "skipping unreadable file");
                continue;
            }
        };
        files.push(ScannedFile {
            path: relative_path(root, path),
            absolute: path.to_path_buf(),
            content_hash: compute_content_hash(&data),
            size_bytes: data.len() as i64,
        });
    }

    files.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(files)
}
