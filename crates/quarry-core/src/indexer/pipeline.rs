//! Indexing pipeline orchestration with Rayon-based parallelism.
//!
//! The write path: scan the project, fingerprint-diff against stored
//! FileRecords, parse + extract the stale files in a bounded worker pool,
//! and finish each file's unit of work with one atomic store upsert.
//! Cross-file ordering is irrelevant; a run interrupted between files
//! leaves completed files durably indexed.

use std::collections::HashSet;
use std::path::Path;
use std::time::{Duration, Instant};

use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::errors::{QuarryError, QuarryResult};
use crate::indexer::chunks::extract_chunks;
use crate::indexer::filesystem::{compute_content_hash, scan_project, ScannedFile};
use crate::indexer::parser::parse_source;
use crate::models::{Chunk, FileFailure, FileRecord, ParseDiagnostic, ParseStatus, ReindexReport};
use crate::store::Database;

const UPSERT_ATTEMPTS: u64 = 3;

enum WorkOutcome {
    Indexed,
    ParseFailed(ParseDiagnostic),
    StoreFailed(QuarryError),
}

/// Parse + extract one file's bytes into its FileRecord and chunk set.
/// Parse failures produce an error-status record with an empty chunk set,
/// so re-indexing a now-broken file clears its stale chunks.
fn index_payload(path: &str, bytes: &[u8]) -> (FileRecord, Vec<Chunk>) {
    let content_hash = compute_content_hash(bytes);
    let size_bytes = bytes.len() as i64;
    let record = |parse_status| FileRecord {
        path: path.to_string(),
        content_hash: content_hash.clone(),
        size_bytes,
        last_indexed_at: None,
        parse_status,
    };

    let source = match std::str::from_utf8(bytes) {
        Ok(s) => s,
        Err(_) => {
            let diagnostic = ParseDiagnostic {
                line: 1,
                column: 0,
                message: "file is not valid UTF-8".to_string(),
            };
            return (record(ParseStatus::Error(diagnostic)), Vec::new());
        }
    };

    match parse_source(source) {
        Ok(tree) => {
            let chunks = extract_chunks(&tree, source, path);
            (record(ParseStatus::Ok), chunks)
        }
        Err(diagnostic) => (record(ParseStatus::Error(diagnostic)), Vec::new()),
    }
}

fn upsert_with_retry(db: &Database, record: &FileRecord, chunks: &[Chunk]) -> QuarryResult<()> {
    let mut attempt = 0u64;
    loop {
        match db.upsert_file(record, chunks) {
            Ok(()) => return Ok(()),
            Err(QuarryError::StoreUnavailable(err)) if attempt + 1 < UPSERT_ATTEMPTS => {
                attempt += 1;
                warn!(path = %record.path, error = %err, attempt, "store busy, retrying upsert");
                std::thread::sleep(Duration::from_millis(50 * attempt));
            }
            Err(err) => return Err(err),
        }
    }
}

fn index_file(db: &Database, file: &ScannedFile) -> WorkOutcome {
    let bytes = match std::fs::read(&file.absolute) {
        Ok(b) => b,
        // Vanished or unreadable since the scan: a per-file failure, the
        // stored state stays as-is and the next run retries.
        Err(err) => {
            return WorkOutcome::ParseFailed(ParseDiagnostic {
                line: 1,
                column: 0,
                message: format!("failed to read file: {err}"),
            })
        }
    };
    let (record, chunks) = index_payload(&file.path, &bytes);
    let parse_status = record.parse_status.clone();
    if let Err(err) = upsert_with_retry(db, &record, &chunks) {
        return WorkOutcome::StoreFailed(err);
    }
    match parse_status {
        ParseStatus::Ok => {
            debug!(path = %file.path, chunks = chunks.len(), "indexed");
            WorkOutcome::Indexed
        }
        ParseStatus::Error(diagnostic) => {
            warn!(path = %file.path, %diagnostic, "parse failed");
            WorkOutcome::ParseFailed(diagnostic)
        }
    }
}

/// Full scan–detect–extract–store cycle over a project.
///
/// `workers == 0` uses Rayon's default pool size.  Unchanged files are
/// never re-extracted; stored files missing from the scan are removed.
pub fn reindex(db: &Database, root: &Path, workers: usize) -> QuarryResult<ReindexReport> {
    let started = Instant::now();

    let scanned = scan_project(root)?;
    let files_seen = scanned.len() as i64;

    let stored = db.file_fingerprints()?;
    let scanned_paths: HashSet<&str> = scanned.iter().map(|f| f.path.as_str()).collect();
    let removed_paths: Vec<String> = stored
        .keys()
        .filter(|path| !scanned_paths.contains(path.as_str()))
        .cloned()
        .collect();
    let stale: Vec<&ScannedFile> = scanned
        .iter()
        .filter(|f| stored.get(&f.path) != Some(&f.content_hash))
        .collect();
    let files_skipped = files_seen - stale.len() as i64;

    let pool = rayon::ThreadPoolBuilder::new().num_threads(workers).build();
    let outcomes: Vec<(String, WorkOutcome)> = match pool {
        Ok(pool) => pool.install(|| {
            stale
                .par_iter()
                .map(|f| (f.path.clone(), index_file(db, f)))
                .collect()
        }),
        // Fallback to sequential
        Err(_) => stale
            .iter()
            .map(|f| (f.path.clone(), index_file(db, f)))
            .collect(),
    };

    let mut files_indexed = 0i64;
    let mut files_failed = Vec::new();
    for (path, outcome) in outcomes {
        match outcome {
            WorkOutcome::Indexed => files_indexed += 1,
            WorkOutcome::ParseFailed(diagnostic) => {
                files_failed.push(FileFailure { path, diagnostic })
            }
            WorkOutcome::StoreFailed(err) => return Err(err),
        }
    }

    let mut files_removed = 0i64;
    for path in &removed_paths {
        if db.remove_file(path)? {
            debug!(path = %path, "removed from index");
            files_removed += 1;
        }
    }

    if files_indexed > 0 || files_removed > 0 || !files_failed.is_empty() {
        db.bump_cache_epoch()?;
    }

    let report = ReindexReport {
        files_seen,
        files_indexed,
        files_removed,
        files_skipped,
        files_failed,
        elapsed_ms: started.elapsed().as_millis() as i64,
    };
    info!(
        files_seen = report.files_seen,
        files_indexed = report.files_indexed,
        files_removed = report.files_removed,
        files_skipped = report.files_skipped,
        files_failed = report.files_failed.len(),
        elapsed_ms = report.elapsed_ms,
        "reindex complete"
    );
    Ok(report)
}

/// Reindex a single file if its fingerprint is stale.  Returns whether a
/// re-extraction happened.  A path that has disappeared from disk is
/// dropped from the store and reported as not found.
pub fn reindex_file(db: &Database, root: &Path, rel_path: &str) -> QuarryResult<bool> {
    let absolute = root.join(rel_path);
    if !absolute.is_file() {
        let existed = db.remove_file(rel_path)?;
        if existed {
            db.bump_cache_epoch()?;
        }
        return Err(QuarryError::FileNotFound(rel_path.to_string()));
    }

    let bytes = std::fs::read(&absolute)?;
    let content_hash = compute_content_hash(&bytes);
    if let Some(stored) = db.file_record(rel_path)? {
        if stored.content_hash == content_hash {
            return Ok(false);
        }
    }

    let (record, chunks) = index_payload(rel_path, &bytes);
    upsert_with_retry(db, &record, &chunks)?;
    db.bump_cache_epoch()?;
    debug!(path = rel_path, chunks = chunks.len(), "reindexed single file");
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn fixture() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join(".quarry").join("index.db")).unwrap();
        db.init_schema().unwrap();
        (dir, db)
    }

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn indexes_project_and_reports() {
        let (dir, db) = fixture();
        write(dir.path(), "main.py", "def add(a, b):\n    return a + b\n");
        write(dir.path(), "util.py", "import os\n\ndef helper():\n    pass\n");

        let report = reindex(&db, dir.path(), 2).unwrap();
        assert_eq!(report.files_seen, 2);
        assert_eq!(report.files_indexed, 2);
        assert_eq!(report.files_removed, 0);
        assert!(report.files_failed.is_empty());

        let chunks = db.chunks_by_file("main.py").unwrap();
        assert_eq!(chunks.len(), 2);
    }

    #[test]
    fn broken_file_reported_other_files_index() {
        let (dir, db) = fixture();
        write(dir.path(), "good.py", "def ok():\n    pass\n");
        write(dir.path(), "broken.py", "def broken(:\n    pass\n");

        let report = reindex(&db, dir.path(), 1).unwrap();
        assert_eq!(report.files_indexed, 1);
        assert_eq!(report.files_failed.len(), 1);
        assert_eq!(report.files_failed[0].path, "broken.py");
        assert!(!report.files_failed[0].diagnostic.message.is_empty());

        // Store retains zero chunks for the broken path.
        assert!(db.chunks_by_file("broken.py").unwrap().is_empty());
        assert_eq!(db.chunks_by_file("good.py").unwrap().len(), 2);

        // The failure is recorded on the FileRecord.
        let record = db.file_record("broken.py").unwrap().unwrap();
        assert!(!record.parse_status.is_ok());
    }

    #[test]
    fn second_pass_is_idempotent_and_skips_all() {
        let (dir, db) = fixture();
        write(dir.path(), "a.py", "def f():\n    pass\n");
        write(dir.path(), "b.py", "def g():\n    pass\n");

        reindex(&db, dir.path(), 1).unwrap();
        let snapshot_a: BTreeMap<String, Chunk> = db
            .all_chunks()
            .unwrap()
            .into_iter()
            .map(|c| (c.id.clone(), c))
            .collect();
        let epoch = db.cache_epoch().unwrap();

        let report = reindex(&db, dir.path(), 1).unwrap();
        assert_eq!(report.files_indexed, 0);
        assert_eq!(report.files_skipped, 2);

        let snapshot_b: BTreeMap<String, Chunk> = db
            .all_chunks()
            .unwrap()
            .into_iter()
            .map(|c| (c.id.clone(), c))
            .collect();
        assert_eq!(snapshot_a, snapshot_b);
        // Nothing changed, so cached responses stay valid.
        assert_eq!(db.cache_epoch().unwrap(), epoch);
    }

    #[test]
    fn deletion_propagates() {
        let (dir, db) = fixture();
        write(dir.path(), "gone.py", "def f():\n    pass\n");
        write(dir.path(), "stays.py", "def g():\n    pass\n");
        reindex(&db, dir.path(), 1).unwrap();

        std::fs::remove_file(dir.path().join("gone.py")).unwrap();
        let report = reindex(&db, dir.path(), 1).unwrap();
        assert_eq!(report.files_removed, 1);

        assert!(db.file_record("gone.py").unwrap().is_none());
        assert!(db.chunks_by_file("gone.py").unwrap().is_empty());
        assert!(db
            .all_chunks()
            .unwrap()
            .iter()
            .all(|c| c.file_path != "gone.py"));
    }

    #[test]
    fn editing_one_file_leaves_other_identities_untouched() {
        let (dir, db) = fixture();
        write(
            dir.path(),
            "main.py",
            "def add(a, b):\n    \"\"\"Adds two numbers\"\"\"\n    return a + b\n",
        );
        write(dir.path(), "other.py", "def unrelated():\n    pass\n");
        reindex(&db, dir.path(), 1).unwrap();

        let other_before = db.chunks_by_file("other.py").unwrap();
        let main_hash_before = db.file_record("main.py").unwrap().unwrap().content_hash;

        write(
            dir.path(),
            "main.py",
            "def add(a, b):\n    \"\"\"Sums two values\"\"\"\n    return a + b\n",
        );
        let report = reindex(&db, dir.path(), 1).unwrap();
        assert_eq!(report.files_indexed, 1);
        assert_eq!(report.files_skipped, 1);

        let main_record = db.file_record("main.py").unwrap().unwrap();
        assert_ne!(main_record.content_hash, main_hash_before);

        let add = db
            .chunks_by_file("main.py")
            .unwrap()
            .into_iter()
            .find(|c| c.qualified_name == "add")
            .unwrap();
        assert_eq!(add.docstring.as_deref(), Some("Sums two values"));

        let other_after = db.chunks_by_file("other.py").unwrap();
        assert_eq!(other_before, other_after);
    }

    #[test]
    fn renaming_unrelated_file_keeps_identities_stable() {
        let (dir, db) = fixture();
        write(dir.path(), "keep.py", "def kept():\n    pass\n");
        write(dir.path(), "old.py", "def moved():\n    pass\n");
        reindex(&db, dir.path(), 1).unwrap();

        let keep_ids: Vec<String> = db
            .chunks_by_file("keep.py")
            .unwrap()
            .into_iter()
            .map(|c| c.id)
            .collect();

        std::fs::rename(dir.path().join("old.py"), dir.path().join("new.py")).unwrap();
        let report = reindex(&db, dir.path(), 1).unwrap();
        assert_eq!(report.files_removed, 1);
        assert_eq!(report.files_indexed, 1);

        let keep_ids_after: Vec<String> = db
            .chunks_by_file("keep.py")
            .unwrap()
            .into_iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(keep_ids, keep_ids_after);
        assert!(db.chunks_by_file("old.py").unwrap().is_empty());
    }

    #[test]
    fn single_file_reindex_detects_staleness() {
        let (dir, db) = fixture();
        write(dir.path(), "one.py", "def f():\n    pass\n");

        assert!(reindex_file(&db, dir.path(), "one.py").unwrap());
        assert!(!reindex_file(&db, dir.path(), "one.py").unwrap());

        write(dir.path(), "one.py", "def f():\n    return 1\n");
        assert!(reindex_file(&db, dir.path(), "one.py").unwrap());
    }

    #[test]
    fn single_file_reindex_on_missing_path() {
        let (dir, db) = fixture();
        write(dir.path(), "one.py", "def f():\n    pass\n");
        reindex(&db, dir.path(), 1).unwrap();

        std::fs::remove_file(dir.path().join("one.py")).unwrap();
        let err = reindex_file(&db, dir.path(), "one.py").unwrap_err();
        assert!(matches!(err, QuarryError::FileNotFound(_)));
        assert!(db.file_record("one.py").unwrap().is_none());
    }

    #[test]
    fn fixing_a_broken_file_restores_chunks() {
        let (dir, db) = fixture();
        write(dir.path(), "flaky.py", "def broken(:\n");
        let report = reindex(&db, dir.path(), 1).unwrap();
        assert_eq!(report.files_failed.len(), 1);

        write(dir.path(), "flaky.py", "def fixed():\n    pass\n");
        let report = reindex(&db, dir.path(), 1).unwrap();
        assert!(report.files_failed.is_empty());
        assert_eq!(report.files_indexed, 1);
        assert_eq!(db.chunks_by_file("flaky.py").unwrap().len(), 2);
    }
}
