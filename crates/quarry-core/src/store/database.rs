//! SQLite storage layer for Quarry.
//!
//! Each public method opens its own connection, so callers never manage
//! connection lifetime and every read runs against a consistent
//! point-in-time view.  WAL mode lets ranking reads run concurrently with
//! per-file upserts from the reindex workers; SQLite's write lock plus the
//! per-file transaction keeps a half-written chunk set from ever being
//! visible.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};

use crate::errors::QuarryResult;
use crate::models::{Chunk, ChunkKind, FileRecord, ParseDiagnostic, ParseStatus};
use crate::store::schema;

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &str) -> PathBuf {
    if path == "~" || path.starts_with("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            let mut expanded = PathBuf::from(home);
            if path.len() > 2 {
                expanded.push(&path[2..]);
            }
            return expanded;
        }
    }
    PathBuf::from(path)
}

const CHUNK_COLUMNS: &str = "id, file_path, kind, name, qualified_name, signature, docstring, \
     start_line, end_line, parent_id, children, imports, bases, content";

fn json_column(idx: usize, raw: String) -> rusqlite::Result<Vec<String>> {
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Map one row (selected with [`CHUNK_COLUMNS`]) to a `Chunk`.
fn row_to_chunk(row: &rusqlite::Row<'_>) -> rusqlite::Result<Chunk> {
    let kind_raw: String = row.get(2)?;
    let kind = ChunkKind::parse(&kind_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            Type::Text,
            format!("unknown chunk kind: {kind_raw}").into(),
        )
    })?;
    Ok(Chunk {
        id: row.get(0)?,
        file_path: row.get(1)?,
        kind,
        name: row.get(3)?,
        qualified_name: row.get(4)?,
        signature: row.get(5)?,
        docstring: row.get(6)?,
        start_line: row.get(7)?,
        end_line: row.get(8)?,
        parent_id: row.get(9)?,
        children: json_column(10, row.get(10)?)?,
        imports: json_column(11, row.get(11)?)?,
        bases: json_column(12, row.get(12)?)?,
        content: row.get(13)?,
    })
}

fn row_to_file_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<FileRecord> {
    let status_raw: String = row.get(4)?;
    let error_raw: Option<String> = row.get(5)?;
    let parse_status = match status_raw.as_str() {
        "ok" => ParseStatus::Ok,
        _ => {
            let diagnostic: ParseDiagnostic = error_raw
                .as_deref()
                .and_then(|raw| serde_json::from_str(raw).ok())
                .unwrap_or(ParseDiagnostic {
                    line: 1,
                    column: 0,
                    message: "unknown parse failure".to_string(),
                });
            ParseStatus::Error(diagnostic)
        }
    };
    Ok(FileRecord {
        path: row.get(0)?,
        content_hash: row.get(1)?,
        size_bytes: row.get::<_, Option<i64>>(2)?.unwrap_or(0),
        last_indexed_at: row.get(3)?,
        parse_status,
    })
}

// ---------------------------------------------------------------------------
// Database
// ---------------------------------------------------------------------------

/// SQLite chunk store.
///
/// The handle owns only the resolved path; connections are opened per call.
pub struct Database {
    db_path: PathBuf,
}

impl Database {
    /// Create a new `Database`.  The path is expanded and parent directories
    /// are created if they do not already exist.
    pub fn new(db_path: impl AsRef<std::path::Path>) -> QuarryResult<Self> {
        let db_str = db_path.as_ref().to_string_lossy();
        let expanded = expand_tilde(&db_str);
        let resolved = if expanded.is_absolute() {
            expanded
        } else {
            std::env::current_dir()?.join(&expanded)
        };
        if let Some(parent) = resolved.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(Self { db_path: resolved })
    }

    /// Resolved database path.
    pub fn db_path(&self) -> &std::path::Path {
        &self.db_path
    }

    /// Open a new SQLite connection: `foreign_keys` on, bounded busy wait so
    /// concurrent same-path writers serialize instead of failing fast.
    fn connect(&self) -> QuarryResult<Connection> {
        let conn = Connection::open(&self.db_path)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.busy_timeout(Duration::from_millis(5000))?;
        Ok(conn)
    }

    // -----------------------------------------------------------------------
    // Schema / meta
    // -----------------------------------------------------------------------

    /// Initialise the database schema: set WAL mode, create all tables and
    /// indexes, then run pending migrations.
    pub fn init_schema(&self) -> QuarryResult<()> {
        let conn = self.connect()?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;

        for stmt in schema::SCHEMA_STATEMENTS {
            conn.execute_batch(stmt)?;
        }
        schema::migrate_schema(&conn)?;
        Ok(())
    }

    fn get_meta(&self, conn: &Connection, key: &str) -> QuarryResult<Option<String>> {
        let value = conn
            .query_row(
                "SELECT value FROM repo_meta WHERE key = ?1 LIMIT 1;",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set_meta(conn: &Connection, key: &str, value: &str) -> QuarryResult<()> {
        conn.execute(
            "INSERT INTO repo_meta(key, value) VALUES(?1, ?2) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value;",
            params![key, value],
        )?;
        Ok(())
    }

    /// Return the current cache epoch (initialising to 1 if absent).
    ///
    /// The epoch changes whenever a reindex changes stored state, so cached
    /// query responses keyed on it go stale automatically.
    pub fn cache_epoch(&self) -> QuarryResult<i64> {
        let conn = self.connect()?;
        match self.get_meta(&conn, "cache_epoch")? {
            None => {
                Self::set_meta(&conn, "cache_epoch", "1")?;
                Ok(1)
            }
            Some(v) => {
                let parsed = v.parse::<i64>().unwrap_or(1);
                Ok(parsed.max(1))
            }
        }
    }

    /// Increment the cache epoch and return the new value.
    pub fn bump_cache_epoch(&self) -> QuarryResult<i64> {
        let conn = self.connect()?;
        let current = self
            .get_meta(&conn, "cache_epoch")?
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(0);
        let next_epoch = (current + 1).max(1);
        Self::set_meta(&conn, "cache_epoch", &next_epoch.to_string())?;
        Ok(next_epoch)
    }

    // -----------------------------------------------------------------------
    // File / chunk CRUD
    // -----------------------------------------------------------------------

    /// Atomically replace a file's record and its whole chunk set.
    ///
    /// Either the previous state or the new state is visible to readers,
    /// never a mix; a failure leaves the previous state intact.
    pub fn upsert_file(&self, record: &FileRecord, chunks: &[Chunk]) -> QuarryResult<()> {
        let (status, error_json) = match &record.parse_status {
            ParseStatus::Ok => ("ok", None),
            ParseStatus::Error(diag) => ("error", Some(serde_json::to_string(diag)?)),
        };

        let mut conn = self.connect()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        tx.execute(
            "DELETE FROM chunks WHERE file_path = ?1;",
            params![record.path],
        )?;
        tx.execute(
            "INSERT INTO files (path, content_hash, size_bytes, parse_status, parse_error) \
             VALUES (?1, ?2, ?3, ?4, ?5) \
             ON CONFLICT(path) DO UPDATE SET \
                 content_hash = excluded.content_hash, \
                 size_bytes = excluded.size_bytes, \
                 parse_status = excluded.parse_status, \
                 parse_error = excluded.parse_error, \
                 last_indexed_at = CURRENT_TIMESTAMP;",
            params![
                record.path,
                record.content_hash,
                record.size_bytes,
                status,
                error_json
            ],
        )?;

        {
            let mut stmt = tx.prepare(
                "INSERT INTO chunks ( \
                     id, file_path, kind, name, qualified_name, signature, docstring, \
                     start_line, end_line, parent_id, children, imports, bases, content \
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14);",
            )?;
            for chunk in chunks {
                stmt.execute(params![
                    chunk.id,
                    chunk.file_path,
                    chunk.kind.as_str(),
                    chunk.name,
                    chunk.qualified_name,
                    chunk.signature,
                    chunk.docstring,
                    chunk.start_line,
                    chunk.end_line,
                    chunk.parent_id,
                    serde_json::to_string(&chunk.children)?,
                    serde_json::to_string(&chunk.imports)?,
                    serde_json::to_string(&chunk.bases)?,
                    chunk.content,
                ])?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    /// Delete a file record and its chunks.  Returns whether a record existed.
    pub fn remove_file(&self, path: &str) -> QuarryResult<bool> {
        let mut conn = self.connect()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute("DELETE FROM chunks WHERE file_path = ?1;", params![path])?;
        let removed = tx.execute("DELETE FROM files WHERE path = ?1;", params![path])?;
        tx.commit()?;
        Ok(removed > 0)
    }

    pub fn file_record(&self, path: &str) -> QuarryResult<Option<FileRecord>> {
        let conn = self.connect()?;
        let record = conn
            .query_row(
                "SELECT path, content_hash, size_bytes, last_indexed_at, parse_status, parse_error \
                 FROM files WHERE path = ?1;",
                params![path],
                row_to_file_record,
            )
            .optional()?;
        Ok(record)
    }

    /// All stored `path -> content_hash` pairs, used by change detection.
    pub fn file_fingerprints(&self) -> QuarryResult<HashMap<String, String>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare("SELECT path, content_hash FROM files;")?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        let mut fingerprints = HashMap::new();
        for row in rows {
            let (path, hash): (String, String) = row?;
            fingerprints.insert(path, hash);
        }
        Ok(fingerprints)
    }

    pub fn chunk(&self, id: &str) -> QuarryResult<Option<Chunk>> {
        let conn = self.connect()?;
        let sql = format!("SELECT {CHUNK_COLUMNS} FROM chunks WHERE id = ?1;");
        let chunk = conn
            .query_row(&sql, params![id], row_to_chunk)
            .optional()?;
        Ok(chunk)
    }

    /// Chunks of one file in document order: module first, parents before
    /// children, siblings by start line.
    pub fn chunks_by_file(&self, path: &str) -> QuarryResult<Vec<Chunk>> {
        let conn = self.connect()?;
        let sql = format!(
            "SELECT {CHUNK_COLUMNS} FROM chunks WHERE file_path = ?1 \
             ORDER BY start_line ASC, end_line DESC;"
        );
        let mut stmt = conn.prepare(&sql)?;
        let chunks = stmt
            .query_map(params![path], row_to_chunk)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(chunks)
    }

    /// Full snapshot for ranking.  A single statement on a single
    /// connection, so the view is consistent even while reindex workers
    /// commit other files.
    pub fn all_chunks(&self) -> QuarryResult<Vec<Chunk>> {
        let conn = self.connect()?;
        let sql = format!(
            "SELECT {CHUNK_COLUMNS} FROM chunks \
             ORDER BY file_path ASC, start_line ASC, end_line DESC;"
        );
        let mut stmt = conn.prepare(&sql)?;
        let chunks = stmt
            .query_map([], row_to_chunk)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(chunks)
    }

    pub fn chunk_count(&self) -> QuarryResult<i64> {
        let conn = self.connect()?;
        let count = conn.query_row("SELECT COUNT(*) FROM chunks;", [], |row| row.get(0))?;
        Ok(count)
    }

    pub fn file_count(&self) -> QuarryResult<i64> {
        let conn = self.connect()?;
        let count = conn.query_row("SELECT COUNT(*) FROM files;", [], |row| row.get(0))?;
        Ok(count)
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("db_path", &self.db_path)
            .finish()
    }
}
