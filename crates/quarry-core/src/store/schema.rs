//! SQLite schema DDL and migration framework.

use rusqlite::Connection;

use crate::errors::QuarryResult;

/// Current schema version. Migrations run from whatever the DB currently
/// reports up to this value.
pub const SCHEMA_VERSION: i32 = 3;

/// Core DDL statements: 4 CREATE TABLE + 5 CREATE INDEX.
///
/// Executed with `CREATE … IF NOT EXISTS` so they are safe to replay on an
/// already-initialised database.
pub const SCHEMA_STATEMENTS: &[&str] = &[
    // ── tables (4) ──────────────────────────────────────────────────────
    "CREATE TABLE IF NOT EXISTS repo_meta (
        key TEXT PRIMARY KEY,
        value TEXT
    );",
    "CREATE TABLE IF NOT EXISTS files (
        path TEXT PRIMARY KEY,
        content_hash TEXT NOT NULL,
        size_bytes INTEGER,
        last_indexed_at TEXT DEFAULT CURRENT_TIMESTAMP,
        parse_status TEXT NOT NULL DEFAULT 'ok',
        parse_error TEXT
    );",
    "CREATE TABLE IF NOT EXISTS chunks (
        id TEXT PRIMARY KEY,
        file_path TEXT NOT NULL REFERENCES files(path) ON DELETE CASCADE,
        kind TEXT NOT NULL,
        name TEXT NOT NULL,
        qualified_name TEXT NOT NULL,
        signature TEXT,
        docstring TEXT,
        start_line INTEGER NOT NULL,
        end_line INTEGER NOT NULL,
        parent_id TEXT,
        children TEXT NOT NULL DEFAULT '[]',
        imports TEXT NOT NULL DEFAULT '[]',
        bases TEXT NOT NULL DEFAULT '[]',
        content TEXT NOT NULL DEFAULT ''
    );",
    "CREATE TABLE IF NOT EXISTS migration_history (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        from_version INTEGER NOT NULL,
        to_version INTEGER NOT NULL,
        status TEXT NOT NULL,
        error_message TEXT,
        created_at TEXT DEFAULT CURRENT_TIMESTAMP
    );",
    // ── indexes (5) ─────────────────────────────────────────────────────
    "CREATE INDEX IF NOT EXISTS idx_chunks_file ON chunks(file_path);",
    "CREATE INDEX IF NOT EXISTS idx_chunks_qualified ON chunks(qualified_name);",
    "CREATE INDEX IF NOT EXISTS idx_chunks_name ON chunks(name);",
    "CREATE INDEX IF NOT EXISTS idx_chunks_kind ON chunks(kind);",
    "CREATE INDEX IF NOT EXISTS idx_files_hash ON files(content_hash);",
];

// ─── Migration framework ────────────────────────────────────────────────────

/// Run all pending migrations from the current stored version up to
/// [`SCHEMA_VERSION`].  Each step is wrapped in a SAVEPOINT so a failure
/// rolls back only that single step.
pub fn migrate_schema(conn: &Connection) -> QuarryResult<()> {
    let mut current_version = get_schema_version(conn);

    while current_version < SCHEMA_VERSION {
        let next_version = current_version + 1;
        conn.execute_batch("SAVEPOINT quarry_migrate_step;")?;

        let step_result = (|| -> QuarryResult<()> {
            match next_version {
                1 => migrate_to_v1(conn)?,
                2 => migrate_to_v2(conn)?,
                3 => migrate_to_v3(conn)?,
                _ => {} // future versions: no-op until migration is defined
            }
            set_schema_version(conn, next_version)?;
            record_migration_step(conn, current_version, next_version, "success", None)?;
            conn.execute_batch("RELEASE SAVEPOINT quarry_migrate_step;")?;
            Ok(())
        })();

        match step_result {
            Ok(()) => {
                current_version = next_version;
            }
            Err(e) => {
                // Roll back just this step, then release the savepoint.
                let _ = conn.execute_batch("ROLLBACK TO SAVEPOINT quarry_migrate_step;");
                let _ = conn.execute_batch("RELEASE SAVEPOINT quarry_migrate_step;");
                let _ = record_migration_step(
                    conn,
                    current_version,
                    next_version,
                    "failed",
                    Some(&e.to_string()),
                );
                return Err(e);
            }
        }
    }

    Ok(())
}

/// Read the current schema version from `repo_meta`.
/// Returns 0 when the key is absent or unparseable.
pub(crate) fn get_schema_version(conn: &Connection) -> i32 {
    let result: Result<String, _> = conn.query_row(
        "SELECT value FROM repo_meta WHERE key = 'schema_version';",
        [],
        |row| row.get(0),
    );
    match result {
        Ok(v) => v.parse::<i32>().unwrap_or(0),
        Err(_) => 0,
    }
}

/// Upsert the `schema_version` key in `repo_meta`.
fn set_schema_version(conn: &Connection, version: i32) -> QuarryResult<()> {
    conn.execute(
        "INSERT INTO repo_meta(key, value) \
         VALUES('schema_version', ?1) \
         ON CONFLICT(key) DO UPDATE SET value = excluded.value;",
        rusqlite::params![version.to_string()],
    )?;
    Ok(())
}

/// Insert one row into `migration_history`.
fn record_migration_step(
    conn: &Connection,
    from_v: i32,
    to_v: i32,
    status: &str,
    error_msg: Option<&str>,
) -> QuarryResult<()> {
    conn.execute(
        "INSERT INTO migration_history(from_version, to_version, status, error_message) \
         VALUES (?1, ?2, ?3, ?4);",
        rusqlite::params![from_v, to_v, status, error_msg],
    )?;
    Ok(())
}

// ─── Individual migration steps ─────────────────────────────────────────────

/// v0 -> v1: baseline, no-op.
fn migrate_to_v1(_conn: &Connection) -> QuarryResult<()> {
    // Intentionally empty -- baseline schema already created by SCHEMA_STATEMENTS.
    Ok(())
}

/// v1 -> v2: add `idx_chunks_kind` index.
fn migrate_to_v2(conn: &Connection) -> QuarryResult<()> {
    conn.execute_batch("CREATE INDEX IF NOT EXISTS idx_chunks_kind ON chunks(kind);")?;
    Ok(())
}

/// v2 -> v3: add `parse_status` / `parse_error` columns for databases
/// created before parse failures were recorded on the file row.
fn migrate_to_v3(conn: &Connection) -> QuarryResult<()> {
    let has_column: bool = conn
        .prepare("SELECT parse_status FROM files LIMIT 1;")
        .is_ok();
    if !has_column {
        conn.execute_batch(
            "ALTER TABLE files ADD COLUMN parse_status TEXT NOT NULL DEFAULT 'ok';",
        )?;
        conn.execute_batch("ALTER TABLE files ADD COLUMN parse_error TEXT;")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Verify that the constant arrays have the expected sizes.
    #[test]
    fn schema_statement_counts() {
        // 4 tables + 5 indexes = 9 statements
        assert_eq!(SCHEMA_STATEMENTS.len(), 9);
    }

    /// A fresh in-memory database should migrate cleanly to the current version.
    #[test]
    fn migrate_fresh_database() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys = ON;").unwrap();

        for stmt in SCHEMA_STATEMENTS {
            conn.execute_batch(stmt).unwrap();
        }

        migrate_schema(&conn).unwrap();

        assert_eq!(get_schema_version(&conn), SCHEMA_VERSION);
    }

    /// Running migrate_schema twice is idempotent.
    #[test]
    fn migrate_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys = ON;").unwrap();

        for stmt in SCHEMA_STATEMENTS {
            conn.execute_batch(stmt).unwrap();
        }

        migrate_schema(&conn).unwrap();
        migrate_schema(&conn).unwrap();

        assert_eq!(get_schema_version(&conn), SCHEMA_VERSION);
    }
}
