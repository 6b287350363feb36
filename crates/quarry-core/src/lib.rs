//! Quarry core library — structural indexing and retrieval for source
//! projects.
//!
//! The write path turns a project directory into a durable chunk index:
//! scan → parse → extract → store, with fingerprint-based invalidation so
//! unchanged files are never re-extracted.  The read path turns a free-text
//! question plus optional path/symbol hints into a bounded, deduplicated,
//! relevance-ranked context payload for a conversational layer.
//!
//! The chat loop, provider adapters, and CLI live outside this crate; they
//! talk to [`CodeIndex`].

pub mod errors;
pub mod indexer;
pub mod models;
pub mod query;
pub mod store;

use std::path::{Path, PathBuf};

use crate::errors::{QuarryError, QuarryResult};
use crate::models::{Chunk, ContextQuery, ParseStatus, RankedContext, ReindexReport};
use crate::query::cache::ContextCache;
use crate::store::Database;

/// Handle over one project's index: the store plus a response cache.
///
/// Opened explicitly at process start and passed where needed; there is no
/// ambient global index state.
pub struct CodeIndex {
    root: PathBuf,
    db: Database,
    cache: ContextCache,
}

impl CodeIndex {
    /// Conventional index location inside a project.
    pub fn default_db_path(root: &Path) -> PathBuf {
        root.join(".quarry").join("index.db")
    }

    /// Open (and initialise if needed) the index for `root`, stored at
    /// `db_path`.
    pub fn open(root: impl Into<PathBuf>, db_path: impl AsRef<Path>) -> QuarryResult<Self> {
        let db = Database::new(db_path)?;
        db.init_schema()?;
        Ok(Self {
            root: root.into(),
            db,
            cache: ContextCache::default(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn store(&self) -> &Database {
        &self.db
    }

    /// Full scan–detect–extract–store cycle over the project.
    pub fn reindex(&self) -> QuarryResult<ReindexReport> {
        self.reindex_with_workers(0)
    }

    /// As [`CodeIndex::reindex`], with an explicit worker-pool size
    /// (`0` = Rayon default).
    pub fn reindex_with_workers(&self, workers: usize) -> QuarryResult<ReindexReport> {
        indexer::pipeline::reindex(&self.db, &self.root, workers)
    }

    /// Ordered chunks for one file, after a single-file reindex-if-stale.
    ///
    /// An unparsable file reports its diagnostic instead of a chunk list.
    pub fn inspect(&self, path: &str) -> QuarryResult<Vec<Chunk>> {
        let rel = self.normalize(path);
        indexer::pipeline::reindex_file(&self.db, &self.root, &rel)?;
        match self.db.file_record(&rel)? {
            Some(record) => match record.parse_status {
                ParseStatus::Ok => self.db.chunks_by_file(&rel),
                ParseStatus::Error(diagnostic) => Err(QuarryError::Parse {
                    path: rel,
                    diagnostic,
                }),
            },
            None => Err(QuarryError::FileNotFound(rel)),
        }
    }

    /// Build a ranked, budget-bounded context for a query against the
    /// current index.  Read-only; never triggers indexing.
    pub fn build_context(&self, query: &ContextQuery) -> QuarryResult<RankedContext> {
        let epoch = self.db.cache_epoch()?;
        let key = ContextCache::key(epoch, query);
        if let Some(hit) = self.cache.get(&key) {
            return Ok(hit);
        }
        let snapshot = self.db.all_chunks()?;
        let context = query::context::build_context(query, snapshot);
        self.cache.put(key, context.clone());
        Ok(context)
    }

    /// Compact per-file structure summary of the indexed project, trimmed
    /// to a character budget.
    pub fn overview(&self, budget: usize) -> QuarryResult<String> {
        let snapshot = self.db.all_chunks()?;
        Ok(query::structure::render_overview(&snapshot, budget))
    }

    /// Accept `./`-prefixed, backslash-separated, or root-absolute spellings
    /// of a project file path.
    fn normalize(&self, path: &str) -> String {
        let slashed = path.replace('\\', "/");
        if let Ok(stripped) = Path::new(&slashed).strip_prefix(&self.root) {
            return stripped.to_string_lossy().into_owned();
        }
        slashed.trim_start_matches("./").to_string()
    }
}
