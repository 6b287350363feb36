//! Shared typed models used across indexing, storage, and query layers.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

// ---------------------------------------------------------------------------
// ChunkKind
// ---------------------------------------------------------------------------

/// Structural kind of an extracted chunk.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkKind {
    Module,
    Class,
    Function,
    Method,
}

impl ChunkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkKind::Module => "module",
            ChunkKind::Class => "class",
            ChunkKind::Function => "function",
            ChunkKind::Method => "method",
        }
    }

    pub fn parse(value: &str) -> Option<ChunkKind> {
        match value {
            "module" => Some(ChunkKind::Module),
            "class" => Some(ChunkKind::Class),
            "function" => Some(ChunkKind::Function),
            "method" => Some(ChunkKind::Method),
            _ => None,
        }
    }

    /// Modules and classes carry structural context; functions and methods
    /// carry detail.  Rank tie-breaking puts structure first.
    pub fn is_structural(&self) -> bool {
        matches!(self, ChunkKind::Module | ChunkKind::Class)
    }
}

impl fmt::Display for ChunkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Identity helpers
// ---------------------------------------------------------------------------

/// Derive the stable identity of a chunk from (file path, kind, qualified
/// name, start line): first 16 hex chars of a SHA-256 digest.
///
/// Identity never depends on a sequential counter, so unrelated edits
/// elsewhere in the file (or in other files) leave it unchanged.
pub fn chunk_identity(
    file_path: &str,
    kind: ChunkKind,
    qualified_name: &str,
    start_line: i64,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(file_path.as_bytes());
    hasher.update(b"|");
    hasher.update(kind.as_str().as_bytes());
    hasher.update(b"|");
    hasher.update(qualified_name.as_bytes());
    hasher.update(b"|");
    hasher.update(start_line.to_string().as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    digest[..16].to_string()
}

/// Convert a file path to a dotted module name.
///
/// Strips the file extension and joins path components with dots,
/// skipping any leading `/` or `.` segments.
pub fn module_path(path: &str) -> String {
    let p = Path::new(path);
    let without_ext = p.with_extension("");
    let parts: Vec<&str> = without_ext
        .components()
        .filter_map(|c| match c {
            std::path::Component::Normal(os) => os.to_str(),
            _ => None,
        })
        .filter(|s| !s.is_empty() && *s != ".")
        .collect();
    parts.join(".")
}

/// File stem used as a Module chunk's short name.
pub fn file_stem(path: &str) -> String {
    Path::new(path)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Chunk
// ---------------------------------------------------------------------------

/// A structurally-extracted unit of source: one module, class, function, or
/// method, with identity, span, and metadata.
///
/// Parent/child links are identity references into the owning store, never
/// owning pointers, so the hierarchy carries no ownership cycles.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub file_path: String,
    pub kind: ChunkKind,
    pub name: String,
    /// Dotted path through enclosing scopes, module root excluded: a
    /// top-level `def add` in `main.py` has qualified name `add`.  The
    /// Module chunk itself uses the dotted module path.
    pub qualified_name: String,
    /// Parameter list text plus ` -> ret` when annotated.  `None` for
    /// modules and classes.
    pub signature: Option<String>,
    pub docstring: Option<String>,
    /// 1-based, inclusive.
    pub start_line: i64,
    pub end_line: i64,
    pub parent_id: Option<String>,
    /// Ordered child identities (document order).
    pub children: Vec<String>,
    /// Source-ordered import entries recorded against this chunk: module
    /// scope imports live on the Module chunk, nested imports on the
    /// nearest enclosing chunk.
    pub imports: Vec<String>,
    /// Verbatim base-list expressions (classes only, no resolution).
    pub bases: Vec<String>,
    /// Source text of the span, carried so context assembly renders from
    /// the store rather than from disk.
    pub content: String,
}

impl Chunk {
    pub fn span(&self) -> (i64, i64) {
        (self.start_line, self.end_line)
    }

    /// True when `self`'s span fully contains `other`'s span in the same file.
    pub fn covers(&self, other: &Chunk) -> bool {
        self.file_path == other.file_path
            && self.start_line <= other.start_line
            && other.end_line <= self.end_line
    }
}

// ---------------------------------------------------------------------------
// Parse status
// ---------------------------------------------------------------------------

/// A structured parse failure: location plus message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseDiagnostic {
    /// 1-based.
    pub line: i64,
    /// 0-based, matching editor column conventions.
    pub column: i64,
    pub message: String,
}

impl fmt::Display for ParseDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}, column {}: {}", self.line, self.column, self.message)
    }
}

/// Outcome of the last parse attempt for a file.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ParseStatus {
    Ok,
    Error(ParseDiagnostic),
}

impl ParseStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, ParseStatus::Ok)
    }
}

// ---------------------------------------------------------------------------
// FileRecord
// ---------------------------------------------------------------------------

/// A record representing a single indexed file.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Relative, `/`-separated, project-rooted.  Unique key.
    pub path: String,
    /// SHA-256 hex digest of the raw bytes.
    pub content_hash: String,
    pub size_bytes: i64,
    /// Set by the store on upsert.
    pub last_indexed_at: Option<String>,
    pub parse_status: ParseStatus,
}

// ---------------------------------------------------------------------------
// Reindex reporting
// ---------------------------------------------------------------------------

/// One file that failed to parse during a reindex run.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FileFailure {
    pub path: String,
    pub diagnostic: ParseDiagnostic,
}

/// Summary of a reindex run.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ReindexReport {
    pub files_seen: i64,
    pub files_indexed: i64,
    pub files_removed: i64,
    pub files_skipped: i64,
    pub files_failed: Vec<FileFailure>,
    pub elapsed_ms: i64,
}

// ---------------------------------------------------------------------------
// Query / context types
// ---------------------------------------------------------------------------

/// A retrieval request: free text plus optional explicit hints and a
/// character budget for the rendered output.
#[derive(Clone, Debug)]
pub struct ContextQuery {
    pub text: String,
    /// Explicit file-path or qualified-name references.
    pub hints: Vec<String>,
    /// Maximum rendered size, in characters.
    pub budget: usize,
}

impl ContextQuery {
    pub fn new(text: impl Into<String>, budget: usize) -> Self {
        Self {
            text: text.into(),
            hints: Vec::new(),
            budget,
        }
    }

    pub fn with_hints(mut self, hints: Vec<String>) -> Self {
        self.hints = hints;
        self
    }
}

/// A chunk with its relevance placement, before budget trimming.
#[derive(Clone, Debug)]
pub struct RankedChunk {
    pub chunk: Chunk,
    /// Distinct query tokens matched against name / qualified name /
    /// docstring / imports.
    pub score: u32,
    /// True when an explicit hint matched the path or qualified name.
    pub hinted: bool,
}

/// One rendered entry of a `RankedContext`.
#[derive(Clone, Debug, PartialEq)]
pub struct ContextBlock {
    pub chunk: Chunk,
    pub score: u32,
    pub hinted: bool,
    pub rendered: String,
    pub truncated: bool,
}

/// Why a context came back empty.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContextDiagnostic {
    /// Empty query text and no hints.
    EmptyQuery,
    /// No stored chunk matched a hint or shared a token with the query.
    NoRelevantContext,
    /// The budget cannot hold even the minimum-viable fragment of any
    /// ranked chunk.
    BudgetTooSmall,
}

/// Budget-bounded, deduplicated, relevance-ordered retrieval output.
#[derive(Clone, Debug, Default)]
pub struct RankedContext {
    pub blocks: Vec<ContextBlock>,
    /// Total rendered size; always `<= budget`.
    pub rendered_chars: usize,
    pub budget: usize,
    pub diagnostic: Option<ContextDiagnostic>,
}

impl RankedContext {
    pub fn empty(budget: usize, diagnostic: ContextDiagnostic) -> Self {
        Self {
            blocks: Vec::new(),
            rendered_chars: 0,
            budget,
            diagnostic: Some(diagnostic),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Flatten the accepted blocks into the payload handed to the
    /// conversational layer.  Each block carries its own trailing newline,
    /// so the concatenation length equals `rendered_chars`.
    pub fn render(&self) -> String {
        let mut out = String::with_capacity(self.rendered_chars);
        for block in &self.blocks {
            out.push_str(&block.rendered);
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
