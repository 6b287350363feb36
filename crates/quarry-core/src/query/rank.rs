//! Deterministic retrieval ranking over a chunk snapshot.
//!
//! No opaque scoring: hint matches form a top band, lexical token overlap
//! orders the rest, and the tie-break chain yields a strict total order
//! over the included chunks.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use crate::models::{Chunk, ContextQuery, RankedChunk};
use crate::query::guards::{truncate_query, MAX_HINTS};
use crate::query::tokenizer::query_tokens;

/// Normalize a hint for exact comparison against file paths and qualified
/// names.
fn normalize_hint(hint: &str) -> String {
    let trimmed = hint.trim().replace('\\', "/");
    trimmed.trim_start_matches("./").to_string()
}

/// Distinct query tokens found in the chunk's name, qualified name,
/// docstring, or import list.
fn lexical_overlap(tokens: &BTreeSet<String>, chunk: &Chunk) -> u32 {
    if tokens.is_empty() {
        return 0;
    }
    let name = chunk.name.to_lowercase();
    let qualified = chunk.qualified_name.to_lowercase();
    let docstring = chunk
        .docstring
        .as_deref()
        .unwrap_or_default()
        .to_lowercase();
    let imports = chunk.imports.join(" ").to_lowercase();

    tokens
        .iter()
        .filter(|token| {
            name.contains(token.as_str())
                || qualified.contains(token.as_str())
                || docstring.contains(token.as_str())
                || imports.contains(token.as_str())
        })
        .count() as u32
}

fn kind_rank(chunk: &Chunk) -> u8 {
    if chunk.kind.is_structural() {
        0
    } else {
        1
    }
}

/// Hinted band: outer-to-inner within a file (start ascending, longer span
/// first), files in path order.
fn compare_hinted(a: &Chunk, b: &Chunk) -> Ordering {
    a.file_path
        .cmp(&b.file_path)
        .then(a.start_line.cmp(&b.start_line))
        .then(b.end_line.cmp(&a.end_line))
        .then(a.qualified_name.cmp(&b.qualified_name))
}

/// Lexical band: score descending, then structure before detail, shorter
/// qualified name first, path order, and finally position — a total order,
/// since no two chunks share (file, qualified name, start line).
fn compare_scored(a: &RankedChunk, b: &RankedChunk) -> Ordering {
    b.score
        .cmp(&a.score)
        .then(kind_rank(&a.chunk).cmp(&kind_rank(&b.chunk)))
        .then(
            a.chunk
                .qualified_name
                .len()
                .cmp(&b.chunk.qualified_name.len()),
        )
        .then(a.chunk.file_path.cmp(&b.chunk.file_path))
        .then(a.chunk.qualified_name.cmp(&b.chunk.qualified_name))
        .then(a.chunk.start_line.cmp(&b.chunk.start_line))
}

/// Rank a snapshot against a query: hinted chunks first, then lexical
/// matches.  Chunks with zero overlap and no hint match are excluded
/// entirely.
pub fn rank_chunks(query: &ContextQuery, snapshot: Vec<Chunk>) -> Vec<RankedChunk> {
    let tokens = query_tokens(&truncate_query(&query.text));
    let hints: Vec<String> = query
        .hints
        .iter()
        .map(|h| normalize_hint(h))
        .filter(|h| !h.is_empty())
        .take(MAX_HINTS)
        .collect();

    let mut hinted: Vec<RankedChunk> = Vec::new();
    let mut scored: Vec<RankedChunk> = Vec::new();

    for chunk in snapshot {
        let is_hinted = hints
            .iter()
            .any(|h| chunk.file_path == *h || chunk.qualified_name == *h);
        let score = lexical_overlap(&tokens, &chunk);
        if is_hinted {
            hinted.push(RankedChunk {
                chunk,
                score,
                hinted: true,
            });
        } else if score > 0 {
            scored.push(RankedChunk {
                chunk,
                score,
                hinted: false,
            });
        }
    }

    hinted.sort_by(|a, b| compare_hinted(&a.chunk, &b.chunk));
    scored.sort_by(compare_scored);

    hinted.extend(scored);
    hinted
}
