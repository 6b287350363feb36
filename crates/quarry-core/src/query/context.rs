//! Context assembly: greedy budget-bounded rendering of ranked chunks.
//!
//! Accepts chunks in rank order, suppresses blocks whose span an accepted
//! block already covers, and trims to the character budget.  A block that
//! does not fit whole is tail-truncated behind an explicit marker when at
//! least its minimum-viable fragment (header + signature) still fits;
//! otherwise it is skipped and the next rank is tried.

use crate::models::{
    Chunk, ContextBlock, ContextDiagnostic, ContextQuery, RankedChunk, RankedContext,
};
use crate::query::guards::{clamp_budget, truncate_query, MAX_CONTEXT_CHUNKS};
use crate::query::rank::rank_chunks;

/// Appended to a block cut at the budget boundary.
pub const TRUNCATION_MARKER: &str = "\n... [truncated]\n";

fn render_header(chunk: &Chunk) -> String {
    format!(
        "### {} [{}] {}:{}-{}\n",
        chunk.qualified_name, chunk.kind, chunk.file_path, chunk.start_line, chunk.end_line
    )
}

fn render_signature(chunk: &Chunk) -> Option<String> {
    chunk
        .signature
        .as_ref()
        .map(|sig| format!("{}{}\n", chunk.name, sig))
}

/// Self-contained text block: qualified-name header, signature, docstring,
/// source excerpt.  Ends with its own separator so concatenated blocks need
/// no extra glue.
fn render_block(chunk: &Chunk) -> String {
    let mut out = render_header(chunk);
    if let Some(sig) = render_signature(chunk) {
        out.push_str(&sig);
    }
    if let Some(doc) = &chunk.docstring {
        out.push_str(&format!("\"\"\"{doc}\"\"\"\n"));
    }
    out.push_str(&chunk.content);
    out.push_str("\n\n");
    out
}

/// Smallest acceptable rendering of a chunk: header plus signature line.
fn minimum_fragment_len(chunk: &Chunk) -> usize {
    render_header(chunk).len() + render_signature(chunk).map_or(0, |s| s.len())
}

fn floor_char_boundary(text: &str, mut index: usize) -> usize {
    if index >= text.len() {
        return text.len();
    }
    while index > 0 && !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

/// Build a `RankedContext` for a query against a chunk snapshot.
///
/// Degenerate inputs come back as an empty context with a diagnostic
/// rather than an error: empty query text with no hints, a snapshot with
/// no relevant chunk, or a budget below any minimum-viable fragment.
pub fn build_context(query: &ContextQuery, snapshot: Vec<Chunk>) -> RankedContext {
    let budget = clamp_budget(query.budget);

    let text = truncate_query(&query.text);
    let has_hints = query.hints.iter().any(|h| !h.trim().is_empty());
    if text.is_empty() && !has_hints {
        return RankedContext::empty(budget, ContextDiagnostic::EmptyQuery);
    }

    let ranked = rank_chunks(query, snapshot);
    if ranked.is_empty() {
        return RankedContext::empty(budget, ContextDiagnostic::NoRelevantContext);
    }

    assemble(ranked, budget)
}

fn assemble(ranked: Vec<RankedChunk>, budget: usize) -> RankedContext {
    let mut blocks: Vec<ContextBlock> = Vec::new();
    let mut used = 0usize;
    let mut budget_skips = 0usize;

    for candidate in ranked {
        if blocks.len() >= MAX_CONTEXT_CHUNKS {
            break;
        }

        // Redundancy suppression: an accepted block already covering this
        // span makes it a duplicate, unless both were explicitly hinted.
        let covered = blocks.iter().any(|accepted| {
            accepted.chunk.covers(&candidate.chunk) && !(accepted.hinted && candidate.hinted)
        });
        if covered {
            continue;
        }

        let rendered = render_block(&candidate.chunk);
        let remaining = budget - used;

        if rendered.len() <= remaining {
            used += rendered.len();
            blocks.push(ContextBlock {
                chunk: candidate.chunk,
                score: candidate.score,
                hinted: candidate.hinted,
                rendered,
                truncated: false,
            });
            continue;
        }

        let min_len = minimum_fragment_len(&candidate.chunk);
        if min_len + TRUNCATION_MARKER.len() <= remaining {
            let keep = floor_char_boundary(&rendered, remaining - TRUNCATION_MARKER.len());
            let mut truncated = rendered[..keep].to_string();
            truncated.push_str(TRUNCATION_MARKER);
            used += truncated.len();
            blocks.push(ContextBlock {
                chunk: candidate.chunk,
                score: candidate.score,
                hinted: candidate.hinted,
                rendered: truncated,
                truncated: true,
            });
        } else {
            budget_skips += 1;
        }
    }

    let diagnostic = if blocks.is_empty() && budget_skips > 0 {
        Some(ContextDiagnostic::BudgetTooSmall)
    } else {
        None
    };

    RankedContext {
        blocks,
        rendered_chars: used,
        budget,
        diagnostic,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{chunk_identity, ChunkKind};

    fn chunk(path: &str, kind: ChunkKind, qualified: &str, start: i64, end: i64) -> Chunk {
        let name = qualified.rsplit('.').next().unwrap().to_string();
        Chunk {
            id: chunk_identity(path, kind, qualified, start),
            file_path: path.to_string(),
            kind,
            name: name.clone(),
            qualified_name: qualified.to_string(),
            signature: (!matches!(kind, ChunkKind::Module | ChunkKind::Class))
                .then(|| "(a, b)".to_string()),
            docstring: None,
            start_line: start,
            end_line: end,
            parent_id: None,
            children: vec![],
            imports: vec![],
            bases: vec![],
            content: format!("def {name}(a, b):\n    return a + b"),
        }
    }

    fn query(text: &str, budget: usize) -> ContextQuery {
        ContextQuery::new(text, budget)
    }

    #[test]
    fn relevant_function_is_returned_within_budget() {
        let mut add = chunk("main.py", ChunkKind::Function, "add", 1, 3);
        add.docstring = Some("Adds two numbers".to_string());
        let snapshot = vec![
            chunk("main.py", ChunkKind::Module, "main", 1, 10),
            add,
            chunk("other.py", ChunkKind::Function, "multiply", 1, 3),
        ];

        let ctx = build_context(&query("add", 10_000), snapshot);
        assert_eq!(ctx.blocks.len(), 1);
        assert!(ctx.diagnostic.is_none());
        let block = &ctx.blocks[0];
        assert_eq!(block.chunk.qualified_name, "add");
        assert!(!block.truncated);
        assert!(block.rendered.contains("### add [function] main.py:1-3"));
        assert!(block.rendered.contains("add(a, b)"));
        assert!(block.rendered.contains("Adds two numbers"));
        assert_eq!(ctx.rendered_chars, block.rendered.len());
        assert_eq!(ctx.render().len(), ctx.rendered_chars);
    }

    #[test]
    fn empty_query_without_hints() {
        let ctx = build_context(&query("   ", 1000), vec![]);
        assert!(ctx.is_empty());
        assert_eq!(ctx.diagnostic, Some(ContextDiagnostic::EmptyQuery));
    }

    #[test]
    fn no_relevant_context_signalled() {
        let snapshot = vec![chunk("a.py", ChunkKind::Function, "unrelated", 1, 3)];
        let ctx = build_context(&query("missing topic", 1000), snapshot);
        assert!(ctx.is_empty());
        assert_eq!(ctx.diagnostic, Some(ContextDiagnostic::NoRelevantContext));
    }

    #[test]
    fn budget_is_always_respected() {
        let mut big = chunk("big.py", ChunkKind::Function, "handler", 1, 200);
        big.content = "x = 1\n".repeat(500);
        let budget = 200;
        let ctx = build_context(&query("handler", budget), vec![big]);
        assert!(ctx.rendered_chars <= budget);
        assert_eq!(ctx.render().len(), ctx.rendered_chars);
    }

    #[test]
    fn oversized_chunk_is_truncated_with_marker() {
        let mut big = chunk("big.py", ChunkKind::Function, "handler", 1, 200);
        big.content = "x = 1\n".repeat(500);
        let ctx = build_context(&query("handler", 300), vec![big]);
        assert_eq!(ctx.blocks.len(), 1);
        assert!(ctx.blocks[0].truncated);
        assert!(ctx.blocks[0].rendered.ends_with(TRUNCATION_MARKER));
        assert!(ctx.rendered_chars <= 300);
    }

    #[test]
    fn marker_absent_when_nothing_was_cut() {
        let small = chunk("s.py", ChunkKind::Function, "tiny", 1, 2);
        let ctx = build_context(&query("tiny", 10_000), vec![small]);
        assert!(!ctx.blocks[0].truncated);
        assert!(!ctx.render().contains(TRUNCATION_MARKER.trim()));
    }

    #[test]
    fn budget_too_small_for_any_fragment() {
        let big = chunk("big.py", ChunkKind::Function, "handler", 1, 50);
        let ctx = build_context(&query("handler", 10), vec![big]);
        assert!(ctx.is_empty());
        assert_eq!(ctx.diagnostic, Some(ContextDiagnostic::BudgetTooSmall));
    }

    #[test]
    fn unviable_top_chunk_falls_through_to_next_rank() {
        // Header alone overflows the budget for the long name; the short
        // one still fits whole.
        let long_name = "very_long_qualified_name_".repeat(8);
        let mut huge = chunk("a.py", ChunkKind::Function, &long_name, 1, 3);
        huge.content = "pass".to_string();
        let small = chunk("z.py", ChunkKind::Function, "ok", 1, 2);

        let budget = render_block(&small).len() + 4;
        let q = query(&format!("{long_name} ok"), budget);
        let ctx = build_context(&q, vec![huge, small]);
        assert_eq!(ctx.blocks.len(), 1);
        assert_eq!(ctx.blocks[0].chunk.qualified_name, "ok");
        assert!(ctx.diagnostic.is_none());
    }

    #[test]
    fn covered_span_is_suppressed() {
        let class = chunk("svc.py", ChunkKind::Class, "Worker", 1, 20);
        let method = chunk("svc.py", ChunkKind::Method, "Worker.work", 3, 8);
        let ctx = build_context(&query("worker work", 100_000), vec![class, method]);
        // The class block covers the method's span.
        assert_eq!(ctx.blocks.len(), 1);
        assert_eq!(ctx.blocks[0].chunk.qualified_name, "Worker");
    }

    #[test]
    fn hinted_overlap_is_allowed() {
        let class = chunk("svc.py", ChunkKind::Class, "Worker", 1, 20);
        let method = chunk("svc.py", ChunkKind::Method, "Worker.work", 3, 8);
        let q = query("", 100_000)
            .with_hints(vec!["Worker".to_string(), "Worker.work".to_string()]);
        let ctx = build_context(&q, vec![class, method]);
        assert_eq!(ctx.blocks.len(), 2);
        assert!(ctx.blocks.iter().all(|b| b.hinted));
    }

    #[test]
    fn block_count_is_capped() {
        let snapshot: Vec<Chunk> = (0..MAX_CONTEXT_CHUNKS + 10)
            .map(|i| {
                chunk(
                    &format!("f{i:03}.py"),
                    ChunkKind::Function,
                    &format!("probe{i:03}"),
                    1,
                    2,
                )
            })
            .collect();
        let ctx = build_context(&query("probe", 1_000_000), snapshot);
        assert_eq!(ctx.blocks.len(), MAX_CONTEXT_CHUNKS);
    }
}
