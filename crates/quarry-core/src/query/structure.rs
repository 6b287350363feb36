//! Project structure map generation.
//!
//! A compact per-file summary of the indexed chunks, trimmed line-by-line
//! to a character budget.  Handed to the conversational layer as a cheap
//! standing overview of the project.

use std::collections::BTreeMap;

use crate::models::{Chunk, ChunkKind};

/// Render a project overview from a chunk snapshot: one section per file,
/// one line per class/function/method, in document order.
pub fn render_overview(chunks: &[Chunk], budget: usize) -> String {
    let mut grouped: BTreeMap<&str, Vec<&Chunk>> = BTreeMap::new();
    for chunk in chunks {
        if chunk.kind == ChunkKind::Module {
            continue;
        }
        grouped.entry(chunk.file_path.as_str()).or_default().push(chunk);
    }

    let mut lines: Vec<String> = Vec::new();
    for (file_path, mut entries) in grouped {
        entries.sort_by_key(|c| (c.start_line, -c.end_line));
        lines.push(file_path.to_string());
        for chunk in entries {
            let detail = match &chunk.signature {
                Some(sig) => format!("  {} {}{}", chunk.kind, chunk.qualified_name, sig),
                None => format!("  {} {}", chunk.kind, chunk.qualified_name),
            };
            lines.push(detail);
        }
    }

    let mut output: Vec<String> = Vec::new();
    let mut used = 0usize;
    for line in lines {
        // +1 for the joining newline
        let cost = line.len() + 1;
        if used + cost > budget {
            break;
        }
        used += cost;
        output.push(line);
    }
    output.join("\n")
}
