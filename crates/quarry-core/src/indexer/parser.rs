//! Structural parsing wrapper around the tree-sitter Python grammar.
//!
//! tree-sitter never aborts on malformed input: it always produces a tree,
//! marking unparseable regions with ERROR/MISSING nodes.  This module turns
//! the first such node into a [`ParseDiagnostic`], so a broken file becomes
//! a per-file failure instead of a crash or a half-extracted chunk set.

use tree_sitter::{Node, Parser, Tree};

use crate::models::ParseDiagnostic;

/// Parse Python source into a syntax tree, or a structured diagnostic.
///
/// Pure function of the text; the caller attaches the file path.
pub fn parse_source(source: &str) -> Result<Tree, ParseDiagnostic> {
    let mut parser = Parser::new();
    if parser
        .set_language(&tree_sitter_python::LANGUAGE.into())
        .is_err()
    {
        return Err(ParseDiagnostic {
            line: 1,
            column: 0,
            message: "python grammar unavailable".to_string(),
        });
    }

    let tree = match parser.parse(source, None) {
        Some(tree) => tree,
        None => {
            return Err(ParseDiagnostic {
                line: 1,
                column: 0,
                message: "parser produced no tree".to_string(),
            })
        }
    };

    if tree.root_node().has_error() {
        let diagnostic = first_error(tree.root_node()).unwrap_or(ParseDiagnostic {
            line: 1,
            column: 0,
            message: "syntax error".to_string(),
        });
        return Err(diagnostic);
    }

    Ok(tree)
}

/// Locate the first ERROR or MISSING node, depth-first.  `has_error()`
/// prunes subtrees without failures, so the walk stays cheap.
fn first_error(node: Node<'_>) -> Option<ParseDiagnostic> {
    if node.is_error() || node.is_missing() {
        let position = node.start_position();
        let message = if node.is_missing() {
            format!("missing {}", node.kind())
        } else {
            "syntax error".to_string()
        };
        return Some(ParseDiagnostic {
            line: position.row as i64 + 1,
            column: position.column as i64,
            message,
        });
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if !child.has_error() {
            continue;
        }
        if let Some(diagnostic) = first_error(child) {
            return Some(diagnostic);
        }
    }
    None
}
