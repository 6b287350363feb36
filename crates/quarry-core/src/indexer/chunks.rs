//! Chunk extraction from a parsed syntax tree.
//!
//! Walks one file's tree depth-first and emits a hierarchical chunk set
//! rooted at a single Module chunk.  Parent/child links are identity
//! references; the chunks live in a flat arena (the output `Vec`).

use tree_sitter::{Node, Tree};

use crate::models::{chunk_identity, file_stem, module_path, Chunk, ChunkKind};

/// Extract the ordered chunk list for one file: a Module chunk first, then
/// every class / function / method in document order.
pub fn extract_chunks(tree: &Tree, source: &str, file_path: &str) -> Vec<Chunk> {
    let lines: Vec<&str> = source.lines().collect();
    let line_count = lines.len().max(1) as i64;
    let root = tree.root_node();

    let module_qualified = module_path(file_path);
    let module = Chunk {
        id: chunk_identity(file_path, ChunkKind::Module, &module_qualified, 1),
        file_path: file_path.to_string(),
        kind: ChunkKind::Module,
        name: file_stem(file_path),
        qualified_name: module_qualified,
        signature: None,
        docstring: docstring_of(root, source),
        start_line: 1,
        end_line: line_count,
        parent_id: None,
        children: Vec::new(),
        imports: Vec::new(),
        bases: Vec::new(),
        content: lines.join("\n"),
    };

    let mut walker = Walker {
        source,
        lines: &lines,
        file_path,
        chunks: vec![module],
    };
    walker.visit_children(root, 0, &[]);
    walker.chunks
}

struct Walker<'a> {
    source: &'a str,
    lines: &'a [&'a str],
    file_path: &'a str,
    chunks: Vec<Chunk>,
}

impl<'a> Walker<'a> {
    fn text(&self, node: Node<'_>) -> &'a str {
        node.utf8_text(self.source.as_bytes()).unwrap_or_default()
    }

    fn visit_children(&mut self, node: Node<'_>, owner: usize, scope: &[String]) {
        let mut cursor = node.walk();
        let children: Vec<Node<'_>> = node.named_children(&mut cursor).collect();
        for child in children {
            self.visit(child, owner, scope);
        }
    }

    fn visit(&mut self, node: Node<'_>, owner: usize, scope: &[String]) {
        match node.kind() {
            "import_statement" | "import_from_statement" | "future_import_statement" => {
                self.record_imports(node, owner);
            }
            "decorated_definition" => {
                if let Some(definition) = node.child_by_field_name("definition") {
                    self.emit_definition(definition, Some(node), owner, scope);
                }
            }
            "class_definition" | "function_definition" => {
                self.emit_definition(node, None, owner, scope);
            }
            // Compound statements (if/try/for/with, ...) can hold nested
            // definitions and imports; descend without opening a scope.
            _ => self.visit_children(node, owner, scope),
        }
    }

    fn emit_definition(
        &mut self,
        definition: Node<'_>,
        wrapper: Option<Node<'_>>,
        owner: usize,
        scope: &[String],
    ) {
        let name = match definition.child_by_field_name("name") {
            Some(n) => self.text(n).to_string(),
            None => return,
        };

        let is_class = definition.kind() == "class_definition";
        let kind = if is_class {
            ChunkKind::Class
        } else if self.chunks[owner].kind == ChunkKind::Class {
            ChunkKind::Method
        } else {
            ChunkKind::Function
        };

        // Decorated definitions span from the first decorator line.
        let span_node = wrapper.unwrap_or(definition);
        let start_line = span_node.start_position().row as i64 + 1;
        let end_line = span_node.end_position().row as i64 + 1;

        let mut qualified_parts = scope.to_vec();
        qualified_parts.push(name.clone());
        let qualified_name = qualified_parts.join(".");

        let signature = if is_class {
            None
        } else {
            self.signature_of(definition)
        };
        let bases = if is_class {
            self.bases_of(definition)
        } else {
            Vec::new()
        };
        let docstring = definition
            .child_by_field_name("body")
            .and_then(|body| docstring_of(body, self.source));

        let id = chunk_identity(self.file_path, kind, &qualified_name, start_line);
        let parent_id = self.chunks[owner].id.clone();
        self.chunks[owner].children.push(id.clone());

        self.chunks.push(Chunk {
            id,
            file_path: self.file_path.to_string(),
            kind,
            name,
            qualified_name,
            signature,
            docstring,
            start_line,
            end_line,
            parent_id: Some(parent_id),
            children: Vec::new(),
            imports: Vec::new(),
            bases,
            content: slice_lines(self.lines, start_line, end_line),
        });

        let index = self.chunks.len() - 1;
        if let Some(body) = definition.child_by_field_name("body") {
            self.visit_children(body, index, &qualified_parts);
        }
    }

    /// Ordered parameter list plus return annotation, e.g. `(a, b) -> int`.
    fn signature_of(&self, definition: Node<'_>) -> Option<String> {
        let parameters = definition.child_by_field_name("parameters")?;
        let params_text = self.text(parameters).to_string();
        match definition.child_by_field_name("return_type") {
            Some(ret) => Some(format!("{} -> {}", params_text, self.text(ret))),
            None => Some(params_text),
        }
    }

    /// Base-list expressions of a class, verbatim, no resolution.
    fn bases_of(&self, definition: Node<'_>) -> Vec<String> {
        let Some(superclasses) = definition.child_by_field_name("superclasses") else {
            return Vec::new();
        };
        let mut cursor = superclasses.walk();
        superclasses
            .named_children(&mut cursor)
            .map(|n| self.text(n).to_string())
            .collect()
    }

    fn record_imports(&mut self, node: Node<'_>, owner: usize) {
        let mut entries = Vec::new();
        match node.kind() {
            "import_statement" => {
                let mut cursor = node.walk();
                for child in node.named_children(&mut cursor) {
                    match child.kind() {
                        "dotted_name" => entries.push(self.text(child).to_string()),
                        "aliased_import" => {
                            if let Some(name) = child.child_by_field_name("name") {
                                entries.push(self.text(name).to_string());
                            }
                        }
                        _ => {}
                    }
                }
            }
            "import_from_statement" | "future_import_statement" => {
                let module_node = node.child_by_field_name("module_name");
                let module = match module_node {
                    Some(n) => self.text(n).to_string(),
                    // `from __future__ import ...` has no module_name field.
                    None => "__future__".to_string(),
                };
                let module_id = module_node.map(|n| n.id());
                let mut cursor = node.walk();
                for child in node.named_children(&mut cursor) {
                    if Some(child.id()) == module_id {
                        continue;
                    }
                    let imported = match child.kind() {
                        "dotted_name" => self.text(child).to_string(),
                        "aliased_import" => match child.child_by_field_name("name") {
                            Some(name) => self.text(name).to_string(),
                            None => continue,
                        },
                        "wildcard_import" => "*".to_string(),
                        _ => continue,
                    };
                    if module.ends_with('.') {
                        entries.push(format!("{module}{imported}"));
                    } else {
                        entries.push(format!("{module}.{imported}"));
                    }
                }
            }
            _ => {}
        }
        self.chunks[owner].imports.extend(entries);
    }
}

fn slice_lines(lines: &[&str], start_line: i64, end_line: i64) -> String {
    let start = (start_line.max(1) - 1) as usize;
    let end = (end_line.max(0) as usize).min(lines.len());
    if start >= end {
        return String::new();
    }
    lines[start..end].join("\n")
}

/// Docstring of a body: the first non-comment statement, when it is a plain
/// string expression.
fn docstring_of(body: Node<'_>, source: &str) -> Option<String> {
    let mut cursor = body.walk();
    let first = body
        .named_children(&mut cursor)
        .find(|n| n.kind() != "comment")?;
    if first.kind() != "expression_statement" {
        return None;
    }
    let inner = first.named_child(0)?;
    if inner.kind() != "string" {
        return None;
    }
    let raw = inner.utf8_text(source.as_bytes()).ok()?;
    Some(clean_string_literal(raw))
}

/// Strip string prefixes (`r`, `b`, `u`, `f`) and quote delimiters from a
/// string literal's source text.
fn clean_string_literal(raw: &str) -> String {
    let trimmed = raw.trim();
    let body = trimmed.trim_start_matches(['r', 'R', 'b', 'B', 'u', 'U', 'f', 'F']);
    for delim in ["\"\"\"", "'''"] {
        if body.len() >= delim.len() * 2 && body.starts_with(delim) && body.ends_with(delim) {
            return body[delim.len()..body.len() - delim.len()].trim().to_string();
        }
    }
    for delim in ["\"", "'"] {
        if body.len() >= 2 && body.starts_with(delim) && body.ends_with(delim) {
            return body[1..body.len() - 1].to_string();
        }
    }
    body.to_string()
}
