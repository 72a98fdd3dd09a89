//! Definition-level chunking with tree-sitter.

use crate::chunking::lines::{chunk_lines, windows};
use crate::chunking::{
    Chunk, ChunkError, ChunkMetadata, ChunkOptions, Chunker, FallbackStrategy, Language,
};
use tracing::debug;
use tree_sitter::{Node, Parser};

/// Chunks supported languages by top-level definition.
///
/// Each top-level definition becomes one chunk, together with the comments
/// directly above it. Code between definitions (imports, statements) is
/// gathered into `"module"` chunks. Any chunk longer than
/// `max_chunk_lines` is split into overlapping windows that keep the
/// definition's kind and name.
#[derive(Debug, Default, Clone, Copy)]
pub struct TreeSitterChunker;

impl TreeSitterChunker {
    pub fn new() -> Self {
        Self
    }

    fn chunk_with_grammar(
        &self,
        path: &str,
        content: &str,
        language: Language,
        options: &ChunkOptions,
    ) -> Result<Vec<Chunk>, ChunkError> {
        let parse_failed = || ChunkError::ParseFailed {
            path: path.to_string(),
            language: language.name().to_string(),
        };

        let mut parser = Parser::new();
        parser
            .set_language(&language.grammar())
            .map_err(|_| parse_failed())?;
        let tree = parser.parse(content, None).ok_or_else(parse_failed)?;
        let root = tree.root_node();
        if root.has_error() {
            debug!("{path}: syntax errors present, chunking what parsed");
        }

        let lines: Vec<&str> = content.lines().collect();
        if lines.is_empty() {
            return Ok(Vec::new());
        }
        let last_line = lines.len() - 1;
        let definitions = language.definition_kinds();

        let mut builder = ChunkBuilder {
            path,
            language,
            lines: &lines,
            options,
            chunks: Vec::new(),
        };

        // Row range of pending top-level glue, and of comments that may
        // belong to the next definition.
        let mut glue: Option<(usize, usize)> = None;
        let mut comments: Option<(usize, usize)> = None;

        let mut cursor = root.walk();
        for node in root.named_children(&mut cursor) {
            let start = node.start_position().row.min(last_line);
            let end = end_row(&node).min(last_line);

            if is_comment(&node) {
                match comments {
                    Some((first, prev_end)) if start <= prev_end + 1 => {
                        comments = Some((first, end));
                    }
                    _ => {
                        glue = extend(glue, comments.take());
                        comments = Some((start, end));
                    }
                }
                continue;
            }

            if definitions.contains(&node.kind()) {
                let first = match comments.take() {
                    Some((c_start, c_end)) if c_end + 1 >= start => c_start,
                    other => {
                        glue = extend(glue, other);
                        start
                    }
                };
                if let Some((g_start, g_end)) = glue.take() {
                    builder.push(g_start, g_end.min(first.saturating_sub(1)), "module", None);
                }
                builder.push(first, end, node.kind(), definition_name(&node, content));
            } else {
                glue = extend(glue, comments.take());
                glue = extend(glue, Some((start, end)));
            }
        }

        glue = extend(glue, comments.take());
        if let Some((g_start, g_end)) = glue {
            builder.push(g_start, g_end, "module", None);
        }

        Ok(builder.chunks)
    }
}

impl Chunker for TreeSitterChunker {
    fn chunk(
        &self,
        path: &str,
        content: &str,
        options: &ChunkOptions,
    ) -> Result<Vec<Chunk>, ChunkError> {
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }

        let result = match Language::from_path(path) {
            Some(language) => self.chunk_with_grammar(path, content, language, options),
            None => Err(ChunkError::UnsupportedLanguage {
                path: path.to_string(),
            }),
        };

        match (result, options.fallback) {
            (Ok(chunks), _) => Ok(chunks),
            (Err(e), FallbackStrategy::Lines) => {
                debug!("{e}; falling back to line windows");
                let language = Language::from_path(path).map_or("text", |l| l.name());
                Ok(chunk_lines(
                    path,
                    content,
                    language,
                    options.max_chunk_lines,
                    options.overlap_lines,
                ))
            }
            (Err(e), FallbackStrategy::Skip) => Err(e),
        }
    }
}

struct ChunkBuilder<'a> {
    path: &'a str,
    language: Language,
    lines: &'a [&'a str],
    options: &'a ChunkOptions,
    chunks: Vec<Chunk>,
}

impl ChunkBuilder<'_> {
    /// Emit rows `first..=last`, split into windows when too long.
    fn push(&mut self, first: usize, last: usize, kind: &str, name: Option<String>) {
        if last < first {
            return;
        }
        let template = ChunkMetadata {
            file_path: self.path.to_string(),
            start_line: 0,
            end_line: 0,
            kind: kind.to_string(),
            name,
            language: self.language.name().to_string(),
        };
        self.chunks.extend(windows(
            self.lines,
            first,
            last,
            self.options.max_chunk_lines,
            self.options.overlap_lines,
            &template,
        ));
    }
}

/// Last row that holds part of the node.
///
/// A node ending at column 0 stops before that row's first byte.
fn end_row(node: &Node) -> usize {
    let end = node.end_position();
    if end.column == 0 && end.row > node.start_position().row {
        end.row - 1
    } else {
        end.row
    }
}

fn is_comment(node: &Node) -> bool {
    node.kind().contains("comment")
}

fn extend(range: Option<(usize, usize)>, other: Option<(usize, usize)>) -> Option<(usize, usize)> {
    match (range, other) {
        (Some((a, b)), Some((c, d))) => Some((a.min(c), b.max(d))),
        (range, None) => range,
        (None, other) => other,
    }
}

fn definition_name(node: &Node, source: &str) -> Option<String> {
    let text = |n: Node| n.utf8_text(source.as_bytes()).ok().map(str::to_string);

    if let Some(name) = node.child_by_field_name("name") {
        return text(name);
    }

    match node.kind() {
        // impl Foo / impl Trait for Foo
        "impl_item" => node.child_by_field_name("type").and_then(text),
        "decorated_definition" => node
            .child_by_field_name("definition")
            .and_then(|def| definition_name(&def, source)),
        "export_statement" => node
            .child_by_field_name("declaration")
            .and_then(|decl| definition_name(&decl, source)),
        // const foo = ..., type Foo struct {...}
        "lexical_declaration" | "type_declaration" => {
            let mut cursor = node.walk();
            let first = node
                .named_children(&mut cursor)
                .find(|c| matches!(c.kind(), "variable_declarator" | "type_spec"));
            first
                .and_then(|c| c.child_by_field_name("name"))
                .and_then(text)
        }
        _ => None,
    }
}
