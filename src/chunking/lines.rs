//! Line-window chunking, used for files without a grammar and for splitting
//! definitions that are too long.

use crate::chunking::{Chunk, ChunkMetadata};

/// Split `lines[first..=last]` (0-based) into overlapping windows.
///
/// Windows are at most `max_lines` long and advance by
/// `max_lines - overlap` (at least one line). Whitespace-only windows are
/// dropped.
pub(crate) fn windows(
    lines: &[&str],
    first: usize,
    last: usize,
    max_lines: usize,
    overlap: usize,
    template: &ChunkMetadata,
) -> Vec<Chunk> {
    let max_lines = max_lines.max(1);
    let step = max_lines.saturating_sub(overlap).max(1);
    let last = last.min(lines.len().saturating_sub(1));

    let mut chunks = Vec::new();
    let mut start = first;
    while start <= last && start < lines.len() {
        let end = (start + max_lines - 1).min(last);
        let content = lines[start..=end].join("\n");
        if !content.trim().is_empty() {
            chunks.push(Chunk {
                content,
                metadata: ChunkMetadata {
                    start_line: (start + 1) as u32,
                    end_line: (end + 1) as u32,
                    ..template.clone()
                },
            });
        }
        if end == last {
            break;
        }
        start += step;
    }
    chunks
}

/// Chunk a whole file into line windows.
pub fn chunk_lines(
    path: &str,
    content: &str,
    language: &str,
    max_lines: usize,
    overlap: usize,
) -> Vec<Chunk> {
    if content.trim().is_empty() {
        return Vec::new();
    }
    let lines: Vec<&str> = content.lines().collect();
    let template = ChunkMetadata {
        file_path: path.to_string(),
        start_line: 0,
        end_line: 0,
        kind: "lines".to_string(),
        name: None,
        language: language.to_string(),
    };
    windows(&lines, 0, lines.len().saturating_sub(1), max_lines, overlap, &template)
}
