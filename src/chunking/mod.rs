//! Splitting source files into embeddable chunks.
//!
//! [`Chunker`] is the seam the indexer consumes. [`TreeSitterChunker`] is the
//! default: one chunk per top-level definition for languages with a grammar,
//! and line windows for everything else when the fallback allows it.

mod ast;
mod language;
mod lines;

pub use ast::TreeSitterChunker;
pub use language::Language;
pub use lines::chunk_lines;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced while chunking a file.
#[derive(Error, Debug)]
pub enum ChunkError {
    #[error(
        "No grammar for '{path}'\nSuggestion: Set chunking.fallback = \"lines\" to index it as plain text"
    )]
    UnsupportedLanguage { path: String },

    #[error("Failed to parse '{path}' as {language}")]
    ParseFailed { path: String, language: String },
}

/// What to do when a file cannot be chunked by its grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FallbackStrategy {
    /// Overlapping windows of lines.
    #[default]
    Lines,
    /// Report an error and leave the file unindexed.
    Skip,
}

/// Chunk size controls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkOptions {
    /// Longest chunk in lines. Longer definitions are split.
    pub max_chunk_lines: usize,
    /// Lines shared by consecutive windows of a split.
    pub overlap_lines: usize,
    pub fallback: FallbackStrategy,
}

impl Default for ChunkOptions {
    fn default() -> Self {
        Self {
            max_chunk_lines: 60,
            overlap_lines: 5,
            fallback: FallbackStrategy::Lines,
        }
    }
}

/// Where a chunk came from. Stored next to its vector.
#[derive(
    Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub struct ChunkMetadata {
    pub file_path: String,
    /// 1-based, inclusive.
    pub start_line: u32,
    /// 1-based, inclusive.
    pub end_line: u32,
    /// Grammar node kind, `"module"` for top-level glue, `"lines"` for windows.
    pub kind: String,
    pub name: Option<String>,
    pub language: String,
}

/// One unit of embeddable text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub content: String,
    pub metadata: ChunkMetadata,
}

/// Turns file content into chunks.
///
/// `path` is the normalized path used as the file's identity; implementations
/// copy it into every chunk's metadata. Content that holds nothing worth
/// embedding yields an empty vector, not an error.
pub trait Chunker: Send + Sync {
    fn chunk(
        &self,
        path: &str,
        content: &str,
        options: &ChunkOptions,
    ) -> Result<Vec<Chunk>, ChunkError>;
}
