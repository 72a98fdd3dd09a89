//! Deterministic collaborators shared by the integration tests.

#![allow(dead_code)]

use codevec::chunking::ChunkError;
use codevec::{
    Chunk, ChunkMetadata, ChunkOptions, Chunker, EmbeddingGenerator, LocalVectorStore, SearchHit,
    VectorDimension, VectorError, VectorStore,
};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

pub const DIM: usize = 8;
pub const MODEL: &str = "fake-model";

/// One chunk per blank-line-separated paragraph.
///
/// Files whose content starts with `!unparseable` fail to chunk.
pub struct ParagraphChunker;

impl Chunker for ParagraphChunker {
    fn chunk(
        &self,
        path: &str,
        content: &str,
        _options: &ChunkOptions,
    ) -> Result<Vec<Chunk>, ChunkError> {
        if content.starts_with("!unparseable") {
            return Err(ChunkError::ParseFailed {
                path: path.to_string(),
                language: "fake".to_string(),
            });
        }

        let mut chunks = Vec::new();
        let mut start = 0;
        let mut current: Vec<&str> = Vec::new();
        let lines: Vec<&str> = content.lines().collect();
        for (i, line) in lines.iter().enumerate() {
            if line.trim().is_empty() {
                if !current.is_empty() {
                    chunks.push(paragraph(path, start, i, &current));
                    current.clear();
                }
                continue;
            }
            if current.is_empty() {
                start = i;
            }
            current.push(line);
        }
        if !current.is_empty() {
            chunks.push(paragraph(path, start, lines.len(), &current));
        }
        Ok(chunks)
    }
}

fn paragraph(path: &str, start: usize, end: usize, lines: &[&str]) -> Chunk {
    Chunk {
        content: lines.join("\n"),
        metadata: ChunkMetadata {
            file_path: path.to_string(),
            start_line: (start + 1) as u32,
            end_line: end as u32,
            kind: "paragraph".to_string(),
            name: None,
            language: "text".to_string(),
        },
    }
}

/// Embedding generator that records every text it embeds.
pub struct RecordingGenerator {
    dimension: VectorDimension,
    embedded: Mutex<Vec<String>>,
    calls: AtomicUsize,
}

impl RecordingGenerator {
    pub fn new() -> Self {
        Self {
            dimension: VectorDimension::new(DIM).unwrap(),
            embedded: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Every text embedded so far, in call order.
    pub fn embedded(&self) -> Vec<String> {
        self.embedded.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

pub fn fake_embedding(text: &str) -> Vec<f32> {
    let mut vector = vec![1.0; DIM];
    for (i, byte) in text.bytes().enumerate() {
        vector[i % DIM] += f32::from(byte);
    }
    vector
}

impl EmbeddingGenerator for RecordingGenerator {
    fn generate_embeddings(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, VectorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.embedded
            .lock()
            .unwrap()
            .extend(texts.iter().map(|t| t.to_string()));
        Ok(texts.iter().map(|t| fake_embedding(t)).collect())
    }

    fn dimension(&self) -> VectorDimension {
        self.dimension
    }

    fn model_name(&self) -> &str {
        MODEL
    }
}

/// In-memory store that rejects writes for paths containing `marker`.
pub struct FailingStore {
    inner: LocalVectorStore,
    marker: String,
}

impl FailingStore {
    pub fn new(marker: &str) -> Self {
        Self {
            inner: LocalVectorStore::in_memory(VectorDimension::new(DIM).unwrap()),
            marker: marker.to_string(),
        }
    }

    fn check(&self, file_path: &str) -> Result<(), VectorError> {
        if file_path.contains(&self.marker) {
            Err(VectorError::Storage {
                message: format!("refusing to write {file_path}"),
                suggestion: "test store".to_string(),
            })
        } else {
            Ok(())
        }
    }
}

impl VectorStore for FailingStore {
    fn dimension(&self) -> VectorDimension {
        self.inner.dimension()
    }

    fn delete_by_file(&mut self, file_path: &str) -> Result<usize, VectorError> {
        self.check(file_path)?;
        self.inner.delete_by_file(file_path)
    }

    fn insert_batch(
        &mut self,
        vectors: Vec<Vec<f32>>,
        metadata: Vec<ChunkMetadata>,
        texts: Vec<String>,
    ) -> Result<(), VectorError> {
        if let Some(first) = metadata.first() {
            self.check(&first.file_path)?;
        }
        self.inner.insert_batch(vectors, metadata, texts)
    }

    fn update_file(
        &mut self,
        file_path: &str,
        vectors: Vec<Vec<f32>>,
        metadata: Vec<ChunkMetadata>,
        texts: Vec<String>,
    ) -> Result<(), VectorError> {
        self.check(file_path)?;
        self.inner.update_file(file_path, vectors, metadata, texts)
    }

    fn search(&self, query: &[f32], limit: usize) -> Result<Vec<SearchHit>, VectorError> {
        self.inner.search(query, limit)
    }

    fn len(&self) -> usize {
        self.inner.len()
    }

    fn file_chunk_count(&self, file_path: &str) -> usize {
        self.inner.file_chunk_count(file_path)
    }

    fn save(&mut self) -> Result<(), VectorError> {
        self.inner.save()
    }
}
