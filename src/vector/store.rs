//! Vector backend that stores chunk embeddings per file.
//!
//! [`VectorStore`] is the contract the indexer writes through. None of its
//! methods are safe to call concurrently on one instance; the indexer funnels
//! every write through a single serialized apply loop.
//!
//! [`LocalVectorStore`] keeps records in memory and persists them to one
//! bincode file. Saves go through a temp file and a rename so a crash never
//! leaves a half-written store behind.

use crate::chunking::ChunkMetadata;
use crate::vector::similarity::{cosine_similarity, top_k};
use crate::vector::{Score, VectorDimension, VectorError};
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Current on-disk format version.
const STORE_VERSION: u32 = 1;

/// One search result.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub file_path: String,
    pub start_line: u32,
    pub end_line: u32,
    pub kind: String,
    pub name: Option<String>,
    pub text: String,
    pub score: f32,
}

/// Storage backend for chunk vectors.
pub trait VectorStore: Send + Sync {
    /// Dimension every stored vector must have.
    fn dimension(&self) -> VectorDimension;

    /// Remove every chunk belonging to `file_path`. Returns how many were removed.
    fn delete_by_file(&mut self, file_path: &str) -> Result<usize, VectorError>;

    /// Append chunks. The three inputs are parallel arrays.
    fn insert_batch(
        &mut self,
        vectors: Vec<Vec<f32>>,
        metadata: Vec<ChunkMetadata>,
        texts: Vec<String>,
    ) -> Result<(), VectorError>;

    /// Replace all chunks of `file_path` with the given ones.
    ///
    /// Implementations validate the new chunks before deleting anything so a
    /// rejected update leaves the old chunks in place.
    fn update_file(
        &mut self,
        file_path: &str,
        vectors: Vec<Vec<f32>>,
        metadata: Vec<ChunkMetadata>,
        texts: Vec<String>,
    ) -> Result<(), VectorError>;

    /// Rank stored chunks against `query`, best first.
    fn search(&self, query: &[f32], limit: usize) -> Result<Vec<SearchHit>, VectorError>;

    /// Total number of stored chunks.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of chunks stored for one file.
    fn file_chunk_count(&self, file_path: &str) -> usize;

    /// Persist pending changes, if the backend is persistent.
    fn save(&mut self) -> Result<(), VectorError>;
}

#[derive(Debug, Clone, bincode::Encode, bincode::Decode)]
struct StoredChunk {
    metadata: ChunkMetadata,
    text: String,
    vector: Vec<f32>,
}

#[derive(bincode::Encode, bincode::Decode)]
struct StoreFile {
    version: u32,
    dimension: u32,
    chunks: Vec<StoredChunk>,
}

/// In-memory vector store with optional single-file persistence.
#[derive(Debug)]
pub struct LocalVectorStore {
    path: Option<PathBuf>,
    dimension: VectorDimension,
    chunks: Vec<StoredChunk>,
    dirty: bool,
}

impl LocalVectorStore {
    /// Store that never touches disk.
    #[must_use]
    pub fn in_memory(dimension: VectorDimension) -> Self {
        Self {
            path: None,
            dimension,
            chunks: Vec::new(),
            dirty: false,
        }
    }

    /// Open the store at `path`, or start empty if the file does not exist.
    ///
    /// A file written for a different dimension or format version is
    /// discarded with a warning: its vectors cannot be compared with the
    /// current model's.
    pub fn open(path: impl AsRef<Path>, dimension: VectorDimension) -> Result<Self, VectorError> {
        let path = path.as_ref().to_path_buf();
        let mut store = Self {
            path: Some(path.clone()),
            dimension,
            chunks: Vec::new(),
            dirty: false,
        };

        if !path.exists() {
            return Ok(store);
        }

        let bytes = std::fs::read(&path).map_err(|e| {
            VectorError::storage(
                format!("Failed to read vector store {}: {e}", path.display()),
                "Check file permissions",
            )
        })?;

        match bincode::decode_from_slice::<StoreFile, _>(&bytes, bincode::config::standard()) {
            Ok((file, _)) if file.version != STORE_VERSION => {
                tracing::warn!(
                    path = %path.display(),
                    "vector store version {} != {STORE_VERSION}, starting empty",
                    file.version
                );
                store.dirty = true;
            }
            Ok((file, _)) if file.dimension as usize != dimension.get() => {
                tracing::warn!(
                    path = %path.display(),
                    "vector store dimension {} != {dimension}, starting empty",
                    file.dimension
                );
                store.dirty = true;
            }
            Ok((file, _)) => {
                store.chunks = file.chunks;
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), "vector store unreadable ({e}), starting empty");
                store.dirty = true;
            }
        }

        Ok(store)
    }

    fn validate(
        &self,
        vectors: &[Vec<f32>],
        metadata: &[ChunkMetadata],
        texts: &[String],
    ) -> Result<(), VectorError> {
        if vectors.len() != metadata.len() || vectors.len() != texts.len() {
            return Err(VectorError::storage(
                format!(
                    "Mismatched batch: {} vectors, {} metadata, {} texts",
                    vectors.len(),
                    metadata.len(),
                    texts.len()
                ),
                "Pass one vector, metadata record and text per chunk",
            ));
        }
        for vector in vectors {
            self.dimension.validate_vector(vector)?;
        }
        Ok(())
    }

    fn append(&mut self, vectors: Vec<Vec<f32>>, metadata: Vec<ChunkMetadata>, texts: Vec<String>) {
        self.chunks.extend(
            vectors
                .into_iter()
                .zip(metadata)
                .zip(texts)
                .map(|((vector, metadata), text)| StoredChunk {
                    metadata,
                    text,
                    vector,
                }),
        );
        self.dirty = true;
    }

    fn remove_file_chunks(&mut self, file_path: &str) -> usize {
        let before = self.chunks.len();
        self.chunks.retain(|chunk| chunk.metadata.file_path != file_path);
        let removed = before - self.chunks.len();
        if removed > 0 {
            self.dirty = true;
        }
        removed
    }
}

impl VectorStore for LocalVectorStore {
    fn dimension(&self) -> VectorDimension {
        self.dimension
    }

    fn delete_by_file(&mut self, file_path: &str) -> Result<usize, VectorError> {
        Ok(self.remove_file_chunks(file_path))
    }

    fn insert_batch(
        &mut self,
        vectors: Vec<Vec<f32>>,
        metadata: Vec<ChunkMetadata>,
        texts: Vec<String>,
    ) -> Result<(), VectorError> {
        self.validate(&vectors, &metadata, &texts)?;
        self.append(vectors, metadata, texts);
        Ok(())
    }

    fn update_file(
        &mut self,
        file_path: &str,
        vectors: Vec<Vec<f32>>,
        metadata: Vec<ChunkMetadata>,
        texts: Vec<String>,
    ) -> Result<(), VectorError> {
        self.validate(&vectors, &metadata, &texts)?;
        self.remove_file_chunks(file_path);
        self.append(vectors, metadata, texts);
        Ok(())
    }

    fn search(&self, query: &[f32], limit: usize) -> Result<Vec<SearchHit>, VectorError> {
        self.dimension.validate_vector(query)?;

        let scored = self.chunks.iter().map(|chunk| {
            (
                chunk,
                Score::from_similarity(cosine_similarity(query, &chunk.vector)),
            )
        });

        Ok(top_k(scored, limit)
            .into_iter()
            .map(|(chunk, score)| SearchHit {
                file_path: chunk.metadata.file_path.clone(),
                start_line: chunk.metadata.start_line,
                end_line: chunk.metadata.end_line,
                kind: chunk.metadata.kind.clone(),
                name: chunk.metadata.name.clone(),
                text: chunk.text.clone(),
                score: score.get(),
            })
            .collect())
    }

    fn len(&self) -> usize {
        self.chunks.len()
    }

    fn file_chunk_count(&self, file_path: &str) -> usize {
        self.chunks
            .iter()
            .filter(|chunk| chunk.metadata.file_path == file_path)
            .count()
    }

    fn save(&mut self) -> Result<(), VectorError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if !self.dirty {
            return Ok(());
        }

        let file = StoreFile {
            version: STORE_VERSION,
            dimension: self.dimension.get() as u32,
            chunks: self.chunks.clone(),
        };
        let bytes = bincode::encode_to_vec(&file, bincode::config::standard()).map_err(|e| {
            VectorError::storage(
                format!("Failed to encode vector store: {e}"),
                "This is likely a bug in the code",
            )
        })?;

        write_atomic(path, &bytes).map_err(|e| {
            VectorError::storage(
                format!("Failed to write vector store {}: {e}", path.display()),
                "Check disk space and file permissions",
            )
        })?;

        self.dirty = false;
        Ok(())
    }
}

/// Write `bytes` to `path` through a sibling temp file and a rename.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent)?;

    let mut temp = tempfile::NamedTempFile::new_in(parent)?;
    temp.write_all(bytes)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn meta(file: &str, line: u32) -> ChunkMetadata {
        ChunkMetadata {
            file_path: file.to_string(),
            start_line: line,
            end_line: line + 1,
            kind: "function".to_string(),
            name: Some(format!("f{line}")),
            language: "rust".to_string(),
        }
    }

    fn dim(n: usize) -> VectorDimension {
        VectorDimension::new(n).unwrap()
    }

    #[test]
    fn test_update_file_replaces_only_that_file() {
        let mut store = LocalVectorStore::in_memory(dim(2));
        store
            .insert_batch(
                vec![vec![1.0, 0.0], vec![0.0, 1.0]],
                vec![meta("a.rs", 1), meta("b.rs", 1)],
                vec!["a".into(), "b".into()],
            )
            .unwrap();

        store
            .update_file(
                "a.rs",
                vec![vec![1.0, 1.0], vec![0.5, 0.5]],
                vec![meta("a.rs", 10), meta("a.rs", 20)],
                vec!["a1".into(), "a2".into()],
            )
            .unwrap();

        assert_eq!(store.len(), 3);
        assert_eq!(store.file_chunk_count("a.rs"), 2);
        assert_eq!(store.file_chunk_count("b.rs"), 1);
    }

    #[test]
    fn test_rejected_update_keeps_old_chunks() {
        let mut store = LocalVectorStore::in_memory(dim(2));
        store
            .insert_batch(vec![vec![1.0, 0.0]], vec![meta("a.rs", 1)], vec!["a".into()])
            .unwrap();

        let result = store.update_file(
            "a.rs",
            vec![vec![1.0, 0.0, 0.0]],
            vec![meta("a.rs", 2)],
            vec!["bad".into()],
        );

        assert!(matches!(result, Err(VectorError::DimensionMismatch { .. })));
        assert_eq!(store.file_chunk_count("a.rs"), 1);
    }

    #[test]
    fn test_delete_by_file() {
        let mut store = LocalVectorStore::in_memory(dim(2));
        store
            .insert_batch(
                vec![vec![1.0, 0.0], vec![0.0, 1.0]],
                vec![meta("a.rs", 1), meta("a.rs", 5)],
                vec!["a".into(), "b".into()],
            )
            .unwrap();

        assert_eq!(store.delete_by_file("a.rs").unwrap(), 2);
        assert_eq!(store.delete_by_file("missing.rs").unwrap(), 0);
        assert!(store.is_empty());
    }

    #[test]
    fn test_search_ranks_by_similarity() {
        let mut store = LocalVectorStore::in_memory(dim(2));
        store
            .insert_batch(
                vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![0.7, 0.7]],
                vec![meta("x.rs", 1), meta("y.rs", 1), meta("z.rs", 1)],
                vec!["x".into(), "y".into(), "z".into()],
            )
            .unwrap();

        let hits = store.search(&[1.0, 0.1], 2).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].file_path, "x.rs");
        assert_eq!(hits[1].file_path, "z.rs");
        assert!(hits[0].score >= hits[1].score);
    }

    #[test]
    fn test_persistence_across_instances() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("vectors.bin");

        {
            let mut store = LocalVectorStore::open(&path, dim(3)).unwrap();
            store
                .insert_batch(
                    vec![vec![1.0, 2.0, 3.0]],
                    vec![meta("src/lib.rs", 4)],
                    vec!["fn four() {}".into()],
                )
                .unwrap();
            store.save().unwrap();
        }

        let store = LocalVectorStore::open(&path, dim(3)).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.file_chunk_count("src/lib.rs"), 1);

        // A different dimension discards the old vectors.
        let store = LocalVectorStore::open(&path, dim(4)).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_corrupt_file_starts_empty() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("vectors.bin");
        std::fs::write(&path, b"definitely not bincode").unwrap();

        let store = LocalVectorStore::open(&path, dim(3)).unwrap();
        assert!(store.is_empty());
    }
}
