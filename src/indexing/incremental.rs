//! Incremental indexing orchestrator.
//!
//! Turns file paths into vector store records, redoing only what changed:
//!
//! 1. Each path is normalized, stat'ed, read and hashed. A missing file is a
//!    deletion; a hash equal to the manifest's is unchanged.
//! 2. Changed content is chunked and embedded through the embedding cache in
//!    micro-batches.
//! 3. The result is applied to the vector store and recorded for the
//!    manifest.
//!
//! In the batch path steps 1-2 run as tokio tasks, at most
//! `indexing.parallel_threads` at a time. Step 3 runs on the calling task,
//! one file at a time, in completion order; the vector store is never
//! touched concurrently. A failure in any step is logged and counted
//! against that file only.

use crate::cache::{CacheConfig, EmbeddingCache, embed_batch_with_cache};
use crate::chunking::{ChunkMetadata, ChunkOptions, Chunker, TreeSitterChunker};
use crate::config::Settings;
use crate::error::{IndexError, IndexResult};
use crate::indexing::{
    FileInfo, FileWalker, IndexStats, Manifest, ManifestEntry, PathNormalizer,
};
use crate::vector::{
    EmbeddingGenerator, FastEmbedGenerator, LocalVectorStore, SearchHit, VectorError, VectorStore,
};
use indicatif::ProgressBar;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use tokio::task::{Id, JoinSet};
use tracing::{debug, error, info, warn};

/// What indexing did with one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileDisposition {
    /// The file no longer exists, or ignore rules now exclude it; its
    /// chunks and manifest entry are gone.
    Deleted,
    /// The file produced no chunks; old chunks removed, manifest keeps a
    /// zero-chunk entry.
    Empty,
    /// Chunks replaced with freshly embedded ones.
    Updated { chunk_count: usize },
    /// Content hash matched the manifest; nothing written.
    Unchanged,
}

/// Collaborators the indexer drives.
pub struct IndexerComponents {
    pub chunker: Arc<dyn Chunker>,
    pub generator: Arc<dyn EmbeddingGenerator>,
    pub cache: EmbeddingCache,
    pub store: Box<dyn VectorStore>,
    pub manifest: Manifest,
}

/// Result of processing one file, consumed once by the apply step.
enum FileOutcome {
    Deleted,
    Unchanged,
    Empty {
        entry: ManifestEntry,
    },
    Updated {
        entry: ManifestEntry,
        vectors: Vec<Vec<f32>>,
        metadata: Vec<ChunkMetadata>,
        texts: Vec<String>,
    },
}

enum ManifestChange {
    Upsert(ManifestEntry),
    Remove(String),
}

type ProcessTask = (String, IndexResult<FileOutcome>);

/// Read-only state shared by the processing tasks of one batch.
struct FileProcessor {
    normalizer: PathNormalizer,
    chunker: Arc<dyn Chunker>,
    generator: Arc<dyn EmbeddingGenerator>,
    cache: Arc<Mutex<EmbeddingCache>>,
    /// Manifest hashes as of the start of the batch.
    known_hashes: HashMap<String, String>,
    chunk_options: ChunkOptions,
    embed_batch_size: usize,
    force: bool,
    /// Tracked paths that ignore rules now exclude; dropped like deletions.
    excluded: HashSet<String>,
}

impl FileProcessor {
    async fn process(&self, path: &str) -> IndexResult<FileOutcome> {
        if self.excluded.contains(path) {
            return Ok(FileOutcome::Deleted);
        }
        let full_path = self.normalizer.resolve(path);

        let metadata = match tokio::fs::metadata(&full_path).await {
            Ok(metadata) if metadata.is_file() => metadata,
            Ok(_) => return Ok(FileOutcome::Deleted),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(FileOutcome::Deleted);
            }
            Err(source) => {
                return Err(IndexError::FileRead {
                    path: full_path,
                    source,
                });
            }
        };

        // The file can vanish between stat and read.
        let bytes = match tokio::fs::read(&full_path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(FileOutcome::Deleted);
            }
            Err(source) => {
                return Err(IndexError::FileRead {
                    path: full_path,
                    source,
                });
            }
        };

        let info = FileInfo::new(path, &bytes, &metadata);
        if !self.force && self.known_hashes.get(path) == Some(&info.hash) {
            return Ok(FileOutcome::Unchanged);
        }

        // Stray non-UTF-8 bytes (legacy encodings in comments) are replaced
        // rather than failing the file.
        let content = String::from_utf8_lossy(&bytes);

        let chunks = self
            .chunker
            .chunk(path, &content, &self.chunk_options)
            .map_err(|source| IndexError::Chunking {
                path: path.to_string(),
                source,
            })?;
        if chunks.is_empty() {
            return Ok(FileOutcome::Empty {
                entry: info.to_manifest_entry(0),
            });
        }

        let (texts, metadata): (Vec<String>, Vec<ChunkMetadata>) = chunks
            .into_iter()
            .map(|chunk| (chunk.content, chunk.metadata))
            .unzip();
        let vectors = self.embed(path, &texts).await?;

        Ok(FileOutcome::Updated {
            entry: info.to_manifest_entry(texts.len()),
            vectors,
            metadata,
            texts,
        })
    }

    /// Embed in micro-batches, yielding to the scheduler between them.
    async fn embed(&self, path: &str, texts: &[String]) -> IndexResult<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for (i, batch) in texts.chunks(self.embed_batch_size).enumerate() {
            if i > 0 {
                tokio::task::yield_now().await;
            }
            let embedded = embed_batch_with_cache(batch, &self.cache, &self.generator)
                .await
                .map_err(|source| IndexError::Embedding {
                    path: path.to_string(),
                    source,
                })?;
            vectors.extend(embedded);
        }
        Ok(vectors)
    }
}

/// Keeps a vector store and manifest in step with a directory tree.
pub struct IncrementalIndexer {
    settings: Arc<Settings>,
    normalizer: PathNormalizer,
    chunker: Arc<dyn Chunker>,
    generator: Arc<dyn EmbeddingGenerator>,
    cache: Arc<Mutex<EmbeddingCache>>,
    store: Box<dyn VectorStore>,
    manifest: Manifest,
    force: bool,
    progress: Option<ProgressBar>,
}

impl IncrementalIndexer {
    /// Assemble an indexer over the given collaborators.
    ///
    /// Fails if the generator, cache and store disagree on dimension or the
    /// cache was opened for another model.
    pub fn new(settings: Arc<Settings>, components: IndexerComponents) -> IndexResult<Self> {
        let dimension = components.generator.dimension();
        if components.cache.dimension() != dimension || components.store.dimension() != dimension
        {
            return Err(IndexError::ConfigError {
                reason: format!(
                    "dimension mismatch: generator {dimension}, cache {}, store {}",
                    components.cache.dimension(),
                    components.store.dimension()
                ),
            });
        }
        if components.cache.model_name() != components.generator.model_name() {
            return Err(IndexError::ConfigError {
                reason: format!(
                    "embedding cache belongs to '{}' but the generator is '{}'",
                    components.cache.model_name(),
                    components.generator.model_name()
                ),
            });
        }

        Ok(Self {
            normalizer: PathNormalizer::new(settings.root_dir()),
            settings,
            chunker: components.chunker,
            generator: components.generator,
            cache: Arc::new(Mutex::new(components.cache)),
            store: components.store,
            manifest: components.manifest,
            force: false,
            progress: None,
        })
    }

    /// Open the on-disk index described by `settings` with the default
    /// tree-sitter chunker and fastembed model.
    pub fn open(settings: Arc<Settings>) -> IndexResult<Self> {
        settings
            .validate()
            .map_err(|reason| IndexError::ConfigError { reason })?;

        let model = settings.semantic_search.model.clone();
        let generator = FastEmbedGenerator::new(&model, Settings::models_dir(), true)
            .map_err(|source| IndexError::Embedding {
                path: model.clone(),
                source,
            })?;
        let generator: Arc<dyn EmbeddingGenerator> = Arc::new(generator);
        let dimension = generator.dimension();

        let index_dir = settings.index_dir();
        std::fs::create_dir_all(&index_dir).map_err(|source| IndexError::FileWrite {
            path: index_dir.clone(),
            source,
        })?;

        let cache = if settings.cache.enabled {
            EmbeddingCache::initialize(CacheConfig {
                path_prefix: Some(settings.cache_prefix()),
                model_name: generator.model_name().to_string(),
                dimension,
                max_entries: settings.cache.max_entries,
            })?
        } else {
            EmbeddingCache::in_memory(
                generator.model_name(),
                dimension,
                settings.cache.max_entries,
            )?
        };

        let store = LocalVectorStore::open(settings.vector_store_path(), dimension).map_err(
            |source| IndexError::VectorStore {
                operation: "open".to_string(),
                source,
            },
        )?;

        let mut manifest = Manifest::load(settings.manifest_path());
        if store.is_empty() && manifest.total_chunks() > 0 {
            warn!(
                "vector store is empty but the manifest lists {} chunks, re-indexing everything",
                manifest.total_chunks()
            );
            manifest.clear();
        }

        Self::new(
            settings,
            IndexerComponents {
                chunker: Arc::new(TreeSitterChunker::new()),
                generator,
                cache,
                store: Box::new(store),
                manifest,
            },
        )
    }

    /// Re-process files even when their content hash is unchanged.
    pub fn set_force(&mut self, force: bool) {
        self.force = force;
    }

    /// Report batch progress on `progress` (one tick per file).
    pub fn set_progress(&mut self, progress: Option<ProgressBar>) {
        self.progress = progress;
    }

    #[must_use]
    pub fn normalizer(&self) -> &PathNormalizer {
        &self.normalizer
    }

    #[must_use]
    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    #[must_use]
    pub fn store(&self) -> &dyn VectorStore {
        self.store.as_ref()
    }

    #[must_use]
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Entries, hits and misses of the embedding cache.
    #[must_use]
    pub fn cache_stats(&self) -> crate::cache::CacheStats {
        self.cache.lock().stats()
    }

    fn processor(&self) -> FileProcessor {
        FileProcessor {
            normalizer: self.normalizer.clone(),
            chunker: Arc::clone(&self.chunker),
            generator: Arc::clone(&self.generator),
            cache: Arc::clone(&self.cache),
            known_hashes: self.manifest.content_hashes(),
            chunk_options: self.settings.chunking.options(),
            embed_batch_size: self.settings.indexing.embed_batch_size.max(1),
            force: self.force,
            excluded: HashSet::new(),
        }
    }

    /// Index one file and persist the result.
    ///
    /// A missing file or one without chunks is a normal outcome, not an
    /// error.
    pub async fn index_file(&mut self, path: impl AsRef<Path>) -> IndexResult<FileDisposition> {
        let normalized = self.normalizer.normalize(path);
        let outcome = self.processor().process(&normalized).await?;
        let (disposition, change) = self.apply(&normalized, outcome)?;
        self.record_manifest_changes(change.into_iter().collect());
        self.persist()?;
        Ok(disposition)
    }

    /// Index many files. Returns how many were processed, counting
    /// deletions and unchanged files.
    pub async fn index_files<I, P>(&mut self, paths: I) -> usize
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        self.index_paths(paths).await.files_processed
    }

    /// Walk `dir` and index every supported file, plus every manifest entry
    /// under `dir` so files deleted since the last run are removed. Tracked
    /// files that ignore rules now exclude are removed as well.
    pub async fn index_directory(&mut self, dir: impl AsRef<Path>) -> IndexStats {
        let dir = dir.as_ref();
        let full_dir = self.normalizer.resolve(&self.normalizer.normalize(dir));
        let walker = FileWalker::new(Arc::clone(&self.settings));

        let mut paths: Vec<String> = walker
            .walk(&full_dir)
            .map(|path| self.normalizer.normalize(path))
            .collect();
        let walked = paths.len();

        // Ignore files above `dir` still apply when it is inside the root.
        let filter_root = if full_dir.starts_with(self.normalizer.root()) {
            self.normalizer.root().to_path_buf()
        } else {
            full_dir.clone()
        };
        let mut filter = walker.filter(&filter_root);

        let dir_key = self.normalizer.normalize(dir);
        let mut excluded = HashSet::new();
        let known: Vec<String> = self
            .manifest
            .paths()
            .filter(|path| is_under(path, &dir_key))
            .map(str::to_string)
            .collect();
        for path in known {
            if filter.is_excluded(&self.normalizer.resolve(&path)) {
                excluded.insert(path.clone());
            }
            paths.push(path);
        }

        info!(
            "indexing {}: {walked} files found, {} tracked, {} newly excluded",
            full_dir.display(),
            self.manifest.len(),
            excluded.len()
        );
        self.run_batch(paths, excluded).await
    }

    /// Batch path: bounded concurrent processing, serialized writes, one
    /// manifest save at the end.
    pub async fn index_paths<I, P>(&mut self, paths: I) -> IndexStats
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let paths: Vec<String> = paths
            .into_iter()
            .map(|path| self.normalizer.normalize(path))
            .collect();
        self.run_batch(paths, HashSet::new()).await
    }

    async fn run_batch(&mut self, paths: Vec<String>, excluded: HashSet<String>) -> IndexStats {
        let mut stats = IndexStats::new();
        let cache_before = self.cache_stats();

        let mut seen = HashSet::new();
        let queue: Vec<String> = paths
            .into_iter()
            .filter(|path| seen.insert(path.clone()))
            .collect();
        if let Some(progress) = &self.progress {
            progress.set_length(queue.len() as u64);
        }

        let processor = Arc::new(FileProcessor {
            excluded,
            ..self.processor()
        });
        let concurrency = self.settings.indexing.parallel_threads.max(1);
        debug!(
            "indexing {} files with {concurrency} concurrent tasks",
            queue.len()
        );

        let mut pending = queue.into_iter();
        let mut tasks: JoinSet<ProcessTask> = JoinSet::new();
        let mut in_flight: HashMap<Id, String> = HashMap::new();
        let mut manifest_changes = Vec::new();

        for path in pending.by_ref().take(concurrency) {
            spawn_processing(&mut tasks, &mut in_flight, &processor, path);
        }

        while let Some(joined) = tasks.join_next_with_id().await {
            // Keep the pool full while this result is written.
            if let Some(next) = pending.next() {
                spawn_processing(&mut tasks, &mut in_flight, &processor, next);
            }

            match joined {
                Ok((id, (path, Ok(outcome)))) => {
                    in_flight.remove(&id);
                    match self.apply(&path, outcome) {
                        Ok((disposition, change)) => {
                            stats.files_processed += 1;
                            match disposition {
                                FileDisposition::Deleted => stats.files_deleted += 1,
                                FileDisposition::Unchanged => stats.files_unchanged += 1,
                                FileDisposition::Updated { chunk_count } => {
                                    stats.chunks_indexed += chunk_count;
                                }
                                FileDisposition::Empty => {}
                            }
                            manifest_changes.extend(change);
                        }
                        Err(e) => {
                            error!(path = %path, "failed to write index data: {e}");
                            stats.add_error(path, e);
                        }
                    }
                }
                Ok((id, (path, Err(e)))) => {
                    in_flight.remove(&id);
                    warn!(path = %path, "failed to process file: {e}");
                    stats.add_error(path, e);
                }
                Err(e) => {
                    let path = in_flight.remove(&e.id()).unwrap_or_default();
                    error!(path = %path, "indexing task failed: {e}");
                    stats.add_error(path, IndexError::TaskFailed(e.to_string()));
                }
            }

            if let Some(progress) = &self.progress {
                progress.inc(1);
            }
        }

        self.record_manifest_changes(manifest_changes);
        if let Err(e) = self.persist() {
            error!("failed to persist index: {e}");
        }

        let cache_after = self.cache_stats();
        stats.cache_hits = cache_after.hits.saturating_sub(cache_before.hits);
        stats.cache_misses = cache_after.misses.saturating_sub(cache_before.misses);
        stats.stop_timing();

        if let Some(progress) = &self.progress {
            progress.finish_and_clear();
        }
        stats
    }

    /// Apply one file's outcome to the vector store.
    fn apply(
        &mut self,
        path: &str,
        outcome: FileOutcome,
    ) -> IndexResult<(FileDisposition, Option<ManifestChange>)> {
        let store_error = |operation: &str| {
            let operation = format!("{operation} '{path}'");
            move |source: VectorError| IndexError::VectorStore { operation, source }
        };

        match outcome {
            FileOutcome::Deleted => {
                let removed = self
                    .store
                    .delete_by_file(path)
                    .map_err(store_error("delete"))?;
                debug!("{path}: deleted ({removed} chunks removed)");
                Ok((
                    FileDisposition::Deleted,
                    Some(ManifestChange::Remove(path.to_string())),
                ))
            }
            FileOutcome::Unchanged => Ok((FileDisposition::Unchanged, None)),
            FileOutcome::Empty { entry } => {
                self.store
                    .delete_by_file(path)
                    .map_err(store_error("delete"))?;
                debug!("{path}: no chunks");
                Ok((FileDisposition::Empty, Some(ManifestChange::Upsert(entry))))
            }
            FileOutcome::Updated {
                entry,
                vectors,
                metadata,
                texts,
            } => {
                let chunk_count = vectors.len();
                self.store
                    .update_file(path, vectors, metadata, texts)
                    .map_err(store_error("update"))?;
                debug!("{path}: {chunk_count} chunks");
                Ok((
                    FileDisposition::Updated { chunk_count },
                    Some(ManifestChange::Upsert(entry)),
                ))
            }
        }
    }

    fn record_manifest_changes(&mut self, changes: Vec<ManifestChange>) {
        let mut upserts = Vec::new();
        let mut removals = Vec::new();
        for change in changes {
            match change {
                ManifestChange::Upsert(entry) => upserts.push(entry),
                ManifestChange::Remove(path) => removals.push(path),
            }
        }
        self.manifest.update_files(upserts);
        self.manifest.remove_files(removals.iter().map(String::as_str));
    }

    /// Flush the cache, the vector store and the manifest.
    pub fn persist(&mut self) -> IndexResult<()> {
        self.cache.lock().flush()?;
        self.store
            .save()
            .map_err(|source| IndexError::VectorStore {
                operation: "save".to_string(),
                source,
            })?;
        self.manifest.save()
    }

    /// Semantic search over indexed chunks, best first. Hits scoring below
    /// `semantic_search.threshold` are dropped.
    pub async fn search(&self, query: &str, limit: usize) -> IndexResult<Vec<SearchHit>> {
        let texts = [query.to_string()];
        let query_vector = embed_batch_with_cache(&texts, &self.cache, &self.generator)
            .await
            .map_err(|source| IndexError::Embedding {
                path: "<query>".to_string(),
                source,
            })?
            .pop()
            .ok_or_else(|| IndexError::General("no embedding produced for query".to_string()))?;

        let threshold = self.settings.semantic_search.threshold;
        let mut hits = self
            .store
            .search(&query_vector, limit)
            .map_err(|source| IndexError::VectorStore {
                operation: "search".to_string(),
                source,
            })?;
        hits.retain(|hit| hit.score >= threshold);
        Ok(hits)
    }
}

fn spawn_processing(
    tasks: &mut JoinSet<ProcessTask>,
    in_flight: &mut HashMap<Id, String>,
    processor: &Arc<FileProcessor>,
    path: String,
) {
    let processor = Arc::clone(processor);
    let task_path = path.clone();
    let handle = tasks.spawn(async move {
        let result = processor.process(&task_path).await;
        (task_path, result)
    });
    in_flight.insert(handle.id(), path);
}

/// Whether normalized `path` lies inside normalized `dir`.
fn is_under(path: &str, dir: &str) -> bool {
    dir == "."
        || path
            .strip_prefix(dir)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
}
