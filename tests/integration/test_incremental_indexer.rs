//! End-to-end behavior of the incremental indexer over real files, with
//! deterministic chunker, generator and store.

use crate::common::{DIM, FailingStore, MODEL, ParagraphChunker, RecordingGenerator};
use codevec::{
    CacheConfig, EmbeddingCache, EmbeddingGenerator, FileDisposition, IncrementalIndexer,
    IndexerComponents, LocalVectorStore, Manifest, Settings, VectorDimension, VectorError,
    VectorStore,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::TempDir;

struct Workspace {
    dir: TempDir,
    settings: Arc<Settings>,
}

impl Workspace {
    fn new() -> Self {
        Self::with_threads(4)
    }

    fn with_threads(threads: usize) -> Self {
        Self::with_settings(|settings| settings.indexing.parallel_threads = threads)
    }

    fn with_settings(edit: impl FnOnce(&mut Settings)) -> Self {
        let dir = TempDir::new().unwrap();
        let mut settings = Settings::default();
        settings.workspace_root = Some(dir.path().to_path_buf());
        settings.indexing.parallel_threads = 4;
        settings.indexing.embed_batch_size = 3;
        edit(&mut settings);
        Self {
            dir,
            settings: Arc::new(settings),
        }
    }

    fn root(&self) -> &Path {
        self.dir.path()
    }

    fn write(&self, name: &str, content: &str) -> PathBuf {
        let path = self.root().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, content).unwrap();
        path
    }

    fn dimension() -> VectorDimension {
        VectorDimension::new(DIM).unwrap()
    }

    fn memory_cache() -> EmbeddingCache {
        EmbeddingCache::in_memory(MODEL, Self::dimension(), 1000).unwrap()
    }

    fn persistent_cache(&self) -> EmbeddingCache {
        EmbeddingCache::initialize(CacheConfig {
            path_prefix: Some(self.settings.cache_prefix()),
            model_name: MODEL.to_string(),
            dimension: Self::dimension(),
            max_entries: 1000,
        })
        .unwrap()
    }

    fn indexer_with(
        &self,
        generator: Arc<dyn EmbeddingGenerator>,
        cache: EmbeddingCache,
        store: Box<dyn VectorStore>,
        manifest: Manifest,
    ) -> IncrementalIndexer {
        IncrementalIndexer::new(
            Arc::clone(&self.settings),
            IndexerComponents {
                chunker: Arc::new(ParagraphChunker),
                generator,
                cache,
                store,
                manifest,
            },
        )
        .unwrap()
    }

    fn indexer(&self, generator: &Arc<RecordingGenerator>) -> IncrementalIndexer {
        self.indexer_with(
            generator.clone(),
            Self::memory_cache(),
            Box::new(LocalVectorStore::in_memory(Self::dimension())),
            Manifest::in_memory(),
        )
    }
}

#[tokio::test]
async fn deleted_file_is_removed_from_store_and_manifest() {
    let ws = Workspace::new();
    let generator = Arc::new(RecordingGenerator::new());
    let mut indexer = ws.indexer(&generator);

    ws.write("a.rs", "fn a() {}\n\nfn a2() {}\n");
    ws.write("b.rs", "fn b() {}\n");
    let first = indexer.index_paths(["a.rs", "b.rs"]).await;
    assert_eq!(first.files_processed, 2);
    assert_eq!(indexer.store().file_chunk_count("a.rs"), 2);

    fs::remove_file(ws.root().join("a.rs")).unwrap();
    let second = indexer.index_paths(["a.rs"]).await;

    assert_eq!(second.files_processed, 1);
    assert_eq!(second.files_deleted, 1);
    assert_eq!(indexer.store().file_chunk_count("a.rs"), 0);
    assert_eq!(indexer.store().file_chunk_count("b.rs"), 1);
    assert!(indexer.manifest().get("a.rs").is_none());
    assert!(indexer.manifest().get("b.rs").is_some());
}

#[tokio::test]
async fn never_indexed_missing_file_is_a_deletion() {
    let ws = Workspace::new();
    let generator = Arc::new(RecordingGenerator::new());
    let mut indexer = ws.indexer(&generator);

    let disposition = indexer.index_file("nowhere.rs").await.unwrap();

    assert_eq!(disposition, FileDisposition::Deleted);
    assert!(indexer.manifest().is_empty());
    assert_eq!(generator.call_count(), 0);
}

#[tokio::test]
async fn file_without_chunks_keeps_zero_chunk_manifest_entry() {
    let ws = Workspace::new();
    let generator = Arc::new(RecordingGenerator::new());
    let mut indexer = ws.indexer(&generator);

    let path = ws.write("notes.rs", "first paragraph\n");
    indexer.index_file(&path).await.unwrap();
    assert_eq!(indexer.store().file_chunk_count("notes.rs"), 1);

    ws.write("notes.rs", "  \n\n\t\n");
    let disposition = indexer.index_file(&path).await.unwrap();

    assert_eq!(disposition, FileDisposition::Empty);
    assert_eq!(indexer.store().file_chunk_count("notes.rs"), 0);
    let entry = indexer.manifest().get("notes.rs").unwrap();
    assert_eq!(entry.chunk_count, 0);
    assert_eq!(entry.filepath, "notes.rs");
}

#[tokio::test]
async fn missing_files_count_as_processed() {
    let ws = Workspace::new();
    let generator = Arc::new(RecordingGenerator::new());
    let mut indexer = ws.indexer(&generator);

    let mut paths = Vec::new();
    for i in 0..5 {
        paths.push(ws.write(&format!("src/f{i}.rs"), &format!("fn f{i}() {{}}\n")));
    }
    for i in 0..3 {
        paths.push(ws.root().join(format!("src/missing{i}.rs")));
    }

    let processed = indexer.index_files(&paths).await;

    assert_eq!(processed, 8);
    assert_eq!(indexer.manifest().len(), 5);
    assert_eq!(indexer.store().len(), 5);
}

#[tokio::test]
async fn unchanged_files_are_not_re_embedded() {
    let ws = Workspace::new();
    let generator = Arc::new(RecordingGenerator::new());
    let mut indexer = ws.indexer(&generator);

    ws.write("a.rs", "fn a() {}\n");
    ws.write("b.rs", "fn b() {}\n\nfn c() {}\n");
    let first = indexer.index_paths(["a.rs", "b.rs"]).await;
    assert_eq!(first.chunks_indexed, 3);
    let calls_after_first = generator.call_count();

    let second = indexer.index_paths(["a.rs", "b.rs"]).await;

    assert_eq!(second.files_processed, 2);
    assert_eq!(second.files_unchanged, 2);
    assert_eq!(second.chunks_indexed, 0);
    assert_eq!(generator.call_count(), calls_after_first);
    assert_eq!(indexer.store().len(), 3);
}

#[tokio::test]
async fn store_failure_is_isolated_to_its_file() {
    let ws = Workspace::new();
    let generator = Arc::new(RecordingGenerator::new());
    let mut indexer = ws.indexer_with(
        generator.clone(),
        Workspace::memory_cache(),
        Box::new(FailingStore::new("broken")),
        Manifest::in_memory(),
    );

    ws.write("ok1.rs", "fn one() {}\n");
    ws.write("broken.rs", "fn broken() {}\n");
    ws.write("ok2.rs", "fn two() {}\n");

    let stats = indexer
        .index_paths(["ok1.rs", "broken.rs", "ok2.rs"])
        .await;

    assert_eq!(stats.files_processed, 2);
    assert_eq!(stats.files_failed, 1);
    assert_eq!(stats.errors.len(), 1);
    assert_eq!(stats.errors[0].0, "broken.rs");
    assert!(indexer.manifest().get("broken.rs").is_none());
    assert_eq!(indexer.store().file_chunk_count("ok1.rs"), 1);
    assert_eq!(indexer.store().file_chunk_count("ok2.rs"), 1);
}

#[tokio::test]
async fn chunking_failure_is_isolated_to_its_file() {
    let ws = Workspace::new();
    let generator = Arc::new(RecordingGenerator::new());
    let mut indexer = ws.indexer(&generator);

    ws.write("good.rs", "fn good() {}\n");
    ws.write("bad.rs", "!unparseable\n");

    let stats = indexer.index_paths(["good.rs", "bad.rs"]).await;

    assert_eq!(stats.files_processed, 1);
    assert_eq!(stats.files_failed, 1);
    assert_eq!(stats.errors[0].0, "bad.rs");
    assert!(indexer.manifest().get("good.rs").is_some());
    assert!(indexer.manifest().get("bad.rs").is_none());
}

#[tokio::test]
async fn embedding_cache_is_reused_across_runs() {
    let ws = Workspace::new();
    ws.write("a.rs", "fn a() {}\n\nfn b() {}\n");
    ws.write("c.rs", "fn c() {}\n");

    let first_generator = Arc::new(RecordingGenerator::new());
    {
        let mut indexer = ws.indexer_with(
            first_generator.clone(),
            ws.persistent_cache(),
            Box::new(LocalVectorStore::in_memory(Workspace::dimension())),
            Manifest::load(ws.settings.manifest_path()),
        );
        let stats = indexer.index_paths(["a.rs", "c.rs"]).await;
        assert_eq!(stats.chunks_indexed, 3);
        assert_eq!(stats.cache_misses, 3);
    }
    assert_eq!(first_generator.embedded().len(), 3);
    assert_eq!(Manifest::load(ws.settings.manifest_path()).len(), 2);

    // Fresh manifest and store, so every file is processed again.
    let second_generator = Arc::new(RecordingGenerator::new());
    let mut indexer = ws.indexer_with(
        second_generator.clone(),
        ws.persistent_cache(),
        Box::new(LocalVectorStore::in_memory(Workspace::dimension())),
        Manifest::in_memory(),
    );
    let stats = indexer.index_paths(["a.rs", "c.rs"]).await;

    assert_eq!(stats.chunks_indexed, 3);
    assert_eq!(stats.cache_hits, 3);
    assert_eq!(stats.cache_misses, 0);
    assert_eq!(second_generator.call_count(), 0);
}

#[tokio::test]
async fn repeated_chunk_text_is_embedded_once() {
    let ws = Workspace::new();
    let generator = Arc::new(RecordingGenerator::new());
    let mut indexer = ws.indexer(&generator);

    ws.write("dup.rs", "fn same() {}\n\nfn same() {}\n\nfn other() {}\n");
    let disposition = indexer.index_file("dup.rs").await.unwrap();

    assert_eq!(disposition, FileDisposition::Updated { chunk_count: 3 });
    assert_eq!(
        generator.embedded(),
        vec!["fn same() {}".to_string(), "fn other() {}".to_string()]
    );
}

#[tokio::test]
async fn equivalent_paths_share_one_manifest_key() {
    let ws = Workspace::new();
    let generator = Arc::new(RecordingGenerator::new());
    let mut indexer = ws.indexer(&generator);

    let absolute = ws.write("src/lib.rs", "fn lib() {}\n");
    indexer.index_file(&absolute).await.unwrap();
    let again = indexer.index_file("src/../src/./lib.rs").await.unwrap();

    assert_eq!(again, FileDisposition::Unchanged);
    let keys: Vec<&str> = indexer.manifest().paths().collect();
    assert_eq!(keys, vec!["src/lib.rs"]);
}

#[tokio::test]
async fn search_ranks_exact_chunk_first() {
    let ws = Workspace::new();
    let generator = Arc::new(RecordingGenerator::new());
    let mut indexer = ws.indexer(&generator);

    ws.write("a.rs", "fn parse_config() {}\n\nzzzz zzzz zzzz\n");
    indexer.index_file("a.rs").await.unwrap();

    let hits = indexer.search("fn parse_config() {}", 2).await.unwrap();

    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].text, "fn parse_config() {}");
    assert_eq!(hits[0].start_line, 1);
}

#[tokio::test]
async fn search_drops_hits_below_threshold() {
    let ws = Workspace::with_settings(|settings| settings.semantic_search.threshold = 0.99);
    let generator = Arc::new(RecordingGenerator::new());
    let mut indexer = ws.indexer(&generator);

    ws.write("a.rs", "fn parse_config() {}\n\nzzzz zzzz zzzz\n");
    indexer.index_file("a.rs").await.unwrap();

    let hits = indexer.search("fn parse_config() {}", 2).await.unwrap();

    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].text, "fn parse_config() {}");
}

#[tokio::test]
async fn non_utf8_source_is_indexed_lossily() {
    let ws = Workspace::new();
    let generator = Arc::new(RecordingGenerator::new());
    let mut indexer = ws.indexer(&generator);

    // Latin-1 encoded comment.
    fs::write(ws.root().join("legacy.rs"), b"// caf\xe9\nfn legacy() {}\n").unwrap();
    let first = indexer.index_file("legacy.rs").await.unwrap();

    assert_eq!(first, FileDisposition::Updated { chunk_count: 1 });
    assert!(generator.embedded()[0].contains("caf\u{FFFD}"));
    let entry = indexer.manifest().get("legacy.rs").unwrap();
    assert_eq!(entry.content_hash, codevec::calculate_hash(b"// caf\xe9\nfn legacy() {}\n"));

    let second = indexer.index_file("legacy.rs").await.unwrap();
    assert_eq!(second, FileDisposition::Unchanged);
}

/// Generator that sleeps while embedding and records peak concurrency.
struct ConcurrencyGauge {
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl EmbeddingGenerator for ConcurrencyGauge {
    fn generate_embeddings(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, VectorError> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(30));
        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(texts
            .iter()
            .map(|t| crate::common::fake_embedding(t))
            .collect())
    }

    fn dimension(&self) -> VectorDimension {
        Workspace::dimension()
    }

    fn model_name(&self) -> &str {
        MODEL
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrency_is_bounded_by_parallel_threads() {
    let ws = Workspace::with_threads(2);
    let gauge = Arc::new(ConcurrencyGauge {
        active: AtomicUsize::new(0),
        peak: AtomicUsize::new(0),
    });
    let mut indexer = ws.indexer_with(
        gauge.clone(),
        Workspace::memory_cache(),
        Box::new(LocalVectorStore::in_memory(Workspace::dimension())),
        Manifest::in_memory(),
    );

    let paths: Vec<PathBuf> = (0..8)
        .map(|i| ws.write(&format!("f{i}.rs"), &format!("fn f{i}() {{}}\n")))
        .collect();
    let stats = indexer.index_paths(&paths).await;

    assert_eq!(stats.files_processed, 8);
    assert!(gauge.peak.load(Ordering::SeqCst) <= 2);
    assert_eq!(indexer.store().len(), 8);
}
