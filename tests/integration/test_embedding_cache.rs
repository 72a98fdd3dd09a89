//! Embedding cache persistence through the public API.

use codevec::{CacheConfig, CacheKey, EmbeddingCache, VectorDimension};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

const DIM: usize = 4;

fn open(prefix: &Path, model: &str, max_entries: usize) -> EmbeddingCache {
    EmbeddingCache::initialize(CacheConfig {
        path_prefix: Some(prefix.to_path_buf()),
        model_name: model.to_string(),
        dimension: VectorDimension::new(DIM).unwrap(),
        max_entries,
    })
    .unwrap()
}

fn vector(seed: f32) -> Vec<f32> {
    vec![seed, seed + 1.0, seed + 2.0, seed + 3.0]
}

#[test]
fn entries_and_recency_survive_restart() {
    let dir = TempDir::new().unwrap();
    let prefix = dir.path().join("index").join("embedding_cache");
    let (a, b, c, d) = (
        CacheKey::for_text("a"),
        CacheKey::for_text("b"),
        CacheKey::for_text("c"),
        CacheKey::for_text("d"),
    );

    {
        let mut cache = open(&prefix, "model", 3);
        cache.set(a.clone(), &vector(1.0)).unwrap();
        cache.set(b.clone(), &vector(2.0)).unwrap();
        cache.set(c.clone(), &vector(3.0)).unwrap();
        // `a` becomes most recent; `b` is now the eviction candidate.
        assert!(cache.get(&a).is_some());
        cache.flush().unwrap();
    }

    let mut cache = open(&prefix, "model", 3);
    assert_eq!(cache.len(), 3);
    assert_eq!(cache.get(&c), Some(vector(3.0)));

    cache.set(d.clone(), &vector(4.0)).unwrap();
    assert!(!cache.contains(&b));
    assert!(cache.contains(&a));
    assert!(cache.contains(&c));
    assert!(cache.contains(&d));
}

#[test]
fn unflushed_writes_are_lost_but_flushed_state_loads() {
    let dir = TempDir::new().unwrap();
    let prefix = dir.path().join("embedding_cache");
    let kept = CacheKey::for_text("kept");
    let lost = CacheKey::for_text("lost");

    {
        let mut cache = open(&prefix, "model", 10);
        cache.set(kept.clone(), &vector(1.0)).unwrap();
        cache.flush().unwrap();
        cache.set(lost.clone(), &vector(2.0)).unwrap();
    }

    let mut cache = open(&prefix, "model", 10);
    assert_eq!(cache.get(&kept), Some(vector(1.0)));
    assert_eq!(cache.get(&lost), None);
}

#[test]
fn corrupt_files_start_a_fresh_cache() {
    let dir = TempDir::new().unwrap();
    let prefix = dir.path().join("embedding_cache");
    let key = CacheKey::for_text("x");

    {
        let mut cache = open(&prefix, "model", 10);
        cache.set(key.clone(), &vector(1.0)).unwrap();
        cache.flush().unwrap();
    }
    fs::write(dir.path().join("embedding_cache.index.json"), "{ not json").unwrap();

    let mut cache = open(&prefix, "model", 10);
    assert!(cache.is_empty());
    assert_eq!(cache.get(&key), None);

    // The fresh cache is usable and persists normally.
    cache.set(key.clone(), &vector(5.0)).unwrap();
    cache.flush().unwrap();
    let mut reopened = open(&prefix, "model", 10);
    assert_eq!(reopened.get(&key), Some(vector(5.0)));
}

#[test]
fn model_change_invalidates_cache() {
    let dir = TempDir::new().unwrap();
    let prefix = dir.path().join("embedding_cache");
    let key = CacheKey::for_text("x");

    {
        let mut cache = open(&prefix, "model-a", 10);
        cache.set(key.clone(), &vector(1.0)).unwrap();
        cache.flush().unwrap();
    }

    let mut cache = open(&prefix, "model-b", 10);
    assert!(cache.is_empty());
    assert_eq!(cache.get(&key), None);
}
