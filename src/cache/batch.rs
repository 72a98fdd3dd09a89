//! Cache-aware batch embedding.

use crate::cache::{CacheKey, EmbeddingCache};
use crate::vector::{EmbeddingGenerator, VectorError};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

/// Embed `texts`, calling the generator only for texts the cache lacks.
///
/// The result has one vector per input, in input order. The generator is
/// invoked at most once, with each uncached text once (duplicates collapse
/// to one request) in first-occurrence order. New vectors are written back
/// to the cache before returning. Each distinct uncached text counts as
/// one cache miss.
///
/// The cache lock is released while the generator runs.
pub async fn embed_batch_with_cache(
    texts: &[String],
    cache: &Mutex<EmbeddingCache>,
    generator: &Arc<dyn EmbeddingGenerator>,
) -> Result<Vec<Vec<f32>>, VectorError> {
    let keys: Vec<CacheKey> = texts.iter().map(|t| CacheKey::for_text(t)).collect();

    let mut resolved: Vec<Option<Vec<f32>>> = Vec::with_capacity(texts.len());
    let mut pending: Vec<(CacheKey, String)> = Vec::new();
    let mut pending_keys: HashSet<&CacheKey> = HashSet::new();
    {
        let mut cache = cache.lock();
        for (key, text) in keys.iter().zip(texts) {
            if pending_keys.contains(key) {
                resolved.push(None);
                continue;
            }
            let hit = cache.get(key);
            if hit.is_none() {
                pending_keys.insert(key);
                pending.push((key.clone(), text.clone()));
            }
            resolved.push(hit);
        }
    }

    if pending.is_empty() {
        debug!("all {} embeddings served from cache", texts.len());
        return Ok(resolved.into_iter().flatten().collect());
    }

    debug!(
        "embedding {} of {} texts ({} cached)",
        pending.len(),
        texts.len(),
        resolved.iter().filter(|v| v.is_some()).count()
    );

    let worker = Arc::clone(generator);
    let to_embed: Vec<String> = pending.iter().map(|(_, text)| text.clone()).collect();
    let generated = tokio::task::spawn_blocking(move || {
        let refs: Vec<&str> = to_embed.iter().map(String::as_str).collect();
        worker.generate_embeddings(&refs)
    })
    .await
    .map_err(|e| VectorError::EmbeddingFailed(format!("embedding task failed: {e}")))??;

    if generated.len() != pending.len() {
        return Err(VectorError::EmbeddingFailed(format!(
            "generator returned {} embeddings for {} texts",
            generated.len(),
            pending.len()
        )));
    }

    let fresh: HashMap<CacheKey, Vec<f32>> = pending
        .into_iter()
        .map(|(key, _)| key)
        .zip(generated)
        .collect();

    {
        let mut cache = cache.lock();
        for (key, vector) in &fresh {
            cache
                .set(key.clone(), vector)
                .map_err(|e| VectorError::EmbeddingFailed(e.to_string()))?;
        }
    }

    resolved
        .into_iter()
        .zip(&keys)
        .map(|(hit, key)| match hit {
            Some(vector) => Ok(vector),
            None => fresh.get(key).cloned().ok_or_else(|| {
                VectorError::EmbeddingFailed(format!("no embedding produced for key {key}"))
            }),
        })
        .collect()
}
