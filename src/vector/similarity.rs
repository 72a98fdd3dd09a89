//! Similarity math used by the vector store's brute-force search.

use crate::vector::Score;
use std::cmp::Ordering;

/// Calculates cosine similarity between two vectors.
///
/// Returns a value between -1.0 and 1.0, where 1.0 means identical
/// direction. Zero-length vectors compare as 0.0.
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "Vectors must have same dimension");

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot_product / (norm_a * norm_b)
    }
}

/// Keeps the `limit` best-scoring `(item, score)` pairs, best first.
///
/// Ties keep their input order.
pub fn top_k<T>(scored: impl IntoIterator<Item = (T, Score)>, limit: usize) -> Vec<(T, Score)> {
    if limit == 0 {
        return Vec::new();
    }
    let mut all: Vec<(T, Score)> = scored.into_iter().collect();
    all.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
    all.truncate(limit);
    all
}
