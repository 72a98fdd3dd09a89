//! Progress reporting for indexing operations

use console::style;
use serde::Serialize;
use std::time::{Duration, Instant};

/// Errors kept for display; the counter keeps counting past this.
const MAX_RECORDED_ERRORS: usize = 100;

/// Statistics collected during indexing
#[derive(Debug, Default, Serialize)]
pub struct IndexStats {
    /// Files handled without error: updated, emptied, deleted or unchanged
    pub files_processed: usize,

    /// Files whose processing or write failed
    pub files_failed: usize,

    /// Files removed because they no longer exist
    pub files_deleted: usize,

    /// Files skipped because their content hash matched the manifest
    pub files_unchanged: usize,

    /// Chunks written to the vector store
    pub chunks_indexed: usize,

    /// Embedding cache hits during this run
    pub cache_hits: u64,

    /// Embedding cache misses during this run
    pub cache_misses: u64,

    /// Time elapsed during indexing
    #[serde(with = "duration_secs")]
    pub elapsed: Duration,

    /// Errors encountered (limited to first N errors)
    pub errors: Vec<(String, String)>,

    /// Start time of indexing
    #[serde(skip)]
    start_time: Option<Instant>,
}

impl IndexStats {
    /// Create new stats and start timing
    pub fn new() -> Self {
        Self {
            start_time: Some(Instant::now()),
            ..Default::default()
        }
    }

    /// Stop timing and record elapsed time
    pub fn stop_timing(&mut self) {
        if let Some(start) = self.start_time {
            self.elapsed = start.elapsed();
            self.start_time = None;
        }
    }

    /// Add an error (limited to first 100 errors)
    pub fn add_error(&mut self, path: impl Into<String>, error: impl std::fmt::Display) {
        if self.errors.len() < MAX_RECORDED_ERRORS {
            self.errors.push((path.into(), error.to_string()));
        }
        self.files_failed += 1;
    }

    /// Fraction of embedding lookups served from the cache.
    pub fn cache_hit_rate(&self) -> f64 {
        let total = self.cache_hits + self.cache_misses;
        if total == 0 {
            0.0
        } else {
            self.cache_hits as f64 / total as f64
        }
    }

    /// Display the statistics in a human-readable format
    pub fn display(&self) {
        println!("\n{}", style("Indexing Complete:").bold());
        println!("  Files processed: {}", self.files_processed);
        println!("    unchanged: {}", self.files_unchanged);
        println!("    deleted: {}", self.files_deleted);
        if self.files_failed > 0 {
            println!("  Files failed: {}", style(self.files_failed).red());
        } else {
            println!("  Files failed: 0");
        }
        println!("  Chunks indexed: {}", self.chunks_indexed);
        println!(
            "  Embedding cache: {} hits, {} misses ({:.0}% hit rate)",
            self.cache_hits,
            self.cache_misses,
            self.cache_hit_rate() * 100.0
        );
        println!("  Time elapsed: {:.2}s", self.elapsed.as_secs_f64());

        let secs = self.elapsed.as_secs_f64();
        if self.files_processed > 0 && secs > 0.0 {
            let files_per_sec = self.files_processed as f64 / secs;
            println!("  Performance: {files_per_sec:.0} files/second");
        }

        if !self.errors.is_empty() {
            println!("\nErrors (showing first {}):", self.errors.len().min(5));
            for (path, error) in &self.errors[..5.min(self.errors.len())] {
                println!("  {path}: {error}");
            }
            if self.files_failed > 5 {
                println!("  ... and {} more errors", self.files_failed - 5);
            }
        }
    }
}

mod duration_secs {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(duration.as_secs_f64())
    }
}
