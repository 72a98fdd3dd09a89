//! File information tracking for incremental indexing
//!
//! This module provides hash-based change detection: a file is re-indexed
//! only when the SHA-256 of its content differs from what the manifest
//! recorded.

use crate::indexing::ManifestEntry;
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::fs::Metadata;
use std::time::UNIX_EPOCH;

/// Information about a file read for indexing
#[derive(Debug, Clone)]
pub struct FileInfo {
    /// Normalized path
    pub path: String,
    /// SHA256 hash of file content
    pub hash: String,
    /// Modification time (seconds since UNIX_EPOCH), 0 if unavailable
    pub last_modified: u64,
}

impl FileInfo {
    pub fn new(path: impl Into<String>, content: impl AsRef<[u8]>, metadata: &Metadata) -> Self {
        Self {
            path: path.into(),
            hash: calculate_hash(content),
            last_modified: modified_secs(metadata),
        }
    }

    /// Check if file content has changed based on hash
    pub fn has_changed(&self, content: impl AsRef<[u8]>) -> bool {
        self.hash != calculate_hash(content)
    }

    /// Manifest record for this file after indexing `chunk_count` chunks.
    pub fn to_manifest_entry(&self, chunk_count: usize) -> ManifestEntry {
        ManifestEntry {
            filepath: self.path.clone(),
            last_modified: self.last_modified,
            chunk_count,
            content_hash: self.hash.clone(),
        }
    }
}

/// Calculate SHA256 hash of raw file bytes
pub fn calculate_hash(content: impl AsRef<[u8]>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_ref());
    format!("{:x}", hasher.finalize())
}

/// Get current UTC timestamp in seconds since UNIX_EPOCH
pub fn get_utc_timestamp() -> u64 {
    Utc::now().timestamp() as u64
}

/// Modification time in seconds since UNIX_EPOCH.
pub fn modified_secs(metadata: &Metadata) -> u64 {
    metadata
        .modified()
        .ok()
        .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
        .map_or(0, |d| d.as_secs())
}
