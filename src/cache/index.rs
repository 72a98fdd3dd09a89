//! JSON index file for the embedding cache.
//!
//! The index owns the whole key -> slot mapping; the binary file is a bare
//! array of vectors and means nothing without it.

use crate::cache::CacheKey;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Current index format version.
pub const CACHE_VERSION: u32 = 1;

/// Slot and recency for one cached vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub slot: u32,
    pub last_access: u64,
}

/// Persisted form of the cache metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheIndex {
    pub version: u32,
    pub model_name: String,
    pub dimensions: usize,
    pub entries: BTreeMap<CacheKey, CacheEntry>,
    pub next_slot: u32,
    pub free_slots: Vec<u32>,
    /// SHA-256 of the first `next_slot` records of the slot file as written
    /// together with this index.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_checksum: Option<String>,
}

impl CacheIndex {
    /// Structural checks that do not need the binary file.
    ///
    /// Every slot must be below `next_slot` and appear at most once across
    /// the live entries and the free list.
    pub fn validate(&self) -> Result<(), String> {
        if self.version != CACHE_VERSION {
            return Err(format!(
                "index version {} is not supported (expected {CACHE_VERSION})",
                self.version
            ));
        }
        if self.dimensions == 0 {
            return Err("index declares zero dimensions".to_string());
        }

        let mut seen = HashSet::with_capacity(self.entries.len() + self.free_slots.len());
        let live = self.entries.values().map(|entry| entry.slot);
        for slot in live.chain(self.free_slots.iter().copied()) {
            if slot >= self.next_slot {
                return Err(format!("slot {slot} is beyond nextSlot {}", self.next_slot));
            }
            if !seen.insert(slot) {
                return Err(format!("slot {slot} is referenced twice"));
            }
        }
        Ok(())
    }

    /// Minimum binary file length this index requires.
    #[must_use]
    pub fn required_bytes(&self) -> u64 {
        u64::from(self.next_slot) * (self.dimensions * std::mem::size_of::<f32>()) as u64
    }
}
