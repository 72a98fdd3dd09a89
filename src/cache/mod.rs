//! Persistent, capacity-bounded LRU cache of embedding vectors.
//!
//! Vectors are keyed by a hash of the embedded text ([`CacheKey`]) so the
//! same chunk is embedded once no matter how many files or runs contain it.
//!
//! # Files
//!
//! Two files share a path prefix:
//! - `<prefix>.index.json`: model name, dimensions, key -> slot map, free list
//! - `<prefix>.bin`: flat array of `dimensions` little-endian f32 records
//!
//! Each is replaced atomically on [`EmbeddingCache::flush`], one after the
//! other, and the index records a checksum of the slot file it was written
//! with. A pair left over from different flushes, e.g. by a crash between
//! the two renames, fails that check. Loading never fails because of what is
//! on disk: missing, corrupt, truncated or mismatched files, or files written
//! by another model, all yield an empty cache.
//!
//! # Recency
//!
//! `lastAccess` is a logical clock bumped on every read and write. Eviction
//! removes the entry with the smallest value. The clock values are unique, so
//! there are no ties to break at runtime; on load, entries are re-ranked by
//! `(lastAccess, key)`.

mod arena;
mod batch;
mod index;
mod key;

pub use arena::{ALLOCATION_BATCH, SlotArena};
pub use batch::embed_batch_with_cache;
pub use index::{CACHE_VERSION, CacheEntry, CacheIndex};
pub use key::CacheKey;

use crate::vector::VectorDimension;
use std::collections::{BTreeMap, HashMap};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors surfaced by the embedding cache.
///
/// On-disk corruption is not an error; see the module docs.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error(
        "Embedding dimension mismatch: expected {expected}, got {actual}\nSuggestion: Ensure all embeddings are generated with the same model"
    )]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Invalid cache capacity {0}\nSuggestion: Set cache.max_entries to at least 1")]
    InvalidCapacity(usize),

    #[error("Cache file error at '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to serialize cache index: {0}")]
    Serialize(String),
}

/// Where and how to open a cache.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Shared prefix of the index and binary files. `None` keeps the cache
    /// in memory only.
    pub path_prefix: Option<PathBuf>,
    pub model_name: String,
    pub dimension: VectorDimension,
    pub max_entries: usize,
}

/// Observable counters. Not persisted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub size: usize,
    pub hits: u64,
    pub misses: u64,
}

impl CacheStats {
    /// Fraction of lookups that hit, 0.0 when nothing was looked up.
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug)]
struct CacheFiles {
    index: PathBuf,
    data: PathBuf,
}

impl CacheFiles {
    fn from_prefix(prefix: &Path) -> Self {
        let with_suffix = |suffix: &str| {
            let mut name = OsString::from(prefix.as_os_str());
            name.push(suffix);
            PathBuf::from(name)
        };
        Self {
            index: with_suffix(".index.json"),
            data: with_suffix(".bin"),
        }
    }
}

/// What initialization found on disk.
enum LoadOutcome {
    Missing,
    Discarded(String),
    Loaded(CacheIndex, SlotArena),
}

/// Embedding cache over an index file and a slot file.
///
/// Not internally synchronized. Share it behind a mutex and never hold the
/// lock across an `.await`.
#[derive(Debug)]
pub struct EmbeddingCache {
    files: Option<CacheFiles>,
    model_name: String,
    dimension: VectorDimension,
    max_entries: usize,
    entries: HashMap<CacheKey, CacheEntry>,
    /// lastAccess -> key, smallest first.
    recency: BTreeMap<u64, CacheKey>,
    free_slots: Vec<u32>,
    next_slot: u32,
    arena: SlotArena,
    clock: u64,
    hits: u64,
    misses: u64,
    /// Set by any mutation of slot contents since the last flush.
    dirty: bool,
    /// Checksum of the slot file on disk, if this cache wrote or loaded one.
    data_checksum: Option<String>,
    disposed: bool,
}

impl EmbeddingCache {
    /// Open (or create) a cache.
    ///
    /// Only configuration problems and failure to create the cache directory
    /// are errors. Persisted state that cannot be used is dropped.
    pub fn initialize(config: CacheConfig) -> Result<Self, CacheError> {
        if config.max_entries == 0 {
            return Err(CacheError::InvalidCapacity(config.max_entries));
        }

        let files = config.path_prefix.as_deref().map(CacheFiles::from_prefix);
        if let Some(parent) = files
            .as_ref()
            .and_then(|f| f.index.parent())
            .filter(|p| !p.as_os_str().is_empty())
        {
            std::fs::create_dir_all(parent).map_err(|source| CacheError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let mut cache = Self {
            files: None,
            model_name: config.model_name,
            dimension: config.dimension,
            max_entries: config.max_entries,
            entries: HashMap::new(),
            recency: BTreeMap::new(),
            free_slots: Vec::new(),
            next_slot: 0,
            arena: SlotArena::new(config.dimension, config.max_entries),
            clock: 0,
            hits: 0,
            misses: 0,
            dirty: false,
            data_checksum: None,
            disposed: false,
        };

        if let Some(files) = files {
            match cache.load(&files) {
                LoadOutcome::Missing => debug!("no persisted embedding cache, starting empty"),
                LoadOutcome::Discarded(reason) => {
                    warn!(path = %files.index.display(), "discarding embedding cache: {reason}")
                }
                LoadOutcome::Loaded(index, arena) => cache.restore(index, arena),
            }
            cache.files = Some(files);
        }

        Ok(cache)
    }

    /// Cache that is never persisted.
    pub fn in_memory(
        model_name: impl Into<String>,
        dimension: VectorDimension,
        max_entries: usize,
    ) -> Result<Self, CacheError> {
        Self::initialize(CacheConfig {
            path_prefix: None,
            model_name: model_name.into(),
            dimension,
            max_entries,
        })
    }

    fn load(&self, files: &CacheFiles) -> LoadOutcome {
        match (files.index.exists(), files.data.exists()) {
            (false, false) => return LoadOutcome::Missing,
            (true, false) => return LoadOutcome::Discarded("slot file is missing".to_string()),
            (false, true) => return LoadOutcome::Discarded("index file is missing".to_string()),
            (true, true) => {}
        }

        let json = match std::fs::read_to_string(&files.index) {
            Ok(json) => json,
            Err(e) => return LoadOutcome::Discarded(format!("index unreadable: {e}")),
        };
        let index: CacheIndex = match serde_json::from_str(&json) {
            Ok(index) => index,
            Err(e) => return LoadOutcome::Discarded(format!("index is malformed: {e}")),
        };
        if let Err(reason) = index.validate() {
            return LoadOutcome::Discarded(reason);
        }

        if index.model_name != self.model_name {
            info!(
                "embedding model changed from '{}' to '{}', clearing cache",
                index.model_name, self.model_name
            );
            return LoadOutcome::Discarded("model changed".to_string());
        }
        if index.dimensions != self.dimension.get() {
            return LoadOutcome::Discarded(format!(
                "dimensions changed from {} to {}",
                index.dimensions,
                self.dimension.get()
            ));
        }

        match std::fs::metadata(&files.data) {
            Ok(meta) if meta.len() < index.required_bytes() => {
                return LoadOutcome::Discarded(format!(
                    "slot file is {} bytes, index needs {}",
                    meta.len(),
                    index.required_bytes()
                ));
            }
            Ok(_) => {}
            Err(e) => return LoadOutcome::Discarded(format!("slot file unreadable: {e}")),
        }

        // Slots at or past max_entries can exist when the capacity shrank
        // since the last run; the arena still has to hold all of them.
        let max_slots = self.max_entries.max(index.next_slot as usize);
        let arena = match SlotArena::load(
            &files.data,
            self.dimension,
            index.next_slot as usize,
            max_slots,
        ) {
            Ok(arena) => arena,
            Err(e) => return LoadOutcome::Discarded(format!("slot file unreadable: {e}")),
        };
        let used_slots = index.next_slot as usize;
        if index
            .data_checksum
            .as_ref()
            .is_some_and(|expected| *expected != arena.checksum(used_slots))
        {
            return LoadOutcome::Discarded(
                "slot file was not written with this index".to_string(),
            );
        }
        LoadOutcome::Loaded(index, arena)
    }

    fn restore(&mut self, index: CacheIndex, arena: SlotArena) {
        let mut ranked: Vec<(CacheKey, CacheEntry)> = index.entries.into_iter().collect();
        ranked.sort_by(|(ka, a), (kb, b)| a.last_access.cmp(&b.last_access).then(ka.cmp(kb)));

        for (key, mut entry) in ranked {
            self.clock += 1;
            entry.last_access = self.clock;
            self.recency.insert(entry.last_access, key.clone());
            self.entries.insert(key, entry);
        }
        self.free_slots = index.free_slots;
        self.next_slot = index.next_slot;
        self.data_checksum = index
            .data_checksum
            .or_else(|| Some(arena.checksum(index.next_slot as usize)));
        self.arena = arena;

        while self.entries.len() > self.max_entries {
            self.evict_least_recent();
        }

        debug!(
            "loaded embedding cache: {} entries, {} slots",
            self.entries.len(),
            self.next_slot
        );
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    /// Look up a vector. Returns an owned copy.
    ///
    /// A hit refreshes the entry's recency but does not make the slot file
    /// dirty.
    pub fn get(&mut self, key: &CacheKey) -> Option<Vec<f32>> {
        let tick = self.clock + 1;
        let Some(entry) = self.entries.get_mut(key) else {
            self.misses += 1;
            return None;
        };

        self.clock = tick;
        self.recency.remove(&entry.last_access);
        entry.last_access = tick;
        self.recency.insert(tick, key.clone());
        self.hits += 1;

        Some(self.arena.read(entry.slot as usize).to_vec())
    }

    /// Whether `key` is cached. Does not count as an access.
    #[must_use]
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Store a vector under `key`.
    ///
    /// Existing keys are overwritten in place. A new key at capacity evicts
    /// the least recently used entry and takes over a free slot.
    pub fn set(&mut self, key: CacheKey, vector: &[f32]) -> Result<(), CacheError> {
        if vector.len() != self.dimension.get() {
            return Err(CacheError::DimensionMismatch {
                expected: self.dimension.get(),
                actual: vector.len(),
            });
        }

        let tick = self.tick();
        if let Some(entry) = self.entries.get_mut(&key) {
            self.arena.write(entry.slot as usize, vector);
            self.recency.remove(&entry.last_access);
            entry.last_access = tick;
            self.recency.insert(tick, key);
            self.dirty = true;
            return Ok(());
        }

        if self.entries.len() >= self.max_entries {
            self.evict_least_recent();
        }

        let slot = self.allocate_slot();
        self.arena.write(slot as usize, vector);
        self.entries.insert(
            key.clone(),
            CacheEntry {
                slot,
                last_access: tick,
            },
        );
        self.recency.insert(tick, key);
        self.dirty = true;
        Ok(())
    }

    fn allocate_slot(&mut self) -> u32 {
        if let Some(slot) = self.free_slots.pop() {
            return slot;
        }
        let slot = self.next_slot;
        self.next_slot += 1;
        self.arena.ensure_slot(slot as usize);
        slot
    }

    fn evict_least_recent(&mut self) {
        let Some((_, key)) = self.recency.pop_first() else {
            return;
        };
        if let Some(entry) = self.entries.remove(&key) {
            self.free_slots.push(entry.slot);
            debug!("evicted {key} from slot {}", entry.slot);
        }
    }

    /// Persist to disk.
    ///
    /// The index is always rewritten. The slot file is rewritten only when a
    /// `set` happened since the last flush. No-op for in-memory caches and
    /// after [`dispose`](Self::dispose).
    pub fn flush(&mut self) -> Result<(), CacheError> {
        if self.disposed {
            return Ok(());
        }
        let Some(files) = &self.files else {
            return Ok(());
        };

        // Slot data first, so the index never lists records that were not
        // written. A crash between the two writes leaves a new slot file
        // beside the old index; the checksum catches that on load.
        if self.dirty {
            let bytes = self.arena.to_bytes(self.next_slot as usize);
            crate::vector::write_atomic(&files.data, &bytes).map_err(|source| CacheError::Io {
                path: files.data.clone(),
                source,
            })?;
            self.data_checksum = Some(self.arena.checksum(self.next_slot as usize));
        }

        let index = CacheIndex {
            version: CACHE_VERSION,
            model_name: self.model_name.clone(),
            dimensions: self.dimension.get(),
            entries: self
                .entries
                .iter()
                .map(|(key, entry)| (key.clone(), *entry))
                .collect(),
            next_slot: self.next_slot,
            free_slots: self.free_slots.clone(),
            data_checksum: self.data_checksum.clone(),
        };
        let json = serde_json::to_string(&index).map_err(|e| CacheError::Serialize(e.to_string()))?;
        crate::vector::write_atomic(&files.index, json.as_bytes()).map_err(|source| {
            CacheError::Io {
                path: files.index.clone(),
                source,
            }
        })?;

        self.dirty = false;
        Ok(())
    }

    /// Drop all in-memory state. Idempotent.
    ///
    /// Files on disk are left as they were at the last flush, and later
    /// flushes do nothing.
    pub fn dispose(&mut self) {
        self.entries.clear();
        self.recency.clear();
        self.free_slots.clear();
        self.next_slot = 0;
        self.arena.clear();
        self.clock = 0;
        self.hits = 0;
        self.misses = 0;
        self.dirty = false;
        self.data_checksum = None;
        self.disposed = true;
    }

    /// Number of cached vectors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn hit_count(&self) -> u64 {
        self.hits
    }

    #[must_use]
    pub fn miss_count(&self) -> u64 {
        self.misses
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            size: self.entries.len(),
            hits: self.hits,
            misses: self.misses,
        }
    }

    #[must_use]
    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    #[must_use]
    pub fn dimension(&self) -> VectorDimension {
        self.dimension
    }

    #[must_use]
    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    /// Path of the JSON index file, if persistent.
    #[must_use]
    pub fn index_path(&self) -> Option<&Path> {
        self.files.as_ref().map(|f| f.index.as_path())
    }

    /// Path of the binary slot file, if persistent.
    #[must_use]
    pub fn data_path(&self) -> Option<&Path> {
        self.files.as_ref().map(|f| f.data.as_path())
    }
}
