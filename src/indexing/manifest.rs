//! Per-file record of what has been indexed.
//!
//! The manifest maps each normalized path to the hash, mtime and chunk count
//! seen when it was last indexed. One manifest instance owns its file; there
//! is no cross-process locking.

use crate::error::{IndexError, IndexResult};
use crate::vector::write_atomic;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Current manifest format version.
const MANIFEST_VERSION: u32 = 1;

/// What was indexed for one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestEntry {
    /// Normalized, root-relative path.
    pub filepath: String,
    /// Modification time, seconds since UNIX_EPOCH.
    pub last_modified: u64,
    /// 0 for files that produced no chunks.
    pub chunk_count: usize,
    /// SHA-256 of the content, hex.
    pub content_hash: String,
}

#[derive(Serialize, Deserialize)]
struct ManifestFile {
    version: u32,
    entries: BTreeMap<String, ManifestEntry>,
}

#[derive(Debug)]
pub struct Manifest {
    path: Option<PathBuf>,
    entries: BTreeMap<String, ManifestEntry>,
    dirty: bool,
}

impl Manifest {
    /// Manifest that is never saved.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            path: None,
            entries: BTreeMap::new(),
            dirty: false,
        }
    }

    /// Load the manifest at `path`.
    ///
    /// A missing file is an empty manifest. An unreadable or malformed one is
    /// also treated as empty, so every file is indexed again.
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let entries = match std::fs::read_to_string(&path) {
            Ok(json) => match serde_json::from_str::<ManifestFile>(&json) {
                Ok(file) if file.version == MANIFEST_VERSION => file.entries,
                Ok(file) => {
                    warn!(
                        "manifest version {} is not supported, re-indexing everything",
                        file.version
                    );
                    BTreeMap::new()
                }
                Err(e) => {
                    warn!(path = %path.display(), "manifest is malformed ({e}), re-indexing everything");
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                warn!(path = %path.display(), "manifest unreadable ({e}), re-indexing everything");
                BTreeMap::new()
            }
        };
        debug!("manifest loaded with {} entries", entries.len());

        Self {
            path: Some(path),
            entries,
            dirty: false,
        }
    }

    #[must_use]
    pub fn get(&self, filepath: &str) -> Option<&ManifestEntry> {
        self.entries.get(filepath)
    }

    pub fn update_file(&mut self, entry: ManifestEntry) {
        self.entries.insert(entry.filepath.clone(), entry);
        self.dirty = true;
    }

    /// Apply many updates at once. Later entries for the same path win.
    pub fn update_files(&mut self, entries: impl IntoIterator<Item = ManifestEntry>) {
        for entry in entries {
            self.entries.insert(entry.filepath.clone(), entry);
            self.dirty = true;
        }
    }

    pub fn remove_file(&mut self, filepath: &str) -> Option<ManifestEntry> {
        let removed = self.entries.remove(filepath);
        self.dirty |= removed.is_some();
        removed
    }

    pub fn remove_files<'a>(&mut self, filepaths: impl IntoIterator<Item = &'a str>) -> usize {
        filepaths
            .into_iter()
            .filter(|path| self.remove_file(path).is_some())
            .count()
    }

    /// Every tracked path, sorted.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Path -> content hash, for change detection off the write path.
    #[must_use]
    pub fn content_hashes(&self) -> HashMap<String, String> {
        self.entries
            .iter()
            .map(|(path, entry)| (path.clone(), entry.content_hash.clone()))
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sum of recorded chunk counts.
    #[must_use]
    pub fn total_chunks(&self) -> usize {
        self.entries.values().map(|e| e.chunk_count).sum()
    }

    /// Forget every entry.
    pub fn clear(&mut self) {
        self.dirty |= !self.entries.is_empty();
        self.entries.clear();
    }

    /// Write the manifest if anything changed since the last save.
    pub fn save(&mut self) -> IndexResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if !self.dirty {
            return Ok(());
        }

        let file = ManifestFile {
            version: MANIFEST_VERSION,
            entries: self.entries.clone(),
        };
        let json = serde_json::to_string_pretty(&file).map_err(|e| IndexError::Manifest {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| IndexError::FileWrite {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        write_atomic(path, json.as_bytes()).map_err(|source| IndexError::FileWrite {
            path: path.clone(),
            source,
        })?;

        debug!("saved manifest with {} entries", self.entries.len());
        self.dirty = false;
        Ok(())
    }
}
