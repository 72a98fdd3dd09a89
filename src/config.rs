//! Configuration module for the indexer.
//!
//! This module provides a layered configuration system that supports:
//! - Default values
//! - TOML configuration file
//! - Environment variable overrides
//! - CLI argument overrides
//!
//! # Environment Variables
//!
//! Environment variables must be prefixed with `CV_` and use double underscores
//! to separate nested levels:
//! - `CV_INDEXING__PARALLEL_THREADS=8` sets `indexing.parallel_threads`
//! - `CV_CACHE__MAX_ENTRIES=10000` sets `cache.max_entries`
//! - `CV_CHUNKING__FALLBACK=skip` sets `chunking.fallback`

use crate::chunking::{ChunkOptions, FallbackStrategy};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Name of the per-project directory holding settings and the index.
pub const CONFIG_DIR: &str = ".codevec";

/// Custom ignore file honored by the walker and the watcher.
pub const IGNORE_FILE: &str = ".codevecignore";

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    /// Version of the configuration schema
    #[serde(default = "default_version")]
    pub version: u32,

    /// Path to the index directory
    #[serde(default = "default_index_path")]
    pub index_path: PathBuf,

    /// Workspace root directory (where .codevec is located)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace_root: Option<PathBuf>,

    /// Global debug mode
    #[serde(default = "default_false")]
    pub debug: bool,

    #[serde(default)]
    pub indexing: IndexingConfig,

    #[serde(default)]
    pub chunking: ChunkingConfig,

    #[serde(default)]
    pub semantic_search: SemanticSearchConfig,

    /// Embedding cache settings
    #[serde(default)]
    pub cache: CacheSettings,

    #[serde(default)]
    pub file_watch: FileWatchConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct IndexingConfig {
    /// Files processed concurrently
    #[serde(default = "default_parallel_threads")]
    pub parallel_threads: usize,

    /// Texts per embedding call
    #[serde(default = "default_embed_batch_size")]
    pub embed_batch_size: usize,

    /// Patterns to ignore during indexing (gitignore syntax)
    #[serde(default)]
    pub ignore_patterns: Vec<String>,

    /// Files larger than this many bytes are skipped
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_chunk_lines")]
    pub max_chunk_lines: usize,

    #[serde(default = "default_overlap_lines")]
    pub overlap_lines: usize,

    /// What to do with files the grammar cannot handle
    #[serde(default)]
    pub fallback: FallbackStrategy,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SemanticSearchConfig {
    /// Model to use for embeddings
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Similarity threshold for search results
    #[serde(default = "default_similarity_threshold")]
    pub threshold: f32,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CacheSettings {
    /// Persist embeddings across runs
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Maximum number of cached vectors
    #[serde(default = "default_cache_max_entries")]
    pub max_entries: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct FileWatchConfig {
    /// Re-index changed files while `codevec watch` runs
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Debounce interval in milliseconds (default: 500ms)
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

// Default value functions
fn default_version() -> u32 {
    1
}
fn default_index_path() -> PathBuf {
    PathBuf::from(".codevec/index")
}
fn default_parallel_threads() -> usize {
    num_cpus::get()
}
fn default_embed_batch_size() -> usize {
    32
}
fn default_max_file_size() -> u64 {
    1024 * 1024
}
fn default_max_chunk_lines() -> usize {
    60
}
fn default_overlap_lines() -> usize {
    5
}
fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}
fn default_embedding_model() -> String {
    "AllMiniLML6V2".to_string()
}
fn default_similarity_threshold() -> f32 {
    0.3
}
fn default_cache_max_entries() -> usize {
    50_000
}
fn default_debounce_ms() -> u64 {
    500
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: default_version(),
            index_path: default_index_path(),
            workspace_root: None,
            debug: false,
            indexing: IndexingConfig::default(),
            chunking: ChunkingConfig::default(),
            semantic_search: SemanticSearchConfig::default(),
            cache: CacheSettings::default(),
            file_watch: FileWatchConfig::default(),
        }
    }
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            parallel_threads: default_parallel_threads(),
            embed_batch_size: default_embed_batch_size(),
            ignore_patterns: vec![
                "target/**".to_string(),
                "node_modules/**".to_string(),
                ".git/**".to_string(),
                "*.generated.*".to_string(),
            ],
            max_file_size: default_max_file_size(),
        }
    }
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chunk_lines: default_max_chunk_lines(),
            overlap_lines: default_overlap_lines(),
            fallback: FallbackStrategy::default(),
        }
    }
}

impl ChunkingConfig {
    #[must_use]
    pub fn options(&self) -> ChunkOptions {
        ChunkOptions {
            max_chunk_lines: self.max_chunk_lines,
            overlap_lines: self.overlap_lines,
            fallback: self.fallback,
        }
    }
}

impl Default for SemanticSearchConfig {
    fn default() -> Self {
        Self {
            model: default_embedding_model(),
            threshold: default_similarity_threshold(),
        }
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: default_cache_max_entries(),
        }
    }
}

impl Default for FileWatchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            debounce_ms: default_debounce_ms(),
        }
    }
}

impl Settings {
    /// Load configuration from all sources
    pub fn load() -> Result<Self, Box<figment::Error>> {
        // Try to find the workspace root by looking for .codevec directory
        let config_path = Self::find_workspace_config()
            .unwrap_or_else(|| PathBuf::from(CONFIG_DIR).join("settings.toml"));

        Self::figment(config_path)
            .extract()
            .map_err(Box::new)
            .map(|mut settings: Settings| {
                if settings.workspace_root.is_none() {
                    settings.workspace_root = Self::workspace_root();
                }
                settings
            })
    }

    /// Load configuration from a specific file
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, Box<figment::Error>> {
        Self::figment(path.as_ref().to_path_buf())
            .extract()
            .map_err(Box::new)
    }

    fn figment(config_path: PathBuf) -> Figment {
        Figment::new()
            // Start with defaults
            .merge(Serialized::defaults(Settings::default()))
            // Layer in config file if it exists
            .merge(Toml::file(config_path))
            // Layer in environment variables with CV_ prefix
            // Use double underscore (__) to separate nested levels
            // Single underscore (_) remains as is within field names
            .merge(Env::prefixed("CV_").map(|key| {
                key.as_str()
                    .to_lowercase()
                    .replace("__", ".") // Double underscore becomes dot
                    .into()
            }))
    }

    /// Find the workspace root by looking for .codevec directory
    /// Searches from current directory up to root
    fn find_workspace_config() -> Option<PathBuf> {
        Self::workspace_root().map(|root| root.join(CONFIG_DIR).join("settings.toml"))
    }

    /// Get the workspace root directory (where .codevec is located)
    pub fn workspace_root() -> Option<PathBuf> {
        let current = std::env::current_dir().ok()?;

        current
            .ancestors()
            .find(|ancestor| ancestor.join(CONFIG_DIR).is_dir())
            .map(Path::to_path_buf)
    }

    /// Root that indexed paths are relative to.
    #[must_use]
    pub fn root_dir(&self) -> PathBuf {
        self.workspace_root
            .clone()
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Index directory resolved against the workspace root.
    #[must_use]
    pub fn index_dir(&self) -> PathBuf {
        if self.index_path.is_absolute() {
            self.index_path.clone()
        } else {
            self.root_dir().join(&self.index_path)
        }
    }

    /// Prefix of the embedding cache files inside the index directory.
    #[must_use]
    pub fn cache_prefix(&self) -> PathBuf {
        self.index_dir().join("embedding_cache")
    }

    #[must_use]
    pub fn vector_store_path(&self) -> PathBuf {
        self.index_dir().join("vectors.bin")
    }

    #[must_use]
    pub fn manifest_path(&self) -> PathBuf {
        self.index_dir().join("manifest.json")
    }

    /// Where downloaded embedding models are kept.
    #[must_use]
    pub fn models_dir() -> PathBuf {
        dirs::cache_dir()
            .map(|dir| dir.join("codevec").join("models"))
            .unwrap_or_else(|| PathBuf::from(CONFIG_DIR).join("models"))
    }

    /// Check the settings for values the indexer cannot work with.
    pub fn validate(&self) -> Result<(), String> {
        if self.indexing.parallel_threads == 0 {
            return Err("indexing.parallel_threads must be at least 1".to_string());
        }
        if self.indexing.embed_batch_size == 0 {
            return Err("indexing.embed_batch_size must be at least 1".to_string());
        }
        if self.chunking.max_chunk_lines == 0 {
            return Err("chunking.max_chunk_lines must be at least 1".to_string());
        }
        if self.cache.max_entries == 0 {
            return Err("cache.max_entries must be at least 1".to_string());
        }
        if crate::vector::model_dimension(&self.semantic_search.model).is_none() {
            return Err(format!(
                "unknown embedding model '{}'. Available: {}",
                self.semantic_search.model,
                crate::vector::supported_model_names().join(", ")
            ));
        }
        Ok(())
    }

    /// Save current configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), Box<dyn std::error::Error>> {
        let parent = path.as_ref().parent().ok_or("Invalid path")?;
        std::fs::create_dir_all(parent)?;

        let toml_string = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_string)?;

        Ok(())
    }

    /// Create a default settings file with helpful comments
    pub fn init_config_file(force: bool) -> Result<PathBuf, Box<dyn std::error::Error>> {
        let config_path = PathBuf::from(CONFIG_DIR).join("settings.toml");

        if !force && config_path.exists() {
            return Err("Configuration file already exists. Use --force to overwrite".into());
        }

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let current_dir = std::env::current_dir().unwrap_or_default();
        let template = format!(
            r#"# codevec configuration file

# Version of the configuration schema
version = 1

# Path to the index directory (relative to workspace root)
index_path = ".codevec/index"

# Workspace root directory (automatically detected)
workspace_root = "{}"

# Global debug mode
debug = false

[indexing]
# Files processed concurrently (defaults to CPU count)
# parallel_threads = {}

# Texts sent to the embedding model per call
embed_batch_size = 32

# Additional patterns to ignore during indexing
ignore_patterns = []

# Files larger than this (bytes) are not indexed
max_file_size = 1048576

[chunking]
# Longest chunk in lines; longer definitions are split
max_chunk_lines = 60

# Lines shared by consecutive parts of a split definition
overlap_lines = 5

# Files without a grammar: "lines" (plain line windows) or "skip"
fallback = "lines"

[semantic_search]
# Model to use for embeddings
model = "AllMiniLML6V2"

# Minimum similarity for search results (0.0 to 1.0)
threshold = 0.3

[cache]
# Keep embeddings between runs so unchanged chunks are never re-embedded
enabled = true

# Maximum number of cached vectors (least recently used are evicted)
max_entries = 50000

[file_watch]
# Re-index files when they change while `codevec watch` runs
enabled = true

# How long to wait after a file change before re-indexing
debounce_ms = 500
"#,
            current_dir.display().to_string().replace('\\', "/"),
            num_cpus::get()
        );

        std::fs::write(&config_path, template)?;

        if force {
            println!("Overwrote configuration at: {}", config_path.display());
        } else {
            println!(
                "Created default configuration at: {}",
                config_path.display()
            );
        }

        Self::create_default_ignore_file(force)?;

        Ok(config_path)
    }

    /// Create a default .codevecignore file with helpful patterns
    fn create_default_ignore_file(force: bool) -> Result<(), Box<dyn std::error::Error>> {
        let ignore_path = PathBuf::from(IGNORE_FILE);

        if !force && ignore_path.exists() {
            println!("Found existing {IGNORE_FILE} file");
            return Ok(());
        }

        let default_content = r#"# codevec ignore patterns (gitignore syntax)
# https://git-scm.com/docs/gitignore

# Build artifacts
target/
build/
dist/

# Dependency directories
node_modules/
vendor/
.venv/
venv/
__pycache__/

# The index itself
.codevec/

# Generated files
*.generated.*
*_pb2.py
*.pb.go

# Tests (uncomment to exclude tests from the index)
# tests/
# *_test.go
# *.spec.ts
"#;

        std::fs::write(&ignore_path, default_content)?;
        println!("Created default {IGNORE_FILE} file");

        Ok(())
    }
}
