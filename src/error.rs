//! Error types for indexing operations
//!
//! Each subsystem has its own thiserror enum ([`CacheError`],
//! [`VectorError`], [`ChunkError`]); [`IndexError`] wraps them at the
//! orchestrator boundary and adds actionable suggestions.

use crate::cache::CacheError;
use crate::chunking::ChunkError;
use crate::vector::VectorError;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for indexing operations
#[derive(Error, Debug)]
pub enum IndexError {
    /// File system errors
    #[error("Failed to read file '{path}': {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write file '{path}': {source}")]
    FileWrite {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to chunk '{path}': {source}")]
    Chunking {
        path: String,
        #[source]
        source: ChunkError,
    },

    #[error("Embedding failed for '{path}': {source}")]
    Embedding {
        path: String,
        #[source]
        source: VectorError,
    },

    #[error("Vector store operation failed during {operation}: {source}")]
    VectorStore {
        operation: String,
        #[source]
        source: VectorError,
    },

    #[error("Manifest error at '{path}': {reason}")]
    Manifest { path: PathBuf, reason: String },

    #[error(transparent)]
    Cache(#[from] CacheError),

    /// Configuration errors
    #[error("Invalid configuration: {reason}")]
    ConfigError { reason: String },

    /// Background task errors
    #[error("Indexing task failed: {0}")]
    TaskFailed(String),

    /// General errors for cases where we need to preserve existing behavior
    #[error("{0}")]
    General(String),
}

impl IndexError {
    /// Get a stable status code for this error type.
    ///
    /// Returns a string identifier that can be used in JSON responses
    /// for programmatic error handling.
    pub fn status_code(&self) -> String {
        match self {
            Self::FileRead { .. } => "FILE_READ_ERROR",
            Self::FileWrite { .. } => "FILE_WRITE_ERROR",
            Self::Chunking { .. } => "CHUNKING_ERROR",
            Self::Embedding { .. } => "EMBEDDING_ERROR",
            Self::VectorStore { .. } => "VECTOR_STORE_ERROR",
            Self::Manifest { .. } => "MANIFEST_ERROR",
            Self::Cache(_) => "CACHE_ERROR",
            Self::ConfigError { .. } => "CONFIG_ERROR",
            Self::TaskFailed(_) => "TASK_FAILED",
            Self::General(_) => "GENERAL_ERROR",
        }
        .to_string()
    }

    /// Get recovery suggestions for this error
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            Self::FileRead { .. } => vec![
                "Check that the file exists and you have read permissions",
                "Ensure the file is not locked by another process",
            ],
            Self::FileWrite { .. } | Self::Manifest { .. } => vec![
                "Check disk space and permissions in the index directory",
                "Run 'codevec index --force' to rebuild the index",
            ],
            Self::Chunking { .. } => vec![
                "Set chunking.fallback = \"lines\" to index unparseable files as text",
                "Add the file to .codevecignore to skip it",
            ],
            Self::Embedding { .. } => vec![
                "Check that the embedding model downloaded completely",
                "Try the operation again, it may succeed on retry",
            ],
            Self::VectorStore { .. } => vec![
                "The file keeps its previous chunks, rerun 'codevec index' to retry",
                "Run 'codevec index --force' if you continue to have issues",
            ],
            Self::Cache(_) => vec![
                "Delete the embedding_cache files in the index directory to reset the cache",
                "Set cache.enabled = false to index without a persistent cache",
            ],
            Self::ConfigError { .. } => vec![
                "Run 'codevec config' to see the effective settings",
                "Run 'codevec init --force' to regenerate the settings file",
            ],
            _ => vec![],
        }
    }
}

/// Result type alias for index operations
pub type IndexResult<T> = Result<T, IndexError>;

/// Helper trait for adding context to errors
pub trait ErrorContext<T> {
    /// Add context to an error
    fn context(self, msg: &str) -> Result<T, IndexError>;

    /// Add context with a path
    fn with_path(self, path: &std::path::Path) -> Result<T, IndexError>;
}

impl<T, E> ErrorContext<T> for Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn context(self, msg: &str) -> Result<T, IndexError> {
        self.map_err(|e| IndexError::General(format!("{msg}: {e}")))
    }

    fn with_path(self, path: &std::path::Path) -> Result<T, IndexError> {
        self.map_err(|e| {
            IndexError::General(format!("Error processing '{}': {}", path.display(), e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes_are_stable() {
        let err = IndexError::FileRead {
            path: PathBuf::from("a.rs"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        assert_eq!(err.status_code(), "FILE_READ_ERROR");
        assert!(!err.recovery_suggestions().is_empty());

        let err = IndexError::from(CacheError::DimensionMismatch {
            expected: 384,
            actual: 3,
        });
        assert_eq!(err.status_code(), "CACHE_ERROR");
        assert!(err.to_string().contains("expected 384"));
    }

    #[test]
    fn test_error_context() {
        let result: Result<(), std::io::Error> = Err(std::io::Error::other("boom"));
        let err = result.with_path(std::path::Path::new("src/lib.rs")).unwrap_err();
        assert_eq!(err.to_string(), "Error processing 'src/lib.rs': boom");
    }
}
