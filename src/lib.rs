/// The main library module for codevec
pub mod cache;
pub mod chunking;
pub mod config;
pub mod display;
pub mod error;
pub mod indexing;
pub mod vector;

// Explicit exports for better API clarity
pub use cache::{CacheConfig, CacheError, CacheKey, CacheStats, EmbeddingCache};
pub use chunking::{Chunk, ChunkMetadata, ChunkOptions, Chunker, Language, TreeSitterChunker};
pub use config::Settings;
pub use error::{ErrorContext, IndexError, IndexResult};
pub use indexing::{
    FileDisposition, IncrementalIndexer, IndexStats, IndexerComponents, Manifest, ManifestEntry,
    PathNormalizer, calculate_hash,
};
pub use vector::{
    EmbeddingGenerator, LocalVectorStore, SearchHit, VectorDimension, VectorError, VectorStore,
};
