//! Embedding and vector storage collaborators.
//!
//! - [`EmbeddingGenerator`]: text -> vector, order preserving
//! - [`VectorStore`]: per-file chunk vectors with delete/insert/update and search
//!
//! Both are traits so the indexer can be exercised with deterministic fakes.

mod embedding;
mod similarity;
mod store;
mod types;

#[cfg(test)]
pub use embedding::MockEmbeddingGenerator;
pub use embedding::{
    EmbeddingGenerator, FastEmbedGenerator, model_dimension, model_to_string,
    parse_embedding_model, supported_model_names,
};
pub use similarity::{cosine_similarity, top_k};
pub use store::{LocalVectorStore, SearchHit, VectorStore};
pub(crate) use store::write_atomic;
pub use types::{Score, VECTOR_DIMENSION_384, VectorDimension, VectorError};
