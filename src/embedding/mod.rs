// SPDX-License-Identifier: MIT OR Apache-2.0

//! Embedding module - chunking, vector generation and the persistent index
//!
//! Documents are cut into overlapping chunks, embedded by a pluggable
//! provider and stored in a SQLite-backed vector index queried by cosine
//! similarity.

pub mod chunker;
pub mod provider;
pub mod storage;

pub use chunker::{Chunk, ChunkConfig, ChunkMetadata, RecursiveChunker};
pub use provider::{
    create_provider, CommandProvider, EmbeddingProvider, EmbeddingProviderConfig, FastEmbedder,
    HashingProvider,
};
pub use storage::{
    IndexSnapshot, IndexedRecord, SimilarityResult, SourceEntry, VectorIndex,
    DEFAULT_EMBEDDING_DIM, INDEX_FILE,
};
