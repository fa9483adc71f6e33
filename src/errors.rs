// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types shared by the ingestion and query paths.
//!
//! Loader errors are recoverable (the file is skipped), index errors are
//! storage faults that abort an ingestion run, and query errors are mapped to
//! structured responses by the query service.

use std::path::PathBuf;
use thiserror::Error;

/// A source file could not be turned into documents.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse PDF {path}: {source}")]
    Pdf {
        path: PathBuf,
        #[source]
        source: lopdf::Error,
    },

    #[error("could not decode {path} with any of the configured encodings ({tried})")]
    Encoding { path: PathBuf, tried: String },
}

/// The vector index could not be created, opened, written or trusted.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("index not initialized at {0}; run `tramite ingest` first")]
    NotInitialized(PathBuf),

    #[error("index at {path} was built with embedding model '{indexed}', but the active provider is '{active}'")]
    ModelMismatch {
        path: PathBuf,
        indexed: String,
        active: String,
    },

    #[error("index at {0} was opened read-only")]
    ReadOnly(PathBuf),

    #[error("embedding dimension mismatch: index stores {expected}-d vectors, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("embedding provider returned {returned} vectors for {requested} texts")]
    EmbeddingCount { requested: usize, returned: usize },

    #[error("embedding failed: {0:#}")]
    Embedding(anyhow::Error),

    #[error("I/O failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("storage failure: {0}")]
    Storage(#[from] rusqlite::Error),
}

impl IndexError {
    /// Whether this error comes from the embedding call rather than storage.
    pub fn is_embedding_failure(&self) -> bool {
        matches!(
            self,
            IndexError::Embedding(_)
                | IndexError::EmbeddingCount { .. }
                | IndexError::DimensionMismatch { .. }
        )
    }
}

/// A query could not be answered.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("query text must not be empty")]
    EmptyQuery,

    #[error("failed to embed query: {0:#}")]
    Embedding(anyhow::Error),

    #[error(transparent)]
    Index(#[from] IndexError),
}
