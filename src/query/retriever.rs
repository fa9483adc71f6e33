// SPDX-License-Identifier: MIT OR Apache-2.0

//! Retriever: embeds a question and returns the nearest indexed chunks.

use serde::Serialize;
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::embedding::{EmbeddingProvider, IndexSnapshot, SimilarityResult, VectorIndex};
use crate::errors::{IndexError, QueryError};

/// Number of chunks retrieved when the caller does not say otherwise.
pub const DEFAULT_TOP_K: usize = 3;

/// A chunk returned for a question, most similar first.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievedChunk {
    pub id: String,
    pub source: String,
    pub page_or_row: u32,
    pub start_offset: usize,
    pub score: f32,
    pub text: String,
}

impl From<SimilarityResult> for RetrievedChunk {
    fn from(result: SimilarityResult) -> Self {
        Self {
            id: result.id,
            source: result.metadata.source,
            page_or_row: result.metadata.page_or_row,
            start_offset: result.metadata.start_offset,
            score: result.score,
            text: result.text,
        }
    }
}

/// Shared handle to an embedding provider.
///
/// Providers take `&mut self`, so concurrent callers serialize on the lock
/// only for the duration of the embedding call.
pub type SharedProvider = Arc<Mutex<Box<dyn EmbeddingProvider>>>;

/// Query-side view of the index. Cheap to clone.
#[derive(Clone)]
pub struct Retriever {
    snapshot: IndexSnapshot,
    provider: SharedProvider,
}

impl Retriever {
    /// Pairs a snapshot with the provider that must have built it.
    pub fn new(snapshot: IndexSnapshot, provider: SharedProvider) -> Result<Self, IndexError> {
        let active = match provider.lock() {
            Ok(guard) => guard.model_id().to_string(),
            Err(poisoned) => poisoned.into_inner().model_id().to_string(),
        };
        if snapshot.model_id() != active {
            return Err(IndexError::ModelMismatch {
                path: snapshot.path().to_path_buf(),
                indexed: snapshot.model_id().to_string(),
                active,
            });
        }
        Ok(Self { snapshot, provider })
    }

    /// Opens the index at `index_path` read-only and loads a snapshot.
    pub fn open(index_path: &Path, provider: Box<dyn EmbeddingProvider>) -> Result<Self, IndexError> {
        let index = VectorIndex::open(index_path)?;
        index.check_model(provider.model_id())?;
        Self::new(index.snapshot()?, Arc::new(Mutex::new(provider)))
    }

    pub fn snapshot(&self) -> &IndexSnapshot {
        &self.snapshot
    }

    /// Returns the `k` chunks most similar to `query_text`.
    pub fn retrieve(&self, query_text: &str, k: usize) -> Result<Vec<RetrievedChunk>, QueryError> {
        let query_text = query_text.trim();
        if query_text.is_empty() {
            return Err(QueryError::EmptyQuery);
        }

        let vector = {
            let mut provider = self
                .provider
                .lock()
                .map_err(|_| QueryError::Embedding(anyhow::anyhow!("embedding provider lock poisoned")))?;
            provider
                .embed_one(query_text)
                .map_err(QueryError::Embedding)?
        };

        let hits = self.snapshot.query(&vector, k)?;
        tracing::debug!(query = query_text, k, hits = hits.len(), "retrieved chunks");
        Ok(hits.into_iter().map(RetrievedChunk::from).collect())
    }
}

/// Joins chunk texts into the context handed to the answer synthesizer.
pub fn build_context(chunks: &[RetrievedChunk]) -> String {
    chunks
        .iter()
        .map(|chunk| chunk.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IngestMode;
    use crate::embedding::{Chunk, ChunkMetadata, HashingProvider};
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn chunk(source: &str, row: u32, text: &str) -> Chunk {
        Chunk {
            text: text.to_string(),
            metadata: ChunkMetadata {
                source: source.to_string(),
                page_or_row: row,
                extra: BTreeMap::new(),
                start_offset: 0,
                chunk_index: 0,
            },
        }
    }

    fn build_index(dir: &Path) {
        let mut provider = HashingProvider::new(384).unwrap();
        let mut index = VectorIndex::initialize(dir, IngestMode::Fresh, provider.model_id()).unwrap();
        index
            .add(
                &[
                    chunk("bonos.csv", 0, "Bono de desarrollo humano requisitos"),
                    chunk("registro.pdf", 0, "Duplicado de cédula"),
                    chunk("salud.csv", 0, "Dirección de la unidad de salud en Quito"),
                ],
                &mut provider,
            )
            .unwrap();
        index.persist().unwrap();
    }

    #[test]
    fn retrieves_most_similar_first() {
        let dir = TempDir::new().unwrap();
        build_index(dir.path());

        let retriever =
            Retriever::open(dir.path(), Box::new(HashingProvider::new(384).unwrap())).unwrap();
        let hits = retriever
            .retrieve("¿Cómo obtengo un duplicado de cédula?", DEFAULT_TOP_K)
            .unwrap();
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].source, "registro.pdf");
        assert_eq!(hits[0].text, "Duplicado de cédula");
        assert!(hits[0].score > hits[1].score);
    }

    #[test]
    fn k_limits_results() {
        let dir = TempDir::new().unwrap();
        build_index(dir.path());
        let retriever =
            Retriever::open(dir.path(), Box::new(HashingProvider::new(384).unwrap())).unwrap();
        assert_eq!(retriever.retrieve("bono", 1).unwrap().len(), 1);
    }

    #[test]
    fn empty_query_is_rejected() {
        let dir = TempDir::new().unwrap();
        build_index(dir.path());
        let retriever =
            Retriever::open(dir.path(), Box::new(HashingProvider::new(384).unwrap())).unwrap();
        assert!(matches!(
            retriever.retrieve("   ", 3),
            Err(QueryError::EmptyQuery)
        ));
    }

    #[test]
    fn other_model_is_rejected() {
        let dir = TempDir::new().unwrap();
        build_index(dir.path());
        let err = Retriever::open(dir.path(), Box::new(HashingProvider::new(64).unwrap()))
            .err()
            .unwrap();
        assert!(matches!(err, IndexError::ModelMismatch { .. }));
    }

    #[test]
    fn model_mismatch_names_the_index_path() {
        let dir = TempDir::new().unwrap();
        build_index(dir.path());
        let snapshot = VectorIndex::open(dir.path()).unwrap().snapshot().unwrap();
        let provider: Box<dyn EmbeddingProvider> = Box::new(HashingProvider::new(64).unwrap());

        let err = Retriever::new(snapshot, Arc::new(Mutex::new(provider)))
            .err()
            .unwrap();
        let message = err.to_string();
        assert!(message.contains(&dir.path().display().to_string()), "{message}");
        assert!(message.contains("hashing-384"));
    }

    #[test]
    fn context_separates_chunks() {
        let chunks = vec![
            RetrievedChunk {
                id: "a:0:0".into(),
                source: "a".into(),
                page_or_row: 0,
                start_offset: 0,
                score: 1.0,
                text: "uno".into(),
            },
            RetrievedChunk {
                id: "b:0:0".into(),
                source: "b".into(),
                page_or_row: 0,
                start_offset: 0,
                score: 0.5,
                text: "dos".into(),
            },
        ];
        assert_eq!(build_context(&chunks), "uno\n\ndos");
    }
}
