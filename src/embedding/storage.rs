// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite-based vector index for chunk embeddings.
//!
//! Records are written to `{index_dir}/index.sqlite` together with the
//! identity of the embedding model that produced them and the list of source
//! files already ingested. Similarity search is brute-force cosine over all
//! stored vectors; ties keep insertion order.

use rayon::prelude::*;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::IngestMode;
use crate::embedding::chunker::{Chunk, ChunkMetadata};
use crate::embedding::provider::EmbeddingProvider;
use crate::errors::IndexError;

/// Default embedding dimension for sentence-transformers/all-MiniLM-L6-v2.
pub const DEFAULT_EMBEDDING_DIM: usize = 384;

/// File name of the database inside the index directory.
pub const INDEX_FILE: &str = "index.sqlite";

const SCHEMA_VERSION: &str = "1";

/// A stored chunk with its embedding.
#[derive(Debug, Clone)]
pub struct IndexedRecord {
    /// `"{source}:{page_or_row}:{chunk_index}"`
    pub id: String,
    pub text: String,
    pub metadata: ChunkMetadata,
    pub embedding: Vec<f32>,
}

/// A search hit returned by [`VectorIndex::query`] and [`IndexSnapshot::query`].
#[derive(Debug, Clone, Serialize)]
pub struct SimilarityResult {
    pub id: String,
    pub text: String,
    pub metadata: ChunkMetadata,
    /// Cosine similarity score
    pub score: f32,
}

/// A source file recorded as ingested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceEntry {
    pub name: String,
    /// blake3 hash of the file content at ingestion time
    pub content_hash: String,
    pub chunk_count: u64,
    pub ingested_at: i64,
}

/// Persistent vector index.
///
/// Writes are buffered by [`VectorIndex::add`] and [`VectorIndex::record_source`]
/// and flushed atomically by [`VectorIndex::persist`].
pub struct VectorIndex {
    conn: Connection,
    dir: PathBuf,
    model_id: String,
    dimension: Option<usize>,
    pending: Vec<IndexedRecord>,
    pending_sources: Vec<SourceEntry>,
    read_only: bool,
}

impl VectorIndex {
    /// Creates or opens the index for writing.
    ///
    /// `Fresh` removes everything under `dir` first. `Append` keeps existing
    /// records and fails with [`IndexError::ModelMismatch`] when the index was
    /// built with a different model.
    pub fn initialize(dir: &Path, mode: IngestMode, model_id: &str) -> Result<Self, IndexError> {
        if mode == IngestMode::Fresh && dir.exists() {
            tracing::info!(path = %dir.display(), "removing existing index");
            std::fs::remove_dir_all(dir).map_err(|source| IndexError::Io {
                path: dir.to_path_buf(),
                source,
            })?;
        }
        std::fs::create_dir_all(dir).map_err(|source| IndexError::Io {
            path: dir.to_path_buf(),
            source,
        })?;

        let conn = Connection::open(dir.join(INDEX_FILE))?;
        init_schema(&conn)?;

        let stored_model = get_meta(&conn, "model_id")?;
        match stored_model {
            Some(indexed) if indexed != model_id => {
                return Err(IndexError::ModelMismatch {
                    path: dir.to_path_buf(),
                    indexed,
                    active: model_id.to_string(),
                });
            }
            Some(_) => {}
            None => {
                set_meta(&conn, "schema_version", SCHEMA_VERSION)?;
                set_meta(&conn, "model_id", model_id)?;
            }
        }

        let dimension = read_dimension(&conn)?;
        Ok(Self {
            conn,
            dir: dir.to_path_buf(),
            model_id: model_id.to_string(),
            dimension,
            pending: Vec::new(),
            pending_sources: Vec::new(),
            read_only: false,
        })
    }

    /// Opens an existing index read-only.
    pub fn open(dir: &Path) -> Result<Self, IndexError> {
        let db_path = dir.join(INDEX_FILE);
        if !db_path.is_file() {
            return Err(IndexError::NotInitialized(dir.to_path_buf()));
        }

        let conn = Connection::open_with_flags(&db_path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
        let model_id = get_meta(&conn, "model_id")?
            .ok_or_else(|| IndexError::NotInitialized(dir.to_path_buf()))?;
        let dimension = read_dimension(&conn)?;

        Ok(Self {
            conn,
            dir: dir.to_path_buf(),
            model_id,
            dimension,
            pending: Vec::new(),
            pending_sources: Vec::new(),
            read_only: true,
        })
    }

    /// Returns the index directory.
    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Identity of the model whose vectors this index stores.
    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    /// Vector dimension, known once the first record was added.
    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    /// Fails unless `active` is the model this index was built with.
    pub fn check_model(&self, active: &str) -> Result<(), IndexError> {
        if self.model_id != active {
            return Err(IndexError::ModelMismatch {
                path: self.dir.clone(),
                indexed: self.model_id.clone(),
                active: active.to_string(),
            });
        }
        Ok(())
    }

    /// Embeds `chunks` in provider-sized batches and buffers the records.
    ///
    /// Nothing is buffered when any batch fails, so a failed file leaves no
    /// partial records behind.
    pub fn add(
        &mut self,
        chunks: &[Chunk],
        provider: &mut dyn EmbeddingProvider,
    ) -> Result<usize, IndexError> {
        if chunks.is_empty() {
            return Ok(0);
        }
        self.check_model(provider.model_id())?;

        let batch_size = provider.batch_size().max(1);
        let mut staged = Vec::with_capacity(chunks.len());
        let mut dimension = self.dimension;

        for batch in chunks.chunks(batch_size) {
            let texts: Vec<String> = batch.iter().map(|chunk| chunk.text.clone()).collect();
            let vectors = provider.embed_texts(&texts).map_err(IndexError::Embedding)?;
            if vectors.len() != texts.len() {
                return Err(IndexError::EmbeddingCount {
                    requested: texts.len(),
                    returned: vectors.len(),
                });
            }

            for (chunk, embedding) in batch.iter().zip(vectors) {
                match dimension {
                    Some(expected) if expected != embedding.len() => {
                        return Err(IndexError::DimensionMismatch {
                            expected,
                            actual: embedding.len(),
                        });
                    }
                    Some(_) => {}
                    None => dimension = Some(embedding.len()),
                }
                staged.push(IndexedRecord {
                    id: chunk.id(),
                    text: chunk.text.clone(),
                    metadata: chunk.metadata.clone(),
                    embedding,
                });
            }
        }

        self.dimension = dimension;
        let added = staged.len();
        self.pending.extend(staged);
        tracing::debug!(added, pending = self.pending.len(), "buffered records");
        Ok(added)
    }

    /// Buffers a source entry, written by the next [`VectorIndex::persist`].
    pub fn record_source(&mut self, name: &str, content_hash: &str, chunk_count: u64) {
        self.pending_sources.push(SourceEntry {
            name: name.to_string(),
            content_hash: content_hash.to_string(),
            chunk_count,
            ingested_at: unix_now(),
        });
    }

    /// Flushes buffered records and sources in one transaction.
    pub fn persist(&mut self) -> Result<usize, IndexError> {
        if self.pending.is_empty() && self.pending_sources.is_empty() {
            return Ok(0);
        }
        if self.read_only {
            return Err(IndexError::ReadOnly(self.dir.clone()));
        }

        let created_at = unix_now();
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO records (
                    id, source, page_or_row, start_offset, chunk_index, extra, text,
                    embedding, created_at
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                "#,
            )?;
            for record in &self.pending {
                let extra = serde_json::to_string(&record.metadata.extra)
                    .unwrap_or_else(|_| "{}".to_string());
                stmt.execute(params![
                    record.id,
                    record.metadata.source,
                    record.metadata.page_or_row,
                    record.metadata.start_offset as i64,
                    record.metadata.chunk_index as i64,
                    extra,
                    record.text,
                    embedding_to_blob(&record.embedding),
                    created_at
                ])?;
            }

            let mut stmt = tx.prepare(
                r#"
                INSERT INTO sources (name, content_hash, chunk_count, ingested_at)
                VALUES (?1, ?2, ?3, ?4)
                ON CONFLICT(name) DO UPDATE SET
                    content_hash = excluded.content_hash,
                    chunk_count = excluded.chunk_count,
                    ingested_at = excluded.ingested_at
                "#,
            )?;
            for source in &self.pending_sources {
                stmt.execute(params![
                    source.name,
                    source.content_hash,
                    source.chunk_count as i64,
                    source.ingested_at
                ])?;
            }
        }
        if let Some(dimension) = self.dimension {
            tx.execute(
                "INSERT INTO meta (key, value) VALUES ('dimension', ?1)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![dimension.to_string()],
            )?;
        }
        tx.commit()?;

        let written = self.pending.len();
        self.pending.clear();
        self.pending_sources.clear();
        tracing::debug!(written, path = %self.dir.display(), "persisted records");
        Ok(written)
    }

    /// Number of records, stored plus buffered.
    pub fn count(&self) -> Result<u64, IndexError> {
        Ok(self.stored_count()? + self.pending.len() as u64)
    }

    fn stored_count(&self) -> Result<u64, IndexError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM records", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Content hash recorded for a source file, if it was ingested.
    pub fn source_hash(&self, name: &str) -> Result<Option<String>, IndexError> {
        if let Some(entry) = self.pending_sources.iter().find(|s| s.name == name) {
            return Ok(Some(entry.content_hash.clone()));
        }
        let hash = self
            .conn
            .query_row(
                "SELECT content_hash FROM sources WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(hash)
    }

    /// Whether a source file with this name was already ingested.
    pub fn contains_source(&self, name: &str) -> Result<bool, IndexError> {
        Ok(self.source_hash(name)?.is_some())
    }

    /// Persisted source entries ordered by name.
    pub fn sources(&self) -> Result<Vec<SourceEntry>, IndexError> {
        let mut stmt = self.conn.prepare(
            "SELECT name, content_hash, chunk_count, ingested_at FROM sources ORDER BY name",
        )?;
        let sources = stmt
            .query_map([], |row| {
                let chunk_count: i64 = row.get(2)?;
                Ok(SourceEntry {
                    name: row.get(0)?,
                    content_hash: row.get(1)?,
                    chunk_count: chunk_count as u64,
                    ingested_at: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(sources)
    }

    /// Texts of every record in insertion order.
    pub fn texts(&self) -> Result<Vec<String>, IndexError> {
        Ok(self.records()?.into_iter().map(|r| r.text).collect())
    }

    /// Top-k records by cosine similarity, most similar first.
    pub fn query(&self, vector: &[f32], k: usize) -> Result<Vec<SimilarityResult>, IndexError> {
        let records = self.records()?;
        rank(&records, self.dimension, vector, k)
    }

    /// Loads every record into an immutable snapshot for serving.
    pub fn snapshot(&self) -> Result<IndexSnapshot, IndexError> {
        let records = self.records()?;
        tracing::info!(records = records.len(), model = %self.model_id, "loaded index snapshot");
        Ok(IndexSnapshot {
            dir: self.dir.clone(),
            model_id: self.model_id.clone(),
            dimension: self.dimension,
            records: Arc::from(records),
        })
    }

    /// Stored records followed by buffered ones, in insertion order.
    fn records(&self) -> Result<Vec<IndexedRecord>, IndexError> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, source, page_or_row, start_offset, chunk_index, extra, text, embedding
            FROM records
            ORDER BY seq
            "#,
        )?;
        let mut records = stmt
            .query_map([], |row| {
                let start_offset: i64 = row.get(3)?;
                let chunk_index: i64 = row.get(4)?;
                let extra: String = row.get(5)?;
                let blob: Vec<u8> = row.get(7)?;
                Ok(IndexedRecord {
                    id: row.get(0)?,
                    text: row.get(6)?,
                    metadata: ChunkMetadata {
                        source: row.get(1)?,
                        page_or_row: row.get(2)?,
                        extra: serde_json::from_str::<BTreeMap<String, String>>(&extra)
                            .unwrap_or_default(),
                        start_offset: start_offset as usize,
                        chunk_index: chunk_index as usize,
                    },
                    embedding: blob_to_embedding(&blob),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        records.extend(self.pending.iter().cloned());
        Ok(records)
    }
}

/// Immutable in-memory view of an index, cheap to clone and share.
#[derive(Debug, Clone)]
pub struct IndexSnapshot {
    dir: PathBuf,
    model_id: String,
    dimension: Option<usize>,
    records: Arc<[IndexedRecord]>,
}

impl IndexSnapshot {
    /// Directory the snapshot was loaded from.
    pub fn path(&self) -> &Path {
        &self.dir
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Same contract as [`VectorIndex::query`].
    pub fn query(&self, vector: &[f32], k: usize) -> Result<Vec<SimilarityResult>, IndexError> {
        rank(&self.records, self.dimension, vector, k)
    }
}

fn rank(
    records: &[IndexedRecord],
    dimension: Option<usize>,
    vector: &[f32],
    k: usize,
) -> Result<Vec<SimilarityResult>, IndexError> {
    if let Some(expected) = dimension {
        if expected != vector.len() {
            return Err(IndexError::DimensionMismatch {
                expected,
                actual: vector.len(),
            });
        }
    }
    if k == 0 || records.is_empty() {
        return Ok(Vec::new());
    }

    let scores: Vec<f32> = records
        .par_iter()
        .map(|record| cosine_similarity(vector, &record.embedding))
        // NaN ranks last instead of first under total_cmp.
        .map(|score| if score.is_nan() { f32::NEG_INFINITY } else { score })
        .collect();

    let mut order: Vec<usize> = (0..records.len()).collect();
    // Stable sort keeps insertion order among equal scores.
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));
    order.truncate(k);

    Ok(order
        .into_iter()
        .map(|i| {
            let record = &records[i];
            SimilarityResult {
                id: record.id.clone(),
                text: record.text.clone(),
                metadata: record.metadata.clone(),
                score: scores[i],
            }
        })
        .collect())
}

fn init_schema(conn: &Connection) -> Result<(), IndexError> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS records (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT NOT NULL UNIQUE,
            source TEXT NOT NULL,
            page_or_row INTEGER NOT NULL,
            start_offset INTEGER NOT NULL,
            chunk_index INTEGER NOT NULL,
            extra TEXT NOT NULL,
            text TEXT NOT NULL,
            embedding BLOB NOT NULL,
            created_at INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_records_source ON records(source);

        CREATE TABLE IF NOT EXISTS sources (
            name TEXT PRIMARY KEY,
            content_hash TEXT NOT NULL,
            chunk_count INTEGER NOT NULL,
            ingested_at INTEGER NOT NULL
        );
        "#,
    )?;
    Ok(())
}

fn get_meta(conn: &Connection, key: &str) -> Result<Option<String>, IndexError> {
    let value = conn
        .query_row(
            "SELECT value FROM meta WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()?;
    Ok(value)
}

fn set_meta(conn: &Connection, key: &str, value: &str) -> Result<(), IndexError> {
    conn.execute(
        r#"
        INSERT INTO meta (key, value)
        VALUES (?1, ?2)
        ON CONFLICT(key) DO UPDATE SET value = excluded.value
        "#,
        params![key, value],
    )?;
    Ok(())
}

fn read_dimension(conn: &Connection) -> Result<Option<usize>, IndexError> {
    Ok(get_meta(conn, "dimension")?.and_then(|raw| raw.parse().ok()))
}

fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Converts an embedding vector to a compact blob.
fn embedding_to_blob(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Converts a blob back to an embedding vector.
fn blob_to_embedding(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

/// Computes cosine similarity between two vectors.
fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let magnitude_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let magnitude_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if magnitude_a == 0.0 || magnitude_b == 0.0 {
        return 0.0;
    }

    dot_product / (magnitude_a * magnitude_b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use tempfile::tempdir;

    /// Returns preset vectors keyed by chunk text.
    struct FixedProvider {
        vectors: Vec<(&'static str, Vec<f32>)>,
        batch_size: usize,
    }

    impl EmbeddingProvider for FixedProvider {
        fn model_id(&self) -> &str {
            "fixed"
        }

        fn batch_size(&self) -> usize {
            self.batch_size
        }

        fn embed_texts(&mut self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            texts
                .iter()
                .map(|text| {
                    self.vectors
                        .iter()
                        .find(|(key, _)| *key == text.as_str())
                        .map(|(_, v)| v.clone())
                        .ok_or_else(|| anyhow::anyhow!("no vector for {}", text))
                })
                .collect()
        }
    }

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

    fn provider() -> FixedProvider {
        FixedProvider {
            vectors: vec![
                ("a", vec![1.0, 0.0, 0.0]),
                ("b", vec![0.0, 1.0, 0.0]),
                ("c", vec![0.9, 0.1, 0.0]),
                ("a-twin", vec![1.0, 0.0, 0.0]),
            ],
            batch_size: 2,
        }
    }

    #[test]
    fn test_initialize_and_open() {
        let dir = tempdir().unwrap();
        let index_dir = dir.path().join("idx");

        let mut index = VectorIndex::initialize(&index_dir, IngestMode::Fresh, "fixed").unwrap();
        index
            .add(&[chunk("a.csv", 0, "a")], &mut provider())
            .unwrap();
        index.persist().unwrap();
        assert!(index_dir.join(INDEX_FILE).exists());

        let reopened = VectorIndex::open(&index_dir).unwrap();
        assert_eq!(reopened.model_id(), "fixed");
        assert_eq!(reopened.dimension(), Some(3));
        assert_eq!(reopened.count().unwrap(), 1);
    }

    #[test]
    fn test_open_missing_index() {
        let dir = tempdir().unwrap();
        let err = VectorIndex::open(&dir.path().join("missing")).err().unwrap();
        assert!(matches!(err, IndexError::NotInitialized(_)));
    }

    #[test]
    fn test_count_includes_buffered_records() {
        let dir = tempdir().unwrap();
        let mut index = VectorIndex::initialize(dir.path(), IngestMode::Fresh, "fixed").unwrap();
        index
            .add(
                &[chunk("x.csv", 0, "a"), chunk("x.csv", 1, "b"), chunk("x.csv", 2, "c")],
                &mut provider(),
            )
            .unwrap();
        assert_eq!(index.count().unwrap(), 3);
        assert_eq!(index.persist().unwrap(), 3);
        assert_eq!(index.count().unwrap(), 3);
    }

    #[test]
    fn test_query_orders_by_similarity_and_insertion() {
        let dir = tempdir().unwrap();
        let mut index = VectorIndex::initialize(dir.path(), IngestMode::Fresh, "fixed").unwrap();
        index
            .add(
                &[
                    chunk("x.csv", 0, "b"),
                    chunk("x.csv", 1, "a"),
                    chunk("x.csv", 2, "c"),
                    chunk("x.csv", 3, "a-twin"),
                ],
                &mut provider(),
            )
            .unwrap();
        index.persist().unwrap();

        let results = index.query(&[1.0, 0.0, 0.0], 3).unwrap();
        let ids: Vec<&str> = results.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["x.csv:1:0", "x.csv:3:0", "x.csv:2:0"]);
        assert!((results[0].score - 1.0).abs() < 1e-6);

        let snapshot = index.snapshot().unwrap();
        let snap_ids: Vec<String> = snapshot
            .query(&[1.0, 0.0, 0.0], 3)
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(snap_ids, ids);
    }

    #[test]
    fn test_non_finite_vectors_rank_last() {
        let dir = tempdir().unwrap();
        let mut provider = FixedProvider {
            vectors: vec![
                ("nan", vec![f32::NAN, 0.0, 0.0]),
                ("inf", vec![f32::INFINITY, 1.0, 0.0]),
                ("a", vec![1.0, 0.0, 0.0]),
                ("b", vec![0.0, 1.0, 0.0]),
            ],
            batch_size: 4,
        };
        let mut index = VectorIndex::initialize(dir.path(), IngestMode::Fresh, "fixed").unwrap();
        index
            .add(
                &[
                    chunk("x.csv", 0, "nan"),
                    chunk("x.csv", 1, "inf"),
                    chunk("x.csv", 2, "a"),
                    chunk("x.csv", 3, "b"),
                ],
                &mut provider,
            )
            .unwrap();

        let results = index.query(&[1.0, 0.0, 0.0], 4).unwrap();
        let ids: Vec<&str> = results.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids.len(), 4);
        assert_eq!(ids[0], "x.csv:2:0");
        assert_eq!(ids[1], "x.csv:3:0");
        assert!(ids[2..].contains(&"x.csv:0:0"));
        assert!(ids[2..].contains(&"x.csv:1:0"));
        assert!(results.iter().all(|r| !r.score.is_nan()));
    }

    #[test]
    fn test_query_checks_dimension() {
        let dir = tempdir().unwrap();
        let mut index = VectorIndex::initialize(dir.path(), IngestMode::Fresh, "fixed").unwrap();
        index.add(&[chunk("x.csv", 0, "a")], &mut provider()).unwrap();
        let err = index.query(&[1.0, 0.0], 1).unwrap_err();
        assert!(matches!(
            err,
            IndexError::DimensionMismatch {
                expected: 3,
                actual: 2
            }
        ));
    }

    #[test]
    fn test_empty_index_query() {
        let dir = tempdir().unwrap();
        let index = VectorIndex::initialize(dir.path(), IngestMode::Fresh, "fixed").unwrap();
        assert!(index.query(&[1.0, 0.0, 0.0], 3).unwrap().is_empty());
        assert!(index.snapshot().unwrap().is_empty());
    }

    #[test]
    fn test_failed_embedding_buffers_nothing() {
        let dir = tempdir().unwrap();
        let mut index = VectorIndex::initialize(dir.path(), IngestMode::Fresh, "fixed").unwrap();
        let err = index
            .add(
                &[chunk("x.csv", 0, "a"), chunk("x.csv", 1, "b"), chunk("x.csv", 2, "unknown")],
                &mut provider(),
            )
            .unwrap_err();
        assert!(err.is_embedding_failure());
        assert_eq!(index.count().unwrap(), 0);
    }

    #[test]
    fn test_fresh_destroys_and_append_keeps() {
        let dir = tempdir().unwrap();
        let mut index = VectorIndex::initialize(dir.path(), IngestMode::Fresh, "fixed").unwrap();
        index.add(&[chunk("x.csv", 0, "a")], &mut provider()).unwrap();
        index.record_source("x.csv", "h1", 1);
        index.persist().unwrap();
        drop(index);

        let index = VectorIndex::initialize(dir.path(), IngestMode::Append, "fixed").unwrap();
        assert_eq!(index.count().unwrap(), 1);
        assert!(index.contains_source("x.csv").unwrap());
        assert_eq!(index.source_hash("x.csv").unwrap().as_deref(), Some("h1"));
        drop(index);

        let index = VectorIndex::initialize(dir.path(), IngestMode::Fresh, "fixed").unwrap();
        assert_eq!(index.count().unwrap(), 0);
        assert!(index.sources().unwrap().is_empty());
    }

    #[test]
    fn test_append_rejects_other_model() {
        let dir = tempdir().unwrap();
        let mut index = VectorIndex::initialize(dir.path(), IngestMode::Fresh, "fixed").unwrap();
        index.add(&[chunk("x.csv", 0, "a")], &mut provider()).unwrap();
        index.persist().unwrap();
        drop(index);

        let err = VectorIndex::initialize(dir.path(), IngestMode::Append, "hashing-384")
            .err()
            .unwrap();
        assert!(matches!(err, IndexError::ModelMismatch { .. }));
    }

    #[test]
    fn test_metadata_round_trips_through_storage() {
        let dir = tempdir().unwrap();
        let mut index = VectorIndex::initialize(dir.path(), IngestMode::Fresh, "fixed").unwrap();
        let mut c = chunk("guia.pdf", 4, "b");
        c.metadata.extra.insert("kind".to_string(), "pdf".to_string());
        c.metadata.start_offset = 120;
        c.metadata.chunk_index = 2;
        index.add(&[c], &mut provider()).unwrap();
        index.persist().unwrap();

        let reopened = VectorIndex::open(dir.path()).unwrap();
        let hit = &reopened.query(&[0.0, 1.0, 0.0], 1).unwrap()[0];
        assert_eq!(hit.id, "guia.pdf:4:2");
        assert_eq!(hit.metadata.start_offset, 120);
        assert_eq!(hit.metadata.extra.get("kind").map(String::as_str), Some("pdf"));
    }

    #[test]
    fn test_blob_round_trip() {
        let v = vec![0.25f32, -1.5, 3.0];
        assert_eq!(blob_to_embedding(&embedding_to_blob(&v)), v);
    }
}
