// SPDX-License-Identifier: MIT OR Apache-2.0

//! Ingestion orchestrator: load, chunk, embed and persist every file of a
//! data directory, isolating per-file failures.

use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::time::{Duration, Instant};
use walkdir::WalkDir;

use crate::config::IngestMode;
use crate::embedding::{EmbeddingProvider, RecursiveChunker, VectorIndex};
use crate::errors::IndexError;
use crate::loader::{DocumentLoader, SourceFormat};

/// Why a file contributed nothing to the index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Extension is neither PDF nor CSV
    Unsupported,
    /// The loader failed (unreadable file, broken PDF, undecodable text)
    LoadFailed(String),
    /// Loading succeeded but produced no text to index
    NoContent,
    /// The embedding provider failed for this file's chunks
    EmbeddingFailed(String),
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::Unsupported => write!(f, "unsupported file type"),
            SkipReason::LoadFailed(err) => write!(f, "load failed: {}", err),
            SkipReason::NoContent => write!(f, "no content"),
            SkipReason::EmbeddingFailed(err) => write!(f, "embedding failed: {}", err),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedFile {
    pub name: String,
    pub reason: SkipReason,
}

/// Summary of one ingestion run.
#[derive(Debug, Clone, Default)]
pub struct IngestReport {
    pub mode: IngestMode,
    /// Regular files found directly in the data directory
    pub files_seen: usize,
    /// Files whose chunks were added
    pub files_processed: usize,
    pub skipped: Vec<SkippedFile>,
    /// Files left untouched because the index already holds them (append)
    pub already_indexed: Vec<String>,
    pub chunks_added: usize,
    /// Records in the index after the run
    pub total_records: u64,
    pub elapsed: Duration,
}

/// Runs the load, chunk, embed, persist pipeline over a directory.
pub struct Ingestor {
    loader: DocumentLoader,
    chunker: RecursiveChunker,
    provider: Box<dyn EmbeddingProvider>,
    quiet: bool,
}

impl Ingestor {
    pub fn new(
        loader: DocumentLoader,
        chunker: RecursiveChunker,
        provider: Box<dyn EmbeddingProvider>,
    ) -> Self {
        Self {
            loader,
            chunker,
            provider,
            quiet: false,
        }
    }

    /// Hide the progress bar.
    pub fn quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    /// Ingests every file directly under `data_dir` into the index at `index_path`.
    ///
    /// Only storage faults fail the run; everything else skips the file.
    pub fn run(
        &mut self,
        data_dir: &Path,
        index_path: &Path,
        mode: IngestMode,
    ) -> Result<IngestReport, IndexError> {
        let started = Instant::now();
        let files = list_files(data_dir)?;
        let mut index = VectorIndex::initialize(index_path, mode, self.provider.model_id())?;

        let mut report = IngestReport {
            mode,
            files_seen: files.len(),
            ..Default::default()
        };

        let pb = if self.quiet {
            ProgressBar::hidden()
        } else {
            ProgressBar::new(files.len() as u64)
        };
        pb.set_style(
            ProgressStyle::default_bar()
                .template("[{bar:40.cyan/blue}] {pos}/{len} files | Ingesting {msg}")
                .expect("valid progress bar template")
                .progress_chars("##."),
        );

        for path in &files {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            pb.set_message(name.clone());

            match self.ingest_file(&mut index, path, &name, mode)? {
                FileOutcome::Added(count) => {
                    report.files_processed += 1;
                    report.chunks_added += count;
                }
                FileOutcome::AlreadyIndexed => report.already_indexed.push(name),
                FileOutcome::Skipped(reason) => report.skipped.push(SkippedFile { name, reason }),
            }
            pb.inc(1);
        }
        pb.finish_and_clear();

        index.persist()?;
        report.total_records = index.count()?;
        report.elapsed = started.elapsed();

        tracing::info!(
            files = report.files_seen,
            processed = report.files_processed,
            skipped = report.skipped.len(),
            chunks = report.chunks_added,
            total = report.total_records,
            "ingestion finished"
        );
        Ok(report)
    }

    fn ingest_file(
        &mut self,
        index: &mut VectorIndex,
        path: &Path,
        name: &str,
        mode: IngestMode,
    ) -> Result<FileOutcome, IndexError> {
        if SourceFormat::detect(name).is_none() {
            tracing::info!(file = name, "skipping unsupported file");
            return Ok(FileOutcome::Skipped(SkipReason::Unsupported));
        }

        let content_hash = match std::fs::read(path) {
            Ok(bytes) => blake3::hash(&bytes).to_hex().to_string(),
            Err(err) => {
                tracing::warn!(file = name, error = %err, "failed to read file, skipping");
                return Ok(FileOutcome::Skipped(SkipReason::LoadFailed(err.to_string())));
            }
        };

        if mode == IngestMode::Append {
            if let Some(stored) = index.source_hash(name)? {
                if stored != content_hash {
                    tracing::warn!(
                        file = name,
                        "file changed since it was indexed; run a fresh ingestion to pick up the change"
                    );
                } else {
                    tracing::info!(file = name, "already indexed, skipping");
                }
                return Ok(FileOutcome::AlreadyIndexed);
            }
        }

        let documents = match self.loader.load(path, name) {
            Ok(documents) => documents,
            Err(err) => {
                tracing::warn!(file = name, error = %err, "failed to load file, skipping");
                return Ok(FileOutcome::Skipped(SkipReason::LoadFailed(err.to_string())));
            }
        };

        let chunks = self.chunker.split(&documents);
        if chunks.is_empty() {
            tracing::info!(file = name, documents = documents.len(), "no content to index");
            return Ok(FileOutcome::Skipped(SkipReason::NoContent));
        }

        let added = match index.add(&chunks, self.provider.as_mut()) {
            Ok(added) => added,
            Err(err) if err.is_embedding_failure() => {
                tracing::warn!(file = name, error = %err, "embedding failed, skipping");
                return Ok(FileOutcome::Skipped(SkipReason::EmbeddingFailed(err.to_string())));
            }
            Err(err) => return Err(err),
        };

        index.record_source(name, &content_hash, added as u64);
        index.persist()?;
        tracing::info!(
            file = name,
            documents = documents.len(),
            chunks = added,
            "indexed file"
        );
        Ok(FileOutcome::Added(added))
    }
}

enum FileOutcome {
    Added(usize),
    AlreadyIndexed,
    Skipped(SkipReason),
}

/// Regular files directly inside `data_dir`, sorted by file name.
fn list_files(data_dir: &Path) -> Result<Vec<std::path::PathBuf>, IndexError> {
    if !data_dir.is_dir() {
        return Err(IndexError::Io {
            path: data_dir.to_path_buf(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "data directory not found"),
        });
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(data_dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        match entry {
            Ok(entry) if entry.file_type().is_file() => files.push(entry.into_path()),
            Ok(_) => {}
            Err(err) => tracing::warn!(error = %err, "failed to read directory entry"),
        }
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashingProvider;
    use tempfile::TempDir;

    const CSV: &str = "TIPO_BENEFICIO;DESCRIPCION_BENEFICIO;PROVINCIA\n\
                       Bono;Transferencia mensual;Azuay\n\
                       Pension;Adultos mayores;Loja\n";

    /// Fails whenever a text contains the marker word.
    struct FlakyProvider {
        inner: HashingProvider,
    }

    impl EmbeddingProvider for FlakyProvider {
        fn model_id(&self) -> &str {
            self.inner.model_id()
        }

        fn batch_size(&self) -> usize {
            self.inner.batch_size()
        }

        fn embed_texts(&mut self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
            if texts.iter().any(|t| t.contains("FALLA")) {
                anyhow::bail!("backend unavailable");
            }
            self.inner.embed_texts(texts)
        }
    }

    fn ingestor() -> Ingestor {
        Ingestor::new(
            DocumentLoader::default(),
            RecursiveChunker::default(),
            Box::new(HashingProvider::new(64).unwrap()),
        )
        .quiet(true)
    }

    #[test]
    fn skips_unsupported_and_indexes_the_rest() {
        let data = TempDir::new().unwrap();
        let index = TempDir::new().unwrap();
        std::fs::write(data.path().join("bonos.csv"), CSV).unwrap();
        std::fs::write(data.path().join("notas.txt"), "texto libre").unwrap();

        let report = ingestor()
            .run(data.path(), index.path(), IngestMode::Fresh)
            .unwrap();
        assert_eq!(report.files_seen, 2);
        assert_eq!(report.files_processed, 1);
        assert_eq!(report.chunks_added, 2);
        assert_eq!(report.total_records, 2);
        assert_eq!(
            report.skipped,
            vec![SkippedFile {
                name: "notas.txt".to_string(),
                reason: SkipReason::Unsupported,
            }]
        );
    }

    #[test]
    fn broken_pdf_does_not_stop_the_run() {
        let data = TempDir::new().unwrap();
        let index = TempDir::new().unwrap();
        std::fs::write(data.path().join("a_roto.pdf"), b"not a pdf").unwrap();
        std::fs::write(data.path().join("b_bonos.csv"), CSV).unwrap();

        let report = ingestor()
            .run(data.path(), index.path(), IngestMode::Fresh)
            .unwrap();
        assert_eq!(report.files_processed, 1);
        assert_eq!(report.skipped.len(), 1);
        assert!(matches!(report.skipped[0].reason, SkipReason::LoadFailed(_)));
    }

    #[test]
    fn embedding_failure_skips_only_that_file() {
        let data = TempDir::new().unwrap();
        let index = TempDir::new().unwrap();
        std::fs::write(
            data.path().join("a.csv"),
            "TIPO_BENEFICIO;PROVINCIA\nFALLA;Azuay\n",
        )
        .unwrap();
        std::fs::write(data.path().join("b.csv"), CSV).unwrap();

        let mut ingestor = Ingestor::new(
            DocumentLoader::default(),
            RecursiveChunker::default(),
            Box::new(FlakyProvider {
                inner: HashingProvider::new(64).unwrap(),
            }),
        )
        .quiet(true);
        let report = ingestor
            .run(data.path(), index.path(), IngestMode::Fresh)
            .unwrap();

        assert_eq!(report.files_processed, 1);
        assert_eq!(report.total_records, 2);
        assert_eq!(report.skipped[0].name, "a.csv");
        assert!(matches!(
            report.skipped[0].reason,
            SkipReason::EmbeddingFailed(_)
        ));
    }

    #[test]
    fn append_skips_known_files() {
        let data = TempDir::new().unwrap();
        let index = TempDir::new().unwrap();
        std::fs::write(data.path().join("bonos.csv"), CSV).unwrap();

        let first = ingestor()
            .run(data.path(), index.path(), IngestMode::Append)
            .unwrap();
        assert_eq!(first.total_records, 2);

        std::fs::write(
            data.path().join("salud.csv"),
            "NOMBRE_UNIDAD;PROVINCIA\nCentro de Salud;Pichincha\n",
        )
        .unwrap();
        let second = ingestor()
            .run(data.path(), index.path(), IngestMode::Append)
            .unwrap();
        assert_eq!(second.already_indexed, vec!["bonos.csv".to_string()]);
        assert_eq!(second.chunks_added, 1);
        assert_eq!(second.total_records, 3);
    }

    #[test]
    fn missing_data_dir_is_an_error_and_keeps_the_index() {
        let data = TempDir::new().unwrap();
        let index = TempDir::new().unwrap();
        std::fs::write(data.path().join("bonos.csv"), CSV).unwrap();
        ingestor()
            .run(data.path(), index.path(), IngestMode::Fresh)
            .unwrap();

        let err = ingestor()
            .run(&data.path().join("nope"), index.path(), IngestMode::Fresh)
            .unwrap_err();
        assert!(matches!(err, IndexError::Io { .. }));
        assert_eq!(VectorIndex::open(index.path()).unwrap().count().unwrap(), 2);
    }
}
