// SPDX-License-Identifier: MIT OR Apache-2.0

//! tramite - Question answering over government service records
//!
//! Ingests PDF guides and CSV service listings into a local vector index and
//! serves retrieval-augmented answers over HTTP.

mod cli;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, CliIngestMode, Commands, OutputFormat};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing_subscriber::EnvFilter;

use tramite_rag::config::{Config, IngestMode};
use tramite_rag::embedding::{create_provider, ChunkConfig, RecursiveChunker, VectorIndex};
use tramite_rag::errors::IndexError;
use tramite_rag::indexer::Ingestor;
use tramite_rag::loader::DocumentLoader;
use tramite_rag::output;
use tramite_rag::query::{
    build_context, serve, AnswerSynthesizer, OllamaSynthesizer, RagContext, Retriever,
};

fn main() -> Result<()> {
    // Initialize tracing with TRAMITE_LOG env var (e.g., TRAMITE_LOG=debug tramite ingest)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("TRAMITE_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let format = cli.format.unwrap_or_default();
    let config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::load(),
    };
    let use_color = output::use_colors() && format == OutputFormat::Text;

    match cli.command {
        Commands::Ingest {
            data_dir,
            index_path,
            mode,
            chunk_size,
            chunk_overlap,
            quiet,
        } => {
            let data_dir = data_dir.unwrap_or_else(|| config.ingest.data_dir());
            let index_path = index_path.unwrap_or_else(|| config.ingest.index_path());
            let mode = mode
                .map(|m| match m {
                    CliIngestMode::Fresh => IngestMode::Fresh,
                    CliIngestMode::Append => IngestMode::Append,
                })
                .unwrap_or_else(|| config.ingest.mode());
            let chunk_config = ChunkConfig::new(
                chunk_size.unwrap_or_else(|| config.ingest.chunk_size()),
                chunk_overlap.unwrap_or_else(|| config.ingest.chunk_overlap()),
            )?;

            let provider = create_provider(&config.embeddings)?;
            let mut ingestor = Ingestor::new(
                DocumentLoader::new(config.loader.clone()),
                RecursiveChunker::new(chunk_config),
                provider,
            )
            .quiet(quiet || format == OutputFormat::Json);

            let report = ingestor.run(&data_dir, &index_path, mode)?;
            match format {
                OutputFormat::Json => {
                    let skipped: Vec<_> = report
                        .skipped
                        .iter()
                        .map(|s| serde_json::json!({ "file": s.name, "reason": s.reason.to_string() }))
                        .collect();
                    let value = serde_json::json!({
                        "mode": report.mode.to_string(),
                        "files_seen": report.files_seen,
                        "files_processed": report.files_processed,
                        "already_indexed": report.already_indexed,
                        "skipped": skipped,
                        "chunks_added": report.chunks_added,
                        "total_records": report.total_records,
                        "elapsed_ms": report.elapsed.as_millis() as u64,
                    });
                    println!("{}", serde_json::to_string_pretty(&value)?);
                }
                OutputFormat::Text => print!("{}", output::render_ingest_report(&report, use_color)),
            }
        }
        Commands::Query {
            text,
            k,
            answer,
            index_path,
        } => {
            let index_path = index_path.unwrap_or_else(|| config.ingest.index_path());
            let k = k.unwrap_or_else(|| config.retrieval.top_k()).max(1);
            let retriever = Retriever::open(&index_path, create_provider(&config.embeddings)?)?;
            let hits = retriever.retrieve(&text, k)?;

            let generated = if answer {
                let synthesizer = OllamaSynthesizer::new(&config.generation)?;
                Some(
                    synthesizer
                        .generate(&build_context(&hits), &text)
                        .context("answer generation failed")?,
                )
            } else {
                None
            };

            match format {
                OutputFormat::Json => {
                    let value = serde_json::json!({
                        "query": text,
                        "chunks": hits,
                        "response": generated,
                    });
                    println!("{}", serde_json::to_string_pretty(&value)?);
                }
                OutputFormat::Text => {
                    if hits.is_empty() {
                        println!("No results for '{}'", text);
                    } else {
                        print!("{}", output::render_hits(&hits, use_color));
                    }
                    if let Some(generated) = generated {
                        println!();
                        println!("{}", generated);
                    }
                }
            }
        }
        Commands::Serve { bind, index_path } => {
            let index_path = index_path.unwrap_or_else(|| config.ingest.index_path());
            let bind = bind.unwrap_or_else(|| config.server.bind().to_string());
            let top_k = config.retrieval.top_k();
            let cors_origins = config.server.cors_origins();
            let synthesizer: Arc<dyn AnswerSynthesizer> =
                Arc::new(OllamaSynthesizer::new(&config.generation)?);

            let ctx = match VectorIndex::open(&index_path) {
                Ok(index) => {
                    let provider = create_provider(&config.embeddings)?;
                    index.check_model(provider.model_id())?;
                    let retriever =
                        Retriever::new(index.snapshot()?, Arc::new(Mutex::new(provider)))?;
                    RagContext::new(retriever, synthesizer, top_k)
                }
                Err(IndexError::NotInitialized(path)) => {
                    tracing::warn!(
                        path = %path.display(),
                        "index not initialized; serving not-ready responses until restarted"
                    );
                    RagContext::not_ready(
                        format!("no index at {}; run `tramite ingest` first", path.display()),
                        synthesizer,
                        top_k,
                    )
                }
                Err(err) => return Err(err.into()),
            }
            .with_cors_origins(cors_origins);

            eprintln!("tramite listening on http://{}", bind);
            tokio::runtime::Runtime::new()
                .context("failed to start async runtime")?
                .block_on(serve(ctx, &bind))?;
        }
        Commands::Status { index_path } => {
            let index_path: PathBuf = index_path.unwrap_or_else(|| config.ingest.index_path());
            let index = VectorIndex::open(&index_path)?;
            let records = index.count()?;
            let sources = index.sources()?;
            match format {
                OutputFormat::Json => {
                    let value = serde_json::json!({
                        "index_path": index_path.display().to_string(),
                        "records": records,
                        "model": index.model_id(),
                        "dimension": index.dimension(),
                        "sources": sources,
                    });
                    println!("{}", serde_json::to_string_pretty(&value)?);
                }
                OutputFormat::Text => print!(
                    "{}",
                    output::render_status(
                        records,
                        index.model_id(),
                        index.dimension(),
                        &sources,
                        use_color
                    )
                ),
            }
        }
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "tramite", &mut std::io::stdout());
        }
    }

    Ok(())
}
