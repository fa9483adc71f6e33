// SPDX-License-Identifier: MIT OR Apache-2.0

//! CLI argument parsing using clap

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

/// tramite - Question answering over government service records
///
/// Ingests PDF guides and CSV service listings into a local vector index and
/// answers questions from the most relevant fragments.
#[derive(Parser, Debug)]
#[command(name = "tramite")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file (defaults to .tramiterc.toml, then ~/.config/tramite/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Output format (text or json)
    #[arg(long, global = true)]
    pub format: Option<OutputFormat>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Output format for results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Ingestion mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum CliIngestMode {
    /// Delete the index and rebuild it from every file
    Fresh,
    /// Keep the index and add files it has not seen yet
    Append,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Load, chunk and embed every PDF/CSV file of a directory into the index
    Ingest {
        /// Directory with source files
        #[arg(short, long)]
        data_dir: Option<PathBuf>,

        /// Index directory
        #[arg(short, long)]
        index_path: Option<PathBuf>,

        /// Rebuild or append
        #[arg(long, value_enum)]
        mode: Option<CliIngestMode>,

        /// Maximum characters per chunk
        #[arg(long)]
        chunk_size: Option<usize>,

        /// Characters shared between consecutive chunks
        #[arg(long)]
        chunk_overlap: Option<usize>,

        /// Hide the progress bar
        #[arg(short, long)]
        quiet: bool,
    },

    /// Retrieve the chunks most relevant to a question
    Query {
        /// Question text
        text: String,

        /// Number of chunks to retrieve
        #[arg(short)]
        k: Option<usize>,

        /// Also generate an answer from the retrieved chunks
        #[arg(long)]
        answer: bool,

        /// Index directory
        #[arg(short, long)]
        index_path: Option<PathBuf>,
    },

    /// Serve POST /query and GET /healthz over HTTP
    Serve {
        /// Address to bind (host:port)
        #[arg(long)]
        bind: Option<String>,

        /// Index directory
        #[arg(short, long)]
        index_path: Option<PathBuf>,
    },

    /// Show record count, embedding model and ingested sources
    Status {
        /// Index directory
        #[arg(short, long)]
        index_path: Option<PathBuf>,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_ingest_flags() {
        let cli = Cli::parse_from([
            "tramite",
            "ingest",
            "--data-dir",
            "datos",
            "--mode",
            "append",
            "--chunk-size",
            "400",
            "-q",
        ]);
        match cli.command {
            Commands::Ingest {
                data_dir,
                mode,
                chunk_size,
                quiet,
                ..
            } => {
                assert_eq!(data_dir, Some(PathBuf::from("datos")));
                assert_eq!(mode, Some(CliIngestMode::Append));
                assert_eq!(chunk_size, Some(400));
                assert!(quiet);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn parses_query_with_global_format() {
        let cli = Cli::parse_from(["tramite", "query", "duplicado de cédula", "-k", "5", "--format", "json"]);
        assert_eq!(cli.format, Some(OutputFormat::Json));
        match cli.command {
            Commands::Query { text, k, answer, .. } => {
                assert_eq!(text, "duplicado de cédula");
                assert_eq!(k, Some(5));
                assert!(!answer);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }
}
