// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration file support for tramite
//!
//! Loads configuration from .tramiterc.toml in current directory or ~/.config/tramite/config.toml

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::embedding::ChunkConfig;
use crate::loader::LoaderConfig;

/// Name of the per-directory configuration file
pub const CONFIG_FILE: &str = ".tramiterc.toml";

/// Browser origins allowed to call the query service by default
pub const DEFAULT_CORS_ORIGINS: [&str; 2] = ["http://localhost", "http://localhost:8080"];

/// How an ingestion run treats an existing index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestMode {
    /// Destroy the index once, then rebuild it from every file
    #[default]
    Fresh,
    /// Keep the index and add only files it has not seen
    Append,
}

impl std::fmt::Display for IngestMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IngestMode::Fresh => write!(f, "fresh"),
            IngestMode::Append => write!(f, "append"),
        }
    }
}

/// Embedding provider type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProviderType {
    #[default]
    Builtin,
    Command,
    Hashing,
}

/// Ingestion configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Directory holding the source PDF/CSV files
    pub data_dir: Option<PathBuf>,
    /// Directory holding the persisted vector index
    pub index_path: Option<PathBuf>,
    /// Rebuild or append
    pub mode: Option<IngestMode>,
    /// Maximum characters per chunk
    pub chunk_size: Option<usize>,
    /// Characters shared between consecutive chunks
    pub chunk_overlap: Option<usize>,
}

impl IngestConfig {
    /// Get data directory (defaults to "data")
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| PathBuf::from("data"))
    }

    /// Get index path (defaults to "chroma_db")
    pub fn index_path(&self) -> PathBuf {
        self.index_path
            .clone()
            .unwrap_or_else(|| PathBuf::from("chroma_db"))
    }

    /// Get ingestion mode (defaults to Fresh)
    pub fn mode(&self) -> IngestMode {
        self.mode.unwrap_or_default()
    }

    /// Get chunk size (defaults to 800)
    pub fn chunk_size(&self) -> usize {
        self.chunk_size.unwrap_or(crate::embedding::chunker::DEFAULT_CHUNK_SIZE)
    }

    /// Get chunk overlap (defaults to 100)
    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
            .unwrap_or(crate::embedding::chunker::DEFAULT_CHUNK_OVERLAP)
    }

    /// Validated chunker configuration
    pub fn chunk_config(&self) -> Result<ChunkConfig> {
        ChunkConfig::new(self.chunk_size(), self.chunk_overlap())
    }
}

/// Embedding configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Provider type (builtin, command, hashing)
    pub provider: Option<EmbeddingProviderType>,
    /// Model identifier for the embedding provider
    pub model: Option<String>,
    /// Command to execute for command provider
    pub command: Option<String>,
    /// Vector dimension for the hashing provider
    pub dimension: Option<usize>,
}

impl EmbeddingConfig {
    /// Get provider type (defaults to Builtin)
    pub fn provider(&self) -> EmbeddingProviderType {
        self.provider.unwrap_or_default()
    }

    /// Get model identifier (defaults to "all-MiniLM-L6-v2")
    pub fn model(&self) -> &str {
        self.model.as_deref().unwrap_or("all-MiniLM-L6-v2")
    }

    /// Get command (defaults to "embedder")
    pub fn command(&self) -> &str {
        self.command.as_deref().unwrap_or("embedder")
    }

    /// Get hashing dimension (defaults to 384)
    pub fn dimension(&self) -> usize {
        self.dimension
            .unwrap_or(crate::embedding::DEFAULT_EMBEDDING_DIM)
    }
}

/// Retrieval configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Number of chunks handed to the answer synthesizer
    pub top_k: Option<usize>,
}

impl RetrievalConfig {
    /// Get top k (defaults to 3)
    pub fn top_k(&self) -> usize {
        self.top_k.unwrap_or(3).max(1)
    }
}

/// Answer generation configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Base URL of the Ollama-compatible server
    pub base_url: Option<String>,
    /// Generation model
    pub model: Option<String>,
    /// Request timeout in seconds
    pub timeout_secs: Option<u64>,
    /// Extra attempts after a failed generation call
    pub max_retries: Option<usize>,
}

impl GenerationConfig {
    /// Get base URL (defaults to "http://localhost:11434")
    pub fn base_url(&self) -> &str {
        self.base_url.as_deref().unwrap_or("http://localhost:11434")
    }

    /// Get model (defaults to "llama3:8b")
    pub fn model(&self) -> &str {
        self.model.as_deref().unwrap_or("llama3:8b")
    }

    /// Get timeout (defaults to 120s)
    pub fn timeout_secs(&self) -> u64 {
        self.timeout_secs.unwrap_or(120).max(1)
    }

    /// Get retry count (defaults to 0)
    pub fn max_retries(&self) -> usize {
        self.max_retries.unwrap_or(0)
    }
}

/// Query service configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind (host:port)
    pub bind: Option<String>,
    /// Browser origins allowed through CORS
    pub cors_origins: Option<Vec<String>>,
}

impl ServerConfig {
    /// Get bind address (defaults to "0.0.0.0:8000")
    pub fn bind(&self) -> &str {
        self.bind.as_deref().unwrap_or("0.0.0.0:8000")
    }

    /// Get CORS origins (defaults to http://localhost and http://localhost:8080)
    pub fn cors_origins(&self) -> Vec<String> {
        self.cors_origins.clone().unwrap_or_else(|| {
            DEFAULT_CORS_ORIGINS.iter().map(|o| o.to_string()).collect()
        })
    }
}

/// Configuration loaded from .tramiterc.toml or ~/.config/tramite/config.toml
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Ingestion configuration
    pub ingest: IngestConfig,

    /// Loader fallback chains
    pub loader: LoaderConfig,

    /// Embedding configuration
    pub embeddings: EmbeddingConfig,

    /// Retrieval configuration
    pub retrieval: RetrievalConfig,

    /// Answer generation configuration
    pub generation: GenerationConfig,

    /// Query service configuration
    pub server: ServerConfig,
}

impl Config {
    /// Load configuration from files
    ///
    /// Precedence (highest to lowest):
    /// 1. .tramiterc.toml in current directory
    /// 2. ~/.config/tramite/config.toml
    pub fn load() -> Self {
        if let Some(config) = Self::load_from_path(Path::new(CONFIG_FILE)) {
            return config;
        }

        if let Some(home) = dirs::home_dir() {
            let config_path = home.join(".config").join("tramite").join("config.toml");
            if let Some(config) = Self::load_from_path(&config_path) {
                return config;
            }
        }

        Self::default()
    }

    /// Load an explicitly requested file; a missing or invalid file is an error.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }

    fn load_from_path(path: &Path) -> Option<Self> {
        let content = std::fs::read_to_string(path).ok()?;
        match toml::from_str(&content) {
            Ok(config) => Some(config),
            Err(e) => {
                tracing::warn!("Failed to parse {}: {}", path.display(), e);
                None
            }
        }
    }
}
