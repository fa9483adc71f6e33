// SPDX-License-Identifier: MIT OR Apache-2.0

//! Document loader - turns one source file into uniform text documents
//!
//! PDF files yield one document per page, tabular files one document per
//! row. Unsupported extensions yield nothing.

pub mod pdf;
pub mod tabular;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::errors::LoadError;

pub use tabular::{ColumnAliases, ServiceRecord};

/// Metadata attached to a loaded document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    /// File name the document was read from
    pub source: String,
    /// Zero-based page index (PDF) or data row index (CSV)
    pub page_or_row: u32,
    /// Format-specific fields (kind, delimiter, total_pages, ...)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

impl DocumentMetadata {
    pub fn new(source: impl Into<String>, page_or_row: u32) -> Self {
        Self {
            source: source.into(),
            page_or_row,
            extra: BTreeMap::new(),
        }
    }

    pub fn with_extra(mut self, key: &str, value: impl Into<String>) -> Self {
        self.extra.insert(key.to_string(), value.into());
        self
    }
}

/// A uniform text document produced by the loader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub text: String,
    pub metadata: DocumentMetadata,
}

/// Source formats understood by the loader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Pdf,
    Csv,
}

impl SourceFormat {
    /// Detect the format from a file name (case-insensitive extension).
    pub fn detect(filename: &str) -> Option<Self> {
        let ext = Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())?
            .to_lowercase();
        match ext.as_str() {
            "pdf" => Some(SourceFormat::Pdf),
            "csv" => Some(SourceFormat::Csv),
            _ => None,
        }
    }
}

/// Loader configuration: the fallback chains tried for tabular input.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Field delimiters, tried in order
    pub delimiters: Vec<char>,
    /// Text encodings (WHATWG labels), tried in order
    pub encodings: Vec<String>,
    /// Column aliases for each record field
    pub aliases: ColumnAliases,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            delimiters: vec![';', ','],
            encodings: vec!["utf-8".to_string(), "windows-1252".to_string()],
            aliases: ColumnAliases::default(),
        }
    }
}

/// Loads source files into documents.
#[derive(Debug, Clone, Default)]
pub struct DocumentLoader {
    config: LoaderConfig,
}

impl DocumentLoader {
    pub fn new(config: LoaderConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Loads a single file.
    ///
    /// Returns an empty vector for unsupported extensions and for tabular
    /// files no delimiter could parse. Unreadable files are errors the caller
    /// is expected to log and skip.
    pub fn load(&self, file_path: &Path, filename: &str) -> Result<Vec<Document>, LoadError> {
        match SourceFormat::detect(filename) {
            Some(SourceFormat::Pdf) => {
                tracing::info!(file = filename, "loading as PDF");
                pdf::load_pages(file_path, filename)
            }
            Some(SourceFormat::Csv) => {
                tracing::info!(file = filename, "loading as CSV");
                tabular::load_rows(file_path, filename, &self.config)
            }
            None => {
                tracing::debug!(file = filename, "unsupported extension, nothing to load");
                Ok(Vec::new())
            }
        }
    }
}
