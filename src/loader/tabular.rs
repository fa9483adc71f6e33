// SPDX-License-Identifier: MIT OR Apache-2.0

//! Tabular (CSV) loading: one document per row.
//!
//! Files are decoded with the first encoding that accepts the bytes and
//! parsed with the first delimiter that yields a consistent table. Each row
//! is mapped onto [`ServiceRecord`] through configurable column aliases and
//! rendered with a fixed template.

use csv::{ReaderBuilder, StringRecord};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

use crate::errors::LoadError;
use crate::loader::{Document, DocumentMetadata, LoaderConfig};

/// Fallback for descriptive fields that are missing from a row.
pub const NOT_SPECIFIED: &str = "No especificado";

/// Fallback for requirement/amount fields that are missing from a row.
pub const NOT_APPLICABLE: &str = "No aplica";

/// Source column names accepted for each record field, in lookup order.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ColumnAliases {
    pub service_or_unit: Vec<String>,
    pub description: Vec<String>,
    pub requirements: Vec<String>,
    pub amount: Vec<String>,
    pub province: Vec<String>,
    pub canton: Vec<String>,
    pub address: Vec<String>,
    pub service_type: Vec<String>,
}

impl Default for ColumnAliases {
    fn default() -> Self {
        fn names(list: &[&str]) -> Vec<String> {
            list.iter().map(|s| s.to_string()).collect()
        }
        Self {
            service_or_unit: names(&["TIPO_BENEFICIO", "NOMBRE_UNIDAD"]),
            description: names(&["DESCRIPCION_BENEFICIO"]),
            requirements: names(&["REQUISITOS_ELEGIBILIDAD"]),
            amount: names(&["MONTO_ASIGNADO"]),
            province: names(&["PROVINCIA"]),
            canton: names(&["CANTON"]),
            address: names(&["DIRECCION"]),
            service_type: names(&["TIPO_SERVICIO"]),
        }
    }
}

/// One benefit or service row, with every field optional.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceRecord {
    pub service_or_unit: Option<String>,
    pub description: Option<String>,
    pub requirements: Option<String>,
    pub amount: Option<String>,
    pub province: Option<String>,
    pub canton: Option<String>,
    pub address: Option<String>,
    pub service_type: Option<String>,
}

impl ServiceRecord {
    /// Builds a record from a parsed row. Blank cells count as absent.
    pub fn from_row(columns: &ColumnIndex, row: &StringRecord, aliases: &ColumnAliases) -> Self {
        Self {
            service_or_unit: columns.lookup(row, &aliases.service_or_unit),
            description: columns.lookup(row, &aliases.description),
            requirements: columns.lookup(row, &aliases.requirements),
            amount: columns.lookup(row, &aliases.amount),
            province: columns.lookup(row, &aliases.province),
            canton: columns.lookup(row, &aliases.canton),
            address: columns.lookup(row, &aliases.address),
            service_type: columns.lookup(row, &aliases.service_type),
        }
    }

    /// Renders the descriptive text indexed for this row.
    pub fn render(&self) -> String {
        fn or<'a>(value: &'a Option<String>, fallback: &'a str) -> &'a str {
            value.as_deref().unwrap_or(fallback)
        }
        format!(
            "Servicio o Unidad: {}\n\
             Descripción: {}\n\
             Requisitos: {}\n\
             Monto: {}\n\
             Provincia: {}\n\
             Cantón: {}\n\
             Dirección: {}\n\
             Tipo de Servicio: {}",
            or(&self.service_or_unit, NOT_SPECIFIED),
            or(&self.description, NOT_SPECIFIED),
            or(&self.requirements, NOT_APPLICABLE),
            or(&self.amount, NOT_APPLICABLE),
            or(&self.province, NOT_SPECIFIED),
            or(&self.canton, NOT_SPECIFIED),
            or(&self.address, NOT_SPECIFIED),
            or(&self.service_type, NOT_SPECIFIED),
        )
    }
}

/// Header name to column position, matched case-insensitively.
#[derive(Debug, Clone)]
pub struct ColumnIndex {
    positions: HashMap<String, usize>,
}

impl ColumnIndex {
    pub fn new(headers: &StringRecord) -> Self {
        let positions = headers
            .iter()
            .enumerate()
            .map(|(i, name)| (normalize_header(name), i))
            .collect();
        Self { positions }
    }

    /// First alias present in the header with a non-blank value wins.
    pub fn lookup(&self, row: &StringRecord, aliases: &[String]) -> Option<String> {
        aliases.iter().find_map(|alias| {
            let idx = *self.positions.get(&normalize_header(alias))?;
            let value = row.get(idx)?.trim();
            (!value.is_empty()).then(|| value.to_string())
        })
    }
}

fn normalize_header(name: &str) -> String {
    name.trim_start_matches('\u{feff}').trim().to_uppercase()
}

#[derive(Debug, Error)]
enum AttemptError {
    #[error("delimiter {0:?} is not a single-byte character")]
    NonAscii(char),
    #[error("only {0} column(s) in header")]
    TooFewColumns(usize),
    #[error(transparent)]
    Csv(#[from] csv::Error),
}

struct Table {
    headers: StringRecord,
    rows: Vec<StringRecord>,
}

fn parse_with(text: &str, delimiter: char) -> Result<Table, AttemptError> {
    if !delimiter.is_ascii() {
        return Err(AttemptError::NonAscii(delimiter));
    }
    let mut reader = ReaderBuilder::new()
        .delimiter(delimiter as u8)
        .has_headers(true)
        .flexible(false)
        .from_reader(text.as_bytes());

    let headers = reader.headers()?.clone();
    if headers.len() < 2 {
        return Err(AttemptError::TooFewColumns(headers.len()));
    }
    let rows = reader
        .records()
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(Table { headers, rows })
}

fn decode(bytes: &[u8], path: &Path, encodings: &[String]) -> Result<(String, &'static str), LoadError> {
    for label in encodings {
        let Some(encoding) = encoding_rs::Encoding::for_label(label.as_bytes()) else {
            tracing::warn!(encoding = %label, "unknown encoding label, skipping");
            continue;
        };
        let (text, had_errors) = encoding.decode_with_bom_removal(bytes);
        if !had_errors {
            return Ok((text.into_owned(), encoding.name()));
        }
        tracing::debug!(path = %path.display(), encoding = encoding.name(), "decode failed");
    }
    Err(LoadError::Encoding {
        path: path.to_path_buf(),
        tried: encodings.join(", "),
    })
}

/// Loads every data row of a delimited file as a document.
///
/// When no delimiter produces a usable table the failure is logged and an
/// empty vector is returned.
pub fn load_rows(
    file_path: &Path,
    filename: &str,
    config: &LoaderConfig,
) -> Result<Vec<Document>, LoadError> {
    let bytes = std::fs::read(file_path).map_err(|source| LoadError::Io {
        path: file_path.to_path_buf(),
        source,
    })?;
    let (text, encoding) = decode(&bytes, file_path, &config.encodings)?;

    let mut parsed = None;
    for &delimiter in &config.delimiters {
        match parse_with(&text, delimiter) {
            Ok(table) => {
                tracing::info!(file = filename, delimiter = %delimiter, "parsed table");
                parsed = Some((table, delimiter));
                break;
            }
            Err(err) => {
                tracing::debug!(file = filename, delimiter = %delimiter, error = %err, "delimiter rejected");
            }
        }
    }

    let Some((table, delimiter)) = parsed else {
        tracing::error!(
            file = filename,
            tried = ?config.delimiters,
            "no delimiter produced a usable table, skipping file"
        );
        return Ok(Vec::new());
    };

    let columns = ColumnIndex::new(&table.headers);
    let documents: Vec<Document> = table
        .rows
        .iter()
        .enumerate()
        .map(|(index, row)| {
            let record = ServiceRecord::from_row(&columns, row, &config.aliases);
            let metadata = DocumentMetadata::new(filename, index as u32)
                .with_extra("kind", "csv")
                .with_extra("delimiter", delimiter.to_string())
                .with_extra("encoding", encoding);
            Document {
                text: record.render(),
                metadata,
            }
        })
        .collect();

    tracing::info!(file = filename, rows = documents.len(), "loaded CSV rows");
    Ok(documents)
}
