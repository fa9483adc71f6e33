// SPDX-License-Identifier: MIT OR Apache-2.0

//! PDF loading: one document per page.

use std::path::Path;

use crate::errors::LoadError;
use crate::loader::{Document, DocumentMetadata};

/// Loads every page of a PDF as its own document.
///
/// A page whose text cannot be extracted becomes an empty document so that
/// page numbering stays aligned with the source file.
pub fn load_pages(file_path: &Path, filename: &str) -> Result<Vec<Document>, LoadError> {
    let pdf = lopdf::Document::load(file_path).map_err(|source| LoadError::Pdf {
        path: file_path.to_path_buf(),
        source,
    })?;

    let pages = pdf.get_pages();
    let total_pages = pages.len();
    let mut documents = Vec::with_capacity(total_pages);

    for (index, page_number) in pages.keys().enumerate() {
        let text = match pdf.extract_text(&[*page_number]) {
            Ok(text) => text,
            Err(err) => {
                tracing::warn!(
                    file = filename,
                    page = page_number,
                    error = %err,
                    "text extraction failed, keeping empty page"
                );
                String::new()
            }
        };

        let metadata = DocumentMetadata::new(filename, index as u32)
            .with_extra("kind", "pdf")
            .with_extra("total_pages", total_pages.to_string());
        documents.push(Document { text, metadata });
    }

    tracing::info!(file = filename, pages = total_pages, "loaded PDF pages");
    Ok(documents)
}
