// SPDX-License-Identifier: MIT OR Apache-2.0

//! Text chunker for embedding generation.
//!
//! Documents are split recursively on a priority list of separators
//! (paragraph, line, sentence, word, character) and the resulting pieces are
//! merged into overlapping chunks of bounded character length. Each chunk
//! records the character offset at which it starts in its parent document.

use anyhow::{bail, Result};
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};

use crate::loader::Document;

/// Default maximum chunk length in characters.
pub const DEFAULT_CHUNK_SIZE: usize = 800;

/// Default overlap between consecutive chunks in characters.
pub const DEFAULT_CHUNK_OVERLAP: usize = 100;

/// Separators tried from coarsest to finest. The empty separator splits
/// into single characters.
pub const SEPARATORS: [&str; 5] = ["\n\n", "\n", ". ", " ", ""];

/// Configuration for the text chunker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkConfig {
    /// Maximum characters per chunk.
    pub chunk_size: usize,
    /// Characters shared between consecutive chunks.
    pub chunk_overlap: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

impl ChunkConfig {
    /// Creates a new ChunkConfig with the specified parameters.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        if chunk_size == 0 {
            bail!("chunk_size must be greater than 0");
        }
        if chunk_overlap >= chunk_size {
            bail!(
                "chunk_overlap ({}) must be less than chunk_size ({})",
                chunk_overlap,
                chunk_size
            );
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
        })
    }
}

/// Metadata carried by every chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChunkMetadata {
    pub source: String,
    pub page_or_row: u32,
    pub extra: BTreeMap<String, String>,
    /// Character offset of the chunk's first character in the parent document
    pub start_offset: usize,
    /// Position of the chunk among its parent's chunks
    pub chunk_index: usize,
}

/// A bounded-length fragment of a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub text: String,
    pub metadata: ChunkMetadata,
}

impl Chunk {
    /// Stable record identity: source, page or row, chunk position.
    pub fn id(&self) -> String {
        format!(
            "{}:{}:{}",
            self.metadata.source, self.metadata.page_or_row, self.metadata.chunk_index
        )
    }
}

/// Splits documents into overlapping chunks.
#[derive(Debug, Clone, Default)]
pub struct RecursiveChunker {
    config: ChunkConfig,
}

impl RecursiveChunker {
    pub fn new(config: ChunkConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ChunkConfig {
        &self.config
    }

    /// Splits every document, keeping document order and metadata.
    pub fn split(&self, documents: &[Document]) -> Vec<Chunk> {
        let mut chunks = Vec::new();
        for doc in documents {
            for (chunk_index, (text, start_offset)) in
                self.split_text(&doc.text).into_iter().enumerate()
            {
                chunks.push(Chunk {
                    text,
                    metadata: ChunkMetadata {
                        source: doc.metadata.source.clone(),
                        page_or_row: doc.metadata.page_or_row,
                        extra: doc.metadata.extra.clone(),
                        start_offset,
                        chunk_index,
                    },
                });
            }
        }
        chunks
    }

    /// Splits one text into `(chunk, start_offset)` pairs.
    ///
    /// Offsets are recovered by searching for each chunk after the point
    /// where the previous chunk's overlap window begins.
    pub fn split_text(&self, text: &str) -> Vec<(String, usize)> {
        let pieces = self.split_recursive(text, &SEPARATORS);

        let mut out = Vec::with_capacity(pieces.len());
        let mut previous: Option<(usize, usize)> = None;
        for piece in pieces {
            let search_from = match previous {
                Some((start, len)) => (start + len).saturating_sub(self.config.chunk_overlap),
                None => 0,
            };
            let start = find_from(text, &piece, search_from)
                .or_else(|| find_from(text, &piece, 0))
                .unwrap_or(search_from);
            previous = Some((start, char_len(&piece)));
            out.push((piece, start));
        }
        out
    }

    fn split_recursive(&self, text: &str, separators: &[&str]) -> Vec<String> {
        let position = separators
            .iter()
            .position(|sep| sep.is_empty() || text.contains(sep))
            .unwrap_or(separators.len().saturating_sub(1));
        let separator = separators.get(position).copied().unwrap_or("");
        let finer = separators.get(position + 1..).unwrap_or(&[]);

        let mut chunks = Vec::new();
        let mut fitting: Vec<String> = Vec::new();
        for piece in split_keeping_separator(text, separator) {
            if char_len(&piece) <= self.config.chunk_size {
                fitting.push(piece);
                continue;
            }
            if !fitting.is_empty() {
                chunks.extend(self.merge(&fitting));
                fitting.clear();
            }
            if finer.is_empty() {
                push_trimmed(&mut chunks, &piece);
            } else {
                chunks.extend(self.split_recursive(&piece, finer));
            }
        }
        if !fitting.is_empty() {
            chunks.extend(self.merge(&fitting));
        }
        chunks
    }

    /// Greedily packs pieces into chunks, carrying at most `chunk_overlap`
    /// trailing characters into the next chunk.
    fn merge(&self, pieces: &[String]) -> Vec<String> {
        let size = self.config.chunk_size;
        let overlap = self.config.chunk_overlap;

        let mut chunks = Vec::new();
        let mut window: VecDeque<(&str, usize)> = VecDeque::new();
        let mut total = 0usize;

        for piece in pieces {
            let len = char_len(piece);
            if total + len > size && !window.is_empty() {
                push_trimmed(&mut chunks, &join(&window));
                while total > overlap || (total + len > size && total > 0) {
                    match window.pop_front() {
                        Some((_, front_len)) => total -= front_len,
                        None => break,
                    }
                }
            }
            window.push_back((piece.as_str(), len));
            total += len;
        }
        push_trimmed(&mut chunks, &join(&window));
        chunks
    }
}

/// Splits on `separator`, leaving it attached to the end of each piece.
fn split_keeping_separator(text: &str, separator: &str) -> Vec<String> {
    if separator.is_empty() {
        return text.chars().map(String::from).collect();
    }
    let mut pieces = Vec::new();
    let mut rest = text;
    while let Some(pos) = rest.find(separator) {
        let end = pos + separator.len();
        pieces.push(rest[..end].to_string());
        rest = &rest[end..];
    }
    if !rest.is_empty() {
        pieces.push(rest.to_string());
    }
    pieces
}

fn join(window: &VecDeque<(&str, usize)>) -> String {
    window.iter().map(|(piece, _)| *piece).collect()
}

fn push_trimmed(chunks: &mut Vec<String>, text: &str) {
    let trimmed = text.trim();
    if !trimmed.is_empty() {
        chunks.push(trimmed.to_string());
    }
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Character offset of `needle` in `haystack`, searching from a character offset.
fn find_from(haystack: &str, needle: &str, from_char: usize) -> Option<usize> {
    let from_byte = haystack
        .char_indices()
        .nth(from_char)
        .map(|(byte, _)| byte)
        .unwrap_or(haystack.len());
    let found = haystack[from_byte..].find(needle)?;
    Some(from_char + char_len(&haystack[from_byte..from_byte + found]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::DocumentMetadata;

    fn chunker(size: usize, overlap: usize) -> RecursiveChunker {
        RecursiveChunker::new(ChunkConfig::new(size, overlap).unwrap())
    }

    fn slice_chars(text: &str, start: usize, len: usize) -> String {
        text.chars().skip(start).take(len).collect()
    }

    #[test]
    fn test_default_config() {
        let config = ChunkConfig::default();
        assert_eq!(config.chunk_size, 800);
        assert_eq!(config.chunk_overlap, 100);
    }

    #[test]
    fn test_config_validation() {
        assert!(ChunkConfig::new(800, 100).is_ok());
        assert!(ChunkConfig::new(20, 20).is_err());
        assert!(ChunkConfig::new(20, 30).is_err());
        assert!(ChunkConfig::new(0, 0).is_err());
    }

    #[test]
    fn test_empty_and_blank_text() {
        let chunker = RecursiveChunker::default();
        assert!(chunker.split_text("").is_empty());
        assert!(chunker.split_text("  \n\n  ").is_empty());
    }

    #[test]
    fn test_short_text_is_single_chunk() {
        let chunks = RecursiveChunker::default().split_text("duplicado de cédula");
        assert_eq!(chunks, vec![("duplicado de cédula".to_string(), 0)]);
    }

    #[test]
    fn test_long_text_overlaps_consecutive_chunks() {
        let text = (0..100)
            .map(|i| format!("w{:03}", i))
            .collect::<Vec<_>>()
            .join(" ");
        let chunks = chunker(50, 10).split_text(&text);
        assert!(chunks.len() >= 2);

        for (chunk, _) in &chunks {
            assert!(char_len(chunk) <= 50);
        }
        for pair in chunks.windows(2) {
            let (ref prev, prev_start) = pair[0];
            let (_, next_start) = pair[1];
            let prev_end = prev_start + char_len(prev);
            assert!(next_start < prev_end, "consecutive chunks must overlap");
            assert!(prev_end - next_start <= 10);
        }
    }

    #[test]
    fn test_offsets_point_at_chunk_text() {
        let text = "Requisitos: cédula original.\n\nPresentarse en la agencia más cercana. \
                    Pagar el valor del trámite en ventanilla. Retirar el documento en \
                    el plazo indicado por el Registro Civil.";
        for (chunk, start) in chunker(40, 8).split_text(text) {
            assert_eq!(slice_chars(text, start, char_len(&chunk)), chunk);
        }
    }

    #[test]
    fn test_paragraph_boundaries_preferred() {
        let text = "Primer párrafo corto.\n\nSegundo párrafo corto.";
        let chunks = chunker(30, 5).split_text(text);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0], ("Primer párrafo corto.".to_string(), 0));
        assert_eq!(chunks[1], ("Segundo párrafo corto.".to_string(), 23));
    }

    #[test]
    fn test_hard_split_without_separators() {
        let text = "a".repeat(25);
        let chunks = chunker(10, 2).split_text(&text);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].1, 0);
        assert_eq!(chunks[1].1, 8);
        assert_eq!(chunks[2].1, 16);
        assert!(chunks.iter().all(|(c, _)| char_len(c) <= 10));
    }

    #[test]
    fn test_split_is_deterministic() {
        let text = "Linea uno.\nLinea dos. Frase tres.\n\nParrafo dos con varias palabras."
            .repeat(20);
        let chunker = chunker(60, 12);
        assert_eq!(chunker.split_text(&text), chunker.split_text(&text));
    }

    #[test]
    fn test_split_documents_keeps_metadata() {
        let docs = vec![
            Document {
                text: "x ".repeat(30),
                metadata: DocumentMetadata::new("a.pdf", 1).with_extra("kind", "pdf"),
            },
            Document {
                text: "corto".to_string(),
                metadata: DocumentMetadata::new("b.csv", 4),
            },
        ];
        let chunks = chunker(20, 4).split(&docs);
        assert!(chunks.len() >= 3);

        let first_b = chunks.iter().position(|c| c.metadata.source == "b.csv").unwrap();
        assert!(chunks[..first_b].iter().all(|c| c.metadata.page_or_row == 1));
        assert_eq!(chunks[0].metadata.chunk_index, 0);
        assert_eq!(chunks[1].metadata.chunk_index, 1);
        assert_eq!(chunks[0].metadata.extra.get("kind").unwrap(), "pdf");
        assert_eq!(chunks[first_b].id(), "b.csv:4:0");
    }
}
