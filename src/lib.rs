// SPDX-License-Identifier: MIT OR Apache-2.0

//! tramite - Retrieval-augmented question answering library
//!
//! Shared modules for the tramite CLI: document loading, chunking,
//! embeddings, the vector index, ingestion and the query service.

pub mod config;
pub mod embedding;
pub mod errors;
pub mod indexer;
pub mod loader;
pub mod output;
pub mod query;
