// SPDX-License-Identifier: MIT OR Apache-2.0

//! Indexer module - drives ingestion of a data directory into the vector index

pub mod ingest;

pub use ingest::{IngestReport, Ingestor, SkipReason, SkippedFile};
