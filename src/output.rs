// SPDX-License-Identifier: MIT OR Apache-2.0

//! Output and color utilities for consistent terminal formatting
//!
//! Provides shared color functions respecting NO_COLOR environment variable,
//! and the text renderings of ingestion reports, hits and index status.

use colored::Colorize;
use std::fmt::Write;

use crate::embedding::SourceEntry;
use crate::indexer::IngestReport;
use crate::query::RetrievedChunk;

/// Check if colors should be used (respects NO_COLOR env var)
pub fn use_colors() -> bool {
    std::env::var("NO_COLOR").is_err()
}

/// Colorize source file name (cyan)
pub fn colorize_source(text: &str, use_color: bool) -> String {
    if use_color {
        text.cyan().to_string()
    } else {
        text.to_string()
    }
}

/// Colorize similarity score (yellow)
pub fn colorize_score(score: f32, use_color: bool) -> String {
    let text = format!("{:.3}", score);
    if use_color {
        text.yellow().to_string()
    } else {
        text
    }
}

/// Colorize success marker (green)
pub fn colorize_ok(text: &str, use_color: bool) -> String {
    if use_color {
        text.green().to_string()
    } else {
        text.to_string()
    }
}

/// Colorize warning text (yellow)
pub fn colorize_warn(text: &str, use_color: bool) -> String {
    if use_color {
        text.yellow().to_string()
    } else {
        text.to_string()
    }
}

/// Colorize chunk body (dimmed)
pub fn colorize_body(text: &str, use_color: bool) -> String {
    if use_color {
        text.dimmed().to_string()
    } else {
        text.to_string()
    }
}

/// Multi-line summary of an ingestion run.
pub fn render_ingest_report(report: &IngestReport, use_color: bool) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{} Ingested {} of {} files ({} mode): {} chunks added, {} records in index [{:.2}s]",
        colorize_ok("✓", use_color),
        report.files_processed,
        report.files_seen,
        report.mode,
        report.chunks_added,
        report.total_records,
        report.elapsed.as_secs_f64()
    );
    if !report.already_indexed.is_empty() {
        let _ = writeln!(
            out,
            "  {} already indexed: {}",
            report.already_indexed.len(),
            report.already_indexed.join(", ")
        );
    }
    for skipped in &report.skipped {
        let _ = writeln!(
            out,
            "  {} {}: {}",
            colorize_warn("skipped", use_color),
            colorize_source(&skipped.name, use_color),
            skipped.reason
        );
    }
    out
}

/// One block per retrieved chunk, most similar first.
pub fn render_hits(hits: &[RetrievedChunk], use_color: bool) -> String {
    let mut out = String::new();
    for (rank, hit) in hits.iter().enumerate() {
        let _ = writeln!(
            out,
            "{}. {} #{} (score {})",
            rank + 1,
            colorize_source(&hit.source, use_color),
            hit.page_or_row,
            colorize_score(hit.score, use_color)
        );
        for line in hit.text.lines() {
            let _ = writeln!(out, "   {}", colorize_body(line, use_color));
        }
    }
    out
}

/// Record count, model identity and ingested sources.
pub fn render_status(
    records: u64,
    model_id: &str,
    dimension: Option<usize>,
    sources: &[SourceEntry],
    use_color: bool,
) -> String {
    let mut out = String::new();
    let dim = dimension
        .map(|d| d.to_string())
        .unwrap_or_else(|| "-".to_string());
    let _ = writeln!(out, "records:   {}", records);
    let _ = writeln!(out, "model:     {} (dim {})", model_id, dim);
    let _ = writeln!(out, "sources:   {}", sources.len());
    for source in sources {
        let _ = writeln!(
            out,
            "  {} {} chunks",
            colorize_source(&source.name, use_color),
            source.chunk_count
        );
    }
    out
}
