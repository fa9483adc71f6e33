// SPDX-License-Identifier: MIT OR Apache-2.0

//! Query module - retrieval, answer synthesis and the HTTP query service

pub mod answer;
pub mod retriever;
pub mod server;

pub use answer::{AnswerSynthesizer, OllamaSynthesizer, PROMPT_TEMPLATE};
pub use retriever::{build_context, RetrievedChunk, Retriever, SharedProvider, DEFAULT_TOP_K};
pub use server::{router, serve, RagContext};
