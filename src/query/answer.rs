// SPDX-License-Identifier: MIT OR Apache-2.0

//! Answer synthesis from retrieved context.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};

use crate::config::GenerationConfig;

/// Prompt sent to the generation model; `{context}` and `{question}` are substituted.
pub const PROMPT_TEMPLATE: &str = "\
Responde a la pregunta basándote únicamente en el siguiente contexto:

{context}

---

Responde a la pregunta basándote en el contexto anterior: {question}
";

/// Trait implemented by answer generators.
pub trait AnswerSynthesizer: Send + Sync {
    fn generate(&self, context: &str, question: &str) -> Result<String>;
}

/// Fills the prompt template.
pub fn render_prompt(context: &str, question: &str) -> String {
    PROMPT_TEMPLATE
        .replace("{context}", context)
        .replace("{question}", question)
}

/// Synthesizer backed by an Ollama-compatible `/api/generate` endpoint.
pub struct OllamaSynthesizer {
    base_url: String,
    model: String,
    max_retries: usize,
    client: Client,
}

impl OllamaSynthesizer {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs()))
            .build()
            .context("failed to build generation HTTP client")?;
        Ok(Self {
            base_url: config.base_url().trim_end_matches('/').to_string(),
            model: config.model().to_string(),
            max_retries: config.max_retries(),
            client,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn call(&self, prompt: &str) -> Result<String> {
        let body = GenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
        };
        let resp = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&body)
            .send()
            .with_context(|| format!("failed to call generation endpoint at {}", self.base_url))?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp
                .text()
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            bail!("generation endpoint returned {}: {}", status, text);
        }
        let parsed: GenerateResponse = resp
            .json()
            .context("failed to parse generation response")?;
        Ok(parsed.response)
    }
}

impl AnswerSynthesizer for OllamaSynthesizer {
    fn generate(&self, context: &str, question: &str) -> Result<String> {
        let prompt = render_prompt(context, question);
        let mut attempt = 0;
        loop {
            match self.call(&prompt) {
                Ok(answer) => return Ok(answer.trim().to_string()),
                Err(err) if attempt < self.max_retries => {
                    attempt += 1;
                    tracing::warn!(attempt, error = %format!("{err:#}"), "generation failed, retrying");
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}
