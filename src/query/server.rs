// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP query service.
//!
//! `POST /query` takes `{"query_text": "..."}` and answers `{"response": "..."}`
//! built from the top-k retrieved chunks. `GET /healthz` reports readiness.
//! Browser clients on the configured origins may call both through CORS.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::{HeaderValue, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};

use crate::config::DEFAULT_CORS_ORIGINS;
use crate::errors::QueryError;
use crate::query::answer::AnswerSynthesizer;
use crate::query::retriever::{build_context, Retriever};

/// Everything a request needs, built once at startup.
#[derive(Clone)]
pub struct RagContext {
    retriever: Option<Retriever>,
    synthesizer: Arc<dyn AnswerSynthesizer>,
    top_k: usize,
    not_ready: Option<String>,
    cors_origins: Vec<String>,
}

impl RagContext {
    pub fn new(retriever: Retriever, synthesizer: Arc<dyn AnswerSynthesizer>, top_k: usize) -> Self {
        Self {
            retriever: Some(retriever),
            synthesizer,
            top_k: top_k.max(1),
            not_ready: None,
            cors_origins: default_cors_origins(),
        }
    }

    /// A context that answers every query with 503 until restarted.
    pub fn not_ready(
        reason: impl Into<String>,
        synthesizer: Arc<dyn AnswerSynthesizer>,
        top_k: usize,
    ) -> Self {
        Self {
            retriever: None,
            synthesizer,
            top_k: top_k.max(1),
            not_ready: Some(reason.into()),
            cors_origins: default_cors_origins(),
        }
    }

    /// Replaces the origins allowed to call the service from a browser.
    pub fn with_cors_origins(mut self, origins: Vec<String>) -> Self {
        self.cors_origins = origins;
        self
    }

    pub fn is_ready(&self) -> bool {
        self.retriever.is_some()
    }
}

#[derive(Debug, Deserialize)]
struct QueryRequest {
    #[serde(default)]
    query_text: String,
}

#[derive(Debug, Serialize)]
struct QueryResponse {
    response: String,
    /// Ids of the chunks the answer was built from
    sources: Vec<String>,
}

#[derive(Debug, Serialize)]
struct HealthBody {
    status: &'static str,
    records: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
    retryable: bool,
}

type ApiError = (StatusCode, Json<ErrorBody>);

/// Builds the router with `ctx` as shared state.
pub fn router(ctx: RagContext) -> Router {
    let cors = cors_layer(&ctx.cors_origins);
    Router::new()
        .route("/healthz", get(healthz))
        .route("/query", post(query_handler))
        .layer(cors)
        .with_state(ctx)
}

fn default_cors_origins() -> Vec<String> {
    DEFAULT_CORS_ORIGINS.iter().map(|o| o.to_string()).collect()
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    // Credentials rule out wildcards, so methods and headers mirror the preflight.
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true)
}

/// Binds `bind` and serves until Ctrl-C.
pub async fn serve(ctx: RagContext, bind: &str) -> Result<()> {
    let addr: SocketAddr = bind
        .parse()
        .with_context(|| format!("invalid bind address {}", bind))?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    serve_listener(listener, ctx).await
}

/// Serves on an already bound listener until Ctrl-C.
pub async fn serve_listener(listener: TcpListener, ctx: RagContext) -> Result<()> {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(ready = ctx.is_ready(), "listening on http://{addr}");
    }
    axum::serve(listener, router(ctx))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("server shutdown")?;
    Ok(())
}

async fn healthz(State(ctx): State<RagContext>) -> (StatusCode, Json<HealthBody>) {
    match &ctx.retriever {
        Some(retriever) => (
            StatusCode::OK,
            Json(HealthBody {
                status: "ok",
                records: retriever.snapshot().len(),
                model: Some(retriever.snapshot().model_id().to_string()),
                detail: None,
            }),
        ),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthBody {
                status: "not_ready",
                records: 0,
                model: None,
                detail: ctx.not_ready.clone(),
            }),
        ),
    }
}

async fn query_handler(
    State(ctx): State<RagContext>,
    payload: Result<Json<QueryRequest>, JsonRejection>,
) -> Result<Json<QueryResponse>, ApiError> {
    let Json(request) = payload.map_err(|rejection| {
        tracing::debug!(error = %rejection.body_text(), "rejected query body");
        invalid_body(rejection)
    })?;
    let question = request.query_text.trim().to_string();
    if question.is_empty() {
        return Err(bad_request("query_text must not be empty"));
    }
    let Some(retriever) = ctx.retriever.clone() else {
        return Err(not_ready(ctx.not_ready.clone()));
    };

    tracing::info!(query = %question, "received query");
    let top_k = ctx.top_k;
    let q = question.clone();
    let chunks = tokio::task::spawn_blocking(move || retriever.retrieve(&q, top_k))
        .await
        .map_err(|err| internal_error(format!("retrieval task failed: {err}")))?
        .map_err(query_error)?;

    let context = build_context(&chunks);
    let synthesizer = Arc::clone(&ctx.synthesizer);
    let q = question.clone();
    let answer = tokio::task::spawn_blocking(move || synthesizer.generate(&context, &q))
        .await
        .map_err(|err| internal_error(format!("generation task failed: {err}")))?
        .map_err(|err| {
            tracing::warn!(error = %format!("{err:#}"), "generation failed");
            upstream_error("answer generation failed", format!("{err:#}"))
        })?;

    Ok(Json(QueryResponse {
        response: answer,
        sources: chunks.into_iter().map(|chunk| chunk.id).collect(),
    }))
}

fn query_error(err: QueryError) -> ApiError {
    match err {
        QueryError::EmptyQuery => bad_request(err.to_string()),
        QueryError::Embedding(_) => {
            tracing::warn!(error = %err, "query embedding failed");
            upstream_error("query embedding failed", err.to_string())
        }
        QueryError::Index(_) => internal_error(err.to_string()),
    }
}

fn bad_request(message: impl Into<String>) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorBody {
            error: message.into(),
            detail: None,
            retryable: false,
        }),
    )
}

fn invalid_body(rejection: JsonRejection) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorBody {
            error: "invalid request body; expected JSON {\"query_text\": \"...\"}".to_string(),
            detail: Some(rejection.body_text()),
            retryable: false,
        }),
    )
}

fn not_ready(detail: Option<String>) -> ApiError {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(ErrorBody {
            error: "index not ready".to_string(),
            detail,
            retryable: false,
        }),
    )
}

fn upstream_error(message: &str, detail: String) -> ApiError {
    (
        StatusCode::BAD_GATEWAY,
        Json(ErrorBody {
            error: message.to_string(),
            detail: Some(detail),
            retryable: true,
        }),
    )
}

fn internal_error(message: impl Into<String>) -> ApiError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorBody {
            error: message.into(),
            detail: None,
            retryable: false,
        }),
    )
}
