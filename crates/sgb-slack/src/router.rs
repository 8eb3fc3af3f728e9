//! HTTP surface: Slack Events API endpoint plus health and debug routes.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use sgb_core::{
    orchestrator::{CompletionOrchestrator, Outcome},
    retry::{Delivery, RetryGuard, RETRY_NUM_HEADER, RETRY_REASON_HEADER},
};

use crate::events::{classify, Envelope, EventAction};

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<CompletionOrchestrator>,
    /// Used by the image debug route to fetch generated images.
    pub http: reqwest::Client,
}

impl AppState {
    pub fn new(orchestrator: Arc<CompletionOrchestrator>) -> Self {
        Self {
            orchestrator,
            http: reqwest::Client::new(),
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ping", get(ping))
        .route("/events", post(handle_events))
        .route("/gpt", get(debug_completion))
        .route("/gpt/image", get(debug_image))
        .with_state(state)
}

/// Serve until `shutdown` is cancelled.
pub async fn serve(addr: &str, state: AppState, shutdown: CancellationToken) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "server started");

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    tracing::info!("server stopped");
    Ok(())
}

async fn ping() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "text/plain")], "pong")
}

async fn handle_events(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let marker = headers.get(RETRY_NUM_HEADER).and_then(|v| v.to_str().ok());
    if let Delivery::Redelivery { attempt } = RetryGuard::classify(marker) {
        let reason = headers
            .get(RETRY_REASON_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        tracing::info!(attempt = %attempt, reason, "retry request acknowledged");
        return StatusCode::OK.into_response();
    }

    let envelope: Envelope = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(error = %e, "invalid event payload");
            return (StatusCode::BAD_REQUEST, "invalid event").into_response();
        }
    };

    let (event_id, event) = match envelope {
        Envelope::UrlVerification { challenge } => {
            return Json(json!({ "challenge": challenge })).into_response();
        }
        Envelope::EventCallback { event_id, event } => (event_id, event),
        Envelope::Other => {
            tracing::info!("unsupported envelope");
            return StatusCode::NO_CONTENT.into_response();
        }
    };

    let (thread, author) = match classify(&event, state.orchestrator.bot_user_id()) {
        EventAction::Process { thread, author } => (thread, author),
        EventAction::Ignore(reason) => {
            tracing::debug!(kind = %event.kind, reason, "event ignored");
            return StatusCode::NO_CONTENT.into_response();
        }
    };

    match state.orchestrator.process_messages(&thread, &author).await {
        Ok(outcome) => {
            tracing::debug!(
                event_id = event_id.as_deref().unwrap_or(""),
                blocked = outcome == Outcome::Blocked,
                "event processed"
            );
            StatusCode::OK.into_response()
        }
        Err(e) => {
            tracing::error!(
                event_id = event_id.as_deref().unwrap_or(""),
                stage = e.stage().map(|s| s.as_str()).unwrap_or(""),
                error = %e,
                "failed to process event"
            );
            (StatusCode::INTERNAL_SERVER_ERROR, "failed to process event").into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
struct PromptQuery {
    prompt: Option<String>,
}

impl PromptQuery {
    fn prompt(&self) -> Option<&str> {
        self.prompt.as_deref().filter(|p| !p.trim().is_empty())
    }
}

/// Ask the completion provider directly, bypassing quota. For manual checks only.
async fn debug_completion(State(state): State<AppState>, Query(q): Query<PromptQuery>) -> Response {
    let Some(prompt) = q.prompt() else {
        return (StatusCode::BAD_REQUEST, "missing prompt parameter").into_response();
    };

    let orch = &state.orchestrator;
    match orch.completion().complete(orch.character_settings(), prompt).await {
        Ok(c) => Json(json!({ "text": c.text, "total_tokens": c.total_tokens })).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "debug completion failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("failed to create completion: {e}"),
            )
                .into_response()
        }
    }
}

async fn debug_image(State(state): State<AppState>, Query(q): Query<PromptQuery>) -> Response {
    let Some(prompt) = q.prompt() else {
        return (StatusCode::BAD_REQUEST, "missing prompt parameter").into_response();
    };

    let url = match state.orchestrator.completion().create_image(prompt).await {
        Ok(url) => url,
        Err(e) => {
            tracing::error!(error = %e, "image generation failed");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("failed to create image: {e}"),
            )
                .into_response();
        }
    };

    match download(&state.http, &url).await {
        Ok(bytes) => ([(header::CONTENT_TYPE, "image/png")], bytes).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "image download failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "failed to send image data").into_response()
        }
    }
}

async fn download(http: &reqwest::Client, url: &str) -> anyhow::Result<Vec<u8>> {
    let resp = http.get(url).send().await?.error_for_status()?;
    Ok(resp.bytes().await?.to_vec())
}
