// HTTP request handlers, one per inbound wire format

use super::routes::AppState;
use super::DispatchOutcome;
use crate::error::GatewayError;
use crate::provider::Provider;
use crate::store::AccountStatus;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use std::collections::HashMap;
use tracing::info;

/// Run one dispatch and shape both success and failure in the client's
/// native format.
async fn handle(
    state: AppState,
    format: &'static str,
    body: axum::body::Bytes,
    model_hint: Option<String>,
    stream_hint: Option<bool>,
) -> Response {
    let started = std::time::Instant::now();

    let outcome = state
        .dispatcher
        .dispatch(format, body.to_vec(), model_hint, stream_hint)
        .await;

    let status = match &outcome {
        Ok(_) => StatusCode::OK,
        Err(e) => e.status_code(),
    };
    crate::metrics::record_request(format, "-", status.as_u16(), started.elapsed().as_secs_f64());

    match outcome {
        Ok(DispatchOutcome::Buffered(body)) => Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body))
            .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response()),
        Ok(DispatchOutcome::Stream(stream)) => Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "text/event-stream; charset=utf-8")
            .header(header::CACHE_CONTROL, "no-cache")
            .header(header::CONNECTION, "keep-alive")
            .header("X-Accel-Buffering", "no")
            .header("request-id", format!("req_{}", uuid::Uuid::new_v4()))
            .body(Body::from_stream(stream))
            .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response()),
        Err(e) => {
            // FAILED: the client sees its own error envelope, never a raw
            // upstream body.
            let body = state.dispatcher.engine().error_body(
                format,
                status.as_u16(),
                e.error_type(),
                &crate::utils::logging::sanitize(&e.to_string()),
            );
            Response::builder()
                .status(status)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body))
                .unwrap_or_else(|_| status.into_response())
        }
    }
}

/// `POST /v1/messages` (Claude Messages API)
pub async fn claude_messages(State(state): State<AppState>, body: axum::body::Bytes) -> Response {
    handle(state, "claude", body, None, None).await
}

/// `POST /v1/chat/completions` (OpenAI Chat Completions API)
pub async fn openai_chat(State(state): State<AppState>, body: axum::body::Bytes) -> Response {
    handle(state, "openai", body, None, None).await
}

/// `POST /v1/responses` (OpenAI Responses API)
pub async fn openai_responses(State(state): State<AppState>, body: axum::body::Bytes) -> Response {
    handle(state, "openai-responses", body, None, None).await
}

/// `POST /v1beta/models/{model}:generateContent` and
/// `:streamGenerateContent` (Gemini API). The model and the streaming mode
/// live in the path, not the body.
pub async fn gemini_generate(
    State(state): State<AppState>,
    Path(model_action): Path<String>,
    body: axum::body::Bytes,
) -> Response {
    let Some((model, action)) = model_action.split_once(':') else {
        return GatewayError::InvalidRequest(format!(
            "expected model:action, got {}",
            model_action
        ))
        .into_response();
    };
    let stream = action.starts_with("streamGenerateContent");

    handle(state, "gemini", body, Some(model.to_string()), Some(stream)).await
}

/// `POST /v1internal:generateContent` and `:streamGenerateContent`
/// (Cloud Code envelope, spoken by the Gemini CLI).
pub async fn gemini_cli_generate(
    State(state): State<AppState>,
    Path(action): Path<String>,
    body: axum::body::Bytes,
) -> Response {
    let stream = action.contains("streamGenerateContent");
    handle(state, "gemini-cli", body, None, Some(stream)).await
}

// ---------------------------------------------------------------------------
// Health and metrics
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub providers: HashMap<String, ProviderHealth>,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Serialize)]
pub struct ProviderHealth {
    pub active: usize,
    pub cooling: usize,
    pub disabled: usize,
}

pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let mut providers = HashMap::new();
    let mut any_active = false;
    let mut any_account = false;

    for provider in Provider::ALL {
        let accounts = state.pool.snapshot(provider);
        let health = ProviderHealth {
            active: accounts.iter().filter(|a| a.status == AccountStatus::Active).count(),
            cooling: accounts.iter().filter(|a| a.status == AccountStatus::Cooling).count(),
            disabled: accounts.iter().filter(|a| a.status == AccountStatus::Disabled).count(),
        };
        crate::metrics::update_pool_gauge(provider.as_str(), "active", health.active);
        crate::metrics::update_pool_gauge(provider.as_str(), "cooling", health.cooling);
        crate::metrics::update_pool_gauge(provider.as_str(), "disabled", health.disabled);

        any_account |= !accounts.is_empty();
        any_active |= health.active > 0;
        providers.insert(provider.to_string(), health);
    }

    let status = if any_active {
        HealthStatus::Healthy
    } else if any_account {
        HealthStatus::Degraded
    } else {
        HealthStatus::Unhealthy
    };

    Json(HealthResponse {
        status,
        providers,
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

pub async fn metrics_handler() -> Response {
    let body = crate::metrics::gather_metrics();
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/plain; version=0.0.4")
        .body(Body::from(body))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

/// Catch-all event logging endpoint some CLIs spam; acknowledge quietly.
pub async fn event_logging_handler(body: String) -> impl IntoResponse {
    info!("Client event batch ({} bytes)", body.len());
    StatusCode::OK
}
