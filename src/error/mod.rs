// Error types for the polygate gateway

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use std::time::Duration;
use thiserror::Error;

use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum GatewayError {
    /// Expired or revoked credential. Triggers refresh-then-disable.
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Upstream quota exhausted for one account. Triggers cooldown + rotation.
    #[error("Quota exceeded: {message}")]
    QuotaExceeded {
        message: String,
        retry_after: Option<Duration>,
    },

    /// Malformed or unsupported payload on either side of a conversion.
    #[error("Translation error: {0}")]
    Translation(String),

    /// Network failure or upstream 5xx. Retried with bounded backoff.
    #[error("Transport error: {0}")]
    Transport(String),

    /// No usable credential for the requested provider.
    #[error("No available account for provider {0}")]
    NoAvailableAccount(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Credential store error: {0}")]
    Store(#[from] StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// HTTP status the error maps to on the client-facing side.
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::Auth(_) => StatusCode::UNAUTHORIZED,
            GatewayError::QuotaExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::Translation(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::Transport(_) => StatusCode::BAD_GATEWAY,
            GatewayError::NoAvailableAccount(_) => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::InvalidRequest(_) | GatewayError::Json(_) => StatusCode::BAD_REQUEST,
            GatewayError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::Store(StoreError::NotFound { .. }) => StatusCode::NOT_FOUND,
            GatewayError::Store(StoreError::Conflict { .. }) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable error type label, reused by every client
    /// error envelope regardless of wire format.
    pub fn error_type(&self) -> &'static str {
        match self {
            GatewayError::Auth(_) => "authentication_error",
            GatewayError::QuotaExceeded { .. } => "rate_limit_error",
            GatewayError::Translation(_) => "translation_error",
            GatewayError::Transport(_) => "upstream_error",
            GatewayError::NoAvailableAccount(_) => "no_available_account",
            GatewayError::InvalidRequest(_) | GatewayError::Json(_) => "invalid_request_error",
            GatewayError::Config(_) => "configuration_error",
            GatewayError::Store(_) => "store_error",
            _ => "api_error",
        }
    }

    /// True when the dispatcher may retry the same account after a delay.
    pub fn is_transport_retryable(&self) -> bool {
        matches!(self, GatewayError::Transport(_) | GatewayError::Http(_))
    }
}

// Fallback envelope for paths where the client format is not known yet
// (request identification failures). Handlers that know their format go
// through `Converter::encode_error` instead.
impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = json!({
            "type": "error",
            "error": {
                "type": self.error_type(),
                "message": self.to_string(),
            }
        });

        (status, axum::Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quota_error_maps_to_429() {
        let err = GatewayError::QuotaExceeded {
            message: "daily limit".to_string(),
            retry_after: Some(Duration::from_secs(30)),
        };
        assert_eq!(err.status_code(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(err.error_type(), "rate_limit_error");
    }

    #[test]
    fn no_account_maps_to_503() {
        let err = GatewayError::NoAvailableAccount("gemini".to_string());
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(err.to_string().contains("gemini"));
    }

    #[test]
    fn store_conflict_maps_to_409() {
        let err = GatewayError::Store(StoreError::Conflict {
            provider: "claude".to_string(),
            account_id: "acct".to_string(),
        });
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
    }
}
