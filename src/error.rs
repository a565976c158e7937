use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(
        "inference backend at {url} is unreachable: {reason}. Make sure it is running (for Ollama: `ollama serve`)"
    )]
    BackendUnreachable { url: String, reason: String },
    #[error("inference backend did not answer within {0:?}")]
    Timeout(Duration),
    #[error("{body}")]
    BackendError { status: u16, body: String },
    #[error("invalid request: {0}")]
    MalformedRequest(String),
    #[error("stream relay failed: {0}")]
    StreamFault(String),
    #[error("unexpected reply from inference backend: {0}")]
    InvalidBackendReply(String),
    #[error("not supported by this backend: {0}")]
    Unsupported(String),
}

impl GatewayError {
    /// Short machine-readable name of the failure class, used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::BackendUnreachable { .. } => "backend_unreachable",
            GatewayError::Timeout(_) => "timeout",
            GatewayError::BackendError { .. } => "backend_error",
            GatewayError::MalformedRequest(_) => "malformed_request",
            GatewayError::StreamFault(_) => "stream_fault",
            GatewayError::InvalidBackendReply(_) => "invalid_backend_reply",
            GatewayError::Unsupported(_) => "unsupported",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::BackendUnreachable { .. } | GatewayError::Timeout(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            GatewayError::BackendError { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            GatewayError::MalformedRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::StreamFault(_) | GatewayError::InvalidBackendReply(_) => {
                StatusCode::BAD_GATEWAY
            }
            GatewayError::Unsupported(_) => StatusCode::NOT_IMPLEMENTED,
        }
    }

    /// Classify a transport failure from the outbound client.
    pub fn from_transport(url: &str, timeout: Duration, err: reqwest::Error) -> Self {
        if err.is_connect() {
            GatewayError::BackendUnreachable {
                url: url.to_string(),
                reason: format!("connection failed ({})", root_cause(&err)),
            }
        } else if err.is_request() {
            GatewayError::BackendUnreachable {
                url: url.to_string(),
                reason: format!("connection closed before a reply ({})", root_cause(&err)),
            }
        } else if err.is_timeout() {
            GatewayError::Timeout(timeout)
        } else if err.is_decode() || err.is_body() {
            GatewayError::InvalidBackendReply(err.to_string())
        } else {
            GatewayError::BackendUnreachable {
                url: url.to_string(),
                reason: root_cause(&err),
            }
        }
    }
}

fn root_cause(err: &(dyn std::error::Error + 'static)) -> String {
    let mut current = err;
    while let Some(source) = current.source() {
        current = source;
    }
    current.to_string()
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!(kind = self.kind(), %status, error = %self, "request failed");
        }

        let body = serde_json::json!({
            "error": self.to_string(),
        });

        (status, axum::Json(body)).into_response()
    }
}
