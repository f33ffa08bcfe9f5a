//! Error types for llm-relay.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Result type alias for llm-relay operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for llm-relay.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("Missing API token. Supply Authorization: Bearer <token>.")]
    NoCredential,

    /// Upstream could not be reached, or did not produce response headers in time.
    #[error("Upstream unavailable: {message}")]
    UpstreamUnavailable { message: String, timed_out: bool },

    /// Every upstream connection slot stayed busy for the whole connect timeout.
    #[error("Upstream connection pool exhausted: no free connection within {waited_secs:.1}s")]
    PoolExhausted { waited_secs: f64 },

    /// Upstream stopped sending body bytes for longer than the read timeout.
    #[error("Upstream stalled: no data received for {idle_secs:.1}s")]
    UpstreamStalled { idle_secs: f64 },

    #[error("Bad upstream response: {0}")]
    UpstreamProtocol(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Classify a transport error reported by the upstream client.
    pub fn from_upstream(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Error::UpstreamUnavailable {
                message: err.to_string(),
                timed_out: true,
            }
        } else if err.is_connect() || err.is_request() {
            Error::UpstreamUnavailable {
                message: err.to_string(),
                timed_out: false,
            }
        } else {
            Error::UpstreamProtocol(err.to_string())
        }
    }

    /// HTTP status reported to the caller for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::NoCredential => StatusCode::UNAUTHORIZED,
            Error::UpstreamUnavailable { timed_out: true, .. } => StatusCode::GATEWAY_TIMEOUT,
            Error::UpstreamUnavailable { timed_out: false, .. } => StatusCode::BAD_GATEWAY,
            Error::UpstreamStalled { .. } => StatusCode::GATEWAY_TIMEOUT,
            Error::PoolExhausted { .. } => StatusCode::GATEWAY_TIMEOUT,
            Error::UpstreamProtocol(_) => StatusCode::BAD_GATEWAY,
            Error::BadRequest(_) => StatusCode::BAD_REQUEST,
            Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Return OpenAI-compatible error format
        let body = serde_json::json!({
            "error": {
                "message": self.to_string(),
                "type": "llm_relay_error",
                "code": status.as_u16()
            }
        });

        (status, axum::Json(body)).into_response()
    }
}
