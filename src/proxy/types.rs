//! Inbound request representation.
//!
//! The proxy is schema-agnostic: bodies are forwarded as opaque bytes. The
//! only thing ever read from a body is the top-level `stream` flag of a chat
//! completion request.

use axum::http::{HeaderMap, Method};
use bytes::Bytes;

/// A request received on one of the public routes.
#[derive(Debug, Clone)]
pub struct InboundRequest {
    pub method: Method,
    /// Path relative to the upstream base URL (e.g., "/chat/completions").
    pub path: String,
    /// Raw query string, forwarded verbatim.
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// Relay the response chunk-by-chunk instead of buffering it.
    pub stream: bool,
    /// Reject a successful upstream body that is not valid JSON.
    pub expect_json: bool,
}

impl InboundRequest {
    /// A non-streaming request with no JSON expectation.
    pub fn new(method: Method, path: impl Into<String>, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            method,
            path: path.into(),
            query: None,
            headers,
            body,
            stream: false,
            expect_json: false,
        }
    }

    pub fn with_query(mut self, query: Option<&str>) -> Self {
        self.query = query.filter(|q| !q.is_empty()).map(str::to_string);
        self
    }

    pub fn streaming(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    pub fn expecting_json(mut self) -> Self {
        self.expect_json = true;
        self
    }
}

/// Whether a chat completion body asks for a streamed response.
///
/// Bodies that are not JSON objects, or whose `stream` is absent, null or not
/// a boolean, are treated as non-streaming.
pub fn chat_stream_requested(body: &[u8]) -> bool {
    serde_json::from_slice::<serde_json::Value>(body)
        .ok()
        .and_then(|value| value.get("stream").and_then(serde_json::Value::as_bool))
        .unwrap_or(false)
}
