//! HTTP request handlers.
//!
//! Each public route maps the inbound request onto an [`InboundRequest`],
//! resolves the credential, and hands off to the forwarding engine.

use axum::{
    body::Bytes,
    extract::{Extension, State},
    http::{HeaderMap, Method, Uri},
    response::{IntoResponse, Response},
};

use super::credentials::resolve_from_headers;
use super::server::{AppState, RequestId};
use super::types::{chat_stream_requested, InboundRequest};
use crate::error::Error;

/// Path prefix of the public API; stripped before joining with the upstream base URL.
const API_PREFIX: &str = "/v1";

/// Upstream-relative path for an inbound `/v1/...` URI.
fn upstream_path(uri: &Uri) -> &str {
    let path = uri.path();
    path.strip_prefix(API_PREFIX).unwrap_or(path)
}

/// Resolve the credential and forward. Requests without any credential never
/// reach upstream.
async fn proxy(state: &AppState, request_id: RequestId, inbound: InboundRequest) -> Result<Response, Error> {
    let credential = resolve_from_headers(
        &inbound.headers,
        state.config.upstream.static_api_key.as_ref(),
    )
    .inspect_err(|_| {
        tracing::warn!(request_id = %request_id, path = %inbound.path, "Rejected request without credential");
    })?;

    state
        .forwarder
        .forward(inbound, &credential, &request_id.to_string())
        .await
}

/// Handle POST /v1/chat/completions
pub async fn chat_completions(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, Error> {
    let stream = chat_stream_requested(&body);
    let inbound = InboundRequest::new(Method::POST, upstream_path(&uri), headers, body)
        .with_query(uri.query())
        .streaming(stream);

    proxy(&state, request_id, inbound).await
}

/// Handle POST /v1/embeddings
pub async fn embeddings(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, Error> {
    let inbound = InboundRequest::new(Method::POST, upstream_path(&uri), headers, body)
        .with_query(uri.query())
        .expecting_json();

    proxy(&state, request_id, inbound).await
}

/// Handle GET /v1/models
pub async fn list_models(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    uri: Uri,
    headers: HeaderMap,
) -> Result<Response, Error> {
    let inbound = InboundRequest::new(Method::GET, upstream_path(&uri), headers, Bytes::new())
        .with_query(uri.query())
        .expecting_json();

    proxy(&state, request_id, inbound).await
}

/// Handle any other method/path under /v1 (non-streaming passthrough)
pub async fn passthrough(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, Error> {
    let inbound = InboundRequest::new(method, upstream_path(&uri), headers, body)
        .with_query(uri.query());

    proxy(&state, request_id, inbound).await
}

/// Handle GET /healthz
pub async fn healthz() -> impl IntoResponse {
    "ok"
}
