//! Request forwarding engine.
//!
//! Builds the upstream request from an [`InboundRequest`], runs the attempt
//! loop under the [`RetryPolicy`], and turns the upstream answer into the
//! caller's response, either buffered or relayed as a stream.
//!
//! Per request the engine moves through
//! `Idle -> Attempting -> (Streaming | Buffering) -> Completed | Failed`.
//! Entering `Streaming` is irreversible: from then on the only outcomes are
//! a clean end or a truncated stream, never another attempt.

use std::time::{Duration, Instant};

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderName, Method, StatusCode};
use axum::response::Response;
use bytes::Bytes;
use futures::StreamExt;

use super::credentials::ResolvedCredential;
use super::pool::{PoolSettings, UpstreamPool};
use super::retry::{is_retryable_status, retry_attempts, AttemptFailure, FailureKind, RetryPolicy};
use super::stream::spawn_relay;
use super::types::InboundRequest;
use crate::config::UpstreamConfig;
use crate::error::Error;

/// Headers that describe a single transport hop and are never forwarded.
const HOP_BY_HOP_HEADERS: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP_HEADERS.contains(&name.as_str())
}

/// Lifecycle phase of a forwarded request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Attempting,
    Streaming,
    Buffering,
    Completed,
    Failed,
}

impl Phase {
    pub fn can_transition_to(self, next: Phase) -> bool {
        use Phase::*;
        matches!(
            (self, next),
            (Idle, Attempting)
                | (Attempting, Attempting)
                | (Attempting, Streaming)
                | (Attempting, Buffering)
                | (Attempting, Failed)
                | (Buffering, Attempting)
                | (Buffering, Completed)
                | (Buffering, Failed)
                | (Streaming, Completed)
                | (Streaming, Failed)
        )
    }

    /// Whether any response byte may already have reached the caller.
    pub fn bytes_sent(self) -> bool {
        matches!(self, Phase::Streaming)
    }

    pub(crate) fn advance(self, next: Phase) -> Phase {
        debug_assert!(
            self.can_transition_to(next),
            "invalid phase transition {:?} -> {:?}",
            self,
            next
        );
        tracing::trace!(from = ?self, to = ?next, "Phase transition");
        next
    }
}

/// The request actually sent upstream on every attempt.
#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    pub method: Method,
    pub url: reqwest::Url,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Join the upstream base URL, a relative path and an optional query.
pub fn upstream_url(base_url: &str, path: &str, query: Option<&str>) -> Result<reqwest::Url, Error> {
    let mut url = format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    );
    if let Some(q) = query {
        url.push('?');
        url.push_str(q);
    }
    reqwest::Url::parse(&url)
        .map_err(|e| Error::BadRequest(format!("cannot build upstream URL '{}': {}", url, e)))
}

/// Copy inbound headers for upstream, replacing Authorization with `credential`.
pub fn upstream_headers(
    inbound: &HeaderMap,
    credential: &ResolvedCredential,
) -> Result<HeaderMap, Error> {
    let mut headers = HeaderMap::with_capacity(inbound.len() + 1);
    for (name, value) in inbound {
        if is_hop_by_hop(name)
            || name == header::HOST
            || name == header::CONTENT_LENGTH
            || name == header::AUTHORIZATION
        {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }
    headers.insert(header::AUTHORIZATION, credential.header_value()?);
    Ok(headers)
}

/// Copy upstream response headers for the caller.
pub fn response_headers(upstream: &HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(upstream.len());
    for (name, value) in upstream {
        if is_hop_by_hop(name) || name == header::CONTENT_LENGTH {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }
    headers
}

fn build_response(status: StatusCode, headers: HeaderMap, body: Body) -> Response {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

/// Forwards requests to the configured upstream through a shared pool.
#[derive(Debug)]
pub struct Forwarder {
    pool: UpstreamPool,
    base_url: String,
    policy: RetryPolicy,
    read_timeout: Duration,
}

impl Forwarder {
    pub fn new(config: &UpstreamConfig) -> Result<Self, Error> {
        Ok(Self {
            pool: UpstreamPool::new(PoolSettings::from(config))?,
            base_url: config.base_url.clone(),
            policy: RetryPolicy::new(config.retry_times),
            read_timeout: config.read_timeout(),
        })
    }

    pub fn pool(&self) -> &UpstreamPool {
        &self.pool
    }

    pub fn build_upstream_request(
        &self,
        inbound: &InboundRequest,
        credential: &ResolvedCredential,
    ) -> Result<UpstreamRequest, Error> {
        Ok(UpstreamRequest {
            method: inbound.method.clone(),
            url: upstream_url(&self.base_url, &inbound.path, inbound.query.as_deref())?,
            headers: upstream_headers(&inbound.headers, credential)?,
            body: inbound.body.clone(),
        })
    }

    /// Forward one inbound request and produce the caller's response.
    pub async fn forward(
        &self,
        inbound: InboundRequest,
        credential: &ResolvedCredential,
        request_id: &str,
    ) -> Result<Response, Error> {
        let start = Instant::now();
        let upstream = self.build_upstream_request(&inbound, credential)?;
        let stream = inbound.stream;
        let expect_json = inbound.expect_json;

        tracing::info!(
            request_id = %request_id,
            method = %upstream.method,
            upstream = %upstream.url.path(),
            stream,
            credential = %credential.source(),
            "Forwarding request"
        );

        let upstream = &upstream;
        let result = retry_attempts(&self.policy, |attempt| async move {
            self.attempt(upstream, attempt, stream, expect_json, request_id)
                .await
        })
        .await;

        let latency_ms = start.elapsed().as_millis() as u64;
        match &result {
            Ok(response) => tracing::info!(
                request_id = %request_id,
                status = %response.status(),
                latency_ms,
                "Upstream responded"
            ),
            Err(e) => tracing::error!(
                request_id = %request_id,
                error = %e,
                latency_ms,
                "Forwarding failed"
            ),
        }
        result
    }

    /// One attempt: acquire a slot, send, then buffer or start relaying.
    async fn attempt(
        &self,
        request: &UpstreamRequest,
        attempt: u32,
        stream: bool,
        expect_json: bool,
        request_id: &str,
    ) -> Result<Response, AttemptFailure<Response>> {
        let phase = Phase::Idle.advance(Phase::Attempting);
        tracing::debug!(request_id = %request_id, attempt, "Starting upstream attempt");

        let connection = self.pool.acquire().await?;

        let send = connection
            .client()
            .request(request.method.clone(), request.url.clone())
            .headers(request.headers.clone())
            .body(request.body.clone())
            .send();

        let upstream = match tokio::time::timeout(self.read_timeout, send).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                let err = Error::from_upstream(e);
                tracing::warn!(request_id = %request_id, attempt, error = %err, "Upstream request failed");
                return Err(failure(phase, err));
            }
            Err(_elapsed) => {
                let err = Error::UpstreamUnavailable {
                    message: format!(
                        "no response headers within {:.1}s",
                        self.read_timeout.as_secs_f64()
                    ),
                    timed_out: true,
                };
                tracing::warn!(request_id = %request_id, attempt, error = %err, "Upstream request timed out");
                return Err(failure(phase, err));
            }
        };

        let status = upstream.status();
        let headers = response_headers(upstream.headers());

        if is_retryable_status(status) {
            // Buffered so it can be passed through if retries run out
            let phase = phase.advance(Phase::Buffering);
            let body = self.read_body(upstream).await.map_err(|e| failure(phase, e))?;
            tracing::warn!(request_id = %request_id, attempt, status = %status, "Upstream returned server error");
            return Err(AttemptFailure::server_error(build_response(
                status,
                headers,
                Body::from(body),
            )));
        }

        if stream {
            // The relay task owns the Streaming -> Completed | Failed transition
            let phase = phase.advance(Phase::Streaming);
            tracing::debug!(
                request_id = %request_id,
                attempt,
                phase = ?phase,
                status = %status,
                "Relaying upstream stream"
            );
            let (body, _relay) = spawn_relay(
                upstream.bytes_stream(),
                connection,
                self.read_timeout,
                request_id.to_string(),
            );
            return Ok(build_response(status, headers, body));
        }

        let phase = phase.advance(Phase::Buffering);
        let body = self.read_body(upstream).await.map_err(|e| failure(phase, e))?;
        drop(connection);

        if expect_json
            && status.is_success()
            && serde_json::from_slice::<serde::de::IgnoredAny>(&body).is_err()
        {
            tracing::error!(request_id = %request_id, status = %status, "Upstream returned non-JSON body");
            let err = Error::UpstreamProtocol("upstream returned a non-JSON body".to_string());
            return Err(failure(phase, err));
        }

        phase.advance(Phase::Completed);
        Ok(build_response(status, headers, Body::from(body)))
    }

    /// Read a whole upstream body, failing if any gap between chunks exceeds
    /// the read timeout.
    async fn read_body(&self, response: reqwest::Response) -> Result<Bytes, Error> {
        let mut chunks = std::pin::pin!(response.bytes_stream());
        let mut body = Vec::new();
        loop {
            match tokio::time::timeout(self.read_timeout, chunks.next()).await {
                Err(_elapsed) => {
                    return Err(Error::UpstreamStalled {
                        idle_secs: self.read_timeout.as_secs_f64(),
                    })
                }
                Ok(None) => return Ok(Bytes::from(body)),
                Ok(Some(Ok(chunk))) => body.extend_from_slice(&chunk),
                Ok(Some(Err(e))) => return Err(Error::from_upstream(e)),
            }
        }
    }
}

fn failure(phase: Phase, err: Error) -> AttemptFailure<Response> {
    AttemptFailure {
        kind: FailureKind::from(&err),
        bytes_sent: phase.bytes_sent(),
        outcome: Err(err),
    }
}
