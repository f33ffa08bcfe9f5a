//! Shared helpers for integration tests: app construction, mock upstream
//! servers and body collection.

#![allow(dead_code)]

use axum::body::Body;
use futures::StreamExt;
use http::Request;

use llm_relay::config::{ApiKey, Config, UpstreamConfig};
use llm_relay::proxy::{create_router, AppState};

/// Config pointing at `base_url` with test-friendly timeouts.
pub fn test_config(base_url: &str) -> Config {
    let mut config = Config::default();
    config.server.listen = "127.0.0.1:0".to_string();
    config.upstream = UpstreamConfig {
        base_url: base_url.to_string(),
        static_api_key: None,
        connect_timeout: 2.0,
        read_timeout: 5.0,
        max_keepalive: 4,
        max_connections: 8,
        retry_times: 2,
    };
    config
}

pub fn with_static_key(mut config: Config, key: &str) -> Config {
    config.upstream.static_api_key = Some(ApiKey::from(key));
    config
}

/// Build the proxy router and keep a handle on its state.
pub fn setup_app(config: Config) -> (axum::Router, AppState) {
    let state = AppState::new(config).expect("build app state");
    (create_router(state.clone()), state)
}

/// Serve `app` on a random local port; returns the base URL ending in `/v1`.
pub async fn spawn_upstream(app: axum::Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock upstream");
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });
    format!("http://127.0.0.1:{}/v1", addr.port())
}

/// A base URL on which nothing is listening.
pub async fn closed_upstream() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind probe listener");
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    format!("http://127.0.0.1:{}/v1", port)
}

pub fn chat_request(auth: Option<&str>, body: serde_json::Value) -> Request<Body> {
    let mut builder = Request::post("/v1/chat/completions").header("content-type", "application/json");
    if let Some(auth) = auth {
        builder = builder.header("authorization", auth);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

pub fn get_request(uri: &str, auth: Option<&str>) -> Request<Body> {
    let mut builder = Request::get(uri);
    if let Some(auth) = auth {
        builder = builder.header("authorization", auth);
    }
    builder.body(Body::empty()).unwrap()
}

pub async fn body_bytes(response: axum::response::Response) -> bytes::Bytes {
    axum::body::to_bytes(response.into_body(), 16 * 1024 * 1024)
        .await
        .expect("read body")
}

pub async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = body_bytes(response).await;
    serde_json::from_slice(&bytes).unwrap_or_default()
}

/// Drain a streamed body; returns the received chunks and whether the stream
/// ended with an error instead of a clean close.
pub async fn drain_stream(response: axum::response::Response) -> (Vec<bytes::Bytes>, bool) {
    let mut data = response.into_body().into_data_stream();
    let mut chunks = Vec::new();
    while let Some(item) = data.next().await {
        match item {
            Ok(chunk) => chunks.push(chunk),
            Err(_) => return (chunks, true),
        }
    }
    (chunks, false)
}

pub fn concat(chunks: &[bytes::Bytes]) -> Vec<u8> {
    chunks.iter().flat_map(|c| c.iter().copied()).collect()
}
