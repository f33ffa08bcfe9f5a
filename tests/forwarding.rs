//! Integration tests for buffered (non-streaming) forwarding.
//!
//! Verifies that:
//! - Credentials are normalized and replace the inbound Authorization header
//! - Requests without any credential are rejected before reaching upstream
//! - Bodies, query strings and non-auth headers pass through unchanged
//! - 5xx and connection failures are retried up to RETRY_TIMES, others are not
//! - Exhausted 5xx responses are passed through; unreachable upstreams map to 502/504
//!
//! Upstream is a `wiremock` server; the proxy router is driven with `oneshot`.

mod common;

use std::time::Duration;

use axum::body::Body;
use http::{Request, StatusCode};
use serde_json::json;
use tower::ServiceExt;
use wiremock::matchers::{any, body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{
    body_bytes, chat_request, closed_upstream, get_request, setup_app, test_config,
    with_static_key,
};

fn base_url(server: &MockServer) -> String {
    format!("{}/v1", server.uri())
}

async fn received_auth_headers(server: &MockServer) -> Vec<Vec<String>> {
    server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .map(|r| {
            r.headers
                .get_all("authorization")
                .iter()
                .map(|v| v.to_str().unwrap().to_string())
                .collect()
        })
        .collect()
}

// ============================================================================
// Credentials
// ============================================================================

#[tokio::test]
async fn test_models_normalizes_bearer_sk_token() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/models"))
        .and(header("authorization", "Bearer mytesttoken"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"object": "list", "data": ["model-a"]})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let (app, _) = setup_app(test_config(&base_url(&server)));
    let response = app
        .oneshot(get_request("/v1/models", Some("Bearer sk-mytesttoken")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = common::body_json(response).await;
    assert_eq!(json["data"], json!(["model-a"]));
}

#[tokio::test]
async fn test_missing_credential_never_reaches_upstream() {
    let server = MockServer::start().await;
    Mock::given(any())
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let (app, _) = setup_app(test_config(&base_url(&server)));
    let response = app.oneshot(get_request("/v1/models", None)).await.unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let json = common::body_json(response).await;
    assert!(json["error"]["message"]
        .as_str()
        .unwrap()
        .starts_with("Missing API token"));
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_static_key_fallback_used_verbatim() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/models"))
        .and(header("authorization", "Bearer sk-fallback123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"object": "list", "data": []})))
        .expect(1)
        .mount(&server)
        .await;

    let config = with_static_key(test_config(&base_url(&server)), "sk-fallback123");
    let (app, _) = setup_app(config);
    let response = app.oneshot(get_request("/v1/models", None)).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_plain_token_forwarded_as_bearer() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/models"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": []})))
        .mount(&server)
        .await;

    let (app, _) = setup_app(test_config(&base_url(&server)));
    app.clone()
        .oneshot(get_request("/v1/models", Some("ABC")))
        .await
        .unwrap();
    app.oneshot(get_request("/v1/models", Some("sk-ABC")))
        .await
        .unwrap();

    assert_eq!(
        received_auth_headers(&server).await,
        vec![vec!["Bearer ABC".to_string()], vec!["Bearer ABC".to_string()]]
    );
}

#[tokio::test]
async fn test_no_credential_bleed_between_requests() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "1"})))
        .mount(&server)
        .await;

    let config = with_static_key(test_config(&base_url(&server)), "static-key");
    let (app, _) = setup_app(config);
    let body = json!({"messages": [{"role": "user", "content": "Hello"}], "stream": false});

    let first = app
        .clone()
        .oneshot(chat_request(Some("Bearer first"), body.clone()))
        .await
        .unwrap();
    let second = app.oneshot(chat_request(None, body)).await.unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(second.status(), StatusCode::OK);

    assert_eq!(
        received_auth_headers(&server).await,
        vec![
            vec!["Bearer first".to_string()],
            vec!["Bearer static-key".to_string()]
        ]
    );
}

// ============================================================================
// Pass-through
// ============================================================================

#[tokio::test]
async fn test_embeddings_body_forwarded_unchanged() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .and(body_json(json!({"input": ["hello"]})))
        .and(header("content-type", "application/json"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"data": [{"embedding": [0.1, 0.2]}]})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let (app, _) = setup_app(test_config(&base_url(&server)));
    let request = Request::post("/v1/embeddings")
        .header("authorization", "Bearer token123")
        .header("content-type", "application/json")
        .body(Body::from(json!({"input": ["hello"]}).to_string()))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = common::body_json(response).await;
    assert_eq!(json["data"][0]["embedding"], json!([0.1, 0.2]));
}

#[tokio::test]
async fn test_chat_non_stream_passthrough() {
    let upstream_body = json!({"id": "1", "choices": [{"message": {"content": "Hi"}}]});
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_json(json!({
            "messages": [{"role": "user", "content": "Hello"}],
            "stream": false
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(upstream_body.clone()))
        .expect(1)
        .mount(&server)
        .await;

    let (app, _) = setup_app(test_config(&base_url(&server)));
    let response = app
        .oneshot(chat_request(
            Some("Bearer token123"),
            json!({"messages": [{"role": "user", "content": "Hello"}], "stream": false}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(common::body_json(response).await, upstream_body);
}

#[tokio::test]
async fn test_catch_all_forwards_method_and_query() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/search"))
        .and(query_param("q", "abc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"results": 1})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/v1/files/file-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"deleted": true})))
        .expect(1)
        .mount(&server)
        .await;

    let (app, _) = setup_app(test_config(&base_url(&server)));
    let response = app
        .clone()
        .oneshot(get_request("/v1/search?q=abc", Some("Bearer token123")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(common::body_json(response).await["results"], 1);

    let request = Request::delete("/v1/files/file-1")
        .header("authorization", "Bearer token123")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(common::body_json(response).await["deleted"], true);
}

#[tokio::test]
async fn test_upstream_client_error_passed_through_without_retry() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(400)
                .set_body_json(json!({"error": {"message": "bad request", "type": "invalid_request_error"}})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let (app, _) = setup_app(test_config(&base_url(&server)));
    let response = app
        .oneshot(chat_request(Some("Bearer t"), json!({"messages": []})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = common::body_json(response).await;
    assert_eq!(json["error"]["type"], "invalid_request_error");
}

#[tokio::test]
async fn test_request_id_header_is_unique() {
    let (app, _) = setup_app(test_config("http://127.0.0.1:9/v1"));

    let first = app.clone().oneshot(get_request("/healthz", None)).await.unwrap();
    let second = app.oneshot(get_request("/healthz", None)).await.unwrap();

    let a = first.headers().get("x-request-id").unwrap().clone();
    let b = second.headers().get("x-request-id").unwrap().clone();
    assert_ne!(a, b);
    assert_eq!(body_bytes(first).await.as_ref(), b"ok");
}

// ============================================================================
// Retry and failure mapping
// ============================================================================

#[tokio::test]
async fn test_server_error_then_success_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "recovered"})))
        .mount(&server)
        .await;

    let (app, _) = setup_app(test_config(&base_url(&server)));
    let response = app
        .oneshot(chat_request(Some("Bearer t"), json!({"messages": []})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(common::body_json(response).await["id"], "recovered");
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_exhausted_server_error_passed_through() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/models"))
        .respond_with(
            ResponseTemplate::new(503).set_body_json(json!({"error": {"message": "overloaded"}})),
        )
        .mount(&server)
        .await;

    let (app, _) = setup_app(test_config(&base_url(&server)));
    let response = app
        .oneshot(get_request("/v1/models", Some("Bearer t")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(
        common::body_json(response).await["error"]["message"],
        "overloaded"
    );
    // RETRY_TIMES = 2 -> 3 total attempts
    assert_eq!(server.received_requests().await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_non_json_models_response_is_protocol_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/models"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
        .mount(&server)
        .await;

    let (app, _) = setup_app(test_config(&base_url(&server)));
    let response = app
        .oneshot(get_request("/v1/models", Some("Bearer t")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    // Protocol errors are not retried
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_unreachable_upstream_returns_bad_gateway() {
    let (app, _) = setup_app(test_config(&closed_upstream().await));
    let response = app
        .oneshot(get_request("/v1/models", Some("Bearer t")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let json = common::body_json(response).await;
    assert_eq!(json["error"]["code"], 502);
}

#[tokio::test]
async fn test_slow_headers_time_out_with_gateway_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/models"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"data": []}))
                .set_delay(Duration::from_millis(800)),
        )
        .mount(&server)
        .await;

    let mut config = test_config(&base_url(&server));
    config.upstream.read_timeout = 0.2;
    config.upstream.retry_times = 1;
    let (app, _) = setup_app(config);

    let response = app
        .oneshot(get_request("/v1/models", Some("Bearer t")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    // Timeouts before any byte is relayed are retried
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}
