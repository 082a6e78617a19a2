//! Integration tests for the proxy HTTP API.
//!
//! Each test boots a stub upstream and the proxy on ephemeral ports and
//! drives the proxy with reqwest.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use reqwest::Client;
use serde_json::{Value, json};
use tokio::net::TcpListener;

use api_key_proxy::rate_limit::RateLimiter;
use api_key_proxy::state::AppState;
use api_key_proxy::upstream::UpstreamClient;

const API_KEY: &str = "sk-test-0123456789";

#[derive(Clone, Copy)]
enum Mode {
    Ok,
    Slow,
    Fail,
}

#[derive(Clone)]
struct Stub {
    mode: Mode,
    seen: Arc<Mutex<Vec<(Option<String>, Value)>>>,
}

async fn stub_generate(
    State(stub): State<Stub>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    stub.seen.lock().unwrap().push((auth, body.clone()));

    match stub.mode {
        Mode::Ok => Json(json!({
            "model": body["model"],
            "response": format!("echo: {}", body["prompt"].as_str().unwrap_or_default()),
        }))
        .into_response(),
        Mode::Slow => {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Json(json!({"model": "m", "response": "late"})).into_response()
        }
        Mode::Fail => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal trace: key=sk-upstream-leak",
        )
            .into_response(),
    }
}

async fn spawn_stub(mode: Mode) -> (String, Stub) {
    let stub = Stub {
        mode,
        seen: Arc::new(Mutex::new(Vec::new())),
    };
    let app = Router::new()
        .route("/api/generate", post(stub_generate))
        .with_state(stub.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{addr}"), stub)
}

struct ProxyOptions {
    api_key: Option<&'static str>,
    rate_limit: u32,
    timeout: Duration,
    cors_origins: Vec<String>,
}

impl Default for ProxyOptions {
    fn default() -> Self {
        Self {
            api_key: Some(API_KEY),
            rate_limit: 5,
            timeout: Duration::from_secs(2),
            cors_origins: Vec::new(),
        }
    }
}

/// Boots the proxy in front of `upstream` and returns its base URL.
async fn spawn_proxy(upstream: &str, opts: ProxyOptions) -> String {
    let state = Arc::new(AppState {
        upstream: UpstreamClient::new(
            Client::new(),
            upstream,
            opts.api_key.map(str::to_string),
            opts.timeout,
        ),
        rate_limiter: Arc::new(RateLimiter::new(opts.rate_limit, Duration::from_secs(60))),
        max_prompt_chars: 200,
        default_model: "test-model".to_string(),
        trust_proxy_headers: false,
        cors_origins: opts.cors_origins,
    });
    let app = api_key_proxy::router(state);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    format!("http://{addr}")
}

fn header<'a>(resp: &'a reqwest::Response, name: &str) -> &'a str {
    resp.headers()
        .get(name)
        .unwrap_or_else(|| panic!("missing {name}"))
        .to_str()
        .unwrap()
}

// ---------------------------------------------------------------------------
// Forwarding
// ---------------------------------------------------------------------------

#[tokio::test]
async fn forwards_with_server_held_key() {
    let (upstream, stub) = spawn_stub(Mode::Ok).await;
    let base = spawn_proxy(&upstream, ProxyOptions::default()).await;
    let client = Client::new();

    let resp = client
        .post(format!("{base}/api/generate"))
        .json(&json!({"prompt": "  hello  "}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(header(&resp, "x-ratelimit-limit"), "5");
    assert_eq!(header(&resp, "x-ratelimit-remaining"), "4");

    let text = resp.text().await.unwrap();
    assert!(!text.contains(API_KEY));
    let body: Value = serde_json::from_str(&text).unwrap();
    assert_eq!(body["model"], "test-model");
    assert_eq!(body["response"], "echo: hello");

    let seen = stub.seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].0.as_deref(), Some(format!("Bearer {API_KEY}").as_str()));
    assert_eq!(seen[0].1["prompt"], "hello");
    assert_eq!(seen[0].1["stream"], false);
}

#[tokio::test]
async fn missing_key_is_service_unavailable() {
    let (upstream, stub) = spawn_stub(Mode::Ok).await;
    let base = spawn_proxy(
        &upstream,
        ProxyOptions {
            api_key: None,
            ..Default::default()
        },
    )
    .await;

    let resp = Client::new()
        .post(format!("{base}/api/generate"))
        .json(&json!({"prompt": "hi"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 503);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "not_configured");
    assert!(stub.seen.lock().unwrap().is_empty());
}

// ---------------------------------------------------------------------------
// Rate limiting
// ---------------------------------------------------------------------------

#[tokio::test]
async fn rejects_after_quota_with_retry_hint() {
    let (upstream, stub) = spawn_stub(Mode::Ok).await;
    let base = spawn_proxy(
        &upstream,
        ProxyOptions {
            rate_limit: 3,
            ..Default::default()
        },
    )
    .await;
    let client = Client::new();

    for expected_remaining in ["2", "1", "0"] {
        let resp = client
            .post(format!("{base}/api/generate"))
            .json(&json!({"prompt": "hi"}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        assert_eq!(header(&resp, "x-ratelimit-remaining"), expected_remaining);
    }

    let resp = client
        .post(format!("{base}/api/generate"))
        .json(&json!({"prompt": "hi"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 429);
    assert_eq!(header(&resp, "x-ratelimit-remaining"), "0");
    let retry_after: u64 = header(&resp, "retry-after").parse().unwrap();
    assert!((1..=60).contains(&retry_after));

    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "too_many_requests");

    // the denied call never reached upstream
    assert_eq!(stub.seen.lock().unwrap().len(), 3);
}

#[tokio::test]
async fn health_and_metrics_are_not_rate_limited() {
    let (upstream, _stub) = spawn_stub(Mode::Ok).await;
    let base = spawn_proxy(
        &upstream,
        ProxyOptions {
            rate_limit: 1,
            ..Default::default()
        },
    )
    .await;
    let client = Client::new();

    for _ in 0..5 {
        let resp = client.get(format!("{base}/health")).send().await.unwrap();
        assert_eq!(resp.status(), 200);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["upstream_configured"], true);
    }

    let resp = client.get(format!("{base}/metrics")).send().await.unwrap();
    assert_eq!(resp.status(), 200);
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn invalid_input_is_rejected_before_upstream() {
    let (upstream, stub) = spawn_stub(Mode::Ok).await;
    let base = spawn_proxy(&upstream, ProxyOptions::default()).await;
    let client = Client::new();

    let resp = client
        .post(format!("{base}/api/generate"))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "bad_request");

    let resp = client
        .post(format!("{base}/api/generate"))
        .json(&json!({"prompt": "   "}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let resp = client
        .post(format!("{base}/api/generate"))
        .json(&json!({"prompt": "x".repeat(201)}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    assert!(stub.seen.lock().unwrap().is_empty());
}

// ---------------------------------------------------------------------------
// Upstream failures
// ---------------------------------------------------------------------------

#[tokio::test]
async fn slow_upstream_times_out() {
    let (upstream, _stub) = spawn_stub(Mode::Slow).await;
    let base = spawn_proxy(
        &upstream,
        ProxyOptions {
            timeout: Duration::from_millis(200),
            ..Default::default()
        },
    )
    .await;

    let resp = Client::new()
        .post(format!("{base}/api/generate"))
        .json(&json!({"prompt": "hi"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 504);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "upstream_timeout");
}

#[tokio::test]
async fn upstream_error_body_is_not_leaked() {
    let (upstream, _stub) = spawn_stub(Mode::Fail).await;
    let base = spawn_proxy(&upstream, ProxyOptions::default()).await;

    let resp = Client::new()
        .post(format!("{base}/api/generate"))
        .json(&json!({"prompt": "hi"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 502);
    let text = resp.text().await.unwrap();
    assert!(!text.contains("sk-upstream-leak"));
    let body: Value = serde_json::from_str(&text).unwrap();
    assert_eq!(body["error"], "upstream_error");
}

#[tokio::test]
async fn unreachable_upstream_is_bad_gateway() {
    // bind then drop to get a port nobody listens on
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);

    let base = spawn_proxy(&dead, ProxyOptions::default()).await;
    let resp = Client::new()
        .post(format!("{base}/api/generate"))
        .json(&json!({"prompt": "hi"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 502);
}

// ---------------------------------------------------------------------------
// CORS
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cors_allows_configured_origin_only() {
    let (upstream, _stub) = spawn_stub(Mode::Ok).await;
    let base = spawn_proxy(
        &upstream,
        ProxyOptions {
            cors_origins: vec!["https://app.example".to_string()],
            ..Default::default()
        },
    )
    .await;
    let client = Client::new();

    let resp = client
        .get(format!("{base}/health"))
        .header("origin", "https://app.example")
        .send()
        .await
        .unwrap();
    assert_eq!(header(&resp, "access-control-allow-origin"), "https://app.example");

    let resp = client
        .get(format!("{base}/health"))
        .header("origin", "https://evil.example")
        .send()
        .await
        .unwrap();
    assert!(resp.headers().get("access-control-allow-origin").is_none());
}

#[tokio::test]
async fn no_cors_headers_by_default() {
    let (upstream, _stub) = spawn_stub(Mode::Ok).await;
    let base = spawn_proxy(&upstream, ProxyOptions::default()).await;

    let resp = Client::new()
        .get(format!("{base}/health"))
        .header("origin", "https://app.example")
        .send()
        .await
        .unwrap();
    assert!(resp.headers().get("access-control-allow-origin").is_none());
}
