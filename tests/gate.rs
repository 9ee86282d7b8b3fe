use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::routing::{get, post};
use axum::{Extension, Router};
use axum_authgate::{
    decide_with, ApiRule, AuthConfig, AuthGateLayer, AuthMode, CredentialKeys, JsonDeniedHandler,
    RuleTable, TraceSettings, UrlGroup, VerificationResult,
};
use http::request::Parts;
use http::header::HeaderName;
use http::{HeaderMap, Method, Request, StatusCode};
use http_body_util::BodyExt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tower::ServiceExt;

const CONFIG: &str = r#"
context_path: /svc
default_mode: open
header_auth_key: Authorization
auth_info_header: Bearer
url_param_auth_key: access_token
trace:
  trace_id_key: X-Trace-Id
  trace_ts_key: X-Trace-Ts
  to_response_header: true
groups:
  - uri: api
    default_mode: force
    apis:
      - api: health
        method: GET
        mode: open
      - api: orders/*
        method: GET
        mode: may
        tag: orders
      - api: files/*
        mode: force
        tag: files
      - api: admin/*
        mode: refuse
  - uri: /internal
    default_mode: open
    ip_allow: 10.0.0.0/8
"#;

#[derive(Clone, Debug)]
struct UserId(String);

struct Harness {
    app: Router,
    decisions: Arc<AtomicUsize>,
    hits: Arc<AtomicUsize>,
}

fn harness() -> Harness {
    let decisions = Arc::new(AtomicUsize::new(0));
    let hits = Arc::new(AtomicUsize::new(0));

    let counter = decisions.clone();
    let decider = decide_with(move |parts: &mut Parts, result: &VerificationResult| {
        counter.fetch_add(1, Ordering::SeqCst);
        match result.mode {
            AuthMode::Force if result.has_token() => {
                parts.extensions.insert(UserId(result.auth_token.clone()));
                true
            }
            AuthMode::May => true,
            _ => false,
        }
    });

    let config = AuthConfig::from_yaml(CONFIG).unwrap();
    let layer = AuthGateLayer::from_config(&config).unwrap().with_decider(decider);

    let h = hits.clone();
    let app = Router::new()
        .route("/svc/api/health", get(|| async { "ok" }).post(|| async { "posted" }))
        .route(
            "/svc/api/me",
            get(
                move |Extension(result): Extension<VerificationResult>,
                      Extension(user): Extension<UserId>| {
                    let h = h.clone();
                    async move {
                        h.fetch_add(1, Ordering::SeqCst);
                        format!("{}:{}:{}", user.0, result.mode, result.trace_id.is_some())
                    }
                },
            ),
        )
        .route(
            "/svc/api/orders/{id}",
            get(|Extension(result): Extension<VerificationResult>| async move {
                format!("{}:{}", result.tag, result.auth_token)
            }),
        )
        .route(
            "/svc/api/files/{access_token}",
            get(|Extension(user): Extension<UserId>| async move { user.0 }),
        )
        .route("/svc/api/admin/stats", get(|| async { "stats" }))
        .route("/svc/api/upload", post(|| async { "uploaded" }))
        .route("/public/info", get(|| async { "public" }))
        .route("/internal/status", get(|| async { "internal" }))
        .layer(layer);

    Harness { app, decisions, hits }
}

fn request(method: Method, uri: &str, peer: &str) -> http::request::Builder {
    let addr: SocketAddr = format!("{}:40000", peer).parse().unwrap();
    Request::builder()
        .method(method)
        .uri(uri)
        .extension(ConnectInfo(addr))
}

async fn body_string(response: axum::response::Response) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn test_force_with_bearer_token() {
    let h = harness();
    let req = request(Method::GET, "/svc/api/me", "192.0.2.1")
        .header("authorization", "Bearer abc123xyz")
        .body(Body::empty())
        .unwrap();

    let response = h.app.oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "abc123xyz:force:true");
    assert_eq!(h.decisions.load(Ordering::SeqCst), 1);
    assert_eq!(h.hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_blocked_request_skips_handler() {
    let h = harness();
    let req = request(Method::GET, "/svc/api/me", "192.0.2.1")
        .body(Body::empty())
        .unwrap();

    let response = h.app.oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(response.headers().contains_key("x-trace-id"));
    assert_eq!(h.decisions.load(Ordering::SeqCst), 1);
    assert_eq!(h.hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_open_rule_skips_decider() {
    let h = harness();
    let req = request(Method::GET, "/svc/api/health", "192.0.2.1")
        .body(Body::empty())
        .unwrap();

    let response = h.app.oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "ok");
    assert_eq!(h.decisions.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_method_mismatch_falls_back_to_group_default() {
    let h = harness();
    let req = request(Method::POST, "/svc/api/health", "192.0.2.1")
        .body(Body::empty())
        .unwrap();

    let response = h.app.oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(h.decisions.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_no_rule_match_uses_group_default() {
    let h = harness();
    let req = request(Method::POST, "/svc/api/upload", "192.0.2.1")
        .header("authorization", "Bearer upload-token-1")
        .body(Body::empty())
        .unwrap();

    let response = h.app.oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "uploaded");
}

#[tokio::test]
async fn test_may_passes_tag_and_token() {
    let h = harness();
    let req = request(Method::GET, "/svc/api/orders/7", "192.0.2.1")
        .header("authorization", "Bearer:order-token-1")
        .body(Body::empty())
        .unwrap();

    let response = h.app.oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "orders:order-token-1");
}

#[tokio::test]
async fn test_refuse_rule_is_forbidden() {
    let h = harness();
    let req = request(Method::GET, "/svc/api/admin/stats", "192.0.2.1")
        .header("authorization", "Bearer abc123xyz")
        .body(Body::empty())
        .unwrap();

    let response = h.app.oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_token_from_path_param() {
    let h = harness();
    let req = request(Method::GET, "/svc/api/files/path-token-123", "192.0.2.1")
        .body(Body::empty())
        .unwrap();

    let response = h.app.oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "path-token-123");
}

#[tokio::test]
async fn test_token_from_query_param() {
    let h = harness();
    let req = request(Method::GET, "/svc/api/files/x?access_token=query-token-123", "192.0.2.1")
        .body(Body::empty())
        .unwrap();

    let response = h.app.oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "query-token-123");
}

#[tokio::test]
async fn test_no_group_uses_table_default() {
    let h = harness();
    let req = request(Method::GET, "/public/info", "192.0.2.1")
        .body(Body::empty())
        .unwrap();

    let response = h.app.oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(h.decisions.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_group_ip_allow_list() {
    let h = harness();

    let req = request(Method::GET, "/internal/status", "10.1.1.1")
        .body(Body::empty())
        .unwrap();
    let response = h.app.clone().oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let req = request(Method::GET, "/internal/status", "192.168.1.1")
        .body(Body::empty())
        .unwrap();
    let response = h.app.clone().oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    // Default X-Real-IP header overrides the peer address.
    let req = request(Method::GET, "/internal/status", "192.168.1.1")
        .header("x-real-ip", "10.9.9.9")
        .body(Body::empty())
        .unwrap();
    let response = h.app.oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_trace_headers_on_response() {
    let h = harness();

    let req = request(Method::GET, "/public/info", "192.0.2.1")
        .body(Body::empty())
        .unwrap();
    let response = h.app.clone().oneshot(req).await.unwrap();
    let trace_id = response.headers()["x-trace-id"].to_str().unwrap();
    assert!(trace_id.starts_with("be-"));
    assert!(response.headers().contains_key("x-trace-ts"));

    let req = request(Method::GET, "/public/info", "192.0.2.1")
        .header("x-trace-id", "upstream-trace")
        .body(Body::empty())
        .unwrap();
    let response = h.app.oneshot(req).await.unwrap();
    assert_eq!(response.headers()["x-trace-id"], "upstream-trace");
}

#[tokio::test]
async fn test_missing_decider_blocks() {
    let config = AuthConfig::from_yaml(CONFIG).unwrap();
    let app = Router::new()
        .route("/svc/api/health", get(|| async { "ok" }).post(|| async { "posted" }))
        .layer(AuthGateLayer::from_config(&config).unwrap());

    let req = request(Method::POST, "/svc/api/health", "192.0.2.1")
        .header("authorization", "Bearer abc123xyz")
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let req = request(Method::GET, "/svc/api/health", "192.0.2.1")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_open_mode_table() {
    let config = AuthConfig::from_yaml(
        r#"
open_mode: true
trace:
  trace_id_key: X-Trace-Id
groups:
  - uri: /svc
    default_mode: refuse
"#,
    )
    .unwrap();
    let app = Router::new()
        .route(
            "/svc/x",
            get(|Extension(result): Extension<VerificationResult>, headers: HeaderMap| async move {
                assert_eq!(result.mode, AuthMode::Open);
                headers.contains_key("x-trace-id").to_string()
            }),
        )
        .layer(AuthGateLayer::from_config(&config).unwrap());

    let req = request(Method::GET, "/svc/x", "192.0.2.1").body(Body::empty()).unwrap();
    let response = app.oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "true");
}

#[tokio::test]
async fn test_json_denied_handler() {
    let config = AuthConfig::from_yaml(CONFIG).unwrap();
    let app = Router::new()
        .route("/svc/api/admin/stats", get(|| async { "stats" }))
        .layer(
            AuthGateLayer::from_config(&config)
                .unwrap()
                .with_denied_handler(JsonDeniedHandler::new().with_details()),
        );

    let req = request(Method::GET, "/svc/api/admin/stats", "192.0.2.1")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let body: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(body["error"], "access_denied");
    assert_eq!(body["mode"], "refuse");
    assert_eq!(body["path"], "/svc/api/admin/stats");
    assert!(body["trace_id"].as_str().unwrap().starts_with("be-"));
}

#[tokio::test]
async fn test_nested_router_resolves_full_path() {
    let config = AuthConfig::from_yaml(CONFIG).unwrap();
    let inner = Router::new()
        .route("/api/admin/stats", get(|| async { "stats" }))
        .route("/api/health", get(|| async { "ok" }))
        .route("/api/me", get(|| async { "me" }))
        .layer(AuthGateLayer::from_config(&config).unwrap());
    let app = Router::new().nest("/svc", inner);

    let req = request(Method::GET, "/svc/api/admin/stats", "192.0.2.1")
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let req = request(Method::GET, "/svc/api/me", "192.0.2.1")
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let req = request(Method::GET, "/svc/api/health", "192.0.2.1")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_ipv4_mapped_peer_matches_ipv4_allow_list() {
    let h = harness();
    let addr: SocketAddr = "[::ffff:10.1.1.1]:40000".parse().unwrap();
    let req = Request::builder()
        .uri("/internal/status")
        .extension(ConnectInfo(addr))
        .body(Body::empty())
        .unwrap();

    let response = h.app.oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(h.decisions.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_programmatic_table_and_trace() {
    let table = RuleTable::builder()
        .context_path("/svc")
        .default_mode(AuthMode::Refuse)
        .credentials(CredentialKeys::new().header("X-Token"))
        .group(
            UrlGroup::new("api")
                .default_mode(AuthMode::Force)
                .rule(ApiRule::parse("ping").unwrap().method("GET").mode(AuthMode::Open)),
        )
        .build_shared()
        .unwrap();
    let trace = TraceSettings::disabled()
        .trace_id_header(HeaderName::from_static("x-request-id"))
        .timestamp_header(HeaderName::from_static("x-request-ts"))
        .uri_header(HeaderName::from_static("x-request-uri"))
        .to_response(false);

    let layer = AuthGateLayer::shared(table.clone())
        .with_trace(trace)
        .with_decider(decide_with(|_: &mut Parts, r: &VerificationResult| r.has_token()));
    assert!(std::ptr::eq(layer.table(), &*table));

    let echo = |headers: HeaderMap| async move {
        format!(
            "{}|{}|{}",
            headers["x-request-id"].to_str().unwrap(),
            headers["x-request-uri"].to_str().unwrap(),
            headers.contains_key("x-request-ts"),
        )
    };
    let app = Router::new()
        .route("/svc/api/ping", get(echo))
        .route("/svc/api/other", get(echo))
        .layer(layer);

    let req = request(Method::GET, "/svc/api/ping", "192.0.2.1")
        .header("x-request-id", "req-1")
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(!response.headers().contains_key("x-request-id"));
    assert_eq!(body_string(response).await, "req-1|svc/api/ping|true");

    let req = request(Method::GET, "/svc/api/other", "192.0.2.1")
        .header("x-token", "token-123456")
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_string(response).await.starts_with("be-"));

    let req = request(Method::GET, "/svc/api/other", "192.0.2.1")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}
