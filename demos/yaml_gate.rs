//! Authorization gate driven by a YAML rule document.
//!
//! Run with: `cargo run --example yaml_gate`
//!
//! Test with:
//! ```sh
//! # Open rule (no credentials needed)
//! curl -i http://localhost:3000/svc/api/health
//!
//! # Force mode without a token (401)
//! curl -i http://localhost:3000/svc/api/me
//!
//! # Force mode with a token
//! curl -i -H 'Authorization: Bearer demo-token-12345' http://localhost:3000/svc/api/me
//!
//! # May mode, token optional
//! curl -i http://localhost:3000/svc/api/orders/7
//!
//! # Refused (403)
//! curl -i http://localhost:3000/svc/api/admin/stats
//! ```

use axum::{routing::get, Extension, Router};
use axum_authgate::{
    AuthConfig, AuthDecider, AuthGateLayer, AuthMode, JsonDeniedHandler, VerificationResult,
};
use futures_util::future::BoxFuture;
use http::request::Parts;
use std::collections::HashMap;
use std::net::SocketAddr;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const RULES: &str = r#"
context_path: /svc
default_mode: refuse
header_auth_key: Authorization
cookie_auth_key: auth_token
url_param_auth_key: access_token
auth_info_header: Bearer
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
      - api: admin/*
        mode: refuse
"#;

#[derive(Clone, Debug)]
struct User(String);

/// Looks tokens up in a fixed session map.
struct SessionDecider {
    sessions: HashMap<String, String>,
}

impl AuthDecider for SessionDecider {
    fn decide<'a>(
        &'a self,
        request: &'a mut Parts,
        result: &'a VerificationResult,
    ) -> BoxFuture<'a, bool> {
        Box::pin(async move {
            let user = self.sessions.get(&result.auth_token).cloned();
            if let Some(name) = &user {
                request.extensions.insert(User(name.clone()));
            }
            match result.mode {
                AuthMode::Force => user.is_some(),
                AuthMode::May => true,
                _ => false,
            }
        })
    }
}

async fn health() -> &'static str {
    "OK"
}

async fn me(
    Extension(user): Extension<User>,
    Extension(result): Extension<VerificationResult>,
) -> String {
    format!("Hello {} (trace {})", user.0, result.trace_id.unwrap_or_default())
}

async fn order(user: Option<Extension<User>>) -> String {
    match user {
        Some(Extension(user)) => format!("Order details for {}", user.0),
        None => "Public order summary".to_string(),
    }
}

async fn admin_stats() -> &'static str {
    "unreachable"
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "axum_authgate=debug,yaml_gate=debug".into()),
        )
        .init();

    let config = AuthConfig::from_yaml(RULES).expect("invalid rule document");

    let mut sessions = HashMap::new();
    sessions.insert("demo-token-12345".to_string(), "alice".to_string());

    let layer = AuthGateLayer::from_config(&config)
        .expect("invalid rule document")
        .with_decider(SessionDecider { sessions })
        .with_denied_handler(JsonDeniedHandler::new().with_details());

    tracing::info!("Rule table configured: {} url groups", layer.table().groups().len());

    let app = Router::new()
        .route("/svc/api/health", get(health))
        .route("/svc/api/me", get(me))
        .route("/svc/api/orders/{id}", get(order))
        .route("/svc/api/admin/stats", get(admin_stats))
        .layer(layer);

    let addr = SocketAddr::from(([127, 0, 0, 1], 3000));
    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();

    // IP allow-lists need the peer address
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .unwrap();
}
