//! # axum-authgate
//!
//! Route authorization gate middleware for [axum](https://docs.rs/axum) 0.8.
//!
//! Every request is resolved against a table of URL groups and api rules
//! into a mode:
//! - **open**: pass through without credentials
//! - **force**: a credential is required
//! - **may**: a credential is optional
//! - **refuse**: always blocked
//!
//! For `force` and `may` a credential token is extracted from a cookie,
//! header, query parameter or path parameter. A pluggable [`AuthDecider`]
//! then decides whether the request continues to the handlers.
//!
//! ## Quick Start
//!
//! ```no_run
//! use axum::{Router, routing::get};
//! use axum_authgate::{
//!     decide_with, ApiRule, AuthGateLayer, AuthMode, CredentialKeys, RuleTable, UrlGroup,
//! };
//! use std::net::SocketAddr;
//!
//! async fn health() -> &'static str {
//!     "ok"
//! }
//!
//! async fn orders() -> &'static str {
//!     "orders"
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let table = RuleTable::builder()
//!         .context_path("/svc")
//!         .default_mode(AuthMode::Refuse)
//!         .credentials(CredentialKeys::new().header("Authorization").strip_prefix("Bearer"))
//!         .group(UrlGroup::new("api")
//!             .default_mode(AuthMode::Force)
//!             .rule(ApiRule::parse("health").unwrap().method("GET").mode(AuthMode::Open)))
//!         .build()
//!         .unwrap();
//!
//!     let app = Router::new()
//!         .route("/svc/api/health", get(health))
//!         .route("/svc/api/orders", get(orders))
//!         .layer(AuthGateLayer::new(table).with_decider(decide_with(|_, result| {
//!             result.mode == AuthMode::May || result.has_token()
//!         })));
//!
//!     // Use into_make_service_with_connect_info so IP allow-lists see the peer address
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await.unwrap();
//!     axum::serve(
//!         listener,
//!         app.into_make_service_with_connect_info::<SocketAddr>()
//!     ).await.unwrap();
//! }
//! ```
//!
//! ## Resolution
//!
//! 1. The first group whose prefix matches the path wins.
//! 2. Inside the group the first rule matching both path and method wins.
//! 3. A failed IP allow-list check forces `refuse`; no rule or a method
//!    mismatch falls back to the group default mode.
//! 4. No group: the table default mode applies.
//!
//! ## Api Patterns
//!
//! - `health`: exact
//! - `users/*`, `*.json`, `*admin*`: prefix, suffix, contains
//! - `*` or `**`: anything
//! - `^users/\d+$`: regex (starts with `^` or ends with `$`)
//!
//! ## IP Allow-lists
//!
//! ```
//! use axum_authgate::is_ip_allowed;
//!
//! assert!(is_ip_allowed("10.1.2.3", "10.0.0.0/8,127.0.0.1"));
//! assert!(is_ip_allowed("192.168.50.4", "192.168.50.3-192.168.50.6"));
//! assert!(!is_ip_allowed("", "127.0.0.1"));
//! assert!(is_ip_allowed("anything", ""));
//! ```
//!
//! ## Configuration
//!
//! Rules are normally loaded from YAML (or TOML); see [`AuthConfig`].
//!
//! ```
//! use axum_authgate::{AuthConfig, AuthGateLayer};
//!
//! let config = AuthConfig::from_yaml(r#"
//! context_path: /svc
//! default_mode: refuse
//! header_auth_key: Authorization
//! auth_info_header: Bearer
//! trace:
//!   trace_id_key: X-Trace-Id
//! groups:
//!   - uri: api
//!     default_mode: force
//!     apis:
//!       - api: health
//!         mode: open
//! "#).unwrap();
//!
//! let layer = AuthGateLayer::from_config(&config).unwrap();
//! assert_eq!(layer.table().groups()[0].prefix(), "/svc/api");
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![forbid(unsafe_code)]

mod config;
mod error;
mod extractor;
mod middleware;
mod rule;
mod table;
mod trace;

// Re-export main types
pub use config::{ApiConfig, AuthConfig, ConfigError, CredentialConfig, GroupConfig, TraceConfig};
pub use error::{AccessDenied, AccessDeniedHandler, DefaultDeniedHandler, JsonDeniedHandler};
pub use extractor::{
    extract_token, request_path, strip_auth_prefix, RequestContext, DEFAULT_REAL_IP_HEADER,
    MIN_TOKEN_LEN,
};
pub use middleware::{decide_with, AuthDecider, AuthGate, AuthGateLayer, DecisionFn, GateConfig};
pub use rule::{
    is_ip_allowed, ApiPattern, ApiRule, AuthMode, CredentialKeys, IpAllowList, IpTerm, MethodFilter,
};
pub use table::{join_context_path, RuleTable, RuleTableBuilder, UrlGroup, VerificationResult};
pub use trace::{generate_trace_id, TraceSettings, TraceStamp};

/// Prelude module for convenient imports.
///
/// ```
/// use axum_authgate::prelude::*;
/// ```
pub mod prelude {
    pub use crate::config::{AuthConfig, ConfigError};
    pub use crate::error::{AccessDenied, AccessDeniedHandler};
    pub use crate::middleware::{decide_with, AuthDecider, AuthGateLayer};
    pub use crate::rule::{ApiRule, AuthMode, CredentialKeys};
    pub use crate::table::{RuleTable, UrlGroup, VerificationResult};
}
