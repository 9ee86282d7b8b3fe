//! Authorization gate middleware for axum.
//!
//! This module provides the [`AuthGateLayer`] and [`AuthGate`] types that
//! integrate with axum's middleware system, and the [`AuthDecider`] trait the
//! gate consults for every non-open request.

use crate::config::{AuthConfig, ConfigError};
use crate::error::{AccessDenied, AccessDeniedHandler, DefaultDeniedHandler};
use crate::extractor::RequestContext;
use crate::rule::AuthMode;
use crate::table::{RuleTable, VerificationResult};
use crate::trace::TraceSettings;

use axum::extract::{FromRequestParts, RawPathParams};
use axum::response::Response;
use futures_util::future::BoxFuture;
use http::request::Parts;
use http::Request;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};

/// Decides whether a resolved request may continue.
///
/// The decider sees the resolved mode, tag and token and gets mutable access
/// to the request parts, so it can attach a verified identity to the request
/// extensions for downstream handlers.
///
/// # Example
/// ```
/// use axum_authgate::{AuthDecider, AuthMode, VerificationResult};
/// use futures_util::future::BoxFuture;
/// use http::request::Parts;
///
/// #[derive(Clone)]
/// struct UserId(String);
///
/// struct TokenDecider;
///
/// impl AuthDecider for TokenDecider {
///     fn decide<'a>(
///         &'a self,
///         request: &'a mut Parts,
///         result: &'a VerificationResult,
///     ) -> BoxFuture<'a, bool> {
///         Box::pin(async move {
///             match result.mode {
///                 AuthMode::Force if result.has_token() => {
///                     request.extensions.insert(UserId(result.auth_token.clone()));
///                     true
///                 }
///                 AuthMode::May => true,
///                 _ => false,
///             }
///         })
///     }
/// }
/// ```
pub trait AuthDecider: Send + Sync {
    /// Return `true` to let the request through.
    fn decide<'a>(
        &'a self,
        request: &'a mut Parts,
        result: &'a VerificationResult,
    ) -> BoxFuture<'a, bool>;
}

impl<T: AuthDecider + ?Sized> AuthDecider for Arc<T> {
    fn decide<'a>(
        &'a self,
        request: &'a mut Parts,
        result: &'a VerificationResult,
    ) -> BoxFuture<'a, bool> {
        (**self).decide(request, result)
    }
}

/// A synchronous closure used as an [`AuthDecider`]. See [`decide_with`].
#[derive(Clone)]
pub struct DecisionFn<F>(F);

impl<F> AuthDecider for DecisionFn<F>
where
    F: Fn(&mut Parts, &VerificationResult) -> bool + Send + Sync,
{
    fn decide<'a>(
        &'a self,
        request: &'a mut Parts,
        result: &'a VerificationResult,
    ) -> BoxFuture<'a, bool> {
        let allowed = (self.0)(request, result);
        Box::pin(async move { allowed })
    }
}

/// Wrap a closure as an [`AuthDecider`].
///
/// ```
/// use axum_authgate::{decide_with, AuthGateLayer, AuthMode, RuleTable};
///
/// let layer = AuthGateLayer::new(RuleTable::default())
///     .with_decider(decide_with(|_parts, result| {
///         result.mode == AuthMode::May || result.has_token()
///     }));
/// ```
pub fn decide_with<F>(f: F) -> DecisionFn<F>
where
    F: Fn(&mut Parts, &VerificationResult) -> bool + Send + Sync,
{
    DecisionFn(f)
}

/// Shared state of the gate.
#[derive(Clone)]
pub struct GateConfig {
    /// The rule table.
    pub table: Arc<RuleTable>,
    /// Trace header settings.
    pub trace: Arc<TraceSettings>,
    /// Decision callback for non-open requests.
    pub decider: Option<Arc<dyn AuthDecider>>,
    /// The handler for blocked requests.
    pub denied_handler: Arc<dyn AccessDeniedHandler>,
}

/// A Tower layer that adds the authorization gate to a service.
///
/// # Example
/// ```no_run
/// use axum::{Router, routing::get};
/// use axum_authgate::{decide_with, AuthGateLayer, RuleTable};
/// use std::net::SocketAddr;
///
/// async fn handler() -> &'static str {
///     "Hello, World!"
/// }
///
/// #[tokio::main]
/// async fn main() {
///     let table = RuleTable::from_yaml_file("config/auth.yaml").unwrap();
///
///     let app = Router::new()
///         .route("/svc/api/hello", get(handler))
///         .layer(AuthGateLayer::new(table).with_decider(decide_with(|_, r| r.has_token())));
///
///     let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await.unwrap();
///     axum::serve(
///         listener,
///         app.into_make_service_with_connect_info::<SocketAddr>()
///     ).await.unwrap();
/// }
/// ```
#[derive(Clone)]
pub struct AuthGateLayer {
    config: GateConfig,
}

impl AuthGateLayer {
    /// Create a new gate with the given table.
    ///
    /// Trace stamping is disabled, no decider is set (every non-open request
    /// is blocked) and blocked requests get a plain text response.
    pub fn new(table: RuleTable) -> Self {
        Self::shared(Arc::new(table))
    }

    /// Create a new gate around an already shared table.
    pub fn shared(table: Arc<RuleTable>) -> Self {
        Self {
            config: GateConfig {
                table,
                trace: Arc::new(TraceSettings::disabled()),
                decider: None,
                denied_handler: Arc::new(DefaultDeniedHandler),
            },
        }
    }

    /// Build the table and trace settings from a configuration document.
    pub fn from_config(config: &AuthConfig) -> Result<Self, ConfigError> {
        let table = config.to_table()?;
        let trace = config.trace_settings()?;
        Ok(Self::new(table).with_trace(trace))
    }

    /// Set the decision callback.
    pub fn with_decider(mut self, decider: impl AuthDecider + 'static) -> Self {
        self.config.decider = Some(Arc::new(decider));
        self
    }

    /// Set a custom access denied handler.
    pub fn with_denied_handler(mut self, handler: impl AccessDeniedHandler + 'static) -> Self {
        self.config.denied_handler = Arc::new(handler);
        self
    }

    /// Set the trace header settings.
    pub fn with_trace(mut self, trace: TraceSettings) -> Self {
        self.config.trace = Arc::new(trace);
        self
    }

    /// Get a reference to the rule table.
    pub fn table(&self) -> &RuleTable {
        &self.config.table
    }
}

impl<S> Layer<S> for AuthGateLayer {
    type Service = AuthGate<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthGate {
            inner,
            config: self.config.clone(),
        }
    }
}

/// The authorization gate service.
#[derive(Clone)]
pub struct AuthGate<S> {
    inner: S,
    config: GateConfig,
}

impl<S, ReqBody> Service<Request<ReqBody>> for AuthGate<S>
where
    S: Service<Request<ReqBody>, Response = Response> + Clone + Send + 'static,
    S::Future: Send,
    ReqBody: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<ReqBody>) -> Self::Future {
        let config = self.config.clone();
        // Take the service that was driven to readiness, leave a fresh clone.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            let (mut parts, body) = request.into_parts();
            let stamp = config.trace.stamp(&mut parts);

            let path_params = path_params(&mut parts).await;
            let mut result = {
                let ctx = RequestContext::from_parts(&parts, &path_params);
                config.table.resolve(&ctx)
            };
            result.trace_id = stamp.trace_id.clone();

            let allowed = if result.mode == AuthMode::Open {
                true
            } else {
                match &config.decider {
                    Some(decider) => decider.decide(&mut parts, &result).await,
                    None => {
                        tracing::warn!(
                            path = %result.uri_full,
                            mode = %result.mode,
                            "No authorization decider configured, blocking request"
                        );
                        false
                    }
                }
            };

            let mut response = if allowed {
                tracing::trace!(
                    path = %result.uri_full,
                    mode = %result.mode,
                    tag = %result.tag,
                    trace_id = ?result.trace_id,
                    "Request authorized"
                );
                parts.extensions.insert(result);
                inner.call(Request::from_parts(parts, body)).await?
            } else {
                tracing::info!(
                    path = %result.uri_full,
                    method = %parts.method,
                    mode = %result.mode,
                    tag = %result.tag,
                    ip_allow_pass = result.ip_allow_pass,
                    trace_id = ?result.trace_id,
                    "Request blocked"
                );
                let denied = AccessDenied::from_result(&result);
                config.denied_handler.handle(&denied)
            };

            stamp.apply(response.headers_mut());
            Ok(response)
        })
    }
}

/// Router path parameters, empty outside a matched route.
async fn path_params(parts: &mut Parts) -> Vec<(String, String)> {
    match RawPathParams::from_request_parts(parts, &()).await {
        Ok(params) => params
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect(),
        Err(_) => Vec::new(),
    }
}
