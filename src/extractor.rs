//! Request view and credential extraction.
//!
//! [`RequestContext`] is the read-only slice of an HTTP request the resolver
//! needs: path, method, transport address, headers, query string and any
//! router path parameters. [`extract_token`] pulls a credential from it.
//!
//! ## Token Priority
//!
//! ```text
//! cookie  ->  header  ->  query parameter  ->  path parameter
//! ```
//!
//! Each later source is consulted only while the current candidate is at
//! most [`MIN_TOKEN_LEN`] bytes long. A configured scheme prefix (for
//! example `Bearer`) is then stripped.

use crate::rule::CredentialKeys;
use axum::extract::{ConnectInfo, OriginalUri};
use http::header::COOKIE;
use http::request::Parts;
use http::{HeaderMap, Method};
use std::net::{IpAddr, SocketAddr};

/// A candidate token must be longer than this to stop the source chain.
pub const MIN_TOKEN_LEN: usize = 8;

/// Header consulted for the client address when a group sets none.
pub const DEFAULT_REAL_IP_HEADER: &str = "X-Real-IP";

/// Request data used for route resolution and token extraction.
#[derive(Debug, Clone)]
pub struct RequestContext<'a> {
    /// Absolute request path.
    pub path: &'a str,
    /// Request method.
    pub method: &'a Method,
    /// Transport-level peer address, if known.
    pub remote_addr: Option<IpAddr>,
    /// Request headers.
    pub headers: &'a HeaderMap,
    /// Raw query string.
    pub query: Option<&'a str>,
    /// Path parameters captured by the router.
    pub path_params: &'a [(String, String)],
}

impl<'a> RequestContext<'a> {
    /// Create a context with no peer address, query or path parameters.
    pub fn new(method: &'a Method, path: &'a str, headers: &'a HeaderMap) -> Self {
        Self {
            path,
            method,
            remote_addr: None,
            headers,
            query: None,
            path_params: &[],
        }
    }

    /// Build a context from request parts.
    ///
    /// The path comes from [`request_path`], so nest prefixes stripped by
    /// the router are still seen. The peer address is read from axum's
    /// [`ConnectInfo<SocketAddr>`] extension; serve the router with
    /// `into_make_service_with_connect_info::<SocketAddr>()` to provide it.
    pub fn from_parts(parts: &'a Parts, path_params: &'a [(String, String)]) -> Self {
        Self {
            path: request_path(parts),
            method: &parts.method,
            remote_addr: parts
                .extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ci| ci.0.ip()),
            headers: &parts.headers,
            query: parts.uri.query(),
            path_params,
        }
    }

    /// Set the peer address.
    pub fn with_remote_addr(mut self, addr: IpAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    /// Set the raw query string.
    pub fn with_query(mut self, query: &'a str) -> Self {
        self.query = Some(query);
        self
    }

    /// Set the router path parameters.
    pub fn with_path_params(mut self, params: &'a [(String, String)]) -> Self {
        self.path_params = params;
        self
    }

    /// Header value as a string; missing or non-UTF-8 values are empty.
    pub fn header(&self, name: &str) -> &'a str {
        self.headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
    }

    /// Value of the named cookie, searching every `Cookie` header.
    pub fn cookie(&self, name: &str) -> Option<String> {
        self.headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(key, _)| key.trim() == name)
            .map(|(_, value)| value.trim().trim_matches('"').to_string())
    }

    /// Value of the named query parameter, percent-decoded.
    pub fn query_param(&self, name: &str) -> Option<String> {
        let query = self.query?;
        query_pairs(query)
            .into_iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    /// Value of the named router path parameter.
    pub fn path_param(&self, name: &str) -> Option<&'a str> {
        self.path_params
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Client address: the `real_ip_header` value when present, otherwise the
    /// transport peer address.
    pub fn real_ip(&self, real_ip_header: &str) -> Option<String> {
        let forwarded = if real_ip_header.is_empty() {
            ""
        } else {
            self.header(real_ip_header).trim()
        };
        if !forwarded.is_empty() {
            return Some(forwarded.to_string());
        }
        self.remote_addr.map(|ip| ip.to_canonical().to_string())
    }
}

/// Absolute request path as received by the outermost router.
///
/// Inside `Router::nest` the request uri has the nest prefix removed; the
/// untouched uri is kept in the [`OriginalUri`] extension.
pub fn request_path(parts: &Parts) -> &str {
    match parts.extensions.get::<OriginalUri>() {
        Some(OriginalUri(uri)) => uri.path(),
        None => parts.uri.path(),
    }
}

fn query_pairs(query: &str) -> Vec<(String, String)> {
    match serde_urlencoded::from_str::<Vec<(String, String)>>(query) {
        Ok(pairs) => pairs,
        Err(e) => {
            tracing::debug!(error = %e, "Unparseable query string, ignoring");
            Vec::new()
        }
    }
}

/// Extract the credential token for a request.
///
/// Sources are tried in order: cookie, header, query parameter, path
/// parameter. A source replaces the current candidate only while that
/// candidate is [`MIN_TOKEN_LEN`] bytes or shorter. Returns an empty string
/// when nothing is found.
///
/// # Example
/// ```
/// use axum_authgate::{extract_token, CredentialKeys, RequestContext};
/// use http::{HeaderMap, Method};
///
/// let mut headers = HeaderMap::new();
/// headers.insert("authorization", "Bearer abc123xyz".parse().unwrap());
///
/// let ctx = RequestContext::new(&Method::GET, "/api/anything", &headers);
/// let keys = CredentialKeys::new().header("Authorization").strip_prefix("Bearer");
/// assert_eq!(extract_token(&ctx, &keys), "abc123xyz");
/// ```
pub fn extract_token(ctx: &RequestContext<'_>, keys: &CredentialKeys) -> String {
    let mut token = String::new();

    if let Some(cookie) = non_empty(&keys.cookie) {
        if let Some(value) = ctx.cookie(cookie) {
            token = value;
        }
    }

    if token.len() <= MIN_TOKEN_LEN {
        if let Some(header) = non_empty(&keys.header) {
            token = ctx.header(header).to_string();
        }
    }

    if token.len() <= MIN_TOKEN_LEN {
        if let Some(param) = non_empty(&keys.url_param) {
            token = url_token(ctx, param);
        }
    }

    match non_empty(&keys.strip_prefix) {
        Some(prefix) => strip_auth_prefix(&token, prefix).to_string(),
        None => token,
    }
}

fn url_token(ctx: &RequestContext<'_>, name: &str) -> String {
    let token = ctx.query_param(name).unwrap_or_default();
    if token.len() <= MIN_TOKEN_LEN {
        return ctx.path_param(name).unwrap_or("").to_string();
    }
    token
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

/// Strip `prefix` from `token`.
///
/// `"<prefix> "` and `"<prefix>:"` lose the separator too; a bare `prefix`
/// is removed on its own.
pub fn strip_auth_prefix<'t>(token: &'t str, prefix: &str) -> &'t str {
    if prefix.is_empty() || token.is_empty() {
        return token;
    }
    match token.strip_prefix(prefix) {
        Some(rest) => rest
            .strip_prefix(' ')
            .or_else(|| rest.strip_prefix(':'))
            .unwrap_or(rest),
        None => token,
    }
}
