//! Responses for blocked requests.

use crate::rule::AuthMode;
use crate::table::VerificationResult;
use axum::response::{IntoResponse, Response};
use http::StatusCode;
use std::fmt;

/// A request blocked by the authorization gate.
#[derive(Debug, Clone)]
pub struct AccessDenied {
    /// The path that was requested.
    pub path: String,
    /// Resolved mode.
    pub mode: AuthMode,
    /// Tag of the matched rule.
    pub tag: String,
    /// Trace id of the request, if stamped.
    pub trace_id: Option<String>,
    /// Optional custom message.
    pub message: Option<String>,
}

impl AccessDenied {
    /// Create a new access denied error.
    pub fn new(path: impl Into<String>, mode: AuthMode) -> Self {
        Self {
            path: path.into(),
            mode,
            tag: String::new(),
            trace_id: None,
            message: None,
        }
    }

    /// Build from a resolution result.
    pub fn from_result(result: &VerificationResult) -> Self {
        Self {
            path: result.uri_full.clone(),
            mode: result.mode,
            tag: result.tag.clone(),
            trace_id: result.trace_id.clone(),
            message: None,
        }
    }

    /// Add a custom message to the error.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// `403` for `refuse`, `401` otherwise.
    pub fn status(&self) -> StatusCode {
        match self.mode {
            AuthMode::Refuse => StatusCode::FORBIDDEN,
            _ => StatusCode::UNAUTHORIZED,
        }
    }
}

impl fmt::Display for AccessDenied {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(msg) => write!(f, "{}", msg),
            None => write!(f, "Access denied ({}) to path '{}'", self.mode, self.path),
        }
    }
}

impl std::error::Error for AccessDenied {}

impl IntoResponse for AccessDenied {
    fn into_response(self) -> Response {
        let body = match &self.message {
            Some(msg) => msg.clone(),
            None => match self.mode {
                AuthMode::Refuse => "Access denied".to_string(),
                _ => "Authentication required".to_string(),
            },
        };
        (self.status(), body).into_response()
    }
}

/// Custom response handler for blocked requests.
///
/// # Example
/// ```
/// use axum_authgate::{AccessDeniedHandler, AccessDenied};
/// use axum::response::{Response, IntoResponse};
/// use http::StatusCode;
///
/// struct LoginRedirect;
///
/// impl AccessDeniedHandler for LoginRedirect {
///     fn handle(&self, denied: &AccessDenied) -> Response {
///         (StatusCode::SEE_OTHER, [("location", "/login")], denied.to_string()).into_response()
///     }
/// }
/// ```
pub trait AccessDeniedHandler: Send + Sync {
    /// Handle an access denied error and return a response.
    fn handle(&self, denied: &AccessDenied) -> Response;
}

/// Default handler: plain text, `401` or `403`.
#[derive(Debug, Clone, Default)]
pub struct DefaultDeniedHandler;

impl AccessDeniedHandler for DefaultDeniedHandler {
    fn handle(&self, denied: &AccessDenied) -> Response {
        denied.clone().into_response()
    }
}

/// Handler that returns a JSON error response.
#[derive(Debug, Clone, Default)]
pub struct JsonDeniedHandler {
    include_details: bool,
}

impl JsonDeniedHandler {
    /// Create a new JSON denied handler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Include the mode, tag, path and trace id in the body.
    pub fn with_details(mut self) -> Self {
        self.include_details = true;
        self
    }
}

impl AccessDeniedHandler for JsonDeniedHandler {
    fn handle(&self, denied: &AccessDenied) -> Response {
        use axum::Json;

        let error = match denied.mode {
            AuthMode::Refuse => "access_denied",
            _ => "unauthorized",
        };
        let message = denied.message.as_deref().unwrap_or("Access denied");

        let body = if self.include_details {
            serde_json::json!({
                "error": error,
                "message": message,
                "mode": denied.mode,
                "tag": denied.tag,
                "path": denied.path,
                "trace_id": denied.trace_id,
            })
        } else {
            serde_json::json!({
                "error": error,
                "message": message,
            })
        };

        (denied.status(), Json(body)).into_response()
    }
}
