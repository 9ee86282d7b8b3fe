//! Trace header stamping.
//!
//! Before a request is resolved the gate stamps it with a trace id, a
//! millisecond timestamp and the request path, each under a configurable
//! header. The values go either onto the request (for downstream handlers)
//! or onto the response.

use crate::config::{ConfigError, TraceConfig};
use crate::extractor::request_path;
use http::header::{HeaderName, HeaderValue};
use http::request::Parts;
use http::HeaderMap;
use rand::Rng;

/// Validated trace header configuration.
#[derive(Debug, Clone, Default)]
pub struct TraceSettings {
    get_key: Option<HeaderName>,
    write_key: Option<HeaderName>,
    ts_key: Option<HeaderName>,
    uri_key: Option<HeaderName>,
    to_response: bool,
}

impl TraceSettings {
    /// No stamping at all.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Validate header names from the configuration document.
    ///
    /// The read and write keys default to each other.
    pub fn from_config(config: &TraceConfig) -> Result<Self, ConfigError> {
        let get_key = header_name(config.trace_id_get_key.as_deref())?;
        let write_key = header_name(config.trace_id_key.as_deref())?;
        Ok(Self {
            get_key: get_key.clone().or_else(|| write_key.clone()),
            write_key: write_key.or(get_key),
            ts_key: header_name(config.trace_ts_key.as_deref())?,
            uri_key: header_name(config.uri_header_key.as_deref())?,
            to_response: config.to_response_header,
        })
    }

    /// Use one header for reading and writing the trace id.
    pub fn trace_id_header(mut self, name: HeaderName) -> Self {
        self.get_key = Some(name.clone());
        self.write_key = Some(name);
        self
    }

    /// Header receiving the request timestamp in Unix milliseconds.
    pub fn timestamp_header(mut self, name: HeaderName) -> Self {
        self.ts_key = Some(name);
        self
    }

    /// Header receiving the request path relative to the server root.
    pub fn uri_header(mut self, name: HeaderName) -> Self {
        self.uri_key = Some(name);
        self
    }

    /// Write to response headers instead of request headers.
    pub fn to_response(mut self, enabled: bool) -> Self {
        self.to_response = enabled;
        self
    }

    /// Whether any header is configured.
    pub fn is_enabled(&self) -> bool {
        self.write_key.is_some() || self.ts_key.is_some() || self.uri_key.is_some()
    }

    /// Stamp the request.
    ///
    /// An incoming trace id is reused; otherwise a new one is generated.
    /// Headers destined for the response are returned in the [`TraceStamp`].
    pub fn stamp(&self, parts: &mut Parts) -> TraceStamp {
        let mut stamp = TraceStamp::default();
        if !self.is_enabled() {
            return stamp;
        }

        let incoming = self
            .get_key
            .as_ref()
            .and_then(|key| parts.headers.get(key))
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(str::to_string);

        let mut values: Vec<(HeaderName, HeaderValue)> = Vec::new();

        if let Some(write_key) = &self.write_key {
            let trace_id = match incoming {
                Some(id) => {
                    // Already present under the same header on the request.
                    if self.to_response || self.get_key.as_ref() != Some(write_key) {
                        push(&mut values, write_key, &id);
                    }
                    id
                }
                None => {
                    let id = generate_trace_id();
                    push(&mut values, write_key, &id);
                    id
                }
            };
            stamp.trace_id = Some(trace_id);
        }

        if let Some(ts_key) = &self.ts_key {
            let millis = chrono::Utc::now().timestamp_millis();
            push(&mut values, ts_key, &millis.to_string());
        }

        if let Some(uri_key) = &self.uri_key {
            push(&mut values, uri_key, relative_to_root(request_path(parts)));
        }

        if self.to_response {
            stamp.response_headers = values;
        } else {
            for (name, value) in values {
                parts.headers.insert(name, value);
            }
        }
        stamp
    }
}

fn push(values: &mut Vec<(HeaderName, HeaderValue)>, name: &HeaderName, value: &str) {
    match HeaderValue::from_str(value) {
        Ok(value) => values.push((name.clone(), value)),
        Err(_) => tracing::debug!(header = %name, "Skipping non-ASCII trace header value"),
    }
}

/// Request path without the leading `/`; the root path stays `/`.
fn relative_to_root(path: &str) -> &str {
    match path.strip_prefix('/') {
        Some(rest) if !rest.is_empty() => rest,
        _ => path,
    }
}

fn header_name(name: Option<&str>) -> Result<Option<HeaderName>, ConfigError> {
    match name.map(str::trim).filter(|n| !n.is_empty()) {
        Some(n) => HeaderName::from_bytes(n.as_bytes())
            .map(Some)
            .map_err(|_| ConfigError::InvalidHeader(n.to_string())),
        None => Ok(None),
    }
}

/// Result of stamping one request.
#[derive(Debug, Clone, Default)]
pub struct TraceStamp {
    /// Trace id carried by the request, if a trace header is configured.
    pub trace_id: Option<String>,
    /// Headers to add to the response.
    pub response_headers: Vec<(HeaderName, HeaderValue)>,
}

impl TraceStamp {
    /// Copy the pending response headers into `headers`.
    pub fn apply(self, headers: &mut HeaderMap) {
        for (name, value) in self.response_headers {
            headers.insert(name, value);
        }
    }
}

/// Generate a trace id of the form `be-YYYYMMDD-HHMMSS-NNNNNN`.
pub fn generate_trace_id() -> String {
    let now = chrono::Local::now();
    let suffix: u32 = rand::rng().random_range(0..1_000_000);
    format!("be-{}-{:06}", now.format("%Y%m%d-%H%M%S"), suffix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Request;

    fn parts(builder: http::request::Builder) -> Parts {
        builder.body(()).unwrap().into_parts().0
    }

    fn config(write: &str) -> TraceConfig {
        TraceConfig {
            trace_id_key: Some(write.to_string()),
            trace_ts_key: Some("X-Trace-Ts".to_string()),
            uri_header_key: Some("X-Trace-Uri".to_string()),
            ..TraceConfig::default()
        }
    }

    #[test]
    fn test_trace_id_format() {
        let id = generate_trace_id();
        let pieces: Vec<&str> = id.split('-').collect();
        assert_eq!(pieces.len(), 4);
        assert_eq!(pieces[0], "be");
        assert_eq!(pieces[1].len(), 8);
        assert_eq!(pieces[2].len(), 6);
        assert_eq!(pieces[3].len(), 6);
        assert!(pieces[1..].iter().all(|p| p.chars().all(|c| c.is_ascii_digit())));
    }

    #[test]
    fn test_stamp_request_generates_id() {
        let settings = TraceSettings::from_config(&config("X-Trace-Id")).unwrap();
        let mut parts = parts(Request::builder().uri("/svc/api/x?y=1"));

        let stamp = settings.stamp(&mut parts);
        let id = stamp.trace_id.clone().unwrap();
        assert!(id.starts_with("be-"));
        assert!(stamp.response_headers.is_empty());
        assert_eq!(parts.headers["x-trace-id"], id.as_str());
        assert_eq!(parts.headers["x-trace-uri"], "svc/api/x");
        assert!(parts.headers["x-trace-ts"].to_str().unwrap().parse::<i64>().is_ok());
    }

    #[test]
    fn test_stamp_reuses_incoming_id() {
        let settings = TraceSettings::from_config(&TraceConfig {
            trace_id_get_key: Some("X-Request-Id".to_string()),
            trace_id_key: Some("X-Trace-Id".to_string()),
            ..TraceConfig::default()
        })
        .unwrap();
        let mut parts = parts(Request::builder().uri("/").header("x-request-id", "upstream-1"));

        let stamp = settings.stamp(&mut parts);
        assert_eq!(stamp.trace_id.as_deref(), Some("upstream-1"));
        assert_eq!(parts.headers["x-trace-id"], "upstream-1");
    }

    #[test]
    fn test_stamp_to_response() {
        let mut trace = config("X-Trace-Id");
        trace.to_response_header = true;
        let settings = TraceSettings::from_config(&trace).unwrap();
        let mut parts = parts(Request::builder().uri("/a").header("x-trace-id", "given-id"));

        let stamp = settings.stamp(&mut parts);
        assert!(!parts.headers.contains_key("x-trace-ts"));

        let mut response = HeaderMap::new();
        stamp.apply(&mut response);
        assert_eq!(response["x-trace-id"], "given-id");
        assert_eq!(response["x-trace-uri"], "a");
        assert!(response.contains_key("x-trace-ts"));
    }

    #[test]
    fn test_uri_header_uses_original_uri() {
        let settings = TraceSettings::disabled().uri_header(HeaderName::from_static("x-trace-uri"));
        let mut parts = parts(
            Request::builder()
                .uri("/api/x")
                .extension(axum::extract::OriginalUri("/svc/api/x".parse().unwrap())),
        );

        let stamp = settings.stamp(&mut parts);
        assert!(stamp.trace_id.is_none());
        assert_eq!(parts.headers["x-trace-uri"], "svc/api/x");
    }

    #[test]
    fn test_relative_to_root() {
        assert_eq!(relative_to_root("/svc/api"), "svc/api");
        assert_eq!(relative_to_root("/"), "/");
        assert_eq!(relative_to_root(""), "");
    }

    #[test]
    fn test_disabled_does_nothing() {
        let settings = TraceSettings::disabled();
        let mut parts = parts(Request::builder().uri("/a"));
        let stamp = settings.stamp(&mut parts);
        assert!(stamp.trace_id.is_none());
        assert!(parts.headers.is_empty());
    }

    #[test]
    fn test_invalid_header_name() {
        let err = TraceSettings::from_config(&config("bad header")).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidHeader(name) if name == "bad header"));
    }
}
