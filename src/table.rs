//! Rule table and route resolution.
//!
//! The [`RuleTable`] is the central data structure: an ordered list of
//! [`UrlGroup`]s, each owning an ordered list of [`ApiRule`]s. It is built
//! once at startup and only read afterwards, so it can be shared across
//! request tasks behind an `Arc` without locking.
//!
//! ## Resolution
//!
//! 1. Groups are tried in declared order; the first whose absolute prefix is
//!    followed by `/` and at least one more character wins.
//! 2. Inside the group, rules are tried in order. The first rule whose
//!    pattern and method both match stops the scan; a pattern match with the
//!    wrong method is remembered but scanning continues.
//! 3. A failed IP check (group or rule) forces `refuse`. Otherwise a missing
//!    match or a method mismatch falls back to the group default mode.
//! 4. `force` and `may` extract a credential token.
//! 5. No group matched: the table default mode applies.

use crate::config::ConfigError;
use crate::extractor::{extract_token, RequestContext, DEFAULT_REAL_IP_HEADER};
use crate::rule::{ApiRule, AuthMode, CredentialKeys, IpAllowList};
use http::uri::PathAndQuery;
use std::sync::Arc;

/// Outcome of resolving one request against a [`RuleTable`].
///
/// The gate inserts it into the request extensions, so handlers can read it
/// with `axum::Extension<VerificationResult>`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VerificationResult {
    /// Configured uri of the matched group, `None` when no group matched.
    pub group_uri: Option<String>,
    /// Absolute prefix of the matched group.
    pub group_prefix: Option<String>,
    /// Path relative to the matched group prefix (empty when no group matched).
    pub relative_uri: String,
    /// Full request path.
    pub uri_full: String,
    /// Whether any rule pattern matched.
    pub api_pass: bool,
    /// Whether the matched rule accepted the request method.
    pub method_pass: bool,
    /// Whether the group and rule IP allow-lists both passed.
    pub ip_allow_pass: bool,
    /// Resolved mode.
    pub mode: AuthMode,
    /// Tag of the matched rule.
    pub tag: String,
    /// Extracted credential; only filled for `force` and `may`.
    pub auth_token: String,
    /// Trace id stamped on the request, if tracing is configured.
    pub trace_id: Option<String>,
}

impl VerificationResult {
    /// Whether a URL group matched the request.
    pub fn group_matched(&self) -> bool {
        self.group_uri.is_some()
    }

    /// Whether a non-empty credential token was found.
    pub fn has_token(&self) -> bool {
        !self.auth_token.is_empty()
    }

    fn open(path: &str) -> Self {
        Self {
            uri_full: path.to_string(),
            ip_allow_pass: true,
            mode: AuthMode::Open,
            ..Self::default()
        }
    }
}

/// A URL prefix scope with its defaults and ordered rules.
#[derive(Debug, Clone)]
pub struct UrlGroup {
    /// Configured uri; relative values are joined onto the context path.
    pub uri: String,
    /// Mode used when no rule matches or the matched rule rejects the method.
    pub default_mode: AuthMode,
    /// Group-level IP allow-list.
    pub ip_allow: IpAllowList,
    /// Credential key overrides.
    pub credentials: CredentialKeys,
    /// Ordered rules; the first pattern-and-method match wins.
    pub rules: Vec<ApiRule>,
    prefix: String,
}

impl UrlGroup {
    /// Create a group for `uri` with default mode `refuse` and no rules.
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            default_mode: AuthMode::Refuse,
            ip_allow: IpAllowList::any(),
            credentials: CredentialKeys::default(),
            rules: Vec::new(),
            prefix: String::new(),
        }
    }

    /// Set the default mode.
    pub fn default_mode(mut self, mode: AuthMode) -> Self {
        self.default_mode = mode;
        self
    }

    /// Set the group-level IP allow-list.
    pub fn ip_allow(mut self, expr: &str) -> Self {
        self.ip_allow = IpAllowList::parse(expr);
        self
    }

    /// Set credential key overrides.
    pub fn credentials(mut self, keys: CredentialKeys) -> Self {
        self.credentials = keys;
        self
    }

    /// Append a rule.
    pub fn rule(mut self, rule: ApiRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Absolute prefix, resolved when the table is built.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Path below this group's prefix, or `None` if the request is not in
    /// the group.
    pub fn relative_path<'p>(&self, path: &'p str) -> Option<&'p str> {
        let rest = path.strip_prefix(self.prefix.as_str())?;
        let rest = if self.prefix.ends_with('/') {
            rest
        } else {
            rest.strip_prefix('/')?
        };
        (!rest.is_empty()).then_some(rest)
    }

    fn real_ip_header(&self) -> &str {
        self.credentials
            .real_ip_header
            .as_deref()
            .unwrap_or(DEFAULT_REAL_IP_HEADER)
    }

    fn verify(&self, ctx: &RequestContext<'_>, relative: &str) -> VerificationResult {
        let ip = ctx.real_ip(self.real_ip_header());
        let group_ip_pass = self.ip_allow.allows(ip.as_deref());

        let mut result = VerificationResult {
            group_uri: Some(self.uri.clone()),
            group_prefix: Some(self.prefix.clone()),
            relative_uri: relative.to_string(),
            uri_full: ctx.path.to_string(),
            mode: self.default_mode,
            ..VerificationResult::default()
        };

        let mut rule_ip_pass = true;
        let mut matched = None;
        for (idx, rule) in self.rules.iter().enumerate() {
            if !rule.pattern.matches(relative) {
                continue;
            }
            matched = Some(idx);
            result.api_pass = true;
            result.method_pass = rule.methods.allows(ctx.method);
            rule_ip_pass = rule.ip_allow.allows(ip.as_deref());
            result.mode = rule.mode;
            result.tag = rule.tag.clone();
            if result.method_pass {
                break;
            }
        }

        result.ip_allow_pass = group_ip_pass && rule_ip_pass;
        if !result.ip_allow_pass {
            result.mode = AuthMode::Refuse;
        } else if !result.api_pass || !result.method_pass {
            result.mode = self.default_mode;
        }

        if result.mode.wants_token() {
            result.auth_token = extract_token(ctx, &self.credentials);
        }

        tracing::debug!(
            group = %self.uri,
            path = ctx.path,
            method = %ctx.method,
            ip = ?ip,
            rule_index = ?matched,
            api_pass = result.api_pass,
            method_pass = result.method_pass,
            ip_allow_pass = result.ip_allow_pass,
            mode = %result.mode,
            "Route resolved in url group"
        );
        result
    }
}

/// Immutable table of URL groups used to resolve requests.
///
/// # Example
/// ```
/// use axum_authgate::{ApiRule, AuthMode, RequestContext, RuleTable, UrlGroup};
/// use http::{HeaderMap, Method};
///
/// let table = RuleTable::builder()
///     .context_path("/svc")
///     .default_mode(AuthMode::Refuse)
///     .group(UrlGroup::new("api")
///         .default_mode(AuthMode::Force)
///         .rule(ApiRule::parse("health").unwrap().mode(AuthMode::Open)))
///     .build()
///     .unwrap();
///
/// let headers = HeaderMap::new();
/// let ctx = RequestContext::new(&Method::GET, "/svc/api/health", &headers);
/// assert_eq!(table.resolve(&ctx).mode, AuthMode::Open);
///
/// let ctx = RequestContext::new(&Method::GET, "/svc/api/orders", &headers);
/// assert_eq!(table.resolve(&ctx).mode, AuthMode::Force);
/// ```
#[derive(Debug, Clone)]
pub struct RuleTable {
    groups: Vec<UrlGroup>,
    default_mode: AuthMode,
    credentials: CredentialKeys,
    context_path: String,
    open: bool,
}

impl Default for RuleTable {
    fn default() -> Self {
        Self {
            groups: Vec::new(),
            default_mode: AuthMode::Refuse,
            credentials: CredentialKeys::default(),
            context_path: "/".to_string(),
            open: false,
        }
    }
}

impl RuleTable {
    /// Create a builder for constructing a rule table.
    pub fn builder() -> RuleTableBuilder {
        RuleTableBuilder::new()
    }

    /// A table that authorizes every request without consulting any rule.
    pub fn open() -> Self {
        Self {
            open: true,
            default_mode: AuthMode::Open,
            ..Self::default()
        }
    }

    /// Whether this table was built in open mode.
    pub fn is_open(&self) -> bool {
        self.open
    }

    /// The URL groups in match order.
    pub fn groups(&self) -> &[UrlGroup] {
        &self.groups
    }

    /// Mode applied when no group matches.
    pub fn default_mode(&self) -> AuthMode {
        self.default_mode
    }

    /// Table-level credential keys.
    pub fn credentials(&self) -> &CredentialKeys {
        &self.credentials
    }

    /// Normalized context path.
    pub fn context_path(&self) -> &str {
        &self.context_path
    }

    /// Resolve a request. Always produces exactly one result.
    pub fn resolve(&self, ctx: &RequestContext<'_>) -> VerificationResult {
        if self.open {
            return VerificationResult::open(ctx.path);
        }

        for group in &self.groups {
            if let Some(relative) = group.relative_path(ctx.path) {
                return group.verify(ctx, relative);
            }
        }

        let mut result = VerificationResult {
            uri_full: ctx.path.to_string(),
            ip_allow_pass: true,
            mode: self.default_mode,
            ..VerificationResult::default()
        };
        if result.mode.wants_token() {
            result.auth_token = extract_token(ctx, &self.credentials);
        }

        tracing::debug!(
            path = ctx.path,
            method = %ctx.method,
            mode = %result.mode,
            "No url group matched, using default mode"
        );
        result
    }
}

/// Builder for constructing a [`RuleTable`].
#[derive(Debug, Default)]
pub struct RuleTableBuilder {
    groups: Vec<UrlGroup>,
    default_mode: AuthMode,
    credentials: CredentialKeys,
    context_path: String,
}

impl RuleTableBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the service context path that relative group uris are joined to.
    pub fn context_path(mut self, path: impl Into<String>) -> Self {
        self.context_path = path.into();
        self
    }

    /// Set the mode used when no group matches.
    ///
    /// The default is `AuthMode::Refuse`.
    pub fn default_mode(mut self, mode: AuthMode) -> Self {
        self.default_mode = mode;
        self
    }

    /// Set table-level credential keys inherited by every group.
    pub fn credentials(mut self, keys: CredentialKeys) -> Self {
        self.credentials = keys;
        self
    }

    /// Append a URL group. Groups are matched in the order added.
    pub fn group(mut self, group: UrlGroup) -> Self {
        self.groups.push(group);
        self
    }

    /// Resolve group prefixes, propagate credential defaults and build the
    /// table.
    pub fn build(self) -> Result<RuleTable, ConfigError> {
        let groups = self
            .groups
            .into_iter()
            .map(|mut group| {
                group.prefix = join_context_path(&self.context_path, &group.uri)?;
                group.credentials = group.credentials.inherit(&self.credentials);
                if group.credentials.real_ip_header.is_none() {
                    group.credentials.real_ip_header = Some(DEFAULT_REAL_IP_HEADER.to_string());
                }
                Ok(group)
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;

        Ok(RuleTable {
            groups,
            default_mode: self.default_mode,
            credentials: self.credentials,
            context_path: join_context_path(&self.context_path, "")?,
            open: false,
        })
    }

    /// Build the table wrapped in an Arc for sharing.
    pub fn build_shared(self) -> Result<Arc<RuleTable>, ConfigError> {
        self.build().map(Arc::new)
    }
}

/// Resolve a group uri to an absolute path.
///
/// Uris starting with `/` are absolute. Others are joined onto
/// `context_path`; an empty uri resolves to the context path itself.
pub fn join_context_path(context_path: &str, uri: &str) -> Result<String, ConfigError> {
    let joined = if uri.starts_with('/') {
        normalize_path(uri)
    } else if context_path.is_empty() {
        normalize_path(&format!("/{uri}"))
    } else if uri.is_empty() {
        normalize_path(&format!("/{context_path}"))
    } else {
        normalize_path(&format!("/{context_path}/{uri}"))
    };

    if joined.is_empty() || !joined.starts_with('/') || joined.contains(['?', '#']) {
        return Err(ConfigError::InvalidUri {
            uri: uri.to_string(),
            reason: format!("joined path '{joined}' is not an absolute path"),
        });
    }
    joined
        .parse::<PathAndQuery>()
        .map_err(|e| ConfigError::InvalidUri {
            uri: uri.to_string(),
            reason: e.to_string(),
        })?;
    Ok(joined)
}

fn normalize_path(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }
    let mut out = format!("/{}", segments.join("/"));
    if path.ends_with('/') && out.len() > 1 {
        out.push('/');
    }
    out
}
