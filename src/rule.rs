//! Rule definitions and matching primitives.
//!
//! This module provides the building blocks of a [`RuleTable`](crate::RuleTable):
//!
//! - [`AuthMode`]: what a matched route requires (open, force, may, refuse)
//! - [`ApiPattern`]: glob (leading/trailing `*`) or regex match on a relative path
//! - [`MethodFilter`]: comma-separated HTTP verbs, or `ALL`
//! - [`IpAllowList`]: CIDR, start-end range and exact address terms
//! - [`ApiRule`]: one pattern + method + mode + tag entry inside a URL group

use http::Method;
use ipnetwork::IpNetwork;
use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::net::IpAddr;

/// Authorization requirement resolved for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    /// No authorization needed.
    Open,
    /// Authorization is required.
    Force,
    /// Authorization is optional; business logic decides.
    May,
    /// The request is always refused.
    #[default]
    Refuse,
}

impl AuthMode {
    /// Parse a configured mode string.
    ///
    /// Anything other than `open`, `force`, `may` or `refuse` resolves to
    /// [`AuthMode::Refuse`].
    ///
    /// # Example
    /// ```
    /// use axum_authgate::AuthMode;
    ///
    /// assert_eq!(AuthMode::parse("force"), AuthMode::Force);
    /// assert_eq!(AuthMode::parse("whatever"), AuthMode::Refuse);
    /// ```
    pub fn parse(s: &str) -> Self {
        match s {
            "open" => Self::Open,
            "force" => Self::Force,
            "may" => Self::May,
            _ => Self::Refuse,
        }
    }

    /// Parse an optional mode string; a missing value is `refuse`.
    pub fn parse_opt(s: Option<&str>) -> Self {
        s.map(Self::parse).unwrap_or(Self::Refuse)
    }

    /// The configuration spelling of this mode.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Force => "force",
            Self::May => "may",
            Self::Refuse => "refuse",
        }
    }

    /// Whether a credential token should be extracted for this mode.
    pub fn wants_token(&self) -> bool {
        matches!(self, Self::Force | Self::May)
    }
}

impl fmt::Display for AuthMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pattern matched against a path relative to its URL group.
///
/// A pattern starting with `^` or ending with `$` is a regular expression.
/// Anything else is a glob that supports `*` at the start and/or the end only.
#[derive(Debug, Clone)]
pub enum ApiPattern {
    /// `*`: matches every path.
    Any,
    /// No wildcard: the whole path must be equal.
    Exact(String),
    /// `foo*`: the path starts with `foo`.
    Prefix(String),
    /// `*foo`: the path ends with `foo`.
    Suffix(String),
    /// `*foo*`: the path contains `foo`.
    Contains(String),
    /// `^...` or `...$`: regular expression.
    Regex(Regex),
}

impl ApiPattern {
    /// Parse a pattern string.
    ///
    /// Returns an error only for a regex-shaped pattern that does not compile.
    ///
    /// # Example
    /// ```
    /// use axum_authgate::ApiPattern;
    ///
    /// let glob = ApiPattern::parse("/users/*").unwrap();
    /// assert!(glob.matches("/users/42"));
    /// assert!(!glob.matches("/user/42"));
    ///
    /// let re = ApiPattern::parse(r"^/users/\d+$").unwrap();
    /// assert!(re.matches("/users/42"));
    /// assert!(!re.matches("/users/abc"));
    /// ```
    pub fn parse(pattern: &str) -> Result<Self, regex::Error> {
        if pattern.starts_with('^') || pattern.ends_with('$') {
            return Regex::new(pattern).map(Self::Regex);
        }

        if pattern == "*" || pattern == "**" {
            return Ok(Self::Any);
        }

        let leading = pattern.starts_with('*');
        let trailing = pattern.ends_with('*');
        let pattern = match (leading, trailing) {
            (true, true) => Self::Contains(pattern[1..pattern.len() - 1].to_string()),
            (true, false) => Self::Suffix(pattern[1..].to_string()),
            (false, true) => Self::Prefix(pattern[..pattern.len() - 1].to_string()),
            (false, false) => Self::Exact(pattern.to_string()),
        };
        Ok(pattern)
    }

    /// Whether the pattern is a regular expression.
    pub fn is_regex(&self) -> bool {
        matches!(self, Self::Regex(_))
    }

    /// Check if a relative path matches this pattern.
    #[inline]
    pub fn matches(&self, path: &str) -> bool {
        match self {
            Self::Any => true,
            Self::Exact(p) => p == path,
            Self::Prefix(p) => path.starts_with(p.as_str()),
            Self::Suffix(p) => path.ends_with(p.as_str()),
            Self::Contains(p) => path.contains(p.as_str()),
            Self::Regex(re) => re.is_match(path),
        }
    }
}

/// HTTP method filter of an [`ApiRule`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum MethodFilter {
    /// Any method (`ALL` or empty in configuration).
    #[default]
    All,
    /// Only the listed methods, compared case-sensitively.
    Only(Vec<String>),
}

impl MethodFilter {
    /// Parse a comma-separated method list.
    ///
    /// An empty string or the sentinel `ALL` accepts every method.
    pub fn parse(s: &str) -> Self {
        let s = s.trim();
        if s.is_empty() || s == "ALL" {
            return Self::All;
        }
        let methods = s
            .split(',')
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .map(str::to_string)
            .collect();
        Self::Only(methods)
    }

    /// Check if a request method passes this filter.
    pub fn allows(&self, method: &Method) -> bool {
        match self {
            Self::All => true,
            Self::Only(methods) => methods.iter().any(|m| m == method.as_str()),
        }
    }
}

/// One term of an IP allow-list expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IpTerm {
    /// `a.b.c.d/n` network.
    Network(IpNetwork),
    /// `start-end` range. Endpoints are compared as strings, not numerically.
    Range(String, String),
    /// A single address compared by string equality.
    Exact(String),
    /// A term that failed to parse; never matches.
    Invalid(String),
}

impl IpTerm {
    fn parse(term: &str) -> Self {
        if term.contains('/') {
            return match term.parse::<IpNetwork>() {
                Ok(network) => Self::Network(network),
                Err(e) => {
                    tracing::warn!(
                        term = term,
                        error = %e,
                        "Invalid CIDR in ip allow-list, ignoring term"
                    );
                    Self::Invalid(term.to_string())
                }
            };
        }

        if term.contains('-') {
            let mut parts = term.split('-');
            return match (parts.next(), parts.next(), parts.next()) {
                (Some(start), Some(end), None) if !start.is_empty() && !end.is_empty() => {
                    Self::Range(start.to_string(), end.to_string())
                }
                _ => Self::Invalid(term.to_string()),
            };
        }

        Self::Exact(term.to_string())
    }

    fn matches(&self, remote: &str) -> bool {
        match self {
            Self::Network(network) => match remote.parse::<IpAddr>() {
                // IPv4 clients on a dual-stack listener arrive as ::ffff:a.b.c.d
                Ok(IpAddr::V6(v6)) if network.is_ipv4() => v6
                    .to_ipv4_mapped()
                    .is_some_and(|v4| network.contains(IpAddr::V4(v4))),
                Ok(ip) => network.contains(ip),
                Err(_) => false,
            },
            Self::Range(start, end) => remote >= start.as_str() && remote <= end.as_str(),
            Self::Exact(addr) => addr == remote,
            Self::Invalid(_) => false,
        }
    }
}

/// Parsed IP allow-list expression.
///
/// The expression is a comma-separated list; a request passes if any term
/// matches. An empty expression places no restriction.
///
/// # Example
/// ```
/// use axum_authgate::IpAllowList;
///
/// let list = IpAllowList::parse("192.168.3.1,10.0.0.0/16,192.168.50.3-192.168.50.6");
/// assert!(list.allows(Some("10.0.7.7")));
/// assert!(list.allows(Some("192.168.50.4")));
/// assert!(!list.allows(Some("172.16.0.1")));
/// assert!(!list.allows(None));
///
/// assert!(IpAllowList::any().allows(None));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IpAllowList {
    terms: Vec<IpTerm>,
    restricted: bool,
}

impl IpAllowList {
    /// An allow-list without restriction.
    pub fn any() -> Self {
        Self::default()
    }

    /// Parse an allow-list expression. Malformed terms are logged and kept as
    /// never-matching terms.
    pub fn parse(expr: &str) -> Self {
        if expr.trim().is_empty() {
            return Self::any();
        }
        let terms = expr
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(IpTerm::parse)
            .collect();
        Self {
            terms,
            restricted: true,
        }
    }

    /// Parse an optional expression; `None` is unrestricted.
    pub fn parse_opt(expr: Option<&str>) -> Self {
        expr.map(Self::parse).unwrap_or_default()
    }

    /// Whether this list restricts anything at all.
    pub fn is_restricted(&self) -> bool {
        self.restricted
    }

    /// The parsed terms.
    pub fn terms(&self) -> &[IpTerm] {
        &self.terms
    }

    /// Check a remote address against the list.
    ///
    /// An unknown or empty remote address never passes a restricted list.
    pub fn allows(&self, remote: Option<&str>) -> bool {
        if !self.restricted {
            return true;
        }
        match remote {
            Some(remote) if !remote.is_empty() => self.terms.iter().any(|t| t.matches(remote)),
            _ => false,
        }
    }
}

/// Check `remote_ip` against an allow-list expression in one step.
///
/// Parses `allow_expr` on every call; prefer a pre-parsed [`IpAllowList`]
/// on hot paths.
pub fn is_ip_allowed(remote_ip: &str, allow_expr: &str) -> bool {
    IpAllowList::parse(allow_expr).allows(Some(remote_ip))
}

/// Names used to locate a credential token and the client address.
///
/// Unset fields inherit from the table-level defaults when a
/// [`RuleTable`](crate::RuleTable) is built.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CredentialKeys {
    /// Cookie holding the token.
    pub cookie: Option<String>,
    /// Header holding the token.
    pub header: Option<String>,
    /// Query or path parameter holding the token.
    pub url_param: Option<String>,
    /// Scheme prefix stripped from the token, e.g. `Bearer`.
    pub strip_prefix: Option<String>,
    /// Header carrying the real client IP when behind a proxy.
    pub real_ip_header: Option<String>,
}

impl CredentialKeys {
    /// Create an empty set of keys.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the cookie name.
    pub fn cookie(mut self, name: impl Into<String>) -> Self {
        self.cookie = Some(name.into());
        self
    }

    /// Set the header name.
    pub fn header(mut self, name: impl Into<String>) -> Self {
        self.header = Some(name.into());
        self
    }

    /// Set the query/path parameter name.
    pub fn url_param(mut self, name: impl Into<String>) -> Self {
        self.url_param = Some(name.into());
        self
    }

    /// Set the prefix stripped from extracted tokens.
    pub fn strip_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.strip_prefix = Some(prefix.into());
        self
    }

    /// Set the real-IP header name.
    pub fn real_ip_header(mut self, name: impl Into<String>) -> Self {
        self.real_ip_header = Some(name.into());
        self
    }

    /// Fill every unset or empty field from `defaults`. Set fields win.
    pub fn inherit(mut self, defaults: &CredentialKeys) -> Self {
        fn fill(slot: &mut Option<String>, fallback: &Option<String>) {
            if slot.as_deref().map_or(true, str::is_empty) {
                *slot = fallback.clone().filter(|v| !v.is_empty());
            }
        }
        fill(&mut self.cookie, &defaults.cookie);
        fill(&mut self.header, &defaults.header);
        fill(&mut self.url_param, &defaults.url_param);
        fill(&mut self.strip_prefix, &defaults.strip_prefix);
        fill(&mut self.real_ip_header, &defaults.real_ip_header);
        self
    }
}

/// A single API rule inside a URL group.
#[derive(Debug, Clone)]
pub struct ApiRule {
    /// The configured pattern text.
    pub api: String,
    /// Compiled pattern.
    pub pattern: ApiPattern,
    /// Method filter.
    pub methods: MethodFilter,
    /// Mode adopted when this rule matches.
    pub mode: AuthMode,
    /// Opaque classification passed through to the decision callback.
    pub tag: String,
    /// Rule-level IP allow-list.
    pub ip_allow: IpAllowList,
}

impl ApiRule {
    /// Create a rule for `api` that accepts all methods with mode `refuse`.
    ///
    /// # Example
    /// ```
    /// use axum_authgate::{ApiRule, AuthMode};
    ///
    /// let rule = ApiRule::parse("users/*")
    ///     .unwrap()
    ///     .method("GET,POST")
    ///     .mode(AuthMode::Force)
    ///     .tag("user");
    /// assert!(rule.pattern.matches("users/7"));
    /// ```
    pub fn parse(api: impl Into<String>) -> Result<Self, regex::Error> {
        let api = api.into();
        let pattern = ApiPattern::parse(&api)?;
        Ok(Self {
            api,
            pattern,
            methods: MethodFilter::All,
            mode: AuthMode::Refuse,
            tag: String::new(),
            ip_allow: IpAllowList::any(),
        })
    }

    /// Set the method filter from a comma-separated list.
    pub fn method(mut self, methods: &str) -> Self {
        self.methods = MethodFilter::parse(methods);
        self
    }

    /// Set the mode.
    pub fn mode(mut self, mode: AuthMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the tag.
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = tag.into();
        self
    }

    /// Set the rule-level IP allow-list.
    pub fn ip_allow(mut self, expr: &str) -> Self {
        self.ip_allow = IpAllowList::parse(expr);
        self
    }
}
