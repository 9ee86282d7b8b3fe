//! Configuration document for the authorization gate.
//!
//! Rules are usually kept in a YAML file next to the service, but the same
//! document can be written in TOML.
//!
//! # Example YAML Format
//!
//! ```yaml
//! context_path: /svc
//! default_mode: refuse
//! header_auth_key: Authorization
//! cookie_auth_key: auth_token
//! auth_info_header: Bearer
//! trace:
//!   trace_id_key: X-Trace-Id
//!   trace_ts_key: X-Trace-Ts
//! groups:
//!   - uri: api
//!     default_mode: force
//!     ip_allow: 10.0.0.0/8,127.0.0.1
//!     apis:
//!       - api: health
//!         method: GET
//!         mode: open
//!       - api: ^/?users/\d+$
//!         method: GET,PUT
//!         mode: force
//!         tag: user
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use axum_authgate::RuleTable;
//!
//! let table = RuleTable::from_yaml_file("config/auth.yaml").unwrap();
//! ```

use crate::rule::{ApiRule, AuthMode, CredentialKeys, IpAllowList, MethodFilter};
use crate::table::{RuleTable, UrlGroup};
use crate::trace::TraceSettings;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Configuration file structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Skip rule evaluation entirely and only stamp trace headers.
    #[serde(default)]
    pub open_mode: bool,
    /// Service context path; relative group uris are joined onto it.
    #[serde(default)]
    pub context_path: String,
    /// Mode used when no group matches. Unknown or missing values are `refuse`.
    #[serde(default)]
    pub default_mode: Option<String>,
    /// Trace header settings.
    #[serde(default)]
    pub trace: TraceConfig,
    /// Table-level credential keys.
    #[serde(flatten)]
    pub credentials: CredentialConfig,
    /// URL groups in match order.
    #[serde(default)]
    pub groups: Vec<GroupConfig>,
}

/// Trace header configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TraceConfig {
    /// Header the trace id is read from. Defaults to `trace_id_key`.
    #[serde(default)]
    pub trace_id_get_key: Option<String>,
    /// Header the trace id is written to. Defaults to `trace_id_get_key`.
    #[serde(default)]
    pub trace_id_key: Option<String>,
    /// Header receiving the request timestamp in Unix milliseconds.
    #[serde(default)]
    pub trace_ts_key: Option<String>,
    /// Header receiving the request path relative to the server root,
    /// e.g. `svc/api/x`.
    #[serde(default)]
    pub uri_header_key: Option<String>,
    /// Write the headers to the response instead of the request.
    #[serde(default)]
    pub to_response_header: bool,
}

/// Credential lookup keys, shared by the top level and each group.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CredentialConfig {
    /// Header holding the token.
    #[serde(default)]
    pub header_auth_key: Option<String>,
    /// Cookie holding the token.
    #[serde(default)]
    pub cookie_auth_key: Option<String>,
    /// Query or path parameter holding the token.
    #[serde(default)]
    pub url_param_auth_key: Option<String>,
    /// Prefix stripped from the token, e.g. `Bearer`.
    #[serde(default)]
    pub auth_info_header: Option<String>,
    /// Header carrying the real client IP behind a proxy.
    #[serde(default)]
    pub agent_real_ip_header: Option<String>,
}

impl CredentialConfig {
    fn to_keys(&self) -> CredentialKeys {
        CredentialKeys {
            cookie: self.cookie_auth_key.clone(),
            header: self.header_auth_key.clone(),
            url_param: self.url_param_auth_key.clone(),
            strip_prefix: self.auth_info_header.clone(),
            real_ip_header: self.agent_real_ip_header.clone(),
        }
    }
}

/// A URL group.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GroupConfig {
    /// Group uri. A leading `/` makes it absolute.
    #[serde(default)]
    pub uri: String,
    /// Mode when no api matches or the method is rejected.
    #[serde(default)]
    pub default_mode: Option<String>,
    /// Group-level IP allow-list, e.g.
    /// `192.168.3.1,10.0.1.1/16,192.168.50.3-192.168.50.6`.
    #[serde(default)]
    pub ip_allow: Option<String>,
    /// Credential key overrides.
    #[serde(flatten)]
    pub credentials: CredentialConfig,
    /// Api rules in match order.
    #[serde(default)]
    pub apis: Vec<ApiConfig>,
}

/// A single api rule.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Path below the group. `^...` or `...$` is a regex; otherwise a glob
    /// with optional leading and trailing `*`.
    pub api: String,
    /// Comma-separated methods, or `ALL`.
    #[serde(default)]
    pub method: Option<String>,
    /// `open`, `force`, `may` or `refuse`.
    #[serde(default)]
    pub mode: Option<String>,
    /// Opaque tag passed to the decision callback.
    #[serde(default)]
    pub tag: Option<String>,
    /// Rule-level IP allow-list.
    #[serde(default)]
    pub ip_allow: Option<String>,
}

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// YAML parsing error.
    #[error("Failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    /// TOML parsing error.
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// File I/O error.
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// A group uri could not be joined into an absolute path.
    #[error("Invalid group uri '{uri}': {reason}")]
    InvalidUri {
        /// The configured uri.
        uri: String,
        /// Why the join failed.
        reason: String,
    },

    /// A regex api pattern failed to compile.
    #[error("Invalid api pattern '{pattern}': {source}")]
    InvalidPattern {
        /// The configured pattern.
        pattern: String,
        /// Compilation error.
        source: regex::Error,
    },

    /// A configured header name is not a valid HTTP header name.
    #[error("Invalid header name '{0}'")]
    InvalidHeader(String),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl AuthConfig {
    /// Parse configuration from a YAML string.
    ///
    /// # Example
    /// ```
    /// use axum_authgate::AuthConfig;
    ///
    /// let yaml = r#"
    /// default_mode: refuse
    /// groups:
    ///   - uri: /api
    ///     default_mode: force
    ///     apis:
    ///       - api: health
    ///         mode: open
    /// "#;
    ///
    /// let config = AuthConfig::from_yaml(yaml).unwrap();
    /// assert_eq!(config.groups[0].apis.len(), 1);
    /// ```
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: AuthConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let config: AuthConfig = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file; `.toml` files are read as TOML,
    /// anything else as YAML.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let is_toml = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
        if is_toml {
            Self::from_toml(&contents)
        } else {
            Self::from_yaml(&contents)
        }
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        for (i, group) in self.groups.iter().enumerate() {
            for (j, api) in group.apis.iter().enumerate() {
                if api.api.is_empty() {
                    return Err(ConfigError::Invalid(format!(
                        "Group {} ('{}') api {}: api pattern must not be empty",
                        i, group.uri, j
                    )));
                }
            }
        }
        TraceSettings::from_config(&self.trace)?;
        Ok(())
    }

    /// Convert configuration to a [`RuleTable`].
    ///
    /// In open mode the groups are ignored and [`RuleTable::open`] is
    /// returned.
    pub fn to_table(&self) -> Result<RuleTable, ConfigError> {
        if self.open_mode {
            return Ok(RuleTable::open());
        }

        let mut builder = RuleTable::builder()
            .context_path(self.context_path.clone())
            .default_mode(AuthMode::parse_opt(self.default_mode.as_deref()))
            .credentials(self.credentials.to_keys());

        for group in &self.groups {
            builder = builder.group(group_config_to_group(group)?);
        }

        let table = builder.build()?;
        tracing::info!(
            groups = table.groups().len(),
            default_mode = %table.default_mode(),
            context_path = table.context_path(),
            "Authorization rule table loaded"
        );
        Ok(table)
    }

    /// Trace header settings for the gate.
    pub fn trace_settings(&self) -> Result<TraceSettings, ConfigError> {
        TraceSettings::from_config(&self.trace)
    }
}

/// Convert a GroupConfig to a UrlGroup.
fn group_config_to_group(config: &GroupConfig) -> Result<UrlGroup, ConfigError> {
    let mut group = UrlGroup::new(config.uri.clone())
        .default_mode(AuthMode::parse_opt(config.default_mode.as_deref()))
        .credentials(config.credentials.to_keys());
    group.ip_allow = IpAllowList::parse_opt(config.ip_allow.as_deref());

    for api in &config.apis {
        group = group.rule(api_config_to_rule(api)?);
    }
    Ok(group)
}

/// Convert an ApiConfig to an ApiRule.
fn api_config_to_rule(config: &ApiConfig) -> Result<ApiRule, ConfigError> {
    let mut rule = ApiRule::parse(config.api.clone()).map_err(|source| ConfigError::InvalidPattern {
        pattern: config.api.clone(),
        source,
    })?;
    rule.methods = MethodFilter::parse(config.method.as_deref().unwrap_or_default());
    rule.mode = AuthMode::parse_opt(config.mode.as_deref());
    rule.tag = config.tag.clone().unwrap_or_default();
    rule.ip_allow = IpAllowList::parse_opt(config.ip_allow.as_deref());
    Ok(rule)
}

impl RuleTable {
    /// Create a RuleTable from a YAML configuration string.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        AuthConfig::from_yaml(yaml)?.to_table()
    }

    /// Create a RuleTable from a YAML configuration file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        AuthConfig::from_file(path)?.to_table()
    }

    /// Create a RuleTable from a TOML configuration string.
    ///
    /// # Example
    /// ```
    /// use axum_authgate::{AuthMode, RuleTable};
    ///
    /// const CONFIG: &str = r#"
    /// default_mode = "open"
    ///
    /// [[groups]]
    /// uri = "/admin"
    /// default_mode = "refuse"
    ///
    /// [[groups.apis]]
    /// api = "login"
    /// method = "POST"
    /// mode = "open"
    /// "#;
    ///
    /// let table = RuleTable::from_toml(CONFIG).unwrap();
    /// assert_eq!(table.default_mode(), AuthMode::Open);
    /// assert_eq!(table.groups()[0].prefix(), "/admin");
    /// ```
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        AuthConfig::from_toml(toml_str)?.to_table()
    }
}
