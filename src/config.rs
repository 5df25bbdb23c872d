//! Configuration for API version lifecycle management.
//!
//! Declares versions, the detection strategy, fallback and sunset policies,
//! response headers, usage tracking and metrics.

use crate::resolver::{compile_uri_pattern, DetectionStrategy, FallbackStrategy};
use crate::version::{parse_version_date, VersionStatus};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;

/// Main configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ApiVersioningConfig {
    /// How the requested version is detected
    #[serde(default)]
    pub strategy: DetectionStrategy,

    /// Per-strategy settings
    #[serde(default)]
    pub strategies: StrategiesConfig,

    /// Version used when the request names none: "latest" or a version name
    #[serde(default = "default_latest")]
    pub default_version: String,

    /// Declared versions, in registration order
    #[serde(default)]
    pub versions: Vec<VersionConfig>,

    #[serde(default)]
    pub fallback: FallbackConfig,

    #[serde(default)]
    pub sunset: SunsetConfig,

    #[serde(default)]
    pub headers: HeadersConfig,

    #[serde(default)]
    pub documentation: DocumentationConfig,

    #[serde(default)]
    pub middleware: MiddlewareConfig,

    #[serde(default)]
    pub tracking: TrackingConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Origin used to build absolute successor URLs
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Reject re-registration of an existing version instead of replacing it
    #[serde(default)]
    pub strict: bool,
}

impl Default for ApiVersioningConfig {
    fn default() -> Self {
        Self {
            strategy: DetectionStrategy::default(),
            strategies: StrategiesConfig::default(),
            default_version: default_latest(),
            versions: Vec::new(),
            fallback: FallbackConfig::default(),
            sunset: SunsetConfig::default(),
            headers: HeadersConfig::default(),
            documentation: DocumentationConfig::default(),
            middleware: MiddlewareConfig::default(),
            tracking: TrackingConfig::default(),
            metrics: MetricsConfig::default(),
            base_url: default_base_url(),
            strict: false,
        }
    }
}

impl ApiVersioningConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse and validate configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> anyhow::Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        let uri_pattern = compile_uri_pattern(&self.strategies.uri.pattern)?;

        let mut seen = HashSet::new();
        for version in &self.versions {
            version.validate()?;

            if !seen.insert(version.name.as_str()) {
                anyhow::bail!("Version '{}' is declared more than once", version.name);
            }

            if self.strategy == DetectionStrategy::Uri && !uri_pattern.is_match(&version.name) {
                anyhow::bail!(
                    "Version name '{}' does not match URI pattern '{}'",
                    version.name,
                    self.strategies.uri.pattern
                );
            }
        }

        for version in &self.versions {
            if let Some(successor) = &version.successor {
                if !seen.contains(successor.as_str()) {
                    tracing::warn!(
                        version = %version.name,
                        successor = %successor,
                        "Successor is not declared in configuration"
                    );
                }
            }
        }

        if self.default_version != "latest"
            && !self.versions.is_empty()
            && !seen.contains(self.default_version.as_str())
        {
            tracing::warn!(
                default_version = %self.default_version,
                "Default version is not declared in configuration"
            );
        }

        if !(400..=599).contains(&self.sunset.status_code) {
            anyhow::bail!(
                "Sunset status code must be an HTTP error status, got {}",
                self.sunset.status_code
            );
        }

        url::Url::parse(&self.base_url)
            .map_err(|e| anyhow::anyhow!("Invalid base_url '{}': {}", self.base_url, e))?;

        if let Some(docs) = &self.documentation.base_url {
            url::Url::parse(docs).map_err(|e| {
                anyhow::anyhow!("Invalid documentation base_url '{}': {}", docs, e)
            })?;
        }

        Ok(())
    }

    /// Declared versions, with documentation links defaulted from
    /// `documentation.base_url` where an entry names none.
    pub fn documented_versions(&self) -> Vec<VersionConfig> {
        self.versions
            .iter()
            .map(|entry| {
                let mut entry = entry.clone();
                if entry.documentation.is_none() {
                    entry.documentation = self.documentation.url_for(&entry.name);
                }
                entry
            })
            .collect()
    }

    /// Migration guide URL configured for a version.
    pub fn migration_guide(&self, version: &str) -> Option<&str> {
        self.documentation
            .migration_guides
            .get(version)
            .map(String::as_str)
    }
}

/// Configuration for a single declared version.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VersionConfig {
    /// Unique version name, e.g. "v1"
    pub name: String,

    /// Reference to the route set for this version
    #[serde(default)]
    pub routes: Option<String>,

    /// Lifecycle status (default: active)
    #[serde(default)]
    pub status: Option<VersionStatus>,

    /// Deprecation date (RFC 3339 or YYYY-MM-DD)
    #[serde(default)]
    pub deprecated_at: Option<String>,

    /// Sunset date (RFC 3339 or YYYY-MM-DD)
    #[serde(default)]
    pub sunset_at: Option<String>,

    /// Recommended replacement version
    #[serde(default)]
    pub successor: Option<String>,

    /// Link to version documentation
    #[serde(default)]
    pub documentation: Option<String>,

    /// Requests per minute
    #[serde(default)]
    pub rate_limit: Option<u32>,

    /// Version-specific middleware, a single name or a list
    #[serde(default)]
    pub middleware: MiddlewareList,

    /// Route name prefix, e.g. "api.v1."
    #[serde(default)]
    pub route_name: Option<String>,
}

impl VersionConfig {
    /// Validate the version entry.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.name.trim().is_empty() {
            anyhow::bail!("Version name cannot be empty");
        }

        if self.rate_limit == Some(0) {
            anyhow::bail!("Rate limit must be greater than 0 for version: {}", self.name);
        }

        let deprecated_at = self
            .deprecated_at
            .as_deref()
            .map(parse_version_date)
            .transpose()?;
        let sunset_at = self
            .sunset_at
            .as_deref()
            .map(parse_version_date)
            .transpose()?;

        if let (Some(deprecated), Some(sunset)) = (deprecated_at, sunset_at) {
            if sunset < deprecated {
                anyhow::bail!(
                    "Sunset date precedes deprecation date for version: {}",
                    self.name
                );
            }
        }

        // Warn when a still-deprecated version has already passed its sunset date
        if let (Some(sunset), Some(VersionStatus::Deprecated)) = (sunset_at, self.status) {
            if sunset < Utc::now() {
                tracing::warn!(
                    version = %self.name,
                    sunset = %sunset,
                    "Sunset date is in the past but status is still 'deprecated'"
                );
            }
        }

        Ok(())
    }
}

/// Middleware given either as a single name or as a list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MiddlewareList {
    One(String),
    Many(Vec<String>),
}

impl Default for MiddlewareList {
    fn default() -> Self {
        Self::Many(Vec::new())
    }
}

impl MiddlewareList {
    /// Normalize to an ordered list.
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            Self::One(name) => vec![name.clone()],
            Self::Many(names) => names.clone(),
        }
    }
}

/// Per-strategy settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StrategiesConfig {
    #[serde(default)]
    pub uri: UriStrategyConfig,
    #[serde(default)]
    pub header: HeaderStrategyConfig,
    #[serde(default)]
    pub query: QueryStrategyConfig,
    #[serde(default)]
    pub accept: AcceptStrategyConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UriStrategyConfig {
    /// Path prefix before the version segment ("" for none)
    #[serde(default = "default_prefix")]
    pub prefix: String,

    /// Version segment pattern, `{version}` stands for the number
    #[serde(default = "default_uri_pattern")]
    pub pattern: String,

    /// Restrict version routes to this host
    #[serde(default)]
    pub domain: Option<String>,
}

impl Default for UriStrategyConfig {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
            pattern: default_uri_pattern(),
            domain: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HeaderStrategyConfig {
    #[serde(default = "default_version_header")]
    pub name: String,
}

impl Default for HeaderStrategyConfig {
    fn default() -> Self {
        Self {
            name: default_version_header(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QueryStrategyConfig {
    #[serde(default = "default_query_parameter")]
    pub parameter: String,
}

impl Default for QueryStrategyConfig {
    fn default() -> Self {
        Self {
            parameter: default_query_parameter(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AcceptStrategyConfig {
    /// Media type pattern with `{vendor}` and `{version}` placeholders
    #[serde(default = "default_accept_pattern")]
    pub pattern: String,

    #[serde(default = "default_vendor")]
    pub vendor: String,
}

impl Default for AcceptStrategyConfig {
    fn default() -> Self {
        Self {
            pattern: default_accept_pattern(),
            vendor: default_vendor(),
        }
    }
}

/// Fallback when the requested version or route is missing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FallbackConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub strategy: FallbackStrategy,

    /// Add `X-API-Version-Fallback` to fallback redirects
    #[serde(default = "default_true")]
    pub add_header: bool,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            strategy: FallbackStrategy::default(),
            add_header: true,
        }
    }
}

/// What to do with requests to sunset versions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SunsetAction {
    /// Reject with the configured status code (default)
    #[default]
    Reject,
    /// Serve the request and log a warning
    Warn,
    /// Serve the request normally
    Allow,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SunsetConfig {
    #[serde(default)]
    pub action: SunsetAction,

    /// HTTP status code for rejected requests (default: 410 Gone)
    #[serde(default = "default_gone_code")]
    pub status_code: u16,

    /// Include the migration guide URL in sunset responses
    #[serde(default = "default_true")]
    pub include_migration_url: bool,
}

impl Default for SunsetConfig {
    fn default() -> Self {
        Self {
            action: SunsetAction::default(),
            status_code: default_gone_code(),
            include_migration_url: true,
        }
    }
}

/// Response header settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HeadersConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub include: HeaderIncludes,
}

impl Default for HeadersConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            include: HeaderIncludes::default(),
        }
    }
}

/// Individual header toggles.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HeaderIncludes {
    /// X-API-Version
    #[serde(default = "default_true")]
    pub version: bool,
    /// X-API-Version-Status
    #[serde(default = "default_true")]
    pub status: bool,
    /// Deprecation
    #[serde(default = "default_true")]
    pub deprecation: bool,
    /// Sunset
    #[serde(default = "default_true")]
    pub sunset: bool,
    /// Link rel="successor-version"
    #[serde(default = "default_true")]
    pub successor_link: bool,
}

impl Default for HeaderIncludes {
    fn default() -> Self {
        Self {
            version: true,
            status: true,
            deprecation: true,
            sunset: true,
            successor_link: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DocumentationConfig {
    /// Versions without their own documentation link get `{base_url}/{name}`
    #[serde(default)]
    pub base_url: Option<String>,

    /// Version name -> migration guide URL
    #[serde(default)]
    pub migration_guides: HashMap<String, String>,
}

impl DocumentationConfig {
    /// Documentation link derived from `base_url`.
    pub fn url_for(&self, version: &str) -> Option<String> {
        self.base_url
            .as_deref()
            .map(|base| format!("{}/{}", base.trim_end_matches('/'), version))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MiddlewareConfig {
    /// Middleware applied to every version group, before version-specific ones
    #[serde(default = "default_global_middleware")]
    pub global: Vec<String>,
}

impl Default for MiddlewareConfig {
    fn default() -> Self {
        Self {
            global: default_global_middleware(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackingDriver {
    #[default]
    Memory,
    Null,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    #[default]
    Hourly,
    Daily,
}

/// Usage tracking settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrackingConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub driver: TrackingDriver,

    #[serde(default)]
    pub aggregate: Aggregation,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetricsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Prefix for metric names
    #[serde(default = "default_metrics_prefix")]
    pub prefix: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            prefix: default_metrics_prefix(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_latest() -> String {
    "latest".to_string()
}

fn default_base_url() -> String {
    "http://localhost".to_string()
}

fn default_prefix() -> String {
    "api".to_string()
}

fn default_uri_pattern() -> String {
    "v{version}".to_string()
}

fn default_version_header() -> String {
    "X-API-Version".to_string()
}

fn default_query_parameter() -> String {
    "api_version".to_string()
}

fn default_accept_pattern() -> String {
    "application/vnd.{vendor}.{version}+json".to_string()
}

fn default_vendor() -> String {
    "api".to_string()
}

fn default_gone_code() -> u16 {
    410
}

fn default_global_middleware() -> Vec<String> {
    vec!["api".to_string()]
}

fn default_metrics_prefix() -> String {
    "api_version".to_string()
}
