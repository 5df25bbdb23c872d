//! Request-to-version resolution.
//!
//! Resolution runs in two stages. Extraction pulls a raw candidate string out
//! of the request using the configured [`DetectionStrategy`]. Resolution then
//! maps the candidate onto a registered definition: the default version when
//! there is no candidate, a direct lookup, a lookup with a `v` prefix, and
//! finally the fallback policy.

use crate::config::ApiVersioningConfig;
use crate::error::VersioningError;
use crate::registry::VersionRegistry;
use crate::request::ApiRequest;
use crate::version::VersionDefinition;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// Where the requested version is read from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionStrategy {
    /// A path segment such as `/api/v2/users`
    #[default]
    Uri,
    /// A request header such as `X-API-Version: v2`
    Header,
    /// A query parameter such as `?api_version=v2`
    Query,
    /// A vendor media type such as `Accept: application/vnd.api.v2+json`
    Accept,
}

/// What to substitute when the requested version or route is missing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FallbackStrategy {
    /// The nearest lower usable version
    #[default]
    Previous,
    /// The current version
    Latest,
    /// No fallback
    None,
}

/// Version used when a request names none.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DefaultVersion {
    /// The last active version in registration order
    Latest,
    Named(String),
}

impl DefaultVersion {
    pub fn parse(value: &str) -> Self {
        if value.eq_ignore_ascii_case("latest") {
            Self::Latest
        } else {
            Self::Named(value.to_string())
        }
    }
}

/// Compiled resolver settings.
#[derive(Debug, Clone)]
pub struct ResolverSettings {
    pub strategy: DetectionStrategy,
    pub uri_pattern: Regex,
    pub header_name: String,
    pub query_parameter: String,
    pub accept_pattern: Regex,
    pub default_version: DefaultVersion,
    pub fallback_enabled: bool,
    pub fallback_strategy: FallbackStrategy,
}

impl ResolverSettings {
    pub fn from_config(config: &ApiVersioningConfig) -> Result<Self, VersioningError> {
        let accept = &config.strategies.accept;

        Ok(Self {
            strategy: config.strategy,
            uri_pattern: compile_uri_pattern(&config.strategies.uri.pattern)?,
            header_name: config.strategies.header.name.clone(),
            query_parameter: config.strategies.query.parameter.clone(),
            accept_pattern: compile_accept_pattern(&accept.pattern, &accept.vendor)?,
            default_version: DefaultVersion::parse(&config.default_version),
            fallback_enabled: config.fallback.enabled,
            fallback_strategy: config.fallback.strategy,
        })
    }
}

/// The per-request outcome of resolution.
#[derive(Debug, Clone)]
pub struct ResolvedVersion {
    /// Raw candidate extracted from the request, if any
    pub requested: Option<String>,
    pub definition: Arc<VersionDefinition>,
    /// Whether the fallback policy produced the definition
    pub was_fallback: bool,
}

impl ResolvedVersion {
    pub fn name(&self) -> &str {
        self.definition.name()
    }
}

/// Resolves requests to registered version definitions.
pub struct VersionResolver {
    registry: Arc<VersionRegistry>,
    settings: ResolverSettings,
}

impl VersionResolver {
    pub fn new(registry: Arc<VersionRegistry>, settings: ResolverSettings) -> Self {
        Self { registry, settings }
    }

    pub fn settings(&self) -> &ResolverSettings {
        &self.settings
    }

    /// The raw version string the client asked for, before any lookup.
    pub fn requested_version(&self, request: &ApiRequest) -> Option<String> {
        let candidate = match self.settings.strategy {
            DetectionStrategy::Uri => request
                .segments()
                .find(|segment| self.settings.uri_pattern.is_match(segment))
                .map(str::to_string),
            DetectionStrategy::Header => request
                .header(&self.settings.header_name)
                .map(str::to_string),
            DetectionStrategy::Query => request.query_param(&self.settings.query_parameter),
            DetectionStrategy::Accept => request.header("Accept").and_then(|accept| {
                self.settings
                    .accept_pattern
                    .captures(accept)
                    .and_then(|caps| caps.get(1))
                    .map(|number| format!("v{}", number.as_str()))
            }),
        };

        candidate
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
    }

    /// Resolve a request to a definition, or `None` when nothing matches.
    pub fn resolve(&self, request: &ApiRequest) -> Option<ResolvedVersion> {
        let requested = self.requested_version(request);
        self.resolve_candidate(requested.as_deref())
    }

    /// Resolve an already extracted candidate.
    pub fn resolve_candidate(&self, candidate: Option<&str>) -> Option<ResolvedVersion> {
        let Some(candidate) = candidate else {
            let definition = self.default_version()?;
            debug!(version = %definition.name(), "No version requested, using default");
            return Some(ResolvedVersion {
                requested: None,
                definition,
                was_fallback: false,
            });
        };

        let found = self
            .registry
            .get(candidate)
            .or_else(|| self.registry.get(&format!("v{}", candidate)));

        if let Some(definition) = found {
            return Some(ResolvedVersion {
                requested: Some(candidate.to_string()),
                definition,
                was_fallback: false,
            });
        }

        let definition = self.apply_fallback(candidate)?;
        debug!(
            requested = %candidate,
            fallback = %definition.name(),
            "Requested version not registered, using fallback"
        );
        Some(ResolvedVersion {
            requested: Some(candidate.to_string()),
            definition,
            was_fallback: true,
        })
    }

    fn default_version(&self) -> Option<Arc<VersionDefinition>> {
        match &self.settings.default_version {
            DefaultVersion::Latest => self.registry.latest_active(),
            DefaultVersion::Named(name) => self.registry.get(name),
        }
    }

    fn apply_fallback(&self, candidate: &str) -> Option<Arc<VersionDefinition>> {
        if !self.settings.fallback_enabled {
            return None;
        }

        match self.settings.fallback_strategy {
            FallbackStrategy::Previous => self.previous_usable(candidate),
            FallbackStrategy::Latest => self.registry.current(),
            FallbackStrategy::None => None,
        }
    }

    /// The nearest lower registered version that is not sunset.
    fn previous_usable(&self, candidate: &str) -> Option<Arc<VersionDefinition>> {
        let number = version_number(candidate)?;
        self.registry.usable_below(number).into_iter().next()
    }
}

/// Numeric part of a version token, taken by stripping every non-digit.
///
/// Lenient: `"version2"` and `"vX2"` both yield 2. Tokens that
/// are not of the `v<digits>` form are logged so they can be monitored.
pub fn version_number(candidate: &str) -> Option<u32> {
    let digits: String = candidate.chars().filter(char::is_ascii_digit).collect();
    let number = digits.parse().ok()?;

    let well_formed = candidate
        .strip_prefix(['v', 'V'])
        .unwrap_or(candidate)
        .chars()
        .all(|c| c.is_ascii_digit());
    if !well_formed {
        warn!(candidate = %candidate, number, "Malformed version token, using numeric part");
    }

    Some(number)
}

/// Compile a URI segment pattern such as `v{version}` into an anchored,
/// case-insensitive regex.
pub fn compile_uri_pattern(pattern: &str) -> Result<Regex, VersioningError> {
    let body = regex::escape(pattern).replace(r"\{version\}", r"\d+");
    build_regex(pattern, &format!("^{}$", body))
}

/// Compile an Accept media type pattern, capturing the version number.
pub fn compile_accept_pattern(pattern: &str, vendor: &str) -> Result<Regex, VersioningError> {
    let body = regex::escape(pattern)
        .replace(r"\{vendor\}", &regex::escape(vendor))
        .replace(r"\{version\}", r"v(\d+)");
    build_regex(pattern, &body)
}

fn build_regex(pattern: &str, source: &str) -> Result<Regex, VersioningError> {
    RegexBuilder::new(source)
        .case_insensitive(true)
        .build()
        .map_err(|e| VersioningError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::registry::RegistrySettings;
    use crate::router::{no_routes, MemoryRouter};
    use chrono::{DateTime, Duration, Utc};

    fn now() -> DateTime<Utc> {
        "2025-06-15T12:00:00Z".parse().unwrap()
    }

    fn registry(names: &[&str]) -> Arc<VersionRegistry> {
        let registry = VersionRegistry::new(
            RegistrySettings::default(),
            Arc::new(MemoryRouter::new()),
            Arc::new(FixedClock::new(now())),
        );
        for name in names {
            registry.register(*name, no_routes()).unwrap();
        }
        Arc::new(registry)
    }

    fn resolver_with(
        registry: Arc<VersionRegistry>,
        configure: impl FnOnce(&mut ApiVersioningConfig),
    ) -> VersionResolver {
        let mut config = ApiVersioningConfig::default();
        configure(&mut config);
        VersionResolver::new(registry, ResolverSettings::from_config(&config).unwrap())
    }

    #[test]
    fn test_uri_extraction() {
        let resolver = resolver_with(registry(&["v1"]), |_| {});

        assert_eq!(
            resolver.requested_version(&ApiRequest::get("/api/v2/users")),
            Some("v2".to_string())
        );
        assert_eq!(
            resolver.requested_version(&ApiRequest::get("/api/V3/users")),
            Some("V3".to_string())
        );
        assert_eq!(resolver.requested_version(&ApiRequest::get("/api/users")), None);
        assert_eq!(
            resolver.requested_version(&ApiRequest::get("/api/version2/users")),
            None
        );
    }

    #[test]
    fn test_header_extraction() {
        let resolver = resolver_with(registry(&["v1"]), |c| {
            c.strategy = DetectionStrategy::Header;
        });

        let request = ApiRequest::get("/api/users").with_header("X-API-Version", "2");
        assert_eq!(resolver.requested_version(&request), Some("2".to_string()));

        let empty = ApiRequest::get("/api/users").with_header("X-API-Version", "  ");
        assert_eq!(resolver.requested_version(&empty), None);
    }

    #[test]
    fn test_custom_header_name() {
        let resolver = resolver_with(registry(&["v1"]), |c| {
            c.strategy = DetectionStrategy::Header;
            c.strategies.header.name = "Api-Version".to_string();
        });

        let request = ApiRequest::get("/api/users")
            .with_header("X-API-Version", "v9")
            .with_header("Api-Version", "v1");
        assert_eq!(resolver.requested_version(&request), Some("v1".to_string()));
    }

    #[test]
    fn test_query_extraction() {
        let resolver = resolver_with(registry(&["v1"]), |c| {
            c.strategy = DetectionStrategy::Query;
        });

        let request = ApiRequest::get("/api/users?api_version=v1&page=2");
        assert_eq!(resolver.requested_version(&request), Some("v1".to_string()));
        assert_eq!(resolver.requested_version(&ApiRequest::get("/api/users")), None);
    }

    #[test]
    fn test_accept_extraction() {
        let resolver = resolver_with(registry(&["v1"]), |c| {
            c.strategy = DetectionStrategy::Accept;
            c.strategies.accept.vendor = "acme".to_string();
        });

        let request =
            ApiRequest::get("/api/users").with_header("Accept", "application/vnd.acme.v2+json");
        assert_eq!(resolver.requested_version(&request), Some("v2".to_string()));

        let other_vendor =
            ApiRequest::get("/api/users").with_header("Accept", "application/vnd.api.v2+json");
        assert_eq!(resolver.requested_version(&other_vendor), None);

        let plain = ApiRequest::get("/api/users").with_header("Accept", "application/json");
        assert_eq!(resolver.requested_version(&plain), None);
    }

    #[test]
    fn test_no_candidate_uses_latest_active() {
        let registry = registry(&["v1", "v2", "v3"]);
        registry.update("v3", |v| {
            v.beta();
        });
        let resolver = resolver_with(registry.clone(), |_| {});

        let resolved = resolver.resolve(&ApiRequest::get("/api/users")).unwrap();
        assert_eq!(resolved.name(), "v2");
        assert_eq!(resolved.name(), registry.latest_active().unwrap().name());
        assert!(!resolved.was_fallback);
        assert!(resolved.requested.is_none());
    }

    #[test]
    fn test_no_candidate_uses_named_default() {
        let resolver = resolver_with(registry(&["v1", "v2"]), |c| {
            c.default_version = "v1".to_string();
        });
        let resolved = resolver.resolve(&ApiRequest::get("/api/users")).unwrap();
        assert_eq!(resolved.name(), "v1");
    }

    #[test]
    fn test_no_candidate_and_no_active_version() {
        let registry = registry(&["v1"]);
        registry.update("v1", |v| {
            v.deprecate(now());
        });
        let resolver = resolver_with(registry, |_| {});
        assert!(resolver.resolve(&ApiRequest::get("/api/users")).is_none());
    }

    #[test]
    fn test_bare_number_gets_v_prefix() {
        let resolver = resolver_with(registry(&["v1", "v2"]), |c| {
            c.strategy = DetectionStrategy::Header;
        });
        let request = ApiRequest::get("/api/users").with_header("X-API-Version", "2");
        let resolved = resolver.resolve(&request).unwrap();
        assert_eq!(resolved.name(), "v2");
        assert!(!resolved.was_fallback);
    }

    #[test]
    fn test_previous_fallback_is_monotonic() {
        let resolver = resolver_with(registry(&["v1", "v2", "v3"]), |_| {});
        let resolved = resolver.resolve(&ApiRequest::get("/api/v5/users")).unwrap();
        assert_eq!(resolved.name(), "v3");
        assert!(resolved.was_fallback);
        assert_eq!(resolved.requested.as_deref(), Some("v5"));
    }

    #[test]
    fn test_previous_fallback_skips_sunset() {
        let registry = registry(&["v1", "v3", "v4"]);
        registry.update("v4", |v| {
            v.sunset(now() - Duration::days(1));
        });
        let resolver = resolver_with(registry, |_| {});

        let resolved = resolver.resolve(&ApiRequest::get("/api/v5/users")).unwrap();
        assert_eq!(resolved.name(), "v3");
    }

    #[test]
    fn test_previous_fallback_exhausted() {
        let resolver = resolver_with(registry(&["v3"]), |_| {});
        assert!(resolver.resolve(&ApiRequest::get("/api/v2/users")).is_none());
    }

    #[test]
    fn test_previous_fallback_with_huge_candidate() {
        let resolver = resolver_with(registry(&["v1", "v2"]), |_| {});

        let started = std::time::Instant::now();
        let resolved = resolver
            .resolve(&ApiRequest::get("/api/v4000000000/users"))
            .unwrap();
        assert_eq!(resolved.name(), "v2");
        assert!(resolved.was_fallback);
        assert!(started.elapsed() < std::time::Duration::from_secs(1));
    }

    #[test]
    fn test_latest_fallback_uses_current() {
        let registry = registry(&["v1", "v2", "v3"]);
        let resolver = resolver_with(registry.clone(), |c| {
            c.fallback.strategy = FallbackStrategy::Latest;
        });
        let resolved = resolver.resolve(&ApiRequest::get("/api/v99/users")).unwrap();
        assert_eq!(resolved.name(), "v1");
        assert!(resolved.was_fallback);

        registry.update("v1", |v| {
            v.deprecate(now());
        });
        let resolved = resolver.resolve(&ApiRequest::get("/api/v99/users")).unwrap();
        assert_eq!(resolved.name(), "v2");
    }

    #[test]
    fn test_fallback_disabled_or_none() {
        let disabled = resolver_with(registry(&["v1"]), |c| {
            c.fallback.enabled = false;
        });
        assert!(disabled.resolve(&ApiRequest::get("/api/v99/users")).is_none());

        let none = resolver_with(registry(&["v1"]), |c| {
            c.fallback.strategy = FallbackStrategy::None;
        });
        assert!(none.resolve(&ApiRequest::get("/api/v99/users")).is_none());
    }

    #[test]
    fn test_lenient_numeric_fallback() {
        let resolver = resolver_with(registry(&["v1"]), |c| {
            c.strategy = DetectionStrategy::Header;
        });
        let request = ApiRequest::get("/api/users").with_header("X-API-Version", "version2");
        let resolved = resolver.resolve(&request).unwrap();
        assert_eq!(resolved.name(), "v1");
        assert!(resolved.was_fallback);
    }

    #[test]
    fn test_version_number() {
        assert_eq!(version_number("v12"), Some(12));
        assert_eq!(version_number("V3"), Some(3));
        assert_eq!(version_number("version2"), Some(2));
        assert_eq!(version_number("vX2"), Some(2));
        assert_eq!(version_number("latest"), None);
    }

    #[test]
    fn test_compile_patterns() {
        let uri = compile_uri_pattern("v{version}").unwrap();
        assert!(uri.is_match("v1"));
        assert!(uri.is_match("V10"));
        assert!(!uri.is_match("v1beta"));

        let dotted = compile_uri_pattern("api.v{version}").unwrap();
        assert!(dotted.is_match("api.v2"));
        assert!(!dotted.is_match("apixv2"));

        let accept =
            compile_accept_pattern("application/vnd.{vendor}.{version}+json", "my.co").unwrap();
        let caps = accept.captures("application/vnd.my.co.v7+json").unwrap();
        assert_eq!(&caps[1], "7");
    }
}
