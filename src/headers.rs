//! Version metadata headers and structured error bodies.
//!
//! Implements the response side of the versioning contract:
//! - `X-API-Version` and `X-API-Version-Status`
//! - Deprecation header (RFC 8594)
//! - Sunset header (RFC 7231 HTTP-date)
//! - Link header with `rel="successor-version"`

use crate::config::{ApiVersioningConfig, HeaderIncludes};
use crate::request::{ApiRequest, ApiResponse};
use crate::version::VersionDefinition;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde_json::{json, Value};
use url::Url;

pub const VERSION_HEADER: &str = "X-API-Version";
pub const STATUS_HEADER: &str = "X-API-Version-Status";
pub const DEPRECATION_HEADER: &str = "Deprecation";
pub const SUNSET_HEADER: &str = "Sunset";
pub const LINK_HEADER: &str = "Link";
pub const FALLBACK_HEADER: &str = "X-API-Version-Fallback";

/// Decorates responses with version metadata.
#[derive(Debug, Clone)]
pub struct VersionHeaders {
    enabled: bool,
    include: HeaderIncludes,
    version_in_path: bool,
    prefix: String,
    base_url: Url,
}

impl VersionHeaders {
    pub fn from_config(config: &ApiVersioningConfig) -> anyhow::Result<Self> {
        let base_url = Url::parse(&config.base_url)
            .map_err(|e| anyhow::anyhow!("Invalid base_url '{}': {}", config.base_url, e))?;

        Ok(Self {
            enabled: config.headers.enabled,
            include: config.headers.include.clone(),
            version_in_path: config.strategy == crate::resolver::DetectionStrategy::Uri,
            prefix: config.strategies.uri.prefix.trim_matches('/').to_string(),
            base_url,
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Headers describing `version`, in emission order. Empty when headers
    /// are disabled.
    pub fn for_version(
        &self,
        version: &VersionDefinition,
        request: Option<&ApiRequest>,
        now: DateTime<Utc>,
    ) -> Vec<(&'static str, String)> {
        let mut headers = Vec::new();
        if !self.enabled {
            return headers;
        }

        if self.include.version {
            headers.push((VERSION_HEADER, version.name().to_string()));
        }

        if self.include.status {
            headers.push((STATUS_HEADER, version.status_at(now).to_string()));
        }

        if self.include.deprecation {
            if let Some(date) = version.deprecation_date() {
                headers.push((DEPRECATION_HEADER, format_http_date(&date)));
            }
        }

        if self.include.sunset {
            if let Some(date) = version.sunset_date() {
                headers.push((SUNSET_HEADER, format_http_date(&date)));
            }
        }

        if self.include.successor_link {
            if let Some(successor) = version.successor() {
                let url = self.successor_url(version.name(), successor, request);
                headers.push((LINK_HEADER, format!("<{}>; rel=\"successor-version\"", url)));
            }
        }

        headers
    }

    /// Add version headers to a response. No-op when headers are disabled.
    pub fn decorate(
        &self,
        response: &mut ApiResponse,
        version: &VersionDefinition,
        request: Option<&ApiRequest>,
        now: DateTime<Utc>,
    ) {
        for (name, value) in self.for_version(version, request, now) {
            response.set_header(name, &value);
        }
    }

    /// Absolute URL of the successor version.
    ///
    /// With URI detection and a request at hand, the first whole-word
    /// occurrence of the current version in the request path is swapped for
    /// the successor. Otherwise the URL is `{prefix}/{successor}`.
    pub fn successor_url(
        &self,
        current: &str,
        successor: &str,
        request: Option<&ApiRequest>,
    ) -> String {
        if let (Some(request), true) = (request, self.version_in_path) {
            let pattern = format!(r"\b{}\b", regex::escape(current));
            if let Ok(token) = Regex::new(&pattern) {
                let path = request.path();
                let replaced = token.replacen(path, 1, regex::NoExpand(successor));
                if replaced != path {
                    return self.absolute(&replaced);
                }
            }
        }

        let path = if self.prefix.is_empty() {
            format!("/{}", successor)
        } else {
            format!("/{}/{}", self.prefix, successor)
        };
        self.absolute(&path)
    }

    fn absolute(&self, path: &str) -> String {
        self.base_url
            .join(path)
            .map(String::from)
            .unwrap_or_else(|_| path.to_string())
    }
}

/// Format a datetime as an HTTP date (RFC 7231).
/// Example: Sun, 06 Nov 1994 08:49:37 GMT
pub fn format_http_date(dt: &DateTime<Utc>) -> String {
    dt.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Parse an HTTP date to DateTime<Utc>.
pub fn parse_http_date(s: &str) -> Option<DateTime<Utc>> {
    use chrono::NaiveDateTime;

    if let Some(without_tz) = s.strip_suffix(" GMT") {
        if let Ok(naive) = NaiveDateTime::parse_from_str(without_tz, "%a, %d %b %Y %H:%M:%S") {
            return Some(naive.and_utc());
        }
    }

    // RFC 3339
    s.parse::<DateTime<Utc>>().ok()
}

/// Body of the 404 returned when no version resolves.
pub fn version_not_found_body(requested: Option<&str>, available: &[String]) -> Value {
    json!({
        "error": "version_not_found",
        "message": format!("API version '{}' not found.", requested.unwrap_or("default")),
        "requested_version": requested,
        "available_versions": available,
    })
}

/// Body of the response rejecting a sunset version.
pub fn sunset_body(version: &VersionDefinition, migration_guide: Option<&str>) -> Value {
    let mut message = format!("API version {} is no longer available.", version.name());
    if let Some(successor) = version.successor() {
        message.push_str(&format!(" Please upgrade to {}.", successor));
    }

    json!({
        "error": "api_version_sunset",
        "message": message,
        "sunset_date": version.sunset_date().map(|d| d.to_rfc3339()),
        "successor": version.successor(),
        "migration_guide": migration_guide,
    })
}

/// Informational body describing a deprecated version.
pub fn deprecation_body(version: &VersionDefinition) -> Value {
    json!({
        "warning": "api_version_deprecated",
        "message": format!("API version {} is deprecated.", version.name()),
        "deprecation_date": version.deprecation_date().map(|d| d.to_rfc3339()),
        "sunset_date": version.sunset_date().map(|d| d.to_rfc3339()),
        "successor": version.successor(),
        "documentation": version.documentation_url(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::DetectionStrategy;
    use chrono::Duration;

    fn now() -> DateTime<Utc> {
        "2025-06-15T12:00:00Z".parse().unwrap()
    }

    fn headers(configure: impl FnOnce(&mut ApiVersioningConfig)) -> VersionHeaders {
        let mut config = ApiVersioningConfig::default();
        configure(&mut config);
        VersionHeaders::from_config(&config).unwrap()
    }

    fn deprecated_v1() -> VersionDefinition {
        let mut version = VersionDefinition::new("v1");
        version
            .deprecate("2025-06-01T00:00:00Z".parse().unwrap())
            .sunset("2025-12-31T00:00:00Z".parse().unwrap())
            .set_successor("v2");
        version
    }

    #[test]
    fn test_active_version_headers() {
        let version = VersionDefinition::new("v1");
        let mut response = ApiResponse::ok("ok");
        headers(|_| {}).decorate(&mut response, &version, None, now());

        assert_eq!(response.header(VERSION_HEADER), Some("v1"));
        assert_eq!(response.header(STATUS_HEADER), Some("active"));
        assert!(!response.has_header(DEPRECATION_HEADER));
        assert!(!response.has_header(SUNSET_HEADER));
        assert!(!response.has_header(LINK_HEADER));
    }

    #[test]
    fn test_deprecated_version_headers() {
        let request = ApiRequest::get("/api/v1/test");
        let mut response = ApiResponse::ok("ok");
        headers(|_| {}).decorate(&mut response, &deprecated_v1(), Some(&request), now());

        assert_eq!(response.header(STATUS_HEADER), Some("deprecated"));
        assert_eq!(
            response.header(DEPRECATION_HEADER),
            Some("Sun, 01 Jun 2025 00:00:00 GMT")
        );
        assert_eq!(
            response.header(SUNSET_HEADER),
            Some("Wed, 31 Dec 2025 00:00:00 GMT")
        );
        assert_eq!(
            response.header(LINK_HEADER),
            Some("<http://localhost/api/v2/test>; rel=\"successor-version\"")
        );
    }

    #[test]
    fn test_status_header_reports_derived_status() {
        let mut version = VersionDefinition::new("v1");
        version.sunset(now() - Duration::days(1));
        let values = headers(|_| {}).for_version(&version, None, now());
        assert!(values.contains(&(STATUS_HEADER, "sunset".to_string())));
    }

    #[test]
    fn test_disabled_headers_emit_nothing() {
        let annotator = headers(|c| c.headers.enabled = false);
        assert!(annotator.for_version(&deprecated_v1(), None, now()).is_empty());

        let mut response = ApiResponse::ok("ok");
        annotator.decorate(&mut response, &deprecated_v1(), None, now());
        assert!(response.headers().is_empty());
    }

    #[test]
    fn test_individual_toggles() {
        let annotator = headers(|c| {
            c.headers.include.sunset = false;
            c.headers.include.successor_link = false;
        });
        let names: Vec<&str> = annotator
            .for_version(&deprecated_v1(), None, now())
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        assert_eq!(names, vec![VERSION_HEADER, STATUS_HEADER, DEPRECATION_HEADER]);
    }

    #[test]
    fn test_successor_url_replaces_whole_word_once() {
        let annotator = headers(|c| c.base_url = "https://api.example.com".to_string());
        let request = ApiRequest::get("/api/v1/items/v1?x=1");
        assert_eq!(
            annotator.successor_url("v1", "v2", Some(&request)),
            "https://api.example.com/api/v2/items/v1"
        );

        let partial = ApiRequest::get("/api/v10/items");
        assert_eq!(
            annotator.successor_url("v1", "v2", Some(&partial)),
            "https://api.example.com/api/v2"
        );
    }

    #[test]
    fn test_successor_url_without_uri_strategy() {
        let annotator = headers(|c| c.strategy = DetectionStrategy::Header);
        let request = ApiRequest::get("/api/v1/test");
        assert_eq!(
            annotator.successor_url("v1", "v2", Some(&request)),
            "http://localhost/api/v2"
        );

        let bare = headers(|c| {
            c.strategy = DetectionStrategy::Query;
            c.strategies.uri.prefix = String::new();
        });
        assert_eq!(bare.successor_url("v1", "v2", None), "http://localhost/v2");
    }

    #[test]
    fn test_format_http_date() {
        let dt: DateTime<Utc> = "2025-06-01T12:00:00Z".parse().unwrap();
        assert_eq!(format_http_date(&dt), "Sun, 01 Jun 2025 12:00:00 GMT");
    }

    #[test]
    fn test_parse_http_date() {
        let parsed = parse_http_date("Sun, 01 Jun 2025 12:00:00 GMT");
        assert_eq!(parsed, Some("2025-06-01T12:00:00Z".parse().unwrap()));
        assert!(parse_http_date("2025-06-01T12:00:00Z").is_some());
        assert!(parse_http_date("June first").is_none());
    }

    #[test]
    fn test_version_not_found_body() {
        let available = vec!["v1".to_string(), "v2".to_string()];
        let body = version_not_found_body(Some("v99"), &available);

        assert_eq!(body["error"], "version_not_found");
        assert_eq!(body["requested_version"], "v99");
        assert_eq!(body["available_versions"], json!(["v1", "v2"]));
        assert_eq!(body["message"], "API version 'v99' not found.");
    }

    #[test]
    fn test_sunset_body() {
        let body = sunset_body(&deprecated_v1(), Some("https://docs.example.com/v1-to-v2"));
        assert_eq!(body["error"], "api_version_sunset");
        assert_eq!(body["successor"], "v2");
        assert_eq!(
            body["message"],
            "API version v1 is no longer available. Please upgrade to v2."
        );
        assert_eq!(body["migration_guide"], "https://docs.example.com/v1-to-v2");

        let orphan = sunset_body(&VersionDefinition::new("v0"), None);
        assert!(orphan["successor"].is_null());
        assert!(orphan["migration_guide"].is_null());
        assert_eq!(orphan["message"], "API version v0 is no longer available.");
    }

    #[test]
    fn test_deprecation_body() {
        let body = deprecation_body(&deprecated_v1());
        assert_eq!(body["warning"], "api_version_deprecated");
        assert_eq!(body["successor"], "v2");
        assert!(body["documentation"].is_null());
    }
}
