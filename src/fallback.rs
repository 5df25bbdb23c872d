//! Cross-version route fallback.
//!
//! When a request resolved to a version but its route is missing there, an
//! older version may still serve the same endpoint. The locator finds one by
//! probing the route table and answers with a redirect to it; it never
//! dispatches the request itself.

use crate::config::ApiVersioningConfig;
use crate::headers::FALLBACK_HEADER;
use crate::registry::VersionRegistry;
use crate::request::{ApiRequest, ApiResponse};
use crate::resolver::{version_number, FallbackStrategy};
use crate::router::join_path;
use crate::version::VersionDefinition;
use std::sync::Arc;
use tracing::debug;

/// Where a missing route was found instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FallbackRedirect {
    /// Version segment of the original request path
    pub from: String,
    /// Version that serves the route
    pub version: String,
    /// Redirect target, including the original query string
    pub location: String,
}

pub struct FallbackRouteLocator {
    registry: Arc<VersionRegistry>,
    enabled: bool,
    strategy: FallbackStrategy,
    prefix: String,
    add_header: bool,
}

impl FallbackRouteLocator {
    pub fn new(registry: Arc<VersionRegistry>, config: &ApiVersioningConfig) -> Self {
        Self {
            registry,
            enabled: config.fallback.enabled,
            strategy: config.fallback.strategy,
            prefix: config.strategies.uri.prefix.trim_matches('/').to_string(),
            add_header: config.fallback.add_header,
        }
    }

    /// The request path below `{prefix}/{version}/`, or `None` when the path
    /// is not shaped that way.
    pub fn sub_path<'a>(&self, path: &'a str, version: &str) -> Option<&'a str> {
        let expected = format!("{}/", join_path(&self.prefix, version));
        path.strip_prefix(expected.as_str())
            .filter(|rest| !rest.is_empty())
    }

    /// Find a version other than `from` that serves `method` on `sub_path`.
    pub fn find_fallback_version(
        &self,
        from: &str,
        request: &ApiRequest,
        sub_path: &str,
    ) -> Option<Arc<VersionDefinition>> {
        if !self.enabled {
            return None;
        }

        match self.strategy {
            FallbackStrategy::None => None,
            FallbackStrategy::Latest => self
                .registry
                .current()
                .filter(|current| current.name() != from)
                .filter(|current| self.serves(current.name(), request, sub_path))
                .or_else(|| self.previous_serving(from, request, sub_path)),
            FallbackStrategy::Previous => self.previous_serving(from, request, sub_path),
        }
    }

    /// Locate a fallback for a request that got a 404 inside `from`.
    pub fn locate(&self, request: &ApiRequest, from: &str) -> Option<FallbackRedirect> {
        let sub_path = self.sub_path(request.path(), from)?;
        let target = self.find_fallback_version(from, request, sub_path)?;

        let mut location = join_path(&join_path(&self.prefix, target.name()), sub_path);
        if let Some(query) = request.query_string() {
            location.push('?');
            location.push_str(query);
        }

        debug!(
            from = %from,
            to = %target.name(),
            location = %location,
            "Route missing in version, redirecting to fallback"
        );

        Some(FallbackRedirect {
            from: from.to_string(),
            version: target.name().to_string(),
            location,
        })
    }

    /// Redirect response for a located fallback.
    pub fn redirect_response(&self, redirect: &FallbackRedirect) -> ApiResponse {
        let response = ApiResponse::redirect(&redirect.location);
        if self.add_header {
            response.with_header(FALLBACK_HEADER, &redirect.version)
        } else {
            response
        }
    }

    fn previous_serving(
        &self,
        from: &str,
        request: &ApiRequest,
        sub_path: &str,
    ) -> Option<Arc<VersionDefinition>> {
        let number = version_number(from)?;
        self.registry
            .usable_below(number)
            .into_iter()
            .find(|version| self.serves(version.name(), request, sub_path))
    }

    fn serves(&self, version: &str, request: &ApiRequest, sub_path: &str) -> bool {
        let path = join_path(&join_path(&self.prefix, version), sub_path);
        self.registry.router().route_exists(request.method(), &path)
    }
}
