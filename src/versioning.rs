//! Version lifecycle engine wiring.
//!
//! [`ApiVersioning`] owns the registry, resolver, fallback locator, header
//! annotator, rate limiter and usage tracker, and exposes the single
//! chokepoint every request and response passes through.

use crate::clock::Clock;
use crate::config::{ApiVersioningConfig, SunsetAction};
use crate::error::{HandlerError, VersioningError};
use crate::fallback::FallbackRouteLocator;
use crate::headers::{deprecation_body, sunset_body, version_not_found_body, VersionHeaders};
use crate::metrics::VersionMetrics;
use crate::rate_limit::{
    apply_rate_limit_headers, too_many_requests, RateLimitStatus, VersionRateLimiter,
};
use crate::registry::{RegistrySettings, VersionRegistry};
use crate::request::{ApiRequest, ApiResponse};
use crate::resolver::{DetectionStrategy, ResolvedVersion, ResolverSettings, VersionResolver};
use crate::router::{RouteBuilder, RouteTable};
use crate::tracking::{tracker_from_config, usage_record, UsageTracker};
use crate::version::{VersionDefinition, VersionStatus};
use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use http::StatusCode;
use serde::Serialize;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Versions whose sunset is this close get flagged in reports.
const SUNSET_WARNING_DAYS: i64 = 30;

/// Fallback metric label shared by every unregistered requested version.
const UNREGISTERED: &str = "unregistered";

/// A request that passed resolution, the sunset policy and rate limiting.
#[derive(Debug, Clone)]
pub struct Admission {
    pub resolved: ResolvedVersion,
    pub rate_limit: Option<RateLimitStatus>,
}

/// One row of the version status report.
#[derive(Debug, Clone, Serialize)]
pub struct VersionReport {
    pub name: String,
    pub status: VersionStatus,
    pub deprecation_date: Option<DateTime<Utc>>,
    pub sunset_date: Option<DateTime<Utc>>,
    pub days_until_sunset: Option<i64>,
    pub successor: Option<String>,
    pub requests: u64,
    /// Share of all requests in the window, in percent
    pub usage_percent: f64,
    /// Sunset falls within the warning window
    pub sunset_soon: bool,
}

pub struct ApiVersioning {
    config: ApiVersioningConfig,
    registry: Arc<VersionRegistry>,
    resolver: VersionResolver,
    locator: FallbackRouteLocator,
    headers: VersionHeaders,
    rate_limiter: VersionRateLimiter,
    tracker: Arc<dyn UsageTracker>,
    metrics: Arc<VersionMetrics>,
}

impl ApiVersioning {
    /// Wire the engine against a router and a clock.
    pub fn new(
        config: ApiVersioningConfig,
        router: Arc<dyn RouteTable>,
        clock: Arc<dyn Clock>,
    ) -> anyhow::Result<Self> {
        let registry = Arc::new(VersionRegistry::new(
            RegistrySettings::from_config(&config),
            router,
            clock.clone(),
        ));
        let resolver =
            VersionResolver::new(registry.clone(), ResolverSettings::from_config(&config)?);
        let locator = FallbackRouteLocator::new(registry.clone(), &config);
        let headers = VersionHeaders::from_config(&config)?;
        let tracker = tracker_from_config(&config.tracking, clock);
        let metrics = Arc::new(
            VersionMetrics::new(&config.metrics.prefix).with_enabled(config.metrics.enabled),
        );

        info!(
            strategy = ?config.strategy,
            versions = config.versions.len(),
            fallback = ?config.fallback.strategy,
            "API versioning initialized"
        );

        Ok(Self {
            config,
            registry,
            resolver,
            locator,
            headers,
            rate_limiter: VersionRateLimiter::new(),
            tracker,
            metrics,
        })
    }

    /// Replace the usage tracker.
    pub fn with_tracker(mut self, tracker: Arc<dyn UsageTracker>) -> Self {
        self.tracker = tracker;
        self
    }

    pub fn config(&self) -> &ApiVersioningConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<VersionRegistry> {
        &self.registry
    }

    pub fn resolver(&self) -> &VersionResolver {
        &self.resolver
    }

    pub fn headers(&self) -> &VersionHeaders {
        &self.headers
    }

    pub fn tracker(&self) -> &Arc<dyn UsageTracker> {
        &self.tracker
    }

    pub fn metrics(&self) -> &VersionMetrics {
        &self.metrics
    }

    /// Register the configured versions, asking `routes` for each one's
    /// route builder. Safe to call repeatedly.
    pub fn load_versions<F>(&self, routes: F) -> Result<usize, VersioningError>
    where
        F: FnMut(&crate::config::VersionConfig) -> RouteBuilder,
    {
        let entries = self.config.documented_versions();
        let registered = self.registry.load_from_configuration(&entries, routes)?;
        self.refresh_sunset_gauges();
        Ok(registered)
    }

    /// Set the days-until-sunset gauge for every version with a sunset date.
    pub fn refresh_sunset_gauges(&self) {
        let now = self.registry.now();
        for version in self.registry.all() {
            if let Some(days) = version.days_until_sunset(now) {
                self.metrics.set_days_until_sunset(version.name(), days);
            }
        }
    }

    /// Resolve a request and apply the sunset policy and rate limit.
    pub fn admit(&self, request: &ApiRequest) -> Result<Admission, VersioningError> {
        let Some(resolved) = self.resolver.resolve(request) else {
            return Err(VersioningError::VersionNotFound {
                requested: self.resolver.requested_version(request),
                available: self.registry.names(),
            });
        };

        if resolved.was_fallback {
            let from = resolved.requested.as_deref().unwrap_or_default();
            self.metrics
                .record_fallback(self.fallback_source(from), resolved.name(), "resolve");
        }

        let version = &resolved.definition;
        let now = self.registry.now();

        if version.is_sunset(now) {
            match self.config.sunset.action {
                SunsetAction::Reject => {
                    warn!(version = %version.name(), "Rejecting request to sunset API version");
                    return Err(VersioningError::VersionSunset {
                        version: version.name().to_string(),
                        sunset_date: version.sunset_date(),
                        successor: version.successor().map(str::to_string),
                    });
                }
                SunsetAction::Warn => {
                    warn!(
                        version = %version.name(),
                        sunset = ?version.sunset_date(),
                        "Serving request to sunset API version"
                    );
                }
                SunsetAction::Allow => {}
            }
        } else if version.is_deprecated(now) {
            warn!(
                version = %version.name(),
                successor = ?version.successor(),
                sunset = ?version.sunset_date(),
                "Deprecated API version accessed"
            );
        }

        let rate_limit = self.rate_limiter.check(version, request.client())?;

        Ok(Admission {
            resolved,
            rate_limit,
        })
    }

    /// Serve a request through the version engine.
    ///
    /// Every outcome, success or failure, leaves through here so version
    /// headers are attached uniformly.
    pub async fn handle(&self, request: &ApiRequest) -> ApiResponse {
        let admission = match self.admit(request) {
            Ok(admission) => admission,
            Err(e) => return self.error_response(&e, request),
        };
        let version = admission.resolved.definition.clone();

        debug!(
            version = %version.name(),
            requested = ?admission.resolved.requested,
            fallback = admission.resolved.was_fallback,
            path = %request.path(),
            "Resolved API version"
        );

        let dispatch = self.registry.router().dispatch(request, version.name());
        let mut response = match AssertUnwindSafe(dispatch).catch_unwind().await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => handler_error_response(&e, version.name()),
            Err(_) => {
                let e = HandlerError::internal("Internal server error");
                warn!(
                    version = %version.name(),
                    path = %request.path(),
                    "Route handler panicked"
                );
                handler_error_response(&e, version.name())
            }
        };

        let uri_strategy = self.config.strategy == DetectionStrategy::Uri;
        if response.status() == StatusCode::NOT_FOUND && uri_strategy {
            let from = admission
                .resolved
                .requested
                .as_deref()
                .unwrap_or_else(|| version.name());
            if let Some(redirect) = self.locator.locate(request, from) {
                self.metrics.record_fallback(
                    self.fallback_source(&redirect.from),
                    &redirect.version,
                    "route",
                );
                response = self.locator.redirect_response(&redirect);
            }
        }

        if let Some(status) = &admission.rate_limit {
            apply_rate_limit_headers(&mut response, status);
        }

        self.headers
            .decorate(&mut response, &version, Some(request), self.registry.now());
        self.metrics.record_request(
            version.name(),
            request.method().as_str(),
            response.status().as_u16(),
        );
        self.track(version.name(), request, response.status());

        response
    }

    /// Build the response for a failed admission.
    pub fn error_response(&self, error: &VersioningError, request: &ApiRequest) -> ApiResponse {
        let now = self.registry.now();
        let version = error.version().and_then(|name| self.registry.get(name));

        let mut response = match error {
            VersioningError::VersionNotFound {
                requested,
                available,
            } => {
                self.metrics.record_not_found();
                debug!(requested = ?requested, "No API version resolved");
                return ApiResponse::json(
                    StatusCode::NOT_FOUND,
                    &version_not_found_body(requested.as_deref(), available),
                );
            }
            VersioningError::VersionSunset { version: name, .. } => {
                self.metrics.record_sunset_rejection(name);
                let status = StatusCode::from_u16(self.config.sunset.status_code)
                    .unwrap_or(StatusCode::GONE);
                let guide = if self.config.sunset.include_migration_url {
                    self.config.migration_guide(name)
                } else {
                    None
                };
                let body = match &version {
                    Some(definition) => sunset_body(definition, guide),
                    None => sunset_body(&VersionDefinition::new(name.as_str()), guide),
                };
                ApiResponse::json(status, &body)
            }
            VersioningError::RateLimited {
                version: name,
                limit,
                retry_after,
            } => {
                self.metrics.record_rate_limited(name);
                too_many_requests(*limit, *retry_after, now)
            }
            other => ApiResponse::json(
                other.status_code(),
                &serde_json::json!({
                    "error": "invalid_version",
                    "message": other.to_string(),
                }),
            ),
        };

        if let Some(definition) = &version {
            self.headers
                .decorate(&mut response, definition, Some(request), now);
        }
        response
    }

    /// Informational deprecation notice for a version, if it is deprecated.
    pub fn deprecation_notice(&self, name: &str) -> Option<serde_json::Value> {
        self.registry
            .get(name)
            .filter(|v| v.is_deprecated(self.registry.now()))
            .map(|v| deprecation_body(&v))
    }

    /// Per-version status and usage over the last `days` days.
    pub async fn status_report(&self, days: u32) -> anyhow::Result<Vec<VersionReport>> {
        let now = self.registry.now();
        let stats = self.tracker.stats_for_all(days).await?;
        let total: u64 = stats.values().map(|s| s.total_requests).sum();

        Ok(self
            .registry
            .all()
            .iter()
            .map(|version| {
                let requests = stats
                    .get(version.name())
                    .map(|s| s.total_requests)
                    .unwrap_or_default();
                let days_until_sunset = version.days_until_sunset(now);
                let status = version.status_at(now);

                VersionReport {
                    name: version.name().to_string(),
                    status,
                    deprecation_date: version.deprecation_date(),
                    sunset_date: version.sunset_date(),
                    days_until_sunset,
                    successor: version.successor().map(str::to_string),
                    requests,
                    usage_percent: if total == 0 {
                        0.0
                    } else {
                        requests as f64 * 100.0 / total as f64
                    },
                    sunset_soon: status != VersionStatus::Sunset
                        && days_until_sunset
                            .is_some_and(|d| (0..=SUNSET_WARNING_DAYS).contains(&d)),
                }
            })
            .collect())
    }

    /// Fallback metric label for a requested version.
    fn fallback_source<'a>(&self, from: &'a str) -> &'a str {
        if self.registry.has(from) {
            from
        } else {
            UNREGISTERED
        }
    }

    /// Record usage off the response path. Failures are logged only.
    fn track(&self, version: &str, request: &ApiRequest, status: StatusCode) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            debug!(version = %version, "No async runtime, skipping usage tracking");
            return;
        };

        let record = usage_record(
            version,
            request.path(),
            request.method(),
            status,
            self.registry.now(),
        );
        let tracker = self.tracker.clone();

        runtime.spawn(async move {
            if let Err(e) = tracker.record(&record).await {
                warn!(version = %record.version, error = %e, "Failed to record API usage");
            }
        });
    }
}

/// The response for a failed route handler.
fn handler_error_response(error: &HandlerError, version: &str) -> ApiResponse {
    let status = error.status();
    if status.is_server_error() {
        warn!(version = %version, status = %status, error = %error, "Route handler failed");
    } else {
        debug!(version = %version, status = %status, error = %error, "Route handler refused");
    }
    ApiResponse::json(error.status(), &serde_json::json!({ "message": error.message() }))
}
