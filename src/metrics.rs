//! Metrics for API version usage.
//!
//! Provides Prometheus metrics for monitoring traffic per version, fallbacks,
//! sunset rejections and rate limiting.

use prometheus::{IntCounter, IntCounterVec, IntGaugeVec, Opts, Registry};

/// Metrics collector for versioned API traffic.
#[derive(Clone)]
pub struct VersionMetrics {
    /// Registry for all metrics
    registry: Registry,

    /// Requests served, by resolved version
    pub requests_total: IntCounterVec,

    /// Fallbacks taken, during resolution or by route redirect
    pub fallbacks_total: IntCounterVec,

    /// Requests rejected because the version is sunset
    pub sunset_rejections_total: IntCounterVec,

    /// Requests rejected by a version's rate limit
    pub rate_limited_total: IntCounterVec,

    /// Requests for which no version resolved
    pub not_found_total: IntCounter,

    /// Gauge for days until sunset for each version
    pub days_until_sunset: IntGaugeVec,

    /// When false, recording is a no-op
    enabled: bool,
}

impl VersionMetrics {
    /// Create a new metrics collector with the given prefix.
    pub fn new(prefix: &str) -> Self {
        let registry = Registry::new();

        let requests_total = IntCounterVec::new(
            Opts::new(
                format!("{}_requests_total", prefix),
                "Total number of requests per API version",
            ),
            &["version", "method", "status"],
        )
        .expect("Failed to create requests_total metric");

        let fallbacks_total = IntCounterVec::new(
            Opts::new(
                format!("{}_fallbacks_total", prefix),
                "Total number of version fallbacks",
            ),
            &["from", "to", "kind"],
        )
        .expect("Failed to create fallbacks_total metric");

        let sunset_rejections_total = IntCounterVec::new(
            Opts::new(
                format!("{}_sunset_rejections_total", prefix),
                "Total number of requests rejected for sunset versions",
            ),
            &["version"],
        )
        .expect("Failed to create sunset_rejections_total metric");

        let rate_limited_total = IntCounterVec::new(
            Opts::new(
                format!("{}_rate_limited_total", prefix),
                "Total number of rate limited requests",
            ),
            &["version"],
        )
        .expect("Failed to create rate_limited_total metric");

        let not_found_total = IntCounter::with_opts(Opts::new(
            format!("{}_not_found_total", prefix),
            "Total number of requests naming no resolvable version",
        ))
        .expect("Failed to create not_found_total metric");

        let days_until_sunset = IntGaugeVec::new(
            Opts::new(
                format!("{}_days_until_sunset", prefix),
                "Days until version sunset (negative if past)",
            ),
            &["version"],
        )
        .expect("Failed to create days_until_sunset metric");

        registry
            .register(Box::new(requests_total.clone()))
            .expect("Failed to register requests_total");
        registry
            .register(Box::new(fallbacks_total.clone()))
            .expect("Failed to register fallbacks_total");
        registry
            .register(Box::new(sunset_rejections_total.clone()))
            .expect("Failed to register sunset_rejections_total");
        registry
            .register(Box::new(rate_limited_total.clone()))
            .expect("Failed to register rate_limited_total");
        registry
            .register(Box::new(not_found_total.clone()))
            .expect("Failed to register not_found_total");
        registry
            .register(Box::new(days_until_sunset.clone()))
            .expect("Failed to register days_until_sunset");

        Self {
            registry,
            requests_total,
            fallbacks_total,
            sunset_rejections_total,
            rate_limited_total,
            not_found_total,
            days_until_sunset,
            enabled: true,
        }
    }

    /// Turn recording on or off.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn record_request(&self, version: &str, method: &str, status: u16) {
        if !self.enabled {
            return;
        }
        let status = status.to_string();
        self.requests_total
            .with_label_values(&[version, method, status.as_str()])
            .inc();
    }

    /// `kind` is `resolve` for resolution fallbacks and `route` for redirects.
    pub fn record_fallback(&self, from: &str, to: &str, kind: &str) {
        if !self.enabled {
            return;
        }
        self.fallbacks_total.with_label_values(&[from, to, kind]).inc();
    }

    pub fn record_sunset_rejection(&self, version: &str) {
        if !self.enabled {
            return;
        }
        self.sunset_rejections_total
            .with_label_values(&[version])
            .inc();
    }

    pub fn record_rate_limited(&self, version: &str) {
        if !self.enabled {
            return;
        }
        self.rate_limited_total.with_label_values(&[version]).inc();
    }

    pub fn record_not_found(&self) {
        if !self.enabled {
            return;
        }
        self.not_found_total.inc();
    }

    /// Update the days until sunset gauge.
    pub fn set_days_until_sunset(&self, version: &str, days: i64) {
        if !self.enabled {
            return;
        }
        self.days_until_sunset
            .with_label_values(&[version])
            .set(days);
    }

    /// Get the Prometheus registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Encode metrics in Prometheus text format.
    pub fn encode(&self) -> String {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buffer) {
            tracing::warn!(error = %e, "Failed to encode metrics");
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }
}

impl Default for VersionMetrics {
    fn default() -> Self {
        Self::new("api_version")
    }
}
