//! Version definitions and their lifecycle state.
//!
//! A version moves freely between active, beta and deprecated through
//! explicit mutation. Sunset is one-way: it is reached either by explicit
//! mutation or by the sunset date elapsing, and the date always wins over a
//! stale stored status.

use crate::config::VersionConfig;
use crate::error::VersioningError;
use crate::headers::parse_http_date;
use crate::router::RouteGroupHandle;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::NonZeroU32;
use std::str::FromStr;
use tracing::debug;

/// Lifecycle state of an API version.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VersionStatus {
    #[default]
    Active,
    Beta,
    Deprecated,
    Sunset,
}

impl VersionStatus {
    /// Whether requests may still be served by a version in this state.
    pub fn is_usable(self) -> bool {
        !matches!(self, Self::Sunset)
    }

    /// Lowercase wire form, as emitted in `X-API-Version-Status`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Beta => "beta",
            Self::Deprecated => "deprecated",
            Self::Sunset => "sunset",
        }
    }

    /// Human readable label.
    pub fn label(self) -> &'static str {
        match self {
            Self::Active => "Active",
            Self::Beta => "Beta",
            Self::Deprecated => "Deprecated",
            Self::Sunset => "Sunset",
        }
    }
}

impl fmt::Display for VersionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VersionStatus {
    type Err = VersioningError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "active" => Ok(Self::Active),
            "beta" => Ok(Self::Beta),
            "deprecated" => Ok(Self::Deprecated),
            "sunset" => Ok(Self::Sunset),
            _ => Err(VersioningError::InvalidStatus {
                value: s.to_string(),
            }),
        }
    }
}

/// One declared API version.
#[derive(Debug, Clone, Serialize)]
pub struct VersionDefinition {
    name: String,
    status: VersionStatus,
    deprecation_date: Option<DateTime<Utc>>,
    sunset_date: Option<DateTime<Utc>>,
    successor: Option<String>,
    documentation_url: Option<String>,
    rate_limit: Option<NonZeroU32>,
    middleware: Vec<String>,
    route_name_prefix: Option<String>,
    #[serde(skip)]
    route_group: Option<RouteGroupHandle>,
}

impl VersionDefinition {
    /// A new, active version with no lifecycle dates.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: VersionStatus::Active,
            deprecation_date: None,
            sunset_date: None,
            successor: None,
            documentation_url: None,
            rate_limit: None,
            middleware: Vec::new(),
            route_name_prefix: None,
            route_group: None,
        }
    }

    /// Build a definition from a declarative configuration entry.
    ///
    /// A `deprecated` status without a date is deprecated as of `now`, and a
    /// `deprecated_at` date on an active entry promotes it to deprecated.
    pub fn from_config(entry: &VersionConfig, now: DateTime<Utc>) -> Result<Self, VersioningError> {
        let mut definition = Self::new(entry.name.clone());
        definition.set_middleware(entry.middleware.to_vec());

        let deprecated_at = entry
            .deprecated_at
            .as_deref()
            .map(parse_version_date)
            .transpose()?;

        match entry.status.unwrap_or_default() {
            VersionStatus::Active => {
                definition.activate();
            }
            VersionStatus::Beta => {
                definition.beta();
            }
            VersionStatus::Deprecated => {
                definition.deprecate(deprecated_at.unwrap_or(now));
            }
            VersionStatus::Sunset => {
                definition.mark_sunset();
            }
        }

        if let Some(date) = deprecated_at {
            definition.deprecation_date = Some(date);
            if definition.status == VersionStatus::Active {
                definition.status = VersionStatus::Deprecated;
            }
        }

        if let Some(sunset_at) = entry.sunset_at.as_deref() {
            let date = parse_version_date(sunset_at)?;
            definition.sunset(date);
            if date <= now {
                definition.mark_sunset();
            }
        }

        if let Some(successor) = &entry.successor {
            definition.set_successor(successor.clone());
        }
        if let Some(docs) = &entry.documentation {
            definition.set_documentation_url(docs.clone());
        }
        if let Some(limit) = entry.rate_limit {
            definition.set_rate_limit(limit);
        }
        if let Some(prefix) = &entry.route_name {
            definition.set_route_name_prefix(prefix.clone());
        }

        Ok(definition)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The stored status, ignoring the sunset date.
    pub fn stored_status(&self) -> VersionStatus {
        self.status
    }

    /// The effective status at `now`: an elapsed sunset date overrides
    /// whatever status is stored.
    pub fn status_at(&self, now: DateTime<Utc>) -> VersionStatus {
        if self.status == VersionStatus::Sunset || self.sunset_elapsed(now) {
            VersionStatus::Sunset
        } else {
            self.status
        }
    }

    pub fn deprecation_date(&self) -> Option<DateTime<Utc>> {
        self.deprecation_date
    }

    pub fn sunset_date(&self) -> Option<DateTime<Utc>> {
        self.sunset_date
    }

    pub fn successor(&self) -> Option<&str> {
        self.successor.as_deref()
    }

    pub fn documentation_url(&self) -> Option<&str> {
        self.documentation_url.as_deref()
    }

    /// Requests per minute, if limited.
    pub fn rate_limit(&self) -> Option<NonZeroU32> {
        self.rate_limit
    }

    /// Version-specific middleware, applied after the global stack.
    pub fn middleware(&self) -> &[String] {
        &self.middleware
    }

    pub fn route_name_prefix(&self) -> Option<&str> {
        self.route_name_prefix.as_deref()
    }

    /// Handle of the route group the router created for this version.
    pub fn route_group(&self) -> Option<&RouteGroupHandle> {
        self.route_group.as_ref()
    }

    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.status_at(now) == VersionStatus::Active
    }

    pub fn is_beta(&self, now: DateTime<Utc>) -> bool {
        self.status_at(now) == VersionStatus::Beta
    }

    pub fn is_deprecated(&self, now: DateTime<Utc>) -> bool {
        self.status_at(now) == VersionStatus::Deprecated
    }

    pub fn is_sunset(&self, now: DateTime<Utc>) -> bool {
        self.status_at(now) == VersionStatus::Sunset
    }

    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        !self.is_sunset(now)
    }

    /// Whole days until the sunset date; negative once it has passed.
    pub fn days_until_sunset(&self, now: DateTime<Utc>) -> Option<i64> {
        self.sunset_date.map(|date| (date - now).num_days())
    }

    fn sunset_elapsed(&self, now: DateTime<Utc>) -> bool {
        self.sunset_date.is_some_and(|date| date <= now)
    }

    /// Mark the version active. Has no effect once sunset.
    pub fn activate(&mut self) -> &mut Self {
        self.transition(VersionStatus::Active)
    }

    /// Mark the version beta. Has no effect once sunset.
    pub fn beta(&mut self) -> &mut Self {
        self.transition(VersionStatus::Beta)
    }

    /// Deprecate the version as of `date`. Has no effect on the status once
    /// sunset, but the date is still recorded.
    pub fn deprecate(&mut self, date: DateTime<Utc>) -> &mut Self {
        self.deprecation_date = Some(date);
        self.transition(VersionStatus::Deprecated)
    }

    /// Schedule the sunset date. Once it elapses the version reports sunset.
    pub fn sunset(&mut self, date: DateTime<Utc>) -> &mut Self {
        self.sunset_date = Some(date);
        self
    }

    /// Sunset the version immediately, regardless of dates.
    pub fn mark_sunset(&mut self) -> &mut Self {
        self.status = VersionStatus::Sunset;
        self
    }

    pub fn set_successor(&mut self, successor: impl Into<String>) -> &mut Self {
        self.successor = Some(successor.into());
        self
    }

    pub fn set_documentation_url(&mut self, url: impl Into<String>) -> &mut Self {
        self.documentation_url = Some(url.into());
        self
    }

    /// Limit the version to `requests` per minute. Zero removes the limit.
    pub fn set_rate_limit(&mut self, requests: u32) -> &mut Self {
        self.rate_limit = NonZeroU32::new(requests);
        self
    }

    pub fn set_middleware<I, S>(&mut self, middleware: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.middleware = middleware.into_iter().map(Into::into).collect();
        self
    }

    pub fn set_route_name_prefix(&mut self, prefix: impl Into<String>) -> &mut Self {
        self.route_name_prefix = Some(prefix.into());
        self
    }

    pub(crate) fn set_route_group(&mut self, handle: RouteGroupHandle) {
        self.route_group = Some(handle);
    }

    fn transition(&mut self, to: VersionStatus) -> &mut Self {
        if self.status == VersionStatus::Sunset {
            debug!(version = %self.name, to = %to, "Ignoring transition out of sunset");
        } else {
            self.status = to;
        }
        self
    }
}

/// Parse a lifecycle date: RFC 3339, a bare `YYYY-MM-DD` (midnight UTC), or
/// an RFC 7231 HTTP date.
pub fn parse_version_date(value: &str) -> Result<DateTime<Utc>, VersioningError> {
    let value = value.trim();

    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        if let Some(midnight) = date.and_hms_opt(0, 0, 0) {
            return Ok(midnight.and_utc());
        }
    }

    parse_http_date(value).ok_or_else(|| VersioningError::InvalidDate {
        value: value.to_string(),
    })
}
