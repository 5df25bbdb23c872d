//! Per-version rate limiting built on `governor`.
//!
//! Each limited version gets one keyed limiter, keyed by client identity, so
//! clients are throttled independently within a version and versions do not
//! share budgets. Idle client state is pruned every [`PRUNE_EVERY`] checks.

use crate::error::VersioningError;
use crate::request::ApiResponse;
use crate::version::VersionDefinition;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use governor::clock::{Clock as _, DefaultClock};
use governor::middleware::StateInformationMiddleware;
use governor::state::keyed::DefaultKeyedStateStore;
use governor::{Quota, RateLimiter};
use http::StatusCode;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub const LIMIT_HEADER: &str = "X-RateLimit-Limit";
pub const REMAINING_HEADER: &str = "X-RateLimit-Remaining";
pub const RETRY_AFTER_HEADER: &str = "Retry-After";
pub const RESET_HEADER: &str = "X-RateLimit-Reset";

/// Client identity used when the request carries none.
const UNKNOWN_CLIENT: &str = "unknown";

/// Number of checks between two prunes of idle client state.
pub const PRUNE_EVERY: u64 = 1024;

type KeyedLimiter = RateLimiter<
    String,
    DefaultKeyedStateStore<String>,
    DefaultClock,
    StateInformationMiddleware,
>;

/// Budget left after an admitted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitStatus {
    pub limit: u32,
    pub remaining: u32,
}

#[derive(Default)]
pub struct VersionRateLimiter {
    limiters: DashMap<String, (NonZeroU32, Arc<KeyedLimiter>)>,
    checks: AtomicU64,
}

impl VersionRateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one request from `client` against `version`.
    ///
    /// Returns `Ok(None)` for versions without a limit, and
    /// [`VersioningError::RateLimited`] once the client's per-minute budget
    /// is spent.
    pub fn check(
        &self,
        version: &VersionDefinition,
        client: Option<&str>,
    ) -> Result<Option<RateLimitStatus>, VersioningError> {
        let Some(limit) = version.rate_limit() else {
            return Ok(None);
        };

        let limiter = self.limiter_for(version.name(), limit);
        let client = client.unwrap_or(UNKNOWN_CLIENT).to_string();

        let outcome = limiter.check_key(&client);
        if self.checks.fetch_add(1, Ordering::Relaxed) % PRUNE_EVERY == PRUNE_EVERY - 1 {
            self.prune();
        }

        match outcome {
            Ok(snapshot) => Ok(Some(RateLimitStatus {
                limit: limit.get(),
                remaining: snapshot.remaining_burst_capacity(),
            })),
            Err(not_until) => {
                let retry_after = not_until.wait_time_from(DefaultClock::default().now());
                warn!(
                    version = %version.name(),
                    client = %client,
                    limit = limit.get(),
                    retry_after_secs = retry_after.as_secs_f64(),
                    "Rate limit exceeded"
                );
                Err(VersioningError::RateLimited {
                    version: version.name().to_string(),
                    limit: limit.get(),
                    retry_after,
                })
            }
        }
    }

    /// Forget clients whose budget has fully replenished.
    pub fn prune(&self) {
        let before = self.tracked_clients();
        for entry in self.limiters.iter() {
            entry.1.retain_recent();
            entry.1.shrink_to_fit();
        }
        debug!(before, after = self.tracked_clients(), "Pruned rate limiter state");
    }

    /// Clients currently holding limiter state, across all versions.
    pub fn tracked_clients(&self) -> usize {
        self.limiters.iter().map(|entry| entry.1.len()).sum()
    }

    fn limiter_for(&self, version: &str, limit: NonZeroU32) -> Arc<KeyedLimiter> {
        let mut entry = self
            .limiters
            .entry(version.to_string())
            .or_insert_with(|| (limit, Arc::new(build_limiter(limit))));

        // The version's limit was changed administratively
        if entry.0 != limit {
            *entry = (limit, Arc::new(build_limiter(limit)));
        }

        entry.1.clone()
    }
}

fn build_limiter(limit: NonZeroU32) -> KeyedLimiter {
    RateLimiter::keyed(Quota::per_minute(limit)).with_middleware::<StateInformationMiddleware>()
}

/// Whole seconds to wait, never less than one.
pub fn retry_after_secs(retry_after: Duration) -> u64 {
    retry_after.as_secs_f64().ceil().max(1.0) as u64
}

/// Headers reporting the client's remaining budget.
pub fn apply_rate_limit_headers(response: &mut ApiResponse, status: &RateLimitStatus) {
    response.set_header(LIMIT_HEADER, &status.limit.to_string());
    response.set_header(REMAINING_HEADER, &status.remaining.to_string());
}

/// The 429 response for an exhausted budget.
pub fn too_many_requests(limit: u32, retry_after: Duration, now: DateTime<Utc>) -> ApiResponse {
    let secs = retry_after_secs(retry_after);
    let mut response = ApiResponse::json(
        StatusCode::TOO_MANY_REQUESTS,
        &serde_json::json!({ "message": "Too Many Attempts." }),
    );

    apply_rate_limit_headers(&mut response, &RateLimitStatus { limit, remaining: 0 });
    response.set_header(RETRY_AFTER_HEADER, &secs.to_string());
    response.set_header(RESET_HEADER, &(now.timestamp() + secs as i64).to_string());
    response
}
