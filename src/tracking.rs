//! Usage tracking per version.
//!
//! Records are written after the response has been produced and aggregated
//! into per-version, per-endpoint buckets of one hour or one day.

use crate::clock::Clock;
use crate::config::{Aggregation, TrackingConfig, TrackingDriver};
use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Timelike, Utc};
use dashmap::DashMap;
use http::StatusCode;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// One served request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageRecord {
    pub version: String,
    pub endpoint: String,
    pub method: String,
    pub status: u16,
    pub timestamp: DateTime<Utc>,
}

impl UsageRecord {
    /// Statuses below 400 count as successes.
    pub fn is_success(&self) -> bool {
        (200..400).contains(&self.status)
    }
}

/// Aggregated usage of one version over a window of days.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UsageStats {
    pub version: String,
    pub period_days: u32,
    pub total_requests: u64,
    pub success_requests: u64,
    pub error_requests: u64,
}

/// Usage tracking backend.
#[async_trait]
pub trait UsageTracker: Send + Sync {
    async fn record(&self, record: &UsageRecord) -> anyhow::Result<()>;

    async fn stats_for(&self, version: &str, days: u32) -> anyhow::Result<UsageStats>;

    /// Stats for every version with traffic in the window.
    async fn stats_for_all(&self, days: u32) -> anyhow::Result<BTreeMap<String, UsageStats>>;
}

/// Discards every record.
#[derive(Debug, Default)]
pub struct NullTracker;

#[async_trait]
impl UsageTracker for NullTracker {
    async fn record(&self, _record: &UsageRecord) -> anyhow::Result<()> {
        Ok(())
    }

    async fn stats_for(&self, version: &str, days: u32) -> anyhow::Result<UsageStats> {
        Ok(UsageStats {
            version: version.to_string(),
            period_days: days,
            ..UsageStats::default()
        })
    }

    async fn stats_for_all(&self, _days: u32) -> anyhow::Result<BTreeMap<String, UsageStats>> {
        Ok(BTreeMap::new())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct BucketKey {
    version: String,
    endpoint: String,
    method: String,
    date: NaiveDate,
    /// Absent for daily aggregation
    hour: Option<u32>,
}

#[derive(Debug, Clone, Copy, Default)]
struct Counts {
    requests: u64,
    success: u64,
    error: u64,
}

/// In-process tracker.
pub struct MemoryTracker {
    buckets: DashMap<BucketKey, Counts>,
    aggregation: Aggregation,
    clock: Arc<dyn Clock>,
}

impl MemoryTracker {
    pub fn new(aggregation: Aggregation, clock: Arc<dyn Clock>) -> Self {
        Self {
            buckets: DashMap::new(),
            aggregation,
            clock,
        }
    }

    /// Number of distinct buckets written so far.
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Request counts per `METHOD endpoint` for a version, busiest first.
    pub fn top_endpoints(&self, version: &str, days: u32, limit: usize) -> Vec<(String, u64)> {
        let start = self.window_start(days);
        let mut totals: BTreeMap<String, u64> = BTreeMap::new();

        for bucket in self.buckets.iter() {
            let key = bucket.key();
            if key.version == version && key.date >= start {
                *totals
                    .entry(format!("{} {}", key.method, key.endpoint))
                    .or_default() += bucket.value().requests;
            }
        }

        let mut endpoints: Vec<_> = totals.into_iter().collect();
        endpoints.sort_by(|a, b| b.1.cmp(&a.1));
        endpoints.truncate(limit);
        endpoints
    }

    fn window_start(&self, days: u32) -> NaiveDate {
        (self.clock.now() - Duration::days(i64::from(days))).date_naive()
    }

    fn aggregate<F>(&self, days: u32, mut include: F) -> BTreeMap<String, UsageStats>
    where
        F: FnMut(&str) -> bool,
    {
        let start = self.window_start(days);
        let mut stats: BTreeMap<String, UsageStats> = BTreeMap::new();

        for bucket in self.buckets.iter() {
            let key = bucket.key();
            if key.date < start || !include(&key.version) {
                continue;
            }
            let counts = bucket.value();
            let entry = stats
                .entry(key.version.clone())
                .or_insert_with(|| UsageStats {
                    version: key.version.clone(),
                    period_days: days,
                    ..UsageStats::default()
                });
            entry.total_requests += counts.requests;
            entry.success_requests += counts.success;
            entry.error_requests += counts.error;
        }

        stats
    }
}

#[async_trait]
impl UsageTracker for MemoryTracker {
    async fn record(&self, record: &UsageRecord) -> anyhow::Result<()> {
        let key = BucketKey {
            version: record.version.clone(),
            endpoint: record.endpoint.clone(),
            method: record.method.clone(),
            date: record.timestamp.date_naive(),
            hour: match self.aggregation {
                Aggregation::Hourly => Some(record.timestamp.hour()),
                Aggregation::Daily => None,
            },
        };

        let mut counts = self.buckets.entry(key).or_default();
        counts.requests += 1;
        if record.is_success() {
            counts.success += 1;
        } else {
            counts.error += 1;
        }

        debug!(
            version = %record.version,
            endpoint = %record.endpoint,
            status = record.status,
            "Recorded API usage"
        );
        Ok(())
    }

    async fn stats_for(&self, version: &str, days: u32) -> anyhow::Result<UsageStats> {
        Ok(self
            .aggregate(days, |v| v == version)
            .remove(version)
            .unwrap_or_else(|| UsageStats {
                version: version.to_string(),
                period_days: days,
                ..UsageStats::default()
            }))
    }

    async fn stats_for_all(&self, days: u32) -> anyhow::Result<BTreeMap<String, UsageStats>> {
        Ok(self.aggregate(days, |_| true))
    }
}

/// Build the tracker the configuration asks for.
pub fn tracker_from_config(
    config: &TrackingConfig,
    clock: Arc<dyn Clock>,
) -> Arc<dyn UsageTracker> {
    match (config.enabled, config.driver) {
        (true, TrackingDriver::Memory) => Arc::new(MemoryTracker::new(config.aggregate, clock)),
        _ => Arc::new(NullTracker),
    }
}

/// Build a usage record for a finished request.
pub fn usage_record(
    version: &str,
    endpoint: &str,
    method: &http::Method,
    status: StatusCode,
    timestamp: DateTime<Utc>,
) -> UsageRecord {
    UsageRecord {
        version: version.to_string(),
        endpoint: endpoint.to_string(),
        method: method.to_string(),
        status: status.as_u16(),
        timestamp,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;

    fn now() -> DateTime<Utc> {
        "2025-06-15T12:30:00Z".parse().unwrap()
    }

    fn record(version: &str, endpoint: &str, status: u16, at: DateTime<Utc>) -> UsageRecord {
        UsageRecord {
            version: version.to_string(),
            endpoint: endpoint.to_string(),
            method: "GET".to_string(),
            status,
            timestamp: at,
        }
    }

    fn tracker(aggregation: Aggregation) -> MemoryTracker {
        MemoryTracker::new(aggregation, Arc::new(FixedClock::new(now())))
    }

    #[test]
    fn test_success_range() {
        assert!(record("v1", "/a", 200, now()).is_success());
        assert!(record("v1", "/a", 302, now()).is_success());
        assert!(!record("v1", "/a", 404, now()).is_success());
        assert!(!record("v1", "/a", 500, now()).is_success());
    }

    #[tokio::test]
    async fn test_stats_for_version() {
        let tracker = tracker(Aggregation::Hourly);
        tracker.record(&record("v1", "/api/v1/users", 200, now())).await.unwrap();
        tracker.record(&record("v1", "/api/v1/users", 404, now())).await.unwrap();
        tracker.record(&record("v2", "/api/v2/users", 200, now())).await.unwrap();

        let stats = tracker.stats_for("v1", 30).await.unwrap();
        assert_eq!(stats.total_requests, 2);
        assert_eq!(stats.success_requests, 1);
        assert_eq!(stats.error_requests, 1);
        assert_eq!(stats.period_days, 30);

        let empty = tracker.stats_for("v9", 7).await.unwrap();
        assert_eq!(empty.total_requests, 0);
        assert_eq!(empty.version, "v9");
    }

    #[tokio::test]
    async fn test_window_excludes_old_records() {
        let tracker = tracker(Aggregation::Daily);
        tracker
            .record(&record("v1", "/a", 200, now() - Duration::days(40)))
            .await
            .unwrap();
        tracker.record(&record("v1", "/a", 200, now())).await.unwrap();

        assert_eq!(tracker.stats_for("v1", 30).await.unwrap().total_requests, 1);
        assert_eq!(tracker.stats_for("v1", 60).await.unwrap().total_requests, 2);
    }

    #[tokio::test]
    async fn test_aggregation_granularity() {
        let hourly = tracker(Aggregation::Hourly);
        let daily = tracker(Aggregation::Daily);
        for t in [&hourly, &daily] {
            t.record(&record("v1", "/a", 200, now())).await.unwrap();
            t.record(&record("v1", "/a", 200, now() - Duration::hours(2)))
                .await
                .unwrap();
        }

        assert_eq!(hourly.bucket_count(), 2);
        assert_eq!(daily.bucket_count(), 1);
    }

    #[tokio::test]
    async fn test_stats_for_all_and_top_endpoints() {
        let tracker = tracker(Aggregation::Hourly);
        for _ in 0..3 {
            tracker.record(&record("v1", "/users", 200, now())).await.unwrap();
        }
        tracker.record(&record("v1", "/orders", 200, now())).await.unwrap();
        tracker.record(&record("v2", "/users", 500, now())).await.unwrap();

        let all = tracker.stats_for_all(30).await.unwrap();
        assert_eq!(all.keys().collect::<Vec<_>>(), vec!["v1", "v2"]);
        assert_eq!(all["v1"].total_requests, 4);
        assert_eq!(all["v2"].error_requests, 1);

        assert_eq!(
            tracker.top_endpoints("v1", 30, 1),
            vec![("GET /users".to_string(), 3)]
        );
    }

    #[tokio::test]
    async fn test_null_tracker_and_factory() {
        let null = NullTracker;
        null.record(&record("v1", "/a", 200, now())).await.unwrap();
        assert!(null.stats_for_all(30).await.unwrap().is_empty());

        let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(now()));
        let disabled = tracker_from_config(&TrackingConfig::default(), clock.clone());
        disabled.record(&record("v1", "/a", 200, now())).await.unwrap();
        assert!(disabled.stats_for_all(30).await.unwrap().is_empty());

        let enabled = tracker_from_config(
            &TrackingConfig {
                enabled: true,
                ..TrackingConfig::default()
            },
            clock,
        );
        enabled.record(&record("v1", "/a", 200, now())).await.unwrap();
        assert_eq!(enabled.stats_for("v1", 1).await.unwrap().total_requests, 1);
    }
}
