//! API Version Lifecycle
//!
//! Maps incoming requests to declared API versions, enforces each version's
//! lifecycle (active, beta, deprecated, sunset), falls back to older versions
//! when a version or a route is missing, and annotates responses with version
//! metadata.
//!
//! # Features
//!
//! - **Detection strategies**: URI segment, header, query parameter or
//!   vendor media type in `Accept`
//! - **Lifecycle headers**: `X-API-Version`, `X-API-Version-Status`,
//!   RFC 8594 `Deprecation` and `Sunset`, `Link rel="successor-version"`
//! - **Sunset enforcement**: reject (410 by default), warn or allow
//! - **Fallback**: previous or latest version, with redirects for routes
//!   missing in the requested version
//! - **Rate limiting**: per version and client, with `X-RateLimit-*` headers
//! - **Usage tracking**: post-response, hourly or daily aggregates
//!
//! # Example Configuration
//!
//! ```yaml
//! strategy: uri
//! strategies:
//!   uri:
//!     prefix: api
//! versions:
//!   - name: v1
//!     status: deprecated
//!     deprecated_at: "2025-01-01"
//!     sunset_at: "2025-12-31"
//!     successor: v2
//!   - name: v2
//!     rate_limit: 100
//! fallback:
//!   strategy: previous
//! sunset:
//!   action: reject
//! ```

pub mod clock;
pub mod config;
pub mod error;
pub mod fallback;
pub mod headers;
pub mod metrics;
pub mod rate_limit;
pub mod registry;
pub mod request;
pub mod resolver;
pub mod router;
pub mod tracking;
pub mod version;
pub mod versioning;

pub use clock::{Clock, FixedClock, SystemClock};
pub use config::ApiVersioningConfig;
pub use error::VersioningError;
pub use registry::VersionRegistry;
pub use request::{ApiRequest, ApiResponse};
pub use resolver::{DetectionStrategy, FallbackStrategy, ResolvedVersion, VersionResolver};
pub use router::{MemoryRouter, RouteTable};
pub use tracking::{MemoryTracker, UsageTracker};
pub use version::{VersionDefinition, VersionStatus};
pub use versioning::ApiVersioning;
