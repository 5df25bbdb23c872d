//! The registry of declared versions.
//!
//! Definitions are kept in registration order behind an [`ArcSwap`]: request
//! handling reads a snapshot without locking, and the rare administrative
//! writes (register, update, reset) publish a new copy of the list.

use crate::clock::Clock;
use crate::config::{ApiVersioningConfig, VersionConfig};
use crate::error::VersioningError;
use crate::resolver::DetectionStrategy;
use crate::router::{join_path, RouteBuilder, RouteGroup, RouteGroupBuilder, RouteTable};
use crate::version::VersionDefinition;
use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// How route groups are mounted for each version.
#[derive(Debug, Clone)]
pub struct RegistrySettings {
    /// Path prefix, e.g. `api`
    pub prefix: String,
    /// Host filter applied to every group
    pub domain: Option<String>,
    /// Whether the version name is a path segment after the prefix
    pub version_in_path: bool,
    /// Middleware mounted before each version's own
    pub global_middleware: Vec<String>,
    /// Reject re-registration instead of replacing
    pub strict: bool,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self::from_config(&ApiVersioningConfig::default())
    }
}

impl RegistrySettings {
    pub fn from_config(config: &ApiVersioningConfig) -> Self {
        Self {
            prefix: config.strategies.uri.prefix.trim_matches('/').to_string(),
            domain: config.strategies.uri.domain.clone(),
            version_in_path: config.strategy == DetectionStrategy::Uri,
            global_middleware: config.middleware.global.clone(),
            strict: config.strict,
        }
    }

    /// Group prefix for a version, without surrounding slashes.
    pub fn group_prefix(&self, version: &str) -> String {
        if self.version_in_path {
            join_path(&self.prefix, version).trim_start_matches('/').to_string()
        } else {
            self.prefix.clone()
        }
    }
}

pub struct VersionRegistry {
    versions: ArcSwap<Vec<Arc<VersionDefinition>>>,
    loaded: AtomicBool,
    router: Arc<dyn RouteTable>,
    settings: RegistrySettings,
    clock: Arc<dyn Clock>,
}

impl VersionRegistry {
    pub fn new(
        settings: RegistrySettings,
        router: Arc<dyn RouteTable>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            versions: ArcSwap::from_pointee(Vec::new()),
            loaded: AtomicBool::new(false),
            router,
            settings,
            clock,
        }
    }

    /// Register an active version and mount its routes.
    pub fn register(
        &self,
        name: impl Into<String>,
        routes: RouteBuilder,
    ) -> Result<Arc<VersionDefinition>, VersioningError> {
        self.register_definition(VersionDefinition::new(name), routes)
    }

    /// Register a prepared definition and mount its routes.
    ///
    /// An existing version of the same name is replaced in place, keeping its
    /// registration position, unless the registry is strict.
    pub fn register_definition(
        &self,
        mut definition: VersionDefinition,
        routes: RouteBuilder,
    ) -> Result<Arc<VersionDefinition>, VersioningError> {
        let name = definition.name().to_string();
        if name.trim().is_empty() {
            return Err(VersioningError::InvalidVersion {
                version: name,
                reason: "version name cannot be empty".to_string(),
            });
        }

        let replacing = self.has(&name);
        if replacing && self.settings.strict {
            return Err(VersioningError::DuplicateVersion { version: name });
        }

        let mut builder = RouteGroupBuilder::new();
        routes(&mut builder);

        let mut middleware = self.settings.global_middleware.clone();
        middleware.extend(definition.middleware().iter().cloned());

        let group = RouteGroup {
            version: name.clone(),
            prefix: self.settings.group_prefix(&name),
            domain: self.settings.domain.clone(),
            name_prefix: Some(
                definition
                    .route_name_prefix()
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("{}.", name)),
            ),
            middleware,
            routes: builder.into_routes(),
        };
        let handle = self.router.register_group(group);
        definition.set_route_group(handle);

        let definition = Arc::new(definition);
        self.versions.rcu(|current| {
            let mut next: Vec<_> = current.iter().cloned().collect();
            match next.iter().position(|v| v.name() == name) {
                Some(index) => next[index] = definition.clone(),
                None => next.push(definition.clone()),
            }
            next
        });

        info!(
            version = %name,
            status = %definition.stored_status(),
            replaced = replacing,
            "Registered API version"
        );
        Ok(definition)
    }

    /// Register every configured version not already present.
    ///
    /// Repeated calls with the same entries register nothing new. `routes`
    /// supplies the route builder for each entry that is registered.
    pub fn load_from_configuration<F>(
        &self,
        entries: &[VersionConfig],
        mut routes: F,
    ) -> Result<usize, VersioningError>
    where
        F: FnMut(&VersionConfig) -> RouteBuilder,
    {
        let now = self.now();
        let mut registered = 0;

        for entry in entries {
            if self.has(&entry.name) {
                debug!(version = %entry.name, "Version already registered, skipping");
                continue;
            }
            let definition = VersionDefinition::from_config(entry, now)?;
            self.register_definition(definition, routes(entry))?;
            registered += 1;
        }

        self.loaded.store(true, Ordering::Release);
        info!(registered, total = self.len(), "Loaded versions from configuration");
        Ok(registered)
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::Acquire)
    }

    pub fn get(&self, name: &str) -> Option<Arc<VersionDefinition>> {
        self.versions.load().iter().find(|v| v.name() == name).cloned()
    }

    pub fn has(&self, name: &str) -> bool {
        self.versions.load().iter().any(|v| v.name() == name)
    }

    /// All definitions in registration order.
    pub fn all(&self) -> Vec<Arc<VersionDefinition>> {
        self.versions.load().as_ref().clone()
    }

    pub fn names(&self) -> Vec<String> {
        self.versions
            .load()
            .iter()
            .map(|v| v.name().to_string())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.versions.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.versions.load().is_empty()
    }

    /// The first registered version that is active now.
    pub fn current(&self) -> Option<Arc<VersionDefinition>> {
        let now = self.now();
        self.versions
            .load()
            .iter()
            .find(|v| v.is_active(now))
            .cloned()
    }

    /// The last registered version that is active now.
    pub fn latest_active(&self) -> Option<Arc<VersionDefinition>> {
        let now = self.now();
        self.versions
            .load()
            .iter()
            .rev()
            .find(|v| v.is_active(now))
            .cloned()
    }

    /// Usable versions named `v<n>` with `n` below `number`, highest first.
    ///
    /// Only registered definitions are inspected, so the cost does not depend
    /// on `number`.
    pub fn usable_below(&self, number: u32) -> Vec<Arc<VersionDefinition>> {
        let now = self.now();
        let mut found: Vec<(u32, Arc<VersionDefinition>)> = self
            .versions
            .load()
            .iter()
            .filter(|v| v.is_usable(now))
            .filter_map(|v| {
                numbered_name(v.name())
                    .filter(|n| *n < number)
                    .map(|n| (n, v.clone()))
            })
            .collect();
        found.sort_by(|a, b| b.0.cmp(&a.0));
        found.into_iter().map(|(_, v)| v).collect()
    }

    /// Apply an administrative change to a version.
    ///
    /// The definition is copied, changed and published; readers holding the
    /// old copy keep a consistent view.
    pub fn update<F>(&self, name: &str, change: F) -> Option<Arc<VersionDefinition>>
    where
        F: FnOnce(&mut VersionDefinition),
    {
        let mut updated = self.get(name)?.as_ref().clone();
        change(&mut updated);
        let updated = Arc::new(updated);

        self.versions.rcu(|current| {
            current
                .iter()
                .map(|v| {
                    if v.name() == name {
                        updated.clone()
                    } else {
                        v.clone()
                    }
                })
                .collect::<Vec<_>>()
        });

        debug!(version = %name, status = %updated.stored_status(), "Updated API version");
        Some(updated)
    }

    /// Deprecate a version, optionally scheduling its sunset and naming a
    /// successor.
    pub fn deprecate(
        &self,
        name: &str,
        on: DateTime<Utc>,
        sunset: Option<DateTime<Utc>>,
        successor: Option<&str>,
    ) -> Result<Arc<VersionDefinition>, VersioningError> {
        self.update(name, |v| {
            v.deprecate(on);
            if let Some(date) = sunset {
                v.sunset(date);
            }
            if let Some(successor) = successor {
                v.set_successor(successor);
            }
        })
        .ok_or_else(|| self.not_found(name))
    }

    /// Schedule a version's sunset. A date that has already passed sunsets
    /// it immediately.
    pub fn sunset(
        &self,
        name: &str,
        date: DateTime<Utc>,
        successor: Option<&str>,
    ) -> Result<Arc<VersionDefinition>, VersioningError> {
        let now = self.now();
        self.update(name, |v| {
            v.sunset(date);
            if date <= now {
                v.mark_sunset();
            }
            if let Some(successor) = successor {
                v.set_successor(successor);
            }
        })
        .ok_or_else(|| self.not_found(name))
    }

    pub fn is_active(&self, name: &str) -> bool {
        self.get(name).is_some_and(|v| v.is_active(self.now()))
    }

    pub fn is_deprecated(&self, name: &str) -> bool {
        self.get(name).is_some_and(|v| v.is_deprecated(self.now()))
    }

    pub fn is_sunset(&self, name: &str) -> bool {
        self.get(name).is_some_and(|v| v.is_sunset(self.now()))
    }

    /// Forget every version and the loaded flag.
    pub fn reset(&self) {
        self.versions.store(Arc::new(Vec::new()));
        self.loaded.store(false, Ordering::Release);
        debug!("Version registry reset");
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    pub fn router(&self) -> &Arc<dyn RouteTable> {
        &self.router
    }

    pub fn settings(&self) -> &RegistrySettings {
        &self.settings
    }

    fn not_found(&self, name: &str) -> VersioningError {
        VersioningError::VersionNotFound {
            requested: Some(name.to_string()),
            available: self.names(),
        }
    }
}

/// The number of a version named exactly `v<n>`, `n >= 1`.
fn numbered_name(name: &str) -> Option<u32> {
    let number: u32 = name.strip_prefix('v')?.parse().ok()?;
    (number >= 1 && format!("v{}", number) == name).then_some(number)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::config::MiddlewareList;
    use crate::request::ApiResponse;
    use crate::router::{no_routes, routes, MemoryRouter};
    use crate::version::VersionStatus;
    use chrono::Duration;
    use http::Method;

    fn now() -> DateTime<Utc> {
        "2025-06-15T12:00:00Z".parse().unwrap()
    }

    fn setup(settings: RegistrySettings) -> (VersionRegistry, Arc<MemoryRouter>) {
        let router = Arc::new(MemoryRouter::new());
        let registry =
            VersionRegistry::new(settings, router.clone(), Arc::new(FixedClock::new(now())));
        (registry, router)
    }

    fn entry(name: &str) -> VersionConfig {
        VersionConfig {
            name: name.to_string(),
            routes: None,
            status: None,
            deprecated_at: None,
            sunset_at: None,
            successor: None,
            documentation: None,
            rate_limit: None,
            middleware: MiddlewareList::default(),
            route_name: None,
        }
    }

    #[test]
    fn test_register_mounts_group() {
        let (registry, router) = setup(RegistrySettings::default());
        let version = registry
            .register(
                "v1",
                routes(|r| {
                    r.get("users", |_| ApiResponse::ok("users")).name("users");
                }),
            )
            .unwrap();

        assert!(version.is_active(now()));
        assert!(version.route_group().is_some());
        assert!(router.route_exists(&Method::GET, "/api/v1/users"));
        assert_eq!(router.route_names("v1"), vec!["v1.users"]);
        assert_eq!(router.middleware_for("v1"), Some(vec!["api".to_string()]));
    }

    #[test]
    fn test_group_prefix_per_strategy() {
        let uri = RegistrySettings::default();
        assert_eq!(uri.group_prefix("v2"), "api/v2");

        let header = RegistrySettings {
            version_in_path: false,
            ..RegistrySettings::default()
        };
        assert_eq!(header.group_prefix("v2"), "api");

        let bare = RegistrySettings {
            prefix: String::new(),
            ..RegistrySettings::default()
        };
        assert_eq!(bare.group_prefix("v2"), "v2");
    }

    #[test]
    fn test_reregistration_replaces_in_place() {
        let (registry, _) = setup(RegistrySettings::default());
        registry.register("v1", no_routes()).unwrap();
        registry.register("v2", no_routes()).unwrap();
        registry.update("v1", |v| {
            v.beta();
        });
        registry.register("v1", no_routes()).unwrap();

        assert_eq!(registry.names(), vec!["v1", "v2"]);
        assert!(registry.is_active("v1"));
    }

    #[test]
    fn test_strict_rejects_duplicates() {
        let (registry, _) = setup(RegistrySettings {
            strict: true,
            ..RegistrySettings::default()
        });
        registry.register("v1", no_routes()).unwrap();
        let err = registry.register("v1", no_routes()).unwrap_err();
        assert!(matches!(err, VersioningError::DuplicateVersion { .. }));
    }

    #[test]
    fn test_current_is_first_active() {
        let (registry, _) = setup(RegistrySettings::default());
        assert!(registry.current().is_none());
        assert!(registry.latest_active().is_none());

        registry.register("v1", no_routes()).unwrap();
        registry.register("v2", no_routes()).unwrap();
        registry.register("v3", no_routes()).unwrap();
        assert_eq!(registry.current().unwrap().name(), "v1");
        assert_eq!(registry.latest_active().unwrap().name(), "v3");

        registry.update("v1", |v| {
            v.deprecate(now());
        });
        registry.update("v3", |v| {
            v.beta();
        });
        assert_eq!(registry.current().unwrap().name(), "v2");
        assert_eq!(registry.latest_active().unwrap().name(), "v2");
    }

    #[test]
    fn test_usable_below_orders_by_number() {
        let (registry, _) = setup(RegistrySettings::default());
        for name in ["v2", "v10", "legacy", "v1", "v03", "v4"] {
            registry.register(name, no_routes()).unwrap();
        }
        registry.update("v4", |v| {
            v.sunset(now() - Duration::days(1));
        });

        let names = |number| {
            registry
                .usable_below(number)
                .iter()
                .map(|v| v.name().to_string())
                .collect::<Vec<_>>()
        };
        assert_eq!(names(5), vec!["v2", "v1"]);
        assert_eq!(names(u32::MAX), vec!["v10", "v2", "v1"]);
        assert!(names(1).is_empty());
    }

    #[test]
    fn test_version_middleware_follows_global() {
        let (registry, router) = setup(RegistrySettings::default());
        let mut definition = VersionDefinition::new("v1");
        definition.set_middleware(["auth"]);
        registry.register_definition(definition, no_routes()).unwrap();

        assert_eq!(
            router.middleware_for("v1"),
            Some(vec!["api".to_string(), "auth".to_string()])
        );
    }

    #[test]
    fn test_load_from_configuration_is_idempotent() {
        let (registry, router) = setup(RegistrySettings::default());
        let mut v1 = entry("v1");
        v1.status = Some(VersionStatus::Deprecated);
        let entries = vec![v1, entry("v2")];

        let mut builds = 0;
        let first = registry
            .load_from_configuration(&entries, |_| {
                builds += 1;
                no_routes()
            })
            .unwrap();
        let second = registry
            .load_from_configuration(&entries, |_| no_routes())
            .unwrap();

        assert_eq!(first, 2);
        assert_eq!(second, 0);
        assert_eq!(builds, 2);
        assert_eq!(registry.len(), 2);
        assert_eq!(router.group_count(), 2);
        assert!(registry.is_loaded());
        assert!(registry.is_deprecated("v1"));
    }

    #[test]
    fn test_reset_clears_everything() {
        let (registry, _) = setup(RegistrySettings::default());
        registry
            .load_from_configuration(&[entry("v1"), entry("v2")], |_| no_routes())
            .unwrap();
        registry.reset();

        assert!(!registry.has("v1"));
        assert!(!registry.has("v2"));
        assert!(registry.is_empty());
        assert!(!registry.is_loaded());
    }

    #[test]
    fn test_deprecate_and_sunset() {
        let (registry, _) = setup(RegistrySettings::default());
        registry.register("v1", no_routes()).unwrap();
        registry.register("v2", no_routes()).unwrap();

        let v1 = registry
            .deprecate("v1", now(), Some(now() + Duration::days(90)), Some("v2"))
            .unwrap();
        assert!(registry.is_deprecated("v1"));
        assert_eq!(v1.successor(), Some("v2"));
        assert_eq!(v1.days_until_sunset(now()), Some(90));

        registry.sunset("v1", now() - Duration::days(1), None).unwrap();
        assert!(registry.is_sunset("v1"));
        assert_eq!(registry.get("v1").unwrap().successor(), Some("v2"));

        assert!(matches!(
            registry.sunset("v9", now(), None),
            Err(VersioningError::VersionNotFound { .. })
        ));
    }

    #[test]
    fn test_snapshot_survives_update() {
        let (registry, _) = setup(RegistrySettings::default());
        registry.register("v1", no_routes()).unwrap();

        let before = registry.get("v1").unwrap();
        registry.update("v1", |v| {
            v.deprecate(now());
        });

        assert!(before.is_active(now()));
        assert!(registry.is_deprecated("v1"));
    }
}
