//! Route table collaborator.
//!
//! The version engine never executes routing itself. It needs three things
//! from whatever HTTP router hosts it: register a group of routes for a
//! version, probe whether a route exists without executing it, and dispatch a
//! request into the group of the version it resolved to. [`RouteTable`]
//! captures that contract; [`MemoryRouter`] is an in-process implementation.

use crate::error::HandlerError;
use crate::request::{ApiRequest, ApiResponse};
use async_trait::async_trait;
use dashmap::DashMap;
use http::Method;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Outcome of a request handler.
pub type HandlerResult = Result<ApiResponse, HandlerError>;

/// A request handler.
pub type Handler = Arc<dyn Fn(&ApiRequest) -> HandlerResult + Send + Sync>;

/// Values a route handler may return.
pub trait IntoHandlerResult {
    fn into_handler_result(self) -> HandlerResult;
}

impl IntoHandlerResult for ApiResponse {
    fn into_handler_result(self) -> HandlerResult {
        Ok(self)
    }
}

impl<E> IntoHandlerResult for Result<ApiResponse, E>
where
    E: Into<HandlerError>,
{
    fn into_handler_result(self) -> HandlerResult {
        self.map_err(Into::into)
    }
}

/// Route-building callback stored with a version until registration, where
/// it is invoked exactly once.
pub type RouteBuilder = Box<dyn FnOnce(&mut RouteGroupBuilder) + Send>;

/// Wrap a closure as a [`RouteBuilder`].
pub fn routes<F>(build: F) -> RouteBuilder
where
    F: FnOnce(&mut RouteGroupBuilder) + Send + 'static,
{
    Box::new(build)
}

/// A route builder that declares nothing.
pub fn no_routes() -> RouteBuilder {
    Box::new(|_| {})
}

/// One declared route, relative to its group prefix.
#[derive(Clone)]
pub struct RouteSpec {
    pub method: Method,
    pub path: String,
    pub name: Option<String>,
    pub handler: Handler,
}

impl fmt::Debug for RouteSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteSpec")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Collects the routes a [`RouteBuilder`] declares.
#[derive(Debug, Default)]
pub struct RouteGroupBuilder {
    routes: Vec<RouteSpec>,
}

impl RouteGroupBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route<H, R>(&mut self, method: Method, path: &str, handler: H) -> &mut Self
    where
        H: Fn(&ApiRequest) -> R + Send + Sync + 'static,
        R: IntoHandlerResult + 'static,
    {
        self.routes.push(RouteSpec {
            method,
            path: path.trim_matches('/').to_string(),
            name: None,
            handler: Arc::new(move |request: &ApiRequest| {
                handler(request).into_handler_result()
            }),
        });
        self
    }

    pub fn get<H, R>(&mut self, path: &str, handler: H) -> &mut Self
    where
        H: Fn(&ApiRequest) -> R + Send + Sync + 'static,
        R: IntoHandlerResult + 'static,
    {
        self.route(Method::GET, path, handler)
    }

    pub fn post<H, R>(&mut self, path: &str, handler: H) -> &mut Self
    where
        H: Fn(&ApiRequest) -> R + Send + Sync + 'static,
        R: IntoHandlerResult + 'static,
    {
        self.route(Method::POST, path, handler)
    }

    pub fn put<H, R>(&mut self, path: &str, handler: H) -> &mut Self
    where
        H: Fn(&ApiRequest) -> R + Send + Sync + 'static,
        R: IntoHandlerResult + 'static,
    {
        self.route(Method::PUT, path, handler)
    }

    pub fn delete<H, R>(&mut self, path: &str, handler: H) -> &mut Self
    where
        H: Fn(&ApiRequest) -> R + Send + Sync + 'static,
        R: IntoHandlerResult + 'static,
    {
        self.route(Method::DELETE, path, handler)
    }

    /// Name the most recently declared route.
    pub fn name(&mut self, name: &str) -> &mut Self {
        if let Some(last) = self.routes.last_mut() {
            last.name = Some(name.to_string());
        }
        self
    }

    pub fn into_routes(self) -> Vec<RouteSpec> {
        self.routes
    }
}

/// Everything the router needs to mount one version's routes.
#[derive(Debug, Clone)]
pub struct RouteGroup {
    /// Version the group belongs to.
    pub version: String,
    /// Path prefix without leading or trailing slashes, e.g. `api/v1`.
    pub prefix: String,
    /// Only serve requests for this host, when set.
    pub domain: Option<String>,
    /// Prefix prepended to route names.
    pub name_prefix: Option<String>,
    /// Global version-handling middleware followed by the version's own.
    pub middleware: Vec<String>,
    pub routes: Vec<RouteSpec>,
}

/// Opaque reference to a mounted route group, owned by the router.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RouteGroupHandle(u64);

impl RouteGroupHandle {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

/// The router capabilities the version engine depends on.
#[async_trait]
pub trait RouteTable: Send + Sync {
    /// Mount a version's route group. Registering the same version again
    /// replaces its routes.
    fn register_group(&self, group: RouteGroup) -> RouteGroupHandle;

    /// Whether a route matching `method` and `path` exists. A dry run: no
    /// handler executes and nothing is recorded.
    fn route_exists(&self, method: &Method, path: &str) -> bool;

    /// Dispatch a request into the route group of `version`. A missing
    /// route is an `Ok` 404; `Err` carries a handler failure.
    async fn dispatch(&self, request: &ApiRequest, version: &str) -> HandlerResult;
}

struct MountedGroup {
    handle: RouteGroupHandle,
    domain: Option<String>,
    middleware: Vec<String>,
    route_names: Vec<String>,
    routes: HashMap<Method, matchit::Router<Handler>>,
}

impl MountedGroup {
    fn find(&self, method: &Method, path: &str) -> Option<&Handler> {
        self.routes
            .get(method)
            .and_then(|router| router.at(path).ok())
            .map(|matched| matched.value)
    }
}

/// In-memory route table backed by `matchit`, one group per version.
#[derive(Default)]
pub struct MemoryRouter {
    groups: DashMap<String, MountedGroup>,
    next_id: AtomicU64,
}

impl MemoryRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Middleware stack mounted for a version's group.
    pub fn middleware_for(&self, version: &str) -> Option<Vec<String>> {
        self.groups.get(version).map(|g| g.middleware.clone())
    }

    /// Fully prefixed route names for a version's group.
    pub fn route_names(&self, version: &str) -> Vec<String> {
        self.groups
            .get(version)
            .map(|g| g.route_names.clone())
            .unwrap_or_default()
    }

    /// Number of mounted groups.
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }
}

#[async_trait]
impl RouteTable for MemoryRouter {
    fn register_group(&self, group: RouteGroup) -> RouteGroupHandle {
        let handle = RouteGroupHandle::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut routes: HashMap<Method, matchit::Router<Handler>> = HashMap::new();
        let mut route_names = Vec::new();

        for spec in group.routes {
            let full_path = join_path(&group.prefix, &spec.path);
            let router = routes
                .entry(spec.method.clone())
                .or_insert_with(matchit::Router::new);
            if let Err(e) = router.insert(full_path.clone(), spec.handler) {
                warn!(
                    version = %group.version,
                    path = %full_path,
                    error = %e,
                    "Skipping conflicting route"
                );
                continue;
            }
            if let Some(name) = spec.name {
                route_names.push(format!(
                    "{}{}",
                    group.name_prefix.as_deref().unwrap_or_default(),
                    name
                ));
            }
        }

        debug!(
            version = %group.version,
            prefix = %group.prefix,
            middleware = ?group.middleware,
            "Mounted route group"
        );

        self.groups.insert(
            group.version,
            MountedGroup {
                handle,
                domain: group.domain,
                middleware: group.middleware,
                route_names,
                routes,
            },
        );

        handle
    }

    fn route_exists(&self, method: &Method, path: &str) -> bool {
        let path = join_path("", path);
        self.groups
            .iter()
            .any(|group| group.find(method, &path).is_some())
    }

    async fn dispatch(&self, request: &ApiRequest, version: &str) -> HandlerResult {
        let Some(group) = self.groups.get(version) else {
            return Ok(ApiResponse::not_found());
        };

        if let Some(domain) = &group.domain {
            if request.host() != Some(domain.as_str()) {
                return Ok(ApiResponse::not_found());
            }
        }

        match group.find(request.method(), request.path()) {
            Some(handler) => {
                debug!(
                    version = %version,
                    group = group.handle.id(),
                    path = %request.path(),
                    "Dispatching request"
                );
                handler(request)
            }
            None => Ok(ApiResponse::not_found()),
        }
    }
}

/// Join a prefix and a path into an absolute, slash-normalized path.
pub(crate) fn join_path(prefix: &str, path: &str) -> String {
    let parts: Vec<&str> = [prefix.trim_matches('/'), path.trim_matches('/')]
        .into_iter()
        .filter(|p| !p.is_empty())
        .collect();
    format!("/{}", parts.join("/"))
}
