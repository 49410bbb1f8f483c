//! Ordered route table with typed handlers.
//!
//! Handlers are resolved to function values at registration time;
//! dispatch never does name-based lookup. The dispatch table is a
//! copy-on-write snapshot (arc-swap), rebuilt on registration and read
//! lock-free while serving, ordered by specificity (literal segment
//! count) with registration order as the tie-break.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Context;
use arc_swap::ArcSwap;
use futures::future::BoxFuture;
use http::Method;
use parking_lot::{Mutex, RwLock};
use thiserror::Error;

use crate::http::{Request, Response};

mod pattern;
pub use pattern::PathPattern;

pub type HandlerFuture = BoxFuture<'static, anyhow::Result<Response>>;
pub type Handler = Arc<dyn Fn(Request, Params) -> HandlerFuture + Send + Sync>;
pub type MiddlewareFn = Arc<dyn Fn(&Request) -> Option<Response> + Send + Sync>;

/// Wrap an async function into a boxed route [`Handler`].
pub fn handler<F, Fut>(f: F) -> Handler
where
    F: Fn(Request, Params) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Response>> + Send + 'static,
{
    Arc::new(move |req, params| Box::pin(f(req, params)))
}

/// Positional path captures, in pattern order.
#[derive(Debug, Clone, Default)]
pub struct Params(pub(crate) Vec<String>);

impl Params {
    pub fn get(&self, index: usize) -> Option<&str> {
        self.0.get(index).map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_vec(self) -> Vec<String> {
        self.0
    }
}

/// What a route runs when matched. Controller forms are resolved against
/// the controller registry while the route is being added, so a bad
/// reference fails application boot, not a live request.
pub enum Action {
    Handler(Handler),
    /// (controller, method), e.g. ("posts", "show").
    Controller(String, String),
    /// "Controller@method" string form.
    Reference(String),
}

impl From<Handler> for Action {
    fn from(h: Handler) -> Self {
        Action::Handler(h)
    }
}

impl From<&str> for Action {
    fn from(s: &str) -> Self {
        Action::Reference(s.to_string())
    }
}

impl From<(&str, &str)> for Action {
    fn from((c, m): (&str, &str)) -> Self {
        Action::Controller(c.to_string(), m.to_string())
    }
}

/// A method set + compiled path pattern bound to a handler.
pub struct Route {
    methods: Vec<Method>,
    path: String,
    pattern: PathPattern,
    handler: Handler,
    name: Option<String>,
    middleware: Vec<String>,
    /// Owner tag for bulk removal (`clear_scope`), e.g. a theme id.
    scope: Option<String>,
    seq: u64,
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Route")
            .field("methods", &self.methods)
            .field("path", &self.path)
            .field("name", &self.name)
            .field("middleware", &self.middleware)
            .finish()
    }
}

impl Route {
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn methods(&self) -> &[Method] {
        &self.methods
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn middleware(&self) -> &[String] {
        &self.middleware
    }
}

/// Attributes inherited by every route registered inside a group.
#[derive(Debug, Clone, Default)]
pub struct GroupAttributes {
    pub prefix: Option<String>,
    pub middleware: Vec<String>,
}

impl GroupAttributes {
    pub fn prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: Some(prefix.into()),
            middleware: Vec::new(),
        }
    }

    pub fn middleware(mut self, name: impl Into<String>) -> Self {
        self.middleware.push(name.into());
        self
    }
}

/// Structured errors for route registration and reverse routing.
#[derive(Debug, Error)]
pub enum RouterError {
    #[error("route name '{0}' is already registered")]
    DuplicateRouteName(String),
    #[error("controller '{0}' is not registered")]
    ControllerNotFound(String),
    #[error("method '{method}' not found in controller '{controller}'")]
    MethodNotFound { controller: String, method: String },
    #[error("invalid route action '{0}'")]
    InvalidRouteAction(String),
    #[error("named route '{0}' not found")]
    NamedRouteNotFound(String),
    #[error("invalid route pattern '{path}'")]
    InvalidPattern { path: String },
}

pub struct Router {
    base_url: String,
    seq: AtomicU64,
    /// Registration order; the source of truth the dispatch table is
    /// rebuilt from.
    routes: Mutex<Vec<Arc<Route>>>,
    /// Dispatch order snapshot: specificity desc, then registration
    /// order. Swapped whole on every registration.
    table: ArcSwap<Vec<Arc<Route>>>,
    named: RwLock<HashMap<String, Arc<Route>>>,
    controllers: RwLock<HashMap<String, HashMap<String, Handler>>>,
    middleware: RwLock<HashMap<String, MiddlewareFn>>,
    groups: Mutex<Vec<GroupAttributes>>,
    /// Scope stamped onto routes registered inside `scoped`.
    scope: Mutex<Option<String>>,
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("base_url", &self.base_url)
            .field("routes", &self.routes.lock().len())
            .finish()
    }
}

impl Router {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            seq: AtomicU64::new(0),
            routes: Mutex::new(Vec::new()),
            table: ArcSwap::from_pointee(Vec::new()),
            named: RwLock::new(HashMap::new()),
            controllers: RwLock::new(HashMap::new()),
            middleware: RwLock::new(HashMap::new()),
            groups: Mutex::new(Vec::new()),
            scope: Mutex::new(None),
        }
    }

    // ---- registration -------------------------------------------------

    pub fn get(
        &self,
        path: &str,
        action: impl Into<Action>,
        name: Option<&str>,
    ) -> Result<(), RouterError> {
        self.add(&[Method::GET], path, action, name)
    }

    pub fn post(
        &self,
        path: &str,
        action: impl Into<Action>,
        name: Option<&str>,
    ) -> Result<(), RouterError> {
        self.add(&[Method::POST], path, action, name)
    }

    pub fn put(
        &self,
        path: &str,
        action: impl Into<Action>,
        name: Option<&str>,
    ) -> Result<(), RouterError> {
        self.add(&[Method::PUT], path, action, name)
    }

    pub fn delete(
        &self,
        path: &str,
        action: impl Into<Action>,
        name: Option<&str>,
    ) -> Result<(), RouterError> {
        self.add(&[Method::DELETE], path, action, name)
    }

    pub fn patch(
        &self,
        path: &str,
        action: impl Into<Action>,
        name: Option<&str>,
    ) -> Result<(), RouterError> {
        self.add(&[Method::PATCH], path, action, name)
    }

    /// Register for an explicit method set.
    pub fn match_methods(
        &self,
        methods: &[Method],
        path: &str,
        action: impl Into<Action>,
        name: Option<&str>,
    ) -> Result<(), RouterError> {
        self.add(methods, path, action, name)
    }

    /// Register for every supported method.
    pub fn any(
        &self,
        path: &str,
        action: impl Into<Action>,
        name: Option<&str>,
    ) -> Result<(), RouterError> {
        self.add(
            &[
                Method::GET,
                Method::POST,
                Method::PUT,
                Method::DELETE,
                Method::PATCH,
            ],
            path,
            action,
            name,
        )
    }

    pub fn add(
        &self,
        methods: &[Method],
        path: &str,
        action: impl Into<Action>,
        name: Option<&str>,
    ) -> Result<(), RouterError> {
        let handler = self.resolve_action(action.into())?;
        let (full_path, middleware) = self.apply_groups(path);
        let pattern = PathPattern::compile(&full_path)?;

        let route = Arc::new(Route {
            methods: methods.to_vec(),
            path: full_path,
            pattern,
            handler,
            name: name.map(str::to_string),
            middleware,
            scope: self.scope.lock().clone(),
            seq: self.seq.fetch_add(1, Ordering::SeqCst),
        });

        if let Some(route_name) = &route.name {
            let mut named = self.named.write();
            if named.contains_key(route_name) {
                return Err(RouterError::DuplicateRouteName(route_name.clone()));
            }
            named.insert(route_name.clone(), route.clone());
        }

        let mut routes = self.routes.lock();
        routes.push(route);
        self.store_table(&routes);
        Ok(())
    }

    fn store_table(&self, routes: &[Arc<Route>]) {
        let mut ordered = routes.to_vec();
        ordered.sort_by(|a, b| {
            b.pattern
                .literals()
                .cmp(&a.pattern.literals())
                .then(a.seq.cmp(&b.seq))
        });
        self.table.store(Arc::new(ordered));
    }

    /// Tag every route registered inside `f` with `scope`, so the whole
    /// batch can later be dropped with [`Router::clear_scope`].
    pub fn scoped<F, E>(&self, scope: impl Into<String>, f: F) -> Result<(), E>
    where
        F: FnOnce(&Router) -> Result<(), E>,
    {
        *self.scope.lock() = Some(scope.into());
        let result = f(self);
        *self.scope.lock() = None;
        result
    }

    /// Remove every route carrying `scope`, freeing their names for
    /// re-registration. Controllers and middleware are untouched.
    pub fn clear_scope(&self, scope: &str) {
        let snapshot = {
            let mut routes = self.routes.lock();
            routes.retain(|r| r.scope.as_deref() != Some(scope));
            routes.clone()
        };
        self.named
            .write()
            .retain(|_, r| r.scope.as_deref() != Some(scope));
        self.store_table(&snapshot);
    }

    /// Push group attributes, run `f` so nested registrations inherit
    /// them, then pop. Groups may nest; outer prefixes end up outermost.
    pub fn group<F>(&self, attrs: GroupAttributes, f: F) -> Result<(), RouterError>
    where
        F: FnOnce(&Router) -> Result<(), RouterError>,
    {
        self.groups.lock().push(attrs);
        let result = f(self);
        self.groups.lock().pop();
        result
    }

    fn apply_groups(&self, path: &str) -> (String, Vec<String>) {
        let mut prefix = String::new();
        let mut middleware = Vec::new();
        for frame in self.groups.lock().iter() {
            if let Some(p) = &frame.prefix {
                prefix.push('/');
                prefix.push_str(p.trim_matches('/'));
            }
            middleware.extend(frame.middleware.iter().cloned());
        }
        (normalize_path(&format!("{}{}", prefix, normalize_path(path))), middleware)
    }

    fn resolve_action(&self, action: Action) -> Result<Handler, RouterError> {
        match action {
            Action::Handler(h) => Ok(h),
            Action::Controller(controller, method) => {
                self.controller_handler(&controller, &method)
            }
            Action::Reference(reference) => {
                let Some((controller, method)) = reference.split_once('@') else {
                    return Err(RouterError::InvalidRouteAction(reference));
                };
                if controller.is_empty() || method.is_empty() {
                    return Err(RouterError::InvalidRouteAction(reference.clone()));
                }
                self.controller_handler(controller, method)
            }
        }
    }

    fn controller_handler(&self, controller: &str, method: &str) -> Result<Handler, RouterError> {
        let controllers = self.controllers.read();
        let methods = controllers
            .get(controller)
            .ok_or_else(|| RouterError::ControllerNotFound(controller.to_string()))?;
        methods
            .get(method)
            .cloned()
            .ok_or_else(|| RouterError::MethodNotFound {
                controller: controller.to_string(),
                method: method.to_string(),
            })
    }

    /// Register a named controller: a map of method name → handler that
    /// `Action::Controller` / `Action::Reference` resolve against.
    pub fn register_controller<I>(&self, name: impl Into<String>, methods: I)
    where
        I: IntoIterator<Item = (&'static str, Handler)>,
    {
        let table: HashMap<String, Handler> = methods
            .into_iter()
            .map(|(m, h)| (m.to_string(), h))
            .collect();
        self.controllers.write().insert(name.into(), table);
    }

    /// Register a middleware under a name routes can reference. Names
    /// without a registration are ignored at dispatch.
    pub fn register_middleware<F>(&self, name: impl Into<String>, f: F)
    where
        F: Fn(&Request) -> Option<Response> + Send + Sync + 'static,
    {
        self.middleware.write().insert(name.into(), Arc::new(f));
    }

    // ---- dispatch -----------------------------------------------------

    /// Invoke the handler of the first matching route (specificity order,
    /// registration order as tie-break). Middleware named on the route
    /// runs first and may short-circuit. No match yields the fixed 404.
    pub async fn dispatch(&self, request: Request) -> anyhow::Result<Response> {
        let table = self.table.load_full();
        for route in table.iter() {
            if !route.methods.contains(&request.method) {
                continue;
            }
            let Some(captured) = route.pattern.matches(request.path()) else {
                continue;
            };

            let chain: Vec<MiddlewareFn> = {
                let registered = self.middleware.read();
                route
                    .middleware
                    .iter()
                    .filter_map(|n| registered.get(n).cloned())
                    .collect()
            };
            for mw in chain {
                if let Some(response) = mw(&request) {
                    return Ok(response);
                }
            }

            tracing::debug!(method = %request.method, path = %route.path, "route matched");
            return (route.handler)(request, Params(captured))
                .await
                .with_context(|| format!("handler for route '{}' failed", route.path));
        }
        Ok(Response::not_found())
    }

    // ---- reverse routing ----------------------------------------------

    /// Substitute `{key}` placeholders in the named route's path
    /// (unescaped; the caller owns URL-safety) and prefix the base URL.
    pub fn url_for(&self, name: &str, params: &[(&str, &str)]) -> Result<String, RouterError> {
        let named = self.named.read();
        let route = named
            .get(name)
            .ok_or_else(|| RouterError::NamedRouteNotFound(name.to_string()))?;
        let mut path = route.path.clone();
        for (key, value) in params {
            path = path.replace(&format!("{{{key}}}"), value);
        }
        Ok(format!("{}{}", self.base_url, path))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// All routes in registration order.
    pub fn routes(&self) -> Vec<Arc<Route>> {
        self.routes.lock().clone()
    }
}

/// Leading slash, no trailing slash (except the root itself).
fn normalize_path(path: &str) -> String {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        format!("/{trimmed}")
    }
}
