//! Outward HTTP-style route registration.
//!
//! The host owns the transport. Extensions only declare routes and the host's
//! `ApiSurface` decides how they are served. `RouteTable` is the in-process
//! implementation used by hosts without a transport and by tests.

use log::debug;
use serde_json::Value;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::{Arc, PoisonError, RwLock};

/// HTTP verb of a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Delete,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Delete => "DELETE",
        }
    }
}

/// Handler receiving request query/body as JSON and returning a JSON body.
pub type RouteHandler = Arc<dyn Fn(&Value) -> Result<Value, String> + Send + Sync>;

/// One route contributed by an extension.
#[derive(Clone)]
pub struct Route {
    pub method: HttpMethod,
    pub path: String,
    pub handler: RouteHandler,
}

impl Route {
    pub fn new(method: HttpMethod, path: impl Into<String>, handler: RouteHandler) -> Self {
        Self {
            method,
            path: path.into(),
            handler,
        }
    }

    pub fn get(path: impl Into<String>, handler: RouteHandler) -> Self {
        Self::new(HttpMethod::Get, path, handler)
    }
}

/// Route registration failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteError {
    InvalidPath(String),
    Conflict {
        method: HttpMethod,
        path: String,
        owner: String,
    },
}

impl Display for RouteError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidPath(path) => write!(f, "route path must start with '/': {path}"),
            Self::Conflict {
                method,
                path,
                owner,
            } => write!(
                f,
                "route {} {path} is already registered by `{owner}`",
                method.as_str()
            ),
        }
    }
}

impl Error for RouteError {}

/// Surface through which extensions expose routes.
pub trait ApiSurface: Send + Sync {
    fn register_route(&self, owner: &str, route: Route) -> Result<(), RouteError>;
    /// Removes every route of `owner`, returning how many were removed.
    fn unregister_routes(&self, owner: &str) -> usize;
}

struct OwnedRoute {
    owner: String,
    route: Route,
}

/// In-memory route table.
#[derive(Default)]
pub struct RouteTable {
    routes: RwLock<Vec<OwnedRoute>>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Invokes the handler registered for `method` + `path`.
    ///
    /// Returns `None` when nothing matches.
    pub fn call(
        &self,
        method: HttpMethod,
        path: &str,
        request: &Value,
    ) -> Option<Result<Value, String>> {
        let handler = {
            let routes = self.routes.read().unwrap_or_else(PoisonError::into_inner);
            routes
                .iter()
                .find(|entry| entry.route.method == method && entry.route.path == path)
                .map(|entry| Arc::clone(&entry.route.handler))?
        };
        Some(handler(request))
    }

    pub fn len(&self) -> usize {
        self.routes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ApiSurface for RouteTable {
    fn register_route(&self, owner: &str, route: Route) -> Result<(), RouteError> {
        if !route.path.starts_with('/') {
            return Err(RouteError::InvalidPath(route.path));
        }
        let mut routes = self.routes.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = routes
            .iter()
            .find(|entry| entry.route.method == route.method && entry.route.path == route.path)
        {
            return Err(RouteError::Conflict {
                method: route.method,
                path: route.path,
                owner: existing.owner.clone(),
            });
        }
        debug!(
            "event=route_register module=api status=ok owner={owner} method={} path={}",
            route.method.as_str(),
            route.path
        );
        routes.push(OwnedRoute {
            owner: owner.to_string(),
            route,
        });
        Ok(())
    }

    fn unregister_routes(&self, owner: &str) -> usize {
        let mut routes = self.routes.write().unwrap_or_else(PoisonError::into_inner);
        let before = routes.len();
        routes.retain(|entry| entry.owner != owner);
        before - routes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::{ApiSurface, HttpMethod, Route, RouteError, RouteTable};
    use serde_json::{json, Value};
    use std::sync::Arc;

    fn echo_route(path: &str) -> Route {
        Route::get(path, Arc::new(|request: &Value| Ok(request.clone())))
    }

    #[test]
    fn registers_and_calls_route() {
        let table = RouteTable::new();
        table.register_route("ranks", echo_route("/ranks/leaderboard")).unwrap();

        let response = table
            .call(HttpMethod::Get, "/ranks/leaderboard", &json!({"limit": 3}))
            .expect("route exists")
            .expect("handler succeeds");
        assert_eq!(response["limit"], 3);
        assert!(table
            .call(HttpMethod::Post, "/ranks/leaderboard", &Value::Null)
            .is_none());
    }

    #[test]
    fn rejects_conflicts_and_relative_paths() {
        let table = RouteTable::new();
        table.register_route("ranks", echo_route("/ranks")).unwrap();

        let conflict = table.register_route("other", echo_route("/ranks")).unwrap_err();
        assert!(matches!(conflict, RouteError::Conflict { ref owner, .. } if owner == "ranks"));

        let relative = table.register_route("other", echo_route("ranks")).unwrap_err();
        assert!(matches!(relative, RouteError::InvalidPath(_)));
    }

    #[test]
    fn unregister_removes_only_owner_routes() {
        let table = RouteTable::new();
        table.register_route("ranks", echo_route("/a")).unwrap();
        table.register_route("ranks", echo_route("/b")).unwrap();
        table.register_route("stats", echo_route("/c")).unwrap();

        assert_eq!(table.unregister_routes("ranks"), 2);
        assert_eq!(table.unregister_routes("ranks"), 0);
        assert_eq!(table.len(), 1);
    }
}
