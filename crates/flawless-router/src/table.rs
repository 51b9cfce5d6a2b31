//! The route table.
//!
//! [`RouteTable`] is the owner of every registered route. It is mutable while
//! an application registers routes and read-only afterwards. Callers that add
//! routes at runtime clone the table, register into the clone and publish the
//! clone in place of the current one, so readers never see a partial trie.

use crate::error::{ResolveError, RouteError};
use crate::node::{Lookup, Node};
use crate::normalize::NormalizedPath;
use crate::route::{parse_pattern, Route, RouteMatch};
use http::Method;
use std::sync::Arc;

/// A method-aware segment trie of routes.
///
/// # Example
///
/// ```rust
/// use flawless_router::{NormalizedPath, ResolveError, RouteTable};
/// use http::Method;
///
/// let mut table = RouteTable::new();
/// table.register(Method::GET, "/users", "listUsers").unwrap();
/// table.register(Method::GET, "/users/{id}", "getUser").unwrap();
/// table.register(Method::GET, "/files/*path", "serveFile").unwrap();
///
/// let m = table.resolve(&Method::GET, &NormalizedPath::new("/users/42")).unwrap();
/// assert_eq!(*m.route.endpoint(), "getUser");
/// assert_eq!(m.params.get("id"), Some("42"));
///
/// let err = table.resolve(&Method::POST, &NormalizedPath::new("/users")).unwrap_err();
/// assert_eq!(err, ResolveError::MethodNotAllowed { allowed: vec![Method::GET] });
/// ```
///
/// # Route Priority
///
/// When several routes could match a path, segments are preferred in this
/// order at every level:
///
/// 1. **Static segments** (e.g., `/users/me`)
/// 2. **Parameter segments** (e.g., `/users/{id}`)
/// 3. **Wildcard segments** (e.g., `/users/*rest`)
pub struct RouteTable<E> {
    root: Node<E>,
    routes: Vec<Arc<Route<E>>>,
}

impl<E> Default for RouteTable<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> Clone for RouteTable<E> {
    fn clone(&self) -> Self {
        Self {
            root: self.root.clone(),
            routes: self.routes.clone(),
        }
    }
}

impl<E> RouteTable<E> {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self {
            root: Node::root(),
            routes: Vec::new(),
        }
    }

    /// Registers `endpoint` for `method` and `pattern`.
    ///
    /// Fails with [`RouteError::Conflict`] when a route with the same method
    /// and segment shape exists, or when a parameter or wildcard at the same
    /// position was declared with a different name. The table is unchanged
    /// on failure.
    pub fn register(
        &mut self,
        method: Method,
        pattern: &str,
        endpoint: E,
    ) -> Result<Arc<Route<E>>, RouteError> {
        let segments = parse_pattern(pattern)?;
        let route = Route::new(method, segments, endpoint);

        if let Err(err) = self.root.check_insert(&route) {
            tracing::warn!(
                http.method = %route.method(),
                route = %route.pattern(),
                error = %err,
                "route registration rejected"
            );
            return Err(err);
        }

        let route = Arc::new(route);
        self.root.insert(Arc::clone(&route));
        self.routes.push(Arc::clone(&route));
        tracing::debug!(
            http.method = %route.method(),
            route = %route.pattern(),
            "route registered"
        );
        Ok(route)
    }

    /// Resolves a normalized path for `method`.
    pub fn resolve(
        &self,
        method: &Method,
        path: &NormalizedPath,
    ) -> Result<RouteMatch<E>, ResolveError> {
        match self.root.lookup(method, path.segments()) {
            Lookup::Found(route, params) => Ok(RouteMatch {
                route: Arc::clone(route),
                params,
            }),
            Lookup::MethodNotAllowed(allowed) => Err(ResolveError::MethodNotAllowed { allowed }),
            Lookup::NotFound => Err(ResolveError::NotFound),
        }
    }

    /// Normalizes `path` and resolves it.
    pub fn resolve_path(&self, method: &Method, path: &str) -> Result<RouteMatch<E>, ResolveError> {
        self.resolve(method, &NormalizedPath::new(path))
    }

    /// Returns every registered route, sorted by pattern and then method.
    #[must_use]
    pub fn routes(&self) -> Vec<Arc<Route<E>>> {
        let mut routes = self.routes.clone();
        routes.sort_by(|a, b| {
            a.pattern()
                .cmp(b.pattern())
                .then_with(|| a.method().as_str().cmp(b.method().as_str()))
        });
        routes
    }

    /// Returns the number of registered routes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Returns true if no routes are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl<E> std::fmt::Debug for RouteTable<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteTable")
            .field("routes", &self.routes)
            .finish_non_exhaustive()
    }
}
