//! Request dispatch.
//!
//! ```text
//! request ─▶ normalize ─▶ cache ──hit──────────────┐
//!                           │ miss                 ▼
//!                           └─▶ table ─▶ insert ─▶ context ─▶ chain ─▶ handler
//!                                 │
//!                                 ├─ NotFound          ─▶ 404
//!                                 └─ MethodNotAllowed  ─▶ 405 (or automatic OPTIONS)
//! ```
//!
//! The route table is an immutable snapshot behind an [`ArcSwap`]. Runtime
//! registration clones it, registers into the clone, swaps it in and then
//! invalidates the cache.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use futures_util::FutureExt;
use http::header::ALLOW;
use http::{Method, StatusCode};
use parking_lot::Mutex;
use tracing::{field, Instrument, Span};

use flawless_config::{ConfigError, FlawlessConfig};
use flawless_core::{
    allow_header, empty_response, render_result, BoxFuture, BoxedHandler, DispatchError, Handler,
    HandlerError, HandlerResult, Outcome, RejectedBy, Request, RequestContext, RequestId, Response,
    ResponseExt,
};
use flawless_middleware::stages::CsrfStore;
use flawless_middleware::{BoxedMiddleware, Chain, ChainBuilder, ChainResult, Middleware};
use flawless_router::{
    CacheConfig, CacheStats, NormalizedPath, ResolveError, Route, RouteCache, RouteError,
    RouteMatch, RouteTable,
};

use crate::builtins;

/// Per-dispatch deadline used unless configured otherwise.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// What a registered route resolves to.
pub struct Endpoint {
    handler: BoxedHandler,
    overrides: Vec<BoxedMiddleware>,
    cacheable: bool,
}

impl Endpoint {
    fn new(handler: BoxedHandler, options: RouteOptions) -> Self {
        Self {
            handler,
            overrides: options.middleware_overrides,
            cacheable: options.cacheable,
        }
    }

    /// Returns the terminal handler.
    pub fn handler(&self) -> &BoxedHandler {
        &self.handler
    }

    /// Returns the route-scoped units, run innermost.
    pub fn overrides(&self) -> &[BoxedMiddleware] {
        &self.overrides
    }

    /// Returns whether resolutions of this route may be cached.
    pub fn cacheable(&self) -> bool {
        self.cacheable
    }
}

/// Options accepted when registering a route.
///
/// ```
/// use flawless::RouteOptions;
/// use flawless_middleware::middleware_fn;
///
/// let options = RouteOptions::new()
///     .middleware(middleware_fn("audit", |ctx, next| Box::pin(next.run(ctx))))
///     .cacheable(false);
/// ```
#[derive(Clone)]
pub struct RouteOptions {
    middleware_overrides: Vec<BoxedMiddleware>,
    cacheable: bool,
}

impl Default for RouteOptions {
    fn default() -> Self {
        Self {
            middleware_overrides: Vec::new(),
            cacheable: true,
        }
    }
}

impl RouteOptions {
    /// Cacheable, no overrides.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a unit that runs after the global chain, just before the handler.
    #[must_use]
    pub fn middleware<M: Middleware>(mut self, unit: M) -> Self {
        self.middleware_overrides.push(Arc::new(unit));
        self
    }

    /// Adds an already shared unit.
    #[must_use]
    pub fn middleware_arc(mut self, unit: BoxedMiddleware) -> Self {
        self.middleware_overrides.push(unit);
        self
    }

    /// Controls whether resolutions of the route enter the cache.
    #[must_use]
    pub fn cacheable(mut self, cacheable: bool) -> Self {
        self.cacheable = cacheable;
        self
    }
}

/// A registered route, as listed by [`Dispatcher::routes`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteInfo {
    /// HTTP method.
    pub method: Method,
    /// Canonical pattern.
    pub pattern: String,
    /// Whether resolutions are cached.
    pub cacheable: bool,
    /// Names of the route-scoped units.
    pub overrides: Vec<&'static str>,
}

impl From<&Route<Endpoint>> for RouteInfo {
    fn from(route: &Route<Endpoint>) -> Self {
        let endpoint = route.endpoint();
        Self {
            method: route.method().clone(),
            pattern: route.pattern().to_string(),
            cacheable: endpoint.cacheable,
            overrides: endpoint.overrides.iter().map(|unit| unit.name()).collect(),
        }
    }
}

/// Entry point that turns requests into responses.
///
/// Safe to share across tasks; wrap it in an [`Arc`] to serve it.
pub struct Dispatcher {
    table: ArcSwap<RouteTable<Endpoint>>,
    cache: RouteCache<Endpoint>,
    chain: Chain,
    request_timeout: Option<Duration>,
    handle_options: bool,
    csrf_store: Option<Arc<CsrfStore>>,
    registration: Mutex<()>,
}

impl Dispatcher {
    /// Creates a builder.
    #[must_use]
    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::new()
    }

    /// Dispatches one request.
    ///
    /// Every failure is rendered into a response tagged with its
    /// [`Outcome`]. Dropping the returned future abandons the chain and
    /// releases the request context.
    pub async fn handle(&self, request: Request) -> Response {
        let request_id = RequestId::new();
        let span = tracing::info_span!(
            "dispatch",
            request_id = %request_id,
            http.method = %request.method(),
            http.path = %request.uri().path(),
            route = field::Empty,
            outcome = field::Empty,
        );
        self.dispatch(request, request_id).instrument(span).await
    }

    async fn dispatch(&self, request: Request, request_id: RequestId) -> Response {
        let started = Instant::now();
        let method = request.method().clone();
        let path = NormalizedPath::from_uri(request.uri());

        let response = match self.resolve(&method, &path) {
            Ok(matched) => {
                Span::current().record("route", matched.route.pattern());
                self.run_matched(request, request_id, matched).await
            }
            Err(ResolveError::NotFound) => {
                DispatchError::NotFound.into_response(Some(&request_id.to_string()))
            }
            Err(ResolveError::MethodNotAllowed { allowed }) => {
                if method == Method::OPTIONS && self.handle_options {
                    self.run_options(request, request_id, allowed).await
                } else {
                    DispatchError::MethodNotAllowed { allowed }
                        .into_response(Some(&request_id.to_string()))
                }
            }
        };

        record_outcome(&response, started);
        response
    }

    /// Looks the route up in the cache, falling back to the table.
    fn resolve(
        &self,
        method: &Method,
        path: &NormalizedPath,
    ) -> Result<RouteMatch<Endpoint>, ResolveError> {
        if let Some(entry) = self.cache.lookup(method, path.as_str()) {
            tracing::debug!(cache_hit = true, route = %entry.matched.route.pattern(), "route resolved");
            return Ok(entry.matched);
        }

        // Read the epoch before loading the snapshot, so an insert racing a
        // registration is refused rather than caching a stale route.
        let epoch = self.cache.epoch();
        let table = self.table.load();
        let matched = table.resolve(method, path)?;

        if matched.route.endpoint().cacheable {
            self.cache
                .insert_if_current(epoch, method.clone(), path.as_str(), matched.clone());
        }
        tracing::debug!(cache_hit = false, route = %matched.route.pattern(), "route resolved");
        Ok(matched)
    }

    async fn run_matched(
        &self,
        request: Request,
        request_id: RequestId,
        matched: RouteMatch<Endpoint>,
    ) -> Response {
        let RouteMatch { route, params } = matched;
        let mut ctx = RequestContext::new(request)
            .with_request_id(request_id)
            .with_params(params)
            .with_route(route.pattern_arc());

        let endpoint = route.endpoint();
        let result = self
            .guarded(self.chain.run(&mut ctx, &endpoint.overrides, endpoint.handler.as_ref()))
            .await;

        let response = render(result, request_id);
        ctx.finalize(response)
    }

    /// Answers OPTIONS for a path known under other methods by running the
    /// global chain around a terminal that replies `204` with `Allow`.
    async fn run_options(
        &self,
        request: Request,
        request_id: RequestId,
        mut allowed: Vec<Method>,
    ) -> Response {
        if !allowed.contains(&Method::OPTIONS) {
            allowed.push(Method::OPTIONS);
        }
        let terminal = AllowResponder {
            allowed: Arc::from(allowed),
        };

        let mut ctx = RequestContext::new(request).with_request_id(request_id);
        let result = self.guarded(self.chain.run(&mut ctx, &[], &terminal)).await;

        let response = render(result, request_id);
        ctx.finalize(response)
    }

    /// Applies the deadline and turns panics into handler failures.
    async fn guarded<F>(&self, chain: F) -> ChainResult
    where
        F: Future<Output = ChainResult>,
    {
        let caught = AssertUnwindSafe(chain).catch_unwind();
        let result = match self.request_timeout {
            Some(limit) => match tokio::time::timeout(limit, caught).await {
                Ok(result) => result,
                Err(_) => return Err(HandlerError::TimedOut(limit).into()),
            },
            None => caught.await,
        };

        result.unwrap_or_else(|payload| Err(HandlerError::Panicked(panic_message(&*payload)).into()))
    }

    /// Registers a route while serving.
    ///
    /// The new table is published atomically and the cache is invalidated
    /// afterwards. In-flight requests finish against the snapshot they
    /// resolved with.
    pub fn register<H: Handler>(
        &self,
        method: Method,
        pattern: &str,
        handler: H,
        options: RouteOptions,
    ) -> Result<RouteInfo, RouteError> {
        let _serialized = self.registration.lock();

        let mut next = RouteTable::clone(&self.table.load());
        let route = next.register(method, pattern, Endpoint::new(Arc::new(handler), options))?;

        self.table.store(Arc::new(next));
        self.cache.invalidate_all();
        Ok(RouteInfo::from(&*route))
    }

    /// Lists registered routes, sorted by pattern and then method.
    pub fn routes(&self) -> Vec<RouteInfo> {
        self.table
            .load()
            .routes()
            .iter()
            .map(|route| RouteInfo::from(&**route))
            .collect()
    }

    /// Returns cache counters.
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Drops every cached resolution.
    pub fn invalidate_cache(&self) {
        self.cache.invalidate_all();
    }

    /// Returns the global chain.
    pub fn chain(&self) -> &Chain {
        &self.chain
    }

    /// Returns the CSRF token store installed from configuration, if any.
    pub fn csrf_store(&self) -> Option<&Arc<CsrfStore>> {
        self.csrf_store.as_ref()
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("routes", &self.table.load().len())
            .field("chain", &self.chain)
            .field("cache", &self.cache.stats())
            .field("request_timeout", &self.request_timeout)
            .field("handle_options", &self.handle_options)
            .finish_non_exhaustive()
    }
}

struct AllowResponder {
    allowed: Arc<[Method]>,
}

impl Handler for AllowResponder {
    fn call<'a>(&'a self, _ctx: &'a mut RequestContext) -> BoxFuture<'a, HandlerResult> {
        let mut response = empty_response(StatusCode::NO_CONTENT);
        if let Some(value) = allow_header(&self.allowed) {
            response.headers_mut().insert(ALLOW, value);
        }
        Box::pin(async move { Ok(response) })
    }
}

fn render(result: ChainResult, request_id: RequestId) -> Response {
    if let Err(DispatchError::Handler(failure)) = &result {
        tracing::error!(error = %failure, "handler failed");
    }
    render_result(result, &request_id.to_string())
}

fn record_outcome(response: &Response, started: Instant) {
    let outcome = response.outcome().unwrap_or(Outcome::Matched);
    Span::current().record("outcome", outcome.as_str());

    let status = response.status().as_u16();
    let duration_ms = started.elapsed().as_secs_f64() * 1000.0;

    match outcome {
        Outcome::RejectedByPolicy => {
            let policy = response
                .extensions()
                .get::<RejectedBy>()
                .map_or("unknown", |rejected| rejected.0.as_str());
            tracing::warn!(policy, http.status_code = status, duration_ms, "request rejected");
        }
        _ => {
            tracing::debug!(
                outcome = outcome.as_str(),
                http.status_code = status,
                duration_ms,
                "request dispatched"
            );
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Builder for a [`Dispatcher`].
///
/// Routes registered here fail fast with [`RouteError`]; the application
/// decides whether that aborts startup.
///
/// ```
/// use flawless::{Dispatcher, RouteOptions};
/// use flawless_core::{empty_response, handler_fn};
/// use http::{Method, StatusCode};
///
/// # fn main() -> Result<(), flawless_router::RouteError> {
/// let dispatcher = Dispatcher::builder()
///     .route(
///         Method::GET,
///         "/health",
///         handler_fn(|_ctx| Box::pin(async { Ok(empty_response(StatusCode::OK)) })),
///     )?
///     .build();
/// assert_eq!(dispatcher.routes().len(), 1);
/// # Ok(())
/// # }
/// ```
pub struct DispatcherBuilder {
    table: RouteTable<Endpoint>,
    chain: ChainBuilder,
    cache: CacheConfig,
    request_timeout: Option<Duration>,
    handle_options: bool,
    csrf_store: Option<Arc<CsrfStore>>,
}

impl Default for DispatcherBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl DispatcherBuilder {
    /// Empty table and chain, default cache, 30 second deadline.
    #[must_use]
    pub fn new() -> Self {
        Self {
            table: RouteTable::new(),
            chain: ChainBuilder::new(),
            cache: CacheConfig::default(),
            request_timeout: Some(DEFAULT_REQUEST_TIMEOUT),
            handle_options: true,
            csrf_store: None,
        }
    }

    /// Starts from a validated configuration.
    ///
    /// Enabled built-ins are installed in the order CORS, rate limit, CSRF;
    /// units added afterwards run inside them.
    pub fn from_config(config: &FlawlessConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let mut builder = Self::new().cache_capacity(config.dispatcher.cache_capacity);
        if let Some(secs) = config.dispatcher.cache_ttl_secs {
            builder = builder.cache_ttl(Duration::from_secs(secs));
        }
        builder.request_timeout = config.dispatcher.request_timeout_ms.map(Duration::from_millis);
        builder.handle_options = config.dispatcher.handle_options;

        if config.cors.enabled {
            builder = builder.middleware(builtins::cors(&config.cors)?);
        }
        if config.rate_limit.enabled {
            builder = builder.middleware(builtins::rate_limit(&config.rate_limit)?);
        }
        if config.csrf.enabled {
            let (unit, store) = builtins::csrf(&config.csrf);
            builder.csrf_store = Some(store);
            builder = builder.middleware(unit);
        }

        Ok(builder)
    }

    /// Appends a unit to the global chain.
    #[must_use]
    pub fn middleware<M: Middleware>(mut self, unit: M) -> Self {
        self.chain.push(Arc::new(unit));
        self
    }

    /// Appends an already shared unit to the global chain.
    #[must_use]
    pub fn middleware_arc(mut self, unit: BoxedMiddleware) -> Self {
        self.chain.push(unit);
        self
    }

    /// Registers a cacheable route without overrides.
    pub fn route<H: Handler>(
        self,
        method: Method,
        pattern: &str,
        handler: H,
    ) -> Result<Self, RouteError> {
        self.route_with(method, pattern, handler, RouteOptions::default())
    }

    /// Registers a route with options.
    pub fn route_with<H: Handler>(
        mut self,
        method: Method,
        pattern: &str,
        handler: H,
        options: RouteOptions,
    ) -> Result<Self, RouteError> {
        self.table
            .register(method, pattern, Endpoint::new(Arc::new(handler), options))?;
        Ok(self)
    }

    /// Sets the route cache capacity; zero is raised to one.
    #[must_use]
    pub fn cache_capacity(mut self, capacity: usize) -> Self {
        let ttl = self.cache.ttl;
        self.cache = CacheConfig::with_capacity(capacity);
        self.cache.ttl = ttl;
        self
    }

    /// Expires cached resolutions after `ttl`.
    #[must_use]
    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache = self.cache.ttl(ttl);
        self
    }

    /// Sets the per-dispatch deadline.
    #[must_use]
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Removes the per-dispatch deadline.
    #[must_use]
    pub fn no_request_timeout(mut self) -> Self {
        self.request_timeout = None;
        self
    }

    /// Enables or disables automatic OPTIONS responses.
    #[must_use]
    pub fn handle_options(mut self, enabled: bool) -> Self {
        self.handle_options = enabled;
        self
    }

    /// Freezes the chain and builds the dispatcher.
    #[must_use]
    pub fn build(self) -> Dispatcher {
        tracing::debug!(
            routes = self.table.len(),
            units = self.chain.len(),
            cache_capacity = self.cache.capacity.get(),
            "dispatcher built"
        );
        Dispatcher {
            table: ArcSwap::from_pointee(self.table),
            cache: RouteCache::new(self.cache),
            chain: self.chain.build(),
            request_timeout: self.request_timeout,
            handle_options: self.handle_options,
            csrf_store: self.csrf_store,
            registration: Mutex::new(()),
        }
    }
}
