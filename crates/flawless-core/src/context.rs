//! Request context types.
//!
//! A [`RequestContext`] is created by the dispatcher once a route has been
//! resolved and is owned by that single dispatch. It carries the inbound
//! request, the captured route parameters, headers staged for the response
//! in progress and two bags that middleware use to pass data forward:
//!
//! - a typed extension map keyed by `TypeId`, for Rust-side collaborators
//! - a string-keyed map of JSON values, for loosely coupled collaborators
//!
//! The context is consumed by [`RequestContext::finalize`], or dropped if the
//! dispatch is cancelled. Either way every value stored in it is released.

use crate::types::{Request, Response};
use bytes::Bytes;
use flawless_router::Params;
use http::header::{HeaderMap, HeaderName, HeaderValue};
use http::Method;
use serde::{Deserialize, Serialize};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// A unique identifier for each request, using UUID v7.
///
/// UUID v7 is time-ordered, which keeps log lines for one process roughly
/// sorted by arrival.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(Uuid);

impl RequestId {
    /// Creates a new unique request ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Creates a `RequestId` from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for RequestId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Per-dispatch state shared by middleware units and the terminal handler.
///
/// # Example
///
/// ```
/// use bytes::Bytes;
/// use flawless_core::{Params, RequestContext};
///
/// let request = http::Request::builder()
///     .uri("/users/42")
///     .body(Bytes::new())
///     .unwrap();
///
/// let mut params = Params::new();
/// params.push("id", "42");
///
/// let mut ctx = RequestContext::new(request).with_params(params);
/// ctx.insert_value("tenant", serde_json::json!("acme"));
///
/// assert_eq!(ctx.param("id"), Some("42"));
/// assert_eq!(ctx.value("tenant"), Some(&serde_json::json!("acme")));
/// ```
pub struct RequestContext {
    request_id: RequestId,
    request: Request,
    params: Params,
    route: Option<Arc<str>>,
    response_headers: HeaderMap,
    extensions: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
    values: HashMap<String, serde_json::Value>,
    started_at: Instant,
}

impl RequestContext {
    /// Creates a context for the given request with a fresh request ID.
    #[must_use]
    pub fn new(request: Request) -> Self {
        Self {
            request_id: RequestId::new(),
            request,
            params: Params::new(),
            route: None,
            response_headers: HeaderMap::new(),
            extensions: HashMap::new(),
            values: HashMap::new(),
            started_at: Instant::now(),
        }
    }

    /// Binds the captured route parameters.
    #[must_use]
    pub fn with_params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }

    /// Records the pattern of the matched route.
    #[must_use]
    pub fn with_route(mut self, pattern: Arc<str>) -> Self {
        self.route = Some(pattern);
        self
    }

    /// Overrides the generated request ID.
    #[must_use]
    pub fn with_request_id(mut self, request_id: RequestId) -> Self {
        self.request_id = request_id;
        self
    }

    /// Returns the request ID.
    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// Returns the inbound request.
    pub fn request(&self) -> &Request {
        &self.request
    }

    /// Returns the inbound request mutably.
    pub fn request_mut(&mut self) -> &mut Request {
        &mut self.request
    }

    /// Returns the request method.
    pub fn method(&self) -> &Method {
        self.request.method()
    }

    /// Returns the raw request path, as received.
    pub fn path(&self) -> &str {
        self.request.uri().path()
    }

    /// Returns a request header as a string, if present and valid UTF-8.
    pub fn header(&self, name: impl http::header::AsHeaderName) -> Option<&str> {
        self.request.headers().get(name).and_then(|v| v.to_str().ok())
    }

    /// Returns the request body.
    pub fn body(&self) -> &Bytes {
        self.request.body()
    }

    /// Returns the captured route parameters.
    pub fn params(&self) -> &Params {
        &self.params
    }

    /// Returns a single captured route parameter.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name)
    }

    /// Returns the pattern of the matched route.
    pub fn route(&self) -> Option<&str> {
        self.route.as_deref()
    }

    /// Headers staged for the response in progress.
    pub fn response_headers(&self) -> &HeaderMap {
        &self.response_headers
    }

    /// Stages a header to be added to whatever response the chain produces.
    pub fn set_response_header(&mut self, name: HeaderName, value: HeaderValue) {
        self.response_headers.insert(name, value);
    }

    /// Returns the staged response headers mutably.
    pub fn response_headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.response_headers
    }

    /// Returns when the dispatch started.
    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    /// Returns the time elapsed since the dispatch started.
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Stores a typed extension value, replacing any previous value of `T`.
    pub fn set_extension<T: Send + Sync + 'static>(&mut self, value: T) {
        self.extensions.insert(TypeId::of::<T>(), Box::new(value));
    }

    /// Retrieves a typed extension value.
    pub fn get_extension<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.extensions
            .get(&TypeId::of::<T>())
            .and_then(|b| b.downcast_ref())
    }

    /// Retrieves a typed extension value mutably.
    pub fn get_extension_mut<T: Send + Sync + 'static>(&mut self) -> Option<&mut T> {
        self.extensions
            .get_mut(&TypeId::of::<T>())
            .and_then(|b| b.downcast_mut())
    }

    /// Removes and returns a typed extension value.
    pub fn remove_extension<T: Send + Sync + 'static>(&mut self) -> Option<T> {
        self.extensions
            .remove(&TypeId::of::<T>())
            .and_then(|b| b.downcast().ok())
            .map(|b| *b)
    }

    /// Checks if an extension of the given type exists.
    pub fn has_extension<T: Send + Sync + 'static>(&self) -> bool {
        self.extensions.contains_key(&TypeId::of::<T>())
    }

    /// Stores a value in the key-value bag.
    pub fn insert_value(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.values.insert(key.into(), value);
    }

    /// Reads a value from the key-value bag.
    pub fn value(&self, key: &str) -> Option<&serde_json::Value> {
        self.values.get(key)
    }

    /// Removes a value from the key-value bag.
    pub fn remove_value(&mut self, key: &str) -> Option<serde_json::Value> {
        self.values.remove(key)
    }

    /// Consumes the context, applying staged headers to the response.
    ///
    /// Headers the response already carries win over staged ones.
    pub fn finalize(self, mut response: Response) -> Response {
        let headers = response.headers_mut();
        let mut current: Option<(HeaderName, bool)> = None;
        for (name, value) in self.response_headers {
            if let Some(name) = name {
                let keep = !headers.contains_key(&name);
                current = Some((name, keep));
            }
            if let Some((name, true)) = &current {
                headers.append(name.clone(), value);
            }
        }
        response
    }
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("request_id", &self.request_id)
            .field("method", self.request.method())
            .field("path", &self.request.uri().path())
            .field("params", &self.params)
            .field("route", &self.route)
            .field("extensions", &self.extensions.len())
            .field("values", &self.values.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}
