//! CORS (Cross-Origin Resource Sharing) middleware.
//!
//! ## Preflight Requests
//!
//! An `OPTIONS` request carrying both `Origin` and
//! `Access-Control-Request-Method` is a preflight. It is answered here with
//! `204 No Content` and never reaches inner units or the handler.
//!
//! ## Regular Requests
//!
//! A request whose `Origin` is not allowed is rejected with `403` and code
//! `ORIGIN_NOT_ALLOWED`. Requests from allowed origins continue down the
//! chain and get CORS headers added to whatever response comes back,
//! including short-circuit responses from inner units. Requests without an
//! `Origin` header are same-origin and pass untouched.
//!
//! ## Example
//!
//! ```
//! use flawless_middleware::stages::CorsMiddleware;
//! use http::Method;
//! use std::time::Duration;
//!
//! let cors = CorsMiddleware::builder()
//!     .allow_origin("https://app.example.com")
//!     .allow_methods([Method::GET, Method::POST])
//!     .allow_headers(["Content-Type", "X-CSRF-Token"])
//!     .allow_credentials(true)
//!     .max_age(Duration::from_secs(3600))
//!     .build();
//! # let _ = cors;
//! ```

use crate::middleware::{ChainResult, Middleware, Next};
use flawless_core::{
    empty_response, BoxFuture, Outcome, PolicyRejection, RejectReason, RequestContext, Response,
    ResponseExt,
};
use http::{HeaderMap, HeaderValue, Method, StatusCode};
use std::time::Duration;

/// CORS header names.
pub mod headers {
    /// `Access-Control-Allow-Origin` header.
    pub const ALLOW_ORIGIN: &str = "access-control-allow-origin";
    /// `Access-Control-Allow-Methods` header.
    pub const ALLOW_METHODS: &str = "access-control-allow-methods";
    /// `Access-Control-Allow-Headers` header.
    pub const ALLOW_HEADERS: &str = "access-control-allow-headers";
    /// `Access-Control-Allow-Credentials` header.
    pub const ALLOW_CREDENTIALS: &str = "access-control-allow-credentials";
    /// `Access-Control-Max-Age` header.
    pub const MAX_AGE: &str = "access-control-max-age";
    /// `Access-Control-Expose-Headers` header.
    pub const EXPOSE_HEADERS: &str = "access-control-expose-headers";
    /// `Access-Control-Request-Method` header (preflight).
    pub const REQUEST_METHOD: &str = "access-control-request-method";
    /// `Access-Control-Request-Headers` header (preflight).
    pub const REQUEST_HEADERS: &str = "access-control-request-headers";
    /// `Origin` header.
    pub const ORIGIN: &str = "origin";
    /// `Vary` header.
    pub const VARY: &str = "vary";
}

/// The set of allowed origins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllowedOrigins {
    /// Allow any origin (wildcard `*`).
    Any,
    /// Allow specific origins, compared exactly.
    List(Vec<String>),
}

impl AllowedOrigins {
    /// Checks if an origin is allowed.
    pub fn is_allowed(&self, origin: &str) -> bool {
        match self {
            Self::Any => true,
            Self::List(origins) => origins.iter().any(|o| o == origin),
        }
    }
}

/// Configuration for [`CorsMiddleware`].
///
/// Defaults allow any origin, the methods `GET, POST, PUT, DELETE, OPTIONS`
/// and any request header, without credentials.
#[derive(Debug, Clone)]
pub struct CorsConfig {
    allowed_origins: AllowedOrigins,
    allowed_methods: Vec<Method>,
    allowed_headers: Vec<String>,
    expose_headers: Vec<String>,
    allow_credentials: bool,
    max_age: Option<Duration>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: AllowedOrigins::Any,
            allowed_methods: vec![
                Method::GET,
                Method::POST,
                Method::PUT,
                Method::DELETE,
                Method::OPTIONS,
            ],
            allowed_headers: vec!["*".to_string()],
            expose_headers: Vec::new(),
            allow_credentials: false,
            max_age: None,
        }
    }
}

impl CorsConfig {
    /// Returns the allowed origins.
    pub fn allowed_origins(&self) -> &AllowedOrigins {
        &self.allowed_origins
    }

    /// Returns the allowed methods.
    pub fn allowed_methods(&self) -> &[Method] {
        &self.allowed_methods
    }

    /// Returns whether credentials are allowed.
    pub fn allow_credentials(&self) -> bool {
        self.allow_credentials
    }

    fn allows_any_header(&self) -> bool {
        self.allowed_headers.iter().any(|h| h == "*")
    }

    /// `Access-Control-Allow-Origin` value for an allowed origin.
    ///
    /// With credentials the wildcard is not accepted by browsers, so the
    /// request origin is echoed instead.
    fn origin_value(&self, origin: &str) -> Option<HeaderValue> {
        match &self.allowed_origins {
            AllowedOrigins::Any if !self.allow_credentials => Some(HeaderValue::from_static("*")),
            _ => HeaderValue::from_str(origin).ok(),
        }
    }
}

/// Builder for [`CorsMiddleware`].
#[derive(Debug, Clone, Default)]
pub struct CorsBuilder {
    config: CorsConfig,
    origins_set: bool,
}

impl CorsBuilder {
    /// Creates a builder with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allows any origin.
    #[must_use]
    pub fn allow_any_origin(mut self) -> Self {
        self.config.allowed_origins = AllowedOrigins::Any;
        self.origins_set = true;
        self
    }

    /// Adds an allowed origin. The first call replaces the default wildcard.
    #[must_use]
    pub fn allow_origin(mut self, origin: impl Into<String>) -> Self {
        let origin = origin.into();
        if origin == "*" {
            return self.allow_any_origin();
        }
        match &mut self.config.allowed_origins {
            AllowedOrigins::List(origins) => origins.push(origin),
            AllowedOrigins::Any if !self.origins_set => {
                self.config.allowed_origins = AllowedOrigins::List(vec![origin]);
            }
            AllowedOrigins::Any => {}
        }
        self.origins_set = true;
        self
    }

    /// Sets the allowed origins. A `*` entry allows any origin.
    #[must_use]
    pub fn allow_origins<I, S>(mut self, origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let origins: Vec<String> = origins.into_iter().map(Into::into).collect();
        self.config.allowed_origins = if origins.iter().any(|o| o == "*") {
            AllowedOrigins::Any
        } else {
            AllowedOrigins::List(origins)
        };
        self.origins_set = true;
        self
    }

    /// Sets the allowed HTTP methods.
    #[must_use]
    pub fn allow_methods<I>(mut self, methods: I) -> Self
    where
        I: IntoIterator<Item = Method>,
    {
        self.config.allowed_methods = methods.into_iter().collect();
        self
    }

    /// Sets the allowed request headers. `*` allows any header.
    #[must_use]
    pub fn allow_headers<I, S>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.allowed_headers = headers
            .into_iter()
            .map(|h| h.into().to_ascii_lowercase())
            .collect();
        self
    }

    /// Sets headers exposed to scripts.
    #[must_use]
    pub fn expose_headers<I, S>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.expose_headers = headers
            .into_iter()
            .map(|h| h.into().to_ascii_lowercase())
            .collect();
        self
    }

    /// Sets whether to allow credentials.
    #[must_use]
    pub fn allow_credentials(mut self, allow: bool) -> Self {
        self.config.allow_credentials = allow;
        self
    }

    /// Sets how long browsers may cache a preflight response.
    #[must_use]
    pub fn max_age(mut self, duration: Duration) -> Self {
        self.config.max_age = Some(duration);
        self
    }

    /// Builds the middleware.
    #[must_use]
    pub fn build(self) -> CorsMiddleware {
        CorsMiddleware {
            config: self.config,
        }
    }
}

/// CORS middleware.
///
/// Place it first in the chain so preflights are answered before any other
/// policy runs and every response, rejections included, carries CORS
/// headers.
#[derive(Debug, Clone, Default)]
pub struct CorsMiddleware {
    config: CorsConfig,
}

impl CorsMiddleware {
    /// Creates a builder.
    #[must_use]
    pub fn builder() -> CorsBuilder {
        CorsBuilder::new()
    }

    /// Returns the configuration.
    pub fn config(&self) -> &CorsConfig {
        &self.config
    }

    fn is_preflight(ctx: &RequestContext) -> bool {
        *ctx.method() == Method::OPTIONS
            && ctx.request().headers().contains_key(headers::ORIGIN)
            && ctx.request().headers().contains_key(headers::REQUEST_METHOD)
    }

    /// Checks the requested method and headers of a preflight.
    fn check_preflight(&self, ctx: &RequestContext) -> Result<(), String> {
        let requested = ctx.header(headers::REQUEST_METHOD).unwrap_or_default();
        let method = Method::from_bytes(requested.trim().as_bytes())
            .map_err(|_| format!("invalid preflight method {requested:?}"))?;
        if !self.config.allowed_methods.contains(&method) {
            return Err(format!("method {method} not allowed"));
        }

        if self.config.allows_any_header() {
            return Ok(());
        }
        if let Some(requested) = ctx.header(headers::REQUEST_HEADERS) {
            for header in requested
                .split(',')
                .map(|h| h.trim().to_ascii_lowercase())
                .filter(|h| !h.is_empty())
            {
                if !self.config.allowed_headers.contains(&header) {
                    return Err(format!("header {header:?} not allowed"));
                }
            }
        }
        Ok(())
    }

    fn preflight_response(&self, origin: &str, requested_headers: Option<&str>) -> Response {
        let mut response = empty_response(StatusCode::NO_CONTENT);
        let headers = response.headers_mut();

        self.insert_origin_headers(headers, origin);

        let methods = self
            .config
            .allowed_methods
            .iter()
            .map(Method::as_str)
            .collect::<Vec<_>>()
            .join(", ");
        if let Ok(value) = HeaderValue::from_str(&methods) {
            headers.insert(headers::ALLOW_METHODS, value);
        }

        // A wildcard is not honored for credentialed requests, so echo the
        // requested list instead.
        let allow_headers = if self.config.allows_any_header() && self.config.allow_credentials {
            requested_headers.unwrap_or_default().to_string()
        } else {
            self.config.allowed_headers.join(", ")
        };
        if !allow_headers.is_empty() {
            if let Ok(value) = HeaderValue::from_str(&allow_headers) {
                headers.insert(headers::ALLOW_HEADERS, value);
            }
        }

        if let Some(max_age) = self.config.max_age {
            headers.insert(headers::MAX_AGE, HeaderValue::from(max_age.as_secs()));
        }

        headers.insert(
            headers::VARY,
            HeaderValue::from_static(
                "Origin, Access-Control-Request-Method, Access-Control-Request-Headers",
            ),
        );

        response.with_outcome(Outcome::Matched)
    }

    fn insert_origin_headers(&self, headers: &mut HeaderMap, origin: &str) {
        if let Some(value) = self.config.origin_value(origin) {
            headers.insert(headers::ALLOW_ORIGIN, value);
        }
        if self.config.allow_credentials {
            headers.insert(headers::ALLOW_CREDENTIALS, HeaderValue::from_static("true"));
        }
    }

    /// Adds CORS headers to a response for an allowed origin.
    fn add_cors_headers(&self, response: &mut Response, origin: &str) {
        let headers = response.headers_mut();
        self.insert_origin_headers(headers, origin);

        if !self.config.expose_headers.is_empty() {
            if let Ok(value) = HeaderValue::from_str(&self.config.expose_headers.join(", ")) {
                headers.insert(headers::EXPOSE_HEADERS, value);
            }
        }

        headers.append(headers::VARY, HeaderValue::from_static("Origin"));
    }

    fn reject(&self, ctx: &RequestContext, reason: RejectReason, message: String) -> Response {
        tracing::info!(
            request_id = %ctx.request_id(),
            policy = self.name(),
            reason = reason.code(),
            origin = ctx.header(headers::ORIGIN).unwrap_or_default(),
            "cors rejected request"
        );
        let request_id = ctx.request_id().to_string();
        PolicyRejection::new(self.name(), reason, message).into_response(Some(&request_id))
    }
}

impl Middleware for CorsMiddleware {
    fn name(&self) -> &'static str {
        "cors"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        next: Next<'a>,
    ) -> BoxFuture<'a, ChainResult> {
        Box::pin(async move {
            let Some(origin) = ctx.header(headers::ORIGIN).map(String::from) else {
                return next.run(ctx).await;
            };

            if !self.config.allowed_origins.is_allowed(&origin) {
                return Ok(self.reject(
                    ctx,
                    RejectReason::OriginNotAllowed,
                    format!("origin {origin} is not allowed"),
                ));
            }

            if Self::is_preflight(ctx) {
                return Ok(match self.check_preflight(ctx) {
                    Ok(()) => {
                        self.preflight_response(&origin, ctx.header(headers::REQUEST_HEADERS))
                    }
                    Err(message) => self.reject(ctx, RejectReason::PreflightRejected, message),
                });
            }

            let mut response = next.run(ctx).await?;
            self.add_cors_headers(&mut response, &origin);
            Ok(response)
        })
    }
}
