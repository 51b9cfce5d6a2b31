//! CSRF protection middleware.
//!
//! State-mutating requests must carry a token (by default in the
//! `X-CSRF-Token` header) equal to the token issued for the caller's session.
//! Safe methods (`GET`, `HEAD`, `OPTIONS`, `TRACE`) and exempt path prefixes
//! pass through unconditionally.
//!
//! Tokens are issued by a [`CsrfStore`], which the application shares with
//! whatever handler hands tokens to clients:
//!
//! ```
//! use flawless_middleware::stages::{CsrfMiddleware, CsrfStore};
//! use std::sync::Arc;
//!
//! let store = Arc::new(CsrfStore::default());
//! let csrf = CsrfMiddleware::builder().store(Arc::clone(&store)).build();
//!
//! let token = store.issue("session-123");
//! assert!(store.validate("session-123", &token).is_ok());
//! # let _ = csrf;
//! ```

use crate::middleware::{ChainResult, Middleware, Next};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use dashmap::DashMap;
use flawless_core::{BoxFuture, PolicyRejection, RejectReason, RequestContext};
use http::header::COOKIE;
use http::Method;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Default request header carrying the token.
pub const DEFAULT_HEADER_NAME: &str = "x-csrf-token";

/// Default cookie carrying the session id.
pub const DEFAULT_SESSION_COOKIE: &str = "session_id";

/// Default token lifetime.
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(3600);

/// Context value key set to `true` after a successful check.
pub const VALID_VALUE_KEY: &str = "csrf_valid";

/// Extension recorded on the context after a successful check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsrfVerified {
    /// The session the token was bound to.
    pub session_id: String,
}

/// Why a token failed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CsrfFailure {
    /// No token has been issued for the session.
    UnknownSession,
    /// The token does not match the issued one.
    Mismatch,
    /// The issued token expired and was discarded.
    Expired,
}

impl CsrfFailure {
    fn message(self) -> &'static str {
        match self {
            Self::UnknownSession => "no CSRF token issued for this session",
            Self::Mismatch => "CSRF token does not match",
            Self::Expired => "CSRF token expired",
        }
    }
}

#[derive(Debug, Clone)]
struct IssuedToken {
    value: String,
    expires_at: Instant,
}

/// Per-session token store.
#[derive(Debug)]
pub struct CsrfStore {
    tokens: DashMap<String, IssuedToken>,
    ttl: Duration,
}

impl Default for CsrfStore {
    fn default() -> Self {
        Self::new(DEFAULT_TOKEN_TTL)
    }
}

impl CsrfStore {
    /// Creates a store issuing tokens valid for `ttl`.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            tokens: DashMap::new(),
            ttl,
        }
    }

    /// Returns the token lifetime.
    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Issues a fresh token for `session_id`, replacing any previous one.
    ///
    /// Tokens are 32 random bytes encoded as URL-safe base64 without padding.
    pub fn issue(&self, session_id: &str) -> String {
        let bytes: [u8; 32] = rand::thread_rng().gen();
        let value = URL_SAFE_NO_PAD.encode(bytes);
        self.tokens.insert(
            session_id.to_string(),
            IssuedToken {
                value: value.clone(),
                expires_at: Instant::now() + self.ttl,
            },
        );
        value
    }

    /// Checks `token` against the token issued for `session_id`.
    ///
    /// An expired token is removed.
    pub fn validate(&self, session_id: &str, token: &str) -> Result<(), CsrfFailure> {
        let now = Instant::now();
        let expired = {
            let issued = self
                .tokens
                .get(session_id)
                .ok_or(CsrfFailure::UnknownSession)?;
            if now <= issued.expires_at {
                return if constant_time_eq(issued.value.as_bytes(), token.as_bytes()) {
                    Ok(())
                } else {
                    Err(CsrfFailure::Mismatch)
                };
            }
            issued.expires_at
        };
        self.tokens
            .remove_if(session_id, |_, issued| issued.expires_at == expired);
        Err(CsrfFailure::Expired)
    }

    /// Discards the token issued for `session_id`.
    pub fn revoke(&self, session_id: &str) -> bool {
        self.tokens.remove(session_id).is_some()
    }

    /// Removes every expired token. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let before = self.tokens.len();
        self.tokens.retain(|_, issued| now <= issued.expires_at);
        before.saturating_sub(self.tokens.len())
    }

    /// Returns the number of live sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Returns true if no tokens are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Where the session id comes from.
#[derive(Clone)]
pub enum SessionSource {
    /// A cookie with the given name.
    Cookie(String),
    /// A request header with the given name.
    Header(String),
    /// A custom function.
    Custom(Arc<dyn Fn(&RequestContext) -> Option<String> + Send + Sync>),
}

impl Default for SessionSource {
    fn default() -> Self {
        Self::Cookie(DEFAULT_SESSION_COOKIE.to_string())
    }
}

impl std::fmt::Debug for SessionSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cookie(name) => f.debug_tuple("SessionSource::Cookie").field(name).finish(),
            Self::Header(name) => f.debug_tuple("SessionSource::Header").field(name).finish(),
            Self::Custom(_) => write!(f, "SessionSource::Custom(<fn>)"),
        }
    }
}

impl SessionSource {
    fn extract(&self, ctx: &RequestContext) -> Option<String> {
        match self {
            Self::Cookie(name) => ctx
                .request()
                .headers()
                .get_all(COOKIE)
                .iter()
                .filter_map(|v| v.to_str().ok())
                .flat_map(|v| v.split(';'))
                .filter_map(|pair| pair.trim().split_once('='))
                .find(|(key, _)| *key == name.as_str())
                .map(|(_, value)| value.to_string())
                .filter(|value| !value.is_empty()),
            Self::Header(name) => ctx
                .header(name.as_str())
                .filter(|value| !value.is_empty())
                .map(String::from),
            Self::Custom(f) => f(ctx),
        }
    }
}

/// CSRF protection middleware.
#[derive(Debug, Clone)]
pub struct CsrfMiddleware {
    store: Arc<CsrfStore>,
    header_name: String,
    session: SessionSource,
    exempt_paths: Vec<String>,
}

impl Default for CsrfMiddleware {
    fn default() -> Self {
        CsrfBuilder::new().build()
    }
}

/// Builder for [`CsrfMiddleware`].
#[derive(Debug, Clone)]
pub struct CsrfBuilder {
    store: Option<Arc<CsrfStore>>,
    header_name: String,
    session: SessionSource,
    exempt_paths: Vec<String>,
}

impl Default for CsrfBuilder {
    fn default() -> Self {
        Self {
            store: None,
            header_name: DEFAULT_HEADER_NAME.to_string(),
            session: SessionSource::default(),
            exempt_paths: Vec::new(),
        }
    }
}

impl CsrfBuilder {
    /// Creates a builder with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses a shared token store.
    #[must_use]
    pub fn store(mut self, store: Arc<CsrfStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Sets the request header carrying the token.
    #[must_use]
    pub fn header_name(mut self, name: impl Into<String>) -> Self {
        self.header_name = name.into().to_ascii_lowercase();
        self
    }

    /// Reads the session id from a cookie.
    #[must_use]
    pub fn session_cookie(mut self, name: impl Into<String>) -> Self {
        self.session = SessionSource::Cookie(name.into());
        self
    }

    /// Reads the session id from a header.
    #[must_use]
    pub fn session_header(mut self, name: impl Into<String>) -> Self {
        self.session = SessionSource::Header(name.into().to_ascii_lowercase());
        self
    }

    /// Reads the session id with a custom function.
    #[must_use]
    pub fn session_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(&RequestContext) -> Option<String> + Send + Sync + 'static,
    {
        self.session = SessionSource::Custom(Arc::new(f));
        self
    }

    /// Exempts `prefix` and every path below it.
    ///
    /// Matching stops at segment boundaries, so `/api` covers `/api/x` but not
    /// `/apiary`.
    #[must_use]
    pub fn exempt_path(mut self, prefix: impl Into<String>) -> Self {
        self.exempt_paths.push(prefix.into());
        self
    }

    /// Builds the middleware.
    #[must_use]
    pub fn build(self) -> CsrfMiddleware {
        CsrfMiddleware {
            store: self.store.unwrap_or_default(),
            header_name: self.header_name,
            session: self.session,
            exempt_paths: self.exempt_paths,
        }
    }
}

impl CsrfMiddleware {
    /// Creates a builder.
    #[must_use]
    pub fn builder() -> CsrfBuilder {
        CsrfBuilder::new()
    }

    /// Returns the token store.
    #[must_use]
    pub fn store(&self) -> &Arc<CsrfStore> {
        &self.store
    }

    /// Returns true if the method cannot change server state.
    #[must_use]
    pub fn is_safe_method(method: &Method) -> bool {
        matches!(
            *method,
            Method::GET | Method::HEAD | Method::OPTIONS | Method::TRACE
        )
    }

    fn is_exempt(&self, path: &str) -> bool {
        self.exempt_paths.iter().any(|prefix| {
            path.strip_prefix(prefix.as_str()).is_some_and(|rest| {
                rest.is_empty() || rest.starts_with('/') || prefix.ends_with('/')
            })
        })
    }

    fn check(&self, ctx: &RequestContext) -> Result<String, PolicyRejection> {
        let Some(token) = ctx.header(self.header_name.as_str()).filter(|t| !t.is_empty()) else {
            return Err(PolicyRejection::new(
                self.name(),
                RejectReason::CsrfTokenMissing,
                format!("missing CSRF token in {} header", self.header_name),
            ));
        };
        let Some(session_id) = self.session.extract(ctx) else {
            return Err(PolicyRejection::new(
                self.name(),
                RejectReason::CsrfTokenInvalid,
                "no session bound to request",
            ));
        };
        self.store
            .validate(&session_id, token)
            .map(|()| session_id)
            .map_err(|failure| {
                PolicyRejection::new(self.name(), RejectReason::CsrfTokenInvalid, failure.message())
            })
    }
}

impl Middleware for CsrfMiddleware {
    fn name(&self) -> &'static str {
        "csrf"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        next: Next<'a>,
    ) -> BoxFuture<'a, ChainResult> {
        Box::pin(async move {
            if Self::is_safe_method(ctx.method()) || self.is_exempt(ctx.path()) {
                return next.run(ctx).await;
            }

            match self.check(ctx) {
                Ok(session_id) => {
                    ctx.insert_value(VALID_VALUE_KEY, serde_json::Value::Bool(true));
                    ctx.set_extension(CsrfVerified { session_id });
                    next.run(ctx).await
                }
                Err(rejection) => {
                    tracing::info!(
                        request_id = %ctx.request_id(),
                        policy = self.name(),
                        reason = rejection.reason.code(),
                        "csrf check failed"
                    );
                    ctx.insert_value(VALID_VALUE_KEY, serde_json::Value::Bool(false));
                    let request_id = ctx.request_id().to_string();
                    Ok(rejection.into_response(Some(&request_id)))
                }
            }
        })
    }
}
