//! Rate limiting middleware.
//!
//! Requests are grouped by a key (client IP, a header, a context value, or a
//! single global key) and each key gets its own budget. Two algorithms are
//! available:
//!
//! - **Token bucket** (default): a bucket of `capacity` tokens refilled at
//!   `capacity / window`. Each request consumes one token.
//! - **Sliding window**: a counter for the current window plus the previous
//!   window's count, weighted by how much of the previous window still
//!   overlaps the sliding interval.
//!
//! The consume-and-check step for one key runs under that key's map shard
//! lock, so concurrent requests for the same key can never overspend.
//!
//! ## Example
//!
//! ```
//! use flawless_middleware::stages::{RateLimitAlgorithm, RateLimitMiddleware};
//! use std::time::Duration;
//!
//! let rate_limit = RateLimitMiddleware::builder()
//!     .capacity(100)
//!     .window(Duration::from_secs(60))
//!     .algorithm(RateLimitAlgorithm::SlidingWindow)
//!     .per_header("x-api-key")
//!     .build();
//! # let _ = rate_limit;
//! ```

use crate::middleware::{ChainResult, Middleware, Next};
use dashmap::DashMap;
use flawless_core::{BoxFuture, PolicyRejection, RejectReason, Request, RequestContext, Response};
use http::HeaderValue;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Rate limit header names.
pub mod headers {
    /// Maximum requests allowed in the window.
    pub const LIMIT: &str = "x-ratelimit-limit";
    /// Remaining requests in current window.
    pub const REMAINING: &str = "x-ratelimit-remaining";
    /// Unix timestamp when the budget is fully restored.
    pub const RESET: &str = "x-ratelimit-reset";
    /// Seconds until the budget is fully restored.
    pub const RESET_AFTER: &str = "x-ratelimit-reset-after";
}

/// Context value key holding the remaining budget after a passed check.
pub const REMAINING_VALUE_KEY: &str = "rate_limit.remaining";

/// Counting algorithm used by a [`RateLimitStore`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitAlgorithm {
    /// Continuous refill at `capacity / window`.
    #[default]
    TokenBucket,
    /// Weighted two-window counter.
    SlidingWindow,
}

/// Budget applied to every key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    /// Maximum burst, and requests per window.
    pub capacity: u64,
    /// Refill period.
    pub window: Duration,
    /// Counting algorithm.
    pub algorithm: RateLimitAlgorithm,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            capacity: 1000,
            window: Duration::from_secs(1),
            algorithm: RateLimitAlgorithm::TokenBucket,
        }
    }
}

/// Result of one consume-and-check step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimitDecision {
    /// Whether the request may proceed.
    pub allowed: bool,
    /// The policy capacity.
    pub limit: u64,
    /// Requests left after this one.
    pub remaining: u64,
    /// Time until the budget is fully restored.
    pub reset_after: Duration,
    /// Time until one more request would be allowed, when rejected.
    pub retry_after: Option<Duration>,
}

/// Storage for per-key counters.
///
/// Implementations must make [`RateLimitStore::check`] atomic per key.
pub trait RateLimitStore: Send + Sync + 'static {
    /// Consumes one unit for `key` if the budget allows it.
    fn check(&self, key: &str, policy: &RateLimitPolicy, now: Instant) -> RateLimitDecision;

    /// Drops keys not seen for at least `idle`. Returns how many were removed.
    fn sweep(&self, idle: Duration, now: Instant) -> usize;

    /// Returns the number of tracked keys.
    fn len(&self) -> usize;

    /// Returns true if no keys are tracked.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Copy)]
enum Counter {
    Bucket {
        tokens: f64,
        refilled_at: Instant,
    },
    Window {
        count: u64,
        prev_count: u64,
        window_start: Instant,
    },
}

#[derive(Debug, Clone, Copy)]
struct KeyState {
    counter: Counter,
    last_seen: Instant,
}

impl KeyState {
    fn new(policy: &RateLimitPolicy, now: Instant) -> Self {
        let counter = match policy.algorithm {
            RateLimitAlgorithm::TokenBucket => Counter::Bucket {
                tokens: policy.capacity as f64,
                refilled_at: now,
            },
            RateLimitAlgorithm::SlidingWindow => Counter::Window {
                count: 0,
                prev_count: 0,
                window_start: now,
            },
        };
        Self {
            counter,
            last_seen: now,
        }
    }

    fn consume(&mut self, policy: &RateLimitPolicy, now: Instant) -> RateLimitDecision {
        self.last_seen = now;
        let limit = policy.capacity;
        let window = policy.window;

        match &mut self.counter {
            Counter::Bucket {
                tokens,
                refilled_at,
            } => {
                let capacity = limit as f64;
                let rate = capacity / window.as_secs_f64();
                let elapsed = now.saturating_duration_since(*refilled_at).as_secs_f64();
                *tokens = (*tokens + elapsed * rate).min(capacity);
                *refilled_at = now;

                if *tokens >= 1.0 {
                    *tokens -= 1.0;
                    RateLimitDecision {
                        allowed: true,
                        limit,
                        remaining: tokens.floor() as u64,
                        reset_after: secs_to_duration((capacity - *tokens) / rate),
                        retry_after: None,
                    }
                } else {
                    RateLimitDecision {
                        allowed: false,
                        limit,
                        remaining: 0,
                        reset_after: secs_to_duration((capacity - *tokens) / rate),
                        retry_after: Some(secs_to_duration((1.0 - *tokens) / rate)),
                    }
                }
            }
            Counter::Window {
                count,
                prev_count,
                window_start,
            } => {
                let elapsed = now.saturating_duration_since(*window_start);
                if elapsed >= window {
                    if elapsed >= window.saturating_mul(2) {
                        *prev_count = 0;
                        *window_start = now;
                    } else {
                        *prev_count = *count;
                        *window_start += window;
                    }
                    *count = 0;
                }

                let progress =
                    now.saturating_duration_since(*window_start).as_secs_f64() / window.as_secs_f64();
                let weighted = *count as f64 + *prev_count as f64 * (1.0 - progress);
                let reset_after = window.saturating_sub(now.saturating_duration_since(*window_start));

                if weighted + 1.0 <= limit as f64 {
                    *count += 1;
                    RateLimitDecision {
                        allowed: true,
                        limit,
                        remaining: (limit as f64 - weighted - 1.0).max(0.0).floor() as u64,
                        reset_after,
                        retry_after: None,
                    }
                } else {
                    let retry_after = if *count + 1 > limit || *prev_count == 0 {
                        reset_after
                    } else {
                        // Wait until the previous window's weight has decayed enough.
                        let target = 1.0 - (limit - *count - 1) as f64 / *prev_count as f64;
                        window.mul_f64((target - progress).max(0.0))
                    };
                    RateLimitDecision {
                        allowed: false,
                        limit,
                        remaining: 0,
                        reset_after,
                        retry_after: Some(retry_after),
                    }
                }
            }
        }
    }
}

fn secs_to_duration(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
}

/// In-process [`RateLimitStore`] backed by a sharded concurrent map.
#[derive(Debug, Default)]
pub struct MemoryRateLimitStore {
    entries: DashMap<String, KeyState>,
}

impl MemoryRateLimitStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl RateLimitStore for MemoryRateLimitStore {
    fn check(&self, key: &str, policy: &RateLimitPolicy, now: Instant) -> RateLimitDecision {
        if let Some(mut state) = self.entries.get_mut(key) {
            return state.consume(policy, now);
        }
        self.entries
            .entry(key.to_string())
            .or_insert_with(|| KeyState::new(policy, now))
            .consume(policy, now)
    }

    fn sweep(&self, idle: Duration, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, state| now.saturating_duration_since(state.last_seen) < idle);
        before.saturating_sub(self.entries.len())
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// How to extract the rate limit key from a request.
#[derive(Clone, Default)]
pub enum KeyExtractor {
    /// Client IP from `X-Forwarded-For`, `X-Real-IP` or the peer address.
    #[default]
    Ip,
    /// A specific header value. Requests without the header are not limited.
    Header(String),
    /// A string value a previous unit stored in the context bag.
    ContextValue(String),
    /// A custom function.
    Custom(Arc<dyn Fn(&RequestContext) -> Option<String> + Send + Sync>),
    /// Global rate limit (single key for all requests).
    Global,
}

impl KeyExtractor {
    /// Parses the textual form used in configuration files:
    /// `ip`, `global`, `header:<name>` or `value:<key>`.
    pub fn parse(spec: &str) -> Option<Self> {
        match spec {
            "ip" => Some(Self::Ip),
            "global" => Some(Self::Global),
            _ => {
                if let Some(name) = spec.strip_prefix("header:") {
                    (!name.is_empty()).then(|| Self::Header(name.to_ascii_lowercase()))
                } else if let Some(key) = spec.strip_prefix("value:") {
                    (!key.is_empty()).then(|| Self::ContextValue(key.to_string()))
                } else {
                    None
                }
            }
        }
    }

    fn extract(&self, ctx: &RequestContext) -> Option<String> {
        match self {
            Self::Ip => Some(client_ip(ctx.request())),
            Self::Header(name) => ctx.header(name.as_str()).map(String::from),
            Self::ContextValue(key) => ctx
                .value(key)
                .and_then(serde_json::Value::as_str)
                .map(String::from),
            Self::Custom(f) => f(ctx),
            Self::Global => Some("global".to_string()),
        }
    }
}

fn client_ip(request: &Request) -> String {
    let forwarded = request
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(ip) = forwarded {
        return ip.to_string();
    }
    if let Some(ip) = request.headers().get("x-real-ip").and_then(|v| v.to_str().ok()) {
        return ip.to_string();
    }
    request
        .extensions()
        .get::<SocketAddr>()
        .map_or_else(|| "unknown-ip".to_string(), |addr| addr.ip().to_string())
}

impl std::fmt::Debug for KeyExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ip => write!(f, "KeyExtractor::Ip"),
            Self::Header(h) => f.debug_tuple("KeyExtractor::Header").field(h).finish(),
            Self::ContextValue(k) => f.debug_tuple("KeyExtractor::ContextValue").field(k).finish(),
            Self::Custom(_) => write!(f, "KeyExtractor::Custom(<fn>)"),
            Self::Global => write!(f, "KeyExtractor::Global"),
        }
    }
}

/// Rate limiting middleware.
///
/// Passed requests get `X-RateLimit-Limit`, `X-RateLimit-Remaining`,
/// `X-RateLimit-Reset` and `X-RateLimit-Reset-After` on their response.
/// Rejected requests short-circuit with `429 Too Many Requests` and a
/// `Retry-After` hint.
#[derive(Clone)]
pub struct RateLimitMiddleware {
    policy: RateLimitPolicy,
    key_extractor: KeyExtractor,
    skip_predicate: Option<Arc<dyn Fn(&RequestContext) -> bool + Send + Sync>>,
    error_message: String,
    store: Arc<dyn RateLimitStore>,
}

impl std::fmt::Debug for RateLimitMiddleware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitMiddleware")
            .field("policy", &self.policy)
            .field("key_extractor", &self.key_extractor)
            .field("skip_predicate", &self.skip_predicate.is_some())
            .field("tracked_keys", &self.store.len())
            .finish_non_exhaustive()
    }
}

/// Builder for [`RateLimitMiddleware`].
pub struct RateLimitBuilder {
    policy: RateLimitPolicy,
    key_extractor: KeyExtractor,
    skip_predicate: Option<Arc<dyn Fn(&RequestContext) -> bool + Send + Sync>>,
    error_message: String,
    store: Option<Arc<dyn RateLimitStore>>,
}

impl Default for RateLimitBuilder {
    fn default() -> Self {
        Self {
            policy: RateLimitPolicy::default(),
            key_extractor: KeyExtractor::default(),
            skip_predicate: None,
            error_message: "Too many requests. Please try again later.".to_string(),
            store: None,
        }
    }
}

impl RateLimitBuilder {
    /// Creates a builder with the default policy: 1000 requests per second
    /// per client IP, token bucket.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the burst capacity and per-window budget.
    #[must_use]
    pub fn capacity(mut self, capacity: u64) -> Self {
        self.policy.capacity = capacity;
        self
    }

    /// Sets the refill window.
    #[must_use]
    pub fn window(mut self, window: Duration) -> Self {
        self.policy.window = window;
        self
    }

    /// Sets the refill window in seconds.
    #[must_use]
    pub fn window_secs(self, seconds: u64) -> Self {
        self.window(Duration::from_secs(seconds))
    }

    /// Selects the counting algorithm.
    #[must_use]
    pub fn algorithm(mut self, algorithm: RateLimitAlgorithm) -> Self {
        self.policy.algorithm = algorithm;
        self
    }

    /// Uses the client IP as the key.
    #[must_use]
    pub fn per_ip(mut self) -> Self {
        self.key_extractor = KeyExtractor::Ip;
        self
    }

    /// Uses a header value as the key.
    #[must_use]
    pub fn per_header(mut self, header_name: impl Into<String>) -> Self {
        self.key_extractor = KeyExtractor::Header(header_name.into().to_ascii_lowercase());
        self
    }

    /// Uses one budget for every request.
    #[must_use]
    pub fn global(mut self) -> Self {
        self.key_extractor = KeyExtractor::Global;
        self
    }

    /// Sets the key extractor.
    #[must_use]
    pub fn key_extractor(mut self, extractor: KeyExtractor) -> Self {
        self.key_extractor = extractor;
        self
    }

    /// Uses a custom key function.
    #[must_use]
    pub fn key_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(&RequestContext) -> Option<String> + Send + Sync + 'static,
    {
        self.key_extractor = KeyExtractor::Custom(Arc::new(f));
        self
    }

    /// Skips rate limiting for requests matching the predicate.
    #[must_use]
    pub fn skip<F>(mut self, f: F) -> Self
    where
        F: Fn(&RequestContext) -> bool + Send + Sync + 'static,
    {
        self.skip_predicate = Some(Arc::new(f));
        self
    }

    /// Sets the message returned when rate limited.
    #[must_use]
    pub fn error_message(mut self, message: impl Into<String>) -> Self {
        self.error_message = message.into();
        self
    }

    /// Uses a shared or custom store instead of a private in-memory one.
    #[must_use]
    pub fn store(mut self, store: Arc<dyn RateLimitStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Builds the middleware.
    ///
    /// A zero capacity or window is raised to the smallest usable value.
    #[must_use]
    pub fn build(self) -> RateLimitMiddleware {
        let policy = RateLimitPolicy {
            capacity: self.policy.capacity.max(1),
            window: self.policy.window.max(Duration::from_millis(1)),
            algorithm: self.policy.algorithm,
        };
        RateLimitMiddleware {
            policy,
            key_extractor: self.key_extractor,
            skip_predicate: self.skip_predicate,
            error_message: self.error_message,
            store: self
                .store
                .unwrap_or_else(|| Arc::new(MemoryRateLimitStore::new())),
        }
    }
}

impl RateLimitMiddleware {
    /// Creates a builder.
    #[must_use]
    pub fn builder() -> RateLimitBuilder {
        RateLimitBuilder::new()
    }

    /// Returns the policy.
    #[must_use]
    pub fn policy(&self) -> &RateLimitPolicy {
        &self.policy
    }

    /// Returns the backing store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn RateLimitStore> {
        &self.store
    }

    /// Drops keys idle for at least `idle`.
    pub fn sweep(&self, idle: Duration) -> usize {
        self.store.sweep(idle, Instant::now())
    }

    fn apply_headers(response: &mut Response, decision: &RateLimitDecision) {
        let reset_secs = decision.reset_after.as_secs_f64().ceil() as u64;
        let reset_timestamp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
            + reset_secs;

        let headers = response.headers_mut();
        headers.insert(headers::LIMIT, HeaderValue::from(decision.limit));
        headers.insert(headers::REMAINING, HeaderValue::from(decision.remaining));
        headers.insert(headers::RESET, HeaderValue::from(reset_timestamp));
        headers.insert(headers::RESET_AFTER, HeaderValue::from(reset_secs));
    }
}

impl Middleware for RateLimitMiddleware {
    fn name(&self) -> &'static str {
        "rate_limit"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        next: Next<'a>,
    ) -> BoxFuture<'a, ChainResult> {
        Box::pin(async move {
            if let Some(predicate) = &self.skip_predicate {
                if predicate(&*ctx) {
                    return next.run(ctx).await;
                }
            }

            let Some(key) = self.key_extractor.extract(ctx) else {
                return next.run(ctx).await;
            };

            let decision = self.store.check(&key, &self.policy, Instant::now());
            if !decision.allowed {
                let retry_after = decision.retry_after.unwrap_or(decision.reset_after);
                tracing::info!(
                    request_id = %ctx.request_id(),
                    policy = self.name(),
                    rate_limit.key = %key,
                    retry_after_ms = retry_after.as_millis() as u64,
                    "request rate limited"
                );
                let request_id = ctx.request_id().to_string();
                let mut response = PolicyRejection::new(
                    self.name(),
                    RejectReason::RateLimited,
                    self.error_message.clone(),
                )
                .with_retry_after(retry_after)
                .into_response(Some(&request_id));
                Self::apply_headers(&mut response, &decision);
                return Ok(response);
            }

            ctx.insert_value(REMAINING_VALUE_KEY, serde_json::json!(decision.remaining));
            let mut response = next.run(ctx).await?;
            Self::apply_headers(&mut response, &decision);
            Ok(response)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use flawless_core::{empty_response, handler_fn, Handler, Outcome, ResponseExt};
    use http::StatusCode;

    fn policy(capacity: u64, window_secs: u64, algorithm: RateLimitAlgorithm) -> RateLimitPolicy {
        RateLimitPolicy {
            capacity,
            window: Duration::from_secs(window_secs),
            algorithm,
        }
    }

    fn make_ctx(headers: &[(&str, &str)]) -> RequestContext {
        let mut builder = http::Request::builder().uri("/api");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        RequestContext::new(builder.body(Bytes::new()).unwrap())
    }

    fn ok_handler() -> impl Handler {
        handler_fn(|_ctx| Box::pin(async move { Ok(empty_response(StatusCode::OK)) }))
    }

    async fn dispatch(mw: &RateLimitMiddleware, ctx: &mut RequestContext) -> Response {
        let handler = ok_handler();
        let units: Vec<crate::BoxedMiddleware> = vec![Arc::new(mw.clone())];
        Next::new(&units, &[], &handler).run(ctx).await.unwrap()
    }

    #[test]
    fn test_token_bucket_exhausts_then_refills() {
        let store = MemoryRateLimitStore::new();
        let policy = policy(3, 3, RateLimitAlgorithm::TokenBucket);
        let start = Instant::now();

        for expected_remaining in [2, 1, 0] {
            let decision = store.check("k", &policy, start);
            assert!(decision.allowed);
            assert_eq!(decision.remaining, expected_remaining);
        }

        let denied = store.check("k", &policy, start);
        assert!(!denied.allowed);
        assert_eq!(denied.retry_after, Some(Duration::from_secs(1)));

        // One token per second.
        assert!(store.check("k", &policy, start + Duration::from_secs(1)).allowed);
        assert!(!store.check("k", &policy, start + Duration::from_secs(1)).allowed);
    }

    #[test]
    fn test_token_bucket_caps_at_capacity() {
        let store = MemoryRateLimitStore::new();
        let policy = policy(2, 1, RateLimitAlgorithm::TokenBucket);
        let start = Instant::now();

        store.check("k", &policy, start);
        let later = start + Duration::from_secs(60);
        assert_eq!(store.check("k", &policy, later).remaining, 1);
    }

    #[test]
    fn test_sliding_window_weights_previous_window() {
        let store = MemoryRateLimitStore::new();
        let policy = policy(4, 10, RateLimitAlgorithm::SlidingWindow);
        let start = Instant::now();

        for _ in 0..4 {
            assert!(store.check("k", &policy, start).allowed);
        }
        assert!(!store.check("k", &policy, start).allowed);

        // Half way into the next window the previous count weighs 2.
        let mid = start + Duration::from_secs(15);
        assert!(store.check("k", &policy, mid).allowed);
        assert!(store.check("k", &policy, mid).allowed);
        let denied = store.check("k", &policy, mid);
        assert!(!denied.allowed);
        assert!(denied.retry_after.is_some());

        // Two full windows later the history is gone.
        let late = start + Duration::from_secs(40);
        assert_eq!(store.check("k", &policy, late).remaining, 3);
    }

    #[test]
    fn test_keys_are_independent() {
        let store = MemoryRateLimitStore::new();
        let policy = policy(1, 60, RateLimitAlgorithm::TokenBucket);
        let now = Instant::now();

        assert!(store.check("a", &policy, now).allowed);
        assert!(!store.check("a", &policy, now).allowed);
        assert!(store.check("b", &policy, now).allowed);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_sweep_removes_idle_keys() {
        let store = MemoryRateLimitStore::new();
        let policy = RateLimitPolicy::default();
        let now = Instant::now();

        store.check("old", &policy, now);
        store.check("new", &policy, now + Duration::from_secs(50));

        let removed = store.sweep(Duration::from_secs(30), now + Duration::from_secs(60));
        assert_eq!(removed, 1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_key_extractor_parse() {
        assert!(matches!(KeyExtractor::parse("ip"), Some(KeyExtractor::Ip)));
        assert!(matches!(KeyExtractor::parse("global"), Some(KeyExtractor::Global)));
        assert!(matches!(
            KeyExtractor::parse("header:X-Api-Key"),
            Some(KeyExtractor::Header(name)) if name == "x-api-key"
        ));
        assert!(KeyExtractor::parse("header:").is_none());
        assert!(KeyExtractor::parse("cookie").is_none());
    }

    #[test]
    fn test_ip_key_prefers_forwarded_for() {
        let ctx = make_ctx(&[("x-forwarded-for", "10.0.0.1, 10.0.0.2"), ("x-real-ip", "10.9.9.9")]);
        assert_eq!(KeyExtractor::Ip.extract(&ctx).as_deref(), Some("10.0.0.1"));

        let ctx = make_ctx(&[("x-real-ip", "10.9.9.9")]);
        assert_eq!(KeyExtractor::Ip.extract(&ctx).as_deref(), Some("10.9.9.9"));

        let mut ctx = make_ctx(&[]);
        ctx.request_mut()
            .extensions_mut()
            .insert("192.168.1.5:4000".parse::<SocketAddr>().unwrap());
        assert_eq!(KeyExtractor::Ip.extract(&ctx).as_deref(), Some("192.168.1.5"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_middleware_rejects_with_retry_after() {
        let mw = RateLimitMiddleware::builder()
            .capacity(2)
            .window_secs(10)
            .per_header("x-api-key")
            .build();

        for _ in 0..2 {
            let mut ctx = make_ctx(&[("x-api-key", "abc")]);
            let response = dispatch(&mw, &mut ctx).await;
            assert_eq!(response.status(), StatusCode::OK);
            assert!(response.headers().contains_key(headers::LIMIT));
            assert!(ctx.value(REMAINING_VALUE_KEY).is_some());
        }

        let mut ctx = make_ctx(&[("x-api-key", "abc")]);
        let response = dispatch(&mw, &mut ctx).await;
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.outcome(), Some(Outcome::RejectedByPolicy));
        assert_eq!(response.headers()[http::header::RETRY_AFTER], "5");
        assert_eq!(response.headers()[headers::REMAINING], "0");

        tokio::time::advance(Duration::from_secs(5)).await;
        let mut ctx = make_ctx(&[("x-api-key", "abc")]);
        assert_eq!(dispatch(&mw, &mut ctx).await.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_missing_key_and_skip_bypass_limit() {
        let mw = RateLimitMiddleware::builder()
            .capacity(1)
            .window_secs(60)
            .per_header("x-api-key")
            .skip(|ctx| ctx.path() == "/health")
            .build();

        for _ in 0..3 {
            let mut ctx = make_ctx(&[]);
            assert_eq!(dispatch(&mw, &mut ctx).await.status(), StatusCode::OK);
        }
        assert!(mw.store().is_empty());
    }

    #[tokio::test]
    async fn test_shared_store_across_instances() {
        let store: Arc<dyn RateLimitStore> = Arc::new(MemoryRateLimitStore::new());
        let a = RateLimitMiddleware::builder()
            .capacity(1)
            .window_secs(60)
            .global()
            .store(Arc::clone(&store))
            .build();
        let b = RateLimitMiddleware::builder()
            .capacity(1)
            .window_secs(60)
            .global()
            .store(store)
            .build();

        let mut ctx = make_ctx(&[]);
        assert_eq!(dispatch(&a, &mut ctx).await.status(), StatusCode::OK);
        let mut ctx = make_ctx(&[]);
        assert_eq!(dispatch(&b, &mut ctx).await.status(), StatusCode::TOO_MANY_REQUESTS);
    }
}
