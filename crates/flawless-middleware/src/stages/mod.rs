//! Built-in policy units.
//!
//! | Unit | Short-circuits with |
//! |------|---------------------|
//! | [`cors`] | `204` preflight answer, `403 ORIGIN_NOT_ALLOWED`, `403 PREFLIGHT_REJECTED` |
//! | [`rate_limit`] | `429 RATE_LIMITED` plus `Retry-After` |
//! | [`csrf`] | `403 CSRF_TOKEN_MISSING`, `403 CSRF_TOKEN_INVALID` |
//!
//! The usual order is CORS, then rate limiting, then CSRF, so preflights
//! are answered before they consume budget and every rejection still gets
//! CORS headers.

pub mod cors;
pub mod csrf;
pub mod rate_limit;

pub use cors::{AllowedOrigins, CorsBuilder, CorsConfig, CorsMiddleware};
pub use csrf::{CsrfBuilder, CsrfFailure, CsrfMiddleware, CsrfStore, CsrfVerified, SessionSource};
pub use rate_limit::{
    KeyExtractor, MemoryRateLimitStore, RateLimitAlgorithm, RateLimitBuilder, RateLimitDecision,
    RateLimitMiddleware, RateLimitPolicy, RateLimitStore,
};
